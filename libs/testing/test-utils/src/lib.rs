//! Shared test utilities for domain testing
//!
//! This crate provides reusable test infrastructure for the workspace:
//! - `TestRedis`: Redis container with automatic cleanup
//! - `TestDataBuilder`: Deterministic test data generation
//! - `assertions`: Custom assertion helpers
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{TestRedis, TestDataBuilder};
//! use redis::AsyncCommands;
//!
//! #[tokio::test]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let mut conn = redis.manager().await;
//!
//!     conn.set::<_, _, ()>("key", "value").await.unwrap();
//!     let value: String = conn.get("key").await.unwrap();
//!     assert_eq!(value, "value");
//! }
//! ```

use uuid::Uuid;

mod redis;

pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// This is the recommended way to create a builder for consistent test data.
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Generate a deterministic UUID for this test
    pub fn uuid(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Generate a unique job id scoped to this test
    pub fn job_id(&self, suffix: &str) -> String {
        format!("job-{}-{}", self.seed, suffix)
    }

    /// Generate a unique worker id scoped to this test
    pub fn worker_id(&self, suffix: &str) -> String {
        format!("worker-{}-{}", self.seed, suffix)
    }

    /// Generate a unique workflow id scoped to this test
    pub fn workflow_id(&self, suffix: &str) -> String {
        format!("wf-{}-{}", self.seed, suffix)
    }

    /// Generate a unique name for testing
    ///
    /// # Arguments
    ///
    /// * `prefix` - The type of resource (e.g., "webhook", "monitor")
    /// * `suffix` - A unique identifier within the test (e.g., "main", "backup")
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that an optional value is None
    pub fn assert_none<T: std::fmt::Debug>(value: Option<T>, context: &str) {
        if let Some(inner) = value {
            panic!("{}: expected None, got Some({:?})", context, inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.uuid(), builder2.uuid());
        assert_eq!(builder1.job_id("a"), builder2.job_id("a"));
        assert_eq!(
            builder1.name("webhook", "test"),
            builder2.name("webhook", "test")
        );
    }

    #[test]
    fn test_data_builder_from_name() {
        let builder1 = TestDataBuilder::from_test_name("my_test");
        let builder2 = TestDataBuilder::from_test_name("my_test");

        assert_eq!(builder1.uuid(), builder2.uuid());
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        // Different test names should generate different data
        assert_ne!(builder1.uuid(), builder2.uuid());
        assert_ne!(builder1.worker_id("w"), builder2.worker_id("w"));
    }
}
