//! Grid Worker - Entry Point
//!
//! Pull-based worker that claims jobs from the Redis pending index and
//! executes them through service connectors.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    grid_worker::run().await
}
