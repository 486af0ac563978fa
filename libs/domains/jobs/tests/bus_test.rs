//! Event bus integration tests.

use domain_jobs::EventBus;
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use test_utils::TestRedis;

fn assigned(job_id: &str) -> EventEnvelope {
    EventEnvelope::new(LifecycleEvent::JobAssigned {
        job_id: job_id.into(),
        worker_id: "w1".into(),
    })
}

#[tokio::test]
async fn test_publish_and_tail_in_order() {
    let redis = TestRedis::new().await;
    let bus = EventBus::new(redis.manager().await);

    bus.publish(&assigned("j1")).await.unwrap();
    bus.publish(&assigned("j2")).await.unwrap();
    bus.publish(&assigned("j3")).await.unwrap();

    let events = bus.read_after("0-0", 100, 10).await.unwrap();
    assert_eq!(events.len(), 3);
    let ids: Vec<&str> = events
        .iter()
        .map(|(_, e)| e.event.job_id().unwrap())
        .collect();
    assert_eq!(ids, vec!["j1", "j2", "j3"]);
}

#[tokio::test]
async fn test_cursor_resumes_after_last_entry() {
    let redis = TestRedis::new().await;
    let bus = EventBus::new(redis.manager().await);

    bus.publish(&assigned("j1")).await.unwrap();
    let first = bus.read_after("0-0", 100, 10).await.unwrap();
    let cursor = first.last().unwrap().0.clone();

    bus.publish(&assigned("j2")).await.unwrap();
    let rest = bus.read_after(&cursor, 100, 10).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].1.event.job_id(), Some("j2"));
}

#[tokio::test]
async fn test_block_timeout_returns_empty() {
    let redis = TestRedis::new().await;
    let bus = EventBus::new(redis.manager().await);

    bus.publish(&assigned("j1")).await.unwrap();
    let all = bus.read_after("0-0", 100, 10).await.unwrap();
    let cursor = all.last().unwrap().0.clone();

    let empty = bus.read_after(&cursor, 50, 10).await.unwrap();
    assert!(empty.is_empty());
}
