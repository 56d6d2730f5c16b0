//! Lease manager: mutual exclusion, holder checks, idempotent release,
//! and expiry.

mod common;

use common::{create_intent, test_engine, worker};
use openintent::errors::CoreError;
use openintent::model::{EventType, LeaseStatus};

#[tokio::test]
async fn concurrent_acquire_one_wins() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "S2 lease race").await;
    let agent_a = worker("agent-a");
    let agent_b = worker("agent-b");

    let (first, second) = tokio::join!(
        engine.acquire_lease(&agent_a, intent.id, "section.intro", 60),
        engine.acquire_lease(&agent_b, intent.id, "section.intro", 60),
    );
    let (lease, conflict) = match (first, second) {
        (Ok(lease), Err(e)) => (lease, e),
        (Err(e), Ok(lease)) => (lease, e),
        other => panic!("expected exactly one holder, got {other:?}"),
    };
    match &conflict {
        CoreError::LeaseConflict { holder, .. } => assert_eq!(*holder, lease.holder_agent_id),
        other => panic!("expected lease conflict, got {other}"),
    }

    // After release the loser's retry succeeds.
    let holder = worker(&lease.holder_agent_id);
    let loser = if lease.holder_agent_id == "agent-a" {
        agent_b
    } else {
        agent_a
    };
    engine
        .release_lease(&holder, intent.id, lease.id)
        .await
        .unwrap();
    let retried = engine
        .acquire_lease(&loser, intent.id, "section.intro", 60)
        .await
        .unwrap();
    assert_eq!(retried.holder_agent_id, loser.agent_id);
}

#[tokio::test]
async fn scopes_are_independent() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "scopes").await;
    let agent_a = worker("agent-a");
    let agent_b = worker("agent-b");

    engine
        .acquire_lease(&agent_a, intent.id, "section.1", 60)
        .await
        .unwrap();
    // No hierarchy inference: a nested-looking scope is its own claim.
    engine
        .acquire_lease(&agent_b, intent.id, "section.1.paragraph.2", 60)
        .await
        .unwrap();
}

#[tokio::test]
async fn invalid_scope_rejected() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "bad scope").await;
    for scope in ["", "a..b", "1bad", "a b"] {
        let err = engine
            .acquire_lease(&worker("agent-a"), intent.id, scope, 60)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "VALIDATION", "{scope}");
    }
}

#[tokio::test]
async fn renewal_requires_holder() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "renewal").await;
    let holder = worker("agent-a");
    let lease = engine
        .acquire_lease(&holder, intent.id, "section.body", 60)
        .await
        .unwrap();

    let err = engine
        .renew_lease(&worker("agent-b"), intent.id, lease.id, 60)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "LEASE_NOT_HELD");

    let renewed = engine
        .renew_lease(&holder, intent.id, lease.id, 120)
        .await
        .unwrap();
    assert!(renewed.expires_at > lease.expires_at);
}

#[tokio::test]
async fn release_is_idempotent_for_holder_only() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "release").await;
    let holder = worker("agent-a");
    let lease = engine
        .acquire_lease(&holder, intent.id, "section.body", 60)
        .await
        .unwrap();

    let released = engine
        .release_lease(&holder, intent.id, lease.id)
        .await
        .unwrap();
    assert_eq!(released.status, LeaseStatus::Released);
    // Double release is a no-op.
    let again = engine
        .release_lease(&holder, intent.id, lease.id)
        .await
        .unwrap();
    assert_eq!(again.status, LeaseStatus::Released);

    // A non-holder is rejected even after release.
    let err = engine
        .release_lease(&worker("agent-b"), intent.id, lease.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "LEASE_NOT_HELD");

    // One LEASE_RELEASED event, not two.
    let events = engine.list_events(intent.id, 1, 100).await.unwrap();
    let released_events = events
        .iter()
        .filter(|e| e.event_type == EventType::LeaseReleased)
        .count();
    assert_eq!(released_events, 1);
}

#[tokio::test]
async fn expired_lease_is_reacquirable_and_swept() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "expiry").await;
    let agent_a = worker("agent-a");
    let agent_b = worker("agent-b");

    // Minimum TTL is one second.
    engine
        .acquire_lease(&agent_a, intent.id, "section.body", 1)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1_300)).await;

    // Readers see the effective status without waiting for the sweeper.
    let listed = engine.list_leases(intent.id).await.unwrap();
    assert_eq!(listed[0].status, LeaseStatus::Expired);

    // Acquisition treats the stale lease as released.
    let retaken = engine
        .acquire_lease(&agent_b, intent.id, "section.body", 60)
        .await
        .unwrap();
    assert_eq!(retaken.holder_agent_id, "agent-b");

    let events = engine.list_events(intent.id, 1, 100).await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type == EventType::LeaseExpired)
    );
}

#[tokio::test]
async fn sweeper_marks_overdue_leases() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "sweeper").await;
    engine
        .acquire_lease(&worker("agent-a"), intent.id, "section.body", 1)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1_300)).await;

    let swept = engine.sweep_expired_leases().await.unwrap();
    assert_eq!(swept, 1);
    // A second pass finds nothing.
    assert_eq!(engine.sweep_expired_leases().await.unwrap(), 0);

    let events = engine.list_events(intent.id, 1, 100).await.unwrap();
    let expired = events
        .iter()
        .filter(|e| e.event_type == EventType::LeaseExpired)
        .count();
    assert_eq!(expired, 1);
}

#[tokio::test]
async fn ttl_clamped_to_bounds() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "clamp").await;
    let lease = engine
        .acquire_lease(&worker("agent-a"), intent.id, "section.body", 1_000_000)
        .await
        .unwrap();
    let ttl = lease.expires_at - lease.acquired_at;
    assert!(ttl <= chrono::Duration::seconds(86_400));
}
