//! Intent lifecycle: optimistic concurrency, shallow-merge semantics, the
//! status state machine, terminal-state behavior, and idempotent creation.

mod common;

use common::{create_intent, orchestrator, test_engine, worker};
use openintent::errors::CoreError;
use openintent::model::{EventType, IntentFilter, IntentStatus, NewIntent};
use serde_json::json;

#[tokio::test]
async fn concurrent_updates_one_wins() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "S1 version conflict").await;
    assert_eq!(intent.version, 1);

    let agent_a = worker("agent-a");
    let agent_b = worker("agent-b");
    let (first, second) = tokio::join!(
        engine.update_state(&agent_a, intent.id, 1, json!({"a": 1})),
        engine.update_state(&agent_b, intent.id, 1, json!({"b": 2})),
    );

    let (winner, loser) = match (first, second) {
        (Ok(updated), Err(e)) => (updated, e),
        (Err(e), Ok(updated)) => (updated, e),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert_eq!(winner.version, 2);
    match loser {
        CoreError::VersionConflict { current_version } => assert_eq!(current_version, 2),
        other => panic!("expected version conflict, got {other}"),
    }

    // Exactly one STATE_PATCHED at sequence 2 (CREATED was 1).
    let events = engine.list_events(intent.id, 1, 100).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::Created);
    assert_eq!(events[0].sequence, 1);
    assert_eq!(events[1].event_type, EventType::StatePatched);
    assert_eq!(events[1].sequence, 2);
}

#[tokio::test]
async fn shallow_merge_preserves_unreferenced_keys() {
    let engine = test_engine().await;
    let agent = worker("agent-a");
    let intent = engine
        .create_intent(
            &orchestrator(),
            NewIntent {
                title: "merge semantics".to_string(),
                state: Some(json!({"keep": {"deep": true}, "replace": {"x": 1}})),
                ..NewIntent::default()
            },
        )
        .await
        .unwrap();

    let updated = engine
        .update_state(&agent, intent.id, 1, json!({"replace": {"y": 2}, "new": 3}))
        .await
        .unwrap();
    assert_eq!(
        updated.state,
        json!({"keep": {"deep": true}, "replace": {"y": 2}, "new": 3})
    );

    // Replace is wholesale.
    let replaced = engine
        .replace_state(&agent, intent.id, 2, json!({"only": true}))
        .await
        .unwrap();
    assert_eq!(replaced.state, json!({"only": true}));
    assert_eq!(replaced.version, 3);
}

#[tokio::test]
async fn non_object_patch_rejected() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "bad patch").await;
    let err = engine
        .update_state(&worker("agent-a"), intent.id, 1, json!([1, 2]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");
}

#[tokio::test]
async fn status_machine_enforced() {
    let engine = test_engine().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "status walk").await;

    // PENDING -> COMPLETED is not a legal edge.
    let err = engine
        .set_status(&agent, intent.id, 1, IntentStatus::Completed, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");

    let intent = engine
        .set_status(&agent, intent.id, 1, IntentStatus::Active, None)
        .await
        .unwrap();
    let intent = engine
        .set_status(&agent, intent.id, 2, IntentStatus::Blocked, None)
        .await
        .unwrap();
    let intent = engine
        .set_status(&agent, intent.id, 3, IntentStatus::Active, None)
        .await
        .unwrap();
    let intent = engine
        .set_status(
            &agent,
            intent.id,
            4,
            IntentStatus::Completed,
            Some("done".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);
    assert_eq!(intent.version, 5);
}

#[tokio::test]
async fn terminal_rejects_mutations_but_accepts_audit() {
    let engine = test_engine().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "terminal").await;
    engine
        .set_status(&agent, intent.id, 1, IntentStatus::Cancelled, None)
        .await
        .unwrap();

    let err = engine
        .update_state(&agent, intent.id, 2, json!({"x": 1}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");
    let err = engine
        .set_status(&agent, intent.id, 2, IntentStatus::Active, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");

    // Audit appends still land.
    let event = engine
        .add_comment(&agent, intent.id, "post-mortem note")
        .await
        .unwrap();
    assert_eq!(event.event_type, EventType::Comment);
}

#[tokio::test]
async fn engine_reserved_events_rejected_on_append() {
    let engine = test_engine().await;
    let intent = create_intent(&engine, "reserved").await;
    let err = engine
        .append_audit_event(
            &worker("agent-a"),
            intent.id,
            EventType::StatusChanged,
            json!({}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");
}

#[tokio::test]
async fn sequences_are_gapless_and_monotonic() {
    let engine = test_engine().await;
    let agent = worker("agent-a");
    let intent = create_intent(&engine, "sequences").await;
    for i in 0..10 {
        engine
            .add_comment(&agent, intent.id, &format!("note {i}"))
            .await
            .unwrap();
    }
    engine
        .update_state(&agent, intent.id, 1, json!({"i": 1}))
        .await
        .unwrap();

    let events = engine.list_events(intent.id, 1, 100).await.unwrap();
    let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
    let expected: Vec<i64> = (1..=12).collect();
    assert_eq!(sequences, expected);
}

#[tokio::test]
async fn idempotency_key_returns_original() {
    let engine = test_engine().await;
    let params = NewIntent {
        title: "idempotent create".to_string(),
        idempotency_key: Some("client-key-1".to_string()),
        ..NewIntent::default()
    };
    let first = engine
        .create_intent(&orchestrator(), params.clone())
        .await
        .unwrap();
    let second = engine.create_intent(&orchestrator(), params).await.unwrap();
    assert_eq!(first.id, second.id);

    let all = engine
        .list_intents(&IntentFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn concurrent_idempotent_creates_yield_one_intent() {
    let engine = test_engine().await;
    let params = NewIntent {
        title: "retry races the original".to_string(),
        idempotency_key: Some("client-key-race".to_string()),
        ..NewIntent::default()
    };
    let actor = orchestrator();
    let (first, second) = tokio::join!(
        engine.create_intent(&actor, params.clone()),
        engine.create_intent(&actor, params.clone()),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.id, second.id);

    let all = engine
        .list_intents(&IntentFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn list_filters_by_status_and_creator() {
    let engine = test_engine().await;
    let agent = worker("agent-a");
    let one = create_intent(&engine, "one").await;
    let _two = create_intent(&engine, "two").await;
    engine
        .set_status(&agent, one.id, 1, IntentStatus::Active, None)
        .await
        .unwrap();

    let active = engine
        .list_intents(&IntentFilter {
            status: Some(IntentStatus::Active),
            ..IntentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, one.id);

    let by_creator = engine
        .list_intents(&IntentFilter {
            creator_agent_id: Some("orchestrator-1".to_string()),
            ..IntentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_creator.len(), 2);
}

#[tokio::test]
async fn missing_parent_or_dependency_rejected() {
    let engine = test_engine().await;
    let err = engine
        .create_intent(
            &orchestrator(),
            NewIntent {
                title: "orphan".to_string(),
                parent_id: Some(uuid::Uuid::new_v4()),
                ..NewIntent::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");

    let err = engine
        .create_intent(
            &orchestrator(),
            NewIntent {
                title: "dangling dep".to_string(),
                depends_on: vec![uuid::Uuid::new_v4()],
                ..NewIntent::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");
}
