//! End-to-end bootstrap against a mock backend

use serde_json::json;
use tavern_engine::{BootError, BootEvent, BootOutcome, BootState, Teardown};
use tavern_net::{AttemptFailure, RetryError};
use tavern_types::{EntityId, StageId, UserId};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    IDENTIFY_PATH, SELECTED_ENTITY, USER_ID, bootstrap_for, entity_path, mount_healthy_backend,
    requests_to, user_path,
};

fn drain(mut rx: mpsc::UnboundedReceiver<BootEvent>) -> Vec<BootEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn completed(events: &[BootEvent]) -> Vec<(StageId, u32)> {
    events
        .iter()
        .filter_map(|event| match event {
            BootEvent::StageCompleted {
                stage, attempts, ..
            } => Some((*stage, *attempts)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn identity_recovers_then_every_stage_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IDENTIFY_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_healthy_backend(&server).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let outcome = bootstrap_for(&server)
        .run(&Teardown::new(), Some(tx))
        .await
        .expect("bootstrap succeeds");

    let BootOutcome::Ready(session) = outcome else {
        panic!("expected a ready session");
    };
    assert_eq!(session.user_id(), UserId::new(USER_ID));
    assert_eq!(session.selected_entity(), EntityId::new(SELECTED_ENTITY));
    assert_eq!(session.identity.entity_ids.len(), 3);
    assert_eq!(session.account.roster.len(), 3);
    assert_eq!(session.account.notification_count, 3);
    assert_eq!(session.account.energy, 80);
    assert_eq!(session.selected.characteristics[0].name, "grit");
    assert_eq!(session.selected.interactions.len(), 2);
    assert!(session.selected.scene.background_url.contains("/img/bg.png?t="));

    assert_eq!(requests_to(&server, IDENTIFY_PATH).await, 3);

    let events = drain(rx);
    let stages = completed(&events);
    assert_eq!(stages.len(), 8);
    assert_eq!(stages[0], (StageId::Identity, 3));
    let fan_out_a: Vec<StageId> = stages[1..5].iter().map(|(s, _)| *s).collect();
    let fan_out_b: Vec<StageId> = stages[5..].iter().map(|(s, _)| *s).collect();
    for stage in [StageId::Menu, StageId::Notifications, StageId::Roster, StageId::Energy] {
        assert!(fan_out_a.contains(&stage), "{stage} not in first fan-out");
    }
    for stage in [StageId::Characteristics, StageId::Scene, StageId::Interactions] {
        assert!(fan_out_b.contains(&stage), "{stage} not in second fan-out");
    }
    assert!(stages[1..].iter().all(|(_, attempts)| *attempts == 1));

    let selection = events
        .iter()
        .position(|e| *e == BootEvent::SelectionResolved { entity: EntityId::new(SELECTED_ENTITY) })
        .expect("selection reported");
    let first_entity_stage = events
        .iter()
        .position(|e| matches!(e, BootEvent::StageCompleted { stage, .. } if fan_out_b.contains(stage)))
        .expect("entity stages reported");
    assert!(selection < first_entity_stage);
    assert_eq!(events.last(), Some(&BootEvent::Ready));
}

#[tokio::test]
async fn invalid_notifications_halt_bootstrap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(user_path("notifications/count")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unread": "many"})))
        .mount(&server)
        .await;
    mount_healthy_backend(&server).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let err = bootstrap_for(&server)
        .run(&Teardown::new(), Some(tx))
        .await
        .expect_err("notifications never validate");

    let BootError::Terminal { stage, source } = &err else {
        panic!("expected a terminal stage error, got {err}");
    };
    assert_eq!(*stage, StageId::Notifications);
    assert_eq!(source.label(), "notifications");
    assert!(matches!(
        source,
        RetryError::Exhausted {
            attempts: 4,
            last: AttemptFailure::InvalidResult(_),
            ..
        }
    ));
    assert!(err.to_string().contains("notifications failed after 4 attempts"));

    assert_eq!(requests_to(&server, &user_path("notifications/count")).await, 4);
    for suffix in ["characteristics", "scene", "interactions"] {
        assert_eq!(requests_to(&server, &entity_path(suffix)).await, 0, "{suffix}");
    }

    let events = drain(rx);
    assert!(
        !completed(&events)
            .iter()
            .any(|(stage, _)| *stage == StageId::Notifications)
    );
    assert!(!events.iter().any(|e| matches!(e, BootEvent::SelectionResolved { .. })));
    assert!(matches!(events.last(), Some(BootEvent::Failed { message }) if message.contains("notifications")));
    assert!(matches!(
        BootState::settle(Err(err)),
        Some(BootState::Failed(BootError::Terminal { .. }))
    ));
}

#[tokio::test]
async fn server_errors_on_entity_stage_are_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(entity_path("interactions")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    mount_healthy_backend(&server).await;

    let err = bootstrap_for(&server)
        .run(&Teardown::new(), None)
        .await
        .expect_err("interactions always fail");

    assert_eq!(err.stage(), Some(StageId::Interactions));
    assert!(matches!(
        err,
        BootError::Terminal {
            source: RetryError::Exhausted {
                last: AttemptFailure::Transport(_),
                ..
            },
            ..
        }
    ));
    assert_eq!(requests_to(&server, &entity_path("interactions")).await, 4);
}

#[tokio::test]
async fn roster_without_default_selects_first_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(user_path("characters")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"characters": [
            {"id": SELECTED_ENTITY, "name": "Moss"},
            {"id": 7, "name": "Wren"}
        ]})))
        .mount(&server)
        .await;
    mount_healthy_backend(&server).await;

    let outcome = bootstrap_for(&server)
        .run(&Teardown::new(), None)
        .await
        .expect("bootstrap succeeds");

    let state = BootState::settle(Ok(outcome)).expect("not torn down");
    let session = state.session().expect("ready");
    assert_eq!(session.selected_entity(), EntityId::new(SELECTED_ENTITY));
}

#[tokio::test]
async fn teardown_before_start_commits_nothing() {
    let server = MockServer::start().await;
    mount_healthy_backend(&server).await;
    let teardown = Teardown::new();
    teardown.fire();

    let (tx, rx) = mpsc::unbounded_channel();
    let outcome = bootstrap_for(&server)
        .run(&teardown, Some(tx))
        .await
        .expect("teardown is not an error");

    assert_eq!(outcome, BootOutcome::TornDown);
    assert!(drain(rx).is_empty());
    assert_eq!(requests_to(&server, IDENTIFY_PATH).await, 0);
}
