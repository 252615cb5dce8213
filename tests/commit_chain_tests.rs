use scanmint::commit::{
    AttemptJournal, ChainConfig, ChainNotification, CommitChain, CommitStep, ErrorClassifier,
    JournalEntry, RegistrationMode, RetryPolicy,
};
use scanmint::core::{CommitAction, CommitError, EntityId, QueryResponse, RemoteError};
use scanmint::remote::{
    AddressOnlySigner, CallKind, InMemoryBackend, ProcessBlueprint, RemoteContext, actions,
};
use scanmint::template::{PayloadTemplate, Placeholders};
use serde_json::json;
use std::sync::Arc;

const PARENT: &str = "collection-1";

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn backend() -> Arc<InMemoryBackend> {
    Arc::new(
        InMemoryBackend::new()
            .with_spawn_ids(["proc-abc"])
            .with_entity(id(PARENT), "collection-owner"),
    )
}

fn context(backend: &Arc<InMemoryBackend>) -> RemoteContext {
    RemoteContext::new(backend.clone(), Arc::new(AddressOnlySigner::new("wallet-1")))
}

fn steps(policy: RetryPolicy) -> Vec<CommitStep> {
    vec![
        CommitStep::spawn(ProcessBlueprint::new("module", "scheduler"), b"image".to_vec())
            .tag("Action", "Add-Uploaded-Asset"),
        CommitStep::execute(
            PayloadTemplate::new("Name = '<NAME>'\nOwner = '<OWNER>'"),
            Placeholders::new().set("NAME", "Scan").set("OWNER", "wallet-1"),
        )
        .with_policy(policy.clone()),
        CommitStep::register_with_parent(id(PARENT)).with_policy(policy),
    ]
}

#[tokio::test(start_paused = true)]
async fn execute_retries_until_success_then_registers_once() {
    let backend = backend();
    backend.fail_next_action(actions::EVAL, 2).await;
    let journal = AttemptJournal::new();

    let report = CommitChain::new(steps(RetryPolicy::unbounded()))
        .unwrap()
        .run(&context(&backend), &journal)
        .await
        .unwrap();

    assert_eq!(report.entity, id("proc-abc"));
    assert_eq!(report.attempts_for(CommitAction::Execute), 3);
    assert_eq!(report.attempts_for(CommitAction::RegisterWithParent), 1);
    assert_eq!(journal.attempts(CommitAction::Execute), 3);
    assert_eq!(journal.attempts(CommitAction::RegisterWithParent), 1);
    assert_eq!(
        journal.notifications(),
        vec![ChainNotification::Succeeded { id: id("proc-abc") }]
    );

    assert_eq!(backend.members(&id(PARENT)).await, vec![id("proc-abc")]);
    let record = backend.entity(&id("proc-abc")).await.unwrap();
    assert_eq!(record.evaluated, vec!["Name = 'Scan'\nOwner = 'wallet-1'".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_stops_the_chain_immediately() {
    let backend = backend();
    backend.fail_next_spawns(1).await;
    let journal = AttemptJournal::new();

    let err = CommitChain::new(steps(RetryPolicy::unbounded()))
        .unwrap()
        .run(&context(&backend), &journal)
        .await
        .unwrap_err();

    match err {
        CommitError::StepFailed {
            step,
            entity,
            attempts,
            ..
        } => {
            assert_eq!(step, CommitAction::Spawn);
            assert_eq!(entity, None);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected step failure, got {other:?}"),
    }

    assert_eq!(journal.attempts(CommitAction::Spawn), 1);
    assert_eq!(journal.attempts(CommitAction::Execute), 0);
    assert!(matches!(
        journal.notifications().as_slice(),
        [ChainNotification::Failed { id: None, step: CommitAction::Spawn, .. }]
    ));
    assert_eq!(backend.entity_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn calls_reach_the_backend_in_commit_order() {
    let backend = backend();
    backend.fail_next_action(actions::EVAL, 1).await;

    CommitChain::new(steps(RetryPolicy::unbounded()))
        .unwrap()
        .run(&context(&backend), &AttemptJournal::new())
        .await
        .unwrap();

    let writes: Vec<(CallKind, Option<String>, bool)> = backend
        .calls()
        .await
        .into_iter()
        .filter(|call| call.kind != CallKind::Query)
        .map(|call| (call.kind, call.action, call.succeeded))
        .collect();

    assert_eq!(
        writes,
        vec![
            (CallKind::Spawn, Some("Add-Uploaded-Asset".to_string()), true),
            (CallKind::Execute, Some(actions::EVAL.to_string()), false),
            (CallKind::Execute, Some(actions::EVAL.to_string()), true),
            (CallKind::Execute, Some(actions::UPDATE_ASSETS.to_string()), true),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn registration_is_skipped_when_parent_already_lists_entity() {
    let backend = backend();
    backend
        .set_query_response(
            id(PARENT),
            actions::INFO,
            QueryResponse::Json(json!({ "Assets": ["proc-abc"] })),
        )
        .await;

    let report = CommitChain::new(steps(RetryPolicy::unbounded()))
        .unwrap()
        .run(&context(&backend), &AttemptJournal::new())
        .await
        .unwrap();

    let (action, receipt) = report.receipts.last().unwrap();
    assert_eq!(*action, CommitAction::RegisterWithParent);
    assert!(receipt.replayed);

    let update_calls = backend
        .calls()
        .await
        .into_iter()
        .filter(|call| call.action.as_deref() == Some(actions::UPDATE_ASSETS))
        .count();
    assert_eq!(update_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn re_running_registration_does_not_duplicate_membership() {
    let backend = backend();
    let ctx = context(&backend);

    CommitChain::new(steps(RetryPolicy::unbounded()))
        .unwrap()
        .run(&ctx, &AttemptJournal::new())
        .await
        .unwrap();

    let register = CommitStep::register_with_parent(id(PARENT));
    let result = register
        .attempt(&ctx, Some(&id("proc-abc")), &ErrorClassifier::default())
        .await;
    assert!(result.is_success());

    assert_eq!(backend.members(&id(PARENT)).await, vec![id("proc-abc")]);
}

#[tokio::test(start_paused = true)]
async fn nested_mode_reruns_execute_when_registration_gives_up() {
    let backend = backend();
    backend.fail_next_action(actions::UPDATE_ASSETS, 2).await;
    let journal = AttemptJournal::new();

    let chain_steps = vec![
        steps(RetryPolicy::unbounded()).remove(0),
        CommitStep::execute(PayloadTemplate::new("return 1"), Placeholders::new())
            .with_policy(RetryPolicy::unbounded()),
        CommitStep::register_with_parent(id(PARENT)).with_policy(RetryPolicy::bounded(1)),
    ];

    let report = CommitChain::new(chain_steps)
        .unwrap()
        .run(&context(&backend), &journal)
        .await
        .unwrap();

    assert_eq!(report.attempts_for(CommitAction::Execute), 3);
    assert_eq!(report.attempts_for(CommitAction::RegisterWithParent), 3);
    assert_eq!(backend.entity(&id("proc-abc")).await.unwrap().evaluated.len(), 3);

    // Every eval was accepted; only the registrations failed.
    let outcomes = |step: CommitAction| -> Vec<bool> {
        journal
            .entries()
            .into_iter()
            .filter_map(|entry| match entry {
                JournalEntry::Attempt { step: s, result, .. } if s == step => {
                    Some(result.is_success())
                }
                _ => None,
            })
            .collect()
    };
    assert_eq!(outcomes(CommitAction::Execute), vec![true, true, true]);
    assert_eq!(
        outcomes(CommitAction::RegisterWithParent),
        vec![false, false, true]
    );
    assert_eq!(backend.members(&id(PARENT)).await, vec![id("proc-abc")]);
}

#[tokio::test(start_paused = true)]
async fn sequential_mode_reports_exhausted_registration() {
    let backend = backend();
    backend.fail_next_action(actions::UPDATE_ASSETS, 5).await;
    let journal = AttemptJournal::new();

    let chain_steps = vec![
        steps(RetryPolicy::unbounded()).remove(0),
        CommitStep::execute(PayloadTemplate::new("return 1"), Placeholders::new())
            .with_policy(RetryPolicy::unbounded()),
        CommitStep::register_with_parent(id(PARENT)).with_policy(RetryPolicy::bounded(2)),
    ];
    let config = ChainConfig {
        registration: RegistrationMode::Sequential,
        ..ChainConfig::default()
    };

    let err = CommitChain::new(chain_steps)
        .unwrap()
        .with_config(config)
        .run(&context(&backend), &journal)
        .await
        .unwrap_err();

    match err {
        CommitError::StepFailed {
            step,
            entity,
            attempts,
            ..
        } => {
            assert_eq!(step, CommitAction::RegisterWithParent);
            assert_eq!(entity, Some(id("proc-abc")));
            assert_eq!(attempts, 2);
        }
        other => panic!("expected step failure, got {other:?}"),
    }

    // Nothing is rolled back: the entity stays spawned and initialised.
    assert_eq!(journal.attempts(CommitAction::Execute), 1);
    assert_eq!(backend.entity(&id("proc-abc")).await.unwrap().evaluated.len(), 1);
    assert!(backend.members(&id(PARENT)).await.is_empty());
    assert!(matches!(
        journal.notifications().as_slice(),
        [ChainNotification::Failed { id: Some(_), step: CommitAction::RegisterWithParent, .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn strict_classifier_fails_fast_on_client_errors() {
    let backend = Arc::new(InMemoryBackend::new().with_spawn_ids(["proc-abc"]));
    let journal = AttemptJournal::new();
    let config = ChainConfig {
        registration: RegistrationMode::Sequential,
        classifier: ErrorClassifier::strict(),
    };

    // The parent does not exist, so the backend answers 404.
    let err = CommitChain::new(steps(RetryPolicy::unbounded()))
        .unwrap()
        .with_config(config)
        .run(&context(&backend), &journal)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommitError::StepFailed { step: CommitAction::RegisterWithParent, .. }
    ));
    assert_eq!(journal.attempts(CommitAction::RegisterWithParent), 1);
}

#[test]
fn remote_errors_render_their_kind() {
    let err = CommitError::from(RemoteError::Rejected {
        status: 503,
        body: "busy".to_string(),
    });
    assert_eq!(
        err.to_string(),
        "Remote error: Backend rejected request with status 503: busy"
    );
    tokio_test::assert_err!(EntityId::new(" "));
    tokio_test::assert_ok!(EntityId::new("proc-abc"));
}
