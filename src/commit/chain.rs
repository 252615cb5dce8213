use super::observer::{ChainNotification, CommitObserver, NoopObserver};
use super::retry::{ErrorClassifier, RetryLoop, RetryOutcome};
use super::step::{AttemptResult, CommitStep};
use crate::core::{CommitAction, CommitError, EntityId, Receipt, Result};
use crate::remote::RemoteContext;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{Instrument, info_span};

/// How a trailing registration step is driven relative to the execute step before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationMode {
    /// Register right after each successful execute; if registration gives up,
    /// the execute and the registration are retried together.
    #[default]
    Nested,
    /// Finish the execute loop, then run the registration loop.
    Sequential,
}

impl FromStr for RegistrationMode {
    type Err = CommitError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nested" => Ok(Self::Nested),
            "sequential" => Ok(Self::Sequential),
            other => Err(CommitError::Validation(format!(
                "registration mode must be one of: nested, sequential (got '{}')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    pub registration: RegistrationMode,
    pub classifier: ErrorClassifier,
}

/// What a completed chain committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub entity: EntityId,
    /// Receipts in commit order.
    pub receipts: Vec<(CommitAction, Receipt)>,
    /// Attempts made per action.
    pub attempts: BTreeMap<CommitAction, u32>,
}

impl CommitReport {
    pub fn attempts_for(&self, action: CommitAction) -> u32 {
        self.attempts.get(&action).copied().unwrap_or(0)
    }
}

/// Ordered spawn → execute… → register workflow.
///
/// Steps run strictly in order and nothing is rolled back: when a later
/// step fails, the entity created by the spawn stays in place.
#[derive(Debug, Clone)]
pub struct CommitChain {
    steps: Vec<CommitStep>,
    config: ChainConfig,
}

/// Failure of one step while the chain is running.
struct StepFailure {
    step: CommitAction,
    attempts: u32,
    reason: String,
}

#[derive(Default)]
struct NestedState {
    registration: Option<Receipt>,
    register_attempts: u32,
    last_failed: Option<CommitAction>,
}

impl CommitChain {
    /// Validates the step order and the templates.
    ///
    /// A chain is one spawn, at least one execute when a registration follows,
    /// and at most one registration, placed last.
    pub fn new(steps: Vec<CommitStep>) -> Result<Self> {
        let Some(first) = steps.first() else {
            return Err(CommitError::validation("commit chain has no steps"));
        };
        if first.action != CommitAction::Spawn {
            return Err(CommitError::validation(
                "commit chain must start with a spawn step",
            ));
        }

        let last_index = steps.len() - 1;
        for (index, step) in steps.iter().enumerate().skip(1) {
            match step.action {
                CommitAction::Spawn => {
                    return Err(CommitError::validation(
                        "commit chain may contain only one spawn step",
                    ));
                }
                CommitAction::Execute if step.target.is_some() => {
                    return Err(CommitError::validation(
                        "execute steps always address the spawned entity",
                    ));
                }
                CommitAction::Execute => {}
                CommitAction::RegisterWithParent => {
                    if index != last_index {
                        return Err(CommitError::validation(
                            "registration must be the last step",
                        ));
                    }
                    if index == 1 {
                        return Err(CommitError::validation(
                            "registration must follow an execute step",
                        ));
                    }
                    if step.target.is_none() {
                        return Err(CommitError::validation(
                            "registration step needs a parent entity",
                        ));
                    }
                }
            }
            step.check_template()?;
        }

        Ok(Self {
            steps,
            config: ChainConfig::default(),
        })
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn steps(&self) -> &[CommitStep] {
        &self.steps
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Runs every step once to a terminal result and emits one notification.
    pub async fn run(
        self,
        ctx: &RemoteContext,
        observer: &dyn CommitObserver,
    ) -> Result<CommitReport> {
        let span = info_span!("commit_chain", steps = self.steps.len());
        self.run_steps(ctx, observer).instrument(span).await
    }

    async fn run_steps(
        &self,
        ctx: &RemoteContext,
        observer: &dyn CommitObserver,
    ) -> Result<CommitReport> {
        let mut receipts = Vec::with_capacity(self.steps.len());
        let mut attempts = BTreeMap::new();

        let spawn = &self.steps[0];
        let outcome = self.drive_single(spawn, ctx, None, observer).await;
        *attempts.entry(CommitAction::Spawn).or_insert(0) += outcome.attempts;
        let entity = match outcome.result {
            AttemptResult::Success(receipt) => {
                let entity = receipt.entity.clone();
                receipts.push((CommitAction::Spawn, receipt));
                entity
            }
            other => {
                let failure = StepFailure {
                    step: CommitAction::Spawn,
                    attempts: outcome.attempts,
                    reason: failure_reason(other),
                };
                return Err(Self::fail(None, failure, observer));
            }
        };

        let rest = &self.steps[1..];
        let mut index = 0;
        while index < rest.len() {
            let step = &rest[index];
            let next = rest.get(index + 1);

            let nested_registration = self.config.registration == RegistrationMode::Nested
                && step.action == CommitAction::Execute
                && next.is_some_and(|next| next.action == CommitAction::RegisterWithParent);

            if nested_registration {
                let Some(register) = next else { break };
                match self
                    .drive_nested(step, register, ctx, &entity, observer)
                    .await
                {
                    Ok((execute_receipt, register_receipt, execute_attempts, register_attempts)) => {
                        *attempts.entry(CommitAction::Execute).or_insert(0) += execute_attempts;
                        *attempts.entry(CommitAction::RegisterWithParent).or_insert(0) +=
                            register_attempts;
                        receipts.push((CommitAction::Execute, execute_receipt));
                        receipts.push((CommitAction::RegisterWithParent, register_receipt));
                    }
                    Err(failure) => return Err(Self::fail(Some(entity), failure, observer)),
                }
                index += 2;
                continue;
            }

            let outcome = self.drive_single(step, ctx, Some(&entity), observer).await;
            *attempts.entry(step.action).or_insert(0) += outcome.attempts;
            match outcome.result {
                AttemptResult::Success(receipt) => receipts.push((step.action, receipt)),
                other => {
                    let failure = StepFailure {
                        step: step.action,
                        attempts: outcome.attempts,
                        reason: failure_reason(other),
                    };
                    return Err(Self::fail(Some(entity), failure, observer));
                }
            }
            index += 1;
        }

        observer.on_chain_finished(&ChainNotification::Succeeded {
            id: entity.clone(),
        });
        Ok(CommitReport {
            entity,
            receipts,
            attempts,
        })
    }

    async fn drive_single(
        &self,
        step: &CommitStep,
        ctx: &RemoteContext,
        entity: Option<&EntityId>,
        observer: &dyn CommitObserver,
    ) -> RetryOutcome {
        let classifier = &self.config.classifier;
        RetryLoop::new(step.action, &step.policy, observer)
            .drive(|_| step.attempt(ctx, entity, classifier))
            .await
    }

    /// Execute and register as one retried unit, driven by the execute policy.
    async fn drive_nested(
        &self,
        execute: &CommitStep,
        register: &CommitStep,
        ctx: &RemoteContext,
        entity: &EntityId,
        observer: &dyn CommitObserver,
    ) -> std::result::Result<(Receipt, Receipt, u32, u32), StepFailure> {
        let classifier = &self.config.classifier;
        let state = Mutex::new(NestedState::default());
        let state_ref = &state;

        // Execute and register attempts report themselves; the unit result does not.
        let outcome = RetryLoop::new(CommitAction::Execute, &execute.policy, &NoopObserver)
            .drive(move |attempt_no| async move {
                let result = execute.attempt(ctx, Some(entity), classifier).await;
                observer.on_attempt(CommitAction::Execute, attempt_no, &result);
                let receipt = match result {
                    AttemptResult::Success(receipt) => receipt,
                    other => {
                        if let Ok(mut state) = state_ref.lock() {
                            state.last_failed = Some(CommitAction::Execute);
                        }
                        return other;
                    }
                };

                let inner =
                    RetryLoop::new(CommitAction::RegisterWithParent, &register.policy, observer)
                        .drive(|_| register.attempt(ctx, Some(entity), classifier))
                        .await;

                let mut state = match state_ref.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.register_attempts += inner.attempts;
                match inner.result {
                    AttemptResult::Success(registration) => {
                        state.registration = Some(registration);
                        AttemptResult::Success(receipt)
                    }
                    other => {
                        state.last_failed = Some(CommitAction::RegisterWithParent);
                        AttemptResult::RetryableFailure(format!(
                            "registration failed: {}",
                            failure_reason(other)
                        ))
                    }
                }
            })
            .await;

        let state = match state.into_inner() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        match (outcome.result, state.registration) {
            (AttemptResult::Success(receipt), Some(registration)) => Ok((
                receipt,
                registration,
                outcome.attempts,
                state.register_attempts,
            )),
            (AttemptResult::Success(_), None) => Err(StepFailure {
                step: CommitAction::RegisterWithParent,
                attempts: state.register_attempts,
                reason: "registration produced no receipt".to_string(),
            }),
            (other, _) => {
                let step = state.last_failed.unwrap_or(CommitAction::Execute);
                let attempts = match step {
                    CommitAction::RegisterWithParent => state.register_attempts,
                    _ => outcome.attempts,
                };
                Err(StepFailure {
                    step,
                    attempts,
                    reason: failure_reason(other),
                })
            }
        }
    }

    fn fail(
        entity: Option<EntityId>,
        failure: StepFailure,
        observer: &dyn CommitObserver,
    ) -> CommitError {
        observer.on_chain_finished(&ChainNotification::Failed {
            id: entity.clone(),
            step: failure.step,
            reason: failure.reason.clone(),
        });
        CommitError::StepFailed {
            step: failure.step,
            entity,
            attempts: failure.attempts,
            reason: failure.reason,
        }
    }
}

fn failure_reason(result: AttemptResult) -> String {
    match result {
        AttemptResult::FatalFailure(reason) | AttemptResult::RetryableFailure(reason) => reason,
        AttemptResult::Success(receipt) => format!("unexpected success {}", receipt.message_id),
    }
}
