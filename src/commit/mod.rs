//! Sequential remote commit protocol.
//!
//! A [`CommitChain`] spawns an entity, initializes it and optionally
//! registers it with a parent collection. Each [`CommitStep`] is driven by
//! a [`RetryLoop`] under its own [`RetryPolicy`]; earlier steps are never
//! rolled back when a later one fails.

pub mod chain;
pub mod observer;
pub mod retry;
pub mod step;

pub use chain::{ChainConfig, CommitChain, CommitReport, RegistrationMode};
pub use observer::{
    AttemptJournal, ChainNotification, CommitObserver, JournalEntry, NoopObserver, ObserverSet,
    TracingObserver,
};
pub use retry::{
    DEFAULT_RETRY_DELAY, ErrorClass, ErrorClassifier, RetryLoop, RetryOutcome, RetryPolicy,
};
pub use step::{
    AttemptResult, CommitStep, REGISTRATION_TEMPLATE, StepPayload, lists_member,
    registration_key,
};
