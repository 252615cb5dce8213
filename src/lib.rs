// ============================================================================
// scanmint Library
// ============================================================================

pub mod commit;
pub mod config;
pub mod core;
pub mod publish;
pub mod remote;
pub mod template;
pub mod web;

// Re-export main types for convenience
pub use core::{CommitAction, CommitError, EntityId, Receipt, RemoteError, Result, Tag};

pub use commit::{
    AttemptResult, ChainConfig, ChainNotification, CommitChain, CommitObserver, CommitReport,
    CommitStep, ErrorClassifier, RegistrationMode, RetryLoop, RetryPolicy,
};
pub use remote::{ProcessBlueprint, RemoteClient, RemoteContext, Signer};
pub use template::{PayloadTemplate, Placeholders};
