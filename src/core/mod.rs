pub mod error;
pub mod types;

pub use error::{CommitError, RemoteError, RemoteResult, Result, TemplateError};
pub use types::{CommitAction, EntityId, QueryResponse, Receipt, Tag, find_tag};
