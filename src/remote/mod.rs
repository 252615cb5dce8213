//! Remote operation client boundary.
//!
//! The commit protocol talks to the backend only through [`RemoteClient`]
//! and hands a [`Signer`] through unmodified. Both are bundled into a
//! [`RemoteContext`] that is built once at startup and shared by reference.

pub mod gateway;
pub mod memory;
pub mod signer;

use crate::core::{EntityId, QueryResponse, Receipt, RemoteResult, Tag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

pub use gateway::{GatewayClient, GatewayConfig, decode_dry_run};
pub use memory::{CallKind, CallRecord, EntityRecord, InMemoryBackend};
pub use signer::{AddressOnlySigner, HttpSigner};

/// `Action` tag values understood by spawned processes.
pub mod actions {
    /// Evaluates the message data as process source.
    pub const EVAL: &str = "Eval";
    /// Adds or removes asset ids from a collection.
    pub const UPDATE_ASSETS: &str = "Update-Assets";
    /// Reads process state.
    pub const INFO: &str = "Info";
}

/// Tag carrying the client-supplied idempotency key of a registration.
pub const IDEMPOTENCY_KEY_TAG: &str = "Idempotency-Key";

/// Module and scheduler a new process is spawned from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBlueprint {
    pub module: String,
    pub scheduler: String,
}

impl ProcessBlueprint {
    pub fn new(module: impl Into<String>, scheduler: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            scheduler: scheduler.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub blueprint: ProcessBlueprint,
    pub tags: Vec<Tag>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub target: EntityId,
    pub tags: Vec<Tag>,
    pub data: String,
}

/// Side-effect-free read. `action` is sent as the leading `Action` tag.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub target: EntityId,
    pub action: String,
    pub tags: Vec<Tag>,
    pub data: JsonValue,
}

impl QueryRequest {
    pub fn new(target: EntityId, action: impl Into<String>) -> Self {
        Self {
            target,
            action: action.into(),
            tags: Vec::new(),
            data: JsonValue::Null,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    /// Tags as submitted: `Action` first, then the extra tags.
    pub fn all_tags(&self) -> Vec<Tag> {
        let mut tags = Vec::with_capacity(self.tags.len() + 1);
        tags.push(Tag::action(self.action.clone()));
        tags.extend(self.tags.iter().cloned());
        tags
    }
}

/// Unsigned message handed to a [`Signer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataItem {
    pub target: Option<EntityId>,
    pub anchor: Option<String>,
    pub tags: Vec<Tag>,
    pub data: Vec<u8>,
}

/// Signed message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDataItem {
    pub id: String,
    pub raw: Vec<u8>,
}

/// Credential-bound signing capability. Never inspected by the commit core.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Owner address of the bound credential.
    fn address(&self) -> &str;

    async fn sign(&self, item: &DataItem) -> RemoteResult<SignedDataItem>;
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn spawn(&self, signer: &dyn Signer, request: SpawnRequest) -> RemoteResult<EntityId>;

    async fn execute(&self, signer: &dyn Signer, request: ExecuteRequest)
    -> RemoteResult<Receipt>;

    async fn query(&self, request: QueryRequest) -> RemoteResult<QueryResponse>;
}

/// Client capability plus signer, constructed once and shared by every publish flow.
#[derive(Clone)]
pub struct RemoteContext {
    client: Arc<dyn RemoteClient>,
    signer: Arc<dyn Signer>,
}

impl RemoteContext {
    pub fn new(client: Arc<dyn RemoteClient>, signer: Arc<dyn Signer>) -> Self {
        Self { client, signer }
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    pub async fn spawn(&self, request: SpawnRequest) -> RemoteResult<EntityId> {
        self.client.spawn(self.signer.as_ref(), request).await
    }

    pub async fn execute(&self, request: ExecuteRequest) -> RemoteResult<Receipt> {
        self.client.execute(self.signer.as_ref(), request).await
    }

    pub async fn query(&self, request: QueryRequest) -> RemoteResult<QueryResponse> {
        self.client.query(request).await
    }
}

impl fmt::Debug for RemoteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteContext")
            .field("signer", &self.signer.address())
            .finish_non_exhaustive()
    }
}
