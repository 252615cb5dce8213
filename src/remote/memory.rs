//! In-process backend with set-semantics collections and scripted failures.

use super::{
    ExecuteRequest, IDEMPOTENCY_KEY_TAG, QueryRequest, RemoteClient, Signer, SpawnRequest,
    actions,
};
use crate::core::{EntityId, QueryResponse, Receipt, RemoteError, RemoteResult, Tag, find_tag};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Spawn,
    Execute,
    Query,
}

/// One call observed by the backend, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub kind: CallKind,
    pub target: Option<EntityId>,
    pub action: Option<String>,
    pub succeeded: bool,
}

/// State of one spawned entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRecord {
    pub owner: String,
    pub tags: Vec<Tag>,
    pub data: Vec<u8>,
    /// Sources submitted with `Action = Eval`, in order.
    pub evaluated: Vec<String>,
    /// Collection membership. A set: adding an existing id is a no-op.
    pub members: BTreeSet<EntityId>,
    /// Idempotency keys of the registrations already applied.
    pub applied_keys: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FailureKey {
    Spawn,
    Action(String),
}

#[derive(Debug, Default)]
struct BackendState {
    next_entity: u64,
    next_message: u64,
    scripted_ids: VecDeque<EntityId>,
    entities: BTreeMap<EntityId, EntityRecord>,
    failures: HashMap<FailureKey, u32>,
    query_responses: HashMap<(EntityId, String), QueryResponse>,
    calls: Vec<CallRecord>,
}

impl BackendState {
    /// Consumes one scripted failure for `key`, if any is left.
    fn take_failure(&mut self, key: &FailureKey) -> bool {
        match self.failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn record(&mut self, kind: CallKind, target: Option<EntityId>, action: Option<String>, succeeded: bool) {
        self.calls.push(CallRecord {
            kind,
            target,
            action,
            succeeded,
        });
    }

    fn next_message_id(&mut self) -> String {
        self.next_message += 1;
        format!("msg-{}", self.next_message)
    }
}

#[derive(Debug, Deserialize)]
struct AssetUpdate {
    #[serde(rename = "AssetIds")]
    asset_ids: Vec<String>,
    #[serde(rename = "UpdateType")]
    update_type: String,
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<BackendState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids handed out by the next spawns, in order. Later spawns get `proc-N`.
    pub fn with_spawn_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = self.state.get_mut();
        for id in ids {
            if let Ok(id) = EntityId::new(id) {
                state.scripted_ids.push_back(id);
            }
        }
        self
    }

    /// Registers a pre-existing entity, e.g. a parent collection.
    pub fn with_entity(mut self, id: EntityId, owner: impl Into<String>) -> Self {
        self.state.get_mut().entities.insert(
            id,
            EntityRecord {
                owner: owner.into(),
                ..EntityRecord::default()
            },
        );
        self
    }

    /// Makes the next `count` spawns fail with a transport error.
    pub async fn fail_next_spawns(&self, count: u32) {
        self.state
            .write()
            .await
            .failures
            .insert(FailureKey::Spawn, count);
    }

    /// Makes the next `count` executes carrying `Action = action` fail.
    pub async fn fail_next_action(&self, action: &str, count: u32) {
        self.state
            .write()
            .await
            .failures
            .insert(FailureKey::Action(action.to_string()), count);
    }

    /// Fixed reply for queries of `action` against `target`.
    pub async fn set_query_response(
        &self,
        target: EntityId,
        action: &str,
        response: QueryResponse,
    ) {
        self.state
            .write()
            .await
            .query_responses
            .insert((target, action.to_string()), response);
    }

    pub async fn calls(&self) -> Vec<CallRecord> {
        self.state.read().await.calls.clone()
    }

    pub async fn entity(&self, id: &EntityId) -> Option<EntityRecord> {
        self.state.read().await.entities.get(id).cloned()
    }

    pub async fn members(&self, id: &EntityId) -> Vec<EntityId> {
        self.state
            .read()
            .await
            .entities
            .get(id)
            .map(|record| record.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn entity_count(&self) -> usize {
        self.state.read().await.entities.len()
    }
}

fn apply_asset_update(record: &mut EntityRecord, data: &str, key: Option<&str>) -> RemoteResult<()> {
    let update: AssetUpdate = serde_json::from_str(data).map_err(|err| RemoteError::Rejected {
        status: 400,
        body: format!("invalid asset update: {}", err),
    })?;

    if let Some(key) = key {
        if !record.applied_keys.insert(key.to_string()) {
            return Ok(());
        }
    }

    let ids = update
        .asset_ids
        .into_iter()
        .map(EntityId::new)
        .collect::<crate::core::Result<Vec<_>>>()
        .map_err(|err| RemoteError::Rejected {
            status: 400,
            body: err.to_string(),
        })?;

    match update.update_type.as_str() {
        "Add" => record.members.extend(ids),
        "Remove" => {
            for id in &ids {
                record.members.remove(id);
            }
        }
        other => {
            return Err(RemoteError::Rejected {
                status: 400,
                body: format!("unknown update type '{}'", other),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteClient for InMemoryBackend {
    async fn spawn(&self, signer: &dyn Signer, request: SpawnRequest) -> RemoteResult<EntityId> {
        let mut state = self.state.write().await;
        let action = find_tag(&request.tags, "Action").map(str::to_string);

        if state.take_failure(&FailureKey::Spawn) {
            state.record(CallKind::Spawn, None, action, false);
            return Err(RemoteError::Transport("injected spawn failure".to_string()));
        }

        let id = match state.scripted_ids.pop_front() {
            Some(id) => id,
            None => loop {
                state.next_entity += 1;
                let candidate = EntityId::new(format!("proc-{}", state.next_entity))
                    .map_err(|err| RemoteError::Backend(err.to_string()))?;
                if !state.entities.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        state.entities.insert(
            id.clone(),
            EntityRecord {
                owner: signer.address().to_string(),
                tags: request.tags,
                data: request.data,
                ..EntityRecord::default()
            },
        );
        state.record(CallKind::Spawn, Some(id.clone()), action, true);
        Ok(id)
    }

    async fn execute(
        &self,
        _signer: &dyn Signer,
        request: ExecuteRequest,
    ) -> RemoteResult<Receipt> {
        let mut state = self.state.write().await;
        let action = find_tag(&request.tags, "Action").map(str::to_string);
        let target = Some(request.target.clone());

        if let Some(name) = action.clone() {
            if state.take_failure(&FailureKey::Action(name.clone())) {
                state.record(CallKind::Execute, target, action, false);
                return Err(RemoteError::Transport(format!(
                    "injected failure for action '{}'",
                    name
                )));
            }
        }

        let key = find_tag(&request.tags, IDEMPOTENCY_KEY_TAG).map(str::to_string);
        let outcome = match state.entities.get_mut(&request.target) {
            None => Err(RemoteError::Rejected {
                status: 404,
                body: format!("process '{}' not found", request.target),
            }),
            Some(record) => match action.as_deref() {
                Some(actions::EVAL) => {
                    record.evaluated.push(request.data.clone());
                    Ok(())
                }
                Some(actions::UPDATE_ASSETS) => {
                    apply_asset_update(record, &request.data, key.as_deref())
                }
                _ => Ok(()),
            },
        };

        let succeeded = outcome.is_ok();
        state.record(CallKind::Execute, target, action, succeeded);
        outcome?;

        let message_id = state.next_message_id();
        Ok(Receipt::new(request.target, message_id))
    }

    async fn query(&self, request: QueryRequest) -> RemoteResult<QueryResponse> {
        let mut state = self.state.write().await;
        state.record(
            CallKind::Query,
            Some(request.target.clone()),
            Some(request.action.clone()),
            true,
        );

        if let Some(response) = state
            .query_responses
            .get(&(request.target.clone(), request.action.clone()))
        {
            return Ok(response.clone());
        }

        match (request.action.as_str(), state.entities.get(&request.target)) {
            (actions::INFO, Some(record)) => {
                let tags: BTreeMap<&str, &str> = record
                    .tags
                    .iter()
                    .map(|tag| (tag.name.as_str(), tag.value.as_str()))
                    .collect();
                Ok(QueryResponse::Json(json!({
                    "Owner": record.owner,
                    "Assets": record.members,
                    "Tags": tags,
                })))
            }
            _ => Ok(QueryResponse::Empty),
        }
    }
}
