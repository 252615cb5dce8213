use super::retry::{ErrorClassifier, RetryPolicy};
use crate::core::{CommitAction, EntityId, QueryResponse, Receipt, Result, Tag, TemplateError};
use crate::remote::{
    ExecuteRequest, IDEMPOTENCY_KEY_TAG, ProcessBlueprint, QueryRequest, RemoteContext,
    SpawnRequest, actions,
};
use crate::template::{ENTITY_ID_PLACEHOLDER, PayloadTemplate, Placeholders};
use tracing::debug;
use uuid::Uuid;

/// Body of a parent-collection registration.
pub const REGISTRATION_TEMPLATE: &str = r#"{"AssetIds":["<ENTITY_ID>"],"UpdateType":"Add"}"#;

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Success(Receipt),
    RetryableFailure(String),
    FatalFailure(String),
}

impl AttemptResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPayload {
    /// Raw process data for a spawn.
    Spawn {
        blueprint: ProcessBlueprint,
        data: Vec<u8>,
    },
    /// Text rendered from a template. `<ENTITY_ID>` is bound by the chain.
    Template {
        template: PayloadTemplate,
        values: Placeholders,
    },
}

/// One remote call of a commit chain and the policy that drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStep {
    pub action: CommitAction,
    /// `None` until bound: execute steps address the spawned entity, registrations the parent.
    pub target: Option<EntityId>,
    pub payload: StepPayload,
    pub tags: Vec<Tag>,
    pub policy: RetryPolicy,
}

impl CommitStep {
    /// Creation of a new entity. Single attempt unless another policy is set.
    pub fn spawn(blueprint: ProcessBlueprint, data: Vec<u8>) -> Self {
        Self {
            action: CommitAction::Spawn,
            target: None,
            payload: StepPayload::Spawn { blueprint, data },
            tags: Vec::new(),
            policy: RetryPolicy::single_attempt(),
        }
    }

    /// Evaluation of `template` on the spawned entity.
    pub fn execute(template: PayloadTemplate, values: Placeholders) -> Self {
        Self {
            action: CommitAction::Execute,
            target: None,
            payload: StepPayload::Template { template, values },
            tags: vec![Tag::action(actions::EVAL)],
            policy: RetryPolicy::default(),
        }
    }

    /// Adds the spawned entity to the membership list of `parent`.
    pub fn register_with_parent(parent: EntityId) -> Self {
        Self {
            action: CommitAction::RegisterWithParent,
            target: Some(parent),
            payload: StepPayload::Template {
                template: PayloadTemplate::new(REGISTRATION_TEMPLATE),
                values: Placeholders::new(),
            },
            tags: vec![Tag::action(actions::UPDATE_ASSETS)],
            policy: RetryPolicy::default(),
        }
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Checks that the template can be rendered once the entity id is known.
    pub(crate) fn check_template(&self) -> Result<()> {
        let StepPayload::Template { template, values } = &self.payload else {
            return Ok(());
        };
        let unbound: Vec<String> = template
            .declared()
            .into_iter()
            .filter(|name| name != ENTITY_ID_PLACEHOLDER && values.get(name).is_none())
            .map(|name| crate::template::token(&name))
            .collect();
        if unbound.is_empty() {
            Ok(())
        } else {
            Err(TemplateError::Unbound(unbound).into())
        }
    }

    fn render(&self, entity: &EntityId) -> std::result::Result<Vec<u8>, TemplateError> {
        match &self.payload {
            StepPayload::Spawn { data, .. } => Ok(data.clone()),
            StepPayload::Template { template, values } => {
                let mut values = values.clone();
                values.insert(ENTITY_ID_PLACEHOLDER, entity.as_str());
                template.render(&values).map(String::into_bytes)
            }
        }
    }

    /// Makes one remote call. `entity` is the id produced by the spawn step.
    pub async fn attempt(
        &self,
        ctx: &RemoteContext,
        entity: Option<&EntityId>,
        classifier: &ErrorClassifier,
    ) -> AttemptResult {
        match self.action {
            CommitAction::Spawn => self.attempt_spawn(ctx, classifier).await,
            CommitAction::Execute => {
                let Some(entity) = entity else {
                    return AttemptResult::FatalFailure(
                        "execute step has no spawned entity to address".to_string(),
                    );
                };
                let target = self.target.as_ref().unwrap_or(entity);
                self.attempt_execute(ctx, target, entity, Vec::new(), classifier)
                    .await
            }
            CommitAction::RegisterWithParent => {
                let (Some(parent), Some(entity)) = (self.target.as_ref(), entity) else {
                    return AttemptResult::FatalFailure(
                        "registration needs both a parent and a spawned entity".to_string(),
                    );
                };
                self.attempt_register(ctx, parent, entity, classifier).await
            }
        }
    }

    async fn attempt_spawn(
        &self,
        ctx: &RemoteContext,
        classifier: &ErrorClassifier,
    ) -> AttemptResult {
        let StepPayload::Spawn { blueprint, data } = &self.payload else {
            return AttemptResult::FatalFailure("spawn step carries no process data".to_string());
        };

        let request = SpawnRequest {
            blueprint: blueprint.clone(),
            tags: self.tags.clone(),
            data: data.clone(),
        };
        match ctx.spawn(request).await {
            Ok(id) => {
                let message_id = id.as_str().to_string();
                AttemptResult::Success(Receipt::new(id, message_id))
            }
            Err(err) => classifier.to_attempt(err),
        }
    }

    async fn attempt_execute(
        &self,
        ctx: &RemoteContext,
        target: &EntityId,
        entity: &EntityId,
        extra_tags: Vec<Tag>,
        classifier: &ErrorClassifier,
    ) -> AttemptResult {
        let data = match self.render(entity) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => return AttemptResult::FatalFailure(err.to_string()),
        };

        let mut tags = self.tags.clone();
        tags.extend(extra_tags);
        let request = ExecuteRequest {
            target: target.clone(),
            tags,
            data,
        };
        match ctx.execute(request).await {
            Ok(receipt) => AttemptResult::Success(receipt),
            Err(err) => classifier.to_attempt(err),
        }
    }

    async fn attempt_register(
        &self,
        ctx: &RemoteContext,
        parent: &EntityId,
        entity: &EntityId,
        classifier: &ErrorClassifier,
    ) -> AttemptResult {
        let key = registration_key(parent, entity);

        match ctx.query(QueryRequest::new(parent.clone(), actions::INFO)).await {
            Ok(response) if lists_member(&response, entity) => {
                debug!(%parent, %entity, "entity already registered, skipping");
                return AttemptResult::Success(Receipt::replayed(parent.clone(), key));
            }
            Ok(_) => {}
            Err(err) => debug!(%parent, error = %err, "membership check failed, registering anyway"),
        }

        self.attempt_execute(
            ctx,
            parent,
            entity,
            vec![Tag::new(IDEMPOTENCY_KEY_TAG, key)],
            classifier,
        )
        .await
    }
}

/// Deterministic idempotency key of the registration of `entity` under `parent`.
pub fn registration_key(parent: &EntityId, entity: &EntityId) -> String {
    let name = format!("scanmint://registration/{}/{}", parent, entity);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Returns `true` when a parent `Info` reply lists `entity` under `Assets`.
///
/// Entries may be plain ids or objects with an `Id` field.
pub fn lists_member(response: &QueryResponse, entity: &EntityId) -> bool {
    let Some(assets) = response
        .as_json()
        .and_then(|json| json.get("Assets"))
        .and_then(|assets| assets.as_array())
    else {
        return false;
    };

    assets.iter().any(|asset| {
        asset
            .as_str()
            .or_else(|| asset.get("Id").and_then(|id| id.as_str()))
            == Some(entity.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: &str) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    #[test]
    fn registration_key_is_deterministic_per_pair() {
        let parent = id("collection");
        assert_eq!(
            registration_key(&parent, &id("proc-1")),
            registration_key(&parent, &id("proc-1"))
        );
        assert_ne!(
            registration_key(&parent, &id("proc-1")),
            registration_key(&parent, &id("proc-2"))
        );
    }

    #[test]
    fn lists_member_accepts_ids_and_objects() {
        let entity = id("proc-1");
        assert!(lists_member(
            &QueryResponse::Json(json!({ "Assets": ["proc-0", "proc-1"] })),
            &entity
        ));
        assert!(lists_member(
            &QueryResponse::Json(json!({ "Assets": [{ "Id": "proc-1", "Quantity": "1" }] })),
            &entity
        ));
        assert!(!lists_member(
            &QueryResponse::Json(json!({ "Assets": ["proc-2"] })),
            &entity
        ));
        assert!(!lists_member(&QueryResponse::Empty, &entity));
    }

    #[test]
    fn check_template_ignores_entity_id() {
        let step = CommitStep::register_with_parent(id("collection"));
        assert!(step.check_template().is_ok());

        let step = CommitStep::execute(
            PayloadTemplate::new("Name = '<NAME>' Owner = '<OWNER>'"),
            Placeholders::new().set("NAME", "scan"),
        );
        let err = step.check_template().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Template error: Unbound placeholders: <OWNER>"
        );
    }

    #[test]
    fn render_binds_entity_id() {
        let step = CommitStep::register_with_parent(id("collection"));
        let body = step.render(&id("proc-7")).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"AssetIds":["proc-7"],"UpdateType":"Add"}"#
        );
    }

    #[test]
    fn constructors_pick_policies_and_action_tags() {
        let spawn = CommitStep::spawn(ProcessBlueprint::new("m", "s"), Vec::new());
        assert_eq!(spawn.policy, RetryPolicy::single_attempt());
        assert!(spawn.tags.is_empty());

        let execute = CommitStep::execute(PayloadTemplate::new("x"), Placeholders::new())
            .tag("Extra", "1");
        assert_eq!(execute.policy, RetryPolicy::default());
        assert_eq!(
            execute.tags,
            vec![Tag::action(actions::EVAL), Tag::new("Extra", "1")]
        );
    }
}
