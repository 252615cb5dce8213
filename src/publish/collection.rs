use super::{PublishSettings, escape_lua_string};
use crate::commit::{CommitChain, CommitObserver, CommitReport, CommitStep, TracingObserver};
use crate::core::{CommitError, EntityId, Result};
use crate::remote::RemoteContext;
use crate::template::Placeholders;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// `Action` tag of the collection spawn message.
pub const ADD_COLLECTION_ACTION: &str = "Add-Collection";

/// Collection to create. `creator` is the wallet, `profile` its profile process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDraft {
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub banner: String,
    pub creator: String,
    pub profile: EntityId,
}

impl CollectionDraft {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("title", &self.title),
            ("description", &self.description),
            ("creator", &self.creator),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(CommitError::Validation(format!(
                "collection {} is required",
                name
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishedCollection {
    pub id: EntityId,
    pub report: CommitReport,
}

/// Spawns a collection process and evaluates the collection source in it.
#[derive(Clone)]
pub struct CollectionPublisher {
    ctx: RemoteContext,
    settings: Arc<PublishSettings>,
    observer: Arc<dyn CommitObserver>,
}

impl CollectionPublisher {
    pub fn new(ctx: RemoteContext, settings: Arc<PublishSettings>) -> Self {
        Self {
            ctx,
            settings,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CommitObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub async fn publish(&self, draft: &CollectionDraft) -> Result<PublishedCollection> {
        let chain = self.build_chain(draft, Utc::now())?;
        let span = info_span!("publish_collection", title = %draft.title);
        let report = chain
            .run(&self.ctx, self.observer.as_ref())
            .instrument(span)
            .await?;
        Ok(PublishedCollection {
            id: report.entity.clone(),
            report,
        })
    }

    pub fn build_chain(&self, draft: &CollectionDraft, now: DateTime<Utc>) -> Result<CommitChain> {
        draft.validate()?;
        let settings = &self.settings;
        let created = now.timestamp_millis().to_string();

        let spawn = CommitStep::spawn(settings.blueprint.clone(), Vec::new())
            .tag("Title", draft.title.as_str())
            .tag("Description", draft.description.as_str())
            .tag("Thumbnail", draft.thumbnail.as_str())
            .tag("Banner", draft.banner.as_str())
            .tag("Date Created", created.as_str())
            .tag("Date Updated", created.as_str())
            .tag("Creator", draft.creator.as_str())
            .tag("Profile-Creator", draft.profile.as_str())
            .tag("Action", ADD_COLLECTION_ACTION)
            .with_policy(settings.spawn_policy.clone());

        let values = Placeholders::new()
            .set("NAME", escape_lua_string(draft.title.as_str()))
            .set("DESCRIPTION", escape_lua_string(draft.description.as_str()))
            .set("CREATOR", escape_lua_string(draft.profile.as_str()))
            .set("THUMBNAIL", escape_lua_string(draft.thumbnail.as_str()))
            .set("BANNER", escape_lua_string(draft.banner.as_str()))
            .set("DATECREATED", escape_lua_string(created.as_str()))
            .set("LASTUPDATE", escape_lua_string(created.as_str()));
        let execute = CommitStep::execute(settings.collection_template.clone(), values)
            .with_policy(settings.execute_policy.clone());

        Ok(CommitChain::new(vec![spawn, execute])?.with_config(settings.chain.clone()))
    }
}

impl std::fmt::Debug for CollectionPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionPublisher")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{AttemptJournal, RetryPolicy};
    use crate::core::{CommitAction, find_tag};
    use crate::remote::{AddressOnlySigner, InMemoryBackend, ProcessBlueprint};
    use std::time::Duration;

    fn draft() -> CollectionDraft {
        CollectionDraft {
            title: "My Collection".to_string(),
            description: "Street scans".to_string(),
            thumbnail: "thumb-tx".to_string(),
            banner: "banner-tx".to_string(),
            creator: "wallet-1".to_string(),
            profile: EntityId::new("profile-1").unwrap(),
        }
    }

    fn settings() -> Arc<PublishSettings> {
        Arc::new(
            PublishSettings::new(ProcessBlueprint::new("module", "scheduler")).with_retry_policy(
                RetryPolicy::bounded(3).with_delay(Duration::from_millis(10)),
            ),
        )
    }

    #[test]
    fn build_chain_has_no_registration() {
        let ctx = RemoteContext::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(AddressOnlySigner::new("wallet-1")),
        );
        let chain = CollectionPublisher::new(ctx, settings())
            .build_chain(&draft(), Utc::now())
            .unwrap();

        let steps = chain.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].action, CommitAction::Execute);
        assert_eq!(find_tag(&steps[0].tags, "Action"), Some(ADD_COLLECTION_ACTION));
        assert_eq!(
            find_tag(&steps[0].tags, "Date Created"),
            find_tag(&steps[0].tags, "Date Updated")
        );
    }

    #[test]
    fn blank_title_is_rejected() {
        let ctx = RemoteContext::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(AddressOnlySigner::new("wallet-1")),
        );
        let mut draft = draft();
        draft.title = " ".to_string();
        let err = CollectionPublisher::new(ctx, settings())
            .build_chain(&draft, Utc::now())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_evaluates_rendered_source() {
        let backend = Arc::new(InMemoryBackend::new().with_spawn_ids(["collection-abc"]));
        backend.fail_next_action("Eval", 1).await;
        let ctx = RemoteContext::new(backend.clone(), Arc::new(AddressOnlySigner::new("wallet-1")));
        let journal = Arc::new(AttemptJournal::new());

        let published = CollectionPublisher::new(ctx, settings())
            .with_observer(journal.clone())
            .publish(&draft())
            .await
            .unwrap();

        assert_eq!(published.id.as_str(), "collection-abc");
        assert_eq!(published.report.attempts_for(CommitAction::Execute), 2);
        assert_eq!(journal.attempts(CommitAction::Execute), 2);

        let record = backend.entity(&published.id).await.unwrap();
        assert_eq!(record.evaluated.len(), 1);
        assert!(record.evaluated[0].contains("Name = Name or 'My Collection'"));
        assert!(!record.evaluated[0].contains("<NAME>"));
    }
}
