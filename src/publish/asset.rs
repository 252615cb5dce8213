use super::{PublishSettings, escape_lua_string};
use super::profile::ProfileDirectory;
use crate::commit::{CommitChain, CommitObserver, CommitReport, CommitStep, TracingObserver};
use crate::core::{CommitError, EntityId, Result};
use crate::template::Placeholders;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, info, info_span};

/// `Action` tag of the asset spawn message.
pub const ADD_UPLOADED_ASSET_ACTION: &str = "Add-Uploaded-Asset";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Raw upload as received. Every field may be missing until validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetUpload {
    pub image: Option<ImageFile>,
    pub location: Option<String>,
    pub wallet_address: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Upload with every required field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub image: ImageFile,
    pub location: String,
    pub wallet_address: String,
    pub name: String,
    pub description: String,
}

fn required(value: &Option<String>, message: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CommitError::validation(message))
}

impl AssetUpload {
    /// Checks the fields in the order a client is expected to fix them.
    pub fn validate(&self, max_image_bytes: usize) -> Result<ValidatedUpload> {
        let Some(image) = &self.image else {
            return Err(CommitError::validation("No image file provided"));
        };
        if image.bytes.len() > max_image_bytes {
            return Err(CommitError::Validation(format!(
                "Image exceeds the {} byte limit",
                max_image_bytes
            )));
        }
        let location = required(&self.location, "Location is required")?;
        let wallet_address = required(&self.wallet_address, "Wallet address is required")?;
        let name = required(&self.name, "Name is required")?;
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|description| !description.is_empty())
            .unwrap_or(&name)
            .to_string();

        Ok(ValidatedUpload {
            image: image.clone(),
            location,
            wallet_address,
            name,
            description,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub location: String,
    pub wallet_address: String,
    pub profile_id: EntityId,
    pub name: String,
    /// RFC 3339 with millisecond precision.
    pub timestamp: String,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct PublishedAsset {
    pub metadata: AssetMetadata,
    pub id: EntityId,
    pub report: CommitReport,
}

/// Spawns, initialises and registers one atomic asset per upload.
#[derive(Clone)]
pub struct AssetPublisher {
    ctx: crate::remote::RemoteContext,
    settings: Arc<PublishSettings>,
    profiles: ProfileDirectory,
    observer: Arc<dyn CommitObserver>,
}

impl AssetPublisher {
    pub fn new(
        ctx: crate::remote::RemoteContext,
        settings: Arc<PublishSettings>,
        profiles: ProfileDirectory,
    ) -> Self {
        Self {
            ctx,
            settings,
            profiles,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CommitObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    pub async fn publish(&self, upload: AssetUpload) -> Result<PublishedAsset> {
        let upload = upload.validate(self.settings.max_image_bytes)?;

        let profile = self.profiles.profile_by_wallet(&upload.wallet_address).await?;
        let Some(profile_id) = profile.id else {
            return Err(CommitError::validation("Profile not found"));
        };

        let (metadata, chain) = self.build_chain(&upload, profile_id, Utc::now())?;
        info!(
            name = %metadata.name,
            wallet = %metadata.wallet_address,
            image_bytes = upload.image.bytes.len(),
            "received upload"
        );

        let span = info_span!("publish_asset", profile = %metadata.profile_id);
        let report = chain
            .run(&self.ctx, self.observer.as_ref())
            .instrument(span)
            .await?;

        Ok(PublishedAsset {
            metadata,
            id: report.entity.clone(),
            report,
        })
    }

    /// Metadata and commit chain for a validated upload, stamped with `now`.
    pub fn build_chain(
        &self,
        upload: &ValidatedUpload,
        profile_id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<(AssetMetadata, CommitChain)> {
        let settings = &self.settings;
        let created = now.timestamp_millis().to_string();

        let spawn = CommitStep::spawn(settings.blueprint.clone(), upload.image.bytes.clone())
            .tag("Title", upload.name.as_str())
            .tag("Description", upload.description.as_str())
            .tag("Content-Type", upload.image.content_type.as_str())
            .tag("Location", upload.location.as_str())
            .tag("Creator", upload.wallet_address.as_str())
            .tag("Profile-Creator", profile_id.as_str())
            .tag("Date-Created", created.as_str())
            .tag("Action", ADD_UPLOADED_ASSET_ACTION)
            .with_policy(settings.spawn_policy.clone());

        let values = Placeholders::new()
            .set("NAME", escape_lua_string(upload.name.as_str()))
            .set("TICKER", escape_lua_string(settings.ticker.as_str()))
            .set("DENOMINATION", escape_lua_string(settings.denomination.as_str()))
            .set("BALANCE", escape_lua_string(settings.balance.as_str()))
            .set("OWNER", escape_lua_string(upload.wallet_address.as_str()))
            .set("CREATOR", escape_lua_string(profile_id.as_str()))
            .set("DATECREATED", escape_lua_string(created.as_str()));
        let execute = CommitStep::execute(settings.asset_template.clone(), values)
            .with_policy(settings.execute_policy.clone());

        let mut steps = vec![spawn, execute];
        if let Some(collection) = &settings.collection {
            steps.push(
                CommitStep::register_with_parent(collection.clone())
                    .with_policy(settings.register_policy.clone()),
            );
        }
        let chain = CommitChain::new(steps)?.with_config(settings.chain.clone());

        let metadata = AssetMetadata {
            location: upload.location.clone(),
            wallet_address: upload.wallet_address.clone(),
            profile_id,
            name: upload.name.clone(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            content_type: upload.image.content_type.clone(),
        };
        Ok((metadata, chain))
    }
}

impl std::fmt::Debug for AssetPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetPublisher")
            .field("ctx", &self.ctx)
            .field("collection", &self.settings.collection)
            .finish_non_exhaustive()
    }
}
