//! Publish flows built on the commit chain.
//!
//! [`AssetPublisher`] turns an uploaded image into a spawned atomic asset
//! registered with the configured collection; [`CollectionPublisher`]
//! creates the collection itself. Both resolve the creator through
//! [`ProfileDirectory`] or take it from the caller.

pub mod asset;
pub mod collection;
pub mod profile;

pub use asset::{
    ADD_UPLOADED_ASSET_ACTION, AssetMetadata, AssetPublisher, AssetUpload, ImageFile,
    PublishedAsset, ValidatedUpload,
};
pub use collection::{
    ADD_COLLECTION_ACTION, CollectionDraft, CollectionPublisher, PublishedCollection,
};
pub use profile::{PROFILES_BY_DELEGATE_ACTION, Profile, ProfileDirectory};

use crate::commit::{ChainConfig, RetryPolicy};
use crate::core::EntityId;
use crate::remote::ProcessBlueprint;
use crate::template::PayloadTemplate;
use std::fmt::Write;

/// Bundled atomic-asset process source.
pub const ATOMIC_ASSET_TEMPLATE: &str = include_str!("../../templates/atomic_asset.lua");
/// Bundled collection process source.
pub const COLLECTION_TEMPLATE: &str = include_str!("../../templates/collection.lua");

/// Largest accepted image, in bytes.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 1024 * 1024;

/// Escapes `value` for use inside a quoted Lua string literal.
///
/// Every placeholder in the bundled sources sits between single quotes.
pub fn escape_lua_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            ch if ch.is_ascii_control() => {
                let _ = write!(escaped, "\\{:03}", ch as u32);
            }
            ch => escaped.push(ch),
        }
    }
    escaped
}

/// Everything the publishers need besides the remote context.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub blueprint: ProcessBlueprint,
    /// Collection every published asset is registered with. `None` skips registration.
    pub collection: Option<EntityId>,
    pub asset_template: PayloadTemplate,
    pub collection_template: PayloadTemplate,
    pub ticker: String,
    pub denomination: String,
    pub balance: String,
    pub spawn_policy: RetryPolicy,
    pub execute_policy: RetryPolicy,
    pub register_policy: RetryPolicy,
    pub chain: ChainConfig,
    pub max_image_bytes: usize,
}

impl PublishSettings {
    pub fn new(blueprint: ProcessBlueprint) -> Self {
        Self {
            blueprint,
            collection: None,
            asset_template: PayloadTemplate::new(ATOMIC_ASSET_TEMPLATE),
            collection_template: PayloadTemplate::new(COLLECTION_TEMPLATE),
            ticker: "ATOMIC".to_string(),
            denomination: "1".to_string(),
            balance: "1".to_string(),
            spawn_policy: RetryPolicy::single_attempt(),
            execute_policy: RetryPolicy::default(),
            register_policy: RetryPolicy::default(),
            chain: ChainConfig::default(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn with_collection(mut self, collection: EntityId) -> Self {
        self.collection = Some(collection);
        self
    }

    pub fn with_asset_template(mut self, template: PayloadTemplate) -> Self {
        self.asset_template = template;
        self
    }

    /// Uses `policy` for both execute and registration steps.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.execute_policy = policy.clone();
        self.register_policy = policy;
        self
    }

    pub fn with_chain_config(mut self, chain: ChainConfig) -> Self {
        self.chain = chain;
        self
    }
}
