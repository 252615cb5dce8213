use crate::core::{EntityId, Result};
use crate::remote::{QueryRequest, RemoteContext, actions};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

/// Registry action resolving a wallet address to its profile processes.
pub const PROFILES_BY_DELEGATE_ACTION: &str = "Get-Profiles-By-Delegate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Profile process id. `None` when the wallet has no profile.
    pub id: Option<EntityId>,
    pub wallet_address: Option<String>,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
}

impl Profile {
    pub fn empty(wallet_address: &str) -> Self {
        Self {
            id: None,
            wallet_address: Some(wallet_address.to_string()),
            display_name: None,
            username: None,
            bio: None,
            avatar: None,
            banner: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    fn from_info(id: EntityId, info: &JsonValue) -> Self {
        let text = |value: Option<&JsonValue>| {
            value
                .and_then(JsonValue::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let details = info.get("Profile");
        let field = |name: &str| text(details.and_then(|details| details.get(name)));

        Self {
            id: Some(id),
            wallet_address: text(info.get("Owner")),
            display_name: field("DisplayName"),
            username: field("UserName"),
            bio: field("Description"),
            avatar: field("ProfileImage"),
            banner: field("CoverImage"),
        }
    }
}

/// Resolves wallet addresses through the profile registry process.
#[derive(Debug, Clone)]
pub struct ProfileDirectory {
    ctx: RemoteContext,
    registry: EntityId,
}

impl ProfileDirectory {
    pub fn new(ctx: RemoteContext, registry: EntityId) -> Self {
        Self { ctx, registry }
    }

    pub async fn profile_by_wallet(&self, address: &str) -> Result<Profile> {
        let lookup = self
            .ctx
            .query(
                QueryRequest::new(self.registry.clone(), PROFILES_BY_DELEGATE_ACTION)
                    .with_data(json!({ "Address": address })),
            )
            .await?;

        let profile_id = lookup
            .as_json()
            .and_then(JsonValue::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("ProfileId"))
            .and_then(JsonValue::as_str)
            .and_then(|raw| EntityId::new(raw).ok());

        let Some(profile_id) = profile_id else {
            debug!(%address, "no profile registered for wallet");
            return Ok(Profile::empty(address));
        };

        let info = self
            .ctx
            .query(QueryRequest::new(profile_id.clone(), actions::INFO))
            .await?;

        match info.as_json() {
            Some(info) => Ok(Profile::from_info(profile_id, info)),
            None => Ok(Profile::empty(address)),
        }
    }
}
