//! HTTP client for a message unit (writes) and a compute unit (dry-run reads).

use super::{
    DataItem, ExecuteRequest, QueryRequest, RemoteClient, SignedDataItem, Signer, SpawnRequest,
};
use crate::core::{EntityId, QueryResponse, Receipt, RemoteError, RemoteResult, Tag};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Spawn data used when the caller supplies none; the message unit rejects empty items.
const DEFAULT_SPAWN_DATA: &[u8] = b"1984";

const SDK_NAME: &str = "scanmint";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Message unit base URL, e.g. `https://mu.ao-testnet.xyz`.
    pub mu_url: String,
    /// Compute unit base URL, e.g. `https://cu.ao-testnet.xyz`.
    pub cu_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(mu_url: impl Into<String>, cu_url: impl Into<String>) -> Self {
        Self {
            mu_url: mu_url.into(),
            cu_url: cu_url.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

pub struct GatewayClient {
    http: reqwest::Client,
    mu_url: String,
    cu_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageUnitResponse {
    id: String,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> RemoteResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            mu_url: config.mu_url.trim_end_matches('/').to_string(),
            cu_url: config.cu_url.trim_end_matches('/').to_string(),
        })
    }

    fn protocol_tags(message_type: &str) -> Vec<Tag> {
        vec![
            Tag::new("Data-Protocol", "ao"),
            Tag::new("Variant", "ao.TN.1"),
            Tag::new("Type", message_type),
            Tag::new("SDK", SDK_NAME),
        ]
    }

    async fn submit(&self, signed: SignedDataItem) -> RemoteResult<String> {
        let response = self
            .http
            .post(&self.mu_url)
            .header("Content-Type", "application/octet-stream")
            .header("Accept", "application/json")
            .body(signed.raw)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: MessageUnitResponse = response
            .json()
            .await
            .map_err(|err| RemoteError::MalformedResponse(err.to_string()))?;
        if body.id != signed.id {
            debug!(signed = %signed.id, accepted = %body.id, "message unit reported a different id");
        }
        Ok(body.id)
    }
}

#[async_trait]
impl RemoteClient for GatewayClient {
    async fn spawn(&self, signer: &dyn Signer, request: SpawnRequest) -> RemoteResult<EntityId> {
        let mut tags = Self::protocol_tags("Process");
        tags.push(Tag::new("Module", request.blueprint.module));
        tags.push(Tag::new("Scheduler", request.blueprint.scheduler));
        tags.extend(request.tags);

        let data = if request.data.is_empty() {
            DEFAULT_SPAWN_DATA.to_vec()
        } else {
            request.data
        };

        let item = DataItem {
            target: None,
            anchor: None,
            tags,
            data,
        };
        let signed = signer.sign(&item).await?;
        let id = self.submit(signed).await?;
        EntityId::new(id).map_err(|err| RemoteError::MalformedResponse(err.to_string()))
    }

    async fn execute(
        &self,
        signer: &dyn Signer,
        request: ExecuteRequest,
    ) -> RemoteResult<Receipt> {
        let mut tags = Self::protocol_tags("Message");
        tags.extend(request.tags);

        let item = DataItem {
            target: Some(request.target.clone()),
            anchor: None,
            tags,
            data: request.data.into_bytes(),
        };
        let signed = signer.sign(&item).await?;
        let message_id = self.submit(signed).await?;
        Ok(Receipt::new(request.target, message_id))
    }

    async fn query(&self, request: QueryRequest) -> RemoteResult<QueryResponse> {
        let data = match &request.data {
            JsonValue::Null => "{}".to_string(),
            other => other.to_string(),
        };
        let body = json!({
            "Id": "1234",
            "Owner": "1234",
            "Target": request.target.as_str(),
            "Anchor": "0",
            "Data": data,
            "Tags": request.all_tags(),
        });

        let response = self
            .http
            .post(format!("{}/dry-run", self.cu_url))
            .query(&[("process-id", request.target.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let result: JsonValue = response
            .json()
            .await
            .map_err(|err| RemoteError::MalformedResponse(err.to_string()))?;
        decode_dry_run(result)
    }
}

#[derive(Debug, Deserialize)]
struct DryRunResult {
    #[serde(rename = "Messages", default)]
    messages: Vec<DryRunMessage>,
    #[serde(rename = "Error", default)]
    error: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct DryRunMessage {
    #[serde(rename = "Data", default)]
    data: Option<JsonValue>,
    #[serde(rename = "Tags", default)]
    tags: Vec<Tag>,
}

/// Validates a dry-run result into a [`QueryResponse`].
///
/// Only the first reply message is considered: its `Data` when present
/// (string payloads must hold JSON), otherwise its tags.
pub fn decode_dry_run(raw: JsonValue) -> RemoteResult<QueryResponse> {
    let result: DryRunResult = serde_json::from_value(raw)
        .map_err(|err| RemoteError::MalformedResponse(err.to_string()))?;

    if let Some(error) = result.error.filter(|error| !error.is_null()) {
        let message = match error {
            JsonValue::String(message) => message,
            other => other.to_string(),
        };
        return Err(RemoteError::Backend(message));
    }

    let Some(first) = result.messages.into_iter().next() else {
        return Ok(QueryResponse::Empty);
    };

    match first.data {
        Some(JsonValue::String(data)) if !data.is_empty() => serde_json::from_str(&data)
            .map(QueryResponse::Json)
            .map_err(|err| {
                RemoteError::MalformedResponse(format!("reply data is not JSON: {}", err))
            }),
        Some(JsonValue::String(_)) | Some(JsonValue::Null) | None => {
            if first.tags.is_empty() {
                return Ok(QueryResponse::Empty);
            }
            let tags: BTreeMap<String, String> = first
                .tags
                .into_iter()
                .map(|tag| (tag.name, tag.value))
                .collect();
            Ok(QueryResponse::Tags(tags))
        }
        Some(other) => Ok(QueryResponse::Json(other)),
    }
}
