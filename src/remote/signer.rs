use super::{DataItem, SignedDataItem, Signer};
use crate::core::{RemoteError, RemoteResult};
use async_trait::async_trait;
use std::time::Duration;

/// Header carrying the id of the signed item returned by the signing service.
pub const DATA_ITEM_ID_HEADER: &str = "x-data-item-id";

/// Delegates signing to an external service that holds the wallet key.
///
/// `GET {url}/address` returns the owner address as plain text and
/// `POST {url}/sign` takes the JSON data item and returns the signed bytes
/// with the item id in the [`DATA_ITEM_ID_HEADER`] header.
pub struct HttpSigner {
    http: reqwest::Client,
    url: String,
    address: String,
}

impl HttpSigner {
    pub async fn connect(url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        let response = http.get(format!("{}/address", url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Signer(format!(
                "signing service answered {} for address lookup",
                status
            )));
        }
        let address = response.text().await?.trim().to_string();
        if address.is_empty() {
            return Err(RemoteError::Signer(
                "signing service returned an empty address".to_string(),
            ));
        }

        Ok(Self { http, url, address })
    }
}

#[async_trait]
impl Signer for HttpSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, item: &DataItem) -> RemoteResult<SignedDataItem> {
        let response = self
            .http
            .post(format!("{}/sign", self.url))
            .json(item)
            .send()
            .await
            .map_err(|err| RemoteError::Signer(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Signer(format!("{}: {}", status, body)));
        }

        let id = response
            .headers()
            .get(DATA_ITEM_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::Signer(format!("response is missing {}", DATA_ITEM_ID_HEADER))
            })?;
        let raw = response
            .bytes()
            .await
            .map_err(|err| RemoteError::Signer(err.to_string()))?
            .to_vec();

        Ok(SignedDataItem { id, raw })
    }
}

/// Signer that only knows its owner address.
///
/// Suitable for backends that never ask for a signature, such as
/// [`super::InMemoryBackend`].
#[derive(Debug, Clone)]
pub struct AddressOnlySigner {
    address: String,
}

impl AddressOnlySigner {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Signer for AddressOnlySigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, _item: &DataItem) -> RemoteResult<SignedDataItem> {
        Err(RemoteError::Signer(format!(
            "signer for '{}' holds no key material",
            self.address
        )))
    }
}
