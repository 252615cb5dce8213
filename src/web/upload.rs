use super::AppState;
use super::error::Result;
use crate::core::EntityId;
use crate::publish::{AssetMetadata, AssetUpload, ImageFile};
use axum::Json;
use axum::extract::{Multipart, State};
use serde::Serialize;
use tracing::info;

pub const UPLOAD_RECEIVED: &str = "Upload received successfully";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub metadata: AssetMetadata,
    pub id: EntityId,
}

pub async fn hello() -> &'static str {
    "Hello World!"
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let upload = read_upload(&mut multipart).await?;
    let published = state.publisher.publish(upload).await?;

    info!(
        id = %published.id,
        attempts = ?published.report.attempts,
        "asset published"
    );
    Ok(Json(UploadResponse {
        message: UPLOAD_RECEIVED,
        metadata: published.metadata,
        id: published.id,
    }))
}

/// Collects the known multipart fields. Unknown fields are skipped.
async fn read_upload(multipart: &mut Multipart) -> Result<AssetUpload> {
    let mut upload = AssetUpload::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "image" => {
                let content_type = field
                    .content_type()
                    .unwrap_or(FALLBACK_CONTENT_TYPE)
                    .to_string();
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    upload.image = Some(ImageFile {
                        bytes: bytes.to_vec(),
                        content_type,
                    });
                }
            }
            "location" => upload.location = Some(field.text().await?),
            "walletAddress" => upload.wallet_address = Some(field.text().await?),
            "name" => upload.name = Some(field.text().await?),
            "description" => upload.description = Some(field.text().await?),
            _ => {}
        }
    }

    Ok(upload)
}
