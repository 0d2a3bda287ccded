//! Attachment uploads, proxied to the media service.
//!
//! The client uploads first, then sends a chat message whose content is the
//! returned URL and whose `type`/`file_name` come from this response.

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::model::MessageKind;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("media service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("media service returned status: {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub file_name: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Deserialize)]
struct MediaServiceResponse {
    url: String,
}

/// POST /api/chat/upload (multipart, field `file`)
pub async fn upload_file(
    State(state): State<AppState>,
    claims: Claims,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, StatusCode> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .ok_or(StatusCode::BAD_REQUEST)?;
        // Fails once the body limit is exceeded
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        upload = Some((file_name, data));
        break;
    }
    let (file_name, data) = upload.ok_or(StatusCode::BAD_REQUEST)?;

    let size = data.len();
    let url = forward_to_media_service(&state.http, &state.chat.media_service_url, &file_name, data)
        .await
        .map_err(|e| {
            tracing::error!(user_id = claims.sub, error = %e, "Error sending to media service");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::info!(user_id = claims.sub, file_name = %file_name, size = size, "Attachment uploaded");

    Ok(Json(UploadResponse {
        url,
        kind: MessageKind::from_file_name(&file_name),
        file_name,
    }))
}

async fn forward_to_media_service(
    client: &reqwest::Client,
    url: &str,
    file_name: &str,
    data: Bytes,
) -> Result<String, UploadError> {
    let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(file_name.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);

    let resp = client.post(url).multipart(form).send().await?;
    if resp.status() != reqwest::StatusCode::OK {
        return Err(UploadError::Status(resp.status()));
    }

    let body: MediaServiceResponse = resp.json().await?;
    Ok(body.url)
}
