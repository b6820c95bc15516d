use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

use crate::AppState;
use crate::api::error::AppError;
use crate::services::sink::LocalKind;

/// Stream an artifact back from the local ephemeral store. Absent and
/// expired keys are indistinguishable: both are 404.
#[utoipa::path(
    get,
    path = "/local/{kind}/{key}",
    params(
        ("kind" = String, Path, description = "original or preview"),
        ("key" = String, Path, description = "Key the artifact was stored under")
    ),
    responses(
        (status = 200, description = "Artifact stream"),
        (status = 404, description = "Unknown kind, absent key, or expired entry")
    ),
    tag = "local-store"
)]
pub async fn fetch_local(
    State(state): State<AppState>,
    Path((kind, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let kind = LocalKind::parse(&kind)
        .ok_or_else(|| AppError::NotFound(format!("unknown artifact kind '{}'", kind)))?;

    let (path, content_type) = state
        .local_store
        .get(kind, &key)
        .ok_or_else(|| AppError::NotFound("entry absent or expired".to_string()))?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::error!("Local store entry {:?} unreadable: {}", path, e);
        AppError::NotFound("entry absent or expired".to_string())
    })?;

    let body = Body::from_stream(ReaderStream::new(file));
    let headers = [(header::CONTENT_TYPE, content_type)];

    Ok((headers, body).into_response())
}
