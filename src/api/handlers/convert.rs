use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::AppState;
use crate::api::error::AppError;
use crate::services::pipeline::{PipelineReport, UploadedFile};
use crate::services::sink::SinkDestination;
use crate::utils::validation::{sanitize_filename, validate_file_size};

/// Unlinks the spooled upload when the handler exits early. Disarmed
/// once ownership of the spool file passes to a pipeline run.
#[derive(Default)]
struct SpoolGuard {
    path: Option<PathBuf>,
}

impl SpoolGuard {
    fn arm(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for SpoolGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Accept an untrusted file plus two destination descriptors and run
/// the scan-first pipeline. The report always says which scan result
/// applied, even for rejections.
#[utoipa::path(
    post,
    path = "/convert",
    request_body(content = Multipart, description = "Fields: file, originalUrl, previewUrl"),
    responses(
        (status = 200, description = "Pipeline completed", body = PipelineReport),
        (status = 400, description = "Missing fields, malformed destination or blocked type", body = PipelineReport),
        (status = 403, description = "Scan detected a threat", body = PipelineReport),
        (status = 413, description = "Payload exceeds the size limit"),
        (status = 500, description = "Scan, conversion or upload infrastructure failure", body = PipelineReport)
    ),
    tag = "pipeline"
)]
pub async fn convert_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PipelineReport>), AppError> {
    let mut uploaded: Option<UploadedFile> = None;
    let mut original_url: Option<String> = None;
    let mut preview_url: Option<String> = None;

    // Field order is not guaranteed; collect everything first. The
    // guard unlinks the spool file on every early return; only a
    // started pipeline run disarms it and takes over removal.
    let mut spool_guard = SpoolGuard::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                if uploaded.is_some() {
                    return Err(AppError::BadRequest(
                        "duplicate file field".to_string(),
                    ));
                }
                let declared_name =
                    sanitize_filename(field.file_name().unwrap_or("unnamed"))
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                let declared_content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

                tokio::fs::create_dir_all(&state.config.spool_dir)
                    .await
                    .map_err(|e| AppError::Internal(format!("spool dir: {}", e)))?;
                let spool_path = state
                    .config
                    .spool_dir
                    .join(format!("upload-{}", Uuid::new_v4()));

                let mut out = tokio::fs::File::create(&spool_path)
                    .await
                    .map_err(|e| AppError::Internal(format!("spool file: {}", e)))?;
                spool_guard.arm(spool_path.clone());

                let mut written: u64 = 0;
                loop {
                    let chunk = match field.chunk().await {
                        Ok(Some(chunk)) => chunk,
                        Ok(None) => break,
                        Err(e) => {
                            return Err(AppError::BadRequest(e.to_string()));
                        }
                    };
                    written += chunk.len() as u64;
                    // Oversize uploads are refused at the transport
                    // boundary; no pipeline run is created for them.
                    if let Err(e) =
                        validate_file_size(written as usize, state.config.max_file_size)
                    {
                        return Err(AppError::PayloadTooLarge(e.to_string()));
                    }
                    out.write_all(&chunk)
                        .await
                        .map_err(|e| AppError::Internal(format!("spool write: {}", e)))?;
                }
                out.flush()
                    .await
                    .map_err(|e| AppError::Internal(format!("spool flush: {}", e)))?;

                uploaded = Some(UploadedFile {
                    path: spool_path,
                    declared_name,
                    declared_size: written,
                    declared_content_type,
                });
            }
            "originalUrl" => {
                original_url = Some(field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("originalUrl: {}", e))
                })?);
            }
            "previewUrl" => {
                preview_url = Some(field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("previewUrl: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let (original_url, preview_url) = match (original_url, preview_url) {
        (Some(o), Some(p)) => (o, p),
        _ => {
            return Err(AppError::BadRequest(
                "originalUrl and previewUrl are required".to_string(),
            ));
        }
    };

    let file = match uploaded {
        Some(file) => file,
        None => {
            return Err(AppError::BadRequest("no file provided".to_string()));
        }
    };

    let original_dest = SinkDestination::parse(&original_url)
        .map_err(|e| AppError::BadRequest(format!("originalUrl: {}", e)))?;
    let preview_dest = SinkDestination::parse(&preview_url)
        .map_err(|e| AppError::BadRequest(format!("previewUrl: {}", e)))?;

    tracing::info!(
        "Pipeline run starting: {} ({} bytes)",
        file.declared_name,
        file.declared_size
    );

    // Detach the run so a client disconnect cannot abandon it between
    // a sink write and cleanup; it always reaches a terminal state.
    spool_guard.disarm();
    let pipeline = state.pipeline.clone();
    let report = tokio::spawn(async move {
        pipeline.run(file, original_dest, preview_dest).await
    })
    .await
    .map_err(|e| AppError::Internal(format!("pipeline task failed: {}", e)))?;

    Ok((report.status_code(), Json(report)))
}
