use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::PipelineConfig;
use crate::services::classifier::{self, FileCategory};
use crate::services::converter::Converter;
use crate::services::scanner::{ScanResult, VirusScanner};
use crate::services::sink::{SinkDestination, UploadSink};

/// A request-scoped upload, spooled to disk by the transport layer.
/// Its path is exclusively owned by one pipeline run and is unlinked
/// on every exit branch.
#[derive(Debug)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub declared_name: String,
    pub declared_size: u64,
    pub declared_content_type: String,
}

/// On-disk paths created during one pipeline run. Every registered
/// path is removed on every exit branch; removing a missing file is a
/// no-op, so draining twice is harmless.
#[derive(Debug, Default)]
pub struct TempFileSet {
    paths: Vec<PathBuf>,
}

impl TempFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub async fn cleanup(&self) {
        for path in &self.paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove temp file {:?}: {}", path, e),
            }
        }
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Rejected,
    Error,
}

/// Which scan result (if any) applied to the run, so a caller can tell
/// "never scanned because the type was blocked" from "scanned clean".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanDisposition {
    Clean,
    Infected,
    NotScanned,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub scan_result: ScanDisposition,
    pub original_uploaded: bool,
    pub preview_generated: bool,
    pub file_category: FileCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    /// HTTP status implied by the terminal state: blocked types are a
    /// client error, infected files a security rejection, everything
    /// else that fails is an infrastructure error.
    pub fn status_code(&self) -> StatusCode {
        match (self.status, self.scan_result) {
            (PipelineStatus::Success, _) => StatusCode::OK,
            (PipelineStatus::Rejected, ScanDisposition::Infected) => StatusCode::FORBIDDEN,
            (PipelineStatus::Rejected, _) => StatusCode::BAD_REQUEST,
            (PipelineStatus::Error, _) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The scan-first pipeline: classify, scan, upload the original,
/// convert, upload the preview, clean up. Scanning happens strictly
/// before any persistent write, and every stage failure drains the
/// temp-file set before the report is produced.
pub struct PipelineService {
    scanner: Arc<dyn VirusScanner>,
    converter: Converter,
    sink: UploadSink,
    convert_watchdog: Duration,
}

impl PipelineService {
    pub fn new(
        scanner: Arc<dyn VirusScanner>,
        converter: Converter,
        sink: UploadSink,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            scanner,
            converter,
            sink,
            convert_watchdog: Duration::from_secs(config.convert_timeout_secs),
        }
    }

    pub async fn run(
        &self,
        file: UploadedFile,
        original_dest: SinkDestination,
        preview_dest: SinkDestination,
    ) -> PipelineReport {
        let started = std::time::Instant::now();
        let mut temp = TempFileSet::new();
        temp.register(file.path.clone());

        // Received -> Classified
        let category = classifier::classify(&file.declared_name);
        if category == FileCategory::Blocked {
            tracing::warn!("Rejected blocked upload: {}", file.declared_name);
            temp.cleanup().await;
            return PipelineReport {
                status: PipelineStatus::Rejected,
                scan_result: ScanDisposition::NotScanned,
                original_uploaded: false,
                preview_generated: false,
                file_category: category,
                details: Some("file type is not allowed".to_string()),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        // Classified -> Scanned. A scan that cannot complete is fatal
        // for this request; it never authorizes an upload.
        match self.scanner.scan(&file.path).await {
            Ok(ScanResult::Clean) => {
                tracing::debug!("Scan clean for {}", file.declared_name);
            }
            Ok(ScanResult::Infected { signature }) => {
                tracing::warn!(
                    "Virus detected in {}: {}",
                    file.declared_name,
                    signature
                );
                temp.cleanup().await;
                return PipelineReport {
                    status: PipelineStatus::Rejected,
                    scan_result: ScanDisposition::Infected,
                    original_uploaded: false,
                    preview_generated: false,
                    file_category: category,
                    details: Some(format!("threat detected: {}", signature)),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
            }
            Ok(ScanResult::Error { reason }) => {
                tracing::error!("Scan error for {}: {}", file.declared_name, reason);
                temp.cleanup().await;
                return self.infra_error(category, ScanDisposition::NotScanned, false, reason, started);
            }
            Err(e) => {
                tracing::error!("Scanner failure for {}: {:#}", file.declared_name, e);
                temp.cleanup().await;
                return self.infra_error(
                    category,
                    ScanDisposition::NotScanned,
                    false,
                    format!("scan failed: {}", e),
                    started,
                );
            }
        }

        // Scanned -> OriginalUploaded
        if let Err(e) = self
            .sink
            .upload(&original_dest, &file.path, &file.declared_content_type)
            .await
        {
            tracing::error!("Original upload failed for {}: {}", file.declared_name, e);
            temp.cleanup().await;
            return self.infra_error(
                category,
                ScanDisposition::Clean,
                false,
                format!("original upload failed: {}", e),
                started,
            );
        }

        // OriginalUploaded -> Converted, under the overall watchdog.
        let preview = match tokio::time::timeout(
            self.convert_watchdog,
            self.converter
                .convert(&file.path, &file.declared_name, category, file.declared_size),
        )
        .await
        {
            Ok(Ok(preview)) => preview,
            Ok(Err(e)) => {
                tracing::error!("Conversion failed for {}: {:#}", file.declared_name, e);
                temp.cleanup().await;
                return self.infra_error(
                    category,
                    ScanDisposition::Clean,
                    true,
                    format!("conversion failed: {}", e),
                    started,
                );
            }
            Err(_) => {
                tracing::error!("Conversion watchdog expired for {}", file.declared_name);
                temp.cleanup().await;
                return self.infra_error(
                    category,
                    ScanDisposition::Clean,
                    true,
                    format!("conversion timed out after {:?}", self.convert_watchdog),
                    started,
                );
            }
        };
        temp.register(preview.path().to_path_buf());

        // Converted -> PreviewUploaded
        if let Err(e) = self
            .sink
            .upload(&preview_dest, preview.path(), mime::APPLICATION_PDF.as_ref())
            .await
        {
            tracing::error!("Preview upload failed for {}: {}", file.declared_name, e);
            temp.cleanup().await;
            return self.infra_error(
                category,
                ScanDisposition::Clean,
                true,
                format!("preview upload failed: {}", e),
                started,
            );
        }

        // Done
        temp.cleanup().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Pipeline completed for {} ({}, {} ms)",
            file.declared_name,
            category,
            elapsed_ms
        );
        PipelineReport {
            status: PipelineStatus::Success,
            scan_result: ScanDisposition::Clean,
            original_uploaded: true,
            preview_generated: true,
            file_category: category,
            details: preview
                .degraded_reason()
                .map(|r| format!("placeholder preview: {}", r)),
            elapsed_ms,
        }
    }

    fn infra_error(
        &self,
        category: FileCategory,
        scan_result: ScanDisposition,
        original_uploaded: bool,
        details: String,
        started: std::time::Instant,
    ) -> PipelineReport {
        PipelineReport {
            status: PipelineStatus::Error,
            scan_result,
            original_uploaded,
            preview_generated: false,
            file_category: category,
            details: Some(details),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"temp").unwrap();
        let path = file.path().to_path_buf();
        let (_, kept_path) = file.keep().unwrap();
        assert_eq!(path, kept_path);

        let mut set = TempFileSet::new();
        set.register(path.clone());
        set.register(PathBuf::from("/nonexistent/never-created"));

        set.cleanup().await;
        assert!(!path.exists());
        // Second drain must not fail on already-removed files.
        set.cleanup().await;
    }

    #[test]
    fn test_report_status_codes() {
        let mut report = PipelineReport {
            status: PipelineStatus::Success,
            scan_result: ScanDisposition::Clean,
            original_uploaded: true,
            preview_generated: true,
            file_category: FileCategory::Document,
            details: None,
            elapsed_ms: 1,
        };
        assert_eq!(report.status_code(), StatusCode::OK);

        report.status = PipelineStatus::Rejected;
        report.scan_result = ScanDisposition::Infected;
        assert_eq!(report.status_code(), StatusCode::FORBIDDEN);

        report.scan_result = ScanDisposition::NotScanned;
        assert_eq!(report.status_code(), StatusCode::BAD_REQUEST);

        report.status = PipelineStatus::Error;
        assert_eq!(report.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = PipelineReport {
            status: PipelineStatus::Success,
            scan_result: ScanDisposition::Clean,
            original_uploaded: true,
            preview_generated: true,
            file_category: FileCategory::Image,
            details: None,
            elapsed_ms: 12,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["scanResult"], "clean");
        assert_eq!(json["originalUploaded"], true);
        assert_eq!(json["previewGenerated"], true);
        assert_eq!(json["fileCategory"], "image");
        assert!(json.get("details").is_none());
    }
}
