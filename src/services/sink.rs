use std::path::Path;
use std::sync::Arc;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::services::ephemeral::EphemeralStore;

/// Namespace inside the local ephemeral store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Original,
    Preview,
}

impl LocalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalKind::Original => "original",
            LocalKind::Preview => "preview",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "original" => Some(LocalKind::Original),
            "preview" => Some(LocalKind::Preview),
            _ => None,
        }
    }
}

/// Where an artifact goes. The discriminant is decided once, at the
/// transport boundary, instead of being re-inferred from string shape
/// deeper in the pipeline.
#[derive(Debug, Clone)]
pub enum SinkDestination {
    /// Pre-authorized single-use PUT locator.
    Remote(Url),
    /// Slot in the local ephemeral test store.
    Local { kind: LocalKind, key: String },
}

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("destination is not a valid URL: {0}")]
    Malformed(String),
    #[error("unsupported destination scheme '{0}' (expected http(s) or local://)")]
    UnsupportedScheme(String),
    #[error("local destination must look like local://original/<key> or local://preview/<key>")]
    BadLocalPath,
}

impl SinkDestination {
    /// Parse an opaque destination descriptor. `local://{kind}/{key}`
    /// selects the ephemeral store; http(s) URLs select the remote
    /// sink; anything else is refused.
    pub fn parse(raw: &str) -> Result<Self, DestinationError> {
        if let Some(rest) = raw.strip_prefix("local://") {
            let (kind, key) = rest
                .split_once('/')
                .ok_or(DestinationError::BadLocalPath)?;
            let kind = LocalKind::parse(kind).ok_or(DestinationError::BadLocalPath)?;
            if key.is_empty() || key.contains('/') || key.contains("..") {
                return Err(DestinationError::BadLocalPath);
            }
            return Ok(SinkDestination::Local {
                kind,
                key: key.to_string(),
            });
        }

        let url = Url::parse(raw).map_err(|e| DestinationError::Malformed(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(SinkDestination::Remote(url)),
            other => Err(DestinationError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("remote sink rejected upload with status {0}")]
    RemoteRejected(reqwest::StatusCode),
    #[error("remote sink transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("local store failure: {0}")]
    Local(#[from] anyhow::Error),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Dual-mode upload sink: a single synchronous PUT for remote
/// destinations, a TTL-keyed copy for local ones. No retries in either
/// mode; a remote locator is assumed single-use and time-boxed.
pub struct UploadSink {
    http: reqwest::Client,
    local: Arc<EphemeralStore>,
}

impl UploadSink {
    pub fn new(local: Arc<EphemeralStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            local,
        }
    }

    pub async fn upload(
        &self,
        dest: &SinkDestination,
        source: &Path,
        content_type: &str,
    ) -> Result<(), SinkError> {
        match dest {
            SinkDestination::Remote(url) => self.put_remote(url, source, content_type).await,
            SinkDestination::Local { kind, key } => {
                self.local.put(*kind, key, source, content_type).await?;
                Ok(())
            }
        }
    }

    async fn put_remote(
        &self,
        url: &Url,
        source: &Path,
        content_type: &str,
    ) -> Result<(), SinkError> {
        let file = tokio::fs::File::open(source).await?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .http
            .put(url.clone())
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;

        if response.status().is_success() {
            tracing::debug!("Remote sink accepted {} bytes at {}", len, url);
            Ok(())
        } else {
            Err(SinkError::RemoteRejected(response.status()))
        }
    }
}
