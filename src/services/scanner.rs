use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::PipelineConfig;

/// Result of a virus scan.
///
/// `Error` is deliberately distinct from both `Clean` and `Infected`:
/// a scan that cannot be completed never authorizes an upload.
#[derive(Debug, Clone)]
pub enum ScanResult {
    /// File is clean (no threats detected)
    Clean,
    /// File is infected with malware
    Infected { signature: String },
    /// Scan could not be completed
    Error { reason: String },
}

/// Trait for virus scanning implementations
#[async_trait::async_trait]
pub trait VirusScanner: Send + Sync {
    /// Scan the file at `path` for malware.
    async fn scan(&self, path: &Path) -> Result<ScanResult>;

    /// Check if the scanner is available/healthy
    async fn health_check(&self) -> bool;
}

/// ClamAV scanner using TCP socket (clamd)
///
/// Docker command to run ClamAV:
/// ```bash
/// docker run -d --name clamav -p 3310:3310 clamav/clamav:latest
/// ```
pub struct ClamAvScanner {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ClamAvScanner {
    pub fn new(host: String, port: u16, timeout: Duration) -> Self {
        Self {
            host,
            port,
            timeout,
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.host, self.port);
        TcpStream::connect(&addr)
            .await
            .map_err(|e| anyhow!("Failed to connect to ClamAV at {}: {}", addr, e))
    }

    async fn scan_inner(&self, path: &Path) -> Result<ScanResult> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut stream = self.connect().await?;

        // Use INSTREAM command for streaming data to clamd
        // Format: zINSTREAM\0 <length:u32 big-endian> <data> ... <0:u32>
        stream.write_all(b"zINSTREAM\0").await?;

        const CHUNK_SIZE: usize = 1024 * 1024;
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            let len = (n as u32).to_be_bytes();
            stream.write_all(&len).await?;
            stream.write_all(&buffer[..n]).await?;
        }

        // Send zero-length chunk to indicate end of stream
        stream.write_all(&0u32.to_be_bytes()).await?;
        stream.flush().await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;

        let response_str = String::from_utf8_lossy(&response);
        let response_str = response_str.trim_end_matches('\0').trim();

        tracing::debug!("ClamAV response: {}", response_str);

        if response_str.ends_with("OK") {
            Ok(ScanResult::Clean)
        } else if response_str.contains("FOUND") {
            let parts: Vec<&str> = response_str.split(':').collect();
            let signature = if parts.len() > 1 {
                parts[1].trim().replace(" FOUND", "")
            } else {
                "Unknown threat".to_string()
            };
            Ok(ScanResult::Infected { signature })
        } else {
            Ok(ScanResult::Error {
                reason: format!("Unexpected ClamAV response: {}", response_str),
            })
        }
    }
}

#[async_trait::async_trait]
impl VirusScanner for ClamAvScanner {
    async fn scan(&self, path: &Path) -> Result<ScanResult> {
        match tokio::time::timeout(self.timeout, self.scan_inner(path)).await {
            Ok(result) => result,
            Err(_) => Ok(ScanResult::Error {
                reason: format!("scan timed out after {:?}", self.timeout),
            }),
        }
    }

    async fn health_check(&self) -> bool {
        match self.connect().await {
            Ok(mut stream) => {
                if stream.write_all(b"zPING\0").await.is_err() {
                    return false;
                }
                if stream.flush().await.is_err() {
                    return false;
                }

                let mut response = [0u8; 16];
                match stream.read(&mut response).await {
                    Ok(n) => {
                        let resp = String::from_utf8_lossy(&response[..n]);
                        resp.contains("PONG")
                    }
                    Err(_) => false,
                }
            }
            Err(_) => false,
        }
    }
}

/// No-op scanner for development/testing
pub struct NoOpScanner;

#[async_trait::async_trait]
impl VirusScanner for NoOpScanner {
    async fn scan(&self, _path: &Path) -> Result<ScanResult> {
        tracing::warn!("NoOpScanner: Skipping virus scan (development mode)");
        Ok(ScanResult::Clean)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Factory function to create appropriate scanner based on config
pub fn create_scanner(config: &PipelineConfig) -> Box<dyn VirusScanner> {
    match config.virus_scanner_type.to_lowercase().as_str() {
        "clamav" => Box::new(ClamAvScanner::new(
            config.clamav_host.clone(),
            config.clamav_port,
            Duration::from_secs(config.scan_timeout_secs),
        )),
        "noop" | "none" | "disabled" => Box::new(NoOpScanner),
        other => {
            tracing::warn!("Unknown scanner type '{}', using NoOpScanner", other);
            Box::new(NoOpScanner)
        }
    }
}
