use std::env;
use std::path::PathBuf;

/// Configuration for the preview pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum file size in bytes (default: 100 MB)
    pub max_file_size: usize,

    /// Enable virus scanning (default: true)
    pub enable_virus_scan: bool,

    /// Virus scanner type: "clamav" or "noop" (default: "clamav")
    pub virus_scanner_type: String,

    /// ClamAV host (default: "127.0.0.1")
    pub clamav_host: String,

    /// ClamAV port (default: 3310)
    pub clamav_port: u16,

    /// Hard timeout for a single scan in seconds (default: 30)
    pub scan_timeout_secs: u64,

    /// Watchdog timeout for a single conversion in seconds (default: 120)
    pub convert_timeout_secs: u64,

    /// Simultaneously active image/document conversions (default: 2)
    pub convert_concurrency: usize,

    /// Time-to-live of entries in the local ephemeral store in seconds
    /// (default: 300)
    pub local_store_ttl_secs: u64,

    /// Directory backing the local ephemeral store
    pub local_store_dir: PathBuf,

    /// Directory where inbound uploads and generated PDFs are spooled
    pub spool_dir: PathBuf,

    /// LibreOffice binary used for office-document rendering
    /// (default: "soffice")
    pub soffice_bin: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let tmp = env::temp_dir();
        Self {
            max_file_size: 100 * 1024 * 1024, // 100 MB
            enable_virus_scan: true,
            virus_scanner_type: "clamav".to_string(),
            clamav_host: "127.0.0.1".to_string(),
            clamav_port: 3310,
            scan_timeout_secs: 30,
            convert_timeout_secs: 120,
            convert_concurrency: 2,
            local_store_ttl_secs: 300, // 5 minutes
            local_store_dir: tmp.join("preview-gateway/local-store"),
            spool_dir: tmp.join("preview-gateway/spool"),
            soffice_bin: "soffice".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            enable_virus_scan: env::var("ENABLE_VIRUS_SCAN")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.enable_virus_scan),

            virus_scanner_type: env::var("VIRUS_SCANNER_TYPE")
                .unwrap_or(default.virus_scanner_type),

            clamav_host: env::var("CLAMAV_HOST").unwrap_or(default.clamav_host),

            clamav_port: env::var("CLAMAV_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.clamav_port),

            scan_timeout_secs: env::var("SCAN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.scan_timeout_secs),

            convert_timeout_secs: env::var("CONVERT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.convert_timeout_secs),

            convert_concurrency: env::var("CONVERT_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.convert_concurrency),

            local_store_ttl_secs: env::var("LOCAL_STORE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.local_store_ttl_secs),

            local_store_dir: env::var("LOCAL_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.local_store_dir),

            spool_dir: env::var("SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.spool_dir),

            soffice_bin: env::var("SOFFICE_BIN").unwrap_or(default.soffice_bin),
        }
    }

    /// Create config for development (no virus scanning, relaxed limits)
    pub fn development() -> Self {
        Self {
            enable_virus_scan: false,
            virus_scanner_type: "noop".to_string(),
            ..Self::default()
        }
    }

    /// Create config for production (strict security)
    pub fn production() -> Self {
        Self {
            enable_virus_scan: true,
            virus_scanner_type: "clamav".to_string(),
            clamav_host: env::var("CLAMAV_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            clamav_port: env::var("CLAMAV_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3310),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert!(config.enable_virus_scan);
        assert_eq!(config.virus_scanner_type, "clamav");
        assert_eq!(config.scan_timeout_secs, 30);
        assert_eq!(config.convert_timeout_secs, 120);
        assert_eq!(config.convert_concurrency, 2);
        assert_eq!(config.local_store_ttl_secs, 300);
    }

    #[test]
    fn test_development_config() {
        let config = PipelineConfig::development();
        assert!(!config.enable_virus_scan);
        assert_eq!(config.virus_scanner_type, "noop");
    }

    #[test]
    fn test_production_config() {
        let config = PipelineConfig::production();
        assert!(config.enable_virus_scan);
        assert_eq!(config.virus_scanner_type, "clamav");
    }
}
