use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::retry::RetryConfig;

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Cached ffmpeg binary path
/// Read from FFMPEG_BIN environment variable, defaults to "ffmpeg"
pub static FFMPEG_BIN: Lazy<String> =
    Lazy::new(|| env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()));

/// Path to cookies file for YouTube authentication
/// Read from YTDL_COOKIES_FILE environment variable
/// Passed to yt-dlp as `--cookies` when set and non-empty
pub static YTDL_COOKIES_FILE: Lazy<Option<String>> =
    Lazy::new(|| env::var("YTDL_COOKIES_FILE").ok().filter(|s| !s.trim().is_empty()));

/// Temporary files directory for downloads and merges
/// Read from TEMP_FILES_DIR environment variable
/// Defaults to the platform temp directory
pub static TEMP_FILES_DIR: Lazy<String> = Lazy::new(|| {
    env::var("TEMP_FILES_DIR").unwrap_or_else(|_| env::temp_dir().to_string_lossy().into_owned())
});

/// Directory that finished videos are delivered into
/// Read from OUTPUT_DIR environment variable
/// Default: downloads
pub static OUTPUT_DIR: Lazy<String> =
    Lazy::new(|| env::var("OUTPUT_DIR").unwrap_or_else(|_| "downloads".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: ytmux.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "ytmux.log".to_string()));

/// Optional innertube API key appended to player requests
pub static INNERTUBE_API_KEY: Lazy<Option<String>> =
    Lazy::new(|| env::var("INNERTUBE_API_KEY").ok().filter(|s| !s.trim().is_empty()));

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}={:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Request limits
pub mod limits {
    use super::env_u64;
    use once_cell::sync::Lazy;

    /// Longest accepted video (30 minutes)
    pub const MAX_DURATION_SECS: u64 = 1800;

    /// Largest deliverable artifact in megabytes
    pub const MAX_FILE_SIZE_MB: u64 = 50;

    pub static MAX_DURATION: Lazy<u64> = Lazy::new(|| env_u64("MAX_DURATION_SECS", MAX_DURATION_SECS));

    pub static MAX_FILE_SIZE: Lazy<u64> = Lazy::new(|| env_u64("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB));

    pub fn max_file_size_bytes() -> u64 {
        *MAX_FILE_SIZE * 1024 * 1024
    }
}

/// Merge (ffmpeg) configuration
pub mod merge {
    use super::{env_u64, Duration};
    use once_cell::sync::Lazy;

    /// Wall-clock budget for the piped fallback merge (10 minutes)
    pub const MERGE_TIMEOUT_SECS: u64 = 600;

    /// Timeout for merging two downloaded files
    pub const FILE_MERGE_TIMEOUT_SECS: u64 = 300;

    /// Time a terminated ffmpeg gets to exit before it is killed outright
    pub const KILL_GRACE_SECS: u64 = 5;

    static MERGE_TIMEOUT: Lazy<u64> = Lazy::new(|| env_u64("MERGE_TIMEOUT_SECS", MERGE_TIMEOUT_SECS));

    pub fn timeout() -> Duration {
        Duration::from_secs(*MERGE_TIMEOUT)
    }

    pub fn file_merge_timeout() -> Duration {
        Duration::from_secs(FILE_MERGE_TIMEOUT_SECS)
    }

    pub fn kill_grace() -> Duration {
        Duration::from_secs(KILL_GRACE_SECS)
    }
}

/// Download configuration
pub mod download {
    use super::Duration;

    /// Timeout for yt-dlp invocations (4 minutes)
    pub const YTDLP_TIMEOUT_SECS: u64 = 240;

    /// Timeout for `--version` probes
    pub const TOOL_PROBE_TIMEOUT_SECS: u64 = 15;

    /// Range request size for innertube stream downloads (10 MiB)
    pub const SECONDARY_CHUNK_BYTES: u64 = 10 * 1024 * 1024;

    /// Connect/read timeout for innertube HTTP requests
    pub const HTTP_TIMEOUT_SECS: u64 = 30;

    /// Format selectors handed to the primary downloader
    pub const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio";
    pub const VIDEO_FORMAT: &str = "bestvideo[ext=mp4]/bestvideo";

    pub fn ytdlp_timeout() -> Duration {
        Duration::from_secs(YTDLP_TIMEOUT_SECS)
    }

    pub fn tool_probe_timeout() -> Duration {
        Duration::from_secs(TOOL_PROBE_TIMEOUT_SECS)
    }

    pub fn http_timeout() -> Duration {
        Duration::from_secs(HTTP_TIMEOUT_SECS)
    }
}

/// Retry configuration for each provider call
pub mod retry {
    use super::Duration;

    pub const PRIMARY_METADATA_ATTEMPTS: u32 = 2;
    pub const PRIMARY_METADATA_DELAY_MS: u64 = 1500;

    pub const PRIMARY_DOWNLOAD_ATTEMPTS: u32 = 3;
    pub const PRIMARY_DOWNLOAD_DELAY_MS: u64 = 2000;

    pub const SECONDARY_METADATA_ATTEMPTS: u32 = 3;
    pub const SECONDARY_METADATA_DELAY_MS: u64 = 2000;

    pub const SECONDARY_STREAM_ATTEMPTS: u32 = 3;
    pub const SECONDARY_STREAM_DELAY_MS: u64 = 3000;

    /// Cap on any single backoff delay
    pub const MAX_DELAY_SECS: u64 = 30;

    pub fn max_delay() -> Duration {
        Duration::from_secs(MAX_DELAY_SECS)
    }
}

/// Progress rendering configuration
pub mod progress {
    use super::Duration;

    /// Interval between progress log lines while a fallback merge runs
    pub const RENDER_INTERVAL_MS: u64 = 1000;

    pub fn render_interval() -> Duration {
        Duration::from_millis(RENDER_INTERVAL_MS)
    }
}

/// Retry policy for every retried provider call of a request.
#[derive(Debug, Clone)]
pub struct RetryPolicies {
    pub primary_metadata: RetryConfig,
    pub primary_download: RetryConfig,
    pub secondary_metadata: RetryConfig,
    pub secondary_stream: RetryConfig,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            primary_metadata: RetryConfig::primary_metadata(),
            primary_download: RetryConfig::primary_download(),
            secondary_metadata: RetryConfig::secondary_metadata(),
            secondary_stream: RetryConfig::secondary_stream(),
        }
    }
}

impl RetryPolicies {
    /// Same attempt counts with a fixed, tiny delay. Handy for tests and dry runs.
    pub fn immediate() -> Self {
        let fast = |cfg: RetryConfig| cfg.initial_delay(Duration::from_millis(1)).no_jitter();
        let defaults = Self::default();
        Self {
            primary_metadata: fast(defaults.primary_metadata),
            primary_download: fast(defaults.primary_download),
            secondary_metadata: fast(defaults.secondary_metadata),
            secondary_stream: fast(defaults.secondary_stream),
        }
    }
}

/// Per-pipeline settings, assembled from the environment-backed statics above.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_duration_secs: u64,
    pub max_file_size_bytes: u64,
    pub temp_dir: PathBuf,
    pub merge_timeout: Duration,
    pub kill_grace: Duration,
    pub progress_interval: Duration,
    pub render_progress: bool,
    pub send_status_notice: bool,
    pub retry: RetryPolicies,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: *limits::MAX_DURATION,
            max_file_size_bytes: limits::max_file_size_bytes(),
            temp_dir: PathBuf::from(TEMP_FILES_DIR.as_str()),
            merge_timeout: merge::timeout(),
            kill_grace: merge::kill_grace(),
            progress_interval: progress::render_interval(),
            render_progress: true,
            send_status_notice: true,
            retry: RetryPolicies::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_constants() {
        assert_eq!(limits::MAX_DURATION_SECS, 1800);
        assert_eq!(limits::MAX_FILE_SIZE_MB * 1024 * 1024, 52_428_800);
        assert_eq!(merge::MERGE_TIMEOUT_SECS, 600);
    }

    #[test]
    fn default_retry_policies() {
        let policies = RetryPolicies::default();
        assert_eq!(policies.primary_metadata.max_attempts, 2);
        assert_eq!(policies.primary_metadata.initial_delay, Duration::from_millis(1500));
        assert_eq!(policies.primary_download.max_attempts, 3);
        assert_eq!(policies.secondary_metadata.max_attempts, 3);
        assert_eq!(policies.secondary_stream.initial_delay, Duration::from_secs(3));
    }

    #[test]
    fn immediate_policies_keep_attempt_counts() {
        let policies = RetryPolicies::immediate();
        assert_eq!(policies.primary_download.max_attempts, 3);
        assert_eq!(policies.secondary_stream.initial_delay, Duration::from_millis(1));
        assert!(!policies.secondary_stream.add_jitter);
    }
}
