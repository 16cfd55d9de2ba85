//! YtDlpProvider: the primary strategy, powered by the yt-dlp binary.
//!
//! Metadata comes from a single `--print` invocation; audio and video are downloaded
//! as separate files that the merger combines afterwards. Failures carry yt-dlp's
//! stderr so the classifier can tell bot checks from unavailable videos.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::process::{run_with_timeout, stderr_tail};
use crate::download::source::{MediaInfo, PrimaryProvider};
use crate::download::strategy::Strategy;

/// Amount of stderr kept in error messages.
const STDERR_TAIL_CHARS: usize = 600;

/// Primary provider backed by yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpProvider {
    bin: String,
    cookies_file: Option<String>,
    timeout: Duration,
}

impl Default for YtDlpProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpProvider {
    /// Provider using `YTDL_BIN` and `YTDL_COOKIES_FILE`.
    pub fn new() -> Self {
        Self {
            bin: config::YTDL_BIN.clone(),
            cookies_file: config::YTDL_COOKIES_FILE.clone(),
            timeout: config::download::ytdlp_timeout(),
        }
    }

    pub fn with_bin(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            ..Self::new()
        }
    }

    /// Arguments shared by every invocation.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-check-certificate".to_string(),
            // android_vr works without authentication, web_safari as fallback
            "--extractor-args".to_string(),
            "youtube:player_client=android_vr,web_safari".to_string(),
        ];
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.clone());
        }
        args
    }

    /// Runs yt-dlp with `args` and returns stdout, mapping every failure onto an AppError.
    async fn run(&self, operation: &str, args: &[String]) -> AppResult<String> {
        log::debug!("yt-dlp {} command: {} {}", operation, self.bin, args.join(" "));
        let start = Instant::now();

        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        let output = match run_with_timeout(&mut cmd, self.timeout).await {
            Ok(output) => output,
            Err(AppError::Io(e)) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return Err(AppError::ToolUnavailable {
                    tool: self.bin.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        log::debug!("yt-dlp {} finished in {:.1}s", operation, start.elapsed().as_secs_f64());

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr, STDERR_TAIL_CHARS);
            log::error!("yt-dlp {} failed: {}", operation, stderr);
            return Err(AppError::provider(Strategy::Primary, stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parses `<duration>\t<title>` as printed by the metadata template.
fn parse_metadata_line(stdout: &str) -> AppResult<MediaInfo> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| AppError::ResponseShape("yt-dlp printed no metadata".to_string()))?;

    let (duration, title) = line
        .split_once('\t')
        .ok_or_else(|| AppError::ResponseShape(format!("could not parse yt-dlp metadata line: {}", line)))?;

    // Duration is NA for livestreams and premieres; counted as 0 so the limit check passes
    let duration = duration.trim();
    let duration_secs = if duration.is_empty() || duration == "NA" {
        0
    } else {
        duration
            .parse::<f64>()
            .map(|d| d.round().max(0.0) as u64)
            .map_err(|_| AppError::ResponseShape(format!("could not parse duration '{}'", duration)))?
    };

    let title = title.trim();
    Ok(MediaInfo {
        title: if title.is_empty() || title == "NA" {
            "Untitled".to_string()
        } else {
            title.to_string()
        },
        duration_secs,
    })
}

#[async_trait]
impl PrimaryProvider for YtDlpProvider {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn is_available(&self) -> bool {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--version");
        match run_with_timeout(&mut cmd, config::download::tool_probe_timeout()).await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                log::warn!(
                    "yt-dlp --version failed: {}",
                    stderr_tail(&output.stderr, STDERR_TAIL_CHARS)
                );
                false
            }
            Err(e) => {
                log::warn!("yt-dlp is not runnable: {}", e);
                false
            }
        }
    }

    async fn fetch_metadata(&self, reference: &Url) -> AppResult<MediaInfo> {
        let mut args = vec![
            "--print".to_string(),
            "%(duration)s\t%(title)s".to_string(),
            "--skip-download".to_string(),
        ];
        args.extend(self.common_args());
        args.push(reference.as_str().to_string());

        let stdout = self.run("metadata", &args).await?;
        let info = parse_metadata_line(&stdout)?;
        log::info!("📋 yt-dlp metadata: '{}' ({}s)", info.title, info.duration_secs);
        Ok(info)
    }

    async fn download(&self, reference: &Url, format_selector: &str, output: &Path) -> AppResult<()> {
        let mut args = vec![
            "-f".to_string(),
            format_selector.to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "--no-part".to_string(),
            "--force-overwrites".to_string(),
            "--no-progress".to_string(),
        ];
        args.extend(self.common_args());
        args.push(reference.as_str().to_string());

        self.run("download", &args).await?;

        if !output.exists() {
            return Err(AppError::provider(
                Strategy::Primary,
                format!("yt-dlp reported success but {} is missing", output.display()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_metadata_line() {
        let info = parse_metadata_line("212.0\tNever Gonna Give You Up\n").expect("parse");
        assert_eq!(
            info,
            MediaInfo {
                title: "Never Gonna Give You Up".to_string(),
                duration_secs: 212
            }
        );
    }

    #[test]
    fn test_parse_metadata_keeps_tabs_in_title() {
        let info = parse_metadata_line("61\tA\tB").expect("parse");
        assert_eq!(info.title, "A\tB");
        assert_eq!(info.duration_secs, 61);
    }

    #[test]
    fn test_parse_metadata_na_duration_is_zero() {
        let info = parse_metadata_line("NA\tLive stream").expect("parse");
        assert_eq!(info.duration_secs, 0);
        assert_eq!(info.title, "Live stream");
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        assert!(matches!(
            parse_metadata_line("soon\tPremiere"),
            Err(AppError::ResponseShape(_))
        ));
        assert!(matches!(parse_metadata_line(""), Err(AppError::ResponseShape(_))));
    }

    #[test]
    fn test_cookies_are_passed_when_configured() {
        let provider = YtDlpProvider {
            bin: "yt-dlp".to_string(),
            cookies_file: Some("cookies.txt".to_string()),
            timeout: Duration::from_secs(1),
        };
        let args = provider.common_args();
        let pos = args.iter().position(|a| a == "--cookies").expect("cookies flag");
        assert_eq!(args[pos + 1], "cookies.txt");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let provider = YtDlpProvider::with_bin("definitely-not-yt-dlp-binary");
        assert!(!provider.is_available().await);

        let url = Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").expect("url");
        let err = provider.fetch_metadata(&url).await.expect_err("must fail");
        assert!(matches!(err, AppError::ToolUnavailable { .. }));
    }
}
