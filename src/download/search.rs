//! Free-text search resolved to a single video reference.

use async_trait::async_trait;
use tokio::process::Command;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::process::{run_with_timeout, stderr_tail};

/// Turns a query into the best-matching reference, or `None` when nothing matches.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn find(&self, query: &str) -> AppResult<Option<Url>>;
}

/// Search through yt-dlp's `ytsearch1:` extractor.
#[derive(Debug, Clone)]
pub struct YtDlpSearch {
    bin: String,
}

impl Default for YtDlpSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpSearch {
    pub fn new() -> Self {
        Self {
            bin: config::YTDL_BIN.clone(),
        }
    }

    pub fn with_bin(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

/// Picks the first URL yt-dlp printed and adds the parameters that skip the
/// content-verification interstitial.
pub fn parse_search_output(stdout: &str) -> Option<Url> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut url = Url::parse(line).ok()?;
    url.query_pairs_mut()
        .append_pair("bpctr", "9999999999")
        .append_pair("has_verified", "1");
    Some(url)
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn find(&self, query: &str) -> AppResult<Option<Url>> {
        let mut cmd = Command::new(&self.bin);
        cmd.args([
            "--print",
            "webpage_url",
            "--skip-download",
            "--no-warnings",
            "--flat-playlist",
        ])
        .arg(format!("ytsearch1:{}", query));

        let output = run_with_timeout(&mut cmd, config::download::ytdlp_timeout())
            .await
            .map_err(|e| AppError::Search(e.to_string()))?;

        if !output.status.success() {
            let detail = stderr_tail(&output.stderr, 300);
            log::error!("yt-dlp search for '{}' failed: {}", query, detail);
            return Err(AppError::Search(detail));
        }

        let found = parse_search_output(&String::from_utf8_lossy(&output.stdout));
        match &found {
            Some(url) => log::info!("🔎 '{}' resolved to {}", query, url),
            None => log::info!("🔎 No result for '{}'", query),
        }
        Ok(found)
    }
}
