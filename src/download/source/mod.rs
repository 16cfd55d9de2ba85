//! Provider abstraction layer.
//!
//! The pipeline talks to two provider families through these traits:
//! - `PrimaryProvider`: an external downloader that writes audio and video files to disk
//!   (`YtDlpProvider`)
//! - `SecondaryProvider`: an in-process client that hands out elementary byte streams
//!   (`InnertubeProvider`)
//!
//! Both resolve metadata. Tests substitute in-memory fakes.

pub mod innertube;
pub mod ytdlp;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use url::Url;

use crate::core::error::AppResult;
use crate::download::identity::ClientIdentity;
use crate::download::progress::StreamKind;
use crate::download::strategy::Strategy;

/// Title and duration as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub duration_secs: u64,
}

/// Metadata resolved for a request, tagged with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub duration_secs: u64,
    pub source: Strategy,
}

impl VideoMetadata {
    pub fn from_info(info: MediaInfo, source: Strategy) -> Self {
        Self {
            title: info.title,
            duration_secs: info.duration_secs,
            source,
        }
    }
}

/// A lazily consumed audio-only or video-only byte stream.
pub struct ElementaryStream {
    pub kind: StreamKind,
    /// Announced size, if known
    pub total_bytes: Option<u64>,
    pub body: BoxStream<'static, AppResult<Bytes>>,
}

impl ElementaryStream {
    pub fn new(kind: StreamKind, total_bytes: Option<u64>, body: BoxStream<'static, AppResult<Bytes>>) -> Self {
        Self {
            kind,
            total_bytes,
            body,
        }
    }

    /// Stream over in-memory chunks; the total is their combined length.
    pub fn from_chunks(kind: StreamKind, chunks: Vec<Bytes>) -> Self {
        let total = chunks.iter().map(|c| c.len() as u64).sum();
        Self::new(kind, Some(total), stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

impl std::fmt::Debug for ElementaryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementaryStream")
            .field("kind", &self.kind)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

/// External downloader that produces files.
#[async_trait]
pub trait PrimaryProvider: Send + Sync {
    /// Human-readable name of this provider (e.g., "yt-dlp")
    fn name(&self) -> &str;

    /// Whether the tool can run at all on this host.
    async fn is_available(&self) -> bool;

    /// Fetch title and duration for the reference.
    async fn fetch_metadata(&self, reference: &Url) -> AppResult<MediaInfo>;

    /// Download the stream chosen by `format_selector` into `output`.
    async fn download(&self, reference: &Url, format_selector: &str, output: &Path) -> AppResult<()>;
}

/// In-process client that produces elementary streams.
///
/// Every call receives the client identity to present; the caller rotates it.
#[async_trait]
pub trait SecondaryProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_metadata(&self, reference: &Url, identity: &ClientIdentity) -> AppResult<MediaInfo>;

    /// Open the highest-quality stream of `kind`. No bytes are read until the body is polled.
    async fn open_stream(
        &self,
        reference: &Url,
        identity: &ClientIdentity,
        kind: StreamKind,
    ) -> AppResult<ElementaryStream>;
}

/// Extracts the 11-character video id from the usual link shapes.
///
/// Handles `watch?v=`, `youtu.be/`, `/shorts/`, `/embed/`, `/live/` and `/v/`.
pub fn extract_video_id(reference: &Url) -> Option<String> {
    let id_pattern = lazy_regex::regex!(r"^[A-Za-z0-9_-]{11}$");

    if let Some((_, v)) = reference.query_pairs().find(|(k, _)| k == "v") {
        if id_pattern.is_match(&v) {
            return Some(v.into_owned());
        }
    }

    let host = reference.host_str().unwrap_or_default();
    let mut segments = reference.path_segments()?.filter(|s| !s.is_empty());
    let candidate = if host.ends_with("youtu.be") {
        segments.next()
    } else {
        match segments.next() {
            Some("shorts" | "embed" | "live" | "v") => segments.next(),
            _ => None,
        }
    }?;

    id_pattern.is_match(candidate).then(|| candidate.to_string())
}
