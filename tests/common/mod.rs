//! Common test utilities
//!
//! In-memory collaborators for driving the pipeline without yt-dlp, ffmpeg or the network.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tempfile::TempDir;
use url::Url;

use ytmux::core::config::{PipelineConfig, RetryPolicies};
use ytmux::core::error::{AppError, AppResult};
use ytmux::download::identity::{default_pool, ClientIdentity, IdentityRotator};
use ytmux::download::janitor::{Janitor, ProcessState};
use ytmux::download::merge::{pump_stream, Merger};
use ytmux::download::progress::{ProgressTracker, StreamKind};
use ytmux::download::search::SearchProvider;
use ytmux::download::send::{DeliveredVideo, Delivery};
use ytmux::download::source::{ElementaryStream, MediaInfo, PrimaryProvider, SecondaryProvider};
use ytmux::{Collaborators, Pipeline};

pub type Responder<T> = Arc<dyn Fn() -> AppResult<T> + Send + Sync>;

pub const LINK: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Bytes that pass the container sniff, padded to `len`.
pub fn fake_mp4(len: usize) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 0x20];
    data.extend_from_slice(b"ftypisom");
    data.resize(len.max(data.len()), 0);
    data
}

pub fn info(title: &str, duration_secs: u64) -> MediaInfo {
    MediaInfo {
        title: title.to_string(),
        duration_secs,
    }
}

fn respond<T: Clone + Send + Sync + 'static>(value: T) -> Responder<T> {
    Arc::new(move || Ok(value.clone()))
}

/// Files currently in `dir`.
pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

// ============================================================================
// Primary provider
// ============================================================================

pub struct FakePrimary {
    available: bool,
    metadata: Responder<MediaInfo>,
    download: Responder<()>,
    pub metadata_calls: AtomicU32,
    pub download_calls: AtomicU32,
}

impl FakePrimary {
    pub fn ok(title: &str, duration_secs: u64) -> Self {
        Self {
            available: true,
            metadata: respond(info(title, duration_secs)),
            download: respond(()),
            metadata_calls: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
        }
    }

    /// Binary missing: the availability probe fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::ok("unused", 0)
        }
    }

    pub fn failing_metadata(make_error: impl Fn() -> AppError + Send + Sync + 'static) -> Self {
        Self {
            metadata: Arc::new(move || Err(make_error())),
            ..Self::ok("unused", 0)
        }
    }

    pub fn with_download_error(mut self, make_error: impl Fn() -> AppError + Send + Sync + 'static) -> Self {
        self.download = Arc::new(move || Err(make_error()));
        self
    }
}

#[async_trait]
impl PrimaryProvider for FakePrimary {
    fn name(&self) -> &str {
        "fake-primary"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn fetch_metadata(&self, _reference: &Url) -> AppResult<MediaInfo> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        (self.metadata)()
    }

    async fn download(&self, _reference: &Url, _format_selector: &str, output: &Path) -> AppResult<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        (self.download)()?;
        std::fs::write(output, b"downloaded")?;
        Ok(())
    }
}

// ============================================================================
// Secondary provider
// ============================================================================

pub struct FakeSecondary {
    metadata: Responder<MediaInfo>,
    open: Responder<()>,
    audio_bytes: usize,
    video_bytes: usize,
    break_streams: bool,
    pub metadata_calls: AtomicU32,
    pub open_calls: AtomicU32,
    pub identities: Mutex<Vec<String>>,
}

impl FakeSecondary {
    pub fn ok(title: &str, duration_secs: u64) -> Self {
        Self {
            metadata: respond(info(title, duration_secs)),
            open: respond(()),
            audio_bytes: 3000,
            video_bytes: 9000,
            break_streams: false,
            metadata_calls: AtomicU32::new(0),
            open_calls: AtomicU32::new(0),
            identities: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_metadata(make_error: impl Fn() -> AppError + Send + Sync + 'static) -> Self {
        Self {
            metadata: Arc::new(move || Err(make_error())),
            ..Self::ok("unused", 0)
        }
    }

    /// Streams open fine but fail after the first chunk.
    pub fn with_broken_streams(mut self) -> Self {
        self.break_streams = true;
        self
    }

    pub fn payload_bytes(&self) -> u64 {
        (self.audio_bytes + self.video_bytes) as u64
    }

    pub fn identities(&self) -> Vec<String> {
        self.identities.lock().map(|ids| ids.clone()).unwrap_or_default()
    }

    fn record(&self, identity: &ClientIdentity) {
        if let Ok(mut ids) = self.identities.lock() {
            ids.push(identity.name.clone());
        }
    }
}

#[async_trait]
impl SecondaryProvider for FakeSecondary {
    fn name(&self) -> &str {
        "fake-secondary"
    }

    async fn fetch_metadata(&self, _reference: &Url, identity: &ClientIdentity) -> AppResult<MediaInfo> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.record(identity);
        (self.metadata)()
    }

    async fn open_stream(
        &self,
        _reference: &Url,
        _identity: &ClientIdentity,
        kind: StreamKind,
    ) -> AppResult<ElementaryStream> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        (self.open)()?;

        let len = match kind {
            StreamKind::Audio => self.audio_bytes,
            StreamKind::Video => self.video_bytes,
        };
        let half = Bytes::from(vec![7u8; len / 2]);
        let rest = Bytes::from(vec![7u8; len - len / 2]);

        if self.break_streams {
            let body = stream::iter(vec![
                Ok(half),
                Err(AppError::Stream("connection reset by peer".to_string())),
            ])
            .boxed();
            return Ok(ElementaryStream::new(kind, Some(len as u64), body));
        }
        Ok(ElementaryStream::from_chunks(kind, vec![half, rest]))
    }
}

// ============================================================================
// Merger
// ============================================================================

pub struct FakeMerger {
    output_bytes: usize,
    hang: bool,
    pub file_merges: AtomicU32,
    pub stream_merges: AtomicU32,
    pub drained_bytes: AtomicU64,
    pub was_terminated: AtomicBool,
}

impl FakeMerger {
    pub fn producing(output_bytes: usize) -> Self {
        Self {
            output_bytes,
            hang: false,
            file_merges: AtomicU32::new(0),
            stream_merges: AtomicU32::new(0),
            drained_bytes: AtomicU64::new(0),
            was_terminated: AtomicBool::new(false),
        }
    }

    /// Piped merges never finish on their own; they wait to be terminated.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::producing(1024)
        }
    }
}

#[async_trait]
impl Merger for FakeMerger {
    fn name(&self) -> &str {
        "fake-merger"
    }

    async fn merge_files(&self, _audio: &Path, _video: &Path, output: &Path, _janitor: &Janitor) -> AppResult<()> {
        self.file_merges.fetch_add(1, Ordering::SeqCst);
        std::fs::write(output, fake_mp4(self.output_bytes))?;
        Ok(())
    }

    async fn merge_streams(
        &self,
        audio: ElementaryStream,
        video: ElementaryStream,
        output: &Path,
        tracker: &ProgressTracker,
        janitor: &Janitor,
    ) -> AppResult<()> {
        self.stream_merges.fetch_add(1, Ordering::SeqCst);
        let handle = janitor.track_process("fake ffmpeg", None);
        handle.set_state(ProcessState::Running);

        if self.hang {
            std::fs::write(output, b"partial")?;
            handle.cancelled().await;
            handle.set_state(ProcessState::Killed);
            self.was_terminated.store(true, Ordering::SeqCst);
            return Err(AppError::Merge("terminated".to_string()));
        }

        std::fs::write(output, b"partial")?;
        let drained = tokio::try_join!(
            pump_stream(audio, tokio::io::sink(), tracker),
            pump_stream(video, tokio::io::sink(), tracker)
        );
        let (audio_bytes, video_bytes) = match drained {
            Ok(counts) => counts,
            Err(e) => {
                handle.set_state(ProcessState::Errored);
                return Err(e);
            }
        };
        self.drained_bytes.fetch_add(audio_bytes + video_bytes, Ordering::SeqCst);

        std::fs::write(output, fake_mp4(self.output_bytes))?;
        handle.set_state(ProcessState::Closed);
        Ok(())
    }
}

// ============================================================================
// Delivery and search
// ============================================================================

#[derive(Default)]
pub struct RecordingDelivery {
    pub texts: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<String>>,
    pub videos: Mutex<Vec<DeliveredVideo>>,
    /// Temp files present when the failure message was sent
    pub files_at_failure: Mutex<Option<usize>>,
    temp_dir: Mutex<Option<std::path::PathBuf>>,
}

impl RecordingDelivery {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn videos(&self) -> Vec<DeliveredVideo> {
        self.videos.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn files_at_failure(&self) -> Option<usize> {
        self.files_at_failure.lock().ok().and_then(|f| *f)
    }

    fn watch(&self, dir: &Path) {
        if let Ok(mut slot) = self.temp_dir.lock() {
            *slot = Some(dir.to_path_buf());
        }
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver_video(&self, path: &Path, video: &DeliveredVideo) -> AppResult<()> {
        let size = std::fs::metadata(path)?.len();
        assert_eq!(size, video.size_bytes, "delivered size must match the file");
        self.videos.lock().map_err(|_| AppError::Delivery("poisoned".into()))?.push(video.clone());
        Ok(())
    }

    async fn send_text(&self, text: &str) -> AppResult<()> {
        let dir = self.temp_dir.lock().ok().and_then(|d| d.clone());
        if let (Some(dir), Ok(mut slot)) = (dir, self.files_at_failure.lock()) {
            *slot = Some(count_files(&dir));
        }
        self.texts.lock().map_err(|_| AppError::Delivery("poisoned".into()))?.push(text.to_string());
        Ok(())
    }

    async fn send_status(&self, text: &str) -> AppResult<()> {
        self.statuses.lock().map_err(|_| AppError::Delivery("poisoned".into()))?.push(text.to_string());
        Ok(())
    }
}

pub struct FakeSearch {
    result: Option<String>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn finding(link: &str) -> Self {
        Self {
            result: Some(link.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self {
            result: None,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn find(&self, query: &str) -> AppResult<Option<Url>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        match &self.result {
            Some(link) => Ok(Some(Url::parse(link)?)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub primary: Arc<FakePrimary>,
    pub secondary: Arc<FakeSecondary>,
    pub merger: Arc<FakeMerger>,
    pub delivery: Arc<RecordingDelivery>,
    pub search: Arc<FakeSearch>,
    pub temp: TempDir,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new(primary: FakePrimary, secondary: FakeSecondary, merger: FakeMerger) -> Self {
        let temp = TempDir::new().expect("tempdir");
        let config = PipelineConfig {
            temp_dir: temp.path().to_path_buf(),
            max_duration_secs: 1800,
            max_file_size_bytes: 50 * 1024 * 1024,
            merge_timeout: Duration::from_secs(10),
            kill_grace: Duration::from_millis(50),
            render_progress: false,
            retry: RetryPolicies::immediate(),
            ..PipelineConfig::default()
        };
        let delivery = Arc::new(RecordingDelivery::default());
        delivery.watch(temp.path());

        Self {
            primary: Arc::new(primary),
            secondary: Arc::new(secondary),
            merger: Arc::new(merger),
            delivery,
            search: Arc::new(FakeSearch::empty()),
            temp,
            config,
        }
    }

    pub fn with_search(mut self, search: FakeSearch) -> Self {
        self.search = Arc::new(search);
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut PipelineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn pipeline(&self) -> Pipeline {
        let collaborators = Collaborators {
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
            search: self.search.clone(),
            merger: self.merger.clone(),
            delivery: self.delivery.clone(),
        };
        let rotator = IdentityRotator::new(default_pool()).expect("pool");
        Pipeline::new(self.config.clone(), collaborators, Arc::new(rotator))
    }

    pub fn temp_files(&self) -> usize {
        count_files(self.temp.path())
    }
}
