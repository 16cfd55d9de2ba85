//! Progress tracking for the fallback acquisition
//!
//! `ProgressTracker` holds the latest snapshot (bytes per elementary stream plus
//! the transcoder's key/value progress report) behind a `tokio::sync::watch`
//! channel. `ProgressRenderer` samples it on a fixed interval and logs a line,
//! until it is stopped or dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::utils::bytes_to_mb;

/// Which elementary stream a byte count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes received so far for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteProgress {
    pub downloaded: u64,
    /// Announced size, when the provider reports one
    pub total: Option<u64>,
}

impl ByteProgress {
    /// Completion percentage, clamped to 100; None without a known non-zero total.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.downloaded as f64 / total as f64 * 100.0).min(100.0)),
            _ => None,
        }
    }
}

/// Latest values of the transcoder's `key=value` progress report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeProgress {
    fields: BTreeMap<String, String>,
}

impl MergeProgress {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn frame(&self) -> Option<u64> {
        self.get("frame").and_then(|v| v.parse().ok())
    }

    pub fn fps(&self) -> Option<f64> {
        self.get("fps").and_then(|v| v.parse().ok())
    }

    /// Speed as reported, e.g. "1.5x"
    pub fn speed(&self) -> Option<&str> {
        self.get("speed").filter(|v| !v.is_empty() && *v != "N/A")
    }

    /// "continue" while running, "end" once the transcoder is done
    pub fn state(&self) -> Option<&str> {
        self.get("progress")
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Later values overwrite earlier ones key by key.
    pub fn apply(&mut self, key: &str, value: &str) {
        self.fields.insert(key.to_string(), value.to_string());
    }
}

/// Splits a progress report chunk into `(key, value)` pairs.
///
/// Every line containing `=` splits at its first `=`; key and value are trimmed.
/// Lines without `=` and lines with an empty key are skipped.
pub fn parse_progress_lines(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Point-in-time view of a fallback acquisition.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub audio: ByteProgress,
    pub video: ByteProgress,
    pub merge: MergeProgress,
    pub started_at: Instant,
}

impl ProgressSnapshot {
    fn new() -> Self {
        Self {
            audio: ByteProgress::default(),
            video: ByteProgress::default(),
            merge: MergeProgress::default(),
            started_at: Instant::now(),
        }
    }

    pub fn stream(&self, kind: StreamKind) -> &ByteProgress {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Shared, cheaply cloneable handle to the current progress snapshot.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::new());
        Self { tx: Arc::new(tx) }
    }

    /// Records the byte count of one stream. Counts never move backwards.
    pub fn update_stream(&self, kind: StreamKind, downloaded: u64, total: Option<u64>) {
        self.tx.send_modify(|snapshot| {
            let entry = match kind {
                StreamKind::Audio => &mut snapshot.audio,
                StreamKind::Video => &mut snapshot.video,
            };
            entry.downloaded = entry.downloaded.max(downloaded);
            if total.is_some() {
                entry.total = total;
            }
        });
    }

    /// Merges every `key=value` pair found in a progress report chunk.
    pub fn ingest_progress(&self, text: &str) {
        let pairs = parse_progress_lines(text);
        if pairs.is_empty() {
            return;
        }
        self.tx.send_modify(|snapshot| {
            for (key, value) in &pairs {
                snapshot.merge.apply(key, value);
            }
        });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }
}

/// Creates a visual progress bar
fn create_progress_bar(percent: f64) -> String {
    let progress = percent.clamp(0.0, 100.0) as u8;
    let filled = (progress / 10) as usize;
    let empty = 10 - filled;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

fn render_stream(kind: StreamKind, progress: &ByteProgress) -> String {
    match (progress.percent(), progress.total) {
        (Some(percent), Some(total)) => format!(
            "{} {} {:.0}% ({:.2}/{:.2}MB)",
            kind,
            create_progress_bar(percent),
            percent,
            bytes_to_mb(progress.downloaded),
            bytes_to_mb(total)
        ),
        _ => format!("{} {:.2}MB", kind, bytes_to_mb(progress.downloaded)),
    }
}

/// One-line human readable rendering of a snapshot.
pub fn render(snapshot: &ProgressSnapshot) -> String {
    let mut line = format!(
        "{} | {}",
        render_stream(StreamKind::Audio, &snapshot.audio),
        render_stream(StreamKind::Video, &snapshot.video)
    );
    if !snapshot.merge.is_empty() {
        line.push_str(&format!(
            " | frame {} fps {} speed {}",
            snapshot.merge.frame().map_or("-".to_string(), |f| f.to_string()),
            snapshot.merge.fps().map_or("-".to_string(), |f| format!("{:.0}", f)),
            snapshot.merge.speed().unwrap_or("-")
        ));
    }
    line.push_str(&format!(" | {:.1} min", snapshot.elapsed().as_secs_f64() / 60.0));
    line
}

/// Periodic progress logger. Stops on `stop()` or when dropped.
pub struct ProgressRenderer {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressRenderer {
    /// Starts logging the tracker's snapshot every `interval`.
    pub fn start(tracker: &ProgressTracker, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let rx = tracker.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so nothing is logged before any progress.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let line = render(&rx.borrow());
                        log::info!("⏬ {}", line);
                    }
                }
            }
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stops rendering; no further lines are logged after this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressRenderer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_progress_lines() {
        let chunk = "frame=120\nfps= 29.97 \nstream_0_0_q=-1.0\nprogress=continue\n";
        assert_eq!(
            parse_progress_lines(chunk),
            vec![
                ("frame".to_string(), "120".to_string()),
                ("fps".to_string(), "29.97".to_string()),
                ("stream_0_0_q".to_string(), "-1.0".to_string()),
                ("progress".to_string(), "continue".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_splits_on_first_equals_and_skips_junk() {
        let chunk = "no separator here\n=orphan\nout_time=00:00:01.000=x\n";
        assert_eq!(
            parse_progress_lines(chunk),
            vec![("out_time".to_string(), "00:00:01.000=x".to_string())]
        );
    }

    #[test]
    fn test_later_values_overwrite() {
        let tracker = ProgressTracker::new();
        tracker.ingest_progress("frame=10\nspeed=0.5x\n");
        tracker.ingest_progress("frame=42\n");
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.merge.frame(), Some(42));
        assert_eq!(snapshot.merge.speed(), Some("0.5x"));
    }

    #[test]
    fn test_stream_counts_never_regress() {
        let tracker = ProgressTracker::new();
        tracker.update_stream(StreamKind::Audio, 100, Some(400));
        tracker.update_stream(StreamKind::Audio, 50, None);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.audio.downloaded, 100);
        assert_eq!(snapshot.audio.total, Some(400));
        assert_eq!(snapshot.audio.percent(), Some(25.0));
        assert_eq!(snapshot.video, ByteProgress::default());
    }

    #[test]
    fn test_percent_without_total() {
        let progress = ByteProgress {
            downloaded: 10,
            total: None,
        };
        assert_eq!(progress.percent(), None);
        let zero = ByteProgress {
            downloaded: 0,
            total: Some(0),
        };
        assert_eq!(zero.percent(), None);
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(create_progress_bar(50.0), "[█████░░░░░]");
        assert_eq!(create_progress_bar(25.0), "[██░░░░░░░░]");
        assert_eq!(create_progress_bar(150.0), "[██████████]");
    }

    #[test]
    fn test_render_mentions_both_streams_and_merge() {
        let tracker = ProgressTracker::new();
        tracker.update_stream(StreamKind::Audio, 1024 * 1024, Some(2 * 1024 * 1024));
        tracker.update_stream(StreamKind::Video, 3 * 1024 * 1024, None);
        tracker.ingest_progress("frame=7\nfps=25\nspeed=2x\n");
        let line = render(&tracker.snapshot());
        assert!(line.contains("audio [█████░░░░░] 50% (1.00/2.00MB)"), "{}", line);
        assert!(line.contains("video 3.00MB"), "{}", line);
        assert!(line.contains("frame 7 fps 25 speed 2x"), "{}", line);
    }

    #[tokio::test]
    async fn test_renderer_stops() {
        let tracker = ProgressTracker::new();
        let renderer = ProgressRenderer::start(&tracker, Duration::from_millis(5));
        assert!(renderer.is_running());
        tokio::time::sleep(Duration::from_millis(20)).await;
        renderer.stop().await;
    }
}
