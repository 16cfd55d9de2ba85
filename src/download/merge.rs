//! Audio/video merging through ffmpeg
//!
//! Two modes:
//! - file merge: two downloaded files in, one mp4 out (primary strategy)
//! - piped merge: two live elementary streams written into ffmpeg through numbered
//!   pipes, with ffmpeg's `-progress` report read back on a third pipe (secondary
//!   strategy)
//!
//! Every spawned ffmpeg is registered with the request's `Janitor`; cancelling its
//! handle terminates the process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::core::process::{describe_exit, stderr_tail, terminate};
use crate::download::janitor::{Janitor, ProcessHandle, ProcessState};
use crate::download::progress::ProgressTracker;
use crate::download::source::ElementaryStream;

/// Channel names of the piped merge.
pub const PROGRESS_CHANNEL: &str = "progress";
pub const AUDIO_CHANNEL: &str = "audio";
pub const VIDEO_CHANNEL: &str = "video";

/// Combines separate audio and video into one container.
#[async_trait]
pub trait Merger: Send + Sync {
    fn name(&self) -> &str;

    /// Merges two files on disk into `output`.
    async fn merge_files(&self, audio: &Path, video: &Path, output: &Path, janitor: &Janitor) -> AppResult<()>;

    /// Feeds two live streams into the transcoder concurrently and writes `output`.
    ///
    /// Byte counts and transcoder progress go to `tracker`. Returns once the
    /// transcoder has exited; only a clean exit is success.
    async fn merge_streams(
        &self,
        audio: ElementaryStream,
        video: ElementaryStream,
        output: &Path,
        tracker: &ProgressTracker,
        janitor: &Janitor,
    ) -> AppResult<()>;
}

/// Copies an elementary stream into `sink`, reporting byte counts to `tracker`.
///
/// The sink is shut down and dropped at the end, which closes the channel for the
/// reading side. Returns the number of bytes written.
pub async fn pump_stream<W>(stream: ElementaryStream, mut sink: W, tracker: &ProgressTracker) -> AppResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let ElementaryStream {
        kind,
        total_bytes,
        mut body,
    } = stream;
    let mut written = 0u64;
    tracker.update_stream(kind, 0, total_bytes);

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        sink.write_all(&chunk)
            .await
            .map_err(|e| AppError::Stream(format!("{} channel closed: {}", kind, e)))?;
        written += chunk.len() as u64;
        tracker.update_stream(kind, written, total_bytes);
    }

    sink.shutdown()
        .await
        .map_err(|e| AppError::Stream(format!("{} channel close failed: {}", kind, e)))?;
    log::debug!("{} stream finished after {} bytes", kind, written);
    Ok(written)
}

/// Arguments for merging two files: stream-copied video, AAC audio.
pub fn file_merge_args(audio: &Path, video: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        audio.to_string_lossy().into_owned(),
        "-i".to_string(),
        video.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-strict".to_string(),
        "experimental".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Arguments for the piped merge; channel numbers come from the table.
pub fn piped_merge_args(table: &crate::core::process::ChannelTable, output: &Path) -> AppResult<Vec<String>> {
    Ok(vec![
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "8".to_string(),
        "-hide_banner".to_string(),
        "-progress".to_string(),
        table.pipe_arg(PROGRESS_CHANNEL)?,
        "-i".to_string(),
        table.pipe_arg(AUDIO_CHANNEL)?,
        "-i".to_string(),
        table.pipe_arg(VIDEO_CHANNEL)?,
        "-map".to_string(),
        "0:a".to_string(),
        "-map".to_string(),
        "1:v".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ])
}

/// The standard channel layout: progress on 3, audio on 4, video on 5.
pub fn merge_channel_table() -> crate::core::process::ChannelTable {
    crate::core::process::ChannelTable::new()
        .output(PROGRESS_CHANNEL)
        .input(AUDIO_CHANNEL)
        .input(VIDEO_CHANNEL)
}

/// `Merger` driving the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegMerger {
    bin: String,
    file_timeout: Duration,
    kill_grace: Duration,
}

impl Default for FfmpegMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegMerger {
    pub fn new() -> Self {
        Self {
            bin: config::FFMPEG_BIN.clone(),
            file_timeout: config::merge::file_merge_timeout(),
            kill_grace: config::merge::kill_grace(),
        }
    }

    pub fn with_bin(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            ..Self::new()
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> AppError {
        AppError::Merge(format!("failed to spawn {}: {}", self.bin, e))
    }

    /// Waits for the child, terminating it on cancellation or after `limit`.
    async fn supervise(&self, child: &mut Child, handle: &ProcessHandle, limit: Option<Duration>) -> AppResult<ExitStatus> {
        let deadline = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| AppError::Merge(format!("failed to wait for ffmpeg: {}", e)))?;
                handle.set_state(if status.success() { ProcessState::Closed } else { ProcessState::Errored });
                Ok(status)
            }
            _ = handle.cancelled() => {
                terminate(child, self.kill_grace).await;
                handle.set_state(ProcessState::Killed);
                Err(AppError::Merge("ffmpeg was terminated".to_string()))
            }
            _ = deadline => {
                terminate(child, self.kill_grace).await;
                handle.set_state(ProcessState::Killed);
                Err(AppError::Merge(format!(
                    "ffmpeg timed out after {}s",
                    limit.map(|l| l.as_secs()).unwrap_or_default()
                )))
            }
        }
    }

    #[cfg(unix)]
    async fn merge_piped(
        &self,
        audio: ElementaryStream,
        video: ElementaryStream,
        output: &Path,
        tracker: &ProgressTracker,
        janitor: &Janitor,
    ) -> AppResult<()> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let table = merge_channel_table();
        let args = piped_merge_args(&table, output)?;
        log::debug!("ffmpeg piped merge: {} {}", self.bin, args.join(" "));

        let mut cmd = Command::new(&self.bin);
        cmd.args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut spawned = table.spawn(&mut cmd).map_err(|e| match e {
            AppError::Io(io) => self.spawn_error(io),
            other => other,
        })?;
        let handle = janitor.track_process("ffmpeg piped merge", spawned.child.id());
        handle.set_state(ProcessState::Running);

        let audio_tx = spawned.take_writer(AUDIO_CHANNEL)?;
        let video_tx = spawned.take_writer(VIDEO_CHANNEL)?;
        let progress_rx = spawned.take_reader(PROGRESS_CHANNEL)?;
        let mut child = spawned.child;

        let progress_tracker = tracker.clone();
        let progress_task = tokio::spawn(async move {
            let mut lines = BufReader::new(progress_rx).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => progress_tracker.ingest_progress(&line),
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("progress channel read failed: {}", e);
                        break;
                    }
                }
            }
        });

        let feed = async {
            tokio::try_join!(
                pump_stream(audio, audio_tx, tracker),
                pump_stream(video, video_tx, tracker)
            )
        };
        tokio::pin!(feed);

        let result = tokio::select! {
            fed = &mut feed => match fed {
                Ok((audio_bytes, video_bytes)) => {
                    log::info!("Streams fed: audio {} bytes, video {} bytes", audio_bytes, video_bytes);
                    self.supervise(&mut child, &handle, None).await.and_then(exit_to_result)
                }
                Err(e) => {
                    // A closed channel usually means ffmpeg died; its exit status says more.
                    let exited = if matches!(e, AppError::Stream(_)) {
                        tokio::time::timeout(self.kill_grace, child.wait()).await.ok().and_then(Result::ok)
                    } else {
                        child.try_wait().ok().flatten()
                    };
                    match exited {
                        Some(status) if !status.success() => {
                            handle.set_state(ProcessState::Errored);
                            Err(AppError::Merge(format!("ffmpeg exited with {}", describe_exit(&status))))
                        }
                        _ => {
                            terminate(&mut child, self.kill_grace).await;
                            handle.set_state(ProcessState::Killed);
                            Err(e)
                        }
                    }
                }
            },
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => {
                        handle.set_state(ProcessState::Closed);
                        Ok(())
                    }
                    Ok(status) => {
                        handle.set_state(ProcessState::Errored);
                        Err(AppError::Merge(format!("ffmpeg exited with {}", describe_exit(&status))))
                    }
                    Err(e) => {
                        handle.set_state(ProcessState::Errored);
                        Err(AppError::Merge(format!("failed to wait for ffmpeg: {}", e)))
                    }
                }
            }
            _ = handle.cancelled() => {
                terminate(&mut child, self.kill_grace).await;
                handle.set_state(ProcessState::Killed);
                Err(AppError::Merge("ffmpeg was terminated".to_string()))
            }
        };

        // ffmpeg closes the progress channel on exit; don't wait on a stuck reader.
        let mut progress_task = progress_task;
        if tokio::time::timeout(Duration::from_secs(1), &mut progress_task).await.is_err() {
            progress_task.abort();
        }

        result
    }
}

fn exit_to_result(status: ExitStatus) -> AppResult<()> {
    if status.success() {
        Ok(())
    } else {
        Err(AppError::Merge(format!("ffmpeg exited with {}", describe_exit(&status))))
    }
}

#[async_trait]
impl Merger for FfmpegMerger {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn merge_files(&self, audio: &Path, video: &Path, output: &Path, janitor: &Janitor) -> AppResult<()> {
        let args = file_merge_args(audio, video, output);
        log::debug!("ffmpeg file merge: {} {}", self.bin, args.join(" "));
        let start = Instant::now();

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        let handle = janitor.track_process("ffmpeg file merge", child.id());
        handle.set_state(ProcessState::Running);

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let status = self.supervise(&mut child, &handle, Some(self.file_timeout)).await;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        metrics::MERGE_DURATION_SECONDS
            .with_label_values(&["files"])
            .observe(start.elapsed().as_secs_f64());

        let status = status?;
        if !status.success() {
            let detail = stderr_tail(&stderr, 300);
            log::error!("ffmpeg file merge failed ({}): {}", describe_exit(&status), detail);
            return Err(AppError::Merge(format!("ffmpeg exited with {}", describe_exit(&status))));
        }

        log::info!("✅ Merged files in {:.1}s", start.elapsed().as_secs_f64());
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
        let start = Instant::now();

        #[cfg(unix)]
        let result = self.merge_piped(audio, video, output, tracker, janitor).await;
        #[cfg(not(unix))]
        let result = {
            let _ = (audio, video, output, tracker, janitor);
            Err(AppError::Merge("piped merge requires a unix platform".to_string()))
        };

        metrics::MERGE_DURATION_SECONDS
            .with_label_values(&["piped"])
            .observe(start.elapsed().as_secs_f64());
        if result.is_ok() {
            log::info!("✅ Piped merge finished in {:.1}s", start.elapsed().as_secs_f64());
        }
        result
    }
}

/// Sink used when a merger only needs to drain a stream.
pub fn discard() -> tokio::io::Sink {
    tokio::io::sink()
}
