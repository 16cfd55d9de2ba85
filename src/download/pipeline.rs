//! Request orchestrator.
//!
//! One `Pipeline::run` call drives one request through
//!   validate target → resolve metadata → check duration → primary download + file merge
//!   → (fallback) open streams → piped merge → validate artifact → deliver → cleanup
//!
//! Every exit path ends in exactly one terminal state. The request's `Janitor` is
//! cleaned before the failure message goes out, and again on drop if the future
//! itself is cancelled.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use url::Url;

use crate::core::config::PipelineConfig;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::core::utils::format_video_caption;
use crate::download::acquire::StreamAcquirer;
use crate::download::classify::{classify, failure_message, ErrorClass};
use crate::download::identity::IdentityRotator;
use crate::download::janitor::Janitor;
use crate::download::merge::{FfmpegMerger, Merger};
use crate::download::metadata::{disable_primary, MetadataResolver};
use crate::download::progress::{ProgressRenderer, ProgressTracker};
use crate::download::search::{SearchProvider, YtDlpSearch};
use crate::download::send::{DeliveredVideo, Delivery};
use crate::download::source::innertube::InnertubeProvider;
use crate::download::source::ytdlp::YtDlpProvider;
use crate::download::source::{PrimaryProvider, SecondaryProvider, VideoMetadata};
use crate::download::strategy::StrategyState;
use crate::download::validate::validate_artifact;

pub const STATUS_NOTICE: &str = "⏳ Processing video... Please wait.";
pub const MISSING_REFERENCE: &str = "Enter youtube link after yt";
pub const MISSING_QUERY: &str = "Enter something to search";

/// States a request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    ResolvingMetadata,
    ValidatingConstraints,
    AcquiringPrimary,
    AcquiringFallback,
    Merging,
    Finalizing,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::ResolvingMetadata => "resolving_metadata",
            PipelineState::ValidatingConstraints => "validating_constraints",
            PipelineState::AcquiringPrimary => "acquiring_primary",
            PipelineState::AcquiringFallback => "acquiring_fallback",
            PipelineState::Merging => "merging",
            PipelineState::Finalizing => "finalizing",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A direct link
    Reference(String),
    /// Free text, resolved through the search collaborator
    Search(String),
}

/// One request with its limits. Immutable once the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    pub target: Target,
    pub max_duration_secs: u64,
    pub max_file_size_bytes: u64,
}

/// Terminal result of a request.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    /// Class of the failure; `None` on completion
    pub class: Option<ErrorClass>,
    /// Every state visited, in order, ending with the terminal one
    pub transitions: Vec<PipelineState>,
    pub metadata: Option<VideoMetadata>,
    pub strategy: StrategyState,
    pub delivered_bytes: Option<u64>,
    /// Failure message sent to the user
    pub message: Option<String>,
    /// Temp artifacts left behind after cleanup
    pub outstanding_artifacts: usize,
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    pub fn visited(&self, state: PipelineState) -> bool {
        self.transitions.contains(&state)
    }
}

/// The providers and sinks a pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub primary: Arc<dyn PrimaryProvider>,
    pub secondary: Arc<dyn SecondaryProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub merger: Arc<dyn Merger>,
    pub delivery: Arc<dyn Delivery>,
}

impl Collaborators {
    /// yt-dlp, innertube, yt-dlp search and ffmpeg, delivering through `delivery`.
    pub fn with_defaults(delivery: Arc<dyn Delivery>) -> AppResult<Self> {
        Ok(Self {
            primary: Arc::new(YtDlpProvider::new()),
            secondary: Arc::new(InnertubeProvider::new()?),
            search: Arc::new(YtDlpSearch::new()),
            merger: Arc::new(FfmpegMerger::new()),
            delivery,
        })
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    rotator: Arc<IdentityRotator>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators, rotator: Arc<IdentityRotator>) -> Self {
        Self {
            config,
            collaborators,
            rotator,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Request for `target` carrying this pipeline's configured limits.
    pub fn request(&self, target: Target) -> AcquisitionRequest {
        AcquisitionRequest {
            target,
            max_duration_secs: self.config.max_duration_secs,
            max_file_size_bytes: self.config.max_file_size_bytes,
        }
    }

    /// Runs one request to its terminal state.
    pub async fn run(&self, request: AcquisitionRequest) -> PipelineOutcome {
        let start = Instant::now();
        let mut run = RequestRun::new(self);

        let result = match self.resolve_target(&request.target).await {
            Ok(reference) => {
                if self.config.send_status_notice {
                    if let Err(e) = self.collaborators.delivery.send_status(STATUS_NOTICE).await {
                        log::warn!("Failed to send status notice: {}", e);
                    }
                }
                run.execute(&request, &reference).await
            }
            Err(e) => Err(e),
        };
        run.stop_renderer().await;

        let strategy_label = if run.transitions.is_empty() {
            "none"
        } else {
            run.strategy.active().as_str()
        };

        match result {
            Ok(size_bytes) => {
                run.enter(PipelineState::Completed);
                run.janitor.cleanup();
                metrics::record_outcome("completed", strategy_label, start.elapsed().as_secs_f64());
                log::info!("✅ Request completed in {:.1}s", start.elapsed().as_secs_f64());
                run.into_outcome(None, Some(size_bytes), None)
            }
            Err(e) => {
                run.enter(PipelineState::Failed);
                let class = classify(&e);
                // Temp files and processes go before the user hears anything.
                run.janitor.cleanup();

                let message = failure_message(&e, class);
                if let Err(send_err) = self.collaborators.delivery.send_text(&message).await {
                    log::error!("Failed to send failure message: {}", send_err);
                }

                log::error!("❌ Request failed [{}]: {}", class.label(), e);
                if let Some(fix) = class.fix_recommendation() {
                    log::warn!("💡 {}", fix);
                }
                metrics::record_outcome(class.label(), strategy_label, start.elapsed().as_secs_f64());
                run.into_outcome(Some(class), None, Some(message))
            }
        }
    }

    /// Validates the target and turns it into a reference. Allocates nothing.
    async fn resolve_target(&self, target: &Target) -> AppResult<Url> {
        match target {
            Target::Reference(link) => {
                let link = link.trim();
                if link.is_empty() {
                    return Err(AppError::Input(MISSING_REFERENCE.to_string()));
                }
                match Url::parse(link) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
                    _ => Err(AppError::Input(format!("❌ Invalid link: {}", link))),
                }
            }
            Target::Search(query) => {
                let query = query.trim();
                if query.is_empty() {
                    return Err(AppError::Input(MISSING_QUERY.to_string()));
                }
                self.collaborators
                    .search
                    .find(query)
                    .await?
                    .ok_or_else(|| AppError::Input(format!("❌ No video found for: {}", query)))
            }
        }
    }
}

/// State owned by a single `run` call.
struct RequestRun<'p> {
    pipeline: &'p Pipeline,
    janitor: Janitor,
    tracker: ProgressTracker,
    strategy: StrategyState,
    transitions: Vec<PipelineState>,
    renderer: Option<ProgressRenderer>,
    metadata: Option<VideoMetadata>,
}

impl<'p> RequestRun<'p> {
    fn new(pipeline: &'p Pipeline) -> Self {
        Self {
            pipeline,
            janitor: Janitor::new(pipeline.config.temp_dir.clone()),
            tracker: ProgressTracker::new(),
            strategy: StrategyState::new(),
            transitions: Vec::new(),
            renderer: None,
            metadata: None,
        }
    }

    fn enter(&mut self, state: PipelineState) {
        log::debug!("Pipeline state -> {}", state);
        self.transitions.push(state);
    }

    async fn stop_renderer(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            renderer.stop().await;
        }
    }

    /// Everything between target validation and the terminal state.
    /// Returns the delivered size in bytes.
    async fn execute(&mut self, request: &AcquisitionRequest, reference: &Url) -> AppResult<u64> {
        let pipeline = self.pipeline;
        let collaborators = &pipeline.collaborators;

        self.enter(PipelineState::ResolvingMetadata);
        let resolver = MetadataResolver {
            primary: collaborators.primary.as_ref(),
            secondary: collaborators.secondary.as_ref(),
            rotator: pipeline.rotator.as_ref(),
            policies: &pipeline.config.retry,
        };
        let metadata = resolver.resolve(reference, &mut self.strategy).await?;
        self.metadata = Some(metadata.clone());

        self.enter(PipelineState::ValidatingConstraints);
        if metadata.duration_secs > request.max_duration_secs {
            return Err(AppError::DurationExceeded {
                duration_secs: metadata.duration_secs,
                limit_secs: request.max_duration_secs,
            });
        }

        let mut output = None;
        if self.strategy.is_primary_enabled() {
            self.enter(PipelineState::AcquiringPrimary);
            match self.acquire_primary(reference).await {
                Ok(path) => output = Some(path),
                Err(e) => {
                    let class = classify(&e);
                    if !class.allows_fallback() {
                        return Err(e);
                    }
                    log::warn!("Primary acquisition failed ({}), falling back: {}", class.label(), e);
                    disable_primary(&mut self.strategy, class);
                }
            }
        }

        let output = match output {
            Some(path) => path,
            None => self.acquire_fallback(reference).await?,
        };

        self.enter(PipelineState::Finalizing);
        let report = match validate_artifact(&output, request.max_file_size_bytes) {
            Ok(report) => report,
            Err(e) => {
                self.janitor.remove_now(&output);
                return Err(e);
            }
        };

        let video = DeliveredVideo {
            title: metadata.title.clone(),
            caption: format_video_caption(&metadata.title, report.size_bytes),
            size_bytes: report.size_bytes,
        };
        collaborators.delivery.deliver_video(&output, &video).await?;
        Ok(report.size_bytes)
    }

    /// Downloads both files and merges them. Temp inputs are removed right after the merge.
    async fn acquire_primary(&mut self, reference: &Url) -> AppResult<PathBuf> {
        let pipeline = self.pipeline;
        let collaborators = &pipeline.collaborators;
        let acquirer = StreamAcquirer {
            janitor: &self.janitor,
            rotator: pipeline.rotator.as_ref(),
            policies: &pipeline.config.retry,
        };
        let downloads = acquirer
            .acquire_primary(collaborators.primary.as_ref(), reference, &mut self.strategy)
            .await?;

        let output = self.janitor.allocate(".mp4");
        let merged = collaborators
            .merger
            .merge_files(&downloads.audio, &downloads.video, &output, &self.janitor)
            .await;
        self.janitor.remove_now(&downloads.audio);
        self.janitor.remove_now(&downloads.video);

        if let Err(e) = merged {
            self.janitor.remove_now(&output);
            return Err(e);
        }
        Ok(output)
    }

    /// Opens both streams and pipes them through the merger under the merge timeout.
    async fn acquire_fallback(&mut self, reference: &Url) -> AppResult<PathBuf> {
        let pipeline = self.pipeline;
        let collaborators = &pipeline.collaborators;
        let config = &pipeline.config;

        self.enter(PipelineState::AcquiringFallback);
        if config.render_progress {
            self.renderer = Some(ProgressRenderer::start(&self.tracker, config.progress_interval));
        }

        let acquirer = StreamAcquirer {
            janitor: &self.janitor,
            rotator: pipeline.rotator.as_ref(),
            policies: &config.retry,
        };
        let streams = acquirer
            .acquire_secondary(collaborators.secondary.as_ref(), reference, &mut self.strategy)
            .await?;

        self.enter(PipelineState::Merging);
        let output = self.janitor.allocate(".mp4");
        let merged = {
            let merge = collaborators.merger.merge_streams(
                streams.audio,
                streams.video,
                &output,
                &self.tracker,
                &self.janitor,
            );
            tokio::pin!(merge);

            tokio::select! {
                result = &mut merge => result,
                _ = tokio::time::sleep(config.merge_timeout) => {
                    log::error!("⏰ Merge exceeded {}s, terminating", config.merge_timeout.as_secs());
                    self.janitor.terminate_processes();
                    // Give the merger its kill grace to reap the process.
                    let reap = config.kill_grace + std::time::Duration::from_secs(1);
                    if tokio::time::timeout(reap, &mut merge).await.is_err() {
                        log::warn!("Merger did not stop within {}s, dropping it", reap.as_secs());
                    }
                    Err(AppError::MergeTimeout(config.merge_timeout))
                }
            }
        };
        self.stop_renderer().await;

        if let Err(e) = merged {
            self.janitor.remove_now(&output);
            return Err(e);
        }
        Ok(output)
    }

    fn into_outcome(self, class: Option<ErrorClass>, delivered_bytes: Option<u64>, message: Option<String>) -> PipelineOutcome {
        let state = self.transitions.last().copied().unwrap_or(PipelineState::Failed);
        PipelineOutcome {
            state,
            class,
            outstanding_artifacts: self.janitor.outstanding(),
            transitions: self.transitions,
            metadata: self.metadata,
            strategy: self.strategy,
            delivered_bytes,
            message,
        }
    }
}
