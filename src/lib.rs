//! ytmux - resilient video acquisition pipeline
//!
//! Given a link or a search query, produces one mp4 within duration and size limits.
//! yt-dlp is the primary strategy; when it cannot run or fails, audio and video are
//! streamed from the innertube API and merged by ffmpeg through piped descriptors.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, retry and process helpers
//! - `download`: providers, classification, merging and the request orchestrator
//! - `cli`: command-line arguments of the `ytmux` binary

pub mod cli;
pub mod core;
pub mod download;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use download::{AcquisitionRequest, Collaborators, Pipeline, PipelineOutcome, PipelineState, Target};
