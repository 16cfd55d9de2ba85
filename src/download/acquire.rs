//! Payload acquisition for both strategies.
//!
//! Primary: two yt-dlp downloads into janitor-tracked temp files.
//! Secondary: two live elementary streams opened against the innertube client,
//! consumed later by the piped merge.

use std::path::PathBuf;

use url::Url;

use crate::core::config::{self, RetryPolicies};
use crate::core::error::{AppError, AppResult};
use crate::core::retry::retry;
use crate::download::identity::IdentityRotator;
use crate::download::janitor::Janitor;
use crate::download::progress::StreamKind;
use crate::download::source::{ElementaryStream, PrimaryProvider, SecondaryProvider};
use crate::download::strategy::{Strategy, StrategyState};

/// Temp files written by the primary provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryDownloads {
    pub audio: PathBuf,
    pub video: PathBuf,
}

/// Both elementary streams of the secondary strategy.
#[derive(Debug)]
pub struct SecondaryStreams {
    pub audio: ElementaryStream,
    pub video: ElementaryStream,
}

pub struct StreamAcquirer<'a> {
    pub janitor: &'a Janitor,
    pub rotator: &'a IdentityRotator,
    pub policies: &'a RetryPolicies,
}

impl<'a> StreamAcquirer<'a> {
    /// Downloads audio and video concurrently, each under its own retry loop.
    ///
    /// Either download failing aborts the strategy with that download's error.
    pub async fn acquire_primary(
        &self,
        provider: &dyn PrimaryProvider,
        reference: &Url,
        state: &mut StrategyState,
    ) -> AppResult<PrimaryDownloads> {
        let audio = self.janitor.allocate("_audio.m4a");
        let video = self.janitor.allocate("_video.mp4");
        log::info!("⬇️ Downloading audio and video with {}", provider.name());

        let (audio_outcome, video_outcome) = tokio::join!(
            retry(&self.policies.primary_download, "primary_audio_download", || {
                provider.download(reference, config::download::AUDIO_FORMAT, &audio)
            }),
            retry(&self.policies.primary_download, "primary_video_download", || {
                provider.download(reference, config::download::VIDEO_FORMAT, &video)
            })
        );
        state.record_attempts(Strategy::Primary, audio_outcome.attempts + video_outcome.attempts);

        audio_outcome.into_result()?;
        video_outcome.into_result()?;
        Ok(PrimaryDownloads { audio, video })
    }

    /// Opens audio and video streams, rotating the client identity on every attempt.
    ///
    /// Both streams of one attempt share an identity. No payload bytes are read here.
    pub async fn acquire_secondary(
        &self,
        provider: &dyn SecondaryProvider,
        reference: &Url,
        state: &mut StrategyState,
    ) -> AppResult<SecondaryStreams> {
        let rotator = self.rotator;
        let outcome = retry(&self.policies.secondary_stream, "secondary_open_streams", || {
            let identity = rotator.next();
            log::debug!("Opening streams as client {}", identity.name);
            async move {
                let (audio, video) = tokio::try_join!(
                    provider.open_stream(reference, &identity, StreamKind::Audio),
                    provider.open_stream(reference, &identity, StreamKind::Video)
                )?;
                Ok::<_, AppError>(SecondaryStreams { audio, video })
            }
        })
        .await;
        state.record_attempts(Strategy::Secondary, outcome.attempts);

        let streams = outcome.into_result()?;
        log::info!(
            "📡 Streams open via {}: audio {:?} bytes, video {:?} bytes",
            provider.name(),
            streams.audio.total_bytes,
            streams.video.total_bytes
        );
        Ok(streams)
    }
}
