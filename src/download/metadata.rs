//! Metadata resolution with primary-to-secondary failover.

use url::Url;

use crate::core::config::RetryPolicies;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::core::retry::retry;
use crate::download::classify::{classify, ErrorClass};
use crate::download::identity::IdentityRotator;
use crate::download::source::{PrimaryProvider, SecondaryProvider, VideoMetadata};
use crate::download::strategy::{Strategy, StrategyState};

/// Resolves title and duration for a reference.
///
/// The primary provider is probed first and tried under its retry policy. When it
/// cannot run, or fails with an error that allows fallback, the primary strategy is
/// disabled for the request and the secondary provider is tried with a fresh client
/// identity per attempt. Bot detection from the primary ends the request.
pub struct MetadataResolver<'a> {
    pub primary: &'a dyn PrimaryProvider,
    pub secondary: &'a dyn SecondaryProvider,
    pub rotator: &'a IdentityRotator,
    pub policies: &'a RetryPolicies,
}

impl<'a> MetadataResolver<'a> {
    pub async fn resolve(&self, reference: &Url, state: &mut StrategyState) -> AppResult<VideoMetadata> {
        if state.is_primary_enabled() {
            if self.primary.is_available().await {
                let primary = self.primary;
                let outcome = retry(&self.policies.primary_metadata, "primary_metadata", || {
                    primary.fetch_metadata(reference)
                })
                .await;
                state.record_attempts(Strategy::Primary, outcome.attempts);

                match outcome.into_result() {
                    Ok(info) => return Ok(VideoMetadata::from_info(info, Strategy::Primary)),
                    Err(e) => {
                        let class = classify(&e);
                        if !class.allows_fallback() {
                            log::error!("Primary metadata failed terminally ({}): {}", class.label(), e);
                            return Err(e);
                        }
                        log::warn!("Primary metadata failed ({}), falling back: {}", class.label(), e);
                        disable_primary(state, class);
                    }
                }
            } else {
                log::warn!("{} is not available, using {}", self.primary.name(), self.secondary.name());
                disable_primary(state, ErrorClass::ProviderUnavailable);
            }
        }

        let secondary = self.secondary;
        let rotator = self.rotator;
        let outcome = retry(&self.policies.secondary_metadata, "secondary_metadata", || {
            let identity = rotator.next();
            log::debug!("Secondary metadata attempt as client {}", identity.name);
            async move { secondary.fetch_metadata(reference, &identity).await }
        })
        .await;
        state.record_attempts(Strategy::Secondary, outcome.attempts);

        let info = outcome.into_result()?;
        log::info!("📋 Metadata via {}: '{}' ({}s)", secondary.name(), info.title, info.duration_secs);
        Ok(VideoMetadata::from_info(info, Strategy::Secondary))
    }
}

/// Disables the primary strategy and counts the fallback once per request.
pub(crate) fn disable_primary(state: &mut StrategyState, class: ErrorClass) {
    if state.is_primary_enabled() {
        metrics::STRATEGY_FALLBACKS_TOTAL.with_label_values(&[class.label()]).inc();
    }
    state.disable_primary(class);
}
