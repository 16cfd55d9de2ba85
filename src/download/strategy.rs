//! Acquisition strategy selection state for a single request.

use std::fmt;

use crate::download::classify::ErrorClass;

/// Which provider family serves the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// External downloader binary (yt-dlp), files on disk then merged
    Primary,
    /// In-process innertube client, elementary streams piped into ffmpeg
    Secondary,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Primary => "primary",
            Strategy::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request strategy bookkeeping.
///
/// Disabling the primary strategy is scoped to the request that observed the failure;
/// a fresh `StrategyState` always starts on the primary strategy.
#[derive(Debug, Clone)]
pub struct StrategyState {
    active: Strategy,
    primary_attempts: u32,
    secondary_attempts: u32,
    disabled_by: Option<ErrorClass>,
}

impl Default for StrategyState {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyState {
    pub fn new() -> Self {
        Self {
            active: Strategy::Primary,
            primary_attempts: 0,
            secondary_attempts: 0,
            disabled_by: None,
        }
    }

    pub fn active(&self) -> Strategy {
        self.active
    }

    pub fn is_primary_enabled(&self) -> bool {
        self.disabled_by.is_none()
    }

    /// Class that caused the switch to the secondary strategy, if any.
    pub fn disabled_by(&self) -> Option<ErrorClass> {
        self.disabled_by
    }

    /// Switches to the secondary strategy for the rest of the request.
    pub fn disable_primary(&mut self, class: ErrorClass) {
        if self.disabled_by.is_none() {
            log::warn!("Primary strategy disabled for this request ({})", class.label());
            self.disabled_by = Some(class);
        }
        self.active = Strategy::Secondary;
    }

    pub fn record_attempts(&mut self, strategy: Strategy, attempts: u32) {
        match strategy {
            Strategy::Primary => self.primary_attempts += attempts,
            Strategy::Secondary => self.secondary_attempts += attempts,
        }
    }

    pub fn attempts(&self, strategy: Strategy) -> u32 {
        match strategy {
            Strategy::Primary => self.primary_attempts,
            Strategy::Secondary => self.secondary_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_on_primary() {
        let state = StrategyState::new();
        assert_eq!(state.active(), Strategy::Primary);
        assert!(state.is_primary_enabled());
        assert_eq!(state.attempts(Strategy::Primary), 0);
    }

    #[test]
    fn disabling_keeps_first_reason() {
        let mut state = StrategyState::new();
        state.disable_primary(ErrorClass::ProviderUnavailable);
        state.disable_primary(ErrorClass::NetworkError);
        assert_eq!(state.active(), Strategy::Secondary);
        assert!(!state.is_primary_enabled());
        assert_eq!(state.disabled_by(), Some(ErrorClass::ProviderUnavailable));
    }

    #[test]
    fn attempts_accumulate_per_strategy() {
        let mut state = StrategyState::new();
        state.record_attempts(Strategy::Primary, 2);
        state.record_attempts(Strategy::Secondary, 3);
        state.record_attempts(Strategy::Primary, 1);
        assert_eq!(state.attempts(Strategy::Primary), 3);
        assert_eq!(state.attempts(Strategy::Secondary), 3);
    }
}
