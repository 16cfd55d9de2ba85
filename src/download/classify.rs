//! Error classification
//!
//! Maps any pipeline failure onto a small closed set of classes. The class decides
//! whether the failure is retried, whether the secondary strategy gets a chance,
//! and which message the user sees.

use std::fmt;

use crate::core::error::AppError;
use crate::core::retry::Retryable;
use crate::core::utils::bytes_to_mb;

/// Closed set of failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Private, removed, region-locked or otherwise unavailable video
    Unavailable,
    /// Content requires age verification
    AgeRestricted,
    /// Timeouts, resets, DNS and similar transport failures
    NetworkError,
    /// The platform flagged the request as automated
    BotDetection,
    /// Provider response no longer matches the expected shape
    FormatDrift,
    /// The primary tool cannot run at all
    ProviderUnavailable,
    /// Duration or output size limit exceeded
    ConstraintViolation,
    /// ffmpeg could not be spawned, exited non-zero, or produced a broken file
    TranscodeFailure,
    /// Fallback merge exceeded its wall-clock budget
    Timeout,
    /// Malformed request (missing link, empty query, no search result)
    UserInput,
    Unknown,
}

impl ErrorClass {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Unavailable => "unavailable",
            ErrorClass::AgeRestricted => "age_restricted",
            ErrorClass::NetworkError => "network_error",
            ErrorClass::BotDetection => "bot_detection",
            ErrorClass::FormatDrift => "format_drift",
            ErrorClass::ProviderUnavailable => "provider_unavailable",
            ErrorClass::ConstraintViolation => "constraint_violation",
            ErrorClass::TranscodeFailure => "transcode_failure",
            ErrorClass::Timeout => "timeout",
            ErrorClass::UserInput => "user_input",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Whether another attempt of the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorClass::ProviderUnavailable | ErrorClass::ConstraintViolation | ErrorClass::UserInput
        )
    }

    /// Whether a failed primary acquisition may be retried through the secondary strategy.
    ///
    /// Bot detection is terminal: the secondary provider talks to the same platform.
    pub fn allows_fallback(&self) -> bool {
        !matches!(
            self,
            ErrorClass::BotDetection
                | ErrorClass::ConstraintViolation
                | ErrorClass::UserInput
                | ErrorClass::Timeout
        )
    }

    /// Generic user-facing message for the class.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorClass::Unavailable => "❌ Download failed. Video is unavailable or private.",
            ErrorClass::AgeRestricted => "❌ Download failed. Age-restricted content not supported.",
            ErrorClass::NetworkError => "❌ Download failed. Network error, please try again.",
            ErrorClass::BotDetection => "❌ YouTube is blocking requests. Please try again later.",
            ErrorClass::FormatDrift => "❌ YouTube changed their format. Please try again later or contact support.",
            ErrorClass::ProviderUnavailable => "❌ Download system error. Please try again later.",
            ErrorClass::ConstraintViolation => "❌ Video exceeds the allowed limits.",
            ErrorClass::TranscodeFailure => "❌ Processing failed. Please try with a different video.",
            ErrorClass::Timeout => "⏱️ Download timeout. Video might be too large or network is slow.",
            ErrorClass::UserInput => "❌ Invalid request.",
            ErrorClass::Unknown => "❌ Download failed. Please try with a different video.",
        }
    }

    /// Operator hint logged next to the failure, for classes an operator can act on.
    pub fn fix_recommendation(&self) -> Option<&'static str> {
        match self {
            ErrorClass::ProviderUnavailable => {
                Some("🔧 yt-dlp cannot run: check YTDL_BIN, reinstall with `pip install -U yt-dlp`")
            }
            ErrorClass::BotDetection => Some("🔧 Refresh YTDL_COOKIES_FILE or wait before retrying"),
            ErrorClass::FormatDrift => Some("🔧 Update yt-dlp and the innertube client versions"),
            ErrorClass::TranscodeFailure => Some("🔧 Check FFMPEG_BIN and the ffmpeg build"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies free-form diagnostic text from a provider or tool.
///
/// Patterns are checked in a fixed order; the first hit wins.
pub fn classify_message(message: &str) -> ErrorClass {
    let msg = message.to_lowercase();

    // Broken frozen bundle or missing interpreter
    if msg.contains("pyinstaller")
        || msg.contains("[pyi-")
        || msg.contains("_meipass")
        || msg.contains("failed to execute script")
        || (msg.contains("no such file or directory") && msg.contains("yt-dlp"))
    {
        return ErrorClass::ProviderUnavailable;
    }

    if msg.contains("confirm your age")
        || msg.contains("age-restricted")
        || msg.contains("age restricted")
        || msg.contains("age verification")
        || msg.contains("inappropriate for some users")
    {
        return ErrorClass::AgeRestricted;
    }

    if msg.contains("sign in to confirm")
        || msg.contains("not a bot")
        || msg.contains("bot detection")
        || msg.contains("captcha")
        || msg.contains("too many requests")
        || msg.contains("unusual traffic")
        || lazy_regex::regex_is_match!(r"\b(?:http error|status(?: code)?:?)\s*429\b", &msg)
    {
        return ErrorClass::BotDetection;
    }

    if msg.contains("could not parse")
        || msg.contains("decipher")
        || msg.contains("signature extraction")
        || msg.contains("error when parsing")
        || msg.contains("unexpected response shape")
        || msg.contains("nsig extraction")
    {
        return ErrorClass::FormatDrift;
    }

    if msg.contains("video unavailable")
        || msg.contains("private video")
        || msg.contains("video is private")
        || msg.contains("has been removed")
        || msg.contains("account has been terminated")
        || msg.contains("this video is not available")
        || msg.contains("not available in your country")
        || msg.contains("not made this video available in your country")
        || msg.contains("blocked it in your country")
        || msg.contains("does not exist")
        || msg.contains("members-only")
        || lazy_regex::regex_is_match!(r"\bgeo[- ]?restrict", &msg)
    {
        return ErrorClass::Unavailable;
    }

    if msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("network")
        || msg.contains("socket")
        || msg.contains("dns")
        || msg.contains("econnreset")
    {
        return ErrorClass::NetworkError;
    }

    ErrorClass::Unknown
}

/// Classifies a pipeline error. Structured variants map directly, the rest by message.
pub fn classify(err: &AppError) -> ErrorClass {
    match err {
        AppError::Input(_) => ErrorClass::UserInput,
        AppError::ToolUnavailable { .. } => ErrorClass::ProviderUnavailable,
        AppError::ResponseShape(_) | AppError::Json(_) => ErrorClass::FormatDrift,
        AppError::DurationExceeded { .. } | AppError::SizeExceeded { .. } => ErrorClass::ConstraintViolation,
        AppError::Merge(_) | AppError::InvalidArtifact(_) => ErrorClass::TranscodeFailure,
        AppError::MergeTimeout(_) => ErrorClass::Timeout,
        AppError::ProcessTimeout { .. } => ErrorClass::NetworkError,
        AppError::Http(e) if e.is_timeout() || e.is_connect() => ErrorClass::NetworkError,
        AppError::Http(e) => match e.status() {
            Some(status) if status.as_u16() == 429 => ErrorClass::BotDetection,
            Some(status) if status.as_u16() == 403 || status.as_u16() == 404 => ErrorClass::Unavailable,
            _ => ErrorClass::NetworkError,
        },
        AppError::HttpStatus(status) if status.as_u16() == 429 => ErrorClass::BotDetection,
        AppError::HttpStatus(status) if status.is_client_error() => ErrorClass::Unavailable,
        AppError::HttpStatus(_) => ErrorClass::NetworkError,
        AppError::Io(e) => match classify_message(&e.to_string()) {
            ErrorClass::Unknown => ErrorClass::NetworkError,
            class => class,
        },
        AppError::Provider { message, .. } => classify_message(message),
        AppError::Stream(message) => match classify_message(message) {
            ErrorClass::Unknown => ErrorClass::NetworkError,
            class => class,
        },
        AppError::Url(_) => ErrorClass::UserInput,
        AppError::Search(_) | AppError::Delivery(_) => ErrorClass::Unknown,
    }
}

impl Retryable for AppError {
    fn is_retryable(&self) -> bool {
        classify(self).is_retryable()
    }
}

/// The single message sent to the user when a request fails.
///
/// Errors that carry details the user can act on (limits, search misses) get a
/// specific message; everything else falls back to the class message.
pub fn failure_message(err: &AppError, class: ErrorClass) -> String {
    match err {
        AppError::Input(message) => message.clone(),
        AppError::DurationExceeded {
            duration_secs,
            limit_secs,
        } => format!(
            "❌ Video is too long ({} minutes). Maximum {} minutes allowed.",
            duration_secs / 60,
            limit_secs / 60
        ),
        AppError::SizeExceeded {
            size_bytes,
            limit_bytes,
        } => format!(
            "❌ File too large: {:.2}MB (max {:.0}MB)\nTry downloading a shorter video.",
            bytes_to_mb(*size_bytes),
            bytes_to_mb(*limit_bytes)
        ),
        AppError::Search(_) => "❌ Search failed. Please try again.".to_string(),
        AppError::Merge(detail) => format!("❌ Processing failed: {}", detail),
        AppError::InvalidArtifact(detail) | AppError::Delivery(detail) => {
            format!("❌ Failed to send video: {}", detail)
        }
        _ => class.user_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::strategy::Strategy;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_classify_messages() {
        assert_eq!(
            classify_message("ERROR: [youtube] abc: Sign in to confirm you’re not a bot"),
            ErrorClass::BotDetection
        );
        assert_eq!(
            classify_message("Sign in to confirm your age. This video may be inappropriate for some users."),
            ErrorClass::AgeRestricted
        );
        assert_eq!(classify_message("ERROR: Private video"), ErrorClass::Unavailable);
        assert_eq!(classify_message("Video unavailable"), ErrorClass::Unavailable);
        assert_eq!(classify_message("read ECONNRESET"), ErrorClass::NetworkError);
        assert_eq!(classify_message("Connection timed out"), ErrorClass::NetworkError);
        assert_eq!(classify_message("Could not parse decipher function"), ErrorClass::FormatDrift);
        assert_eq!(
            classify_message("[PYI-1234:ERROR] Failed to load Python shared library"),
            ErrorClass::ProviderUnavailable
        );
        assert_eq!(classify_message("something odd happened"), ErrorClass::Unknown);
    }

    #[test]
    fn test_429_only_counts_as_an_http_status() {
        assert_eq!(
            classify_message(
                "ERROR: [youtube] ab429cdefgh: Video unavailable. This video has been removed by the uploader"
            ),
            ErrorClass::Unavailable
        );
        assert_eq!(
            classify_message("ERROR: unable to download video data: HTTP Error 429: Too Many Requests"),
            ErrorClass::BotDetection
        );
        assert_eq!(classify_message("server replied with status 429"), ErrorClass::BotDetection);
        assert_eq!(classify_message("wrote 4290 bytes then stalled"), ErrorClass::Unknown);
    }

    #[test]
    fn test_unavailable_needs_real_phrasing() {
        assert_eq!(
            classify_message("The uploader has not made this video available in your country"),
            ErrorClass::Unavailable
        );
        assert_eq!(
            classify_message("ERROR: [youtube] xyz: This video is not available"),
            ErrorClass::Unavailable
        );
        assert_eq!(classify_message("Video is geo-restricted"), ErrorClass::Unavailable);
        // Incidental words no longer match
        assert_eq!(classify_message("removed temporary fragment"), ErrorClass::Unknown);
        assert_eq!(classify_message("[geometry] option ignored"), ErrorClass::Unknown);
        assert_eq!(classify_message("format 137 is restricted to premium"), ErrorClass::Unknown);
    }

    #[test]
    fn test_age_wins_over_bot_wording() {
        // Both contain "sign in to confirm"; the age check runs first.
        assert_eq!(classify_message("Sign in to confirm your age"), ErrorClass::AgeRestricted);
    }

    #[test]
    fn test_classify_structured_errors() {
        assert_eq!(
            classify(&AppError::ToolUnavailable {
                tool: "yt-dlp".into(),
                reason: "not found".into()
            }),
            ErrorClass::ProviderUnavailable
        );
        assert_eq!(
            classify(&AppError::DurationExceeded {
                duration_secs: 2000,
                limit_secs: 1800
            }),
            ErrorClass::ConstraintViolation
        );
        assert_eq!(
            classify(&AppError::MergeTimeout(Duration::from_secs(600))),
            ErrorClass::Timeout
        );
        assert_eq!(classify(&AppError::Merge("exit 1".into())), ErrorClass::TranscodeFailure);
        assert_eq!(
            classify(&AppError::provider(Strategy::Secondary, "This video is private")),
            ErrorClass::Unavailable
        );
        assert_eq!(classify(&AppError::Stream("broken pipe".into())), ErrorClass::NetworkError);
        assert_eq!(classify(&AppError::Input("x".into())), ErrorClass::UserInput);
    }

    #[test]
    fn test_retry_and_fallback_policy() {
        assert!(!ErrorClass::ProviderUnavailable.is_retryable());
        assert!(!ErrorClass::ConstraintViolation.is_retryable());
        assert!(!ErrorClass::UserInput.is_retryable());
        assert!(ErrorClass::NetworkError.is_retryable());
        assert!(ErrorClass::BotDetection.is_retryable());

        assert!(ErrorClass::ProviderUnavailable.allows_fallback());
        assert!(ErrorClass::NetworkError.allows_fallback());
        assert!(!ErrorClass::BotDetection.allows_fallback());
        assert!(!ErrorClass::ConstraintViolation.allows_fallback());
    }

    #[test]
    fn test_failure_messages() {
        let too_long = AppError::DurationExceeded {
            duration_secs: 2400,
            limit_secs: 1800,
        };
        assert_eq!(
            failure_message(&too_long, classify(&too_long)),
            "❌ Video is too long (40 minutes). Maximum 30 minutes allowed."
        );

        let too_big = AppError::SizeExceeded {
            size_bytes: 60 * 1024 * 1024,
            limit_bytes: 50 * 1024 * 1024,
        };
        assert_eq!(
            failure_message(&too_big, classify(&too_big)),
            "❌ File too large: 60.00MB (max 50MB)\nTry downloading a shorter video."
        );

        let bot = AppError::provider(Strategy::Primary, "HTTP Error 429: Too Many Requests");
        assert_eq!(
            failure_message(&bot, classify(&bot)),
            "❌ YouTube is blocking requests. Please try again later."
        );
    }
}
