//! InnertubeProvider: the secondary strategy, talking to the platform's player API.
//!
//! One POST to `/youtubei/v1/player` yields playability, title, duration and the
//! adaptive (audio-only / video-only) formats. Streams are then pulled with HTTP
//! Range requests in fixed-size chunks, so a slow or throttled format never holds a
//! single long-lived response.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, RANGE, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::download::identity::ClientIdentity;
use crate::download::progress::StreamKind;
use crate::download::source::{extract_video_id, ElementaryStream, MediaInfo, SecondaryProvider};
use crate::download::strategy::Strategy;

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    video_details: Option<VideoDetails>,
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    title: Option<String>,
    length_seconds: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdaptiveFormat {
    itag: Option<u32>,
    url: Option<String>,
    signature_cipher: Option<String>,
    mime_type: Option<String>,
    bitrate: Option<u64>,
    content_length: Option<String>,
    height: Option<u32>,
}

impl AdaptiveFormat {
    fn mime(&self) -> &str {
        self.mime_type.as_deref().unwrap_or_default()
    }

    fn matches(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Audio => self.mime().starts_with("audio/"),
            StreamKind::Video => self.mime().starts_with("video/"),
        }
    }

    /// Sort key: mp4 container first, then resolution, then bitrate.
    fn rank(&self) -> (bool, u32, u64) {
        (
            self.mime().contains("/mp4"),
            self.height.unwrap_or(0),
            self.bitrate.unwrap_or(0),
        )
    }
}

impl PlayerResponse {
    fn ensure_playable(&self) -> AppResult<()> {
        let status = self
            .playability_status
            .as_ref()
            .ok_or_else(|| AppError::ResponseShape("player response has no playabilityStatus".to_string()))?;

        match status.status.as_deref() {
            Some("OK") => Ok(()),
            other => Err(AppError::provider(
                Strategy::Secondary,
                format!(
                    "{}: {}",
                    other.unwrap_or("UNKNOWN"),
                    status.reason.as_deref().unwrap_or("no reason given")
                ),
            )),
        }
    }

    fn media_info(&self) -> AppResult<MediaInfo> {
        let details = self
            .video_details
            .as_ref()
            .ok_or_else(|| AppError::ResponseShape("player response has no videoDetails".to_string()))?;
        let title = details
            .title
            .clone()
            .ok_or_else(|| AppError::ResponseShape("videoDetails has no title".to_string()))?;
        let duration_secs = details
            .length_seconds
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| AppError::ResponseShape("videoDetails has no lengthSeconds".to_string()))?;
        Ok(MediaInfo { title, duration_secs })
    }

    /// Best directly downloadable format of `kind`.
    fn best_format(&self, kind: StreamKind) -> AppResult<AdaptiveFormat> {
        let formats = self
            .streaming_data
            .as_ref()
            .map(|d| d.adaptive_formats.as_slice())
            .unwrap_or_default();

        let best = formats
            .iter()
            .filter(|f| f.matches(kind))
            .max_by_key(|f| f.rank())
            .ok_or_else(|| AppError::ResponseShape(format!("player response has no {} formats", kind)))?;

        if best.url.is_none() {
            let reason = if best.signature_cipher.is_some() {
                "stream requires signature deciphering"
            } else {
                "format has neither url nor signatureCipher"
            };
            return Err(AppError::ResponseShape(format!(
                "{} (itag {:?})",
                reason, best.itag
            )));
        }
        Ok(best.clone())
    }
}

fn parse_player_response(body: &str) -> AppResult<PlayerResponse> {
    serde_json::from_str(body).map_err(|e| AppError::ResponseShape(format!("could not parse player response: {}", e)))
}

/// Secondary provider talking to the innertube player endpoint.
#[derive(Debug, Clone)]
pub struct InnertubeProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    chunk_size: u64,
}

impl InnertubeProvider {
    pub fn new() -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(config::download::http_timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint: PLAYER_ENDPOINT.to_string(),
            api_key: config::INNERTUBE_API_KEY.clone(),
            chunk_size: config::download::SECONDARY_CHUNK_BYTES,
        })
    }

    /// Overrides the player endpoint (mirrors, local test servers).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn identity_headers(identity: &ClientIdentity) -> AppResult<HeaderMap> {
        let invalid = |e: reqwest::header::InvalidHeaderValue| AppError::Input(format!("invalid identity header: {}", e));
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&identity.user_agent).map_err(invalid)?);
        headers.insert("x-youtube-client-name", HeaderValue::from(identity.client_id));
        headers.insert(
            "x-youtube-client-version",
            HeaderValue::from_str(&identity.client_version).map_err(invalid)?,
        );
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.youtube.com"));
        Ok(headers)
    }

    async fn fetch_player(&self, reference: &Url, identity: &ClientIdentity) -> AppResult<PlayerResponse> {
        let video_id = extract_video_id(reference)
            .ok_or_else(|| AppError::Input(format!("Could not find a video id in {}", reference)))?;

        let mut endpoint = Url::parse(&self.endpoint).map_err(|e| AppError::ToolUnavailable {
            tool: "innertube".to_string(),
            reason: format!("bad player endpoint '{}': {}", self.endpoint, e),
        })?;
        endpoint.query_pairs_mut().append_pair("prettyPrint", "false");
        if let Some(key) = &self.api_key {
            endpoint.query_pairs_mut().append_pair("key", key);
        }

        let body = json!({
            "videoId": video_id,
            "context": {
                "client": {
                    "clientName": identity.client_name,
                    "clientVersion": identity.client_version,
                    "hl": "en",
                    "gl": "US",
                }
            },
            "contentCheckOk": true,
            "racyCheckOk": true,
        });

        log::debug!("innertube player request for {} as {}", video_id, identity.name);
        let response = self
            .client
            .post(endpoint)
            .headers(Self::identity_headers(identity)?)
            .timeout(config::download::http_timeout())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }

        let text = response.text().await?;
        let player = parse_player_response(&text)?;
        player.ensure_playable()?;
        Ok(player)
    }
}

/// State threaded through the chunked range download.
struct RangeCursor {
    client: Client,
    url: String,
    user_agent: String,
    offset: u64,
    total: Option<u64>,
    chunk_size: u64,
    response: Option<reqwest::Response>,
    bytes_in_response: u64,
    kind: StreamKind,
}

impl RangeCursor {
    fn finished(&self) -> bool {
        self.total.is_some_and(|total| self.offset >= total)
    }

    async fn open_next_range(&mut self) -> AppResult<()> {
        let range = match self.total {
            Some(total) => format!("bytes={}-{}", self.offset, (self.offset + self.chunk_size).min(total) - 1),
            None => format!("bytes={}-", self.offset),
        };
        let response = self
            .client
            .get(&self.url)
            .header(USER_AGENT, self.user_agent.as_str())
            .header(RANGE, range)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }
        self.response = Some(response);
        self.bytes_in_response = 0;
        Ok(())
    }

    /// Next chunk of the stream, or None at the end.
    async fn next_chunk(&mut self) -> AppResult<Option<Bytes>> {
        loop {
            if let Some(response) = self.response.as_mut() {
                match response.chunk().await? {
                    Some(bytes) => {
                        self.offset += bytes.len() as u64;
                        self.bytes_in_response += bytes.len() as u64;
                        metrics::STREAM_BYTES_TOTAL
                            .with_label_values(&[self.kind.as_str()])
                            .inc_by(bytes.len() as f64);
                        return Ok(Some(bytes));
                    }
                    None => {
                        self.response = None;
                        if self.total.is_none() || self.finished() {
                            return Ok(None);
                        }
                        if self.bytes_in_response == 0 {
                            return Err(AppError::Stream(format!(
                                "{} range at {} returned no data",
                                self.kind, self.offset
                            )));
                        }
                    }
                }
            } else {
                if self.finished() {
                    return Ok(None);
                }
                self.open_next_range().await?;
            }
        }
    }
}

#[async_trait]
impl SecondaryProvider for InnertubeProvider {
    fn name(&self) -> &str {
        "innertube"
    }

    async fn fetch_metadata(&self, reference: &Url, identity: &ClientIdentity) -> AppResult<MediaInfo> {
        let info = self.fetch_player(reference, identity).await?.media_info()?;
        log::info!(
            "📋 innertube metadata ({}): '{}' ({}s)",
            identity.name,
            info.title,
            info.duration_secs
        );
        Ok(info)
    }

    async fn open_stream(
        &self,
        reference: &Url,
        identity: &ClientIdentity,
        kind: StreamKind,
    ) -> AppResult<ElementaryStream> {
        let player = self.fetch_player(reference, identity).await?;
        let format = player.best_format(kind)?;
        let total = format.content_length.as_deref().and_then(|s| s.parse::<u64>().ok());
        log::info!(
            "🎞️ {} stream: itag {:?} {} ({} bytes)",
            kind,
            format.itag,
            format.mime(),
            total.map_or("unknown".to_string(), |t| t.to_string())
        );

        let cursor = RangeCursor {
            client: self.client.clone(),
            url: format.url.unwrap_or_default(),
            user_agent: identity.user_agent.clone(),
            offset: 0,
            total,
            chunk_size: self.chunk_size.max(1),
            response: None,
            bytes_in_response: 0,
            kind,
        };
        let body = stream::try_unfold(cursor, |mut cursor| async move {
            let chunk = cursor.next_chunk().await?;
            Ok::<_, AppError>(chunk.map(|bytes| (bytes, cursor)))
        })
        .boxed();

        Ok(ElementaryStream::new(kind, total, body))
    }
}
