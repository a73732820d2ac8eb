//! Single-shot HTTPS client for the content-safety detector.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::error::{ConfigError, DetectorUnavailable};
use crate::model::{DetectionRequest, DetectionResult, Direction};

/// Longest slice of a response body copied into debug logs.
const LOG_BODY_LIMIT: usize = 512;

/// Anything that can evaluate a message and return triggered rules.
///
/// [`DetectionClient`] is the production implementation; tests substitute
/// scripted detectors.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(
        &self,
        message: &str,
        direction: Direction,
    ) -> Result<DetectionResult, DetectorUnavailable>;
}

/// HTTP client for the detector's `detect` endpoint.
///
/// One call, one result: no retries. Each request is bounded by the
/// configured timeout and an expired timeout is reported as
/// [`DetectorUnavailable::Timeout`].
#[derive(Clone)]
pub struct DetectionClient {
    client: Client,
    url: String,
    api_key_header: String,
    api_key: String,
}

impl DetectionClient {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.detect_url(),
            api_key_header: config.api_key_header,
            api_key: config.api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(
        &self,
        request: &DetectionRequest,
    ) -> Result<DetectionResult, DetectorUnavailable> {
        let direction = request.direction();
        let response = match self
            .client
            .post(&self.url)
            .header(self.api_key_header.as_str(), self.api_key.as_str())
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(
                    %direction,
                    url = %self.url,
                    request_id = %request.client_request_id,
                    %err,
                    "detector request failed"
                );
                return Err(err.into());
            }
        };

        let status = response.status();
        let body = response.text().await;
        debug!(
            %direction,
            url = %self.url,
            request_id = %request.client_request_id,
            status = status.as_u16(),
            body = body.as_deref().map(truncate_for_log).unwrap_or("<unreadable>"),
            "detector responded"
        );
        let body = body?;

        if !status.is_success() {
            return Err(DetectorUnavailable::Status {
                status,
                body: truncate_for_log(&body).to_string(),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Detector for DetectionClient {
    async fn detect(
        &self,
        message: &str,
        direction: Direction,
    ) -> Result<DetectionResult, DetectorUnavailable> {
        let request = DetectionRequest::new(message, direction);
        self.send(&request).await
    }
}

/// Longest prefix of `text` no longer than [`LOG_BODY_LIMIT`] bytes that
/// ends on a char boundary.
fn truncate_for_log(text: &str) -> &str {
    if text.len() <= LOG_BODY_LIMIT {
        return text;
    }
    let mut end = LOG_BODY_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
