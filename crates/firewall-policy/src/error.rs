use thiserror::Error;

/// The detector could not produce a usable result.
///
/// Every variant is recovered locally by the interception policy; none of
/// them is ever surfaced to the connected peers as a protocol error.
#[derive(Debug, Error)]
pub enum DetectorUnavailable {
    /// The detector answered with a non-2xx status.
    #[error("detector returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The request timed out before a response arrived.
    #[error("detector request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// Connection, TLS, or body-read failure.
    #[error("detector request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The 2xx body was not JSON or did not have the expected shape.
    #[error("detector returned a malformed body: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DetectorUnavailable {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Transport(err)
        }
    }
}

/// Startup-time configuration problems. These prevent the policy from being
/// wired into the relay at all.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting {name} is missing")]
    Missing { name: &'static str },

    #[error("required setting {name} is empty")]
    Empty { name: &'static str },

    #[error("invalid detector base URL '{url}': must start with http:// or https://")]
    InvalidBaseUrl { url: String },

    #[error("invalid API key header name '{0}'")]
    InvalidHeaderName(String),

    /// The key is not a valid HTTP header value. The key itself is never
    /// included in the message.
    #[error("{name} is not a valid HTTP header value")]
    InvalidApiKey { name: &'static str },

    #[error("invalid {name} '{id}': only letters, digits, '-', '_', '.' and '~' are allowed")]
    InvalidConfigId { name: &'static str, id: String },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
