use crate::hooks::HookEvent;
use crate::models::Response;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HttpError>;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Invalid URL {0:?}: No scheme supplied. Perhaps you meant https://{0}?")]
    MissingSchema(String),

    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No connection adapters were found for {0:?}")]
    InvalidSchema(String),

    #[error("Invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("Conflicting parameters: {0}")]
    ConflictingParameters(String),

    #[error("Streamed bodies and files are mutually exclusive")]
    StreamWithFiles,

    #[error("Exceeded {max} redirects")]
    TooManyRedirects { max: usize, response: Box<Response> },

    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    #[error("Read timeout: {0}")]
    ReadTimeout(String),

    #[error("The content for this response was already consumed")]
    StreamConsumed,

    #[error("Response content was consumed and cannot be read again")]
    ContentConsumed,

    #[error("Unable to rewind request body for redirect: {0}")]
    UnrewindableBody(String),

    #[error("Unsupported event specified, with event name {0:?}")]
    UnsupportedEvent(String),

    #[error("Async handler registered for {0} cannot run in a blocking dispatch")]
    AsyncHookInBlockingContext(HookEvent),

    #[error("Async body cannot be used in a blocking context")]
    AsyncBody,

    #[error("{status} {kind} Error: {reason} for url: {url}")]
    Status {
        status: u16,
        kind: &'static str,
        reason: String,
        url: String,
    },

    #[error("Failed to decode JSON response: {0}")]
    JsonDecode(#[source] serde_json::Error),

    #[error("Application error: {0:#}")]
    Application(anyhow::Error),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HttpError {
    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        HttpError::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_header(name: impl Into<String>, reason: impl ToString) -> Self {
        HttpError::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for the timeout kinds raised while waiting on a peer.
    pub fn is_timeout(&self) -> bool {
        match self {
            HttpError::ConnectTimeout(_) | HttpError::ReadTimeout(_) => true,
            HttpError::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// The last response of a redirect chain that exceeded the limit.
    pub fn response(&self) -> Option<&Response> {
        match self {
            HttpError::TooManyRedirects { response, .. } => Some(response),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schema_suggests_https() {
        let err = HttpError::MissingSchema("example.com".into());
        assert!(err.to_string().contains("https://example.com"));
    }

    #[test]
    fn timeouts_are_classified() {
        assert!(HttpError::ReadTimeout("slow".into()).is_timeout());
        assert!(HttpError::ConnectTimeout("slow".into()).is_timeout());
        assert!(!HttpError::StreamConsumed.is_timeout());
    }

    #[test]
    fn errors_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpError>();
    }
}
