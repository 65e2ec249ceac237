use http::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONNECTION, USER_AGENT};
use http::Method;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = concat!("reqflow/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed before giving up.
pub const DEFAULT_REDIRECT_LIMIT: usize = 30;

/// Default timeout for read oriented methods (GET, HEAD, OPTIONS).
pub const READ_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for write oriented methods (POST, PUT, PATCH, DELETE).
pub const WRITE_DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Status codes that are followed automatically when a `Location` header is present.
pub const REDIRECT_STATI: [u16; 5] = [301, 302, 303, 307, 308];

/// Capacity of the message queue between the application bridge and its background task.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Size of the chunks pulled from a raw body when the whole content is requested.
pub const CONTENT_CHUNK_SIZE: usize = 10 * 1024;

/// Session configuration. Contains the defaults every request issued by a session starts from.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// User agent string for HTTP requests
    pub user_agent: String,
    /// Maximum number of redirects followed per request
    pub max_redirects: usize,
    /// Read proxies, CA bundles and netrc credentials from the environment
    pub trust_env: bool,
    /// Timeout applied to GET/HEAD/OPTIONS when the caller gives none
    pub read_timeout: Duration,
    /// Timeout applied to every other method when the caller gives none
    pub write_timeout: Duration,
    /// Defer body consumption until the caller reads the response
    pub stream: bool,
    /// Prefix joined with relative request URLs
    pub base_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: DEFAULT_REDIRECT_LIMIT,
            trust_env: true,
            read_timeout: READ_DEFAULT_TIMEOUT,
            write_timeout: WRITE_DEFAULT_TIMEOUT,
            stream: false,
            base_url: None,
        }
    }
}

impl SessionConfig {
    /// Returns the default timeout for the given method.
    pub fn timeout_for(&self, method: &Method) -> Duration {
        if is_read_method(method) {
            self.read_timeout
        } else {
            self.write_timeout
        }
    }

    /// Headers every session starts with.
    pub fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers
    }
}

pub(crate) fn is_read_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_depend_on_method() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout_for(&Method::GET), Duration::from_secs(30));
        assert_eq!(config.timeout_for(&Method::OPTIONS), Duration::from_secs(30));
        assert_eq!(config.timeout_for(&Method::POST), Duration::from_secs(120));
        assert_eq!(config.timeout_for(&Method::DELETE), Duration::from_secs(120));
    }

    #[test]
    fn default_headers_carry_user_agent() {
        let config = SessionConfig {
            user_agent: "reqflow-test/1".into(),
            ..Default::default()
        };
        let headers = config.default_headers();
        assert_eq!(headers[USER_AGENT], "reqflow-test/1");
        assert_eq!(headers[ACCEPT], "*/*");
        assert_eq!(headers.len(), 4);
    }
}
