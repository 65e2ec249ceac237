//! A single cookie record.
//!
//! Cookies either come from a server (`Set-Cookie`, scoped to a domain) or are
//! supplied by the caller (no domain, sent to every host).

use serde::{Deserialize, Serialize};
use url::Url;

/// A cookie as stored in a [`CookieJar`](super::CookieJar).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name (case-sensitive).
    pub name: String,

    /// Raw cookie value (not URL-decoded).
    pub value: String,

    /// Path scoping (e.g., `"/"`). `None` matches every path.
    pub path: Option<String>,

    /// Domain scoping. `None` matches every host, which is how caller supplied
    /// cookies behave.
    pub domain: Option<String>,

    /// If `true`, `domain` must match the request host exactly.
    pub host_only: bool,

    /// If `true`, cookie is sent only over HTTPS.
    pub secure: bool,

    /// Raw `Expires` attribute. Stored, not enforced.
    pub expires: Option<String>,

    /// SameSite policy (`"Strict"`, `"Lax"`, or `"None"`).
    pub same_site: Option<String>,

    pub http_only: bool,
}

impl Cookie {
    /// Creates a cookie that is sent to every host and path.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            host_only: false,
            secure: false,
            expires: None,
            same_site: None,
            http_only: false,
        }
    }

    /// Returns true when this cookie should be sent along with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();

        let domain_ok = match &self.domain {
            Some(domain) if self.host_only => host.eq_ignore_ascii_case(domain),
            Some(domain) => domain_matches(host, domain),
            None => true,
        };

        let path_ok = match &self.path {
            Some(cookie_path) => path_matches(url.path(), cookie_path),
            None => true,
        };

        domain_ok && path_ok && (!self.secure || url.scheme() == "https")
    }

    /// Two cookies are the same slot when name, domain and path agree.
    pub(crate) fn same_slot(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

/// `host` equals `domain` or is a subdomain of it. A leading dot on `domain`
/// is ignored.
pub(crate) fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Path matching on segment boundaries: `/app` covers `/app` and `/app/x`,
/// not `/application`.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}
