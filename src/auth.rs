//! Authentication handlers.
//!
//! An [`AuthHandler`] receives the in-progress [`PreparedRequest`] and may
//! change its headers, URL, body or hooks. Closures with the matching signature
//! are handlers too.

mod netrc;

pub use netrc::{get_netrc_auth, Netrc, NetrcEntry};

use crate::errors::{HttpError, Result};
use crate::models::uri::unquote;
use crate::models::PreparedRequest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{HeaderValue, AUTHORIZATION};
use std::fmt;

pub trait AuthHandler: Send + Sync {
    fn apply(&self, request: &mut PreparedRequest) -> Result<()>;
}

impl<F> AuthHandler for F
where
    F: Fn(&mut PreparedRequest) -> Result<()> + Send + Sync,
{
    fn apply(&self, request: &mut PreparedRequest) -> Result<()> {
        self(request)
    }
}

/// Builds a `Basic` authorization header value.
pub fn basic_auth_header(username: &str, password: &str) -> Result<HeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|e| HttpError::invalid_header("Authorization", e))?;
    value.set_sensitive(true);
    Ok(value)
}

/// HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        BasicAuth {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl<U: Into<String>, P: Into<String>> From<(U, P)> for BasicAuth {
    fn from((username, password): (U, P)) -> Self {
        BasicAuth::new(username, password)
    }
}

impl AuthHandler for BasicAuth {
    fn apply(&self, request: &mut PreparedRequest) -> Result<()> {
        let value = basic_auth_header(&self.username, &self.password)?;
        request.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// `Authorization: Bearer <token>`.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerAuth {
    pub token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        BearerAuth { token: token.into() }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth").finish_non_exhaustive()
    }
}

impl AuthHandler for BearerAuth {
    fn apply(&self, request: &mut PreparedRequest) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| HttpError::invalid_header("Authorization", e))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Percent-decoded `user:password` embedded in a URL, if any part is set.
pub fn get_auth_from_url(url: &url::Url) -> Option<(String, String)> {
    let username = unquote(url.username());
    let password = unquote(url.password().unwrap_or_default());
    if username.is_empty() && password.is_empty() {
        None
    } else {
        Some((username, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header_encoding() {
        let value = basic_auth_header("user", "pass").unwrap();
        assert_eq!(value, "Basic dXNlcjpwYXNz");
        assert!(value.is_sensitive());
    }

    #[test]
    fn basic_auth_from_tuple() {
        let auth: BasicAuth = ("user", "pass").into();
        let mut p = PreparedRequest::new();
        auth.apply(&mut p).unwrap();
        assert_eq!(p.headers[AUTHORIZATION], "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn bearer_auth() {
        let mut p = PreparedRequest::new();
        BearerAuth::new("tok").apply(&mut p).unwrap();
        assert_eq!(p.headers[AUTHORIZATION], "Bearer tok");
    }

    #[test]
    fn url_without_credentials() {
        let url = url::Url::parse("http://example.com/").unwrap();
        assert_eq!(get_auth_from_url(&url), None);

        let url = url::Url::parse("http://user@example.com/").unwrap();
        assert_eq!(get_auth_from_url(&url), Some(("user".into(), String::new())));
    }
}
