//! Wire-ready requests.
//!
//! A [`PreparedRequest`] is built by running the `prepare_*` steps in a fixed
//! order: method, url, headers, cookies, body, auth, hooks. Auth runs before
//! hooks so hooks registered by an auth handler are kept, and the content
//! length is recomputed after auth because a handler may rewrite the body.
//!
//! Body rules:
//! - A body of known length gets `Content-Length`, a stream of unknown length
//!   gets `Transfer-Encoding: chunked`, never both.
//! - Methods other than GET/HEAD without a body get `Content-Length: 0`.
//! - `Content-Type` is only set when the caller did not provide one.

use crate::auth::{get_auth_from_url, AuthHandler, BasicAuth};
use crate::cookies::CookieJar;
use crate::errors::{HttpError, Result};
use crate::hooks::HookStore;
use crate::models::body::Body;
use crate::models::multipart::{encode_multipart, FilePart};
use crate::models::request::{JsonPayload, RequestData};
use crate::models::uri::{encode_pairs, prepare_url};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Version};
use std::net::SocketAddr;
use std::sync::Arc;

/// Read position of a streamed body, recorded so it can be rewound on redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPosition {
    Offset(u64),
    /// The stream has a position but reporting it failed.
    Unknown,
}

/// Details about the connection a request went out on. Filled in by adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub http_version: Option<Version>,
    pub remote_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub hooks: HookStore,
    pub body_position: Option<BodyPosition>,
    pub conn_info: Option<ConnectionInfo>,
    pub(crate) cookies: CookieJar,
}

impl Default for PreparedRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl PreparedRequest {
    pub fn new() -> Self {
        PreparedRequest {
            method: Method::GET,
            url: String::new(),
            headers: HeaderMap::new(),
            body: None,
            hooks: HookStore::new(),
            body_position: None,
            conn_info: None,
            cookies: CookieJar::new(),
        }
    }

    /// The cookies assembled for this request.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn parsed_url(&self) -> Option<url::Url> {
        url::Url::parse(&self.url).ok()
    }

    /// Path and query, as sent on the request line.
    pub fn path_url(&self) -> String {
        match self.parsed_url() {
            Some(url) => match url.query() {
                Some(q) => format!("{}?{}", url.path(), q),
                None => url.path().to_string(),
            },
            None => "/".to_string(),
        }
    }

    pub fn prepare_method(&mut self, method: &str) -> Result<()> {
        let upper = method.to_ascii_uppercase();
        self.method = Method::from_bytes(upper.as_bytes())
            .map_err(|_| HttpError::InvalidMethod(method.to_string()))?;
        Ok(())
    }

    pub fn prepare_url(&mut self, url: &str, params: &[(String, String)]) -> Result<()> {
        self.url = prepare_url(url, params)?;
        Ok(())
    }

    /// Sets headers in order. Entries without a value are skipped.
    pub fn prepare_headers(&mut self, headers: &[(String, Option<String>)]) -> Result<()> {
        self.headers = HeaderMap::new();
        for (name, value) in headers {
            let Some(value) = value else {
                continue;
            };
            let header_name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| HttpError::invalid_header(name.as_str(), e))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| HttpError::invalid_header(name.as_str(), e))?;
            self.headers.insert(header_name, header_value);
        }
        Ok(())
    }

    /// Attaches a cookie jar and serializes the matching cookies into a `Cookie`
    /// header. An existing `Cookie` header is left alone.
    pub fn prepare_cookies(&mut self, cookies: Option<&CookieJar>) {
        self.cookies = cookies.cloned().unwrap_or_default();

        if self.headers.contains_key(COOKIE) {
            return;
        }
        let Some(url) = self.parsed_url() else {
            return;
        };
        if let Some(header) = self.cookies.cookie_header(&url) {
            if let Ok(value) = HeaderValue::from_str(&header) {
                self.headers.insert(COOKIE, value);
            }
        }
    }

    pub(crate) fn prepare_body(
        &mut self,
        data: Option<&RequestData>,
        files: &[(String, FilePart)],
        json: Option<&JsonPayload>,
    ) -> Result<()> {
        if !files.is_empty() && json.is_some() {
            return Err(HttpError::ConflictingParameters(
                "files and json cannot be combined".to_string(),
            ));
        }

        let mut body: Option<Body> = None;
        let mut content_type: Option<String> = None;

        let has_data = data.is_some_and(|d| !d.is_empty());
        if !has_data {
            if let Some(json) = json {
                match json {
                    JsonPayload::Value(value) => {
                        let encoded = serde_json::to_vec(value)
                            .map_err(|e| HttpError::InvalidJson(e.to_string()))?;
                        body = Some(Body::Bytes(Bytes::from(encoded)));
                        content_type = Some("application/json".to_string());
                    }
                    JsonPayload::Invalid(reason) => return Err(HttpError::InvalidJson(reason.clone())),
                }
            }
        }

        match data {
            Some(RequestData::Stream(stream)) => {
                if !files.is_empty() {
                    return Err(HttpError::StreamWithFiles);
                }
                self.body_position = stream.position().map(|pos| match pos {
                    Ok(offset) => BodyPosition::Offset(offset),
                    Err(_) => BodyPosition::Unknown,
                });
                let length = stream.remaining_len();
                self.set_stream_length(length);
                self.body = Some(Body::Stream(stream.clone()));
                return Ok(());
            }
            Some(RequestData::AsyncStream(stream)) => {
                if !files.is_empty() {
                    return Err(HttpError::StreamWithFiles);
                }
                self.set_stream_length(stream.length());
                self.body = Some(Body::AsyncStream(stream.clone()));
                return Ok(());
            }
            _ => {}
        }

        if !files.is_empty() {
            let fields: &[(String, String)] = match data {
                None => &[],
                Some(RequestData::Form(pairs)) => pairs,
                Some(RequestData::Raw(raw)) if raw.is_empty() => &[],
                Some(_) => {
                    return Err(HttpError::ConflictingParameters(
                        "files can only be combined with form data".to_string(),
                    ))
                }
            };
            let (encoded, ct) = encode_multipart(fields, files);
            body = Some(Body::Bytes(encoded));
            content_type = Some(ct);
        } else if has_data {
            match data {
                Some(RequestData::Form(pairs)) => {
                    body = Some(Body::Bytes(Bytes::from(encode_pairs(pairs))));
                    content_type = Some("application/x-www-form-urlencoded".to_string());
                }
                Some(RequestData::Raw(raw)) => body = Some(Body::Bytes(raw.clone())),
                _ => {}
            }
        }

        self.body = body;
        self.prepare_content_length();

        if let Some(ct) = content_type {
            if !self.headers.contains_key(CONTENT_TYPE) {
                if let Ok(value) = HeaderValue::from_str(&ct) {
                    self.headers.insert(CONTENT_TYPE, value);
                }
            }
        }
        Ok(())
    }

    fn set_stream_length(&mut self, length: Option<u64>) {
        match length {
            Some(len) if len > 0 => {
                self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                self.headers.remove(TRANSFER_ENCODING);
            }
            _ => {
                self.headers
                    .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                self.headers.remove(CONTENT_LENGTH);
            }
        }
    }

    /// Recomputes `Content-Length` from the current body.
    pub fn prepare_content_length(&mut self) {
        match &self.body {
            Some(body) => {
                if self.headers.contains_key(TRANSFER_ENCODING) {
                    return;
                }
                match body.len() {
                    Some(len) if len > 0 || !is_bodyless_method(&self.method) => {
                        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                    }
                    _ => {}
                }
            }
            None => {
                if !is_bodyless_method(&self.method) && !self.headers.contains_key(CONTENT_LENGTH) {
                    self.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
                }
            }
        }
    }

    /// Applies `auth`, falling back to credentials embedded in the URL.
    pub fn prepare_auth(&mut self, auth: Option<&Arc<dyn AuthHandler>>) -> Result<()> {
        let auth: Option<Arc<dyn AuthHandler>> = match auth {
            Some(auth) => Some(auth.clone()),
            None => self
                .parsed_url()
                .and_then(|url| get_auth_from_url(&url))
                .map(|(user, pass)| Arc::new(BasicAuth::new(user, pass)) as Arc<dyn AuthHandler>),
        };

        if let Some(auth) = auth {
            auth.apply(self)?;
            self.prepare_content_length();
        }
        Ok(())
    }

    /// Appends `hooks` after any hook registered so far.
    pub fn prepare_hooks(&mut self, hooks: &HookStore) {
        self.hooks.extend(hooks);
    }
}

fn is_bodyless_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}
