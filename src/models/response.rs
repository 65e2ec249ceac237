//! HTTP response model.
//!
//! A response either arrives with its body already buffered (the application
//! bridge in buffered mode, tests) or with a raw handle the body is pulled from.
//! The content cache has three states:
//!
//! - unread: nothing pulled from the raw handle yet,
//! - loaded: the whole body is cached and can be read any number of times,
//! - absent: there is no body to read (no raw handle, or status 0).
//!
//! Streaming a body chunk by chunk with [`Response::iter_content`] drains the raw
//! handle without caching it. After that the content can no longer be read.

use crate::config::REDIRECT_STATI;
use crate::cookies::CookieJar;
use crate::errors::{HttpError, Result};
use crate::models::PreparedRequest;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::HeaderMap;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Blocking source of response body bytes.
pub trait RawBody: Send {
    /// Reads up to `amt` bytes. `None` or `Some(0)` reads everything that is
    /// left. An empty result marks the end of the body.
    fn read(&mut self, amt: Option<usize>) -> Result<Bytes>;

    /// Releases the underlying connection or task.
    fn close(&mut self) {}
}

/// Asynchronous source of response body bytes.
#[async_trait]
pub trait AsyncRawBody: Send {
    /// Same contract as [`RawBody::read`].
    async fn read(&mut self, amt: Option<usize>) -> Result<Bytes>;

    async fn close(&mut self) {}
}

enum RawStream {
    Blocking(Mutex<Box<dyn RawBody>>),
    Async(Mutex<Box<dyn AsyncRawBody>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Content {
    Unread,
    Loaded(Bytes),
    Absent,
}

pub struct Response {
    /// Numeric HTTP status code (e.g., `200`, `404`).
    pub status: u16,

    /// Reason phrase. `"Unknown"` for non-standard codes.
    pub reason: String,

    pub headers: HeaderMap,

    /// URL the response was received from.
    pub url: String,

    /// Charset used by [`Response::text`], taken from `Content-Type` when present.
    pub encoding: Option<String>,

    /// Time between sending the request and receiving the response head.
    pub elapsed: Duration,

    /// The request that produced this response.
    pub request: Option<Box<PreparedRequest>>,

    /// Redirect responses that led to this one, oldest first.
    pub history: Vec<Response>,

    /// The next request of a redirect chain that was not followed.
    pub next: Option<Box<PreparedRequest>>,

    raw: Option<RawStream>,
    content: Content,
    content_consumed: bool,
    chunk_offset: usize,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, url: impl Into<String>) -> Self {
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();
        let encoding = encoding_from_headers(&headers);

        Response {
            status,
            reason,
            headers,
            url: url.into(),
            encoding,
            elapsed: Duration::ZERO,
            request: None,
            history: Vec::new(),
            next: None,
            raw: None,
            content: Content::Absent,
            content_consumed: false,
            chunk_offset: 0,
        }
    }

    /// Attaches a fully buffered body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.raw = None;
        self.content = Content::Loaded(body.into());
        self.content_consumed = true;
        self
    }

    /// Attaches a blocking raw body handle.
    pub fn with_raw(mut self, raw: Box<dyn RawBody>) -> Self {
        self.raw = Some(RawStream::Blocking(Mutex::new(raw)));
        self.content = Content::Unread;
        self.content_consumed = false;
        self
    }

    /// Attaches an asynchronous raw body handle.
    pub fn with_async_raw(mut self, raw: Box<dyn AsyncRawBody>) -> Self {
        self.raw = Some(RawStream::Async(Mutex::new(raw)));
        self.content = Content::Unread;
        self.content_consumed = false;
        self
    }

    pub fn has_raw(&self) -> bool {
        self.raw.is_some()
    }

    /// True for 2xx and 3xx statuses.
    pub fn ok(&self) -> bool {
        self.raise_for_status().is_ok()
    }

    pub fn raise_for_status(&self) -> Result<()> {
        let kind = match self.status {
            400..=499 => "Client",
            500..=599 => "Server",
            _ => return Ok(()),
        };
        Err(HttpError::Status {
            status: self.status,
            kind,
            reason: self.reason.clone(),
            url: self.url.clone(),
        })
    }

    /// A redirect this crate would follow: redirect status plus `Location`.
    pub fn is_redirect(&self) -> bool {
        self.headers.contains_key(LOCATION) && REDIRECT_STATI.contains(&self.status)
    }

    pub fn is_permanent_redirect(&self) -> bool {
        self.headers.contains_key(LOCATION) && matches!(self.status, 301 | 308)
    }

    /// Cookies the server set on this response.
    pub fn cookies(&self) -> CookieJar {
        let mut jar = CookieJar::new();
        if let Ok(url) = url::Url::parse(&self.url) {
            jar.extract(&url, &self.headers);
        }
        jar
    }

    fn cached_content(&self) -> Option<Result<Option<Bytes>>> {
        match &self.content {
            Content::Loaded(b) => Some(Ok(Some(b.clone()))),
            Content::Absent => Some(Ok(None)),
            Content::Unread if self.content_consumed => Some(Err(HttpError::ContentConsumed)),
            Content::Unread => None,
        }
    }

    fn store_content(&mut self, body: Bytes) -> Option<Bytes> {
        self.content = if self.status == 0 {
            Content::Absent
        } else {
            Content::Loaded(body.clone())
        };
        self.content_consumed = true;
        match self.content {
            Content::Loaded(_) => Some(body),
            _ => None,
        }
    }

    /// Reads and caches the whole body.
    ///
    /// Fails with [`HttpError::AsyncBody`] when the body can only be read asynchronously.
    pub fn content(&mut self) -> Result<Option<Bytes>> {
        if let Some(cached) = self.cached_content() {
            return cached;
        }
        let body = match self.raw.as_mut() {
            None => {
                self.content = Content::Absent;
                self.content_consumed = true;
                return Ok(None);
            }
            Some(RawStream::Blocking(raw)) => raw
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .read(None)?,
            Some(RawStream::Async(_)) => return Err(HttpError::AsyncBody),
        };
        Ok(self.store_content(body))
    }

    /// Reads and caches the whole body, awaiting asynchronous raw handles.
    pub async fn content_async(&mut self) -> Result<Option<Bytes>> {
        if let Some(cached) = self.cached_content() {
            return cached;
        }
        let body = match self.raw.as_mut() {
            None => {
                self.content = Content::Absent;
                self.content_consumed = true;
                return Ok(None);
            }
            Some(RawStream::Blocking(raw)) => raw
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .read(None)?,
            Some(RawStream::Async(raw)) => {
                raw.get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .read(None)
                    .await?
            }
        };
        Ok(self.store_content(body))
    }

    /// Iterates over the body in chunks of at most `chunk_size` bytes.
    ///
    /// A cached body is replayed. Otherwise the raw handle is drained without
    /// caching, and a second iteration fails with [`HttpError::StreamConsumed`].
    pub fn iter_content(&mut self, chunk_size: usize) -> ContentChunks<'_> {
        ContentChunks {
            response: self,
            chunk_size: chunk_size.max(1),
            offset: 0,
            done: false,
        }
    }

    /// Pulls the next chunk of at most `chunk_size` bytes, awaiting
    /// asynchronous raw handles. `None` marks the end of the body.
    pub async fn chunk(&mut self, chunk_size: usize) -> Result<Option<Bytes>> {
        let chunk_size = chunk_size.max(1);
        match &self.content {
            Content::Loaded(b) => {
                let start = self.chunk_offset.min(b.len());
                let end = (start + chunk_size).min(b.len());
                self.chunk_offset = end;
                return Ok((start < end).then(|| b.slice(start..end)));
            }
            Content::Absent => return Ok(None),
            Content::Unread if self.content_consumed => {
                return if self.chunk_offset == usize::MAX {
                    Ok(None)
                } else {
                    Err(HttpError::StreamConsumed)
                }
            }
            Content::Unread => {}
        }

        let chunk = match self.raw.as_mut() {
            None => Bytes::new(),
            Some(RawStream::Blocking(raw)) => raw
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .read(Some(chunk_size))?,
            Some(RawStream::Async(raw)) => {
                raw.get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .read(Some(chunk_size))
                    .await?
            }
        };

        if chunk.is_empty() {
            self.content_consumed = true;
            // the stream ended through this method, later calls keep returning None
            self.chunk_offset = usize::MAX;
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }

    /// Decodes the body using [`Response::encoding`], falling back to lossy UTF-8.
    pub fn text(&mut self) -> Result<String> {
        let content = self.content()?.unwrap_or_default();
        Ok(decode_body(self.encoding.as_deref(), &content))
    }

    pub async fn text_async(&mut self) -> Result<String> {
        let content = self.content_async().await?.unwrap_or_default();
        Ok(decode_body(self.encoding.as_deref(), &content))
    }

    pub fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let content = self.content()?.unwrap_or_default();
        serde_json::from_slice(&content).map_err(HttpError::JsonDecode)
    }

    pub async fn json_async<T: DeserializeOwned>(&mut self) -> Result<T> {
        let content = self.content_async().await?.unwrap_or_default();
        serde_json::from_slice(&content).map_err(HttpError::JsonDecode)
    }

    /// Splits the decoded body into lines.
    pub fn iter_lines(&mut self) -> Result<impl Iterator<Item = String>> {
        let text = self.text()?;
        Ok(text
            .lines()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into_iter())
    }

    /// Releases the raw handle. Content that was already read stays available.
    pub fn close(&mut self) {
        if let Some(RawStream::Blocking(raw)) = self.raw.as_mut() {
            raw.get_mut().unwrap_or_else(PoisonError::into_inner).close();
        }
        self.raw = None;
    }

    pub async fn close_async(&mut self) {
        match self.raw.as_mut() {
            Some(RawStream::Blocking(raw)) => {
                raw.get_mut().unwrap_or_else(PoisonError::into_inner).close()
            }
            Some(RawStream::Async(raw)) => {
                raw.get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .close()
                    .await
            }
            None => {}
        }
        self.raw = None;
    }

    /// Drains the body of a redirect response before the next hop, so the
    /// underlying connection or task is released.
    pub(crate) fn drain(&mut self) {
        if let Err(e) = self.content() {
            log::warn!("failed to drain redirect body of {}: {e}", self.url);
        }
        self.close();
    }

    pub(crate) async fn drain_async(&mut self) {
        if let Err(e) = self.content_async().await {
            log::warn!("failed to drain redirect body of {}: {e}", self.url);
        }
        self.close_async().await;
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("history", &self.history.len())
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}

/// Blocking chunk iterator returned by [`Response::iter_content`].
pub struct ContentChunks<'a> {
    response: &'a mut Response,
    chunk_size: usize,
    offset: usize,
    done: bool,
}

impl Iterator for ContentChunks<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match &self.response.content {
            Content::Loaded(b) => {
                if self.offset >= b.len() {
                    self.done = true;
                    return None;
                }
                let end = (self.offset + self.chunk_size).min(b.len());
                let chunk = b.slice(self.offset..end);
                self.offset = end;
                Some(Ok(chunk))
            }
            Content::Absent => {
                self.done = true;
                None
            }
            Content::Unread if self.response.content_consumed => {
                self.done = true;
                Some(Err(HttpError::StreamConsumed))
            }
            Content::Unread => {
                let read = match self.response.raw.as_mut() {
                    None => Ok(Bytes::new()),
                    Some(RawStream::Blocking(raw)) => raw
                        .get_mut()
                        .unwrap_or_else(PoisonError::into_inner)
                        .read(Some(self.chunk_size)),
                    Some(RawStream::Async(_)) => Err(HttpError::AsyncBody),
                };
                match read {
                    Ok(chunk) if chunk.is_empty() => {
                        self.response.content_consumed = true;
                        self.done = true;
                        None
                    }
                    Ok(chunk) => Some(Ok(chunk)),
                    Err(e) => {
                        self.done = true;
                        Some(Err(e))
                    }
                }
            }
        }
    }
}

/// Extracts the charset of a response from its `Content-Type` header.
///
/// Textual types without a charset default to ISO-8859-1, JSON to UTF-8.
pub(crate) fn encoding_from_headers(headers: &HeaderMap) -> Option<String> {
    let ct = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let lower = ct.to_ascii_lowercase();

    if let Some(idx) = lower.find("charset=") {
        let after = &ct[idx + "charset=".len()..];
        // charset value may be quoted or end at ; or end of string
        let end = after.find([';', ' ', '\t']).unwrap_or(after.len());
        let charset = after[..end].trim_matches(|c| c == '"' || c == '\'');
        if !charset.is_empty() {
            return Some(charset.to_string());
        }
    }
    if lower.starts_with("text/") {
        return Some("ISO-8859-1".to_string());
    }
    if lower.starts_with("application/json") {
        return Some("utf-8".to_string());
    }
    None
}

pub(crate) fn decode_body(encoding: Option<&str>, body: &[u8]) -> String {
    match encoding {
        Some(cs) if cs.eq_ignore_ascii_case("iso-8859-1") || cs.eq_ignore_ascii_case("latin-1") => {
            body.iter().map(|&b| char::from(b)).collect()
        }
        // UTF-8 and anything we cannot decode natively
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}
