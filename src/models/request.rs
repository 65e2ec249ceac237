use crate::auth::{AuthHandler, BasicAuth};
use crate::cookies::CookieJar;
use crate::errors::Result;
use crate::hooks::{Hook, HookEvent, HookHandler, HookStore};
use crate::models::body::{AsyncBodyStream, BodyStream};
use crate::models::json;
use crate::models::multipart::FilePart;
use crate::models::PreparedRequest;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Body input of a [`Request`].
#[derive(Debug, Clone)]
pub enum RequestData {
    /// Ordered form pairs. Encoded as `application/x-www-form-urlencoded`, or as
    /// plain fields when files are attached.
    Form(Vec<(String, String)>),
    /// Raw bytes sent as is, without a content type.
    Raw(Bytes),
    /// Blocking stream.
    Stream(BodyStream),
    /// Asynchronous stream of chunks.
    AsyncStream(AsyncBodyStream),
}

impl RequestData {
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            RequestData::Form(pairs) => pairs.is_empty(),
            RequestData::Raw(bytes) => bytes.is_empty(),
            RequestData::Stream(_) | RequestData::AsyncStream(_) => false,
        }
    }
}

/// JSON body input. Serialization failures are kept until preparation.
#[derive(Debug, Clone)]
pub(crate) enum JsonPayload {
    Value(serde_json::Value),
    Invalid(String),
}

/// A user created request.
///
/// Nothing is validated until [`Request::prepare`] (or a session) turns it into a
/// [`PreparedRequest`].
#[derive(Clone, Default)]
pub struct Request {
    pub method: String,
    pub url: String,
    /// Ordered headers. A `None` value removes a header inherited from the session.
    pub headers: Vec<(String, Option<String>)>,
    pub files: Vec<(String, FilePart)>,
    pub data: Option<RequestData>,
    pub(crate) json: Option<JsonPayload>,
    pub params: Vec<(String, String)>,
    pub auth: Option<Arc<dyn AuthHandler>>,
    pub cookies: Option<CookieJar>,
    pub hooks: HookStore,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Request {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), Some(value.into())));
        self
    }

    /// Removes a header the session would otherwise add.
    pub fn unset_header(mut self, name: impl Into<String>) -> Self {
        self.headers.push((name.into(), None));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn form<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.data = Some(RequestData::Form(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.data = Some(RequestData::Raw(body.into()));
        self
    }

    pub fn stream(mut self, stream: BodyStream) -> Self {
        self.data = Some(RequestData::Stream(stream));
        self
    }

    pub fn async_stream(mut self, stream: AsyncBodyStream) -> Self {
        self.data = Some(RequestData::AsyncStream(stream));
        self
    }

    /// JSON body. Ignored when body data is given, rejected together with files.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.json = Some(match json::to_value(value) {
            Ok(value) => JsonPayload::Value(value),
            Err(e) => JsonPayload::Invalid(e.to_string()),
        });
        self
    }

    pub fn file(mut self, name: impl Into<String>, part: FilePart) -> Self {
        self.files.push((name.into(), part));
        self
    }

    pub fn auth<A: AuthHandler + 'static>(mut self, auth: A) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    pub fn basic_auth(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth(BasicAuth::new(username, password))
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.get_or_insert_with(CookieJar::new).set(name, value);
        self
    }

    pub fn hook(mut self, event: HookEvent, handler: HookHandler) -> Self {
        self.hooks.register(event, handler);
        self
    }

    /// Registers a lifecycle hook for every event it implements.
    pub fn lifecycle_hook<H: Hook + 'static>(mut self, hook: H) -> Self {
        self.hooks.register_lifecycle(Arc::new(hook));
        self
    }

    /// Prepares this request on its own, without any session defaults.
    pub fn prepare(&self) -> Result<PreparedRequest> {
        let mut p = PreparedRequest::new();
        p.prepare_method(&self.method)?;
        p.prepare_url(&self.url, &self.params)?;
        p.prepare_headers(&self.headers)?;
        p.prepare_cookies(self.cookies.as_ref());
        p.prepare_body(self.data.as_ref(), &self.files, self.json.as_ref())?;
        p.prepare_auth(self.auth.as_ref())?;
        p.prepare_hooks(&self.hooks);
        Ok(p)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("has_auth", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}
