//! Lifecycle hooks.
//!
//! # Events
//! - `pre_request`: the prepared request was just built and may be altered or
//!   replaced before it is sent.
//! - `pre_send`: a connection was picked for the request.
//! - `on_upload`: a block of the request body was transmitted.
//! - `early_response`: an informational response (e.g. 103 Early Hints) arrived
//!   before the final one.
//! - `response`: the final response, which may be altered or replaced.
//!
//! # Dispatch
//! Handlers of an event run strictly in registration order. A handler that
//! returns `Some(value)` replaces the payload seen by the handlers after it.
//! The async dispatcher awaits [`AsyncHook`]s and calls blocking [`Hook`]s
//! inline; the blocking dispatcher refuses async handlers.
//!
//! Session hooks and request hooks are concatenated, session first.

pub mod limiters;

use crate::adapters::SendSettings;
use crate::errors::{HttpError, Result};
use crate::models::{PreparedRequest, Response};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookEvent {
    PreRequest,
    PreSend,
    OnUpload,
    EarlyResponse,
    Response,
}

impl HookEvent {
    pub const ALL: [HookEvent; 5] = [
        HookEvent::PreRequest,
        HookEvent::PreSend,
        HookEvent::OnUpload,
        HookEvent::EarlyResponse,
        HookEvent::Response,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreRequest => "pre_request",
            HookEvent::PreSend => "pre_send",
            HookEvent::OnUpload => "on_upload",
            HookEvent::EarlyResponse => "early_response",
            HookEvent::Response => "response",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self> {
        HookEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| HttpError::UnsupportedEvent(s.to_string()))
    }
}

/// Context handed to every hook invocation.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub event: HookEvent,
    /// Transport settings of the current send, when known.
    pub settings: Option<&'a SendSettings>,
}

impl<'a> HookContext<'a> {
    pub fn new(event: HookEvent, settings: Option<&'a SendSettings>) -> Self {
        HookContext { event, settings }
    }
}

/// Blocking lifecycle hook. Every method defaults to a no-op.
pub trait Hook: Send + Sync {
    fn pre_request(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        Ok(None)
    }

    fn pre_send(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        Ok(None)
    }

    fn on_upload(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        Ok(None)
    }

    fn early_response(&self, _response: &mut Response, _ctx: &HookContext<'_>) -> Result<Option<Response>> {
        Ok(None)
    }

    fn response(&self, _response: &mut Response, _ctx: &HookContext<'_>) -> Result<Option<Response>> {
        Ok(None)
    }
}

/// Asynchronous lifecycle hook. Every method defaults to a no-op.
#[async_trait]
pub trait AsyncHook: Send + Sync {
    async fn pre_request(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        Ok(None)
    }

    async fn pre_send(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        Ok(None)
    }

    async fn on_upload(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        Ok(None)
    }

    async fn early_response(
        &self,
        _response: &mut Response,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<Response>> {
        Ok(None)
    }

    async fn response(&self, _response: &mut Response, _ctx: &HookContext<'_>) -> Result<Option<Response>> {
        Ok(None)
    }
}

type RequestFn =
    dyn Fn(&mut PreparedRequest, &HookContext<'_>) -> Result<Option<PreparedRequest>> + Send + Sync;
type ResponseFn = dyn Fn(&mut Response, &HookContext<'_>) -> Result<Option<Response>> + Send + Sync;

struct RequestClosure(Box<RequestFn>);

impl Hook for RequestClosure {
    fn pre_request(&self, request: &mut PreparedRequest, ctx: &HookContext<'_>) -> Result<Option<PreparedRequest>> {
        (self.0)(request, ctx)
    }

    fn pre_send(&self, request: &mut PreparedRequest, ctx: &HookContext<'_>) -> Result<Option<PreparedRequest>> {
        (self.0)(request, ctx)
    }

    fn on_upload(&self, request: &mut PreparedRequest, ctx: &HookContext<'_>) -> Result<Option<PreparedRequest>> {
        (self.0)(request, ctx)
    }
}

struct ResponseClosure(Box<ResponseFn>);

impl Hook for ResponseClosure {
    fn early_response(&self, response: &mut Response, ctx: &HookContext<'_>) -> Result<Option<Response>> {
        (self.0)(response, ctx)
    }

    fn response(&self, response: &mut Response, ctx: &HookContext<'_>) -> Result<Option<Response>> {
        (self.0)(response, ctx)
    }
}

/// A registered handler.
#[derive(Clone)]
pub enum HookHandler {
    Blocking(Arc<dyn Hook>),
    Async(Arc<dyn AsyncHook>),
}

impl HookHandler {
    /// A closure handling the request events it is registered for.
    pub fn request<F>(f: F) -> Self
    where
        F: Fn(&mut PreparedRequest, &HookContext<'_>) -> Result<Option<PreparedRequest>> + Send + Sync + 'static,
    {
        HookHandler::Blocking(Arc::new(RequestClosure(Box::new(f))))
    }

    /// A closure handling the response events it is registered for.
    pub fn response<F>(f: F) -> Self
    where
        F: Fn(&mut Response, &HookContext<'_>) -> Result<Option<Response>> + Send + Sync + 'static,
    {
        HookHandler::Blocking(Arc::new(ResponseClosure(Box::new(f))))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, HookHandler::Async(_))
    }
}

impl fmt::Debug for HookHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookHandler::Blocking(_) => f.write_str("HookHandler::Blocking"),
            HookHandler::Async(_) => f.write_str("HookHandler::Async"),
        }
    }
}

/// Ordered handlers per event.
#[derive(Clone, Default)]
pub struct HookStore {
    handlers: BTreeMap<HookEvent, Vec<HookHandler>>,
}

impl HookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event: HookEvent, handler: HookHandler) {
        self.handlers.entry(event).or_default().push(handler);
    }

    pub fn register_hook(&mut self, event: HookEvent, hook: Arc<dyn Hook>) {
        self.register(event, HookHandler::Blocking(hook));
    }

    pub fn register_async(&mut self, event: HookEvent, hook: Arc<dyn AsyncHook>) {
        self.register(event, HookHandler::Async(hook));
    }

    /// Registers `hook` for every event.
    pub fn register_lifecycle(&mut self, hook: Arc<dyn Hook>) {
        for event in HookEvent::ALL {
            self.register_hook(event, hook.clone());
        }
    }

    /// Registers `hook` for every event.
    pub fn register_async_lifecycle(&mut self, hook: Arc<dyn AsyncHook>) {
        for event in HookEvent::ALL {
            self.register_async(event, hook.clone());
        }
    }

    pub fn handlers(&self, event: HookEvent) -> &[HookHandler] {
        self.handlers.get(&event).map(Vec::as_slice).unwrap_or_default()
    }

    /// Appends every handler of `other` after the ones already registered.
    pub fn extend(&mut self, other: &HookStore) {
        for (event, handlers) in &other.handlers {
            self.handlers
                .entry(*event)
                .or_default()
                .extend(handlers.iter().cloned());
        }
    }

    /// `first` followed by `second`.
    pub fn merged(first: &HookStore, second: &HookStore) -> HookStore {
        let mut store = first.clone();
        store.extend(second);
        store
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

impl fmt::Debug for HookStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (event, handlers) in &self.handlers {
            map.entry(&event.as_str(), &handlers.len());
        }
        map.finish()
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for crate::models::PreparedRequest {}
    impl Sealed for crate::models::Response {}
}

/// Values hooks are dispatched on: prepared requests and responses.
#[async_trait]
pub trait HookPayload: Sized + Send + sealed::Sealed {
    fn call_hook(hook: &dyn Hook, payload: &mut Self, ctx: &HookContext<'_>) -> Result<Option<Self>>;

    async fn call_async_hook(
        hook: &dyn AsyncHook,
        payload: &mut Self,
        ctx: &HookContext<'_>,
    ) -> Result<Option<Self>>;
}

#[async_trait]
impl HookPayload for PreparedRequest {
    fn call_hook(hook: &dyn Hook, payload: &mut Self, ctx: &HookContext<'_>) -> Result<Option<Self>> {
        match ctx.event {
            HookEvent::PreRequest => hook.pre_request(payload, ctx),
            HookEvent::PreSend => hook.pre_send(payload, ctx),
            HookEvent::OnUpload => hook.on_upload(payload, ctx),
            other => Err(HttpError::UnsupportedEvent(other.to_string())),
        }
    }

    async fn call_async_hook(
        hook: &dyn AsyncHook,
        payload: &mut Self,
        ctx: &HookContext<'_>,
    ) -> Result<Option<Self>> {
        match ctx.event {
            HookEvent::PreRequest => hook.pre_request(payload, ctx).await,
            HookEvent::PreSend => hook.pre_send(payload, ctx).await,
            HookEvent::OnUpload => hook.on_upload(payload, ctx).await,
            other => Err(HttpError::UnsupportedEvent(other.to_string())),
        }
    }
}

#[async_trait]
impl HookPayload for Response {
    fn call_hook(hook: &dyn Hook, payload: &mut Self, ctx: &HookContext<'_>) -> Result<Option<Self>> {
        match ctx.event {
            HookEvent::EarlyResponse => hook.early_response(payload, ctx),
            HookEvent::Response => hook.response(payload, ctx),
            other => Err(HttpError::UnsupportedEvent(other.to_string())),
        }
    }

    async fn call_async_hook(
        hook: &dyn AsyncHook,
        payload: &mut Self,
        ctx: &HookContext<'_>,
    ) -> Result<Option<Self>> {
        match ctx.event {
            HookEvent::EarlyResponse => hook.early_response(payload, ctx).await,
            HookEvent::Response => hook.response(payload, ctx).await,
            other => Err(HttpError::UnsupportedEvent(other.to_string())),
        }
    }
}

/// Runs the handlers of `ctx.event` on `payload`, folding replacements forward.
pub fn dispatch_hook<T: HookPayload>(hooks: &HookStore, mut payload: T, ctx: &HookContext<'_>) -> Result<T> {
    for handler in hooks.handlers(ctx.event) {
        log::trace!("dispatching {} hook", ctx.event);
        match handler {
            HookHandler::Blocking(hook) => {
                if let Some(replacement) = T::call_hook(hook.as_ref(), &mut payload, ctx)? {
                    payload = replacement;
                }
            }
            HookHandler::Async(_) => return Err(HttpError::AsyncHookInBlockingContext(ctx.event)),
        }
    }
    Ok(payload)
}

/// Async flavor of [`dispatch_hook`]. Handlers still run one after the other.
pub async fn async_dispatch_hook<T: HookPayload>(
    hooks: &HookStore,
    mut payload: T,
    ctx: &HookContext<'_>,
) -> Result<T> {
    for handler in hooks.handlers(ctx.event) {
        log::trace!("dispatching {} hook", ctx.event);
        let replacement = match handler {
            HookHandler::Blocking(hook) => T::call_hook(hook.as_ref(), &mut payload, ctx)?,
            HookHandler::Async(hook) => T::call_async_hook(hook.as_ref(), &mut payload, ctx).await?,
        };
        if let Some(replacement) = replacement {
            payload = replacement;
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use std::sync::Mutex;

    fn response() -> Response {
        Response::new(200, HeaderMap::new(), "http://example.com/")
    }

    #[test]
    fn event_names_round_trip() {
        for event in HookEvent::ALL {
            assert_eq!(event.as_str().parse::<HookEvent>().unwrap(), event);
        }
        assert!(matches!(
            "on_exception".parse::<HookEvent>(),
            Err(HttpError::UnsupportedEvent(_))
        ));
    }

    #[test]
    fn replacement_is_folded_forward() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookStore::new();

        // A swaps the response for a 201
        hooks.register(
            HookEvent::Response,
            HookHandler::response(|_, _| Ok(Some(Response::new(201, HeaderMap::new(), "http://a/")))),
        );
        let seen_b = seen.clone();
        hooks.register(
            HookEvent::Response,
            HookHandler::response(move |r, _| {
                seen_b.lock().unwrap().push(r.status);
                Ok(None)
            }),
        );

        let ctx = HookContext::new(HookEvent::Response, None);
        let out = dispatch_hook(&hooks, response(), &ctx).unwrap();
        assert_eq!(out.status, 201);
        assert_eq!(*seen.lock().unwrap(), vec![201]);
    }

    #[test]
    fn in_place_mutation_is_kept() {
        let mut hooks = HookStore::new();
        hooks.register(
            HookEvent::PreRequest,
            HookHandler::request(|r, _| {
                r.headers.insert("x-a", http::HeaderValue::from_static("1"));
                Ok(None)
            }),
        );
        hooks.register(
            HookEvent::PreRequest,
            HookHandler::request(|r, _| {
                assert!(r.headers.contains_key("x-a"));
                r.headers.insert("x-b", http::HeaderValue::from_static("2"));
                Ok(None)
            }),
        );
        let ctx = HookContext::new(HookEvent::PreRequest, None);
        let out = dispatch_hook(&hooks, PreparedRequest::new(), &ctx).unwrap();
        assert_eq!(out.headers.len(), 2);
    }

    struct Tagger(&'static str);

    #[async_trait]
    impl AsyncHook for Tagger {
        async fn response(&self, response: &mut Response, _ctx: &HookContext<'_>) -> Result<Option<Response>> {
            let prev = response
                .headers
                .get("x-order")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let value = format!("{prev}{}", self.0);
            response
                .headers
                .insert("x-order", http::HeaderValue::from_str(&value).unwrap());
            Ok(None)
        }
    }

    #[test]
    fn blocking_dispatch_rejects_async_handlers() {
        let mut hooks = HookStore::new();
        hooks.register_async(HookEvent::Response, Arc::new(Tagger("a")));
        let ctx = HookContext::new(HookEvent::Response, None);
        assert!(matches!(
            dispatch_hook(&hooks, response(), &ctx),
            Err(HttpError::AsyncHookInBlockingContext(HookEvent::Response))
        ));
    }

    #[tokio::test]
    async fn async_dispatch_mixes_handlers_in_order() {
        let mut hooks = HookStore::new();
        hooks.register_async(HookEvent::Response, Arc::new(Tagger("a")));
        hooks.register(
            HookEvent::Response,
            HookHandler::response(|r, _| {
                let prev = r.headers["x-order"].to_str().unwrap().to_string();
                r.headers
                    .insert("x-order", http::HeaderValue::from_str(&format!("{prev}b")).unwrap());
                Ok(None)
            }),
        );
        hooks.register_async(HookEvent::Response, Arc::new(Tagger("c")));

        let ctx = HookContext::new(HookEvent::Response, None);
        let out = async_dispatch_hook(&hooks, response(), &ctx).await.unwrap();
        assert_eq!(out.headers["x-order"], "abc");
    }

    #[test]
    fn merged_keeps_session_first() {
        let mut session = HookStore::new();
        session.register(HookEvent::Response, HookHandler::response(|_, _| Ok(None)));
        let mut request = HookStore::new();
        request.register_async(HookEvent::Response, Arc::new(Tagger("x")));

        let merged = HookStore::merged(&session, &request);
        let handlers = merged.handlers(HookEvent::Response);
        assert_eq!(handlers.len(), 2);
        assert!(!handlers[0].is_async());
        assert!(handlers[1].is_async());
        assert!(merged.handlers(HookEvent::PreSend).is_empty());
    }

    #[test]
    fn lifecycle_registers_every_event() {
        struct Noop;
        impl Hook for Noop {}

        let mut hooks = HookStore::new();
        hooks.register_lifecycle(Arc::new(Noop));
        assert_eq!(hooks.len(), 5);

        // a request payload cannot be dispatched on a response event
        let ctx = HookContext::new(HookEvent::Response, None);
        assert!(matches!(
            dispatch_hook(&hooks, PreparedRequest::new(), &ctx),
            Err(HttpError::UnsupportedEvent(_))
        ));
    }
}
