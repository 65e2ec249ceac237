//! Session level middlewares.
//!
//! Middlewares see the same lifecycle events as hooks but are attached to a
//! session (or to a single call) and receive the [`SessionCore`] they run in.
//! They mutate in place instead of returning replacements. On top of the hook
//! events they get `on_exception`, the one place where a transport failure can
//! be turned into a response.

use crate::errors::{HttpError, Result};
use crate::hooks::HookEvent;
use crate::models::{PreparedRequest, Response};
use crate::session::SessionCore;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub trait Middleware: Send + Sync {
    fn pre_request(&self, _session: &SessionCore, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    fn pre_send(&self, _session: &SessionCore, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    fn on_upload(&self, _session: &SessionCore, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    fn early_response(&self, _session: &SessionCore, _response: &mut Response) -> Result<()> {
        Ok(())
    }

    fn response(&self, _session: &SessionCore, _response: &mut Response) -> Result<()> {
        Ok(())
    }

    /// Called when the adapter failed. Returning a response recovers from the error.
    fn on_exception(
        &self,
        _session: &SessionCore,
        _request: &PreparedRequest,
        _error: &HttpError,
    ) -> Option<Response> {
        None
    }
}

#[async_trait]
pub trait AsyncMiddleware: Send + Sync {
    async fn pre_request(&self, _session: &SessionCore, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    async fn pre_send(&self, _session: &SessionCore, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    async fn on_upload(&self, _session: &SessionCore, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    async fn early_response(&self, _session: &SessionCore, _response: &mut Response) -> Result<()> {
        Ok(())
    }

    async fn response(&self, _session: &SessionCore, _response: &mut Response) -> Result<()> {
        Ok(())
    }

    async fn on_exception(
        &self,
        _session: &SessionCore,
        _request: &PreparedRequest,
        _error: &HttpError,
    ) -> Option<Response> {
        None
    }
}

#[derive(Clone)]
pub enum MiddlewareHandle {
    Blocking(Arc<dyn Middleware>),
    Async(Arc<dyn AsyncMiddleware>),
}

impl fmt::Debug for MiddlewareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareHandle::Blocking(_) => f.write_str("MiddlewareHandle::Blocking"),
            MiddlewareHandle::Async(_) => f.write_str("MiddlewareHandle::Async"),
        }
    }
}

/// Ordered middlewares.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareList {
    items: Vec<MiddlewareHandle>,
}

impl MiddlewareList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<M: Middleware + 'static>(&mut self, middleware: M) {
        self.items.push(MiddlewareHandle::Blocking(Arc::new(middleware)));
    }

    pub fn push_async<M: AsyncMiddleware + 'static>(&mut self, middleware: M) {
        self.items.push(MiddlewareHandle::Async(Arc::new(middleware)));
    }

    pub fn push_handle(&mut self, handle: MiddlewareHandle) {
        self.items.push(handle);
    }

    /// `first` followed by `second`.
    pub fn merged(first: &MiddlewareList, second: &MiddlewareList) -> MiddlewareList {
        let mut items = first.items.clone();
        items.extend(second.items.iter().cloned());
        MiddlewareList { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MiddlewareHandle> {
        self.items.iter()
    }

    /// Runs a request event on every middleware, in order.
    pub fn dispatch_request(
        &self,
        event: HookEvent,
        session: &SessionCore,
        request: &mut PreparedRequest,
    ) -> Result<()> {
        for item in &self.items {
            let MiddlewareHandle::Blocking(m) = item else {
                return Err(HttpError::AsyncHookInBlockingContext(event));
            };
            match event {
                HookEvent::PreRequest => m.pre_request(session, request)?,
                HookEvent::PreSend => m.pre_send(session, request)?,
                HookEvent::OnUpload => m.on_upload(session, request)?,
                other => return Err(HttpError::UnsupportedEvent(other.to_string())),
            }
        }
        Ok(())
    }

    /// Runs a response event on every middleware, in order.
    pub fn dispatch_response(
        &self,
        event: HookEvent,
        session: &SessionCore,
        response: &mut Response,
    ) -> Result<()> {
        for item in &self.items {
            let MiddlewareHandle::Blocking(m) = item else {
                return Err(HttpError::AsyncHookInBlockingContext(event));
            };
            match event {
                HookEvent::EarlyResponse => m.early_response(session, response)?,
                HookEvent::Response => m.response(session, response)?,
                other => return Err(HttpError::UnsupportedEvent(other.to_string())),
            }
        }
        Ok(())
    }

    pub async fn async_dispatch_request(
        &self,
        event: HookEvent,
        session: &SessionCore,
        request: &mut PreparedRequest,
    ) -> Result<()> {
        for item in &self.items {
            match (item, event) {
                (MiddlewareHandle::Blocking(m), HookEvent::PreRequest) => m.pre_request(session, request)?,
                (MiddlewareHandle::Blocking(m), HookEvent::PreSend) => m.pre_send(session, request)?,
                (MiddlewareHandle::Blocking(m), HookEvent::OnUpload) => m.on_upload(session, request)?,
                (MiddlewareHandle::Async(m), HookEvent::PreRequest) => m.pre_request(session, request).await?,
                (MiddlewareHandle::Async(m), HookEvent::PreSend) => m.pre_send(session, request).await?,
                (MiddlewareHandle::Async(m), HookEvent::OnUpload) => m.on_upload(session, request).await?,
                (_, other) => return Err(HttpError::UnsupportedEvent(other.to_string())),
            }
        }
        Ok(())
    }

    pub async fn async_dispatch_response(
        &self,
        event: HookEvent,
        session: &SessionCore,
        response: &mut Response,
    ) -> Result<()> {
        for item in &self.items {
            match (item, event) {
                (MiddlewareHandle::Blocking(m), HookEvent::EarlyResponse) => m.early_response(session, response)?,
                (MiddlewareHandle::Blocking(m), HookEvent::Response) => m.response(session, response)?,
                (MiddlewareHandle::Async(m), HookEvent::EarlyResponse) => {
                    m.early_response(session, response).await?
                }
                (MiddlewareHandle::Async(m), HookEvent::Response) => m.response(session, response).await?,
                (_, other) => return Err(HttpError::UnsupportedEvent(other.to_string())),
            }
        }
        Ok(())
    }

    /// Offers `error` to every middleware. The first recovery response wins,
    /// but every middleware is still called. Async middlewares are skipped.
    pub fn handle_exception(
        &self,
        session: &SessionCore,
        request: &PreparedRequest,
        error: &HttpError,
    ) -> Option<Response> {
        let mut recovered = None;
        for item in &self.items {
            match item {
                MiddlewareHandle::Blocking(m) => {
                    if let Some(response) = m.on_exception(session, request, error) {
                        recovered.get_or_insert(response);
                    }
                }
                MiddlewareHandle::Async(_) => {
                    log::warn!("async middleware skipped in blocking on_exception dispatch");
                }
            }
        }
        recovered
    }

    pub async fn async_handle_exception(
        &self,
        session: &SessionCore,
        request: &PreparedRequest,
        error: &HttpError,
    ) -> Option<Response> {
        let mut recovered = None;
        for item in &self.items {
            let response = match item {
                MiddlewareHandle::Blocking(m) => m.on_exception(session, request, error),
                MiddlewareHandle::Async(m) => m.on_exception(session, request, error).await,
            };
            if let Some(response) = response {
                recovered.get_or_insert(response);
            }
        }
        recovered
    }
}
