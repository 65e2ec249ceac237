//! Transport adapters.
//!
//! An adapter performs one network exchange for a prepared request and hands
//! back a response whose body may still be unread. It never follows redirects
//! and never stores cookies; both belong to the session.
//!
//! Sessions keep adapters in an [`AdapterRegistry`] keyed by URL prefix. The
//! longest matching prefix wins.

mod client;

pub use client::{AsyncHttpAdapter, HttpAdapter};

use crate::errors::{HttpError, Result};
use crate::hooks::{async_dispatch_hook, dispatch_hook, HookContext, HookEvent, HookStore};
use crate::middleware::MiddlewareList;
use crate::models::{PreparedRequest, Response};
use crate::proxies::Proxies;
use crate::session::SessionCore;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Server certificate verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerify {
    Enabled(bool),
    /// Verify against the certificates of a PEM bundle.
    CaBundle(PathBuf),
}

impl Default for TlsVerify {
    fn default() -> Self {
        TlsVerify::Enabled(true)
    }
}

/// Client certificate. `key` may be omitted when `cert` holds both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCert {
    pub cert: PathBuf,
    pub key: Option<PathBuf>,
}

/// Per-send transport settings.
#[derive(Debug, Clone, Default)]
pub struct SendSettings {
    pub stream: bool,
    pub timeout: Option<Duration>,
    pub verify: TlsVerify,
    pub cert: Option<ClientCert>,
    pub proxies: Proxies,
}

/// Lifecycle events an adapter reports while it sends.
pub trait TransportEvents: Send + Sync {
    /// A connection was picked for `request`.
    fn pre_send(&self, request: &mut PreparedRequest) -> Result<()>;

    /// Part of the body of `request` was transmitted.
    fn on_upload(&self, request: &mut PreparedRequest) -> Result<()>;

    /// An informational response arrived ahead of the final one.
    fn early_response(&self, response: Response) -> Result<Response>;
}

#[async_trait]
pub trait AsyncTransportEvents: Send + Sync {
    async fn pre_send(&self, request: &mut PreparedRequest) -> Result<()>;

    async fn on_upload(&self, request: &mut PreparedRequest) -> Result<()>;

    async fn early_response(&self, response: Response) -> Result<Response>;
}

/// Event sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl TransportEvents for NoEvents {
    fn pre_send(&self, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    fn on_upload(&self, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    fn early_response(&self, response: Response) -> Result<Response> {
        Ok(response)
    }
}

#[async_trait]
impl AsyncTransportEvents for NoEvents {
    async fn pre_send(&self, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    async fn on_upload(&self, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    async fn early_response(&self, response: Response) -> Result<Response> {
        Ok(response)
    }
}

/// Event sink of a session: middlewares first, then the hooks of the request.
pub(crate) struct SessionEvents<'a> {
    pub(crate) core: &'a SessionCore,
    pub(crate) middlewares: &'a MiddlewareList,
    pub(crate) hooks: HookStore,
    pub(crate) settings: &'a SendSettings,
}

impl SessionEvents<'_> {
    fn request_event(&self, event: HookEvent, request: &mut PreparedRequest) -> Result<()> {
        self.middlewares.dispatch_request(event, self.core, request)?;
        let ctx = HookContext::new(event, Some(self.settings));
        *request = dispatch_hook(&self.hooks, std::mem::take(request), &ctx)?;
        Ok(())
    }

    async fn async_request_event(&self, event: HookEvent, request: &mut PreparedRequest) -> Result<()> {
        self.middlewares
            .async_dispatch_request(event, self.core, request)
            .await?;
        let ctx = HookContext::new(event, Some(self.settings));
        *request = async_dispatch_hook(&self.hooks, std::mem::take(request), &ctx).await?;
        Ok(())
    }
}

impl TransportEvents for SessionEvents<'_> {
    fn pre_send(&self, request: &mut PreparedRequest) -> Result<()> {
        self.request_event(HookEvent::PreSend, request)
    }

    fn on_upload(&self, request: &mut PreparedRequest) -> Result<()> {
        self.request_event(HookEvent::OnUpload, request)
    }

    fn early_response(&self, mut response: Response) -> Result<Response> {
        self.middlewares
            .dispatch_response(HookEvent::EarlyResponse, self.core, &mut response)?;
        let ctx = HookContext::new(HookEvent::EarlyResponse, Some(self.settings));
        dispatch_hook(&self.hooks, response, &ctx)
    }
}

#[async_trait]
impl<'a> AsyncTransportEvents for SessionEvents<'a> {
    async fn pre_send(&self, request: &mut PreparedRequest) -> Result<()> {
        self.async_request_event(HookEvent::PreSend, request).await
    }

    async fn on_upload(&self, request: &mut PreparedRequest) -> Result<()> {
        self.async_request_event(HookEvent::OnUpload, request).await
    }

    async fn early_response(&self, mut response: Response) -> Result<Response> {
        self.middlewares
            .async_dispatch_response(HookEvent::EarlyResponse, self.core, &mut response)
            .await?;
        let ctx = HookContext::new(HookEvent::EarlyResponse, Some(self.settings));
        async_dispatch_hook(&self.hooks, response, &ctx).await
    }
}

/// Blocking transport.
pub trait Adapter: Send + Sync {
    fn send(
        &self,
        request: &mut PreparedRequest,
        settings: &SendSettings,
        events: &dyn TransportEvents,
    ) -> Result<Response>;

    fn close(&self) {}
}

/// Asynchronous transport.
#[async_trait]
pub trait AsyncAdapter: Send + Sync {
    async fn send(
        &self,
        request: &mut PreparedRequest,
        settings: &SendSettings,
        events: &dyn AsyncTransportEvents,
    ) -> Result<Response>;

    async fn close(&self) {}
}

/// Adapters keyed by URL prefix, longest prefix first.
pub struct AdapterRegistry<A: ?Sized> {
    entries: Vec<(String, Arc<A>)>,
}

impl<A: ?Sized> Default for AdapterRegistry<A> {
    fn default() -> Self {
        AdapterRegistry { entries: Vec::new() }
    }
}

impl<A: ?Sized> Clone for AdapterRegistry<A> {
    fn clone(&self) -> Self {
        AdapterRegistry {
            entries: self.entries.clone(),
        }
    }
}

impl<A: ?Sized> AdapterRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` for `prefix`, replacing any adapter already mounted
    /// there. Entries stay sorted by descending prefix length; equal lengths
    /// keep their mount order.
    pub fn mount(&mut self, prefix: impl Into<String>, adapter: Arc<A>) {
        let prefix = prefix.into();
        self.entries.retain(|(p, _)| *p != prefix);
        let at = self
            .entries
            .iter()
            .position(|(p, _)| p.len() < prefix.len())
            .unwrap_or(self.entries.len());
        self.entries.insert(at, (prefix, adapter));
    }

    /// The adapter for `url`, compared case-insensitively.
    pub fn get(&self, url: &str) -> Result<Arc<A>> {
        let lower = url.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(prefix, _)| lower.starts_with(&prefix.to_ascii_lowercase()))
            .map(|(prefix, adapter)| {
                log::debug!("adapter {prefix:?} selected for {url}");
                adapter.clone()
            })
            .ok_or_else(|| HttpError::InvalidSchema(url.to_string()))
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<A>> {
        self.entries.iter().map(|(_, a)| a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    struct Named(&'static str);

    impl Adapter for Named {
        fn send(&self, request: &mut PreparedRequest, _: &SendSettings, _: &dyn TransportEvents) -> Result<Response> {
            let mut headers = HeaderMap::new();
            headers.insert("x-adapter", http::HeaderValue::from_static(self.0));
            Ok(Response::new(200, headers, request.url.clone()))
        }
    }

    fn name_of(registry: &AdapterRegistry<dyn Adapter>, url: &str) -> String {
        let mut request = PreparedRequest::new();
        request.url = url.to_string();
        let response = registry
            .get(url)
            .unwrap()
            .send(&mut request, &SendSettings::default(), &NoEvents)
            .unwrap();
        response.headers["x-adapter"].to_str().unwrap().to_string()
    }

    #[test]
    fn longest_prefix_wins() {
        let mut registry: AdapterRegistry<dyn Adapter> = AdapterRegistry::new();
        registry.mount("http://", Arc::new(Named("plain")));
        registry.mount("http://example.com/api", Arc::new(Named("api")));
        registry.mount("http://example.com", Arc::new(Named("site")));

        assert_eq!(
            registry.prefixes().collect::<Vec<_>>(),
            vec!["http://example.com/api", "http://example.com", "http://"]
        );
        assert_eq!(name_of(&registry, "http://example.com/api/v1"), "api");
        assert_eq!(name_of(&registry, "HTTP://EXAMPLE.COM/other"), "site");
        assert_eq!(name_of(&registry, "http://other.test/"), "plain");
    }

    #[test]
    fn remount_replaces() {
        let mut registry: AdapterRegistry<dyn Adapter> = AdapterRegistry::new();
        registry.mount("http://", Arc::new(Named("one")));
        registry.mount("http://", Arc::new(Named("two")));
        assert_eq!(registry.prefixes().count(), 1);
        assert_eq!(name_of(&registry, "http://x.test/"), "two");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let mut registry: AdapterRegistry<dyn Adapter> = AdapterRegistry::new();
        registry.mount("https://", Arc::new(Named("tls")));
        assert!(matches!(
            registry.get("ftp://example.com/"),
            Err(HttpError::InvalidSchema(_))
        ));
    }
}
