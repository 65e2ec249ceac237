use crate::adapters::{AdapterRegistry, AsyncAdapter, AsyncHttpAdapter, SendSettings, SessionEvents};
use crate::config::SessionConfig;
use crate::errors::Result;
use crate::middleware::MiddlewareList;
use crate::models::{PreparedRequest, Request, Response};
use crate::session::{CallOptions, RedirectMachine, RedirectStep, SessionCore};
use crate::sgi::{AsgiAdapter, AsgiApp};
use std::sync::Arc;

/// Base URL of sessions bound to an in-process application.
const APP_BASE_URL: &str = "http://localhost";

/// Asynchronous session.
///
/// Same behavior as [`Session`](crate::session::Session), driving
/// [`AsyncAdapter`]s. Async hooks and middlewares are awaited, blocking ones
/// are called inline.
pub struct AsyncSession {
    core: SessionCore,
    adapters: AdapterRegistry<dyn AsyncAdapter>,
}

impl Default for AsyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncSession {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::from_core(SessionCore::new(config))
    }

    pub fn from_core(core: SessionCore) -> Self {
        let http: Arc<dyn AsyncAdapter> = Arc::new(AsyncHttpAdapter::new());
        Self::with_adapter(core, http)
    }

    /// A session whose `http://` and `https://` requests are served by `app`.
    ///
    /// Relative URLs are joined onto `http://localhost`.
    pub fn with_app<A: AsgiApp + 'static>(app: A) -> Self {
        let config = SessionConfig {
            base_url: Some(APP_BASE_URL.to_string()),
            ..SessionConfig::default()
        };
        let adapter: Arc<dyn AsyncAdapter> = Arc::new(AsgiAdapter::new(app));
        Self::with_adapter(SessionCore::new(config), adapter)
    }

    fn with_adapter(core: SessionCore, adapter: Arc<dyn AsyncAdapter>) -> Self {
        let mut adapters: AdapterRegistry<dyn AsyncAdapter> = AdapterRegistry::new();
        adapters.mount("https://", adapter.clone());
        adapters.mount("http://", adapter);
        AsyncSession { core, adapters }
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    pub fn mount<A: AsyncAdapter + 'static>(&mut self, prefix: impl Into<String>, adapter: A) {
        self.adapters.mount(prefix, Arc::new(adapter));
    }

    pub fn get_adapter(&self, url: &str) -> Result<Arc<dyn AsyncAdapter>> {
        self.adapters.get(url)
    }

    pub async fn close(&self) {
        for adapter in self.adapters.adapters() {
            adapter.close().await;
        }
    }

    pub async fn request(&self, request: Request, mut options: CallOptions) -> Result<Response> {
        let prepared = self.core.prepare_request(&request)?;
        if options.timeout.is_none() {
            options.timeout = Some(self.core.default_timeout(&prepared.method));
        }
        let settings = self.core.merge_environment_settings(&prepared.url, &options);
        self.dispatch(prepared, settings, &options).await
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(Request::new("GET", url), CallOptions::default()).await
    }

    pub async fn options(&self, url: &str) -> Result<Response> {
        self.request(Request::new("OPTIONS", url), CallOptions::default()).await
    }

    pub async fn head(&self, url: &str) -> Result<Response> {
        self.request(Request::new("HEAD", url), CallOptions::default().allow_redirects(false))
            .await
    }

    pub async fn post(&self, request: Request) -> Result<Response> {
        self.request(Request { method: "POST".into(), ..request }, CallOptions::default())
            .await
    }

    pub async fn put(&self, request: Request) -> Result<Response> {
        self.request(Request { method: "PUT".into(), ..request }, CallOptions::default())
            .await
    }

    pub async fn patch(&self, request: Request) -> Result<Response> {
        self.request(Request { method: "PATCH".into(), ..request }, CallOptions::default())
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.request(Request::new("DELETE", url), CallOptions::default()).await
    }

    pub async fn send(&self, request: PreparedRequest, options: CallOptions) -> Result<Response> {
        let settings = self.core.send_settings(&request, &options);
        self.dispatch(request, settings, &options).await
    }

    async fn dispatch(&self, request: PreparedRequest, settings: SendSettings, options: &CallOptions) -> Result<Response> {
        let middlewares = self.core.middlewares_for(options);
        let mut machine = RedirectMachine::new(&self.core, settings, &request);
        let mut response = self.send_once(request, machine.settings(), &middlewares).await?;

        if options.allow_redirects {
            loop {
                if response.is_redirect() {
                    response.drain_async().await;
                }
                match machine.advance(response)? {
                    RedirectStep::Follow(next) => {
                        response = self.send_once(*next, machine.settings(), &middlewares).await?;
                    }
                    RedirectStep::Done(done) => {
                        response = done;
                        break;
                    }
                }
            }
        } else {
            response.next = RedirectMachine::next_request(&self.core, machine.settings(), &response)?.map(Box::new);
        }

        if !machine.settings().stream {
            response.content_async().await?;
        }
        Ok(response)
    }

    async fn send_once(
        &self,
        request: PreparedRequest,
        settings: &SendSettings,
        middlewares: &MiddlewareList,
    ) -> Result<Response> {
        let mut request = self
            .core
            .async_run_pre_request(middlewares, request, settings)
            .await?;
        let adapter = self.adapters.get(&request.url)?;
        let events = SessionEvents {
            core: &self.core,
            middlewares,
            hooks: request.hooks.clone(),
            settings,
        };

        let start = self.core.clock().now();
        let sent = adapter.send(&mut request, settings, &events).await;
        let mut response = match sent {
            Ok(response) => response,
            Err(err) => match middlewares.async_handle_exception(&self.core, &request, &err).await {
                Some(response) => {
                    log::debug!("middleware recovered {} {}: {err}", request.method, request.url);
                    response
                }
                None => return Err(err),
            },
        };
        response.elapsed = self.core.clock().now().saturating_duration_since(start);

        let hooks = request.hooks.clone();
        response.request = Some(Box::new(request));
        let response = self
            .core
            .async_run_response(middlewares, &hooks, response, settings)
            .await?;
        self.core.persist_cookies(&response);
        Ok(response)
    }
}
