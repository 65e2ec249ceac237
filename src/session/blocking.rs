use crate::adapters::{Adapter, AdapterRegistry, HttpAdapter, SendSettings, SessionEvents};
use crate::config::SessionConfig;
use crate::errors::Result;
use crate::middleware::MiddlewareList;
use crate::models::{PreparedRequest, Request, Response};
use crate::session::{CallOptions, RedirectMachine, RedirectStep, SessionCore};
use std::sync::Arc;

/// Blocking session.
///
/// Keeps cookies and defaults across requests and follows redirects. Adapters
/// for `http://` and `https://` are mounted on creation.
pub struct Session {
    core: SessionCore,
    adapters: AdapterRegistry<dyn Adapter>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::from_core(SessionCore::new(config))
    }

    pub fn from_core(core: SessionCore) -> Self {
        let mut adapters: AdapterRegistry<dyn Adapter> = AdapterRegistry::new();
        let http: Arc<dyn Adapter> = Arc::new(HttpAdapter::new());
        adapters.mount("https://", http.clone());
        adapters.mount("http://", http);
        Session { core, adapters }
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    /// Routes every URL starting with `prefix` to `adapter`.
    pub fn mount<A: Adapter + 'static>(&mut self, prefix: impl Into<String>, adapter: A) {
        self.adapters.mount(prefix, Arc::new(adapter));
    }

    pub fn get_adapter(&self, url: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters.get(url)
    }

    /// Closes every mounted adapter.
    pub fn close(&self) {
        for adapter in self.adapters.adapters() {
            adapter.close();
        }
    }

    /// Prepares `request` against the session defaults and sends it.
    ///
    /// Without an explicit timeout the method default of the session config applies.
    pub fn request(&self, request: Request, mut options: CallOptions) -> Result<Response> {
        let prepared = self.core.prepare_request(&request)?;
        if options.timeout.is_none() {
            options.timeout = Some(self.core.default_timeout(&prepared.method));
        }
        let settings = self.core.merge_environment_settings(&prepared.url, &options);
        self.dispatch(prepared, settings, &options)
    }

    pub fn get(&self, url: &str) -> Result<Response> {
        self.request(Request::new("GET", url), CallOptions::default())
    }

    pub fn options(&self, url: &str) -> Result<Response> {
        self.request(Request::new("OPTIONS", url), CallOptions::default())
    }

    /// HEAD does not follow redirects.
    pub fn head(&self, url: &str) -> Result<Response> {
        self.request(Request::new("HEAD", url), CallOptions::default().allow_redirects(false))
    }

    pub fn post(&self, request: Request) -> Result<Response> {
        self.request(Request { method: "POST".into(), ..request }, CallOptions::default())
    }

    pub fn put(&self, request: Request) -> Result<Response> {
        self.request(Request { method: "PUT".into(), ..request }, CallOptions::default())
    }

    pub fn patch(&self, request: Request) -> Result<Response> {
        self.request(Request { method: "PATCH".into(), ..request }, CallOptions::default())
    }

    pub fn delete(&self, url: &str) -> Result<Response> {
        self.request(Request::new("DELETE", url), CallOptions::default())
    }

    /// Sends an already prepared request.
    pub fn send(&self, request: PreparedRequest, options: CallOptions) -> Result<Response> {
        let settings = self.core.send_settings(&request, &options);
        self.dispatch(request, settings, &options)
    }

    fn dispatch(&self, request: PreparedRequest, settings: SendSettings, options: &CallOptions) -> Result<Response> {
        let middlewares = self.core.middlewares_for(options);
        let mut machine = RedirectMachine::new(&self.core, settings, &request);
        let mut response = self.send_once(request, machine.settings(), &middlewares)?;

        if options.allow_redirects {
            loop {
                if response.is_redirect() {
                    response.drain();
                }
                match machine.advance(response)? {
                    RedirectStep::Follow(next) => {
                        response = self.send_once(*next, machine.settings(), &middlewares)?;
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
            response.content()?;
        }
        Ok(response)
    }

    /// One exchange: `pre_request`, adapter, `response`, cookies.
    fn send_once(
        &self,
        request: PreparedRequest,
        settings: &SendSettings,
        middlewares: &MiddlewareList,
    ) -> Result<Response> {
        let mut request = self.core.run_pre_request(middlewares, request, settings)?;
        let adapter = self.adapters.get(&request.url)?;
        let events = SessionEvents {
            core: &self.core,
            middlewares,
            hooks: request.hooks.clone(),
            settings,
        };

        let start = self.core.clock().now();
        let mut response = match adapter.send(&mut request, settings, &events) {
            Ok(response) => response,
            Err(err) => match middlewares.handle_exception(&self.core, &request, &err) {
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
        let response = self.core.run_response(middlewares, &hooks, response, settings)?;
        self.core.persist_cookies(&response);
        Ok(response)
    }
}
