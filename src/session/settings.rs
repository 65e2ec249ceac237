use crate::adapters::{ClientCert, SendSettings, TlsVerify};
use crate::auth::{get_netrc_auth, AuthHandler, BasicAuth};
use crate::clock::{default_clock, ClockHandle};
use crate::config::SessionConfig;
use crate::cookies::{CookieJar, CookieJarHandle};
use crate::env::{Environment, EnvironmentHandle, ProcessEnvironment};
use crate::errors::Result;
use crate::hooks::{async_dispatch_hook, dispatch_hook, HookContext, HookEvent, HookStore};
use crate::middleware::{MiddlewareHandle, MiddlewareList};
use crate::models::{PreparedRequest, Request, Response};
use crate::proxies::{get_environ_proxies, resolve_proxies, Proxies};
use http::HeaderMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

/// Per-call overrides of the session defaults.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Total time allowed for the exchange. Unset means the method default
    /// when going through `request`, and no limit for a direct `send`.
    pub timeout: Option<Duration>,
    pub allow_redirects: bool,
    pub proxies: Option<Proxies>,
    pub stream: Option<bool>,
    pub verify: Option<TlsVerify>,
    pub cert: Option<ClientCert>,
    /// Run after the session middlewares, for this call only.
    pub middlewares: MiddlewareList,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            timeout: None,
            allow_redirects: true,
            proxies: None,
            stream: None,
            verify: None,
            cert: None,
            middlewares: MiddlewareList::new(),
        }
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    pub fn proxies(mut self, proxies: Proxies) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn verify(mut self, verify: TlsVerify) -> Self {
        self.verify = Some(verify);
        self
    }

    pub fn cert(mut self, cert: ClientCert) -> Self {
        self.cert = Some(cert);
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareHandle) -> Self {
        self.middlewares.push_handle(middleware);
        self
    }
}

/// Defaults and shared state of a session.
///
/// Cloning a core shares its cookie jar.
#[derive(Clone)]
pub struct SessionCore {
    pub headers: HeaderMap,
    pub auth: Option<Arc<dyn AuthHandler>>,
    pub proxies: Proxies,
    pub hooks: HookStore,
    pub params: Vec<(String, String)>,
    pub stream: bool,
    pub verify: TlsVerify,
    pub cert: Option<ClientCert>,
    pub max_redirects: usize,
    pub trust_env: bool,
    pub middlewares: MiddlewareList,
    /// Prefix joined with request URLs that carry no scheme.
    pub base_url: Option<String>,
    config: SessionConfig,
    cookies: CookieJarHandle,
    env: EnvironmentHandle,
    clock: ClockHandle,
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionCore {
    pub fn new(config: SessionConfig) -> Self {
        SessionCore {
            headers: config.default_headers(),
            auth: None,
            proxies: Proxies::new(),
            hooks: HookStore::new(),
            params: Vec::new(),
            stream: config.stream,
            verify: TlsVerify::default(),
            cert: None,
            max_redirects: config.max_redirects,
            trust_env: config.trust_env,
            middlewares: MiddlewareList::new(),
            base_url: config.base_url.clone(),
            config,
            cookies: CookieJar::new().into_handle(),
            env: Arc::new(ProcessEnvironment),
            clock: default_clock(),
        }
    }

    /// Replaces the source of environment variables.
    pub fn with_environment<E: Environment + 'static>(mut self, env: E) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn with_clock(mut self, clock: ClockHandle) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn environment(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    /// The long-lived cookie jar.
    pub fn cookies(&self) -> &CookieJarHandle {
        &self.cookies
    }

    /// A snapshot of the cookie jar.
    pub fn cookie_jar(&self) -> CookieJar {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Default timeout of a request going through `request`.
    pub fn default_timeout(&self, method: &http::Method) -> Duration {
        self.config.timeout_for(method)
    }

    /// Joins relative URLs onto `base_url`.
    pub fn resolve_url(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.contains("://") => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            _ => url.to_string(),
        }
    }

    /// Builds a [`PreparedRequest`] from `request` and the session defaults.
    ///
    /// Request values win over session ones. A header explicitly unset on the
    /// request removes the session header of the same name. Without any
    /// configured auth, netrc credentials are used when `trust_env` is set.
    pub fn prepare_request(&self, request: &Request) -> Result<PreparedRequest> {
        let url = self.resolve_url(&request.url);

        let mut cookies = self.cookie_jar();
        if let Some(request_cookies) = &request.cookies {
            cookies.merge(request_cookies);
        }

        let mut auth = request.auth.clone().or_else(|| self.auth.clone());
        if auth.is_none() && self.trust_env {
            if let Some((username, password)) = get_netrc_auth(self.environment(), &url) {
                auth = Some(Arc::new(BasicAuth::new(username, password)));
            }
        }

        let headers = merge_headers(&self.headers, &request.headers);
        let params = merge_params(&self.params, &request.params);
        let hooks = HookStore::merged(&self.hooks, &request.hooks);

        let mut p = PreparedRequest::new();
        p.prepare_method(&request.method)?;
        p.prepare_url(&url, &params)?;
        p.prepare_headers(&headers)?;
        p.prepare_cookies(Some(&cookies));
        p.prepare_body(request.data.as_ref(), &request.files, request.json.as_ref())?;
        p.prepare_auth(auth.as_ref())?;
        p.prepare_hooks(&hooks);
        Ok(p)
    }

    /// Combines call options, environment and session defaults for `url`.
    ///
    /// Proxies from the call win, then environment proxies, then the session
    /// ones. With `trust_env`, `REQUESTS_CA_BUNDLE` or `CURL_CA_BUNDLE` replace a
    /// plain "verify" setting.
    pub fn merge_environment_settings(&self, url: &str, options: &CallOptions) -> SendSettings {
        let mut proxies = options.proxies.clone().unwrap_or_default();
        let mut verify = options.verify.clone();

        if self.trust_env {
            let no_proxy = proxies.get("no_proxy").cloned();
            for (key, value) in get_environ_proxies(self.environment(), url, no_proxy.as_deref()) {
                proxies.entry(key).or_insert(value);
            }

            if matches!(verify, None | Some(TlsVerify::Enabled(true))) {
                let bundle = self
                    .env
                    .var("REQUESTS_CA_BUNDLE")
                    .filter(|v| !v.is_empty())
                    .or_else(|| self.env.var("CURL_CA_BUNDLE").filter(|v| !v.is_empty()));
                if let Some(bundle) = bundle {
                    verify = Some(TlsVerify::CaBundle(PathBuf::from(bundle)));
                }
            }
        }

        for (key, value) in &self.proxies {
            proxies.entry(key.clone()).or_insert_with(|| value.clone());
        }

        SendSettings {
            stream: options.stream.unwrap_or(self.stream),
            timeout: options.timeout,
            verify: verify.unwrap_or_else(|| self.verify.clone()),
            cert: options.cert.clone().or_else(|| self.cert.clone()),
            proxies,
        }
    }

    /// Settings of a direct `send`: call options over session defaults, with
    /// proxies resolved for the request when the call gives none.
    pub fn send_settings(&self, request: &PreparedRequest, options: &CallOptions) -> SendSettings {
        let proxies = match &options.proxies {
            Some(proxies) => proxies.clone(),
            None => resolve_proxies(self.environment(), request, &self.proxies, self.trust_env),
        };
        SendSettings {
            stream: options.stream.unwrap_or(self.stream),
            timeout: options.timeout,
            verify: options.verify.clone().unwrap_or_else(|| self.verify.clone()),
            cert: options.cert.clone().or_else(|| self.cert.clone()),
            proxies,
        }
    }

    /// Session middlewares followed by the call ones.
    pub(crate) fn middlewares_for(&self, options: &CallOptions) -> MiddlewareList {
        MiddlewareList::merged(&self.middlewares, &options.middlewares)
    }

    /// Stores the cookies a response sets, in the context of its request URL.
    pub(crate) fn persist_cookies(&self, response: &Response) {
        let url = response
            .request
            .as_ref()
            .map_or(response.url.as_str(), |r| r.url.as_str());
        let Ok(url) = url::Url::parse(url) else {
            return;
        };
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extract(&url, &response.headers);
    }

    pub(crate) fn run_pre_request(
        &self,
        middlewares: &MiddlewareList,
        mut request: PreparedRequest,
        settings: &SendSettings,
    ) -> Result<PreparedRequest> {
        middlewares.dispatch_request(HookEvent::PreRequest, self, &mut request)?;
        let hooks = request.hooks.clone();
        let ctx = HookContext::new(HookEvent::PreRequest, Some(settings));
        dispatch_hook(&hooks, request, &ctx)
    }

    pub(crate) async fn async_run_pre_request(
        &self,
        middlewares: &MiddlewareList,
        mut request: PreparedRequest,
        settings: &SendSettings,
    ) -> Result<PreparedRequest> {
        middlewares
            .async_dispatch_request(HookEvent::PreRequest, self, &mut request)
            .await?;
        let hooks = request.hooks.clone();
        let ctx = HookContext::new(HookEvent::PreRequest, Some(settings));
        async_dispatch_hook(&hooks, request, &ctx).await
    }

    pub(crate) fn run_response(
        &self,
        middlewares: &MiddlewareList,
        hooks: &HookStore,
        mut response: Response,
        settings: &SendSettings,
    ) -> Result<Response> {
        middlewares.dispatch_response(HookEvent::Response, self, &mut response)?;
        let ctx = HookContext::new(HookEvent::Response, Some(settings));
        dispatch_hook(hooks, response, &ctx)
    }

    pub(crate) async fn async_run_response(
        &self,
        middlewares: &MiddlewareList,
        hooks: &HookStore,
        mut response: Response,
        settings: &SendSettings,
    ) -> Result<Response> {
        middlewares
            .async_dispatch_response(HookEvent::Response, self, &mut response)
            .await?;
        let ctx = HookContext::new(HookEvent::Response, Some(settings));
        async_dispatch_hook(hooks, response, &ctx).await
    }
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("headers", &self.headers)
            .field("proxies", &self.proxies)
            .field("hooks", &self.hooks)
            .field("max_redirects", &self.max_redirects)
            .field("trust_env", &self.trust_env)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn merge_headers(session: &HeaderMap, request: &[(String, Option<String>)]) -> Vec<(String, Option<String>)> {
    let mut merged: Vec<(String, Option<String>)> = session
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Some(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    for (name, value) in request {
        merged.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        merged.push((name.clone(), value.clone()));
    }
    merged
}

fn merge_params(session: &[(String, String)], request: &[(String, String)]) -> Vec<(String, String)> {
    session
        .iter()
        .filter(|(key, _)| !request.iter().any(|(k, _)| k == key))
        .chain(request)
        .cloned()
        .collect()
}
