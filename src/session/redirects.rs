use crate::adapters::SendSettings;
use crate::auth::{get_netrc_auth, AuthHandler, BasicAuth};
use crate::errors::{HttpError, Result};
use crate::models::{requote_uri, Body, BodyPosition, PreparedRequest, Response};
use crate::proxies::{rebuild_proxy_auth, resolve_proxies};
use crate::session::SessionCore;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, TRANSFER_ENCODING};
use http::Method;
use std::sync::Arc;
use url::Url;

/// Outcome of feeding a response to a [`RedirectMachine`].
#[derive(Debug)]
pub enum RedirectStep {
    /// Send this request next.
    Follow(Box<PreparedRequest>),
    /// The chain ended. The response carries the redirects that led to it.
    Done(Response),
}

/// Follows a redirect chain one response at a time.
///
/// The machine never sends anything itself. The session drains each redirect
/// body, feeds the response to [`RedirectMachine::advance`] and sends the
/// request it gets back with [`RedirectMachine::settings`].
pub struct RedirectMachine<'a> {
    core: &'a SessionCore,
    settings: SendSettings,
    history: Vec<Response>,
    previous_fragment: Option<String>,
}

impl<'a> RedirectMachine<'a> {
    pub fn new(core: &'a SessionCore, settings: SendSettings, request: &PreparedRequest) -> Self {
        RedirectMachine {
            core,
            settings,
            history: Vec::new(),
            previous_fragment: fragment_of(&request.url),
        }
    }

    /// Settings for the next hop. Proxies are re-resolved on every hop.
    pub fn settings(&self) -> &SendSettings {
        &self.settings
    }

    pub fn history(&self) -> &[Response] {
        &self.history
    }

    /// Consumes the latest response of the chain.
    ///
    /// Fails with [`HttpError::TooManyRedirects`] once `max_redirects` redirect
    /// responses were received.
    pub fn advance(&mut self, mut response: Response) -> Result<RedirectStep> {
        let Some(location) = redirect_target(&response) else {
            response.history = std::mem::take(&mut self.history);
            return Ok(RedirectStep::Done(response));
        };

        if self.history.len() + 1 >= self.core.max_redirects {
            response.history = std::mem::take(&mut self.history);
            return Err(HttpError::TooManyRedirects {
                max: self.core.max_redirects,
                response: Box::new(response),
            });
        }

        let next = self.rebuild(&location, &response)?;
        self.history.push(response);
        Ok(RedirectStep::Follow(Box::new(next)))
    }

    /// Computes the request a redirect response points to, without following it.
    pub fn next_request(
        core: &SessionCore,
        settings: &SendSettings,
        response: &Response,
    ) -> Result<Option<PreparedRequest>> {
        let Some(location) = redirect_target(response) else {
            return Ok(None);
        };
        let previous_fragment = response
            .request
            .as_ref()
            .and_then(|r| fragment_of(&r.url));
        let mut machine = RedirectMachine {
            core,
            settings: settings.clone(),
            history: Vec::new(),
            previous_fragment,
        };
        machine.rebuild(&location, response).map(Some)
    }

    fn rebuild(&mut self, location: &str, response: &Response) -> Result<PreparedRequest> {
        let previous = match response.request.as_deref() {
            Some(request) => request.clone(),
            None => {
                let mut request = PreparedRequest::new();
                request.url = response.url.clone();
                request
            }
        };
        let mut next = previous.clone();

        next.url = self.resolve_location(location, &response.url)?;
        log::debug!("{} redirect from {} to {}", response.status, previous.url, next.url);

        rebuild_method(&mut next, response.status);

        if !matches!(response.status, 307 | 308) {
            for name in [CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING] {
                next.headers.remove(name);
            }
            next.body = None;
        }

        next.headers.remove(COOKIE);
        let mut jar = std::mem::take(&mut next.cookies);
        if let Ok(previous_url) = Url::parse(&previous.url) {
            jar.extract(&previous_url, &response.headers);
        }
        jar.merge(&self.core.cookie_jar());
        next.prepare_cookies(Some(&jar));

        self.rebuild_auth(&mut next, &previous.url)?;

        let proxies = resolve_proxies(
            self.core.environment(),
            &next,
            &self.settings.proxies,
            self.core.trust_env,
        );
        rebuild_proxy_auth(&mut next, &proxies)?;
        self.settings.proxies = proxies;

        let rewindable = next.body_position.is_some()
            && (next.headers.contains_key(CONTENT_LENGTH) || next.headers.contains_key(TRANSFER_ENCODING));
        if rewindable {
            rewind_body(&next)?;
        }
        Ok(next)
    }

    fn resolve_location(&mut self, location: &str, response_url: &str) -> Result<String> {
        let mut location = location.to_string();
        if location.starts_with("//") {
            let scheme = Url::parse(response_url)
                .map(|u| u.scheme().to_string())
                .unwrap_or_else(|_| "http".to_string());
            location = format!("{scheme}:{location}");
        }

        match location.split_once('#') {
            Some((_, fragment)) if !fragment.is_empty() => {
                self.previous_fragment = Some(fragment.to_string());
            }
            split => {
                if let Some(fragment) = &self.previous_fragment {
                    let base = split.map_or(location.as_str(), |(base, _)| base);
                    location = format!("{base}#{fragment}");
                }
            }
        }

        match Url::parse(&location) {
            Ok(url) if url.has_host() => Ok(requote_uri(&location)),
            _ => {
                let base = Url::parse(response_url)
                    .map_err(|e| HttpError::invalid_url(response_url, e.to_string()))?;
                let joined = base
                    .join(&requote_uri(&location))
                    .map_err(|e| HttpError::invalid_url(location.as_str(), e.to_string()))?;
                Ok(joined.to_string())
            }
        }
    }

    fn rebuild_auth(&self, next: &mut PreparedRequest, previous_url: &str) -> Result<()> {
        if next.headers.contains_key(AUTHORIZATION) && should_strip_auth(previous_url, &next.url) {
            log::debug!("dropping authorization on redirect to {}", next.url);
            next.headers.remove(AUTHORIZATION);
        }

        if self.core.trust_env {
            if let Some((username, password)) = get_netrc_auth(self.core.environment(), &next.url) {
                let auth: Arc<dyn AuthHandler> = Arc::new(BasicAuth::new(username, password));
                next.prepare_auth(Some(&auth))?;
            }
        }
        Ok(())
    }
}

/// Whether `Authorization` must be dropped when redirecting from `old_url` to
/// `new_url`.
///
/// Credentials are kept on the same host when neither scheme nor port changed,
/// and on an upgrade from `http` to `https` on default ports.
pub fn should_strip_auth(old_url: &str, new_url: &str) -> bool {
    let (Ok(old), Ok(new)) = (Url::parse(old_url), Url::parse(new_url)) else {
        return true;
    };
    if old.host_str() != new.host_str() {
        return true;
    }
    // `port()` is None for the default port of the scheme
    if old.scheme() == "http" && new.scheme() == "https" && old.port().is_none() && new.port().is_none() {
        return false;
    }
    old.port() != new.port() || old.scheme() != new.scheme()
}

fn redirect_target(response: &Response) -> Option<String> {
    if !response.is_redirect() {
        return None;
    }
    let location = response.headers.get(LOCATION)?;
    Some(String::from_utf8_lossy(location.as_bytes()).into_owned())
}

fn fragment_of(url: &str) -> Option<String> {
    url.split_once('#')
        .map(|(_, fragment)| fragment)
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_string)
}

fn rebuild_method(request: &mut PreparedRequest, status: u16) {
    let method = &request.method;
    let to_get = match status {
        302 | 303 => *method != Method::HEAD,
        301 => *method == Method::POST,
        _ => false,
    };
    if to_get {
        request.method = Method::GET;
    }
}

fn rewind_body(request: &PreparedRequest) -> Result<()> {
    match (&request.body, request.body_position) {
        (Some(Body::Stream(stream)), Some(BodyPosition::Offset(position))) => stream
            .rewind_to(position)
            .map_err(|e| HttpError::UnrewindableBody(e.to_string())),
        (_, Some(BodyPosition::Unknown)) => Err(HttpError::UnrewindableBody(
            "the body position could not be recorded".to_string(),
        )),
        _ => Ok(()),
    }
}
