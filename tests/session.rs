use http::header::{AUTHORIZATION, COOKIE, LOCATION, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method};
use reqflow::adapters::{Adapter, SendSettings, TransportEvents};
use reqflow::env::StaticEnvironment;
use reqflow::hooks::limiters::LeakyBucketLimiter;
use reqflow::hooks::{HookContext, HookEvent, HookHandler};
use reqflow::middleware::{Middleware, MiddlewareHandle};
use reqflow::models::{PreparedRequest, Request, Response};
use reqflow::{CallOptions, HttpError, Result, Session, SessionCore};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Handler = dyn Fn(&PreparedRequest) -> Result<Response> + Send + Sync;

/// Adapter answering from a closure and recording what it was sent.
struct Mock {
    handler: Arc<Handler>,
    sent: Arc<Mutex<Vec<(PreparedRequest, SendSettings)>>>,
}

impl Adapter for Mock {
    fn send(
        &self,
        request: &mut PreparedRequest,
        settings: &SendSettings,
        events: &dyn TransportEvents,
    ) -> Result<Response> {
        events.pre_send(request)?;
        self.sent.lock().unwrap().push((request.clone(), settings.clone()));
        (self.handler)(request)
    }
}

struct Harness {
    session: Session,
    sent: Arc<Mutex<Vec<(PreparedRequest, SendSettings)>>>,
}

impl Harness {
    fn new<F>(handler: F) -> Self
    where
        F: Fn(&PreparedRequest) -> Result<Response> + Send + Sync + 'static,
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let core = SessionCore::default().with_environment(StaticEnvironment::new());
        let mut session = Session::from_core(core);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);
        for prefix in ["http://", "https://"] {
            session.mount(
                prefix,
                Mock {
                    handler: handler.clone(),
                    sent: sent.clone(),
                },
            );
        }
        Harness { session, sent }
    }

    fn sent(&self) -> Vec<PreparedRequest> {
        self.sent.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    fn settings(&self) -> Vec<SendSettings> {
        self.sent.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }
}

fn path_of(request: &PreparedRequest) -> String {
    request.parsed_url().unwrap().path().to_string()
}

fn redirect(status: u16, location: &str, request: &PreparedRequest) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
    Response::new(status, headers, request.url.clone()).with_body("")
}

fn ok(request: &PreparedRequest, body: &str) -> Response {
    Response::new(200, HeaderMap::new(), request.url.clone()).with_body(body.to_string())
}

/// `/N` redirects to `/N+1` until `/stop`.
fn chain(stop: usize) -> impl Fn(&PreparedRequest) -> Result<Response> + Send + Sync + 'static {
    move |request: &PreparedRequest| {
        let n: usize = path_of(request).trim_start_matches('/').parse().unwrap_or(0);
        if n < stop {
            Ok(redirect(302, &format!("/{}", n + 1), request))
        } else {
            Ok(ok(request, "done"))
        }
    }
}

#[test]
fn redirect_history_is_ordered() {
    let harness = Harness::new(chain(3));
    let mut response = harness.session.get("http://example.com/0").unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.url, "http://example.com/3");
    assert_eq!(response.text().unwrap(), "done");
    let history: Vec<_> = response.history.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(
        history,
        vec!["http://example.com/0", "http://example.com/1", "http://example.com/2"]
    );
    assert_eq!(response.request.as_ref().unwrap().url, "http://example.com/3");
    assert_eq!(harness.sent().len(), 4);
}

#[test]
fn redirect_limit() {
    let mut harness = Harness::new(chain(usize::MAX));
    harness.session.core_mut().max_redirects = 3;

    match harness.session.get("http://example.com/0") {
        Err(HttpError::TooManyRedirects { max, response }) => {
            assert_eq!(max, 3);
            assert_eq!(response.url, "http://example.com/2");
            assert_eq!(response.history.len(), 2);
        }
        other => panic!("expected too many redirects, got {other:?}"),
    }
    assert_eq!(harness.sent().len(), 3);

    let mut harness = Harness::new(chain(2));
    harness.session.core_mut().max_redirects = 3;
    let response = harness.session.get("http://example.com/0").unwrap();
    assert_eq!(response.history.len(), 2);
}

#[test]
fn see_other_switches_to_get() {
    let harness = Harness::new(|request| match path_of(request).as_str() {
        "/form" => Ok(redirect(303, "/result", request)),
        _ => Ok(ok(request, "")),
    });
    let request = Request::new("POST", "http://example.com/form").form([("a", "1")]);
    harness.session.request(request, CallOptions::default()).unwrap();

    let sent = harness.sent();
    assert_eq!(sent[1].method, Method::GET);
    assert!(sent[1].body.is_none());
    assert!(!sent[1].headers.contains_key("content-type"));
}

#[test]
fn temporary_redirect_keeps_method_and_body() {
    let harness = Harness::new(|request| match path_of(request).as_str() {
        "/upload" => Ok(redirect(307, "/upload-here", request)),
        _ => Ok(ok(request, "")),
    });
    harness
        .session
        .post(Request::new("POST", "http://example.com/upload").body("payload"))
        .unwrap();

    let sent = harness.sent();
    assert_eq!(sent[1].method, Method::POST);
    assert_eq!(sent[1].body.as_ref().and_then(|b| b.as_bytes()).unwrap(), &b"payload"[..]);
}

#[test]
fn authorization_is_kept_on_upgrade_and_stripped_across_hosts() {
    let harness = Harness::new(|request| {
        match (request.parsed_url().unwrap().host_str().unwrap(), path_of(request).as_str()) {
            ("example.com", "/start") => Ok(redirect(301, "https://example.com/secure", request)),
            ("example.com", "/secure") => Ok(redirect(302, "https://elsewhere.test/", request)),
            _ => Ok(ok(request, "")),
        }
    });
    let request = Request::new("GET", "http://example.com/start").basic_auth("user", "pass");
    harness.session.request(request, CallOptions::default()).unwrap();

    let sent = harness.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].headers.contains_key(AUTHORIZATION));
    assert!(sent[1].headers.contains_key(AUTHORIZATION));
    assert!(!sent[2].headers.contains_key(AUTHORIZATION));
}

#[test]
fn cookies_follow_redirects_and_persist() {
    let harness = Harness::new(|request| match path_of(request).as_str() {
        "/login" => {
            let mut response = redirect(302, "/home", request);
            response
                .headers
                .append(SET_COOKIE, HeaderValue::from_static("sid=42; Path=/"));
            Ok(response)
        }
        _ => Ok(ok(request, "")),
    });
    harness.session.get("http://example.com/login").unwrap();

    let sent = harness.sent();
    assert!(!sent[0].headers.contains_key(COOKIE));
    assert_eq!(sent[1].headers[COOKIE], "sid=42");
    assert_eq!(harness.session.core().cookie_jar().get("sid"), Some("42"));

    harness.session.get("http://example.com/again").unwrap();
    assert_eq!(harness.sent()[2].headers[COOKIE], "sid=42");
}

#[test]
fn fragment_is_carried_over() {
    let harness = Harness::new(|request| match path_of(request).as_str() {
        "/a" => Ok(redirect(302, "/b", request)),
        _ => Ok(ok(request, "")),
    });
    let response = harness.session.get("http://example.com/a#section").unwrap();
    assert_eq!(response.url, "http://example.com/b#section");
}

#[test]
fn head_and_disabled_redirects_keep_next() {
    let harness = Harness::new(|request| match path_of(request).as_str() {
        "/old" => Ok(redirect(301, "/new", request)),
        _ => Ok(ok(request, "")),
    });

    let response = harness.session.head("http://example.com/old").unwrap();
    assert_eq!(response.status, 301);
    assert!(response.history.is_empty());
    assert_eq!(response.next.as_ref().unwrap().url, "http://example.com/new");

    let response = harness
        .session
        .request(
            Request::new("GET", "http://example.com/old"),
            CallOptions::default().allow_redirects(false),
        )
        .unwrap();
    assert!(response.is_permanent_redirect());
    assert_eq!(harness.sent().len(), 2);
}

#[test]
fn method_default_timeouts() {
    let harness = Harness::new(|request| Ok(ok(request, "")));
    harness.session.get("http://example.com/").unwrap();
    harness
        .session
        .post(Request::new("POST", "http://example.com/").body("x"))
        .unwrap();
    harness
        .session
        .request(
            Request::new("GET", "http://example.com/"),
            CallOptions::default().timeout(Duration::from_secs(2)),
        )
        .unwrap();

    let timeouts: Vec<_> = harness.settings().iter().map(|s| s.timeout).collect();
    assert_eq!(
        timeouts,
        vec![
            Some(Duration::from_secs(30)),
            Some(Duration::from_secs(120)),
            Some(Duration::from_secs(2))
        ]
    );
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Recorder {
    fn pre_request(&self, _: &SessionCore, _: &mut PreparedRequest) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:pre_request", self.name));
        Ok(())
    }

    fn pre_send(&self, _: &SessionCore, _: &mut PreparedRequest) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:pre_send", self.name));
        Ok(())
    }

    fn response(&self, _: &SessionCore, _: &mut Response) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:response", self.name));
        Ok(())
    }
}

#[test]
fn middlewares_run_before_hooks() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut harness = Harness::new(|request| Ok(ok(request, "")));
    harness.session.core_mut().middlewares.push(Recorder {
        name: "session",
        log: log.clone(),
    });

    let hook_log = log.clone();
    let request = Request::new("GET", "http://example.com/").hook(
        HookEvent::PreRequest,
        HookHandler::request(move |_request: &mut PreparedRequest, ctx: &HookContext<'_>| {
            hook_log.lock().unwrap().push(format!("hook:{}", ctx.event));
            Ok(None)
        }),
    );
    let options = CallOptions::default().middleware(MiddlewareHandle::Blocking(Arc::new(Recorder {
        name: "call",
        log: log.clone(),
    })));
    harness.session.request(request, options).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "session:pre_request",
            "call:pre_request",
            "hook:pre_request",
            "session:pre_send",
            "call:pre_send",
            "session:response",
            "call:response",
        ]
    );
}

#[test]
fn response_hook_can_replace_the_response() {
    let harness = Harness::new(|request| Ok(ok(request, "original")));
    let request = Request::new("GET", "http://example.com/").hook(
        HookEvent::Response,
        HookHandler::response(|response: &mut Response, _: &HookContext<'_>| {
            Ok(Some(Response::new(202, HeaderMap::new(), response.url.clone()).with_body("replaced")))
        }),
    );
    let mut response = harness.session.request(request, CallOptions::default()).unwrap();
    assert_eq!(response.status, 202);
    assert_eq!(response.text().unwrap(), "replaced");
}

struct Fallback;

impl Middleware for Fallback {
    fn on_exception(&self, _: &SessionCore, request: &PreparedRequest, error: &HttpError) -> Option<Response> {
        error
            .is_timeout()
            .then(|| Response::new(503, HeaderMap::new(), request.url.clone()).with_body("cached"))
    }
}

#[test]
fn on_exception_recovers() {
    let mut harness = Harness::new(|_| Err(HttpError::ConnectTimeout("unreachable".into())));
    assert!(matches!(
        harness.session.get("http://example.com/"),
        Err(HttpError::ConnectTimeout(_))
    ));

    harness.session.core_mut().middlewares.push(Fallback);
    let mut response = harness.session.get("http://example.com/").unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.text().unwrap(), "cached");
    assert_eq!(response.request.as_ref().unwrap().url, "http://example.com/");
}

#[test]
fn base_url_and_session_params() {
    let mut harness = Harness::new(|request| Ok(ok(request, "")));
    harness.session.core_mut().base_url = Some("http://api.test/v1".into());
    harness.session.core_mut().params = vec![("key".into(), "k".into())];

    harness.session.get("/items").unwrap();
    assert_eq!(harness.sent()[0].url, "http://api.test/v1/items?key=k");
}

#[test]
fn unknown_scheme_fails() {
    let harness = Harness::new(|request| Ok(ok(request, "")));
    assert!(matches!(
        harness.session.get("ftp://example.com/file"),
        Err(HttpError::InvalidSchema(_))
    ));
}

#[test]
fn leaky_bucket_spaces_requests() {
    let mut harness = Harness::new(|request| Ok(ok(request, "")));
    harness
        .session
        .core_mut()
        .hooks
        .register_hook(HookEvent::PreRequest, Arc::new(LeakyBucketLimiter::new(20.0)));

    let start = Instant::now();
    for _ in 0..3 {
        harness.session.get("http://example.com/").unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(90));
}
