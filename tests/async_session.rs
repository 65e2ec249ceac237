use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use reqflow::hooks::limiters::AsyncTokenBucketLimiter;
use reqflow::hooks::HookEvent;
use reqflow::middleware::AsyncMiddleware;
use reqflow::models::{AsyncBodyStream, PreparedRequest, Request, Response};
use reqflow::sgi::{AsgiApp, Receive, ResponseSender, Scope};
use reqflow::{AsyncSession, CallOptions, HttpError, Result, SessionCore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn app_session() -> AsyncSession {
    let _ = env_logger::builder().is_test(true).try_init();
    AsyncSession::with_app(App)
}

struct App;

impl App {
    async fn reply(send: &ResponseSender, status: u16, extra: Vec<(Vec<u8>, Vec<u8>)>, body: Value) -> anyhow::Result<()> {
        let mut headers = vec![(b"content-type".to_vec(), b"application/json".to_vec())];
        headers.extend(extra);
        send.start(status, headers).await?;
        send.body(serde_json::to_vec(&body)?, false).await?;
        Ok(())
    }
}

#[async_trait]
impl AsgiApp for App {
    async fn call(&self, scope: Scope, mut receive: Receive, send: ResponseSender) -> anyhow::Result<()> {
        let query = String::from_utf8(scope.query_string.clone())?;
        match scope.path.as_str() {
            "/hello" => {
                let body = json!({
                    "method": scope.method,
                    "path": scope.path,
                    "query": query,
                    "message": "hello from asgi",
                });
                Self::reply(&send, 200, Vec::new(), body).await
            }
            "/echo" => {
                let body = receive.body().await;
                let body = json!({
                    "method": scope.method,
                    "path": scope.path,
                    "body": String::from_utf8_lossy(&body),
                    "cookie": scope.header("cookie").map(|c| String::from_utf8_lossy(c).into_owned()),
                });
                Self::reply(&send, 200, Vec::new(), body).await
            }
            "/login" => {
                let headers = vec![
                    (b"location".to_vec(), b"/echo".to_vec()),
                    (b"set-cookie".to_vec(), b"user=ada; Path=/".to_vec()),
                ];
                Self::reply(&send, 302, headers, json!({})).await
            }
            "/slow-body" => {
                send.start(200, Vec::new()).await?;
                send.body("partial", true).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                send.body("", false).await?;
                Ok(())
            }
            "/slow-start" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Self::reply(&send, 200, Vec::new(), json!({})).await
            }
            _ => Self::reply(&send, 404, Vec::new(), json!({"detail": "Not Found"})).await,
        }
    }
}

#[tokio::test]
async fn asgi_basic() {
    let session = app_session();
    let request = Request::new("GET", "/hello")
        .query("foo", "bar")
        .query("channels", "0")
        .query("channels", "3");
    let mut response = session.request(request, CallOptions::default()).await.unwrap();

    assert_eq!(response.status, 200);
    let payload: Value = response.json_async().await.unwrap();
    assert_eq!(payload["path"], "/hello");
    assert_eq!(payload["query"], "foo=bar&channels=0&channels=3");
    assert_eq!(response.url, "http://localhost/hello?foo=bar&channels=0&channels=3");
}

#[tokio::test]
async fn asgi_stream_response() {
    let session = app_session();
    let request = Request::new("POST", "/echo").body("foobar".repeat(32));
    let mut response = session
        .request(request, CallOptions::default().stream(true))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk(6).await.unwrap() {
        assert!(chunk.len() <= 6);
        body.extend_from_slice(&chunk);
    }
    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["path"], "/echo");
    assert_eq!(payload["body"], "foobar".repeat(32));
}

#[tokio::test]
async fn asgi_async_request_body() {
    let session = app_session();
    let chunks = AsyncBodyStream::from_chunks(vec![Bytes::from("foo"), Bytes::from("bar")]);
    let request = Request::new("PUT", "/echo").async_stream(chunks);
    let mut response = session.request(request, CallOptions::default()).await.unwrap();

    let payload: Value = response.json_async().await.unwrap();
    assert_eq!(payload["method"], "PUT");
    assert_eq!(payload["body"], "foobar");
}

#[tokio::test]
async fn asgi_redirect_carries_cookies() {
    let session = app_session();
    let mut response = session.get("/login").await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.history.len(), 1);
    assert_eq!(response.history[0].status, 302);
    let payload: Value = response.json_async().await.unwrap();
    assert_eq!(payload["cookie"], "user=ada");
    assert_eq!(session.core().cookie_jar().get("user"), Some("ada"));
}

#[tokio::test]
async fn asgi_buffered_timeout() {
    let session = app_session();
    let err = session
        .request(
            Request::new("GET", "/slow-body"),
            CallOptions::default().timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::ReadTimeout(_)));
}

#[tokio::test]
async fn asgi_streaming_timeouts() {
    let session = app_session();
    let options = CallOptions::default()
        .stream(true)
        .timeout(Duration::from_millis(100));

    let err = session
        .request(Request::new("GET", "/slow-start"), options.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::ConnectTimeout(_)));

    let mut response = session
        .request(Request::new("GET", "/slow-body"), options)
        .await
        .unwrap();
    assert_eq!(response.chunk(7).await.unwrap(), Some(Bytes::from("partial")));
    assert!(matches!(response.chunk(7).await, Err(HttpError::ReadTimeout(_))));
}

struct Tag;

#[async_trait]
impl AsyncMiddleware for Tag {
    async fn response(&self, _session: &SessionCore, response: &mut Response) -> Result<()> {
        response
            .headers
            .insert("x-tag", http::HeaderValue::from_static("seen"));
        Ok(())
    }

    async fn on_exception(&self, _: &SessionCore, request: &PreparedRequest, _: &HttpError) -> Option<Response> {
        Some(Response::new(504, HeaderMap::new(), request.url.clone()).with_body(""))
    }
}

#[tokio::test]
async fn async_middleware_runs() {
    let mut session = app_session();
    session.core_mut().middlewares.push_async(Tag);

    let response = session.get("/hello").await.unwrap();
    assert_eq!(response.headers["x-tag"], "seen");

    let response = session
        .request(
            Request::new("GET", "/slow-body"),
            CallOptions::default().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 504);
}

#[tokio::test]
async fn token_bucket_throttles_async_sends() {
    let mut session = app_session();
    session.core_mut().hooks.register_async(
        HookEvent::PreRequest,
        Arc::new(AsyncTokenBucketLimiter::new(10.0, Some(1.0))),
    );

    let start = Instant::now();
    for _ in 0..3 {
        session.get("/hello").await.unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(150));
}
