//! In-process application bridge.
//!
//! An [`AsgiApp`] is called with a [`Scope`] describing the request, a
//! [`Receive`] handle yielding the request body and a [`ResponseSender`] it
//! pushes the response through. [`AsgiAdapter`] runs the app on a background
//! task and turns its messages into a [`Response`](crate::models::Response).

mod asgi;

pub use asgi::AsgiAdapter;

use crate::errors::{HttpError, Result};
use crate::models::PreparedRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use std::io;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Connection scope handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Always `"http"`.
    pub kind: &'static str,
    pub asgi_version: &'static str,
    pub http_version: &'static str,
    pub method: String,
    pub scheme: String,
    /// Percent-decoded path, `/` when empty.
    pub path: String,
    /// Query string as sent, without the `?`.
    pub query_string: Vec<u8>,
    pub root_path: String,
    /// Header pairs with lowercase names.
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    /// Host and port the request was addressed to.
    pub server: (String, u16),
}

impl Scope {
    pub fn from_request(request: &PreparedRequest) -> Result<Self> {
        let url = url::Url::parse(&request.url)
            .map_err(|e| HttpError::invalid_url(request.url.as_str(), e.to_string()))?;

        let path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
        let default_port = if url.scheme() == "https" { 443 } else { 80 };
        let headers = request
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().as_bytes().to_vec(), value.as_bytes().to_vec()))
            .collect();

        Ok(Scope {
            kind: "http",
            asgi_version: "3.0",
            http_version: "1.1",
            method: request.method.to_string(),
            scheme: url.scheme().to_string(),
            path: if path.is_empty() { "/".to_string() } else { path },
            query_string: url.query().unwrap_or_default().as_bytes().to_vec(),
            root_path: String::new(),
            headers,
            server: (
                url.host_str().unwrap_or("localhost").to_string(),
                url.port().unwrap_or(default_port),
            ),
        })
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| n.as_slice() == name.as_bytes())
            .map(|(_, v)| v.as_slice())
    }
}

/// Messages the application receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMessage {
    Request { body: Bytes, more_body: bool },
    /// The response was delivered or abandoned.
    Disconnect,
}

/// Messages the application sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMessage {
    Start {
        status: u16,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    Body {
        body: Bytes,
        more_body: bool,
    },
}

pub(crate) enum RequestBody {
    Full(Bytes),
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

/// Request side of an application call.
pub struct Receive {
    body: Option<RequestBody>,
    response_complete: CancellationToken,
}

impl Receive {
    pub(crate) fn new(body: RequestBody, response_complete: CancellationToken) -> Self {
        Receive {
            body: Some(body),
            response_complete,
        }
    }

    /// Next request message.
    ///
    /// The body is delivered once, chunk by chunk for streamed bodies. Later
    /// calls wait until the response is complete and return
    /// [`RequestMessage::Disconnect`].
    pub async fn receive(&mut self) -> RequestMessage {
        match self.body.take() {
            None => {
                self.response_complete.cancelled().await;
                RequestMessage::Disconnect
            }
            Some(RequestBody::Full(body)) => RequestMessage::Request {
                body,
                more_body: false,
            },
            Some(RequestBody::Stream(mut chunks)) => match chunks.next().await {
                Some(Ok(body)) => {
                    self.body = Some(RequestBody::Stream(chunks));
                    RequestMessage::Request { body, more_body: true }
                }
                Some(Err(e)) => {
                    log::warn!("request body stream failed: {e}");
                    self.response_complete.cancel();
                    RequestMessage::Disconnect
                }
                None => RequestMessage::Request {
                    body: Bytes::new(),
                    more_body: false,
                },
            },
        }
    }

    /// Reads the whole request body.
    pub async fn body(&mut self) -> Bytes {
        let mut out = Vec::new();
        loop {
            match self.receive().await {
                RequestMessage::Request { body, more_body } => {
                    out.extend_from_slice(&body);
                    if !more_body {
                        break;
                    }
                }
                RequestMessage::Disconnect => break,
            }
        }
        Bytes::from(out)
    }
}

/// Response side of an application call. `None` on the channel marks the end
/// of the call.
#[derive(Clone)]
pub struct ResponseSender {
    tx: mpsc::Sender<Option<ResponseMessage>>,
    response_complete: CancellationToken,
}

impl ResponseSender {
    pub(crate) fn new(tx: mpsc::Sender<Option<ResponseMessage>>, response_complete: CancellationToken) -> Self {
        ResponseSender { tx, response_complete }
    }

    pub async fn send(&self, message: ResponseMessage) -> Result<()> {
        let last = matches!(message, ResponseMessage::Body { more_body: false, .. });
        self.tx
            .send(Some(message))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response receiver is gone"))?;
        if last {
            self.response_complete.cancel();
        }
        Ok(())
    }

    pub async fn start(&self, status: u16, headers: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        self.send(ResponseMessage::Start { status, headers }).await
    }

    pub async fn body(&self, body: impl Into<Bytes>, more_body: bool) -> Result<()> {
        self.send(ResponseMessage::Body {
            body: body.into(),
            more_body,
        })
        .await
    }
}

/// An application served in process.
#[async_trait]
pub trait AsgiApp: Send + Sync {
    async fn call(&self, scope: Scope, receive: Receive, send: ResponseSender) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Request;

    #[test]
    fn scope_from_request() {
        let request = Request::new("POST", "https://api.test:8443/a%20b/c?x=1&y=%20")
            .header("X-Token", "t")
            .body("data")
            .prepare()
            .unwrap();
        let scope = Scope::from_request(&request).unwrap();

        assert_eq!(scope.kind, "http");
        assert_eq!(scope.method, "POST");
        assert_eq!(scope.scheme, "https");
        assert_eq!(scope.path, "/a b/c");
        assert_eq!(scope.query_string, b"x=1&y=%20");
        assert_eq!(scope.server, ("api.test".to_string(), 8443));
        assert_eq!(scope.header("x-token"), Some(&b"t"[..]));
        assert!(scope.headers.iter().all(|(n, _)| n.iter().all(|b| !b.is_ascii_uppercase())));
    }

    #[test]
    fn default_ports() {
        let scope = Scope::from_request(&Request::new("GET", "http://localhost").prepare().unwrap()).unwrap();
        assert_eq!(scope.path, "/");
        assert_eq!(scope.server, ("localhost".to_string(), 80));

        let scope = Scope::from_request(&Request::new("GET", "https://example.com/").prepare().unwrap()).unwrap();
        assert_eq!(scope.server.1, 443);
    }

    #[tokio::test]
    async fn receive_streams_then_disconnects() {
        let complete = CancellationToken::new();
        let chunks = futures::stream::iter(vec![Ok(Bytes::from("ab")), Ok(Bytes::from("cd"))]).boxed();
        let mut receive = Receive::new(RequestBody::Stream(chunks), complete.clone());

        assert_eq!(receive.body().await, Bytes::from("abcd"));

        complete.cancel();
        assert_eq!(receive.receive().await, RequestMessage::Disconnect);
    }
}
