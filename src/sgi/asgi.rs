use crate::adapters::{AsyncAdapter, AsyncTransportEvents, SendSettings};
use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::errors::{HttpError, Result};
use crate::models::{AsyncRawBody, Body, PreparedRequest, Response};
use crate::sgi::{AsgiApp, Receive, RequestBody, ResponseMessage, ResponseSender, Scope};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Outbound = Option<ResponseMessage>;
type Headers = Vec<(Vec<u8>, Vec<u8>)>;

/// Adapter serving requests from an in-process [`AsgiApp`].
///
/// Every send runs the application on its own task. Buffered sends collect the
/// whole response within the timeout. Streaming sends return once the response
/// head arrived and pull body messages as the caller reads.
pub struct AsgiAdapter {
    app: Arc<dyn AsgiApp>,
    raise_app_exceptions: bool,
}

impl AsgiAdapter {
    pub fn new<A: AsgiApp + 'static>(app: A) -> Self {
        AsgiAdapter {
            app: Arc::new(app),
            raise_app_exceptions: true,
        }
    }

    /// Whether an error returned by the application fails the send. Enabled by default.
    pub fn raise_app_exceptions(mut self, raise: bool) -> Self {
        self.raise_app_exceptions = raise;
        self
    }

    fn check_outcome(&self, outcome: anyhow::Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if self.raise_app_exceptions => Err(HttpError::Application(e)),
            Err(e) => {
                log::warn!("application failed: {e:#}");
                Ok(())
            }
        }
    }

    async fn buffered_response(
        &self,
        request: &PreparedRequest,
        mut rx: mpsc::Receiver<Outbound>,
        mut task: AppTask,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let collect = async {
            let mut head = None;
            let mut body = BytesMut::new();
            while let Some(Some(message)) = rx.recv().await {
                match message {
                    ResponseMessage::Start { status, headers } => head = Some((status, headers)),
                    ResponseMessage::Body { body: chunk, .. } => body.extend_from_slice(&chunk),
                }
            }
            (head, body)
        };

        let Some((head, body)) = within(timeout, collect).await else {
            task.cancel().await;
            return Err(HttpError::ReadTimeout(
                "timed out reading application response body".to_string(),
            ));
        };
        self.check_outcome(task.join().await)?;

        let (status, headers) = head_or_default(head);
        Ok(Response::new(status, header_map(headers)?, request.url.clone()).with_body(body.freeze()))
    }

    async fn streaming_response(
        &self,
        request: &PreparedRequest,
        mut rx: mpsc::Receiver<Outbound>,
        mut task: AppTask,
        response_complete: CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let wait_head = async {
            while let Some(Some(message)) = rx.recv().await {
                if let ResponseMessage::Start { status, headers } = message {
                    return Some((status, headers));
                }
            }
            None
        };

        let Some(head) = within(timeout, wait_head).await else {
            task.cancel().await;
            return Err(HttpError::ConnectTimeout(
                "timed out waiting for application response headers".to_string(),
            ));
        };
        let finished = head.is_none();
        if finished {
            self.check_outcome(task.join().await)?;
        }

        let (status, headers) = head_or_default(head);
        let raw = AsgiRawBody {
            rx,
            task,
            response_complete,
            timeout,
            pending: BytesMut::new(),
            finished,
            raise_app_exceptions: self.raise_app_exceptions,
        };
        Ok(Response::new(status, header_map(headers)?, request.url.clone()).with_async_raw(Box::new(raw)))
    }
}

#[async_trait]
impl AsyncAdapter for AsgiAdapter {
    async fn send(
        &self,
        request: &mut PreparedRequest,
        settings: &SendSettings,
        events: &dyn AsyncTransportEvents,
    ) -> Result<Response> {
        events.pre_send(request).await?;
        let scope = Scope::from_request(request)?;

        let body = match request.body.clone() {
            None => RequestBody::Full(Bytes::new()),
            Some(Body::Bytes(bytes)) => RequestBody::Full(bytes),
            Some(Body::Stream(stream)) => {
                let bytes = tokio::task::spawn_blocking(move || stream.read_to_end())
                    .await
                    .map_err(io::Error::other)??;
                RequestBody::Full(Bytes::from(bytes))
            }
            Some(Body::AsyncStream(stream)) => match stream.take().await {
                Some(chunks) => RequestBody::Stream(chunks),
                None => {
                    return Err(HttpError::UnrewindableBody(
                        "async body stream was already consumed".to_string(),
                    ))
                }
            },
        };
        events.on_upload(request).await?;

        let (tx, rx) = mpsc::channel::<Outbound>(DEFAULT_CHANNEL_CAPACITY);
        let response_complete = CancellationToken::new();
        let receive = Receive::new(body, response_complete.clone());
        let sender = ResponseSender::new(tx.clone(), response_complete.clone());

        log::debug!("calling application for {} {}", scope.method, scope.path);
        let app = self.app.clone();
        let task = AppTask::spawn(async move {
            let outcome = app.call(scope, receive, sender).await;
            // end of call; the receiver may already be gone
            let _ = tx.send(None).await;
            outcome
        });

        if settings.stream {
            self.streaming_response(request, rx, task, response_complete, settings.timeout)
                .await
        } else {
            self.buffered_response(request, rx, task, settings.timeout).await
        }
    }
}

/// Background task running one application call. Aborted when dropped.
struct AppTask {
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl AppTask {
    fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        AppTask {
            handle: Some(tokio::spawn(future)),
        }
    }

    async fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // a cancelled task reports a JoinError
            let _ = handle.await;
        }
    }

    async fn join(&mut self) -> anyhow::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| Err(anyhow::Error::new(e))),
            None => Ok(()),
        }
    }
}

impl Drop for AppTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Body of a streamed application response.
struct AsgiRawBody {
    rx: mpsc::Receiver<Outbound>,
    task: AppTask,
    response_complete: CancellationToken,
    timeout: Option<Duration>,
    pending: BytesMut,
    finished: bool,
    raise_app_exceptions: bool,
}

impl AsgiRawBody {
    async fn pull(&mut self) -> Result<()> {
        let Some(message) = within(self.timeout, self.rx.recv()).await else {
            self.task.cancel().await;
            return Err(HttpError::ReadTimeout(
                "timed out streaming application response".to_string(),
            ));
        };

        match message {
            Some(Some(ResponseMessage::Body { body, .. })) => self.pending.extend_from_slice(&body),
            Some(Some(ResponseMessage::Start { .. })) => {
                log::warn!("ignoring repeated response start from application");
            }
            Some(None) | None => {
                self.finished = true;
                if let Err(e) = self.task.join().await {
                    if self.raise_app_exceptions {
                        return Err(HttpError::Application(e));
                    }
                    log::warn!("application failed: {e:#}");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncRawBody for AsgiRawBody {
    async fn read(&mut self, amt: Option<usize>) -> Result<Bytes> {
        let wanted = amt.filter(|n| *n > 0);
        while !self.finished && wanted.map_or(true, |n| self.pending.len() < n) {
            self.pull().await?;
        }
        let take = wanted.map_or(self.pending.len(), |n| n.min(self.pending.len()));
        Ok(self.pending.split_to(take).freeze())
    }

    async fn close(&mut self) {
        self.finished = true;
        self.response_complete.cancel();
        self.task.cancel().await;
    }
}

async fn within<F: Future>(timeout: Option<Duration>, future: F) -> Option<F::Output> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future).await.ok(),
        None => Some(future.await),
    }
}

fn head_or_default(head: Option<(u16, Headers)>) -> (u16, Headers) {
    head.unwrap_or_else(|| {
        log::warn!("application finished without starting a response");
        (500, Vec::new())
    })
}

fn header_map(headers: Headers) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(&name)
            .map_err(|e| HttpError::invalid_header(String::from_utf8_lossy(&name), e))?;
        let header_value =
            HeaderValue::from_bytes(&value).map_err(|e| HttpError::invalid_header(header_name.as_str(), e))?;
        map.append(header_name, header_value);
    }
    Ok(map)
}
