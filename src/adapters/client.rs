//! Default adapters backed by `reqwest`.
//!
//! Both clients are built with redirects disabled and without a cookie store.
//! A client with default settings is built once and reused; sends that ask for
//! a proxy, a client certificate or custom verification get a dedicated client.

use crate::adapters::{Adapter, AsyncAdapter, AsyncTransportEvents, SendSettings, TlsVerify, TransportEvents};
use crate::config::CONTENT_CHUNK_SIZE;
use crate::errors::{HttpError, Result};
use crate::models::{AsyncRawBody, Body, BodyStream, ConnectionInfo, PreparedRequest, RawBody, Response};
use crate::proxies::select_proxy;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io::{self, Read};
use std::sync::OnceLock;

/// TLS and proxy options derived from [`SendSettings`].
struct ClientOptions {
    accept_invalid_certs: bool,
    root_certificate: Option<reqwest::Certificate>,
    identity: Option<reqwest::Identity>,
    proxy: Option<reqwest::Proxy>,
}

impl ClientOptions {
    fn from_settings(url: &str, settings: &SendSettings) -> Result<Self> {
        let (accept_invalid_certs, root_certificate) = match &settings.verify {
            TlsVerify::Enabled(enabled) => (!enabled, None),
            TlsVerify::CaBundle(path) => {
                let pem = std::fs::read(path)?;
                (false, Some(reqwest::Certificate::from_pem(&pem)?))
            }
        };

        let identity = match &settings.cert {
            Some(cert) => {
                let mut pem = std::fs::read(&cert.cert)?;
                if let Some(key) = &cert.key {
                    pem.extend_from_slice(b"\n");
                    pem.extend_from_slice(&std::fs::read(key)?);
                }
                Some(reqwest::Identity::from_pem(&pem)?)
            }
            None => None,
        };

        let proxy = match select_proxy(url, &settings.proxies) {
            Some(proxy) => Some(reqwest::Proxy::all(proxy.as_str())?),
            None => None,
        };

        Ok(ClientOptions {
            accept_invalid_certs,
            root_certificate,
            identity,
            proxy,
        })
    }

    fn is_default(&self) -> bool {
        !self.accept_invalid_certs
            && self.root_certificate.is_none()
            && self.identity.is_none()
            && self.proxy.is_none()
    }
}

macro_rules! configure_builder {
    ($builder:expr, $options:expr) => {{
        let options = $options;
        let mut builder = $builder
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(options.accept_invalid_certs);
        if let Some(cert) = options.root_certificate {
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = options.identity {
            builder = builder.identity(identity);
        }
        match options.proxy {
            Some(proxy) => builder.proxy(proxy),
            // proxies from the environment were already resolved by the session
            None => builder.no_proxy(),
        }
    }};
}

fn connection_info(version: http::Version, remote_addr: Option<std::net::SocketAddr>) -> ConnectionInfo {
    ConnectionInfo {
        http_version: Some(version),
        remote_addr,
    }
}

/// `Read` over a shared request body stream.
struct StreamReader(BodyStream);

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read_chunk(buf)
    }
}

/// Blocking adapter.
#[derive(Debug, Default)]
pub struct HttpAdapter {
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, url: &str, settings: &SendSettings) -> Result<reqwest::blocking::Client> {
        let options = ClientOptions::from_settings(url, settings)?;
        if !options.is_default() {
            return Ok(configure_builder!(reqwest::blocking::Client::builder(), options).build()?);
        }
        if let Some(client) = self.client.get() {
            return Ok(client.clone());
        }
        let client = configure_builder!(reqwest::blocking::Client::builder(), options).build()?;
        Ok(self.client.get_or_init(|| client).clone())
    }
}

impl Adapter for HttpAdapter {
    fn send(
        &self,
        request: &mut PreparedRequest,
        settings: &SendSettings,
        events: &dyn TransportEvents,
    ) -> Result<Response> {
        let client = self.client_for(&request.url, settings)?;
        events.pre_send(request)?;

        let mut builder = client
            .request(request.method.clone(), request.url.as_str())
            .headers(request.headers.clone());
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match request.body.clone() {
            None => builder,
            Some(Body::Bytes(bytes)) => builder.body(bytes.to_vec()),
            Some(Body::Stream(stream)) => match stream.remaining_len() {
                Some(len) => builder.body(reqwest::blocking::Body::sized(StreamReader(stream), len)),
                None => builder.body(reqwest::blocking::Body::new(StreamReader(stream))),
            },
            Some(Body::AsyncStream(_)) => return Err(HttpError::AsyncBody),
        };

        log::debug!("{} {}", request.method, request.url);
        let response = builder.send()?;
        events.on_upload(request)?;

        request.conn_info = Some(connection_info(response.version(), response.remote_addr()));
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        Ok(Response::new(status, headers, request.url.clone()).with_raw(Box::new(BlockingBody {
            inner: Some(response),
        })))
    }
}

struct BlockingBody {
    inner: Option<reqwest::blocking::Response>,
}

impl RawBody for BlockingBody {
    fn read(&mut self, amt: Option<usize>) -> Result<Bytes> {
        let Some(response) = self.inner.as_mut() else {
            return Ok(Bytes::new());
        };
        match amt {
            Some(n) if n > 0 => {
                let mut buf = vec![0; n];
                let read = response.read(&mut buf)?;
                buf.truncate(read);
                Ok(Bytes::from(buf))
            }
            _ => {
                let mut out = BytesMut::new();
                let mut buf = vec![0; CONTENT_CHUNK_SIZE];
                loop {
                    let read = response.read(&mut buf)?;
                    if read == 0 {
                        break;
                    }
                    out.extend_from_slice(&buf[..read]);
                }
                Ok(out.freeze())
            }
        }
    }

    fn close(&mut self) {
        self.inner = None;
    }
}

/// Asynchronous adapter.
#[derive(Debug, Default)]
pub struct AsyncHttpAdapter {
    client: OnceLock<reqwest::Client>,
}

impl AsyncHttpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, url: &str, settings: &SendSettings) -> Result<reqwest::Client> {
        let options = ClientOptions::from_settings(url, settings)?;
        if !options.is_default() {
            return Ok(configure_builder!(reqwest::Client::builder(), options).build()?);
        }
        if let Some(client) = self.client.get() {
            return Ok(client.clone());
        }
        let client = configure_builder!(reqwest::Client::builder(), options).build()?;
        Ok(self.client.get_or_init(|| client).clone())
    }
}

#[async_trait]
impl AsyncAdapter for AsyncHttpAdapter {
    async fn send(
        &self,
        request: &mut PreparedRequest,
        settings: &SendSettings,
        events: &dyn AsyncTransportEvents,
    ) -> Result<Response> {
        let client = self.client_for(&request.url, settings)?;
        events.pre_send(request).await?;

        let mut builder = client
            .request(request.method.clone(), request.url.as_str())
            .headers(request.headers.clone());
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match request.body.clone() {
            None => builder,
            Some(Body::Bytes(bytes)) => builder.body(bytes),
            Some(Body::Stream(stream)) => {
                let bytes = tokio::task::spawn_blocking(move || stream.read_to_end())
                    .await
                    .map_err(io::Error::other)??;
                builder.body(bytes)
            }
            Some(Body::AsyncStream(stream)) => {
                let Some(chunks) = stream.take().await else {
                    return Err(HttpError::UnrewindableBody(
                        "async body stream was already consumed".to_string(),
                    ));
                };
                builder.body(reqwest::Body::wrap_stream(chunks))
            }
        };

        log::debug!("{} {}", request.method, request.url);
        let response = builder.send().await?;
        events.on_upload(request).await?;

        request.conn_info = Some(connection_info(response.version(), response.remote_addr()));
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        Ok(
            Response::new(status, headers, request.url.clone()).with_async_raw(Box::new(AsyncBody {
                inner: Some(response),
                pending: Bytes::new(),
            })),
        )
    }
}

struct AsyncBody {
    inner: Option<reqwest::Response>,
    pending: Bytes,
}

#[async_trait]
impl AsyncRawBody for AsyncBody {
    async fn read(&mut self, amt: Option<usize>) -> Result<Bytes> {
        match amt {
            Some(n) if n > 0 => {
                if self.pending.is_empty() {
                    if let Some(response) = self.inner.as_mut() {
                        self.pending = response.chunk().await?.unwrap_or_default();
                    }
                }
                let take = n.min(self.pending.len());
                Ok(self.pending.split_to(take))
            }
            _ => {
                let mut out = BytesMut::from(&self.pending[..]);
                self.pending = Bytes::new();
                if let Some(response) = self.inner.as_mut() {
                    while let Some(chunk) = response.chunk().await? {
                        out.extend_from_slice(&chunk);
                    }
                }
                Ok(out.freeze())
            }
        }
    }

    async fn close(&mut self) {
        self.inner = None;
        self.pending = Bytes::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ClientCert;
    use crate::proxies::Proxies;
    use std::path::PathBuf;

    #[test]
    fn default_settings_share_a_client() {
        let options = ClientOptions::from_settings("http://example.com/", &SendSettings::default()).unwrap();
        assert!(options.is_default());
    }

    #[test]
    fn proxy_and_verification_need_a_dedicated_client() {
        let mut proxies = Proxies::new();
        proxies.insert("http".into(), "http://proxy.test:3128".into());
        let settings = SendSettings {
            proxies,
            ..Default::default()
        };
        let options = ClientOptions::from_settings("http://example.com/", &settings).unwrap();
        assert!(options.proxy.is_some());
        assert!(!options.is_default());

        // https requests do not match an http-only proxy map
        let options = ClientOptions::from_settings("https://example.com/", &settings).unwrap();
        assert!(options.proxy.is_none());

        let settings = SendSettings {
            verify: TlsVerify::Enabled(false),
            ..Default::default()
        };
        let options = ClientOptions::from_settings("https://example.com/", &settings).unwrap();
        assert!(options.accept_invalid_certs);
    }

    #[test]
    fn missing_certificate_files_fail() {
        let settings = SendSettings {
            cert: Some(ClientCert {
                cert: PathBuf::from("/nonexistent/client.pem"),
                key: None,
            }),
            ..Default::default()
        };
        assert!(matches!(
            ClientOptions::from_settings("https://example.com/", &settings),
            Err(HttpError::Io(_))
        ));
    }

    #[test]
    fn stream_reader_reads_shared_body() {
        let stream = BodyStream::seekable(io::Cursor::new(b"abcdef".to_vec()));
        let mut reader = StreamReader(stream.clone());
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abcdef");
        assert_eq!(stream.remaining_len(), Some(0));
    }
}
