/*
 * connection.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Snekwest, an HTTP client engine.
 *
 * Snekwest is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Snekwest is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Snekwest.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP connection: one TCP or TLS stream (optionally through a proxy), drives the H1
//! parser. Requests are written whole; the response head is read before any body bytes
//! are handed out, and the body is then pulled chunk by chunk.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, HOST};
use http::{HeaderMap, Method, StatusCode, Version};
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, trace};

use crate::error::{ConnectionErrorKind, Error, Result};
use crate::h1::{BodyMode, H1ResponseHandler, ParseState, ResponseParser};
use crate::pool::PoolKey;
use crate::proxy::ProxyTarget;
use crate::request::PreparedRequest;
use crate::tls;
use crate::uri;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unified stream: plain TCP or TLS. Implements AsyncRead + AsyncWrite.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl HttpStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            HttpStream::Plain(s) => s,
            HttpStream::Tls(s) => s.get_ref().0,
        }
    }
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// Collects parser callbacks for one read step.
#[derive(Default)]
struct Collector {
    status: Option<(Version, u16, String)>,
    headers: Vec<(String, Vec<u8>)>,
    body: BytesMut,
}

impl H1ResponseHandler for Collector {
    fn status(&mut self, version: Version, code: u16, reason: &str) {
        self.status = Some((version, code, reason.to_string()));
    }

    fn header(&mut self, name: &str, value: &[u8]) {
        self.headers.push((name.to_string(), value.to_vec()));
    }

    fn body_chunk(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    fn complete(&mut self) {}
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn to_header_map(pairs: &[(String, Vec<u8>)]) -> io::Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let n = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| invalid_data(format!("invalid header name {:?}", name)))?;
        let v = HeaderValue::from_bytes(value)
            .map_err(|_| invalid_data(format!("invalid value for header {:?}", name)))?;
        map.append(n, v);
    }
    Ok(map)
}

fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// HTTP/1.1 connection: holds the stream, read buffer and parser.
pub struct Connection {
    id: u64,
    stream: HttpStream,
    read_buf: BytesMut,
    parser: ResponseParser,
    read_timeout: Option<Duration>,
    keep_alive: bool,
    eof: bool,
    requests: u32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("keep_alive", &self.keep_alive)
            .field("eof", &self.eof)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(stream: HttpStream) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            read_buf: BytesMut::with_capacity(8192),
            parser: ResponseParser::new(),
            read_timeout: None,
            keep_alive: false,
            eof: false,
            requests: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of requests written on this connection.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Deadline for each wait on the socket (read or write).
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    async fn with_deadline<T>(
        timeout: Option<Duration>,
        fut: impl std::future::Future<Output = io::Result<T>>,
    ) -> io::Result<T> {
        match timeout {
            Some(t) => tokio::time::timeout(t, fut)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "socket operation timed out"))?,
            None => fut.await,
        }
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.read_buf.reserve(8192);
        let n = Self::with_deadline(self.read_timeout, self.stream.read_buf(&mut self.read_buf)).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Write a complete request. `absolute_form` is used when talking to a plain HTTP proxy.
    pub async fn send(
        &mut self,
        req: &PreparedRequest,
        absolute_form: bool,
        proxy_authorization: Option<&str>,
    ) -> io::Result<()> {
        let target = if absolute_form {
            uri::absolute_target(&req.url)
        } else {
            uri::request_target(&req.url)
        };
        let mut head: Vec<u8> = Vec::with_capacity(256);
        head.extend_from_slice(format!("{} {} HTTP/1.1\r\n", req.method, target).as_bytes());
        if !req.headers.contains_key(HOST) {
            head.extend_from_slice(format!("Host: {}\r\n", uri::host_header(&req.url)).as_bytes());
        }
        for (name, value) in &req.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        if let (true, Some(auth)) = (absolute_form, proxy_authorization) {
            head.extend_from_slice(format!("Proxy-Authorization: {}\r\n", auth).as_bytes());
        }
        head.extend_from_slice(b"\r\n");

        self.parser.reset();
        self.keep_alive = false;
        self.requests += 1;
        trace!(connection = self.id, method = %req.method, target = %target, "writing request");

        let stream = &mut self.stream;
        let body = req.body.as_ref();
        Self::with_deadline(self.read_timeout, async move {
            stream.write_all(&head).await?;
            if let Some(body) = body {
                stream.write_all(body).await?;
            }
            stream.flush().await
        })
        .await
    }

    /// Read the status line and headers of the response to a `method` request.
    /// Interim 1xx responses are skipped.
    pub async fn read_head(&mut self, method: &Method) -> io::Result<ResponseHead> {
        let mut c = Collector::default();
        loop {
            self.parser.receive(&mut self.read_buf, &mut c)?;
            if self.parser.state() == ParseState::HeadersComplete {
                let (version, code, reason) = c
                    .status
                    .take()
                    .ok_or_else(|| invalid_data("missing status line"))?;
                let status =
                    StatusCode::from_u16(code).map_err(|_| invalid_data("invalid status code"))?;
                if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                    trace!(connection = self.id, status = code, "skipping interim response");
                    self.parser.reset();
                    c = Collector::default();
                    continue;
                }
                let headers = to_header_map(&c.headers)?;
                let mode = BodyMode::for_response(method, status, &headers);
                self.parser.set_body_mode(mode, &mut c);
                self.keep_alive = mode != BodyMode::UntilClose
                    && !has_token(&headers, CONNECTION, "close")
                    && (version != Version::HTTP_10
                        || has_token(&headers, CONNECTION, "keep-alive"));
                return Ok(ResponseHead {
                    version,
                    status,
                    reason,
                    headers,
                });
            }
            if self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response headers",
                ));
            }
        }
    }

    /// Next piece of the (still encoded) body, or `None` once the body is complete.
    pub async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            let mut c = Collector::default();
            self.parser.receive(&mut self.read_buf, &mut c)?;
            if !c.body.is_empty() {
                return Ok(Some(c.body.freeze()));
            }
            if self.parser.state() == ParseState::Idle {
                return Ok(None);
            }
            if self.fill().await? == 0 {
                self.parser.eof(&mut c)?;
                return Ok(None);
            }
        }
    }

    /// Read and discard the rest of the body.
    pub async fn drain(&mut self) -> io::Result<()> {
        while self.read_chunk().await?.is_some() {}
        Ok(())
    }

    /// Whether the connection may carry another request now.
    pub fn is_reusable(&self) -> bool {
        self.keep_alive
            && !self.eof
            && self.parser.state() == ParseState::Idle
            && self.read_buf.is_empty()
    }

    /// Non-blocking liveness check for an idle connection: the peer must not have
    /// closed it or sent anything unsolicited.
    ///
    /// The check reads the TCP socket directly, below any TLS layer, and may consume a
    /// byte of a TLS record. That is sound only because any readable byte makes this
    /// return false, and the caller then drops the connection unused.
    pub fn is_alive(&self) -> bool {
        let mut byte = [0u8; 1];
        match self.stream.tcp().try_read(&mut byte) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            _ => false,
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Resolve and connect, trying each address in turn.
async fn dial(host: &str, port: u16, url: &str) -> Result<TcpStream> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let addrs: Vec<_> = tokio::net::lookup_host((bare, port))
        .await
        .map_err(|e| Error::connection_kind(ConnectionErrorKind::Dns, url, e))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::connection_kind(
            ConnectionErrorKind::Dns,
            url,
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", bare)),
        ));
    }
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(tcp) => {
                let _ = tcp.set_nodelay(true);
                return Ok(tcp);
            }
            Err(e) => {
                trace!(%addr, error = %e, "connect failed");
                last = Some(e);
            }
        }
    }
    let e = last.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connect failed"));
    Err(Error::connection(url, e))
}

/// CONNECT tunnel through an HTTP proxy.
async fn tunnel(
    tcp: TcpStream,
    proxy: &ProxyTarget,
    host: &str,
    port: u16,
    url: &str,
) -> Result<TcpStream> {
    let authority = format!("{}:{}", host, port);
    let mut request = format!(
        "CONNECT {} HTTP/1.1\r\nHost: {}\r\n",
        authority, authority
    );
    if let Some(auth) = &proxy.authorization {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
    }
    request.push_str("\r\n");
    let mut conn = Connection::new(HttpStream::Plain(tcp));
    let io_err = |e: io::Error| Error::Proxy {
        proxy: proxy.display(),
        reason: e.to_string(),
    };
    conn.stream.write_all(request.as_bytes()).await.map_err(io_err)?;
    conn.stream.flush().await.map_err(io_err)?;
    let head = conn.read_head(&Method::CONNECT).await.map_err(io_err)?;
    if !head.status.is_success() {
        return Err(Error::Proxy {
            proxy: proxy.display(),
            reason: format!("CONNECT {} returned {}", authority, head.status),
        });
    }
    if !conn.read_buf.is_empty() {
        return Err(Error::Proxy {
            proxy: proxy.display(),
            reason: "unexpected data after CONNECT response".into(),
        });
    }
    debug!(proxy = %proxy.display(), target = %authority, url, "tunnel established");
    match conn.stream {
        HttpStream::Plain(tcp) => Ok(tcp),
        HttpStream::Tls(_) => Err(Error::Proxy {
            proxy: proxy.display(),
            reason: "tunnel stream is not plain TCP".into(),
        }),
    }
}

async fn establish_inner(
    key: &PoolKey,
    tls: Option<Arc<ClientConfig>>,
    url: &str,
) -> Result<Connection> {
    let tcp = match &key.proxy {
        Some(proxy) => {
            let tcp = dial(&proxy.host, proxy.port, url).await.map_err(|e| match e {
                Error::Connection { source, .. } => Error::Proxy {
                    proxy: proxy.display(),
                    reason: source.to_string(),
                },
                other => other,
            })?;
            if key.scheme == "https" {
                tunnel(tcp, proxy, &key.host, key.port, url).await?
            } else {
                tcp
            }
        }
        None => dial(&key.host, key.port, url).await?,
    };
    let stream = match tls {
        Some(config) => HttpStream::Tls(Box::new(tls::handshake(config, tcp, &key.host).await?)),
        None => HttpStream::Plain(tcp),
    };
    Ok(Connection::new(stream))
}

/// Open a new connection for `key`, using `tls` for https. `connect_timeout` bounds DNS,
/// TCP, tunnel and TLS handshake.
pub async fn establish(
    key: &PoolKey,
    tls: Option<Arc<ClientConfig>>,
    connect_timeout: Option<Duration>,
    url: &str,
) -> Result<Connection> {
    let conn = match connect_timeout {
        Some(t) => tokio::time::timeout(t, establish_inner(key, tls, url))
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: key.host.clone(),
                port: key.port,
                timeout: t,
            })??,
        None => establish_inner(key, tls, url).await?,
    };
    debug!(connection = conn.id, key = %key, "opened connection");
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            Connection::new(HttpStream::Plain(client.unwrap())),
            server.unwrap().0,
        )
    }

    fn get(url: &str) -> PreparedRequest {
        PreparedRequest {
            method: Method::GET,
            url: url::Url::parse(url).unwrap(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn request_line_and_keep_alive() {
        let (mut conn, mut server) = pair().await;
        conn.send(&get("http://h.test:8080/a?b=1#frag"), false, None).await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = server.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(text.starts_with("GET /a?b=1 HTTP/1.1\r\nHost: h.test:8080\r\n"), "{}", text);

        server
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        let head = conn.read_head(&Method::GET).await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(conn.read_chunk().await.unwrap().as_deref(), Some(&b"ok"[..]));
        assert_eq!(conn.read_chunk().await.unwrap(), None);
        assert!(conn.is_reusable());
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn connection_close_is_not_reusable() {
        let (mut conn, mut server) = pair().await;
        conn.send(&get("http://h.test/"), false, None).await.unwrap();
        server
            .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        conn.read_head(&Method::GET).await.unwrap();
        assert_eq!(conn.read_chunk().await.unwrap(), None);
        assert!(!conn.is_reusable());
    }

    #[tokio::test]
    async fn read_until_close_body() {
        let (mut conn, mut server) = pair().await;
        conn.send(&get("http://h.test/"), false, None).await.unwrap();
        server.write_all(b"HTTP/1.0 200 OK\r\n\r\nall of it").await.unwrap();
        drop(server);
        conn.read_head(&Method::GET).await.unwrap();
        let mut body = Vec::new();
        while let Some(c) = conn.read_chunk().await.unwrap() {
            body.extend_from_slice(&c);
        }
        assert_eq!(body, b"all of it");
        assert!(!conn.is_reusable());
    }

    #[tokio::test]
    async fn read_timeout_surfaces_as_timed_out() {
        let (mut conn, _server) = pair().await;
        conn.set_read_timeout(Some(Duration::from_millis(50)));
        conn.send(&get("http://h.test/"), false, None).await.unwrap();
        let err = conn.read_head(&Method::GET).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn closed_peer_is_not_alive() {
        let (conn, server) = pair().await;
        drop(server);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn unsolicited_bytes_mean_not_alive() {
        let (conn, mut server) = pair().await;
        assert!(conn.is_alive());
        server.write_all(b"HTTP/1.1 408 Request Timeout\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!conn.is_alive());
    }
}
