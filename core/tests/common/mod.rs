/*
 * mod.rs
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

//! Scripted in-process HTTP/1.1 server for integration tests. Every request is recorded;
//! the reply comes from a closure over the request.

#![allow(dead_code)]

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use snekwest_core::{Session, SessionConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Order of arrival across all connections, from 0.
    pub seq: usize,
    /// Which accepted connection carried it, from 0.
    pub connection: usize,
    pub method: String,
    pub target: String,
    /// Lowercased names, in wire order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }
}

/// What to send back.
pub struct Reply {
    pub bytes: Vec<u8>,
    pub delay: Duration,
    /// Close the connection after writing.
    pub close: bool,
}

impl Reply {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Reply {
        Reply {
            bytes: bytes.into(),
            delay: Duration::ZERO,
            close: false,
        }
    }

    /// Status line, headers and a Content-Length delimited body.
    pub fn status(code: u16, headers: &[(&str, &str)], body: &[u8]) -> Reply {
        let mut out = format!("HTTP/1.1 {} {}\r\n", code, reason(code));
        let framed = headers.iter().any(|(k, _)| {
            k.eq_ignore_ascii_case("content-length") || k.eq_ignore_ascii_case("transfer-encoding")
        });
        for (k, v) in headers {
            out.push_str(&format!("{}: {}\r\n", k, v));
        }
        if !framed {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(body);
        let close = headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"));
        Reply {
            bytes,
            delay: Duration::ZERO,
            close,
        }
    }

    pub fn ok(body: &str) -> Reply {
        Reply::status(200, &[("Content-Type", "text/plain")], body.as_bytes())
    }

    pub fn redirect(code: u16, location: &str) -> Reply {
        Reply::status(code, &[("Location", location)], b"")
    }

    pub fn delayed(mut self, delay: Duration) -> Reply {
        self.delay = delay;
        self
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        304 => "Not Modified",
        308 => "Permanent Redirect",
        401 => "Unauthorized",
        404 => "Not Found",
        407 => "Proxy Authentication Required",
        _ => "Status",
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

pub struct Server {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Server {
    pub async fn start<F>(handler: F) -> Server
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        Server::listen(None, handler).await
    }

    /// Same as `start`, behind TLS with the fixture server certificate.
    pub async fn start_tls<F>(acceptor: TlsAcceptor, handler: F) -> Server
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        Server::listen(Some(acceptor), handler).await
    }

    async fn listen<F>(tls: Option<TlsAcceptor>, handler: F) -> Server
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let handler: Handler = Arc::new(handler);
        let task = {
            let requests = requests.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let connection = accepted.fetch_add(1, Ordering::SeqCst);
                    let requests = requests.clone();
                    let handler = handler.clone();
                    match tls.clone() {
                        None => {
                            tokio::spawn(serve(stream, connection, requests, handler));
                        }
                        Some(acceptor) => {
                            tokio::spawn(async move {
                                if let Ok(stream) = acceptor.accept(stream).await {
                                    serve(stream, connection, requests, handler).await;
                                }
                            });
                        }
                    }
                }
            })
        };
        Server {
            addr,
            requests,
            accepted,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn https_url(&self, path: &str) -> String {
        format!("https://{}{}", self.addr, path)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    connection: usize,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handler: Handler,
) {
    let mut buf = Vec::new();
    while let Some((method, target, headers, body)) = read_request(&mut stream, &mut buf).await {
        let recorded = {
            let mut all = requests.lock().unwrap();
            let r = Recorded {
                seq: all.len(),
                connection,
                method,
                target,
                headers,
                body,
            };
            all.push(r.clone());
            r
        };
        let reply = handler(&recorded);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        if stream.write_all(&reply.bytes).await.is_err() {
            break;
        }
        let _ = stream.flush().await;
        if reply.close {
            let _ = stream.shutdown().await;
            break;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

type Parsed = (String, String, Vec<(String, String)>, Vec<u8>);

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> Option<Parsed> {
    let mut tmp = [0u8; 4096];
    loop {
        if let Some(end) = find(buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let mut lines = head.split("\r\n");
            let mut request_line = lines.next()?.split(' ');
            let method = request_line.next()?.to_string();
            let target = request_line.next()?.to_string();
            let headers: Vec<(String, String)> = lines
                .filter_map(|l| l.split_once(':'))
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                .collect();
            let len = headers
                .iter()
                .find(|(k, _)| k == "content-length")
                .and_then(|(_, v)| v.parse::<usize>().ok())
                .unwrap_or(0);
            let start = end + 4;
            while buf.len() < start + len {
                let n = stream.read(&mut tmp).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&tmp[..n]);
            }
            let body = buf[start..start + len].to_vec();
            buf.drain(..start + len);
            return Some((method, target, headers, body));
        }
        let n = stream.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

/// Session that ignores proxy and CA bundle environment variables.
pub fn session() -> Session {
    Session::new(SessionConfig::default().with_trust_env(false))
}

pub fn session_with(config: SessionConfig) -> Session {
    Session::new(config.with_trust_env(false))
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn load_certs(name: &str) -> Vec<rustls::pki_types::CertificateDer<'static>> {
    let file = File::open(fixture(name)).unwrap();
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Server side TLS for `localhost` and `127.0.0.1`, signed by `ca.pem`. With
/// `client_auth` the handshake requires a certificate signed by the same CA.
pub fn tls_acceptor(client_auth: bool) -> TlsAcceptor {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(fixture("server-key.pem")).unwrap(),
    ))
    .unwrap()
    .unwrap();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();
    let builder = if client_auth {
        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(load_certs("ca.pem"));
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .unwrap();
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };
    let config = builder
        .with_single_cert(load_certs("server.pem"), key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Forward proxy that only speaks CONNECT and then relays bytes both ways.
pub struct TunnelProxy {
    pub addr: SocketAddr,
    connects: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl Drop for TunnelProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TunnelProxy {
    pub async fn start() -> TunnelProxy {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connects = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let connects = connects.clone();
            tokio::spawn(async move {
                while let Ok((mut client, _)) = listener.accept().await {
                    let connects = connects.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let Some((method, target, headers, body)) =
                            read_request(&mut client, &mut buf).await
                        else {
                            return;
                        };
                        {
                            let mut all = connects.lock().unwrap();
                            let seq = all.len();
                            all.push(Recorded {
                                seq,
                                connection: seq,
                                method: method.clone(),
                                target: target.clone(),
                                headers,
                                body,
                            });
                        }
                        if method != "CONNECT" {
                            return;
                        }
                        let Ok(mut upstream) = TcpStream::connect(target.as_str()).await else {
                            let _ = client
                                .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n")
                                .await;
                            return;
                        };
                        if client
                            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                            .await
                            .is_err()
                        {
                            return;
                        }
                        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                    });
                }
            })
        };
        TunnelProxy {
            addr,
            connects,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn connects(&self) -> Vec<Recorded> {
        self.connects.lock().unwrap().clone()
    }
}
