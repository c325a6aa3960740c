/*
 * response.rs
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

//! HTTP response: status, headers, final URL, redirect history and a body that is
//! either buffered or streamed from the connection it arrived on.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use tracing::trace;
use url::Url;

use crate::connection::Connection;
use crate::cookie::Cookie;
use crate::decode::Decoder;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolKey};
use crate::redirect;
use crate::request::PreparedRequest;

/// Map an I/O failure while waiting on the server to the error taxonomy.
pub(crate) fn read_error(e: io::Error, url: &str, read_timeout: Option<Duration>) -> Error {
    if e.kind() == io::ErrorKind::TimedOut {
        Error::ReadTimeout {
            url: url.to_string(),
            timeout: read_timeout.unwrap_or_default(),
        }
    } else {
        Error::connection(url, e)
    }
}

/// A body still on the wire. Holds its connection out of the pool until the last chunk
/// has been read; dropping it early closes the connection.
pub struct BodyStream {
    conn: Option<Connection>,
    key: PoolKey,
    pool: Arc<ConnectionPool>,
    decoder: Decoder,
    url: String,
    read_timeout: Option<Duration>,
    started: bool,
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("key", &self.key)
            .field("open", &self.conn.is_some())
            .field("started", &self.started)
            .finish()
    }
}

impl BodyStream {
    pub(crate) fn new(
        conn: Connection,
        key: PoolKey,
        pool: Arc<ConnectionPool>,
        decoder: Decoder,
        url: String,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            conn: Some(conn),
            key,
            pool,
            decoder,
            url,
            read_timeout,
            started: false,
        }
    }

    /// Next decoded chunk; `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.started = true;
        loop {
            let conn = match self.conn.as_mut() {
                Some(c) => c,
                None => return Ok(None),
            };
            let raw = match conn.read_chunk().await {
                Ok(raw) => raw,
                Err(e) => {
                    self.conn = None;
                    return Err(read_error(e, &self.url, self.read_timeout));
                }
            };
            match raw {
                Some(raw) => {
                    let decoded = self.decoder.decode(&raw).map_err(|e| {
                        self.conn = None;
                        Error::ContentDecoding(e)
                    })?;
                    if !decoded.is_empty() {
                        return Ok(Some(decoded));
                    }
                }
                None => {
                    if let Some(conn) = self.conn.take() {
                        self.pool.release(&self.key, conn);
                    }
                    let tail = self.decoder.finish().map_err(Error::ContentDecoding)?;
                    return Ok(if tail.is_empty() { None } else { Some(tail) });
                }
            }
        }
    }

    /// Read everything that is left.
    pub async fn collect(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(c) = self.chunk().await? {
            out.extend_from_slice(&c);
        }
        Ok(out.freeze())
    }

    /// Stop reading and close the connection (it is not returned to the pool).
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            trace!(connection = conn.id(), "closing unfinished response body");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.conn.is_none()
    }
}

impl Drop for BodyStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug)]
enum Body {
    Buffered(Bytes),
    Streaming(BodyStream),
    /// Buffered body already handed out by `chunk()`.
    Drained,
}

/// Response to one hop of a request.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub version: Version,
    /// Duplicate header names keep all their values.
    pub headers: HeaderMap,
    /// URL this response came from (after redirects).
    pub url: Url,
    /// Responses of earlier redirect hops, oldest first.
    pub history: Vec<Response>,
    /// Time from starting to send the request until the response head was parsed.
    pub elapsed: Duration,
    /// The request that produced this response.
    pub request: PreparedRequest,
    body: Body,
}

impl Response {
    pub(crate) fn buffered(
        status: StatusCode,
        reason: String,
        version: Version,
        headers: HeaderMap,
        request: PreparedRequest,
        elapsed: Duration,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            reason,
            version,
            headers,
            url: request.url.clone(),
            history: Vec::new(),
            elapsed,
            request,
            body: Body::Buffered(body),
        }
    }

    pub(crate) fn streaming(
        status: StatusCode,
        reason: String,
        version: Version,
        headers: HeaderMap,
        request: PreparedRequest,
        elapsed: Duration,
        stream: BodyStream,
    ) -> Self {
        Self {
            status,
            reason,
            version,
            headers,
            url: request.url.clone(),
            history: Vec::new(),
            elapsed,
            request,
            body: Body::Streaming(stream),
        }
    }

    pub(crate) fn with_history(mut self, history: Vec<Response>) -> Self {
        self.history = history;
        self
    }

    /// True for status codes below 400.
    pub fn ok(&self) -> bool {
        self.status.as_u16() < 400
    }

    /// A redirect status with a Location header.
    pub fn is_redirect(&self) -> bool {
        redirect::is_redirect(self.status) && self.headers.contains_key(LOCATION)
    }

    /// `Err(Error::Http)` for 4xx and 5xx responses.
    pub fn error_for_status(self) -> Result<Self> {
        match self.http_error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    pub fn error_for_status_ref(&self) -> Result<&Self> {
        match self.http_error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    fn http_error(&self) -> Option<Error> {
        let code = self.status.as_u16();
        if (400..600).contains(&code) {
            Some(Error::Http {
                status: self.status,
                reason: self.reason.clone(),
                url: self.url.to_string(),
            })
        } else {
            None
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Charset parameter of the Content-Type, lowercased.
    pub fn encoding(&self) -> Option<String> {
        self.content_type()?
            .split(';')
            .skip(1)
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, v)| v.trim().trim_matches('"').to_ascii_lowercase())
    }

    /// Cookies set by this response (not the whole jar).
    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v, &self.url))
            .collect()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Streaming(_))
    }

    /// The whole (decoded) body. A streamed body is read to the end and kept; reading
    /// it after `chunk()` has been called fails with `StreamConsumed`.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        match &mut self.body {
            Body::Buffered(b) => Ok(b.clone()),
            Body::Drained => Err(Error::StreamConsumed),
            Body::Streaming(s) => {
                if s.started {
                    return Err(Error::StreamConsumed);
                }
                let all = s.collect().await?;
                self.body = Body::Buffered(all.clone());
                Ok(all)
            }
        }
    }

    /// Body as text: charset from Content-Type (UTF-8 or ISO-8859-1), otherwise lossy UTF-8.
    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        let latin1 = matches!(
            self.encoding().as_deref(),
            Some("iso-8859-1") | Some("latin1") | Some("latin-1")
        );
        if latin1 {
            Ok(bytes.iter().map(|&b| b as char).collect())
        } else {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }

    /// Deserialize the body as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::ContentDecoding(io::Error::new(io::ErrorKind::InvalidData, e))
        })
    }

    /// Next piece of the body. Buffered bodies come out in one piece.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.body {
            Body::Streaming(s) => s.chunk().await,
            Body::Buffered(b) => {
                let b = std::mem::take(b);
                self.body = Body::Drained;
                Ok(if b.is_empty() { None } else { Some(b) })
            }
            Body::Drained => Ok(None),
        }
    }

    /// Release the body. An unfinished streamed body closes its connection.
    pub fn close(&mut self) {
        if let Body::Streaming(s) = &mut self.body {
            s.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Response {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.append(
                http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        let request = PreparedRequest {
            method: Method::GET,
            url: Url::parse("http://h.test/p").unwrap(),
            headers: HeaderMap::new(),
            body: None,
        };
        Response::buffered(
            StatusCode::from_u16(status).unwrap(),
            "Reason".into(),
            Version::HTTP_11,
            map,
            request,
            Duration::ZERO,
            Bytes::copy_from_slice(body),
        )
    }

    #[test]
    fn error_for_status_is_opt_in() {
        let r = response(404, &[], b"");
        assert!(!r.ok());
        let err = r.error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        let r = response(204, &[], b"");
        assert!(r.ok());
        assert!(r.error_for_status().is_ok());
    }

    #[test]
    fn redirect_needs_location() {
        assert!(response(302, &[("location", "/x")], b"").is_redirect());
        assert!(!response(302, &[], b"").is_redirect());
        assert!(!response(200, &[("location", "/x")], b"").is_redirect());
    }

    #[test]
    fn duplicate_headers_and_cookies() {
        let r = response(200, &[("set-cookie", "a=1"), ("set-cookie", "b=2; Path=/p")], b"");
        assert_eq!(r.headers.get_all(SET_COOKIE).iter().count(), 2);
        let names: Vec<_> = r.cookies().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn text_json_and_chunks() {
        let mut r = response(200, &[("content-type", "application/json; charset=UTF-8")], br#"{"k":[1,2]}"#);
        assert_eq!(r.encoding().as_deref(), Some("utf-8"));
        let v: serde_json::Value = r.json().await.unwrap();
        assert_eq!(v["k"][1], 2);
        assert_eq!(r.text().await.unwrap(), r#"{"k":[1,2]}"#);
        assert!(r.chunk().await.unwrap().is_some());
        assert!(r.chunk().await.unwrap().is_none());
        assert!(matches!(r.bytes().await, Err(Error::StreamConsumed)));
    }

    #[tokio::test]
    async fn latin1_text() {
        let mut r = response(200, &[("content-type", "text/plain; charset=ISO-8859-1")], b"caf\xe9");
        assert_eq!(r.text().await.unwrap(), "café");
    }

    #[test]
    fn read_timeouts_are_classified() {
        let e = read_error(
            io::Error::new(io::ErrorKind::TimedOut, "t"),
            "http://h.test/",
            Some(Duration::from_secs(1)),
        );
        assert!(matches!(e, Error::ReadTimeout { .. }));
        let e = read_error(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"), "http://h.test/", None);
        assert!(matches!(e, Error::Connection { .. }));
    }
}
