/*
 * request.rs
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

//! HTTP request description: method, URL and the optional attributes a caller may set.
//!
//! Built via chained setters on `RequestDescription`; the engine validates and encodes it
//! into a `PreparedRequest` (the bytes that go on the wire) before any connection is made.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::Serialize;
use url::Url;

use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::multipart::Part;
use crate::proxy::Proxies;

/// Connect and read deadlines. Either may be absent (no deadline for that phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeout {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
}

impl Timeout {
    /// Same deadline for the connect and read phases.
    pub fn new(both: Duration) -> Self {
        Self {
            connect: Some(both),
            read: Some(both),
        }
    }

    pub fn split(connect: Option<Duration>, read: Option<Duration>) -> Self {
        Self { connect, read }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::new(d)
    }
}

impl From<(Duration, Duration)> for Timeout {
    fn from((connect, read): (Duration, Duration)) -> Self {
        Timeout::split(Some(connect), Some(read))
    }
}

/// Server certificate verification mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Verify {
    /// Platform roots, falling back to the bundled Mozilla roots.
    #[default]
    Enabled,
    /// Accept any certificate and host name.
    Disabled,
    /// Trust only the certificates in this PEM bundle.
    CaBundle(PathBuf),
}

impl From<bool> for Verify {
    fn from(b: bool) -> Self {
        if b {
            Verify::Enabled
        } else {
            Verify::Disabled
        }
    }
}

/// Client certificate for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientCert {
    /// One PEM file holding the certificate chain and the private key.
    Combined(PathBuf),
    /// Certificate chain and private key in separate PEM files.
    Pair { cert: PathBuf, key: PathBuf },
}

/// `data` parameter: raw bytes or form pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Raw(Bytes),
    Form(Vec<(String, String)>),
}

/// Declarative description of one logical HTTP exchange.
#[derive(Debug)]
pub struct RequestDescription {
    pub method: String,
    pub url: String,
    pub params: Vec<(String, String)>,
    /// Header name/value pairs; names compare case-insensitively, last write wins.
    pub headers: Vec<(String, String)>,
    /// Cookies for this request only, merged over the jar.
    pub cookies: Vec<(String, String)>,
    pub data: Option<Data>,
    /// Serialized at build time so that an encoding failure surfaces as `JsonEncode`.
    pub json: Option<std::result::Result<serde_json::Value, serde_json::Error>>,
    pub files: Vec<Part>,
    pub auth: Option<Auth>,
    pub timeout: Option<Timeout>,
    pub allow_redirects: bool,
    pub proxies: Proxies,
    pub verify: Option<Verify>,
    pub cert: Option<ClientCert>,
    pub stream: bool,
}

impl RequestDescription {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            data: None,
            json: None,
            files: Vec::new(),
            auth: None,
            timeout: None,
            allow_redirects: true,
            proxies: Proxies::default(),
            verify: None,
            cert: None,
            stream: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// Append one query parameter (keys may repeat).
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add or replace a header. Comparison is case-insensitive per HTTP.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.cookies.retain(|(k, _)| *k != name);
        self.cookies.push((name, value.into()));
        self
    }

    /// Raw body bytes, passed through unchanged.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.data = Some(Data::Raw(body.into()));
        self
    }

    /// Form-urlencoded body. Repeated keys are preserved in order.
    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.data = Some(Data::Form(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.json = Some(serde_json::to_value(value));
        self
    }

    /// Add a multipart part (file or scalar field).
    pub fn part(mut self, part: Part) -> Self {
        self.files.push(part);
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    /// Route requests for `key` (e.g. "http", "https", "all", "https://host") through `proxy_url`.
    pub fn proxy(mut self, key: impl Into<String>, proxy_url: impl Into<String>) -> Self {
        self.proxies.insert(key, proxy_url);
        self
    }

    pub fn verify(mut self, verify: impl Into<Verify>) -> Self {
        self.verify = Some(verify.into());
        self
    }

    pub fn cert(mut self, cert: ClientCert) -> Self {
        self.cert = Some(cert);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Uppercased, validated method token.
    pub(crate) fn normalized_method(&self) -> Result<Method> {
        let upper = self.method.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return Err(Error::InvalidMethod(self.method.clone()));
        }
        Method::from_bytes(upper.as_bytes()).map_err(|_| Error::InvalidMethod(self.method.clone()))
    }
}

/// Fully encoded request for one hop: what the connection writes.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl PreparedRequest {
    /// Replace a header value. Invalid values are rejected with `InvalidHeader`.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let n = http::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::invalid_header(name, e))?;
        let v = http::HeaderValue::from_str(value).map_err(|e| Error::invalid_header(name, e))?;
        self.headers.insert(n, v);
        Ok(())
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, |b| b.len())
    }
}
