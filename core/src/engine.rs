/*
 * engine.rs
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

//! Request engine: drives one logical request from description to final response.
//!
//! Building -> Connecting -> Sending -> AwaitingResponse -> (Redirecting -> Building)
//! -> Complete | Failed. Everything that can fail without the network (URL, headers,
//! body, auth) fails in `prepare`, before a connection is acquired. A connection that
//! saw a network error is dropped, never pooled.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::header::{
    HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, SET_COOKIE, WWW_AUTHENTICATE,
};
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::auth::Auth;
use crate::body::Body;
use crate::config::{self, SessionConfig};
use crate::connection::{Connection, ResponseHead};
use crate::cookie::CookieJar;
use crate::decode::{self, Decoder};
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolKey};
use crate::proxy::{self, Proxies};
use crate::redirect;
use crate::request::{ClientCert, PreparedRequest, RequestDescription, Timeout, Verify};
use crate::response::{read_error, BodyStream, Response};
use crate::tls::TlsPolicy;
use crate::uri;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Building,
    Connecting,
    Sending,
    AwaitingResponse,
    Redirecting,
    Complete,
    Failed,
}

/// Session-level settings merged under each request's own.
#[derive(Debug, Clone, Default)]
pub struct SessionDefaults {
    pub auth: Option<Auth>,
    pub proxies: Proxies,
    pub verify: Option<Verify>,
    pub cert: Option<ClientCert>,
    /// Query parameters placed before the request's own.
    pub params: Vec<(String, String)>,
}

/// A validated request plus the per-request settings the engine needs on every hop.
#[derive(Debug)]
pub(crate) struct Plan {
    pub request: PreparedRequest,
    pub auth: Option<Auth>,
    /// Request-only cookies, layered over the jar on every hop.
    pub cookies: Vec<(String, String)>,
    pub explicit_cookie: bool,
    pub timeout: Timeout,
    pub proxies: Proxies,
    pub tls: TlsPolicy,
    pub allow_redirects: bool,
    pub stream: bool,
}

fn merge_headers(base: &HeaderMap, overrides: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = base.clone();
    for (name, value) in overrides {
        let n = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::invalid_header(name.as_str(), e))?;
        let v = HeaderValue::from_str(value).map_err(|e| Error::invalid_header(name.as_str(), e))?;
        headers.insert(n, v);
    }
    Ok(headers)
}

/// Building: validate and encode `desc` against the session's configuration.
pub(crate) fn prepare(
    config: &SessionConfig,
    defaults: &SessionDefaults,
    desc: RequestDescription,
) -> Result<Plan> {
    let method = desc.normalized_method()?;
    let mut url = uri::parse_absolute(&desc.url)?;
    let credentials = uri::take_credentials(&mut url);
    let mut params = defaults.params.clone();
    params.extend(desc.params);
    uri::append_query(&mut url, &params);

    let mut headers = merge_headers(&config.headers, &desc.headers)?;
    let encoded = Body::select(desc.data, desc.json, desc.files)?.encode()?;
    let body = match encoded {
        Some(encoded) => {
            if let (Some(ct), false) = (&encoded.content_type, headers.contains_key(CONTENT_TYPE)) {
                let v = HeaderValue::from_str(ct).map_err(|e| Error::invalid_header("content-type", e))?;
                headers.insert(CONTENT_TYPE, v);
            }
            headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.bytes.len()));
            Some(encoded.bytes)
        }
        None => {
            if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
            None
        }
    };

    let explicit_cookie = headers.contains_key(COOKIE);
    let mut request = PreparedRequest {
        method,
        url,
        headers,
        body,
    };

    let auth = desc
        .auth
        .or_else(|| defaults.auth.clone())
        .or_else(|| credentials.map(|(user, pass)| Auth::basic(user, pass)));
    if let Some(auth) = &auth {
        auth.apply(&mut request)?;
    }

    let mut verify = desc
        .verify
        .or_else(|| defaults.verify.clone())
        .unwrap_or_default();
    if verify == Verify::Enabled && config.trust_env {
        if let Some(bundle) = config::env_ca_bundle() {
            verify = Verify::CaBundle(bundle);
        }
    }

    Ok(Plan {
        request,
        auth,
        cookies: desc.cookies,
        explicit_cookie,
        timeout: desc.timeout.or(config.timeout).unwrap_or_default(),
        proxies: desc.proxies.merged_over(&defaults.proxies),
        tls: TlsPolicy {
            verify,
            cert: desc.cert.or_else(|| defaults.cert.clone()),
        },
        allow_redirects: desc.allow_redirects,
        stream: desc.stream,
    })
}

fn header_values<'h>(headers: &'h HeaderMap, name: HeaderName) -> impl Iterator<Item = &'h str> {
    headers.get_all(name).into_iter().filter_map(|v| v.to_str().ok())
}

/// Replace the Cookie header with the jar's cookies for the request URL plus `extra`.
fn attach_cookies(req: &mut PreparedRequest, jar: &CookieJar, extra: &[(String, String)]) -> Result<()> {
    req.headers.remove(COOKIE);
    if let Some(value) = jar.cookie_header(&req.url, extra) {
        req.set_header(COOKIE.as_str(), &value)?;
    }
    Ok(())
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Runs one logical request against a session's jar and pool.
pub(crate) struct Engine<'s> {
    config: &'s SessionConfig,
    jar: &'s CookieJar,
    pool: &'s Arc<ConnectionPool>,
    state: State,
}

impl<'s> Engine<'s> {
    pub fn new(config: &'s SessionConfig, jar: &'s CookieJar, pool: &'s Arc<ConnectionPool>) -> Self {
        Self {
            config,
            jar,
            pool,
            state: State::Building,
        }
    }

    fn enter(&mut self, next: State, url: &Url, hop: usize) {
        trace!(from = ?self.state, to = ?next, url = %url, hop, "request state");
        self.state = next;
    }

    pub async fn execute(&mut self, plan: Plan) -> Result<Response> {
        let method = plan.request.method.clone();
        let url = plan.request.url.clone();
        match self.run(plan).await {
            Ok(response) => {
                self.enter(State::Complete, &response.url, response.history.len());
                Ok(response)
            }
            Err(e) => {
                self.state = State::Failed;
                debug!(method = %method, url = %url, error = %e, "request failed");
                Err(e)
            }
        }
    }

    /// Read the rest of a body, then pool or close the connection.
    async fn read_body(
        &self,
        mut conn: Connection,
        key: &PoolKey,
        url: &str,
        plan: &Plan,
        pool: bool,
    ) -> Result<Bytes> {
        let mut raw = BytesMut::new();
        while let Some(chunk) = conn
            .read_chunk()
            .await
            .map_err(|e| read_error(e, url, plan.timeout.read))?
        {
            raw.extend_from_slice(&chunk);
        }
        if pool {
            self.pool.release(key, conn);
        } else {
            trace!(connection = conn.id(), key = %key, "not pooling connection after cross-origin redirect");
        }
        Ok(raw.freeze())
    }

    async fn run(&mut self, plan: Plan) -> Result<Response> {
        let mut request = plan.request.clone();
        let mut explicit_cookie = plan.explicit_cookie;
        if !explicit_cookie {
            attach_cookies(&mut request, self.jar, &plan.cookies)?;
        }
        let mut history: Vec<Response> = Vec::new();
        let mut auth_active = plan.auth.is_some();
        let mut challenged = false;

        loop {
            let hop = history.len();
            let url = request.url.to_string();

            self.enter(State::Connecting, &request.url, hop);
            let proxy = proxy::resolve(&plan.proxies, &request.url, self.config.trust_env)?;
            let key = PoolKey::new(&request.url, proxy, plan.tls.clone());
            let (mut conn, reused) = self.pool.acquire(&key, plan.timeout.connect, &url).await?;
            conn.set_read_timeout(plan.timeout.read);

            self.enter(State::Sending, &request.url, hop);
            let started = Instant::now();
            conn.send(&request, key.uses_absolute_form(), key.proxy_authorization())
                .await
                .map_err(|e| read_error(e, &url, plan.timeout.read))?;

            self.enter(State::AwaitingResponse, &request.url, hop);
            let ResponseHead {
                version,
                status,
                reason,
                headers,
            } = conn
                .read_head(&request.method)
                .await
                .map_err(|e| read_error(e, &url, plan.timeout.read))?;
            let elapsed = started.elapsed();
            debug!(
                method = %request.method,
                url = %url,
                status = status.as_u16(),
                connection = conn.id(),
                reused,
                hop,
                "response"
            );
            let stored = self.jar.merge(&request.url, header_values(&headers, SET_COOKIE));
            if stored > 0 {
                trace!(url = %url, stored, "cookies stored");
            }

            if status == StatusCode::UNAUTHORIZED && auth_active && !challenged {
                if let Some(auth) = plan.auth.as_ref().filter(|a| a.is_challenge_response()) {
                    let mut retry = request.clone();
                    if auth.respond_to_challenge(&mut retry, header_values(&headers, WWW_AUTHENTICATE))? {
                        challenged = true;
                        self.read_body(conn, &key, &url, &plan, true).await?;
                        if !explicit_cookie {
                            attach_cookies(&mut retry, self.jar, &plan.cookies)?;
                        }
                        debug!(url = %url, scheme = auth.name(), "answering authentication challenge");
                        self.enter(State::Building, &retry.url, hop);
                        request = retry;
                        continue;
                    }
                }
            }

            if plan.allow_redirects && redirect::is_redirect(status) {
                self.enter(State::Redirecting, &request.url, hop);
                if let Some(mut next) = redirect::next_request(&request, status, &headers)? {
                    if history.len() >= self.config.max_redirects {
                        return Err(Error::TooManyRedirects {
                            max: self.config.max_redirects,
                            url: next.url.to_string(),
                        });
                    }
                    let keep = same_origin(&request.url, &next.url);
                    let raw = self.read_body(conn, &key, &url, &plan, keep).await?;
                    let body = decode::decode_all(&headers, &raw).map_err(Error::ContentDecoding)?;
                    if redirect::should_strip_auth(&request.url, &next.url) {
                        auth_active = false;
                    }
                    debug!(from = %url, to = %next.url, status = status.as_u16(), hop, "following redirect");
                    history.push(Response::buffered(
                        status, reason, version, headers, request, elapsed, body,
                    ));
                    explicit_cookie = false;
                    attach_cookies(&mut next, self.jar, &plan.cookies)?;
                    challenged = false;
                    self.enter(State::Building, &next.url, hop + 1);
                    request = next;
                    continue;
                }
            }

            let decoder = Decoder::for_headers(&headers);
            if plan.stream {
                let stream = BodyStream::new(
                    conn,
                    key,
                    Arc::clone(self.pool),
                    decoder,
                    url,
                    plan.timeout.read,
                );
                return Ok(
                    Response::streaming(status, reason, version, headers, request, elapsed, stream)
                        .with_history(history),
                );
            }
            let raw = self.read_body(conn, &key, &url, &plan, true).await?;
            let body = if decoder.is_identity() || raw.is_empty() {
                raw
            } else {
                decode::decode_all(&headers, &raw).map_err(Error::ContentDecoding)?
            };
            return Ok(
                Response::buffered(status, reason, version, headers, request, elapsed, body)
                    .with_history(history),
            );
        }
    }
}
