/*
 * redirect.rs
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

//! Redirect resolution: given a 3xx response and the request that produced it, build
//! the next request.
//!
//! - 303 becomes GET (except HEAD); 301 and 302 become GET only for POST; the body is
//!   dropped whenever the method changes.
//! - 307 and 308 keep method and body.
//! - `Authorization` is dropped when the host changes or https downgrades to http.
//! - `Cookie` and `Host` are dropped; the engine recomputes them for the new URL.

use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, LOCATION, TRANSFER_ENCODING,
};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};
use crate::request::PreparedRequest;

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Method for the next hop.
pub fn redirect_method(status: StatusCode, method: &Method) -> Method {
    match status.as_u16() {
        303 if *method != Method::HEAD => Method::GET,
        301 | 302 if *method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Whether credentials for `old` must not be sent to `new`.
pub fn should_strip_auth(old: &Url, new: &Url) -> bool {
    if old.host_str() != new.host_str() {
        return true;
    }
    let old_port = old.port_or_known_default();
    let new_port = new.port_or_known_default();
    // http -> https upgrade on default ports keeps credentials.
    if old.scheme() == "http"
        && new.scheme() == "https"
        && old_port == default_port("http")
        && new_port == default_port("https")
    {
        return false;
    }
    old.scheme() != new.scheme() || old_port != new_port
}

/// Resolve `Location` against the current URL. Absolute http(s) URLs only.
pub fn resolve_location(current: &Url, headers: &HeaderMap) -> Result<Url> {
    let raw = headers
        .get(LOCATION)
        .ok_or_else(|| Error::invalid_url(current.as_str(), "redirect without Location header"))?;
    let location = String::from_utf8_lossy(raw.as_bytes()).trim().to_string();
    let mut next = current
        .join(&location)
        .map_err(|e| Error::invalid_url(location.clone(), e))?;
    match next.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::invalid_url(
                location,
                format!("unsupported redirect scheme {:?}", other),
            ))
        }
    }
    if next.fragment().is_none() {
        next.set_fragment(current.fragment());
    }
    Ok(next)
}

/// Build the request for the next hop, or `None` if `status` is not a redirect.
pub fn next_request(
    prev: &PreparedRequest,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<Option<PreparedRequest>> {
    if !is_redirect(status) {
        return Ok(None);
    }
    let url = resolve_location(&prev.url, headers)?;
    let method = redirect_method(status, &prev.method);
    let mut next_headers = prev.headers.clone();
    next_headers.remove(COOKIE);
    next_headers.remove(HOST);

    let keep_body = method == prev.method && matches!(status.as_u16(), 307 | 308);
    let body = if keep_body { prev.body.clone() } else { None };
    if body.is_none() {
        next_headers.remove(CONTENT_TYPE);
        next_headers.remove(CONTENT_LENGTH);
        next_headers.remove(TRANSFER_ENCODING);
    }
    if should_strip_auth(&prev.url, &url) {
        next_headers.remove(AUTHORIZATION);
    }
    Ok(Some(PreparedRequest {
        method,
        url,
        headers: next_headers,
        body,
    }))
}
