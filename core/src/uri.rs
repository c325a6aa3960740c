/*
 * uri.rs
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

//! Request URLs: parse absolute http(s) URLs, append percent-encoded query pairs,
//! derive the request target and Host header. Query keys and values are encoded so that
//! only RFC 3986 unreserved characters stay literal; an existing query string on the base
//! URL is kept as-is and new pairs are appended after it.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{Error, Result};

/// Query component safe set: everything except unreserved (ALPHA / DIGIT / - . _ ~).
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Form bodies additionally keep space for the '+' substitution.
const FORM_COMPONENT: &AsciiSet = &QUERY_COMPONENT.remove(b' ');

/// Percent-encode one query key or value.
pub fn encode_query_component(s: &str) -> String {
    utf8_percent_encode(s, QUERY_COMPONENT).to_string()
}

/// application/x-www-form-urlencoded encoding of one key or value (space becomes '+').
pub fn encode_form_component(s: &str) -> String {
    utf8_percent_encode(s, FORM_COMPONENT)
        .to_string()
        .replace(' ', "+")
}

/// Join pairs as `k=v&k=v`, preserving order and repeated keys.
pub fn encode_query_pairs(pairs: &[(String, String)]) -> String {
    join_pairs(pairs, encode_query_component)
}

/// Form-urlencode pairs for a request body.
pub fn encode_form_pairs(pairs: &[(String, String)]) -> String {
    join_pairs(pairs, encode_form_component)
}

fn join_pairs(pairs: &[(String, String)], encode: fn(&str) -> String) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse an absolute http or https URL. Relative URLs and other schemes are rejected.
pub fn parse_absolute(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::invalid_url(raw, "URL is empty"));
    }
    let url = Url::parse(raw).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => {
            Error::invalid_url(raw, "no scheme supplied; relative URLs are not accepted")
        }
        other => Error::invalid_url(raw, other),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::invalid_url(
                raw,
                format!("unsupported scheme {:?}", other),
            ))
        }
    }
    match url.host_str() {
        Some(h) if !h.is_empty() => {}
        _ => return Err(Error::invalid_url(raw, "no host")),
    }
    Ok(url)
}

/// Build the final request URL from `base` and query pairs.
pub fn build_url(base: &str, params: &[(String, String)]) -> Result<Url> {
    let mut url = parse_absolute(base)?;
    append_query(&mut url, params);
    Ok(url)
}

/// Append encoded pairs after any existing query.
pub fn append_query(url: &mut Url, params: &[(String, String)]) {
    if params.is_empty() {
        return;
    }
    let extra = encode_query_pairs(params);
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, extra),
        _ => extra,
    };
    url.set_query(Some(&query));
}

/// Origin-form request target: path plus query, never the fragment.
pub fn request_target(url: &Url) -> String {
    let path = url.path();
    let path = if path.is_empty() { "/" } else { path };
    match url.query() {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    }
}

/// Absolute-form request target used when talking to a plain HTTP proxy.
pub fn absolute_target(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.to_string()
}

/// Host header value: host, plus port when it is not the scheme default.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Port, falling back to the scheme default.
pub fn effective_port(url: &Url) -> u16 {
    url.port_or_known_default()
        .unwrap_or(if url.scheme() == "https" { 443 } else { 80 })
}

/// Remove userinfo from the URL, returning decoded (username, password) if present.
pub fn take_credentials(url: &mut Url) -> Option<(String, String)> {
    if url.username().is_empty() && url.password().is_none() {
        return None;
    }
    let user = percent_decode_str(url.username())
        .decode_utf8_lossy()
        .into_owned();
    let pass = url
        .password()
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
        .unwrap_or_default();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Some((user, pass))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(v: &[(&str, &str)]) -> Vec<(String, String)> {
        v.iter().map(|(k, val)| (k.to_string(), val.to_string())).collect()
    }

    #[test]
    fn query_pairs_round_trip_in_order() {
        let p = pairs(&[
            ("a", "1"),
            ("b", "x y&z=w"),
            ("a", "2"),
            ("ünï", "€/?#"),
            ("empty", ""),
        ]);
        let url = build_url("https://example.com/path", &p).unwrap();
        let back: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(back, p);
    }

    #[test]
    fn existing_query_is_kept_and_appended() {
        let url = build_url("http://h/p?x=%2F1", &pairs(&[("y", "2")])).unwrap();
        assert_eq!(url.query(), Some("x=%2F1&y=2"));
    }

    #[test]
    fn relative_and_hostless_urls_are_rejected() {
        assert!(matches!(parse_absolute("/just/a/path"), Err(Error::InvalidUrl { .. })));
        assert!(matches!(parse_absolute("example.com"), Err(Error::InvalidUrl { .. })));
        assert!(matches!(parse_absolute("ftp://example.com/"), Err(Error::InvalidUrl { .. })));
        assert!(matches!(parse_absolute(""), Err(Error::InvalidUrl { .. })));
        assert!(matches!(parse_absolute("http://"), Err(Error::InvalidUrl { .. })));
    }

    #[test]
    fn form_encoding_uses_plus_for_space() {
        let body = encode_form_pairs(&pairs(&[("q", "a b"), ("q", "c+d")]));
        assert_eq!(body, "q=a+b&q=c%2Bd");
    }

    #[test]
    fn target_and_host() {
        let url = parse_absolute("http://example.com:8080/a/b?c=d#frag").unwrap();
        assert_eq!(request_target(&url), "/a/b?c=d");
        assert_eq!(host_header(&url), "example.com:8080");
        let url = parse_absolute("https://example.com").unwrap();
        assert_eq!(request_target(&url), "/");
        assert_eq!(host_header(&url), "example.com");
        assert_eq!(effective_port(&url), 443);
    }

    #[test]
    fn credentials_are_taken_from_userinfo() {
        let mut url = parse_absolute("http://us%40er:p%3Ass@h/").unwrap();
        let creds = take_credentials(&mut url);
        assert_eq!(creds, Some(("us@er".to_string(), "p:ss".to_string())));
        assert_eq!(url.as_str(), "http://h/");
    }
}
