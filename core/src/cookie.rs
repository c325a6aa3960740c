/*
 * cookie.rs
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

//! Cookie jar (RFC 6265 storage model, simplified domain rules).
//!
//! Domain matching is a plain suffix check without the public suffix list:
//! - no Domain attribute: host-only cookie for the response host;
//! - Domain must domain-match the response host (equal, or host ends with "." + domain);
//! - single-label Domain values (e.g. "com", "local") are rejected unless equal to the host;
//! - IP-address hosts only ever get host-only cookies.
//!
//! Cookies are keyed by (domain, path, name); a later Set-Cookie with the same key replaces
//! the earlier one. Expired cookies are dropped lazily when the jar is read.
//! Set-Cookie attribute parsing is done by the `cookie` crate.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;
use url::Url;

/// One stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercase domain without a leading dot.
    pub domain: String,
    pub path: String,
    /// Absolute expiry; `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
    /// True when the cookie only matches `domain` exactly (no Domain attribute was given).
    pub host_only: bool,
}

impl Cookie {
    /// Parse one Set-Cookie header value received in response to `url`.
    /// Returns `None` for malformed values or a Domain the host may not set.
    pub fn parse(header: &str, url: &Url) -> Option<Cookie> {
        Self::parse_at(header, url, Utc::now())
    }

    fn parse_at(header: &str, url: &Url, now: DateTime<Utc>) -> Option<Cookie> {
        let parsed = match ::cookie::Cookie::parse(header) {
            Ok(c) => c,
            Err(e) => {
                debug!(header, error = %e, "ignoring malformed Set-Cookie");
                return None;
            }
        };
        let host = url.host_str()?.to_ascii_lowercase();
        let (domain, host_only) = match parsed.domain() {
            Some(d) if !d.trim_start_matches('.').is_empty() => {
                let d = d.trim_start_matches('.').to_ascii_lowercase();
                if !domain_attribute_allowed(&host, &d) {
                    debug!(host = %host, domain = %d, "rejecting cookie for foreign domain");
                    return None;
                }
                let host_only = d == host && is_ip(&host);
                (d, host_only)
            }
            _ => (host.clone(), true),
        };
        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => default_path(url.path()),
        };
        let expires = match parsed.max_age() {
            Some(age) if age.whole_seconds() <= 0 => Some(now),
            // Past the representable range the cookie lives as long as the session.
            Some(age) => ChronoDuration::try_seconds(age.whole_seconds())
                .and_then(|d| now.checked_add_signed(d)),
            None => parsed
                .expires_datetime()
                .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0)),
        };
        Some(Cookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            path,
            expires,
            secure: parsed.secure().unwrap_or(false),
            http_only: parsed.http_only().unwrap_or(false),
            host_only,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(false, |e| e <= now)
    }

    /// Whether this cookie would be sent with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return false,
        };
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        };
        domain_ok
            && path_match(url.path(), &self.path)
            && (!self.secure || url.scheme() == "https")
    }
}

fn is_ip(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

/// host equals domain, or host ends with "." + domain (never for IP hosts).
fn domain_match(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    !is_ip(host)
        && host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

fn domain_attribute_allowed(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    domain.contains('.') && domain_match(host, domain)
}

/// RFC 6265 §5.1.4 default-path: directory of the request path.
fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}

/// RFC 6265 §5.1.4 path-match.
fn path_match(request_path: &str, cookie_path: &str) -> bool {
    let request_path = if request_path.is_empty() { "/" } else { request_path };
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CookieKey {
    domain: String,
    path: String,
    name: String,
}

#[derive(Debug, Default)]
struct JarInner {
    cookies: HashMap<CookieKey, (u64, Cookie)>,
    next_seq: u64,
}

impl JarInner {
    fn insert(&mut self, cookie: Cookie) {
        let key = CookieKey {
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            name: cookie.name.clone(),
        };
        // Replacement keeps the original creation order.
        let seq = match self.cookies.get(&key) {
            Some((seq, _)) => *seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.cookies.insert(key, (seq, cookie));
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.cookies.retain(|_, (_, c)| !c.is_expired_at(now));
    }
}

/// Per-session cookie store. Reads and merges may run concurrently from many tasks.
#[derive(Debug, Default)]
pub struct CookieJar {
    inner: RwLock<JarInner>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store cookies from Set-Cookie header values received in response to `url`.
    /// Returns how many were stored or replaced. Already-expired cookies delete their key.
    pub fn merge<'a>(&self, url: &Url, set_cookie_headers: impl IntoIterator<Item = &'a str>) -> usize {
        let now = Utc::now();
        let parsed: Vec<Cookie> = set_cookie_headers
            .into_iter()
            .filter_map(|h| Cookie::parse_at(h, url, now))
            .filter(|c| {
                if c.secure && url.scheme() != "https" {
                    debug!(name = %c.name, "ignoring Secure cookie set over plain http");
                    false
                } else {
                    true
                }
            })
            .collect();
        if parsed.is_empty() {
            return 0;
        }
        let mut inner = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut stored = 0;
        for cookie in parsed {
            if cookie.is_expired_at(now) {
                let key = CookieKey {
                    domain: cookie.domain,
                    path: cookie.path,
                    name: cookie.name,
                };
                inner.cookies.remove(&key);
            } else {
                inner.insert(cookie);
                stored += 1;
            }
        }
        stored
    }

    /// Cookies to send with a request to `url`: longest path first, then oldest first.
    pub fn cookies_for(&self, url: &Url) -> Vec<Cookie> {
        let now = Utc::now();
        let (mut matching, saw_expired) = {
            let inner = match self.inner.read() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut saw_expired = false;
            let mut matching: Vec<(u64, Cookie)> = Vec::new();
            for (seq, c) in inner.cookies.values() {
                if c.is_expired_at(now) {
                    saw_expired = true;
                } else if c.matches(url) {
                    matching.push((*seq, c.clone()));
                }
            }
            (matching, saw_expired)
        };
        if saw_expired {
            let mut inner = match self.inner.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.purge_expired(now);
        }
        matching.sort_by(|(sa, a), (sb, b)| b.path.len().cmp(&a.path.len()).then(sa.cmp(sb)));
        matching.into_iter().map(|(_, c)| c).collect()
    }

    /// `Cookie` header value for `url`, merging `extra` (name, value) pairs over the jar's.
    pub fn cookie_header(&self, url: &Url, extra: &[(String, String)]) -> Option<String> {
        let mut pairs: Vec<(String, String)> = self
            .cookies_for(url)
            .into_iter()
            .filter(|c| !extra.iter().any(|(n, _)| *n == c.name))
            .map(|c| (c.name, c.value))
            .collect();
        pairs.extend(extra.iter().cloned());
        if pairs.is_empty() {
            return None;
        }
        Some(
            pairs
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Insert a session cookie directly (host-only for `domain`, path "/").
    pub fn set(&self, name: &str, value: &str, domain: &str) {
        let mut inner = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.insert(Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.trim_start_matches('.').to_ascii_lowercase(),
            path: "/".to_string(),
            expires: None,
            secure: false,
            http_only: false,
            host_only: !domain.starts_with('.'),
        });
    }

    /// Value of the first unexpired cookie named `name`, any domain.
    pub fn get(&self, name: &str) -> Option<String> {
        self.all()
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// All unexpired cookies in creation order.
    pub fn all(&self) -> Vec<Cookie> {
        let now = Utc::now();
        let inner = match self.inner.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut v: Vec<(u64, Cookie)> = inner
            .cookies
            .values()
            .filter(|(_, c)| !c.is_expired_at(now))
            .cloned()
            .collect();
        v.sort_by_key(|(seq, _)| *seq);
        v.into_iter().map(|(_, c)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.cookies.clear();
    }
}
