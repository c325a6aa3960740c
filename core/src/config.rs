/*
 * config.rs
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

//! Session configuration: pool limits, redirect bound, default headers and
//! whether proxy / CA bundle settings are read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONNECTION, USER_AGENT};
use http::HeaderMap;

use crate::request::Timeout;

pub const DEFAULT_MAX_REDIRECTS: usize = 30;
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 10;
pub const DEFAULT_POOL_MAX_IDLE_TOTAL: usize = 100;
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Environment variables consulted (in order) for a CA bundle when `trust_env` is set.
const CA_BUNDLE_VARS: &[&str] = &["REQUESTS_CA_BUNDLE", "CURL_CA_BUNDLE"];

/// User-Agent sent unless the caller overrides it.
pub fn default_user_agent() -> String {
    format!("snekwest/{}", env!("CARGO_PKG_VERSION"))
}

/// Headers every session starts with.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&default_user_agent()) {
        headers.insert(USER_AGENT, v);
    }
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}

/// Session-wide settings. Construct with `SessionConfig::default()` and adjust with the `with_*` setters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Redirect hops followed before failing with `TooManyRedirects`.
    pub max_redirects: usize,
    /// Idle connections kept per (scheme, host, port).
    pub pool_max_idle_per_host: usize,
    /// Idle connections kept across all hosts.
    pub pool_max_idle_total: usize,
    /// Idle connections older than this are dropped on the next acquire.
    pub pool_idle_timeout: Duration,
    /// Headers merged under every request's own headers.
    pub headers: HeaderMap,
    /// Timeout used when a request does not set one.
    pub timeout: Option<Timeout>,
    /// Read proxies and CA bundle from the environment.
    pub trust_env: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            pool_max_idle_total: DEFAULT_POOL_MAX_IDLE_TOTAL,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            headers: default_headers(),
            timeout: None,
            trust_env: true,
        }
    }
}

impl SessionConfig {
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, n: usize) -> Self {
        self.pool_max_idle_per_host = n;
        self
    }

    pub fn with_pool_max_idle_total(mut self, n: usize) -> Self {
        self.pool_max_idle_total = n;
        self
    }

    pub fn with_pool_idle_timeout(mut self, idle: Duration) -> Self {
        self.pool_idle_timeout = idle;
        self
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_trust_env(mut self, trust_env: bool) -> Self {
        self.trust_env = trust_env;
        self
    }

    /// Add or replace a default header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
        self
    }
}

/// CA bundle path from the environment (REQUESTS_CA_BUNDLE, then CURL_CA_BUNDLE).
pub fn env_ca_bundle() -> Option<PathBuf> {
    CA_BUNDLE_VARS
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .find(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = SessionConfig::default();
        assert_eq!(c.max_redirects, 30);
        assert!(c.trust_env);
        let ua = c.headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(ua.starts_with("snekwest/"));
        assert_eq!(c.headers.get(ACCEPT).unwrap(), "*/*");
    }

    #[test]
    fn with_header_replaces_case_insensitively() {
        let c = SessionConfig::default().with_header("user-agent", "custom/1");
        assert_eq!(c.headers.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(c.headers.get(USER_AGENT).unwrap(), "custom/1");
        let c = c.with_header("bad name", "x");
        assert!(c.headers.get("bad name").is_none());
    }
}
