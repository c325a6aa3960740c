/*
 * session.rs
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

//! Session: a cookie jar and connection pool shared by every request made through it.
//!
//! Cloning a `Session` yields another handle to the same jar and pool. `close` ends the
//! session for all handles: idle connections are closed and later requests fail with
//! `SessionClosed`. There is no process-wide session; `Session::default()` builds a fresh one.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::auth::Auth;
use crate::config::SessionConfig;
use crate::cookie::CookieJar;
use crate::engine::{self, Engine, SessionDefaults};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::proxy::Proxies;
use crate::request::{ClientCert, RequestDescription, Verify};
use crate::response::Response;

struct Shared {
    config: SessionConfig,
    jar: CookieJar,
    pool: Arc<ConnectionPool>,
    defaults: RwLock<SessionDefaults>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.inner.jar.len())
            .field("pool", &self.inner.pool)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let pool = Arc::new(ConnectionPool::from_config(&config));
        Self {
            inner: Arc::new(Shared {
                config,
                jar: CookieJar::new(),
                pool,
                defaults: RwLock::new(SessionDefaults::default()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.inner.jar
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    fn defaults(&self) -> SessionDefaults {
        match self.inner.defaults.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_defaults(&self, f: impl FnOnce(&mut SessionDefaults)) {
        let mut guard = match self.inner.defaults.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }

    /// Auth used by requests that carry none of their own.
    pub fn set_auth(&self, auth: Option<Auth>) {
        self.update_defaults(|d| d.auth = auth);
    }

    /// Proxy map under each request's own (request keys win).
    pub fn set_proxies(&self, proxies: Proxies) {
        self.update_defaults(|d| d.proxies = proxies);
    }

    pub fn set_verify(&self, verify: Option<Verify>) {
        self.update_defaults(|d| d.verify = verify);
    }

    pub fn set_cert(&self, cert: Option<ClientCert>) {
        self.update_defaults(|d| d.cert = cert);
    }

    /// Query parameters added ahead of every request's own.
    pub fn set_params(&self, params: Vec<(String, String)>) {
        self.update_defaults(|d| d.params = params);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// Perform one logical request, following redirects as allowed.
    pub async fn request(&self, desc: RequestDescription) -> Result<Response> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let plan = engine::prepare(&self.inner.config, &self.defaults(), desc)?;
        let mut engine = Engine::new(&self.inner.config, &self.inner.jar, &self.inner.pool);
        engine.execute(plan).await
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(RequestDescription::get(url)).await
    }

    /// Close idle connections and forget cookies. Requests made afterwards fail with
    /// `SessionClosed`; streamed bodies still open keep their connection until dropped.
    pub fn close(&self) {
        self.inner.pool.clear(true);
        self.inner.jar.clear();
        debug!("session closed");
    }
}

/// One request on a throwaway session.
pub async fn request(desc: RequestDescription) -> Result<Response> {
    Session::default().request(desc).await
}
