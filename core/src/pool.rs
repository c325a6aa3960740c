/*
 * pool.rs
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

//! Connection pool.
//!
//! Idle connections are kept per `PoolKey` in a deque: released at the back, reused from
//! the back (most recently used first), evicted from the front. A connection is in the pool
//! or checked out by exactly one request, never both. Locks are held for bookkeeping only;
//! connecting happens outside them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use url::Url;

use crate::config::SessionConfig;
use crate::connection::{self, Connection};
use crate::error::{Error, Result};
use crate::proxy::ProxyTarget;
use crate::tls::{TlsConfigs, TlsPolicy};
use crate::uri;

/// Which connections are interchangeable: same origin, same proxy, same TLS settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub proxy: Option<ProxyTarget>,
    /// `None` for plain http.
    pub tls: Option<TlsPolicy>,
}

impl PoolKey {
    pub fn new(url: &Url, proxy: Option<ProxyTarget>, tls: TlsPolicy) -> PoolKey {
        let scheme = url.scheme().to_string();
        let tls = (scheme == "https").then_some(tls);
        PoolKey {
            host: url.host_str().unwrap_or("").to_ascii_lowercase(),
            port: uri::effective_port(url),
            scheme,
            proxy,
            tls,
        }
    }

    /// Plain http through a proxy: requests carry absolute-form targets.
    pub fn uses_absolute_form(&self) -> bool {
        self.proxy.is_some() && self.scheme == "http"
    }

    pub fn proxy_authorization(&self) -> Option<&str> {
        self.proxy.as_ref().and_then(|p| p.authorization.as_deref())
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?;
        if let Some(p) = &self.proxy {
            write!(f, " via {}", p.display())?;
        }
        Ok(())
    }
}

struct Idle {
    conn: Connection,
    since: Instant,
}

type IdleQueue = Arc<Mutex<VecDeque<Idle>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Reusable connections for one session. Each key has its own lock so that
/// unrelated hosts never wait on each other.
pub struct ConnectionPool {
    max_per_key: usize,
    max_total: usize,
    idle_timeout: Duration,
    queues: RwLock<HashMap<PoolKey, IdleQueue>>,
    total: AtomicUsize,
    opened: AtomicU64,
    closed: AtomicBool,
    tls: TlsConfigs,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_per_key", &self.max_per_key)
            .field("max_total", &self.max_total)
            .field("idle_timeout", &self.idle_timeout)
            .field("idle", &self.total_idle())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(max_per_key: usize, max_total: usize, idle_timeout: Duration) -> Self {
        Self {
            max_per_key,
            max_total,
            idle_timeout,
            queues: RwLock::new(HashMap::new()),
            total: AtomicUsize::new(0),
            opened: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            tls: TlsConfigs::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.pool_max_idle_per_host,
            config.pool_max_idle_total,
            config.pool_idle_timeout,
        )
    }

    fn read_queues(&self) -> RwLockReadGuard<'_, HashMap<PoolKey, IdleQueue>> {
        match self.queues.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_queues(&self) -> RwLockWriteGuard<'_, HashMap<PoolKey, IdleQueue>> {
        match self.queues.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn existing_queue(&self, key: &PoolKey) -> Option<IdleQueue> {
        self.read_queues().get(key).cloned()
    }

    /// Forget the queue for `key` if it holds nothing. Queues only gain entries under
    /// the map's write lock, so a removed queue stays empty.
    fn prune(&self, key: &PoolKey) {
        let mut queues = self.write_queues();
        if queues.get(key).map_or(false, |q| lock(q).is_empty()) {
            queues.remove(key);
            trace!(key = %key, "dropped empty idle queue");
        }
    }

    /// Take an idle connection for `key`, skipping expired and dead ones.
    pub fn checkout(&self, key: &PoolKey) -> Option<Connection> {
        let queue = self.existing_queue(key)?;
        let now = Instant::now();
        let mut queue = lock(&queue);
        let before = queue.len();
        queue.retain(|i| now.duration_since(i.since) <= self.idle_timeout);
        let mut found = None;
        while let Some(idle) = queue.pop_back() {
            if idle.conn.is_alive() {
                found = Some(idle.conn);
                break;
            }
            trace!(key = %key, connection = idle.conn.id(), "discarding dead idle connection");
        }
        self.total.fetch_sub(before - queue.len(), Ordering::AcqRel);
        let empty = queue.is_empty();
        drop(queue);
        if empty {
            self.prune(key);
        }
        found
    }

    /// An idle connection for `key`, or a new one. The bool is true when reused.
    pub async fn acquire(
        &self,
        key: &PoolKey,
        connect_timeout: Option<Duration>,
        url: &str,
    ) -> Result<(Connection, bool)> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        if let Some(conn) = self.checkout(key) {
            debug!(key = %key, connection = conn.id(), "reusing pooled connection");
            return Ok((conn, true));
        }
        let tls = match &key.tls {
            Some(policy) => Some(self.tls.client_config(policy).await?),
            None => None,
        };
        let conn = connection::establish(key, tls, connect_timeout, url).await?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok((conn, false))
    }

    /// Return a connection after its response was fully read. Connections that cannot
    /// carry another request are closed instead.
    pub fn release(&self, key: &PoolKey, conn: Connection) {
        if !conn.is_reusable() || self.is_closed() || self.max_per_key == 0 {
            trace!(key = %key, connection = conn.id(), "closing connection");
            return;
        }
        {
            let mut queues = self.write_queues();
            let mut queue = lock(queues.entry(key.clone()).or_default());
            queue.push_back(Idle {
                conn,
                since: Instant::now(),
            });
            self.total.fetch_add(1, Ordering::AcqRel);
            while queue.len() > self.max_per_key {
                if let Some(evicted) = queue.pop_front() {
                    self.total.fetch_sub(1, Ordering::AcqRel);
                    debug!(key = %key, connection = evicted.conn.id(), "evicted idle connection");
                }
            }
        }
        while self.total.load(Ordering::Acquire) > self.max_total {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    /// Drop the least recently released idle connection across all keys.
    fn evict_oldest(&self) -> bool {
        let queues: Vec<(PoolKey, IdleQueue)> = self
            .read_queues()
            .iter()
            .map(|(k, q)| (k.clone(), q.clone()))
            .collect();
        let oldest = queues
            .iter()
            .filter_map(|(k, q)| lock(q).front().map(|i| (k, q, i.since)))
            .min_by_key(|(_, _, since)| *since);
        let Some((key, queue, _)) = oldest else {
            return false;
        };
        let mut queue = lock(queue);
        let Some(evicted) = queue.pop_front() else {
            return false;
        };
        let empty = queue.is_empty();
        drop(queue);
        self.total.fetch_sub(1, Ordering::AcqRel);
        debug!(key = %key, connection = evicted.conn.id(), "evicted idle connection");
        if empty {
            self.prune(key);
        }
        true
    }

    /// Close every idle connection. With `shut` set the pool accepts no more work.
    pub fn clear(&self, shut: bool) {
        if shut {
            self.closed.store(true, Ordering::Release);
        }
        let mut queues = self.write_queues();
        let mut n = 0;
        for queue in queues.values() {
            let mut queue = lock(queue);
            n += queue.len();
            queue.clear();
        }
        queues.clear();
        if shut {
            self.tls.clear();
        }
        self.total.fetch_sub(n, Ordering::AcqRel);
        debug!(closed = n, "cleared connection pool");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idle connections for an origin, across proxies and TLS settings.
    pub fn idle_count(&self, scheme: &str, host: &str, port: u16) -> usize {
        let host = host.to_ascii_lowercase();
        self.read_queues()
            .iter()
            .filter(|(k, _)| k.scheme == scheme && k.host == host && k.port == port)
            .map(|(_, q)| lock(q).len())
            .sum()
    }

    pub fn total_idle(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Connections opened over the lifetime of the pool.
    pub fn connections_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::HttpStream;
    use http::{HeaderMap, Method};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn key(host: &str) -> PoolKey {
        PoolKey::new(
            &Url::parse(&format!("http://{}:80/", host)).unwrap(),
            None,
            TlsPolicy::default(),
        )
    }

    /// A connection that has completed one keep-alive exchange, plus its server end.
    async fn finished_connection() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut server = server.unwrap().0;
        let mut conn = Connection::new(HttpStream::Plain(client.unwrap()));
        let req = crate::request::PreparedRequest {
            method: Method::GET,
            url: Url::parse("http://h.test/").unwrap(),
            headers: HeaderMap::new(),
            body: None,
        };
        conn.send(&req, false, None).await.unwrap();
        let mut buf = [0u8; 512];
        let _ = server.read(&mut buf).await.unwrap();
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        conn.read_head(&Method::GET).await.unwrap();
        conn.drain().await.unwrap();
        (conn, server)
    }

    #[tokio::test]
    async fn release_then_checkout_reuses() {
        let pool = ConnectionPool::new(2, 10, Duration::from_secs(60));
        let (conn, _server) = finished_connection().await;
        let id = conn.id();
        let k = key("a.test");
        pool.release(&k, conn);
        assert_eq!(pool.idle_count("http", "a.test", 80), 1);
        let again = pool.checkout(&k).unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.total_idle(), 0);
        assert!(pool.checkout(&key("b.test")).is_none());
    }

    #[tokio::test]
    async fn per_key_and_total_caps_evict_oldest() {
        let pool = ConnectionPool::new(2, 3, Duration::from_secs(60));
        let mut servers = Vec::new();
        let mut ids = Vec::new();
        for host in ["a.test", "a.test", "a.test", "b.test", "b.test"] {
            let (conn, server) = finished_connection().await;
            servers.push(server);
            ids.push(conn.id());
            pool.release(&key(host), conn);
        }
        assert_eq!(pool.total_idle(), 3);
        assert_eq!(pool.idle_count("http", "a.test", 80), 1);
        assert_eq!(pool.idle_count("http", "b.test", 80), 2);
        // The survivor for a.test is the most recently released one.
        assert_eq!(pool.checkout(&key("a.test")).unwrap().id(), ids[2]);
    }

    #[tokio::test]
    async fn expired_and_dead_connections_are_skipped() {
        let pool = ConnectionPool::new(5, 10, Duration::from_millis(30));
        let (conn, _server) = finished_connection().await;
        pool.release(&key("a.test"), conn);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pool.checkout(&key("a.test")).is_none());
        assert_eq!(pool.total_idle(), 0);

        let pool = ConnectionPool::new(5, 10, Duration::from_secs(60));
        let (conn, server) = finished_connection().await;
        pool.release(&key("a.test"), conn);
        drop(server);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.checkout(&key("a.test")).is_none());
        assert_eq!(pool.total_idle(), 0);
    }

    #[tokio::test]
    async fn closed_pool_refuses_work() {
        let pool = ConnectionPool::new(5, 10, Duration::from_secs(60));
        let (conn, _server) = finished_connection().await;
        pool.release(&key("a.test"), conn);
        pool.clear(true);
        assert_eq!(pool.total_idle(), 0);
        let err = pool.acquire(&key("a.test"), None, "http://a.test/").await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
    }

    #[test]
    fn https_keys_carry_tls_policy() {
        let u = Url::parse("https://Example.COM/x").unwrap();
        let k = PoolKey::new(&u, None, TlsPolicy::default());
        assert_eq!((k.host.as_str(), k.port), ("example.com", 443));
        assert!(k.tls.is_some());
        assert_eq!(k.to_string(), "https://example.com:443");
        assert!(!k.uses_absolute_form());
    }

    #[tokio::test]
    async fn drained_keys_are_forgotten() {
        let pool = ConnectionPool::new(2, 1, Duration::from_secs(60));
        let (first, _s1) = finished_connection().await;
        let (second, _s2) = finished_connection().await;
        pool.release(&key("a.test"), first);
        pool.release(&key("b.test"), second);
        assert_eq!(pool.total_idle(), 1);
        assert_eq!(pool.read_queues().len(), 1);

        assert!(pool.checkout(&key("b.test")).is_some());
        assert!(pool.read_queues().is_empty());
        assert!(pool.checkout(&key("b.test")).is_none());
    }
}
