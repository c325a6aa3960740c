/*
 * lib.rs
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

//! Snekwest core: sessions, connection pooling, cookies, redirects, authentication and
//! request/response encoding over HTTP/1.1.
//!
//! - A `Session` owns a cookie jar and a connection pool; `Session::request` runs one
//!   `RequestDescription` through the engine and returns a `Response`.
//! - Transport: tokio TCP, rustls for https, CONNECT tunnels through HTTP proxies.
//! - Responses are push-parsed; bodies are buffered or streamed chunk by chunk.

pub mod auth;
pub mod body;
pub mod config;
pub mod connection;
pub mod cookie;
pub mod decode;
pub mod engine;
pub mod error;
pub mod h1;
pub mod multipart;
pub mod pool;
pub mod proxy;
pub mod redirect;
pub mod request;
pub mod response;
pub mod session;
pub mod tls;
pub mod uri;

pub use auth::Auth;
pub use config::SessionConfig;
pub use cookie::{Cookie, CookieJar};
pub use engine::State;
pub use error::{ConnectionErrorKind, Error, Result};
pub use multipart::Part;
pub use pool::{ConnectionPool, PoolKey};
pub use proxy::Proxies;
pub use request::{ClientCert, Data, PreparedRequest, RequestDescription, Timeout, Verify};
pub use response::{BodyStream, Response};
pub use session::{request, Session};
