/*
 * error.rs
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

//! Failure taxonomy for the request engine.
//!
//! Build-phase failures (`InvalidUrl`, `InvalidHeader`, `InvalidRequestBody`, `JsonEncode`)
//! are reported before any connection is acquired. Network-phase failures always leave
//! the connection they happened on closed.

use std::io;
use std::time::Duration;

use http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong while establishing or using a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Host name did not resolve.
    Dns,
    /// TCP connect refused or reset.
    Refused,
    /// TLS handshake or certificate verification failed.
    Tls,
    /// Peer closed the connection before the response was complete.
    Closed,
    /// Peer sent something that is not HTTP/1.x.
    Protocol,
    /// Any other transport I/O failure.
    Io,
}

impl std::fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionErrorKind::Dns => "name resolution failed",
            ConnectionErrorKind::Refused => "connection refused",
            ConnectionErrorKind::Tls => "TLS error",
            ConnectionErrorKind::Closed => "connection closed",
            ConnectionErrorKind::Protocol => "protocol error",
            ConnectionErrorKind::Io => "I/O error",
        };
        f.write_str(s)
    }
}

/// Errors from building, sending or receiving a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid request body: {0}")]
    InvalidRequestBody(String),

    #[error("could not encode JSON body: {0}")]
    JsonEncode(#[source] serde_json::Error),

    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("read from {url} timed out after {timeout:?}")]
    ReadTimeout { url: String, timeout: Duration },

    #[error("{kind} ({url}): {source}")]
    Connection {
        kind: ConnectionErrorKind,
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("proxy {proxy}: {reason}")]
    Proxy { proxy: String, reason: String },

    #[error("exceeded {max} redirects (last URL {url})")]
    TooManyRedirects { max: usize, url: String },

    #[error("{} {} for url {url}", .status.as_u16(), .reason)]
    Http {
        status: StatusCode,
        reason: String,
        url: String,
    },

    #[error("could not decode response body: {0}")]
    ContentDecoding(#[source] io::Error),

    #[error("response body already consumed")]
    StreamConsumed,

    #[error("session is closed")]
    SessionClosed,
}

impl Error {
    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_header(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a transport error, classifying it from the io::ErrorKind.
    pub(crate) fn connection(url: impl Into<String>, source: io::Error) -> Self {
        let kind = match source.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => ConnectionErrorKind::Refused,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
                ConnectionErrorKind::Closed
            }
            io::ErrorKind::InvalidData => ConnectionErrorKind::Protocol,
            _ => ConnectionErrorKind::Io,
        };
        Error::Connection {
            kind,
            url: url.into(),
            source,
        }
    }

    pub(crate) fn connection_kind(
        kind: ConnectionErrorKind,
        url: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Error::Connection {
            kind,
            url: url.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConnectTimeout { .. } | Error::ReadTimeout { .. })
    }

    /// True for failures of the connect phase (including connect timeouts and proxy refusals).
    pub fn is_connect(&self) -> bool {
        match self {
            Error::ConnectTimeout { .. } | Error::Proxy { .. } => true,
            Error::Connection { kind, .. } => matches!(
                kind,
                ConnectionErrorKind::Dns | ConnectionErrorKind::Refused | ConnectionErrorKind::Tls
            ),
            _ => false,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, Error::TooManyRedirects { .. })
    }

    /// True for request body construction failures.
    pub fn is_body(&self) -> bool {
        matches!(self, Error::InvalidRequestBody(_) | Error::JsonEncode(_))
    }

    /// Status carried by an `Http` error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
