/*
 * auth.rs
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

//! Request authentication: Basic, Bearer, Digest (RFC 7616) and caller-supplied hooks.
//!
//! Basic, Bearer and Custom decorate the request before it is sent. Digest is
//! challenge-response: the first attempt goes out bare, and a 401 carrying a Digest
//! `WWW-Authenticate` challenge gets exactly one answered retry.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::HeaderValue;
use md5::{Digest, Md5};
use rand::Rng;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::request::PreparedRequest;
use crate::uri;

/// Caller hook that mutates the prepared request (e.g. to sign it).
#[derive(Clone)]
pub struct CustomAuth(Arc<dyn Fn(&mut PreparedRequest) + Send + Sync>);

impl fmt::Debug for CustomAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomAuth(..)")
    }
}

/// Authentication strategy for a request. No auth is `Option::None`.
#[derive(Debug, Clone)]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer(String),
    Digest { username: String, password: String },
    Custom(CustomAuth),
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::Bearer(token.into())
    }

    pub fn digest(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Digest {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&mut PreparedRequest) + Send + Sync + 'static,
    {
        Auth::Custom(CustomAuth(Arc::new(f)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Auth::Basic { .. } => "Basic",
            Auth::Bearer(_) => "Bearer",
            Auth::Digest { .. } => "Digest",
            Auth::Custom(_) => "Custom",
        }
    }

    pub fn is_challenge_response(&self) -> bool {
        matches!(self, Auth::Digest { .. })
    }

    /// Decorate `req` before it is first sent.
    pub fn apply(&self, req: &mut PreparedRequest) -> Result<()> {
        match self {
            Auth::Basic { username, password } => {
                set_authorization(req, &basic_authorization(username, password))
            }
            Auth::Bearer(token) => set_authorization(req, &format!("Bearer {}", token)),
            Auth::Digest { .. } => Ok(()),
            Auth::Custom(CustomAuth(f)) => {
                f(req);
                Ok(())
            }
        }
    }

    /// Answer a 401. Returns true if `req` now carries credentials worth retrying with.
    pub fn respond_to_challenge<'a>(
        &self,
        req: &mut PreparedRequest,
        www_authenticate: impl IntoIterator<Item = &'a str>,
    ) -> Result<bool> {
        let (username, password) = match self {
            Auth::Digest { username, password } => (username, password),
            _ => return Ok(false),
        };
        let challenge = match www_authenticate.into_iter().find_map(DigestChallenge::parse) {
            Some(c) => c,
            None => return Ok(false),
        };
        let target = uri::request_target(&req.url);
        let header = challenge.authorization(
            username,
            password,
            req.method.as_str(),
            &target,
            1,
            &new_cnonce(),
        );
        set_authorization(req, &header)?;
        Ok(true)
    }
}

fn set_authorization(req: &mut PreparedRequest, value: &str) -> Result<()> {
    let v = HeaderValue::from_str(value).map_err(|e| Error::invalid_header("Authorization", e))?;
    req.headers.insert(AUTHORIZATION, v);
    Ok(())
}

/// `Basic base64(user:pass)`.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", username, password))
    )
}

fn new_cnonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes_to_hex(&bytes)
}

fn bytes_to_hex(b: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(HEX[(x >> 4) as usize] as char);
        s.push(HEX[(x & 15) as usize] as char);
    }
    s
}

/// Digest hash algorithms (RFC 7616 §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "MD5" => Some(DigestAlgorithm::Md5),
            "MD5-SESS" => Some(DigestAlgorithm::Md5Sess),
            "SHA-256" => Some(DigestAlgorithm::Sha256),
            "SHA-256-SESS" => Some(DigestAlgorithm::Sha256Sess),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn hash(&self, data: &str) -> String {
        match self {
            DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => {
                bytes_to_hex(&Md5::digest(data.as_bytes()))
            }
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256Sess => {
                bytes_to_hex(&Sha256::digest(data.as_bytes()))
            }
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, DigestAlgorithm::Md5Sess | DigestAlgorithm::Sha256Sess)
    }
}

/// Parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// True when the server offers `qop=auth`.
    pub qop_auth: bool,
}

impl DigestChallenge {
    /// Parse one header value. Other schemes and unsupported algorithms yield `None`.
    pub fn parse(header: &str) -> Option<DigestChallenge> {
        let lower = header.to_ascii_lowercase();
        let start = lower.find("digest ")?;
        let params = parse_params(&header[start + "digest ".len()..]);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        };
        let algorithm = match get("algorithm") {
            Some(a) => DigestAlgorithm::from_name(&a)?,
            None => DigestAlgorithm::Md5,
        };
        let qop_auth = get("qop").map_or(false, |q| {
            q.split(',').any(|t| t.trim().eq_ignore_ascii_case("auth"))
        });
        Some(DigestChallenge {
            realm: get("realm").unwrap_or_default(),
            nonce: get("nonce")?,
            opaque: get("opaque"),
            algorithm,
            qop_auth,
        })
    }

    /// Authorization header value answering this challenge.
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        target: &str,
        nc: u32,
        cnonce: &str,
    ) -> String {
        let alg = self.algorithm;
        let mut ha1 = alg.hash(&format!("{}:{}:{}", username, self.realm, password));
        if alg.is_session() {
            ha1 = alg.hash(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = alg.hash(&format!("{}:{}", method, target));
        let nc = format!("{:08x}", nc);
        let response = if self.qop_auth {
            alg.hash(&format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2))
        } else {
            alg.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        };
        let mut out = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            username, self.realm, self.nonce, target, response
        );
        if let Some(opaque) = &self.opaque {
            out.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        out.push_str(&format!(", algorithm={}", alg.name()));
        if self.qop_auth {
            out.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        }
        out
    }
}

/// Split `k=v, k="quoted, v"` auth-params.
fn parse_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(n) = chars.next() {
                                value.push(n);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }
        out.push((key.trim().to_string(), value.trim().to_string()));
    }
    out
}
