/*
 * tls.rs
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

//! TLS client configuration and handshake.
//!
//! A `TlsPolicy` (verification mode plus optional client certificate) maps to one rustls
//! `ClientConfig`. Each session keeps its own `TlsConfigs` cache; building a config reads
//! certificate files and runs on the blocking pool. Only `http/1.1` is offered via ALPN.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ClientConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::error::{ConnectionErrorKind, Error, Result};
use crate::request::{ClientCert, Verify};

/// Everything that changes how the TLS session is set up. Part of the pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TlsPolicy {
    pub verify: Verify,
    pub cert: Option<ClientCert>,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            for cert in certs {
                let _ = root_store.add(cert);
            }
        }
        Err(e) => debug!(error = %e, "no platform certificates"),
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

fn tls_error(msg: impl Into<String>, e: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::connection_kind(
        ConnectionErrorKind::Tls,
        msg,
        io::Error::new(io::ErrorKind::InvalidData, e),
    )
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::connection_kind(ConnectionErrorKind::Tls, path.display().to_string(), e))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::connection_kind(ConnectionErrorKind::Tls, path.display().to_string(), e))
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::connection_kind(ConnectionErrorKind::Tls, path.display().to_string(), e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::connection_kind(ConnectionErrorKind::Tls, path.display().to_string(), e))?
        .ok_or_else(|| {
            Error::connection_kind(
                ConnectionErrorKind::Tls,
                path.display().to_string(),
                io::Error::new(io::ErrorKind::InvalidData, "no private key found"),
            )
        })
}

fn root_store_for(verify: &Verify) -> Result<Option<RootCertStore>> {
    match verify {
        Verify::Enabled => Ok(Some(build_root_store())),
        Verify::Disabled => Ok(None),
        Verify::CaBundle(path) => {
            let mut store = RootCertStore::empty();
            let (added, _ignored) = store.add_parsable_certificates(read_certs(path)?);
            if added == 0 {
                return Err(Error::connection_kind(
                    ConnectionErrorKind::Tls,
                    path.display().to_string(),
                    io::Error::new(io::ErrorKind::InvalidData, "no certificates in CA bundle"),
                ));
            }
            Ok(Some(store))
        }
    }
}

impl TlsPolicy {
    fn build_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_error("TLS configuration", e))?;
        let builder = match root_store_for(&self.verify)? {
            Some(roots) => builder.with_root_certificates(roots),
            None => {
                warn!("TLS certificate verification disabled");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            }
        };
        let mut config = match &self.cert {
            None => builder.with_no_client_auth(),
            Some(cert) => {
                let (chain, key) = match cert {
                    ClientCert::Combined(path) => (read_certs(path)?, read_key(path)?),
                    ClientCert::Pair { cert, key } => (read_certs(cert)?, read_key(key)?),
                };
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| tls_error("client certificate", e))?
            }
        };
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }

}

/// Client configs already built for a session, one per policy.
#[derive(Default)]
pub struct TlsConfigs {
    configs: Mutex<HashMap<TlsPolicy, Arc<ClientConfig>>>,
}

impl std::fmt::Debug for TlsConfigs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfigs")
            .field("cached", &lock(&self.configs).len())
            .finish()
    }
}

impl TlsConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The client config for `policy`, building it off the async runtime on first use.
    pub async fn client_config(&self, policy: &TlsPolicy) -> Result<Arc<ClientConfig>> {
        if let Some(c) = lock(&self.configs).get(policy) {
            return Ok(c.clone());
        }
        let building = policy.clone();
        let config = tokio::task::spawn_blocking(move || building.build_config())
            .await
            .map_err(|e| tls_error("TLS configuration", e))??;
        debug!(verify = ?policy.verify, client_cert = policy.cert.is_some(), "built TLS client config");
        Ok(lock(&self.configs)
            .entry(policy.clone())
            .or_insert(config)
            .clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.configs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.configs).clear();
    }
}

/// TLS handshake over an established TCP (or tunnelled) stream.
pub async fn handshake(
    config: Arc<ClientConfig>,
    tcp: TcpStream,
    host: &str,
) -> Result<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(config);
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let server_name = ServerName::try_from(bare.to_string()).map_err(|_| {
        Error::connection_kind(
            ConnectionErrorKind::Tls,
            host,
            io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"),
        )
    })?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::connection_kind(ConnectionErrorKind::Tls, host, e))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Accepts any server certificate. Signatures are still checked so the handshake is well-formed.
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
