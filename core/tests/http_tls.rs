/*
 * http_tls.rs
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

//! TLS trust modes, client certificates, CONNECT tunnels and connect deadlines.

mod common;

use std::time::{Duration, Instant};

use common::{fixture, session, tls_acceptor, Reply, Server, TunnelProxy};
use snekwest_core::{ClientCert, ConnectionErrorKind, Error, Proxies, RequestDescription, Timeout, Verify};
use tokio::net::TcpListener;

#[tokio::test]
async fn ca_bundle_trusts_the_test_server() {
    let server = Server::start_tls(tls_acceptor(false), |r| Reply::ok(r.path())).await;
    let s = session();
    s.set_verify(Some(Verify::CaBundle(fixture("ca.pem"))));

    let mut r = s.get(&server.https_url("/secure")).await.unwrap();
    assert_eq!(r.text().await.unwrap(), "/secure");
    s.get(&server.https_url("/again")).await.unwrap();
    assert_eq!(server.connections_accepted(), 1);
    assert_eq!(s.pool().idle_count("https", "127.0.0.1", server.port()), 1);
}

#[tokio::test]
async fn unknown_issuer_is_a_tls_error() {
    let server = Server::start_tls(tls_acceptor(false), |_| Reply::ok("unreachable")).await;
    let err = session().get(&server.https_url("/")).await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Connection {
                kind: ConnectionErrorKind::Tls,
                ..
            }
        ),
        "{:?}",
        err
    );
    assert!(err.is_connect());
    assert!(server.requests().is_empty());

    let mut insecure = session()
        .request(RequestDescription::get(server.https_url("/")).verify(false))
        .await
        .unwrap();
    assert_eq!(insecure.text().await.unwrap(), "unreachable");
}

#[tokio::test]
async fn client_certificate_is_presented() {
    let server = Server::start_tls(tls_acceptor(true), |_| Reply::ok("mutual")).await;
    let trusted = || RequestDescription::get(server.https_url("/")).verify(Verify::CaBundle(fixture("ca.pem")));
    let s = session();

    let mut pair = s
        .request(trusted().cert(ClientCert::Pair {
            cert: fixture("client.pem"),
            key: fixture("client-key.pem"),
        }))
        .await
        .unwrap();
    assert_eq!(pair.text().await.unwrap(), "mutual");

    let mut combined = s
        .request(trusted().cert(ClientCert::Combined(fixture("client-combined.pem"))))
        .await
        .unwrap();
    assert_eq!(combined.text().await.unwrap(), "mutual");

    assert!(s.request(trusted()).await.is_err());
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn unreadable_client_certificate_fails_before_connecting() {
    let server = Server::start_tls(tls_acceptor(true), |_| Reply::ok("mutual")).await;
    let err = session()
        .request(
            RequestDescription::get(server.https_url("/"))
                .verify(Verify::CaBundle(fixture("ca.pem")))
                .cert(ClientCert::Combined(fixture("missing.pem"))),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::Connection {
                kind: ConnectionErrorKind::Tls,
                ..
            }
        ),
        "{:?}",
        err
    );
    assert_eq!(server.connections_accepted(), 0);
}

#[tokio::test]
async fn https_goes_through_connect_tunnel() {
    let origin = Server::start_tls(tls_acceptor(false), |r| Reply::ok(&r.target)).await;
    let proxy = TunnelProxy::start().await;
    let mut proxies = Proxies::new();
    proxies.insert("https", proxy.url());
    let s = session();
    s.set_proxies(proxies);
    s.set_verify(Some(Verify::CaBundle(fixture("ca.pem"))));

    let mut r = s.get(&origin.https_url("/tunnelled?x=1")).await.unwrap();
    assert_eq!(r.text().await.unwrap(), "/tunnelled?x=1");

    let connects = proxy.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].method, "CONNECT");
    assert_eq!(connects[0].target, format!("127.0.0.1:{}", origin.port()));
    assert_eq!(connects[0].header("host"), Some(connects[0].target.as_str()));
}

#[tokio::test]
async fn refused_tunnel_is_a_proxy_error() {
    let proxy = Server::start(|_| {
        Reply::status(407, &[("Proxy-Authenticate", "Basic realm=\"proxy\"")], b"")
    })
    .await;
    let err = session()
        .request(RequestDescription::get("https://origin.test/").proxy("https", proxy.url("")))
        .await
        .unwrap_err();
    match &err {
        Error::Proxy { reason, .. } => assert!(reason.contains("407"), "{}", reason),
        other => panic!("expected proxy error, got {:?}", other),
    }
    assert!(err.is_connect());
    let seen = proxy.requests();
    assert_eq!(seen[0].method, "CONNECT");
    assert_eq!(seen[0].target, "origin.test:443");
}

#[tokio::test]
async fn stalled_handshake_hits_connect_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let started = Instant::now();
    let err = session()
        .request(
            RequestDescription::get(format!("https://127.0.0.1:{}/", port))
                .verify(false)
                .timeout(Timeout::split(Some(Duration::from_millis(200)), None)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectTimeout { port: p, .. } if p == port), "{:?}", err);
    assert!(err.is_timeout());
    assert!(err.is_connect());
    assert!(started.elapsed() < Duration::from_secs(2));
    holder.abort();
}
