use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::header::PROXY_AUTHORIZATION;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, ServerConfig};
use ssp::dialer::h2::https_h2_with_connector;
use ssp::dialer::http::https_with_connector;
use ssp::dialer::{Dialer, Direct, Network, ProxyAuth, ProxyStream};
use ssp::error::DialError;
use ssp::tls_utils::{client_config_with_roots, connector, server_name};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Self-signed certificate and key for a proxy on 127.0.0.1
struct ProxyIdentity {
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

fn proxy_identity() -> ProxyIdentity {
    let generated = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    ProxyIdentity {
        cert: CertificateDer::from(generated.cert.der().to_vec()),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der())),
    }
}

fn acceptor(identity: &ProxyIdentity, alpn: &[&[u8]]) -> TlsAcceptor {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![identity.cert.clone()], identity.key.clone_key())
        .unwrap();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    TlsAcceptor::from(Arc::new(config))
}

/// Client connector trusting only `identity`
fn trusting(identity: &ProxyIdentity, alpn: &[&[u8]]) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(identity.cert.clone()).unwrap();
    connector(client_config_with_roots(Arc::new(roots), alpn).unwrap())
}

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[test]
fn test_client_config_alpn() {
    let roots = Arc::new(RootCertStore::empty());
    let config = client_config_with_roots(roots, &[b"h2"]).unwrap();
    assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
}

#[test]
fn test_server_name() {
    assert!(server_name("proxy.example.com").is_ok());
    assert!(server_name("192.0.2.1").is_ok());
    assert!(server_name("").is_err());
}

#[tokio::test]
async fn test_https_proxy_tunnel_half_closes() {
    let identity = proxy_identity();
    let acceptor = acceptor(&identity, &[b"http/1.1"]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    let proxy = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        let head = read_head(&mut tls).await;
        tls.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await
            .unwrap();

        // Answer only once the client has closed its side
        let mut request = Vec::new();
        tls.read_to_end(&mut request).await.unwrap();
        tls.write_all(&request).await.unwrap();
        tls.shutdown().await.unwrap();
        head
    });

    let dialer = https_with_connector(
        Network::Tcp,
        &proxy_addr.to_string(),
        Some(ProxyAuth::new("u", "p")),
        trusting(&identity, &[b"http/1.1"]),
        Arc::new(Direct),
    )
    .unwrap();
    let mut conn = dialer
        .dial(Network::Tcp, "backend.test:443")
        .await
        .ok()
        .unwrap();
    assert!(conn.can_half_close());

    conn.write_all(b"hello over tls").await.unwrap();
    conn.shutdown().await.unwrap();
    let mut echoed = Vec::new();
    conn.read_to_end(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"hello over tls");

    let head = proxy.await.unwrap();
    assert!(head.starts_with("CONNECT backend.test:443 HTTP/1.1\r\n"), "{}", head);
    assert!(head.contains("Proxy-Authorization: Basic dTpw\r\n"));
}

#[tokio::test]
async fn test_https_proxy_with_untrusted_certificate_fails() {
    let identity = proxy_identity();
    let acceptor = acceptor(&identity, &[b"http/1.1"]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let _ = acceptor.accept(tcp).await;
    });

    let stranger = proxy_identity();
    let dialer = https_with_connector(
        Network::Tcp,
        &proxy_addr.to_string(),
        None,
        trusting(&stranger, &[b"http/1.1"]),
        Arc::new(Direct),
    )
    .unwrap();
    let err = dialer
        .dial(Network::Tcp, "backend.test:443")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DialError::Tls(_)));
}

#[tokio::test]
async fn test_h2_proxy_tunnel_half_closes() {
    let identity = proxy_identity();
    let acceptor = acceptor(&identity, &[b"h2"]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let tls = acceptor.accept(tcp).await.unwrap();
        let service = service_fn(move |req: Request<Incoming>| {
            let seen_tx = seen_tx.clone();
            async move {
                let auth = req
                    .headers()
                    .get(PROXY_AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = seen_tx.send((req.method().clone(), req.uri().to_string(), auth));

                if req.method() != Method::CONNECT {
                    let mut response = Response::new(Empty::<Bytes>::new());
                    *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
                    return Ok::<_, Infallible>(response);
                }

                tokio::spawn(async move {
                    let upgraded = hyper::upgrade::on(req).await.unwrap();
                    let mut io = TokioIo::new(upgraded);
                    let mut request = Vec::new();
                    io.read_to_end(&mut request).await.unwrap();
                    io.write_all(&request).await.unwrap();
                    io.shutdown().await.unwrap();
                });
                Ok(Response::new(Empty::<Bytes>::new()))
            }
        });
        let _ = http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(tls), service)
            .await;
    });

    let dialer = https_h2_with_connector(
        Network::Tcp,
        &proxy_addr.to_string(),
        Some(ProxyAuth::new("u", "p")),
        trusting(&identity, &[b"h2"]),
        Arc::new(Direct),
    )
    .unwrap();
    let mut conn = dialer
        .dial(Network::Tcp, "backend.test:443")
        .await
        .ok()
        .unwrap();
    assert!(conn.can_half_close());

    conn.write_all(b"hello over h2").await.unwrap();
    conn.shutdown().await.unwrap();
    let mut echoed = Vec::new();
    conn.read_to_end(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"hello over h2");

    let (method, authority, auth) = seen_rx.recv().await.unwrap();
    assert_eq!(method, Method::CONNECT);
    assert_eq!(authority, "backend.test:443");
    assert_eq!(auth.as_deref(), Some("Basic dTpw"));
}

#[tokio::test]
async fn test_h2_proxy_requires_h2_alpn() {
    let identity = proxy_identity();
    // Negotiates no application protocol at all
    let acceptor = acceptor(&identity, &[]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        if let Ok(mut tls) = acceptor.accept(tcp).await {
            let mut rest = Vec::new();
            let _ = tls.read_to_end(&mut rest).await;
        }
    });

    let dialer = https_h2_with_connector(
        Network::Tcp,
        &proxy_addr.to_string(),
        None,
        trusting(&identity, &[b"h2"]),
        Arc::new(Direct),
    )
    .unwrap();
    let err = dialer
        .dial(Network::Tcp, "backend.test:443")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DialError::Tunnel { .. }), "{}", err);
}
