use ssp::relay::{RelayStats, relay};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Connected (client-side, server-side) TCP pair on loopback
async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}

#[tokio::test]
async fn test_half_close_keeps_reverse_direction_open() {
    let (mut client, proxy_client_side) = tcp_pair().await;
    let (proxy_backend_side, mut backend) = tcp_pair().await;

    let relay = tokio::spawn(relay(proxy_client_side, proxy_backend_side));

    client.write_all(b"request").await.unwrap();
    client.shutdown().await.unwrap();

    // Backend sees end of stream while its own write side is still usable
    let mut request = Vec::new();
    backend.read_to_end(&mut request).await.unwrap();
    assert_eq!(request, b"request");
    assert!(!relay.is_finished());

    backend.write_all(b"late response").await.unwrap();
    backend.shutdown().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"late response");

    let stats = relay.await.unwrap();
    assert_eq!(stats.to_backend, 7);
    assert_eq!(stats.from_backend, 13);
}

#[tokio::test]
async fn test_large_transfer_preserves_order() {
    let (client, mut client_peer) = tokio::io::duplex(8 * 1024);
    let (backend, mut backend_peer) = tokio::io::duplex(8 * 1024);
    let relay = tokio::spawn(relay(client, backend));

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let sent = payload.clone();
    let writer = tokio::spawn(async move {
        client_peer.write_all(&sent).await.unwrap();
        client_peer.shutdown().await.unwrap();
        client_peer
    });

    let mut received = Vec::new();
    backend_peer.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, payload);

    drop(backend_peer);
    let mut client_peer = writer.await.unwrap();
    let mut rest = Vec::new();
    client_peer.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    let stats = relay.await.unwrap();
    assert_eq!(stats.to_backend, payload.len() as u64);
    assert_eq!(stats.from_backend, 0);
}

#[tokio::test]
async fn test_relay_counts_both_directions() {
    let (client, mut client_peer) = tokio::io::duplex(1024);
    let (backend, mut backend_peer) = tokio::io::duplex(1024);
    let relay = tokio::spawn(relay(client, backend));

    client_peer.write_all(b"ping").await.unwrap();
    client_peer.shutdown().await.unwrap();

    let mut received = Vec::new();
    backend_peer.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"ping");

    backend_peer.write_all(b"pong!").await.unwrap();
    backend_peer.shutdown().await.unwrap();

    let mut answer = Vec::new();
    client_peer.read_to_end(&mut answer).await.unwrap();
    assert_eq!(answer, b"pong!");

    assert_eq!(
        relay.await.unwrap(),
        RelayStats {
            to_backend: 4,
            from_backend: 5
        }
    );
}
