//! End-to-end relay tests: a real listener, real WebSocket clients and
//! loopback remotes.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use tunnel_relay::core::{DnsResolver, FallbackTarget, Server};
use tunnel_relay::server_runner;
use tunnel_relay::{RelayError, Result};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const UUID_V4: [u8; 16] = [
    0x2b, 0xd3, 0x34, 0xf9, 0xfb, 0xc9, 0x44, 0xea, 0x8e, 0xcb, 0xbb, 0xb5, 0x67, 0x71, 0x99, 0x9d,
];

const WAIT: Duration = Duration::from_secs(5);

/// Answers every query with `answer` and counts calls
struct FixedDns {
    answer: &'static [u8],
    calls: AtomicUsize,
}

#[async_trait]
impl DnsResolver for FixedDns {
    async fn resolve(&self, query: Bytes) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.is_empty() {
            return Err(RelayError::Dns("empty query".to_string()));
        }
        Ok(Bytes::from_static(self.answer))
    }
}

struct Relay {
    addr: SocketAddr,
    server: Arc<Server>,
    dns: Arc<FixedDns>,
    shutdown: CancellationToken,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_relay(fallback: Option<&str>) -> Relay {
    let dns = Arc::new(FixedDns {
        answer: b"\xab\xcd\x81\x80",
        calls: AtomicUsize::new(0),
    });
    let server = Arc::new(
        Server::builder()
            .resolver(Arc::clone(&dns) as Arc<dyn DnsResolver>)
            .fallback(fallback.and_then(FallbackTarget::new))
            .build()
            .unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server_runner::serve(
        Arc::clone(&server),
        listener,
        shutdown.clone(),
    ));

    Relay {
        addr,
        server,
        dns,
        shutdown,
    }
}

/// Loopback remote echoing everything back
async fn echo_remote() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

fn vless_header(cmd: u8, addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let SocketAddr::V4(v4) = addr else {
        panic!("IPv4 only")
    };
    let mut buf = vec![0u8];
    buf.extend_from_slice(&UUID_V4);
    buf.push(0);
    buf.push(cmd);
    buf.extend_from_slice(&v4.port().to_be_bytes());
    buf.push(1);
    buf.extend_from_slice(&v4.ip().octets());
    buf.extend_from_slice(payload);
    buf
}

fn trojan_header(cmd: u8, ip: [u8; 4], port: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![b'f'; 56];
    buf.extend_from_slice(b"\r\n");
    buf.push(cmd);
    buf.push(1);
    buf.extend_from_slice(&ip);
    buf.extend_from_slice(&port.to_be_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(payload);
    buf
}

async fn connect(relay: &Relay, path: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}{}", relay.addr, path))
        .await
        .unwrap();
    ws
}

/// Next binary message from the relay
async fn next_binary(ws: &mut Client) -> Vec<u8> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for data")
            .expect("connection ended")
            .expect("websocket error");
        match msg {
            Message::Binary(data) => return data.to_vec(),
            Message::Close(_) => panic!("connection closed"),
            _ => {}
        }
    }
}

/// Wait for the relay to close the connection; data messages fail the test
async fn expect_closed(ws: &mut Client) {
    loop {
        match tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close")
        {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Binary(data))) => panic!("unexpected data: {:?}", data),
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn test_vless_tcp_relay() {
    let remote = echo_remote().await;
    let relay = start_relay(None).await;
    let mut ws = connect(&relay, "/").await;

    ws.send(Message::binary(vless_header(1, remote, b"hello")))
        .await
        .unwrap();
    // Version echo on the first reply only
    assert_eq!(next_binary(&mut ws).await, b"\x00\x00hello");

    ws.send(Message::binary(b"again".to_vec())).await.unwrap();
    assert_eq!(next_binary(&mut ws).await, b"again");
}

#[tokio::test]
async fn test_trojan_tcp_relay() {
    let remote = echo_remote().await;
    let relay = start_relay(None).await;
    let mut ws = connect(&relay, "/").await;

    let request = b"GET / HTTP/1.0\r\n\r\n";
    ws.send(Message::binary(trojan_header(
        1,
        [127, 0, 0, 1],
        remote.port(),
        request,
    )))
    .await
    .unwrap();
    assert_eq!(next_binary(&mut ws).await, request);
}

#[tokio::test]
async fn test_early_data_header() {
    let remote = echo_remote().await;
    let relay = start_relay(None).await;

    let header = vless_header(1, remote, b"early");
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&header);
    let mut request = format!("ws://{}/", relay.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", encoded.parse().unwrap());

    let (mut ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get("sec-websocket-protocol").unwrap(),
        encoded.as_str()
    );
    assert_eq!(next_binary(&mut ws).await, b"\x00\x00early");
}

#[tokio::test]
async fn test_retry_via_path_fallback() {
    // Primary accepts and closes without sending anything
    let primary = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let primary_addr = primary.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = primary.accept().await {
            drop(stream);
        }
    });

    let fallback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fallback_addr = fallback.local_addr().unwrap();
    let replayed = tokio::spawn(async move {
        let (mut stream, _) = fallback.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        stream.write_all(b"from-fallback").await.unwrap();
        // Keep the socket open until the client is done
        let _ = stream.read(&mut buf).await;
        buf[..n].to_vec()
    });

    let relay = start_relay(None).await;
    let mut ws = connect(&relay, &format!("/127.0.0.1={}", fallback_addr.port())).await;
    ws.send(Message::binary(vless_header(1, primary_addr, b"payload")))
        .await
        .unwrap();

    assert_eq!(next_binary(&mut ws).await, b"\x00\x00from-fallback");
    let _ = ws.close(None).await;
    assert_eq!(replayed.await.unwrap(), b"payload");
}

#[tokio::test]
async fn test_no_retry_after_data() {
    let primary = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let primary_addr = primary.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = primary.accept().await {
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(b"x").await;
        }
    });

    let fallback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fallback_addr = fallback.local_addr().unwrap();

    let relay = start_relay(Some(&fallback_addr.to_string())).await;
    let mut ws = connect(&relay, "/").await;
    ws.send(Message::binary(vless_header(1, primary_addr, b"payload")))
        .await
        .unwrap();

    assert_eq!(next_binary(&mut ws).await, b"\x00\x00x");
    expect_closed(&mut ws).await;

    let attempt = tokio::time::timeout(Duration::from_millis(300), fallback.accept()).await;
    assert!(attempt.is_err(), "fallback must not be contacted");
}

#[tokio::test]
async fn test_bulk_echo_in_both_directions() {
    let remote = echo_remote().await;
    let relay = start_relay(None).await;
    let (mut tx, mut rx) = connect(&relay, "/").await.split();

    let bulk: Vec<u8> = (0..512 * 1024).map(|i| (i % 251) as u8).collect();
    let to_send = bulk.clone();
    let sender = tokio::spawn(async move {
        tx.send(Message::binary(vless_header(1, remote, &to_send[..1024])))
            .await
            .unwrap();
        for chunk in to_send[1024..].chunks(16 * 1024) {
            tx.send(Message::binary(chunk.to_vec())).await.unwrap();
        }
        tx
    });

    // Response prefix, then the echo of every byte
    let mut echoed = Vec::new();
    while echoed.len() < bulk.len() + 2 {
        match tokio::time::timeout(WAIT, rx.next())
            .await
            .expect("relay stalled with traffic in both directions")
        {
            Some(Ok(Message::Binary(data))) => echoed.extend_from_slice(&data),
            Some(Ok(_)) => {}
            other => panic!("connection ended early: {:?}", other),
        }
    }

    assert_eq!(&echoed[..2], &[0, 0]);
    assert_eq!(echoed.len(), bulk.len() + 2);
    assert!(echoed[2..] == bulk[..], "echo differs from what was sent");
    let _tx = sender.await.unwrap();
}

#[tokio::test]
async fn test_dns_relay() {
    let relay = start_relay(None).await;
    let mut ws = connect(&relay, "/").await;

    let mut chunk = trojan_header(3, [8, 8, 8, 8], 53, &[]);
    chunk.extend_from_slice(&[0x00, 0x1c]);
    chunk.extend_from_slice(&[0x11; 28]);
    ws.send(Message::binary(chunk)).await.unwrap();

    assert_eq!(next_binary(&mut ws).await, b"\x00\x04\xab\xcd\x81\x80");
    assert_eq!(relay.dns.calls.load(Ordering::SeqCst), 1);

    // Datagram split across two messages
    ws.send(Message::binary(vec![0x00, 0x03, 0x01])).await.unwrap();
    ws.send(Message::binary(vec![0x02, 0x03])).await.unwrap();
    assert_eq!(next_binary(&mut ws).await, b"\x00\x04\xab\xcd\x81\x80");
    assert_eq!(relay.dns.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_short_header_closes_connection() {
    let relay = start_relay(None).await;
    let mut ws = connect(&relay, "/").await;

    ws.send(Message::binary(vec![0u8; 10])).await.unwrap();
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_udp_to_non_dns_port_closes_connection() {
    let relay = start_relay(None).await;
    let mut ws = connect(&relay, "/").await;

    let target: SocketAddr = "8.8.8.8:22".parse().unwrap();
    ws.send(Message::binary(vless_header(2, target, &[])))
        .await
        .unwrap();
    expect_closed(&mut ws).await;
    assert_eq!(relay.dns.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_all_closes_live_sessions() {
    let remote = echo_remote().await;
    let relay = start_relay(None).await;
    let mut ws = connect(&relay, "/").await;

    ws.send(Message::binary(vless_header(1, remote, b"hi")))
        .await
        .unwrap();
    assert_eq!(next_binary(&mut ws).await, b"\x00\x00hi");
    assert_eq!(relay.server.sessions.session_count(), 1);

    assert_eq!(relay.server.sessions.cancel_all(), 1);
    expect_closed(&mut ws).await;

    // The connection task unregisters on its way out
    let deadline = tokio::time::Instant::now() + WAIT;
    while relay.server.sessions.session_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "session not unregistered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
