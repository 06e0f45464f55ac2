//! End-to-end exercise of a client TSAP against a listening server TSAP
//! over real TCP sockets.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use ositransport::prelude::*;

const MESSAGE_LEN: usize = 300;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

fn patterned(seed: u8) -> Vec<u8> {
    (0..MESSAGE_LEN).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Serve one connection: echo every message back until the peer
/// disconnects or goes away.
async fn echo(mut connection: TConnection) {
    let mut buffer = vec![0u8; 1 << 16];
    loop {
        match connection.receive(&mut buffer).await {
            Ok(len) => {
                if connection.send(&buffer[..len]).await.is_err() {
                    break;
                }
            }
            Err(TransportError::Disconnect { .. }) => break,
            Err(_) => break,
        }
    }
    connection.close().await;
}

#[tokio::test]
async fn client_and_server_exchange_fragmented_messages() {
    init_tracing();
    let config = ServerTSapBuilder::new()
        .port(18982)
        .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .build();
    let (mut server, mut events) = ServerTSap::listen(config).await.unwrap();

    let server_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::ConnectionIndication(connection) => {
                    tokio::spawn(echo(connection));
                }
                ServerEvent::StoppedListening(e) => panic!("listener failed: {e}"),
            }
        }
    });

    let mut tsap = ClientTSap::new();
    tsap.set_max_tpdu_size_param(7).unwrap();
    tsap.set_message_timeout(Duration::from_secs(5));
    let mut connection = tsap.connect("127.0.0.1:18982".parse().unwrap()).await.unwrap();

    // 2^7 octets per TPDU forces fragmentation of every message
    assert_eq!(connection.max_tpdu_size_param(), 7);
    assert_eq!(connection.max_tpdu_size(), 128);

    let first = patterned(0x11);
    let second = patterned(0x77);
    let mut expected = first.clone();
    expected.extend_from_slice(&second);

    let mut buffer = vec![0u8; 4 * MESSAGE_LEN];
    for _ in 0..3 {
        connection.send_vectored(&[&first, &second]).await.unwrap();
        let received = connection.receive(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..received], &expected[..]);
    }

    connection.disconnect().await;
    server.stop_listening();
    server_task.await.unwrap();
}

#[tokio::test]
async fn selectors_round_trip_through_the_handshake() {
    init_tracing();
    let config = ServerTSapBuilder::new()
        .port(18983)
        .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .t_sel_local(Some(vec![0x00, 0x01]))
        .build();
    let (mut server, mut events) = ServerTSap::listen(config).await.unwrap();

    let mut tsap = ClientTSap::new();
    tsap.set_message_timeout(Duration::from_secs(5));
    tsap.set_t_sel_local(Some(vec![0x00, 0x02])).unwrap();
    tsap.set_t_sel_remote(Some(vec![0x00, 0x01])).unwrap();
    let mut connection = tsap.connect("127.0.0.1:18983".parse().unwrap()).await.unwrap();

    let mut accepted = match events.recv().await {
        Some(ServerEvent::ConnectionIndication(connection)) => connection,
        other => panic!("expected a connection indication, got {other:?}"),
    };

    // the server adopted the calling selector from the CR
    assert_eq!(accepted.t_sel_local(), Some(&[0x00, 0x01][..]));
    assert_eq!(accepted.t_sel_remote(), Some(&[0x00, 0x02][..]));
    assert_eq!(connection.t_sel_local(), Some(&[0x00, 0x02][..]));
    assert_eq!(connection.t_sel_remote(), Some(&[0x00, 0x01][..]));

    // the references crossed over during the handshake
    assert_eq!(connection.dst_ref(), accepted.src_ref());
    assert_eq!(accepted.dst_ref(), connection.src_ref());

    connection.close().await;
    accepted.close().await;
    server.stop_listening();
}

#[tokio::test]
async fn mismatched_called_selector_refuses_the_connection() {
    init_tracing();
    let config = ServerTSapBuilder::new()
        .port(18984)
        .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .t_sel_local(Some(vec![0x00, 0x01]))
        .build();
    let (mut server, mut events) = ServerTSap::listen(config).await.unwrap();

    let mut tsap = ClientTSap::new();
    tsap.set_message_timeout(Duration::from_secs(5));
    tsap.set_t_sel_remote(Some(vec![0x0b, 0xad])).unwrap();
    assert!(tsap.connect("127.0.0.1:18984".parse().unwrap()).await.is_err());

    // give the handler task a moment to tear the socket down
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the refused socket never produces an indication
    assert!(events.try_recv().is_err());
    assert_eq!(server.live_connections(), 0);
    server.stop_listening();
}
