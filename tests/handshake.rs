//! Integration tests for the rendezvous handshake.
//!
//! Real loopback sockets on both sides; the server half runs in a
//! background task, or is played by a raw [`Socket`] when a test needs to
//! misbehave on purpose.

mod common;

use std::time::Duration;

use common::{ephemeral, fast_config, scratch_dir, start_server, within};
use rdt_over_udp::handshake::{self, Request, CONFIRM};
use rdt_over_udp::packet::{Packetizer, WindowedPacketizer};
use rdt_over_udp::state::SessionState;
use rdt_over_udp::{Client, Mode, Protocol, TransferError};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both halves agree on each other's session address.
#[tokio::test]
async fn handshake_moves_client_to_private_port() {
    let rendezvous = ephemeral().await;
    let server_addr = rendezvous.local_addr();
    let config = fast_config();

    let server_cfg = config.clone();
    let server = tokio::spawn(async move {
        let (bytes, client) = rendezvous
            .recv_from(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("LOGIN");
        let request = Request::parse_login(&bytes).unwrap();
        assert_eq!(request, Request::new(Mode::Download, "notes.txt"));
        handshake::accept(client, &request, server_addr.ip(), &server_cfg).await
    });

    let request = Request::new(Mode::Download, "notes.txt");
    let client = within(5, handshake::connect(server_addr, &request, &config))
        .await
        .expect("client handshake");
    let server = within(5, server).await.unwrap().expect("server handshake");

    assert_ne!(client.peer_addr(), server_addr, "session must use a fresh port");
    assert_eq!(client.peer_addr(), server.local_addr());
    assert_eq!(server.peer_addr().port(), client.local_addr().port());
    assert_eq!(client.state(), SessionState::Open);
    assert_eq!(server.state(), SessionState::Open);
}

/// A server that never answers exhausts the retry budget.
#[tokio::test]
async fn silent_server_times_out_after_max_retries() {
    let silent = ephemeral().await;
    let config = fast_config().with_timeout(Duration::from_millis(50)).with_max_retries(3);

    let request = Request::new(Mode::Upload, "x.bin");
    let err = within(5, handshake::connect(silent.local_addr(), &request, &config))
        .await
        .unwrap_err();
    assert!(
        matches!(err, TransferError::HandshakeTimeout { attempts: 3 }),
        "got {err:?}"
    );

    let mut logins = 0;
    while let Some((bytes, _)) = silent.recv_from(Duration::from_millis(50)).await.unwrap() {
        assert_eq!(bytes, request.login_message());
        logins += 1;
    }
    assert_eq!(logins, 3);
}

/// An echo that does not match the request is fatal and not retried.
#[tokio::test]
async fn mismatched_echo_is_a_protocol_error() {
    let rendezvous = ephemeral().await;
    let server_addr = rendezvous.local_addr();
    tokio::spawn(async move {
        let (_, client) = rendezvous.recv_from(Duration::from_secs(5)).await.unwrap().unwrap();
        let session_port = ephemeral().await;
        session_port
            .send_to(b"ACK:upload:someone-else.txt", client)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let request = Request::new(Mode::Upload, "mine.txt");
    let err = within(5, handshake::connect(server_addr, &request, &fast_config()))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Protocol(_)), "got {err:?}");
}

/// A lost `ALL:OK` stalls nothing: the server repeats its ACK until confirmed.
#[tokio::test]
async fn server_repeats_ack_until_confirmed() {
    let rendezvous = ephemeral().await;
    let server_addr = rendezvous.local_addr();
    let config = fast_config();

    let server_cfg = config.clone();
    let server = tokio::spawn(async move {
        let (bytes, client) = rendezvous.recv_from(Duration::from_secs(5)).await.unwrap().unwrap();
        let request = Request::parse_login(&bytes).unwrap();
        handshake::accept(client, &request, server_addr.ip(), &server_cfg).await
    });

    let client = ephemeral().await;
    let request = Request::new(Mode::Download, "f.txt");
    client.send_to(&request.login_message(), server_addr).await.unwrap();

    // Swallow the first ACK as if our confirmation had been lost.
    let (first, session_addr) = client.recv_from(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(first, request.accept_message());
    let (again, from) = client.recv_from(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(again, request.accept_message());
    assert_eq!(from, session_addr);

    client.send_to(CONFIRM, session_addr).await.unwrap();
    let session = within(5, server).await.unwrap().expect("server handshake");
    assert_eq!(session.peer_addr(), client.local_addr());
}

/// In upload mode, DATA from the client stands in for a lost `ALL:OK`.
#[tokio::test]
async fn first_data_packet_confirms_upload() {
    let rendezvous = ephemeral().await;
    let server_addr = rendezvous.local_addr();
    let config = fast_config();

    let server_cfg = config.clone();
    let server = tokio::spawn(async move {
        let (bytes, client) = rendezvous.recv_from(Duration::from_secs(5)).await.unwrap().unwrap();
        let request = Request::parse_login(&bytes).unwrap();
        handshake::accept(client, &request, server_addr.ip(), &server_cfg).await
    });

    let client = ephemeral().await;
    let request = Request::new(Mode::Upload, "up.bin");
    client.send_to(&request.login_message(), server_addr).await.unwrap();
    let (_, session_addr) = client.recv_from(Duration::from_secs(2)).await.unwrap().unwrap();
    client
        .send_to(&WindowedPacketizer.make_data(0, b"payload"), session_addr)
        .await
        .unwrap();

    within(5, server).await.unwrap().expect("implicit confirmation");
}

/// Missing download file: `ERR:` from the well-known port, no retries.
#[tokio::test]
async fn missing_download_is_rejected_immediately() {
    let storage = scratch_dir("reject");
    let server = start_server(storage.clone(), Protocol::StopAndWait, fast_config()).await;
    let dest = scratch_dir("reject-dst").join("never.txt");

    let client = Client::new(server.local_addr(), Protocol::StopAndWait, fast_config());
    let started = std::time::Instant::now();
    let err = within(5, client.download("missing.txt", &dest)).await.unwrap_err();

    assert!(matches!(err, TransferError::Rejected(ref reason) if reason.contains("missing.txt")), "got {err:?}");
    assert!(started.elapsed() < Duration::from_millis(100 * 2), "rejection must not be retried");
    assert!(!dest.exists());
    server.shutdown().await.unwrap();
}

/// Path tricks in the requested name are refused.
#[tokio::test]
async fn traversal_names_are_rejected() {
    let storage = scratch_dir("traversal");
    let server = start_server(storage, Protocol::StopAndWait, fast_config()).await;

    let request = Request::new(Mode::Upload, "../escape.txt");
    let err = within(5, handshake::connect(server.local_addr(), &request, &fast_config()))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Rejected(_)), "got {err:?}");
    server.shutdown().await.unwrap();
}

/// A retransmitted LOGIN must not spawn a second session.
#[tokio::test]
async fn duplicate_login_gets_a_single_session() {
    let storage = scratch_dir("dup-login");
    let server = start_server(storage, Protocol::StopAndWait, fast_config()).await;

    let client = ephemeral().await;
    let login = Request::new(Mode::Upload, "dup.bin").login_message();
    client.send_to(&login, server.local_addr()).await.unwrap();
    client.send_to(&login, server.local_addr()).await.unwrap();

    let mut sources = std::collections::HashSet::new();
    while let Some((bytes, from)) = client.recv_from(Duration::from_millis(250)).await.unwrap() {
        assert!(handshake::is_accept_reply(&bytes));
        sources.insert(from);
    }
    assert_eq!(sources.len(), 1, "ACKs came from {sources:?}");
    server.shutdown().await.unwrap();
}
