//! Go-Back-N engines over loopback sessions.

mod common;

use std::time::Duration;

use common::{fast_config, pattern, scratch_dir, session_pair, within};
use rdt_over_udp::chunks::{ChunkReader, ChunkWriter};
use rdt_over_udp::packet::{Packetizer, WindowedPacketizer};
use rdt_over_udp::simulator::SimulatorConfig;
use rdt_over_udp::{gbn_receiver, gbn_sender, transfer, Protocol, TransferError};

fn chunks(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| vec![b'a' + i as u8; 3]).collect()
}

/// A gap makes the receiver discard everything after it, so the sender
/// resends the whole outstanding window.
#[tokio::test]
async fn lost_packet_forces_window_retransmission() {
    let (tx_session, rx_session) = session_pair().await;
    let config = fast_config();
    let dest = scratch_dir("gbn-gap").join("out.bin");

    tx_session
        .attach_simulator(SimulatorConfig::drop_first(vec![0x01, 0, 0, 0, 1]))
        .unwrap();

    let rx_config = config.clone();
    let rx_dest = dest.clone();
    let rx = tokio::spawn(async move {
        let mut sink = ChunkWriter::create(&rx_dest).await.unwrap();
        let report = gbn_receiver::receive_file(&rx_session, &mut sink, &rx_config).await;
        sink.finish().await.unwrap();
        report
    });

    let report = within(10, gbn_sender::send_file(&tx_session, chunks(4), &config))
        .await
        .expect("send");
    let received = within(5, rx).await.unwrap().expect("receive");

    assert_eq!(report.retransmissions, 3, "packets 1..=3 go out again");
    assert_eq!(received.packets, 4);
    assert_eq!(std::fs::read(&dest).unwrap(), chunks(4).concat());
}

/// Out-of-order DATA is acknowledged cumulatively; nothing before packet 0.
#[tokio::test]
async fn receiver_acks_cumulatively() {
    let (peer, rx_session) = session_pair().await;
    let config = fast_config();
    let pk = WindowedPacketizer;
    let dest = scratch_dir("gbn-acks").join("out.bin");

    let rx_config = config.clone();
    let rx_dest = dest.clone();
    let rx = tokio::spawn(async move {
        let mut sink = ChunkWriter::create(&rx_dest).await.unwrap();
        let report = gbn_receiver::receive_file(&rx_session, &mut sink, &rx_config).await;
        sink.finish().await.unwrap();
        report
    });

    peer.send(&pk.make_data(1, b"early")).await.unwrap();
    assert!(
        peer.recv(Duration::from_millis(200)).await.unwrap().is_none(),
        "no ACK before packet 0"
    );

    let mut acks = Vec::new();
    for (seq, payload) in [(0, &b"x"[..]), (2, &b"gap"[..]), (1, &b"y"[..])] {
        peer.send(&pk.make_data(seq, payload)).await.unwrap();
        let ack = peer.recv(Duration::from_secs(2)).await.unwrap().expect("ACK");
        acks.push(pk.extract_seq(&ack).unwrap());
    }
    peer.send(&pk.make_terminate()).await.unwrap();

    let report = within(5, rx).await.unwrap().expect("receive");
    assert_eq!(acks, vec![0, 0, 1]);
    assert_eq!(report.packets, 2);
    assert_eq!(std::fs::read(&dest).unwrap(), b"xy");
}

#[tokio::test]
async fn lossy_round_trip() {
    let (tx_session, rx_session) = session_pair().await;
    let config = fast_config().with_chunk_size(128);
    let dir = scratch_dir("gbn-lossy");
    let src = dir.join("src.bin");
    let dest = dir.join("dst.bin");
    std::fs::write(&src, pattern(8_000)).unwrap();

    tx_session.attach_simulator(SimulatorConfig::lossy(0.15, 5)).unwrap();
    rx_session.attach_simulator(SimulatorConfig::lossy(0.15, 6)).unwrap();

    let rx_config = config.clone();
    let rx_dest = dest.clone();
    let rx = tokio::spawn(async move {
        transfer::receive_file(rx_session, &rx_dest, Protocol::GoBackN, &rx_config).await
    });

    let source = ChunkReader::open(&src, config.chunk_size).await.unwrap();
    let sent = within(60, transfer::send_file(tx_session, source, Protocol::GoBackN, &config))
        .await
        .expect("send");
    within(30, rx).await.unwrap().expect("receive");

    assert!(sent.retransmissions > 0);
    assert_eq!(std::fs::read(&dest).unwrap(), pattern(8_000));
}

#[tokio::test]
async fn silent_receiver_exhausts_retransmissions() {
    let (tx_session, _silent) = session_pair().await;
    let config = fast_config()
        .with_timeout(Duration::from_millis(20))
        .with_retransmission_limit(2);

    let err = within(5, gbn_sender::send_file(&tx_session, chunks(3), &config))
        .await
        .unwrap_err();
    assert!(
        matches!(err, TransferError::RetriesExhausted { seq: 0, attempts: 2 }),
        "got {err:?}"
    );
}

/// The retransmission budget belongs to the oldest unacknowledged packet.
#[tokio::test]
async fn budget_is_charged_to_the_new_base_after_a_slide() {
    let (tx_session, peer) = session_pair().await;
    let config = fast_config()
        .with_timeout(Duration::from_millis(30))
        .with_retransmission_limit(2);
    let pk = WindowedPacketizer;

    let tx = tokio::spawn(async move { gbn_sender::send_file(&tx_session, chunks(3), &config).await });

    let first = peer.recv(Duration::from_secs(2)).await.unwrap().expect("DATA 0");
    assert_eq!(pk.extract_seq(&first), Some(0));
    peer.send(&pk.make_ack(0)).await.unwrap();

    let err = within(5, tx).await.unwrap().unwrap_err();
    assert!(
        matches!(err, TransferError::RetriesExhausted { seq: 1, attempts: 2 }),
        "got {err:?}"
    );
}
