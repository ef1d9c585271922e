//! Selective-Repeat engines over loopback sessions.

mod common;

use std::time::Duration;

use common::{fast_config, pattern, scratch_dir, session_pair, within};
use rdt_over_udp::chunks::{ChunkReader, ChunkWriter};
use rdt_over_udp::packet::{Packetizer, WindowedPacketizer};
use rdt_over_udp::simulator::SimulatorConfig;
use rdt_over_udp::sr_receiver;
use rdt_over_udp::sr_sender::SrSender;
use rdt_over_udp::state::SessionState;
use rdt_over_udp::{transfer, Protocol, TransferError};

fn chunks(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("chunk-{i};").into_bytes()).collect()
}

/// Only the lost packet is resent; the rest of the window is buffered.
#[tokio::test]
async fn single_loss_is_repaired_selectively() {
    let (tx_session, rx_session) = session_pair().await;
    let config = fast_config();
    let dest = scratch_dir("sr-one-loss").join("out.txt");

    tx_session
        .attach_simulator(SimulatorConfig::drop_first(vec![0x01, 0, 0, 0, 2]))
        .unwrap();

    let rx_config = config.clone();
    let rx_dest = dest.clone();
    let rx = tokio::spawn(async move {
        let mut sink = ChunkWriter::create(&rx_dest).await.unwrap();
        let report = sr_receiver::receive_file(&rx_session, &mut sink, &rx_config).await;
        sink.finish().await.unwrap();
        report
    });

    let sender = SrSender::new(tx_session.clone(), chunks(5), &config).unwrap();
    let report = within(10, sender.run()).await.expect("send");
    let received = within(5, rx).await.unwrap().expect("receive");

    let window = sender.window();
    assert_eq!(window.base, 5);
    assert_eq!(window.next_seq, 5);
    assert_eq!(report.packets, 5);
    assert!(report.retransmissions >= 1);
    // Packets 3 and 4 are never resent because of the gap at 2.
    assert!(report.retransmissions < 3, "resent {} packet(s)", report.retransmissions);
    assert!(received.peak_buffered >= 1 && received.peak_buffered <= 4);
    assert_eq!(std::fs::read(&dest).unwrap(), chunks(5).concat());
}

/// 20% loss in both directions through the full job, closing included.
#[tokio::test]
async fn lossy_transfer_delivers_identical_bytes() {
    let (tx_session, rx_session) = session_pair().await;
    let config = fast_config().with_chunk_size(256);
    let dir = scratch_dir("sr-lossy");
    let src = dir.join("src.bin");
    let dest = dir.join("dst.bin");
    std::fs::write(&src, pattern(20_000)).unwrap();

    tx_session.attach_simulator(SimulatorConfig::lossy(0.2, 42)).unwrap();
    rx_session.attach_simulator(SimulatorConfig::lossy(0.2, 43)).unwrap();

    let rx_config = config.clone();
    let rx_dest = dest.clone();
    let rx_handle = rx_session.clone();
    let rx = tokio::spawn(async move {
        transfer::receive_file(rx_handle, &rx_dest, Protocol::SelectiveRepeat, &rx_config).await
    });

    let source = ChunkReader::open(&src, config.chunk_size).await.unwrap();
    let sent = within(
        60,
        transfer::send_file(tx_session.clone(), source, Protocol::SelectiveRepeat, &config),
    )
    .await
    .expect("send");
    let received = within(30, rx).await.unwrap().expect("receive");

    assert_eq!(std::fs::read(&dest).unwrap(), pattern(20_000));
    assert_eq!(sent.bytes, 20_000);
    assert_eq!(received.bytes, 20_000);
    assert!(sent.retransmissions > 0);
    assert!(received.peak_buffered <= u64::from(config.window_size));
    assert_eq!(tx_session.state(), SessionState::Closed);
    assert_eq!(rx_session.state(), SessionState::Closed);
}

/// No ACKs at all: the first packet's timer gives up.
#[tokio::test]
async fn silent_receiver_exhausts_retransmissions() {
    let (tx_session, _silent) = session_pair().await;
    let config = fast_config()
        .with_timeout(Duration::from_millis(20))
        .with_retransmission_limit(3);

    let sender = SrSender::new(tx_session, chunks(3), &config).unwrap();
    let err = within(5, sender.run()).await.unwrap_err();
    assert!(
        matches!(err, TransferError::RetriesExhausted { attempts: 3, .. }),
        "got {err:?}"
    );
    assert_eq!(sender.window().base, 0);
}

/// The sender never has more than `W` packets unacknowledged.
#[tokio::test]
async fn sender_respects_window_size() {
    let (tx_session, peer) = session_pair().await;
    let config = fast_config().with_timeout(Duration::from_secs(2));
    let pk = WindowedPacketizer;

    let sender = std::sync::Arc::new(SrSender::new(tx_session, chunks(10), &config).unwrap());
    let running = sender.clone();
    let tx = tokio::spawn(async move { running.run().await });

    let mut first_burst = Vec::new();
    while let Some(bytes) = peer.recv(Duration::from_millis(300)).await.unwrap() {
        first_burst.push(pk.extract_seq(&bytes).unwrap());
    }
    assert_eq!(first_burst, vec![0, 1, 2, 3]);

    // Acking 1 out of order moves nothing; acking 0 slides past both.
    peer.send(&pk.make_ack(1)).await.unwrap();
    assert!(peer.recv(Duration::from_millis(200)).await.unwrap().is_none());
    peer.send(&pk.make_ack(0)).await.unwrap();
    let mut slid = Vec::new();
    while let Some(bytes) = peer.recv(Duration::from_millis(300)).await.unwrap() {
        slid.push(pk.extract_seq(&bytes).unwrap());
    }
    assert_eq!(slid, vec![4, 5]);
    assert_eq!(sender.window().base, 2);

    for seq in 2..6 {
        peer.send(&pk.make_ack(seq)).await.unwrap();
    }
    let mut tail = Vec::new();
    loop {
        let bytes = peer.recv(Duration::from_secs(2)).await.unwrap().expect("traffic");
        if pk.is_terminate(&bytes) {
            break;
        }
        let seq = pk.extract_seq(&bytes).unwrap();
        tail.push(seq);
        peer.send(&pk.make_ack(seq)).await.unwrap();
    }
    assert_eq!(tail, vec![6, 7, 8, 9]);
    let report = within(5, tx).await.unwrap().expect("send");
    assert_eq!(report.retransmissions, 0);
}
