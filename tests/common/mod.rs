//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdt_over_udp::session::Session;
use rdt_over_udp::socket::Socket;
use rdt_over_udp::{Protocol, Server, ServerHandle, TransferConfig};

/// Small timeouts keep lossy runs fast.
pub fn fast_config() -> TransferConfig {
    TransferConfig::default()
        .with_timeout(Duration::from_millis(100))
        .with_window_size(4)
        .with_max_retries(5)
        .with_retransmission_limit(30)
}

/// Fresh, empty directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("rdt-it-{}-{n}-{tag}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Deterministic, non-repeating-looking content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 251) as u8).collect()
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

pub async fn ephemeral() -> Socket {
    Socket::bind(loopback()).await.expect("bind failed")
}

/// Two sessions on loopback pointing at each other.
pub async fn session_pair() -> (Arc<Session>, Arc<Session>) {
    let a = ephemeral().await;
    let b = ephemeral().await;
    let (a_addr, b_addr) = (a.local_addr(), b.local_addr());
    (
        Arc::new(Session::new(a, b_addr)),
        Arc::new(Session::new(b, a_addr)),
    )
}

pub async fn start_server(storage: PathBuf, protocol: Protocol, config: TransferConfig) -> ServerHandle {
    Server::bind(loopback(), storage, protocol, config)
        .await
        .expect("bind server")
        .spawn()
}

/// Fail the test instead of hanging when a transfer stalls.
pub async fn within<F: std::future::Future>(secs: u64, fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .expect("timed out")
}
