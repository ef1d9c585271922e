//! `rdt-over-udp`: reliable file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!   client ──LOGIN──▶ listener (well-known port) ──spawn──▶ worker
//!      │                                                       │
//!      └────────────── handshake: private session port ────────┘
//!                                 │
//!                      ┌──────────▼──────────┐
//!                      │       Session        │  fixed peer, close/abort once
//!                      └──────────┬──────────┘
//!          ┌──────────────────────┼───────────────────────┐
//!   Stop-and-Wait          Selective-Repeat              Go-Back-N
//!   sender / receiver   sr_sender / sr_receiver   gbn_sender / gbn_receiver
//!          └──────────────────────┼───────────────────────┘
//!                         closing (FIN/FIN/ACKFIN)
//!                                 │ raw UDP datagrams
//!                      ┌──────────▼──────────┐
//!                      │  Socket (+Simulator) │  thin async wrapper around tokio UdpSocket
//!                      └─────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]       wire format of DATA / ACK / TERMINATE
//! - [`socket`]       async UDP socket abstraction
//! - [`simulator`]    optional lossy network layer for testing
//! - [`state`]        session lifecycle states
//! - [`session`]      one socket bound to one peer
//! - [`handshake`]    LOGIN / ACK / ALL:OK rendezvous
//! - [`closing`]      symmetric FIN teardown
//! - [`timer`]        per-packet retransmission timers
//! - [`chunks`]       file chunk source and atomic sink
//! - [`sender`], [`receiver`]  Stop-and-Wait engine
//! - [`sr_window`], [`sr_sender`], [`sr_receiver`]  Selective-Repeat engine
//! - [`gbn_sender`], [`gbn_receiver`]  Go-Back-N engine
//! - [`transfer`]     runs one transfer job and ends its session
//! - [`client`]       upload / download
//! - [`listener`]     the server
//! - [`config`], [`error`]

pub mod chunks;
pub mod client;
pub mod closing;
pub mod config;
pub mod error;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod handshake;
pub mod listener;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod sr_receiver;
pub mod sr_sender;
pub mod sr_window;
pub mod state;
pub mod timer;
pub mod transfer;

pub use client::Client;
pub use config::{Mode, Protocol, TransferConfig};
pub use error::{Result, TransferError};
pub use listener::{Server, ServerHandle};
pub use transfer::TransferReport;
