//! Wire-format definitions for data-phase packets.
//!
//! Every datagram exchanged by an ARQ engine is one of three packet kinds.
//! This module is responsible for:
//! - Building DATA / ACK / TERMINATE datagrams.
//! - Classifying and decoding raw datagrams, rejecting truncated input with
//!   an error instead of panicking.
//!
//! No I/O happens here; everything is pure data transformation and safe to
//! share between tasks.
//!
//! # Wire format
//!
//! ```text
//!  DATA       | 0x01 | seq (N bytes) | payload ... |
//!  ACK        | 0x02 | seq (N bytes) |
//!  TERMINATE  | 0x03 |
//! ```
//!
//! `N` is 1 for Stop-and-Wait ([`StopAndWaitPacketizer`]) and 4, big-endian,
//! for the windowed engines ([`WindowedPacketizer`]).

use thiserror::Error;

/// Leading type byte of each packet kind.
pub mod kind {
    pub const DATA: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const TERMINATE: u8 = 0x03;
}

/// Largest datagram any layer sends or expects to receive.
pub const MAX_DATAGRAM: usize = 2048;

/// Largest DATA payload that still fits a datagram with a 4-byte sequence.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - 1 - 4;

/// Decoded view of a data-phase datagram. Borrows the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Data { seq: u32, payload: &'a [u8] },
    Ack { seq: u32 },
    Terminate,
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    #[error("packet type {kind:#04x} needs {need} bytes, got {len}")]
    Truncated { kind: u8, len: usize, need: usize },
    #[error("unknown packet type {0:#04x}")]
    UnknownKind(u8),
}

/// Encode/decode contract shared by the ARQ engines.
///
/// Implementors only choose the width of the sequence field; everything else
/// is provided. All predicates return `false` on empty or truncated input.
pub trait Packetizer: Send + Sync {
    /// Width of the sequence field in bytes.
    const SEQ_LEN: usize;

    fn write_seq(&self, seq: u32, out: &mut Vec<u8>);

    /// `bytes` is exactly [`Self::SEQ_LEN`] long.
    fn read_seq(&self, bytes: &[u8]) -> u32;

    fn make_data(&self, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + Self::SEQ_LEN + payload.len());
        out.push(kind::DATA);
        self.write_seq(seq, &mut out);
        out.extend_from_slice(payload);
        out
    }

    fn make_ack(&self, seq: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + Self::SEQ_LEN);
        out.push(kind::ACK);
        self.write_seq(seq, &mut out);
        out
    }

    fn make_terminate(&self) -> Vec<u8> {
        vec![kind::TERMINATE]
    }

    fn is_data(&self, packet: &[u8]) -> bool {
        packet.first() == Some(&kind::DATA) && packet.len() > Self::SEQ_LEN
    }

    fn is_ack(&self, packet: &[u8]) -> bool {
        packet.first() == Some(&kind::ACK) && packet.len() > Self::SEQ_LEN
    }

    fn is_terminate(&self, packet: &[u8]) -> bool {
        packet.first() == Some(&kind::TERMINATE)
    }

    /// Sequence number of a DATA or ACK packet; `None` for anything else.
    fn extract_seq(&self, packet: &[u8]) -> Option<u32> {
        if self.is_data(packet) || self.is_ack(packet) {
            Some(self.read_seq(&packet[1..1 + Self::SEQ_LEN]))
        } else {
            None
        }
    }

    /// Payload of a DATA packet; empty for anything else.
    fn extract_data<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        if self.is_data(packet) {
            &packet[1 + Self::SEQ_LEN..]
        } else {
            &[]
        }
    }

    fn decode<'a>(&self, packet: &'a [u8]) -> Result<Packet<'a>, PacketError> {
        let &first = packet.first().ok_or(PacketError::Empty)?;
        let need = 1 + Self::SEQ_LEN;
        match first {
            kind::DATA | kind::ACK if packet.len() < need => Err(PacketError::Truncated {
                kind: first,
                len: packet.len(),
                need,
            }),
            kind::DATA => Ok(Packet::Data {
                seq: self.read_seq(&packet[1..need]),
                payload: &packet[need..],
            }),
            kind::ACK => Ok(Packet::Ack {
                seq: self.read_seq(&packet[1..need]),
            }),
            kind::TERMINATE => Ok(Packet::Terminate),
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

/// One-byte alternating-bit sequence field.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopAndWaitPacketizer;

impl Packetizer for StopAndWaitPacketizer {
    const SEQ_LEN: usize = 1;

    fn write_seq(&self, seq: u32, out: &mut Vec<u8>) {
        out.push((seq & 0xff) as u8);
    }

    fn read_seq(&self, bytes: &[u8]) -> u32 {
        u32::from(bytes[0])
    }
}

/// Four-byte big-endian sequence field, used by Selective-Repeat and Go-Back-N.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedPacketizer;

impl Packetizer for WindowedPacketizer {
    const SEQ_LEN: usize = 4;

    fn write_seq(&self, seq: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&seq.to_be_bytes());
    }

    fn read_seq(&self, bytes: &[u8]) -> u32 {
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}
