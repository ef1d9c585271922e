//! Rendezvous handshake that moves a client onto a private session port.
//!
//! ```text
//!  client (ephemeral)                 server well-known port   server session port
//!      │ ── LOGIN:<mode>:<file> ──────────▶│                          │
//!      │                                   │── spawn, bind ephemeral ─▶│
//!      │ ◀──────────────────────────── ACK:<mode>:<file> ──────────────│
//!      │ ── ALL:OK ───────────────────────────────────────────────────▶│
//! ```
//!
//! Refusals travel back from the well-known port as `ERR:<reason>` and are
//! final: the client does not retry them.
//!
//! `ALL:OK` is not acknowledged. To keep a lost confirmation from stalling
//! the server, the server re-sends its `ACK:` on each timeout and a client
//! [`Session`] answers every repeated `ACK:` with another `ALL:OK`. In upload
//! mode the client's first DATA packet also counts as confirmation.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::time::Instant;

use crate::config::{Mode, TransferConfig};
use crate::error::{Result, TransferError};
use crate::packet::kind;
use crate::session::Session;
use crate::socket::Socket;

const LOGIN_TAG: &str = "LOGIN";
const ACCEPT_TAG: &str = "ACK";
const REJECT_TAG: &str = "ERR";

/// Final client confirmation.
pub const CONFIRM: &[u8] = b"ALL:OK";

/// What a client asks for: a transfer direction and a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub mode: Mode,
    pub filename: String,
}

impl Request {
    pub fn new(mode: Mode, filename: impl Into<String>) -> Self {
        Self {
            mode,
            filename: filename.into(),
        }
    }

    /// Parse `LOGIN:<mode>:<filename>`.
    pub fn parse_login(bytes: &[u8]) -> Result<Self> {
        parse_tagged(bytes, LOGIN_TAG)
    }

    pub fn login_message(&self) -> Vec<u8> {
        self.tagged(LOGIN_TAG)
    }

    pub fn accept_message(&self) -> Vec<u8> {
        self.tagged(ACCEPT_TAG)
    }

    fn tagged(&self, tag: &str) -> Vec<u8> {
        format!("{tag}:{}:{}", self.mode, self.filename).into_bytes()
    }
}

fn parse_tagged(bytes: &[u8], tag: &str) -> Result<Request> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| TransferError::Protocol("handshake message is not UTF-8".into()))?;
    let mut parts = text.splitn(3, ':');
    let (Some(prefix), Some(mode), Some(filename)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(TransferError::Protocol(format!(
            "expected {tag}:<mode>:<filename>, got {text:?}"
        )));
    };
    if prefix != tag {
        return Err(TransferError::Protocol(format!(
            "expected {tag} message, got {prefix:?}"
        )));
    }
    if filename.is_empty() {
        return Err(TransferError::Protocol("empty filename".into()));
    }
    Ok(Request::new(mode.parse()?, filename))
}

/// Server answer to a `LOGIN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Accepted(Request),
    Rejected(String),
}

pub fn parse_reply(bytes: &[u8]) -> Option<Reply> {
    if is_accept_reply(bytes) {
        return parse_tagged(bytes, ACCEPT_TAG).ok().map(Reply::Accepted);
    }
    let reason = bytes.strip_prefix(b"ERR:")?;
    Some(Reply::Rejected(String::from_utf8_lossy(reason).into_owned()))
}

pub fn reject_message(reason: &str) -> Vec<u8> {
    format!("{REJECT_TAG}:{reason}").into_bytes()
}

/// `ACK:...` handshake reply (not the closing `ACKFIN`).
pub fn is_accept_reply(bytes: &[u8]) -> bool {
    bytes.starts_with(b"ACK:")
}

/// Client half: obtain a session with the server's per-connection port.
pub async fn connect(
    server: SocketAddr,
    request: &Request,
    config: &TransferConfig,
) -> Result<Session> {
    let unspecified: IpAddr = if server.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let socket = Socket::bind(SocketAddr::new(unspecified, 0)).await?;
    let own = socket.local_addr();
    let login = request.login_message();

    for attempt in 1..=config.max_retries {
        log::debug!("[handshake {own}] LOGIN {} {:?} -> {server} (try {attempt})", request.mode, request.filename);
        socket.send_to(&login, server).await?;

        let deadline = Instant::now() + config.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some((bytes, from)) = socket.recv_from(remaining).await? else {
                break;
            };
            match parse_reply(&bytes) {
                Some(Reply::Accepted(echo)) => {
                    if echo != *request {
                        return Err(TransferError::Protocol(format!(
                            "server echoed {} {:?}, asked for {} {:?}",
                            echo.mode, echo.filename, request.mode, request.filename
                        )));
                    }
                    if from == server {
                        return Err(TransferError::Protocol(
                            "server accepted on its rendezvous port".into(),
                        ));
                    }
                    let session = Session::new(socket, from).confirming_handshake();
                    session.send(CONFIRM).await?;
                    log::info!("[handshake {own}] session established with {from}");
                    return Ok(session);
                }
                Some(Reply::Rejected(reason)) => {
                    log::error!("[handshake {own}] rejected by {from}: {reason}");
                    return Err(TransferError::Rejected(reason));
                }
                None => log::debug!("[handshake {own}] ignoring unexpected datagram from {from}"),
            }
        }
        log::debug!("[handshake {own}] timeout waiting for ACK, retrying");
    }

    Err(TransferError::HandshakeTimeout {
        attempts: config.max_retries,
    })
}

/// Server half, run by the worker for one validated request.
///
/// Binds a fresh session port on `bind_ip`, sends `ACK:` and waits for the
/// client's confirmation. On failure the new socket is dropped and nothing
/// is registered.
pub async fn accept(
    client: SocketAddr,
    request: &Request,
    bind_ip: IpAddr,
    config: &TransferConfig,
) -> Result<Session> {
    let socket = Socket::bind(SocketAddr::new(bind_ip, 0)).await?;
    let own = socket.local_addr();
    let ack = request.accept_message();

    for attempt in 1..=config.max_retries {
        log::debug!("[handshake {own}] ACK -> {client} (try {attempt})");
        socket.send_to(&ack, client).await?;

        let deadline = Instant::now() + config.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some((bytes, from)) = socket.recv_from(remaining).await? else {
                break;
            };
            if from != client {
                continue;
            }
            if bytes == CONFIRM {
                log::debug!("[handshake {own}] confirmed by {client}");
                return Ok(Session::new(socket, client));
            }
            if request.mode == Mode::Upload && bytes.first() == Some(&kind::DATA) {
                log::debug!("[handshake {own}] confirmation lost; client already sending data");
                return Ok(Session::new(socket, client));
            }
            return Err(TransferError::Protocol(format!(
                "expected ALL:OK, got {:?}",
                String::from_utf8_lossy(&bytes)
            )));
        }
    }

    Err(TransferError::HandshakeTimeout {
        attempts: config.max_retries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_round_trip() {
        let req = Request::new(Mode::Download, "report.txt");
        assert_eq!(req.login_message(), b"LOGIN:download:report.txt");
        assert_eq!(Request::parse_login(b"LOGIN:download:report.txt").unwrap(), req);
    }

    #[test]
    fn filename_may_contain_colons() {
        let req = Request::parse_login(b"LOGIN:upload:a:b.txt").unwrap();
        assert_eq!(req.mode, Mode::Upload);
        assert_eq!(req.filename, "a:b.txt");
    }

    #[test]
    fn malformed_login_is_a_protocol_error() {
        for bad in [
            &b"LOGIN:upload"[..],
            b"HELLO:upload:x",
            b"LOGIN:sideways:x",
            b"LOGIN:upload:",
            b"\xff\xfe",
            b"",
        ] {
            assert!(
                matches!(Request::parse_login(bad), Err(TransferError::Protocol(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn replies_are_classified() {
        assert_eq!(
            parse_reply(b"ACK:upload:x"),
            Some(Reply::Accepted(Request::new(Mode::Upload, "x")))
        );
        assert_eq!(
            parse_reply(b"ERR:no such file"),
            Some(Reply::Rejected("no such file".into()))
        );
        assert_eq!(parse_reply(b"ACKFIN"), None);
        assert_eq!(parse_reply(b"ALL:OK"), None);
    }

    #[test]
    fn accept_reply_is_not_closing_ack() {
        assert!(is_accept_reply(b"ACK:download:f"));
        assert!(!is_accept_reply(b"ACKFIN"));
        assert!(!is_accept_reply(b"ACK"));
    }

    #[test]
    fn reject_message_format() {
        assert_eq!(reject_message("file not found"), b"ERR:file not found");
    }
}
