//! Bare-socket probe for broker-enforced timers
//!
//! A full client library would answer keep-alive on our behalf and reconnect
//! around a broker-initiated close, hiding exactly what these probes observe.
//! The probe therefore writes a literal CONNECT (or nothing at all) and then
//! stays silent; any later close comes from the broker's own timers.

use super::frame::{ConnAck, ConnectFrame, CONNACK_LEN};
use crate::error::{HarnessError, HarnessResult};
use crate::wait::Deadline;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// What the probe sent after opening TCP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// CONNECT sent and CONNACK received
    Handshake,
    /// Nothing sent
    TcpOnly,
}

/// Raw TCP connection to the broker
#[derive(Debug)]
pub struct RawProtocolProbe {
    kind: ProbeKind,
    peer: String,
    stream: Option<TcpStream>,
    connack: Option<ConnAck>,
}

impl RawProtocolProbe {
    /// Open TCP, send `frame`, and read the four-byte CONNACK within `timeout`
    pub async fn handshake(
        addr: &str,
        frame: &ConnectFrame,
        timeout: Duration,
    ) -> HarnessResult<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let packet = frame.encode();

        write_fully(&mut stream, &packet).await?;
        debug!(peer = %addr, client_id = %frame.client_id, bytes = packet.len(), "CONNECT written");

        let mut buf = [0u8; CONNACK_LEN];
        let mut received = 0usize;
        let deadline = Deadline::after(timeout);
        let read = deadline
            .run(read_fully(&mut stream, &mut buf, &mut received))
            .await;

        match read {
            Ok(result) => result?,
            Err(_) => return Err(HarnessError::framing("CONNACK read", CONNACK_LEN, received)),
        }

        let connack = ConnAck::parse(&buf)?;
        info!(peer = %addr, return_code = connack.return_code, "Probe handshake complete");

        Ok(Self {
            kind: ProbeKind::Handshake,
            peer: addr.to_string(),
            stream: Some(stream),
            connack: Some(connack),
        })
    }

    /// Open TCP and send nothing
    pub async fn tcp_only(addr: &str) -> HarnessResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!(peer = %addr, "Probe TCP connection opened");
        Ok(Self {
            kind: ProbeKind::TcpOnly,
            peer: addr.to_string(),
            stream: Some(stream),
            connack: None,
        })
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// CONNACK from the handshake, `None` for TCP-only probes
    pub fn connack(&self) -> Option<ConnAck> {
        self.connack
    }

    /// Whether the broker still holds the connection open.
    ///
    /// Attempts a one-byte read bounded by `timeout`. End of stream or a reset
    /// means the broker closed us. An elapsed deadline means it has not: the
    /// probe never sends after connecting, so silence is liveness.
    pub async fn is_connected(&mut self, timeout: Duration) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut byte = [0u8; 1];
        match Deadline::after(timeout).run(stream.read(&mut byte)).await {
            Ok(Ok(0)) => {
                debug!(peer = %self.peer, kind = ?self.kind, "Peer closed connection");
                false
            }
            Ok(Ok(_)) => {
                debug!(peer = %self.peer, byte = byte[0], "Unexpected byte from peer");
                true
            }
            Ok(Err(e)) => {
                debug!(peer = %self.peer, "Read failed, treating as closed: {}", e);
                false
            }
            Err(_) => true,
        }
    }

    /// Best-effort shutdown and close; safe to call repeatedly
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %self.peer, "Ignoring shutdown error: {}", e);
            }
        }
    }
}

async fn write_fully(stream: &mut TcpStream, packet: &[u8]) -> HarnessResult<()> {
    let mut sent = 0;
    while sent < packet.len() {
        match stream.write(&packet[sent..]).await {
            Ok(0) => return Err(HarnessError::framing("CONNECT write", packet.len(), sent)),
            Ok(n) => sent += n,
            Err(e) if is_peer_gone(&e) => {
                return Err(HarnessError::framing("CONNECT write", packet.len(), sent))
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn read_fully(
    stream: &mut TcpStream,
    buf: &mut [u8],
    received: &mut usize,
) -> HarnessResult<()> {
    while *received < buf.len() {
        match stream.read(&mut buf[*received..]).await {
            Ok(0) => return Err(HarnessError::framing("CONNACK read", buf.len(), *received)),
            Ok(n) => *received += n,
            Err(e) if is_peer_gone(&e) => {
                return Err(HarnessError::framing("CONNACK read", buf.len(), *received))
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
