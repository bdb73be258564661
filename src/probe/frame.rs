//! Hand-encoded CONNECT and CONNACK for MQTT 3.1.1
//!
//! Only what the timer probes need: a CONNECT without will, username or
//! password, and the fixed four-byte CONNACK.

use crate::error::{HarnessError, HarnessResult};
use bytes::{BufMut, Bytes, BytesMut};

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;
/// Fixed header (2) + acknowledge flags (1) + return code (1)
pub const CONNACK_LEN: usize = 4;

const CONNECT_PACKET_TYPE: u8 = 0x10;
const CONNACK_PACKET_TYPE: u8 = 0x20;
const CLEAN_SESSION_FLAG: u8 = 0x02;
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Client id of the keep-alive probe
pub const KEEP_ALIVE_CLIENT_ID: &str = "KeepAlive";
/// Keep-alive the probe announces; the broker must drop it after 1.5x this
pub const KEEP_ALIVE_SECS: u16 = 1;

/// A CONNECT packet without will, username or password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFrame {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

impl ConnectFrame {
    /// The frame the keep-alive probe sends: client id "KeepAlive", 1 s keep-alive,
    /// clean session
    pub fn keep_alive_probe() -> Self {
        Self {
            client_id: KEEP_ALIVE_CLIENT_ID.to_string(),
            keep_alive_secs: KEEP_ALIVE_SECS,
            clean_session: true,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        put_string(&mut body, PROTOCOL_NAME);
        body.put_u8(PROTOCOL_LEVEL);
        body.put_u8(if self.clean_session {
            CLEAN_SESSION_FLAG
        } else {
            0
        });
        body.put_u16(self.keep_alive_secs);
        put_string(&mut body, &self.client_id);

        let mut packet = BytesMut::with_capacity(body.len() + 5);
        packet.put_u8(CONNECT_PACKET_TYPE);
        encode_remaining_length(body.len(), &mut packet);
        packet.extend_from_slice(&body);
        packet.freeze()
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    // Probe client ids are short literals; the 16-bit length prefix cannot overflow
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

/// Variable-length "remaining length": 7 bits per byte, high bit = continuation
pub fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) {
    debug_assert!(len <= MAX_REMAINING_LENGTH);
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// CONNACK as the broker sent it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl ConnAck {
    pub fn parse(bytes: &[u8; CONNACK_LEN]) -> HarnessResult<Self> {
        if bytes[0] != CONNACK_PACKET_TYPE || bytes[1] != 0x02 {
            return Err(HarnessError::UnexpectedPacket {
                stage: "CONNACK read",
                bytes: bytes.to_vec(),
            });
        }
        Ok(Self {
            session_present: bytes[2] & 0x01 == 0x01,
            return_code: bytes[3],
        })
    }

    pub fn is_accepted(&self) -> bool {
        self.return_code == 0
    }
}
