//! Packet codec: the binary/textual framing shared by every transport.
//!
//! `encoded = id || payload` and decoding is the exact inverse.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineIoConfig;
use crate::sid::Sid;
use crate::transport::TransportType;

/// Separator used to delimit concatenated packets in a polling HTTP body.
pub const PACKET_SEPARATOR: u8 = 0x1E;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPacket {
    pub sid: String,
    pub upgrades: Vec<TransportType>,
    #[serde(rename = "pingInterval")]
    pub ping_interval: u64,
    #[serde(rename = "pingTimeout")]
    pub ping_timeout: u64,
    #[serde(rename = "maxPayload")]
    pub max_payload: u64,
}

impl OpenPacket {
    pub fn new(sid: Sid, config: &EngineIoConfig) -> Self {
        Self {
            sid: sid.as_str().to_owned(),
            upgrades: config
                .available_transports
                .iter()
                .copied()
                .filter(|t| *t != TransportType::Polling)
                .collect(),
            ping_interval: config.ping_interval.as_millis() as u64,
            ping_timeout: config.ping_timeout.as_millis() as u64,
            max_payload: config.max_payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Open(OpenPacket),
    Close,
    Ping { probe: bool },
    Pong { probe: bool },
    Message(String),
    Binary(Bytes),
    Upgrade,
    Noop,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type '{0}'")]
    UnknownType(char),
    #[error("invalid open packet payload")]
    InvalidOpenPayload,
    #[error("packet payload must be empty")]
    NonEmptyPayload,
    #[error("ping/pong payload must be empty or 'probe'")]
    InvalidProbePayload,
    #[error("invalid base64 payload")]
    InvalidBase64,
}

impl Packet {
    /// `isBinary(packet) ≡ type = binaryMessage`.
    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_))
    }

    /// `isJSON(packet) ≡ type ∈ {open}`.
    pub fn is_json(&self) -> bool {
        matches!(self, Packet::Open(_))
    }

    pub fn type_id(&self) -> char {
        match self {
            Packet::Open(_) => '0',
            Packet::Close => '1',
            Packet::Ping { .. } => '2',
            Packet::Pong { .. } => '3',
            Packet::Message(_) => '4',
            Packet::Binary(_) => 'b',
            Packet::Upgrade => '5',
            Packet::Noop => '6',
        }
    }

    /// Encode this packet as it would be placed into a polling chunk or a
    /// websocket text frame. Binary packets are base64'd here; a websocket
    /// transport bypasses this for outgoing binary and writes a raw frame
    /// instead.
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(p) => format!(
                "0{}",
                serde_json::to_string(p).expect("OpenPacket always serializes")
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping { probe: false } => "2".to_string(),
            Packet::Ping { probe: true } => "2probe".to_string(),
            Packet::Pong { probe: false } => "3".to_string(),
            Packet::Pong { probe: true } => "3probe".to_string(),
            Packet::Message(s) => format!("4{s}"),
            Packet::Binary(b) => format!("b{}", STANDARD.encode(b)),
            Packet::Upgrade => "5".to_string(),
            Packet::Noop => "6".to_string(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        // Avoid materialising the base64 string twice for size accounting.
        match self {
            Packet::Binary(b) => 1 + (b.len() + 2) / 3 * 4,
            other => other.encode().len(),
        }
    }

    pub fn decode(raw: &str) -> Result<Packet, PacketError> {
        let mut chars = raw.chars();
        let ty = chars.next().ok_or(PacketError::Empty)?;
        let payload = chars.as_str();
        match ty {
            '0' => {
                if payload.is_empty() {
                    return Err(PacketError::InvalidOpenPayload);
                }
                let open: OpenPacket =
                    serde_json::from_str(payload).map_err(|_| PacketError::InvalidOpenPayload)?;
                Ok(Packet::Open(open))
            }
            '1' => {
                expect_empty(payload)?;
                Ok(Packet::Close)
            }
            '2' => Ok(Packet::Ping {
                probe: parse_probe(payload)?,
            }),
            '3' => Ok(Packet::Pong {
                probe: parse_probe(payload)?,
            }),
            '4' => Ok(Packet::Message(payload.to_string())),
            'b' => {
                let bytes = STANDARD
                    .decode(payload)
                    .map_err(|_| PacketError::InvalidBase64)?;
                Ok(Packet::Binary(Bytes::from(bytes)))
            }
            '5' => {
                expect_empty(payload)?;
                Ok(Packet::Upgrade)
            }
            '6' => {
                expect_empty(payload)?;
                Ok(Packet::Noop)
            }
            other => Err(PacketError::UnknownType(other)),
        }
    }

    /// A raw websocket binary frame is wrapped with no further decoding.
    pub fn from_binary_frame(data: Bytes) -> Packet {
        Packet::Binary(data)
    }
}

fn expect_empty(payload: &str) -> Result<(), PacketError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(PacketError::NonEmptyPayload)
    }
}

fn parse_probe(payload: &str) -> Result<bool, PacketError> {
    match payload {
        "" => Ok(false),
        "probe" => Ok(true),
        _ => Err(PacketError::InvalidProbePayload),
    }
}
