//! Polling body codec: concatenation by the record separator (0x1E) and
//! content-type negotiation between implicit-text and explicit JSON bodies.

use crate::errors::TransportError;
use crate::packet::{Packet, PacketError, PACKET_SEPARATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Binary,
    Json,
    Text,
}

impl ContentKind {
    pub fn mime(self) -> &'static str {
        match self {
            ContentKind::Binary => "application/octet-stream",
            ContentKind::Json => "application/json",
            ContentKind::Text => "text/plain",
        }
    }
}

/// Priority: binary if any selected packet is binary; else JSON if any is
/// JSON (i.e. an `open` packet); else text.
pub fn content_kind(packets: &[Packet]) -> ContentKind {
    if packets.iter().any(Packet::is_binary) {
        ContentKind::Binary
    } else if packets.iter().any(Packet::is_json) {
        ContentKind::Json
    } else {
        ContentKind::Text
    }
}

pub struct EncodedPayload {
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl EncodedPayload {
    pub fn empty() -> Self {
        Self {
            body: Vec::new(),
            content_type: ContentKind::Text.mime(),
        }
    }
}

pub struct DecodedPayload {
    pub packets: Vec<Packet>,
}

pub fn encode_chunk(packets: &[Packet]) -> EncodedPayload {
    if packets.is_empty() {
        return EncodedPayload::empty();
    }
    let mut body = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            body.push(PACKET_SEPARATOR);
        }
        body.extend_from_slice(packet.encode().as_bytes());
    }
    EncodedPayload {
        body,
        content_type: content_kind(packets).mime(),
    }
}

pub fn decode_chunk(
    body: &[u8],
    declared_content_type: Option<&str>,
) -> Result<DecodedPayload, TransportError> {
    let text = std::str::from_utf8(body).map_err(|_| TransportError::DecodingBodyFailed)?;

    let packets = if text.is_empty() {
        Vec::new()
    } else {
        text.split(PACKET_SEPARATOR as char)
            .map(Packet::decode)
            .collect::<Result<Vec<_>, PacketError>>()
            .map_err(|_| TransportError::DecodingPacketsFailed)?
    };

    let detected = content_kind(&packets);
    match declared_content_type.map(normalize_mime) {
        None => {
            if detected != ContentKind::Text {
                return Err(TransportError::ContentTypeDifferentToImplicit);
            }
        }
        Some(declared) => {
            if declared != detected.mime() {
                return Err(TransportError::ContentTypeDifferentToSpecified);
            }
        }
    }

    Ok(DecodedPayload { packets })
}

fn normalize_mime(raw: &str) -> &str {
    raw.split(';').next().unwrap_or(raw).trim()
}
