//! Query-string parsing for the handful of parameters the dispatcher
//! cares about: `EIO`, `transport`, `sid`.

use crate::errors::ConnectError;
use crate::transport::TransportType;

pub struct ParsedQuery {
    pub transport: TransportType,
    pub sid: Option<String>,
}

fn find(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        if k != key {
            return None;
        }
        let v = parts.next().unwrap_or("");
        Some(
            percent_decode(v)
                .unwrap_or_else(|| v.to_string()),
        )
    })
}

/// Minimal `application/x-www-form-urlencoded` percent-decoding: query
/// values this protocol cares about (`EIO`, `transport`, `sid`) never need
/// anything beyond `%XX` escapes and `+` for space.
fn percent_decode(value: &str) -> Option<String> {
    if !value.contains('%') && !value.contains('+') {
        return None;
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?;
                out.push(byte as char);
            }
            other => out.push(other),
        }
    }
    Some(out)
}

/// Step 6 of the request pipeline: require `EIO` equal to the server's
/// protocol version and `transport` to name an available transport.
pub fn parse_query(
    query: &str,
    protocol_version: u8,
    available: &[TransportType],
) -> Result<ParsedQuery, ConnectError> {
    let eio = find(query, "EIO").ok_or(ConnectError::ProtocolVersionInvalid)?;
    let eio: u64 = eio
        .parse()
        .map_err(|_| ConnectError::ProtocolVersionInvalid)?;
    if eio > u8::MAX as u64 {
        return Err(ConnectError::ProtocolVersionInvalid);
    }
    if eio as u8 != protocol_version {
        return Err(ConnectError::ProtocolVersionUnsupported);
    }

    let transport_name = find(query, "transport").ok_or(ConnectError::TransportUnknown)?;
    let transport = TransportType::by_name(&transport_name).ok_or(ConnectError::TransportUnknown)?;
    if !available.contains(&transport) {
        return Err(ConnectError::TransportUnavailable);
    }

    let sid = find(query, "sid");
    Ok(ParsedQuery { transport, sid })
}
