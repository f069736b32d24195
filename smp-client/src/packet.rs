use ciborium::Value;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::header::{HeaderError, SmpHeader};

/// CBOR map key under which CoAP schemes carry the SMP header.
pub const COAP_HEADER_KEY: &str = "_h";

/// The transport scheme a packet is framed for.
///
/// Raw schemes prepend the 8-byte header to the CBOR body; CoAP schemes
/// embed the header bytes into the body map under [`COAP_HEADER_KEY`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Scheme {
    /// SMP over BLE (GATT), raw framing
    Ble,
    /// SMP over CoAP over BLE
    CoapBle,
    /// SMP over CoAP over UDP
    CoapUdp,
}

impl Scheme {
    /// Whether this scheme uses CoAP framing.
    pub fn is_coap(self) -> bool {
        matches!(self, Scheme::CoapBle | Scheme::CoapUdp)
    }

    /// Whether this scheme runs over BLE.
    pub fn is_ble(self) -> bool {
        matches!(self, Scheme::Ble | Scheme::CoapBle)
    }

    /// Default MTU assumed before any negotiation took place.
    pub fn default_mtu(self) -> usize {
        if self.is_ble() { 498 } else { 1024 }
    }
}

/// Errors that can happen while building or parsing SMP packets.
#[derive(Error, Debug, Diagnostic)]
pub enum PacketError {
    /// Header decoding failed
    #[error(transparent)]
    #[diagnostic(code(smp_client::packet::header))]
    Header(#[from] HeaderError),
    /// The payload could not be CBOR encoded, or is not a map
    #[error("invalid request payload")]
    #[diagnostic(code(smp_client::packet::invalid_payload))]
    InvalidPayload,
    /// The response bytes do not form a well-formed packet for the scheme
    #[error("invalid response: {0}")]
    #[diagnostic(code(smp_client::packet::invalid_response))]
    InvalidResponse(&'static str),
    /// The header `length` field disagrees with the actual body size
    #[error("header announces {header} payload bytes but packet carries {actual}")]
    #[diagnostic(code(smp_client::packet::length_mismatch))]
    HeaderLengthMismatch {
        /// length announced by the header
        header: u16,
        /// actual body size
        actual: usize,
    },
    /// The CBOR body exceeds the 16-bit length field
    #[error("payload of {size} bytes does not fit the header length field")]
    #[diagnostic(code(smp_client::packet::payload_too_large))]
    PayloadTooLarge {
        /// encoded body size
        size: usize,
    },
}

/// A packet split back into its header and CBOR body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPacket {
    /// the SMP header, extracted from the prefix or the `_h` map entry
    pub header: SmpHeader,
    /// the CBOR body without the header
    pub payload: Vec<u8>,
}

fn encode_cbor<P: Serialize>(payload: &P) -> Result<Vec<u8>, PacketError> {
    let mut body = vec![];
    ciborium::into_writer(payload, &mut body).map_err(|_| PacketError::InvalidPayload)?;
    Ok(body)
}

/// Assembles the on-wire packet for `payload` under the given scheme.
///
/// The header `length` field is filled in with the size of the CBOR body,
/// excluding the `_h` entry for CoAP schemes.
pub fn build_packet<P: Serialize>(
    scheme: Scheme,
    mut header: SmpHeader,
    payload: &P,
) -> Result<Vec<u8>, PacketError> {
    let body = encode_cbor(payload)?;
    header.length = body
        .len()
        .try_into()
        .map_err(|_| PacketError::PayloadTooLarge { size: body.len() })?;

    if !scheme.is_coap() {
        let mut packet = Vec::with_capacity(body.len() + header.encode().len());
        packet.extend_from_slice(&header.encode());
        packet.extend_from_slice(&body);
        return Ok(packet);
    }

    let Value::Map(mut entries) =
        Value::serialized(payload).map_err(|_| PacketError::InvalidPayload)?
    else {
        return Err(PacketError::InvalidPayload);
    };
    entries.insert(
        0,
        (
            Value::Text(COAP_HEADER_KEY.to_string()),
            Value::Bytes(header.encode().to_vec()),
        ),
    );
    encode_cbor(&Value::Map(entries))
}

/// Splits a received packet back into header and CBOR body.
pub fn parse_packet(scheme: Scheme, bytes: &[u8]) -> Result<ParsedPacket, PacketError> {
    let (header, payload) = if scheme.is_coap() {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|_| PacketError::InvalidResponse("not valid CBOR"))?;
        let Value::Map(mut entries) = value else {
            return Err(PacketError::InvalidResponse("body is not a map"));
        };
        let header_pos = entries
            .iter()
            .position(|(key, _)| key.as_text() == Some(COAP_HEADER_KEY))
            .ok_or(PacketError::InvalidResponse("missing _h entry"))?;
        let (_, header_value) = entries.remove(header_pos);
        let header_bytes = header_value
            .as_bytes()
            .ok_or(PacketError::InvalidResponse("_h entry is not bytes"))?;
        (
            SmpHeader::decode(header_bytes)?,
            encode_cbor(&Value::Map(entries))?,
        )
    } else {
        let header = SmpHeader::decode(bytes)?;
        (header, bytes[crate::header::SMP_HEADER_SIZE..].to_vec())
    };

    if usize::from(header.length) != payload.len() {
        return Err(PacketError::HeaderLengthMismatch {
            header: header.length,
            actual: payload.len(),
        });
    }

    Ok(ParsedPacket { header, payload })
}

/// Size of the on-wire packet `payload` would produce, without emitting it.
///
/// Used for local size guards and for chunk capacity probing.
pub fn encoded_packet_size<P: Serialize>(
    scheme: Scheme,
    operation: crate::header::Operation,
    group: u16,
    command_id: u8,
    payload: &P,
) -> Result<usize, PacketError> {
    build_packet(scheme, SmpHeader::new(operation, group, 0, command_id), payload)
        .map(|packet| packet.len())
}
