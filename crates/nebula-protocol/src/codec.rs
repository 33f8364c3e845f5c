//! Packet encoding for stream transports.
//!
//! Wire format of a frame payload: `[version: u8] [postcard-encoded Packet<M>]`.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::packet::Packet;

/// Current wire-protocol version, prepended to every encoded packet.
pub const PROTOCOL_VERSION: u8 = 1;

/// Errors that can occur while encoding or decoding a packet.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard (de)serialization failed.
    #[error("packet codec error: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Encode a packet into a versioned payload.
pub fn encode_packet<M: Serialize>(packet: &Packet<M>) -> Result<Vec<u8>, CodecError> {
    let out = vec![PROTOCOL_VERSION];
    postcard::to_extend(packet, out).map_err(CodecError::from)
}

/// Decode a versioned payload into a packet.
pub fn decode_packet<M: DeserializeOwned>(data: &[u8]) -> Result<Packet<M>, CodecError> {
    let (&version, body) = data.split_first().ok_or(CodecError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
