//! Binary envelope for result artifacts
//!
//! ```text
//! +-------+---------+-------------+-----------------+-----------------+
//! | magic | version | payload len | payload         | sha256(payload) |
//! | 4 B   | u16 LE  | u64 LE      | bincode(Value)  | 32 B            |
//! +-------+---------+-------------+-----------------+-----------------+
//! ```
//!
//! Anything that does not match this layout exactly, including a truncated
//! file or trailing bytes, is rejected as corrupt.

use crate::value::Value;
use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Leading bytes of every result artifact.
pub const MAGIC: [u8; 4] = *b"SCR1";

/// Current envelope format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 8;
const DIGEST_LEN: usize = 32;

/// Encode a result value into an envelope.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)
        .map_err(|e| Error::serialization(format!("Failed to encode result: {e}")))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + DIGEST_LEN);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&Sha256::digest(&payload));
    Ok(out)
}

/// Decode and verify an envelope.
///
/// # Errors
///
/// Returns [`Error::Corrupt`] if the magic, version, length or checksum do not
/// match, or if the payload does not decode.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(Error::corrupt(format!(
            "artifact is {} bytes, shorter than the envelope header",
            bytes.len()
        )));
    }
    let (magic, rest) = bytes.split_at(4);
    if magic != MAGIC {
        return Err(Error::corrupt("bad magic bytes"));
    }
    let (version, rest) = rest.split_at(2);
    let version = u16::from_le_bytes([version[0], version[1]]);
    if version != FORMAT_VERSION {
        return Err(Error::corrupt(format!(
            "unsupported envelope version {version}"
        )));
    }
    let (len, rest) = rest.split_at(8);
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(len);
    let len = u64::from_le_bytes(len_bytes);
    let expected = usize::try_from(len)
        .ok()
        .and_then(|l| l.checked_add(DIGEST_LEN))
        .ok_or_else(|| Error::corrupt("payload length overflows"))?;
    if rest.len() != expected {
        return Err(Error::corrupt(format!(
            "payload length mismatch: header says {len}, found {}",
            rest.len().saturating_sub(DIGEST_LEN)
        )));
    }
    let (payload, digest) = rest.split_at(rest.len() - DIGEST_LEN);
    if Sha256::digest(payload).as_slice() != digest {
        return Err(Error::corrupt("payload checksum mismatch"));
    }
    bincode::deserialize(payload)
        .map_err(|e| Error::corrupt(format!("payload does not decode: {e}")))
}
