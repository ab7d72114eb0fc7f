//! Packet codec for the test frame wire format
//!
//! A frame is a fixed 44-byte header followed by the payload. All fields are
//! big-endian. There is no length field and no delimiter: the receiver knows
//! the payload length from the active test configuration.
//!
//! ```text
//!  offset  size  field
//!  0       4     sequence        u32, starts at 0 for every run
//!  4       8     send timestamp  IEEE-754 f64 seconds
//!  12      32    digest          SHA-256 over the payload only
//!  44      n     payload
//! ```
//!
//! Nothing here performs I/O.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Byte length of the fixed header on the wire
pub const HEADER_LEN: usize = 44;
pub const DIGEST_LEN: usize = 32;

// Byte offsets of each field within the header
const OFF_SEQUENCE: usize = 0;
const OFF_TIMESTAMP: usize = 4;
const OFF_DIGEST: usize = 12;

/// Errors produced while decoding a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than one full frame; the caller should wait for more
    #[error("Malformed header: need {needed} bytes, have {available}")]
    MalformedHeader { needed: usize, available: usize },
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub sequence: u32,
    pub send_timestamp: f64,
    pub digest: [u8; DIGEST_LEN],
    pub payload: Vec<u8>,
    /// The digest in the header does not match the payload
    pub corrupt: bool,
}

impl Packet {
    /// Length of this packet once framed
    pub fn frame_len(&self) -> usize {
        frame_len(self.payload.len())
    }
}

/// Framed length for a payload of `payload_len` bytes
pub fn frame_len(payload_len: usize) -> usize {
    HEADER_LEN + payload_len
}

/// SHA-256 over `payload`
pub fn digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Serialize one frame.
///
/// The timestamp is passed in rather than read here so the same inputs always
/// produce the same bytes.
pub fn encode(sequence: u32, send_timestamp: f64, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; frame_len(payload.len())];

    buf[OFF_SEQUENCE..OFF_SEQUENCE + 4].copy_from_slice(&sequence.to_be_bytes());
    buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 8].copy_from_slice(&send_timestamp.to_be_bytes());
    buf[OFF_DIGEST..OFF_DIGEST + DIGEST_LEN].copy_from_slice(&digest(payload));
    buf[HEADER_LEN..].copy_from_slice(payload);

    buf
}

/// Parse the first frame of `frame`.
///
/// Only the first `HEADER_LEN + expected_payload_len` bytes are read; any
/// trailing bytes belong to the next frame. A digest mismatch is reported
/// through [`Packet::corrupt`], not as an error.
pub fn decode(frame: &[u8], expected_payload_len: usize) -> Result<Packet, DecodeError> {
    let needed = frame_len(expected_payload_len);
    if frame.len() < needed {
        return Err(DecodeError::MalformedHeader {
            needed,
            available: frame.len(),
        });
    }

    let (sequence, send_timestamp) = peek_header(frame).ok_or(DecodeError::MalformedHeader {
        needed,
        available: frame.len(),
    })?;

    let mut header_digest = [0u8; DIGEST_LEN];
    header_digest.copy_from_slice(&frame[OFF_DIGEST..OFF_DIGEST + DIGEST_LEN]);

    let payload = frame[HEADER_LEN..needed].to_vec();
    let corrupt = digest(&payload) != header_digest;

    Ok(Packet {
        sequence,
        send_timestamp,
        digest: header_digest,
        payload,
        corrupt,
    })
}

/// Read sequence and timestamp without touching the payload
pub fn peek_header(frame: &[u8]) -> Option<(u32, f64)> {
    let sequence = frame.get(OFF_SEQUENCE..OFF_SEQUENCE + 4)?;
    let timestamp = frame.get(OFF_TIMESTAMP..OFF_TIMESTAMP + 8)?;
    let sequence = u32::from_be_bytes(sequence.try_into().ok()?);
    let timestamp = f64::from_be_bytes(timestamp.try_into().ok()?);
    Some((sequence, timestamp))
}

/// Deterministic test payload for `sequence`: byte `i` is `(sequence + i) mod 256`.
///
/// Consecutive frames carry different bytes, so a replayed or stuck buffer
/// shows up as a digest mismatch.
pub fn payload_for(sequence: u32, len: usize) -> Vec<u8> {
    let base = sequence as usize;
    (0..len).map(|i| (base.wrapping_add(i) % 256) as u8).collect()
}
