//! Byte form of snapshot buffers: contiguous little-endian IEEE-754 f32.
//!
//! Used when a snapshot leaves the process (OSC blobs) rather than moving
//! between threads as a `Vec<f32>`.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("payload of {0} bytes is not a whole number of f32 samples")]
    Truncated(usize),
}

pub const BYTES_PER_SAMPLE: usize = 4;

/// Append `samples` to `out` as little-endian f32.
pub fn encode_into(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        // Writing into a Vec cannot fail.
        let _ = out.write_f32::<LittleEndian>(s);
    }
}

pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    encode_into(samples, &mut out);
    out
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, WireError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(WireError::Truncated(bytes.len()));
    }
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() / BYTES_PER_SAMPLE);
    while let Ok(s) = cursor.read_f32::<LittleEndian>() {
        out.push(s);
    }
    Ok(out)
}

/// Decode into an existing buffer. Returns the number of samples written;
/// stops at whichever of `bytes` and `out` runs out first.
pub fn decode_into(bytes: &[u8], out: &mut [f32]) -> Result<usize, WireError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(WireError::Truncated(bytes.len()));
    }
    let n = (bytes.len() / BYTES_PER_SAMPLE).min(out.len());
    LittleEndian::read_f32_into(&bytes[..n * BYTES_PER_SAMPLE], &mut out[..n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian() {
        let bytes = encode(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn test_decode() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.125f32.to_le_bytes());
        bytes.extend_from_slice(&3.0f32.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), vec![0.125, 3.0]);
        assert_eq!(decode(&bytes[..7]), Err(WireError::Truncated(7)));
        assert_eq!(decode(&[]).unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn test_decode_into_short_target() {
        let bytes = encode(&[1.0, 2.0, 3.0]);
        let mut out = [0.0f32; 2];
        assert_eq!(decode_into(&bytes, &mut out), Ok(2));
        assert_eq!(out, [1.0, 2.0]);
    }
}
