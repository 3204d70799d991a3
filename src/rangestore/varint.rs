//! Variable-length unsigned integers for the range wire format.
//!
//! The value is shifted left four bits and the count of extra bytes (0..15)
//! is packed into the low nibble of the first byte; the whole thing is
//! written little-endian. Values are capped at 2^60 − 1.

use std::io::{Read, Write};

/// Largest encodable value.
pub const MAX_VARINT: u64 = (1 << 60) - 1;

/// Errors from varint encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum VarintError {
    /// Value does not fit in 60 bits.
    #[error("value {0} exceeds the 60-bit varint range")]
    Overflow(u64),

    /// Underlying stream failure.
    #[error("varint i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended inside a multi-byte value.
    #[error("truncated varint")]
    Truncated,
}

/// Append `value` to `w`.
pub fn write_varint(w: &mut impl Write, value: u64) -> Result<(), VarintError> {
    if value > MAX_VARINT {
        return Err(VarintError::Overflow(value));
    }
    let mut packed = value << 4;
    let mut rest = packed >> 8;
    let mut extra_bytes = 0u8;
    while rest != 0 {
        extra_bytes += 1;
        rest >>= 8;
    }
    packed |= extra_bytes as u64;
    w.write_all(&packed.to_le_bytes()[..1 + extra_bytes as usize])?;
    Ok(())
}

/// Read the next value from `r`, or `None` on clean EOF at a value boundary.
pub fn read_varint(r: &mut impl Read) -> Result<Option<u64>, VarintError> {
    let mut first = [0u8; 1];
    match r.read(&mut first)? {
        0 => return Ok(None),
        _ => {}
    }
    let extra = (first[0] & 0x0F) as usize;
    let mut bytes = [0u8; 8];
    bytes[0] = first[0];
    if extra > 0 {
        r.read_exact(&mut bytes[1..1 + extra])
            .map_err(|_| VarintError::Truncated)?;
    }
    Ok(Some(u64::from_le_bytes(bytes) >> 4))
}
