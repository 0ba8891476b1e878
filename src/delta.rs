//! Delta instruction stream application.
//!
//! A deltified pack entry inflates to a delta stream: two size varints
//! (base length, result length) followed by copy and insert opcodes. The
//! opcode's top bit discriminates:
//!
//! - **Insert** (`0x01..=0x7f`): append the next `op` literal bytes from
//!   the stream. Opcode zero is reserved and illegal.
//! - **Copy** (`0x80..=0xff`): the low four bits select which of four
//!   offset bytes follow (LSB first), the next three bits select which of
//!   three length bytes follow. A decoded length of zero means 65536.
//!
//! The base length is validated against the actual base before any work;
//! every copy range is validated against the base and every write against
//! the result length, so a malformed delta can never read or write out of
//! bounds. The applier is deterministic: the result is a pure function of
//! `(base, delta)`.

use std::fmt;

use crate::span::{read_size_varint, SpanError};

/// Copy length encoding of zero means this many bytes.
const COPY_LEN_ZERO: usize = 0x10000;

/// Errors from delta application.
#[derive(Debug, PartialEq, Eq)]
pub enum DeltaError {
    /// Delta stream ended mid-varint, mid-opcode, or mid-insert.
    Truncated,
    /// A size varint exceeds 64 bits.
    VarintOverflow,
    /// Declared base length does not match the supplied base.
    BaseSizeMismatch { declared: u64, actual: u64 },
    /// Stream ended before producing the declared result length.
    ResultSizeMismatch { declared: u64, actual: u64 },
    /// Opcode zero is reserved.
    BadOpcodeZero,
    /// A copy range reaches outside the base.
    CopyOutOfRange,
    /// A copy or insert would write past the declared result length.
    OutputOverrun,
}

impl fmt::Display for DeltaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "bad delta: truncated stream"),
            Self::VarintOverflow => write!(f, "bad delta: varint overflow"),
            Self::BaseSizeMismatch { declared, actual } => {
                write!(f, "bad delta: base size {declared} != {actual}")
            }
            Self::ResultSizeMismatch { declared, actual } => {
                write!(f, "bad delta: result size {declared}, wrote {actual}")
            }
            Self::BadOpcodeZero => write!(f, "bad delta: opcode zero"),
            Self::CopyOutOfRange => write!(f, "bad delta: copy out of range"),
            Self::OutputOverrun => write!(f, "bad delta: output overrun"),
        }
    }
}

impl std::error::Error for DeltaError {}

impl From<SpanError> for DeltaError {
    fn from(err: SpanError) -> Self {
        match err {
            SpanError::Truncated => Self::Truncated,
            SpanError::Overflow => Self::VarintOverflow,
        }
    }
}

/// Applies a delta stream to `base`, returning the reconstructed bytes.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let mut pos = 0usize;

    let base_len = read_size_varint(delta, &mut pos)?;
    if base_len != base.len() as u64 {
        return Err(DeltaError::BaseSizeMismatch {
            declared: base_len,
            actual: base.len() as u64,
        });
    }

    let result_len = read_size_varint(delta, &mut pos)? as usize;
    let mut result = Vec::with_capacity(result_len);

    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;

        if op == 0 {
            return Err(DeltaError::BadOpcodeZero);
        }

        if op & 0x80 == 0 {
            // Insert: `op` literal bytes from the stream.
            let len = op as usize;
            let end = pos.checked_add(len).ok_or(DeltaError::Truncated)?;
            if end > delta.len() {
                return Err(DeltaError::Truncated);
            }
            if result.len() + len > result_len {
                return Err(DeltaError::OutputOverrun);
            }
            result.extend_from_slice(&delta[pos..end]);
            pos = end;
        } else {
            let (offset, len) = decode_copy_params(delta, &mut pos, op)?;
            let end = offset.checked_add(len).ok_or(DeltaError::CopyOutOfRange)?;
            if end > base.len() {
                return Err(DeltaError::CopyOutOfRange);
            }
            if result.len() + len > result_len {
                return Err(DeltaError::OutputOverrun);
            }
            result.extend_from_slice(&base[offset..end]);
        }
    }

    if result.len() != result_len {
        return Err(DeltaError::ResultSizeMismatch {
            declared: result_len as u64,
            actual: result.len() as u64,
        });
    }

    Ok(result)
}

/// Decodes copy offset and length from the bytes selected by `op`.
///
/// Bit `j` of the low nibble pulls byte `j` of the 32-bit offset; bits
/// 4..6 pull bytes 0..2 of the 24-bit length.
fn decode_copy_params(
    delta: &[u8],
    pos: &mut usize,
    op: u8,
) -> Result<(usize, usize), DeltaError> {
    let mut take = |present: bool| -> Result<usize, DeltaError> {
        if !present {
            return Ok(0);
        }
        let byte = *delta.get(*pos).ok_or(DeltaError::Truncated)?;
        *pos += 1;
        Ok(byte as usize)
    };

    let mut offset = 0usize;
    offset |= take(op & 0x01 != 0)?;
    offset |= take(op & 0x02 != 0)? << 8;
    offset |= take(op & 0x04 != 0)? << 16;
    offset |= take(op & 0x08 != 0)? << 24;

    let mut len = 0usize;
    len |= take(op & 0x10 != 0)?;
    len |= take(op & 0x20 != 0)? << 8;
    len |= take(op & 0x40 != 0)? << 16;

    if len == 0 {
        len = COPY_LEN_ZERO;
    }

    Ok((offset, len))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Encodes a size varint (the inverse of `read_size_varint`).
    pub(crate) fn encode_varint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
        out
    }

    fn delta_header(base_len: usize, result_len: usize) -> Vec<u8> {
        let mut out = encode_varint(base_len as u64);
        out.extend_from_slice(&encode_varint(result_len as u64));
        out
    }

    #[test]
    fn copy_then_insert() {
        let base = b"abc";
        let mut delta = delta_header(3, 6);
        // Copy offset=0 len=3, then insert "XYZ".
        delta.push(0x90);
        delta.push(0x03);
        delta.push(0x03);
        delta.extend_from_slice(b"XYZ");

        assert_eq!(apply_delta(base, &delta).unwrap(), b"abcXYZ");
    }

    #[test]
    fn copy_from_middle_of_base() {
        let base = b"0123456789";
        let mut delta = delta_header(10, 4);
        // Copy offset=4 len=4.
        delta.push(0x91);
        delta.push(0x04);
        delta.push(0x04);

        assert_eq!(apply_delta(base, &delta).unwrap(), b"4567");
    }

    #[test]
    fn zero_opcode_is_rejected() {
        let mut delta = delta_header(0, 1);
        delta.push(0x00);

        assert_eq!(apply_delta(b"", &delta), Err(DeltaError::BadOpcodeZero));
    }

    #[test]
    fn zero_encoded_copy_length_means_65536() {
        let base = vec![0x5a; COPY_LEN_ZERO + 100];
        let mut delta = delta_header(base.len(), COPY_LEN_ZERO);
        // Copy with no offset bytes and no length bytes: offset 0, len 65536.
        delta.push(0x80);

        let result = apply_delta(&base, &delta).unwrap();
        assert_eq!(result.len(), COPY_LEN_ZERO);
        assert!(result.iter().all(|&b| b == 0x5a));
    }

    #[test]
    fn base_length_is_checked_up_front() {
        let delta = delta_header(4, 1);
        assert_eq!(
            apply_delta(b"abc", &delta),
            Err(DeltaError::BaseSizeMismatch {
                declared: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn copy_past_base_end_is_rejected() {
        let mut delta = delta_header(3, 4);
        // Copy offset=1 len=4 from a 3-byte base.
        delta.push(0x91);
        delta.push(0x01);
        delta.push(0x04);

        assert_eq!(apply_delta(b"abc", &delta), Err(DeltaError::CopyOutOfRange));
    }

    #[test]
    fn write_past_result_end_is_rejected() {
        let mut delta = delta_header(0, 2);
        delta.push(0x03);
        delta.extend_from_slice(b"abc");

        assert_eq!(apply_delta(b"", &delta), Err(DeltaError::OutputOverrun));
    }

    #[test]
    fn short_stream_is_a_result_mismatch() {
        let mut delta = delta_header(0, 5);
        delta.push(0x02);
        delta.extend_from_slice(b"ab");

        assert_eq!(
            apply_delta(b"", &delta),
            Err(DeltaError::ResultSizeMismatch {
                declared: 5,
                actual: 2
            })
        );
    }

    #[test]
    fn truncated_insert_is_rejected() {
        let mut delta = delta_header(0, 4);
        delta.push(0x04);
        delta.extend_from_slice(b"ab");

        assert_eq!(apply_delta(b"", &delta), Err(DeltaError::Truncated));
    }

    #[test]
    fn empty_instruction_stream_builds_empty_result() {
        let delta = delta_header(3, 0);
        assert_eq!(apply_delta(b"abc", &delta).unwrap(), b"");
    }

    proptest! {
        /// Insert-only deltas reconstruct their literal payload exactly,
        /// and application is deterministic.
        #[test]
        fn insert_program_round_trips(chunks in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 1..=127),
            0..8,
        )) {
            let expected: Vec<u8> = chunks.iter().flatten().copied().collect();
            let mut delta = delta_header(0, expected.len());
            for chunk in &chunks {
                delta.push(chunk.len() as u8);
                delta.extend_from_slice(chunk);
            }

            let first = apply_delta(b"", &delta).unwrap();
            let second = apply_delta(b"", &delta).unwrap();
            prop_assert_eq!(&first, &expected);
            prop_assert_eq!(first, second);
        }

        /// Copy-only deltas over a random base match direct slicing.
        #[test]
        fn copy_program_matches_base_slices(
            base in prop::collection::vec(any::<u8>(), 1..512),
            ranges in prop::collection::vec((any::<u16>(), 1..64u16), 1..8),
        ) {
            let mut expected = Vec::new();
            let mut delta = Vec::new();
            for (start, len) in &ranges {
                let start = *start as usize % base.len();
                let len = (*len as usize).min(base.len() - start);
                expected.extend_from_slice(&base[start..start + len]);

                delta.push(0x80 | 0x01 | 0x02 | 0x10);
                delta.push((start & 0xff) as u8);
                delta.push(((start >> 8) & 0xff) as u8);
                delta.push(len as u8);
            }

            let mut stream = delta_header(base.len(), expected.len());
            stream.extend_from_slice(&delta);
            prop_assert_eq!(apply_delta(&base, &stream).unwrap(), expected);
        }
    }
}
