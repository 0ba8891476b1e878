//! Bounded zlib inflation.
//!
//! Pack entries and loose objects are zlib streams. Inflation is driven
//! manually through `flate2::Decompress` so every output byte passes a
//! size check before it is kept:
//!
//! - `inflate_exact` expects the stream to produce exactly the declared
//!   number of bytes (pack entries carry their uncompressed size in the
//!   entry header).
//! - `inflate_all` grows the output as the stream dictates (loose objects
//!   declare their size *inside* the stream, in the object frame).
//!
//! A per-thread `Decompress` and a per-thread scratch buffer avoid
//! allocating decompression state on every object read. The scratch state
//! is not re-entrant; inflation must not be invoked from within an
//! inflation callback on the same thread.

use std::cell::RefCell;
use std::fmt;

use flate2::{Decompress, FlushDecompress, Status};

/// Internal inflate scratch buffer size.
const INFLATE_BUF_SIZE: usize = 64 * 1024;

thread_local! {
    static INFLATE_DECOMPRESS: RefCell<Decompress> = RefCell::new(Decompress::new(true));
    static INFLATE_BUF: RefCell<[u8; INFLATE_BUF_SIZE]> =
        const { RefCell::new([0u8; INFLATE_BUF_SIZE]) };
}

fn with_inflate_scratch<F, R>(f: F) -> R
where
    F: FnOnce(&mut Decompress, &mut [u8]) -> R,
{
    INFLATE_DECOMPRESS.with(|de| {
        INFLATE_BUF.with(|buf| {
            let mut de = de.borrow_mut();
            de.reset(true);
            let mut buf = buf.borrow_mut();
            f(&mut de, &mut *buf)
        })
    })
}

/// Inflate error taxonomy.
#[derive(Debug, PartialEq, Eq)]
pub enum InflateError {
    /// The stream would produce more bytes than allowed.
    LimitExceeded,
    /// The stream ended before producing the expected bytes.
    TruncatedInput,
    /// The decompressor made no progress on non-empty input.
    Stalled,
    /// The underlying zlib backend reported an error.
    Backend,
}

impl fmt::Display for InflateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded => write!(f, "inflate limit exceeded"),
            Self::TruncatedInput => write!(f, "truncated zlib input"),
            Self::Stalled => write!(f, "inflate stalled"),
            Self::Backend => write!(f, "inflate backend error"),
        }
    }
}

impl std::error::Error for InflateError {}

/// Inflates a zlib stream with a hard output cap.
///
/// The output buffer is cleared before writing. On error, `out` may hold a
/// partial prefix; callers should discard it. Trailing bytes after the end
/// of the zlib stream are ignored, which is what pack reads need: the next
/// entry's bytes follow immediately.
pub(crate) fn inflate_limited(
    input: &[u8],
    out: &mut Vec<u8>,
    max_out: usize,
) -> Result<(), InflateError> {
    out.clear();

    with_inflate_scratch(|de, buf| {
        let mut in_pos: usize = 0;

        loop {
            let before_in = de.total_in() as usize;
            let before_out = de.total_out() as usize;

            let status = de
                .decompress(&input[in_pos..], buf, FlushDecompress::None)
                .map_err(|_| InflateError::Backend)?;

            let consumed = de.total_in() as usize - before_in;
            let produced = de.total_out() as usize - before_out;
            in_pos += consumed;

            if produced != 0 {
                if out.len() + produced > max_out {
                    return Err(InflateError::LimitExceeded);
                }
                out.extend_from_slice(&buf[..produced]);
            }

            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok => {
                    if consumed == 0 && produced == 0 {
                        if in_pos >= input.len() {
                            return Err(InflateError::TruncatedInput);
                        }
                        return Err(InflateError::Stalled);
                    }
                }
                Status::BufError => {
                    if in_pos >= input.len() {
                        return Err(InflateError::TruncatedInput);
                    }
                }
            }
        }
    })
}

/// Inflates a zlib stream expecting exactly `expected` output bytes.
pub(crate) fn inflate_exact(
    input: &[u8],
    out: &mut Vec<u8>,
    expected: usize,
) -> Result<(), InflateError> {
    inflate_limited(input, out, expected)?;
    if out.len() != expected {
        return Err(InflateError::TruncatedInput);
    }
    Ok(())
}

/// Inflates a zlib stream to completion, however long it is.
///
/// Memory use is bounded by the inflated size, which for a loose object is
/// the framed object itself.
pub(crate) fn inflate_all(input: &[u8], out: &mut Vec<u8>) -> Result<(), InflateError> {
    inflate_limited(input, out, usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn exact_round_trip() {
        let plain = b"web: puma\nworker: sidekiq\n";
        let mut out = Vec::new();
        inflate_exact(&compress(plain), &mut out, plain.len()).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn exact_rejects_short_declaration() {
        let plain = b"hello world hello world";
        let mut out = Vec::new();
        let err = inflate_exact(&compress(plain), &mut out, 4).unwrap_err();
        assert_eq!(err, InflateError::LimitExceeded);
    }

    #[test]
    fn exact_rejects_long_declaration() {
        let plain = b"short";
        let mut out = Vec::new();
        let err = inflate_exact(&compress(plain), &mut out, 64).unwrap_err();
        assert_eq!(err, InflateError::TruncatedInput);
    }

    #[test]
    fn truncated_stream_is_detected() {
        let compressed = compress(b"some data that compresses");
        let mut out = Vec::new();
        let err = inflate_all(&compressed[..compressed.len() - 4], &mut out).unwrap_err();
        assert_eq!(err, InflateError::TruncatedInput);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let plain = b"entry body";
        let mut stream = compress(plain);
        stream.extend_from_slice(b"next entry bytes");

        let mut out = Vec::new();
        inflate_exact(&stream, &mut out, plain.len()).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn garbage_input_is_a_backend_error() {
        let mut out = Vec::new();
        let err = inflate_all(&[0xde, 0xad, 0xbe, 0xef], &mut out).unwrap_err();
        assert_eq!(err, InflateError::Backend);
    }
}
