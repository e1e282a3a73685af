//! XOR-RLE compression for the CMem chunk.
//!
//! Dynamic memory is XORed with the original story image; a zero byte in
//! the result means "unchanged" and runs of zeros are encoded as a zero
//! byte followed by `run - 1`. Anything else is stored verbatim as the
//! XOR difference. Decompression therefore needs the original story.

use crate::error::{Error, Result};
use log::debug;

pub fn compress(current: &[u8], original: &[u8]) -> Vec<u8> {
    debug_assert_eq!(current.len(), original.len());
    let mut out = Vec::new();
    let mut i = 0;

    while i < current.len() {
        let diff = current[i] ^ original[i];
        if diff == 0 {
            let mut run = 0usize;
            while i < current.len() && current[i] ^ original[i] == 0 {
                run += 1;
                i += 1;
            }
            // Trailing unchanged bytes are implicit.
            if i == current.len() {
                break;
            }
            while run > 256 {
                out.push(0);
                out.push(255);
                run -= 256;
            }
            out.push(0);
            out.push((run - 1) as u8);
        } else {
            out.push(diff);
            i += 1;
        }
    }

    debug!("CMem: {} bytes compressed to {}", current.len(), out.len());
    out
}

pub fn decompress(compressed: &[u8], original: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(original.len());
    let mut pos = 0;

    while pos < compressed.len() {
        let byte = compressed[pos];
        pos += 1;
        if byte == 0 {
            let Some(&run_byte) = compressed.get(pos) else {
                return Err(Error::Storage("CMem ends mid run-length pair".into()));
            };
            pos += 1;
            let run = run_byte as usize + 1;
            if out.len() + run > original.len() {
                return Err(Error::Storage("CMem run overflows dynamic memory".into()));
            }
            let start = out.len();
            out.extend_from_slice(&original[start..start + run]);
        } else {
            if out.len() >= original.len() {
                return Err(Error::Storage("CMem data overflows dynamic memory".into()));
            }
            out.push(original[out.len()] ^ byte);
        }
    }

    // Unstated tail means "unchanged from the original".
    let start = out.len();
    out.extend_from_slice(&original[start..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_sparse_changes() {
        let original: Vec<u8> = (0..=255).cycle().take(2000).map(|v: u16| v as u8).collect();
        let mut current = original.clone();
        current[3] = 0xFF;
        current[700] ^= 0x40;
        current[1999] = 0;

        let compressed = compress(&current, &original);
        assert!(compressed.len() < 40);
        assert_eq!(decompress(&compressed, &original).unwrap(), current);
    }

    #[test]
    fn round_trip_identical_memory() {
        let original = vec![7u8; 512];
        let compressed = compress(&original, &original);
        assert!(compressed.is_empty());
        assert_eq!(decompress(&compressed, &original).unwrap(), original);
    }

    #[test]
    fn round_trip_long_zero_run() {
        let original = vec![0xAAu8; 1500];
        let mut current = original.clone();
        current[0] = 0x55;
        current[1400] = 0x56;
        let compressed = compress(&current, &original);
        assert_eq!(decompress(&compressed, &original).unwrap(), current);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let original = vec![1u8; 16];
        assert!(decompress(&[0], &original).is_err());
    }

    #[test]
    fn overlong_stream_is_an_error() {
        let original = vec![1u8; 4];
        assert!(decompress(&[0xFF; 10], &original).is_err());
        assert!(decompress(&[0, 200], &original).is_err());
    }
}
