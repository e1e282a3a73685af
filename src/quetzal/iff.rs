//! IFF (Interchange File Format) framing for Quetzal files.
//!
//! An IFF file is `FORM <size> <type>` followed by chunks of
//! `<id> <size> <bytes>`, each padded to an even length. Sizes exclude
//! the pad byte.

use crate::error::{Error, Result};

pub struct IffChunk {
    pub chunk_type: [u8; 4],
    pub data: Vec<u8>,
}

pub struct IffFile {
    pub form_type: [u8; 4],
    pub chunks: Vec<IffChunk>,
}

impl IffFile {
    pub fn new(form_type: [u8; 4]) -> IffFile {
        IffFile {
            form_type,
            chunks: Vec::new(),
        }
    }

    pub fn add_chunk(&mut self, chunk_type: [u8; 4], data: Vec<u8>) {
        self.chunks.push(IffChunk { chunk_type, data });
    }

    pub fn find_chunk(&self, chunk_type: &[u8; 4]) -> Option<&IffChunk> {
        self.chunks.iter().find(|c| &c.chunk_type == chunk_type)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let content_size: usize = 4 + self
            .chunks
            .iter()
            .map(|c| 8 + c.data.len() + c.data.len() % 2)
            .sum::<usize>();

        let mut out = Vec::with_capacity(content_size + 8);
        out.extend_from_slice(b"FORM");
        out.extend_from_slice(&(content_size as u32).to_be_bytes());
        out.extend_from_slice(&self.form_type);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.chunk_type);
            out.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
            out.extend_from_slice(&chunk.data);
            if chunk.data.len() % 2 == 1 {
                out.push(0);
            }
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<IffFile> {
        if data.len() < 12 {
            return Err(Error::Storage("IFF data truncated".into()));
        }
        if &data[0..4] != b"FORM" {
            return Err(Error::Storage("not an IFF file (no FORM header)".into()));
        }
        let declared = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if declared + 8 > data.len() {
            return Err(Error::Storage(format!(
                "IFF FORM claims {declared} bytes but only {} follow",
                data.len() - 8
            )));
        }

        let mut form_type = [0u8; 4];
        form_type.copy_from_slice(&data[8..12]);
        let mut iff = IffFile::new(form_type);

        let mut pos = 12;
        let end = 8 + declared;
        while pos + 8 <= end {
            let mut chunk_type = [0u8; 4];
            chunk_type.copy_from_slice(&data[pos..pos + 4]);
            let size =
                u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                    as usize;
            pos += 8;
            if pos + size > data.len() {
                return Err(Error::Storage(format!(
                    "chunk {} claims {size} bytes past the end of the file",
                    String::from_utf8_lossy(&chunk_type)
                )));
            }
            iff.chunks.push(IffChunk {
                chunk_type,
                data: data[pos..pos + size].to_vec(),
            });
            pos += size + size % 2;
        }
        Ok(iff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_odd_chunk() {
        let mut iff = IffFile::new(*b"IFZS");
        iff.add_chunk(*b"IFhd", vec![1, 2, 3, 4, 5]); // odd length, padded
        iff.add_chunk(*b"Stks", vec![9, 8]);
        let bytes = iff.to_bytes();
        assert_eq!(bytes.len() % 2, 0);

        let parsed = IffFile::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.form_type, *b"IFZS");
        assert_eq!(parsed.chunks.len(), 2);
        assert_eq!(parsed.find_chunk(b"IFhd").unwrap().data, vec![1, 2, 3, 4, 5]);
        assert_eq!(parsed.find_chunk(b"Stks").unwrap().data, vec![9, 8]);
        assert!(parsed.find_chunk(b"CMem").is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(IffFile::from_bytes(b"FORM").is_err());
        assert!(IffFile::from_bytes(b"LIST\x00\x00\x00\x04IFZS").is_err());
    }
}
