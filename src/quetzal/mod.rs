//! Quetzal save file format.
//!
//! Quetzal is the standard interchange format for Z-machine state: an IFF
//! `FORM` of type `IFZS` carrying an `IFhd` story fingerprint, dynamic
//! memory as `CMem` (XOR-RLE against the original story) or `UMem`, and
//! the stack machinery as `Stks`.

pub mod chunks;
pub mod compressed_memory;
pub mod iff;

use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::snapshot::Snapshot;
use chunks::{decode_stks, encode_stks, IFhdChunk};
use iff::{IffChunk, IffFile};
use log::{debug, warn};

pub const FORM_IFZS: [u8; 4] = *b"IFZS";
pub const CHUNK_IFHD: [u8; 4] = *b"IFhd";
pub const CHUNK_CMEM: [u8; 4] = *b"CMem";
pub const CHUNK_UMEM: [u8; 4] = *b"UMem";
pub const CHUNK_STKS: [u8; 4] = *b"Stks";

/// Serialise a snapshot against its story.
pub fn write_quetzal(snapshot: &Snapshot, memory: &Memory) -> Vec<u8> {
    let mut iff = IffFile::new(FORM_IFZS);

    let ifhd = IFhdChunk {
        release: memory.header.release,
        serial: memory.header.serial,
        checksum: memory.header_checksum(),
        pc: snapshot.pc as u32,
    };
    iff.add_chunk(CHUNK_IFHD, ifhd.to_bytes());

    let compressed =
        compressed_memory::compress(&snapshot.dynamic_memory, memory.original_dynamic());
    iff.add_chunk(CHUNK_CMEM, compressed);

    iff.add_chunk(CHUNK_STKS, encode_stks(snapshot));

    iff.to_bytes()
}

/// Parse a Quetzal file back into a snapshot, verifying it belongs to the
/// loaded story.
pub fn read_quetzal(data: &[u8], memory: &Memory) -> Result<Snapshot> {
    let iff = IffFile::from_bytes(data)?;
    if iff.form_type != FORM_IFZS {
        return Err(Error::Storage(format!(
            "not a Quetzal file (form type {:?})",
            String::from_utf8_lossy(&iff.form_type)
        )));
    }

    let ifhd_chunk = iff
        .find_chunk(&CHUNK_IFHD)
        .ok_or_else(|| Error::Storage("save file has no IFhd chunk".into()))?;
    let ifhd = IFhdChunk::from_bytes(&ifhd_chunk.data)?;
    if ifhd.release != memory.header.release || ifhd.checksum != memory.header_checksum() {
        return Err(Error::Storage(format!(
            "save file is for release {} (checksum {:#06x}), story is release {} (checksum {:#06x})",
            ifhd.release,
            ifhd.checksum,
            memory.header.release,
            memory.header_checksum()
        )));
    }
    if ifhd.serial != memory.header.serial {
        warn!("save file serial number differs from the story; continuing anyway");
    }

    let dynamic_memory = restore_memory_chunk(&iff, memory)?;

    let stks_chunk = iff
        .find_chunk(&CHUNK_STKS)
        .ok_or_else(|| Error::Storage("save file has no Stks chunk".into()))?;
    let (stack, frames) = decode_stks(&stks_chunk.data)?;

    debug!(
        "quetzal restore: pc {:#06x}, {} frames, {} stack words",
        ifhd.pc,
        frames.len(),
        stack.len()
    );
    Ok(Snapshot {
        pc: ifhd.pc as usize,
        dynamic_memory,
        stack,
        frames,
    })
}

fn restore_memory_chunk(iff: &IffFile, memory: &Memory) -> Result<Vec<u8>> {
    if let Some(cmem) = iff.find_chunk(&CHUNK_CMEM) {
        return compressed_memory::decompress(&cmem.data, memory.original_dynamic());
    }
    if let Some(umem) = iff.find_chunk(&CHUNK_UMEM) {
        if umem.data.len() != memory.dynamic_len() {
            return Err(Error::Storage(format!(
                "UMem holds {} bytes, story has {} of dynamic memory",
                umem.data.len(),
                memory.dynamic_len()
            )));
        }
        return Ok(umem.data.clone());
    }
    Err(Error::Storage(
        "save file has neither CMem nor UMem chunk".into(),
    ))
}

/// Convenience for hosts that only need the raw chunks (the CLI `--header`
/// dump of a save, for instance).
pub fn chunk_summary(data: &[u8]) -> Result<Vec<(String, usize)>> {
    let iff = IffFile::from_bytes(data)?;
    Ok(iff
        .chunks
        .iter()
        .map(|c: &IffChunk| (String::from_utf8_lossy(&c.chunk_type).into_owned(), c.data.len()))
        .collect())
}
