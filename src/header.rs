//! Story file header: parsing, validation, and the interpreter-owned bits.
//!
//! The first 64 bytes of every story file describe the memory layout; V5+
//! files may extend that with a header extension table. All multi-byte
//! fields are big-endian.

use crate::error::{Error, Result};
use crate::util::word_from_bytes;
use log::warn;
use std::fmt::{Display, Error as FmtError, Formatter};

// Byte offsets within the header.
pub const H_VERSION: usize = 0x00;
pub const H_FLAGS1: usize = 0x01;
pub const H_RELEASE: usize = 0x02;
pub const H_HIGH_BASE: usize = 0x04;
pub const H_INITIAL_PC: usize = 0x06;
pub const H_DICTIONARY: usize = 0x08;
pub const H_OBJECT_TABLE: usize = 0x0A;
pub const H_GLOBALS: usize = 0x0C;
pub const H_STATIC_BASE: usize = 0x0E;
pub const H_FLAGS2: usize = 0x10;
pub const H_SERIAL: usize = 0x12;
pub const H_ABBREVIATIONS: usize = 0x18;
pub const H_FILE_LENGTH: usize = 0x1A;
pub const H_CHECKSUM: usize = 0x1C;
pub const H_INTERPRETER_NUMBER: usize = 0x1E;
pub const H_INTERPRETER_VERSION: usize = 0x1F;
pub const H_SCREEN_LINES: usize = 0x20;
pub const H_SCREEN_COLUMNS: usize = 0x21;
pub const H_ROUTINES_OFFSET: usize = 0x28;
pub const H_STRINGS_OFFSET: usize = 0x2A;
pub const H_ALPHABET_TABLE: usize = 0x34;
pub const H_EXTENSION_TABLE: usize = 0x36;

/// Words in the header extension table (1-based as the Standard counts them).
pub const HX_UNICODE_TABLE: usize = 3;

/// Flags2 bits 0 (transcripting) and 1 (fixed pitch) survive restart and
/// restore.
pub const FLAGS2_PRESERVED_MASK: u16 = 0x0003;

/// Parsed view of the story header. Addresses are byte offsets into the
/// story image; a zero address means the table is absent.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub release: u16,
    pub serial: [u8; 6],
    pub high_base: usize,
    pub static_base: usize,
    pub initial_pc: usize,
    pub dictionary: usize,
    pub object_table: usize,
    pub globals: usize,
    pub abbreviations: usize,
    /// Stored file length in bytes (already scaled by the version factor).
    pub file_length: usize,
    pub checksum: u16,
    /// V5+ custom alphabet table, 0 if the defaults apply.
    pub alphabet_table: usize,
    /// V5+ header extension table, 0 if absent.
    pub extension_table: usize,
    /// V6-7 packed-address offsets, in units of 8 bytes as stored.
    pub routines_offset: usize,
    pub strings_offset: usize,
}

impl Header {
    /// Scale factor applied to the stored file length word.
    pub fn length_scale(version: u8) -> usize {
        match version {
            1..=3 => 2,
            4..=5 => 4,
            _ => 8,
        }
    }

    /// Maximum legal story size for a version.
    pub fn max_file_size(version: u8) -> usize {
        match version {
            1..=3 => 128 * 1024,
            4..=5 => 256 * 1024,
            _ => 512 * 1024,
        }
    }

    /// Minimum bytes a header occupies before the rest of the image may
    /// begin.
    pub fn min_size(version: u8) -> usize {
        if version >= 6 {
            128
        } else {
            64
        }
    }

    /// Parse and validate a header from the start of a story image.
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < 64 {
            return Err(Error::Load(format!(
                "story is {} bytes, too small to hold a header",
                bytes.len()
            )));
        }

        let word = |offset: usize| word_from_bytes(bytes[offset], bytes[offset + 1]);
        let version = bytes[H_VERSION];
        if !(1..=8).contains(&version) {
            return Err(Error::Load(format!("unsupported story version {version}")));
        }
        if bytes.len() < Header::min_size(version) {
            return Err(Error::Load(format!(
                "V{version} story needs at least {} header bytes, found {}",
                Header::min_size(version),
                bytes.len()
            )));
        }

        let mut serial = [0u8; 6];
        serial.copy_from_slice(&bytes[H_SERIAL..H_SERIAL + 6]);

        let stored_length = word(H_FILE_LENGTH) as usize * Header::length_scale(version);
        // Early Infocom releases left the length word zero.
        let file_length = if stored_length == 0 {
            bytes.len()
        } else {
            stored_length
        };

        let header = Header {
            version,
            release: word(H_RELEASE),
            serial,
            high_base: word(H_HIGH_BASE) as usize,
            static_base: word(H_STATIC_BASE) as usize,
            initial_pc: word(H_INITIAL_PC) as usize,
            dictionary: word(H_DICTIONARY) as usize,
            object_table: word(H_OBJECT_TABLE) as usize,
            globals: word(H_GLOBALS) as usize,
            abbreviations: word(H_ABBREVIATIONS) as usize,
            file_length,
            checksum: word(H_CHECKSUM),
            alphabet_table: if version >= 5 {
                word(H_ALPHABET_TABLE) as usize
            } else {
                0
            },
            extension_table: if version >= 5 {
                word(H_EXTENSION_TABLE) as usize
            } else {
                0
            },
            routines_offset: if (6..=7).contains(&version) {
                word(H_ROUTINES_OFFSET) as usize
            } else {
                0
            },
            strings_offset: if (6..=7).contains(&version) {
                word(H_STRINGS_OFFSET) as usize
            } else {
                0
            },
        };

        header.validate(bytes.len())?;
        Ok(header)
    }

    fn validate(&self, image_len: usize) -> Result<()> {
        let v = self.version;
        if image_len > Header::max_file_size(v) {
            return Err(Error::Load(format!(
                "V{v} story is {image_len} bytes, over the {} byte limit",
                Header::max_file_size(v)
            )));
        }
        if self.file_length > image_len {
            warn!(
                "header claims {} bytes but the image holds {image_len}; trusting the image",
                self.file_length
            );
        }
        if self.static_base < 64 {
            return Err(Error::Load(format!(
                "static memory base {:#06x} overlaps the header",
                self.static_base
            )));
        }
        if self.static_base > 0xFFFF {
            return Err(Error::Load(format!(
                "static memory base {:#07x} above 64K",
                self.static_base
            )));
        }
        if self.high_base < self.static_base {
            return Err(Error::Load(format!(
                "high memory base {:#06x} below static base {:#06x}",
                self.high_base, self.static_base
            )));
        }
        if self.static_base > image_len {
            return Err(Error::Load(format!(
                "static memory base {:#06x} beyond end of a {image_len} byte image",
                self.static_base
            )));
        }
        if (6..=7).contains(&v) && (self.routines_offset == 0 || self.strings_offset == 0) {
            return Err(Error::Load(
                "V6/V7 story without routine and string offsets".into(),
            ));
        }
        if self.alphabet_table != 0 && self.alphabet_table + 78 > image_len {
            return Err(Error::Load(format!(
                "alphabet table at {:#06x} is not fully readable",
                self.alphabet_table
            )));
        }
        if self.extension_table != 0 && self.extension_table + 2 > image_len {
            return Err(Error::Load(format!(
                "header extension table at {:#06x} out of bounds",
                self.extension_table
            )));
        }
        Ok(())
    }

    pub fn serial_string(&self) -> String {
        self.serial.iter().map(|&b| b as char).collect()
    }

    /// True when the V3 status line shows hours/minutes instead of
    /// score/moves (Flags1 bit 1).
    pub fn status_time_mode(&self, flags1: u8) -> bool {
        self.version <= 3 && flags1 & 0x02 != 0
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::result::Result<(), FmtError> {
        write!(
            f,
            "
Z-code version:           {}
Release number:           {}
Serial number:            {}
Start PC:                 {:#06x}
Base of high memory:      {:#06x}
Base of static memory:    {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Abbreviations address:    {:#06x}
File size:                {:#07x}
Checksum:                 {:#06x}
",
            self.version,
            self.release,
            self.serial_string(),
            self.initial_pc,
            self.high_base,
            self.static_base,
            self.dictionary,
            self.object_table,
            self.globals,
            self.abbreviations,
            self.file_length,
            self.checksum,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_image() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x800];
        bytes[H_VERSION] = 3;
        bytes[H_HIGH_BASE] = 0x04; // 0x0400
        bytes[H_INITIAL_PC + 1] = 0x00;
        bytes[H_INITIAL_PC] = 0x04;
        bytes[H_STATIC_BASE] = 0x02; // 0x0200
        bytes[H_SERIAL..H_SERIAL + 6].copy_from_slice(b"230732");
        bytes
    }

    #[test]
    fn parses_minimal_v3() {
        let h = Header::parse(&minimal_image()).unwrap();
        assert_eq!(h.version, 3);
        assert_eq!(h.static_base, 0x200);
        assert_eq!(h.high_base, 0x400);
        assert_eq!(h.serial_string(), "230732");
        // Zero length word falls back to the image size.
        assert_eq!(h.file_length, 0x800);
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = minimal_image();
        bytes[H_VERSION] = 9;
        assert!(matches!(Header::parse(&bytes), Err(Error::Load(_))));
    }

    #[test]
    fn rejects_static_below_header() {
        let mut bytes = minimal_image();
        bytes[H_STATIC_BASE] = 0;
        bytes[H_STATIC_BASE + 1] = 0x20;
        assert!(matches!(Header::parse(&bytes), Err(Error::Load(_))));
    }

    #[test]
    fn rejects_high_below_static() {
        let mut bytes = minimal_image();
        bytes[H_HIGH_BASE] = 0x01;
        bytes[H_HIGH_BASE + 1] = 0x00;
        assert!(matches!(Header::parse(&bytes), Err(Error::Load(_))));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(Header::parse(&[3u8; 20]).is_err());
    }
}
