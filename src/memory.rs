//! The story image: a bounds-checked, write-protected byte buffer.
//!
//! Memory is divided into three regions. Dynamic memory `[0, static_base)`
//! is writable by the running story; static memory `[static_base,
//! high_base)` is read-only; high memory holds routines and packed strings
//! and is only reached through packed addresses. Every store primitive
//! enforces the dynamic boundary.

use crate::alphabet::AlphabetSet;
use crate::error::{Error, Result};
use crate::header::{
    Header, FLAGS2_PRESERVED_MASK, H_CHECKSUM, H_FLAGS1, H_FLAGS2, H_INTERPRETER_NUMBER,
    H_INTERPRETER_VERSION, H_SCREEN_COLUMNS, H_SCREEN_LINES, HX_UNICODE_TABLE,
};
use crate::screen::ScreenCapabilities;
use crate::util::{bytes_from_word, word_from_bytes};
use log::{debug, warn};

/// Default ZSCII 155..=223 to Unicode mapping (Standard 1.1 table 1).
const DEFAULT_UNICODE: [char; 69] = [
    'ä', 'ö', 'ü', 'Ä', 'Ö', 'Ü', 'ß', '»', '«', 'ë', 'ï', 'ÿ', 'Ë', 'Ï', 'á', 'é', 'í', 'ó', 'ú',
    'ý', 'Á', 'É', 'Í', 'Ó', 'Ú', 'Ý', 'à', 'è', 'ì', 'ò', 'ù', 'À', 'È', 'Ì', 'Ò', 'Ù', 'â', 'ê',
    'î', 'ô', 'û', 'Â', 'Ê', 'Î', 'Ô', 'Û', 'å', 'Å', 'ø', 'Ø', 'ã', 'ñ', 'õ', 'Ã', 'Ñ', 'Õ', 'æ',
    'Æ', 'ç', 'Ç', 'þ', 'ð', 'Þ', 'Ð', '£', 'œ', 'Œ', '¡', '¿',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Dynamic,
    Static,
    High,
}

/// Which kind of object a packed address refers to; V6-7 apply different
/// offsets to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedKind {
    Routine,
    ZString,
}

pub struct Memory {
    bytes: Vec<u8>,
    /// Pristine copy of the story, for restart and CMem compression.
    original: Vec<u8>,
    pub header: Header,
    alphabets: AlphabetSet,
    unicode_table: Vec<char>,
}

impl Memory {
    pub fn from_story(bytes: Vec<u8>) -> Result<Memory> {
        let header = Header::parse(&bytes)?;

        let alphabets = if header.alphabet_table != 0 {
            AlphabetSet::from_table(&bytes[header.alphabet_table..header.alphabet_table + 78])?
        } else {
            AlphabetSet::default_for_version(header.version)
        };

        let unicode_table = Self::load_unicode_table(&bytes, &header)?;

        let original = bytes.clone();
        Ok(Memory {
            bytes,
            original,
            header,
            alphabets,
            unicode_table,
        })
    }

    fn load_unicode_table(bytes: &[u8], header: &Header) -> Result<Vec<char>> {
        if header.extension_table == 0 {
            return Ok(DEFAULT_UNICODE.to_vec());
        }
        let ext = header.extension_table;
        let ext_words = word_from_bytes(bytes[ext], bytes[ext + 1]) as usize;
        if ext_words < HX_UNICODE_TABLE {
            return Ok(DEFAULT_UNICODE.to_vec());
        }
        let slot = ext + HX_UNICODE_TABLE * 2;
        if slot + 1 >= bytes.len() {
            return Err(Error::Load(format!(
                "header extension at {ext:#06x} lists words beyond the image"
            )));
        }
        let table_addr = word_from_bytes(bytes[slot], bytes[slot + 1]) as usize;
        if table_addr == 0 {
            return Ok(DEFAULT_UNICODE.to_vec());
        }
        if table_addr >= bytes.len() {
            return Err(Error::Load(format!(
                "unicode translation table at {table_addr:#06x} out of bounds"
            )));
        }
        let count = bytes[table_addr] as usize;
        if table_addr + 1 + count * 2 > bytes.len() {
            return Err(Error::Load(format!(
                "unicode translation table at {table_addr:#06x} not fully readable"
            )));
        }
        let mut table = Vec::with_capacity(count);
        for i in 0..count {
            let cp = word_from_bytes(bytes[table_addr + 1 + i * 2], bytes[table_addr + 2 + i * 2]);
            table.push(char::from_u32(cp as u32).unwrap_or('?'));
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn version(&self) -> u8 {
        self.header.version
    }

    pub fn alphabets(&self) -> &AlphabetSet {
        &self.alphabets
    }

    pub fn region(&self, addr: usize) -> Region {
        if addr < self.header.static_base {
            Region::Dynamic
        } else if addr < self.header.high_base {
            Region::Static
        } else {
            Region::High
        }
    }

    // ------------------------------------------------------------------
    // Read primitives
    // ------------------------------------------------------------------

    pub fn get_byte(&self, addr: usize) -> Result<u8> {
        self.bytes
            .get(addr)
            .copied()
            .ok_or(Error::Bounds(addr))
    }

    pub fn get_word(&self, addr: usize) -> Result<u16> {
        if addr + 1 >= self.bytes.len() {
            return Err(Error::Bounds(addr));
        }
        Ok(word_from_bytes(self.bytes[addr], self.bytes[addr + 1]))
    }

    pub fn get_bytes(&self, addr: usize, len: usize) -> Result<&[u8]> {
        self.bytes
            .get(addr..addr + len)
            .ok_or(Error::Bounds(addr + len))
    }

    // ------------------------------------------------------------------
    // Write primitives (dynamic memory only)
    // ------------------------------------------------------------------

    fn check_writable(&self, addr: usize) -> Result<()> {
        if addr >= self.bytes.len() {
            return Err(Error::Bounds(addr));
        }
        if addr >= self.header.static_base {
            return Err(Error::Protection(addr));
        }
        Ok(())
    }

    pub fn set_byte(&mut self, addr: usize, value: u8) -> Result<()> {
        self.check_writable(addr)?;
        self.bytes[addr] = value;
        Ok(())
    }

    pub fn set_word(&mut self, addr: usize, value: u16) -> Result<()> {
        self.check_writable(addr)?;
        self.check_writable(addr + 1)?;
        let (high, low) = bytes_from_word(value);
        self.bytes[addr] = high;
        self.bytes[addr + 1] = low;
        Ok(())
    }

    pub fn set_bytes(&mut self, addr: usize, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_writable(addr)?;
        self.check_writable(addr + buf.len() - 1)?;
        self.bytes[addr..addr + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`, correctly for overlapping
    /// ranges. Every target byte must lie in dynamic memory.
    pub fn copy_block(&mut self, src: usize, dst: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        if src + len > self.bytes.len() {
            return Err(Error::Bounds(src + len - 1));
        }
        self.check_writable(dst)?;
        self.check_writable(dst + len - 1)?;
        self.bytes.copy_within(src..src + len, dst);
        Ok(())
    }

    /// Zero `len` bytes starting at `dst` (the `copy_table` dst=0 case).
    pub fn zero_block(&mut self, dst: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.check_writable(dst)?;
        self.check_writable(dst + len - 1)?;
        self.bytes[dst..dst + len].fill(0);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Z-string fetch (raw words; decoding lives in the text codec)
    // ------------------------------------------------------------------

    /// Raw Z-string words at `addr`, up to and including the terminator
    /// word (high bit set).
    pub fn get_z_string(&self, addr: usize) -> Result<Vec<u16>> {
        let mut words = Vec::new();
        let mut a = addr;
        loop {
            let w = self.get_word(a)?;
            words.push(w);
            a += 2;
            if w & 0x8000 != 0 {
                return Ok(words);
            }
            if words.len() > 0x2000 {
                return Err(Error::Bounds(a));
            }
        }
    }

    /// Length-prefixed Z-string: a word count byte followed by that many
    /// words (object short names use this shape).
    pub fn get_len_z_string(&self, addr: usize) -> Result<Vec<u16>> {
        let count = self.get_byte(addr)? as usize;
        let mut words = Vec::with_capacity(count);
        for i in 0..count {
            words.push(self.get_word(addr + 1 + i * 2)?);
        }
        Ok(words)
    }

    // ------------------------------------------------------------------
    // Packed addresses
    // ------------------------------------------------------------------

    fn packed_multiplier(&self) -> usize {
        match self.header.version {
            1..=3 => 2,
            4..=7 => 4,
            _ => 8,
        }
    }

    fn packed_offset(&self, kind: PackedKind) -> usize {
        if (6..=7).contains(&self.header.version) {
            8 * match kind {
                PackedKind::Routine => self.header.routines_offset,
                PackedKind::ZString => self.header.strings_offset,
            }
        } else {
            0
        }
    }

    pub fn packed_to_byte(&self, packed: u16, kind: PackedKind) -> usize {
        packed as usize * self.packed_multiplier() + self.packed_offset(kind)
    }

    pub fn is_aligned(&self, addr: usize, kind: PackedKind) -> bool {
        let offset = self.packed_offset(kind);
        addr >= offset && (addr - offset) % self.packed_multiplier() == 0
    }

    pub fn byte_to_packed(&self, addr: usize, kind: PackedKind) -> Result<u16> {
        if !self.is_aligned(addr, kind) {
            return Err(Error::Alignment(addr));
        }
        let packed = (addr - self.packed_offset(kind)) / self.packed_multiplier();
        if packed > 0xFFFF {
            return Err(Error::Alignment(addr));
        }
        Ok(packed as u16)
    }

    /// Check that `addr` can be the start of a routine: aligned, in static
    /// or high memory, locals count in range, and (V<=4) all initial-value
    /// words readable. Returns the locals count.
    pub fn validate_routine_header(&self, addr: usize) -> Result<u8> {
        if !self.is_aligned(addr, PackedKind::Routine) {
            return Err(Error::Alignment(addr));
        }
        if addr < self.header.static_base {
            return Err(Error::Alignment(addr));
        }
        let locals = self.get_byte(addr)?;
        if locals > 15 {
            return Err(Error::Alignment(addr));
        }
        if self.header.version <= 4 {
            // Initial-value words must be addressable.
            self.get_bytes(addr + 1, locals as usize * 2)?;
        }
        Ok(locals)
    }

    // ------------------------------------------------------------------
    // ZSCII
    // ------------------------------------------------------------------

    pub fn zscii_to_unicode(&self, z: u16) -> Option<char> {
        match z {
            0 => None,
            13 => Some('\n'),
            32..=126 => Some(z as u8 as char),
            155..=251 => {
                let index = (z - 155) as usize;
                Some(*self.unicode_table.get(index).unwrap_or(&'?'))
            }
            _ => {
                debug!("unprintable ZSCII code {z}");
                Some('?')
            }
        }
    }

    /// Inverse mapping used when encoding keyboard input and stream-3
    /// tables. Unrepresentable characters become `?`.
    pub fn unicode_to_zscii(&self, ch: char) -> u8 {
        match ch {
            '\n' | '\r' => 13,
            c if (c as u32) >= 32 && (c as u32) <= 126 => c as u8,
            c => match self.unicode_table.iter().position(|&u| u == c) {
                Some(i) => (155 + i) as u8,
                None => b'?',
            },
        }
    }

    // ------------------------------------------------------------------
    // Whole-image operations
    // ------------------------------------------------------------------

    /// Sum of bytes `[0x40, file_length)` mod 0x10000, the `verify`
    /// checksum.
    pub fn compute_checksum(&self) -> u16 {
        let end = self.header.file_length.min(self.original.len());
        self.original[0x40..end]
            .iter()
            .fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
    }

    pub fn verify(&self) -> bool {
        let computed = self.compute_checksum();
        if computed != self.header.checksum {
            warn!(
                "checksum mismatch: header {:#06x}, computed {computed:#06x}",
                self.header.checksum
            );
        }
        computed == self.header.checksum
    }

    pub fn dynamic_len(&self) -> usize {
        self.header.static_base
    }

    pub fn dynamic_slice(&self) -> &[u8] {
        &self.bytes[..self.header.static_base]
    }

    pub fn original_dynamic(&self) -> &[u8] {
        &self.original[..self.header.static_base]
    }

    /// Replace dynamic memory wholesale (restore path), preserving the
    /// Flags2 bits the Standard says survive.
    pub fn restore_dynamic(&mut self, dynamic: &[u8]) -> Result<()> {
        if dynamic.len() != self.header.static_base {
            return Err(Error::Load(format!(
                "dynamic snapshot is {} bytes, story expects {}",
                dynamic.len(),
                self.header.static_base
            )));
        }
        let preserved = self.get_word(H_FLAGS2)? & FLAGS2_PRESERVED_MASK;
        self.bytes[..dynamic.len()].copy_from_slice(dynamic);
        let flags2 = (word_from_bytes(self.bytes[H_FLAGS2], self.bytes[H_FLAGS2 + 1])
            & !FLAGS2_PRESERVED_MASK)
            | preserved;
        let (high, low) = bytes_from_word(flags2);
        self.bytes[H_FLAGS2] = high;
        self.bytes[H_FLAGS2 + 1] = low;
        Ok(())
    }

    /// Reset dynamic memory from the pristine story (restart path).
    pub fn reset_dynamic(&mut self) -> Result<()> {
        let original = self.original[..self.header.static_base].to_vec();
        self.restore_dynamic(&original)
    }

    /// Record what this interpreter can do in the header, as the Standard
    /// obliges on load and after restart/restore. Header bytes are
    /// interpreter territory, so this bypasses write protection.
    pub fn apply_capabilities(&mut self, caps: &ScreenCapabilities) {
        let v = self.header.version;
        let mut flags1 = self.bytes[H_FLAGS1];
        if v <= 3 {
            // Bit 4 set means "status line NOT available".
            if caps.has_display_status_bar {
                flags1 &= !0x10;
            } else {
                flags1 |= 0x10;
            }
            if caps.has_split_window {
                flags1 |= 0x20;
            } else {
                flags1 &= !0x20;
            }
        } else {
            flags1 = 0;
            if caps.has_colors && v >= 5 {
                flags1 |= 0x01;
            }
            if caps.has_bold {
                flags1 |= 0x04;
            }
            if caps.has_italic {
                flags1 |= 0x08;
            }
            if caps.has_fixed_pitch {
                flags1 |= 0x10;
            }
            if caps.has_timed_keyboard_input {
                flags1 |= 0x80;
            }
        }
        self.bytes[H_FLAGS1] = flags1;
        self.bytes[H_INTERPRETER_NUMBER] = 6; // "IBM PC" is the conventional answer
        self.bytes[H_INTERPRETER_VERSION] = b'B';
        self.bytes[H_SCREEN_LINES] = caps.screen_lines;
        self.bytes[H_SCREEN_COLUMNS] = caps.screen_columns;
    }

    /// Checksum in the header, needed by the Quetzal IFhd chunk.
    pub fn header_checksum(&self) -> u16 {
        word_from_bytes(self.original[H_CHECKSUM], self.original[H_CHECKSUM + 1])
    }
}
