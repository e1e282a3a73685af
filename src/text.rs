//! The Z-string codec: decoding packed text to Unicode and encoding input
//! words for dictionary lookup.
//!
//! Text is stored as 16-bit words holding three 5-bit Z-characters each;
//! the high bit of a word terminates the string. Decoding is stateful over
//! the current and shift-locked alphabets, and the shift semantics differ
//! between V1-2 (shift locks) and V3+ (single-character shifts).

use crate::alphabet::Alphabet;
use crate::error::{Error, Result};
use crate::memory::{Memory, PackedKind};
use bitreader::BitReader;
use log::debug;

/// Z-characters that fit in an encoded dictionary word.
pub fn encoded_length(version: u8) -> usize {
    if version <= 3 {
        6
    } else {
        9
    }
}

/// Unpack one Z-string word into its terminator flag and three 5-bit
/// Z-characters.
fn unpack_word(word: u16) -> Result<(bool, [u8; 3])> {
    let bytes = word.to_be_bytes();
    let mut reader = BitReader::new(&bytes);
    let mut read = |bits: u8| {
        reader
            .read_u8(bits)
            .map_err(|e| Error::decode(0, format!("z-string unpack: {e}")))
    };
    let last = read(1)? == 1;
    Ok((last, [read(5)?, read(5)?, read(5)?]))
}

fn collect_zchars(words: &[u16]) -> Result<Vec<u8>> {
    let mut zchars = Vec::with_capacity(words.len() * 3);
    for &word in words {
        let (_, chars) = unpack_word(word)?;
        zchars.extend_from_slice(&chars);
    }
    Ok(zchars)
}

/// Decode the Z-string starting at `addr`. Returns the text and the number
/// of bytes consumed.
pub fn decode_string(mem: &Memory, addr: usize) -> Result<(String, usize)> {
    let words = mem.get_z_string(addr)?;
    let text = decode_words(mem, &words, 0)?;
    Ok((text, words.len() * 2))
}

/// Decode the string at a packed address.
pub fn decode_packed(mem: &Memory, packed: u16) -> Result<String> {
    let addr = mem.packed_to_byte(packed, PackedKind::ZString);
    Ok(decode_string(mem, addr)?.0)
}

/// Decode a sequence of raw Z-string words. `depth` is non-zero while
/// expanding an abbreviation; abbreviations never nest.
pub fn decode_words(mem: &Memory, words: &[u16], depth: u8) -> Result<String> {
    let version = mem.version();
    let zchars = collect_zchars(words)?;
    let mut text = String::new();

    let mut locked = Alphabet::A0;
    let mut alphabet = Alphabet::A0;
    let mut i = 0;

    while i < zchars.len() {
        let zc = zchars[i];
        i += 1;
        match zc {
            0 => {
                text.push(' ');
                alphabet = locked;
            }
            1..=3 if version >= 3 || zc == 1 => {
                // Abbreviation escape: the next Z-character indexes one of
                // three banks of 32 abbreviations.
                if depth > 0 {
                    return Err(Error::decode(
                        mem.header.abbreviations,
                        format!("abbreviation {zc} nested inside an abbreviation"),
                    ));
                }
                let Some(&index) = zchars.get(i) else {
                    debug!("abbreviation escape at end of string");
                    break;
                };
                i += 1;
                let number = 32 * (zc as usize - 1) + index as usize;
                let entry = mem.header.abbreviations + number * 2;
                let word_addr = mem.get_word(entry)? as usize * 2;
                let abbrev_words = mem.get_z_string(word_addr)?;
                text.push_str(&decode_words(mem, &abbrev_words, depth + 1)?);
                alphabet = locked;
            }
            2 => {
                // V1-2 temporary shift up.
                alphabet = locked.next();
            }
            3 => {
                // V1-2 temporary shift down.
                alphabet = locked.previous();
            }
            4 => {
                if version <= 2 {
                    locked = locked.next();
                    alphabet = locked;
                } else {
                    alphabet = Alphabet::A1;
                }
            }
            5 => {
                if version <= 2 {
                    locked = locked.previous();
                    alphabet = locked;
                } else {
                    alphabet = Alphabet::A2;
                }
            }
            6 if alphabet == Alphabet::A2 => {
                // Two more Z-characters form a 10-bit ZSCII code.
                if i + 1 < zchars.len() {
                    let code = ((zchars[i] as u16) << 5) | zchars[i + 1] as u16;
                    i += 2;
                    if let Some(ch) = mem.zscii_to_unicode(code) {
                        text.push(ch);
                    }
                } else {
                    debug!("ZSCII escape truncated at end of string");
                    i = zchars.len();
                }
                alphabet = locked;
            }
            7 if alphabet == Alphabet::A2 && version >= 2 => {
                text.push('\n');
                alphabet = locked;
            }
            _ => {
                text.push(mem.alphabets().lookup(alphabet, zc));
                alphabet = locked;
            }
        }
    }

    Ok(text)
}

/// Shift Z-character selecting an alphabet for the encoder.
fn shift_for(version: u8, alphabet: Alphabet) -> u8 {
    match (alphabet, version <= 2) {
        (Alphabet::A1, true) => 2,
        (Alphabet::A2, true) => 3,
        (Alphabet::A1, false) => 4,
        _ => 5,
    }
}

/// Encode a word of input text into dictionary form: 6 (V1-3) or 9 (V4+)
/// Z-characters packed into 2 or 3 words with the terminator bit set on
/// the last. Characters with no Z-encoding pad with 5.
pub fn encode_word(mem: &Memory, word: &str) -> Vec<u16> {
    let version = mem.version();
    let resolution = encoded_length(version);
    let mut zchars: Vec<u8> = Vec::with_capacity(resolution);

    for ch in word.chars().flat_map(|c| c.to_lowercase()) {
        if zchars.len() >= resolution {
            break;
        }
        match mem.alphabets().find(ch) {
            Some((Alphabet::A0, zc)) => zchars.push(zc),
            Some((alphabet, zc)) => {
                zchars.push(shift_for(version, alphabet));
                zchars.push(zc);
            }
            None => {
                let code = mem.unicode_to_zscii(ch);
                if (32..=126).contains(&code) || code == 13 {
                    // A2 escape: shift, escape marker, then the 10-bit code.
                    zchars.push(shift_for(version, Alphabet::A2));
                    zchars.push(6);
                    zchars.push((code >> 5) & 0x1F);
                    zchars.push(code & 0x1F);
                } else {
                    zchars.push(5);
                }
            }
        }
    }

    zchars.truncate(resolution);
    while zchars.len() < resolution {
        zchars.push(5);
    }

    let mut words = Vec::with_capacity(resolution / 3);
    for chunk in zchars.chunks(3) {
        words.push(((chunk[0] as u16) << 10) | ((chunk[1] as u16) << 5) | chunk[2] as u16);
    }
    if let Some(last) = words.last_mut() {
        *last |= 0x8000;
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use test_log::test;

    fn pack(zchars: &[u8]) -> Vec<u16> {
        let mut padded = zchars.to_vec();
        while padded.len() % 3 != 0 {
            padded.push(5);
        }
        let mut words: Vec<u16> = padded
            .chunks(3)
            .map(|c| ((c[0] as u16) << 10) | ((c[1] as u16) << 5) | c[2] as u16)
            .collect();
        *words.last_mut().unwrap() |= 0x8000;
        words
    }

    fn story(version: u8) -> Memory {
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = version;
        bytes[header::H_STATIC_BASE] = 0x08;
        bytes[header::H_HIGH_BASE] = 0x08;
        bytes[header::H_ABBREVIATIONS + 1] = 0x40;
        Memory::from_story(bytes).unwrap()
    }

    fn write_words(bytes: &mut [u8], addr: usize, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            bytes[addr + i * 2] = (w >> 8) as u8;
            bytes[addr + i * 2 + 1] = (w & 0xFF) as u8;
        }
    }

    #[test]
    fn decodes_plain_lowercase() {
        let mem = story(3);
        // "hello": h=13 e=10 l=17 l=17 o=20
        let words = pack(&[13, 10, 17, 17, 20]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "hello");
    }

    #[test]
    fn space_and_shifts_v3() {
        let mem = story(3);
        // "Hi there": shift-A1 H, i, space, t,h,e,r,e
        let words = pack(&[4, 13, 14, 0, 25, 13, 10, 23, 10]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "Hi there");
    }

    #[test]
    fn shift_is_temporary_in_v3() {
        let mem = story(3);
        let words = pack(&[4, 6, 6]); // shift, 'A', then back to 'a'
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "Aa");
    }

    #[test]
    fn shift_lock_in_v2() {
        let mem = story(2);
        // Z-char 4 locks A1 until unlocked.
        let words = pack(&[4, 6, 7, 8]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "ABC");
    }

    #[test]
    fn v1_zchar_1_escapes_to_abbreviations() {
        // In V1-2 only Z-char 1 is the abbreviation escape; 2 and 3 stay
        // shifts.
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = 1;
        bytes[header::H_STATIC_BASE] = 0x08;
        bytes[header::H_HIGH_BASE] = 0x08;
        bytes[header::H_ABBREVIATIONS + 1] = 0x40;
        bytes[0x40] = 0x00;
        bytes[0x41] = 0x80; // abbreviation 0 at word address 0x80
        write_words(&mut bytes, 0x100, &pack(&[25, 13, 10, 0])); // "the "
        let mem = Memory::from_story(bytes).unwrap();

        let words = pack(&[1, 0, 10, 19, 9]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "the end");
    }

    #[test]
    fn v1_zchars_2_and_3_are_shifts() {
        let mem = story(1);
        // 2 shifts the next character up one alphabet, 3 shifts it down.
        let words = pack(&[2, 6, 6, 3, 7]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "Aa0");
    }

    #[test]
    fn zscii_escape() {
        let mem = story(5);
        // shift-A2, escape, 'A' (65 = 0b00010_00001)
        let words = pack(&[5, 6, 2, 1]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "A");
    }

    #[test]
    fn a2_newline() {
        let mem = story(3);
        let words = pack(&[6, 5, 7, 7]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "a\nb");
    }

    #[test]
    fn abbreviation_expansion() {
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = 3;
        bytes[header::H_STATIC_BASE] = 0x08;
        bytes[header::H_HIGH_BASE] = 0x08;
        bytes[header::H_ABBREVIATIONS + 1] = 0x40;
        // Abbreviation 0 points at word address 0x100/2 = 0x80.
        bytes[0x40] = 0x00;
        bytes[0x41] = 0x80;
        write_words(&mut bytes, 0x100, &pack(&[25, 13, 10, 0])); // "the "
        let mem = Memory::from_story(bytes).unwrap();

        // Z-chars: abbrev(1) 0, then "end"
        let words = pack(&[1, 0, 10, 19, 9]);
        assert_eq!(decode_words(&mem, &words, 0).unwrap(), "the end");
    }

    #[test]
    fn nested_abbreviation_is_an_error() {
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = 3;
        bytes[header::H_STATIC_BASE] = 0x08;
        bytes[header::H_HIGH_BASE] = 0x08;
        bytes[header::H_ABBREVIATIONS + 1] = 0x40;
        bytes[0x40] = 0x00;
        bytes[0x41] = 0x80;
        // Abbreviation 0 itself contains an abbreviation escape.
        write_words(&mut bytes, 0x100, &pack(&[1, 0]));
        let mem = Memory::from_story(bytes).unwrap();
        assert!(decode_words(&mem, &pack(&[1, 0]), 0).is_err());
    }

    #[test]
    fn decode_string_reports_length() {
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = 3;
        bytes[header::H_STATIC_BASE] = 0x08;
        bytes[header::H_HIGH_BASE] = 0x08;
        write_words(&mut bytes, 0x200, &pack(&[13, 10, 17, 17, 20]));
        let mem = Memory::from_story(bytes).unwrap();
        let (text, len) = decode_string(&mem, 0x200).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(len, 4);
    }

    #[test]
    fn encode_pads_and_terminates() {
        let mem = story(3);
        let words = encode_word(&mem, "go");
        assert_eq!(words.len(), 2);
        // g=12, o=20, then four pads of 5.
        assert_eq!(words[0], (12 << 10) | (20 << 5) | 5);
        assert_eq!(words[1], 0x8000 | (5 << 10) | (5 << 5) | 5);
    }

    #[test]
    fn encode_decode_prefix_property() {
        let mem = story(3);
        for text in ["hello", "xyzzy", "a", "lantern", "pick-up"] {
            let words = encode_word(&mem, text);
            let decoded = decode_words(&mem, &words, 0).unwrap();
            let limit = decoded.trim_end_matches(|c| c == ' ').to_string();
            assert!(
                text.to_lowercase().starts_with(&limit) || limit.starts_with(&text.to_lowercase()),
                "{text} -> {decoded}"
            );
        }
    }

    #[test]
    fn encode_v4_uses_three_words() {
        let mem = story(4);
        let words = encode_word(&mem, "complicated");
        assert_eq!(words.len(), 3);
        assert!(words[2] & 0x8000 != 0);
        assert!(words[0] & 0x8000 == 0);
    }
}
