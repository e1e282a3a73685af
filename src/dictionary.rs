//! Dictionary lookup and input tokenisation.
//!
//! A dictionary starts with its separator list, then the entry length and
//! a signed entry count: positive means the entries are sorted and can be
//! binary searched, negative means an unsorted linear scan (game-supplied
//! dictionaries for the V5 `tokenise` opcode are often unsorted).

use crate::error::Result;
use crate::memory::Memory;
use crate::text;
use crate::util::to_i16;
use log::debug;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct Dictionary {
    separators: Vec<u8>,
    entry_length: usize,
    entry_count: i16,
    entries_base: usize,
    /// Encoded words per entry: 2 in V1-3, 3 in V4+.
    encoded_words: usize,
}

impl Dictionary {
    pub fn from_memory(mem: &Memory, addr: usize) -> Result<Dictionary> {
        let sep_count = mem.get_byte(addr)? as usize;
        let separators = mem.get_bytes(addr + 1, sep_count)?.to_vec();
        let entry_length = mem.get_byte(addr + 1 + sep_count)? as usize;
        let entry_count = to_i16(mem.get_word(addr + 2 + sep_count)?);
        Ok(Dictionary {
            separators,
            entry_length,
            entry_count,
            entries_base: addr + 4 + sep_count,
            encoded_words: if mem.version() <= 3 { 2 } else { 3 },
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count.unsigned_abs() as usize
    }

    pub fn is_sorted(&self) -> bool {
        self.entry_count >= 0
    }

    pub fn separators(&self) -> &[u8] {
        &self.separators
    }

    fn entry_addr(&self, index: usize) -> usize {
        self.entries_base + index * self.entry_length
    }

    fn compare_entry(&self, mem: &Memory, addr: usize, encoded: &[u16]) -> Result<Ordering> {
        for (i, &word) in encoded.iter().enumerate().take(self.encoded_words) {
            let entry_word = mem.get_word(addr + i * 2)?;
            match entry_word.cmp(&word) {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(Ordering::Equal)
    }

    /// Find the entry matching an encoded word; returns its byte address
    /// or 0.
    pub fn lookup(&self, mem: &Memory, encoded: &[u16]) -> Result<usize> {
        if self.is_sorted() {
            let mut low = 0i32;
            let mut high = self.entry_count() as i32 - 1;
            while low <= high {
                let mid = (low + high) / 2;
                let addr = self.entry_addr(mid as usize);
                match self.compare_entry(mem, addr, encoded)? {
                    Ordering::Equal => return Ok(addr),
                    Ordering::Less => low = mid + 1,
                    Ordering::Greater => high = mid - 1,
                }
            }
        } else {
            for i in 0..self.entry_count() {
                let addr = self.entry_addr(i);
                if self.compare_entry(mem, addr, encoded)? == Ordering::Equal {
                    return Ok(addr);
                }
            }
        }
        Ok(0)
    }

    /// Find a plain-text word.
    pub fn lookup_word(&self, mem: &Memory, word: &str) -> Result<usize> {
        let encoded = text::encode_word(mem, word);
        self.lookup(mem, &encoded)
    }

    /// Dump every entry (the CLI `--dict` view).
    pub fn words(&self, mem: &Memory) -> Result<Vec<String>> {
        let mut words = Vec::with_capacity(self.entry_count());
        for i in 0..self.entry_count() {
            let addr = self.entry_addr(i);
            let mut encoded = Vec::with_capacity(self.encoded_words);
            for w in 0..self.encoded_words {
                encoded.push(mem.get_word(addr + w * 2)?);
            }
            words.push(text::decode_words(mem, &encoded, 0)?);
        }
        Ok(words)
    }
}

/// One word split out of an input line: its text and its byte position
/// within the text buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: usize,
}

/// Split input into tokens. Separators are tokens of their own; runs of
/// spaces only delimit. `base` is the buffer offset of the first text
/// byte, so positions land where the story expects them.
pub fn split_input(input: &str, separators: &[u8], base: usize) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;

    for (i, ch) in input.chars().enumerate() {
        if ch == ' ' {
            if !current.is_empty() {
                tokens.push(Token {
                    text: std::mem::take(&mut current),
                    position: base + start,
                });
            }
        } else if separators.contains(&(ch as u8)) {
            if !current.is_empty() {
                tokens.push(Token {
                    text: std::mem::take(&mut current),
                    position: base + start,
                });
            }
            tokens.push(Token {
                text: ch.to_string(),
                position: base + i,
            });
        } else {
            if current.is_empty() {
                start = i;
            }
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(Token {
            text: current,
            position: base + start,
        });
    }
    tokens
}

/// Offset of the first text byte within a text buffer.
pub fn text_buffer_base(version: u8) -> usize {
    if version <= 4 {
        1
    } else {
        2
    }
}

/// Read the typed line back out of a text buffer.
pub fn read_text_buffer(mem: &Memory, text_buffer: usize) -> Result<String> {
    let version = mem.version();
    let mut out = String::new();
    if version <= 4 {
        let mut addr = text_buffer + 1;
        loop {
            let b = mem.get_byte(addr)?;
            if b == 0 {
                break;
            }
            out.push(b as char);
            addr += 1;
        }
    } else {
        let len = mem.get_byte(text_buffer + 1)? as usize;
        for i in 0..len {
            out.push(mem.get_byte(text_buffer + 2 + i)? as char);
        }
    }
    Ok(out)
}

/// Tokenise the line in `text_buffer` into `parse_buffer`: a max-tokens
/// byte, an actual count, then 4 bytes per token (dictionary address,
/// length, buffer position). With `skip_unknown` set, entries for words
/// missing from the dictionary are left untouched (the V5 `tokenise`
/// flag).
pub fn tokenise_buffer(
    mem: &mut Memory,
    dict: &Dictionary,
    text_buffer: usize,
    parse_buffer: usize,
    skip_unknown: bool,
) -> Result<()> {
    let input = read_text_buffer(mem, text_buffer)?;
    let base = text_buffer_base(mem.version());
    let tokens = split_input(&input, dict.separators(), base);

    let max_tokens = mem.get_byte(parse_buffer)? as usize;
    let count = tokens.len().min(max_tokens);
    mem.set_byte(parse_buffer + 1, count as u8)?;

    for (i, token) in tokens.iter().take(count).enumerate() {
        let addr = dict.lookup_word(mem, &token.text)?;
        let entry = parse_buffer + 2 + i * 4;
        debug!(
            "token '{}' at position {} -> dictionary {addr:#06x}",
            token.text, token.position
        );
        if addr == 0 && skip_unknown {
            continue;
        }
        mem.set_word(entry, addr as u16)?;
        mem.set_byte(entry + 2, token.text.len() as u8)?;
        mem.set_byte(entry + 3, token.position as u8)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use test_log::test;

    /// Story with a sorted V3 dictionary at 0x200 holding "box", "go",
    /// "look", with '.' and ',' as separators.
    fn story_with_dictionary() -> (Memory, Dictionary) {
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = 3;
        bytes[header::H_STATIC_BASE] = 0x08;
        bytes[header::H_HIGH_BASE] = 0x08;
        bytes[header::H_DICTIONARY] = 0x02;

        let dict = 0x200;
        bytes[dict] = 2; // two separators
        bytes[dict + 1] = b'.';
        bytes[dict + 2] = b',';
        bytes[dict + 3] = 7; // entry length: 4 encoded + 3 data bytes
        bytes[dict + 4] = 0x00;
        bytes[dict + 5] = 3; // three entries, sorted

        let mem_probe = Memory::from_story(bytes.clone()).unwrap();
        let mut words: Vec<Vec<u16>> = ["box", "go", "look"]
            .iter()
            .map(|w| text::encode_word(&mem_probe, w))
            .collect();
        words.sort();
        let entries = dict + 6;
        for (i, w) in words.iter().enumerate() {
            let addr = entries + i * 7;
            bytes[addr..addr + 2].copy_from_slice(&w[0].to_be_bytes());
            bytes[addr + 2..addr + 4].copy_from_slice(&w[1].to_be_bytes());
        }

        let mem = Memory::from_story(bytes).unwrap();
        let dictionary = Dictionary::from_memory(&mem, 0x200).unwrap();
        (mem, dictionary)
    }

    #[test]
    fn parses_layout() {
        let (_, dict) = story_with_dictionary();
        assert_eq!(dict.separators(), b".,");
        assert_eq!(dict.entry_count(), 3);
        assert!(dict.is_sorted());
    }

    #[test]
    fn binary_lookup_finds_words() {
        let (mem, dict) = story_with_dictionary();
        assert_ne!(dict.lookup_word(&mem, "go").unwrap(), 0);
        assert_ne!(dict.lookup_word(&mem, "look").unwrap(), 0);
        assert_ne!(dict.lookup_word(&mem, "box").unwrap(), 0);
        assert_eq!(dict.lookup_word(&mem, "xyzzy").unwrap(), 0);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let (mem, dict) = story_with_dictionary();
        assert_eq!(
            dict.lookup_word(&mem, "LOOK").unwrap(),
            dict.lookup_word(&mem, "look").unwrap()
        );
    }

    #[test]
    fn split_honours_separators() {
        let tokens = split_input("look, go  box", b".,", 1);
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["look", ",", "go", "box"]);
        assert_eq!(tokens[0].position, 1);
        assert_eq!(tokens[1].position, 5);
        assert_eq!(tokens[2].position, 7);
        assert_eq!(tokens[3].position, 11);
    }

    #[test]
    fn tokenise_writes_parse_buffer() {
        let (mut mem, dict) = story_with_dictionary();
        // Text buffer at 0x100 (V3: max byte, then zero-terminated text).
        mem.set_byte(0x100, 20).unwrap();
        for (i, b) in b"go box".iter().enumerate() {
            mem.set_byte(0x101 + i, *b).unwrap();
        }
        mem.set_byte(0x107, 0).unwrap();
        // Parse buffer at 0x140 with room for 4 tokens.
        mem.set_byte(0x140, 4).unwrap();

        tokenise_buffer(&mut mem, &dict, 0x100, 0x140, false).unwrap();

        assert_eq!(mem.get_byte(0x141).unwrap(), 2);
        let go_addr = dict.lookup_word(&mem, "go").unwrap() as u16;
        let box_addr = dict.lookup_word(&mem, "box").unwrap() as u16;
        assert_eq!(mem.get_word(0x142).unwrap(), go_addr);
        assert_eq!(mem.get_byte(0x144).unwrap(), 2); // length
        assert_eq!(mem.get_byte(0x145).unwrap(), 1); // position
        assert_eq!(mem.get_word(0x146).unwrap(), box_addr);
        assert_eq!(mem.get_byte(0x149).unwrap(), 4);
    }

    #[test]
    fn unsorted_dictionary_linear_scan() {
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = 3;
        bytes[header::H_STATIC_BASE] = 0x08;
        bytes[header::H_HIGH_BASE] = 0x08;

        let dict = 0x200;
        bytes[dict] = 0; // no separators
        bytes[dict + 1] = 4;
        // Entry count -2: unsorted.
        bytes[dict + 2..dict + 4].copy_from_slice(&(-2i16 as u16).to_be_bytes());

        let mem_probe = Memory::from_story(bytes.clone()).unwrap();
        // Deliberately out of order.
        let zebra = text::encode_word(&mem_probe, "zebra");
        let apple = text::encode_word(&mem_probe, "apple");
        bytes[dict + 4..dict + 6].copy_from_slice(&zebra[0].to_be_bytes());
        bytes[dict + 6..dict + 8].copy_from_slice(&zebra[1].to_be_bytes());
        bytes[dict + 8..dict + 10].copy_from_slice(&apple[0].to_be_bytes());
        bytes[dict + 10..dict + 12].copy_from_slice(&apple[1].to_be_bytes());

        let mem = Memory::from_story(bytes).unwrap();
        let dictionary = Dictionary::from_memory(&mem, 0x200).unwrap();
        assert!(!dictionary.is_sorted());
        assert_eq!(dictionary.lookup_word(&mem, "apple").unwrap(), dict + 8);
        assert_eq!(dictionary.lookup_word(&mem, "zebra").unwrap(), dict + 4);
        assert_eq!(dictionary.lookup_word(&mem, "mango").unwrap(), 0);
    }
}
