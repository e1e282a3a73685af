//! Interpreter configuration.
//!
//! The knobs here cover the points where real-world story files and the
//! Standards Document disagree, plus resource limits. A config can be
//! loaded from a TOML file next to the story or built in code.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Halt on division or modulo by zero instead of storing 0 with a
    /// warning. Several shipped Infocom games divide by zero and expect
    /// to keep running, so the tolerant behaviour is the default.
    pub strict_arithmetic: bool,

    /// Depth of the in-memory undo ring used by `save_undo`. Zero
    /// disables undo entirely (`save_undo` then stores 0).
    pub undo_slots: usize,

    /// Optional hard ceiling on executed instructions, for harnesses that
    /// drive untrusted story files.
    pub max_instructions: Option<u64>,

    /// Seed the RNG deterministically at start-up. Unset means entropy.
    pub rng_seed: Option<u64>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            strict_arithmetic: false,
            undo_slots: 8,
            max_instructions: None,
            rng_seed: None,
        }
    }
}

impl InterpreterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Load(format!("bad config: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Load(format!("cannot read config {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = InterpreterConfig::default();
        assert!(!c.strict_arithmetic);
        assert_eq!(c.undo_slots, 8);
        assert!(c.max_instructions.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let c = InterpreterConfig::from_toml_str("strict_arithmetic = true\nundo_slots = 2\n")
            .unwrap();
        assert!(c.strict_arithmetic);
        assert_eq!(c.undo_slots, 2);
        assert!(c.rng_seed.is_none());
    }
}
