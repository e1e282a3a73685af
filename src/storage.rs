//! The storage collaborator: where serialised save states go.
//!
//! The core hands a provider opaque bytes (already framed by a
//! `SaveFormat`) and asks for them back; how they persist is the host's
//! concern. The bundled providers cover the two cases the runtime itself
//! needs: real files for the CLI driver and an ordered in-memory registry
//! for hosts and tests that manage persistence themselves.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveInfo {
    pub name: String,
    pub description: String,
    pub length: usize,
}

pub trait Storage {
    /// Persist a serialised snapshot. Completes synchronously; the VM
    /// blocks on the call.
    fn save_snapshot(&mut self, data: &[u8], description: &str) -> Result<()>;

    /// Fetch the most recent snapshot back.
    fn load_snapshot(&mut self) -> Result<Vec<u8>>;

    fn list_saves(&self) -> Result<Vec<SaveInfo>>;

    /// Info for the snapshot `load_snapshot` would return.
    fn get_save_info(&self) -> Result<Option<SaveInfo>>;
}

/// Keeps saves in memory, newest last. Insertion order is what
/// `list_saves` reports, which keeps test assertions stable.
#[derive(Default)]
pub struct InMemoryStorage {
    saves: IndexMap<String, (String, Vec<u8>)>,
    counter: usize,
}

impl InMemoryStorage {
    pub fn new() -> InMemoryStorage {
        InMemoryStorage::default()
    }
}

impl Storage for InMemoryStorage {
    fn save_snapshot(&mut self, data: &[u8], description: &str) -> Result<()> {
        self.counter += 1;
        let name = format!("save-{}", self.counter);
        self.saves
            .insert(name, (description.to_string(), data.to_vec()));
        Ok(())
    }

    fn load_snapshot(&mut self) -> Result<Vec<u8>> {
        self.saves
            .last()
            .map(|(_, (_, data))| data.clone())
            .ok_or_else(|| Error::Storage("no saved game".into()))
    }

    fn list_saves(&self) -> Result<Vec<SaveInfo>> {
        Ok(self
            .saves
            .iter()
            .map(|(name, (description, data))| SaveInfo {
                name: name.clone(),
                description: description.clone(),
                length: data.len(),
            })
            .collect())
    }

    fn get_save_info(&self) -> Result<Option<SaveInfo>> {
        Ok(self.saves.last().map(|(name, (description, data))| SaveInfo {
            name: name.clone(),
            description: description.clone(),
            length: data.len(),
        }))
    }
}

/// One save file on disk, conventionally `<story>.qzl` beside the story.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> FileStorage {
        FileStorage { path: path.into() }
    }

    /// The conventional save path for a story file.
    pub fn for_story(story: &Path) -> FileStorage {
        FileStorage {
            path: story.with_extension("qzl"),
        }
    }
}

impl Storage for FileStorage {
    fn save_snapshot(&mut self, data: &[u8], description: &str) -> Result<()> {
        fs::write(&self.path, data)
            .map_err(|e| Error::Storage(format!("cannot write {}: {e}", self.path.display())))?;
        info!("saved {} bytes ({description}) to {}", data.len(), self.path.display());
        Ok(())
    }

    fn load_snapshot(&mut self) -> Result<Vec<u8>> {
        fs::read(&self.path)
            .map_err(|e| Error::Storage(format!("cannot read {}: {e}", self.path.display())))
    }

    fn list_saves(&self) -> Result<Vec<SaveInfo>> {
        Ok(self.get_save_info()?.into_iter().collect())
    }

    fn get_save_info(&self) -> Result<Option<SaveInfo>> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(SaveInfo {
                name: self.path.display().to_string(),
                description: String::new(),
                length: meta.len() as usize,
            })),
            Err(_) => Ok(None),
        }
    }
}
