//! Save format providers.
//!
//! A `SaveFormat` turns a snapshot into persistable bytes and back; which
//! storage provider keeps those bytes is orthogonal. Two formats ship:
//! standard Quetzal, and a self-describing JSON container with
//! base64-encoded memory and stack for hosts that want a greppable,
//! versioned artefact.

use crate::error::{Error, Result};
use crate::machine::{CallFrame, MAX_LOCALS};
use crate::memory::Memory;
use crate::quetzal;
use crate::snapshot::Snapshot;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub trait SaveFormat {
    fn to_bytes(&self, snapshot: &Snapshot, memory: &Memory) -> Result<Vec<u8>>;
    fn from_bytes(&self, data: &[u8], memory: &Memory) -> Result<Snapshot>;
}

/// Standard Quetzal (IFF `IFZS`).
#[derive(Default)]
pub struct QuetzalFormat;

impl SaveFormat for QuetzalFormat {
    fn to_bytes(&self, snapshot: &Snapshot, memory: &Memory) -> Result<Vec<u8>> {
        Ok(quetzal::write_quetzal(snapshot, memory))
    }

    fn from_bytes(&self, data: &[u8], memory: &Memory) -> Result<Snapshot> {
        quetzal::read_quetzal(data, memory)
    }
}

const CONTAINER_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ContainerFrame {
    return_pc: usize,
    result_var: Option<u8>,
    arg_count: u8,
    locals: Vec<u16>,
    stack_base: usize,
}

#[derive(Serialize, Deserialize)]
struct Container {
    #[serde(rename = "__version")]
    version: u32,
    release: u16,
    serial: String,
    pc: usize,
    memory: String,
    stack: String,
    frames: Vec<ContainerFrame>,
}

/// The alternate self-describing container.
#[derive(Default)]
pub struct TaggedContainerFormat;

impl SaveFormat for TaggedContainerFormat {
    fn to_bytes(&self, snapshot: &Snapshot, memory: &Memory) -> Result<Vec<u8>> {
        let stack_bytes: Vec<u8> = snapshot
            .stack
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let container = Container {
            version: CONTAINER_VERSION,
            release: memory.header.release,
            serial: memory.header.serial_string(),
            pc: snapshot.pc,
            memory: BASE64.encode(&snapshot.dynamic_memory),
            stack: BASE64.encode(stack_bytes),
            frames: snapshot
                .frames
                .iter()
                .map(|f| ContainerFrame {
                    return_pc: f.return_pc,
                    result_var: f.result_var,
                    arg_count: f.arg_count,
                    locals: f.locals[..f.num_locals as usize].to_vec(),
                    stack_base: f.stack_base,
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&container).map_err(|e| Error::Storage(e.to_string()))
    }

    fn from_bytes(&self, data: &[u8], memory: &Memory) -> Result<Snapshot> {
        let container: Container =
            serde_json::from_slice(data).map_err(|e| Error::Storage(format!("bad container: {e}")))?;
        if container.version != CONTAINER_VERSION {
            return Err(Error::Storage(format!(
                "container version {} is not supported",
                container.version
            )));
        }
        if container.release != memory.header.release
            || container.serial != memory.header.serial_string()
        {
            return Err(Error::Storage(format!(
                "container belongs to release {} serial {}, story is release {} serial {}",
                container.release,
                container.serial,
                memory.header.release,
                memory.header.serial_string()
            )));
        }

        let dynamic_memory = BASE64
            .decode(&container.memory)
            .map_err(|e| Error::Storage(format!("bad memory payload: {e}")))?;
        let stack_bytes = BASE64
            .decode(&container.stack)
            .map_err(|e| Error::Storage(format!("bad stack payload: {e}")))?;
        if stack_bytes.len() % 2 != 0 {
            return Err(Error::Storage("stack payload has odd length".into()));
        }
        let stack: Vec<u16> = stack_bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        let mut frames = Vec::with_capacity(container.frames.len());
        for f in &container.frames {
            if f.locals.len() > 15 {
                return Err(Error::Storage(format!(
                    "frame declares {} locals",
                    f.locals.len()
                )));
            }
            let mut locals = [0u16; MAX_LOCALS];
            locals[..f.locals.len()].copy_from_slice(&f.locals);
            frames.push(CallFrame {
                return_pc: f.return_pc,
                result_var: f.result_var,
                arg_count: f.arg_count,
                num_locals: f.locals.len() as u8,
                locals,
                stack_base: f.stack_base,
                routine_addr: 0,
            });
        }
        if frames.is_empty() {
            return Err(Error::Storage("container holds no call frames".into()));
        }

        Ok(Snapshot {
            pc: container.pc,
            dynamic_memory,
            stack,
            frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;

    fn memory() -> Memory {
        let mut bytes = vec![0u8; 0x1000];
        bytes[header::H_VERSION] = 3;
        bytes[header::H_STATIC_BASE] = 0x04;
        bytes[header::H_HIGH_BASE] = 0x04;
        bytes[header::H_RELEASE + 1] = 12;
        bytes[header::H_SERIAL..header::H_SERIAL + 6].copy_from_slice(b"250731");
        Memory::from_story(bytes).unwrap()
    }

    fn snapshot(memory: &Memory) -> Snapshot {
        let mut dynamic = memory.dynamic_slice().to_vec();
        dynamic[0x100] = 0x5A;
        let mut locals = [0u16; MAX_LOCALS];
        locals[0] = 3;
        Snapshot {
            pc: 0x0777,
            dynamic_memory: dynamic,
            stack: vec![1, 2, 3],
            frames: vec![
                CallFrame {
                    return_pc: 0,
                    result_var: None,
                    arg_count: 0,
                    num_locals: 0,
                    locals: [0; MAX_LOCALS],
                    stack_base: 0,
                    routine_addr: 0,
                },
                CallFrame {
                    return_pc: 0x0510,
                    result_var: Some(0),
                    arg_count: 1,
                    num_locals: 1,
                    locals,
                    stack_base: 2,
                    routine_addr: 0x600,
                },
            ],
        }
    }

    #[test]
    fn quetzal_round_trip() {
        let mem = memory();
        let snap = snapshot(&mem);
        let bytes = QuetzalFormat.to_bytes(&snap, &mem).unwrap();
        let restored = QuetzalFormat.from_bytes(&bytes, &mem).unwrap();
        assert_eq!(restored.pc, snap.pc);
        assert_eq!(restored.dynamic_memory, snap.dynamic_memory);
        assert_eq!(restored.stack, snap.stack);
        assert_eq!(restored.frames.len(), snap.frames.len());
        assert_eq!(restored.frames[1].result_var, Some(0));
        assert_eq!(restored.frames[1].stack_base, 2);
    }

    #[test]
    fn container_round_trip_and_tag() {
        let mem = memory();
        let snap = snapshot(&mem);
        let bytes = TaggedContainerFormat.to_bytes(&snap, &mem).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"__version\": 1"));

        let restored = TaggedContainerFormat.from_bytes(&bytes, &mem).unwrap();
        assert_eq!(restored.pc, snap.pc);
        assert_eq!(restored.dynamic_memory, snap.dynamic_memory);
        assert_eq!(restored.stack, snap.stack);
        assert_eq!(restored.frames[1].locals[0], 3);
    }

    #[test]
    fn wrong_story_is_rejected() {
        let mem = memory();
        let snap = snapshot(&mem);
        let bytes = QuetzalFormat.to_bytes(&snap, &mem).unwrap();

        let mut other_bytes = vec![0u8; 0x1000];
        other_bytes[header::H_VERSION] = 3;
        other_bytes[header::H_STATIC_BASE] = 0x04;
        other_bytes[header::H_HIGH_BASE] = 0x04;
        other_bytes[header::H_RELEASE + 1] = 99;
        let other = Memory::from_story(other_bytes).unwrap();

        assert!(QuetzalFormat.from_bytes(&bytes, &other).is_err());

        let json = TaggedContainerFormat.to_bytes(&snap, &mem).unwrap();
        assert!(TaggedContainerFormat.from_bytes(&json, &other).is_err());
    }
}
