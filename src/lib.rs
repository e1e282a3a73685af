//! Core runtime of a Z-machine interpreter: story loading, instruction
//! decoding and execution, the object and dictionary databases, and
//! Quetzal serialisation, for story files of versions 1 through 8.
//!
//! Rendering, keyboard capture and persistence are collaborators behind
//! the [`screen::Screen`] and [`storage::Storage`] traits; the execution
//! loop suspends on the input opcodes and the host resumes it with the
//! collected input.

pub mod alphabet;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod header;
pub mod input;
pub mod instruction;
pub mod interpreter;
pub mod machine;
pub mod memory;
pub mod objects;
pub mod opcode_tables;
pub mod quetzal;
pub mod saveformat;
pub mod screen;
pub mod snapshot;
pub mod storage;
pub mod text;
pub mod undo;
pub mod util;
pub mod zrand;

pub use error::{Error, Result};
pub use interpreter::{ExecutionResult, Interpreter, MachineState};
pub use machine::Machine;
pub use memory::Memory;
