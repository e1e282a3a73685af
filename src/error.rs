use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside the core runtime.
///
/// Load and decode failures are always fatal; bounds, protection, alignment
/// and stack failures raised while executing indicate a corrupt story and
/// are fatal too. Property failures are fatal on writes only; storage
/// failures surface through the opcode's zero result.
#[derive(Debug, Error)]
pub enum Error {
    #[error("story load error: {0}")]
    Load(String),

    #[error("memory access out of bounds at {0:#07x}")]
    Bounds(usize),

    #[error("write to protected memory at {0:#07x}")]
    Protection(usize),

    #[error("misaligned packed address or routine header at {0:#07x}")]
    Alignment(usize),

    #[error("stack error: {0}")]
    Stack(String),

    #[error("cannot decode instruction at {addr:#07x}: {reason}")]
    Decode { addr: usize, reason: String },

    #[error("property error: {0}")]
    Property(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("input error: {0}")]
    Input(String),
}

impl Error {
    pub fn decode(addr: usize, reason: impl Into<String>) -> Self {
        Error::Decode {
            addr,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
