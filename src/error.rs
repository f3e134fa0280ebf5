use thiserror::Error;

use crate::ReadFault;

#[derive(Error, Debug)]
pub enum F3dError {
    #[error("cannot handle unterminated display list {list}")]
    Unterminated { list: String },

    #[error("display list call stack depth {depth} in {list}, assuming infinite loop")]
    CallStackOverflow { list: String, depth: usize },

    #[error("{what}: range {start}..{end} out of bounds (length {len})")]
    OutOfRange { what: String, start: usize, end: usize, len: usize },

    #[error("cannot find {kind} named {name}")]
    MissingDeclaration { kind: &'static str, name: String },

    #[error("transform matrix not specified for {name}")]
    MissingTransform { name: String },

    #[error("ROM read fault at ${offset:08X}")]
    RomRead { offset: usize },

    #[error("{command}: {detail}")]
    Malformed { command: String, detail: String },

    #[error("unsupported command {command}")]
    Unsupported { command: String },

    #[error("{command}: expected {expected} arguments, found {found}")]
    BadArgCount { command: String, expected: usize, found: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl F3dError {
    /// Fatal errors abort the traversal; the rest skip a single command.
    pub fn is_fatal(&self) -> bool {
        match self {
            F3dError::Unterminated { .. }
            | F3dError::CallStackOverflow { .. }
            | F3dError::OutOfRange { .. }
            | F3dError::MissingDeclaration { .. }
            | F3dError::MissingTransform { .. }
            | F3dError::RomRead { .. } => true,

            F3dError::Malformed { .. }
            | F3dError::Unsupported { .. }
            | F3dError::BadArgCount { .. }
            | F3dError::Io(_) => false,
        }
    }

    pub fn malformed(command: &str, detail: impl Into<String>) -> Self {
        F3dError::Malformed { command: command.to_string(), detail: detail.into() }
    }
}

impl From<ReadFault> for F3dError {
    fn from(fault: ReadFault) -> Self {
        match fault {
            ReadFault::OutOfBounds(offset) => F3dError::RomRead { offset },
        }
    }
}

pub type Result<T> = std::result::Result<T, F3dError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(F3dError::Unterminated { list: "dl".into() }.is_fatal());
        assert!(F3dError::RomRead { offset: 4 }.is_fatal());
        assert!(!F3dError::malformed("gsDPSetEnvColor", "bad literal").is_fatal());
        assert!(!F3dError::Unsupported { command: "gsFoo".into() }.is_fatal());
    }

    #[test]
    fn read_fault_converts() {
        let e: F3dError = ReadFault::OutOfBounds(0x40).into();
        assert!(matches!(e, F3dError::RomRead { offset: 0x40 }));
        assert_eq!(e.to_string(), "ROM read fault at $00000040");
    }
}
