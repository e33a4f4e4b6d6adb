use thiserror::Error;

/// Broken invariants between bytecode, constant pool and cache.
///
/// Verified bytecode never produces these; seeing one means the code or the
/// cache it was paired with is corrupt, so callers must abort rather than retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("bci {bci} is outside code of length {length}")]
    BciOutOfBounds { bci: usize, length: usize },

    #[error("operand of {name} at bci {bci} runs past the end of code (length {length})")]
    TruncatedInstruction {
        name: &'static str,
        bci: usize,
        length: usize,
    },

    #[error("unknown opcode 0x{opcode:02x} at bci {bci}")]
    UnknownOpcode { opcode: u8, bci: usize },

    #[error("{name} at bci {bci} does not reference the constant pool")]
    NotAConstantPoolReference { name: &'static str, bci: usize },

    #[error("{name} at bci {bci} does not go through the constant pool cache")]
    NotCached { name: &'static str, bci: usize },

    #[error("cache index {index} out of bounds (cache length {length})")]
    CacheIndexOutOfBounds { index: u32, length: usize },

    #[error("cache entry {index} is a {actual} entry, expected a {expected} entry")]
    EntryKindMismatch {
        index: u32,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("constant pool index #{index} out of bounds (pool length {length})")]
    CpIndexOutOfBounds { index: u32, length: usize },

    #[error("constant pool entry #{index} is {actual}, expected {expected}")]
    TagMismatch {
        index: u16,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("method {method} has no constant pool cache")]
    Unprepared { method: String },
}
