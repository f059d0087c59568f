use thiserror::Error;

/// Error kinds surfaced by the block cache's public API.
///
/// Allocation and argument errors are returned immediately and leave no
/// state behind. Transport errors mean the affected block has `ERROR` set
/// and has already been dropped from further circulation by the caller
/// that observed it; a later `get` for the same bnr starts a fresh read.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BlockCacheError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("out of memory")]
    OutOfMemory,

    #[error("I/O failure (transport error {0})")]
    Io(i32),

    #[error("block cache is shutting down")]
    ShuttingDown,
}

impl BlockCacheError {
    /// The original source threads a plain negative errno through block
    /// state (`bl->error`); this maps each variant onto one so completion
    /// handling has a single integer to latch regardless of error kind.
    pub fn io_code(&self) -> i32 {
        match self {
            BlockCacheError::InvalidArgument(_) => -22, // EINVAL
            BlockCacheError::OutOfMemory => -12,        // ENOMEM
            BlockCacheError::Io(code) => *code,
            BlockCacheError::ShuttingDown => -125, // ECANCELED
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockCacheError>;
