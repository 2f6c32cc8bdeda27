//! Storage layer error types.

use crate::storage::block::BlockId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Access out of bounds: {len} bytes at offset {offset} (capacity: {capacity})")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("Invalid length prefix {length} at offset {offset}")]
    InvalidLength { offset: usize, length: i32 },

    #[error("Value too large to length-prefix: {0} bytes")]
    ValueTooLarge(usize),

    #[error("Character {0:?} does not fit in a single UTF-16 code unit")]
    UnencodableChar(char),

    #[error("Invalid UTF-16 string at offset {offset}")]
    InvalidString { offset: usize },

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    #[error("Byte offset of block {0} overflows")]
    OffsetOverflow(BlockId),

    #[error("Cannot {op} block {block}: {source}")]
    BlockIo {
        op: &'static str,
        block: BlockId,
        #[source]
        source: std::io::Error,
    },

    #[error("File not open: {0}")]
    FileNotOpen(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
