//! Storage layer implementation for kura.
//!
//! This is the lowest layer of the engine. Key components:
//!
//! - **BlockId**: names one fixed-size block within a file
//! - **Page**: an in-memory byte buffer with typed little-endian accessors
//! - **FileManager**: reads and writes pages at block offsets in the database directory
//!
//! Pages and block ids perform no I/O; the file manager owns every open file.

pub mod block;
pub mod config;
pub mod disk;
pub mod error;
pub mod page;

pub use block::BlockId;
pub use config::StorageConfig;
pub use disk::FileManager;
pub use error::{StorageError, StorageResult};
pub use page::Page;

/// Block size used when none is configured.
pub const DEFAULT_BLOCK_SIZE: usize = 400;

/// Files whose names start with this prefix are scratch files and are removed
/// when a file manager starts.
pub const TEMP_FILE_PREFIX: &str = "temp";
