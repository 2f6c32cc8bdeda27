use crate::storage::DEFAULT_BLOCK_SIZE;
use std::path::PathBuf;

/// File layer configuration.
///
/// `block_size` must stay the same for the lifetime of a database directory;
/// changing it remaps every existing block to a different byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding the database files.
    pub db_dir: PathBuf,
    /// Size of each block in bytes.
    pub block_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            db_dir: PathBuf::from("kuradb"),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}
