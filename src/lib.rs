pub mod storage;

pub use storage::{BlockId, FileManager, Page, StorageConfig, StorageError, StorageResult};
