use crate::storage::block::BlockId;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::Page;
use crate::storage::{StorageConfig, TEMP_FILE_PREFIX};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Maps blocks onto byte ranges of the files in one database directory.
///
/// Block `k` of a file occupies `[k * block_size, (k + 1) * block_size)`.
/// Handles are opened on first use and kept until [`FileManager::close`] or
/// drop. The handle map is locked for the full seek-and-transfer of each
/// call, so a manager can be shared between threads.
pub struct FileManager {
    db_directory: PathBuf,
    block_size: usize,
    is_new: bool,
    open_files: Mutex<HashMap<String, File>>,
}

impl FileManager {
    pub fn new(db_directory: impl AsRef<Path>, block_size: usize) -> StorageResult<Self> {
        if block_size == 0 {
            return Err(StorageError::InvalidBlockSize(block_size));
        }

        let db_directory = db_directory.as_ref().to_path_buf();
        let is_new = !db_directory.exists();
        fs::create_dir_all(&db_directory)?;

        remove_temp_files(&db_directory)?;

        debug!(
            "File manager ready at {} (block size {}, new: {})",
            db_directory.display(),
            block_size,
            is_new
        );

        Ok(Self {
            db_directory,
            block_size,
            is_new,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_config(config: &StorageConfig) -> StorageResult<Self> {
        Self::new(&config.db_dir, config.block_size)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the database directory was created by this manager.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn db_directory(&self) -> &Path {
        &self.db_directory
    }

    /// Read a block into `page`, overwriting as many bytes as the file holds.
    ///
    /// Reading at or past the end of the file is not an error: bytes the file
    /// cannot supply keep whatever the page held before.
    pub fn read(&self, block: &BlockId, page: &mut Page) -> StorageResult<()> {
        let offset = self.block_offset(block)?;
        let mut files = self.open_files.lock();
        let file = self.open_file(&mut files, block.filename())?;

        let buf = page.contents_mut();
        let filled = read_at(file, offset, buf).map_err(|source| StorageError::BlockIo {
            op: "read",
            block: block.clone(),
            source,
        })?;

        if filled < buf.len() {
            debug!("Short read of block {}: {} of {} bytes", block, filled, buf.len());
        }
        Ok(())
    }

    /// Write the whole page at the block's offset, extending the file if the
    /// block lies past its end.
    pub fn write(&self, block: &BlockId, page: &Page) -> StorageResult<()> {
        let offset = self.block_offset(block)?;
        let mut files = self.open_files.lock();
        let file = self.open_file(&mut files, block.filename())?;

        write_at(file, offset, page.as_bytes()).map_err(|source| StorageError::BlockIo {
            op: "write",
            block: block.clone(),
            source,
        })
    }

    /// Append a zero-filled block to the end of `filename` and return its id.
    pub fn append(&self, filename: &str) -> StorageResult<BlockId> {
        let mut files = self.open_files.lock();
        let file = self.open_file(&mut files, filename)?;

        let block = BlockId::new(filename, file.metadata()?.len() / self.block_size as u64);
        let offset = self.block_offset(&block)?;
        let empty = vec![0u8; self.block_size];
        write_at(file, offset, &empty).map_err(|source| StorageError::BlockIo {
            op: "append",
            block: block.clone(),
            source,
        })?;

        debug!("Appended block {}", block);
        Ok(block)
    }

    /// Number of whole blocks currently in `filename`.
    pub fn length(&self, filename: &str) -> StorageResult<u64> {
        let mut files = self.open_files.lock();
        let file = self.open_file(&mut files, filename)?;
        Ok(file.metadata()?.len() / self.block_size as u64)
    }

    /// Flush an open file's data to the device.
    pub fn sync(&self, filename: &str) -> StorageResult<()> {
        let files = self.open_files.lock();
        let file = files
            .get(filename)
            .ok_or_else(|| StorageError::FileNotOpen(filename.to_string()))?;
        file.sync_data()?;
        Ok(())
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.lock().len()
    }

    /// Release every cached handle. Later calls reopen files on demand.
    pub fn close(&self) {
        let mut files = self.open_files.lock();
        if !files.is_empty() {
            debug!("Closing {} open file(s)", files.len());
        }
        files.clear();
    }

    fn block_offset(&self, block: &BlockId) -> StorageResult<u64> {
        block
            .number()
            .checked_mul(self.block_size as u64)
            .ok_or_else(|| StorageError::OffsetOverflow(block.clone()))
    }

    // All file access goes through here.
    fn open_file<'a>(
        &self,
        files: &'a mut HashMap<String, File>,
        filename: &str,
    ) -> StorageResult<&'a mut File> {
        if !files.contains_key(filename) {
            let path = self.db_directory.join(filename);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            debug!("Opened {}", path.display());
            files.insert(filename.to_string(), file);
        }

        files
            .get_mut(filename)
            .ok_or_else(|| StorageError::FileNotOpen(filename.to_string()))
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn remove_temp_files(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(TEMP_FILE_PREFIX) {
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove leftover temp file {}: {}", path.display(), e);
                return Err(e);
            }
            info!("Removed leftover temp file {}", path.display());
        }
    }
    Ok(())
}

fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;

    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn write_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    const BLOCK_SIZE: usize = 400;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_write_and_read_block() -> Result<()> {
        init_logger();
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;
        let block = BlockId::new("test.db", 0);

        let mut page = Page::new(fm.block_size());
        page.set_int(0, 12345)?;
        fm.write(&block, &page)?;

        let mut read_page = Page::new(fm.block_size());
        fm.read(&block, &mut read_page)?;
        assert_eq!(read_page.get_int(0)?, 12345);
        assert_eq!(read_page, page);

        Ok(())
    }

    #[test]
    fn test_block_offsets() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;

        let page = Page::from_bytes(vec![7u8; BLOCK_SIZE]);
        fm.write(&BlockId::new("test.db", 2), &page)?;

        let raw = fs::read(dir.path().join("test.db"))?;
        assert_eq!(raw.len(), 3 * BLOCK_SIZE);
        // Skipped blocks are zero-filled by the OS.
        assert!(raw[..2 * BLOCK_SIZE].iter().all(|&b| b == 0));
        assert!(raw[2 * BLOCK_SIZE..].iter().all(|&b| b == 7));

        Ok(())
    }

    #[test]
    fn test_block_isolation() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;

        for i in 0..3u8 {
            let page = Page::from_bytes(vec![i + 1; BLOCK_SIZE]);
            fm.write(&BlockId::new("test.db", i as u64), &page)?;
        }

        let page = Page::from_bytes(vec![0xFF; BLOCK_SIZE]);
        fm.write(&BlockId::new("test.db", 1), &page)?;

        let mut read_page = Page::new(BLOCK_SIZE);
        fm.read(&BlockId::new("test.db", 0), &mut read_page)?;
        assert!(read_page.as_bytes().iter().all(|&b| b == 1));
        fm.read(&BlockId::new("test.db", 2), &mut read_page)?;
        assert!(read_page.as_bytes().iter().all(|&b| b == 3));
        fm.read(&BlockId::new("test.db", 1), &mut read_page)?;
        assert!(read_page.as_bytes().iter().all(|&b| b == 0xFF));

        Ok(())
    }

    #[test]
    fn test_short_read_keeps_page_contents() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;
        let block = BlockId::new("test.db", 5);

        let mut page = Page::new(BLOCK_SIZE);
        fm.read(&block, &mut page)?;
        assert!(page.as_bytes().iter().all(|&b| b == 0));

        let mut filled = Page::from_bytes(vec![9u8; BLOCK_SIZE]);
        fm.read(&block, &mut filled)?;
        assert!(filled.as_bytes().iter().all(|&b| b == 9));

        Ok(())
    }

    #[test]
    fn test_partial_block_read() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("test.db"), [1u8, 2, 3])?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;

        let mut page = Page::new(BLOCK_SIZE);
        fm.read(&BlockId::new("test.db", 0), &mut page)?;
        assert_eq!(&page.as_bytes()[..4], &[1, 2, 3, 0]);

        Ok(())
    }

    #[test]
    fn test_handles_are_cached() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;
        let page = Page::new(BLOCK_SIZE);

        fm.write(&BlockId::new("a.db", 0), &page)?;
        fm.write(&BlockId::new("a.db", 1), &page)?;
        assert_eq!(fm.open_file_count(), 1);

        fm.write(&BlockId::new("b.db", 0), &page)?;
        assert_eq!(fm.open_file_count(), 2);

        fm.close();
        assert_eq!(fm.open_file_count(), 0);

        // Reopened on demand after close.
        let mut read_page = Page::new(BLOCK_SIZE);
        fm.read(&BlockId::new("a.db", 1), &mut read_page)?;
        assert_eq!(fm.open_file_count(), 1);

        Ok(())
    }

    #[test]
    fn test_append_and_length() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;

        assert_eq!(fm.length("test.db")?, 0);

        let block0 = fm.append("test.db")?;
        let block1 = fm.append("test.db")?;
        assert_eq!(block0, BlockId::new("test.db", 0));
        assert_eq!(block1, BlockId::new("test.db", 1));
        assert_eq!(fm.length("test.db")?, 2);

        fm.write(&BlockId::new("test.db", 4), &Page::new(BLOCK_SIZE))?;
        assert_eq!(fm.length("test.db")?, 5);
        assert_eq!(fm.append("test.db")?.number(), 5);

        Ok(())
    }

    #[test]
    fn test_is_new() -> Result<()> {
        let dir = tempdir()?;
        let db_dir = dir.path().join("nested").join("db");

        let fm = FileManager::new(&db_dir, BLOCK_SIZE)?;
        assert!(fm.is_new());
        assert!(db_dir.is_dir());
        drop(fm);

        let fm = FileManager::new(&db_dir, BLOCK_SIZE)?;
        assert!(!fm.is_new());

        Ok(())
    }

    #[test]
    fn test_temp_files_removed_on_startup() -> Result<()> {
        init_logger();
        let dir = tempdir()?;
        fs::write(dir.path().join("temp_foo"), b"scratch")?;
        fs::write(dir.path().join("temp1"), b"scratch")?;
        fs::write(dir.path().join("keep.db"), b"data")?;
        fs::create_dir(dir.path().join("tempdir"))?;

        let _fm = FileManager::new(dir.path(), BLOCK_SIZE)?;

        assert!(!dir.path().join("temp_foo").exists());
        assert!(!dir.path().join("temp1").exists());
        assert_eq!(fs::read(dir.path().join("keep.db"))?, b"data");
        // Only regular files are purged.
        assert!(dir.path().join("tempdir").is_dir());

        Ok(())
    }

    #[test]
    fn test_sync() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;

        assert!(matches!(
            fm.sync("test.db"),
            Err(StorageError::FileNotOpen(_))
        ));

        fm.write(&BlockId::new("test.db", 0), &Page::new(BLOCK_SIZE))?;
        fm.sync("test.db")?;

        Ok(())
    }

    #[test]
    fn test_invalid_block_size() -> Result<()> {
        let dir = tempdir()?;
        let result = FileManager::new(dir.path(), 0);
        assert!(matches!(result, Err(StorageError::InvalidBlockSize(0))));
        Ok(())
    }

    #[test]
    fn test_offset_overflow() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;
        let block = BlockId::new("test.db", u64::MAX);

        let result = fm.write(&block, &Page::new(BLOCK_SIZE));
        assert!(matches!(result, Err(StorageError::OffsetOverflow(_))));
        // The offset is checked before any file is opened.
        assert_eq!(fm.open_file_count(), 0);

        Ok(())
    }

    #[test]
    fn test_directory_creation_failure() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"")?;

        let result = FileManager::new(blocker.join("db"), BLOCK_SIZE);
        assert!(matches!(result, Err(StorageError::Io(_))));

        Ok(())
    }

    #[test]
    fn test_open_failure_surfaces() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path(), BLOCK_SIZE)?;
        fs::create_dir(dir.path().join("subdir"))?;

        // A directory cannot be opened for writing.
        let mut page = Page::new(BLOCK_SIZE);
        assert!(fm.read(&BlockId::new("subdir", 0), &mut page).is_err());
        assert_eq!(fm.open_file_count(), 0);

        Ok(())
    }

    #[test]
    fn test_with_config() -> Result<()> {
        let dir = tempdir()?;
        let config = StorageConfig {
            db_dir: dir.path().join("kuradb"),
            ..StorageConfig::default()
        };

        let fm = FileManager::with_config(&config)?;
        assert_eq!(fm.block_size(), crate::storage::DEFAULT_BLOCK_SIZE);
        assert_eq!(fm.db_directory(), config.db_dir.as_path());

        Ok(())
    }
}
