//! In-memory page buffer with typed accessors.
//!
//! A page is a flat byte space; callers pick the offsets. All multi-byte
//! values are little-endian, and variable-length values carry a 4-byte
//! length prefix so a reader only needs the starting offset.

use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};
use std::ops::Range;

const INT_SIZE: usize = 4;
const UINT16_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    buffer: Vec<u8>,
}

impl Page {
    /// Create a zero-filled page of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            buffer: vec![0; block_size],
        }
    }

    /// Wrap caller-owned bytes. The length need not match any block size.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { buffer: bytes }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn get_int(&self, offset: usize) -> StorageResult<i32> {
        let range = self.checked_range(offset, INT_SIZE)?;
        Ok(LittleEndian::read_i32(&self.buffer[range]))
    }

    pub fn set_int(&mut self, offset: usize, value: i32) -> StorageResult<()> {
        let range = self.checked_range(offset, INT_SIZE)?;
        LittleEndian::write_i32(&mut self.buffer[range], value);
        Ok(())
    }

    pub fn get_uint16(&self, offset: usize) -> StorageResult<u16> {
        let range = self.checked_range(offset, UINT16_SIZE)?;
        Ok(LittleEndian::read_u16(&self.buffer[range]))
    }

    pub fn set_uint16(&mut self, offset: usize, value: u16) -> StorageResult<()> {
        let range = self.checked_range(offset, UINT16_SIZE)?;
        LittleEndian::write_u16(&mut self.buffer[range], value);
        Ok(())
    }

    pub fn get_bytes(&self, offset: usize) -> StorageResult<Vec<u8>> {
        let range = self.payload_range(offset)?;
        Ok(self.buffer[range].to_vec())
    }

    pub fn set_bytes(&mut self, offset: usize, value: &[u8]) -> StorageResult<()> {
        let payload = self.reserve_prefixed(offset, value.len())?;
        self.buffer[payload].copy_from_slice(value);
        Ok(())
    }

    /// Read text stored as a byte-count prefix followed by one UTF-16 code
    /// unit per character.
    pub fn get_string(&self, offset: usize) -> StorageResult<String> {
        let range = self.payload_range(offset)?;
        if range.len() % UINT16_SIZE != 0 {
            return Err(StorageError::InvalidString { offset });
        }

        let mut units = vec![0u16; range.len() / UINT16_SIZE];
        LittleEndian::read_u16_into(&self.buffer[range], &mut units);
        char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map_err(|_| StorageError::InvalidString { offset })
    }

    /// Store text as one 2-byte code unit per character. Characters outside
    /// the basic multilingual plane are rejected so that the stored span is
    /// always `max_length(chars)`.
    pub fn set_string(&mut self, offset: usize, value: &str) -> StorageResult<()> {
        let units = value
            .chars()
            .map(|c| {
                let mut buf = [0u16; 2];
                match c.encode_utf16(&mut buf) {
                    [unit] => Ok(*unit),
                    _ => Err(StorageError::UnencodableChar(c)),
                }
            })
            .collect::<StorageResult<Vec<u16>>>()?;

        let payload = self.reserve_prefixed(offset, units.len() * UINT16_SIZE)?;
        LittleEndian::write_u16_into(&units, &mut self.buffer[payload]);
        Ok(())
    }

    /// Bytes needed to store a string of `char_count` characters.
    pub fn max_length(char_count: usize) -> usize {
        INT_SIZE + char_count * UINT16_SIZE
    }

    fn checked_range(&self, offset: usize, len: usize) -> StorageResult<Range<usize>> {
        let capacity = self.buffer.len();
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(offset..end),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len,
                capacity,
            }),
        }
    }

    fn payload_range(&self, offset: usize) -> StorageResult<Range<usize>> {
        let length = self.get_int(offset)?;
        let len =
            usize::try_from(length).map_err(|_| StorageError::InvalidLength { offset, length })?;
        self.checked_range(offset + INT_SIZE, len)
    }

    // Validates the whole prefixed span before writing the prefix, so a
    // rejected call leaves the buffer untouched.
    fn reserve_prefixed(&mut self, offset: usize, len: usize) -> StorageResult<Range<usize>> {
        let length = i32::try_from(len).map_err(|_| StorageError::ValueTooLarge(len))?;
        let range = self.checked_range(offset, INT_SIZE + len)?;
        LittleEndian::write_i32(&mut self.buffer[offset..offset + INT_SIZE], length);
        Ok(offset + INT_SIZE..range.end)
    }
}
