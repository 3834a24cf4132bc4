use std::convert::TryInto;

use crate::error::{FsError, Result};
use crate::layout::{BLOCK_SIZE, FS_MAGIC};

/// The second block of the store, identifying the format and carrying the
/// clean/dirty mount flag. Everything past the two fields is zero padding.
///
/// The clean flag is the only crash-consistency signal the filesystem has:
/// it is cleared when the store is mounted and set again on a clean
/// unmount, so a mount that observes `clean == 0` knows the previous
/// session did not tear down properly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuperBlock {
    /// Format marker, always [`FS_MAGIC`].
    pub magic: u32,
    /// 1 after a clean unmount, 0 while mounted.
    pub clean: u32,
}

impl SuperBlock {
    pub fn new() -> Self {
        Self {
            magic: FS_MAGIC,
            clean: 1,
        }
    }

    /// Reads the superblock record from the front of a block buffer.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(FsError::InvalidArgument(
                "superblock buffer too short".to_string(),
            ));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != FS_MAGIC {
            return Err(FsError::InvalidMagic);
        }
        let clean = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        Ok(Self { magic, clean })
    }

    /// Serializes the record into a whole zero-padded block. The encoding
    /// is a series of struct fields with big endian alignment.
    pub fn serialize(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..8].copy_from_slice(&self.clean.to_be_bytes());
        buf
    }
}

impl Default for SuperBlock {
    fn default() -> Self {
        Self::new()
    }
}
