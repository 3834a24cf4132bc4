//! The directory layer. A directory is an inode whose content is a packed
//! table of fixed-size entries, always a whole number of blocks long.
//! Directories grow by one block at a time and never shrink; removal
//! leaves a reusable tombstone slot.

use log::debug;
use zerocopy::{AsBytes, FromBytes};

use crate::error::{FsError, Result};
use crate::fs::TFS;
use crate::io::BlockStorage;
use crate::layout::{
    blocks_spanned, BLOCK_SIZE, DIRENTRY_SIZE, ENTRIES_PER_BLOCK, MAX_NAME_LEN, NAME_FIELD,
};
use crate::node::InodeHandle;

/// One directory entry: inode number plus a fixed name field. `ino == 0`
/// marks an empty or tombstoned slot.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy)]
pub struct DirEntry {
    pub ino: u32,
    pub name: [u8; NAME_FIELD],
}

impl DirEntry {
    pub fn new(ino: u32, name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut field = [0u8; NAME_FIELD];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { ino, name: field })
    }

    pub fn is_empty(&self) -> bool {
        self.ino == 0
    }

    /// The stored name, up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let field = &self.name[..MAX_NAME_LEN];
        let end = field.iter().position(|&c| c == 0).unwrap_or(MAX_NAME_LEN);
        &field[..end]
    }

    /// Bounded comparison: at most [`MAX_NAME_LEN`] bytes of the query are
    /// significant.
    pub fn name_matches(&self, name: &[u8]) -> bool {
        let query = &name[..name.len().min(MAX_NAME_LEN)];
        self.name_bytes() == query
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("empty name".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::InvalidArgument(format!(
            "name longer than {} bytes: {:?}",
            MAX_NAME_LEN, name
        )));
    }
    Ok(())
}

fn entry_at(block: &[u8], index: usize) -> DirEntry {
    let off = index * DIRENTRY_SIZE;
    unsafe { std::ptr::read_unaligned(block.as_ptr().add(off) as *const DirEntry) }
}

/// Directory operations over an owned inode handle. Composition keeps the
/// inode's byte-level contract uniform for files and directories alike.
pub struct Directory {
    handle: InodeHandle,
}

impl Directory {
    /// Loads the inode for `ino` and interprets it as a directory.
    pub fn load<T: BlockStorage>(fs: &mut TFS<T>, ino: u32) -> Result<Self> {
        Self::from_handle(InodeHandle::load(fs, ino)?)
    }

    pub fn from_handle(handle: InodeHandle) -> Result<Self> {
        if !handle.is_dir() {
            return Err(FsError::NotDirectory);
        }
        Ok(Self { handle })
    }

    pub fn inode(&self) -> &InodeHandle {
        &self.handle
    }

    pub fn into_inner(self) -> InodeHandle {
        self.handle
    }

    pub fn persist<T: BlockStorage>(&mut self, fs: &mut TFS<T>) -> Result<()> {
        self.handle.persist(fs)
    }

    /// Runs `visit` over every entry slot in storage order until it
    /// returns `Some`. The callback receives the entry and its byte
    /// offset within the directory content.
    fn scan<T, R, F>(&mut self, fs: &mut TFS<T>, mut visit: F) -> Result<Option<R>>
    where
        T: BlockStorage,
        F: FnMut(&DirEntry, usize) -> Option<R>,
    {
        let mut block = [0u8; BLOCK_SIZE];
        for bi in 0..blocks_spanned(self.handle.size()) {
            self.handle.read(fs, bi * BLOCK_SIZE, &mut block)?;
            for ei in 0..ENTRIES_PER_BLOCK {
                let entry = entry_at(&block, ei);
                let off = bi * BLOCK_SIZE + ei * DIRENTRY_SIZE;
                if let Some(found) = visit(&entry, off) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Resolves `name` to an inode number; first occurrence in storage
    /// order wins. `None` means the name is absent.
    pub fn lookup<T: BlockStorage>(&mut self, fs: &mut TFS<T>, name: &str) -> Result<Option<u32>> {
        let needle = name.as_bytes();
        self.scan(fs, |entry, _| {
            if !entry.is_empty() && entry.name_matches(needle) {
                Some(entry.ino)
            } else {
                None
            }
        })
    }

    /// Every non-empty entry in storage order.
    pub fn entries<T: BlockStorage>(&mut self, fs: &mut TFS<T>) -> Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        self.scan(fs, |entry, _| -> Option<()> {
            if !entry.is_empty() {
                out.push(*entry);
            }
            None
        })?;
        Ok(out)
    }

    /// Inserts an entry binding `name` to `ino`. Insertion is an upsert:
    /// any existing entry with the same name is removed first. The first
    /// empty slot is reused; when none exists the directory grows by
    /// exactly one block.
    pub fn add<T: BlockStorage>(&mut self, fs: &mut TFS<T>, ino: u32, name: &str) -> Result<()> {
        let entry = DirEntry::new(ino, name)?;
        match self.remove(fs, name) {
            Ok(()) => debug!("dir {}: replacing entry {:?}", self.handle.ino(), name),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let slot = self.scan(fs, |e, off| if e.is_empty() { Some(off) } else { None })?;
        let off = match slot {
            Some(off) => off,
            None => {
                let off = self.handle.size();
                self.handle.extend_to(off + BLOCK_SIZE)?;
                off
            }
        };
        self.handle.write(fs, off, entry.as_bytes())?;
        Ok(())
    }

    /// Tombstones the entry named `name`: its slot is zeroed and becomes
    /// reusable, but the directory's blocks are never reclaimed.
    pub fn remove<T: BlockStorage>(&mut self, fs: &mut TFS<T>, name: &str) -> Result<()> {
        let needle = name.as_bytes();
        let found = self.scan(fs, |entry, off| {
            if !entry.is_empty() && entry.name_matches(needle) {
                Some(off)
            } else {
                None
            }
        })?;
        match found {
            Some(off) => {
                self.handle.write(fs, off, &[0u8; DIRENTRY_SIZE])?;
                Ok(())
            }
            None => Err(FsError::NotFound),
        }
    }

    /// True iff the directory holds any entry besides `.` and `..`.
    pub fn has_nontrivial_child<T: BlockStorage>(&mut self, fs: &mut TFS<T>) -> Result<bool> {
        let found = self.scan(fs, |entry, _| {
            if !entry.is_empty()
                && entry.name_bytes() != b"."
                && entry.name_bytes() != b".."
            {
                Some(())
            } else {
                None
            }
        })?;
        Ok(found.is_some())
    }
}
