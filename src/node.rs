//! The inode store: on-disk inode records and the in-memory handle that
//! owns one record's cached state, including the logical-to-physical block
//! walk with allocate-on-write and free-on-shrink.

use std::convert::TryInto;

use log::{debug, warn};
use zerocopy::{AsBytes, FromBytes};

use crate::error::{FsError, Result};
use crate::fs::TFS;
use crate::io::BlockStorage;
use crate::layout::{
    blocks_spanned, BLOCK_SIZE, LINKS_PER_INDIRECT, MAX_FILE_BLOCKS, MAX_FILE_SIZE, NDIRECT,
    NINDIRECT,
};

/// File-type bits for the raw mode field, mirroring `man 2 stat`. The
/// permission bits below the type mask are stored but not interpreted.
pub mod mode {
    pub const S_IFMT: u32 = 0o170_000;
    pub const S_IFREG: u32 = 0o100_000;
    pub const S_IFDIR: u32 = 0o040_000;
    pub const S_IFLNK: u32 = 0o120_000;
}

/// The on-disk inode record. This structure __must be exactly 64 bytes__
/// so that 64 records pack one block.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy, Default)]
pub struct Inode {
    /// File mode: type bits plus raw permission bits.
    pub mode: u32,
    /// Number of directory entries naming this inode.
    pub refcount: u32,
    /// Content length in bytes.
    pub size: u32,
    /// Direct links, each pointing at a data block; 0 = unallocated.
    pub direct: [u32; NDIRECT],
    /// Single-indirect links, each pointing at a block of 128 further
    /// block numbers; 0 = unallocated.
    pub indirect: [u32; NINDIRECT],
}

/// In-memory representative of one inode. Holds the cached record and a
/// dirty flag; data blocks are written through immediately while metadata
/// stays cached until [`persist`](InodeHandle::persist).
///
/// The design assumes at most one live handle per inode number; two
/// handles for the same number will silently diverge and the last one
/// persisted wins.
pub struct InodeHandle {
    ino: u32,
    raw: Inode,
    dirty: bool,
}

impl InodeHandle {
    /// Loads the record for `ino` from the inode table.
    pub fn load<T: BlockStorage>(fs: &mut TFS<T>, ino: u32) -> Result<Self> {
        let raw = fs.read_inode_record(ino)?;
        Ok(Self {
            ino,
            raw,
            dirty: false,
        })
    }

    pub(crate) fn from_parts(ino: u32, raw: Inode) -> Self {
        Self {
            ino,
            raw,
            dirty: false,
        }
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn mode(&self) -> u32 {
        self.raw.mode
    }

    pub fn size(&self) -> usize {
        self.raw.size as usize
    }

    pub fn refcount(&self) -> u32 {
        self.raw.refcount
    }

    pub fn is_dir(&self) -> bool {
        self.raw.mode & mode::S_IFMT == mode::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.raw.mode & mode::S_IFMT == mode::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.raw.mode & mode::S_IFMT == mode::S_IFLNK
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.raw.mode = mode;
        self.dirty = true;
    }

    pub fn add_ref(&mut self) {
        self.raw.refcount += 1;
        self.dirty = true;
    }

    /// Drops one reference. When the count reaches zero the inode is
    /// reclaimed immediately: all content blocks (and indirect blocks) go
    /// back to the allocator, the on-disk record is zeroed, and the inode
    /// number is released. Returns the handle while references remain,
    /// `None` once reclaimed.
    pub fn deref<T: BlockStorage>(mut self, fs: &mut TFS<T>) -> Result<Option<Self>> {
        self.raw.refcount = self.raw.refcount.saturating_sub(1);
        self.dirty = true;
        if self.raw.refcount > 0 {
            return Ok(Some(self));
        }
        self.shrink_to(fs, 0)?;
        self.raw = Inode::default();
        fs.write_inode_record(self.ino, &self.raw)?;
        fs.free_inode_slot(self.ino)?;
        self.dirty = false;
        debug!("reclaimed inode {}", self.ino);
        Ok(None)
    }

    /// Writes the cached record back to the inode table. On failure the
    /// dirty flag stays set so a later flush is still attempted.
    pub fn persist<T: BlockStorage>(&mut self, fs: &mut TFS<T>) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        fs.write_inode_record(self.ino, &self.raw)?;
        self.dirty = false;
        Ok(())
    }

    fn block_count(&self) -> usize {
        blocks_spanned(self.raw.size as usize)
    }

    /// Finds the physical block number backing logical block `n`.
    ///
    /// With `allocate`, missing links (including a missing indirect block)
    /// are materialized: the bitmap is persisted first, then the zeroed
    /// block, then the link is recorded in its container. With `release`,
    /// a present link is returned to the allocator and cleared. `n` past
    /// the current content length or the addressing capacity resolves to
    /// `None` without growing the map.
    fn block_walk<T: BlockStorage>(
        &mut self,
        fs: &mut TFS<T>,
        n: usize,
        allocate: bool,
        release: bool,
    ) -> Result<Option<u32>> {
        if n >= self.block_count() || n >= MAX_FILE_BLOCKS {
            return Ok(None);
        }

        if n < NDIRECT {
            let mut blkno = self.raw.direct[n];
            if blkno == 0 && allocate {
                blkno = fs.alloc_data_block()?;
                self.raw.direct[n] = blkno;
                self.dirty = true;
            }
            if release && blkno != 0 {
                fs.free_data_block(blkno)?;
                self.raw.direct[n] = 0;
                self.dirty = true;
                return Ok(None);
            }
            return Ok(if blkno == 0 { None } else { Some(blkno) });
        }

        let slot = (n - NDIRECT) / LINKS_PER_INDIRECT;
        let link = (n - NDIRECT) % LINKS_PER_INDIRECT;

        let mut ind_blkno = self.raw.indirect[slot];
        if ind_blkno == 0 {
            if !allocate {
                return Ok(None);
            }
            ind_blkno = fs.alloc_data_block()?;
            self.raw.indirect[slot] = ind_blkno;
            self.dirty = true;
        }

        let mut links = [0u8; BLOCK_SIZE];
        fs.read_block(ind_blkno, &mut links)?;
        let off = link * 4;
        let mut blkno = u32::from_ne_bytes(links[off..off + 4].try_into().unwrap());

        if blkno == 0 && allocate {
            blkno = fs.alloc_data_block()?;
            links[off..off + 4].copy_from_slice(&blkno.to_ne_bytes());
            fs.write_block(ind_blkno, &links)?;
        }
        if release && blkno != 0 {
            fs.free_data_block(blkno)?;
            links[off..off + 4].copy_from_slice(&0u32.to_ne_bytes());
            fs.write_block(ind_blkno, &links)?;
            return Ok(None);
        }

        Ok(if blkno == 0 { None } else { Some(blkno) })
    }

    /// Reads content starting at `offset` into `buf`, clamped to the
    /// current content length. Unallocated blocks inside the valid range
    /// are sparse holes and read as zeros. Returns the number of bytes
    /// read.
    pub fn read<T: BlockStorage>(
        &mut self,
        fs: &mut TFS<T>,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        let size = self.size();
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let count = buf.len().min(size - offset);
        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < count {
            let pos = offset + done;
            let inner = pos % BLOCK_SIZE;
            let take = (BLOCK_SIZE - inner).min(count - done);
            match self.block_walk(fs, pos / BLOCK_SIZE, false, false)? {
                Some(blkno) => {
                    fs.read_block(blkno, &mut block)?;
                    buf[done..done + take].copy_from_slice(&block[inner..inner + take]);
                }
                None => {
                    for byte in &mut buf[done..done + take] {
                        *byte = 0;
                    }
                }
            }
            done += take;
        }
        Ok(count)
    }

    /// Writes `data` at `offset`, growing the content length implicitly.
    /// Gaps left behind the write are not materialized; every block the
    /// write touches is allocated on demand and persisted immediately.
    /// Returns the number of bytes written.
    pub fn write<T: BlockStorage>(
        &mut self,
        fs: &mut TFS<T>,
        offset: usize,
        data: &[u8],
    ) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len())
            .ok_or(FsError::TooLarge)?;
        if end > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        if end > self.size() {
            self.raw.size = end as u32;
            self.dirty = true;
        }

        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < data.len() {
            let pos = offset + done;
            let inner = pos % BLOCK_SIZE;
            let take = (BLOCK_SIZE - inner).min(data.len() - done);
            let blkno = self
                .block_walk(fs, pos / BLOCK_SIZE, true, false)?
                .ok_or(FsError::Exhausted)?;
            if take < BLOCK_SIZE {
                fs.read_block(blkno, &mut block)?;
            }
            block[inner..inner + take].copy_from_slice(&data[done..done + take]);
            fs.write_block(blkno, &block)?;
            done += take;
        }
        Ok(data.len())
    }

    /// Grows the content length without materializing any blocks; the new
    /// range reads as zeros until written.
    pub fn extend_to(&mut self, new_size: usize) -> Result<()> {
        if new_size > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        if new_size > self.size() {
            self.raw.size = new_size as u32;
            self.dirty = true;
        }
        Ok(())
    }

    /// Shrinks the content length, returning every block past the new end
    /// to the allocator. Once the content fits the direct links again, the
    /// indirect blocks themselves are freed and the link array cleared.
    pub fn shrink_to<T: BlockStorage>(&mut self, fs: &mut TFS<T>, new_size: usize) -> Result<()> {
        if new_size >= self.size() {
            return Ok(());
        }
        let old_blocks = self.block_count();
        let new_blocks = blocks_spanned(new_size);
        for n in new_blocks..old_blocks {
            self.block_walk(fs, n, false, true)?;
        }
        if new_blocks <= NDIRECT {
            for slot in 0..NINDIRECT {
                let ind = self.raw.indirect[slot];
                if ind != 0 {
                    fs.free_data_block(ind)?;
                    self.raw.indirect[slot] = 0;
                }
            }
        }
        self.raw.size = new_size as u32;
        self.dirty = true;
        Ok(())
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        if self.dirty {
            warn!("inode {} dropped with unpersisted changes", self.ino);
        }
    }
}
