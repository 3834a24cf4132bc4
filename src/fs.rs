//! The runtime context: one mounted filesystem instance composing the
//! block store, the superblock, and the allocator. Constructed by
//! [`TFS::format`] or [`TFS::mount`] and passed by reference into every
//! inode and directory operation, so independent instances can coexist in
//! one process.

use std::ptr;

use log::{debug, info, warn};
use zerocopy::AsBytes;

use crate::alloc::{Allocator, Space};
use crate::dir::Directory;
use crate::error::{FsError, Result};
use crate::io::BlockStorage;
use crate::layout::{
    Geometry, BITMAP_BLK, BLOCK_SIZE, INODES_PER_BLOCK, INODE_SIZE, INODE_TABLE_START, ROOT_INO,
    SUPER_BLK,
};
use crate::node::{mode, Inode, InodeHandle};
use crate::sb::SuperBlock;

pub struct TFS<T: BlockStorage> {
    dev: T,
    sb: SuperBlock,
    alloc: Allocator,
    geo: Geometry,
}

impl<T: BlockStorage> TFS<T> {
    /// Initializes the filesystem onto owned block storage and mounts it:
    /// superblock, bitmap with the metadata region reserved, a zeroed
    /// inode table, and the root directory holding `.` and `..`.
    pub fn format(mut dev: T, geo: Geometry) -> Result<Self> {
        info!(
            "formatting: {} blocks total, {} inodes in blocks {}..{}, data in blocks {}..{}",
            geo.total_blocks(),
            geo.n_inodes(),
            INODE_TABLE_START,
            geo.data_start(),
            geo.data_start(),
            geo.total_blocks(),
        );

        let sb = SuperBlock::new();
        dev.write_block(SUPER_BLK as usize, &sb.serialize())?;

        let mut alloc = Allocator::new(&geo);
        for blkno in 0..geo.data_start() {
            alloc.reserve(Space::Data, blkno);
        }
        dev.write_block(BITMAP_BLK as usize, &alloc.serialize())?;

        let zeroes = [0u8; BLOCK_SIZE];
        for blkno in INODE_TABLE_START..geo.data_start() {
            dev.write_block(blkno as usize, &zeroes)?;
        }
        dev.sync_disk()?;

        let mut fs = Self {
            dev,
            sb,
            alloc,
            geo,
        };
        fs.sb.clean = 0;
        fs.persist_superblock()?;

        let root = fs.create_inode(mode::S_IFDIR | 0o755)?;
        let root_ino = root.ino();
        let mut rootdir = Directory::from_handle(root)?;
        rootdir.add(&mut fs, root_ino, ".")?;
        rootdir.add(&mut fs, root_ino, "..")?;
        let mut root = rootdir.into_inner();
        root.add_ref();
        root.add_ref();
        root.persist(&mut fs)?;

        Ok(fs)
    }

    /// Opens an already-formatted store: validates the format marker,
    /// loads the bitmap, and marks the superblock dirty until
    /// [`unmount`](TFS::unmount).
    pub fn mount(mut dev: T, geo: Geometry) -> Result<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(SUPER_BLK as usize, &mut buf)?;
        let sb = SuperBlock::parse(&buf)?;
        if sb.clean == 0 {
            warn!("store was not cleanly unmounted; metadata may be inconsistent");
        }

        dev.read_block(BITMAP_BLK as usize, &mut buf)?;
        let alloc = Allocator::parse(&geo, &buf);

        let mut fs = Self {
            dev,
            sb,
            alloc,
            geo,
        };
        fs.sb.clean = 0;
        fs.persist_superblock()?;
        info!("mounted: {} blocks, root inode {}", fs.geo.total_blocks(), ROOT_INO);
        Ok(fs)
    }

    /// Persists the allocator and marks the superblock clean, returning
    /// the underlying device.
    pub fn unmount(mut self) -> Result<T> {
        self.persist_allocator()?;
        self.sb.clean = 1;
        self.persist_superblock()?;
        self.dev.sync_disk()?;
        info!("unmounted cleanly");
        Ok(self.dev)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn free_inodes(&self) -> u32 {
        self.alloc.count_free(Space::Inode)
    }

    pub fn free_data_blocks(&self) -> u32 {
        self.alloc.count_free(Space::Data)
    }

    /// Allocates an inode number and writes a fresh record with the given
    /// mode and no references. The caller links it into a directory and
    /// bumps the refcount.
    pub fn create_inode(&mut self, mode_bits: u32) -> Result<InodeHandle> {
        let ino = self.alloc.allocate(Space::Inode)?;
        self.persist_allocator()?;
        let raw = Inode {
            mode: mode_bits,
            ..Inode::default()
        };
        self.write_inode_record(ino, &raw)?;
        debug!("created inode {} mode {:o}", ino, mode_bits);
        Ok(InodeHandle::from_parts(ino, raw))
    }

    pub(crate) fn read_block(&mut self, blkno: u32, buf: &mut [u8]) -> Result<()> {
        self.dev.read_block(blkno as usize, buf)?;
        Ok(())
    }

    pub(crate) fn write_block(&mut self, blkno: u32, buf: &[u8]) -> Result<()> {
        self.dev.write_block(blkno as usize, buf)?;
        Ok(())
    }

    /// Acquires a data block: the bitmap is persisted before the block is
    /// handed out, then the block is zero-initialized on disk. A failure
    /// in between leaks the block rather than ever double-allocating it.
    pub(crate) fn alloc_data_block(&mut self) -> Result<u32> {
        let blkno = self.alloc.allocate(Space::Data)?;
        self.persist_allocator()?;
        let zeroes = [0u8; BLOCK_SIZE];
        self.write_block(blkno, &zeroes)?;
        Ok(blkno)
    }

    pub(crate) fn free_data_block(&mut self, blkno: u32) -> Result<()> {
        if blkno < self.geo.data_start() || blkno >= self.geo.total_blocks() {
            return Err(FsError::InvalidArgument(format!(
                "block {} is outside the data region",
                blkno
            )));
        }
        self.alloc.free(Space::Data, blkno);
        self.persist_allocator()
    }

    pub(crate) fn free_inode_slot(&mut self, ino: u32) -> Result<()> {
        self.alloc.free(Space::Inode, ino);
        self.persist_allocator()
    }

    pub(crate) fn persist_allocator(&mut self) -> Result<()> {
        let block = self.alloc.serialize();
        self.write_block(BITMAP_BLK, &block)
    }

    fn persist_superblock(&mut self) -> Result<()> {
        let block = self.sb.serialize();
        self.write_block(SUPER_BLK, &block)
    }

    fn check_ino(&self, ino: u32) -> Result<()> {
        if ino == 0 || ino >= self.geo.n_inodes() {
            return Err(FsError::InvalidArgument(format!(
                "inode number {} out of range",
                ino
            )));
        }
        Ok(())
    }

    fn inode_location(&self, ino: u32) -> (u32, usize) {
        let blkno = INODE_TABLE_START + ino / INODES_PER_BLOCK as u32;
        let offset = (ino as usize % INODES_PER_BLOCK) * INODE_SIZE;
        (blkno, offset)
    }

    pub(crate) fn read_inode_record(&mut self, ino: u32) -> Result<Inode> {
        self.check_ino(ino)?;
        let (blkno, offset) = self.inode_location(ino);
        let mut buf = [0u8; BLOCK_SIZE];
        self.read_block(blkno, &mut buf)?;
        let raw = unsafe { ptr::read_unaligned(buf.as_ptr().add(offset) as *const Inode) };
        Ok(raw)
    }

    pub(crate) fn write_inode_record(&mut self, ino: u32, inode: &Inode) -> Result<()> {
        self.check_ino(ino)?;
        let (blkno, offset) = self.inode_location(ino);
        let mut buf = [0u8; BLOCK_SIZE];
        self.read_block(blkno, &mut buf)?;
        buf[offset..offset + INODE_SIZE].copy_from_slice(inode.as_bytes());
        self.write_block(blkno, &buf)
    }
}
