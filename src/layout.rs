//! On-disk layout: fixed block assignments and the geometry calculator.
//!
//! Block numbers are absolute. The metadata region always occupies the
//! front of the store:
//!
//! ```text
//! =========================================================================
//! | Boot | SuperBlock | Bitmap (imap ++ dmap) | Inode table | Data region |
//! =========================================================================
//!    0         1                 2               3..data_start
//! ```

use crate::error::{FsError, Result};

/// 4k is a common block size for file systems. Disks commonly are composed
/// of 512 byte sectors mapping each file system block to 8 hardware sectors.
pub const BLOCK_SIZE: usize = 4096;

/// A 32-bit identifying string, in this case TFSB.
pub const FS_MAGIC: u32 = 0x5446_5342;

/// Known locations.
pub const BOOT_BLK: u32 = 0;
pub const SUPER_BLK: u32 = 1;
pub const BITMAP_BLK: u32 = 2;
pub const INODE_TABLE_START: u32 = 3;

/// On-disk inode record size; 64 records fit one block.
pub const INODE_SIZE: usize = 64;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Per-inode addressing: 5 direct links plus 8 single-indirect blocks of
/// 128 links each.
pub const NDIRECT: usize = 5;
pub const NINDIRECT: usize = 8;
pub const LINKS_PER_INDIRECT: usize = 128;
pub const MAX_FILE_BLOCKS: usize = NDIRECT + NINDIRECT * LINKS_PER_INDIRECT;
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// Directory entries are 32 bytes: a 4-byte inode number and a 28-byte
/// name field of which 27 bytes are significant.
pub const DIRENTRY_SIZE: usize = 32;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRENTRY_SIZE;
pub const NAME_FIELD: usize = 28;
pub const MAX_NAME_LEN: usize = NAME_FIELD - 1;

/// The root directory's inode number, designated at format time.
pub const ROOT_INO: u32 = 1;

const DEFAULT_INODES: u32 = 3904;
const DEFAULT_DATA_BLOCKS: u32 = 960;

/// Number of whole blocks spanned by `bytes` of content.
pub(crate) fn blocks_spanned(bytes: usize) -> usize {
    (bytes + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// Computes the block layout for a store holding `n_inodes` inodes and
/// `n_data_blocks` allocatable data blocks.
///
/// Geometry is not persisted: the superblock carries only a format marker
/// and the clean flag, so formatter and mounter agree on geometry out of
/// band, the way a compiled-in parameter set would. `Geometry::default()`
/// is the standard layout: 3904 inodes in blocks 3..64, data in blocks
/// 64..1024.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    n_inodes: u32,
    n_data_blocks: u32,
}

impl Geometry {
    pub fn new(n_inodes: u32, n_data_blocks: u32) -> Result<Self> {
        if n_inodes < 2 {
            return Err(FsError::InvalidArgument(
                "geometry needs at least the null and root inodes".to_string(),
            ));
        }
        if n_data_blocks == 0 {
            return Err(FsError::InvalidArgument(
                "geometry needs at least one data block".to_string(),
            ));
        }
        let geo = Self {
            n_inodes,
            n_data_blocks,
        };
        if geo.imap_bytes() + geo.dmap_bytes() > BLOCK_SIZE {
            return Err(FsError::InvalidArgument(
                "bitmaps do not fit the bitmap block".to_string(),
            ));
        }
        Ok(geo)
    }

    pub fn n_inodes(&self) -> u32 {
        self.n_inodes
    }

    pub fn n_data_blocks(&self) -> u32 {
        self.n_data_blocks
    }

    pub fn inode_table_blocks(&self) -> u32 {
        (self.n_inodes + INODES_PER_BLOCK as u32 - 1) / INODES_PER_BLOCK as u32
    }

    /// First data block; everything below it is metadata.
    pub fn data_start(&self) -> u32 {
        INODE_TABLE_START + self.inode_table_blocks()
    }

    pub fn total_blocks(&self) -> u32 {
        self.data_start() + self.n_data_blocks
    }

    /// The data bitmap covers every physical block through the end of the
    /// data region, with the metadata prefix permanently reserved, so an
    /// allocated dmap index is directly usable as a block number.
    pub(crate) fn dmap_bits(&self) -> u32 {
        self.total_blocks()
    }

    pub(crate) fn imap_bytes(&self) -> usize {
        (self.n_inodes as usize + 7) / 8
    }

    pub(crate) fn dmap_bytes(&self) -> usize {
        (self.dmap_bits() as usize + 7) / 8
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            n_inodes: DEFAULT_INODES,
            n_data_blocks: DEFAULT_DATA_BLOCKS,
        }
    }
}
