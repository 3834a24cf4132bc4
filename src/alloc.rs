//! Bitmap allocation for the two index spaces: inode numbers and data
//! blocks. The allocator itself never touches the block store; the runtime
//! context persists the bitmap block after every mutation it drives.

use log::trace;

use crate::error::{FsError, Result};
use crate::layout::{Geometry, BLOCK_SIZE};

/// Which index space an allocation request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Inode,
    Data,
}

/// A byte-backed bit vector. Bit `i` lives at byte `i / 8`, position
/// `i % 8`. Index 0 is the permanent "no allocation" sentinel and is set
/// at construction, so it can never be handed out.
struct Bitmap {
    bits: Vec<u8>,
    nbits: u32,
}

impl Bitmap {
    fn new(nbits: u32) -> Self {
        let mut map = Self {
            bits: vec![0u8; (nbits as usize + 7) / 8],
            nbits,
        };
        map.set(0);
        map
    }

    fn parse(nbits: u32, buf: &[u8]) -> Self {
        let mut map = Self {
            bits: buf[..(nbits as usize + 7) / 8].to_vec(),
            nbits,
        };
        map.set(0);
        map
    }

    fn serialize(&self) -> &[u8] {
        &self.bits
    }

    fn test(&self, index: u32) -> bool {
        if index >= self.nbits {
            return false;
        }
        self.bits[index as usize / 8] & (1 << (index % 8)) != 0
    }

    fn set(&mut self, index: u32) {
        if index < self.nbits {
            self.bits[index as usize / 8] |= 1 << (index % 8);
        }
    }

    fn clear(&mut self, index: u32) {
        if index < self.nbits {
            self.bits[index as usize / 8] &= !(1 << (index % 8));
        }
    }

    /// Lowest clear bit at index 1 or above, or `None` when the space is
    /// exhausted. Never wraps, never considers index 0.
    fn find_empty(&self) -> Option<u32> {
        (1..self.nbits).find(|&i| !self.test(i))
    }

    fn count_free(&self) -> u32 {
        (1..self.nbits).filter(|&i| !self.test(i)).count() as u32
    }
}

/// The in-memory bitmap pair, loaded once at mount and written back on
/// every allocate/free (by the runtime context) and at unmount.
pub struct Allocator {
    imap: Bitmap,
    dmap: Bitmap,
}

impl Allocator {
    /// Fresh maps with only the index-0 sentinels set. Format-time
    /// reservations (metadata blocks, the root inode) are the caller's.
    pub fn new(geo: &Geometry) -> Self {
        Self {
            imap: Bitmap::new(geo.n_inodes()),
            dmap: Bitmap::new(geo.dmap_bits()),
        }
    }

    /// Rebuilds the pair from the on-disk bitmap block: imap bytes first,
    /// dmap bytes immediately after, remainder ignored.
    pub fn parse(geo: &Geometry, buf: &[u8]) -> Self {
        let split = geo.imap_bytes();
        Self {
            imap: Bitmap::parse(geo.n_inodes(), &buf[..split]),
            dmap: Bitmap::parse(geo.dmap_bits(), &buf[split..split + geo.dmap_bytes()]),
        }
    }

    /// Serializes both maps into one zero-padded block image.
    pub fn serialize(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        let imap = self.imap.serialize();
        let dmap = self.dmap.serialize();
        buf[..imap.len()].copy_from_slice(imap);
        buf[imap.len()..imap.len() + dmap.len()].copy_from_slice(dmap);
        buf
    }

    fn map(&self, space: Space) -> &Bitmap {
        match space {
            Space::Inode => &self.imap,
            Space::Data => &self.dmap,
        }
    }

    fn map_mut(&mut self, space: Space) -> &mut Bitmap {
        match space {
            Space::Inode => &mut self.imap,
            Space::Data => &mut self.dmap,
        }
    }

    /// Claims the lowest free index of the space.
    pub fn allocate(&mut self, space: Space) -> Result<u32> {
        let map = self.map_mut(space);
        let index = map.find_empty().ok_or(FsError::Exhausted)?;
        map.set(index);
        trace!("allocated {:?} index {}", space, index);
        Ok(index)
    }

    /// Releases an index. Freeing an already-free index is tolerated, and
    /// the index-0 sentinel is never released.
    pub fn free(&mut self, space: Space, index: u32) {
        if index == 0 {
            return;
        }
        self.map_mut(space).clear(index);
        trace!("freed {:?} index {}", space, index);
    }

    /// Marks an index used without going through first-free search; format
    /// uses this to pin down the metadata region and the root inode.
    pub fn reserve(&mut self, space: Space, index: u32) {
        self.map_mut(space).set(index);
    }

    pub fn test(&self, space: Space, index: u32) -> bool {
        self.map(space).test(index)
    }

    pub fn count_free(&self, space: Space) -> u32 {
        self.map(space).count_free()
    }
}
