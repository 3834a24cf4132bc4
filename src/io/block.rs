/// The block number to access ranging from 0 (the first block) to n - 1
/// (the last block) where n is number of blocks available.
pub type BlockNumber = usize;

/// Contract between the filesystem core and whatever persists its blocks.
/// Transfers are whole blocks only; no partial reads or writes are exposed
/// to the core.
pub trait BlockStorage {
    /// Reads disk block number into the provided buffer, which must hold
    /// at least one whole block.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;

    /// Writes exactly one block from the provided buffer into the
    /// specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or from a buffer that is
    /// not exactly one block long, will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;

    /// Flush any buffered disk IO from memory. This is useful if it must be
    /// guaranteed the disk writes actually occurred, for instance, if being
    /// re-read from disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
