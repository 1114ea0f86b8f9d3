#![forbid(unsafe_code)]
//! Read-only block I/O layer.
//!
//! Provides the `ByteDevice` trait for raw image access, the `BlockDevice`
//! trait for filesystem-relative block reads, and `DataRegionDevice`, which
//! maps QNX6 block numbers onto the image:
//! `volume_offset + data_start + block * block_size`.
//!
//! Nothing here ever writes; every short read is an error.

use qfs_error::{QfsError, Result};
use qfs_types::{BlockNumber, BlockSize, ByteOffset, QNX6_BOOT_SIZE, QNX6_SUPERBLOCK_SIZE};
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Owned block buffer.
///
/// Invariant: length == block size of the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed, read-only image access (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    ///
    /// Fewer bytes than requested is a `QfsError::ShortRead`.
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;
}

impl<T: ByteDevice + ?Sized> ByteDevice for &T {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<T: ByteDevice + ?Sized> ByteDevice for Box<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<T: ByteDevice + ?Sized> ByteDevice for Arc<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

fn short_read(offset: ByteOffset, expected: usize, len: u64) -> QfsError {
    let available = len.saturating_sub(offset.0);
    QfsError::ShortRead {
        offset: offset.0,
        expected,
        actual: usize::try_from(available).map_or(expected, |a| a.min(expected)),
    }
}

fn check_range(offset: ByteOffset, len: usize, dev_len: u64) -> Result<()> {
    let len_u64 = u64::try_from(len)
        .map_err(|_| QfsError::InvalidParameter("read length overflows u64".to_owned()))?;
    match offset.checked_add(len_u64) {
        Some(end) if end.0 <= dev_len => Ok(()),
        _ => Err(short_read(offset, len, dev_len)),
    }
}

/// File-backed image opened read-only.
///
/// Uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }

    #[must_use]
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        match self.file.read_exact_at(buf, offset.0) {
            Ok(()) => Ok(()),
            // The file shrank underneath us.
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                Err(short_read(offset, buf.len(), 0))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory image, used for synthetic volumes and carved buffers.
#[derive(Debug, Clone)]
pub struct MemoryByteDevice {
    bytes: Arc<[u8]>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len_bytes())?;
        let start = usize::try_from(offset.0)
            .map_err(|_| short_read(offset, buf.len(), self.len_bytes()))?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

/// Block-addressed, read-only I/O interface.
pub trait BlockDevice: Send + Sync {
    /// Read a block by filesystem-relative number.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Device block size.
    fn block_size(&self) -> BlockSize;

    /// Total number of addressable blocks.
    fn block_count(&self) -> u64;
}

/// Block store for a mounted QNX6 volume.
///
/// Block `n` lives at `base + n * block_size`, where `base` is the volume
/// offset inside the image plus the data-region start.
#[derive(Debug)]
pub struct DataRegionDevice<D: ByteDevice> {
    inner: D,
    base: ByteOffset,
    block_size: BlockSize,
    block_count: u64,
}

impl<D: ByteDevice> DataRegionDevice<D> {
    #[must_use]
    pub fn new(inner: D, base: ByteOffset, block_size: BlockSize, block_count: u64) -> Self {
        Self {
            inner,
            base,
            block_size,
            block_count,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    #[must_use]
    pub fn base(&self) -> ByteOffset {
        self.base
    }

    /// Absolute image offset of a block.
    pub fn block_offset(&self, block: BlockNumber) -> Result<ByteOffset> {
        if block.0 >= self.block_count {
            return Err(QfsError::InvalidAddress {
                kind: "block",
                value: block.0,
                first: 0,
                last: self.block_count.saturating_sub(1),
            });
        }
        self.block_size
            .block_to_byte(block)
            .and_then(|rel| self.base.checked_add(rel))
            .ok_or_else(|| QfsError::InvalidParameter(format!("block {block} offset overflows")))
    }
}

impl<D: ByteDevice> BlockDevice for DataRegionDevice<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let offset = self.block_offset(block)?;
        let len = usize::try_from(self.block_size.get()).map_err(|_| {
            QfsError::InvalidParameter("block size does not fit usize".to_owned())
        })?;
        let mut buf = vec![0_u8; len];
        self.inner.read_exact_at(offset, &mut buf)?;
        trace!(block = block.0, offset = offset.0, "read_block");
        Ok(BlockBuf::new(buf))
    }

    fn block_size(&self) -> BlockSize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

/// Read the 16-byte boot header at the start of a volume.
pub fn read_boot_region(
    dev: &dyn ByteDevice,
    volume_offset: ByteOffset,
) -> Result<[u8; QNX6_BOOT_SIZE]> {
    let mut buf = [0_u8; QNX6_BOOT_SIZE];
    dev.read_exact_at(volume_offset, &mut buf)?;
    Ok(buf)
}

/// Read one 512-byte superblock copy at an absolute offset.
pub fn read_superblock_region(
    dev: &dyn ByteDevice,
    offset: ByteOffset,
) -> Result<[u8; QNX6_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; QNX6_SUPERBLOCK_SIZE];
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn memory_device_reads_exact_ranges() {
        let dev = MemoryByteDevice::new(patterned(4096));
        let mut buf = [0_u8; 4];
        dev.read_exact_at(ByteOffset(251), &mut buf).expect("read");
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(dev.len_bytes(), 4096);
    }

    #[test]
    fn memory_device_reports_short_reads() {
        let dev = MemoryByteDevice::new(vec![0_u8; 100]);
        let mut buf = [0_u8; 16];
        let err = dev.read_exact_at(ByteOffset(90), &mut buf).unwrap_err();
        assert!(matches!(
            err,
            QfsError::ShortRead {
                offset: 90,
                expected: 16,
                actual: 10
            }
        ));
        let err = dev.read_exact_at(ByteOffset(u64::MAX), &mut buf).unwrap_err();
        assert!(matches!(err, QfsError::ShortRead { actual: 0, .. }));
    }

    #[test]
    fn data_region_maps_blocks_after_base() {
        let bs = BlockSize::new(512).expect("bs");
        let dev =
            DataRegionDevice::new(MemoryByteDevice::new(patterned(8192)), ByteOffset(1024), bs, 4);
        assert_eq!(dev.block_offset(BlockNumber(0)).expect("off"), ByteOffset(1024));
        assert_eq!(dev.block_offset(BlockNumber(3)).expect("off"), ByteOffset(2560));

        let block = dev.read_block(BlockNumber(1)).expect("read");
        assert_eq!(block.as_slice().len(), 512);
        assert_eq!(block.as_slice()[0], (1536 % 251) as u8);
    }

    #[test]
    fn data_region_rejects_blocks_past_count() {
        let bs = BlockSize::new(512).expect("bs");
        let dev =
            DataRegionDevice::new(MemoryByteDevice::new(vec![0; 4096]), ByteOffset::ZERO, bs, 2);
        let err = dev.read_block(BlockNumber(2)).unwrap_err();
        assert!(matches!(err, QfsError::InvalidAddress { kind: "block", value: 2, .. }));
    }

    #[test]
    fn data_region_short_image_is_an_error() {
        let bs = BlockSize::new(1024).expect("bs");
        // Superblock claims 8 blocks but the image only holds 2.
        let dev =
            DataRegionDevice::new(MemoryByteDevice::new(vec![0; 2048]), ByteOffset::ZERO, bs, 8);
        assert!(dev.read_block(BlockNumber(1)).is_ok());
        assert!(matches!(
            dev.read_block(BlockNumber(2)).unwrap_err(),
            QfsError::ShortRead { .. }
        ));
    }

    #[test]
    fn file_device_reads_and_bounds_checks() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tmp");
        tmp.write_all(&patterned(2048)).expect("write");
        tmp.flush().expect("flush");

        let dev = FileByteDevice::open(tmp.path()).expect("open");
        assert_eq!(dev.len_bytes(), 2048);
        let boot = read_boot_region(&dev, ByteOffset(0)).expect("boot");
        assert_eq!(boot[15], 15);

        let sb = read_superblock_region(&dev, ByteOffset(1024)).expect("sb");
        assert_eq!(sb[0], (1024 % 251) as u8);
        assert!(read_superblock_region(&dev, ByteOffset(1600)).is_err());
    }

    #[test]
    fn blanket_impls_forward() {
        let mem = MemoryByteDevice::new(patterned(64));
        let shared: Arc<dyn ByteDevice> = Arc::new(mem.clone());
        let boxed: Box<dyn ByteDevice> = Box::new(mem);
        let mut a = [0_u8; 8];
        let mut b = [0_u8; 8];
        shared.read_exact_at(ByteOffset(8), &mut a).expect("arc");
        boxed.read_exact_at(ByteOffset(8), &mut b).expect("box");
        assert_eq!(a, b);
    }
}
