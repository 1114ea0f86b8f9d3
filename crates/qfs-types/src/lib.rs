#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── QNX6 on-disk constants ──────────────────────────────────────────────────

/// Magic bytes at the start of the 16-byte boot header.
pub const QNX6_BOOT_MAGIC: [u8; 4] = [0xEB, 0x10, 0x90, 0x00];
pub const QNX6_BOOT_SIZE: usize = 16;

/// Magic bytes at the start of each superblock copy.
pub const QNX6_SUPER_MAGIC: [u8; 4] = [0x22, 0x11, 0x19, 0x68];
pub const QNX6_SUPERBLOCK_SIZE: usize = 512;
/// Superblock bytes covered by the checksum start right after the stored CRC.
pub const QNX6_SUPERBLOCK_CRC_START: usize = 8;

/// Unit sizes seen in the wild for the boot header's superblock locations.
/// Probed in this order; earlier units win serial ties.
pub const QNX6_SUPERBLOCK_UNITS: [u64; 3] = [512, 1024, 4096];

pub const QNX6_ROOT_NODE_SIZE: usize = 80;
pub const QNX6_INODE_SIZE: usize = 128;
pub const QNX6_DIRENT_SIZE: usize = 32;
/// Inline name capacity of a directory entry.
pub const QNX6_SHORT_NAME_MAX: usize = 27;
/// Directory entry `length` value announcing a long-name table reference.
pub const QNX6_LONG_NAME_TAG: u8 = 0xFF;

/// Root pointers held by every root node and inode.
pub const QNX6_PTR_COUNT: usize = 16;
pub const QNX6_PTR_SIZE: usize = 4;
/// Pointer value marking an unused slot.
pub const QNX6_UNUSED_PTR: u32 = u32::MAX;

/// Block sizes must be a non-zero multiple of this.
pub const QNX6_SECTOR_SIZE: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

impl InodeNumber {
    /// Inode numbers are 1-based; the root directory is the first inode.
    pub const ROOT: Self = Self(1);
}

/// Validated block size (non-zero multiple of 512).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a non-zero multiple of 512.
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if value == 0 || value % QNX6_SECTOR_SIZE != 0 {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be a non-zero multiple of 512",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }

    /// Block pointers that fit in one indirection block.
    #[must_use]
    pub fn pointers_per_block(self) -> u64 {
        self.as_u64() / QNX6_PTR_SIZE as u64
    }

    /// Convert a byte offset to a block number (truncating).
    #[must_use]
    pub fn byte_to_block(self, byte_offset: u64) -> BlockNumber {
        BlockNumber(byte_offset / self.as_u64())
    }

    /// Convert a block number to a byte offset.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<u64> {
        block.0.checked_mul(self.as_u64())
    }
}

/// Byte offset on a `ByteDevice` (pread semantics).
///
/// This is a unit-carrying wrapper to prevent mixing bytes and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Bytes up to (not including) the first NUL.
#[must_use]
pub fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Magic bytes as an integer for `ParseError::InvalidMagic` reporting.
#[must_use]
pub fn magic_as_u64(magic: [u8; 4]) -> u64 {
    u64::from(u32::from_le_bytes(magic))
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;

/// Render a mode as the familiar `drwxr-xr-x` string.
#[must_use]
pub fn mode_string(mode: u16) -> String {
    let kind = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFREG => '-',
        S_IFLNK => 'l',
        S_IFCHR => 'c',
        S_IFBLK => 'b',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        _ => '?',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6_u16, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

// ── Checked arithmetic helpers ──────────────────────────────────────────────

/// Round `value` up to a multiple of `unit` (any non-zero unit).
#[must_use]
pub fn round_up(value: u64, unit: u64) -> Option<u64> {
    if unit == 0 {
        return None;
    }
    value.div_ceil(unit).checked_mul(unit)
}

pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_helpers() {
        let data = [0x34, 0x12, 0x78, 0x56, 0xEF, 0xBE, 0xAD, 0xDE, 0x01];
        assert_eq!(read_le_u16(&data, 0).unwrap(), 0x1234);
        assert_eq!(read_le_u32(&data, 0).unwrap(), 0x5678_1234);
        assert_eq!(read_le_u64(&data, 0).unwrap(), 0xDEAD_BEEF_5678_1234);
        assert_eq!(read_fixed::<2>(&data, 7).unwrap(), [0xDE, 0x01]);
        assert!(matches!(
            read_le_u32(&data, 6),
            Err(ParseError::InsufficientData {
                needed: 4,
                offset: 6,
                actual: 3
            })
        ));
        assert!(ensure_slice(&data, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_trim_nul() {
        assert_eq!(trim_nul(b"abc\0def"), b"abc");
        assert_eq!(trim_nul(b"full"), b"full");
        assert_eq!(trim_nul(b"\0"), b"");
    }

    #[test]
    fn test_block_size_validation() {
        for ok in [512_u32, 1024, 1536, 4096, 12_288, 65_536] {
            assert_eq!(BlockSize::new(ok).unwrap().get(), ok);
        }
        for bad in [0_u32, 100, 513, 4095] {
            assert!(BlockSize::new(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_block_size_conversions() {
        let bs = BlockSize::new(4096).unwrap();
        assert_eq!(bs.pointers_per_block(), 1024);
        assert_eq!(bs.byte_to_block(8191), BlockNumber(1));
        assert_eq!(bs.block_to_byte(BlockNumber(3)), Some(12_288));
        assert_eq!(bs.block_to_byte(BlockNumber(u64::MAX)), None);

        let odd = BlockSize::new(1536).unwrap();
        assert_eq!(odd.byte_to_block(3072), BlockNumber(2));
        assert_eq!(odd.pointers_per_block(), 384);
    }

    #[test]
    fn test_byte_offset_checked_ops() {
        assert_eq!(ByteOffset(10).checked_add(5), Some(ByteOffset(15)));
        assert_eq!(ByteOffset(u64::MAX).checked_add(1), None);
    }

    #[test]
    fn test_inode_constants() {
        assert_eq!(InodeNumber::ROOT, InodeNumber(1));
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4096), Some(0));
        assert_eq!(round_up(1, 4096), Some(4096));
        assert_eq!(round_up(4096, 4096), Some(4096));
        assert_eq!(round_up(4097, 1536), Some(4608));
        assert_eq!(round_up(5, 0), None);
        assert_eq!(round_up(u64::MAX, 4096), None);
    }

    #[test]
    fn test_u64_to_usize() {
        assert_eq!(u64_to_usize(42, "x").unwrap(), 42);
    }

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(S_IFDIR | 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(S_IFREG | 0o644), "-rw-r--r--");
        assert_eq!(mode_string(S_IFLNK | 0o777), "lrwxrwxrwx");
        assert_eq!(mode_string(0), "?---------");
    }

    #[test]
    fn test_magic_as_u64() {
        assert_eq!(magic_as_u64(QNX6_SUPER_MAGIC), 0x6819_1122);
    }
}
