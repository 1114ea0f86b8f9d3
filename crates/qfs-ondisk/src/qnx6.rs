use qfs_types::{
    BlockSize, ParseError, QNX6_BOOT_MAGIC, QNX6_BOOT_SIZE, QNX6_DIRENT_SIZE, QNX6_INODE_SIZE,
    QNX6_LONG_NAME_TAG, QNX6_PTR_COUNT, QNX6_ROOT_NODE_SIZE, QNX6_SHORT_NAME_MAX,
    QNX6_SUPER_MAGIC, QNX6_SUPERBLOCK_CRC_START, QNX6_SUPERBLOCK_SIZE, QNX6_UNUSED_PTR, S_IFBLK,
    S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, ensure_slice, magic_as_u64,
    read_fixed, read_le_u16, read_le_u32, read_le_u64, trim_nul,
};
use crc::{Algorithm, Crc};
use serde::{Deserialize, Serialize};

// ── Superblock checksum ─────────────────────────────────────────────────────

/// MSB-first CRC-32 (poly `0x04C11DB7`, init 0, no reflection, no final xor).
pub const QNX6_CRC32: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0,
    refin: false,
    refout: false,
    xorout: 0,
    check: 0x89a1_897f,
    residue: 0,
};

static QNX6_CRC: Crc<u32> = Crc::<u32>::new(&QNX6_CRC32);

/// The checksum QNX6 stores at superblock offset 4.
#[must_use]
pub fn qnx6_crc32(data: &[u8]) -> u32 {
    QNX6_CRC.checksum(data)
}

// ── Geometry helpers ────────────────────────────────────────────────────────

/// Byte offset of block 0 relative to the start of the volume.
#[must_use]
pub fn data_region_start(block_size: BlockSize) -> u64 {
    let bs = block_size.as_u64();
    if bs <= 0x1000 {
        0x3000
    } else if bs >= 0x3000 {
        bs
    } else {
        0x6000 - bs
    }
}

/// Bytes covered by one pointer at `level` levels above the data blocks:
/// `block_size * (block_size / 4)^level`. `None` on overflow.
#[must_use]
pub fn unit_bytes(block_size: BlockSize, level: u32) -> Option<u64> {
    block_size
        .pointers_per_block()
        .checked_pow(level)?
        .checked_mul(block_size.as_u64())
}

fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

fn read_ptrs(data: &[u8], offset: usize) -> Result<[u32; QNX6_PTR_COUNT], ParseError> {
    let mut ptrs = [0_u32; QNX6_PTR_COUNT];
    for (i, ptr) in ptrs.iter_mut().enumerate() {
        *ptr = read_le_u32(data, offset + i * 4)?;
    }
    Ok(ptrs)
}

// ── Boot header ─────────────────────────────────────────────────────────────

/// The 16-byte header at the start of a QNX6 volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qnx6BootBlock {
    pub fs_offset: u32,
    /// Superblock locations, in probe units.
    pub sblk0: u32,
    pub sblk1: u32,
}

impl Qnx6BootBlock {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let magic = read_fixed::<4>(bytes, 0)?;
        if magic != QNX6_BOOT_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: magic_as_u64(QNX6_BOOT_MAGIC),
                actual: magic_as_u64(magic),
            });
        }
        if bytes.len() < QNX6_BOOT_SIZE {
            return Err(ParseError::InsufficientData {
                needed: QNX6_BOOT_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            fs_offset: read_le_u32(bytes, 4)?,
            sblk0: read_le_u32(bytes, 8)?,
            sblk1: read_le_u32(bytes, 12)?,
        })
    }

    /// Superblock copy locations in copy order.
    #[must_use]
    pub fn superblock_locations(&self) -> [u32; 2] {
        [self.sblk0, self.sblk1]
    }
}

// ── Root node ───────────────────────────────────────────────────────────────

/// Describes one block-mapped logical object: its size, the 16 root
/// pointers and how many indirection levels sit below them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qnx6RootNode {
    pub size: u64,
    pub ptr: [u32; QNX6_PTR_COUNT],
    pub level: u8,
    pub mode: u8,
}

impl Qnx6RootNode {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < QNX6_ROOT_NODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: QNX6_ROOT_NODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            size: read_le_u64(bytes, 0)?,
            ptr: read_ptrs(bytes, 8)?,
            level: read_u8(bytes, 72)?,
            mode: read_u8(bytes, 73)?,
        })
    }

    /// Root pointers that are not the unused sentinel.
    pub fn used_pointers(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.ptr
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| *p != QNX6_UNUSED_PTR)
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qnx6Superblock {
    pub checksum: u32,
    pub serial: u64,
    pub ctime: u32,
    pub atime: u32,
    pub flags: u32,
    pub version1: u16,
    pub version2: u16,
    pub volume_id: [u8; 16],
    /// Raw on-disk value; validated by [`Qnx6Superblock::block_size`].
    pub block_size: u32,
    pub num_inodes: u32,
    pub free_inodes: u32,
    pub num_blocks: u32,
    pub free_blocks: u32,
    pub alloc_group: u32,
    pub inode_tree: Qnx6RootNode,
    pub bitmap: Qnx6RootNode,
    pub long_names: Qnx6RootNode,
    pub iclaim: Qnx6RootNode,
    pub iextra: Qnx6RootNode,
    pub migrate_blocks: u32,
    pub scrub_block: u32,
}

impl Qnx6Superblock {
    /// Parse a 512-byte superblock copy. Checks the magic but not the CRC.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < QNX6_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: QNX6_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }
        if !Self::has_magic(region) {
            return Err(ParseError::InvalidMagic {
                expected: magic_as_u64(QNX6_SUPER_MAGIC),
                actual: magic_as_u64(read_fixed::<4>(region, 0)?),
            });
        }

        let root = |off: usize| {
            Qnx6RootNode::parse_from_bytes(&region[off..off + QNX6_ROOT_NODE_SIZE])
        };

        Ok(Self {
            checksum: read_le_u32(region, 0x04)?,
            serial: read_le_u64(region, 0x08)?,
            ctime: read_le_u32(region, 0x10)?,
            atime: read_le_u32(region, 0x14)?,
            flags: read_le_u32(region, 0x18)?,
            version1: read_le_u16(region, 0x1C)?,
            version2: read_le_u16(region, 0x1E)?,
            volume_id: read_fixed::<16>(region, 0x20)?,
            block_size: read_le_u32(region, 0x30)?,
            num_inodes: read_le_u32(region, 0x34)?,
            free_inodes: read_le_u32(region, 0x38)?,
            num_blocks: read_le_u32(region, 0x3C)?,
            free_blocks: read_le_u32(region, 0x40)?,
            alloc_group: read_le_u32(region, 0x44)?,
            inode_tree: root(0x048)?,
            bitmap: root(0x098)?,
            long_names: root(0x0E8)?,
            iclaim: root(0x138)?,
            iextra: root(0x188)?,
            migrate_blocks: read_le_u32(region, 0x1D8)?,
            scrub_block: read_le_u32(region, 0x1DC)?,
        })
    }

    #[must_use]
    pub fn has_magic(region: &[u8]) -> bool {
        region.len() >= 4 && region[..4] == QNX6_SUPER_MAGIC
    }

    /// CRC over everything after the stored checksum.
    pub fn compute_checksum(raw_region: &[u8]) -> Result<u32, ParseError> {
        let covered = ensure_slice(
            raw_region,
            QNX6_SUPERBLOCK_CRC_START,
            QNX6_SUPERBLOCK_SIZE - QNX6_SUPERBLOCK_CRC_START,
        )?;
        Ok(qnx6_crc32(covered))
    }

    pub fn validate_checksum(&self, raw_region: &[u8]) -> Result<(), ParseError> {
        if Self::compute_checksum(raw_region)? != self.checksum {
            return Err(ParseError::InvalidField {
                field: "sb_checksum",
                reason: "superblock CRC32 mismatch",
            });
        }
        Ok(())
    }

    /// Validated block size.
    pub fn block_size(&self) -> Result<BlockSize, ParseError> {
        BlockSize::new(self.block_size)
    }

    #[must_use]
    pub fn volume_id_hex(&self) -> String {
        self.volume_id.iter().map(|b| format!("{b:02x}")).collect()
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// Coarse file type derived from the mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Qnx6FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

impl Qnx6FileType {
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qnx6Inode {
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    /// Creation time.
    pub ftime: u32,
    pub mtime: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mode: u16,
    pub ext_mode: u16,
    pub ptr: [u32; QNX6_PTR_COUNT],
    pub level: u8,
    pub status: u8,
}

impl Qnx6Inode {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < QNX6_INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: QNX6_INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            size: read_le_u64(bytes, 0)?,
            uid: read_le_u32(bytes, 8)?,
            gid: read_le_u32(bytes, 12)?,
            ftime: read_le_u32(bytes, 16)?,
            mtime: read_le_u32(bytes, 20)?,
            atime: read_le_u32(bytes, 24)?,
            ctime: read_le_u32(bytes, 28)?,
            mode: read_le_u16(bytes, 32)?,
            ext_mode: read_le_u16(bytes, 34)?,
            ptr: read_ptrs(bytes, 36)?,
            level: read_u8(bytes, 100)?,
            status: read_u8(bytes, 101)?,
        })
    }

    /// The inode's content viewed as a block-mapped object.
    #[must_use]
    pub fn root_node(&self) -> Qnx6RootNode {
        Qnx6RootNode {
            size: self.size,
            ptr: self.ptr,
            level: self.level,
            mode: 0,
        }
    }

    /// Mode zero marks a free inode slot.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.mode != 0
    }

    #[must_use]
    pub fn file_type(&self) -> Qnx6FileType {
        Qnx6FileType::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & 0o7777
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// Name portion of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qnx6DirName<'a> {
    /// Inline name, already trimmed at the declared length and first NUL.
    Short(&'a [u8]),
    /// Reference into the long-name table.
    Long { index: u32 },
}

/// A borrowed, non-empty directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qnx6DirEntryRef<'a> {
    /// Position of the 32-byte record within the directory content.
    pub slot: u32,
    pub inode: u32,
    pub name: Qnx6DirName<'a>,
}

impl<'a> Qnx6DirEntryRef<'a> {
    /// Decode one 32-byte record. Returns `None` for empty slots (inode 0).
    pub fn parse(slot: u32, record: &'a [u8]) -> Result<Option<Self>, ParseError> {
        let record = ensure_slice(record, 0, QNX6_DIRENT_SIZE)?;
        let inode = read_le_u32(record, 0)?;
        if inode == 0 {
            return Ok(None);
        }
        let length = record[4];
        let payload = &record[5..5 + QNX6_SHORT_NAME_MAX];
        let name = if length == QNX6_LONG_NAME_TAG {
            Qnx6DirName::Long {
                index: read_le_u32(payload, 3)?,
            }
        } else {
            let declared = usize::from(length).min(QNX6_SHORT_NAME_MAX);
            Qnx6DirName::Short(trim_nul(&payload[..declared]))
        };
        Ok(Some(Self { slot, inode, name }))
    }
}

/// Iterator over the live entries of a directory's content bytes.
///
/// Empty slots are skipped; a trailing partial record is ignored.
#[derive(Debug, Clone)]
pub struct DirEntryIter<'a> {
    chunks: std::iter::Enumerate<std::slice::ChunksExact<'a, u8>>,
}

impl<'a> DirEntryIter<'a> {
    #[must_use]
    pub fn new(content: &'a [u8]) -> Self {
        Self {
            chunks: content.chunks_exact(QNX6_DIRENT_SIZE).enumerate(),
        }
    }
}

impl<'a> Iterator for DirEntryIter<'a> {
    type Item = Qnx6DirEntryRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for (slot, record) in self.chunks.by_ref() {
            let slot = u32::try_from(slot).unwrap_or(u32::MAX);
            // Records are exactly QNX6_DIRENT_SIZE, so parse cannot fail.
            if let Ok(Some(entry)) = Qnx6DirEntryRef::parse(slot, record) {
                return Some(entry);
            }
        }
        None
    }
}

/// Extract the name from one long-name table record.
///
/// The record starts with a u16 length, clamped to `block_size - 2`.
pub fn parse_long_name_record(record: &[u8], block_size: BlockSize) -> Result<Vec<u8>, ParseError> {
    let declared = usize::from(read_le_u16(record, 0)?);
    let cap = usize::try_from(block_size.get())
        .map_err(|_| ParseError::IntegerConversion { field: "block_size" })?
        .saturating_sub(2);
    let len = declared.min(cap).min(record.len().saturating_sub(2));
    Ok(trim_nul(&record[2..2 + len]).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_superblock(serial: u64, block_size: u32) -> [u8; QNX6_SUPERBLOCK_SIZE] {
        let mut sb = [0_u8; QNX6_SUPERBLOCK_SIZE];
        sb[0..4].copy_from_slice(&QNX6_SUPER_MAGIC);
        sb[0x08..0x10].copy_from_slice(&serial.to_le_bytes());
        sb[0x20..0x30].copy_from_slice(&[0xAB; 16]);
        sb[0x30..0x34].copy_from_slice(&block_size.to_le_bytes());
        sb[0x34..0x38].copy_from_slice(&64_u32.to_le_bytes()); // num_inodes
        sb[0x3C..0x40].copy_from_slice(&1000_u32.to_le_bytes()); // num_blocks
        // inode tree root node: size 8192, ptr[0] = 5, rest unused, level 1
        sb[0x48..0x50].copy_from_slice(&8192_u64.to_le_bytes());
        for i in 0..QNX6_PTR_COUNT {
            let p = if i == 0 { 5 } else { QNX6_UNUSED_PTR };
            sb[0x50 + i * 4..0x54 + i * 4].copy_from_slice(&p.to_le_bytes());
        }
        sb[0x48 + 72] = 1;
        let crc = Qnx6Superblock::compute_checksum(&sb).expect("crc");
        sb[4..8].copy_from_slice(&crc.to_le_bytes());
        sb
    }

    #[test]
    fn crc_matches_bitwise_reference() {
        const POLY: u32 = 0x04C1_1DB7;
        fn reference(buf: &[u8]) -> u32 {
            let mut crc = 0_u32;
            for &b in buf {
                crc ^= u32::from(b) << 24;
                for _ in 0..8 {
                    crc = if crc & 0x8000_0000 != 0 {
                        (crc << 1) ^ POLY
                    } else {
                        crc << 1
                    };
                }
            }
            crc
        }
        let inputs: [&[u8]; 4] = [b"", b"a", b"123456789", &[0xFF; 504]];
        for data in inputs {
            assert_eq!(qnx6_crc32(data), reference(data));
        }
        // CRC-32/POSIX check value before its final inversion.
        assert_eq!(qnx6_crc32(b"123456789"), 0x89A1_897F);
    }

    #[test]
    fn parse_superblock_smoke() {
        let sb = make_superblock(7, 4096);
        let parsed = Qnx6Superblock::parse_superblock_region(&sb).expect("parse");
        assert_eq!(parsed.serial, 7);
        assert_eq!(parsed.block_size().expect("bs").get(), 4096);
        assert_eq!(parsed.num_inodes, 64);
        assert_eq!(parsed.num_blocks, 1000);
        assert_eq!(parsed.inode_tree.size, 8192);
        assert_eq!(parsed.inode_tree.level, 1);
        assert_eq!(parsed.inode_tree.used_pointers().collect::<Vec<_>>(), vec![(0, 5)]);
        assert_eq!(parsed.volume_id_hex(), "ab".repeat(16));
        parsed.validate_checksum(&sb).expect("crc ok");
    }

    #[test]
    fn superblock_checksum_detects_single_bit_flip() {
        let mut sb = make_superblock(1, 1024);
        sb[0x100] ^= 0x01;
        let parsed = Qnx6Superblock::parse_superblock_region(&sb).expect("parse");
        assert!(matches!(
            parsed.validate_checksum(&sb),
            Err(ParseError::InvalidField {
                field: "sb_checksum",
                ..
            })
        ));
    }

    #[test]
    fn superblock_rejects_bad_magic_and_short_region() {
        let mut sb = make_superblock(1, 1024);
        sb[0] = 0;
        assert!(matches!(
            Qnx6Superblock::parse_superblock_region(&sb),
            Err(ParseError::InvalidMagic { .. })
        ));
        assert!(matches!(
            Qnx6Superblock::parse_superblock_region(&sb[..100]),
            Err(ParseError::InsufficientData { needed: 512, .. })
        ));
    }

    #[test]
    fn superblock_block_size_validation() {
        for bad in [0_u32, 1000] {
            let sb = make_superblock(1, bad);
            let parsed = Qnx6Superblock::parse_superblock_region(&sb).expect("parse");
            assert!(parsed.block_size().is_err());
        }
    }

    #[test]
    fn boot_block_parse() {
        let mut raw = [0_u8; 16];
        raw[..4].copy_from_slice(&QNX6_BOOT_MAGIC);
        raw[8..12].copy_from_slice(&2_u32.to_le_bytes());
        raw[12..16].copy_from_slice(&4_u32.to_le_bytes());
        let boot = Qnx6BootBlock::parse_from_bytes(&raw).expect("boot");
        assert_eq!(boot.superblock_locations(), [2, 4]);

        raw[0] = 0x55;
        assert!(matches!(
            Qnx6BootBlock::parse_from_bytes(&raw),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn data_region_start_table() {
        let start = |bs| data_region_start(BlockSize::new(bs).expect("bs"));
        assert_eq!(start(512), 0x3000);
        assert_eq!(start(4096), 0x3000);
        assert_eq!(start(0x2000), 0x4000);
        assert_eq!(start(0x2800), 0x3800);
        assert_eq!(start(0x3000), 0x3000);
        assert_eq!(start(0x4000), 0x4000);
    }

    #[test]
    fn unit_bytes_grows_by_fanout() {
        let bs = BlockSize::new(1024).expect("bs");
        assert_eq!(unit_bytes(bs, 0), Some(1024));
        assert_eq!(unit_bytes(bs, 1), Some(1024 * 256));
        assert_eq!(unit_bytes(bs, 2), Some(1024 * 256 * 256));
        assert_eq!(unit_bytes(BlockSize::new(65_536).expect("bs"), 8), None);
    }

    #[test]
    fn parse_inode_fields() {
        let mut raw = [0_u8; QNX6_INODE_SIZE];
        raw[0..8].copy_from_slice(&5000_u64.to_le_bytes());
        raw[8..12].copy_from_slice(&1000_u32.to_le_bytes());
        raw[12..16].copy_from_slice(&100_u32.to_le_bytes());
        raw[16..20].copy_from_slice(&11_u32.to_le_bytes());
        raw[20..24].copy_from_slice(&22_u32.to_le_bytes());
        raw[24..28].copy_from_slice(&33_u32.to_le_bytes());
        raw[28..32].copy_from_slice(&44_u32.to_le_bytes());
        raw[32..34].copy_from_slice(&(S_IFDIR | 0o755).to_le_bytes());
        raw[36..40].copy_from_slice(&9_u32.to_le_bytes());
        for i in 1..QNX6_PTR_COUNT {
            raw[36 + i * 4..40 + i * 4].copy_from_slice(&QNX6_UNUSED_PTR.to_le_bytes());
        }
        raw[100] = 2;
        raw[101] = 1;

        let inode = Qnx6Inode::parse_from_bytes(&raw).expect("inode");
        assert_eq!(inode.size, 5000);
        assert_eq!((inode.uid, inode.gid), (1000, 100));
        assert_eq!(
            (inode.ftime, inode.mtime, inode.atime, inode.ctime),
            (11, 22, 33, 44)
        );
        assert!(inode.is_dir());
        assert!(inode.is_allocated());
        assert_eq!(inode.permission_bits(), 0o755);
        assert_eq!(inode.file_type(), Qnx6FileType::Directory);
        let root = inode.root_node();
        assert_eq!(root.level, 2);
        assert_eq!(root.ptr[0], 9);
        assert_eq!(root.size, 5000);

        assert!(Qnx6Inode::parse_from_bytes(&raw[..127]).is_err());
    }

    fn dirent(inode: u32, length: u8, payload: &[u8]) -> [u8; QNX6_DIRENT_SIZE] {
        let mut raw = [0_u8; QNX6_DIRENT_SIZE];
        raw[0..4].copy_from_slice(&inode.to_le_bytes());
        raw[4] = length;
        raw[5..5 + payload.len()].copy_from_slice(payload);
        raw
    }

    #[test]
    fn dir_iter_skips_empty_slots_and_decodes_names() {
        let mut content = Vec::new();
        content.extend_from_slice(&dirent(1, 1, b"."));
        content.extend_from_slice(&dirent(0, 5, b"ghost"));
        content.extend_from_slice(&dirent(7, 4, b"file\0junk"));
        let mut long = [0_u8; 8];
        long[3..7].copy_from_slice(&3_u32.to_le_bytes());
        content.extend_from_slice(&dirent(9, QNX6_LONG_NAME_TAG, &long));
        content.extend_from_slice(&[0xEE; 10]); // trailing partial record

        let entries: Vec<_> = DirEntryIter::new(&content).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, Qnx6DirName::Short(b"."));
        assert_eq!(entries[1].slot, 2);
        assert_eq!(entries[1].name, Qnx6DirName::Short(b"file"));
        assert_eq!(entries[2].inode, 9);
        assert_eq!(entries[2].name, Qnx6DirName::Long { index: 3 });
    }

    #[test]
    fn short_name_stops_at_nul_before_declared_length() {
        let raw = dirent(4, 20, b"ab\0cd");
        let entry = Qnx6DirEntryRef::parse(0, &raw).expect("parse").expect("live");
        assert_eq!(entry.name, Qnx6DirName::Short(b"ab"));
    }

    #[test]
    fn long_name_record_clamps_length() {
        let bs = BlockSize::new(512).expect("bs");
        let mut record = vec![0_u8; 512];
        record[0..2].copy_from_slice(&11_u16.to_le_bytes());
        record[2..13].copy_from_slice(b"hello world");
        assert_eq!(parse_long_name_record(&record, bs).expect("name"), b"hello world");

        record[0..2].copy_from_slice(&u16::MAX.to_le_bytes());
        record[2..512].fill(b'x');
        assert_eq!(parse_long_name_record(&record, bs).expect("name").len(), 510);
        assert!(parse_long_name_record(&record[..1], bs).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn dir_iter_never_yields_inode_zero(
            content in proptest::collection::vec(any::<u8>(), 0..1024)
        ) {
            let mut seen = std::collections::BTreeSet::new();
            for entry in DirEntryIter::new(&content) {
                prop_assert_ne!(entry.inode, 0);
                prop_assert!(seen.insert(entry.slot));
            }
        }

        #[test]
        fn parsers_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..600)) {
            let _ = Qnx6Superblock::parse_superblock_region(&bytes);
            let _ = Qnx6Inode::parse_from_bytes(&bytes);
            let _ = Qnx6BootBlock::parse_from_bytes(&bytes);
            let _ = parse_long_name_record(&bytes, BlockSize::new(512).expect("bs"));
        }
    }
}
