#![forbid(unsafe_code)]
//! Synthetic QNX6 volumes for tests and benchmarks.
//!
//! [`Qnx6ImageBuilder`] lays out files, directories, long names, the inode
//! table and the allocation bitmap the way a QNX6 driver would, then writes
//! the boot header and both superblock copies with valid checksums.
//! [`sample_volume`] builds the small tree the conformance suite and the CLI
//! tests share.

use anyhow::{Result, bail, ensure};
use qfs_block::MemoryByteDevice;
use qfs_ondisk::{Qnx6Inode, Qnx6RootNode, Qnx6Superblock, data_region_start};
use qfs_types::{
    BlockSize, QNX6_BOOT_MAGIC, QNX6_DIRENT_SIZE, QNX6_INODE_SIZE, QNX6_LONG_NAME_TAG,
    QNX6_PTR_COUNT, QNX6_SHORT_NAME_MAX, QNX6_SUPER_MAGIC, QNX6_SUPERBLOCK_SIZE, QNX6_UNUSED_PTR,
    S_IFDIR, S_IFLNK, S_IFREG,
};
use std::collections::{BTreeMap, BTreeSet};

/// Default timestamp stamped on inodes created through the helpers.
pub const DEFAULT_TIME: u32 = 1_700_000_000;

/// Superblock locations in 512-byte units: 0x1000 and 0x2000.
pub const DEFAULT_SBLK: [u32; 2] = [8, 16];

// ── Encoders ────────────────────────────────────────────────────────────────

pub fn encode_root_node(node: &Qnx6RootNode, out: &mut [u8]) {
    out[0..8].copy_from_slice(&node.size.to_le_bytes());
    for (i, p) in node.ptr.iter().enumerate() {
        out[8 + i * 4..12 + i * 4].copy_from_slice(&p.to_le_bytes());
    }
    out[72] = node.level;
    out[73] = node.mode;
}

#[must_use]
pub fn encode_inode(inode: &Qnx6Inode) -> [u8; QNX6_INODE_SIZE] {
    let mut raw = [0_u8; QNX6_INODE_SIZE];
    raw[0..8].copy_from_slice(&inode.size.to_le_bytes());
    raw[8..12].copy_from_slice(&inode.uid.to_le_bytes());
    raw[12..16].copy_from_slice(&inode.gid.to_le_bytes());
    raw[16..20].copy_from_slice(&inode.ftime.to_le_bytes());
    raw[20..24].copy_from_slice(&inode.mtime.to_le_bytes());
    raw[24..28].copy_from_slice(&inode.atime.to_le_bytes());
    raw[28..32].copy_from_slice(&inode.ctime.to_le_bytes());
    raw[32..34].copy_from_slice(&inode.mode.to_le_bytes());
    raw[34..36].copy_from_slice(&inode.ext_mode.to_le_bytes());
    for (i, p) in inode.ptr.iter().enumerate() {
        raw[36 + i * 4..40 + i * 4].copy_from_slice(&p.to_le_bytes());
    }
    raw[100] = inode.level;
    raw[101] = inode.status;
    raw
}

/// Encode a superblock and stamp its checksum.
#[must_use]
pub fn encode_superblock(sb: &Qnx6Superblock) -> [u8; QNX6_SUPERBLOCK_SIZE] {
    let mut raw = [0_u8; QNX6_SUPERBLOCK_SIZE];
    raw[0..4].copy_from_slice(&QNX6_SUPER_MAGIC);
    raw[0x08..0x10].copy_from_slice(&sb.serial.to_le_bytes());
    raw[0x10..0x14].copy_from_slice(&sb.ctime.to_le_bytes());
    raw[0x14..0x18].copy_from_slice(&sb.atime.to_le_bytes());
    raw[0x18..0x1C].copy_from_slice(&sb.flags.to_le_bytes());
    raw[0x1C..0x1E].copy_from_slice(&sb.version1.to_le_bytes());
    raw[0x1E..0x20].copy_from_slice(&sb.version2.to_le_bytes());
    raw[0x20..0x30].copy_from_slice(&sb.volume_id);
    raw[0x30..0x34].copy_from_slice(&sb.block_size.to_le_bytes());
    raw[0x34..0x38].copy_from_slice(&sb.num_inodes.to_le_bytes());
    raw[0x38..0x3C].copy_from_slice(&sb.free_inodes.to_le_bytes());
    raw[0x3C..0x40].copy_from_slice(&sb.num_blocks.to_le_bytes());
    raw[0x40..0x44].copy_from_slice(&sb.free_blocks.to_le_bytes());
    raw[0x44..0x48].copy_from_slice(&sb.alloc_group.to_le_bytes());
    encode_root_node(&sb.inode_tree, &mut raw[0x048..0x098]);
    encode_root_node(&sb.bitmap, &mut raw[0x098..0x0E8]);
    encode_root_node(&sb.long_names, &mut raw[0x0E8..0x138]);
    encode_root_node(&sb.iclaim, &mut raw[0x138..0x188]);
    encode_root_node(&sb.iextra, &mut raw[0x188..0x1D8]);
    raw[0x1D8..0x1DC].copy_from_slice(&sb.migrate_blocks.to_le_bytes());
    raw[0x1DC..0x1E0].copy_from_slice(&sb.scrub_block.to_le_bytes());
    let crc = qfs_ondisk::qnx6_crc32(&raw[8..]);
    raw[4..8].copy_from_slice(&crc.to_le_bytes());
    raw
}

#[must_use]
pub fn empty_root_node() -> Qnx6RootNode {
    Qnx6RootNode {
        size: 0,
        ptr: [QNX6_UNUSED_PTR; QNX6_PTR_COUNT],
        level: 0,
        mode: 0,
    }
}

/// One directory entry to lay out with [`Qnx6ImageBuilder::add_dir`].
/// Names longer than 27 bytes go through the long-name table.
#[derive(Debug, Clone)]
pub struct DirSpec {
    pub name: Vec<u8>,
    pub inode: u32,
}

impl DirSpec {
    #[must_use]
    pub fn new(name: impl AsRef<[u8]>, inode: u32) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            inode,
        }
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Qnx6ImageBuilder {
    block_size: u32,
    num_blocks: u32,
    num_inodes: u32,
    volume_offset: usize,
    next_block: u32,
    blocks: BTreeMap<u32, Vec<u8>>,
    free_override: BTreeSet<u32>,
    inodes: BTreeMap<u32, Qnx6Inode>,
    long_names: Vec<Vec<u8>>,
    serials: [u64; 2],
    corrupt: [bool; 2],
    sblk: [u32; 2],
    inode_table_level: Option<u8>,
    with_bitmap: bool,
}

impl Qnx6ImageBuilder {
    #[must_use]
    pub fn new(block_size: u32, num_blocks: u32) -> Self {
        Self {
            block_size,
            num_blocks,
            num_inodes: 16,
            volume_offset: 0,
            next_block: 0,
            blocks: BTreeMap::new(),
            free_override: BTreeSet::new(),
            inodes: BTreeMap::new(),
            long_names: Vec::new(),
            serials: [1, 0],
            corrupt: [false, false],
            sblk: DEFAULT_SBLK,
            inode_table_level: None,
            with_bitmap: true,
        }
    }

    #[must_use]
    pub fn with_inode_count(mut self, count: u32) -> Self {
        self.num_inodes = count;
        self
    }

    /// Place the volume `bytes` into the image (partition offset).
    #[must_use]
    pub fn with_volume_offset(mut self, bytes: usize) -> Self {
        self.volume_offset = bytes;
        self
    }

    #[must_use]
    pub fn with_serials(mut self, first: u64, second: u64) -> Self {
        self.serials = [first, second];
        self
    }

    #[must_use]
    pub fn with_superblock_locations(mut self, first: u32, second: u32) -> Self {
        self.sblk = [first, second];
        self
    }

    #[must_use]
    pub fn with_inode_table_level(mut self, level: u8) -> Self {
        self.inode_table_level = Some(level);
        self
    }

    /// Leave the bitmap root node empty.
    #[must_use]
    pub fn without_bitmap(mut self) -> Self {
        self.with_bitmap = false;
        self
    }

    /// Damage a superblock copy after its checksum is computed.
    #[must_use]
    pub fn corrupt_superblock(mut self, copy: usize) -> Self {
        self.corrupt[copy] = true;
        self
    }

    /// Record `block` as free in the bitmap even if it carries data.
    pub fn mark_free(&mut self, block: u32) {
        self.free_override.insert(block);
    }

    #[must_use]
    pub fn fanout(&self) -> usize {
        self.block_size as usize / 4
    }

    fn bs(&self) -> usize {
        self.block_size as usize
    }

    /// Allocate the next free block and store `data` (padded to a block).
    pub fn alloc_block(&mut self, mut data: Vec<u8>) -> Result<u32> {
        ensure!(
            self.next_block < self.num_blocks,
            "volume full: {} blocks",
            self.num_blocks
        );
        ensure!(data.len() <= self.bs(), "block payload larger than block size");
        data.resize(self.bs(), 0);
        let block = self.next_block;
        self.next_block += 1;
        self.blocks.insert(block, data);
        Ok(block)
    }

    /// Smallest level whose 16 root pointers cover `count` blocks.
    #[must_use]
    pub fn level_for(&self, count: usize) -> u8 {
        let mut level = 0;
        let mut capacity = QNX6_PTR_COUNT;
        while capacity < count {
            capacity = capacity.saturating_mul(self.fanout());
            level += 1;
        }
        level
    }

    /// Lay out an object. `None` entries become holes (unused pointers);
    /// fully-empty indirection groups collapse to an unused pointer too.
    pub fn write_object(
        &mut self,
        blocks: &[Option<Vec<u8>>],
        size: u64,
        level: Option<u8>,
    ) -> Result<Qnx6RootNode> {
        let level = level.unwrap_or_else(|| self.level_for(blocks.len()));
        let mut ptrs = Vec::with_capacity(blocks.len());
        for block in blocks {
            ptrs.push(match block {
                Some(data) => self.alloc_block(data.clone())?,
                None => QNX6_UNUSED_PTR,
            });
        }

        let fanout = self.fanout();
        for _ in 0..level {
            let mut parents = Vec::with_capacity(ptrs.len().div_ceil(fanout));
            for group in ptrs.chunks(fanout) {
                if group.iter().all(|p| *p == QNX6_UNUSED_PTR) {
                    parents.push(QNX6_UNUSED_PTR);
                    continue;
                }
                let mut indirect = vec![0xFF_u8; self.bs()];
                for (i, p) in group.iter().enumerate() {
                    indirect[i * 4..i * 4 + 4].copy_from_slice(&p.to_le_bytes());
                }
                parents.push(self.alloc_block(indirect)?);
            }
            ptrs = parents;
        }

        if ptrs.len() > QNX6_PTR_COUNT {
            bail!(
                "object needs {} root pointers at level {level}; raise the level",
                ptrs.len()
            );
        }
        let mut root = [QNX6_UNUSED_PTR; QNX6_PTR_COUNT];
        root[..ptrs.len()].copy_from_slice(&ptrs);
        Ok(Qnx6RootNode {
            size,
            ptr: root,
            level,
            mode: 0,
        })
    }

    fn chunk(&self, content: &[u8]) -> Vec<Option<Vec<u8>>> {
        content
            .chunks(self.bs())
            .map(|c| Some(c.to_vec()))
            .collect()
    }

    /// Install an inode verbatim.
    pub fn set_inode(&mut self, inum: u32, inode: Qnx6Inode) {
        self.inodes.insert(inum, inode);
    }

    #[must_use]
    pub fn inode(&self, inum: u32) -> Option<&Qnx6Inode> {
        self.inodes.get(&inum)
    }

    fn install(&mut self, inum: u32, mode: u16, root: Qnx6RootNode) -> Qnx6RootNode {
        self.set_inode(
            inum,
            Qnx6Inode {
                size: root.size,
                uid: 0,
                gid: 0,
                ftime: DEFAULT_TIME,
                mtime: DEFAULT_TIME,
                atime: DEFAULT_TIME,
                ctime: DEFAULT_TIME,
                mode,
                ext_mode: 0,
                ptr: root.ptr,
                level: root.level,
                status: 1,
            },
        );
        root
    }

    pub fn add_file(&mut self, inum: u32, mode: u16, content: &[u8]) -> Result<Qnx6RootNode> {
        let blocks = self.chunk(content);
        let root = self.write_object(&blocks, content.len() as u64, None)?;
        Ok(self.install(inum, mode, root))
    }

    pub fn add_file_with_level(
        &mut self,
        inum: u32,
        mode: u16,
        content: &[u8],
        level: u8,
    ) -> Result<Qnx6RootNode> {
        let blocks = self.chunk(content);
        let root = self.write_object(&blocks, content.len() as u64, Some(level))?;
        Ok(self.install(inum, mode, root))
    }

    pub fn add_sparse_file(
        &mut self,
        inum: u32,
        mode: u16,
        blocks: &[Option<Vec<u8>>],
        size: u64,
        level: Option<u8>,
    ) -> Result<Qnx6RootNode> {
        let root = self.write_object(blocks, size, level)?;
        Ok(self.install(inum, mode, root))
    }

    /// Append a name to the long-name table and return its index.
    pub fn add_long_name(&mut self, name: &[u8]) -> u32 {
        self.long_names.push(name.to_vec());
        u32::try_from(self.long_names.len() - 1).unwrap_or(u32::MAX)
    }

    /// Encode directory records; inode 0 produces an empty slot.
    pub fn dir_content(&mut self, entries: &[DirSpec]) -> Vec<u8> {
        let mut content = Vec::with_capacity(entries.len() * QNX6_DIRENT_SIZE);
        for entry in entries {
            let mut record = [0_u8; QNX6_DIRENT_SIZE];
            record[0..4].copy_from_slice(&entry.inode.to_le_bytes());
            if entry.name.len() > QNX6_SHORT_NAME_MAX {
                let index = self.add_long_name(&entry.name);
                record[4] = QNX6_LONG_NAME_TAG;
                record[8..12].copy_from_slice(&index.to_le_bytes());
            } else {
                record[4] = entry.name.len() as u8;
                record[5..5 + entry.name.len()].copy_from_slice(&entry.name);
            }
            content.extend_from_slice(&record);
        }
        content
    }

    pub fn add_dir(&mut self, inum: u32, entries: &[DirSpec]) -> Result<Qnx6RootNode> {
        let content = self.dir_content(entries);
        self.add_file(inum, S_IFDIR | 0o755, &content)
    }

    pub fn build_device(self) -> Result<MemoryByteDevice> {
        Ok(MemoryByteDevice::new(self.build()?))
    }

    pub fn build(mut self) -> Result<Vec<u8>> {
        let bs = self.bs();
        let block_size = BlockSize::new(self.block_size)?;

        let bitmap_bytes = (self.num_blocks as usize).div_ceil(8);
        let bitmap_blocks = if self.with_bitmap {
            let needed = bitmap_bytes.div_ceil(bs);
            ensure!(needed <= QNX6_PTR_COUNT, "bitmap needs more than 16 blocks");
            (0..needed)
                .map(|_| self.alloc_block(Vec::new()))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let long_records: Vec<Option<Vec<u8>>> = self
            .long_names
            .iter()
            .map(|name| {
                let len = name.len().min(bs - 2);
                let mut record = vec![0_u8; bs];
                record[0..2].copy_from_slice(&(len as u16).to_le_bytes());
                record[2..2 + len].copy_from_slice(&name[..len]);
                Some(record)
            })
            .collect();
        let long_size = (long_records.len() * bs) as u64;
        let long_names = self.write_object(&long_records, long_size, None)?;

        let table_len = self.num_inodes as usize * QNX6_INODE_SIZE;
        let mut table = vec![0_u8; table_len];
        for (inum, inode) in &self.inodes {
            ensure!(
                (1..=self.num_inodes).contains(inum),
                "inode {inum} outside table of {}",
                self.num_inodes
            );
            let at = (*inum as usize - 1) * QNX6_INODE_SIZE;
            table[at..at + QNX6_INODE_SIZE].copy_from_slice(&encode_inode(inode));
        }
        let table_blocks = self.chunk(&table);
        let level = self.inode_table_level;
        let inode_tree = self.write_object(&table_blocks, table_len as u64, level)?;

        let mut bitmap = empty_root_node();
        let allocated: BTreeSet<u32> = self
            .blocks
            .keys()
            .copied()
            .filter(|b| !self.free_override.contains(b))
            .collect();
        if self.with_bitmap {
            let mut bits = vec![0_u8; bitmap_blocks.len() * bs];
            for b in &allocated {
                bits[*b as usize / 8] |= 1 << (b % 8);
            }
            for (i, blk) in bitmap_blocks.iter().enumerate() {
                self.blocks
                    .insert(*blk, bits[i * bs..(i + 1) * bs].to_vec());
                bitmap.ptr[i] = *blk;
            }
            bitmap.size = bitmap_bytes as u64;
        }

        let used_inodes = self.inodes.values().filter(|i| i.mode != 0).count() as u32;
        let mut sb = Qnx6Superblock {
            checksum: 0,
            serial: 0,
            ctime: DEFAULT_TIME,
            atime: DEFAULT_TIME,
            flags: 0,
            version1: 1,
            version2: 1,
            volume_id: *b"qfs-harness-vol\0",
            block_size: self.block_size,
            num_inodes: self.num_inodes,
            free_inodes: self.num_inodes.saturating_sub(used_inodes),
            num_blocks: self.num_blocks,
            free_blocks: self.num_blocks.saturating_sub(allocated.len() as u32),
            alloc_group: 0,
            inode_tree,
            bitmap,
            long_names,
            iclaim: empty_root_node(),
            iextra: empty_root_node(),
            migrate_blocks: 0,
            scrub_block: 0,
        };

        let data_start = data_region_start(block_size) as usize;
        let volume_len = data_start + self.num_blocks as usize * bs;
        let mut image = vec![0_u8; self.volume_offset + volume_len];
        let volume = &mut image[self.volume_offset..];

        volume[0..4].copy_from_slice(&QNX6_BOOT_MAGIC);
        volume[8..12].copy_from_slice(&self.sblk[0].to_le_bytes());
        volume[12..16].copy_from_slice(&self.sblk[1].to_le_bytes());

        for copy in 0..2 {
            sb.serial = self.serials[copy];
            let mut raw = encode_superblock(&sb);
            if self.corrupt[copy] {
                raw[0x100] ^= 0xFF;
            }
            let at = self.sblk[copy] as usize * 512;
            ensure!(
                at + QNX6_SUPERBLOCK_SIZE <= data_start,
                "superblock copy {copy} overlaps the data region"
            );
            volume[at..at + QNX6_SUPERBLOCK_SIZE].copy_from_slice(&raw);
        }

        for (blk, data) in &self.blocks {
            let at = data_start + *blk as usize * bs;
            volume[at..at + bs].copy_from_slice(data);
        }
        Ok(image)
    }
}

// ── Shared sample volume ────────────────────────────────────────────────────

/// Inode numbers and contents of [`sample_volume`].
pub mod sample {
    pub const BLOCK_SIZE: u32 = 1024;
    pub const NUM_BLOCKS: u32 = 256;
    pub const NUM_INODES: u32 = 32;

    pub const ROOT: u32 = 1;
    pub const HELLO: u32 = 2;
    pub const DOCS: u32 = 3;
    pub const BIG: u32 = 4;
    pub const SPARSE: u32 = 5;
    pub const LINK: u32 = 6;
    pub const LONG: u32 = 7;
    pub const ORPHAN: u32 = 8;

    pub const HELLO_TEXT: &[u8] = b"hello, qnx6\n";
    pub const LONG_NAME: &str = "a-rather-long-file-name-kept-in-the-long-name-table.txt";
    /// 20 blocks forces one level of indirection.
    pub const BIG_LEN: usize = 20 * BLOCK_SIZE as usize - 100;
    pub const SPARSE_LEN: u64 = 4 * BLOCK_SIZE as u64;

    #[must_use]
    pub fn big_content() -> Vec<u8> {
        (0..BIG_LEN).map(|i| (i % 253) as u8).collect()
    }
}

/// Build the shared sample tree:
///
/// ```text
/// /            (1)
/// ├── hello.txt   (2)
/// ├── docs/       (3)
/// │   └── <LONG_NAME> (7)
/// ├── big.bin     (4, level 1)
/// ├── sparse.dat  (5, blocks 1-2 are holes)
/// └── link -> hello.txt (6)
/// inode 8 is allocated but unnamed (orphan)
/// ```
pub fn sample_volume() -> Result<Vec<u8>> {
    use sample::*;

    let mut b = Qnx6ImageBuilder::new(BLOCK_SIZE, NUM_BLOCKS)
        .with_inode_count(NUM_INODES)
        .with_serials(3, 2);

    b.add_dir(
        ROOT,
        &[
            DirSpec::new(".", ROOT),
            DirSpec::new("..", ROOT),
            DirSpec::new("hello.txt", HELLO),
            DirSpec::new("", 0),
            DirSpec::new("docs", DOCS),
            DirSpec::new("big.bin", BIG),
            DirSpec::new("sparse.dat", SPARSE),
            DirSpec::new("link", LINK),
        ],
    )?;
    b.add_file(HELLO, S_IFREG | 0o644, HELLO_TEXT)?;
    b.add_dir(
        DOCS,
        &[
            DirSpec::new(".", DOCS),
            DirSpec::new("..", ROOT),
            DirSpec::new(LONG_NAME, LONG),
        ],
    )?;
    b.add_file(BIG, S_IFREG | 0o600, &big_content())?;
    let bs = BLOCK_SIZE as usize;
    b.add_sparse_file(
        SPARSE,
        S_IFREG | 0o644,
        &[Some(vec![b'A'; bs]), None, None, Some(vec![b'D'; bs])],
        SPARSE_LEN,
        None,
    )?;
    b.add_file(LINK, S_IFLNK | 0o777, b"hello.txt")?;
    b.add_file(LONG, S_IFREG | 0o644, b"long name payload")?;
    b.add_file(ORPHAN, S_IFREG | 0o644, b"nobody links to me")?;
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_superblock_round_trips_through_parser() {
        let image = sample_volume().expect("sample");
        let sb_at = DEFAULT_SBLK[0] as usize * 512;
        let raw = &image[sb_at..sb_at + QNX6_SUPERBLOCK_SIZE];
        let sb = Qnx6Superblock::parse_superblock_region(raw).expect("parse");
        sb.validate_checksum(raw).expect("crc");
        assert_eq!(sb.serial, 3);
        assert_eq!(sb.block_size, sample::BLOCK_SIZE);
        assert_eq!(sb.num_inodes, sample::NUM_INODES);
    }

    #[test]
    fn level_selection_tracks_fanout() {
        let b = Qnx6ImageBuilder::new(1024, 64);
        assert_eq!(b.level_for(0), 0);
        assert_eq!(b.level_for(16), 0);
        assert_eq!(b.level_for(17), 1);
        assert_eq!(b.level_for(16 * 256), 1);
        assert_eq!(b.level_for(16 * 256 + 1), 2);
    }

    #[test]
    fn indirect_object_allocates_data_before_pointers() {
        let mut b = Qnx6ImageBuilder::new(512, 64);
        let blocks: Vec<_> = (0..3_u8).map(|i| Some(vec![i; 512])).collect();
        let root = b.write_object(&blocks, 1536, Some(1)).expect("object");
        assert_eq!(root.level, 1);
        assert_eq!(root.ptr[0], 3);
        assert_eq!(root.ptr[1], QNX6_UNUSED_PTR);
    }

    #[test]
    fn full_volume_is_reported() {
        let mut b = Qnx6ImageBuilder::new(512, 2);
        b.alloc_block(vec![1]).expect("first");
        b.alloc_block(vec![2]).expect("second");
        assert!(b.alloc_block(vec![3]).is_err());
    }

    #[test]
    fn volume_offset_shifts_everything() {
        let image = Qnx6ImageBuilder::new(512, 16)
            .with_volume_offset(4096)
            .build()
            .expect("build");
        assert_eq!(image[4096..4100], QNX6_BOOT_MAGIC);
        assert_eq!(image[4096 + 0x1000..4096 + 0x1004], QNX6_SUPER_MAGIC);
    }
}
