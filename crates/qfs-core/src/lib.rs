#![forbid(unsafe_code)]
//! Read-only QNX6 engine.
//!
//! [`QnxFs`] mounts a volume from any [`ByteDevice`]: it resolves the
//! authoritative superblock, caches the derived geometry and exposes the
//! traversal primitives (inode reads, directory opens, run lists, block and
//! inode walks) that listing and extraction tools build on.
//!
//! ```ignore
//! let fs = QnxFs::open("/evidence/qnx.img")?;
//! let root = fs.open_directory(InodeNumber::ROOT)?;
//! for entry in root.iter() {
//!     println!("{} -> {}", entry.name_str(), entry.ino);
//! }
//! ```

mod dir;
mod file;
mod mapping;
mod orphan;
mod report;
mod resolve;
mod runlist;
mod walk;

pub use dir::{DirEntry, DirOptions, Directory, NameType};
pub use file::{FileMeta, QnxFile};
pub use mapping::{BlockMapping, read_object, translate};
pub use report::{FsStat, RootNodeSummary};
pub use resolve::{
    CandidateVerdict, SuperblockCandidate, SuperblockResolution, resolve_superblock,
};
pub use runlist::{Run, RunFlags, RunList, Segment, build_run_list};
pub use walk::{BlockFlags, BlockWalkFlags, InodeWalkFlags, WalkAction, WalkBlock};

pub use qfs_ondisk::{Qnx6FileType, Qnx6Inode, Qnx6RootNode, Qnx6Superblock};
pub use qfs_types::{BlockNumber, BlockSize, ByteOffset, InodeNumber};

use parking_lot::Mutex;
use qfs_block::{ByteDevice, DataRegionDevice, FileByteDevice};
use qfs_error::{QfsError, Result};
use qfs_ondisk::data_region_start;
use qfs_types::{ParseError, QNX6_INODE_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Filesystem type requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FsType {
    /// Accept the volume if it looks like QNX6.
    #[default]
    Detect,
    Qnx6,
}

impl FromStr for FsType {
    type Err = QfsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "detect" | "auto" => Ok(Self::Detect),
            "qnx6" | "qnx6fs" => Ok(Self::Qnx6),
            other => Err(QfsError::UnknownType(format!(
                "requested type {other:?} is not handled by this driver"
            ))),
        }
    }
}

/// Options controlling how a volume is mounted.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Byte offset of the volume inside the image (partition start).
    pub volume_offset: u64,
    pub fs_type: FsType,
}

/// Geometry derived from the authoritative superblock, computed once at mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qnx6Geometry {
    pub block_size: BlockSize,
    pub block_count: u64,
    pub inode_count: u64,
    /// Offset of block 0 relative to the volume start.
    pub data_start: u64,
    pub volume_offset: u64,
}

impl Qnx6Geometry {
    #[must_use]
    pub fn last_block(&self) -> Option<BlockNumber> {
        self.block_count.checked_sub(1).map(BlockNumber)
    }
}

/// A mounted QNX6 volume.
///
/// Immutable after mount apart from two caches (named inodes and the orphan
/// directory), each behind its own lock that is never held across a read.
pub struct QnxFs {
    store: DataRegionDevice<Arc<dyn ByteDevice>>,
    geometry: Qnx6Geometry,
    superblock: Qnx6Superblock,
    resolution: SuperblockResolution,
    named: Mutex<Option<Arc<BTreeSet<InodeNumber>>>>,
    orphans: Mutex<Option<Arc<Directory>>>,
}

impl std::fmt::Debug for QnxFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QnxFs")
            .field("geometry", &self.geometry)
            .field("serial", &self.superblock.serial)
            .field("dev_len", &self.store.inner().len_bytes())
            .finish_non_exhaustive()
    }
}

impl QnxFs {
    /// Open an image file with the volume at offset 0.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &OpenOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(Arc::new(dev), options)
    }

    /// Mount a volume from an already-opened device.
    pub fn from_device(dev: Arc<dyn ByteDevice>, options: &OpenOptions) -> Result<Self> {
        let volume_offset = ByteOffset(options.volume_offset);
        debug!(offset = volume_offset.0, fs_type = ?options.fs_type, "qnx6_mount_start");
        let (superblock, resolution) = resolve_superblock(&*dev, volume_offset)?;

        let block_size = superblock.block_size().map_err(|_| {
            QfsError::InvalidParameter(format!(
                "superblock block size {} is not a non-zero multiple of 512",
                superblock.block_size
            ))
        })?;
        let data_start = data_region_start(block_size);
        let base = volume_offset.checked_add(data_start).ok_or_else(|| {
            QfsError::InvalidParameter("volume offset overflows the data region".to_owned())
        })?;

        let geometry = Qnx6Geometry {
            block_size,
            block_count: u64::from(superblock.num_blocks),
            inode_count: u64::from(superblock.num_inodes),
            data_start,
            volume_offset: volume_offset.0,
        };
        info!(
            block_size = block_size.get(),
            blocks = geometry.block_count,
            inodes = geometry.inode_count,
            serial = superblock.serial,
            "qnx6_mounted"
        );

        Ok(Self {
            store: DataRegionDevice::new(dev, base, block_size, geometry.block_count),
            geometry,
            superblock,
            resolution,
            named: Mutex::new(None),
            orphans: Mutex::new(None),
        })
    }

    /// Test-mode mount: `None` instead of an error when the volume is not a
    /// readable QNX6 filesystem.
    #[must_use]
    pub fn probe(dev: Arc<dyn ByteDevice>, options: &OpenOptions) -> Option<Self> {
        match Self::from_device(dev, options) {
            Ok(fs) => Some(fs),
            Err(err) => {
                debug!(error = %err, offset = options.volume_offset, "qnx6_probe_rejected");
                None
            }
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &Qnx6Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn superblock(&self) -> &Qnx6Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn resolution(&self) -> &SuperblockResolution {
        &self.resolution
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.geometry.block_size
    }

    /// The block store (data region) backing this volume.
    #[must_use]
    pub fn store(&self) -> &DataRegionDevice<Arc<dyn ByteDevice>> {
        &self.store
    }

    #[must_use]
    pub fn first_inode(&self) -> InodeNumber {
        InodeNumber::ROOT
    }

    #[must_use]
    pub fn last_inode(&self) -> InodeNumber {
        InodeNumber(self.geometry.inode_count)
    }

    fn check_inode(&self, ino: InodeNumber) -> Result<()> {
        if ino.0 == 0 || ino.0 > self.geometry.inode_count {
            return Err(QfsError::InvalidAddress {
                kind: "inode",
                value: ino.0,
                first: 1,
                last: self.geometry.inode_count,
            });
        }
        Ok(())
    }

    /// Decode the 128-byte inode record for `ino` (1-based).
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Qnx6Inode> {
        self.check_inode(ino)?;
        let offset = (ino.0 - 1) * QNX6_INODE_SIZE as u64;
        let table = &self.superblock.inode_tree;
        let raw = read_object(&self.store, table, offset, QNX6_INODE_SIZE)?;
        if raw.len() < QNX6_INODE_SIZE {
            let block = translate(&self.store, &table.ptr, table.level, offset)
                .block()
                .map_or(0, |b| b.0);
            return Err(QfsError::Corruption {
                block,
                detail: format!(
                    "inode {ino}: table holds {} of {QNX6_INODE_SIZE} bytes",
                    raw.len()
                ),
            });
        }
        Qnx6Inode::parse_from_bytes(&raw).map_err(|e| parse_error_to_qfs(&e))
    }

    /// Read up to `len` bytes of an inode's content starting at `offset`.
    pub fn read_file(&self, ino: InodeNumber, offset: u64, len: usize) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        read_object(&self.store, &inode.root_node(), offset, len)
    }

    /// Resolve an absolute `/`-separated path from the root directory.
    pub fn resolve_path(&self, path: &str) -> Result<InodeNumber> {
        let mut current = InodeNumber::ROOT;
        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            let dir = self.open_directory_with(current, &DirOptions { classify: false })?;
            current = dir
                .find(component.as_bytes())
                .map(|entry| entry.ino)
                .ok_or_else(|| QfsError::NotFound(path.to_owned()))?;
        }
        Ok(current)
    }
}

/// Convert a `ParseError` into a `QfsError`.
///
/// This is the crate-boundary conversion described in the `qfs-error`
/// taxonomy.
pub(crate) fn parse_error_to_qfs(e: &ParseError) -> QfsError {
    match e {
        ParseError::InvalidMagic { .. } => QfsError::UnknownType(e.to_string()),
        ParseError::InvalidField { field, reason } if field.contains("block_size") => {
            QfsError::InvalidParameter(format!("{field}: {reason}"))
        }
        ParseError::InvalidField { .. }
        | ParseError::InsufficientData { .. }
        | ParseError::IntegerConversion { .. } => QfsError::Corruption {
            block: 0,
            detail: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfs_harness::{Qnx6ImageBuilder, sample, sample_volume};
    use qfs_types::S_IFREG;

    pub(crate) fn mount(image: Vec<u8>) -> QnxFs {
        let dev: Arc<dyn ByteDevice> = Arc::new(qfs_block::MemoryByteDevice::new(image));
        QnxFs::from_device(dev, &OpenOptions::default()).expect("mount")
    }

    pub(crate) fn sample_fs() -> QnxFs {
        mount(sample_volume().expect("sample volume"))
    }

    #[test]
    fn mount_caches_geometry() {
        let fs = sample_fs();
        let geo = fs.geometry();
        assert_eq!(geo.block_size.get(), sample::BLOCK_SIZE);
        assert_eq!(geo.block_count, u64::from(sample::NUM_BLOCKS));
        assert_eq!(geo.inode_count, u64::from(sample::NUM_INODES));
        assert_eq!(geo.data_start, 0x3000);
        assert_eq!(fs.last_inode(), InodeNumber(32));
        assert_eq!(fs.superblock().serial, 3);
    }

    #[test]
    fn read_inode_bounds() {
        let fs = sample_fs();
        let root = fs.read_inode(InodeNumber::ROOT).expect("root");
        assert!(root.is_dir());

        for bad in [0_u64, 33, u64::MAX] {
            let err = fs.read_inode(InodeNumber(bad)).unwrap_err();
            assert!(
                matches!(err, QfsError::InvalidAddress { kind: "inode", .. }),
                "inode {bad}: {err:?}"
            );
        }
        let last = fs.read_inode(fs.last_inode()).expect("last inode");
        assert!(!last.is_allocated());
    }

    #[test]
    fn inode_table_shorter_than_count_is_corruption() {
        let mut b = Qnx6ImageBuilder::new(512, 64).with_inode_count(8);
        b.add_file(1, S_IFREG | 0o644, b"x").expect("file");
        let mut image = b.build().expect("build");
        // Claim 64 inodes while the table only covers 8.
        for at in [0x1000_usize, 0x2000] {
            image[at + 0x34..at + 0x38].copy_from_slice(&64_u32.to_le_bytes());
            let crc = qfs_ondisk::qnx6_crc32(&image[at + 8..at + 512]);
            image[at + 4..at + 8].copy_from_slice(&crc.to_le_bytes());
        }
        let fs = mount(image);
        assert!(fs.read_inode(InodeNumber(8)).is_ok());
        assert!(matches!(
            fs.read_inode(InodeNumber(9)).unwrap_err(),
            QfsError::Corruption { .. }
        ));
    }

    #[test]
    fn read_file_spans_indirect_blocks() {
        let fs = sample_fs();
        let content = sample::big_content();
        let all = fs
            .read_file(InodeNumber(u64::from(sample::BIG)), 0, usize::MAX)
            .expect("read");
        assert_eq!(all, content);

        let mid = fs
            .read_file(InodeNumber(u64::from(sample::BIG)), 1000, 3000)
            .expect("slice");
        assert_eq!(mid, &content[1000..4000]);

        let past = fs
            .read_file(InodeNumber(u64::from(sample::BIG)), content.len() as u64, 10)
            .expect("eof");
        assert!(past.is_empty());
    }

    #[test]
    fn resolve_path_walks_components() {
        let fs = sample_fs();
        let long = format!("/docs/{}", sample::LONG_NAME);
        assert_eq!(
            fs.resolve_path(&long).expect("long"),
            InodeNumber(u64::from(sample::LONG))
        );
        assert_eq!(fs.resolve_path("/").expect("root"), InodeNumber::ROOT);
        assert!(matches!(
            fs.resolve_path("/missing").unwrap_err(),
            QfsError::NotFound(_)
        ));
    }

    #[test]
    fn fs_type_parsing() {
        assert_eq!("QNX6".parse::<FsType>().expect("qnx6"), FsType::Qnx6);
        assert_eq!("auto".parse::<FsType>().expect("auto"), FsType::Detect);
        assert!(matches!(
            "ext4".parse::<FsType>().unwrap_err(),
            QfsError::UnknownType(_)
        ));
    }

    #[test]
    fn parse_error_mapping() {
        let magic = ParseError::InvalidMagic {
            expected: 1,
            actual: 2,
        };
        assert!(matches!(parse_error_to_qfs(&magic), QfsError::UnknownType(_)));
        let bs = ParseError::InvalidField {
            field: "block_size",
            reason: "zero",
        };
        assert!(matches!(parse_error_to_qfs(&bs), QfsError::InvalidParameter(_)));
        let short = ParseError::InsufficientData {
            needed: 128,
            offset: 0,
            actual: 3,
        };
        assert!(matches!(parse_error_to_qfs(&short), QfsError::Corruption { .. }));
    }
}
