//! Block and inode walk drivers.
//!
//! Both walks visit addresses in strictly ascending order, apply the
//! caller's allocation filter and hand each survivor to a callback that
//! decides whether to go on.

use crate::QnxFs;
use crate::file::QnxFile;
use crate::mapping::read_object;
use qfs_block::BlockDevice;
use qfs_error::{QfsError, Result};
use qfs_ondisk::{Qnx6RootNode, unit_bytes};
use qfs_types::{BlockNumber, InodeNumber, QNX6_PTR_SIZE, QNX6_UNUSED_PTR, read_le_u32};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// What a walk callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    /// End the walk successfully.
    Stop,
    /// End the walk with [`QfsError::WalkAborted`].
    Error,
}

// ── Flag sets ───────────────────────────────────────────────────────────────

fn describe_flags(bits: u32, known: &[(u32, &'static str)]) -> Vec<&'static str> {
    known
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

macro_rules! flag_set {
    ($name:ident) => {
        impl $name {
            pub const NONE: Self = Self(0);

            #[must_use]
            pub fn bits(self) -> u32 {
                self.0
            }

            #[must_use]
            pub fn contains(self, flag: Self) -> bool {
                (self.0 & flag.0) != 0
            }

            #[must_use]
            pub fn describe(self) -> Vec<&'static str> {
                describe_flags(self.0, Self::KNOWN)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.describe().join("|"))
            }
        }
    };
}

/// Block walk request flags. Neither ALLOC nor UNALLOC means both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockWalkFlags(pub u32);

impl BlockWalkFlags {
    pub const ALLOC: Self = Self(0x01);
    pub const UNALLOC: Self = Self(0x02);
    /// Report addresses only; block contents are not read.
    pub const AONLY: Self = Self(0x04);

    const KNOWN: &[(u32, &'static str)] = &[(0x01, "ALLOC"), (0x02, "UNALLOC"), (0x04, "AONLY")];
}

flag_set!(BlockWalkFlags);

/// Per-block flags handed to the block walk callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockFlags(pub u32);

impl BlockFlags {
    pub const ALLOC: Self = Self(0x01);
    pub const UNALLOC: Self = Self(0x02);
    /// File content (anything that is not filesystem metadata).
    pub const CONT: Self = Self(0x04);
    /// Backs the inode table, bitmap or long-name table.
    pub const META: Self = Self(0x08);
    /// `data` carries the raw block.
    pub const RAW: Self = Self(0x10);
    pub const AONLY: Self = Self(0x20);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x01, "ALLOC"),
        (0x02, "UNALLOC"),
        (0x04, "CONT"),
        (0x08, "META"),
        (0x10, "RAW"),
        (0x20, "AONLY"),
    ];
}

flag_set!(BlockFlags);

/// Inode walk request flags. Neither ALLOC nor UNALLOC means both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InodeWalkFlags(pub u32);

impl InodeWalkFlags {
    pub const ALLOC: Self = Self(0x01);
    pub const UNALLOC: Self = Self(0x02);

    const KNOWN: &[(u32, &'static str)] = &[(0x01, "ALLOC"), (0x02, "UNALLOC")];
}

flag_set!(InodeWalkFlags);

fn wants(alloc_flag: bool, unalloc_flag: bool, allocated: bool) -> bool {
    if !alloc_flag && !unalloc_flag {
        return true;
    }
    if allocated { alloc_flag } else { unalloc_flag }
}

/// One block as seen by the walk callback.
#[derive(Debug, Clone, Copy)]
pub struct WalkBlock<'a> {
    pub addr: BlockNumber,
    pub flags: BlockFlags,
    /// Block contents, absent in address-only walks.
    pub data: Option<&'a [u8]>,
}

// ── Allocation and metadata maps ────────────────────────────────────────────

/// Allocation bitmap, LSB-first: bit `i` of the object is block `i`.
struct AllocationMap {
    bits: Option<Vec<u8>>,
}

impl AllocationMap {
    fn load(dev: &dyn BlockDevice, bitmap: &Qnx6RootNode) -> Self {
        if bitmap.size == 0 {
            debug!("bitmap_absent");
            return Self { bits: None };
        }
        match read_object(dev, bitmap, 0, usize::MAX) {
            Ok(bits) => Self { bits: Some(bits) },
            Err(err) => {
                warn!(error = %err, "bitmap_unreadable");
                Self { bits: None }
            }
        }
    }

    /// Blocks outside a readable bitmap count as allocated.
    fn is_allocated(&self, block: u64) -> bool {
        let Some(bits) = &self.bits else {
            return true;
        };
        let Some(byte) = usize::try_from(block / 8).ok().and_then(|i| bits.get(i)) else {
            return true;
        };
        byte & (1 << (block % 8)) != 0
    }
}

/// Data and indirection blocks of an object, limited to its declared size.
fn collect_object_blocks(dev: &dyn BlockDevice, root: &Qnx6RootNode, out: &mut BTreeSet<u64>) {
    let bs = dev.block_size();
    let Some(top_unit) = unit_bytes(bs, u32::from(root.level)) else {
        return;
    };
    for (slot, ptr) in root.used_pointers() {
        let base = (slot as u64).saturating_mul(top_unit);
        collect_subtree(dev, ptr, u32::from(root.level), base, root.size, out);
    }
}

fn collect_subtree(
    dev: &dyn BlockDevice,
    ptr: u32,
    level: u32,
    base: u64,
    size: u64,
    out: &mut BTreeSet<u64>,
) {
    if ptr == QNX6_UNUSED_PTR || base >= size {
        return;
    }
    // A block already collected has had its subtree collected too.
    if !out.insert(u64::from(ptr)) || level == 0 {
        return;
    }
    let Some(child_unit) = unit_bytes(dev.block_size(), level - 1) else {
        return;
    };
    let block = match dev.read_block(BlockNumber(u64::from(ptr))) {
        Ok(block) => block,
        Err(err) => {
            debug!(block = ptr, error = %err, "meta_indirect_unreadable");
            return;
        }
    };
    let fanout = block.as_slice().len() / QNX6_PTR_SIZE;
    for index in 0..fanout {
        let Ok(child) = read_le_u32(block.as_slice(), index * QNX6_PTR_SIZE) else {
            break;
        };
        let child_base = base.saturating_add((index as u64).saturating_mul(child_unit));
        if child_base >= size {
            break;
        }
        collect_subtree(dev, child, level - 1, child_base, size, out);
    }
}

// ── Walks ───────────────────────────────────────────────────────────────────

impl QnxFs {
    /// Blocks backing the inode table, bitmap and long-name table.
    #[must_use]
    pub fn metadata_blocks(&self) -> BTreeSet<u64> {
        let sb = self.superblock();
        let mut out = BTreeSet::new();
        for root in [&sb.inode_tree, &sb.bitmap, &sb.long_names] {
            collect_object_blocks(self.store(), root, &mut out);
        }
        out
    }

    /// Bitmap view of a single block; missing bitmap data means allocated.
    #[must_use]
    pub fn is_block_allocated(&self, block: BlockNumber) -> bool {
        AllocationMap::load(self.store(), &self.superblock().bitmap).is_allocated(block.0)
    }

    /// Visit blocks `start..=end`.
    ///
    /// `end` is clamped to the last block; a range that starts past it is
    /// empty. `start > end` is rejected. Unless `AONLY` is requested each
    /// visited block is read, and a failed read ends the walk with that
    /// error.
    pub fn block_walk<F>(
        &self,
        start: BlockNumber,
        end: BlockNumber,
        flags: BlockWalkFlags,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(&WalkBlock<'_>) -> WalkAction,
    {
        if start > end {
            return Err(QfsError::InvalidParameter(format!(
                "block walk start {start} is past end {end}"
            )));
        }
        let Some(last) = self.geometry().last_block() else {
            return Ok(());
        };
        let end = end.min(last);
        if start > end {
            debug!(start = start.0, last = last.0, "block_walk_empty_range");
            return Ok(());
        }

        let alloc = AllocationMap::load(self.store(), &self.superblock().bitmap);
        let meta = self.metadata_blocks();
        let want_alloc = flags.contains(BlockWalkFlags::ALLOC);
        let want_unalloc = flags.contains(BlockWalkFlags::UNALLOC);
        let addr_only = flags.contains(BlockWalkFlags::AONLY);
        debug!(start = start.0, end = end.0, %flags, "block_walk_start");

        for addr in start.0..=end.0 {
            let allocated = alloc.is_allocated(addr);
            if !wants(want_alloc, want_unalloc, allocated) {
                continue;
            }
            let state = if allocated {
                BlockFlags::ALLOC
            } else {
                BlockFlags::UNALLOC
            };
            let role = if meta.contains(&addr) {
                BlockFlags::META
            } else {
                BlockFlags::CONT
            };
            let mut block_flags = state | role;

            let buf;
            let data = if addr_only {
                block_flags = block_flags | BlockFlags::AONLY;
                None
            } else {
                buf = self.store().read_block(BlockNumber(addr))?;
                block_flags = block_flags | BlockFlags::RAW;
                Some(buf.as_slice())
            };

            let block = WalkBlock {
                addr: BlockNumber(addr),
                flags: block_flags,
                data,
            };
            match callback(&block) {
                WalkAction::Continue => {}
                WalkAction::Stop => {
                    trace!(addr, "block_walk_stopped");
                    return Ok(());
                }
                WalkAction::Error => return Err(QfsError::WalkAborted { address: addr }),
            }
        }
        Ok(())
    }

    /// Visit inodes `start..=end`, clamped to `[1, inode_count]`.
    ///
    /// Inodes that cannot be read are skipped.
    pub fn inode_walk<F>(
        &self,
        start: InodeNumber,
        end: InodeNumber,
        flags: InodeWalkFlags,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(&QnxFile<'_>) -> WalkAction,
    {
        if start > end {
            return Err(QfsError::InvalidParameter(format!(
                "inode walk start {start} is past end {end}"
            )));
        }
        let first = start.0.max(self.first_inode().0);
        let last = end.0.min(self.last_inode().0);
        let want_alloc = flags.contains(InodeWalkFlags::ALLOC);
        let want_unalloc = flags.contains(InodeWalkFlags::UNALLOC);
        debug!(first, last, %flags, "inode_walk_start");

        for ino in first..=last {
            let file = match self.open_file(InodeNumber(ino)) {
                Ok(file) => file,
                Err(err) => {
                    debug!(ino, error = %err, "inode_walk_skip");
                    continue;
                }
            };
            if !wants(want_alloc, want_unalloc, file.is_allocated()) {
                continue;
            }
            match callback(&file) {
                WalkAction::Continue => {}
                WalkAction::Stop => return Ok(()),
                WalkAction::Error => return Err(QfsError::WalkAborted { address: ino }),
            }
        }
        Ok(())
    }
}
