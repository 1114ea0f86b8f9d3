//! Indirect-block address translation and the logical object reader.

use qfs_block::BlockDevice;
use qfs_error::{QfsError, Result};
use qfs_ondisk::{Qnx6RootNode, unit_bytes};
use qfs_types::{BlockNumber, QNX6_PTR_COUNT, QNX6_PTR_SIZE, QNX6_UNUSED_PTR, read_le_u32};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of translating a logical byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMapping {
    Mapped(BlockNumber),
    /// Hole, unused pointer, or unreadable indirection.
    Unmapped,
}

impl BlockMapping {
    #[must_use]
    pub fn block(self) -> Option<BlockNumber> {
        match self {
            Self::Mapped(block) => Some(block),
            Self::Unmapped => None,
        }
    }
}

/// Map `offset` within an object to the data block that holds it.
///
/// Walks `level` layers of indirection below the 16 root pointers. Never
/// fails: unused pointers, out-of-range slots and unreadable indirection
/// blocks all come back as [`BlockMapping::Unmapped`].
pub fn translate(
    dev: &dyn BlockDevice,
    ptrs: &[u32; QNX6_PTR_COUNT],
    level: u8,
    offset: u64,
) -> BlockMapping {
    let bs = dev.block_size();
    let Some(top_unit) = unit_bytes(bs, u32::from(level)) else {
        debug!(level, offset, "translate_level_overflow");
        return BlockMapping::Unmapped;
    };

    let slot = offset / top_unit;
    if slot >= QNX6_PTR_COUNT as u64 {
        return BlockMapping::Unmapped;
    }
    let mut ptr = ptrs[slot as usize];
    let mut rem = offset % top_unit;

    for depth in (0..u32::from(level)).rev() {
        if ptr == QNX6_UNUSED_PTR {
            return BlockMapping::Unmapped;
        }
        // depth < level, so this cannot overflow where top_unit did not.
        let Some(unit) = unit_bytes(bs, depth) else {
            return BlockMapping::Unmapped;
        };
        let index = rem / unit;
        rem %= unit;

        let indirect = match dev.read_block(BlockNumber(u64::from(ptr))) {
            Ok(block) => block,
            Err(err) => {
                debug!(block = ptr, depth, error = %err, "translate_indirect_unreadable");
                return BlockMapping::Unmapped;
            }
        };
        let Ok(index) = usize::try_from(index) else {
            return BlockMapping::Unmapped;
        };
        match read_le_u32(indirect.as_slice(), index * QNX6_PTR_SIZE) {
            Ok(next) => ptr = next,
            Err(_) => return BlockMapping::Unmapped,
        }
    }

    if ptr == QNX6_UNUSED_PTR {
        BlockMapping::Unmapped
    } else {
        BlockMapping::Mapped(BlockNumber(u64::from(ptr)))
    }
}

/// Read up to `len` bytes of a block-mapped object starting at `offset`.
///
/// The result is clamped to the object size and is empty when `offset` is
/// at or past the end. Unmapped ranges read as zeros; a mapped block that
/// cannot be read is an error.
pub fn read_object(
    dev: &dyn BlockDevice,
    root: &Qnx6RootNode,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    if offset >= root.size {
        return Ok(Vec::new());
    }
    let available = root.size - offset;
    let want = usize::try_from(available).map_or(len, |avail| avail.min(len));

    let mut out = Vec::new();
    out.try_reserve_exact(want).map_err(|_| {
        QfsError::ResourceExhaustion(format!("cannot buffer {want} bytes of object data"))
    })?;

    let bs = dev.block_size().as_u64();
    let mut pos = offset;
    while out.len() < want {
        // Bounded by the block size, which fits usize.
        let in_block = (pos % bs) as usize;
        let chunk = (bs as usize - in_block).min(want - out.len());
        match translate(dev, &root.ptr, root.level, pos) {
            BlockMapping::Unmapped => out.resize(out.len() + chunk, 0),
            BlockMapping::Mapped(block) => {
                let data = dev.read_block(block)?;
                out.extend_from_slice(&data.as_slice()[in_block..in_block + chunk]);
            }
        }
        pos += chunk as u64;
    }
    Ok(out)
}
