//! Run-list (extent) construction for files.

use qfs_block::BlockDevice;
use qfs_error::{QfsError, Result};
use qfs_ondisk::{Qnx6RootNode, unit_bytes};
use qfs_types::{BlockNumber, QNX6_PTR_SIZE, QNX6_UNUSED_PTR, read_le_u32, round_up};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Per-run flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunFlags(pub u8);

impl RunFlags {
    pub const NONE: Self = Self(0);
    /// No physical storage; reads as zeros.
    pub const SPARSE: Self = Self(0x01);

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }
}

/// A contiguous logical range backed by contiguous physical blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub logical_block: u64,
    pub physical_block: u64,
    pub length: u64,
    pub flags: RunFlags,
}

impl Run {
    #[must_use]
    pub fn logical_end(&self) -> u64 {
        self.logical_block + self.length
    }
}

/// Either a stored run or a hole between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Data(Run),
    Hole { logical_block: u64, length: u64 },
}

/// The default data attribute of a file.
///
/// Holes are not stored: they are the gaps between `runs`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunList {
    pub runs: Vec<Run>,
    pub total_size: u64,
    pub allocated_size: u64,
}

impl RunList {
    /// Physical blocks covered by all runs.
    #[must_use]
    pub fn mapped_blocks(&self) -> u64 {
        self.runs.iter().map(|r| r.length).sum()
    }

    /// Runs interleaved with explicit holes, covering the full logical range.
    #[must_use]
    pub fn segments(&self, block_size: u64) -> Vec<Segment> {
        let total_blocks = self.allocated_size / block_size.max(1);
        let mut out = Vec::with_capacity(self.runs.len() * 2 + 1);
        let mut cursor = 0;
        for run in &self.runs {
            if run.logical_block > cursor {
                out.push(Segment::Hole {
                    logical_block: cursor,
                    length: run.logical_block - cursor,
                });
            }
            out.push(Segment::Data(*run));
            cursor = run.logical_end();
        }
        if total_blocks > cursor {
            out.push(Segment::Hole {
                logical_block: cursor,
                length: total_blocks - cursor,
            });
        }
        out
    }
}

/// Build the coalesced run list for an object.
///
/// Descends the pointer tree in logical order, skipping every unused pointer
/// together with the whole range below it. A mapped block extends the current
/// run only when both its logical and physical block follow on directly.
/// Allocation failure yields `ResourceExhaustion` and no partial list.
pub fn build_run_list(dev: &dyn BlockDevice, root: &Qnx6RootNode) -> Result<RunList> {
    let bs = dev.block_size();
    let allocated_size = round_up(root.size, bs.as_u64()).ok_or_else(|| QfsError::Corruption {
        block: 0,
        detail: format!("object size {} overflows when rounded to blocks", root.size),
    })?;

    let mut builder = RunBuilder {
        dev,
        size: root.size,
        runs: Vec::new(),
    };
    let level = u32::from(root.level);
    if let Some(top_unit) = unit_bytes(bs, level) {
        for (slot, &ptr) in root.ptr.iter().enumerate() {
            let Some(base) = (slot as u64).checked_mul(top_unit) else {
                break;
            };
            if base >= root.size {
                break;
            }
            builder.descend(ptr, level, base)?;
        }
    }

    let runs = builder.runs;
    trace!(size = root.size, runs = runs.len(), "run_list_built");
    Ok(RunList {
        runs,
        total_size: root.size,
        allocated_size,
    })
}

struct RunBuilder<'a> {
    dev: &'a dyn BlockDevice,
    size: u64,
    runs: Vec<Run>,
}

impl RunBuilder<'_> {
    /// Collect the data blocks under `ptr`, whose range starts at byte `base`.
    fn descend(&mut self, ptr: u32, level: u32, base: u64) -> Result<()> {
        if ptr == QNX6_UNUSED_PTR || base >= self.size {
            return Ok(());
        }
        let bs = self.dev.block_size();
        if level == 0 {
            return self.push_block(base / bs.as_u64(), u64::from(ptr));
        }
        let Some(child_unit) = unit_bytes(bs, level - 1) else {
            return Ok(());
        };
        let block = match self.dev.read_block(BlockNumber(u64::from(ptr))) {
            Ok(block) => block,
            Err(err) => {
                debug!(block = ptr, level, error = %err, "run_list_indirect_unreadable");
                return Ok(());
            }
        };
        let fanout = block.as_slice().len() / QNX6_PTR_SIZE;
        for index in 0..fanout {
            let Some(child_base) = (index as u64)
                .checked_mul(child_unit)
                .and_then(|delta| base.checked_add(delta))
            else {
                break;
            };
            if child_base >= self.size {
                break;
            }
            let Ok(child) = read_le_u32(block.as_slice(), index * QNX6_PTR_SIZE) else {
                break;
            };
            self.descend(child, level - 1, child_base)?;
        }
        Ok(())
    }

    fn push_block(&mut self, logical: u64, physical: u64) -> Result<()> {
        if let Some(last) = self.runs.last_mut() {
            if last.logical_end() == logical && last.physical_block + last.length == physical {
                last.length += 1;
                return Ok(());
            }
        }
        self.runs.try_reserve(1).map_err(|_| {
            QfsError::ResourceExhaustion(format!("run list for {} byte object", self.size))
        })?;
        self.runs.push(Run {
            logical_block: logical,
            physical_block: physical,
            length: 1,
            flags: RunFlags::NONE,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::translate;
    use crate::tests::mount;
    use proptest::prelude::*;
    use qfs_harness::Qnx6ImageBuilder;
    use qfs_types::{QNX6_PTR_COUNT, S_IFREG};

    #[test]
    fn contiguous_file_is_one_run() {
        let mut b = Qnx6ImageBuilder::new(512, 64);
        let root = b.add_file(2, S_IFREG | 0o644, &[7_u8; 512 * 5]).expect("file");
        let fs = mount(b.build().expect("build"));

        let list = build_run_list(fs.store(), &root).expect("runs");
        assert_eq!(list.runs.len(), 1);
        assert_eq!(list.runs[0].logical_block, 0);
        assert_eq!(list.runs[0].length, 5);
        assert_eq!(list.total_size, 2560);
        assert_eq!(list.allocated_size, 2560);
    }

    #[test]
    fn physical_gap_splits_runs() {
        let mut b = Qnx6ImageBuilder::new(512, 64);
        b.alloc_block(vec![1]).expect("pad");
        let a = b.alloc_block(vec![b'a']).expect("a");
        b.alloc_block(vec![2]).expect("pad");
        let c = b.alloc_block(vec![b'c']).expect("c");
        let mut ptr = [QNX6_UNUSED_PTR; QNX6_PTR_COUNT];
        ptr[0] = a;
        ptr[1] = c;
        let root = Qnx6RootNode {
            size: 1000,
            ptr,
            level: 0,
            mode: 0,
        };
        let fs = mount(b.build().expect("build"));

        let list = build_run_list(fs.store(), &root).expect("runs");
        assert_eq!(list.runs.len(), 2);
        assert_eq!((list.runs[0].physical_block, list.runs[0].length), (1, 1));
        assert_eq!((list.runs[1].logical_block, list.runs[1].physical_block), (1, 3));
        assert_eq!(list.allocated_size, 1024);
    }

    #[test]
    fn holes_are_gaps_and_segments_fill_them() {
        let mut b = Qnx6ImageBuilder::new(512, 64);
        let root = b
            .add_sparse_file(
                2,
                S_IFREG | 0o644,
                &[Some(vec![1; 512]), None, None, Some(vec![4; 512]), None],
                512 * 5,
                None,
            )
            .expect("sparse");
        let fs = mount(b.build().expect("build"));

        let list = build_run_list(fs.store(), &root).expect("runs");
        assert_eq!(list.runs.len(), 2);
        assert_eq!(list.mapped_blocks(), 2);

        let segments = list.segments(512);
        assert_eq!(
            segments,
            vec![
                Segment::Data(list.runs[0]),
                Segment::Hole {
                    logical_block: 1,
                    length: 2
                },
                Segment::Data(list.runs[1]),
                Segment::Hole {
                    logical_block: 4,
                    length: 1
                },
            ]
        );
    }

    #[test]
    fn empty_object_has_no_runs() {
        let b = Qnx6ImageBuilder::new(512, 16);
        let fs = mount(b.build().expect("build"));
        let root = qfs_harness::empty_root_node();
        let list = build_run_list(fs.store(), &root).expect("runs");
        assert!(list.runs.is_empty());
        assert_eq!(list.allocated_size, 0);
        assert!(list.segments(512).is_empty());
    }

    #[test]
    fn huge_declared_size_stops_at_mappable_range() {
        let mut b = Qnx6ImageBuilder::new(512, 64);
        let mut root = b.add_file(2, S_IFREG, &[1; 512]).expect("file");
        root.size = 1 << 40;
        let fs = mount(b.build().expect("build"));
        let list = build_run_list(fs.store(), &root).expect("runs");
        assert_eq!(list.runs.len(), 1);
        assert_eq!(list.allocated_size, 1 << 40);
    }

    #[test]
    fn unused_top_pointers_skip_whole_units() {
        let fs = mount(Qnx6ImageBuilder::new(512, 16).build().expect("build"));
        let root = Qnx6RootNode {
            size: 1 << 50,
            ptr: [QNX6_UNUSED_PTR; QNX6_PTR_COUNT],
            level: 4,
            mode: 0,
        };
        let list = build_run_list(fs.store(), &root).expect("runs");
        assert!(list.runs.is_empty());
        assert_eq!(list.allocated_size, 1 << 50);
    }

    #[test]
    fn indirect_holes_match_translation() {
        let mut b = Qnx6ImageBuilder::new(512, 64);
        let mut blocks = vec![None; 302];
        blocks[0] = Some(vec![1; 512]);
        blocks[301] = Some(vec![2; 512]);
        let root = b
            .add_sparse_file(2, S_IFREG | 0o644, &blocks, 302 * 512, Some(2))
            .expect("sparse");
        let fs = mount(b.build().expect("build"));

        let list = build_run_list(fs.store(), &root).expect("runs");
        assert_eq!(list.runs.len(), 2);
        for run in &list.runs {
            let mapped = translate(fs.store(), &root.ptr, root.level, run.logical_block * 512);
            assert_eq!(mapped.block().map(|b| b.0), Some(run.physical_block));
        }
        assert_eq!(list.runs[1].logical_block, 301);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn allocated_size_covers_total(size in 0_u64..(16 * 512), blocks in 1_usize..16) {
            let mut b = Qnx6ImageBuilder::new(512, 64);
            let data: Vec<_> = (0..blocks).map(|i| Some(vec![i as u8; 512])).collect();
            let root = b.add_sparse_file(2, S_IFREG, &data, size, Some(0)).expect("file");
            let fs = mount(b.build().expect("build"));
            let list = build_run_list(fs.store(), &root).expect("runs");

            prop_assert!(list.allocated_size >= list.total_size);
            prop_assert_eq!(list.allocated_size % 512, 0);
            prop_assert!(list.allocated_size - list.total_size < 512);
            prop_assert!(list.runs.len() <= 1);
            for pair in list.runs.windows(2) {
                prop_assert!(pair[0].logical_end() <= pair[1].logical_block);
            }
        }
    }
}
