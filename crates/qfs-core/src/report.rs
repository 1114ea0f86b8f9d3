//! `fsstat` and `istat` style reports.

use crate::QnxFs;
use crate::resolve::{CandidateVerdict, SuperblockCandidate};
use crate::runlist::Segment;
use qfs_error::Result;
use qfs_ondisk::Qnx6RootNode;
use qfs_types::{InodeNumber, mode_string};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Size, level and live pointers of one root node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootNodeSummary {
    pub size: u64,
    pub level: u8,
    pub pointers: Vec<u32>,
}

impl From<&Qnx6RootNode> for RootNodeSummary {
    fn from(root: &Qnx6RootNode) -> Self {
        Self {
            size: root.size,
            level: root.level,
            pointers: root.used_pointers().map(|(_, p)| p).collect(),
        }
    }
}

/// Volume-level facts, as printed by `fsstat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStat {
    pub fs_type: String,
    pub block_size: u32,
    pub block_count: u64,
    pub free_blocks: u32,
    pub inode_count: u64,
    pub free_inodes: u32,
    pub serial: u64,
    pub volume_id: String,
    pub ctime: u32,
    pub atime: u32,
    pub flags: u32,
    pub version: (u16, u16),
    pub volume_offset: u64,
    pub data_start: u64,
    pub selected_superblock: Option<SuperblockCandidate>,
    pub candidates: Vec<SuperblockCandidate>,
    pub inode_table: RootNodeSummary,
    pub bitmap: RootNodeSummary,
    pub long_names: RootNodeSummary,
}

fn verdict_label(verdict: CandidateVerdict) -> &'static str {
    match verdict {
        CandidateVerdict::Valid => "valid",
        CandidateVerdict::BadChecksum => "bad checksum",
        CandidateVerdict::NoMagic => "no magic",
        CandidateVerdict::Unreadable => "unreadable",
    }
}

fn write_root(out: &mut impl Write, label: &str, root: &RootNodeSummary) -> std::io::Result<()> {
    let ptrs: Vec<String> = root.pointers.iter().map(u32::to_string).collect();
    writeln!(
        out,
        "{label}: size {} level {} blocks [{}]",
        root.size,
        root.level,
        ptrs.join(", ")
    )
}

impl QnxFs {
    #[must_use]
    pub fn stat(&self) -> FsStat {
        let sb = self.superblock();
        let geo = self.geometry();
        let res = self.resolution();
        FsStat {
            fs_type: "QNX6".to_owned(),
            block_size: geo.block_size.get(),
            block_count: geo.block_count,
            free_blocks: sb.free_blocks,
            inode_count: geo.inode_count,
            free_inodes: sb.free_inodes,
            serial: sb.serial,
            volume_id: sb.volume_id_hex(),
            ctime: sb.ctime,
            atime: sb.atime,
            flags: sb.flags,
            version: (sb.version1, sb.version2),
            volume_offset: geo.volume_offset,
            data_start: geo.data_start,
            selected_superblock: res.selected_candidate().copied(),
            candidates: res.candidates.clone(),
            inode_table: RootNodeSummary::from(&sb.inode_tree),
            bitmap: RootNodeSummary::from(&sb.bitmap),
            long_names: RootNodeSummary::from(&sb.long_names),
        }
    }

    /// Write the human-readable volume report.
    pub fn fsstat(&self, out: &mut impl Write) -> Result<()> {
        let st = self.stat();
        writeln!(out, "FILE SYSTEM INFORMATION")?;
        writeln!(out, "--------------------------------------------")?;
        writeln!(out, "File System Type: {}", st.fs_type)?;
        writeln!(out, "Block Size: {}", st.block_size)?;
        writeln!(out, "Block Count: {}", st.block_count)?;
        writeln!(out, "Inode Count: {}", st.inode_count)?;
        writeln!(out, "Superblock Serial: {}", st.serial)?;
        writeln!(out, "Free Blocks: {}", st.free_blocks)?;
        writeln!(out, "Free Inodes: {}", st.free_inodes)?;
        writeln!(out, "Volume ID: {}", st.volume_id)?;
        writeln!(out, "Version: {}.{}", st.version.0, st.version.1)?;
        writeln!(out, "Created: {}", st.ctime)?;
        writeln!(out, "Last Access: {}", st.atime)?;
        writeln!(out, "Volume Offset: {}", st.volume_offset)?;
        writeln!(out, "Data Region Start: {:#x}", st.data_start)?;

        writeln!(out)?;
        writeln!(out, "SUPERBLOCK CANDIDATES")?;
        writeln!(out, "--------------------------------------------")?;
        for (i, c) in st.candidates.iter().enumerate() {
            let mark = if i == self.resolution().selected { '*' } else { ' ' };
            let serial = c.serial.map_or_else(|| "-".to_owned(), |s| s.to_string());
            writeln!(
                out,
                "{mark} copy {} unit {:>4} offset {:#x}: {} (serial {serial})",
                c.copy,
                c.unit,
                c.offset,
                verdict_label(c.verdict)
            )?;
        }

        writeln!(out)?;
        writeln!(out, "METADATA OBJECTS")?;
        writeln!(out, "--------------------------------------------")?;
        write_root(out, "Inode Table", &st.inode_table)?;
        write_root(out, "Bitmap", &st.bitmap)?;
        write_root(out, "Long Names", &st.long_names)?;
        Ok(())
    }

    /// Write the human-readable report for one inode.
    pub fn istat(&self, ino: InodeNumber, out: &mut impl Write) -> Result<()> {
        let file = self.open_file(ino)?;
        let meta = file.meta();
        writeln!(out, "inode: {}", meta.ino)?;
        writeln!(
            out,
            "{}",
            if meta.allocated { "Allocated" } else { "Not Allocated" }
        )?;
        writeln!(out, "Type: {:?}", meta.kind)?;
        writeln!(out, "Mode: {} ({:#o})", mode_string(meta.mode), meta.mode)?;
        writeln!(out, "uid / gid: {} / {}", meta.uid, meta.gid)?;
        writeln!(out, "size: {}", meta.size)?;
        writeln!(out, "level: {}", meta.level)?;
        writeln!(out)?;
        writeln!(out, "Created:\t{}", meta.crtime)?;
        writeln!(out, "Modified:\t{}", meta.mtime)?;
        writeln!(out, "Accessed:\t{}", meta.atime)?;
        writeln!(out, "Changed:\t{}", meta.ctime)?;
        if let Some(target) = file.read_link()? {
            writeln!(out, "Link Target: {}", String::from_utf8_lossy(&target))?;
        }

        let runs = file.run_list()?;
        writeln!(out)?;
        writeln!(out, "Allocated Size: {}", runs.allocated_size)?;
        writeln!(out, "Runs:")?;
        for segment in runs.segments(self.block_size().as_u64()) {
            match segment {
                Segment::Data(run) => writeln!(
                    out,
                    "  {}-{} -> {}-{}",
                    run.logical_block,
                    run.logical_end() - 1,
                    run.physical_block,
                    run.physical_block + run.length - 1
                )?,
                Segment::Hole {
                    logical_block,
                    length,
                } => writeln!(
                    out,
                    "  {}-{} -> sparse",
                    logical_block,
                    logical_block + length - 1
                )?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_fs;
    use qfs_harness::sample;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).expect("report");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn fsstat_header_lines() {
        let fs = sample_fs();
        let text = render(|out| fs.fsstat(out));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "FILE SYSTEM INFORMATION");
        assert_eq!(lines[2], "File System Type: QNX6");
        assert_eq!(lines[3], "Block Size: 1024");
        assert_eq!(lines[4], "Block Count: 256");
        assert_eq!(lines[5], "Inode Count: 32");
        assert_eq!(lines[6], "Superblock Serial: 3");
        assert!(text.contains("* copy 0 unit  512 offset 0x1000: valid (serial 3)"));
        assert!(text.contains("Data Region Start: 0x3000"));
    }

    #[test]
    fn stat_serializes() {
        let fs = sample_fs();
        let st = fs.stat();
        let json = serde_json::to_value(&st).expect("json");
        assert_eq!(json["block_size"], 1024);
        assert_eq!(json["selected_superblock"]["copy"], 0);
        assert_eq!(st.long_names.pointers.len(), 1);
    }

    #[test]
    fn istat_lists_runs_and_holes() {
        let fs = sample_fs();
        let text = render(|out| fs.istat(InodeNumber(u64::from(sample::SPARSE)), out));
        assert!(text.starts_with("inode: 5\nAllocated\n"));
        assert!(text.contains("Mode: -rw-r--r--"));
        assert!(text.contains("  1-2 -> sparse"));
        assert!(text.contains("Allocated Size: 4096"));

        let link = render(|out| fs.istat(InodeNumber(u64::from(sample::LINK)), out));
        assert!(link.contains("Link Target: hello.txt"));
    }

    #[test]
    fn istat_out_of_range_fails() {
        let fs = sample_fs();
        let mut sink = Vec::new();
        assert!(fs.istat(InodeNumber(999), &mut sink).is_err());
    }
}
