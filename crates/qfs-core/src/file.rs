//! Transient file handles.

use crate::QnxFs;
use crate::mapping::read_object;
use crate::runlist::{RunList, build_run_list};
use qfs_error::Result;
use qfs_ondisk::{Qnx6FileType, Qnx6Inode};
use qfs_types::InodeNumber;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use tracing::trace;

/// Decoded, caller-facing inode metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub ino: InodeNumber,
    pub kind: Qnx6FileType,
    pub mode: u16,
    /// Permission bits only.
    pub perm: u16,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    /// Creation time (`ftime` on disk).
    pub crtime: u32,
    pub mtime: u32,
    pub atime: u32,
    pub ctime: u32,
    pub allocated: bool,
    pub level: u8,
}

impl FileMeta {
    #[must_use]
    pub fn from_inode(ino: InodeNumber, inode: &Qnx6Inode) -> Self {
        Self {
            ino,
            kind: inode.file_type(),
            mode: inode.mode,
            perm: inode.permission_bits(),
            size: inode.size,
            uid: inode.uid,
            gid: inode.gid,
            crtime: inode.ftime,
            mtime: inode.mtime,
            atime: inode.atime,
            ctime: inode.ctime,
            allocated: inode.is_allocated(),
            level: inode.level,
        }
    }
}

/// One inode's metadata plus its lazily built run list.
///
/// Borrowed from the mounted volume and dropped by the caller.
pub struct QnxFile<'fs> {
    fs: &'fs QnxFs,
    meta: FileMeta,
    inode: Qnx6Inode,
    runs: OnceCell<RunList>,
}

impl std::fmt::Debug for QnxFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QnxFile")
            .field("meta", &self.meta)
            .field("runs_loaded", &self.runs.get().is_some())
            .finish_non_exhaustive()
    }
}

impl<'fs> QnxFile<'fs> {
    pub(crate) fn new(fs: &'fs QnxFs, ino: InodeNumber, inode: Qnx6Inode) -> Self {
        Self {
            fs,
            meta: FileMeta::from_inode(ino, &inode),
            inode,
            runs: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    #[must_use]
    pub fn ino(&self) -> InodeNumber {
        self.meta.ino
    }

    #[must_use]
    pub fn inode(&self) -> &Qnx6Inode {
        &self.inode
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.meta.allocated
    }

    /// Load (once) and return the file's run list.
    pub fn run_list(&self) -> Result<&RunList> {
        if let Some(runs) = self.runs.get() {
            return Ok(runs);
        }
        let built = build_run_list(self.fs.store(), &self.inode.root_node())?;
        trace!(ino = self.meta.ino.0, runs = built.runs.len(), "attributes_loaded");
        Ok(self.runs.get_or_init(|| built))
    }

    /// Read up to `len` bytes of content at `offset`; holes read as zeros.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        read_object(self.fs.store(), &self.inode.root_node(), offset, len)
    }

    /// Symlink target, or `None` for other file types.
    pub fn read_link(&self) -> Result<Option<Vec<u8>>> {
        if !self.inode.is_symlink() {
            return Ok(None);
        }
        let target = self.read(0, usize::try_from(self.meta.size).unwrap_or(usize::MAX))?;
        Ok(Some(target))
    }
}

impl QnxFs {
    /// Open a handle on any inode in range, allocated or not.
    pub fn open_file(&self, ino: InodeNumber) -> Result<QnxFile<'_>> {
        let inode = self.read_inode(ino)?;
        Ok(QnxFile::new(self, ino, inode))
    }
}
