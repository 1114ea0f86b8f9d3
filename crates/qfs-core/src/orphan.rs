//! Named-inode set and the synthetic orphan directory.

use crate::QnxFs;
use crate::dir::{DirEntry, Directory, NameType};
use qfs_error::Result;
use qfs_types::InodeNumber;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

impl QnxFs {
    /// Inode number of the synthetic orphan directory, one past the last
    /// real inode.
    #[must_use]
    pub fn orphan_dir_ino(&self) -> InodeNumber {
        InodeNumber(self.geometry().inode_count.saturating_add(1))
    }

    /// Every inode reachable by name from the root directory.
    ///
    /// Computed once and cached. A subdirectory that cannot be decoded is
    /// skipped; an unreadable root is an error.
    pub fn named_inodes(&self) -> Result<Arc<BTreeSet<InodeNumber>>> {
        if let Some(cached) = self.named.lock().as_ref() {
            return Ok(Arc::clone(cached));
        }

        let root = self.open_directory(InodeNumber::ROOT)?;
        let mut named = BTreeSet::from([InodeNumber::ROOT]);
        let mut visited = BTreeSet::from([InodeNumber::ROOT]);
        let mut queue = VecDeque::from([root]);

        while let Some(dir) = queue.pop_front() {
            for entry in &dir {
                if entry.name == b"." || entry.name == b".." {
                    continue;
                }
                named.insert(entry.ino);
                if entry.kind != NameType::Directory || !visited.insert(entry.ino) {
                    continue;
                }
                match self.open_directory(entry.ino) {
                    Ok(child) => queue.push_back(child),
                    Err(err) => debug!(ino = entry.ino.0, error = %err, "named_scan_skip_dir"),
                }
            }
        }
        debug!(named = named.len(), dirs = visited.len(), "named_inodes_built");

        let named = Arc::new(named);
        let mut slot = self.named.lock();
        Ok(Arc::clone(slot.get_or_insert(named)))
    }

    /// Allocated inodes (other than the root) that no directory names,
    /// presented as entries `OrphanFile-<inum>`.
    pub fn orphan_directory(&self) -> Result<Arc<Directory>> {
        if let Some(cached) = self.orphans.lock().as_ref() {
            return Ok(Arc::clone(cached));
        }

        let named = self.named_inodes()?;
        let mut entries = Vec::new();
        for ino in (InodeNumber::ROOT.0 + 1)..=self.last_inode().0 {
            let ino = InodeNumber(ino);
            if named.contains(&ino) {
                continue;
            }
            let inode = match self.read_inode(ino) {
                Ok(inode) => inode,
                Err(err) => {
                    debug!(ino = ino.0, error = %err, "orphan_scan_skip");
                    continue;
                }
            };
            if !inode.is_allocated() {
                continue;
            }
            entries.push(DirEntry {
                name: format!("OrphanFile-{ino}").into_bytes(),
                ino,
                kind: NameType::from_file_type(inode.file_type()),
                slot: u32::try_from(entries.len()).unwrap_or(u32::MAX),
                long_name: None,
            });
        }
        debug!(orphans = entries.len(), "orphan_directory_built");

        let dir = Arc::new(Directory::new(self.orphan_dir_ino(), entries));
        let mut slot = self.orphans.lock();
        Ok(Arc::clone(slot.get_or_insert(dir)))
    }
}
