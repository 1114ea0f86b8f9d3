//! Directory decoding.

use crate::QnxFs;
use crate::mapping::read_object;
use crate::parse_error_to_qfs;
use qfs_error::{QfsError, Result};
use qfs_ondisk::{DirEntryIter, Qnx6DirName, Qnx6FileType, parse_long_name_record};
use qfs_types::InodeNumber;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Entry type as seen by a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameType {
    Regular,
    Directory,
    Symlink,
    Other,
    /// Not classified, or the child inode could not be read.
    Undefined,
}

impl NameType {
    #[must_use]
    pub fn from_file_type(kind: Qnx6FileType) -> Self {
        match kind {
            Qnx6FileType::Regular => Self::Regular,
            Qnx6FileType::Directory => Self::Directory,
            Qnx6FileType::Symlink => Self::Symlink,
            Qnx6FileType::CharDevice
            | Qnx6FileType::BlockDevice
            | Qnx6FileType::Fifo
            | Qnx6FileType::Socket
            | Qnx6FileType::Unknown => Self::Other,
        }
    }

    /// One-letter tag in the style of `fls` listings.
    #[must_use]
    pub fn short_tag(self) -> char {
        match self {
            Self::Regular => 'r',
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::Other => 'o',
            Self::Undefined => '-',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirOptions {
    /// Read each child inode to fill in [`DirEntry::kind`].
    pub classify: bool,
}

impl Default for DirOptions {
    fn default() -> Self {
        Self { classify: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub ino: InodeNumber,
    pub kind: NameType,
    /// Record index within the directory content.
    pub slot: u32,
    /// Long-name table index, when the name came from there.
    pub long_name: Option<u32>,
}

impl DirEntry {
    /// Lossy UTF-8 rendering of the name.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// A fully decoded directory; owns all of its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub ino: InodeNumber,
    entries: Vec<DirEntry>,
}

impl Directory {
    pub(crate) fn new(ino: InodeNumber, entries: Vec<DirEntry>) -> Self {
        Self { ino, entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<DirEntry> {
        self.entries
    }

    /// First entry whose name matches exactly.
    #[must_use]
    pub fn find(&self, name: &[u8]) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

impl<'a> IntoIterator for &'a Directory {
    type Item = &'a DirEntry;
    type IntoIter = std::slice::Iter<'a, DirEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl QnxFs {
    /// Decode a directory with child classification on.
    pub fn open_directory(&self, ino: InodeNumber) -> Result<Directory> {
        self.open_directory_with(ino, &DirOptions::default())
    }

    pub fn open_directory_with(&self, ino: InodeNumber, options: &DirOptions) -> Result<Directory> {
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(QfsError::InvalidParameter(format!(
                "inode {ino} is not a directory (mode {:#o})",
                inode.mode
            )));
        }
        if inode.size == 0 {
            return Ok(Directory::new(ino, Vec::new()));
        }

        let content = read_object(self.store(), &inode.root_node(), 0, usize::MAX)?;
        let mut entries = Vec::new();
        for raw in DirEntryIter::new(&content) {
            let child = InodeNumber(u64::from(raw.inode));
            let (name, long_name) = match raw.name {
                Qnx6DirName::Short(bytes) => (bytes.to_vec(), None),
                Qnx6DirName::Long { index } => match self.read_long_name(index) {
                    Ok(name) => (name, Some(index)),
                    Err(err) => {
                        warn!(
                            dir = ino.0,
                            slot = raw.slot,
                            index,
                            error = %err,
                            "long_name_unreadable"
                        );
                        continue;
                    }
                },
            };
            let kind = if options.classify {
                self.classify(child)
            } else {
                NameType::Undefined
            };
            entries.push(DirEntry {
                name,
                ino: child,
                kind,
                slot: raw.slot,
                long_name,
            });
        }
        debug!(dir = ino.0, entries = entries.len(), "directory_decoded");
        Ok(Directory::new(ino, entries))
    }

    /// Read entry `index` of the long-name table.
    pub fn read_long_name(&self, index: u32) -> Result<Vec<u8>> {
        let bs = self.block_size();
        let table = &self.superblock().long_names;
        let out_of_range = || QfsError::InvalidAddress {
            kind: "long name",
            value: u64::from(index),
            first: 0,
            last: (table.size / bs.as_u64()).saturating_sub(1),
        };
        let offset = u64::from(index)
            .checked_mul(bs.as_u64())
            .filter(|off| *off < table.size)
            .ok_or_else(out_of_range)?;
        let record = read_object(self.store(), table, offset, bs.get() as usize)?;
        parse_long_name_record(&record, bs).map_err(|e| parse_error_to_qfs(&e))
    }

    fn classify(&self, ino: InodeNumber) -> NameType {
        match self.read_inode(ino) {
            Ok(inode) => NameType::from_file_type(inode.file_type()),
            Err(err) => {
                debug!(ino = ino.0, error = %err, "dir_child_unclassified");
                NameType::Undefined
            }
        }
    }
}
