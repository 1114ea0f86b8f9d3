#![forbid(unsafe_code)]
//! On-disk format parsing for QNX6 structures.
//!
//! Pure parsing crate: no I/O, no side effects. Parses byte slices into
//! typed Rust structures for the boot header, superblock, root nodes,
//! inodes, directory entries and long-name records.

pub mod qnx6;

pub use qnx6::{
    DirEntryIter, Qnx6BootBlock, Qnx6DirEntryRef, Qnx6DirName, Qnx6FileType, Qnx6Inode,
    Qnx6RootNode, Qnx6Superblock, data_region_start, parse_long_name_record, qnx6_crc32,
    unit_bytes,
};
