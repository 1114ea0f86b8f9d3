#![forbid(unsafe_code)]
//! Error types for the QNX6 forensic engine.
//!
//! # Error Taxonomy
//!
//! Two layers, kept apart so the parsing crates never see runtime concerns:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `qfs-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `QfsError` | `qfs-error` (this crate) | Errors returned by mount, walks, and the CLI |
//!
//! ## Mapping Policy: ParseError → QfsError
//!
//! `qfs-error` does not depend on `qfs-types`; the conversion lives in
//! `qfs-core`, which depends on both.
//!
//! | ParseError Variant | QfsError Variant | Rationale |
//! |--------------------|------------------|-----------|
//! | `InsufficientData` | `Corruption { block, detail }` | A truncated structure means a damaged or truncated image |
//! | `InvalidMagic` | `UnknownType(detail)` | Wrong magic means this is not a QNX6 volume |
//! | `InvalidField` | `InvalidParameter` / `Corruption` | Geometry fields at mount, live metadata afterwards |
//! | `IntegerConversion` | `Corruption { block, detail }` | Overflowing on-disk values indicate damage |
//!
//! ## Degraded Reads
//!
//! Address translation never produces an error: an unreadable indirection
//! block or an unused pointer collapses to `BlockMapping::Unmapped` in
//! `qfs-core`, and the object reader zero-fills it. Failed reads of *mapped*
//! data blocks are always surfaced as `Io` / `ShortRead`.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error or `EIO` |
//! | `ShortRead` | `EIO` |
//! | `Corruption` | `EIO` |
//! | `UnknownType` | `EINVAL` |
//! | `InvalidParameter` | `EINVAL` |
//! | `InvalidAddress` | `ERANGE` |
//! | `ResourceExhaustion` | `ENOMEM` |
//! | `WalkAborted` | `ECANCELED` |
//! | `NotFound` | `ENOENT` |

use thiserror::Error;

/// Unified error type for every public operation of the engine.
#[derive(Debug, Error)]
pub enum QfsError {
    /// Operating system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image returned fewer bytes than requested.
    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// On-disk metadata is damaged (checksum mismatch, truncated record).
    ///
    /// `block` is the filesystem-relative block when known, otherwise the
    /// absolute byte offset of the damaged structure.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// The image does not carry a QNX6 volume (boot or superblock magic
    /// mismatch), or a different filesystem type was requested.
    #[error("unknown filesystem type: {0}")]
    UnknownType(String),

    /// A caller-supplied or geometry parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An inode or block address lies outside the volume.
    #[error("invalid address: {kind} {value} outside [{first}, {last}]")]
    InvalidAddress {
        kind: &'static str,
        value: u64,
        first: u64,
        last: u64,
    },

    /// An allocation needed to decode metadata could not be satisfied.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// A walk callback asked to stop with a failure.
    #[error("walk aborted by callback at address {address}")]
    WalkAborted { address: u64 },

    /// A named object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl QfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// The match is exhaustive so a new variant cannot ship without an errno.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::ShortRead { .. } | Self::Corruption { .. } => libc::EIO,
            Self::UnknownType(_) | Self::InvalidParameter(_) => libc::EINVAL,
            Self::InvalidAddress { .. } => libc::ERANGE,
            Self::ResourceExhaustion(_) => libc::ENOMEM,
            Self::WalkAborted { .. } => libc::ECANCELED,
            Self::NotFound(_) => libc::ENOENT,
        }
    }

    /// True for failures that come from the image itself rather than the
    /// caller: I/O shortfalls and damaged metadata.
    #[must_use]
    pub fn is_image_fault(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ShortRead { .. } | Self::Corruption { .. }
        )
    }
}

/// Result alias using `QfsError`.
pub type Result<T> = std::result::Result<T, QfsError>;
