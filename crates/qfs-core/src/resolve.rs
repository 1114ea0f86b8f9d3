//! Boot header and superblock selection.
//!
//! The boot header names two superblock copies. Their locations are probed
//! in each of the known units; every copy whose magic and CRC check out is a
//! candidate and the highest serial wins.

use crate::parse_error_to_qfs;
use qfs_block::{ByteDevice, read_boot_region, read_superblock_region};
use qfs_error::{QfsError, Result};
use qfs_ondisk::{Qnx6BootBlock, Qnx6Superblock};
use qfs_types::{ByteOffset, QNX6_SUPERBLOCK_UNITS};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Why a probed location was or was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateVerdict {
    Valid,
    BadChecksum,
    NoMagic,
    /// The location lies past the end of the image.
    Unreadable,
}

/// One probed superblock location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockCandidate {
    /// Which boot-header slot (0 or 1) the location came from.
    pub copy: usize,
    pub unit: u64,
    /// Absolute image offset.
    pub offset: u64,
    pub verdict: CandidateVerdict,
    /// Present whenever the magic matched.
    pub serial: Option<u64>,
}

/// Everything learned while choosing the superblock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockResolution {
    pub boot: Qnx6BootBlock,
    pub candidates: Vec<SuperblockCandidate>,
    /// Index into `candidates` of the copy in use.
    pub selected: usize,
}

impl SuperblockResolution {
    #[must_use]
    pub fn selected_candidate(&self) -> Option<&SuperblockCandidate> {
        self.candidates.get(self.selected)
    }

    /// Valid copies other than the selected one.
    pub fn backups(&self) -> impl Iterator<Item = &SuperblockCandidate> + '_ {
        self.candidates
            .iter()
            .enumerate()
            .filter(move |(i, c)| *i != self.selected && c.verdict == CandidateVerdict::Valid)
            .map(|(_, c)| c)
    }
}

/// Locate and validate the authoritative superblock of the volume at
/// `volume_offset`.
///
/// Failure modes, in order of precedence:
/// - boot header unreadable: the I/O error;
/// - boot magic mismatch: `UnknownType`;
/// - magic found but no copy passes its CRC: `Corruption`;
/// - no probed location carries superblock magic: `UnknownType`;
/// - every location unreadable: the first read error.
pub fn resolve_superblock(
    dev: &dyn ByteDevice,
    volume_offset: ByteOffset,
) -> Result<(Qnx6Superblock, SuperblockResolution)> {
    let boot_raw = read_boot_region(dev, volume_offset)?;
    let boot = Qnx6BootBlock::parse_from_bytes(&boot_raw).map_err(|e| match e {
        qfs_types::ParseError::InvalidMagic { .. } => {
            QfsError::UnknownType(format!("no QNX6 boot header at offset {volume_offset}: {e}"))
        }
        other => parse_error_to_qfs(&other),
    })?;
    debug!(
        offset = volume_offset.0,
        sblk0 = boot.sblk0,
        sblk1 = boot.sblk1,
        "qnx6_boot_header"
    );

    let mut candidates: Vec<SuperblockCandidate> = Vec::new();
    let mut parsed: Vec<Option<Qnx6Superblock>> = Vec::new();
    let mut first_read_error: Option<QfsError> = None;

    for unit in QNX6_SUPERBLOCK_UNITS {
        for (copy, location) in boot.superblock_locations().into_iter().enumerate() {
            let Some(offset) = u64::from(location)
                .checked_mul(unit)
                .and_then(|rel| volume_offset.checked_add(rel))
            else {
                continue;
            };
            if candidates.iter().any(|c| c.offset == offset.0) {
                continue;
            }

            let (verdict, serial, sb) = match read_superblock_region(dev, offset) {
                Err(err) => {
                    first_read_error.get_or_insert(err);
                    (CandidateVerdict::Unreadable, None, None)
                }
                Ok(raw) => match Qnx6Superblock::parse_superblock_region(&raw) {
                    Err(_) => (CandidateVerdict::NoMagic, None, None),
                    Ok(sb) => {
                        let serial = Some(sb.serial);
                        if sb.validate_checksum(&raw).is_ok() {
                            (CandidateVerdict::Valid, serial, Some(sb))
                        } else {
                            (CandidateVerdict::BadChecksum, serial, None)
                        }
                    }
                },
            };
            debug!(copy, unit, offset = offset.0, ?verdict, ?serial, "qnx6_superblock_probe");
            candidates.push(SuperblockCandidate {
                copy,
                unit,
                offset: offset.0,
                verdict,
                serial,
            });
            parsed.push(sb);
        }
    }

    // Highest serial wins; ties go to the earliest candidate.
    let mut selected: Option<(usize, u64)> = None;
    for (i, sb) in parsed.iter().enumerate() {
        if let Some(sb) = sb {
            if selected.is_none_or(|(_, best)| sb.serial > best) {
                selected = Some((i, sb.serial));
            }
        }
    }

    let Some((selected, _)) = selected else {
        return Err(no_valid_superblock(&candidates, first_read_error));
    };
    let Some(superblock) = parsed.swap_remove(selected) else {
        return Err(no_valid_superblock(&candidates, first_read_error));
    };

    let rejected = candidates
        .iter()
        .filter(|c| c.verdict == CandidateVerdict::BadChecksum)
        .count();
    if rejected > 0 {
        warn!(rejected, serial = superblock.serial, "qnx6_superblock_copy_damaged");
    }

    Ok((
        superblock,
        SuperblockResolution {
            boot,
            candidates,
            selected,
        },
    ))
}

fn no_valid_superblock(
    candidates: &[SuperblockCandidate],
    first_read_error: Option<QfsError>,
) -> QfsError {
    if let Some(bad) = candidates
        .iter()
        .find(|c| c.verdict == CandidateVerdict::BadChecksum)
    {
        return QfsError::Corruption {
            block: bad.offset,
            detail: "no superblock copy passes its CRC".to_owned(),
        };
    }
    if candidates.iter().any(|c| c.verdict == CandidateVerdict::NoMagic) {
        return QfsError::UnknownType("superblock magic not found".to_owned());
    }
    first_read_error.unwrap_or_else(|| {
        QfsError::UnknownType("boot header names no superblock location".to_owned())
    })
}
