//! The terminator-positions file (`<prefix>-end-pos`).
//!
//! Written once on the final build cycle, it is the permutation from
//! "dollar rank in the whole BWT" to input sequence id. Layout:
//!
//! ```text
//! sequence_group_count : u32-le
//! subsequence_count    : u8      (1 — no subsequences here)
//! has_reverse_compl    : u8      (0)
//! then per terminator, in dollar-rank order:
//!   sequence_group_id  : u32-le
//!   subsequence_pos    : u8
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{LetterNumber, SequenceNumber};

const HEADER_BYTES: u64 = 4 + 1 + 1;
const RECORD_BYTES: u64 = 4 + 1;

/// Errors from end-pos access.
#[derive(Debug, Error)]
pub enum EndPosError {
    /// Underlying file-system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Originating error.
        #[source]
        source: std::io::Error,
    },

    /// File too short for its own header or a requested record.
    #[error("{path} is truncated")]
    Truncated {
        /// Offending file.
        path: PathBuf,
    },

    /// Dollar rank past the number of terminators.
    #[error("dollar rank {rank} out of range ({count} terminators)")]
    RankOutOfRange {
        /// Requested rank.
        rank: LetterNumber,
        /// Terminator count.
        count: LetterNumber,
    },
}

/// Path of the end-pos file belonging to a BWT prefix.
pub fn end_pos_path(prefix: &Path) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push("-end-pos");
    PathBuf::from(name)
}

/// Write the permutation: `entries[k]` is the sequence id owning the
/// terminator of dollar rank `k`.
pub fn write_end_pos(path: &Path, entries: &[SequenceNumber]) -> Result<(), EndPosError> {
    let file = File::create(path).map_err(|e| EndPosError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut w = BufWriter::new(file);
    let io_err = |e| EndPosError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    w.write_all(&(entries.len() as u32).to_le_bytes())
        .map_err(io_err)?;
    w.write_all(&[1u8, 0u8]).map_err(io_err)?;
    for &seq in entries {
        w.write_all(&seq.to_le_bytes()).map_err(io_err)?;
        w.write_all(&[0u8]).map_err(io_err)?;
    }
    w.flush().map_err(io_err)
}

/// Random-access reader over an end-pos file.
#[derive(Debug)]
pub struct EndPosFile {
    path: PathBuf,
    file: File,
    sequence_group_count: SequenceNumber,
    subsequence_count: u8,
    has_rev_comp: bool,
}

impl EndPosFile {
    /// Open the end-pos file belonging to `bwt_prefix`.
    pub fn open_prefix(bwt_prefix: &Path) -> Result<Self, EndPosError> {
        Self::open(&end_pos_path(bwt_prefix))
    }

    /// Open an end-pos file directly.
    pub fn open(path: &Path) -> Result<Self, EndPosError> {
        let mut file = File::open(path).map_err(|e| EndPosError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut header = [0u8; HEADER_BYTES as usize];
        file.read_exact(&mut header)
            .map_err(|_| EndPosError::Truncated {
                path: path.to_path_buf(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            sequence_group_count: u32::from_le_bytes([
                header[0], header[1], header[2], header[3],
            ]),
            subsequence_count: header[4],
            has_rev_comp: header[5] != 0,
        })
    }

    /// Total number of terminators covered by the file.
    pub fn dollar_sign_count(&self) -> LetterNumber {
        self.sequence_group_count as LetterNumber
            * self.subsequence_count as LetterNumber
            * if self.has_rev_comp { 2 } else { 1 }
    }

    /// Resolve a dollar rank to `(sequence id, subsequence position)`.
    pub fn sequence_for_dollar(
        &mut self,
        rank: LetterNumber,
    ) -> Result<(SequenceNumber, u8), EndPosError> {
        let count = self.dollar_sign_count();
        if rank >= count {
            return Err(EndPosError::RankOutOfRange { rank, count });
        }
        self.file
            .seek(SeekFrom::Start(HEADER_BYTES + rank * RECORD_BYTES))
            .map_err(|e| EndPosError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        let mut record = [0u8; RECORD_BYTES as usize];
        self.file
            .read_exact(&mut record)
            .map_err(|_| EndPosError::Truncated {
                path: self.path.clone(),
            })?;
        let group = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let subsequence_pos = record[4];
        let sequence =
            group + subsequence_pos as SequenceNumber * self.sequence_group_count;
        Ok((sequence, subsequence_pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x-end-pos");
        write_end_pos(&path, &[2, 0, 1]).unwrap();

        let mut f = EndPosFile::open(&path).unwrap();
        assert_eq!(f.dollar_sign_count(), 3);
        assert_eq!(f.sequence_for_dollar(0).unwrap(), (2, 0));
        assert_eq!(f.sequence_for_dollar(1).unwrap(), (0, 0));
        assert_eq!(f.sequence_for_dollar(2).unwrap(), (1, 0));
        assert!(matches!(
            f.sequence_for_dollar(3),
            Err(EndPosError::RankOutOfRange { .. })
        ));
    }

    #[test]
    fn empty_collection_still_has_a_readable_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x-end-pos");
        write_end_pos(&path, &[]).unwrap();
        let f = EndPosFile::open(&path).unwrap();
        assert_eq!(f.dollar_sign_count(), 0);
    }
}
