//! Cycle-file access: column `t` of the input collection as one byte per
//! sequence.
//!
//! The builder consumes columns right to left. Producers promise that cycle
//! file `t` holds exactly N bytes, byte `s` being the column-`t` character
//! of sequence `s` (see [`crate::transpose`] for the bundled producer).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{SequenceLength, SequenceNumber};

/// Errors from cycle-file access.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Underlying file-system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Originating error.
        #[source]
        source: std::io::Error,
    },

    /// A cycle file whose size disagrees with the sequence count.
    #[error("{path} holds {got} bytes, expected {expected}")]
    LengthMismatch {
        /// Offending file.
        path: PathBuf,
        /// Sequence count promised by the first cycle file.
        expected: u64,
        /// Actual byte count.
        got: u64,
    },

    /// No `cyc.0` file in the directory.
    #[error("no cycle files found under {dir}")]
    NoCycleFiles {
        /// Directory searched.
        dir: PathBuf,
    },

    /// Requested column past the end of the collection.
    #[error("column {column} out of range (sequence length {len})")]
    ColumnOutOfRange {
        /// Requested column.
        column: SequenceLength,
        /// Sequence length.
        len: SequenceLength,
    },
}

/// Supplies one input column per call.
pub trait CycleSource {
    /// Number of sequences in the collection.
    fn sequence_count(&self) -> SequenceNumber;

    /// Uniform sequence length.
    fn sequence_length(&self) -> SequenceLength;

    /// Fill `buf` (of length [`Self::sequence_count`]) with column
    /// `column`'s characters.
    fn read_column(&mut self, column: SequenceLength, buf: &mut [u8]) -> Result<(), CycleError>;
}

/// Name of cycle file `t` under `dir`.
pub fn cycle_file_path(dir: &Path, column: SequenceLength) -> PathBuf {
    dir.join(format!("cyc.{column}"))
}

/// Cycle files on disk, one `cyc.<t>` per column.
#[derive(Debug)]
pub struct CycleFileDir {
    dir: PathBuf,
    sequence_count: SequenceNumber,
    sequence_length: SequenceLength,
}

impl CycleFileDir {
    /// Scan `dir` for consecutive `cyc.<t>` files and validate their sizes.
    pub fn open(dir: &Path) -> Result<Self, CycleError> {
        let first = cycle_file_path(dir, 0);
        let sequence_count = match std::fs::metadata(&first) {
            Ok(m) => m.len(),
            Err(_) => {
                return Err(CycleError::NoCycleFiles {
                    dir: dir.to_path_buf(),
                })
            }
        };

        let mut sequence_length: SequenceLength = 1;
        loop {
            let path = cycle_file_path(dir, sequence_length);
            match std::fs::metadata(&path) {
                Ok(m) if m.len() == sequence_count => sequence_length += 1,
                Ok(m) => {
                    return Err(CycleError::LengthMismatch {
                        path,
                        expected: sequence_count,
                        got: m.len(),
                    })
                }
                Err(_) => break,
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            sequence_count: sequence_count as SequenceNumber,
            sequence_length,
        })
    }
}

impl CycleSource for CycleFileDir {
    fn sequence_count(&self) -> SequenceNumber {
        self.sequence_count
    }

    fn sequence_length(&self) -> SequenceLength {
        self.sequence_length
    }

    fn read_column(&mut self, column: SequenceLength, buf: &mut [u8]) -> Result<(), CycleError> {
        if column >= self.sequence_length {
            return Err(CycleError::ColumnOutOfRange {
                column,
                len: self.sequence_length,
            });
        }
        let path = cycle_file_path(&self.dir, column);
        let mut file = File::open(&path).map_err(|e| CycleError::Io {
            path: path.clone(),
            source: e,
        })?;
        file.read_exact(buf).map_err(|e| CycleError::Io {
            path: path.clone(),
            source: e,
        })?;
        // A trailing byte means the producer broke its length promise.
        let mut probe = [0u8; 1];
        match file.read(&mut probe) {
            Ok(0) => Ok(()),
            Ok(_) => Err(CycleError::LengthMismatch {
                path,
                expected: buf.len() as u64,
                got: buf.len() as u64 + 1,
            }),
            Err(e) => Err(CycleError::Io { path, source: e }),
        }
    }
}

/// In-memory collection, mainly for tests and small inputs.
#[derive(Debug)]
pub struct MemoryCycles {
    sequences: Vec<Vec<u8>>,
    sequence_length: SequenceLength,
}

impl MemoryCycles {
    /// Wrap uniform-length sequences. Panics on ragged input; callers
    /// validate lengths at the boundary.
    pub fn new(sequences: Vec<Vec<u8>>) -> Self {
        let sequence_length = sequences.first().map_or(0, |s| s.len() as SequenceLength);
        assert!(
            sequences.iter().all(|s| s.len() as SequenceLength == sequence_length),
            "sequences must share one length"
        );
        Self {
            sequences,
            sequence_length,
        }
    }
}

impl CycleSource for MemoryCycles {
    fn sequence_count(&self) -> SequenceNumber {
        self.sequences.len() as SequenceNumber
    }

    fn sequence_length(&self) -> SequenceLength {
        self.sequence_length
    }

    fn read_column(&mut self, column: SequenceLength, buf: &mut [u8]) -> Result<(), CycleError> {
        if column >= self.sequence_length {
            return Err(CycleError::ColumnOutOfRange {
                column,
                len: self.sequence_length,
            });
        }
        for (slot, seq) in buf.iter_mut().zip(&self.sequences) {
            *slot = seq[column as usize];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cycles_deliver_columns() {
        let mut src = MemoryCycles::new(vec![b"ACGT".to_vec(), b"TTTT".to_vec()]);
        assert_eq!(src.sequence_count(), 2);
        assert_eq!(src.sequence_length(), 4);
        let mut buf = [0u8; 2];
        src.read_column(0, &mut buf).unwrap();
        assert_eq!(&buf, b"AT");
        src.read_column(3, &mut buf).unwrap();
        assert_eq!(&buf, b"TT");
        assert!(src.read_column(4, &mut buf).is_err());
    }

    #[test]
    fn dir_source_scans_consecutive_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(cycle_file_path(dir.path(), 0), b"AC").unwrap();
        std::fs::write(cycle_file_path(dir.path(), 1), b"GT").unwrap();

        let mut src = CycleFileDir::open(dir.path()).unwrap();
        assert_eq!(src.sequence_count(), 2);
        assert_eq!(src.sequence_length(), 2);
        let mut buf = [0u8; 2];
        src.read_column(1, &mut buf).unwrap();
        assert_eq!(&buf, b"GT");
    }

    #[test]
    fn ragged_cycle_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(cycle_file_path(dir.path(), 0), b"AC").unwrap();
        std::fs::write(cycle_file_path(dir.path(), 1), b"GTT").unwrap();
        assert!(matches!(
            CycleFileDir::open(dir.path()),
            Err(CycleError::LengthMismatch { .. })
        ));
    }
}
