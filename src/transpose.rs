//! Transposition of read collections into per-column cycle files.
//!
//! Accepts FASTA (headers stripped) or one sequence per line. Reads must
//! share one length; bases are upper-cased on the way through.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::alphabet::{pile_of, TERMINATOR};
use crate::cycle::cycle_file_path;
use crate::{SequenceLength, SequenceNumber};

/// Errors from the transposition step.
#[derive(Debug, Error)]
pub enum TransposeError {
    /// Underlying file-system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Originating error.
        #[source]
        source: std::io::Error,
    },

    /// A read whose length differs from the first read's.
    #[error("read {index} is {got} bases long, expected {expected}")]
    RaggedRead {
        /// Zero-based read index.
        index: SequenceNumber,
        /// Length of the first read.
        expected: SequenceLength,
        /// Length of this read.
        got: SequenceLength,
    },

    /// A base outside the alphabet (or an explicit terminator).
    #[error("read {index} contains unsupported base 0x{byte:02x}")]
    BadBase {
        /// Zero-based read index.
        index: SequenceNumber,
        /// Offending byte.
        byte: u8,
    },

    /// Input held no sequences.
    #[error("input {path} holds no sequences")]
    Empty {
        /// Input file.
        path: PathBuf,
    },
}

/// Result of a transposition: how many sequences of which length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransposeSummary {
    /// Number of sequences written.
    pub sequence_count: SequenceNumber,
    /// Uniform sequence length.
    pub sequence_length: SequenceLength,
}

/// Stream `input` (FASTA or line-per-read) into `cyc.<t>` files under
/// `out_dir`, one per column.
pub fn transpose_reads(input: &Path, out_dir: &Path) -> Result<TransposeSummary, TransposeError> {
    let file = File::open(input).map_err(|e| TransposeError::Io {
        path: input.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let mut writers: Vec<BufWriter<File>> = Vec::new();
    let mut expected: SequenceLength = 0;
    let mut count: SequenceNumber = 0;
    let mut pending: Vec<u8> = Vec::new();
    let mut in_fasta = false;

    let mut flush_read = |seq: &mut Vec<u8>,
                          writers: &mut Vec<BufWriter<File>>,
                          expected: &mut SequenceLength,
                          count: &mut SequenceNumber|
     -> Result<(), TransposeError> {
        if seq.is_empty() {
            return Ok(());
        }
        if writers.is_empty() {
            *expected = seq.len() as SequenceLength;
            for t in 0..*expected {
                let path = cycle_file_path(out_dir, t);
                let file = File::create(&path).map_err(|e| TransposeError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                writers.push(BufWriter::new(file));
            }
        }
        if seq.len() as SequenceLength != *expected {
            return Err(TransposeError::RaggedRead {
                index: *count,
                expected: *expected,
                got: seq.len() as SequenceLength,
            });
        }
        for (t, &b) in seq.iter().enumerate() {
            let upper = b.to_ascii_uppercase();
            if pile_of(upper).is_none() || upper == TERMINATOR {
                return Err(TransposeError::BadBase {
                    index: *count,
                    byte: b,
                });
            }
            writers[t].write_all(&[upper]).map_err(|e| TransposeError::Io {
                path: cycle_file_path(out_dir, t as SequenceLength),
                source: e,
            })?;
        }
        *count += 1;
        seq.clear();
        Ok(())
    };

    for line in reader.lines() {
        let line = line.map_err(|e| TransposeError::Io {
            path: input.to_path_buf(),
            source: e,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('>') {
            in_fasta = true;
            flush_read(&mut pending, &mut writers, &mut expected, &mut count)?;
        } else if in_fasta {
            pending.extend_from_slice(line.as_bytes());
        } else {
            // Line-per-read input: each line is one complete sequence.
            pending.extend_from_slice(line.as_bytes());
            flush_read(&mut pending, &mut writers, &mut expected, &mut count)?;
        }
    }
    flush_read(&mut pending, &mut writers, &mut expected, &mut count)?;

    if count == 0 {
        return Err(TransposeError::Empty {
            path: input.to_path_buf(),
        });
    }
    for (t, mut w) in writers.into_iter().enumerate() {
        w.flush().map_err(|e| TransposeError::Io {
            path: cycle_file_path(out_dir, t as SequenceLength),
            source: e,
        })?;
    }
    tracing::info!("transposed {count} reads of length {expected} into {}", out_dir.display());
    Ok(TransposeSummary {
        sequence_count: count,
        sequence_length: expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_per_read_input_transposes_column_wise() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.txt");
        std::fs::write(&input, "ACGT\nacct\n").unwrap();
        let out = dir.path().join("cycles");
        std::fs::create_dir(&out).unwrap();

        let summary = transpose_reads(&input, &out).unwrap();
        assert_eq!(summary.sequence_count, 2);
        assert_eq!(summary.sequence_length, 4);
        assert_eq!(std::fs::read(out.join("cyc.0")).unwrap(), b"AA");
        assert_eq!(std::fs::read(out.join("cyc.1")).unwrap(), b"CC");
        assert_eq!(std::fs::read(out.join("cyc.2")).unwrap(), b"GC");
        assert_eq!(std::fs::read(out.join("cyc.3")).unwrap(), b"TT");
    }

    #[test]
    fn fasta_records_span_multiple_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fa");
        std::fs::write(&input, ">r1\nAC\nGT\n>r2\nTTTT\n").unwrap();
        let out = dir.path().join("cycles");
        std::fs::create_dir(&out).unwrap();

        let summary = transpose_reads(&input, &out).unwrap();
        assert_eq!(summary.sequence_count, 2);
        assert_eq!(summary.sequence_length, 4);
        assert_eq!(std::fs::read(out.join("cyc.3")).unwrap(), b"TT");
    }

    #[test]
    fn ragged_reads_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.txt");
        std::fs::write(&input, "ACGT\nACG\n").unwrap();
        let out = dir.path().join("cycles");
        std::fs::create_dir(&out).unwrap();
        assert!(matches!(
            transpose_reads(&input, &out),
            Err(TransposeError::RaggedRead { .. })
        ));
    }
}
