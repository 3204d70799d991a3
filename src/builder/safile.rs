//! Per-pile generalized-suffix-array sidecars: fixed-width records of
//! `(position_in_sequence: u32-le, sequence_id: u32-le)`, spliced in
//! lock-step with the BWT segment of the same pile.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::{LetterNumber, SequenceLength, SequenceNumber};

use super::BuildError;

const RECORD_BYTES: usize = 8;

/// Sequential reader over a GSA sidecar.
#[derive(Debug)]
pub(super) struct SaReader {
    path: PathBuf,
    file: BufReader<File>,
}

impl SaReader {
    pub(super) fn open(path: &Path) -> Result<Self, BuildError> {
        let file = File::open(path).map_err(|e| BuildError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
        })
    }

    /// Copy `n` records through to `writer`. Short input is an invariant
    /// violation: the sidecar must stay parallel to its segment.
    pub(super) fn copy_records(
        &mut self,
        writer: &mut SaWriter,
        n: LetterNumber,
    ) -> Result<(), BuildError> {
        let mut buf = [0u8; RECORD_BYTES * 512];
        let mut left = n;
        while left > 0 {
            let take = (left.min(512) as usize) * RECORD_BYTES;
            self.file
                .read_exact(&mut buf[..take])
                .map_err(|_| BuildError::Invariant {
                    detail: format!(
                        "suffix-array sidecar {} shorter than its segment",
                        self.path.display()
                    ),
                })?;
            writer.write_raw(&buf[..take])?;
            left -= (take / RECORD_BYTES) as LetterNumber;
        }
        Ok(())
    }

    /// Copy whatever is left through to `writer`.
    pub(super) fn copy_remaining(&mut self, writer: &mut SaWriter) -> Result<(), BuildError> {
        let mut buf = [0u8; RECORD_BYTES * 512];
        loop {
            let got = self.file.read(&mut buf).map_err(|e| BuildError::Io {
                path: self.path.clone(),
                source: e,
            })?;
            if got == 0 {
                return Ok(());
            }
            writer.write_raw(&buf[..got])?;
        }
    }
}

/// Buffered writer over a GSA sidecar.
#[derive(Debug)]
pub(super) struct SaWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl SaWriter {
    pub(super) fn create(path: &Path) -> Result<Self, BuildError> {
        let file = File::create(path).map_err(|e| BuildError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    pub(super) fn write_record(
        &mut self,
        suffix_start: SequenceLength,
        sequence: SequenceNumber,
    ) -> Result<(), BuildError> {
        let mut record = [0u8; RECORD_BYTES];
        record[..4].copy_from_slice(&suffix_start.to_le_bytes());
        record[4..].copy_from_slice(&sequence.to_le_bytes());
        self.write_raw(&record)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), BuildError> {
        self.file.write_all(bytes).map_err(|e| BuildError::Io {
            path: self.path.clone(),
            source: e,
        })
    }

    pub(super) fn finish(mut self) -> Result<(), BuildError> {
        self.file.flush().map_err(|e| BuildError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_survive_a_copy_chain() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("sa-a");
        let b = dir.path().join("sa-b");

        let mut w = SaWriter::create(&a).unwrap();
        for k in 0..5u32 {
            w.write_record(k, 100 + k).unwrap();
        }
        w.finish().unwrap();

        let mut r = SaReader::open(&a).unwrap();
        let mut w = SaWriter::create(&b).unwrap();
        r.copy_records(&mut w, 3).unwrap();
        w.write_record(9, 9).unwrap();
        r.copy_remaining(&mut w).unwrap();
        w.finish().unwrap();

        let bytes = std::fs::read(&b).unwrap();
        assert_eq!(bytes.len(), 6 * RECORD_BYTES);
        assert_eq!(&bytes[3 * RECORD_BYTES..3 * RECORD_BYTES + 4], &9u32.to_le_bytes());
        assert_eq!(&bytes[5 * RECORD_BYTES + 4..], &104u32.to_le_bytes());
    }
}
