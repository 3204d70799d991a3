//! ASCII segment codec: one raw alphabet byte per BWT character.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::alphabet::pile_of;
use crate::counts::LetterCount;
use crate::LetterNumber;

use super::{CodecError, RunSink};

const CHUNK: usize = 8 * 1024;

/// Streaming reader over an ASCII segment.
#[derive(Debug)]
pub struct AsciiReader {
    path: PathBuf,
    file: BufReader<File>,
    pos: LetterNumber,
}

impl AsciiReader {
    /// Open `path` for reading from the start.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            pos: 0,
        })
    }

    /// Return to the first byte.
    pub fn rewind(&mut self) -> Result<(), CodecError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| CodecError::io(&self.path, e))?;
        self.pos = 0;
        Ok(())
    }

    /// Current BWT position. For ASCII this equals the file offset.
    pub fn tell(&self) -> LetterNumber {
        self.pos
    }

    /// Reposition. ASCII segments have no header, so the file offset and the
    /// BWT position must agree.
    pub fn seek(&mut self, file_offset: u64, bwt_pos: LetterNumber) -> Result<(), CodecError> {
        debug_assert_eq!(file_offset, bwt_pos);
        self.file
            .seek(SeekFrom::Start(file_offset))
            .map_err(|e| CodecError::io(&self.path, e))?;
        self.pos = bwt_pos;
        Ok(())
    }

    /// See [`super::SegmentReader::read_and_count`].
    pub fn read_and_count(
        &mut self,
        counts: &mut LetterCount,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        let mut buf = [0u8; CHUNK];
        let mut left = n;
        while left > 0 {
            let want = left.min(CHUNK as LetterNumber) as usize;
            let got = self.fill(&mut buf[..want])?;
            if got == 0 {
                break;
            }
            for (i, &b) in buf[..got].iter().enumerate() {
                match pile_of(b) {
                    Some(p) => counts.add(p, 1),
                    None => {
                        return Err(CodecError::ForeignSymbol {
                            path: self.path.clone(),
                            byte: b,
                            offset: self.pos + i as u64,
                        })
                    }
                }
            }
            self.pos += got as LetterNumber;
            left -= got as LetterNumber;
        }
        Ok(n - left)
    }

    /// See [`super::SegmentReader::read_and_send`].
    pub fn read_and_send(
        &mut self,
        sink: &mut dyn RunSink,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        let mut buf = [0u8; CHUNK];
        let mut left = n;
        let mut run_symbol = 0u8;
        let mut run_len: LetterNumber = 0;
        while left > 0 {
            let want = left.min(CHUNK as LetterNumber) as usize;
            let got = self.fill(&mut buf[..want])?;
            if got == 0 {
                break;
            }
            for &b in &buf[..got] {
                if run_len > 0 && b == run_symbol {
                    run_len += 1;
                } else {
                    if run_len > 0 {
                        sink.send_run(run_symbol, run_len)?;
                    }
                    run_symbol = b;
                    run_len = 1;
                }
            }
            self.pos += got as LetterNumber;
            left -= got as LetterNumber;
        }
        if run_len > 0 {
            sink.send_run(run_symbol, run_len)?;
        }
        Ok(n - left)
    }

    /// See [`super::SegmentReader::read_bytes`].
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let got = self.fill(buf)?;
        self.pos += got as LetterNumber;
        Ok(got)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut got = 0;
        while got < buf.len() {
            match self
                .file
                .read(&mut buf[got..])
                .map_err(|e| CodecError::io(&self.path, e))?
            {
                0 => break,
                k => got += k,
            }
        }
        Ok(got)
    }
}

/// Buffered writer producing an ASCII segment.
#[derive(Debug)]
pub struct AsciiWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl AsciiWriter {
    /// Create (or truncate) `path`.
    pub fn create(path: &Path) -> Result<Self, CodecError> {
        let file = File::create(path).map_err(|e| CodecError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    /// Append raw symbols.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.file
            .write_all(data)
            .map_err(|e| CodecError::io(&self.path, e))
    }

    /// Append a run of `len` copies of `symbol`.
    pub fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        let chunk = [symbol; 64];
        let mut left = len;
        while left > 0 {
            let take = left.min(chunk.len() as LetterNumber) as usize;
            self.write_bytes(&chunk[..take])?;
            left -= take as LetterNumber;
        }
        Ok(())
    }

    /// Push buffered bytes to disk.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.file
            .flush()
            .map_err(|e| CodecError::io(&self.path, e))
    }
}

impl RunSink for AsciiWriter {
    fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        AsciiWriter::send_run(self, symbol, len)
    }
}

impl Drop for AsciiWriter {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!("flush of {} failed on drop: {err}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RunLog(Vec<(u8, LetterNumber)>);

    impl RunSink for RunLog {
        fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
            if let Some(last) = self.0.last_mut() {
                if last.0 == symbol {
                    last.1 += len;
                    return Ok(());
                }
            }
            self.0.push((symbol, len));
            Ok(())
        }
    }

    #[test]
    fn read_and_count_is_exact_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        std::fs::write(&p, b"AAACCGT$").unwrap();

        let mut r = AsciiReader::open(&p).unwrap();
        let mut c = LetterCount::new();
        assert_eq!(r.read_and_count(&mut c, 4).unwrap(), 4);
        assert_eq!(c[1], 3);
        assert_eq!(c[2], 1);
        assert_eq!(r.tell(), 4);

        assert_eq!(r.read_and_count(&mut c, 100).unwrap(), 4);
        assert_eq!(c.total(), 8);
    }

    #[test]
    fn read_and_send_emits_coalesced_runs() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        std::fs::write(&p, b"AAACCGTT").unwrap();

        let mut r = AsciiReader::open(&p).unwrap();
        let mut log = RunLog(Vec::new());
        assert_eq!(r.read_and_send(&mut log, 8).unwrap(), 8);
        assert_eq!(log.0, vec![(b'A', 3), (b'C', 2), (b'G', 1), (b'T', 2)]);
    }

    #[test]
    fn foreign_byte_is_reported_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        std::fs::write(&p, b"ACXG").unwrap();

        let mut r = AsciiReader::open(&p).unwrap();
        let mut c = LetterCount::new();
        match r.read_and_count(&mut c, 4) {
            Err(CodecError::ForeignSymbol { byte, offset, .. }) => {
                assert_eq!(byte, b'X');
                assert_eq!(offset, 2);
            }
            other => panic!("expected ForeignSymbol, got {other:?}"),
        }
    }
}
