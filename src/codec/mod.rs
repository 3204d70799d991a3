//! Segment codecs: readers and writers over per-pile BWT segment files.
//!
//! Three on-disk formats are supported and interoperable:
//!
//! * **ASCII** — one raw alphabet byte per BWT character, no header.
//! * **RLE v1** — headerless 1-byte tokens, 4-bit pile index + 4-bit
//!   run length.
//! * **RLE v3** — `BWT\r\n\x1a` magic, a 256-entry run-length table, then
//!   1-byte tokens with base-16 continuation digits for long runs.
//!
//! Format detection peeks the first bytes of a segment exactly once, in
//! [`detect_format`]. Readers expose position-exact `read_and_count` /
//! `read_and_send` primitives; writers coalesce adjacent runs of the same
//! symbol before encoding.

mod ascii;
mod index;
mod rle;

pub use ascii::{AsciiReader, AsciiWriter};
pub use index::{
    build_index_for, build_segment_index, IndexSample, IndexedReader, SegmentIndex,
    DEFAULT_CHUNK_RUNS, INDEX_MAGIC,
};
pub use rle::{
    RleV1Reader, RleV1Source, RleV1Writer, RleV3Reader, RleV3Source, RleV3Writer, RunReader,
    RunSource,
};

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::alphabet::pile_of;
use crate::counts::LetterCount;
use crate::LetterNumber;

use thiserror::Error;

/// Magic prefix of an RLE v3 segment: `BWT\r\n\x1a` then version 3 as u16-le.
pub const RLE_V3_MAGIC: [u8; 8] = [b'B', b'W', b'T', 13, 10, 26, 3, 0];

/// Errors raised by the codec and index layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying file-system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Originating error.
        #[source]
        source: std::io::Error,
    },

    /// A byte outside the alphabet in an ASCII segment or run token.
    #[error("byte 0x{byte:02x} at offset {offset} of {path} is not in the alphabet")]
    ForeignSymbol {
        /// File containing the byte.
        path: PathBuf,
        /// The offending byte.
        byte: u8,
        /// File offset of the byte.
        offset: u64,
    },

    /// Malformed header or run-length table.
    #[error("bad header in {path}: {detail}")]
    BadHeader {
        /// File with the bad header.
        path: PathBuf,
        /// What was wrong.
        detail: String,
    },

    /// File ended inside a structure that promised more bytes.
    #[error("unexpected end of file in {path}")]
    UnexpectedEof {
        /// Truncated file.
        path: PathBuf,
    },

    /// A run token that cannot appear at this position (e.g. a continuation
    /// digit with no preceding run).
    #[error("corrupt run token at offset {offset} of {path}")]
    CorruptToken {
        /// File containing the token.
        path: PathBuf,
        /// File offset of the token.
        offset: u64,
    },

    /// A symbol outside the alphabet handed to an encoder.
    #[error("symbol 0x{byte:02x} cannot be encoded")]
    InvalidSymbol {
        /// The offending byte.
        byte: u8,
    },

    /// Operation not available for this reader configuration.
    #[error("{0}")]
    Unsupported(&'static str),

    /// A run or counter overflowed its representation.
    #[error("counter overflow in {path}")]
    Overflow {
        /// File being processed when the overflow occurred.
        path: PathBuf,
    },
}

impl CodecError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        CodecError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk representation of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFormat {
    /// One alphabet byte per character.
    Ascii,
    /// Legacy headerless run-length tokens.
    RleV1,
    /// Headered run-length tokens with continuation digits.
    RleV3,
}

impl SegmentFormat {
    /// Parse a CLI encoder name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ascii" => Some(SegmentFormat::Ascii),
            "rle-v1" => Some(SegmentFormat::RleV1),
            "rle-v3" => Some(SegmentFormat::RleV3),
            _ => None,
        }
    }
}

/// Anything that accepts runs of identical symbols. Writers implement this;
/// so do test fixtures that record the run stream.
pub trait RunSink {
    /// Append `len` copies of `symbol`. Implementations must coalesce with a
    /// previously buffered run of the same symbol.
    fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError>;
}

/// A reader over one pile's segment file, any format.
#[derive(Debug)]
pub enum SegmentReader {
    /// Raw byte segment.
    Ascii(AsciiReader),
    /// Legacy run-length segment.
    RleV1(RleV1Reader),
    /// Headered run-length segment.
    RleV3(RleV3Reader),
    /// Run-length segment skipped through a sparse sample index.
    Indexed(IndexedReader),
}

impl SegmentReader {
    /// Return to the first data byte.
    pub fn rewind(&mut self) -> Result<(), CodecError> {
        match self {
            SegmentReader::Ascii(r) => r.rewind(),
            SegmentReader::RleV1(r) => r.rewind(),
            SegmentReader::RleV3(r) => r.rewind(),
            SegmentReader::Indexed(r) => r.rewind(),
        }
    }

    /// Current BWT position within the pile.
    pub fn tell(&self) -> LetterNumber {
        match self {
            SegmentReader::Ascii(r) => r.tell(),
            SegmentReader::RleV1(r) => r.tell(),
            SegmentReader::RleV3(r) => r.tell(),
            SegmentReader::Indexed(r) => r.tell(),
        }
    }

    /// Reposition to `file_offset`, declaring the BWT position that offset
    /// corresponds to. Only meaningful with offsets from an index sample or
    /// a previous `tell`.
    pub fn seek(&mut self, file_offset: u64, bwt_pos: LetterNumber) -> Result<(), CodecError> {
        match self {
            SegmentReader::Ascii(r) => r.seek(file_offset, bwt_pos),
            SegmentReader::RleV1(r) => r.seek(file_offset, bwt_pos),
            SegmentReader::RleV3(r) => r.seek(file_offset, bwt_pos),
            SegmentReader::Indexed(r) => r.seek(file_offset, bwt_pos),
        }
    }

    /// Advance `n` BWT positions, adding per-symbol counts to `counts`.
    /// Returns the number of positions actually consumed (short at EOF).
    /// Passing `LetterNumber::MAX` counts to the end of the segment.
    pub fn read_and_count(
        &mut self,
        counts: &mut LetterCount,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        match self {
            SegmentReader::Ascii(r) => r.read_and_count(counts, n),
            SegmentReader::RleV1(r) => r.read_and_count(counts, n),
            SegmentReader::RleV3(r) => r.read_and_count(counts, n),
            SegmentReader::Indexed(r) => r.read_and_count(counts, n),
        }
    }

    /// Copy the next `n` BWT characters into `sink` as runs. Returns the
    /// number of positions actually consumed. Passing `LetterNumber::MAX`
    /// copies to the end of the segment.
    pub fn read_and_send(
        &mut self,
        sink: &mut dyn RunSink,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        match self {
            SegmentReader::Ascii(r) => r.read_and_send(sink, n),
            SegmentReader::RleV1(r) => r.read_and_send(sink, n),
            SegmentReader::RleV3(r) => r.read_and_send(sink, n),
            SegmentReader::Indexed(r) => r.read_and_send(sink, n),
        }
    }

    /// Materialise up to `buf.len()` raw symbols. Returns the number filled.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, CodecError> {
        match self {
            SegmentReader::Ascii(r) => r.read_bytes(buf),
            SegmentReader::RleV1(r) => r.read_bytes(buf),
            SegmentReader::RleV3(r) => r.read_bytes(buf),
            SegmentReader::Indexed(r) => r.read_bytes(buf),
        }
    }
}

/// A writer over one pile's segment file, any format.
#[derive(Debug)]
pub enum SegmentWriter {
    /// Raw byte segment.
    Ascii(AsciiWriter),
    /// Legacy run-length segment.
    RleV1(RleV1Writer),
    /// Headered run-length segment.
    RleV3(RleV3Writer),
}

impl SegmentWriter {
    /// Append raw symbols; the encoder chooses the run representation.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        match self {
            SegmentWriter::Ascii(w) => w.write_bytes(data),
            SegmentWriter::RleV1(w) => w.write_bytes(data),
            SegmentWriter::RleV3(w) => w.write_bytes(data),
        }
    }

    /// Encode any buffered run and push everything to disk.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        match self {
            SegmentWriter::Ascii(w) => w.flush(),
            SegmentWriter::RleV1(w) => w.flush(),
            SegmentWriter::RleV3(w) => w.flush(),
        }
    }
}

impl RunSink for SegmentWriter {
    fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        match self {
            SegmentWriter::Ascii(w) => w.send_run(symbol, len),
            SegmentWriter::RleV1(w) => w.send_run(symbol, len),
            SegmentWriter::RleV3(w) => w.send_run(symbol, len),
        }
    }
}

/// Inspect the head of a segment file and classify its format.
///
/// This is the single place in the crate that peeks raw segment bytes.
pub fn detect_format(path: &Path) -> Result<SegmentFormat, CodecError> {
    let mut file = File::open(path).map_err(|e| CodecError::io(path, e))?;
    let mut head = [0u8; 8];
    let mut got = 0;
    while got < head.len() {
        match file
            .read(&mut head[got..])
            .map_err(|e| CodecError::io(path, e))?
        {
            0 => break,
            k => got += k,
        }
    }

    if got == 8 && head == RLE_V3_MAGIC {
        return Ok(SegmentFormat::RleV3);
    }
    // An empty segment reads back fine through the ASCII decoder.
    if head[..got].iter().all(|&b| pile_of(b).is_some()) {
        return Ok(SegmentFormat::Ascii);
    }
    Ok(SegmentFormat::RleV1)
}

/// Open a reader for `path`, auto-detecting its format. When `use_index` is
/// set and a `<path>.idx` sidecar exists, run-length readers are wrapped in
/// the indexed fast path; a missing or unreadable sidecar silently degrades
/// to plain streaming.
pub fn open_reader(path: &Path, use_index: bool) -> Result<SegmentReader, CodecError> {
    let format = detect_format(path)?;
    let reader = match format {
        SegmentFormat::Ascii => SegmentReader::Ascii(AsciiReader::open(path)?),
        SegmentFormat::RleV1 => SegmentReader::RleV1(RleV1Reader::open(path)?),
        SegmentFormat::RleV3 => SegmentReader::RleV3(RleV3Reader::open(path)?),
    };

    if use_index && !matches!(reader, SegmentReader::Ascii(_)) {
        let idx_path = index_sidecar_path(path);
        if idx_path.exists() {
            match SegmentIndex::load(&idx_path) {
                Ok(idx) => return Ok(SegmentReader::Indexed(IndexedReader::new(reader, idx))),
                Err(err) => {
                    tracing::warn!(
                        "ignoring unreadable index {}: {err}",
                        idx_path.display()
                    );
                }
            }
        }
    }
    Ok(reader)
}

/// Open a writer emitting `format` at `path` (truncates existing content).
pub fn open_writer(path: &Path, format: SegmentFormat) -> Result<SegmentWriter, CodecError> {
    Ok(match format {
        SegmentFormat::Ascii => SegmentWriter::Ascii(AsciiWriter::create(path)?),
        SegmentFormat::RleV1 => SegmentWriter::RleV1(RleV1Writer::create(path)?),
        SegmentFormat::RleV3 => SegmentWriter::RleV3(RleV3Writer::create(path)?),
    })
}

/// Path of the index sidecar belonging to a segment file.
pub fn index_sidecar_path(segment: &Path) -> PathBuf {
    let mut name = segment.as_os_str().to_os_string();
    name.push(".idx");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn detect_classifies_the_three_formats() {
        let dir = tempfile::tempdir().unwrap();

        let ascii = dir.path().join("ascii");
        std::fs::write(&ascii, b"ACGT$n").unwrap();
        assert_eq!(detect_format(&ascii).unwrap(), SegmentFormat::Ascii);

        let v3 = dir.path().join("v3");
        let mut f = File::create(&v3).unwrap();
        f.write_all(&RLE_V3_MAGIC).unwrap();
        drop(f);
        assert_eq!(detect_format(&v3).unwrap(), SegmentFormat::RleV3);

        let v1 = dir.path().join("v1");
        std::fs::write(&v1, [0xF1u8, 0x02]).unwrap();
        assert_eq!(detect_format(&v1).unwrap(), SegmentFormat::RleV1);
    }

    #[test]
    fn empty_segment_detects_as_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("empty");
        std::fs::write(&p, b"").unwrap();
        assert_eq!(detect_format(&p).unwrap(), SegmentFormat::Ascii);
    }
}
