//! Run-length segment codecs.
//!
//! **RLE v1** (legacy, headerless): every byte is one run token, low 4 bits
//! the pile index, high 4 bits the run length minus one.
//!
//! **RLE v3**: after the magic and a 256-entry run-length table, every byte
//! is a token decoded through the table. Tokens whose table base is `+` are
//! continuation digits extending the preceding run in little-endian base-16.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::alphabet::{pile_of, symbol_of, ALPHABET_SIZE};
use crate::counts::LetterCount;
use crate::LetterNumber;

use super::{CodecError, RunSink, RLE_V3_MAGIC};

/// Run-length table the v3 writer emits, one row per alphabet symbol plus
/// the continuation range: `(base, range_length, first_run_length)`.
const V3_TABLE: [(u8, u8, u16); 7] = [
    (b'A', 58, 1),
    (b'C', 58, 1),
    (b'G', 58, 1),
    (b'T', 58, 1),
    (b'N', 4, 1),
    (b'$', 4, 1),
    (b'+', 16, 0),
];

/// A decoded run.
type Run = (u8, LetterNumber);

/// Byte-level run producers backing [`RunReader`].
pub trait RunSource {
    /// Decode the next complete run, or `None` at end of data.
    fn next_run(&mut self) -> Result<Option<Run>, CodecError>;
    /// Seek back to the first data byte.
    fn rewind(&mut self) -> Result<(), CodecError>;
    /// Seek to an absolute file offset (must be a token boundary).
    fn seek(&mut self, file_offset: u64) -> Result<(), CodecError>;
    /// Absolute offset of the next token to be consumed.
    fn file_pos(&self) -> u64;
    /// Path of the underlying file, for diagnostics.
    fn path(&self) -> &Path;
}

/// Generic reader over a [`RunSource`]: carries the pending partial run so
/// that adjacent `read_and_count`/`read_and_send` calls spanning a run
/// boundary stay position-exact.
#[derive(Debug)]
pub struct RunReader<S> {
    src: S,
    pending: Option<Run>,
    pos: LetterNumber,
}

impl<S: RunSource> RunReader<S> {
    fn new(src: S) -> Self {
        Self {
            src,
            pending: None,
            pos: 0,
        }
    }

    /// Return to the first data byte.
    pub fn rewind(&mut self) -> Result<(), CodecError> {
        self.src.rewind()?;
        self.pending = None;
        self.pos = 0;
        Ok(())
    }

    /// Current BWT position within the pile.
    pub fn tell(&self) -> LetterNumber {
        self.pos
    }

    /// Absolute file offset of the next token.
    pub fn file_pos(&self) -> u64 {
        self.src.file_pos()
    }

    /// Reposition to a token boundary, declaring its BWT position.
    pub fn seek(&mut self, file_offset: u64, bwt_pos: LetterNumber) -> Result<(), CodecError> {
        self.src.seek(file_offset)?;
        self.pending = None;
        self.pos = bwt_pos;
        Ok(())
    }

    /// Pull the next whole run, bypassing the pending-run buffer. Used by
    /// the index builder, which always scans from a fresh rewind.
    pub(crate) fn next_raw_run(&mut self) -> Result<Option<Run>, CodecError> {
        debug_assert!(self.pending.is_none());
        self.src.next_run()
    }

    /// See [`super::SegmentReader::read_and_count`].
    pub fn read_and_count(
        &mut self,
        counts: &mut LetterCount,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        if n == 0 {
            return Ok(0);
        }
        let mut left = n;
        loop {
            let (symbol, len) = match self.pending.take() {
                Some(run) => run,
                None => match self.src.next_run()? {
                    Some(run) => run,
                    None => {
                        self.pos += n - left;
                        return Ok(n - left);
                    }
                },
            };
            let pile = self.pile_of_checked(symbol)?;
            if left > len {
                counts.add(pile, len);
                left -= len;
            } else {
                counts.add(pile, left);
                if len > left {
                    self.pending = Some((symbol, len - left));
                }
                self.pos += n;
                return Ok(n);
            }
        }
    }

    /// See [`super::SegmentReader::read_and_send`].
    pub fn read_and_send(
        &mut self,
        sink: &mut dyn RunSink,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        if n == 0 {
            return Ok(0);
        }
        let mut left = n;
        loop {
            let (symbol, len) = match self.pending.take() {
                Some(run) => run,
                None => match self.src.next_run()? {
                    Some(run) => run,
                    None => {
                        self.pos += n - left;
                        return Ok(n - left);
                    }
                },
            };
            if left > len {
                sink.send_run(symbol, len)?;
                left -= len;
            } else {
                sink.send_run(symbol, left)?;
                if len > left {
                    self.pending = Some((symbol, len - left));
                }
                self.pos += n;
                return Ok(n);
            }
        }
    }

    /// See [`super::SegmentReader::read_bytes`].
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut filled = 0;
        while filled < buf.len() {
            let (symbol, len) = match self.pending.take() {
                Some(run) => run,
                None => match self.src.next_run()? {
                    Some(run) => run,
                    None => break,
                },
            };
            let take = len.min((buf.len() - filled) as LetterNumber) as usize;
            buf[filled..filled + take].fill(symbol);
            filled += take;
            if len > take as LetterNumber {
                self.pending = Some((symbol, len - take as LetterNumber));
            }
        }
        self.pos += filled as LetterNumber;
        Ok(filled)
    }

    fn pile_of_checked(&self, symbol: u8) -> Result<u8, CodecError> {
        pile_of(symbol).ok_or_else(|| CodecError::ForeignSymbol {
            path: self.src.path().to_path_buf(),
            byte: symbol,
            offset: self.src.file_pos(),
        })
    }
}

//
// RLE v1
//

/// Token stream of a headerless v1 segment.
#[derive(Debug)]
pub struct RleV1Source {
    path: PathBuf,
    file: BufReader<File>,
    file_pos: u64,
}

impl RunSource for RleV1Source {
    fn next_run(&mut self) -> Result<Option<Run>, CodecError> {
        let mut byte = [0u8; 1];
        match self.file.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => {
                let token = byte[0];
                let pile = token & 0x0F;
                if pile as usize >= ALPHABET_SIZE {
                    return Err(CodecError::CorruptToken {
                        path: self.path.clone(),
                        offset: self.file_pos,
                    });
                }
                self.file_pos += 1;
                Ok(Some((symbol_of(pile), 1 + (token >> 4) as LetterNumber)))
            }
            Err(e) => Err(CodecError::io(&self.path, e)),
        }
    }

    fn rewind(&mut self) -> Result<(), CodecError> {
        self.seek(0)
    }

    fn seek(&mut self, file_offset: u64) -> Result<(), CodecError> {
        self.file
            .seek(SeekFrom::Start(file_offset))
            .map_err(|e| CodecError::io(&self.path, e))?;
        self.file_pos = file_offset;
        Ok(())
    }

    fn file_pos(&self) -> u64 {
        self.file_pos
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Reader over a v1 segment.
pub type RleV1Reader = RunReader<RleV1Source>;

impl RleV1Reader {
    /// Open `path` for streaming from the start.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::io(path, e))?;
        Ok(RunReader::new(RleV1Source {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            file_pos: 0,
        }))
    }
}

//
// RLE v3
//

/// Token stream of a headered v3 segment.
#[derive(Debug)]
pub struct RleV3Source {
    path: PathBuf,
    file: BufReader<File>,
    file_pos: u64,
    data_start: u64,
    peeked: Option<u8>,
    /// Per-token decoded run length.
    lengths: [u16; 256],
    /// Per-token base symbol; `b'+'` marks a continuation digit.
    symbols: [u8; 256],
    /// Largest primary run length per pile; first continuation multiplier.
    max_len: [LetterNumber; ALPHABET_SIZE],
    /// Base of the continuation digits (range length of the `+` row).
    cont_base: LetterNumber,
}

impl RleV3Source {
    fn open(path: &Path) -> Result<Self, CodecError> {
        let mut file =
            BufReader::new(File::open(path).map_err(|e| CodecError::io(path, e))?);
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)
            .map_err(|e| CodecError::io(path, e))?;
        if magic != RLE_V3_MAGIC {
            return Err(CodecError::BadHeader {
                path: path.to_path_buf(),
                detail: "missing RLE v3 magic".into(),
            });
        }

        let mut lengths = [0u16; 256];
        let mut symbols = [0u8; 256];
        let mut max_len = [0; ALPHABET_SIZE];
        let mut cont_base = 0;
        let mut next_code: u32 = 0;
        let mut header_len = 8u64;

        while next_code < 256 {
            let mut rec = [0u8; 4];
            file.read_exact(&mut rec)
                .map_err(|_| CodecError::UnexpectedEof {
                    path: path.to_path_buf(),
                })?;
            header_len += 4;
            let (base, range_len) = (rec[0], rec[1] as u32);
            let first_run_len = u16::from_le_bytes([rec[2], rec[3]]);
            if next_code + range_len > 256 || range_len == 0 {
                return Err(CodecError::BadHeader {
                    path: path.to_path_buf(),
                    detail: format!("run-length table overruns 256 codes at {base}"),
                });
            }
            for i in 0..range_len {
                lengths[(next_code + i) as usize] = first_run_len + i as u16;
                symbols[(next_code + i) as usize] = base;
            }
            if base == b'+' {
                cont_base = range_len as LetterNumber;
            } else {
                match pile_of(base) {
                    Some(p) => {
                        max_len[p as usize] =
                            first_run_len as LetterNumber + range_len as LetterNumber - 1
                    }
                    None => {
                        return Err(CodecError::BadHeader {
                            path: path.to_path_buf(),
                            detail: format!("table base 0x{base:02x} not in alphabet"),
                        })
                    }
                }
            }
            next_code += range_len;
        }

        // `file` now sits on the first data byte.
        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_pos: header_len,
            data_start: header_len,
            peeked: None,
            lengths,
            symbols,
            max_len,
            cont_base,
        })
    }

    fn next_byte(&mut self) -> Result<Option<u8>, CodecError> {
        if let Some(b) = self.peeked.take() {
            return Ok(Some(b));
        }
        let mut byte = [0u8; 1];
        match self.file.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) => Err(CodecError::io(&self.path, e)),
        }
    }

    fn peek_byte(&mut self) -> Result<Option<u8>, CodecError> {
        if self.peeked.is_none() {
            let mut byte = [0u8; 1];
            match self.file.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => self.peeked = Some(byte[0]),
                Err(e) => return Err(CodecError::io(&self.path, e)),
            }
        }
        Ok(self.peeked)
    }
}

impl RunSource for RleV3Source {
    fn next_run(&mut self) -> Result<Option<Run>, CodecError> {
        let token = match self.next_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        let symbol = self.symbols[token as usize];
        if symbol == b'+' {
            return Err(CodecError::CorruptToken {
                path: self.path.clone(),
                offset: self.file_pos,
            });
        }
        self.file_pos += 1;

        let mut len = self.lengths[token as usize] as LetterNumber;
        // Continuation digits are little-endian: the first extends by
        // multiples of this pile's primary range, later ones by successive
        // powers of the continuation base.
        let pile = pile_of(symbol).expect("table bases are validated at open");
        let mut multiplier = self.max_len[pile as usize];
        while let Some(next) = self.peek_byte()? {
            if self.symbols[next as usize] != b'+' {
                break;
            }
            self.peeked = None;
            self.file_pos += 1;
            len += self.lengths[next as usize] as LetterNumber * multiplier;
            multiplier *= self.cont_base;
        }
        Ok(Some((symbol, len)))
    }

    fn rewind(&mut self) -> Result<(), CodecError> {
        self.seek(self.data_start)
    }

    fn seek(&mut self, file_offset: u64) -> Result<(), CodecError> {
        self.file
            .seek(SeekFrom::Start(file_offset))
            .map_err(|e| CodecError::io(&self.path, e))?;
        self.file_pos = file_offset;
        self.peeked = None;
        Ok(())
    }

    fn file_pos(&self) -> u64 {
        self.file_pos
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Reader over a v3 segment.
pub type RleV3Reader = RunReader<RleV3Source>;

impl RleV3Reader {
    /// Open `path`, parsing and validating the header and run-length table.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        Ok(RunReader::new(RleV3Source::open(path)?))
    }
}

//
// Writers
//

#[derive(Debug)]
struct TokenFile {
    path: PathBuf,
    file: BufWriter<File>,
    pending: Option<Run>,
}

impl TokenFile {
    fn create(path: &Path) -> Result<Self, CodecError> {
        let file = File::create(path).map_err(|e| CodecError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            pending: None,
        })
    }

    fn push(&mut self, token: u8) -> Result<(), CodecError> {
        self.file
            .write_all(&[token])
            .map_err(|e| CodecError::io(&self.path, e))
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.file
            .write_all(bytes)
            .map_err(|e| CodecError::io(&self.path, e))
    }
}

/// Writer producing a v1 segment.
#[derive(Debug)]
pub struct RleV1Writer {
    out: TokenFile,
}

impl RleV1Writer {
    /// Create (or truncate) `path`.
    pub fn create(path: &Path) -> Result<Self, CodecError> {
        Ok(Self {
            out: TokenFile::create(path)?,
        })
    }

    /// Append a run, coalescing with the buffered one.
    pub fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        if len == 0 {
            return Ok(());
        }
        match self.out.pending {
            Some((s, ref mut l)) if s == symbol => *l += len,
            _ => {
                if let Some((s, l)) = self.out.pending.take() {
                    self.encode_run(s, l)?;
                }
                self.out.pending = Some((symbol, len));
            }
        }
        Ok(())
    }

    /// Append raw symbols.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        for &b in data {
            self.send_run(b, 1)?;
        }
        Ok(())
    }

    /// Encode the buffered run and push everything to disk.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        if let Some((s, l)) = self.out.pending.take() {
            self.encode_run(s, l)?;
        }
        self.out
            .file
            .flush()
            .map_err(|e| CodecError::io(&self.out.path, e))
    }

    fn encode_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        let pile = pile_of(symbol).ok_or(CodecError::InvalidSymbol { byte: symbol })?;
        let mut remaining = len - 1;
        let full_tokens = remaining >> 4;
        for _ in 0..full_tokens {
            self.out.push(pile | 0xF0)?;
        }
        remaining -= full_tokens << 4;
        self.out.push(pile | ((remaining as u8) << 4))
    }
}

impl RunSink for RleV1Writer {
    fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        RleV1Writer::send_run(self, symbol, len)
    }
}

impl Drop for RleV1Writer {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!("flush of {} failed on drop: {err}", self.out.path.display());
        }
    }
}

/// Writer producing a v3 segment. The header and run-length table are
/// written at creation time; tokens follow.
#[derive(Debug)]
pub struct RleV3Writer {
    out: TokenFile,
    /// First bytecode of each pile's primary range.
    first_code: [u8; ALPHABET_SIZE],
    /// Primary range length of each pile.
    max_len: [LetterNumber; ALPHABET_SIZE],
    cont_first: u8,
    cont_base: LetterNumber,
}

impl RleV3Writer {
    /// Create (or truncate) `path` and emit the header.
    pub fn create(path: &Path) -> Result<Self, CodecError> {
        let mut out = TokenFile::create(path)?;
        out.write_raw(&RLE_V3_MAGIC)?;

        let mut first_code = [0u8; ALPHABET_SIZE];
        let mut max_len = [0; ALPHABET_SIZE];
        let mut cont_first = 0u8;
        let mut cont_base = 0;
        let mut next_code: u16 = 0;
        for &(base, range_len, first_run_len) in &V3_TABLE {
            out.write_raw(&[base, range_len])?;
            out.write_raw(&first_run_len.to_le_bytes())?;
            if base == b'+' {
                cont_first = next_code as u8;
                cont_base = range_len as LetterNumber;
            } else {
                let pile = pile_of(base).expect("table bases are alphabet symbols") as usize;
                first_code[pile] = next_code as u8;
                max_len[pile] = range_len as LetterNumber;
            }
            next_code += range_len as u16;
        }
        debug_assert_eq!(next_code, 256);

        Ok(Self {
            out,
            first_code,
            max_len,
            cont_first,
            cont_base,
        })
    }

    /// Append a run, coalescing with the buffered one.
    pub fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        if len == 0 {
            return Ok(());
        }
        match self.out.pending {
            Some((s, ref mut l)) if s == symbol => *l += len,
            _ => {
                if let Some((s, l)) = self.out.pending.take() {
                    self.encode_run(s, l)?;
                }
                self.out.pending = Some((symbol, len));
            }
        }
        Ok(())
    }

    /// Append raw symbols.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        for &b in data {
            self.send_run(b, 1)?;
        }
        Ok(())
    }

    /// Encode the buffered run and push everything to disk.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        if let Some((s, l)) = self.out.pending.take() {
            self.encode_run(s, l)?;
        }
        self.out
            .file
            .flush()
            .map_err(|e| CodecError::io(&self.out.path, e))
    }

    fn encode_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        let pile =
            pile_of(symbol).ok_or(CodecError::InvalidSymbol { byte: symbol })? as usize;
        let max = self.max_len[pile];
        let mut remaining = len - 1;

        // Primary token carries the low digit in this pile's range.
        self.out
            .push(self.first_code[pile] + (remaining % max) as u8)?;
        remaining /= max;

        // Higher digits ride on continuation tokens, little-endian.
        while remaining > 0 {
            self.out
                .push(self.cont_first + (remaining % self.cont_base) as u8)?;
            remaining /= self.cont_base;
        }
        Ok(())
    }
}

impl RunSink for RleV3Writer {
    fn send_run(&mut self, symbol: u8, len: LetterNumber) -> Result<(), CodecError> {
        RleV3Writer::send_run(self, symbol, len)
    }
}

impl Drop for RleV3Writer {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!("flush of {} failed on drop: {err}", self.out.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::ALPHABET;
    use test_case::test_case;

    fn decode_all_v3(path: &Path) -> Vec<u8> {
        let mut r = RleV3Reader::open(path).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 97];
        loop {
            let got = r.read_bytes(&mut buf).unwrap();
            if got == 0 {
                break;
            }
            out.extend_from_slice(&buf[..got]);
        }
        out
    }

    #[test_case(1; "single")]
    #[test_case(57; "below primary max")]
    #[test_case(58; "primary max")]
    #[test_case(59; "first continuation")]
    #[test_case(58 * 16 + 58; "two digit boundary")]
    #[test_case(100_000; "long run")]
    fn v3_run_lengths_round_trip(len: usize) {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        {
            let mut w = RleV3Writer::create(&p).unwrap();
            w.send_run(b'G', len as LetterNumber).unwrap();
            w.flush().unwrap();
        }
        assert_eq!(decode_all_v3(&p), vec![b'G'; len]);
    }

    #[test]
    fn v3_adjacent_same_symbol_runs_coalesce_to_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let split = dir.path().join("split");
        let whole = dir.path().join("whole");
        {
            let mut w = RleV3Writer::create(&split).unwrap();
            w.send_run(b'A', 40).unwrap();
            w.send_run(b'A', 30).unwrap();
            w.flush().unwrap();
        }
        {
            let mut w = RleV3Writer::create(&whole).unwrap();
            w.send_run(b'A', 70).unwrap();
            w.flush().unwrap();
        }
        assert_eq!(
            std::fs::read(&split).unwrap(),
            std::fs::read(&whole).unwrap()
        );
    }

    #[test]
    fn v3_header_layout_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        {
            let mut w = RleV3Writer::create(&p).unwrap();
            w.send_run(b'A', 1).unwrap();
            w.flush().unwrap();
        }
        let bytes = std::fs::read(&p).unwrap();
        assert_eq!(&bytes[..8], &RLE_V3_MAGIC);
        // 7 table records of 4 bytes each, then one token for the run A1.
        assert_eq!(bytes.len(), 8 + 7 * 4 + 1);
        assert_eq!(bytes[8..12], [b'A', 58, 1, 0]);
        assert_eq!(bytes[32..36], [b'+', 16, 0, 0]);
        assert_eq!(bytes[36], 0); // bytecode 0 == run of one A
    }

    #[test]
    fn v1_tokens_round_trip_across_the_sixteen_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        {
            let mut w = RleV1Writer::create(&p).unwrap();
            w.send_run(b'T', 16).unwrap();
            w.send_run(b'C', 17).unwrap();
            w.flush().unwrap();
        }
        // 16 Ts fit one token; 17 Cs need a full token plus a length-1 token.
        let bytes = std::fs::read(&p).unwrap();
        assert_eq!(bytes.len(), 3);

        let mut r = RleV1Reader::open(&p).unwrap();
        let mut buf = [0u8; 64];
        let got = r.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf[..got], [vec![b'T'; 16], vec![b'C'; 17]].concat());
    }

    #[test]
    fn read_and_count_straddles_run_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        {
            let mut w = RleV3Writer::create(&p).unwrap();
            w.send_run(b'A', 10).unwrap();
            w.send_run(b'C', 10).unwrap();
            w.flush().unwrap();
        }
        let mut r = RleV3Reader::open(&p).unwrap();
        let mut c = LetterCount::new();
        assert_eq!(r.read_and_count(&mut c, 5).unwrap(), 5);
        assert_eq!(r.read_and_count(&mut c, 7).unwrap(), 7);
        assert_eq!(c[1], 10);
        assert_eq!(c[2], 2);
        assert_eq!(r.tell(), 12);
        assert_eq!(r.read_and_count(&mut c, LetterNumber::MAX).unwrap(), 8);
        assert_eq!(c[2], 10);
    }

    #[test]
    fn seek_resumes_at_a_token_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        {
            let mut w = RleV3Writer::create(&p).unwrap();
            w.send_run(b'A', 3).unwrap();
            w.send_run(b'C', 4).unwrap();
            w.flush().unwrap();
        }
        let mut r = RleV3Reader::open(&p).unwrap();
        let mut c = LetterCount::new();
        r.read_and_count(&mut c, 3).unwrap();
        let (offset, bwt_pos) = (r.file_pos(), r.tell());

        r.read_and_count(&mut c, 4).unwrap();
        r.seek(offset, bwt_pos).unwrap();
        let mut c2 = LetterCount::new();
        assert_eq!(r.read_and_count(&mut c2, 4).unwrap(), 4);
        assert_eq!(c2[2], 4);
    }

    #[test]
    fn all_alphabet_symbols_encode_and_decode() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seg");
        {
            let mut w = RleV3Writer::create(&p).unwrap();
            for &s in ALPHABET.iter() {
                w.send_run(s, 5).unwrap();
            }
            w.flush().unwrap();
        }
        let mut expected = Vec::new();
        for &s in ALPHABET.iter() {
            expected.extend(std::iter::repeat(s).take(5));
        }
        assert_eq!(decode_all_v3(&p), expected);
    }
}
