//! Sparse segment index: every `chunk_runs` runs of an RLE segment, one
//! sample of (file offset, cumulative BWT position, per-symbol counts since
//! the previous sample). The indexed reader uses the samples to satisfy
//! large `read_and_count` requests in O(samples) instead of O(bytes);
//! results are observationally identical to the streamed path.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::alphabet::{pile_of, ALPHABET_SIZE};
use crate::counts::LetterCount;
use crate::LetterNumber;

use super::rle::{RunReader, RunSource};
use super::{
    detect_format, index_sidecar_path, CodecError, RleV1Reader, RleV3Reader, RunSink,
    SegmentFormat, SegmentReader,
};

/// Magic prefix of an index sidecar, version 2.
pub const INDEX_MAGIC: [u8; 8] = [b'B', b'W', b'I', 13, 10, 26, 2, 0];

/// Sample interval used when none is given.
pub const DEFAULT_CHUNK_RUNS: usize = 8192;

/// One sample point.
#[derive(Debug, Clone)]
pub struct IndexSample {
    /// Absolute file offset of the first token after the sampled chunk.
    pub file_offset: u64,
    /// Cumulative BWT position at that offset.
    pub bwt_pos: LetterNumber,
    /// Per-symbol counts of the chunk ending here (not cumulative).
    pub counts: LetterCount,
}

/// The loaded sidecar.
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
    samples: Vec<IndexSample>,
}

impl SegmentIndex {
    /// Parse a `.idx` sidecar.
    pub fn load(path: &Path) -> Result<Self, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::io(path, e))?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)
            .map_err(|e| CodecError::io(path, e))?;
        if magic != INDEX_MAGIC {
            return Err(CodecError::BadHeader {
                path: path.to_path_buf(),
                detail: "not a version-2 segment index".into(),
            });
        }
        let mut widths = [0u8; 2];
        r.read_exact(&mut widths)
            .map_err(|e| CodecError::io(path, e))?;
        if widths[0] as usize != ALPHABET_SIZE {
            return Err(CodecError::BadHeader {
                path: path.to_path_buf(),
                detail: format!(
                    "index built for alphabet size {}, expected {ALPHABET_SIZE}",
                    widths[0]
                ),
            });
        }
        if widths[1] as usize != std::mem::size_of::<LetterNumber>() {
            return Err(CodecError::BadHeader {
                path: path.to_path_buf(),
                detail: format!(
                    "index built with {}-byte counters, expected {}",
                    widths[1],
                    std::mem::size_of::<LetterNumber>()
                ),
            });
        }

        let mut samples = Vec::new();
        let mut bwt_pos: LetterNumber = 0;
        loop {
            let mut offset_bytes = [0u8; 8];
            match read_fully(&mut r, &mut offset_bytes).map_err(|e| CodecError::io(path, e))? {
                0 => break,
                8 => {}
                _ => {
                    return Err(CodecError::UnexpectedEof {
                        path: path.to_path_buf(),
                    })
                }
            }
            let file_offset = u64::from_le_bytes(offset_bytes);

            let mut counts = LetterCount::new();
            for pile in 0..ALPHABET_SIZE as u8 {
                let mut width = [0u8; 1];
                r.read_exact(&mut width)
                    .map_err(|_| CodecError::UnexpectedEof {
                        path: path.to_path_buf(),
                    })?;
                let width = width[0] as usize;
                if width > 8 {
                    return Err(CodecError::BadHeader {
                        path: path.to_path_buf(),
                        detail: format!("count wider than 8 bytes ({width})"),
                    });
                }
                if width > 0 {
                    let mut value = [0u8; 8];
                    r.read_exact(&mut value[..width]).map_err(|_| {
                        CodecError::UnexpectedEof {
                            path: path.to_path_buf(),
                        }
                    })?;
                    counts.add(pile, u64::from_le_bytes(value));
                }
            }
            bwt_pos += counts.total();
            samples.push(IndexSample {
                file_offset,
                bwt_pos,
                counts,
            });
        }
        Ok(Self { samples })
    }

    /// The sample points, in file order.
    pub fn samples(&self) -> &[IndexSample] {
        &self.samples
    }
}

fn read_fully(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..])? {
            0 => break,
            k => got += k,
        }
    }
    Ok(got)
}

/// Scan an RLE segment once, emitting a sample every `chunk_runs` runs (and
/// one for the final partial chunk) into `out`.
pub fn build_segment_index<S: RunSource>(
    reader: &mut RunReader<S>,
    out: &Path,
    chunk_runs: usize,
) -> Result<(), CodecError> {
    assert!(chunk_runs > 0, "chunk_runs must be positive");
    let file = File::create(out).map_err(|e| CodecError::io(out, e))?;
    let mut w = BufWriter::new(file);

    w.write_all(&INDEX_MAGIC)
        .map_err(|e| CodecError::io(out, e))?;
    w.write_all(&[
        ALPHABET_SIZE as u8,
        std::mem::size_of::<LetterNumber>() as u8,
    ])
    .map_err(|e| CodecError::io(out, e))?;

    reader.rewind()?;
    let mut counts = LetterCount::new();
    let mut runs_this_chunk = 0usize;
    let mut total_runs: u64 = 0;

    loop {
        let run = reader.next_raw_run()?;
        match run {
            Some((symbol, len)) => {
                let pile = pile_of(symbol).ok_or(CodecError::InvalidSymbol { byte: symbol })?;
                counts.add(pile, len);
                runs_this_chunk += 1;
                total_runs += 1;
                if runs_this_chunk == chunk_runs {
                    write_sample(&mut w, out, reader.file_pos(), &counts)?;
                    counts.clear();
                    runs_this_chunk = 0;
                }
            }
            None => {
                if runs_this_chunk > 0 {
                    write_sample(&mut w, out, reader.file_pos(), &counts)?;
                }
                break;
            }
        }
    }
    w.flush().map_err(|e| CodecError::io(out, e))?;
    tracing::debug!("indexed {total_runs} runs into {}", out.display());
    Ok(())
}

fn write_sample(
    w: &mut impl Write,
    path: &Path,
    file_offset: u64,
    counts: &LetterCount,
) -> Result<(), CodecError> {
    w.write_all(&file_offset.to_le_bytes())
        .map_err(|e| CodecError::io(path, e))?;
    for pile in 0..ALPHABET_SIZE as u8 {
        let value = counts[pile];
        let width = (8 - value.leading_zeros() / 8) as usize;
        w.write_all(&[width as u8])
            .map_err(|e| CodecError::io(path, e))?;
        if width > 0 {
            w.write_all(&value.to_le_bytes()[..width])
                .map_err(|e| CodecError::io(path, e))?;
        }
    }
    Ok(())
}

/// Build the `.idx` sidecar for a run-length segment file. ASCII segments
/// cannot be indexed.
pub fn build_index_for(segment: &Path, chunk_runs: usize) -> Result<PathBuf, CodecError> {
    let sidecar = index_sidecar_path(segment);
    match detect_format(segment)? {
        SegmentFormat::Ascii => {
            return Err(CodecError::Unsupported(
                "ASCII segments cannot carry a run index",
            ))
        }
        SegmentFormat::RleV1 => {
            let mut reader = RleV1Reader::open(segment)?;
            build_segment_index(&mut reader, &sidecar, chunk_runs)?;
        }
        SegmentFormat::RleV3 => {
            let mut reader = RleV3Reader::open(segment)?;
            build_segment_index(&mut reader, &sidecar, chunk_runs)?;
        }
    }
    Ok(sidecar)
}

/// A run-length reader that consults the sample index before streaming.
#[derive(Debug)]
pub struct IndexedReader {
    inner: Box<SegmentReader>,
    index: SegmentIndex,
    next: usize,
}

impl IndexedReader {
    /// Wrap `inner` (which must not itself be indexed) with `index`.
    pub fn new(inner: SegmentReader, index: SegmentIndex) -> Self {
        debug_assert!(!matches!(inner, SegmentReader::Indexed(_)));
        Self {
            inner: Box::new(inner),
            index,
            next: 0,
        }
    }

    /// Return to the first data byte.
    pub fn rewind(&mut self) -> Result<(), CodecError> {
        self.inner.rewind()?;
        self.next = 0;
        Ok(())
    }

    /// Current BWT position within the pile.
    pub fn tell(&self) -> LetterNumber {
        self.inner.tell()
    }

    /// Reposition to a token boundary, declaring its BWT position.
    pub fn seek(&mut self, file_offset: u64, bwt_pos: LetterNumber) -> Result<(), CodecError> {
        self.inner.seek(file_offset, bwt_pos)?;
        self.resync();
        Ok(())
    }

    /// Indexed `read_and_count`: jump over whole sampled chunks, then decode
    /// the residual tail.
    pub fn read_and_count(
        &mut self,
        counts: &mut LetterCount,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        self.resync();
        let mut left = n;
        let pos = self.inner.tell();
        let samples = &self.index.samples;

        if self.next < samples.len() && n > samples[self.next].bwt_pos - pos {
            // The request spans at least one sample point; find the last one
            // inside it.
            let mut last = self.next;
            while last < samples.len() && n > samples[last].bwt_pos - pos {
                last += 1;
            }
            last -= 1;

            if pos == 0 && self.next == 0 && left >= samples[0].bwt_pos {
                // Whole first chunk covered without touching the file.
                *counts += &samples[0].counts;
                left -= samples[0].bwt_pos;
                if last == 0 {
                    self.inner
                        .seek(samples[0].file_offset, samples[0].bwt_pos)?;
                }
            } else {
                left -= self
                    .inner
                    .read_and_count(counts, samples[self.next].bwt_pos - pos)?;
            }

            if self.next != last {
                left -= samples[last].bwt_pos - samples[self.next].bwt_pos;
                for sample in &samples[self.next + 1..=last] {
                    *counts += &sample.counts;
                }
                self.inner
                    .seek(samples[last].file_offset, samples[last].bwt_pos)?;
            }
            self.next = last + 1;
        }

        left -= self.inner.read_and_count(counts, left)?;
        Ok(n - left)
    }

    /// Stream through without index acceleration.
    pub fn read_and_send(
        &mut self,
        sink: &mut dyn RunSink,
        n: LetterNumber,
    ) -> Result<LetterNumber, CodecError> {
        let got = self.inner.read_and_send(sink, n)?;
        self.resync();
        Ok(got)
    }

    /// Stream through without index acceleration.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let got = self.inner.read_bytes(buf)?;
        self.resync();
        Ok(got)
    }

    fn resync(&mut self) {
        let pos = self.inner.tell();
        while self.next < self.index.samples.len()
            && self.index.samples[self.next].bwt_pos < pos
        {
            self.next += 1;
        }
    }
}
