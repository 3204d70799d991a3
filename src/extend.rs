//! Interval extension: given (k-mer, position, count) records over a BWT,
//! walk every covered row back to its read's terminator and resolve the
//! owning sequence ids through the end-pos permutation.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::alphabet::{pile_of, symbol_of, ALPHABET_SIZE};
use crate::backtracker::{
    BacktrackError, BacktrackSettings, BacktrackStats, OneSetBacktracker, SideState,
};
use crate::builder::pile_path;
use crate::codec::{open_reader, CodecError, SegmentReader};
use crate::counts::{LetterCount, PileCounts};
use crate::endpos::{EndPosError, EndPosFile};
use crate::handlers::{HandlerError, IntervalHandler};
use crate::rangestore::{Range, RangeError, RangeStore};
use crate::{LetterNumber, PileFlags};

/// Errors from the extension pipeline.
#[derive(Debug, Error)]
pub enum ExtendError {
    /// Segment codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Range store failure.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Traversal failure.
    #[error(transparent)]
    Backtrack(#[from] BacktrackError),

    /// End-pos failure.
    #[error(transparent)]
    EndPos(#[from] EndPosError),

    /// Underlying file-system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being touched.
        path: PathBuf,
        /// Originating error.
        #[source]
        source: std::io::Error,
    },

    /// A malformed intervals file line.
    #[error("{path}:{line}: malformed interval record")]
    Malformed {
        /// Intervals file.
        path: PathBuf,
        /// One-based line number.
        line: usize,
    },

    /// Bad or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// One input interval: a k-mer with its BWT position and row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalRecord {
    /// The matched k-mer.
    pub kmer: String,
    /// Interval start, local to the pile of the k-mer's first character.
    pub position: LetterNumber,
    /// Interval length.
    pub count: LetterNumber,
    /// Dollar ranks collected while extending.
    pub dollar_positions: Vec<LetterNumber>,
}

/// Parse a `<kmer> <position> <count>` intervals file.
pub fn read_intervals(path: &Path) -> Result<Vec<IntervalRecord>, ExtendError> {
    let file = File::open(path).map_err(|e| ExtendError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut records = Vec::new();
    for (line_idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ExtendError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = || ExtendError::Malformed {
            path: path.to_path_buf(),
            line: line_idx + 1,
        };
        let mut fields = line.split_whitespace();
        let kmer = fields.next().ok_or_else(malformed)?.to_string();
        let position = fields
            .next()
            .ok_or_else(malformed)?
            .parse()
            .map_err(|_| malformed())?;
        let count = fields
            .next()
            .ok_or_else(malformed)?
            .parse()
            .map_err(|_| malformed())?;
        records.push(IntervalRecord {
            kmer,
            position,
            count,
            dollar_positions: Vec::new(),
        });
    }
    Ok(records)
}

/// Write records with their collected dollar ranks
/// (`<kmer> <position> <count>: <rank>...`).
pub fn write_intervals_v2(
    w: &mut impl Write,
    records: &[IntervalRecord],
) -> std::io::Result<()> {
    for rec in records {
        write!(w, "{} {} {}:", rec.kmer, rec.position, rec.count)?;
        for rank in &rec.dollar_positions {
            write!(w, " {rank}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Everything an extension run needs.
#[derive(Debug, Clone)]
pub struct ExtendConfig {
    /// Pile-set prefix.
    pub bwt_prefix: PathBuf,
    /// Intervals file to resolve.
    pub intervals: PathBuf,
    /// Write `<seq> # <kmer>` lines here (requires the end-pos file).
    pub sequence_numbers_output: Option<PathBuf>,
    /// Write per-record dollar ranks here.
    pub dollar_positions_output: Option<PathBuf>,
    /// Reconstruct and print the full reads as they complete.
    pub propagate_sequence: bool,
    /// Consult `.idx` sidecars where present.
    pub use_index: bool,
}

/// A single-row sub-interval of one input record, tracked through the
/// traversal via the range user data.
#[derive(Debug)]
struct SubInterval {
    parent: usize,
    dollar_positions: Vec<LetterNumber>,
}

/// Handler that harvests terminator ranks onto the owning sub-interval and
/// otherwise follows every symbol still present.
struct ExtenderHandler<'a> {
    subs: &'a mut Vec<SubInterval>,
    records: &'a [IntervalRecord],
    end_pos: Option<EndPosFile>,
    propagate_sequence: bool,
    out: Box<dyn Write + Send>,
}

impl std::fmt::Debug for ExtenderHandler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtenderHandler")
            .field("subs", &self.subs.len())
            .finish()
    }
}

impl IntervalHandler for ExtenderHandler<'_> {
    fn found_in_a_only(
        &mut self,
        _pile: u8,
        counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        _bwt_substring: Option<&[u8]>,
        range: &Range,
        propagate: &mut PileFlags,
        cycle: u32,
    ) -> Result<(), HandlerError> {
        if counts_this_range[0] > 0 {
            if let Some(idx) = range.user_data {
                let sub = &mut self.subs[idx as usize];
                let parent = sub.parent;
                for k in 0..counts_this_range[0] {
                    sub.dollar_positions.push(counts_so_far[0] + k);
                }
                if self.propagate_sequence && !range.word.is_empty() {
                    self.print_completed_read(parent, idx as usize, range, cycle)?;
                }
            }
        }
        for symbol in 1..ALPHABET_SIZE {
            propagate[symbol] = counts_this_range[symbol as u8] > 0;
        }
        // Rows that just ended have been harvested; nothing to extend there.
        propagate[0] = false;
        Ok(())
    }

    fn found_in_b_only(
        &mut self,
        _pile: u8,
        _counts_so_far: &LetterCount,
        _counts_this_range: &LetterCount,
        _bwt_substring: Option<&[u8]>,
        _range: &Range,
        _propagate: &mut PileFlags,
        _cycle: u32,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    fn found_in_both(
        &mut self,
        _pile: u8,
        _counts_this_range_a: &LetterCount,
        _counts_this_range_b: &LetterCount,
        _range_a: &Range,
        _range_b: &Range,
        _propagate_a: &mut PileFlags,
        _propagate_b: &mut PileFlags,
        _is_breakpoint: &mut bool,
        _cycle: u32,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    fn make_child_range(
        &mut self,
        word: Vec<u8>,
        pos: LetterNumber,
        num: LetterNumber,
        is_bkpt_extension: bool,
        parent: &Range,
        _symbol: u8,
    ) -> Range {
        Range {
            word,
            pos,
            num,
            is_bkpt_extension,
            user_data: parent.user_data,
        }
    }
}

impl ExtenderHandler<'_> {
    /// Emit an `Output:` record for a read whose start was just reached.
    fn print_completed_read(
        &mut self,
        parent: usize,
        sub_idx: usize,
        range: &Range,
        cycle: u32,
    ) -> Result<(), HandlerError> {
        let rec = &self.records[parent];
        let sub = &self.subs[sub_idx];
        let (dollar, sequence) = match (&mut self.end_pos, sub.dollar_positions.first()) {
            (Some(end_pos), Some(&rank)) => {
                let seq = end_pos.sequence_for_dollar(rank).map(|(s, _)| s).unwrap_or(0);
                (rank, seq)
            }
            _ => (0, 0),
        };
        writeln!(
            self.out,
            "Output:\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            rec.kmer,
            rec.position,
            rec.count,
            cycle - 1,
            dollar,
            sequence,
            String::from_utf8_lossy(&range.word),
        )?;
        Ok(())
    }
}

/// Run an extension to completion, returning the records with their
/// collected dollar ranks.
pub fn run_extend(config: &ExtendConfig) -> Result<Vec<IntervalRecord>, ExtendError> {
    if config.sequence_numbers_output.is_some()
        && !crate::endpos::end_pos_path(&config.bwt_prefix).exists()
    {
        return Err(ExtendError::Config(
            "sequence-number output needs the end-pos file (build with --generate-end-pos)"
                .into(),
        ));
    }

    let mut readers = open_pile_readers(&config.bwt_prefix, config.use_index)?;
    let counts_per_pile = initial_pile_counts(&mut readers)?;
    let total: LetterNumber = counts_per_pile.total();
    let sequence_count = counts_per_pile.pile_len(0).max(1);
    let cycle_count = (total / sequence_count) as u32;

    let mut records = read_intervals(&config.intervals)?;
    records.sort_by_key(|r| r.position);

    let mut subs: Vec<SubInterval> = Vec::new();
    let mut store = RangeStore::new(config.propagate_sequence, true, None)?;
    seed_sub_intervals(&records, &mut subs, &mut store, &counts_per_pile, config)?;

    let mut handler = ExtenderHandler {
        subs: &mut subs,
        records: &records,
        end_pos: EndPosFile::open_prefix(&config.bwt_prefix).ok(),
        propagate_sequence: config.propagate_sequence,
        out: Box::new(std::io::stdout()),
    };

    let traversal = (|| -> Result<(), ExtendError> {
        for cycle in 1..=cycle_count + 10 {
            store.swap_cycle()?;
            let settings = BacktrackSettings {
                subset: "",
                cycle: cycle + 1,
                no_comparison_skip: true,
                propagate_sequence: config.propagate_sequence,
            };

            let mut cycle_stats = BacktrackStats::default();
            for pile in 0..ALPHABET_SIZE as u8 {
                readers[pile as usize].rewind()?;
                let mut pos: LetterNumber = 0;
                let mut so_far = if pile == 0 {
                    LetterCount::new()
                } else {
                    counts_per_pile.cumulative_through(pile - 1)
                };
                for portion in 0..ALPHABET_SIZE as u8 {
                    store.set_portion(pile, portion)?;
                    let mut backtracker = OneSetBacktracker {
                        side: SideState {
                            reader: &mut readers[pile as usize],
                            store: &mut store,
                            current_pos: &mut pos,
                            counts_so_far: &mut so_far,
                        },
                        settings,
                        propagate_to_end: false,
                        end_pos: None,
                    };
                    let stats = backtracker.process(pile, &mut handler)?;
                    cycle_stats.ranges += stats.ranges;
                }
            }
            tracing::debug!("extension cycle {cycle}: {} intervals", cycle_stats.ranges);
            if cycle_stats.ranges == 0 {
                break;
            }
        }
        Ok(())
    })();
    drop(handler);
    if let Err(err) = traversal {
        let kept = store.keep_scratch_for_diagnosis();
        tracing::error!("extension aborted; interval queues kept at {}", kept.display());
        return Err(err);
    }

    // Fold the per-row harvests back onto their records.
    for sub in &subs {
        let rec = &mut records[sub.parent];
        rec.dollar_positions.extend(&sub.dollar_positions);
    }
    for rec in &mut records {
        rec.dollar_positions.sort_unstable();
    }

    if let Some(path) = &config.dollar_positions_output {
        let mut w = BufWriter::new(File::create(path).map_err(|e| ExtendError::Io {
            path: path.clone(),
            source: e,
        })?);
        write_intervals_v2(&mut w, &records).map_err(|e| ExtendError::Io {
            path: path.clone(),
            source: e,
        })?;
    }

    if let Some(path) = &config.sequence_numbers_output {
        let mut end_pos = EndPosFile::open_prefix(&config.bwt_prefix)?;
        let mut w = BufWriter::new(File::create(path).map_err(|e| ExtendError::Io {
            path: path.clone(),
            source: e,
        })?);
        for rec in &records {
            for &rank in &rec.dollar_positions {
                let (sequence, subsequence) = end_pos.sequence_for_dollar(rank)?;
                writeln!(w, "{sequence} # {} (subSequence {subsequence})", rec.kmer)
                    .map_err(|e| ExtendError::Io {
                        path: path.clone(),
                        source: e,
                    })?;
            }
        }
        w.flush().map_err(|e| ExtendError::Io {
            path: path.clone(),
            source: e,
        })?;
    }

    Ok(records)
}

/// Split every record into single-row sub-intervals and seed them into the
/// cycle-1 queues, keyed by (pile of the k-mer head, following symbol).
fn seed_sub_intervals(
    records: &[IntervalRecord],
    subs: &mut Vec<SubInterval>,
    store: &mut RangeStore,
    counts_per_pile: &PileCounts,
    config: &ExtendConfig,
) -> Result<(), ExtendError> {
    let mut min_pos: LetterNumber = 0;
    for (parent, rec) in records.iter().enumerate() {
        let head = rec.kmer.as_bytes().first().copied().ok_or_else(|| {
            ExtendError::Config(format!("record {parent} has an empty k-mer"))
        })?;
        let head_pile = pile_of(head)
            .ok_or_else(|| ExtendError::Config(format!("k-mer {} not over the alphabet", rec.kmer)))?;

        for row in 0..rec.count {
            let sub_idx = subs.len();
            subs.push(SubInterval {
                parent,
                dollar_positions: Vec::new(),
            });

            let mut pos = rec.position + row;
            let mut count: LetterNumber = 1;
            // Overlapping records: never seed the same row twice.
            if pos < min_pos {
                let diff = min_pos - pos;
                if count > diff {
                    pos = min_pos;
                    count -= diff;
                } else {
                    continue;
                }
            }

            let mut start: LetterNumber = 0;
            let mut end: LetterNumber = 0;
            for portion in 0..ALPHABET_SIZE as u8 {
                start = end;
                end += counts_per_pile[head_pile][portion];
                let overlap_start = pos.max(start);
                let overlap_end = (pos + count).min(end);
                if overlap_start < overlap_end {
                    let word = if config.propagate_sequence {
                        vec![head, symbol_of(portion)]
                    } else {
                        Vec::new()
                    };
                    let mut range =
                        Range::new(word, overlap_start, overlap_end - overlap_start);
                    range.user_data = Some(sub_idx as u64);
                    store.add_range(&range, head_pile, portion, "", 1)?;
                }
            }
            min_pos = pos + count;
        }
    }
    Ok(())
}

fn open_pile_readers(prefix: &Path, use_index: bool) -> Result<Vec<SegmentReader>, ExtendError> {
    let mut readers = Vec::with_capacity(ALPHABET_SIZE);
    for pile in 0..ALPHABET_SIZE as u8 {
        let path = pile_path(prefix, pile);
        if !path.exists() {
            return Err(ExtendError::Config(format!(
                "missing pile segment {}",
                path.display()
            )));
        }
        readers.push(open_reader(&path, use_index)?);
    }
    Ok(readers)
}

fn initial_pile_counts(readers: &mut [SegmentReader]) -> Result<PileCounts, ExtendError> {
    let mut counts = PileCounts::new();
    for (pile, reader) in readers.iter_mut().enumerate() {
        let mut c = LetterCount::new();
        reader.read_and_count(&mut c, LetterNumber::MAX)?;
        reader.rewind()?;
        counts[pile as u8] = c;
    }
    Ok(counts)
}
