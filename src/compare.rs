//! Compare driver: backward search over two pile sets in lock step.
//!
//! Cycle 1 seeds one whole-pile interval per non-terminator pile on both
//! sides, match-flagged; every later cycle consumes the queues the
//! previous one wrote. The policy (reference, tumour/normal, splice,
//! metagenomics) is a boxed [`IntervalHandler`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::alphabet::{symbol_of, ALPHABET_SIZE};
use crate::backtracker::{
    BacktrackError, BacktrackSettings, BacktrackStats, SideState, TwoSetBacktracker,
};
use crate::builder::pile_path;
use crate::codec::{open_reader, CodecError, SegmentReader};
use crate::counts::{LetterCount, PileCounts};
use crate::handlers::{
    HandlerError, IntervalHandler, MetagenomicsHandler, ReferenceHandler, SpliceHandler,
    TumourNormalHandler,
};
use crate::rangestore::{Range, RangeError, RangeStore};
use crate::taxonomy::{TaxTable, TaxonomyError};
use crate::{LetterNumber, MATCH_FLAG};

/// Errors from the compare pipeline.
#[derive(Debug, Error)]
pub enum CompareError {
    /// Segment codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Range store failure.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Traversal failure.
    #[error(transparent)]
    Backtrack(#[from] BacktrackError),

    /// Handler failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Taxonomy table failure.
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    /// Underlying file-system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being touched.
        path: PathBuf,
        /// Originating error.
        #[source]
        source: std::io::Error,
    },

    /// Bad or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Which policy drives the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    /// Reads (A) against a reference BWT (B).
    Reference,
    /// Two read collections, somatic-difference calling.
    TumourNormal,
    /// Transcript reads (A) against a genome (B).
    Splice,
    /// Reads (A) against a merged genome database (B) with taxonomy.
    Metagenomics,
}

impl CompareMode {
    /// Parse a CLI mode name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "reference" => Some(CompareMode::Reference),
            "tumour-normal" => Some(CompareMode::TumourNormal),
            "splice" => Some(CompareMode::Splice),
            "metagenomics" => Some(CompareMode::Metagenomics),
            _ => None,
        }
    }
}

/// Everything a comparison run needs.
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// Pile-set prefix of set A.
    pub set_a: PathBuf,
    /// Pile-set prefix of set B.
    pub set_b: PathBuf,
    /// Propagation policy.
    pub mode: CompareMode,
    /// Longest word to chase (cycle cap).
    pub max_cycle: u32,
    /// Minimum read support for set-exclusive calls.
    pub min_occ: LetterNumber,
    /// Shortest word the metagenomics classifier reports.
    pub min_word_length: u32,
    /// Suffix filter for distributed execution; empty = everything.
    pub subset: String,
    /// RAM budget for in-memory range queues; `None` = straight to disk.
    pub memory_limit: Option<usize>,
    /// Carry matched words through the queues (needed for worded reports).
    pub propagate_sequence: bool,
    /// Disable the already-processed-interval skip.
    pub no_comparison_skip: bool,
    /// Consult `.idx` sidecars where present.
    pub use_index: bool,
    /// Taxonomy table (metagenomics only).
    pub taxonomy: Option<PathBuf>,
    /// Report file; `None` writes to stdout.
    pub output: Option<PathBuf>,
}

/// Counters reported by a finished comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareSummary {
    /// Cycles actually run.
    pub cycles: u32,
    /// Intervals processed across all cycles.
    pub ranges: u64,
    /// Intervals with no surviving child.
    pub singletons: u64,
}

/// Run a comparison to completion. On failure the interval queues are kept
/// on disk for post-mortem inspection.
pub fn run_compare(config: &CompareConfig) -> Result<CompareSummary, CompareError> {
    let mut store_a = RangeStore::new(config.propagate_sequence, false, config.memory_limit)?;
    let mut store_b = RangeStore::new(config.propagate_sequence, false, config.memory_limit)?;

    match compare_cycles(config, &mut store_a, &mut store_b) {
        Ok(summary) => Ok(summary),
        Err(err) => {
            let kept_a = store_a.keep_scratch_for_diagnosis();
            let kept_b = store_b.keep_scratch_for_diagnosis();
            tracing::error!(
                "comparison aborted; interval queues kept at {} and {}",
                kept_a.display(),
                kept_b.display()
            );
            Err(err)
        }
    }
}

fn compare_cycles(
    config: &CompareConfig,
    store_a: &mut RangeStore,
    store_b: &mut RangeStore,
) -> Result<CompareSummary, CompareError> {
    let mut readers_a = open_pile_readers(&config.set_a, config.use_index)?;
    let mut readers_b = open_pile_readers(&config.set_b, config.use_index)?;
    let counts_a = initial_pile_counts(&mut readers_a)?;
    let counts_b = initial_pile_counts(&mut readers_b)?;

    let mut handler = build_handler(config)?;

    // Seed: the whole of every non-terminator pile, matched on both sides.
    for pile in 1..ALPHABET_SIZE as u8 {
        let word = if config.propagate_sequence {
            vec![symbol_of(pile)]
        } else {
            Vec::new()
        };
        let seed_a = Range::new(word.clone(), MATCH_FLAG, counts_a.pile_len(pile));
        let seed_b = Range::new(word, MATCH_FLAG, counts_b.pile_len(pile));
        store_a.add_range(&seed_a, pile, 0, &config.subset, 0)?;
        store_b.add_range(&seed_b, pile, 0, &config.subset, 0)?;
    }

    let mut summary = CompareSummary::default();
    for cycle in 1..=config.max_cycle {
        store_a.swap_cycle()?;
        store_b.swap_cycle()?;

        let settings = BacktrackSettings {
            subset: &config.subset,
            cycle,
            no_comparison_skip: config.no_comparison_skip,
            propagate_sequence: config.propagate_sequence,
        };

        let mut cycle_stats = BacktrackStats::default();
        for pile in 0..ALPHABET_SIZE as u8 {
            readers_a[pile as usize].rewind()?;
            readers_b[pile as usize].rewind()?;
            let mut pos_a: LetterNumber = 0;
            let mut pos_b: LetterNumber = 0;
            let mut so_far_a = leading_counts(&counts_a, pile);
            let mut so_far_b = leading_counts(&counts_b, pile);

            for portion in 0..ALPHABET_SIZE as u8 {
                store_a.set_portion(pile, portion)?;
                store_b.set_portion(pile, portion)?;
                let mut backtracker = TwoSetBacktracker {
                    a: SideState {
                        reader: &mut readers_a[pile as usize],
                        store: &mut *store_a,
                        current_pos: &mut pos_a,
                        counts_so_far: &mut so_far_a,
                    },
                    b: SideState {
                        reader: &mut readers_b[pile as usize],
                        store: &mut *store_b,
                        current_pos: &mut pos_b,
                        counts_so_far: &mut so_far_b,
                    },
                    settings,
                };
                let stats = backtracker.process(pile, handler.as_mut())?;
                cycle_stats.ranges += stats.ranges;
                cycle_stats.singletons += stats.singletons;
            }
        }

        summary.cycles = cycle;
        summary.ranges += cycle_stats.ranges;
        summary.singletons += cycle_stats.singletons;
        let queued = store_a.written_this_cycle() + store_b.written_this_cycle();
        tracing::info!(
            "cycle {cycle}: {} intervals, {} singletons, {queued} queued",
            cycle_stats.ranges,
            cycle_stats.singletons
        );
        if queued == 0 {
            break;
        }
    }
    Ok(summary)
}

/// Path of pile `pile`'s C-file under a database prefix.
pub fn c_file_path(prefix: &Path, pile: u8) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!("-C0{pile}"));
    PathBuf::from(name)
}

fn open_pile_readers(
    prefix: &Path,
    use_index: bool,
) -> Result<Vec<SegmentReader>, CompareError> {
    let mut readers = Vec::with_capacity(ALPHABET_SIZE);
    for pile in 0..ALPHABET_SIZE as u8 {
        let path = pile_path(prefix, pile);
        if !path.exists() {
            return Err(CompareError::Config(format!(
                "missing pile segment {}",
                path.display()
            )));
        }
        readers.push(open_reader(&path, use_index)?);
    }
    Ok(readers)
}

fn initial_pile_counts(readers: &mut [SegmentReader]) -> Result<PileCounts, CompareError> {
    let mut counts = PileCounts::new();
    for (pile, reader) in readers.iter_mut().enumerate() {
        let mut c = LetterCount::new();
        reader.read_and_count(&mut c, LetterNumber::MAX)?;
        reader.rewind()?;
        counts[pile as u8] = c;
    }
    Ok(counts)
}

/// Running counts a traversal of `pile` starts from: the cumulative
/// per-symbol counts of all earlier piles.
fn leading_counts(counts: &PileCounts, pile: u8) -> LetterCount {
    if pile == 0 {
        LetterCount::new()
    } else {
        counts.cumulative_through(pile - 1)
    }
}

fn build_handler(config: &CompareConfig) -> Result<Box<dyn IntervalHandler>, CompareError> {
    let out: Box<dyn Write + Send> = match &config.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| {
            CompareError::Io {
                path: path.clone(),
                source: e,
            }
        })?)),
        None => Box::new(std::io::stdout()),
    };

    Ok(match config.mode {
        CompareMode::Reference => Box::new(ReferenceHandler::new(config.min_occ, out)),
        CompareMode::TumourNormal => Box::new(TumourNormalHandler::new(config.min_occ, out)),
        CompareMode::Splice => Box::new(SpliceHandler::new(config.min_occ, out)),
        CompareMode::Metagenomics => {
            let taxonomy_path = config.taxonomy.as_ref().ok_or_else(|| {
                CompareError::Config("metagenomics mode needs a taxonomy file".into())
            })?;
            let taxonomy = TaxTable::load(taxonomy_path)?;
            let mut c_paths: Vec<Option<PathBuf>> = Vec::with_capacity(ALPHABET_SIZE);
            for pile in 0..ALPHABET_SIZE as u8 {
                let path = c_file_path(&config.set_b, pile);
                c_paths.push(path.exists().then_some(path));
            }
            Box::new(MetagenomicsHandler::new(
                config.min_occ,
                config.min_word_length,
                config.max_cycle,
                &c_paths,
                taxonomy,
                out,
            )?)
        }
    })
}
