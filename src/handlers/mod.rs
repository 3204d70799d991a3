//! Interval handlers: the pluggable policies that decide, for every BWT
//! interval the back-tracker visits, which child intervals continue into
//! the next cycle and what gets reported.

mod kmer;
mod metagenomics;
mod reference;

pub use kmer::{SpliceHandler, TumourNormalHandler};
pub use metagenomics::MetagenomicsHandler;
pub use reference::ReferenceHandler;

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::counts::LetterCount;
use crate::rangestore::Range;
use crate::{LetterNumber, PileFlags};

/// Errors surfaced by interval handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Failure writing a report record.
    #[error("report output failed: {0}")]
    Output(#[from] std::io::Error),

    /// Failure reading an auxiliary file (e.g. a C-file).
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A C-file shorter than its pile.
    #[error("{path} ended before position {position}")]
    CFileTruncated {
        /// Offending C-file.
        path: PathBuf,
        /// BWT position that could not be resolved.
        position: LetterNumber,
    },
}

/// Policy hooks invoked by the back-tracker.
///
/// `counts_so_far` holds the running per-symbol counts up to the interval
/// start (seeded with the cumulative counts of earlier piles);
/// `counts_this_range` the counts inside the interval. `propagate` arrives
/// all-false; the handler marks the symbols worth extending.
pub trait IntervalHandler {
    /// Whether the back-tracker should materialise the interval's actual
    /// bytes (`bwt_substring`) instead of only counting them.
    fn need_substring(&self) -> bool {
        false
    }

    /// An interval present only in set A (or the only set).
    #[allow(clippy::too_many_arguments)]
    fn found_in_a_only(
        &mut self,
        pile: u8,
        counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        bwt_substring: Option<&[u8]>,
        range: &Range,
        propagate: &mut PileFlags,
        cycle: u32,
    ) -> Result<(), HandlerError>;

    /// An interval present only in set B.
    #[allow(clippy::too_many_arguments)]
    fn found_in_b_only(
        &mut self,
        pile: u8,
        counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        bwt_substring: Option<&[u8]>,
        range: &Range,
        propagate: &mut PileFlags,
        cycle: u32,
    ) -> Result<(), HandlerError>;

    /// Matched intervals present in both sets.
    #[allow(clippy::too_many_arguments)]
    fn found_in_both(
        &mut self,
        pile: u8,
        counts_this_range_a: &LetterCount,
        counts_this_range_b: &LetterCount,
        range_a: &Range,
        range_b: &Range,
        propagate_a: &mut PileFlags,
        propagate_b: &mut PileFlags,
        is_breakpoint: &mut bool,
        cycle: u32,
    ) -> Result<(), HandlerError>;

    /// Build the child range for symbol `symbol`. The default carries no
    /// user data; the extender overrides this to thread its record handle
    /// through the traversal.
    fn make_child_range(
        &mut self,
        word: Vec<u8>,
        pos: LetterNumber,
        num: LetterNumber,
        is_bkpt_extension: bool,
        parent: &Range,
        symbol: u8,
    ) -> Range {
        let _ = (parent, symbol);
        Range {
            word,
            pos,
            num,
            is_bkpt_extension,
            user_data: None,
        }
    }
}

/// Format one `LetterCount` the way report records carry it:
/// colon-separated counts in alphabet order.
pub(crate) fn format_counts(counts: &LetterCount) -> String {
    use crate::alphabet::ALPHABET_SIZE;
    let mut out = String::new();
    for pile in 0..ALPHABET_SIZE as u8 {
        if pile > 0 {
            out.push(':');
        }
        out.push_str(&counts[pile].to_string());
    }
    out
}

/// Render a range's word, falling back to "<pile letter> + x-padding" when
/// sequence propagation is off and only the first character is known.
pub(crate) fn word_or_placeholder(range: &Range, pile: u8, cycle: u32) -> String {
    if range.word.is_empty() {
        let mut s = String::with_capacity(cycle as usize);
        s.push(crate::alphabet::symbol_of(pile) as char);
        for _ in 1..cycle {
            s.push('x');
        }
        s
    } else {
        String::from_utf8_lossy(&range.word).into_owned()
    }
}
