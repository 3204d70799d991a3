//! Variants of the "propagate where supported in both sets above
//! threshold" rule: tumour/normal comparison and splice-junction
//! discovery.

use std::io::Write;

use crate::alphabet::{ALPHABET_SIZE, DONT_KNOW_PILE};
use crate::counts::LetterCount;
use crate::rangestore::Range;
use crate::{LetterNumber, PileFlags};

use super::{format_counts, word_or_placeholder, HandlerError, IntervalHandler};

/// Tumour/normal policy: both sets are read collections. A path carried by
/// enough tumour reads but absent from the normal (or the reverse) is a
/// somatic breakpoint candidate.
pub struct TumourNormalHandler {
    min_occ: LetterNumber,
    out: Box<dyn Write + Send>,
    breakpoints: u64,
}

impl std::fmt::Debug for TumourNormalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TumourNormalHandler")
            .field("min_occ", &self.min_occ)
            .field("breakpoints", &self.breakpoints)
            .finish()
    }
}

impl TumourNormalHandler {
    /// A handler requiring `min_occ` reads to call a set-exclusive path.
    pub fn new(min_occ: LetterNumber, out: Box<dyn Write + Send>) -> Self {
        Self {
            min_occ,
            out,
            breakpoints: 0,
        }
    }

    /// Number of breakpoints reported so far.
    pub fn breakpoint_count(&self) -> u64 {
        self.breakpoints
    }

    fn report(
        &mut self,
        tag: &str,
        pile: u8,
        cycle: u32,
        range_a: &Range,
        range_b: &Range,
        counts_a: &LetterCount,
        counts_b: &LetterCount,
    ) -> Result<(), HandlerError> {
        self.breakpoints += 1;
        writeln!(
            self.out,
            "BKPT{tag} {} {}:{} {} {}",
            word_or_placeholder(range_a, pile, cycle),
            format_counts(counts_a),
            format_counts(counts_b),
            range_a.pos_masked(),
            range_b.pos_masked(),
        )?;
        Ok(())
    }
}

impl IntervalHandler for TumourNormalHandler {
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
    ) -> Result<(), HandlerError> {
        let mut a_only = false;
        let mut b_only = false;
        for symbol in 1..ALPHABET_SIZE as u8 {
            let a = counts_this_range_a[symbol];
            let b = counts_this_range_b[symbol];
            if a > 0 && b > 0 {
                propagate_a[symbol as usize] = true;
                propagate_b[symbol as usize] = true;
            } else if a >= self.min_occ {
                propagate_a[symbol as usize] = true;
                a_only = true;
            } else if b >= self.min_occ {
                propagate_b[symbol as usize] = true;
                b_only = true;
            }
        }
        if a_only {
            self.report("+A", pile, cycle, range_a, range_b, counts_this_range_a, counts_this_range_b)?;
        }
        if b_only {
            self.report("+B", pile, cycle, range_a, range_b, counts_this_range_a, counts_this_range_b)?;
        }
        *is_breakpoint |= a_only || b_only;

        propagate_a[DONT_KNOW_PILE as usize] = false;
        propagate_b[DONT_KNOW_PILE as usize] = false;
        Ok(())
    }

    fn found_in_a_only(
        &mut self,
        _pile: u8,
        _counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        _bwt_substring: Option<&[u8]>,
        _range: &Range,
        propagate: &mut PileFlags,
        _cycle: u32,
    ) -> Result<(), HandlerError> {
        // A set-exclusive interval keeps extending while deep enough; its
        // report was emitted when the split happened.
        for symbol in 1..ALPHABET_SIZE as u8 {
            propagate[symbol as usize] = counts_this_range[symbol] >= self.min_occ;
        }
        propagate[DONT_KNOW_PILE as usize] = false;
        Ok(())
    }

    fn found_in_b_only(
        &mut self,
        pile: u8,
        counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        bwt_substring: Option<&[u8]>,
        range: &Range,
        propagate: &mut PileFlags,
        cycle: u32,
    ) -> Result<(), HandlerError> {
        // Symmetric policy: the two collections are peers.
        self.found_in_a_only(
            pile,
            counts_so_far,
            counts_this_range,
            bwt_substring,
            range,
            propagate,
            cycle,
        )
    }
}

/// Splice policy: set A holds transcript reads, set B the genome. A read
/// path that leaves the genome (the donor side of a junction) is reported
/// and abandoned; matching paths extend as long as any read supports them.
pub struct SpliceHandler {
    min_occ: LetterNumber,
    out: Box<dyn Write + Send>,
    junctions: u64,
}

impl std::fmt::Debug for SpliceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpliceHandler")
            .field("min_occ", &self.min_occ)
            .field("junctions", &self.junctions)
            .finish()
    }
}

impl SpliceHandler {
    /// A handler requiring `min_occ` reads at a junction candidate.
    pub fn new(min_occ: LetterNumber, out: Box<dyn Write + Send>) -> Self {
        Self {
            min_occ,
            out,
            junctions: 0,
        }
    }

    /// Number of junction candidates reported so far.
    pub fn junction_count(&self) -> u64 {
        self.junctions
    }
}

impl IntervalHandler for SpliceHandler {
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
    ) -> Result<(), HandlerError> {
        let mut off_genome = false;
        for symbol in 1..ALPHABET_SIZE as u8 {
            let a = counts_this_range_a[symbol];
            let b = counts_this_range_b[symbol];
            if b > 0 {
                propagate_b[symbol as usize] = true;
                propagate_a[symbol as usize] = a > 0;
            } else if a >= self.min_occ {
                off_genome = true;
            }
        }
        if off_genome {
            *is_breakpoint = true;
            self.junctions += 1;
            writeln!(
                self.out,
                "SPLICE {} {}:{} {} {}",
                word_or_placeholder(range_a, pile, cycle),
                format_counts(counts_this_range_a),
                format_counts(counts_this_range_b),
                range_a.pos_masked(),
                range_b.pos_masked(),
            )?;
        }
        propagate_a[DONT_KNOW_PILE as usize] = false;
        propagate_b[DONT_KNOW_PILE as usize] = false;
        Ok(())
    }

    fn found_in_a_only(
        &mut self,
        _pile: u8,
        _counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        _bwt_substring: Option<&[u8]>,
        _range: &Range,
        propagate: &mut PileFlags,
        _cycle: u32,
    ) -> Result<(), HandlerError> {
        // Keep following reads to their start so junction acceptors are
        // seen from the other side too.
        for symbol in 1..ALPHABET_SIZE as u8 {
            propagate[symbol as usize] = counts_this_range[symbol] > 0;
        }
        propagate[DONT_KNOW_PILE as usize] = false;
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
}
