//! Reference-comparison policy: set A is a read collection, set B a
//! reference BWT. Propagation follows the reference wherever it agrees;
//! a sufficiently deep read-only path on a symbol absent from the
//! reference is a breakpoint.

use std::io::Write;

use crate::alphabet::{ALPHABET_SIZE, DONT_KNOW_PILE};
use crate::counts::LetterCount;
use crate::rangestore::Range;
use crate::{LetterNumber, PileFlags};

use super::{format_counts, word_or_placeholder, HandlerError, IntervalHandler};

/// The reference-comparison handler. Emits `BKPT` records.
pub struct ReferenceHandler {
    min_occ: LetterNumber,
    out: Box<dyn Write + Send>,
    breakpoints: u64,
}

impl std::fmt::Debug for ReferenceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceHandler")
            .field("min_occ", &self.min_occ)
            .field("breakpoints", &self.breakpoints)
            .finish()
    }
}

impl ReferenceHandler {
    /// A handler reporting paths supported by at least `min_occ` reads.
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
}

impl IntervalHandler for ReferenceHandler {
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
        let mut significant_non_ref = false;

        if range_b.num > 1 {
            // k-mer not yet unique in the reference: follow B, and A only
            // where it matches B.
            for symbol in 1..ALPHABET_SIZE as u8 {
                if counts_this_range_b[symbol] > 0 {
                    propagate_b[symbol as usize] = true;
                    propagate_a[symbol as usize] = counts_this_range_a[symbol] > 0;
                }
            }
        } else {
            for symbol in 1..ALPHABET_SIZE as u8 {
                if counts_this_range_b[symbol] > 0 {
                    propagate_b[symbol as usize] = true;
                    propagate_a[symbol as usize] = counts_this_range_a[symbol] > 0;
                } else if counts_this_range_a[symbol] > self.min_occ {
                    // Reads keep going where the reference stops.
                    propagate_a[symbol as usize] = true;
                    significant_non_ref = true;
                }
            }
        }

        if significant_non_ref {
            *is_breakpoint = true;
            self.breakpoints += 1;
            writeln!(
                self.out,
                "BKPT {} {} {}:{} {} {}",
                word_or_placeholder(range_b, pile, cycle),
                range_b.pos_masked(),
                format_counts(counts_this_range_a),
                format_counts(counts_this_range_b),
                range_a.pos_masked(),
                range_b.pos_masked(),
            )?;
        }

        // Never chase N paths.
        propagate_a[DONT_KNOW_PILE as usize] = false;
        propagate_b[DONT_KNOW_PILE as usize] = false;
        Ok(())
    }

    fn found_in_a_only(
        &mut self,
        pile: u8,
        _counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        _bwt_substring: Option<&[u8]>,
        range: &Range,
        propagate: &mut PileFlags,
        cycle: u32,
    ) -> Result<(), HandlerError> {
        let mut significant_path = false;
        for symbol in 1..ALPHABET_SIZE as u8 {
            if counts_this_range[symbol] >= self.min_occ {
                significant_path = true;
                propagate[symbol as usize] = true;
            }
        }
        if !significant_path {
            writeln!(
                self.out,
                "READ {} {} {}",
                word_or_placeholder(range, pile, cycle),
                range.pos_masked(),
                format_counts(counts_this_range),
            )?;
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
        // Reference-only intervals carry no signal here.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(values: [LetterNumber; ALPHABET_SIZE]) -> LetterCount {
        let mut c = LetterCount::new();
        for (pile, &v) in values.iter().enumerate() {
            c.add(pile as u8, v);
        }
        c
    }

    #[test]
    fn matching_paths_propagate_on_both_sides() {
        let mut handler = ReferenceHandler::new(2, Box::new(Vec::new()));
        let a = counts([0, 5, 0, 0, 0, 0]);
        let b = counts([0, 3, 2, 0, 0, 0]);
        let ra = Range::new(Vec::new(), 0, 5);
        let rb = Range::new(Vec::new(), 0, 5);
        let mut pa = [false; ALPHABET_SIZE];
        let mut pb = [false; ALPHABET_SIZE];
        let mut bkpt = false;
        handler
            .found_in_both(1, &a, &b, &ra, &rb, &mut pa, &mut pb, &mut bkpt, 3)
            .unwrap();
        assert!(pa[1] && pb[1]);
        assert!(!pa[2] && pb[2]);
        assert!(!bkpt);
    }

    #[test]
    fn deep_read_only_path_past_a_unique_reference_is_a_breakpoint() {
        let mut handler = ReferenceHandler::new(2, Box::new(Vec::new()));
        let a = counts([0, 0, 0, 0, 0, 9]);
        let b = counts([0, 1, 0, 0, 0, 0]);
        let ra = Range::new(Vec::new(), 0, 9);
        let rb = Range::new(b"ACG".to_vec(), 0, 1);
        let mut pa = [false; ALPHABET_SIZE];
        let mut pb = [false; ALPHABET_SIZE];
        let mut bkpt = false;
        handler
            .found_in_both(1, &a, &b, &ra, &rb, &mut pa, &mut pb, &mut bkpt, 3)
            .unwrap();
        assert!(bkpt);
        assert!(pa[5] && !pb[5]);
        assert_eq!(handler.breakpoint_count(), 1);
    }

    #[test]
    fn n_paths_are_never_followed() {
        let mut handler = ReferenceHandler::new(1, Box::new(Vec::new()));
        let a = counts([0, 0, 0, 0, 8, 0]);
        let b = counts([0, 0, 0, 0, 8, 0]);
        let ra = Range::new(Vec::new(), 0, 8);
        let rb = Range::new(Vec::new(), 0, 8);
        let mut pa = [false; ALPHABET_SIZE];
        let mut pb = [false; ALPHABET_SIZE];
        let mut bkpt = false;
        handler
            .found_in_both(1, &a, &b, &ra, &rb, &mut pa, &mut pb, &mut bkpt, 2)
            .unwrap();
        assert!(!pa[DONT_KNOW_PILE as usize] && !pb[DONT_KNOW_PILE as usize]);
    }
}
