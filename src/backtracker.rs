//! Backward traversal of one or two BWT sets, driven by an interval
//! handler.
//!
//! Per cycle and per (incoming pile, outgoing pile) queue, every stored
//! interval is located in the pile's segment (skipping forward with
//! `read_and_count`), its symbol histogram taken, and the handler asked
//! which symbols to follow; the surviving child intervals are pushed into
//! the next cycle's queues. The two-set variant walks both sets in lock
//! step and keeps the invariant that match-flagged intervals exist on both
//! sides.

use thiserror::Error;

use crate::alphabet::{symbol_of, ALPHABET_SIZE};
use crate::codec::{CodecError, SegmentReader};
use crate::counts::LetterCount;
use crate::endpos::{EndPosError, EndPosFile};
use crate::handlers::{HandlerError, IntervalHandler};
use crate::rangestore::{Range, RangeError, RangeStore};
use crate::{LetterNumber, PileFlags, MATCH_FLAG};

/// Errors from a traversal.
#[derive(Debug, Error)]
pub enum BacktrackError {
    /// Segment codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Range store failure.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Handler failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// End-pos resolution failure.
    #[error(transparent)]
    EndPos(#[from] EndPosError),

    /// The queues and the segments disagree.
    #[error("traversal invariant violated: {detail}")]
    Invariant {
        /// What went wrong.
        detail: String,
    },
}

/// Counters reported by a traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktrackStats {
    /// Intervals processed.
    pub ranges: u64,
    /// Intervals with no surviving child.
    pub singletons: u64,
}

/// Traversal-wide switches shared by both sets.
#[derive(Debug, Clone, Copy)]
pub struct BacktrackSettings<'s> {
    /// Suffix filter for distributed execution; empty = everything.
    pub subset: &'s str,
    /// Current cycle (1-based; equals the matched word length).
    pub cycle: u32,
    /// Disable the already-processed-interval comparison.
    pub no_comparison_skip: bool,
    /// Carry matched words through the queues.
    pub propagate_sequence: bool,
}

/// One BWT set's traversal state for the current incoming pile. The
/// position and running counts persist across the outgoing-pile queues of
/// that pile.
#[derive(Debug)]
pub struct SideState<'a> {
    /// Reader over the incoming pile's segment.
    pub reader: &'a mut SegmentReader,
    /// This set's range store.
    pub store: &'a mut RangeStore,
    /// Reader position, local to the pile.
    pub current_pos: &'a mut LetterNumber,
    /// Per-symbol counts up to `current_pos`, seeded with the cumulative
    /// counts of earlier piles.
    pub counts_so_far: &'a mut LetterCount,
}

/// Which of the two sets a side-drain is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetSide {
    A,
    B,
}

/// Traversal over a single BWT set (queries, extension).
#[derive(Debug)]
pub struct OneSetBacktracker<'a> {
    /// The set's state.
    pub side: SideState<'a>,
    /// Shared switches.
    pub settings: BacktrackSettings<'a>,
    /// Force propagation of every present symbol (ignoring the handler's
    /// choices) so intervals run to their reads' ends.
    pub propagate_to_end: bool,
    /// Dollar resolver, required once terminator-pile children appear.
    pub end_pos: Option<&'a mut EndPosFile>,
}

impl OneSetBacktracker<'_> {
    /// Consume the selected queue for `pile`, returning traversal counts.
    pub fn process(
        &mut self,
        pile: u8,
        handler: &mut dyn IntervalHandler,
    ) -> Result<BacktrackStats, BacktrackError> {
        let mut stats = BacktrackStats::default();
        let mut scratch = Scratch::default();
        let flagged = drain_side(
            &mut self.side,
            SetSide::A,
            self.settings,
            pile,
            handler,
            self.propagate_to_end,
            &mut self.end_pos,
            &mut scratch,
            &mut stats,
        )?;
        if flagged.is_some() {
            return Err(BacktrackError::Invariant {
                detail: "match-flagged interval in a single-set traversal".into(),
            });
        }
        Ok(stats)
    }
}

/// Traversal over two BWT sets in lock step (comparison).
#[derive(Debug)]
pub struct TwoSetBacktracker<'a> {
    /// Set A state.
    pub a: SideState<'a>,
    /// Set B state.
    pub b: SideState<'a>,
    /// Shared switches.
    pub settings: BacktrackSettings<'a>,
}

impl TwoSetBacktracker<'_> {
    /// Consume both sets' selected queues for `pile`.
    pub fn process(
        &mut self,
        pile: u8,
        handler: &mut dyn IntervalHandler,
    ) -> Result<BacktrackStats, BacktrackError> {
        let mut stats = BacktrackStats::default();
        let mut scratch = Scratch::default();
        let mut no_end_pos: Option<&mut EndPosFile> = None;

        loop {
            let flagged_a = drain_side(
                &mut self.a,
                SetSide::A,
                self.settings,
                pile,
                handler,
                false,
                &mut no_end_pos,
                &mut scratch,
                &mut stats,
            )?;
            let flagged_b = drain_side(
                &mut self.b,
                SetSide::B,
                self.settings,
                pile,
                handler,
                false,
                &mut no_end_pos,
                &mut scratch,
                &mut stats,
            )?;

            let (mut range_a, mut range_b) = match (flagged_a, flagged_b) {
                (None, None) => break,
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(BacktrackError::Invariant {
                        detail: "match-flagged interval present on only one side".into(),
                    })
                }
            };

            let counts_a =
                load_range_counts(&mut self.a, &range_a, handler.need_substring(), &mut scratch.substring_a)?;
            let counts_b =
                load_range_counts(&mut self.b, &range_b, handler.need_substring(), &mut scratch.substring_b)?;

            let mut propagate_a: PileFlags = [false; ALPHABET_SIZE];
            let mut propagate_b: PileFlags = [false; ALPHABET_SIZE];
            let mut is_breakpoint = false;
            handler.found_in_both(
                pile,
                &counts_a,
                &counts_b,
                &range_a,
                &range_b,
                &mut propagate_a,
                &mut propagate_b,
                &mut is_breakpoint,
                self.settings.cycle,
            )?;
            if is_breakpoint {
                range_a.is_bkpt_extension = true;
                range_b.is_bkpt_extension = true;
            }

            let mut word_started = false;
            for symbol in 1..ALPHABET_SIZE as u8 {
                if !propagate_a[symbol as usize] && !propagate_b[symbol as usize] {
                    continue;
                }
                let word = next_word(
                    self.settings.propagate_sequence,
                    &mut scratch.word,
                    &mut word_started,
                    &range_a,
                    symbol,
                );

                let match_bit = if propagate_a[symbol as usize] && propagate_b[symbol as usize] {
                    MATCH_FLAG
                } else {
                    0
                };
                let child_a = handler.make_child_range(
                    word.clone(),
                    self.a.counts_so_far[symbol] | match_bit,
                    counts_a[symbol],
                    range_a.is_bkpt_extension,
                    &range_a,
                    symbol,
                );
                let child_b = handler.make_child_range(
                    word,
                    self.b.counts_so_far[symbol] | match_bit,
                    counts_b[symbol],
                    range_b.is_bkpt_extension,
                    &range_b,
                    symbol,
                );

                let mut add_a = self.settings.no_comparison_skip
                    || !self.a.store.is_range_known(
                        &child_a,
                        symbol,
                        pile,
                        self.settings.subset,
                        self.settings.cycle,
                    )?;
                let mut add_b = self.settings.no_comparison_skip
                    || !self.b.store.is_range_known(
                        &child_b,
                        symbol,
                        pile,
                        self.settings.subset,
                        self.settings.cycle,
                    )?;
                if match_bit != 0 {
                    // A flagged child skipped on one side only would break
                    // the "exists on both sides" invariant.
                    let either = add_a || add_b;
                    add_a = either;
                    add_b = either;
                }

                if propagate_a[symbol as usize] && add_a {
                    self.a.store.add_range(
                        &child_a,
                        symbol,
                        pile,
                        self.settings.subset,
                        self.settings.cycle,
                    )?;
                }
                if propagate_b[symbol as usize] && add_b {
                    self.b.store.add_range(
                        &child_b,
                        symbol,
                        pile,
                        self.settings.subset,
                        self.settings.cycle,
                    )?;
                }
            }

            *self.a.counts_so_far += &counts_a;
            *self.a.current_pos += range_a.num;
            *self.b.counts_so_far += &counts_b;
            *self.b.current_pos += range_b.num;
            stats.ranges += 1;
        }
        Ok(stats)
    }
}

#[derive(Debug, Default)]
struct Scratch {
    word: Vec<u8>,
    substring_a: Vec<u8>,
    substring_b: Vec<u8>,
}

/// Process one side's queue until it ends or a match-flagged interval
/// surfaces (which the caller pairs with the other side).
#[allow(clippy::too_many_arguments)]
fn drain_side(
    side: &mut SideState<'_>,
    set: SetSide,
    settings: BacktrackSettings<'_>,
    pile: u8,
    handler: &mut dyn IntervalHandler,
    propagate_to_end: bool,
    end_pos: &mut Option<&mut EndPosFile>,
    scratch: &mut Scratch,
    stats: &mut BacktrackStats,
) -> Result<Option<Range>, BacktrackError> {
    loop {
        let range = match side.store.get_range()? {
            None => return Ok(None),
            Some(r) if r.has_match_flag() => return Ok(Some(r)),
            Some(r) => r,
        };

        let substring_buf = if set == SetSide::A {
            &mut scratch.substring_a
        } else {
            &mut scratch.substring_b
        };
        let counts_this = load_range_counts(side, &range, handler.need_substring(), substring_buf)?;
        let substring = handler
            .need_substring()
            .then(|| &substring_buf[..range.num as usize]);

        let mut propagate: PileFlags = [false; ALPHABET_SIZE];
        match set {
            SetSide::A => handler.found_in_a_only(
                pile,
                side.counts_so_far,
                &counts_this,
                substring,
                &range,
                &mut propagate,
                settings.cycle,
            )?,
            SetSide::B => handler.found_in_b_only(
                pile,
                side.counts_so_far,
                &counts_this,
                substring,
                &range,
                &mut propagate,
                settings.cycle,
            )?,
        }

        if propagate_to_end {
            // Ride every present symbol down to the reads' first columns.
            for symbol in 0..ALPHABET_SIZE as u8 {
                propagate[symbol as usize] = counts_this[symbol] > 0;
            }
        }

        let mut word_started = false;
        let mut has_child = false;
        for symbol in 0..ALPHABET_SIZE as u8 {
            if !propagate[symbol as usize] {
                continue;
            }
            has_child = true;
            let word = next_word(
                settings.propagate_sequence,
                &mut scratch.word,
                &mut word_started,
                &range,
                symbol,
            );
            let child = handler.make_child_range(
                word,
                side.counts_so_far[symbol],
                counts_this[symbol],
                range.is_bkpt_extension,
                &range,
                symbol,
            );
            if !settings.no_comparison_skip
                && side
                    .store
                    .is_range_known(&child, symbol, pile, settings.subset, settings.cycle)?
            {
                continue;
            }
            if symbol != 0 {
                side.store
                    .add_range(&child, symbol, pile, settings.subset, settings.cycle)?;
            } else {
                // Terminator children: resolve each dollar to its sequence
                // id now; the queue re-sorts them before sealing.
                let resolver = end_pos.as_mut().ok_or_else(|| BacktrackError::Invariant {
                    detail: "terminator children need an end-pos file".into(),
                })?;
                for k in 0..child.num {
                    let (sequence, _) = resolver.sequence_for_dollar(child.pos_masked() + k)?;
                    let mut single = child.clone();
                    single.pos = sequence as LetterNumber;
                    single.num = 1;
                    side.store.add_out_of_order_range(
                        single,
                        0,
                        pile,
                        settings.subset,
                        settings.cycle,
                    )?;
                }
            }
        }
        if !has_child {
            stats.singletons += 1;
        }

        *side.counts_so_far += &counts_this;
        *side.current_pos += range.num;
        stats.ranges += 1;
    }
}

/// Skip the reader up to `range`, then take the interval's symbol counts
/// (materialising its bytes into `substring_buf` when asked to).
fn load_range_counts(
    side: &mut SideState<'_>,
    range: &Range,
    need_substring: bool,
    substring_buf: &mut Vec<u8>,
) -> Result<LetterCount, BacktrackError> {
    let target = range.pos_masked();
    if target > *side.current_pos {
        let skip = target - *side.current_pos;
        let got = side.reader.read_and_count(side.counts_so_far, skip)?;
        if got != skip {
            return Err(BacktrackError::Invariant {
                detail: format!("segment ended {got} characters into a {skip}-character skip"),
            });
        }
        *side.current_pos = target;
    } else if target < *side.current_pos {
        return Err(BacktrackError::Invariant {
            detail: format!(
                "interval at {target} precedes the reader position {}",
                side.current_pos
            ),
        });
    }

    let mut counts = LetterCount::new();
    if need_substring {
        substring_buf.resize(range.num as usize, 0);
        let got = side.reader.read_bytes(&mut substring_buf[..range.num as usize])?;
        if got as LetterNumber != range.num {
            return Err(BacktrackError::Invariant {
                detail: format!("segment ended inside a {}-character interval", range.num),
            });
        }
        counts
            .count_bytes(&substring_buf[..got])
            .map_err(|byte| BacktrackError::Invariant {
                detail: format!("byte 0x{byte:02x} inside an interval is not in the alphabet"),
            })?;
    } else {
        let got = side.reader.read_and_count(&mut counts, range.num)?;
        if got != range.num {
            return Err(BacktrackError::Invariant {
                detail: format!("segment ended inside a {}-character interval", range.num),
            });
        }
    }
    Ok(counts)
}

/// Build the child word `symbol · parent_word`. The parent's word is
/// copied into the scratch buffer once per range; each child only patches
/// the leading symbol.
fn next_word(
    propagate_sequence: bool,
    scratch: &mut Vec<u8>,
    word_started: &mut bool,
    parent: &Range,
    symbol: u8,
) -> Vec<u8> {
    if !propagate_sequence {
        return Vec::new();
    }
    if !*word_started {
        scratch.clear();
        scratch.push(0);
        scratch.extend_from_slice(&parent.word);
        *word_started = true;
    }
    scratch[0] = symbol_of(symbol);
    scratch.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counts::LetterCount;

    /// Handler that records the materialised interval bytes and never
    /// extends anything.
    #[derive(Debug, Default)]
    struct SubstringProbe {
        seen: Vec<Vec<u8>>,
    }

    impl IntervalHandler for SubstringProbe {
        fn need_substring(&self) -> bool {
            true
        }

        fn found_in_a_only(
            &mut self,
            _pile: u8,
            _counts_so_far: &LetterCount,
            _counts_this_range: &LetterCount,
            bwt_substring: Option<&[u8]>,
            _range: &Range,
            _propagate: &mut crate::PileFlags,
            _cycle: u32,
        ) -> Result<(), HandlerError> {
            self.seen.push(bwt_substring.expect("asked for bytes").to_vec());
            Ok(())
        }

        fn found_in_b_only(
            &mut self,
            _pile: u8,
            _counts_so_far: &LetterCount,
            _counts_this_range: &LetterCount,
            _bwt_substring: Option<&[u8]>,
            _range: &Range,
            _propagate: &mut crate::PileFlags,
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
            _propagate_a: &mut crate::PileFlags,
            _propagate_b: &mut crate::PileFlags,
            _is_breakpoint: &mut bool,
            _cycle: u32,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn substring_mode_materialises_each_interval_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let segment = dir.path().join("seg");
        std::fs::write(&segment, b"ACGTAACC").unwrap();
        let mut reader = crate::codec::open_reader(&segment, false).unwrap();

        let mut store = RangeStore::new(false, false, None).unwrap();
        store
            .add_range(&Range::new(Vec::new(), 0, 4), 1, 2, "", 1)
            .unwrap();
        store
            .add_range(&Range::new(Vec::new(), 4, 4), 1, 2, "", 1)
            .unwrap();
        store.swap_cycle().unwrap();
        store.set_portion(1, 2).unwrap();

        let mut pos: LetterNumber = 0;
        let mut so_far = LetterCount::new();
        let mut handler = SubstringProbe::default();
        let settings = BacktrackSettings {
            subset: "",
            cycle: 1,
            no_comparison_skip: true,
            propagate_sequence: false,
        };
        let stats = OneSetBacktracker {
            side: SideState {
                reader: &mut reader,
                store: &mut store,
                current_pos: &mut pos,
                counts_so_far: &mut so_far,
            },
            settings,
            propagate_to_end: false,
            end_pos: None,
        }
        .process(1, &mut handler)
        .unwrap();

        assert_eq!(handler.seen, vec![b"ACGT".to_vec(), b"AACC".to_vec()]);
        assert_eq!(stats.ranges, 2);
        assert_eq!(stats.singletons, 2);
        assert_eq!(so_far[1], 3); // As counted across both intervals
        assert_eq!(pos, 8);
    }

    #[test]
    fn an_interval_behind_the_reader_position_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let segment = dir.path().join("seg");
        std::fs::write(&segment, b"ACGTACGT").unwrap();
        let mut reader = crate::codec::open_reader(&segment, false).unwrap();

        let mut store = RangeStore::new(false, false, None).unwrap();
        let mut pos: LetterNumber = 5;
        let mut so_far = LetterCount::new();
        let mut side = SideState {
            reader: &mut reader,
            store: &mut store,
            current_pos: &mut pos,
            counts_so_far: &mut so_far,
        };
        let err = load_range_counts(&mut side, &Range::new(Vec::new(), 2, 1), false, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, BacktrackError::Invariant { .. }));
    }
}
