//! BWT intervals and their wire representation.
//!
//! A queue stores ranges in ascending position order, so each record only
//! carries the offset from the previous range's end. The two boolean flags
//! (match flag, breakpoint-extension flag) ride in the low bits of that
//! offset. When sequence propagation is enabled, the matched word follows,
//! compressed against the previous record's word by shared prefix.

use std::io::{Read, Write};

use crate::{LetterNumber, MATCH_FLAG, MATCH_MASK};

use super::varint::{read_varint, write_varint};
use super::RangeError;

/// Longest word suffix a single record may carry.
const MAX_WORD_SUFFIX: usize = 255;

/// A contiguous interval of BWT positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Range {
    /// Symbols matched so far, newest first. Empty unless sequence
    /// propagation is enabled.
    pub word: Vec<u8>,
    /// Start of the interval, local to its pile. The top bit is the match
    /// flag of two-set traversals.
    pub pos: LetterNumber,
    /// Interval length.
    pub num: LetterNumber,
    /// Set when an ancestor interval was flagged as a breakpoint.
    pub is_bkpt_extension: bool,
    /// Opaque handle carried through the traversal (extender mode).
    pub user_data: Option<u64>,
}

impl Range {
    /// Plain interval.
    pub fn new(word: Vec<u8>, pos: LetterNumber, num: LetterNumber) -> Self {
        Self {
            word,
            pos,
            num,
            is_bkpt_extension: false,
            user_data: None,
        }
    }

    /// Interval position without the match flag.
    #[inline]
    pub fn pos_masked(&self) -> LetterNumber {
        self.pos & MATCH_MASK
    }

    /// Whether the match flag is set.
    #[inline]
    pub fn has_match_flag(&self) -> bool {
        self.pos & MATCH_FLAG != 0
    }
}

/// Per-queue encoder/decoder state: the previous range's end position and
/// word.
#[derive(Debug, Clone, Default)]
pub struct WireState {
    last_end_pos: LetterNumber,
    last_word: Option<Vec<u8>>,
}

impl WireState {
    /// Fresh state for a new queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise `range` onto `w`.
    pub fn write(
        &mut self,
        w: &mut impl Write,
        range: &Range,
        has_user_data: bool,
        propagate_sequence: bool,
    ) -> Result<(), RangeError> {
        let pos_plain = range.pos_masked();
        if pos_plain < self.last_end_pos {
            return Err(RangeError::PositionRegression {
                pos: pos_plain,
                previous_end: self.last_end_pos,
            });
        }
        let flags =
            ((range.has_match_flag() as u64) << 1) | range.is_bkpt_extension as u64;
        write_varint(w, ((pos_plain - self.last_end_pos) << 2) | flags)?;
        write_varint(w, range.num)?;
        if has_user_data {
            write_varint(w, range.user_data.unwrap_or(0))?;
        }
        if propagate_sequence {
            self.write_word(w, &range.word)?;
        }
        self.last_end_pos = pos_plain + range.num;
        Ok(())
    }

    /// Decode the next range from `r`, or `None` at end of queue.
    pub fn read(
        &mut self,
        r: &mut impl Read,
        has_user_data: bool,
        propagate_sequence: bool,
    ) -> Result<Option<Range>, RangeError> {
        let offset_and_flags = match read_varint(r)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let is_bkpt_extension = offset_and_flags & 1 != 0;
        let match_flag = offset_and_flags & 2 != 0;
        let pos_plain = (offset_and_flags >> 2) + self.last_end_pos;

        let num = read_varint(r)?.ok_or(RangeError::TruncatedQueue)?;
        let user_data = if has_user_data {
            Some(read_varint(r)?.ok_or(RangeError::TruncatedQueue)?)
        } else {
            None
        };
        let word = if propagate_sequence {
            self.read_word(r)?
        } else {
            Vec::new()
        };

        self.last_end_pos = pos_plain + num;
        Ok(Some(Range {
            word,
            pos: pos_plain | if match_flag { MATCH_FLAG } else { 0 },
            num,
            is_bkpt_extension,
            user_data,
        }))
    }

    fn write_word(&mut self, w: &mut impl Write, word: &[u8]) -> Result<(), RangeError> {
        let suffix = match &self.last_word {
            Some(last) => {
                let shared = word
                    .iter()
                    .zip(last.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                &word[shared..]
            }
            None => word,
        };
        if suffix.len() > MAX_WORD_SUFFIX {
            return Err(RangeError::WordTooLong { len: word.len() });
        }
        w.write_all(&(suffix.len() as u16).to_le_bytes())?;
        w.write_all(suffix)?;
        self.last_word = Some(word.to_vec());
        Ok(())
    }

    fn read_word(&mut self, r: &mut impl Read) -> Result<Vec<u8>, RangeError> {
        let mut len_bytes = [0u8; 2];
        r.read_exact(&mut len_bytes)
            .map_err(|_| RangeError::TruncatedQueue)?;
        let suffix_len = u16::from_le_bytes(len_bytes) as usize;
        if suffix_len > MAX_WORD_SUFFIX {
            return Err(RangeError::WordTooLong { len: suffix_len });
        }
        match self.last_word.as_mut() {
            Some(last) => {
                // Words inside one queue share a length; the record replaces
                // the unshared tail of the previous word.
                if suffix_len > last.len() {
                    return Err(RangeError::TruncatedQueue);
                }
                let start = last.len() - suffix_len;
                r.read_exact(&mut last[start..])
                    .map_err(|_| RangeError::TruncatedQueue)?;
                Ok(last.clone())
            }
            None => {
                let mut word = vec![0u8; suffix_len];
                r.read_exact(&mut word)
                    .map_err(|_| RangeError::TruncatedQueue)?;
                self.last_word = Some(word.clone());
                Ok(word)
            }
        }
    }
}
