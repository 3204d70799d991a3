//! The incremental external-memory BWT builder.
//!
//! Columns are inserted right to left, one **cycle** per column. Every
//! sequence carries a sort cursor `(pile, pos, seq)` pointing at its most
//! recently inserted character; a cycle repositions each cursor with an
//! LF-step over the current segments, sorts the cursors, and streams each
//! destination pile through a reader/writer pair, splicing the new
//! characters in at the computed positions. The terminator column closes
//! the build and records the dollar permutation.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;

use crate::alphabet::{pile_of, ALPHABET_SIZE, TERMINATOR};
use crate::codec::{open_reader, open_writer, CodecError, SegmentFormat};
use crate::counts::{LetterCount, PileCounts};
use crate::cycle::{CycleError, CycleSource};
use crate::endpos::{end_pos_path, write_end_pos, EndPosError};
use crate::{LetterNumber, SequenceLength, SequenceNumber};

mod safile;
use safile::{SaReader, SaWriter};

/// Errors from the build pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Segment codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Cycle-file failure.
    #[error(transparent)]
    Cycle(#[from] CycleError),

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

    /// A cycle file byte outside the alphabet.
    #[error("sequence {sequence} carries unsupported byte 0x{byte:02x}")]
    BadInputSymbol {
        /// Offending byte.
        byte: u8,
        /// Sequence it belongs to.
        sequence: SequenceNumber,
    },

    /// Internal bookkeeping disagrees with the segments on disk.
    #[error("build invariant violated: {detail}")]
    Invariant {
        /// What went wrong.
        detail: String,
    },
}

/// What to build and where.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Output prefix; pile `i` lands in `<prefix>-B0<i>`.
    pub prefix: PathBuf,
    /// Encoder for piles 1..A−1 (pile 0 is written once, as ASCII).
    pub format: SegmentFormat,
    /// Record the dollar permutation on the final cycle.
    pub generate_end_pos: bool,
    /// Maintain per-pile generalized-suffix-array files alongside the BWT.
    pub generate_sa: bool,
}

/// What a finished build reports back.
#[derive(Debug, Clone)]
pub struct BuildOutputs {
    /// Final per-(pile, symbol) histogram of the segments on disk.
    pub table_occ: PileCounts,
    /// Number of input sequences.
    pub sequence_count: SequenceNumber,
    /// Uniform input sequence length (terminator excluded).
    pub sequence_length: SequenceLength,
}

/// Path of pile `pile`'s BWT segment under `prefix`.
pub fn pile_path(prefix: &Path, pile: u8) -> PathBuf {
    suffixed(prefix, &format!("-B0{pile}"))
}

/// Path of pile `pile`'s generalized-suffix-array file under `prefix`.
pub fn sa_path(prefix: &Path, pile: u8) -> PathBuf {
    suffixed(prefix, &format!("-S0{pile}"))
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".new");
    PathBuf::from(name)
}

/// One sequence's sort cursor: the pile and 1-based local position of its
/// most recently inserted character.
#[derive(Debug, Clone, Copy)]
struct SortCursor {
    pile: u8,
    pos: LetterNumber,
    seq: SequenceNumber,
}

/// The incremental builder. One instance per build.
#[derive(Debug)]
pub struct BwtBuilder {
    config: BuildConfig,
}

impl BwtBuilder {
    /// Create a builder for `config`.
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Run the whole build against `source`, leaving per-pile segments (and
    /// optional sidecars) at the configured prefix.
    pub fn run(&self, source: &mut dyn CycleSource) -> Result<BuildOutputs, BuildError> {
        let sequence_count = source.sequence_count();
        let sequence_length = source.sequence_length();
        let n = sequence_count as usize;

        if n == 0 || sequence_length == 0 {
            return self.finish_empty(sequence_count, sequence_length);
        }

        let mut state = BuildState {
            config: &self.config,
            table_occ: PileCounts::new(),
            cursors: Vec::with_capacity(n),
        };

        let mut new_symb = vec![0u8; n];

        // First cycle: the rightmost column seeds pile 0 wholesale.
        source.read_column(sequence_length - 1, &mut new_symb)?;
        state.insert_first(&new_symb, sequence_length)?;
        tracing::info!(
            "build started: {sequence_count} sequences of length {sequence_length}"
        );

        // Middle cycles walk the remaining columns right to left.
        if sequence_length >= 2 {
            for column in (0..=sequence_length - 2).rev() {
                source.read_column(column, &mut new_symb)?;
                state.insert_cycle(&new_symb, CyclePhase::Column(column))?;
            }
        }

        // Terminator cycle: one dollar per sequence, then the permutation.
        new_symb.fill(TERMINATOR);
        state.insert_cycle(&new_symb, CyclePhase::Terminator)?;

        let expected_total =
            (sequence_length as LetterNumber + 1) * sequence_count as LetterNumber;
        if state.table_occ.total() != expected_total {
            return Err(BuildError::Invariant {
                detail: format!(
                    "occurrence table holds {} characters, expected {expected_total}",
                    state.table_occ.total()
                ),
            });
        }
        tracing::info!("build finished: {expected_total} characters across all piles");

        Ok(BuildOutputs {
            table_occ: state.table_occ,
            sequence_count,
            sequence_length,
        })
    }

    fn finish_empty(
        &self,
        sequence_count: SequenceNumber,
        sequence_length: SequenceLength,
    ) -> Result<BuildOutputs, BuildError> {
        for pile in 0..ALPHABET_SIZE as u8 {
            let path = pile_path(&self.config.prefix, pile);
            std::fs::write(&path, b"").map_err(|e| BuildError::Io {
                path: path.clone(),
                source: e,
            })?;
            if self.config.generate_sa {
                let sa = sa_path(&self.config.prefix, pile);
                std::fs::write(&sa, b"").map_err(|e| BuildError::Io {
                    path: sa.clone(),
                    source: e,
                })?;
            }
        }
        if self.config.generate_end_pos {
            write_end_pos(&end_pos_path(&self.config.prefix), &[])?;
        }
        Ok(BuildOutputs {
            table_occ: PileCounts::new(),
            sequence_count,
            sequence_length,
        })
    }
}

/// Which column a cycle is inserting.
#[derive(Debug, Clone, Copy)]
enum CyclePhase {
    /// Input column `t`.
    Column(SequenceLength),
    /// The closing terminator column.
    Terminator,
}

struct BuildState<'a> {
    config: &'a BuildConfig,
    table_occ: PileCounts,
    cursors: Vec<SortCursor>,
}

impl BuildState<'_> {
    /// Seed pile 0 with the rightmost column; every cursor starts there.
    fn insert_first(
        &mut self,
        new_symb: &[u8],
        sequence_length: SequenceLength,
    ) -> Result<(), BuildError> {
        let mut counts = LetterCount::new();
        for (seq, &symbol) in new_symb.iter().enumerate() {
            let pile = pile_of(symbol).ok_or(BuildError::BadInputSymbol {
                byte: symbol,
                sequence: seq as SequenceNumber,
            })?;
            if symbol == TERMINATOR {
                return Err(BuildError::BadInputSymbol {
                    byte: symbol,
                    sequence: seq as SequenceNumber,
                });
            }
            counts.add(pile, 1);
            self.cursors.push(SortCursor {
                pile: 0,
                pos: seq as LetterNumber + 1,
                seq: seq as SequenceNumber,
            });
        }
        self.table_occ[0] += &counts;

        let path = pile_path(&self.config.prefix, 0);
        std::fs::write(&path, new_symb).map_err(|e| BuildError::Io {
            path: path.clone(),
            source: e,
        })?;
        for pile in 1..ALPHABET_SIZE as u8 {
            let path = pile_path(&self.config.prefix, pile);
            std::fs::write(&path, b"").map_err(|e| BuildError::Io {
                path: path.clone(),
                source: e,
            })?;
        }

        if self.config.generate_sa {
            // The suffix following the rightmost column starts at the
            // terminator position.
            let mut w = SaWriter::create(&sa_path(&self.config.prefix, 0))?;
            for seq in 0..new_symb.len() as SequenceNumber {
                w.write_record(sequence_length, seq)?;
            }
            w.finish()?;
            for pile in 1..ALPHABET_SIZE as u8 {
                SaWriter::create(&sa_path(&self.config.prefix, pile))?.finish()?;
            }
        }
        Ok(())
    }

    /// One full cycle: reposition, sort, splice, close.
    fn insert_cycle(&mut self, new_symb: &[u8], phase: CyclePhase) -> Result<(), BuildError> {
        self.reposition_cursors()?;
        self.cursors
            .sort_unstable_by_key(|c| (c.pile, c.pos));
        self.splice_piles(new_symb, phase)?;

        if let CyclePhase::Terminator = phase {
            if self.config.generate_end_pos {
                let entries: Vec<SequenceNumber> =
                    self.cursors.iter().map(|c| c.seq).collect();
                write_end_pos(&end_pos_path(&self.config.prefix), &entries)?;
            }
        }
        Ok(())
    }

    /// Phase 1: LF-step every cursor. Cursors arrive sorted by
    /// (pile, pos), so each pile is streamed exactly once.
    fn reposition_cursors(&mut self) -> Result<(), BuildError> {
        let mut j = 0;
        while j < self.cursors.len() {
            let current_pile = self.cursors[j].pile;
            let mut reader = open_reader(&pile_path(&self.config.prefix, current_pile), false)?;
            let mut counters = LetterCount::new();
            let mut consumed: LetterNumber = 0;

            while j < self.cursors.len() && self.cursors[j].pile == current_pile {
                let cursor = &mut self.cursors[j];
                let to_read = cursor.pos - consumed;
                if to_read > 1 {
                    let got = reader.read_and_count(&mut counters, to_read - 1)?;
                    if got != to_read - 1 {
                        return Err(BuildError::Invariant {
                            detail: format!(
                                "pile {current_pile} ended {got} characters into a \
                                 {}-character skip",
                                to_read - 1
                            ),
                        });
                    }
                }
                let mut one = [0u8; 1];
                if reader.read_bytes(&mut one)? != 1 {
                    return Err(BuildError::Invariant {
                        detail: format!(
                            "cursor points past the end of pile {current_pile}"
                        ),
                    });
                }
                let found = one[0];
                let found_pile = pile_of(found).ok_or(BuildError::BadInputSymbol {
                    byte: found,
                    sequence: cursor.seq,
                })?;
                counters.add(found_pile, 1);
                consumed += to_read;

                cursor.pos =
                    counters[found_pile] + self.table_occ.occ_before(current_pile, found_pile);
                cursor.pile = found_pile;
                j += 1;
            }
        }
        Ok(())
    }

    /// Phase 3: stream every destination pile through reader → writer,
    /// splicing the new characters in. Destination piles are disjoint, so
    /// they fan out across the thread pool; each task reports the counts
    /// of the characters it inserted and the occurrence table is updated
    /// after the join.
    fn splice_piles(&mut self, new_symb: &[u8], phase: CyclePhase) -> Result<(), BuildError> {
        let sa_suffix_start = match phase {
            CyclePhase::Column(column) => column + 1,
            CyclePhase::Terminator => 0,
        };

        let mut groups: Vec<(u8, &[SortCursor])> = Vec::new();
        let mut rest: &[SortCursor] = &self.cursors;
        while let Some(first) = rest.first() {
            let pile = first.pile;
            let split = rest.partition_point(|c| c.pile == pile);
            let (group, tail) = rest.split_at(split);
            groups.push((pile, group));
            rest = tail;
        }

        let config = self.config;
        let inserted: Vec<(u8, LetterCount)> = groups
            .into_par_iter()
            .map(|(pile, group)| {
                splice_one_pile(config, pile, group, new_symb, sa_suffix_start)
                    .map(|counts| (pile, counts))
            })
            .collect::<Result<_, BuildError>>()?;

        let mut total_inserted: LetterNumber = 0;
        for (pile, counts) in inserted {
            total_inserted += counts.total();
            self.table_occ[pile] += &counts;
        }
        if total_inserted != new_symb.len() as LetterNumber {
            return Err(BuildError::Invariant {
                detail: format!(
                    "cycle inserted {total_inserted} characters, expected {}",
                    new_symb.len()
                ),
            });
        }
        Ok(())
    }
}

/// Rewrite one destination pile with this cycle's characters spliced in.
/// Returns the per-symbol counts of the inserted characters.
fn splice_one_pile(
    config: &BuildConfig,
    pile: u8,
    group: &[SortCursor],
    new_symb: &[u8],
    sa_suffix_start: SequenceLength,
) -> Result<LetterCount, BuildError> {
    let old_path = pile_path(&config.prefix, pile);
    let new_path = staging_path(&old_path);
    let mut reader = open_reader(&old_path, false)?;
    let mut writer = open_writer(&new_path, config.format)?;

    let mut sa = if config.generate_sa {
        let old_sa = sa_path(&config.prefix, pile);
        Some((
            SaReader::open(&old_sa)?,
            SaWriter::create(&staging_path(&old_sa))?,
        ))
    } else {
        None
    };

    let mut inserted = LetterCount::new();
    let mut written: LetterNumber = 0;
    for cursor in group {
        let to_copy = cursor.pos - 1 - written;
        let copied = reader.read_and_send(&mut writer, to_copy)?;
        if copied != to_copy {
            return Err(BuildError::Invariant {
                detail: format!(
                    "pile {pile} ended {copied} characters into a {to_copy}-character copy"
                ),
            });
        }
        let symbol = new_symb[cursor.seq as usize];
        writer.write_bytes(&[symbol])?;
        inserted.add(
            pile_of(symbol).ok_or(BuildError::BadInputSymbol {
                byte: symbol,
                sequence: cursor.seq,
            })?,
            1,
        );
        if let Some((sa_reader, sa_writer)) = sa.as_mut() {
            sa_reader.copy_records(sa_writer, to_copy)?;
            sa_writer.write_record(sa_suffix_start, cursor.seq)?;
        }
        written += to_copy + 1;
    }
    reader.read_and_send(&mut writer, LetterNumber::MAX)?;
    writer.flush()?;
    drop(writer);
    replace_file(&new_path, &old_path)?;

    if let Some((mut sa_reader, mut sa_writer)) = sa.take() {
        sa_reader.copy_remaining(&mut sa_writer)?;
        sa_writer.finish()?;
        let old_sa = sa_path(&config.prefix, pile);
        replace_file(&staging_path(&old_sa), &old_sa)?;
    }
    Ok(inserted)
}

fn replace_file(from: &Path, to: &Path) -> Result<(), BuildError> {
    std::fs::rename(from, to).map_err(|e| BuildError::Io {
        path: to.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::MemoryCycles;

    fn read_pile_bytes(prefix: &Path, pile: u8) -> Vec<u8> {
        let mut reader = open_reader(&pile_path(prefix, pile), false).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let got = reader.read_bytes(&mut buf).unwrap();
            if got == 0 {
                break;
            }
            out.extend_from_slice(&buf[..got]);
        }
        out
    }

    fn build(prefix: &Path, seqs: &[&[u8]], format: SegmentFormat) -> BuildOutputs {
        let mut source =
            MemoryCycles::new(seqs.iter().map(|s| s.to_vec()).collect());
        BwtBuilder::new(BuildConfig {
            prefix: prefix.to_path_buf(),
            format,
            generate_end_pos: true,
            generate_sa: false,
        })
        .run(&mut source)
        .unwrap()
    }

    /// Reference construction: sort all rotations of all
    /// terminator-suffixed sequences, take the preceding characters.
    fn naive_bwt(seqs: &[&[u8]]) -> Vec<u8> {
        let mut suffixes: Vec<(Vec<u8>, usize, usize)> = Vec::new();
        let texts: Vec<Vec<u8>> = seqs
            .iter()
            .map(|s| {
                let mut t = s.to_vec();
                t.push(TERMINATOR);
                t
            })
            .collect();
        for (si, t) in texts.iter().enumerate() {
            for start in 0..t.len() {
                // Distinct virtual terminators: tie-break suffixes of equal
                // content by sequence index.
                suffixes.push((t[start..].to_vec(), si, start));
            }
        }
        suffixes.sort();
        suffixes
            .iter()
            .map(|(_, si, start)| {
                let t = &texts[*si];
                if *start == 0 {
                    t[t.len() - 1]
                } else {
                    t[start - 1]
                }
            })
            .collect()
    }

    #[test]
    fn two_sequences_concatenate_to_the_reference_bwt() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bwt");
        let seqs: &[&[u8]] = &[b"ACGT", b"ACCT"];
        let out = build(&prefix, seqs, SegmentFormat::Ascii);

        let mut concatenated = Vec::new();
        for pile in 0..ALPHABET_SIZE as u8 {
            concatenated.extend(read_pile_bytes(&prefix, pile));
        }
        assert_eq!(concatenated, naive_bwt(seqs));
        assert_eq!(out.table_occ.total(), 10);
    }

    #[test]
    fn rle_output_matches_ascii_output_byte_for_byte_after_decode() {
        let dir = tempfile::tempdir().unwrap();
        let ascii_prefix = dir.path().join("a");
        let rle_prefix = dir.path().join("r");
        let seqs: &[&[u8]] = &[b"GATTACA", b"TACAGAT", b"AAAAAAA"];
        build(&ascii_prefix, seqs, SegmentFormat::Ascii);
        build(&rle_prefix, seqs, SegmentFormat::RleV3);

        for pile in 0..ALPHABET_SIZE as u8 {
            assert_eq!(
                read_pile_bytes(&ascii_prefix, pile),
                read_pile_bytes(&rle_prefix, pile),
                "pile {pile} differs between encoders"
            );
        }
    }

    #[test]
    fn pile_lengths_match_the_occurrence_table() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bwt");
        let seqs: &[&[u8]] = &[b"ACGTN", b"GGGCC", b"TNTNT"];
        let out = build(&prefix, seqs, SegmentFormat::RleV3);

        for pile in 0..ALPHABET_SIZE as u8 {
            let on_disk = read_pile_bytes(&prefix, pile);
            assert_eq!(
                on_disk.len() as LetterNumber,
                out.table_occ.pile_len(pile),
                "pile {pile} length disagrees with the table"
            );
            let mut observed = LetterCount::new();
            observed.count_bytes(&on_disk).unwrap();
            assert_eq!(observed, out.table_occ[pile]);
        }
    }

    #[test]
    fn empty_collection_produces_empty_piles_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bwt");
        let mut source = MemoryCycles::new(Vec::new());
        let out = BwtBuilder::new(BuildConfig {
            prefix: prefix.clone(),
            format: SegmentFormat::RleV3,
            generate_end_pos: true,
            generate_sa: false,
        })
        .run(&mut source)
        .unwrap();
        assert_eq!(out.table_occ.total(), 0);
        for pile in 0..ALPHABET_SIZE as u8 {
            assert_eq!(std::fs::metadata(pile_path(&prefix, pile)).unwrap().len(), 0);
        }
        let f = crate::endpos::EndPosFile::open_prefix(&prefix).unwrap();
        assert_eq!(f.dollar_sign_count(), 0);
    }

    #[test]
    fn single_sequence_bwt_is_the_classic_transform() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bwt");
        let seqs: &[&[u8]] = &[b"GATTACA"];
        build(&prefix, seqs, SegmentFormat::Ascii);

        let mut concatenated = Vec::new();
        for pile in 0..ALPHABET_SIZE as u8 {
            concatenated.extend(read_pile_bytes(&prefix, pile));
        }
        assert_eq!(concatenated, naive_bwt(seqs));
    }
}
