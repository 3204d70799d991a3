//! BWT inversion: recover the original sequences from a pile set and its
//! end-pos permutation by iterated LF-stepping from each terminator.
//!
//! Piles are materialised in memory with checkpointed rank support, so
//! this is meant for verification and modest collections rather than the
//! billion-read scale the builder targets.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::alphabet::{pile_of, ALPHABET_SIZE, TERMINATOR};
use crate::builder::pile_path;
use crate::codec::{open_reader, CodecError};
use crate::counts::PileCounts;
use crate::endpos::{EndPosError, EndPosFile};
use crate::{LetterNumber, SequenceNumber};

/// Bases between rank checkpoints.
const CHECKPOINT_STRIDE: usize = 256;

/// Errors from inversion.
#[derive(Debug, Error)]
pub enum InvertError {
    /// Segment codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

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

    /// The piles disagree with themselves or the permutation.
    #[error("inversion failed: {detail}")]
    Corrupt {
        /// What went wrong.
        detail: String,
    },
}

/// One pile held in memory with sampled per-symbol prefix counts.
#[derive(Debug)]
struct RankedPile {
    bytes: Vec<u8>,
    checkpoints: Vec<[LetterNumber; ALPHABET_SIZE]>,
}

impl RankedPile {
    fn build(bytes: Vec<u8>) -> Result<Self, InvertError> {
        let mut checkpoints = Vec::with_capacity(bytes.len() / CHECKPOINT_STRIDE + 1);
        let mut counts = [0; ALPHABET_SIZE];
        for (idx, &b) in bytes.iter().enumerate() {
            if idx % CHECKPOINT_STRIDE == 0 {
                checkpoints.push(counts);
            }
            let pile = pile_of(b).ok_or_else(|| InvertError::Corrupt {
                detail: format!("segment byte 0x{b:02x} outside the alphabet"),
            })?;
            counts[pile as usize] += 1;
        }
        checkpoints.push(counts);
        Ok(Self { bytes, checkpoints })
    }

    /// Count of `symbol` in `bytes[..end)`.
    fn rank(&self, symbol: u8, end: usize) -> LetterNumber {
        let checkpoint = end / CHECKPOINT_STRIDE;
        let base = checkpoint * CHECKPOINT_STRIDE;
        let mut count =
            self.checkpoints[checkpoint][pile_of(symbol).expect("validated at build") as usize];
        for &b in &self.bytes[base..end] {
            if b == symbol {
                count += 1;
            }
        }
        count
    }
}

/// Recover every sequence, indexed by its original id.
pub fn invert_collection(prefix: &Path) -> Result<Vec<Vec<u8>>, InvertError> {
    let mut piles = Vec::with_capacity(ALPHABET_SIZE);
    let mut table_occ = PileCounts::new();
    for pile in 0..ALPHABET_SIZE as u8 {
        let mut reader = open_reader(&pile_path(prefix, pile), false)?;
        let mut bytes = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let got = reader.read_bytes(&mut buf)?;
            if got == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..got]);
        }
        table_occ[pile]
            .count_bytes(&bytes)
            .map_err(|b| InvertError::Corrupt {
                detail: format!("pile {pile} holds byte 0x{b:02x}"),
            })?;
        piles.push(RankedPile::build(bytes)?);
    }

    let mut end_pos = EndPosFile::open_prefix(prefix)?;
    let dollar_count = end_pos.dollar_sign_count();
    let mut sequences: Vec<Vec<u8>> = vec![Vec::new(); dollar_count as usize];

    for rank in 0..dollar_count {
        let (sequence_id, _) = end_pos.sequence_for_dollar(rank)?;
        if sequence_id as LetterNumber >= dollar_count {
            return Err(InvertError::Corrupt {
                detail: format!("end-pos names sequence {sequence_id} of {dollar_count}"),
            });
        }

        // The rank-th terminator's LF image is position `rank` of pile 0;
        // walking LF from there yields the read back to front.
        let mut read = Vec::new();
        let mut pile = 0u8;
        let mut pos = rank as usize;
        loop {
            let symbol = *piles[pile as usize].bytes.get(pos).ok_or_else(|| {
                InvertError::Corrupt {
                    detail: format!("walk left pile {pile} at {pos}"),
                }
            })?;
            if symbol == TERMINATOR {
                break;
            }
            read.push(symbol);
            let symbol_pile = pile_of(symbol).expect("validated at load");
            let next = table_occ.occ_before(pile, symbol_pile)
                + piles[pile as usize].rank(symbol, pos + 1)
                - 1;
            pile = symbol_pile;
            pos = next as usize;
        }
        read.reverse();
        sequences[sequence_id as usize] = read;
    }
    Ok(sequences)
}

/// Recover the collection and write it one sequence per line.
pub fn invert_to_writer(prefix: &Path, out: &mut impl Write) -> Result<SequenceNumber, InvertError> {
    let sequences = invert_collection(prefix)?;
    let count = sequences.len() as SequenceNumber;
    for seq in sequences {
        out.write_all(&seq).map_err(|e| InvertError::Io {
            path: prefix.to_path_buf(),
            source: e,
        })?;
        out.write_all(b"\n").map_err(|e| InvertError::Io {
            path: prefix.to_path_buf(),
            source: e,
        })?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildConfig, BwtBuilder};
    use crate::codec::SegmentFormat;
    use crate::cycle::MemoryCycles;

    fn build_and_invert(seqs: &[&[u8]], format: SegmentFormat) -> Vec<Vec<u8>> {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bwt");
        let mut source = MemoryCycles::new(seqs.iter().map(|s| s.to_vec()).collect());
        BwtBuilder::new(BuildConfig {
            prefix: prefix.clone(),
            format,
            generate_end_pos: true,
            generate_sa: false,
        })
        .run(&mut source)
        .unwrap();
        invert_collection(&prefix).unwrap()
    }

    #[test]
    fn inversion_recovers_the_original_reads_in_order() {
        let seqs: &[&[u8]] = &[b"ACGT", b"ACCT", b"TTTT", b"GNGN"];
        let got = build_and_invert(seqs, SegmentFormat::RleV3);
        assert_eq!(got.len(), 4);
        for (orig, back) in seqs.iter().zip(&got) {
            assert_eq!(&back[..], *orig);
        }
    }

    #[test]
    fn inversion_is_format_independent() {
        let seqs: &[&[u8]] = &[b"GATTACA", b"CATCATC"];
        assert_eq!(
            build_and_invert(seqs, SegmentFormat::Ascii),
            build_and_invert(seqs, SegmentFormat::RleV1),
        );
    }
}
