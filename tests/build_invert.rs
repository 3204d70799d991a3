//! Build pipeline end-to-end: pile contents, occurrence-table invariants,
//! the dollar permutation, and full round trips through inversion.

mod common;
use common::*;

use pilebwt::builder::{pile_path, sa_path, BuildConfig, BwtBuilder};
use pilebwt::codec::SegmentFormat;
use pilebwt::counts::LetterCount;
use pilebwt::cycle::MemoryCycles;
use pilebwt::endpos::EndPosFile;
use pilebwt::invert::invert_collection;
use pilebwt::{LetterNumber, ALPHABET_SIZE};

#[test]
fn two_read_collection_matches_the_reference_transform() {
    let (_dir, prefix) = scratch_prefix("s1");
    let seqs: &[&[u8]] = &[b"ACGT", b"ACCT"];
    build_collection(&prefix, seqs, SegmentFormat::RleV3);
    assert_eq!(concatenated_bwt(&prefix), naive_bwt(seqs));
}

#[test]
fn occurrence_table_always_matches_the_segments_on_disk() {
    let (_dir, prefix) = scratch_prefix("inv");
    let seqs: &[&[u8]] = &[
        b"GATTACAGATTACA",
        b"TTTTTTTTTTTTTT",
        b"ACGTACGTACGTAC",
        b"NNNNACGTNNNNAC",
    ];
    let out = build_collection(&prefix, seqs, SegmentFormat::RleV3);

    let mut total: LetterNumber = 0;
    for pile in 0..ALPHABET_SIZE as u8 {
        let bytes = read_pile(&prefix, pile);
        // Invariant: pile length equals its occurrence-table row sum.
        assert_eq!(bytes.len() as LetterNumber, out.table_occ.pile_len(pile));
        let mut observed = LetterCount::new();
        observed.count_bytes(&bytes).unwrap();
        assert_eq!(observed, out.table_occ[pile], "pile {pile} histogram");
        total += bytes.len() as LetterNumber;
    }
    // Invariant: the table accounts for every inserted character.
    assert_eq!(total, (seqs[0].len() as LetterNumber + 1) * seqs.len() as LetterNumber);
}

#[test]
fn inversion_round_trips_a_mixed_collection() {
    let (_dir, prefix) = scratch_prefix("s2");
    let seqs: &[&[u8]] = &[b"ACGT", b"ACCT"];
    build_collection(&prefix, seqs, SegmentFormat::RleV3);

    let recovered = invert_collection(&prefix).expect("invert");
    assert_eq!(recovered.len(), 2);
    assert_eq!(&recovered[0], b"ACGT");
    assert_eq!(&recovered[1], b"ACCT");
}

#[test]
fn inversion_round_trips_many_repetitive_reads() {
    let (_dir, prefix) = scratch_prefix("rep");
    let owned: Vec<Vec<u8>> = (0..40u8)
        .map(|k| {
            (0..25u8)
                .map(|i| b"ACGTN"[((k as usize * 7 + i as usize) % 5)])
                .collect()
        })
        .collect();
    let seqs: Vec<&[u8]> = owned.iter().map(|s| s.as_slice()).collect();
    build_collection(&prefix, &seqs, SegmentFormat::RleV1);

    let recovered = invert_collection(&prefix).expect("invert");
    assert_eq!(recovered.len(), owned.len());
    for (orig, back) in owned.iter().zip(&recovered) {
        assert_eq!(orig, back);
    }
}

#[test]
fn dollar_permutation_is_consistent_with_pile_zero_order() {
    let (_dir, prefix) = scratch_prefix("perm");
    let seqs: &[&[u8]] = &[b"TTTT", b"AAAA", b"CCCC"];
    build_collection(&prefix, seqs, SegmentFormat::Ascii);

    let mut end_pos = EndPosFile::open_prefix(&prefix).expect("end-pos");
    assert_eq!(end_pos.dollar_sign_count(), 3);
    let mut seen = [false; 3];
    for rank in 0..3 {
        let (seq, sub) = end_pos.sequence_for_dollar(rank).unwrap();
        assert_eq!(sub, 0);
        assert!(!seen[seq as usize], "sequence {seq} mapped twice");
        seen[seq as usize] = true;
    }
}

#[test]
fn empty_collection_produces_empty_piles_and_a_readable_header() {
    let (_dir, prefix) = scratch_prefix("empty");
    let mut source = MemoryCycles::new(Vec::new());
    BwtBuilder::new(BuildConfig {
        prefix: prefix.clone(),
        format: SegmentFormat::RleV3,
        generate_end_pos: true,
        generate_sa: true,
    })
    .run(&mut source)
    .expect("empty build");

    for pile in 0..ALPHABET_SIZE as u8 {
        assert_eq!(std::fs::metadata(pile_path(&prefix, pile)).unwrap().len(), 0);
        assert_eq!(std::fs::metadata(sa_path(&prefix, pile)).unwrap().len(), 0);
    }
    let end_pos = EndPosFile::open_prefix(&prefix).expect("header must parse");
    assert_eq!(end_pos.dollar_sign_count(), 0);
}

#[test]
fn single_sequence_yields_the_classic_bwt() {
    let (_dir, prefix) = scratch_prefix("single");
    let seqs: &[&[u8]] = &[b"GATTACA"];
    build_collection(&prefix, seqs, SegmentFormat::RleV3);
    assert_eq!(concatenated_bwt(&prefix), naive_bwt(seqs));
    assert_eq!(invert_collection(&prefix).unwrap()[0], b"GATTACA");
}

#[test]
fn gsa_sidecars_stay_parallel_to_their_piles() {
    let (_dir, prefix) = scratch_prefix("gsa");
    let seqs: &[&[u8]] = &[b"ACGT", b"TGCA"];
    build_collection(&prefix, seqs, SegmentFormat::Ascii);

    for pile in 0..ALPHABET_SIZE as u8 {
        let segment_len = read_pile(&prefix, pile).len() as u64;
        let sa_len = std::fs::metadata(sa_path(&prefix, pile)).unwrap().len();
        assert_eq!(sa_len, segment_len * 8, "pile {pile} sidecar record count");
    }

    // Pile-0 rows hold the reads' last characters; the suffix following
    // them starts at the terminator column.
    let sa0 = std::fs::read(sa_path(&prefix, 0)).unwrap();
    for record in sa0.chunks_exact(8) {
        let suffix_start = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let seq = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
        assert_eq!(suffix_start, 4);
        assert!(seq < 2);
    }
}
