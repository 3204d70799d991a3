//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use pilebwt::builder::{pile_path, BuildConfig, BuildOutputs, BwtBuilder};
use pilebwt::codec::{open_reader, SegmentFormat};
use pilebwt::cycle::MemoryCycles;
use pilebwt::{ALPHABET_SIZE, TERMINATOR};

/// Build a collection at `prefix` with end-pos and GSA sidecars.
pub fn build_collection(
    prefix: &Path,
    sequences: &[&[u8]],
    format: SegmentFormat,
) -> BuildOutputs {
    let mut source = MemoryCycles::new(sequences.iter().map(|s| s.to_vec()).collect());
    BwtBuilder::new(BuildConfig {
        prefix: prefix.to_path_buf(),
        format,
        generate_end_pos: true,
        generate_sa: true,
    })
    .run(&mut source)
    .expect("build should succeed")
}

/// Decode one pile back to raw bytes.
pub fn read_pile(prefix: &Path, pile: u8) -> Vec<u8> {
    let mut reader = open_reader(&pile_path(prefix, pile), false).expect("open pile");
    let mut out = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let got = reader.read_bytes(&mut buf).expect("decode pile");
        if got == 0 {
            break;
        }
        out.extend_from_slice(&buf[..got]);
    }
    out
}

/// Concatenate all piles in index order.
pub fn concatenated_bwt(prefix: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    for pile in 0..ALPHABET_SIZE as u8 {
        out.extend(read_pile(prefix, pile));
    }
    out
}

/// Reference BWT: sort all terminator-suffixed suffixes (ties broken by
/// sequence index, mirroring distinct virtual terminators) and collect the
/// preceding characters.
pub fn naive_bwt(sequences: &[&[u8]]) -> Vec<u8> {
    let texts: Vec<Vec<u8>> = sequences
        .iter()
        .map(|s| {
            let mut t = s.to_vec();
            t.push(TERMINATOR);
            t
        })
        .collect();
    let mut suffixes: Vec<(&[u8], usize, usize)> = Vec::new();
    for (si, t) in texts.iter().enumerate() {
        for start in 0..t.len() {
            suffixes.push((&t[start..], si, start));
        }
    }
    suffixes.sort();
    suffixes
        .iter()
        .map(|&(_, si, start)| {
            let t = &texts[si];
            if start == 0 {
                t[t.len() - 1]
            } else {
                t[start - 1]
            }
        })
        .collect()
}

/// A fresh scratch directory plus a prefix path inside it.
pub fn scratch_prefix(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join(name);
    (dir, prefix)
}
