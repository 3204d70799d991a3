//! Metagenomic classification end-to-end: a two-genome database whose
//! species differ but whose genus agrees, queried with a read from the
//! region the genomes share.

mod common;
use common::*;

use std::path::Path;

use pilebwt::builder::sa_path;
use pilebwt::codec::SegmentFormat;
use pilebwt::compare::{c_file_path, run_compare, CompareConfig, CompareMode};
use pilebwt::ALPHABET_SIZE;

/// Derive the per-pile C-files from the GSA sidecars the build left
/// behind: sequence 0 becomes database file 1, sequence 1 file 2.
fn write_c_files(prefix: &Path) {
    for pile in 0..ALPHABET_SIZE as u8 {
        let records = std::fs::read(sa_path(prefix, pile)).expect("GSA sidecar");
        let mut c_bytes = Vec::with_capacity(records.len() / 2);
        for record in records.chunks_exact(8) {
            let seq = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            c_bytes.extend_from_slice(&(seq + 1).to_le_bytes());
        }
        std::fs::write(c_file_path(prefix, pile), c_bytes).unwrap();
    }
}

/// Taxonomy: files 1 and 2 share superkingdom..genus, species differ.
fn write_taxonomy(path: &Path) {
    std::fs::write(
        path,
        "1 11 22 33 44 55 66 701\n\
         2 11 22 33 44 55 66 702\n",
    )
    .unwrap();
}

#[test]
fn a_read_from_the_shared_region_classifies_at_genus_level() {
    let (_dir_db, db_prefix) = scratch_prefix("db");
    let (_dir_reads, reads_prefix) = scratch_prefix("reads");

    // Two genomes sharing their 7-base tail, diverging at the head.
    let genome_1: &[u8] = b"ACGTACGT";
    let genome_2: &[u8] = b"CCGTACGT";
    build_collection(&db_prefix, &[genome_1, genome_2], SegmentFormat::RleV3);
    write_c_files(&db_prefix);

    // One query read drawn from the shared region of genome 1.
    build_collection(&reads_prefix, &[b"GTACGT"], SegmentFormat::RleV3);

    let taxonomy = db_prefix.with_extension("tax");
    write_taxonomy(&taxonomy);
    let out = reads_prefix.with_extension("mtaxa");

    run_compare(&CompareConfig {
        set_a: reads_prefix.clone(),
        set_b: db_prefix.clone(),
        mode: CompareMode::Metagenomics,
        max_cycle: 32,
        min_occ: 1,
        min_word_length: 3,
        subset: String::new(),
        memory_limit: None,
        propagate_sequence: true,
        no_comparison_skip: true,
        use_index: false,
        taxonomy: Some(taxonomy),
        output: Some(out.clone()),
    })
    .expect("compare");

    let report = std::fs::read_to_string(&out).unwrap();
    let mtaxa: Vec<&str> = report.lines().filter(|l| l.starts_with("MTAXA")).collect();
    assert!(!mtaxa.is_empty(), "no MTAXA records in: {report}");

    // Genus (level 5, taxon 66) is the deepest shared level; the species
    // ids must never be reported.
    for line in &mtaxa {
        let mut fields = line.split_whitespace();
        fields.next(); // tag
        let level: usize = fields.next().unwrap().parse().unwrap();
        let taxon: u32 = fields.next().unwrap().parse().unwrap();
        assert!(level <= 5, "classified below genus: {line}");
        assert_ne!(taxon, 701, "species leaked: {line}");
        assert_ne!(taxon, 702, "species leaked: {line}");
    }
    assert!(
        mtaxa.iter().any(|l| l.split_whitespace().nth(2) == Some("66")),
        "genus taxon not reported: {report}"
    );
}
