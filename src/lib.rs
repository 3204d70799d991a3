//! # pilebwt
//!
//! External-memory construction and querying of the Burrows–Wheeler
//! Transform of very large string collections (e.g. billions of short
//! sequencing reads).
//!
//! The BWT is partitioned into **piles**: pile `i` holds the characters
//! whose following character in the collection is the `i`-th alphabet
//! symbol. Each pile lives in its own segment file (ASCII or run-length
//! encoded), so nothing ever needs the whole transform in memory.
//!
//! Three operations drive everything:
//!
//! 1. **build** — the incremental builder inserts one input column per
//!    cycle, maintaining a sort cursor per sequence ([`builder`]).
//! 2. **compare** — backward search propagates BWT intervals cycle by
//!    cycle through external queues, with pluggable policies for
//!    reference comparison, tumour/normal and metagenomic classification
//!    ([`backtracker`], [`handlers`], [`compare`]).
//! 3. **extend** — resolves k-mer intervals to the sequences containing
//!    them via the terminator-position permutation ([`extend`]).

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod alphabet;
pub mod backtracker;
pub mod builder;
pub mod codec;
pub mod compare;
pub mod counts;
pub mod cycle;
pub mod endpos;
pub mod extend;
pub mod handlers;
pub mod invert;
pub mod rangestore;
pub mod taxonomy;
pub mod transpose;
pub mod wholebwt;

// Re-exports for convenience
pub use alphabet::{ALPHABET, ALPHABET_SIZE, TERMINATOR};
pub use builder::{BuildConfig, BwtBuilder};
pub use compare::{CompareConfig, CompareMode};
pub use counts::{LetterCount, PileCounts};
pub use extend::ExtendConfig;

/// Position of (or count of) characters in a BWT. Wide enough for
/// transforms of up to 2^63 characters; the top bit is reserved for the
/// match flag of two-set traversals.
pub type LetterNumber = u64;

/// Identifier of an input sequence. Collections are capped at 4 billion
/// reads.
pub type SequenceNumber = u32;

/// Length of one input sequence.
pub type SequenceLength = u32;

/// Flag bit marking an interval as present in both BWT sets.
pub const MATCH_FLAG: LetterNumber = 1 << 63;

/// Mask clearing [`MATCH_FLAG`] from a position.
pub const MATCH_MASK: LetterNumber = !MATCH_FLAG;

/// Per-pile set of boolean propagation decisions handed to interval
/// handlers.
pub type PileFlags = [bool; ALPHABET_SIZE];

/// Standard names of the taxonomic levels used by the metagenomics
/// classifier, outermost first.
pub const TAX_LEVEL_NAMES: [&str; 11] = [
    "superkingdom",
    "phylum",
    "class",
    "order",
    "family",
    "genus",
    "species",
    "subspecies",
    "unnamed rank 9",
    "unnamed rank 10",
    "unnamed rank 11",
];

/// Number of taxonomic levels tracked per database file.
pub const TAX_LEVEL_COUNT: usize = TAX_LEVEL_NAMES.len();
