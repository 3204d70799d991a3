//! File-number → taxonomy-path table for the metagenomics classifier.
//!
//! The provider contract: for every database file number, a fixed-length
//! vector of ancestor taxon ids, outermost level first, with `0` meaning
//! "unknown at this level". The text format is one line per file:
//!
//! ```text
//! <file_number> <taxid_level0> <taxid_level1> ...
//! ```
//!
//! Missing trailing levels are padded with zeros.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::TAX_LEVEL_COUNT;

/// A taxonomy path, outermost level first; 0 = unknown.
pub type TaxPath = [u32; TAX_LEVEL_COUNT];

/// Errors from taxonomy table loading.
#[derive(Debug, Error)]
pub enum TaxonomyError {
    /// Underlying file-system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Originating error.
        #[source]
        source: std::io::Error,
    },

    /// A line that does not start with a numeric file number.
    #[error("{path}:{line}: malformed taxonomy record")]
    Malformed {
        /// File being read.
        path: PathBuf,
        /// One-based line number.
        line: usize,
    },
}

/// The loaded table, indexed by database file number.
#[derive(Debug, Clone, Default)]
pub struct TaxTable {
    paths: Vec<TaxPath>,
}

impl TaxTable {
    /// Parse the text table at `path`.
    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let file = File::open(path).map_err(|e| TaxonomyError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut paths: Vec<TaxPath> = Vec::new();

        for (line_idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| TaxonomyError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = || TaxonomyError::Malformed {
                path: path.to_path_buf(),
                line: line_idx + 1,
            };

            let mut fields = line.split_whitespace();
            let file_num: usize = fields
                .next()
                .ok_or_else(malformed)?
                .parse()
                .map_err(|_| malformed())?;

            let mut levels: TaxPath = [0; TAX_LEVEL_COUNT];
            for (slot, field) in levels.iter_mut().zip(&mut fields) {
                *slot = field.parse().map_err(|_| malformed())?;
            }

            if file_num >= paths.len() {
                paths.resize(file_num + 1, [0; TAX_LEVEL_COUNT]);
            }
            paths[file_num] = levels;
        }
        Ok(Self { paths })
    }

    /// Build from an in-memory table (tests, embedded databases).
    pub fn from_paths(paths: Vec<TaxPath>) -> Self {
        Self { paths }
    }

    /// Taxonomy path of a database file, if it is in the table.
    pub fn path_of(&self, file_num: u32) -> Option<&TaxPath> {
        self.paths.get(file_num as usize)
    }

    /// Whether the table knows anything at all about `file_num`.
    pub fn is_known(&self, file_num: u32) -> bool {
        self.path_of(file_num)
            .is_some_and(|p| p.iter().any(|&t| t != 0))
    }

    /// Number of file slots in the table.
    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    /// Intersect the taxonomy paths of `file_numbers`: for each level,
    /// the taxon shared by every file with a known entry at that level,
    /// or 0. Levels below the first disagreement are all 0 — an interval
    /// spread across two genera shares nothing at species level either.
    pub fn shared_taxonomy(&self, file_numbers: &[u32]) -> TaxPath {
        let mut shared: TaxPath = [0; TAX_LEVEL_COUNT];
        for level in 0..TAX_LEVEL_COUNT {
            let mut candidate: Option<u32> = None;
            let mut conflict = false;
            for &file_num in file_numbers {
                let tax = match self.path_of(file_num) {
                    Some(p) => p[level],
                    None => 0,
                };
                if tax == 0 {
                    // Unknown contributes nothing either way.
                    continue;
                }
                match candidate {
                    None => candidate = Some(tax),
                    Some(c) if c == tax => {}
                    Some(_) => {
                        conflict = true;
                        break;
                    }
                }
            }
            if conflict {
                break;
            }
            if let Some(tax) = candidate {
                shared[level] = tax;
            }
        }
        shared
    }

    /// Deepest level with a shared taxon, with its taxon id.
    pub fn deepest_shared(&self, file_numbers: &[u32]) -> Option<(usize, u32)> {
        let shared = self.shared_taxonomy(file_numbers);
        (0..TAX_LEVEL_COUNT)
            .rev()
            .find(|&level| shared[level] != 0)
            .map(|level| (level, shared[level]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_species_same_genus() -> TaxTable {
        let mut a: TaxPath = [0; TAX_LEVEL_COUNT];
        let mut b: TaxPath = [0; TAX_LEVEL_COUNT];
        // superkingdom..genus shared, species differs.
        for (level, slot) in a.iter_mut().enumerate().take(6) {
            *slot = 100 + level as u32;
        }
        b[..6].copy_from_slice(&a[..6]);
        a[6] = 900;
        b[6] = 901;
        TaxTable::from_paths(vec![a, b])
    }

    #[test]
    fn shared_taxonomy_stops_at_genus() {
        let table = two_species_same_genus();
        let shared = table.shared_taxonomy(&[0, 1]);
        assert_eq!(shared[5], 105); // genus
        assert_eq!(shared[6], 0); // species differs
        assert_eq!(table.deepest_shared(&[0, 1]), Some((5, 105)));
    }

    #[test]
    fn single_file_shares_its_whole_path() {
        let table = two_species_same_genus();
        assert_eq!(table.deepest_shared(&[0]), Some((6, 900)));
    }

    #[test]
    fn unknown_levels_are_skipped_not_conflicting() {
        let mut a: TaxPath = [0; TAX_LEVEL_COUNT];
        a[0] = 7;
        let b: TaxPath = [0; TAX_LEVEL_COUNT];
        let table = TaxTable::from_paths(vec![a, b]);
        // File 1 knows nothing; file 0's superkingdom still wins through.
        assert_eq!(table.shared_taxonomy(&[0, 1])[0], 7);
        assert!(!table.is_known(1));
    }

    #[test]
    fn text_table_parses_and_pads() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("tax.txt");
        std::fs::write(&p, "# db files\n0 2 9 31\n1 2 9\n").unwrap();
        let table = TaxTable::load(&p).unwrap();
        assert_eq!(table.file_count(), 2);
        assert_eq!(table.path_of(0).unwrap()[2], 31);
        assert_eq!(table.path_of(1).unwrap()[2], 0);
        assert_eq!(table.shared_taxonomy(&[0, 1])[1], 9);
    }
}
