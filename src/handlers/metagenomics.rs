//! Metagenomic LCA policy: set A holds query reads, set B a merged
//! database of reference genomes. A per-pile C-file parallels each
//! database pile, naming the source file of every BWT character; when a
//! k-mer stops extending, the taxonomy paths of its source files are
//! intersected and the deepest shared taxon is reported as an `MTAXA`
//! record.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::alphabet::{ALPHABET_SIZE, DONT_KNOW_PILE};
use crate::counts::LetterCount;
use crate::rangestore::Range;
use crate::taxonomy::TaxTable;
use crate::{LetterNumber, PileFlags};

use super::{format_counts, word_or_placeholder, HandlerError, IntervalHandler};

/// Words longer than this may report at superkingdom level; shorter ones
/// start at phylum to keep the output focused.
const LONG_WORD_CYCLES: u32 = 50;

/// One pile's C-file: a `u32-le` source-file number per BWT position.
#[derive(Debug)]
struct CFile {
    path: PathBuf,
    file: File,
}

impl CFile {
    fn open(path: &Path) -> Result<Self, HandlerError> {
        let file =
            File::open(path).map_err(|e| crate::codec::CodecError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn read_range(
        &mut self,
        position: LetterNumber,
        num: LetterNumber,
    ) -> Result<Vec<u32>, HandlerError> {
        self.file
            .seek(SeekFrom::Start(position * 4))
            .map_err(|e| crate::codec::CodecError::io(&self.path, e))?;
        let mut bytes = vec![0u8; num as usize * 4];
        self.file
            .read_exact(&mut bytes)
            .map_err(|_| HandlerError::CFileTruncated {
                path: self.path.clone(),
                position,
            })?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// The metagenomics classifier handler.
pub struct MetagenomicsHandler {
    min_occ: LetterNumber,
    min_word_length: u32,
    max_word_length: u32,
    c_files: Vec<Option<CFile>>,
    taxonomy: TaxTable,
    out: Box<dyn Write + Send>,
    reports: u64,
}

impl std::fmt::Debug for MetagenomicsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetagenomicsHandler")
            .field("min_occ", &self.min_occ)
            .field("min_word_length", &self.min_word_length)
            .field("max_word_length", &self.max_word_length)
            .field("reports", &self.reports)
            .finish()
    }
}

impl MetagenomicsHandler {
    /// Open the classifier over the database's C-files. `c_paths` is
    /// indexed by pile; piles without a C-file (the terminator pile) pass
    /// `None`.
    pub fn new(
        min_occ: LetterNumber,
        min_word_length: u32,
        max_word_length: u32,
        c_paths: &[Option<PathBuf>],
        taxonomy: TaxTable,
        out: Box<dyn Write + Send>,
    ) -> Result<Self, HandlerError> {
        let mut c_files = Vec::with_capacity(ALPHABET_SIZE);
        for pile in 0..ALPHABET_SIZE {
            c_files.push(match c_paths.get(pile).and_then(|p| p.as_ref()) {
                Some(path) => Some(CFile::open(path)?),
                None => None,
            });
        }
        Ok(Self {
            min_occ,
            min_word_length,
            max_word_length,
            c_files,
            taxonomy,
            out,
            reports: 0,
        })
    }

    /// Number of `MTAXA` records emitted so far.
    pub fn report_count(&self) -> u64 {
        self.reports
    }

    /// Distinct source files contributing to a database interval. The
    /// first contributor is always kept; later ones only if the taxonomy
    /// table knows them, so unclassified contaminants cannot veto an LCA.
    fn file_numbers_for_range(
        &mut self,
        pile: u8,
        position: LetterNumber,
        num: LetterNumber,
    ) -> Result<Vec<u32>, HandlerError> {
        let cfile = match self.c_files[pile as usize].as_mut() {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        let raw = cfile.read_range(position, num)?;
        let mut unique: Vec<u32> = Vec::new();
        if let Some(&first) = raw.first() {
            unique.push(first);
            for &file_num in &raw[1..] {
                if self.taxonomy.is_known(file_num) && !unique.contains(&file_num) {
                    unique.push(file_num);
                }
            }
        }
        Ok(unique)
    }
}

impl IntervalHandler for MetagenomicsHandler {
    fn found_in_both(
        &mut self,
        pile: u8,
        counts_this_range_a: &LetterCount,
        counts_this_range_b: &LetterCount,
        range_a: &Range,
        range_b: &Range,
        propagate_a: &mut PileFlags,
        propagate_b: &mut PileFlags,
        _is_breakpoint: &mut bool,
        cycle: u32,
    ) -> Result<(), HandlerError> {
        let singleton_in_ref = range_b.num == 1;
        let mut at_least_one_prop = false;
        let mut below_min_depth_at_end_of_reads = false;

        for symbol in 1..ALPHABET_SIZE as u8 {
            if counts_this_range_b[symbol] > 0 {
                let deep_enough = counts_this_range_a[symbol] >= self.min_occ;
                propagate_a[symbol as usize] = deep_enough;
                propagate_b[symbol as usize] = deep_enough;
                at_least_one_prop |= deep_enough;
                // A path that only fell under threshold because reads ran
                // out is still worth classifying.
                if !deep_enough
                    && counts_this_range_a[symbol] + counts_this_range_a[0] >= self.min_occ
                {
                    below_min_depth_at_end_of_reads = true;
                }
            }
        }

        let mut different_propagation = false;
        if !at_least_one_prop {
            for symbol in 1..ALPHABET_SIZE as u8 {
                if counts_this_range_b[symbol] == 0
                    && counts_this_range_a[symbol] >= self.min_occ
                {
                    different_propagation = true;
                }
            }
        } else {
            below_min_depth_at_end_of_reads = false;
        }

        if singleton_in_ref && cycle >= self.min_word_length {
            // Unique in the database: the classification cannot sharpen
            // further, stop both sides.
            for symbol in 1..ALPHABET_SIZE as u8 {
                propagate_a[symbol as usize] = false;
                propagate_b[symbol as usize] = false;
            }
        }
        propagate_a[DONT_KNOW_PILE as usize] = false;
        propagate_b[DONT_KNOW_PILE as usize] = false;

        let max_length_reached = cycle >= self.max_word_length;
        let should_classify = different_propagation
            || below_min_depth_at_end_of_reads
            || max_length_reached
            || singleton_in_ref;

        if should_classify
            && cycle >= self.min_word_length
            && (range_b.num as usize) < self.taxonomy.file_count()
        {
            let file_numbers =
                self.file_numbers_for_range(pile, range_b.pos_masked(), range_b.num)?;
            if !file_numbers.is_empty() {
                let smallest_level = if cycle > LONG_WORD_CYCLES { 0 } else { 1 };
                if let Some((level, taxid)) = self.taxonomy.deepest_shared(&file_numbers) {
                    if level >= smallest_level {
                        self.reports += 1;
                        let mut files = String::new();
                        for f in &file_numbers {
                            files.push_str(&f.to_string());
                            files.push(':');
                        }
                        writeln!(
                            self.out,
                            "MTAXA {level} {taxid} {} {} {} {} {files}",
                            word_or_placeholder(range_b, pile, cycle),
                            range_b.pos_masked(),
                            format_counts(counts_this_range_a),
                            format_counts(counts_this_range_b),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn found_in_a_only(
        &mut self,
        _pile: u8,
        _counts_so_far: &LetterCount,
        counts_this_range: &LetterCount,
        _bwt_substring: Option<&[u8]>,
        _range: &Range,
        propagate: &mut PileFlags,
        _cycle: u32,
    ) -> Result<(), HandlerError> {
        for symbol in 1..ALPHABET_SIZE as u8 {
            propagate[symbol as usize] = counts_this_range[symbol] >= self.min_occ;
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
        // Database-only intervals carry no reads to classify.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::TaxPath;
    use crate::TAX_LEVEL_COUNT;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn genus_sharing_table() -> TaxTable {
        // File numbers 1 and 2: same path through genus, species differ.
        let mut one: TaxPath = [0; TAX_LEVEL_COUNT];
        for (level, slot) in one.iter_mut().enumerate().take(6) {
            *slot = 10 + level as u32;
        }
        let mut two = one;
        one[6] = 77;
        two[6] = 78;
        TaxTable::from_paths(vec![[0; TAX_LEVEL_COUNT], one, two])
    }

    fn write_c_file(path: &Path, nums: &[u32]) {
        let mut bytes = Vec::new();
        for n in nums {
            bytes.extend_from_slice(&n.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn singleton_database_interval_reports_the_shared_genus() {
        let dir = tempfile::tempdir().unwrap();
        let c1 = dir.path().join("db-C01");
        // Pile 1 of the database: positions 0..4 drawn from files 1,2.
        write_c_file(&c1, &[1, 2, 1, 2]);
        let mut c_paths: Vec<Option<PathBuf>> = vec![None; ALPHABET_SIZE];
        c_paths[1] = Some(c1);

        let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));
        let mut handler = MetagenomicsHandler::new(
            1,
            2,
            100,
            &c_paths,
            genus_sharing_table(),
            Box::new(buf.clone()),
        )
        .unwrap();

        let mut counts_a = LetterCount::new();
        counts_a.add(0, 1); // reads ended here
        let mut counts_b = LetterCount::new();
        counts_b.add(2, 1);
        counts_b.add(5, 1);
        let range_a = Range::new(Vec::new(), 0, 1);
        let range_b = Range::new(b"GACGT".to_vec(), 1, 2);

        let mut pa = [false; ALPHABET_SIZE];
        let mut pb = [false; ALPHABET_SIZE];
        let mut bkpt = false;
        handler
            .found_in_both(
                1, &counts_a, &counts_b, &range_a, &range_b, &mut pa, &mut pb, &mut bkpt, 5,
            )
            .unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(output.starts_with("MTAXA 5 15"), "got: {output}");
        assert_eq!(handler.report_count(), 1);
    }

    #[test]
    fn deep_shared_paths_keep_extending_without_reports() {
        let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));
        let c_paths: Vec<Option<PathBuf>> = vec![None; ALPHABET_SIZE];
        let mut handler = MetagenomicsHandler::new(
            2,
            5,
            100,
            &c_paths,
            genus_sharing_table(),
            Box::new(buf.clone()),
        )
        .unwrap();

        let mut counts_a = LetterCount::new();
        counts_a.add(1, 4);
        let mut counts_b = LetterCount::new();
        counts_b.add(1, 10);
        let range_a = Range::new(Vec::new(), 0, 4);
        let range_b = Range::new(Vec::new(), 0, 10);
        let mut pa = [false; ALPHABET_SIZE];
        let mut pb = [false; ALPHABET_SIZE];
        let mut bkpt = false;
        handler
            .found_in_both(
                2, &counts_a, &counts_b, &range_a, &range_b, &mut pa, &mut pb, &mut bkpt, 3,
            )
            .unwrap();
        assert!(pa[1] && pb[1]);
        assert_eq!(handler.report_count(), 0);
        assert!(buf.0.lock().unwrap().is_empty());
    }
}
