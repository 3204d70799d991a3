//! External persistent queues of BWT intervals.
//!
//! For every cycle there are A×A queues keyed by (incoming pile, outgoing
//! pile). Queues written during cycle `c` become the inputs of cycle `c+1`;
//! two generations alternate inside one scratch directory. Queues live in
//! RAM up to a per-queue cap when a memory budget is configured, spilling
//! to disk transparently once the cap is hit.

mod range;
mod varint;

pub use range::{Range, WireState};
pub use varint::{read_varint, write_varint, VarintError, MAX_VARINT};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;

use crate::alphabet::{symbol_of, ALPHABET_SIZE};
use crate::LetterNumber;

/// Errors from queue serialisation and storage.
#[derive(Debug, Error)]
pub enum RangeError {
    /// Underlying file-system failure.
    #[error("range store i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Varint encode/decode failure.
    #[error(transparent)]
    Varint(#[from] VarintError),

    /// A range was appended out of ascending position order.
    #[error("range at {pos} precedes the previous range end {previous_end}")]
    PositionRegression {
        /// Offending position.
        pos: LetterNumber,
        /// End position of the previously written range.
        previous_end: LetterNumber,
    },

    /// A propagated word cannot be stored in one record.
    #[error("propagated word of {len} bytes exceeds the 255-byte record limit")]
    WordTooLong {
        /// Word (or suffix) length.
        len: usize,
    },

    /// A queue file ended in the middle of a record.
    #[error("range queue ended inside a record")]
    TruncatedQueue,
}

type QueueKey = (u8, u8);

#[derive(Debug)]
enum SinkState {
    Ram {
        buf: Vec<u8>,
        cap: usize,
        path: PathBuf,
    },
    Disk {
        file: BufWriter<File>,
    },
}

impl Write for SinkState {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            SinkState::Ram { buf, cap, path } => {
                if buf.len() + data.len() > *cap {
                    // Cap exhausted: spill everything accumulated so far and
                    // continue on disk.
                    let mut file = BufWriter::new(File::create(&path)?);
                    file.write_all(buf)?;
                    file.write_all(data)?;
                    *self = SinkState::Disk { file };
                } else {
                    buf.extend_from_slice(data);
                }
                Ok(data.len())
            }
            SinkState::Disk { file } => {
                file.write_all(data)?;
                Ok(data.len())
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            SinkState::Ram { .. } => Ok(()),
            SinkState::Disk { file } => file.flush(),
        }
    }
}

#[derive(Debug)]
struct QueueWriter {
    sink: SinkState,
    wire: WireState,
}

#[derive(Debug)]
enum QueueSource {
    Ram(Cursor<Arc<[u8]>>),
    Disk(BufReader<File>),
}

impl Read for QueueSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            QueueSource::Ram(c) => c.read(buf),
            QueueSource::Disk(f) => f.read(buf),
        }
    }
}

#[derive(Debug)]
struct CompareCursor {
    src: Option<(QueueSource, WireState)>,
    last: Range,
}

/// External store of per-cycle interval queues.
#[derive(Debug)]
pub struct RangeStore {
    scratch: TempDir,
    propagate_sequence: bool,
    has_user_data: bool,
    per_queue_cap: Option<usize>,
    /// Generation of the queues currently being written (0 or 1).
    out_parity: u8,
    out: HashMap<QueueKey, QueueWriter>,
    /// RAM-resident queues of the input generation.
    in_ram: HashMap<QueueKey, Arc<[u8]>>,
    current_in: Option<(QueueSource, WireState)>,
    compare_in: HashMap<QueueKey, CompareCursor>,
    out_of_order: HashMap<QueueKey, Vec<Range>>,
    written_this_cycle: u64,
}

impl RangeStore {
    /// Create a store with its own scratch directory. `ram_budget` bounds
    /// the total in-memory queue bytes; `None` writes straight to disk.
    pub fn new(
        propagate_sequence: bool,
        has_user_data: bool,
        ram_budget: Option<usize>,
    ) -> Result<Self, RangeError> {
        let scratch = tempfile::Builder::new()
            .prefix("pilebwt-ranges-")
            .tempdir()?;
        let per_queue_cap = ram_budget.map(|b| (b / (ALPHABET_SIZE * ALPHABET_SIZE)).max(4096));
        Ok(Self {
            scratch,
            propagate_sequence,
            has_user_data,
            per_queue_cap,
            out_parity: 0,
            out: HashMap::new(),
            in_ram: HashMap::new(),
            current_in: None,
            compare_in: HashMap::new(),
            out_of_order: HashMap::new(),
            written_this_cycle: 0,
        })
    }

    /// Keep the scratch directory on disk for post-mortem inspection.
    pub fn keep_scratch_for_diagnosis(self) -> PathBuf {
        self.scratch.keep()
    }

    fn queue_path(&self, parity: u8, key: QueueKey) -> PathBuf {
        self.scratch
            .path()
            .join(format!("q{parity}-{}-{}", key.0, key.1))
    }

    /// Number of ranges appended since the last cycle swap.
    pub fn written_this_cycle(&self) -> u64 {
        self.written_this_cycle
    }

    /// Select the input queue for (incoming pile, outgoing pile).
    pub fn set_portion(&mut self, pile: u8, portion: u8) -> Result<(), RangeError> {
        self.current_in = self
            .open_in((pile, portion))?
            .map(|src| (src, WireState::new()));
        Ok(())
    }

    /// Pop the next range of the selected queue in insertion order.
    pub fn get_range(&mut self) -> Result<Option<Range>, RangeError> {
        let (src, wire) = match self.current_in.as_mut() {
            Some(pair) => pair,
            None => return Ok(None),
        };
        let range = wire.read(src, self.has_user_data, self.propagate_sequence)?;
        if range.is_none() {
            self.current_in = None;
        }
        Ok(range)
    }

    /// Append `range` to output queue (pile, portion), unless the subset
    /// filter rules the (pile, portion) pair out at this cycle.
    pub fn add_range(
        &mut self,
        range: &Range,
        pile: u8,
        portion: u8,
        subset: &str,
        cycle: u32,
    ) -> Result<(), RangeError> {
        if !subset_allows(subset, cycle, pile, portion) {
            return Ok(());
        }
        self.write_out((pile, portion), range)
    }

    /// Append a range that will be re-sorted by position before the queue
    /// is sealed. Used for terminator-pile entries whose positions are
    /// sequence ids resolved out of BWT order.
    pub fn add_out_of_order_range(
        &mut self,
        range: Range,
        pile: u8,
        portion: u8,
        subset: &str,
        cycle: u32,
    ) -> Result<(), RangeError> {
        if !subset_allows(subset, cycle, pile, portion) {
            return Ok(());
        }
        self.out_of_order
            .entry((pile, portion))
            .or_default()
            .push(range);
        Ok(())
    }

    /// Whether `range` was already present in the previous cycle's queue
    /// (pile, portion). Queues are position-sorted, so one lagging cursor
    /// per queue suffices.
    pub fn is_range_known(
        &mut self,
        range: &Range,
        pile: u8,
        portion: u8,
        subset: &str,
        cycle: u32,
    ) -> Result<bool, RangeError> {
        if !subset_allows(subset, cycle, pile, portion) {
            // The caller would drop this range anyway; report it as known.
            return Ok(true);
        }
        let key = (pile, portion);
        if !self.compare_in.contains_key(&key) {
            let src = self
                .open_in(key)?
                .map(|s| (s, WireState::new()));
            self.compare_in.insert(
                key,
                CompareCursor {
                    src,
                    last: Range::default(),
                },
            );
        }
        let has_user_data = self.has_user_data;
        let propagate_sequence = self.propagate_sequence;
        let cursor = self.compare_in.get_mut(&key).expect("inserted above");
        let (src, wire) = match cursor.src.as_mut() {
            Some(pair) => pair,
            None => return Ok(false),
        };
        while cursor.last.pos < range.pos {
            match wire.read(src, has_user_data, propagate_sequence)? {
                Some(r) => cursor.last = r,
                None => {
                    cursor.last.pos = LetterNumber::MAX;
                    cursor.last.num = 0;
                    break;
                }
            }
        }
        Ok(cursor.last.pos == range.pos && cursor.last.num == range.num)
    }

    /// Seal the queues written this cycle and make them the next cycle's
    /// inputs. Out-of-order buckets are sorted by position and appended
    /// before sealing; the previous input generation is discarded.
    pub fn swap_cycle(&mut self) -> Result<(), RangeError> {
        // Flush terminator-pile buckets, position-sorted.
        let buckets: Vec<(QueueKey, Vec<Range>)> = {
            let mut pending: Vec<_> = self.out_of_order.drain().collect();
            pending.sort_by_key(|(key, _)| *key);
            pending
        };
        for (key, mut ranges) in buckets {
            ranges.sort_by_key(|r| r.pos);
            for range in &ranges {
                self.write_out(key, range)?;
            }
        }

        // Seal output queues.
        let mut new_in_ram = HashMap::new();
        for (key, writer) in self.out.drain() {
            match writer.sink {
                SinkState::Ram { buf, .. } => {
                    new_in_ram.insert(key, Arc::from(buf.into_boxed_slice()));
                }
                SinkState::Disk { mut file } => file.flush()?,
            }
        }

        // Drop the generation we just finished reading.
        let in_parity = 1 - self.out_parity;
        for i in 0..ALPHABET_SIZE as u8 {
            for j in 0..ALPHABET_SIZE as u8 {
                let _ = std::fs::remove_file(self.queue_path(in_parity, (i, j)));
            }
        }
        self.in_ram = new_in_ram;
        self.current_in = None;
        self.compare_in.clear();
        self.out_parity = in_parity;
        self.written_this_cycle = 0;
        Ok(())
    }

    fn write_out(&mut self, key: QueueKey, range: &Range) -> Result<(), RangeError> {
        if !self.out.contains_key(&key) {
            let path = self.queue_path(self.out_parity, key);
            let sink = match self.per_queue_cap {
                Some(cap) => SinkState::Ram {
                    buf: Vec::new(),
                    cap,
                    path,
                },
                None => SinkState::Disk {
                    file: BufWriter::new(File::create(&path)?),
                },
            };
            self.out.insert(
                key,
                QueueWriter {
                    sink,
                    wire: WireState::new(),
                },
            );
        }
        let writer = self.out.get_mut(&key).expect("inserted above");
        writer.wire.write(
            &mut writer.sink,
            range,
            self.has_user_data,
            self.propagate_sequence,
        )?;
        self.written_this_cycle += 1;
        Ok(())
    }

    fn open_in(&self, key: QueueKey) -> Result<Option<QueueSource>, RangeError> {
        if let Some(bytes) = self.in_ram.get(&key) {
            return Ok(Some(QueueSource::Ram(Cursor::new(Arc::clone(bytes)))));
        }
        let path = self.queue_path(1 - self.out_parity, key);
        match File::open(&path) {
            Ok(f) => Ok(Some(QueueSource::Disk(BufReader::new(f)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RangeError::Io(e)),
        }
    }

    /// Scratch directory path (diagnostics only).
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Suffix filter for distributed execution: at small cycles the subset
/// string pins which (pile, portion) pairs a worker is responsible for.
fn subset_allows(subset: &str, cycle: u32, pile: u8, portion: u8) -> bool {
    let s = subset.as_bytes();
    match s.len() {
        0 => true,
        1 => !(cycle == 1 && s[0] != symbol_of(portion)),
        len => {
            if cycle >= 1 && (cycle as usize) < len {
                let c = cycle as usize;
                s[len - c - 1] == symbol_of(pile) && s[len - c] == symbol_of(portion)
            } else {
                true
            }
        }
    }
}
