use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pilebwt::builder::{BuildConfig, BwtBuilder};
use pilebwt::codec::{build_index_for, SegmentFormat, DEFAULT_CHUNK_RUNS};
use pilebwt::compare::{run_compare, CompareConfig, CompareMode};
use pilebwt::cycle::CycleFileDir;
use pilebwt::extend::{run_extend, ExtendConfig};
use pilebwt::invert::invert_to_writer;
use pilebwt::transpose::transpose_reads;
use pilebwt::wholebwt::write_whole_bwt;
use pilebwt::ALPHABET_SIZE;

#[derive(Parser, Debug)]
#[command(name = "pilebwt", about = "External-memory BWT engine for large read collections")]
struct Cli {
    /// Verbosity, 0 (errors only) to 4 (trace).
    #[arg(long, global = true, default_value_t = 1)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build per-pile BWT segments from a read collection.
    Build {
        /// Cycle-file directory, FASTA file, or one-read-per-line file.
        input: PathBuf,
        /// Output prefix; pile i lands in <prefix>-B0<i>.
        #[arg(long)]
        output: PathBuf,
        /// Segment encoder: ascii, rle-v1 or rle-v3.
        #[arg(long, default_value = "rle-v3")]
        encoder: String,
        /// Record the dollar permutation (<prefix>-end-pos).
        #[arg(long)]
        generate_end_pos: bool,
        /// Maintain per-pile generalized-suffix-array sidecars.
        #[arg(long)]
        generate_sa: bool,
        /// Also concatenate the piles into one whole-BWT file.
        #[arg(long)]
        concatenate: Option<PathBuf>,
        /// Keep transposed cycle files here instead of a scratch directory.
        #[arg(long)]
        cycle_dir: Option<PathBuf>,
    },
    /// Compare two pile sets with backward search.
    Compare {
        /// Pile-set prefix of set A (reads).
        set_a: PathBuf,
        /// Pile-set prefix of set B (reference/database/second sample).
        set_b: PathBuf,
        /// Policy: reference, tumour-normal, splice or metagenomics.
        #[arg(long, default_value = "reference")]
        mode: String,
        /// Longest word to chase.
        #[arg(long, default_value_t = 100)]
        max_cycle: u32,
        /// Minimum read support for set-exclusive calls.
        #[arg(long, default_value_t = 2)]
        min_occ: u64,
        /// Shortest word the metagenomics classifier reports.
        #[arg(long, default_value_t = 10)]
        min_word_length: u32,
        /// Suffix filter for distributed execution.
        #[arg(long, default_value = "")]
        subset: String,
        /// RAM budget in bytes for in-memory interval queues.
        #[arg(long)]
        memory_limit: Option<usize>,
        /// Carry matched words through the traversal.
        #[arg(long)]
        propagate_sequence: bool,
        /// Disable the already-processed-interval skip.
        #[arg(long)]
        no_comparison_skip: bool,
        /// Consult .idx sidecars where present.
        #[arg(long)]
        use_index: bool,
        /// Taxonomy table (metagenomics only).
        #[arg(long)]
        taxonomy: Option<PathBuf>,
        /// Report file (stdout when omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Resolve k-mer intervals to the sequences containing them.
    Extend {
        /// Intervals file: <kmer> <position> <count> per line.
        intervals: PathBuf,
        /// Pile-set prefix.
        bwt_prefix: PathBuf,
        /// Write "<seq> # <kmer>" lines here.
        #[arg(long)]
        sequence_numbers: Option<PathBuf>,
        /// Write per-record dollar ranks here.
        #[arg(long)]
        dollar_positions: Option<PathBuf>,
        /// Reconstruct and print completed reads.
        #[arg(long)]
        propagate_sequence: bool,
        /// Consult .idx sidecars where present.
        #[arg(long)]
        use_index: bool,
    },
    /// Recover the original sequences from a pile set.
    Invert {
        /// Pile-set prefix (needs the end-pos file).
        bwt_prefix: PathBuf,
        /// Output file (stdout when omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Build .idx sidecars for the run-length piles of a prefix.
    Index {
        /// Pile-set prefix.
        bwt_prefix: PathBuf,
        /// Runs per index sample.
        #[arg(long, default_value_t = DEFAULT_CHUNK_RUNS)]
        chunk_runs: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Build {
            input,
            output,
            encoder,
            generate_end_pos,
            generate_sa,
            concatenate,
            cycle_dir,
        } => run_build(
            input,
            output,
            &encoder,
            generate_end_pos,
            generate_sa,
            concatenate,
            cycle_dir,
        ),
        Commands::Compare {
            set_a,
            set_b,
            mode,
            max_cycle,
            min_occ,
            min_word_length,
            subset,
            memory_limit,
            propagate_sequence,
            no_comparison_skip,
            use_index,
            taxonomy,
            output,
        } => {
            let mode = CompareMode::from_name(&mode)
                .with_context(|| format!("unknown compare mode '{mode}'"))?;
            let summary = run_compare(&CompareConfig {
                set_a,
                set_b,
                mode,
                max_cycle,
                min_occ,
                min_word_length,
                subset,
                memory_limit,
                propagate_sequence,
                no_comparison_skip,
                use_index,
                taxonomy,
                output,
            })
            .context("comparison failed")?;
            tracing::info!(
                "compared {} intervals over {} cycles ({} singletons)",
                summary.ranges,
                summary.cycles,
                summary.singletons
            );
            Ok(())
        }
        Commands::Extend {
            intervals,
            bwt_prefix,
            sequence_numbers,
            dollar_positions,
            propagate_sequence,
            use_index,
        } => {
            run_extend(&ExtendConfig {
                bwt_prefix,
                intervals,
                sequence_numbers_output: sequence_numbers,
                dollar_positions_output: dollar_positions,
                propagate_sequence,
                use_index,
            })
            .context("extension failed")?;
            Ok(())
        }
        Commands::Invert { bwt_prefix, output } => {
            let count = match output {
                Some(path) => {
                    let mut file = std::io::BufWriter::new(
                        std::fs::File::create(&path)
                            .with_context(|| format!("cannot create {}", path.display()))?,
                    );
                    invert_to_writer(&bwt_prefix, &mut file)?
                }
                None => invert_to_writer(&bwt_prefix, &mut std::io::stdout().lock())?,
            };
            tracing::info!("recovered {count} sequences");
            Ok(())
        }
        Commands::Index {
            bwt_prefix,
            chunk_runs,
        } => {
            for pile in 0..ALPHABET_SIZE as u8 {
                let segment = pilebwt::builder::pile_path(&bwt_prefix, pile);
                if !segment.exists() {
                    continue;
                }
                match build_index_for(&segment, chunk_runs) {
                    Ok(sidecar) => tracing::info!("indexed {}", sidecar.display()),
                    Err(pilebwt::codec::CodecError::Unsupported(_)) => {
                        tracing::debug!("skipping ASCII pile {}", segment.display())
                    }
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("indexing {}", segment.display()))
                    }
                }
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_build(
    input: PathBuf,
    output: PathBuf,
    encoder: &str,
    generate_end_pos: bool,
    generate_sa: bool,
    concatenate: Option<PathBuf>,
    cycle_dir: Option<PathBuf>,
) -> Result<()> {
    let format = SegmentFormat::from_name(encoder)
        .with_context(|| format!("unknown encoder '{encoder}'"))?;

    // Reads arrive either pre-transposed (a cycle-file directory) or as
    // FASTA / line-per-read, which we transpose into a scratch directory.
    let mut scratch = None;
    let cycles_path = if input.is_dir() {
        input
    } else {
        let dir = match &cycle_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create {}", dir.display()))?;
                dir.clone()
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("pilebwt-cycles-")
                    .tempdir()
                    .context("cannot create a cycle-file scratch directory")?;
                let path = tmp.path().to_path_buf();
                scratch = Some(tmp);
                path
            }
        };
        transpose_reads(&input, &dir)
            .with_context(|| format!("transposing {}", input.display()))?;
        dir
    };

    let mut source =
        CycleFileDir::open(&cycles_path).context("scanning the cycle-file directory")?;

    let outputs = BwtBuilder::new(BuildConfig {
        prefix: output.clone(),
        format,
        generate_end_pos,
        generate_sa,
    })
    .run(&mut source)
    .context("build failed")?;
    tracing::info!(
        "built {} sequences of length {} at {}",
        outputs.sequence_count,
        outputs.sequence_length,
        output.display()
    );

    if let Some(whole) = concatenate {
        write_whole_bwt(&output, &whole, format, Some(DEFAULT_CHUNK_RUNS))
            .context("whole-BWT concatenation failed")?;
    }
    drop(scratch);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pilebwt={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
