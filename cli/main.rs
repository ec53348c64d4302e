#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;
use std::process;

use esmk::config::{PartialScanConfig, ScanJob};
use esmk::pipeline::{ScanError, check_stores, run_scan_job};
use esmk::store::convert::{ConvertOptions, ScoreTransform, convert_to_store};
use esmk::store::manifest::FORMAT_VERSION;

#[derive(Parser)]
#[command(
    name = "esmk",
    about = "Sliding-window ESM_k permutation tests over genome scans",
    long_about = "Computes windowed ESM_k statistics over per-marker association scores and \
                 their empirical p-values against stored permutation replicates."
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG is used when absent
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan permutation stores with sliding windows
    #[command(about = "Run the windowed ESM_k permutation test (outputs: p-value table)")]
    Scan(ScanArgs),
    /// Build a permutation store from PLINK outputs
    #[command(about = "Convert .bim, LD and permutation dumps into a store")]
    Convert(ConvertArgs),
    /// Check that stores can be scanned together
    #[command(about = "Validate one or more stores against each other")]
    Check {
        #[arg(required = true)]
        stores: Vec<PathBuf>,
    },
    /// Show version information
    #[command(about = "Display version and build information")]
    Version,
}

#[derive(Args)]
struct ScanArgs {
    /// Output file; gzip-compressed when it ends in .gz
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Window size in base pairs
    #[arg(short = 'w', long = "winsize")]
    window_size: Option<i64>,

    /// Distance in base pairs between consecutive window starts
    #[arg(short = 'j', long = "jumpsize")]
    jump_size: Option<i64>,

    /// Number of top markers summed per window
    #[arg(short = 'k', long = "top-k")]
    top_k: Option<usize>,

    /// Number of windows read and evaluated together
    #[arg(short = 'n', long = "nwindows")]
    window_set_size: Option<usize>,

    /// r² above which a later marker is pruned
    #[arg(short = 'r', long = "ld-cutoff")]
    ld_cutoff: Option<f64>,

    /// Expected markers per store chunk
    #[arg(short = 'm', long = "chunk-markers")]
    chunk_markers: Option<usize>,

    /// Expected permutations per store chunk
    #[arg(short = 'c', long = "chunk-permutations")]
    chunk_permutations: Option<usize>,

    /// Maximum number of permutations taken across all stores
    #[arg(short = 'p', long = "nperms")]
    max_permutations: Option<usize>,

    /// TOML file supplying any of the options above; flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store directories, scanned as one permutation matrix in the order given
    stores: Vec<PathBuf>,
}

impl ScanArgs {
    fn into_job(self) -> Result<ScanJob, ScanError> {
        let file = match &self.config {
            Some(path) => PartialScanConfig::from_toml_file(path)?,
            None => PartialScanConfig::default(),
        };
        let flags = PartialScanConfig {
            output: self.output,
            stores: Some(self.stores),
            window_size: self.window_size,
            jump_size: self.jump_size,
            top_k: self.top_k,
            window_set_size: self.window_set_size,
            ld_cutoff: self.ld_cutoff,
            chunk_markers: self.chunk_markers,
            chunk_permutations: self.chunk_permutations,
            max_permutations: self.max_permutations,
        };
        Ok(file.merge(flags).resolve()?)
    }
}

#[derive(Args)]
struct ConvertArgs {
    /// PLINK .bim map of the markers
    #[arg(short = 'b', long)]
    bim: PathBuf,

    /// PLINK --r2 listing of pairwise LD
    #[arg(short = 'l', long)]
    ld: Option<PathBuf>,

    /// Permutation dump (plain or gzip); read from stdin when absent
    #[arg(short = 'i', long)]
    perms: Option<PathBuf>,

    /// Store directory to create
    #[arg(short = 'o', long)]
    output: PathBuf,

    #[arg(long, default_value = "50")]
    chunk_markers: usize,

    #[arg(long, default_value = "10000")]
    chunk_permutations: usize,

    /// zlib compression level, 0-9
    #[arg(long, default_value = "6")]
    compression_level: u32,

    /// Store values as given instead of converting 1-df chi-square statistics to -log10(p)
    #[arg(long)]
    no_convert: bool,
}

fn init_logging(level: Option<&str>) {
    match level {
        Some(level) => {
            let filter = level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log level '{level}' provided. Defaulting to Info.");
                log::LevelFilter::Info
            });
            env_logger::Builder::new().filter_level(filter).init();
        }
        None => env_logger::Builder::from_env(Env::default().default_filter_or("info")).init(),
    }
}

fn main() {
    let cli = Cli::parse();
    let Cli { log_level, command } = cli;
    init_logging(log_level.as_deref());

    let result = match command {
        Some(Commands::Scan(args)) => run_scan(args),
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Check { stores }) => run_check(&stores),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err((message, code)) = result {
        eprintln!("Error: {message}");
        process::exit(code);
    }
}

fn scan_failure(e: ScanError) -> (String, i32) {
    let code = e.exit_code();
    (e.to_string(), code)
}

fn run_scan(args: ScanArgs) -> Result<(), (String, i32)> {
    let job = args.into_job().map_err(scan_failure)?;
    log::info!(
        "Worker threads per window set: up to {} ({} CPUs available)",
        job.config.window_set_size,
        num_cpus::get()
    );
    let result = run_scan_job(&job).map_err(scan_failure)?;
    println!(
        "Wrote {} window p-values to {}",
        result.len(),
        job.output.display()
    );
    Ok(())
}

fn run_convert(args: ConvertArgs) -> Result<(), (String, i32)> {
    let options = ConvertOptions {
        chunk_markers: args.chunk_markers,
        chunk_permutations: args.chunk_permutations,
        compression_level: args.compression_level,
        transform: if args.no_convert {
            ScoreTransform::Raw
        } else {
            ScoreTransform::ChiSquareLog10P
        },
    };
    let summary = convert_to_store(
        &args.bim,
        args.ld.as_deref(),
        args.perms.as_deref(),
        &args.output,
        &options,
    )
    .map_err(|e| (e.to_string(), 4))?;
    println!(
        "Store {}: {} markers, {} permutations, {} LD pairs",
        args.output.display(),
        summary.markers,
        summary.permutations,
        summary.ld_pairs
    );
    Ok(())
}

fn run_check(stores: &[PathBuf]) -> Result<(), (String, i32)> {
    let permutations = check_stores(stores).map_err(scan_failure)?;
    println!(
        "{} store(s) are consistent; {permutations} permutations available",
        stores.len()
    );
    Ok(())
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    println!("esmk {version}");
    match option_env!("ESMK_RELEASE_TAG") {
        Some(tag) => println!("Release: {tag}"),
        None => println!("Release: development build"),
    }
    println!("Store format: version {FORMAT_VERSION}");
}
