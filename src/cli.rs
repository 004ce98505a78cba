use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ltfs-restore")]
#[command(about = "Rebuild an S3-style versioned object store from LTFS tape cartridges")]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Use the directory-backed tape library simulator
    #[arg(long)]
    pub simulate: bool,

    /// Verify that the config file matches the hardware and print the
    /// drive and cartridge tables
    #[arg(long)]
    pub verify: bool,

    /// Phase 1: find and copy version files off every tape
    #[arg(long = "version")]
    pub version: bool,

    /// Phase 2: build the database from the copied version files
    #[arg(long)]
    pub database: bool,

    /// Phase 3: read the packs and emit completed versions
    #[arg(long)]
    pub read: bool,

    /// Start from a clean database, staging cache and log
    #[arg(long)]
    pub clean: bool,

    /// Region or endpoint for the target object store
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// JSON file mapping changer drives to devices and mount points
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Run log file
    #[arg(long = "log", default_value = "ltfs-restore.log")]
    pub log_file: PathBuf,

    /// Target buckets are versioned (set false for non-versioned buckets)
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub versioning: bool,

    /// Write objects to S3 (set false to restore into a local directory)
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub s3: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Create this many simulated tapes and exit
    #[arg(long, default_value_t = 0)]
    pub simtapes: usize,

    /// Number of simulated tape drives
    #[arg(long, default_value_t = 1)]
    pub simdrives: usize,

    /// Simulation bucket; may be repeated for multiple buckets
    #[arg(long = "simbucket")]
    pub simbuckets: Vec<String>,

    /// Blocks per simulated object
    #[arg(long, default_value_t = 1)]
    pub simblocks: usize,

    /// Also seed the generated objects into source S3 buckets
    #[arg(long)]
    pub sims3: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
