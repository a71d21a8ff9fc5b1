//! 批量淋巴瘤病灶分析与分期.
//!
//! 用法:
//!
//! ```text
//! stager --input data/ --output out/ --config stage_table.json --workers 4
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod result;
mod runner;

/// Lymphoma PET/MR lesion analysis and staging.
#[derive(Parser, Debug)]
#[command(name = "stager", version)]
pub struct Args {
    /// Input directory (default: $LYMPH_DATA_DIR or $HOME/dataset/lymphoma)
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Output directory for CSV/JSON reports (default: <input>/lesion_stats)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Substring that identifies lesion mask files
    #[arg(long, default_value = lymph_berry::dataset::DEFAULT_MASK_PATTERN)]
    pub pattern: String,

    /// Substring that identifies anatomical atlas files
    #[arg(long, default_value = lymph_berry::dataset::DEFAULT_ATLAS_PATTERN)]
    pub atlas_pattern: String,

    /// Only search the input directory itself, not subdirectories
    #[arg(long)]
    pub onedir: bool,

    /// Analysis configuration (JSON), including the stage table
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Minimum lesion size in voxels (overrides the configuration)
    #[arg(long)]
    pub min_size: Option<usize>,

    /// Intensity percentile fraction in [0, 1] (overrides the configuration)
    #[arg(long)]
    pub percentile: Option<f64>,

    /// Number of largest lesions to list (overrides the configuration)
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Number of subjects processed in parallel (0 = all available CPUs)
    #[arg(long, short, default_value_t = 0)]
    pub workers: usize,

    /// Also write the lesion instance map `<subject>_inst.nii.gz`
    #[arg(long)]
    pub save_instances: bool,

    /// Only log warnings and errors, skip the console summary
    #[arg(long, short)]
    pub quiet: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let level = if args.quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()?;

    let result = runner::run(&args)?;
    if !args.quiet {
        result.analyze()?;
    }
    Ok(if result.failed() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
