//! 程序运行函数.

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use lymph_berry::config::AnalysisConfig;
use lymph_berry::dataset::{self, DiscoveryOptions};
use lymph_berry::pipeline::{run_batch, BatchOptions, OutputOptions};
use std::path::PathBuf;
use utils::loader;

use crate::result::StagingResult;
use crate::Args;

/// 读取配置文件 (若有), 再以命令行参数覆盖, 最后校验.
pub fn load_config(args: &Args) -> Result<AnalysisConfig> {
    let mut config = match args.config {
        Some(ref p) => AnalysisConfig::load(p)?,
        None => AnalysisConfig::default(),
    };
    if let Some(n) = args.min_size {
        config.min_size = n;
    }
    if let Some(q) = args.percentile {
        config.percentile = q;
    }
    if let Some(n) = args.top_n {
        config.top_n = n;
    }
    config.validate()?;
    Ok(config)
}

fn input_dir(args: &Args) -> Result<PathBuf> {
    let input = match args.input {
        Some(ref p) => p.clone(),
        None => loader::data_dir_from_env_or_home()
            .context("no --input given and the home directory is unknown")?,
    };
    ensure!(input.is_dir(), "input {} is not a directory", input.display());
    Ok(input)
}

/// 实际运行.
pub fn run(args: &Args) -> Result<StagingResult> {
    let config = load_config(args).context("invalid configuration")?;
    let input = input_dir(args)?;
    let out_dir = args
        .output
        .clone()
        .unwrap_or_else(|| input.join("lesion_stats"));

    let discovery = DiscoveryOptions {
        pattern: args.pattern.clone(),
        atlas_pattern: args.atlas_pattern.clone(),
        onedir: args.onedir,
    };
    let subjects = dataset::discover(&input, &discovery);
    if subjects.is_empty() {
        log::warn!(
            "no file matching `{}` under {}",
            discovery.pattern,
            input.display()
        );
    }

    let workers = utils::workers_or_cpus(args.workers);
    log::info!(
        "running {} subject(s) on {workers} worker(s), output to {}",
        subjects.len(),
        out_dir.display()
    );
    let options = BatchOptions {
        output: OutputOptions {
            out_dir: out_dir.clone(),
            save_instances: args.save_instances,
        },
        workers,
    };
    let batch = run_batch(&subjects, &config, &options, Utc::now())?;
    let summary = batch
        .save_summary(&out_dir)
        .context("cannot write batch summary")?;
    log::info!("batch summary written to {}", summary.display());

    Ok(StagingResult::new(config, batch))
}
