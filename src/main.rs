use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zmax_merge::tools::ProcessRunner;
use zmax_merge::{run_batch, Config, DropProfile};

/// Command-line arguments for zmax-merge
#[derive(Parser, Debug)]
#[command(name = "zmax-merge")]
#[command(about = "Merge per-channel zmax EDF recordings into one EDF+ file per session")]
#[command(version)]
struct Args {
    /// Folder searched recursively for sessions (folders holding `EEG L.edf`)
    input: PathBuf,

    /// TOML configuration file
    #[arg(short, long, env = "ZMAX_MERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Channels to leave out of the merge
    #[arg(short, long, value_enum)]
    profile: Option<DropProfile>,

    /// Resample every channel to this rate (Hz) instead of the first channel's
    #[arg(short, long)]
    resample_rate: Option<f64>,

    /// Directory for merged files (default: next to each session)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Ledger CSV path (default: timestamped file in the input folder)
    #[arg(short, long)]
    ledger: Option<PathBuf>,

    /// Skip duplicate detection
    #[arg(long)]
    no_dedup: bool,

    /// Log per-channel details
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(profile) = self.profile {
            config.drop_profile = profile;
        }
        if self.resample_rate.is_some() {
            config.resample_rate = self.resample_rate;
        }
        if self.output_dir.is_some() {
            config.output_dir = self.output_dir.clone();
        }
        if self.ledger.is_some() {
            config.ledger_path = self.ledger.clone();
        }
        if self.no_dedup {
            config.dedup.enabled = false;
        }

        config.validate().context("Invalid options")?;
        Ok(config)
    }
}

/// Log filter from `RUST_LOG`; `--verbose` raises this crate to debug on top of it.
fn log_filter(verbose: bool, env: Option<&str>) -> EnvFilter {
    let filter = env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("zmax_merge=info"));
    if !verbose {
        return filter;
    }
    match "zmax_merge=debug".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::registry()
        .with(log_filter(args.verbose, env.as_deref()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.to_config()?;
    info!("Input folder: {}", args.input.display());

    let runner = ProcessRunner::from_config(&config.tools);
    let report = run_batch(&args.input, &config, &runner)
        .with_context(|| format!("Batch over {} failed", args.input.display()))?;

    println!(
        "{} of {} sessions converted, {} duplicate pairs",
        report.converted(),
        report.ledger.len(),
        report.duplicate_pairs
    );
    println!("Ledger: {}", report.ledger_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_overrides_env_level() {
        let filter = |verbose, env| log_filter(verbose, env).to_string().to_lowercase();

        assert!(filter(false, Some("zmax_merge=warn")).contains("zmax_merge=warn"));
        assert!(filter(true, Some("zmax_merge=warn")).contains("zmax_merge=debug"));
        assert!(filter(false, None).contains("zmax_merge=info"));
        assert!(filter(true, None).contains("zmax_merge=debug"));
    }
}
