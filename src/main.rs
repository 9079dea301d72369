use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod acquisition;
mod archive;
mod clock_sync;
mod config;
mod error;
mod index;
mod radio;
mod recorder;
mod scheduler;
mod simulated;
mod sink;
mod stats;
mod time;
#[cfg(test)]
mod test_support;
#[cfg(feature = "uhd")]
mod uhd;

use acquisition::DiscontinuityPolicy;
use config::{AppConfig, ClockReference, Driver, TimeReference};
use error::RecorderError;
use stats::AcquisitionStats;

#[derive(Parser, Debug)]
#[command(name = "hf_rx_recorder")]
#[command(about = "Records HF radio channels into a continuously indexed archive")]
struct Cli {
    /// TOML configuration file (built-in defaults when absent)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    driver: Option<Driver>,

    /// Radio address and configuration arguments
    #[arg(long)]
    device_args: Option<String>,

    /// Integral sample rate in Hz
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Tuning frequency in Hz for every channel
    #[arg(long)]
    center_freq: Option<f64>,

    /// internal, external, mimo or gpsdo
    #[arg(long)]
    clock_reference: Option<ClockReference>,

    /// Blank for host time, gpsdo or external
    #[arg(long)]
    time_reference: Option<TimeReference>,

    #[arg(long)]
    subdevice_spec: Option<String>,

    /// Channels to record, e.g. 0, 1 or 0,1
    #[arg(long)]
    channel_list: Option<String>,

    /// Root directory for the per-channel archives
    #[arg(long)]
    output_directory: Option<PathBuf>,

    #[arg(long, value_enum)]
    discontinuity: Option<DiscontinuityPolicy>,

    /// Check an existing archive (a channel directory or the output root) and exit
    #[arg(long, value_name = "DIR")]
    verify: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, cfg: &mut AppConfig) {
        if let Some(driver) = self.driver {
            cfg.radio.driver = driver;
        }
        if let Some(args) = &self.device_args {
            cfg.radio.device_args = args.clone();
        }
        if let Some(rate) = self.sample_rate {
            cfg.radio.sample_rate = rate;
        }
        if let Some(freq) = self.center_freq {
            cfg.radio.center_freq = freq;
        }
        if let Some(reference) = self.clock_reference {
            cfg.radio.clock_reference = reference;
        }
        if let Some(reference) = self.time_reference {
            cfg.radio.time_reference = reference;
        }
        if let Some(spec) = &self.subdevice_spec {
            cfg.radio.subdevice_spec = spec.clone();
        }
        if let Some(list) = &self.channel_list {
            cfg.radio.channel_list = list.clone();
        }
        if let Some(dir) = &self.output_directory {
            cfg.archive.output_directory = dir.clone();
        }
        if let Some(policy) = self.discontinuity {
            cfg.acquisition.discontinuity = policy;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    if let Some(root) = &cli.verify {
        return verify_archive(root);
    }

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::load_default().context("loading built-in configuration")?,
    };
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        "Starting hf_rx_recorder: {:?} driver, {} sps at {} Hz, channels '{}', output {}",
        config.radio.driver,
        config.radio.device_rate_hz()?,
        config.radio.center_freq,
        config.radio.channel_list,
        config.archive.output_directory.display()
    );

    let stats = Arc::new(AcquisitionStats::new());
    let stop = Arc::new(AtomicBool::new(false));
    let reporter = tokio::spawn(stats::report_loop(stats.clone(), config.acquisition.stats_interval()));
    let mut recorder_handle = recorder::start_recorder(config, stats.clone(), stop.clone());

    let outcome = tokio::select! {
        res = &mut recorder_handle => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping recorder");
            stop.store(true, Ordering::SeqCst);
            recorder_handle.await
        }
    };
    reporter.abort();

    match outcome.context("recorder task failed")? {
        Ok(summary) => {
            info!(
                "recording {} from {} (index {}) stopped cleanly: {} samples per channel, {} overflows",
                summary.uuid,
                summary.start.instant,
                summary.start.global_start_index,
                summary.stats.samples,
                summary.stats.overflows
            );
            Ok(())
        }
        Err(RecorderError::Cancelled) => {
            info!("stopped before streaming started");
            Ok(())
        }
        Err(e) => {
            error!("recording failed: {}", e);
            Err(e.into())
        }
    }
}

/// Checks every channel archive under `root` and logs what each one holds.
fn verify_archive(root: &Path) -> Result<()> {
    let dirs = archive::channel_dirs(root).with_context(|| format!("reading {}", root.display()))?;
    if dirs.is_empty() {
        anyhow::bail!("no channel archives under {}", root.display());
    }
    for dir in &dirs {
        let report = archive::verify_channel(dir).with_context(|| format!("verifying {}", dir.display()))?;
        info!(
            "{}: run {}, {} samples in {} blocks across {} files, {} skipped, indices {}..{}",
            dir.display(),
            report.uuid,
            report.samples,
            report.blocks,
            report.files,
            report.gap_samples,
            report.global_start_index,
            report.next_index
        );
        if report.checkpoint_index != Some(report.next_index) {
            warn!(
                "{}: checkpoint at {:?} trails the stored data",
                dir.display(),
                report.checkpoint_index
            );
        }
    }
    Ok(())
}
