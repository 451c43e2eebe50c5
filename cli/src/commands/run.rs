//! Run command implementation

use super::scenario::{self, Scenario};
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_scheduler::{SchedulerConfig, Warden};
use warden_telemetry::metrics::encode_metrics;
use warden_telemetry::{write_json, Export, Recorder};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file (TOML, YAML or JSON); WARDEN_* variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// How long to run (e.g., "500ms", "5s")
    #[arg(short, long, default_value = "2s")]
    pub duration: String,

    /// Workload mix to run
    #[arg(short, long, value_enum, default_value = "mixed")]
    pub scenario: Scenario,

    /// Write the event log and final reports as JSON
    #[arg(long)]
    pub events_json: Option<PathBuf>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub metrics: bool,

    /// Size of the in-memory event log
    #[arg(long, default_value = "10000")]
    pub log_capacity: usize,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let duration = warden_shared::utils::parse_duration(&args.duration)
        .context("Failed to parse duration")?;
    let config = SchedulerConfig::load(args.config.as_deref())?;

    let recorder = Arc::new(Recorder::new(args.log_capacity));
    let mut warden = Warden::init(config, recorder.clone())?;
    let installed = scenario::install(&warden, args.scenario)?;

    output::info(&format!(
        "Running {:?} scenario for {:?} ({} kernels)",
        args.scenario,
        duration,
        warden.gpu().kernel_ids().len()
    ));

    warden.start()?;
    let progress = ProgressBar::new(duration.as_millis() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {msg}")
            .context("Invalid progress template")?,
    );
    let started = Instant::now();
    while started.elapsed() < duration {
        tokio::time::sleep(Duration::from_millis(50).min(duration)).await;
        progress.set_position(started.elapsed().as_millis() as u64);
        progress.set_message(format!(
            "tick {} reserved {}",
            warden.tick(),
            warden.gpu().reserved()
        ));
    }
    progress.finish_and_clear();

    warden.stop().await?;
    installed.release();

    let kernels = warden.kernel_reports();
    let components = warden.component_reports();
    output::kernel_table(&kernels);
    output::component_table(&components);
    output::event_counts(&recorder.log().counts(), recorder.log().dropped());
    output::info(&format!(
        "{} ticks, housekeeping ran {} times",
        warden.tick(),
        installed.host_runs()
    ));

    let faults = recorder.log().faults().len();
    if faults == 0 {
        output::success("No deadline misses, overruns or faults");
    } else {
        output::warning(&format!("{} fault events recorded", faults));
    }

    if let Some(path) = &args.events_json {
        write_json(path, &Export::new(recorder.log(), kernels, components))?;
        output::success(&format!("Wrote {}", path.display()));
    }

    if args.metrics {
        output::header("Metrics");
        print!("{}", encode_metrics()?);
    }

    warden.destroy().await?;
    Ok(())
}
