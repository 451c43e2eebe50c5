//! Check command implementation

use crate::output;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use warden_scheduler::SchedulerConfig;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file to validate
    pub config: PathBuf,
}

pub fn run(args: CheckArgs) -> Result<()> {
    match SchedulerConfig::load(Some(&args.config)) {
        Ok(config) => {
            output::success(&format!("{} is valid", args.config.display()));
            output::info(&format!(
                "tick {}us, budget {}us, {} workers, {} period classes",
                config.tick_resolution_us,
                config.system_operation_time_us,
                config.worker_threads,
                config.period_classes.len()
            ));
            Ok(())
        }
        Err(e) => {
            output::error(&format!("{}: {:#}", args.config.display(), e));
            Err(e)
        }
    }
}
