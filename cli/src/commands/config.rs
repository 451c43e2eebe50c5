//! Config command implementation

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use warden_scheduler::SchedulerConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file to layer over the defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    let config = SchedulerConfig::load(args.config.as_deref())?;
    let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", text);
    Ok(())
}
