//! JSON export of a run
//!
//! The document carries the retained event log together with final kernel
//! and component reports, so a run can be inspected offline.

use crate::buffer::{EventLog, StoredEvent};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use warden_shared::utils::time::system_time_secs;
use warden_shared::{ComponentReport, KernelReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub exported_at: u64,
    /// Events pushed out of the log before export
    pub dropped_events: u64,
    pub events: Vec<StoredEvent>,
    pub kernels: Vec<KernelReport>,
    pub components: Vec<ComponentReport>,
}

impl Export {
    pub fn new(
        log: &EventLog,
        kernels: Vec<KernelReport>,
        components: Vec<ComponentReport>,
    ) -> Self {
        Self {
            exported_at: system_time_secs(),
            dropped_events: log.dropped(),
            events: log.snapshot(),
            kernels,
            components,
        }
    }
}

/// Write `export` to `path` as pretty-printed JSON
pub fn write_json(path: &Path, export: &Export) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, export).context("Failed to serialize export")?;
    writer.flush().context("Failed to flush export file")?;
    tracing::info!(
        path = %path.display(),
        events = export.events.len(),
        kernels = export.kernels.len(),
        "Exported run"
    );
    Ok(())
}
