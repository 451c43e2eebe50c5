//! Output formatting utilities for CLI commands

use colored::Colorize;
use std::collections::BTreeMap;
use warden_shared::{ComponentReport, KernelReport, KernelState};

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a section header
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
}

fn state_label(state: KernelState) -> colored::ColoredString {
    let label = state.label();
    match state {
        KernelState::Active => label.green(),
        KernelState::TerminatedOk => label.cyan(),
        KernelState::TerminatedError => label.red(),
        _ => label.normal(),
    }
}

pub fn kernel_table(kernels: &[KernelReport]) {
    header("Kernels");
    println!(
        "  {:<10} {:<18} {:>6} {:>9} {:>9} {:>10} {:>9} {:>7}",
        "id", "state", "period", "declared", "measured", "dispatches", "deferrals", "missed"
    );
    for k in kernels {
        println!(
            "  {:<10} {:<18} {:>6} {:>9} {:>9} {:>10} {:>9} {:>7}",
            k.id.to_string(),
            state_label(k.state),
            k.period.to_string(),
            k.declared.to_string(),
            k.measured.to_string(),
            k.dispatches,
            k.deferrals,
            k.missed_deadlines
        );
        if let Some(summary) = &k.summary {
            println!("  {:<10} {}", "", summary.dimmed());
        }
        if let Some(fault) = &k.fault {
            println!("  {:<10} {}", "", fault.red());
        }
    }
}

pub fn component_table(components: &[ComponentReport]) {
    header("Software components");
    if components.is_empty() {
        println!("  (none left; kernel drivers retire with their kernels)");
        return;
    }
    println!(
        "  {:<8} {:<14} {:>6} {:>6} {:>7} {:>8} {:>7}",
        "id", "name", "period", "runs", "retries", "failures", "missed"
    );
    for c in components {
        println!(
            "  {:<8} {:<14} {:>6} {:>6} {:>7} {:>8} {:>7}",
            c.id.to_string(),
            c.name,
            c.period.to_string(),
            c.runs,
            c.retries,
            c.failures,
            c.missed_deadlines
        );
    }
}

pub fn event_counts(counts: &BTreeMap<&'static str, u64>, dropped: u64) {
    header("Events");
    for (kind, count) in counts {
        println!("  {:<22} {:>8}", kind, count);
    }
    if dropped > 0 {
        warning(&format!("{} older events were dropped from the log", dropped));
    }
}
