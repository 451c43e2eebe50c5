//! Prometheus metrics for a running Warden system

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use warden_shared::SchedulerEvent;

// ── Dispatch metrics ─────────────────────────────────────────────────────────

pub static DISPATCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "warden_dispatch_total",
        "Dispatch decisions by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static PREEMPTIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("warden_preemptions_total", "Kernels suspended to make room").unwrap()
});

pub static RESERVED_CAPACITY: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "warden_reserved_capacity_ratio",
        "Sum of reserved resource factors"
    )
    .unwrap()
});

pub static KERNELS_REGISTERED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("warden_kernels_registered", "Kernel descriptors currently held").unwrap()
});

// ── Fault metrics ────────────────────────────────────────────────────────────

pub static DEADLINE_MISSES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "warden_deadline_misses_total",
        "Missed deadlines, attributed to a kernel or a software component",
        &["source"]
    )
    .unwrap()
});

pub static TIMING_OVERRUNS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "warden_timing_overruns_total",
        "Ticks that exceeded the system operation time"
    )
    .unwrap()
});

pub static SKIPPED_TICKS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("warden_skipped_ticks_total", "Ticks the loop never processed").unwrap()
});

pub static KERNELS_HUNG_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("warden_kernels_hung_total", "Kernels retired by the watchdog").unwrap()
});

pub static WORKLOAD_FAULTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "warden_workload_faults_total",
        "Kernels that terminated with an error"
    )
    .unwrap()
});

// ── Tick loop ────────────────────────────────────────────────────────────────

pub static TICK_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "warden_tick_duration_seconds",
        "Time spent processing one tick",
        vec![0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01]
    )
    .unwrap()
});

// ── Event log ────────────────────────────────────────────────────────────────

pub static EVENT_LOG_SIZE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("warden_event_log_events", "Events currently held in the event log").unwrap()
});

pub static EVENT_LOG_DROPS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "warden_event_log_drops_total",
        "Events dropped from the event log due to capacity"
    )
    .unwrap()
});

/// Fold one event into the metrics
pub fn observe(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::Dispatched { .. } => DISPATCH_TOTAL.with_label_values(&["resumed"]).inc(),
        SchedulerEvent::Deferred { reason, .. } => {
            DISPATCH_TOTAL.with_label_values(&[reason.label()]).inc()
        }
        SchedulerEvent::Preempted { .. } => PREEMPTIONS_TOTAL.inc(),
        SchedulerEvent::CapacityReserved { total, .. }
        | SchedulerEvent::CapacityReleased { total, .. } => RESERVED_CAPACITY.set(total.as_f64()),
        SchedulerEvent::KernelRegistered { .. } => KERNELS_REGISTERED.inc(),
        SchedulerEvent::KernelDeregistered { .. } => KERNELS_REGISTERED.dec(),
        SchedulerEvent::DeadlineMissed { swc, .. } => {
            let source = if swc.is_some() { "component" } else { "kernel" };
            DEADLINE_MISSES_TOTAL.with_label_values(&[source]).inc();
        }
        SchedulerEvent::TimingOverrun { skipped_ticks, .. } => {
            TIMING_OVERRUNS_TOTAL.inc();
            SKIPPED_TICKS_TOTAL.inc_by(*skipped_ticks as f64);
        }
        SchedulerEvent::KernelHung { .. } => KERNELS_HUNG_TOTAL.inc(),
        SchedulerEvent::WorkloadFault { .. } => WORKLOAD_FAULTS_TOTAL.inc(),
        SchedulerEvent::StateChanged { .. } | SchedulerEvent::CommandIssued { .. } => {}
    }
}

/// Render all registered metrics to Prometheus text format
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics are not valid UTF-8")
}
