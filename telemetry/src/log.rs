//! Structured event logging.
//!
//! Every scheduler event is mirrored via `tracing` on a dedicated target so
//! it can be filtered and formatted (e.g. JSON) separately from the
//! scheduler's own diagnostics.

use tracing::{debug, info, warn};
use warden_shared::SchedulerEvent;

pub const EVENT_TARGET: &str = "warden::events";

/// Emit one event as a structured record
pub fn log_event(event: &SchedulerEvent) {
    let kind = event.name();
    match event {
        SchedulerEvent::KernelRegistered { kernel, factor, period } => info!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            factor = %factor,
            period = %period,
        ),
        SchedulerEvent::StateChanged { kernel, from, to } => debug!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            from = %from,
            to = %to,
        ),
        SchedulerEvent::CommandIssued { kernel, command } => debug!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            command = ?command,
        ),
        SchedulerEvent::Dispatched { kernel, tick } => debug!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            tick = *tick,
        ),
        SchedulerEvent::Deferred {
            kernel,
            tick,
            reason,
            consecutive,
        } => debug!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            tick = *tick,
            reason = reason.label(),
            consecutive = *consecutive,
        ),
        SchedulerEvent::Preempted { victim, by } => info!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %victim,
            by = %by,
        ),
        SchedulerEvent::DeadlineMissed { kernel, swc, tick } => warn!(
            target: EVENT_TARGET,
            event = kind,
            kernel = ?kernel,
            swc = ?swc,
            tick = *tick,
        ),
        SchedulerEvent::TimingOverrun {
            tick,
            elapsed_us,
            budget_us,
            skipped_ticks,
        } => warn!(
            target: EVENT_TARGET,
            event = kind,
            tick = *tick,
            elapsed_us = *elapsed_us,
            budget_us = *budget_us,
            skipped_ticks = *skipped_ticks,
        ),
        SchedulerEvent::KernelHung { kernel, liveness, polls } => warn!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            liveness = *liveness,
            polls = *polls,
        ),
        SchedulerEvent::WorkloadFault { kernel, reason } => warn!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            reason = %reason,
        ),
        SchedulerEvent::CapacityReserved { kernel, factor, total }
        | SchedulerEvent::CapacityReleased { kernel, factor, total } => debug!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
            factor = %factor,
            total = %total,
        ),
        SchedulerEvent::KernelDeregistered { kernel } => info!(
            target: EVENT_TARGET,
            event = kind,
            kernel = %kernel,
        ),
    }
}
