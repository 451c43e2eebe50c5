//! Bookkeeping of the periodic scheduler
//!
//! Every occurrence of a component is accounted for exactly once: it is
//! either run (possibly after retries) or reported missed. An occurrence
//! is missed when the next one becomes due while it is still waiting, or
//! when its tick was skipped altogether.

use super::bucket::PeriodBucket;
use super::component::{Job, Miss, SoftwareComponent};
use super::task::{SwcTask, TaskOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use warden_shared::{ComponentReport, KernelId, PeriodClass, Result, SwcId, WardenError};

/// Result of planning one tick
#[derive(Debug, Default)]
pub struct TickPlan {
    pub jobs: Vec<Job>,
    pub missed: Vec<Miss>,
}

#[derive(Debug)]
pub struct PeriodicState {
    /// One bucket per enabled period class, shortest period first
    buckets: Vec<PeriodBucket>,
    components: HashMap<SwcId, SoftwareComponent>,
    /// Kernels with a job on the worker pool
    busy_kernels: HashSet<KernelId>,
    next_id: u64,
    /// Last tick planned or skipped
    tick: u64,
}

impl PeriodicState {
    pub fn new(periods: &[PeriodClass]) -> Self {
        let mut periods = periods.to_vec();
        periods.sort();
        periods.dedup();
        Self {
            buckets: periods.into_iter().map(PeriodBucket::new).collect(),
            components: HashMap::new(),
            busy_kernels: HashSet::new(),
            next_id: 0,
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        period: PeriodClass,
        kernel: Option<KernelId>,
        task: Arc<dyn SwcTask>,
    ) -> Result<SwcId> {
        let bucket = self
            .buckets
            .iter_mut()
            .find(|b| b.period == period)
            .ok_or(WardenError::PeriodDisabled(period))?;

        self.next_id += 1;
        let id = SwcId(self.next_id);
        bucket.members.push(id);
        let next_due = period.next_due_after(self.tick);
        self.components.insert(
            id,
            SoftwareComponent::new(id, name.into(), period, kernel, task, next_due),
        );
        Ok(id)
    }

    pub fn deregister(&mut self, id: SwcId) -> Result<ComponentReport> {
        let component = self
            .components
            .remove(&id)
            .ok_or(WardenError::UnknownComponent(id))?;
        for bucket in &mut self.buckets {
            bucket.remove(id);
        }
        Ok(component.report())
    }

    /// Remove every component bound to `kernel`
    pub fn deregister_kernel(&mut self, kernel: KernelId) -> Vec<SwcId> {
        let ids: Vec<SwcId> = self
            .components
            .values()
            .filter(|c| c.kernel == Some(kernel))
            .map(|c| c.id)
            .collect();
        for &id in &ids {
            self.components.remove(&id);
            for bucket in &mut self.buckets {
                bucket.remove(id);
            }
        }
        ids
    }

    /// Periods due at `tick`
    pub fn due_at(&self, tick: u64) -> Vec<PeriodClass> {
        self.buckets
            .iter()
            .filter(|b| b.is_due(tick))
            .map(|b| b.period)
            .collect()
    }

    /// Account for a tick the loop never got to process. The tick's own
    /// occurrences are missed, and so are older ones they supersede.
    pub fn miss_tick(&mut self, tick: u64) -> Vec<Miss> {
        let mut missed = Vec::new();
        for bucket in self.buckets.iter().filter(|b| b.is_due(tick)) {
            for id in &bucket.members {
                let Some(component) = self.components.get_mut(id) else {
                    continue;
                };
                if let Some(old) = component.pending_since.take() {
                    missed.push(record_miss(component, old));
                }
                missed.push(record_miss(component, tick));
                component.next_due = bucket.period.next_due_after(tick);
            }
        }
        self.tick = self.tick.max(tick);
        missed
    }

    /// Mark due components pending and hand out every runnable occurrence,
    /// highest priority first. A component whose kernel already has a job
    /// on the pool waits for a later tick.
    pub fn plan_tick(&mut self, tick: u64) -> TickPlan {
        let mut plan = TickPlan::default();

        for bucket in self.buckets.iter().filter(|b| b.is_due(tick)) {
            for id in &bucket.members {
                let Some(component) = self.components.get_mut(id) else {
                    continue;
                };
                if let Some(old) = component.pending_since.replace(tick) {
                    plan.missed.push(record_miss(component, old));
                }
                component.next_due = bucket.period.next_due_after(tick);
            }
        }

        for bucket in &self.buckets {
            for id in &bucket.members {
                let Some(component) = self.components.get_mut(id) else {
                    continue;
                };
                if component.running {
                    continue;
                }
                let Some(due) = component.pending_since else {
                    continue;
                };
                if let Some(kernel) = component.kernel {
                    if !self.busy_kernels.insert(kernel) {
                        continue;
                    }
                }
                component.pending_since = None;
                component.running = true;
                plan.jobs.push(Job {
                    swc: component.id,
                    kernel: component.kernel,
                    due,
                    tick,
                    task: Arc::clone(&component.task),
                });
            }
        }

        self.tick = self.tick.max(tick);
        plan
    }

    /// Fold a finished job back in. Returns the occurrence if it was given
    /// up on, or if a retry found it already superseded.
    pub fn complete(&mut self, job: &Job, outcome: &anyhow::Result<TaskOutcome>) -> Option<Miss> {
        if let Some(kernel) = job.kernel {
            self.busy_kernels.remove(&kernel);
        }
        let component = self.components.get_mut(&job.swc)?;
        component.running = false;

        match outcome {
            Ok(TaskOutcome::Done) => {
                component.runs += 1;
                None
            }
            Ok(TaskOutcome::Retry) => {
                component.retries += 1;
                restore(component, job.due)
            }
            Ok(TaskOutcome::Missed) => Some(record_miss(component, job.due)),
            Ok(TaskOutcome::Retire) => {
                debug!(swc = %job.swc, "Retiring component");
                let id = job.swc;
                self.components.remove(&id);
                for bucket in &mut self.buckets {
                    bucket.remove(id);
                }
                None
            }
            Err(_) => {
                component.failures += 1;
                None
            }
        }
    }

    /// Take back a job that could not be handed to a worker
    pub fn requeue(&mut self, job: Job) -> Option<Miss> {
        if let Some(kernel) = job.kernel {
            self.busy_kernels.remove(&kernel);
        }
        let component = self.components.get_mut(&job.swc)?;
        component.running = false;
        restore(component, job.due)
    }

    pub fn reports(&self) -> Vec<ComponentReport> {
        let mut reports: Vec<ComponentReport> =
            self.components.values().map(SoftwareComponent::report).collect();
        reports.sort_by_key(|r| r.id);
        reports
    }

    pub fn report(&self, id: SwcId) -> Result<ComponentReport> {
        self.components
            .get(&id)
            .map(SoftwareComponent::report)
            .ok_or(WardenError::UnknownComponent(id))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

fn record_miss(component: &mut SoftwareComponent, due: u64) -> Miss {
    component.missed_deadlines += 1;
    Miss {
        swc: component.id,
        kernel: component.kernel,
        due,
    }
}

/// Put an unserviced occurrence back, unless a newer one took its place
fn restore(component: &mut SoftwareComponent, due: u64) -> Option<Miss> {
    if component.pending_since.is_none() {
        component.pending_since = Some(due);
        None
    } else {
        Some(record_miss(component, due))
    }
}
