//! Periodic task scheduler
//!
//! A fixed-resolution tick loop. Tick numbers are derived from the loop's
//! start instant, never from counting wake-ups, so late wake-ups cannot
//! make the schedule drift. Ticks the loop could not get to are accounted
//! as missed deadlines and reported with the next timing overrun.

mod bucket;
mod component;
pub mod pool;
mod state;
pub mod task;

pub use component::{Job, Miss};
pub use pool::WorkerPool;
pub use state::{PeriodicState, TickPlan};
pub use task::{DispatchKernel, HostTask, SwcTask, TaskContext, TaskOutcome};

use crate::config::SchedulerConfig;
use crate::gpu::GpuScheduler;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_shared::utils::duration_micros;
use warden_shared::{
    ComponentReport, EventSink, KernelId, PeriodClass, Result, SchedulerEvent, SwcId,
};

pub struct PeriodicScheduler {
    config: SchedulerConfig,
    gpu: Arc<GpuScheduler>,
    state: Mutex<PeriodicState>,
    sink: Arc<dyn EventSink>,
}

impl PeriodicScheduler {
    pub fn new(config: SchedulerConfig, gpu: Arc<GpuScheduler>, sink: Arc<dyn EventSink>) -> Self {
        let state = PeriodicState::new(&config.period_classes);
        Self {
            config,
            gpu,
            state: Mutex::new(state),
            sink,
        }
    }

    pub fn gpu(&self) -> &Arc<GpuScheduler> {
        &self.gpu
    }

    /// Last tick processed or skipped
    pub fn tick(&self) -> u64 {
        self.lock_state().tick()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        period: PeriodClass,
        kernel: Option<KernelId>,
        task: Arc<dyn SwcTask>,
    ) -> Result<SwcId> {
        let name = name.into();
        let id = self.lock_state().register(name.clone(), period, kernel, task)?;
        info!(swc = %id, name = %name, period = %period, "Software component registered");
        Ok(id)
    }

    pub fn deregister(&self, id: SwcId) -> Result<ComponentReport> {
        let report = self.lock_state().deregister(id)?;
        info!(swc = %id, runs = report.runs, "Software component deregistered");
        Ok(report)
    }

    pub fn deregister_kernel(&self, kernel: KernelId) -> Vec<SwcId> {
        self.lock_state().deregister_kernel(kernel)
    }

    pub fn report(&self, id: SwcId) -> Result<ComponentReport> {
        self.lock_state().report(id)
    }

    pub fn reports(&self) -> Vec<ComponentReport> {
        self.lock_state().reports()
    }

    /// Run the watchdog if it is due, plan `tick` and offer each job to
    /// `submit`. Jobs handed back are requeued for a later tick. Returns
    /// the number of jobs accepted.
    pub fn process_tick<F>(&self, tick: u64, mut submit: F) -> usize
    where
        F: FnMut(Job) -> std::result::Result<(), Job>,
    {
        if tick % self.config.watchdog_poll_ticks == 0 {
            for kernel in self.gpu.poll() {
                warn!(kernel = %kernel, tick, "Watchdog retired kernel");
            }
        }

        let plan = self.lock_state().plan_tick(tick);
        for miss in plan.missed {
            self.report_miss(miss);
        }

        let mut accepted = 0;
        for job in plan.jobs {
            match submit(job) {
                Ok(()) => accepted += 1,
                Err(job) => {
                    debug!(swc = %job.swc, tick, "Worker queue full, requeueing");
                    let miss = self.lock_state().requeue(job);
                    if let Some(miss) = miss {
                        self.report_miss(miss);
                    }
                }
            }
        }
        accepted
    }

    /// Account for a tick that was never processed
    pub fn skip_tick(&self, tick: u64) {
        let missed = self.lock_state().miss_tick(tick);
        for miss in missed {
            self.report_miss(miss);
        }
    }

    /// Run one job to completion and fold its outcome back in
    pub async fn execute(&self, job: Job) {
        let ctx = TaskContext {
            gpu: &self.gpu,
            swc: job.swc,
            kernel: job.kernel,
            tick: job.tick,
        };
        let outcome = job.task.run(ctx).await;
        if let Err(e) = &outcome {
            warn!(swc = %job.swc, tick = job.tick, "Task failed: {:#}", e);
        }

        let miss = self.lock_state().complete(&job, &outcome);
        if let Some(miss) = miss {
            self.report_miss(miss);
        }
    }

    /// Process the next tick and run its jobs inline, one after another
    pub async fn run_once(&self) -> u64 {
        let tick = self.tick() + 1;
        let began = Instant::now();
        let mut jobs = Vec::new();
        self.process_tick(tick, |job| {
            jobs.push(job);
            Ok(())
        });
        self.check_budget(tick, began.elapsed(), 0);

        for job in jobs {
            self.execute(job).await;
        }
        tick
    }

    /// The tick loop. Runs until `cancel` fires, then drains the pool.
    pub async fn run(self: Arc<Self>, pool: WorkerPool, cancel: CancellationToken) {
        let resolution = self.config.tick_resolution();
        let start = Instant::now();
        let base = self.tick();
        let mut last = base;

        let mut interval = tokio::time::interval_at(start + resolution, resolution);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            resolution_us = self.config.tick_resolution_us,
            workers = pool.size(),
            "Tick loop started"
        );

        loop {
            let scheduled = tokio::select! {
                _ = cancel.cancelled() => break,
                scheduled = interval.tick() => scheduled,
            };

            let since_start = scheduled.duration_since(start).as_nanos();
            let tick = base + (since_start / resolution.as_nanos()) as u64;
            if tick <= last {
                continue;
            }
            let skipped = tick - last - 1;
            for missed in last + 1..tick {
                self.skip_tick(missed);
            }

            let began = Instant::now();
            self.process_tick(tick, |job| pool.try_submit(job));
            self.check_budget(tick, began.elapsed(), skipped);
            last = tick;
        }

        pool.shutdown().await;
        info!(tick = last, "Tick loop stopped");
    }

    fn check_budget(&self, tick: u64, elapsed: Duration, skipped_ticks: u64) {
        self.sink.tick_processed(tick, elapsed);
        let budget = self.config.system_operation_time();
        if elapsed <= budget && skipped_ticks == 0 {
            return;
        }
        let elapsed_us = duration_micros(elapsed);
        warn!(
            tick,
            elapsed_us,
            budget_us = self.config.system_operation_time_us,
            skipped_ticks,
            "Timing overrun"
        );
        self.sink.record(SchedulerEvent::TimingOverrun {
            tick,
            elapsed_us,
            budget_us: self.config.system_operation_time_us,
            skipped_ticks,
        });
    }

    fn report_miss(&self, miss: Miss) {
        warn!(swc = %miss.swc, due = miss.due, "Deadline missed");
        if let Some(kernel) = miss.kernel {
            self.gpu.note_deadline_missed(kernel);
        }
        self.sink.record(SchedulerEvent::DeadlineMissed {
            kernel: miss.kernel,
            swc: Some(miss.swc),
            tick: miss.due,
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, PeriodicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use warden_shared::CollectingSink;

    fn scheduler(config: SchedulerConfig) -> (Arc<PeriodicScheduler>, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let gpu = Arc::new(GpuScheduler::new(config.clone(), sink.clone()));
        (Arc::new(PeriodicScheduler::new(config, gpu, sink.clone())), sink)
    }

    fn counter() -> (Arc<AtomicU64>, Arc<dyn SwcTask>) {
        let runs = Arc::new(AtomicU64::new(0));
        let runs_in_task = runs.clone();
        let task = HostTask::new(move |_| {
            runs_in_task.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (runs, Arc::new(task))
    }

    #[tokio::test]
    async fn test_run_once_advances_ticks() {
        let (periodic, _) = scheduler(SchedulerConfig::default());
        let (runs, task) = counter();
        let id = periodic.register("every-2", PeriodClass::P2, None, task).unwrap();

        for expected in 1..=10u64 {
            assert_eq!(periodic.run_once().await, expected);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(periodic.report(id).unwrap().runs, 5);
    }

    #[tokio::test]
    async fn test_full_queue_requeues() {
        let (periodic, sink) = scheduler(SchedulerConfig::default());
        let (_, task) = counter();
        let id = periodic.register("p1", PeriodClass::P1, None, task).unwrap();

        // nothing accepted at tick 1, tick 2 supersedes the requeued occurrence
        assert_eq!(periodic.process_tick(1, Err), 0);
        assert_eq!(periodic.process_tick(2, Err), 0);
        assert_eq!(periodic.report(id).unwrap().missed_deadlines, 1);
        let missed = sink.count(|e| {
            matches!(e, SchedulerEvent::DeadlineMissed { swc: Some(s), tick: 1, .. } if *s == id)
        });
        assert_eq!(missed, 1);
    }

    #[tokio::test]
    async fn test_skipped_ticks_reported() {
        let (periodic, sink) = scheduler(SchedulerConfig::default());
        let (_, task) = counter();
        periodic.register("p1", PeriodClass::P1, None, task).unwrap();

        periodic.skip_tick(1);
        periodic.skip_tick(2);
        periodic.check_budget(3, Duration::ZERO, 2);

        assert_eq!(sink.count(|e| matches!(e, SchedulerEvent::DeadlineMissed { .. })), 2);
        assert_eq!(
            sink.count(|e| matches!(e, SchedulerEvent::TimingOverrun { skipped_ticks: 2, .. })),
            1
        );
        assert_eq!(periodic.tick(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tick_loop_with_pool() {
        let config = SchedulerConfig {
            tick_resolution_us: 2000,
            system_operation_time_us: 2000,
            ..Default::default()
        };
        let (periodic, _) = scheduler(config.clone());
        let (runs, task) = counter();
        periodic.register("p5", PeriodClass::P5, None, task).unwrap();

        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(
            config.worker_threads,
            config.job_queue_depth(),
            periodic.clone(),
        );
        let handle = tokio::spawn(periodic.clone().run(pool, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap();

        let tick = periodic.tick();
        assert!(tick >= 20, "only reached tick {}", tick);
        let report = periodic.reports().pop().unwrap();
        // every occurrence up to the last tick was either run or missed
        assert_eq!(report.runs + report.missed_deadlines, tick / 5);
        assert_eq!(runs.load(Ordering::SeqCst), report.runs);
    }
}
