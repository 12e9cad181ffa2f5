//! The scheduler: one driver task per job, one spawned task per firing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::SchedulerError;
use crate::job::{FiringContext, Job, JobBody, JobState, StateCell};
use crate::metrics::SchedulerMetrics;
use crate::recurrence::Recurrence;

struct JobEntry<B> {
    job: Job<B>,
    state: StateCell,
    firings: AtomicU64,
}

struct Shared {
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
    notify: Notify,
    metrics: RwLock<SchedulerMetrics>,
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, SchedulerMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs registered jobs on their recurrences until shut down.
///
/// Generic over the job body so each scheduler dispatches statically to a
/// closed set of job kinds.
pub struct Scheduler<B: JobBody> {
    jobs: Vec<Arc<JobEntry<B>>>,
    shared: Arc<Shared>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<B: JobBody> Default for Scheduler<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: JobBody> Scheduler<B> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A scheduler whose cron jobs follow `clock` instead of the system time.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Vec::new(),
            shared: Arc::new(Shared {
                clock,
                shutdown: Arc::new(AtomicBool::new(false)),
                notify: Notify::new(),
                metrics: RwLock::new(SchedulerMetrics::default()),
            }),
            drivers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a job. Ids must be unique; registration closes at `start`.
    pub fn register(&mut self, job: Job<B>) -> Result<(), SchedulerError> {
        if self.started.load(Ordering::Acquire) {
            return Err(SchedulerError::AlreadyStarted);
        }
        if self.jobs.iter().any(|e| e.job.id == job.id) {
            return Err(SchedulerError::DuplicateJob(job.id));
        }
        info!(job_id = %job.id, recurrence = %job.recurrence.describe(), "Registered job");
        self.jobs.push(Arc::new(JobEntry {
            job,
            state: StateCell::new(),
            firings: AtomicU64::new(0),
        }));
        Ok(())
    }

    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.iter().map(|e| e.job.id.as_str()).collect()
    }

    /// Spawn one driver per registered job. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }
        info!(jobs = self.jobs.len(), "Scheduler starting");

        let mut drivers = self.drivers.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in &self.jobs {
            drivers.push(tokio::spawn(drive(Arc::clone(entry), Arc::clone(&self.shared))));
        }
        Ok(())
    }

    /// Cancel every job. Running firings are asked to stop cooperatively and
    /// are allowed to finish their current unit of work.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Scheduler shutdown requested");
        for entry in &self.jobs {
            entry.state.cancel();
        }
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Wait for every driver, and the firing it was running, to finish.
    pub async fn wait(&self) {
        let drivers = std::mem::take(
            &mut *self.drivers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for driver in drivers {
            if let Err(e) = driver.await {
                error!(error = %e, "Job driver terminated abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    pub fn job_state(&self, id: &str) -> Option<JobState> {
        self.jobs
            .iter()
            .find(|e| e.job.id == id)
            .map(|e| e.state.load())
    }

    /// Snapshot of per-job counters and current states.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = self
            .shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for entry in &self.jobs {
            snapshot.states.insert(entry.job.id.clone(), entry.state.load());
        }
        snapshot
    }
}

// ── Driving ─────────────────────────────────────────────────────────

/// Longest single sleep while waiting for a cron occurrence.
const CRON_MAX_SLEEP: Duration = Duration::from_secs(60);

/// An occurrence noticed later than this was slept through and is skipped.
const CRON_LATE_LIMIT: Duration = Duration::from_secs(60);

/// Produces due moments for one job.
enum Ticker {
    Interval(tokio::time::Interval),
    Cron {
        recurrence: Recurrence,
        last: DateTime<Utc>,
        clock: Arc<dyn Clock>,
    },
}

impl Ticker {
    fn new(recurrence: &Recurrence, clock: &Arc<dyn Clock>) -> Self {
        match recurrence {
            Recurrence::Interval(period) => {
                let mut interval = tokio::time::interval_at(Instant::now() + *period, *period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Ticker::Interval(interval)
            }
            Recurrence::Cron { .. } => Ticker::Cron {
                recurrence: recurrence.clone(),
                last: clock.now(),
                clock: Arc::clone(clock),
            },
        }
    }

    /// Sleep until the next due moment. False when none will ever come.
    ///
    /// Cron waits re-read the wall clock at least every [`CRON_MAX_SLEEP`], so
    /// a clock step or host suspend is noticed. An occurrence that passed while
    /// the process was not running is skipped, never fired late.
    async fn tick(&mut self, job_id: &str) -> bool {
        match self {
            Ticker::Interval(interval) => {
                interval.tick().await;
                true
            }
            Ticker::Cron {
                recurrence,
                last,
                clock,
            } => loop {
                let from = std::cmp::max(clock.now(), *last);
                let Some(next) = recurrence.next_after(from) else {
                    return false;
                };
                loop {
                    let remaining = (next - clock.now()).to_std().unwrap_or(Duration::ZERO);
                    if remaining.is_zero() {
                        break;
                    }
                    tokio::time::sleep(remaining.min(CRON_MAX_SLEEP)).await;
                }
                *last = next;
                match (clock.now() - next).to_std() {
                    Ok(late) if late > CRON_LATE_LIMIT => warn!(
                        job_id,
                        due = %next,
                        late_secs = late.as_secs(),
                        "Cron occurrence passed while asleep, not making it up"
                    ),
                    _ => return true,
                }
            },
        }
    }
}

async fn drive<B: JobBody>(entry: Arc<JobEntry<B>>, shared: Arc<Shared>) {
    let job_id = entry.job.id.clone();
    let mut ticker = Ticker::new(&entry.job.recurrence, &shared.clock);
    let mut current: Option<JoinHandle<()>> = None;

    loop {
        // Register interest before checking the flag so a shutdown between
        // the two is not missed.
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if shared.is_shutdown() {
            break;
        }

        let due = tokio::select! {
            _ = &mut notified => break,
            due = ticker.tick(&job_id) => due,
        };
        if !due {
            warn!(job_id = %job_id, "Recurrence has no further occurrences");
            notified.await;
            break;
        }
        if shared.is_shutdown() {
            break;
        }

        if !entry.state.try_begin() {
            warn!(job_id = %job_id, "Previous firing still running, skipping this one");
            shared.metrics_mut().record_skipped(&job_id);
            continue;
        }

        if let Some(previous) = current.take() {
            reap(&job_id, previous, &shared).await;
        }
        current = Some(spawn_firing(Arc::clone(&entry), Arc::clone(&shared)));
    }

    entry.state.cancel();
    if let Some(in_flight) = current {
        debug!(job_id = %job_id, "Draining in-flight firing");
        reap(&job_id, in_flight, &shared).await;
    }
    debug!(job_id = %job_id, "Job driver stopped");
}

/// Await a finished or finishing firing, accounting for panics.
async fn reap(job_id: &str, handle: JoinHandle<()>, shared: &Shared) {
    if let Err(e) = handle.await {
        error!(job_id, error = %e, "Job firing panicked");
        shared.metrics_mut().record_finished(job_id, false, Duration::ZERO);
    }
}

/// Returns the state to `Idle` when the firing ends, even by panic.
struct RunningGuard<'a>(&'a StateCell);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

fn spawn_firing<B: JobBody>(entry: Arc<JobEntry<B>>, shared: Arc<Shared>) -> JoinHandle<()> {
    let firing = entry.firings.fetch_add(1, Ordering::Relaxed) + 1;
    let ctx = FiringContext::new(
        &entry.job.id,
        firing,
        shared.clock.now(),
        Arc::clone(&shared.shutdown),
    );
    shared.metrics_mut().record_fired(&entry.job.id, ctx.fired_at);

    tokio::spawn(async move {
        let _running = RunningGuard(&entry.state);
        let job_id = entry.job.id.as_str();
        let started = Instant::now();
        debug!(job_id, firing, "Job firing started");

        let result = entry.job.body.run(&ctx).await;
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        match &result {
            Ok(()) => info!(job_id, firing, duration_ms, "Job firing completed"),
            Err(e) => error!(job_id, firing, duration_ms, error = %e, "Job firing failed"),
        }
        shared.metrics_mut().record_finished(job_id, result.is_ok(), elapsed);
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use std::sync::atomic::AtomicUsize;

    /// Sleeps for `work` per firing and tracks concurrency.
    struct SlowBody {
        work: Duration,
        runs: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    impl SlowBody {
        fn new(work: Duration) -> Self {
            Self {
                work,
                runs: Arc::new(AtomicUsize::new(0)),
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl JobBody for SlowBody {
        async fn run(&self, _ctx: &FiringContext) -> Result<(), JobError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn every(secs: u64) -> Recurrence {
        Recurrence::interval(Duration::from_secs(secs)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn interval_job_fires_each_period() {
        let body = SlowBody::new(Duration::ZERO);
        let runs = Arc::clone(&body.runs);
        let mut scheduler = Scheduler::new();
        scheduler.register(Job::new("tick", every(10), body)).unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.job_state("tick"), Some(JobState::Idle));

        scheduler.shutdown();
        scheduler.wait().await;
        assert_eq!(scheduler.job_state("tick"), Some(JobState::Cancelled));
        assert_eq!(scheduler.metrics().job("tick").unwrap().completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_firing_is_skipped() {
        // Each firing takes 25s on a 10s interval.
        let body = SlowBody::new(Duration::from_secs(25));
        let max_active = Arc::clone(&body.max_active);
        let mut scheduler = Scheduler::new();
        scheduler.register(Job::new("slow", every(10), body)).unwrap();
        scheduler.start().unwrap();

        // Fires at 10s (busy until 35s), skips 20s and 30s, fires again at 40s.
        tokio::time::sleep(Duration::from_secs(45)).await;
        let m = scheduler.metrics();
        let slow = m.job("slow").unwrap();
        assert_eq!(slow.fired, 2);
        assert_eq!(slow.skipped_overlap, 2);
        assert_eq!(slow.completed, 1);
        assert_eq!(m.states["slow"], JobState::Running);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);

        scheduler.shutdown();
        scheduler.wait().await;
    }

    struct UnitsBody {
        units_done: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl JobBody for UnitsBody {
        async fn run(&self, ctx: &FiringContext) -> Result<(), JobError> {
            for _ in 0..5 {
                if ctx.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(10)).await;
                self.units_done.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_current_unit_only() {
        let units_done = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler
            .register(Job::new(
                "units",
                every(5),
                UnitsBody {
                    units_done: Arc::clone(&units_done),
                },
            ))
            .unwrap();
        scheduler.start().unwrap();

        // Firing starts at 5s; unit 1 ends at 15s, unit 2 is in progress at 22s.
        tokio::time::sleep(Duration::from_secs(22)).await;
        scheduler.shutdown();
        assert_eq!(scheduler.job_state("units"), Some(JobState::Cancelled));

        scheduler.wait().await;
        assert_eq!(units_done.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.job_state("units"), Some(JobState::Cancelled));
        assert_eq!(scheduler.metrics().job("units").unwrap().completed, 1);
    }

    struct FailingBody;

    #[async_trait::async_trait]
    impl JobBody for FailingBody {
        async fn run(&self, _ctx: &FiringContext) -> Result<(), JobError> {
            Err(JobError::new("upstream unavailable"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_and_do_not_stop_the_job() {
        let mut scheduler = Scheduler::new();
        scheduler.register(Job::new("flaky", every(10), FailingBody)).unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        let m = scheduler.metrics();
        let flaky = m.job("flaky").unwrap();
        assert_eq!(flaky.fired, 2);
        assert_eq!(flaky.failed, 2);
        assert_eq!(flaky.completed, 0);

        scheduler.shutdown();
        scheduler.wait().await;
    }

    struct PanicOnceBody {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl JobBody for PanicOnceBody {
        async fn run(&self, _ctx: &FiringContext) -> Result<(), JobError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_firing_returns_job_to_idle() {
        let mut scheduler = Scheduler::new();
        scheduler
            .register(Job::new(
                "panicky",
                every(10),
                PanicOnceBody {
                    calls: AtomicUsize::new(0),
                },
            ))
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        let m = scheduler.metrics();
        let panicky = m.job("panicky").unwrap();
        assert_eq!(panicky.fired, 2);
        assert_eq!(panicky.failed, 1);
        assert_eq!(panicky.completed, 1);

        scheduler.shutdown();
        scheduler.wait().await;
    }

    #[tokio::test]
    async fn registration_rules() {
        let mut scheduler = Scheduler::new();
        scheduler.register(Job::new("a", every(60), FailingBody)).unwrap();
        assert!(matches!(
            scheduler.register(Job::new("a", every(60), FailingBody)),
            Err(SchedulerError::DuplicateJob(_))
        ));

        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));
        assert!(matches!(
            scheduler.register(Job::new("b", every(60), FailingBody)),
            Err(SchedulerError::AlreadyStarted)
        ));
        assert_eq!(scheduler.job_ids(), vec!["a"]);
        assert_eq!(scheduler.job_state("missing"), None);

        scheduler.shutdown();
        scheduler.wait().await;
        assert_eq!(scheduler.job_state("a"), Some(JobState::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_first_tick_never_fires() {
        let body = SlowBody::new(Duration::ZERO);
        let runs = Arc::clone(&body.runs);
        let mut scheduler = Scheduler::new();
        scheduler.register(Job::new("idle", every(3600), body)).unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown();
        scheduler.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
