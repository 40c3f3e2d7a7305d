//! Recurring export jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeDelta, TimeZone};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::export::{ExportJob, ExportReport, Exporter, Trigger};
use crate::state::SharedState;

#[derive(Debug, Clone)]
struct Scheduled {
    job: ExportJob,
    next_due: DateTime<Local>,
}

/// Fires export jobs on their triggers, independently of the watcher.
///
/// Due jobs are checked once per tick. A firing that is in progress when
/// [`stop`](Self::stop) is called runs to completion. All methods take
/// `&self`; the scheduler is shared without an outer lock, so a long
/// [`run_now`](Self::run_now) never blocks [`jobs`](Self::jobs).
pub struct Scheduler {
    state: SharedState,
    exporter: Exporter,
    jobs: Arc<Mutex<Vec<Scheduled>>>,
    tick: Duration,
    loop_task: Mutex<Option<TickLoop>>,
}

struct TickLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(state: SharedState, tick: Duration) -> Self {
        Self {
            state,
            exporter: Exporter,
            jobs: Arc::new(Mutex::new(Vec::new())),
            tick,
            loop_task: Mutex::new(None),
        }
    }

    /// Add a job. Returns its id.
    pub async fn schedule(&self, job: ExportJob) -> Uuid {
        let id = job.id;
        let next_due = first_due(job.trigger, Local::now());
        info!("Scheduled export {id} ({:?}), first run at {next_due}", job.trigger);
        self.jobs.lock().await.push(Scheduled { job, next_due });
        id
    }

    /// Remove a job. Returns whether it was scheduled.
    pub async fn unschedule(&self, id: Uuid) -> bool {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|s| s.job.id != id);
        before != jobs.len()
    }

    /// Currently scheduled jobs.
    pub async fn jobs(&self) -> Vec<ExportJob> {
        self.jobs.lock().await.iter().map(|s| s.job.clone()).collect()
    }

    pub async fn is_running(&self) -> bool {
        self.loop_task.lock().await.is_some()
    }

    /// Start the tick loop. Does nothing if already running.
    pub async fn start(&self) {
        let mut loop_task = self.loop_task.lock().await;
        if loop_task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let jobs = self.jobs.clone();
        let state = self.state.clone();
        let exporter = self.exporter;
        let tick = self.tick;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for job in take_due(&jobs, Local::now()).await {
                            fire(&exporter, &state, &job).await;
                        }
                    }
                }
            }
            debug!("Scheduler loop exited");
        });
        *loop_task = Some(TickLoop { cancel, task });
        info!("Scheduler started");
    }

    /// Stop the tick loop, waiting for a firing in progress.
    pub async fn stop(&self) {
        let Some(TickLoop { cancel, task }) = self.loop_task.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            warn!("Scheduler task ended abnormally: {e}");
        }
        info!("Scheduler stopped");
    }

    /// Run `job` immediately, outside its trigger.
    pub async fn run_now(&self, job: &ExportJob) -> Result<ExportReport> {
        let config = self.state.config().await;
        self.exporter.run(job, &config).await
    }
}

async fn fire(exporter: &Exporter, state: &SharedState, job: &ExportJob) {
    info!("Running scheduled export {} ({})", job.id, job.format);
    let config = state.config().await;
    if let Err(e) = exporter.run(job, &config).await {
        error!("Scheduled export {} failed: {e}", job.id);
    }
}

/// Remove due jobs from the queue, rescheduling recurring ones.
async fn take_due(jobs: &Mutex<Vec<Scheduled>>, now: DateTime<Local>) -> Vec<ExportJob> {
    let mut jobs = jobs.lock().await;
    let mut due = Vec::new();
    jobs.retain_mut(|scheduled| {
        if scheduled.next_due > now {
            return true;
        }
        due.push(scheduled.job.clone());
        match next_due(scheduled.job.trigger, now) {
            Some(next) => {
                scheduled.next_due = next;
                true
            }
            None => false,
        }
    });
    due
}

fn first_due(trigger: Trigger, now: DateTime<Local>) -> DateTime<Local> {
    match trigger {
        Trigger::Once => now,
        _ => next_due(trigger, now).unwrap_or(now),
    }
}

/// When a job fired at `now` next fires, `None` for one-off jobs.
fn next_due(trigger: Trigger, now: DateTime<Local>) -> Option<DateTime<Local>> {
    match trigger {
        Trigger::Once => None,
        Trigger::Every(interval) => {
            let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
            Some(now.checked_add_signed(interval).unwrap_or(now))
        }
        Trigger::DailyAt(at) => Some(next_daily(now, at)),
    }
}

fn next_daily(now: DateTime<Local>, at: NaiveTime) -> DateTime<Local> {
    let mut date = now.date_naive();
    for _ in 0..3 {
        let candidate = Local.from_local_datetime(&date.and_time(at)).earliest();
        if let Some(candidate) = candidate.filter(|c| *c > now) {
            return candidate;
        }
        date = date.succ_opt().unwrap_or(date);
    }
    now + TimeDelta::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::export::{ExportMode, ExportSource};
    use autoproc_codec::Format;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_next_daily_is_within_a_day() {
        let now = Local::now();
        let at = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        let next = next_daily(now, at);

        assert!(next > now);
        assert!(next - now <= TimeDelta::days(1) + TimeDelta::hours(1));
        assert_eq!(next.time(), at);
    }

    #[tokio::test]
    async fn test_take_due_reschedules_recurring_and_drops_once() {
        let now = Local::now();
        let every = ExportJob::new(Format::Csv).with_trigger(Trigger::Every(Duration::from_secs(60)));
        let once = ExportJob::new(Format::Json);
        let later = ExportJob::new(Format::Xml).with_trigger(Trigger::Every(Duration::from_secs(60)));
        let jobs = Mutex::new(vec![
            Scheduled { job: every.clone(), next_due: now },
            Scheduled { job: once.clone(), next_due: now },
            Scheduled { job: later.clone(), next_due: now + TimeDelta::seconds(30) },
        ]);

        let due = take_due(&jobs, now).await;
        assert_eq!(due, vec![every, once]);

        let remaining = jobs.lock().await;
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].next_due, now + TimeDelta::seconds(60));
        assert_eq!(remaining[1].job, later);
    }

    #[tokio::test]
    async fn test_schedule_and_unschedule() {
        let scheduler = Scheduler::new(
            SharedState::new(ProcessingConfig::new("in", "out", "arch")),
            Duration::from_millis(10),
        );
        let id = scheduler.schedule(ExportJob::new(Format::Csv)).await;
        assert_eq!(scheduler.jobs().await.len(), 1);
        assert!(scheduler.unschedule(id).await);
        assert!(!scheduler.unschedule(id).await);
        assert!(scheduler.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_once_job_fires_on_tick() {
        let root = TempDir::new().unwrap();
        let config = ProcessingConfig::new(
            root.path().join("in"),
            root.path().join("out"),
            root.path().join("arch"),
        );
        fs::create_dir_all(&config.output_dir).unwrap();
        fs::write(config.output_dir.join("a.csv"), "id\n1\n").unwrap();
        let export_dir = config.export_dir();

        let scheduler = Scheduler::new(SharedState::new(config), Duration::from_millis(10));
        scheduler
            .schedule(
                ExportJob::new(Format::Xml)
                    .with_source(ExportSource::OutputDir)
                    .with_mode(ExportMode::Combined),
            )
            .await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        for _ in 0..200 {
            if scheduler.jobs().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop().await;

        let written = fs::read_dir(&export_dir).unwrap().count();
        assert_eq!(written, 1);
        assert!(scheduler.jobs().await.is_empty());
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_jobs_readable_during_run_now() {
        let root = TempDir::new().unwrap();
        let config = ProcessingConfig::new(
            root.path().join("in"),
            root.path().join("out"),
            root.path().join("arch"),
        );
        fs::create_dir_all(&config.output_dir).unwrap();
        let mut csv = String::from("id,name\n");
        for i in 0..200_000 {
            csv.push_str(&format!("{i},name{i}\n"));
        }
        fs::write(config.output_dir.join("big.csv"), csv).unwrap();

        let scheduler = Arc::new(Scheduler::new(
            SharedState::new(config),
            Duration::from_millis(10),
        ));
        let hourly = ExportJob::new(Format::Csv).with_trigger(Trigger::Every(Duration::from_secs(3600)));
        scheduler.schedule(hourly).await;

        let export = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_now(&ExportJob::new(Format::Json)).await })
        };
        let jobs = tokio::time::timeout(Duration::from_millis(500), scheduler.jobs())
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        let report = export.await.unwrap().unwrap();
        assert_eq!(report.written.len(), 1);
    }
}
