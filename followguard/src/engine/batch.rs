// followguard/src/engine/batch.rs
//
// Batch analysis jobs.
//
// trigger() validates the range, writes a `started` job row and returns its id
// immediately. A coordinating task then pages the event ledger by keyset
// cursor, collects every followed user with activity in the range, and fans
// them out over a bounded worker pool. Each user runs through UserAnalyzer
// with retries on transient errors; a user that still fails is logged and
// counted, never fatal to the job. Progress counters are flushed to the job
// row periodically, which doubles as the heartbeat the stall reaper watches.
//
// Only a failure to read the population itself fails the job.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::BatchConfig;
use crate::engine::analysis::{StageError, UserAnalyzer, UserOutcome};
use crate::error::{FraudError, Result};
use crate::events::{BatchAnalysisJob, JobStatus};
use crate::state::{EventCursor, FraudStore};

#[derive(Default)]
struct Progress {
    processed_followers:  AtomicU64,
    new_signals_detected: AtomicU64,
    users_scored:         AtomicU64,
    users_failed:         AtomicU64,
}

impl Progress {
    fn apply(&self, job: &mut BatchAnalysisJob) {
        job.processed_followers  = self.processed_followers.load(Ordering::Relaxed);
        job.new_signals_detected = self.new_signals_detected.load(Ordering::Relaxed);
        job.users_scored         = self.users_scored.load(Ordering::Relaxed);
        job.users_failed         = self.users_failed.load(Ordering::Relaxed);
    }

    fn users_done(&self) -> u64 {
        self.users_scored.load(Ordering::Relaxed) + self.users_failed.load(Ordering::Relaxed)
    }
}

/// Handle to a running job. Dropping it does not stop the job.
pub struct JobHandle {
    pub job_id: String,
    pub status: JobStatus,
    task:       tokio::task::JoinHandle<()>,
}

impl JobHandle {
    /// Wait for the coordinating task to finish.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!(job_id = %self.job_id, error = %e, "Batch coordinator panicked");
        }
    }
}

struct RunningJob {
    row:      Mutex<BatchAnalysisJob>,
    progress: Progress,
    token:    CancellationToken,
}

pub struct BatchOrchestrator {
    store:    Arc<dyn FraudStore>,
    analyzer: Arc<UserAnalyzer>,
    clock:    Arc<dyn Clock>,
    cfg:      BatchConfig,
    running:  DashMap<String, Arc<RunningJob>>,
}

impl BatchOrchestrator {
    pub fn new(
        store:    Arc<dyn FraudStore>,
        analyzer: Arc<UserAnalyzer>,
        clock:    Arc<dyn Clock>,
        cfg:      BatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self { store, analyzer, clock, cfg, running: DashMap::new() })
    }

    /// Start a job over `[date_from, date_to]`. `date_to` defaults to now;
    /// `date_from` defaults to the end of the last completed job, or the
    /// configured lookback for the first run.
    pub fn trigger(
        self: &Arc<Self>,
        date_from: Option<DateTime<Utc>>,
        date_to:   Option<DateTime<Utc>>,
    ) -> Result<JobHandle> {
        let now = self.clock.now();
        let to  = date_to.unwrap_or(now);
        let from = match date_from {
            Some(f) => f,
            None    => self.default_from(to)?,
        };
        if from > to {
            return Err(FraudError::Validation(format!(
                "date_from {} is after date_to {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }

        let job = BatchAnalysisJob {
            job_id:               uuid::Uuid::new_v4().to_string(),
            status:               JobStatus::Started,
            date_from:            from,
            date_to:              to,
            started_at:           now,
            completed_at:         None,
            updated_at:           now,
            processed_followers:  0,
            new_signals_detected: 0,
            users_scored:         0,
            users_failed:         0,
            message:              String::new(),
        };
        self.store.insert_job(job.clone())?;
        info!(job_id = %job.job_id, from = %from, to = %to, "Batch job started");

        let run = Arc::new(RunningJob {
            row:      Mutex::new(job.clone()),
            progress: Progress::default(),
            token:    CancellationToken::new(),
        });
        self.running.insert(job.job_id.clone(), run.clone());

        let this = self.clone();
        let task = tokio::spawn(async move { this.run_job(run).await });
        Ok(JobHandle { job_id: job.job_id, status: job.status, task })
    }

    fn default_from(&self, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let last_completed = self
            .store
            .jobs()?
            .into_iter()
            .filter(|j| j.status == JobStatus::Completed && j.date_to <= to)
            .map(|j| j.date_to)
            .max();
        Ok(last_completed.unwrap_or(to - Duration::hours(self.cfg.default_lookback_hours)))
    }

    pub fn job(&self, job_id: &str) -> Result<BatchAnalysisJob> {
        self.store
            .job(job_id)?
            .ok_or_else(|| FraudError::NotFound(format!("batch job {job_id}")))
    }

    /// Newest first.
    pub fn jobs(&self) -> Result<Vec<BatchAnalysisJob>> {
        let mut jobs = self.store.jobs()?;
        jobs.reverse();
        Ok(jobs)
    }

    /// Ask a running job to stop. Users already in flight finish; the rest
    /// are skipped and the job ends `failed` with a cancellation message.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        if let Some(run) = self.running.get(job_id) {
            run.token.cancel();
            info!(job_id, "Batch job cancellation requested");
            return Ok(());
        }
        let job = self.job(job_id)?;
        Err(FraudError::Conflict(format!("job {job_id} is {} and not running here", job.status)))
    }

    /// Fail every `started` job whose heartbeat is older than the stall
    /// timeout. Returns the reaped job ids.
    pub fn reap_stalled(&self) -> Result<Vec<String>> {
        let now   = self.clock.now();
        let limit = Duration::seconds(self.cfg.stall_timeout_secs);
        let mut reaped = Vec::new();
        for mut job in self.store.jobs()? {
            if job.status != JobStatus::Started || now - job.updated_at <= limit {
                continue;
            }
            job.message      = format!("stalled: no progress since {}", job.updated_at.to_rfc3339());
            job.status       = JobStatus::Failed;
            job.completed_at = Some(now);
            job.updated_at   = now;
            match self.store.update_job(job.clone()) {
                Ok(()) => {
                    if let Some((_, run)) = self.running.remove(&job.job_id) {
                        run.token.cancel();
                    }
                    warn!(job_id = %job.job_id, "Stalled batch job reaped");
                    reaped.push(job.job_id);
                }
                Err(FraudError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    /// Periodic reaper, until cancelled.
    pub async fn reaper_loop(self: Arc<Self>, every: StdDuration, token: CancellationToken) {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.reap_stalled() {
                        warn!(error = %e, "Stall reaper pass failed");
                    }
                }
            }
        }
    }

    async fn run_job(self: Arc<Self>, run: Arc<RunningJob>) {
        let (job_id, from, to) = {
            let row = run.row.lock();
            (row.job_id.clone(), row.date_from, row.date_to)
        };

        let pool     = Arc::new(Semaphore::new(self.cfg.worker_pool_size.max(1)));
        let mut set  = JoinSet::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<EventCursor> = None;
        let mut fatal: Option<FraudError>   = None;

        let heartbeat = {
            let this = self.clone();
            let run  = run.clone();
            let every = StdDuration::from_secs((self.cfg.stall_timeout_secs.max(3) / 3) as u64);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = run.token.cancelled() => break,
                        _ = tick.tick() => this.flush(&run),
                    }
                }
            })
        };

        'pages: loop {
            if run.token.is_cancelled() { break; }
            let page = match self.read_page(from, to, cursor.as_ref()).await {
                Ok(p)  => p,
                Err(e) => { fatal = Some(e); break; }
            };
            let Some(last) = page.last() else { break };
            cursor = Some(EventCursor::of(last));

            for event in &page {
                if !seen.insert(event.followed_user_id.clone()) { continue; }
                let permit = tokio::select! {
                    _ = run.token.cancelled() => break 'pages,
                    p = pool.clone().acquire_owned() => match p {
                        Ok(p)  => p,
                        Err(_) => break 'pages,
                    },
                };
                let this    = self.clone();
                let run     = run.clone();
                let user_id = event.followed_user_id.clone();
                set.spawn(async move {
                    let _permit = permit;
                    if run.token.is_cancelled() { return; }
                    this.process_user(&run, &user_id, to).await;
                });
            }
            while let Some(res) = set.try_join_next() {
                worker_exit(&run, &job_id, res);
            }
            if page.len() < self.cfg.page_size { break; }
        }

        while let Some(res) = set.join_next().await {
            worker_exit(&run, &job_id, res);
        }

        let cancelled = run.token.is_cancelled();
        run.token.cancel();
        let _ = heartbeat.await;
        self.running.remove(&job_id);

        let now = self.clock.now();
        let mut row = run.row.lock().clone();
        run.progress.apply(&mut row);
        row.completed_at = Some(now);
        row.updated_at   = now;
        let summary = format!(
            "{} users scored, {} failed, {} followers processed, {} new signals",
            row.users_scored, row.users_failed, row.processed_followers, row.new_signals_detected
        );
        match fatal {
            Some(e) => {
                row.status  = JobStatus::Failed;
                row.message = format!("population read failed: {e}; {summary}");
                error!(job_id = %job_id, error = %e, "Batch job failed");
            }
            None if cancelled => {
                row.status  = JobStatus::Failed;
                row.message = format!("cancelled; {summary}");
                warn!(job_id = %job_id, "Batch job cancelled");
            }
            None => {
                row.status  = JobStatus::Completed;
                row.message = summary;
                info!(
                    job_id = %job_id,
                    users_scored = row.users_scored,
                    users_failed = row.users_failed,
                    new_signals  = row.new_signals_detected,
                    "Batch job completed"
                );
            }
        }
        if let Err(e) = self.store.update_job(row) {
            warn!(job_id = %job_id, error = %e, "Final job write rejected");
        }
    }

    async fn read_page(
        &self,
        from:   DateTime<Utc>,
        to:     DateTime<Utc>,
        cursor: Option<&EventCursor>,
    ) -> Result<Vec<crate::events::FollowerEvent>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.events_page(from, to, cursor, self.cfg.page_size) {
                Err(e) if e.is_retryable() && attempt <= self.cfg.max_user_retries => {
                    warn!(stage = "population", attempt, error = %e, "Event page read failed, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn process_user(&self, run: &RunningJob, user_id: &str, as_of: DateTime<Utc>) {
        match self.analyze_with_retries(user_id, as_of).await {
            Ok(o) => {
                run.progress.processed_followers.fetch_add(o.followers_scanned, Ordering::Relaxed);
                run.progress.new_signals_detected.fetch_add(o.new_signals, Ordering::Relaxed);
                run.progress.users_scored.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(user_id, stage = e.stage, error = %e.error, "User analysis failed");
                run.progress.users_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        let every = self.cfg.progress_flush_every.max(1);
        if run.progress.users_done() % every == 0 {
            self.flush(run);
        }
    }

    async fn analyze_with_retries(&self, user_id: &str, as_of: DateTime<Utc>) -> std::result::Result<UserOutcome, StageError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let analyzer = self.analyzer.clone();
            let uid      = user_id.to_string();
            let result = tokio::task::spawn_blocking(move || analyzer.analyze_user(&uid, as_of))
                .await
                .unwrap_or_else(|e| Err(StageError {
                    stage: "worker",
                    error: FraudError::FatalJob(format!("analysis task panicked: {e}")),
                }));
            match result {
                Err(e) if e.is_retryable() && attempt <= self.cfg.max_user_retries => {
                    warn!(user_id, stage = e.stage, attempt, error = %e.error, "Retrying user");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    fn backoff(&self, attempt: u32) -> StdDuration {
        StdDuration::from_millis(self.cfg.retry_backoff_ms.saturating_mul(1 << attempt.min(6)))
    }

    /// Write current counters and refresh the heartbeat. A rejected write
    /// means the job was finalized elsewhere (reaped), so work stops.
    fn flush(&self, run: &RunningJob) {
        let mut row = run.row.lock();
        run.progress.apply(&mut row);
        row.updated_at = self.clock.now();
        if let Err(e) = self.store.update_job(row.clone()) {
            warn!(job_id = %row.job_id, error = %e, "Progress flush rejected, stopping job");
            run.token.cancel();
        }
    }
}

fn worker_exit(run: &RunningJob, job_id: &str, res: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        error!(job_id, error = %e, "Batch worker panicked");
        run.progress.users_failed.fetch_add(1, Ordering::Relaxed);
    }
}
