//! Job intake and terminal-state persistence.
//!
//! [`DirJobQueue`] keeps one JSON file per job under `pending/`, moves a job
//! to `running/` when a worker claims it, and writes the final record plus
//! variant images under `done/<job_id>/`. Several worker processes may share
//! one queue directory; a claim is a rename, so each job runs once per
//! attempt. A claim holds a lease: jobs left in `running/` past it (a worker
//! died, or persisting the result failed) go back to `pending/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thumbforge_contracts::events::{now_utc_iso, EventPayload, EventWriter};
use thumbforge_contracts::jobs::{
    new_job_id, read_job_record, write_job_record, JobRecord, JobStatus, VariantRecord, VersionFailure,
};
use thumbforge_contracts::request::GenerationRequest;

use crate::engine::ThumbforgeEngine;
use crate::error::EngineError;
use crate::pipeline::PipelineOutcome;

/// Exponential backoff between attempts of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempts` completed ones.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts.max(1)
    }
}

/// A job waiting in (or claimed from) the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob {
    pub job_id: String,
    pub request: GenerationRequest,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: String,
    /// RFC 3339; the job is not claimable before this instant.
    #[serde(default)]
    pub not_before: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// RFC 3339; set while the job sits in `running/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<String>,
}

impl PendingJob {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            job_id: new_job_id(),
            request,
            attempts: 0,
            created_at: now_utc_iso(),
            not_before: None,
            last_error: None,
            claimed_at: None,
        }
    }

    pub fn ready_at(&self, now: DateTime<Utc>) -> bool {
        match self.not_before.as_deref().map(DateTime::parse_from_rfc3339) {
            Some(Ok(at)) => at.with_timezone(&Utc) <= now,
            // Unparseable timestamps never block a job.
            Some(Err(_)) | None => true,
        }
    }
}

pub trait JobQueue {
    fn submit(&self, request: GenerationRequest) -> Result<String>;

    /// Oldest job whose backoff has elapsed, now owned by the caller.
    fn claim(&self, now: DateTime<Utc>) -> Result<Option<PendingJob>>;

    fn complete(&self, job: &PendingJob, outcome: &PipelineOutcome) -> Result<JobRecord>;

    /// Put a claimed job back with a later `not_before`.
    fn requeue(&self, job: PendingJob, not_before: DateTime<Utc>, error: &str) -> Result<()>;

    /// Return claimed jobs whose lease ran out before `now` to the queue.
    fn reclaim_stale(&self, now: DateTime<Utc>, lease: Duration) -> Result<Vec<String>>;

    fn fail(&self, job: &PendingJob, error: &str, failures: Vec<VersionFailure>) -> Result<JobRecord>;

    fn status(&self, job_id: &str) -> Result<Option<JobStatus>>;
}

#[derive(Debug, Clone)]
pub struct DirJobQueue {
    root: PathBuf,
}

impl DirJobQueue {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in ["pending", "running", "done"] {
            fs::create_dir_all(root.join(dir))
                .with_context(|| format!("failed creating queue dir {}", root.join(dir).display()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pending_path(&self, job_id: &str) -> PathBuf {
        self.root.join("pending").join(format!("{job_id}.json"))
    }

    fn running_path(&self, job_id: &str) -> PathBuf {
        self.root.join("running").join(format!("{job_id}.json"))
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("done").join(job_id)
    }

    pub fn record_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("job.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    fn write_pending(&self, job: &PendingJob) -> Result<()> {
        write_job_file(&self.pending_path(&job.job_id), job)
    }

    fn pending_jobs(&self) -> Result<Vec<PendingJob>> {
        let mut jobs = self.read_jobs("pending")?;
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(jobs)
    }

    fn read_jobs(&self, dir: &str) -> Result<Vec<PendingJob>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(self.root.join(dir))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_str::<PendingJob>(&raw).map_err(anyhow::Error::from));
            match parsed {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable queue entry")
                }
            }
        }
        Ok(jobs)
    }

    /// When the claim started; falls back to the file's mtime for entries
    /// written without `claimed_at`.
    fn claimed_since(&self, job: &PendingJob) -> Option<DateTime<Utc>> {
        if let Some(Ok(at)) = job.claimed_at.as_deref().map(DateTime::parse_from_rfc3339) {
            return Some(at.with_timezone(&Utc));
        }
        fs::metadata(self.running_path(&job.job_id))
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    fn finish(&self, job: &PendingJob, record: &JobRecord) -> Result<()> {
        write_job_record(&self.record_path(&job.job_id), record)?;
        let running = self.running_path(&job.job_id);
        if running.exists() {
            fs::remove_file(&running)
                .with_context(|| format!("failed removing {}", running.display()))?;
        }
        Ok(())
    }

    fn base_record(&self, job: &PendingJob, status: JobStatus) -> JobRecord {
        let mut record = JobRecord::queued(job.job_id.clone(), job.request.clone(), job.created_at.clone());
        record.status = status;
        record.attempts = job.attempts;
        record.finished_at = Some(now_utc_iso());
        record
    }
}

impl JobQueue for DirJobQueue {
    fn submit(&self, request: GenerationRequest) -> Result<String> {
        let job = PendingJob::new(request);
        self.write_pending(&job)?;
        tracing::info!(job_id = %job.job_id, "job submitted");
        Ok(job.job_id)
    }

    fn claim(&self, now: DateTime<Utc>) -> Result<Option<PendingJob>> {
        for mut job in self.pending_jobs()? {
            if !job.ready_at(now) {
                continue;
            }
            // Lost races surface as a missing source file.
            let running = self.running_path(&job.job_id);
            if fs::rename(self.pending_path(&job.job_id), &running).is_err() {
                continue;
            }
            job.claimed_at = Some(now.to_rfc3339_opts(SecondsFormat::Secs, true));
            write_job_file(&running, &job)?;
            return Ok(Some(job));
        }
        Ok(None)
    }

    fn complete(&self, job: &PendingJob, outcome: &PipelineOutcome) -> Result<JobRecord> {
        let dir = self.job_dir(&job.job_id);
        fs::create_dir_all(&dir).with_context(|| format!("failed creating {}", dir.display()))?;
        let mut record = self.base_record(job, JobStatus::Completed);
        for variant in &outcome.variants {
            let file_name = format!("variant-{}.{}", variant.label, extension_for(&variant.mime));
            let path = dir.join(&file_name);
            fs::write(&path, &variant.image)
                .with_context(|| format!("failed writing {}", path.display()))?;
            record.variants.push(VariantRecord {
                label: variant.label.clone(),
                image_path: path.to_string_lossy().to_string(),
                backend: variant.backend.clone(),
                quality: variant.quality.clone(),
                text_layout: variant.text_layout.clone(),
            });
        }
        record.pipeline_version = Some(outcome.pipeline_version);
        record.prior_failures = outcome.prior_failures.clone();
        record.warnings = outcome.warnings.clone();
        self.finish(job, &record)?;
        Ok(record)
    }

    fn requeue(&self, mut job: PendingJob, not_before: DateTime<Utc>, error: &str) -> Result<()> {
        job.not_before = Some(not_before.to_rfc3339_opts(SecondsFormat::Secs, true));
        job.last_error = Some(error.to_string());
        job.claimed_at = None;
        self.write_pending(&job)?;
        let running = self.running_path(&job.job_id);
        if running.exists() {
            fs::remove_file(&running)
                .with_context(|| format!("failed removing {}", running.display()))?;
        }
        Ok(())
    }

    fn reclaim_stale(&self, now: DateTime<Utc>, lease: Duration) -> Result<Vec<String>> {
        let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut reclaimed = Vec::new();
        for mut job in self.read_jobs("running")? {
            let running = self.running_path(&job.job_id);
            // A record in done/ means only the final cleanup was lost.
            if self.record_path(&job.job_id).exists() {
                fs::remove_file(&running)
                    .with_context(|| format!("failed removing {}", running.display()))?;
                continue;
            }
            let Some(since) = self.claimed_since(&job) else {
                continue;
            };
            if since.checked_add_signed(lease).is_some_and(|expires| expires > now) {
                continue;
            }
            // The abandoned run counts as an attempt.
            job.attempts += 1;
            job.claimed_at = None;
            job.last_error = Some(format!("lease expired after claim at {}", since.to_rfc3339()));
            self.write_pending(&job)?;
            fs::remove_file(&running)
                .with_context(|| format!("failed removing {}", running.display()))?;
            tracing::warn!(job_id = %job.job_id, attempts = job.attempts, "reclaimed stale job");
            reclaimed.push(job.job_id);
        }
        Ok(reclaimed)
    }

    fn fail(&self, job: &PendingJob, error: &str, failures: Vec<VersionFailure>) -> Result<JobRecord> {
        let mut record = self.base_record(job, JobStatus::Failed);
        record.failure_message = Some(error.to_string());
        record.prior_failures = failures;
        self.finish(job, &record)?;
        Ok(record)
    }

    fn status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        let record_path = self.record_path(job_id);
        if record_path.exists() {
            return Ok(Some(read_job_record(&record_path)?.status));
        }
        if self.running_path(job_id).exists() {
            return Ok(Some(JobStatus::Running));
        }
        if self.pending_path(job_id).exists() {
            return Ok(Some(JobStatus::Queued));
        }
        Ok(None)
    }
}

fn write_job_file(path: &Path, job: &PendingJob) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(job)?)
        .with_context(|| format!("failed writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { job_id: String },
    Requeued { job_id: String, attempts: u32 },
    Failed { job_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
}

/// Runs claimed jobs one at a time against a shared engine.
pub struct Worker<'a, Q: JobQueue> {
    engine: &'a ThumbforgeEngine,
    queue: &'a Q,
    policy: RetryPolicy,
    lease: Duration,
    events: EventWriter,
}

/// How long a claimed job may stay in `running/` before another worker takes it back.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30 * 60);

impl<'a, Q: JobQueue> Worker<'a, Q> {
    pub fn new(engine: &'a ThumbforgeEngine, queue: &'a Q, events: EventWriter) -> Self {
        Self {
            engine,
            queue,
            policy: RetryPolicy::default(),
            lease: DEFAULT_LEASE,
            events,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run_once(&self) -> Result<Option<JobOutcome>> {
        self.run_once_at(Utc::now())
    }

    pub fn run_once_at(&self, now: DateTime<Utc>) -> Result<Option<JobOutcome>> {
        for job_id in self.queue.reclaim_stale(now, self.lease)? {
            let mut payload = EventPayload::new();
            payload.insert("reason".to_string(), json!("lease_expired"));
            if let Err(err) = self.events.for_job(job_id).emit("job_requeued", payload) {
                tracing::warn!(error = %err, "failed to write job_requeued event");
            }
        }
        let Some(mut job) = self.queue.claim(now)? else {
            return Ok(None);
        };
        job.attempts += 1;
        let events = self.events.for_job(job.job_id.clone());
        tracing::info!(job_id = %job.job_id, attempt = job.attempts, "job claimed");

        let err = match self.engine.generate(&job.request, &events) {
            Ok(outcome) => {
                self.queue.complete(&job, &outcome)?;
                return Ok(Some(JobOutcome::Completed { job_id: job.job_id }));
            }
            Err(err) => err,
        };

        let message = err.to_string();
        let retryable = !matches!(err, EngineError::InvalidRequest(_));
        if retryable && !self.policy.exhausted(job.attempts) {
            let delay = self.policy.delay_after(job.attempts);
            let not_before = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
            let mut payload = EventPayload::new();
            payload.insert("attempts".to_string(), json!(job.attempts));
            payload.insert("retry_in_s".to_string(), json!(delay.as_secs_f64()));
            payload.insert("error".to_string(), json!(message));
            if let Err(err) = events.emit("job_requeued", payload) {
                tracing::warn!(error = %err, "failed to write job_requeued event");
            }
            let (job_id, attempts) = (job.job_id.clone(), job.attempts);
            self.queue.requeue(job, not_before, &message)?;
            return Ok(Some(JobOutcome::Requeued { job_id, attempts }));
        }

        let failures = match err {
            EngineError::AllPipelineVersionsFailed { failures, .. } => failures,
            _ => Vec::new(),
        };
        self.queue.fail(&job, &message, failures)?;
        Ok(Some(JobOutcome::Failed { job_id: job.job_id }))
    }

    /// Drain every job that is ready now. Jobs waiting on backoff are left
    /// for a later call.
    pub fn run_until_idle(&self, max_jobs: Option<usize>) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        let mut handled = 0usize;
        while max_jobs.map(|limit| handled < limit).unwrap_or(true) {
            let Some(outcome) = self.run_once()? else {
                break;
            };
            handled += 1;
            match outcome {
                JobOutcome::Completed { .. } => summary.completed += 1,
                JobOutcome::Requeued { .. } => summary.requeued += 1,
                JobOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use thumbforge_contracts::request::ReferenceImage;

    use super::*;
    use crate::backends::{BackendSet, DryrunBackend};
    use crate::config::EngineConfig;

    fn small_config() -> EngineConfig {
        EngineConfig {
            output_width: 256,
            output_height: 144,
            ..EngineConfig::default()
        }
    }

    fn failing_engine() -> anyhow::Result<ThumbforgeEngine> {
        let config = small_config();
        let tables = config.tables()?;
        let mut backends = BackendSet::new();
        for id in tables.backends.ids() {
            backends.register(DryrunBackend::new(id).always_failing());
        }
        Ok(ThumbforgeEngine::new(config, tables, backends))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(35),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(2), Duration::from_secs(20));
        assert_eq!(policy.delay_after(3), Duration::from_secs(35));
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }

    #[test]
    fn completed_job_persists_record_and_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        let engine = ThumbforgeEngine::dryrun(small_config())?;
        let mut request = GenerationRequest::new("retro console restoration");
        request.text = Some("SAVED IT".to_string());
        let job_id = queue.submit(request)?;
        assert_eq!(queue.status(&job_id)?, Some(JobStatus::Queued));

        let worker = Worker::new(&engine, &queue, EventWriter::new(queue.events_path(), "worker"));
        let summary = worker.run_until_idle(None)?;
        assert_eq!(summary.completed, 1);

        let record = read_job_record(&queue.record_path(&job_id))?;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 1);
        assert!(record.pipeline_version.is_some());
        assert_eq!(record.variants[0].label, "A");
        assert!(Path::new(&record.variants[0].image_path).exists());
        assert!(queue.pending_jobs()?.is_empty());
        Ok(())
    }

    #[test]
    fn failures_back_off_then_persist_failed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        let engine = failing_engine()?;
        let job_id = queue.submit(GenerationRequest::new("doomed"))?;
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
        };
        let worker = Worker::new(&engine, &queue, EventWriter::disabled("worker")).with_policy(policy);

        let now = Utc::now();
        assert_eq!(
            worker.run_once_at(now)?,
            Some(JobOutcome::Requeued {
                job_id: job_id.clone(),
                attempts: 1
            })
        );
        assert_eq!(queue.status(&job_id)?, Some(JobStatus::Queued));
        assert_eq!(worker.run_once_at(now + chrono::Duration::seconds(30))?, None);

        let later = now + chrono::Duration::seconds(61);
        assert_eq!(
            worker.run_once_at(later)?,
            Some(JobOutcome::Failed {
                job_id: job_id.clone()
            })
        );
        let record = read_job_record(&queue.record_path(&job_id))?;
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.prior_failures.len(), 4);
        assert!(record
            .failure_message
            .as_deref()
            .is_some_and(|message| message.contains("all pipeline versions failed")));
        Ok(())
    }

    #[test]
    fn invalid_requests_are_not_retried() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        let engine = ThumbforgeEngine::dryrun(small_config())?;
        let mut request = GenerationRequest::new("too many");
        request.variant_count = 9;
        let job_id = queue.submit(request)?;
        let worker = Worker::new(&engine, &queue, EventWriter::disabled("worker"));
        assert_eq!(worker.run_once()?, Some(JobOutcome::Failed { job_id: job_id.clone() }));
        assert_eq!(queue.status(&job_id)?, Some(JobStatus::Failed));
        Ok(())
    }

    #[test]
    fn claim_takes_oldest_ready_job_once() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        let mut first = PendingJob::new(GenerationRequest::new("first"));
        first.created_at = "2026-01-01T00:00:00.000000+00:00".to_string();
        let mut second = PendingJob::new(GenerationRequest::new("second"));
        second.created_at = "2026-01-02T00:00:00.000000+00:00".to_string();
        queue.write_pending(&second)?;
        queue.write_pending(&first)?;

        let now = Utc::now();
        let claimed = queue.claim(now)?.map(|job| job.job_id);
        assert_eq!(claimed, Some(first.job_id.clone()));
        assert_eq!(queue.status(&first.job_id)?, Some(JobStatus::Running));
        assert_eq!(queue.claim(now)?.map(|job| job.job_id), Some(second.job_id));
        assert!(queue.claim(now)?.is_none());
        Ok(())
    }

    #[test]
    fn pending_files_keep_reference_faces_across_retries() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        let mut request = GenerationRequest::new("face job");
        request.reference_faces.push(ReferenceImage {
            bytes: vec![7, 8, 9],
            mime: "image/png".to_string(),
        });
        queue.submit(request)?;
        let now = Utc::now();
        let job = queue.claim(now)?.ok_or_else(|| anyhow::anyhow!("nothing claimed"))?;
        queue.requeue(job, now, "transient")?;
        let again = queue.claim(now)?.ok_or_else(|| anyhow::anyhow!("nothing requeued"))?;
        assert_eq!(again.request.reference_faces[0].bytes, vec![7, 8, 9]);
        assert_eq!(again.last_error.as_deref(), Some("transient"));
        Ok(())
    }

    #[test]
    fn stale_running_jobs_return_after_lease() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        let job_id = queue.submit(GenerationRequest::new("abandoned"))?;
        let claimed_at = Utc::now();
        let claimed = queue.claim(claimed_at)?.ok_or_else(|| anyhow::anyhow!("nothing claimed"))?;
        assert!(claimed.claimed_at.is_some());

        let lease = Duration::from_secs(15 * 60);
        assert!(queue
            .reclaim_stale(claimed_at + chrono::Duration::minutes(10), lease)?
            .is_empty());
        assert_eq!(queue.status(&job_id)?, Some(JobStatus::Running));

        let later = claimed_at + chrono::Duration::minutes(16);
        assert_eq!(queue.reclaim_stale(later, lease)?, vec![job_id.clone()]);
        assert_eq!(queue.status(&job_id)?, Some(JobStatus::Queued));

        let again = queue.claim(later)?.ok_or_else(|| anyhow::anyhow!("nothing reclaimed"))?;
        assert_eq!(again.attempts, 1);
        assert!(again
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("lease expired")));
        Ok(())
    }

    #[test]
    fn worker_finishes_job_abandoned_by_another_worker() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        let engine = ThumbforgeEngine::dryrun(small_config())?;
        let job_id = queue.submit(GenerationRequest::new("crashed mid-run"))?;
        let claimed_at = Utc::now();
        assert!(queue.claim(claimed_at)?.is_some());

        let worker = Worker::new(&engine, &queue, EventWriter::disabled("worker"))
            .with_lease(Duration::from_secs(60));
        assert_eq!(worker.run_once_at(claimed_at + chrono::Duration::seconds(30))?, None);
        assert_eq!(
            worker.run_once_at(claimed_at + chrono::Duration::seconds(90))?,
            Some(JobOutcome::Completed {
                job_id: job_id.clone()
            })
        );
        let record = read_job_record(&queue.record_path(&job_id))?;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 2);
        assert!(!queue.running_path(&job_id).exists());
        Ok(())
    }

    #[test]
    fn unknown_job_has_no_status() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let queue = DirJobQueue::open(temp.path())?;
        assert_eq!(queue.status("job-missing")?, None);
        Ok(())
    }
}
