// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background print-job orchestrator.
//
// Every accepted job runs on its own task: wait for its printer, resolve a
// fresh connection, send each operation in order, close the connection, and
// possibly come back for another attempt.  The task is the only writer of
// its job's record; every change is persisted and published to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard, broadcast};
use tracing::{debug, error, info, instrument, warn};

use bonwerk_bridge::PlatformBridge;
use bonwerk_core::config::RetryConfig;
use bonwerk_core::error::{BonwerkError, ErrorKind, Result};
use bonwerk_core::{
    DeviceAddress, JobId, JobProgress, JobRecord, JobState, PrintJob, PrintOperation,
    PrinterProfile, ProgressSnapshot,
};

use crate::connection::ConnectionHandle;
use crate::resolver::Resolve;
use crate::retry::{RetryDecision, should_retry};
use crate::store::JobStore;

/// Buffered progress events per subscriber before it starts lagging.
const PROGRESS_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cooperative cancellation flag for one live job.
#[derive(Default)]
struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

/// How one attempt ended.
enum AttemptEnd {
    Succeeded,
    Cancelled,
    Failed(ErrorKind),
}

struct Inner {
    resolver: Arc<dyn Resolve>,
    bridge: Arc<dyn PlatformBridge>,
    retry: RetryConfig,
    store: Mutex<JobStore>,
    progress: broadcast::Sender<JobProgress>,
    /// One lock per printer; jobs for the same address queue on it in
    /// submission order.
    printers: Mutex<HashMap<DeviceAddress, Arc<AsyncMutex<()>>>>,
    live: Mutex<HashMap<JobId, Arc<CancelToken>>>,
}

/// Accepts print jobs and runs them in the background.
///
/// Cheap to clone; clones share the same jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(
        resolver: Arc<dyn Resolve>,
        bridge: Arc<dyn PlatformBridge>,
        store: JobStore,
        retry: RetryConfig,
    ) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                resolver,
                bridge,
                retry,
                store: Mutex::new(store),
                progress,
                printers: Mutex::new(HashMap::new()),
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Progress events for every job: one per state change and one per
    /// completed operation.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.inner.progress.subscribe()
    }

    /// Accept `job` and start running it in the background.
    ///
    /// Submitting a job whose id is already known is a no-op that returns
    /// the same id.  Must be called from within a Tokio runtime.
    #[instrument(skip(self, job), fields(job_id = %job.id()))]
    pub fn enqueue(&self, job: PrintJob) -> Result<JobId> {
        let id = job.id().clone();
        let record = JobRecord::new(&job);
        if !lock(&self.inner.store).insert(&job, &record)? {
            debug!("job already known, ignoring duplicate submission");
            return Ok(id);
        }
        info!(tag = job.tag(), operations = job.execution_plan().len(), "job enqueued");
        self.inner.publish(&record);
        self.spawn(job, record, None);
        Ok(id)
    }

    /// Re-enqueue jobs a previous process left unfinished.  Returns how many
    /// were picked up.
    pub fn recover(&self) -> Result<usize> {
        let unfinished = lock(&self.inner.store).unfinished()?;
        let mut recovered = 0;
        for stored in unfinished {
            let id = stored.record.job_id.clone();
            if lock(&self.inner.live).contains_key(&id) {
                continue;
            }
            let mut record = stored.record;
            let delay = record
                .next_attempt_at
                .and_then(|at| (at - Utc::now()).to_std().ok());
            if let Err(e) = record.requeue_after_restart() {
                warn!(job_id = %id, error = %e, "cannot recover job");
                continue;
            }
            self.inner.save(&record);
            info!(job_id = %id, "recovered unfinished job");
            self.spawn(stored.job, record, delay);
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Ask a job to stop.
    ///
    /// A running job finishes the operation in flight, skips the rest and
    /// ends `Cancelled`.  A job waiting for its printer or for its first
    /// attempt ends `Cancelled` without connecting.  A job waiting for a
    /// retry stays `Failed` and is not attempted again.  Cancelling a job
    /// that already ended does nothing.
    pub fn cancel(&self, id: &JobId) -> Result<()> {
        if let Some(token) = lock(&self.inner.live).get(id) {
            info!(job_id = %id, "cancel requested");
            token.cancel();
            return Ok(());
        }
        match lock(&self.inner.store).get(id)? {
            Some(_) => {
                debug!(job_id = %id, "cancel ignored, job is not live");
                Ok(())
            }
            None => Err(BonwerkError::JobNotFound(id.to_string())),
        }
    }

    /// Remove the records of finished jobs.  Returns how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let removed = lock(&self.inner.store).prune_finished()?;
        Ok(removed.len())
    }

    pub fn record(&self, id: &JobId) -> Result<Option<JobRecord>> {
        Ok(lock(&self.inner.store).get(id)?.map(|stored| stored.record))
    }

    /// What an observer polling `id` sees right now.
    pub fn progress(&self, id: &JobId) -> Result<Option<JobProgress>> {
        Ok(self.record(id)?.map(|record| record.to_progress()))
    }

    /// Every known record, newest first.
    pub fn records(&self) -> Result<Vec<JobRecord>> {
        Ok(lock(&self.inner.store)
            .all()?
            .into_iter()
            .map(|stored| stored.record)
            .collect())
    }

    /// Ids of jobs that are running, waiting for their printer, or waiting
    /// to be retried.
    pub fn active(&self) -> Vec<JobId> {
        lock(&self.inner.live).keys().cloned().collect()
    }

    fn spawn(&self, job: PrintJob, record: JobRecord, delay: Option<Duration>) {
        let token = Arc::new(CancelToken::default());
        lock(&self.inner.live).insert(job.id().clone(), Arc::clone(&token));
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let id = job.id().clone();
            if let Err(e) = inner.run(&job, record, &token, delay).await {
                error!(job_id = %id, error = %e, "job task aborted");
            }
            lock(&inner.live).remove(&id);
        });
    }
}

impl Inner {
    /// Persist `record` and tell subscribers.  A store failure is logged
    /// but does not stop the job.
    fn save(&self, record: &JobRecord) {
        if let Err(e) = lock(&self.store).save_record(record) {
            error!(job_id = %record.job_id, error = %e, "failed to persist job record");
        }
        self.publish(record);
    }

    fn publish(&self, record: &JobRecord) {
        // No subscribers is fine.
        let _ = self.progress.send(record.to_progress());
    }

    fn printer_lock(&self, address: &DeviceAddress) -> Arc<AsyncMutex<()>> {
        Arc::clone(lock(&self.printers).entry(address.clone()).or_default())
    }

    /// Drop the lock for `address` once no job holds or waits on it.
    fn forget_idle_printer(&self, address: &DeviceAddress) {
        let mut printers = lock(&self.printers);
        if printers.get(address).is_some_and(|p| Arc::strong_count(p) == 1) {
            printers.remove(address);
        }
    }

    /// Attempts until success, cancellation, or a failure that is not
    /// retried.
    async fn run(
        &self,
        job: &PrintJob,
        mut record: JobRecord,
        token: &CancelToken,
        mut delay: Option<Duration>,
    ) -> Result<()> {
        loop {
            if let Some(wait) = delay.take() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = token.wait() => {
                        if record.state == JobState::Failed {
                            info!(job_id = %record.job_id, "retry cancelled");
                            record.next_attempt_at = None;
                            record.updated_at = Utc::now();
                            self.save(&record);
                            return Ok(());
                        }
                    }
                }
                if record.state == JobState::Failed {
                    record.begin_retry()?;
                    self.save(&record);
                }
            }

            let kind = match self.attempt(job, &mut record, token).await? {
                AttemptEnd::Succeeded | AttemptEnd::Cancelled => return Ok(()),
                AttemptEnd::Failed(kind) => kind,
            };

            // The failed state is published once, together with whether
            // another attempt follows.
            match should_retry(kind, record.run_attempt_count, &self.retry) {
                RetryDecision::RetryAfter(wait) if !token.is_cancelled() => {
                    let wait_ms = i64::try_from(wait.as_millis()).unwrap_or(i64::MAX);
                    record.next_attempt_at =
                        Some(Utc::now() + chrono::Duration::milliseconds(wait_ms));
                    self.save(&record);
                    info!(
                        job_id = %record.job_id,
                        attempt = record.run_attempt_count,
                        delay_ms = wait_ms,
                        "job will be retried"
                    );
                    delay = Some(wait);
                }
                _ => {
                    self.save(&record);
                    return Ok(());
                }
            }
        }
    }

    /// One attempt: wait for the printer, connect, send, close.  A failed
    /// attempt is left for the caller to persist.
    async fn attempt(
        &self,
        job: &PrintJob,
        record: &mut JobRecord,
        token: &CancelToken,
    ) -> Result<AttemptEnd> {
        let address = job.profile().address();
        let end = self
            .attempt_on(self.printer_lock(address), job, record, token)
            .await;
        self.forget_idle_printer(address);
        end
    }

    async fn attempt_on(
        &self,
        printer: Arc<AsyncMutex<()>>,
        job: &PrintJob,
        record: &mut JobRecord,
        token: &CancelToken,
    ) -> Result<AttemptEnd> {
        let address = job.profile().address();
        let _guard: OwnedMutexGuard<()> = match Arc::clone(&printer).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                record.transition(JobState::Blocked)?;
                self.save(record);
                debug!(job_id = %record.job_id, addr = %address, "waiting for printer");
                tokio::select! {
                    guard = printer.lock_owned() => guard,
                    _ = token.wait() => return self.cancel_before_start(record),
                }
            }
        };

        if token.is_cancelled() {
            return self.cancel_before_start(record);
        }

        let plan = job.execution_plan();
        record.transition(JobState::Running)?;
        record.progress = ProgressSnapshot::from_profile(
            job.profile(),
            u32::try_from(plan.len()).unwrap_or(u32::MAX),
        );
        self.save(record);
        info!(job_id = %record.job_id, attempt = record.run_attempt_count, addr = %address, "job running");

        let mut handle = match self.resolver.resolve(address).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(job_id = %record.job_id, error = %e, "could not connect to printer");
                record.fail(&e)?;
                return Ok(AttemptEnd::Failed(e.kind()));
            }
        };

        let outcome = self.execute(job.profile(), &plan, handle.as_mut(), record, token).await;

        if let Err(e) = handle.close().await {
            warn!(job_id = %record.job_id, error = %e, "closing printer connection failed");
        }

        let end = match outcome {
            Ok(true) => {
                record.transition(JobState::Succeeded)?;
                info!(job_id = %record.job_id, "job succeeded");
                AttemptEnd::Succeeded
            }
            Ok(false) => {
                record.transition(JobState::Cancelled)?;
                info!(job_id = %record.job_id, "job cancelled");
                AttemptEnd::Cancelled
            }
            Err(e) => {
                warn!(job_id = %record.job_id, error = %e, "job attempt failed");
                record.fail(&e)?;
                AttemptEnd::Failed(e.kind())
            }
        };
        if !matches!(end, AttemptEnd::Failed(_)) {
            self.save(record);
        }
        Ok(end)
    }

    /// Send every operation in order.  `Ok(false)` if cancellation cut the
    /// sequence short.
    async fn execute(
        &self,
        profile: &PrinterProfile,
        plan: &[PrintOperation],
        handle: &mut dyn ConnectionHandle,
        record: &mut JobRecord,
        token: &CancelToken,
    ) -> Result<bool> {
        for operation in plan {
            if token.is_cancelled() {
                return Ok(false);
            }
            self.send_operation(profile, operation, handle).await?;
            record.progress.operations_completed += 1;
            record.updated_at = Utc::now();
            self.save(record);
        }
        Ok(true)
    }

    async fn send_operation(
        &self,
        profile: &PrinterProfile,
        operation: &PrintOperation,
        handle: &mut dyn ConnectionHandle,
    ) -> Result<()> {
        let failed = |detail: String| BonwerkError::OperationFailed {
            operation: operation.name().into(),
            detail,
        };
        // Encoding is deterministic, so its errors keep their own kind and
        // are never retried as a transmission failure.
        let bytes = self.bridge.encode(operation, profile).inspect_err(|e| {
            warn!(operation = operation.name(), error = %e, "operation could not be encoded");
        })?;
        handle.send(&bytes).await.map_err(|e| match e {
            BonwerkError::Timeout { .. } => e,
            other => failed(other.to_string()),
        })?;
        debug!(operation = operation.name(), bytes = bytes.len(), "operation sent");
        Ok(())
    }

    /// Cancelled before any connection was made.  The record still passes
    /// through `Running` so the state machine holds.
    fn cancel_before_start(&self, record: &mut JobRecord) -> Result<AttemptEnd> {
        record.transition(JobState::Running)?;
        record.transition(JobState::Cancelled)?;
        self.save(record);
        info!(job_id = %record.job_id, "job cancelled before it started");
        Ok(AttemptEnd::Cancelled)
    }
}
