// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job records: the orchestrator's persisted view of a job's execution, its
// state machine, and the progress snapshots published to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BonwerkError, ErrorKind, Result};
use crate::job::PrintJob;
use crate::types::{JobId, PrinterProfile, TransportKind};

/// Lifecycle states of a job attempt.
///
/// ```text
/// Enqueued ──► Running ──► Succeeded | Failed | Cancelled
///    │            ▲
///    └─► Blocked ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, waiting for its turn to run.
    Enqueued,
    /// Waiting behind another job that holds the same printer.
    Blocked,
    /// Operations are being sent to the printer.
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "ENQUEUED",
            Self::Blocked => "BLOCKED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether the attempt is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of `self` within one attempt.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Enqueued, Running)
                | (Enqueued, Blocked)
                | (Blocked, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State as shown to observers.  Identical to [`JobState`] except that a
/// failure which never reached the printer is reported as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedState {
    Enqueued,
    Blocked,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Pending,
}

impl From<JobState> for ReportedState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Enqueued => Self::Enqueued,
            JobState::Blocked => Self::Blocked,
            JobState::Running => Self::Running,
            JobState::Succeeded => Self::Succeeded,
            JobState::Failed => Self::Failed,
            JobState::Cancelled => Self::Cancelled,
        }
    }
}

/// Last-known printer fields and operation counters of a job, echoed back to
/// observers.  Empty until the job first starts running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub connection: Option<TransportKind>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub baud_rate: Option<u32>,
    pub dpi: Option<u32>,
    pub width: Option<f32>,
    pub max_chars: Option<u32>,
    pub operations_completed: u32,
    pub operations_total: u32,
}

impl ProgressSnapshot {
    pub fn from_profile(profile: &PrinterProfile, operations_total: u32) -> Self {
        let address = profile.address();
        Self {
            connection: Some(address.transport),
            address: Some(address.identifier.clone()),
            port: address.port,
            baud_rate: address.baud_rate,
            dpi: Some(profile.dpi()),
            width: Some(profile.printable_width_mm()),
            max_chars: Some(profile.max_line_chars()),
            operations_completed: 0,
            operations_total,
        }
    }

    /// No connection or address detail recorded.
    pub fn is_empty(&self) -> bool {
        self.connection.is_none() && self.address.as_deref().is_none_or(str::is_empty)
    }
}

/// Persisted bookkeeping for one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub tag: String,
    pub state: JobState,
    pub progress: ProgressSnapshot,
    /// Number of attempts that reached `Running`.
    pub run_attempt_count: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    /// Set while a failed job waits for its next automatic attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: &PrintJob) -> Self {
        let now = Utc::now();
        Self {
            job_id: job.id().clone(),
            tag: job.tag().to_owned(),
            state: JobState::Enqueued,
            progress: ProgressSnapshot::default(),
            run_attempt_count: 0,
            last_error: None,
            last_error_kind: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting anything the state machine does not allow.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BonwerkError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if next == JobState::Running {
            self.run_attempt_count += 1;
            self.next_attempt_at = None;
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the cause of a failed attempt and move to `Failed`.
    pub fn fail(&mut self, error: &BonwerkError) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.last_error = Some(error.to_string());
        self.last_error_kind = Some(error.kind());
        Ok(())
    }

    /// Open a new attempt after a failure.  The previous error is kept until
    /// the job eventually succeeds.
    pub fn begin_retry(&mut self) -> Result<()> {
        if self.state != JobState::Failed {
            return Err(BonwerkError::InvalidTransition {
                from: self.state.to_string(),
                to: JobState::Enqueued.to_string(),
            });
        }
        self.state = JobState::Enqueued;
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Put a job left unfinished by a previous process back to `Enqueued`.
    ///
    /// Blocking is per process, so a blocked job simply waits again.  A job
    /// caught mid-run counts as a failed attempt (its printer may have
    /// received part of the output).  A pending retry is reopened.
    pub fn requeue_after_restart(&mut self) -> Result<()> {
        match self.state {
            JobState::Enqueued => return Ok(()),
            JobState::Blocked => {}
            JobState::Running => {
                self.last_error = Some("interrupted before completion".into());
                self.last_error_kind = Some(ErrorKind::OperationFailed);
            }
            JobState::Failed if self.next_attempt_at.is_some() => {}
            _ => {
                return Err(BonwerkError::InvalidTransition {
                    from: self.state.to_string(),
                    to: JobState::Enqueued.to_string(),
                });
            }
        }
        self.state = JobState::Enqueued;
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Failed and not scheduled for another attempt.
    pub fn is_finished(&self) -> bool {
        match self.state {
            JobState::Succeeded | JobState::Cancelled => true,
            JobState::Failed => self.next_attempt_at.is_none(),
            _ => false,
        }
    }

    /// The state observers see.
    ///
    /// A failure with no recorded connection, address, or error never
    /// actually started, so it is reported as `Pending` instead.
    pub fn reported_state(&self) -> ReportedState {
        let no_error = self.last_error.as_deref().is_none_or(str::is_empty);
        if self.state == JobState::Failed && self.progress.is_empty() && no_error {
            ReportedState::Pending
        } else {
            self.state.into()
        }
    }

    pub fn to_progress(&self) -> JobProgress {
        JobProgress {
            job_id: self.job_id.clone(),
            tag: self.tag.clone(),
            state: self.reported_state(),
            run_attempt_count: self.run_attempt_count,
            progress: self.progress.clone(),
            error: self.last_error.clone(),
            retry_scheduled: self.next_attempt_at.is_some(),
        }
    }
}

/// Event published after every operation and state change of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub tag: String,
    pub state: ReportedState,
    pub run_attempt_count: u32,
    pub progress: ProgressSnapshot,
    pub error: Option<String>,
    pub retry_scheduled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceAddress;

    fn job() -> PrintJob {
        let profile = PrinterProfile::new(DeviceAddress::network("10.0.0.5", 9100)).unwrap();
        PrintJob::builder(profile).print_line("A").build()
    }

    #[test]
    fn allowed_transitions_match_state_machine() {
        use JobState::*;
        let all = [Enqueued, Blocked, Running, Succeeded, Failed, Cancelled];
        let allowed = [
            (Enqueued, Running),
            (Enqueued, Blocked),
            (Blocked, Running),
            (Running, Succeeded),
            (Running, Failed),
            (Running, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let mut record = JobRecord::new(&job());
        record.transition(JobState::Running).unwrap();
        record.transition(JobState::Succeeded).unwrap();
        assert!(record.transition(JobState::Running).is_err());
        assert!(record.transition(JobState::Failed).is_err());
        assert_eq!(record.state, JobState::Succeeded);
    }

    #[test]
    fn running_counts_attempts() {
        let mut record = JobRecord::new(&job());
        record.transition(JobState::Blocked).unwrap();
        record.transition(JobState::Running).unwrap();
        assert_eq!(record.run_attempt_count, 1);

        record
            .fail(&BonwerkError::unreachable("10.0.0.5:9100", "refused"))
            .unwrap();
        record.begin_retry().unwrap();
        record.transition(JobState::Running).unwrap();
        assert_eq!(record.run_attempt_count, 2);
        assert!(record.last_error.is_some());
    }

    #[test]
    fn restart_requeues_interrupted_jobs_only() {
        let mut running = JobRecord::new(&job());
        running.transition(JobState::Running).unwrap();
        running.requeue_after_restart().unwrap();
        assert_eq!(running.state, JobState::Enqueued);
        assert_eq!(running.last_error_kind, Some(ErrorKind::OperationFailed));
        assert_eq!(running.run_attempt_count, 1);

        let mut failed = JobRecord::new(&job());
        failed.transition(JobState::Running).unwrap();
        failed
            .fail(&BonwerkError::unreachable("10.0.0.5:9100", "refused"))
            .unwrap();
        assert!(failed.requeue_after_restart().is_err());

        failed.next_attempt_at = Some(Utc::now());
        failed.requeue_after_restart().unwrap();
        assert_eq!(failed.state, JobState::Enqueued);
        assert!(failed.next_attempt_at.is_none());
    }

    #[test]
    fn retry_only_opens_from_failed() {
        let mut record = JobRecord::new(&job());
        assert!(record.begin_retry().is_err());
    }

    #[test]
    fn failure_without_any_detail_reports_pending() {
        let mut record = JobRecord::new(&job());
        record.state = JobState::Failed;
        assert_eq!(record.reported_state(), ReportedState::Pending);
        assert_eq!(record.to_progress().state, ReportedState::Pending);
    }

    #[test]
    fn failure_with_address_or_error_reports_failed() {
        let mut with_address = JobRecord::new(&job());
        with_address.state = JobState::Failed;
        with_address.progress.address = Some("10.0.0.5".into());
        assert_eq!(with_address.reported_state(), ReportedState::Failed);

        let mut with_error = JobRecord::new(&job());
        with_error.state = JobState::Failed;
        with_error.last_error = Some("paper out".into());
        assert_eq!(with_error.reported_state(), ReportedState::Failed);
    }

    #[test]
    fn snapshot_echoes_profile_fields() {
        let job = job();
        let snapshot = ProgressSnapshot::from_profile(job.profile(), 3);
        assert_eq!(snapshot.connection, Some(TransportKind::Network));
        assert_eq!(snapshot.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(snapshot.port, Some(9100));
        assert_eq!(snapshot.operations_total, 3);
        assert!(!snapshot.is_empty());
        assert!(ProgressSnapshot::default().is_empty());
    }
}
