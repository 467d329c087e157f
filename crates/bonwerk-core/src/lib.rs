// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk — Core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod job;
pub mod record;
pub mod types;

pub use config::AppConfig;
pub use error::BonwerkError;
pub use job::{PrintJob, PrintJobBuilder, PrintOperation};
pub use record::{JobProgress, JobRecord, JobState, ProgressSnapshot, ReportedState};
pub use types::*;
