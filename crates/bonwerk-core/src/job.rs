// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print jobs: an ordered sequence of print operations bound to a printer
// profile, assembled through a builder and frozen on `build`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, PrinterProfile};

/// Tag applied to jobs when the caller does not choose one.
pub const DEFAULT_JOB_TAG: &str = "printing-job";

/// A single step of a print job.  Encoding into device bytes is the native
/// driver's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "camelCase")]
pub enum PrintOperation {
    InitializePrinter,
    PrintLine(String),
    FeedPaper(u32),
    CutPaper,
    OpenCashDrawer,
}

impl PrintOperation {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitializePrinter => "initializePrinter",
            Self::PrintLine(_) => "printLine",
            Self::FeedPaper(_) => "feedPaper",
            Self::CutPaper => "cutPaper",
            Self::OpenCashDrawer => "openCashDrawer",
        }
    }
}

/// An immutable unit of print work.
///
/// The operation list is shared behind an `Arc<[_]>`, so clones are cheap and
/// nothing can reach into a built job to change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    id: JobId,
    profile: PrinterProfile,
    operations: Arc<[PrintOperation]>,
    cut_on_complete: bool,
    open_drawer_on_complete: bool,
    tag: String,
}

impl PrintJob {
    pub fn builder(profile: PrinterProfile) -> PrintJobBuilder {
        PrintJobBuilder::new(profile)
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn profile(&self) -> &PrinterProfile {
        &self.profile
    }

    /// Operations exactly as the caller added them.
    pub fn operations(&self) -> &[PrintOperation] {
        &self.operations
    }

    pub fn cut_on_complete(&self) -> bool {
        self.cut_on_complete
    }

    pub fn open_drawer_on_complete(&self) -> bool {
        self.open_drawer_on_complete
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The sequence the orchestrator runs: the caller's operations followed
    /// by the completion cut and drawer kick when requested.
    pub fn execution_plan(&self) -> Vec<PrintOperation> {
        let mut plan = self.operations.to_vec();
        if self.cut_on_complete {
            plan.push(PrintOperation::CutPaper);
        }
        if self.open_drawer_on_complete {
            plan.push(PrintOperation::OpenCashDrawer);
        }
        plan
    }
}

/// Accumulates operations for a [`PrintJob`].
///
/// `build` snapshots the builder; the builder can keep being used afterwards
/// without affecting jobs it already produced.
#[derive(Debug, Clone)]
pub struct PrintJobBuilder {
    id: Option<JobId>,
    profile: PrinterProfile,
    operations: Vec<PrintOperation>,
    cut_on_complete: bool,
    open_drawer_on_complete: bool,
    tag: String,
}

impl PrintJobBuilder {
    pub fn new(profile: PrinterProfile) -> Self {
        Self {
            id: None,
            profile,
            operations: Vec::new(),
            cut_on_complete: false,
            open_drawer_on_complete: false,
            tag: DEFAULT_JOB_TAG.to_owned(),
        }
    }

    /// Use a caller-chosen job id instead of a generated one.
    pub fn id(&mut self, id: impl Into<JobId>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    pub fn initialize_printer(&mut self) -> &mut Self {
        self.push(PrintOperation::InitializePrinter)
    }

    pub fn print_line(&mut self, text: impl Into<String>) -> &mut Self {
        self.push(PrintOperation::PrintLine(text.into()))
    }

    pub fn feed_paper(&mut self, lines: u32) -> &mut Self {
        self.push(PrintOperation::FeedPaper(lines))
    }

    pub fn cut_paper(&mut self) -> &mut Self {
        self.push(PrintOperation::CutPaper)
    }

    pub fn open_cash_drawer(&mut self) -> &mut Self {
        self.push(PrintOperation::OpenCashDrawer)
    }

    pub fn push(&mut self, operation: PrintOperation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    pub fn cut_on_complete(&mut self, cut: bool) -> &mut Self {
        self.cut_on_complete = cut;
        self
    }

    pub fn open_drawer_on_complete(&mut self, open: bool) -> &mut Self {
        self.open_drawer_on_complete = open;
        self
    }

    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tag = tag.into();
        self
    }

    /// Freeze the current state into a job.  Without an explicit id each
    /// call produces a job with a fresh id.
    pub fn build(&self) -> PrintJob {
        PrintJob {
            id: self.id.clone().unwrap_or_default(),
            profile: self.profile.clone(),
            operations: Arc::from(self.operations.as_slice()),
            cut_on_complete: self.cut_on_complete,
            open_drawer_on_complete: self.open_drawer_on_complete,
            tag: self.tag.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceAddress;

    fn profile() -> PrinterProfile {
        PrinterProfile::new(DeviceAddress::network("10.0.0.5", 9100)).unwrap()
    }

    #[test]
    fn builder_preserves_operation_order() {
        let job = PrintJob::builder(profile())
            .initialize_printer()
            .print_line("A")
            .feed_paper(3)
            .cut_paper()
            .build();

        assert_eq!(
            job.operations(),
            &[
                PrintOperation::InitializePrinter,
                PrintOperation::PrintLine("A".into()),
                PrintOperation::FeedPaper(3),
                PrintOperation::CutPaper,
            ]
        );
        assert_eq!(job.tag(), DEFAULT_JOB_TAG);
    }

    #[test]
    fn mutating_builder_after_build_leaves_job_untouched() {
        let mut builder = PrintJob::builder(profile());
        builder.print_line("first");
        let job = builder.build();

        builder.print_line("second").cut_paper().tag("other");

        assert_eq!(job.operations(), &[PrintOperation::PrintLine("first".into())]);
        assert_eq!(job.tag(), DEFAULT_JOB_TAG);
        assert_eq!(builder.build().operations().len(), 3);
    }

    #[test]
    fn completion_flags_extend_the_execution_plan() {
        let job = PrintJob::builder(profile())
            .print_line("total 9.99")
            .cut_on_complete(true)
            .open_drawer_on_complete(true)
            .build();

        assert_eq!(job.operations().len(), 1);
        assert_eq!(
            job.execution_plan(),
            vec![
                PrintOperation::PrintLine("total 9.99".into()),
                PrintOperation::CutPaper,
                PrintOperation::OpenCashDrawer,
            ]
        );
    }

    #[test]
    fn explicit_id_is_kept_and_generated_ids_differ() {
        let job = PrintJob::builder(profile()).id("order-45").build();
        assert_eq!(job.id().as_str(), "order-45");

        let builder = PrintJob::builder(profile());
        assert_ne!(builder.build().id(), builder.build().id());
    }

    #[test]
    fn job_survives_json_persistence() {
        let job = PrintJob::builder(profile())
            .initialize_printer()
            .print_line("Hi")
            .open_cash_drawer()
            .build();
        let json = serde_json::to_string(&job).unwrap();
        let back: PrintJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
