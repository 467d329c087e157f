// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk — receipt printer discovery and print jobs
//
// Entry point. Initialises logging and backend services, then runs one
// command.  Scan events and job progress are written to stdout as JSON lines.

mod cmd;
mod services;

use std::collections::HashSet;
use std::process::ExitCode;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use bonwerk_core::error::Result;
use bonwerk_core::{JobId, JobProgress, PrintJob, PrinterProfile, ReportedState};
use bonwerk_print::{ScanEvent, ScanSelector};

use cmd::{CommandLine, Commands};
use services::app_services::AppServices;

/// Events still accepted after a scan's deadline while sessions wind down.
const SCAN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = CommandLine::parse_args();
    info!("Bonwerk starting");

    let services = match AppServices::init() {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "backend services failed to start");
            return ExitCode::FAILURE;
        }
    };
    info!(
        data_dir = %services.data_dir().display(),
        max_attempts = services.config().retry.max_attempts,
        "services ready"
    );

    let outcome = match run(cli.command, &services).await {
        Ok(succeeded) => succeeded,
        Err(e) => {
            error!(error = %e, "command failed");
            false
        }
    };
    // Jobs resumed at start-up must not be cut off by the exit.
    let settled = match settle_active(&services).await {
        Ok(settled) => settled,
        Err(e) => {
            error!(error = %e, "could not wait for resumed jobs");
            false
        }
    };
    if outcome && settled {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// `Ok(false)` when the command ran but its outcome was a failure.
async fn run(command: Commands, services: &AppServices) -> Result<bool> {
    match command {
        Commands::Scan { selector, seconds } => {
            scan(services, selector, Duration::from_secs(seconds)).await;
            Ok(true)
        }
        Commands::Print { printer, lines, cut, drawer, tag } => {
            let mut builder = PrintJob::builder(printer.profile()?);
            builder.tag(tag).cut_on_complete(cut).open_drawer_on_complete(drawer);
            for line in lines {
                builder.print_line(line);
            }
            submit_and_follow(services, builder.build()).await
        }
        Commands::TestPrint { printer } => {
            submit_and_follow(services, sample_receipt(printer.profile()?)).await
        }
        Commands::TestConnection { printer } => {
            let profile = printer.profile()?;
            match services.resolver().test_connection(profile.address()).await {
                Ok(()) => {
                    println!("{} is reachable", profile.address());
                    Ok(true)
                }
                Err(e) => {
                    println!("{} is not reachable: {e}", profile.address());
                    Ok(false)
                }
            }
        }
        Commands::Model { ip, port } => {
            match services.scanner().network().probe_host(ip, port).await? {
                Some(model) => println!("{model}"),
                None => println!("{ip}:{port} answered without a model"),
            }
            Ok(true)
        }
        Commands::Resume => {
            // Explicit, so it runs even with recovery on start-up disabled.
            let resumed = services.jobs().recover()?;
            info!(count = resumed, "resumed unfinished jobs");
            settle_active(services).await
        }
        Commands::Jobs => {
            for record in services.jobs().records()? {
                emit(&record.to_progress());
            }
            Ok(true)
        }
        Commands::Prune => {
            let removed = services.jobs().prune()?;
            println!("removed {removed} finished job(s)");
            Ok(true)
        }
    }
}

/// Run every selected scan until all sessions stopped or `limit` passed.
async fn scan(services: &AppServices, selector: ScanSelector, limit: Duration) {
    let Some(mut events) = services.take_scan_events() else {
        warn!("scan events already taken");
        return;
    };
    let scanner = services.scanner();
    if !scanner.check_permissions(selector) {
        warn!(?selector, "some transports are not permitted; they will report errors");
    }
    scanner.start(selector);

    let mut running = 0usize;
    let deadline = tokio::time::Instant::now() + limit;
    let mut stopping = false;
    loop {
        let wait_until = if stopping { deadline + SCAN_GRACE } else { deadline };
        match tokio::time::timeout_at(wait_until, events.recv()).await {
            Ok(Some(event)) => {
                match &event {
                    ScanEvent::ScanStarted { .. } => running += 1,
                    ScanEvent::ScanStopped { .. } => running = running.saturating_sub(1),
                    _ => {}
                }
                emit(&event);
                if running == 0 && !selector.targets().iter().any(|t| scanner.is_running(*t)) {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) if !stopping => {
                info!("scan time limit reached");
                scanner.stop(selector);
                stopping = true;
            }
            Err(_) => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        emit(&event);
    }
}

async fn submit_and_follow(services: &AppServices, job: PrintJob) -> Result<bool> {
    let mut progress = services.jobs().subscribe();
    let id = services.jobs().enqueue(job)?;
    println!("job {id} enqueued");
    follow(services, &mut progress, HashSet::from([id])).await
}

/// Follow every job still in flight, such as those resumed at start-up.
async fn settle_active(services: &AppServices) -> Result<bool> {
    let mut progress = services.jobs().subscribe();
    let ids: HashSet<JobId> = services.jobs().active().into_iter().collect();
    if ids.is_empty() {
        return Ok(true);
    }
    info!(count = ids.len(), "waiting for jobs in flight");
    follow(services, &mut progress, ids).await
}

/// Print progress of `ids` until each has finished.  Ctrl-C cancels them.
async fn follow(
    services: &AppServices,
    progress: &mut tokio::sync::broadcast::Receiver<JobProgress>,
    mut ids: HashSet<JobId>,
) -> Result<bool> {
    // Jobs may have finished before we subscribed.
    for id in ids.clone() {
        if let Some(record) = services.jobs().record(&id)? {
            if record.is_finished() {
                emit(&record.to_progress());
                ids.remove(&id);
            }
        }
    }

    let mut all_succeeded = true;
    let mut cancelled = false;
    while !ids.is_empty() {
        tokio::select! {
            event = progress.recv() => match event {
                Ok(event) if ids.contains(&event.job_id) => {
                    emit(&event);
                    if is_final(&event) {
                        all_succeeded &= event.state == ReportedState::Succeeded;
                        ids.remove(&event.job_id);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress events dropped"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                warn!("interrupted, cancelling jobs");
                for id in &ids {
                    services.jobs().cancel(id)?;
                }
                cancelled = true;
            }
        }
    }
    Ok(all_succeeded)
}

fn is_final(event: &JobProgress) -> bool {
    match event.state {
        ReportedState::Succeeded | ReportedState::Cancelled => true,
        ReportedState::Failed | ReportedState::Pending => !event.retry_scheduled,
        _ => false,
    }
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "could not serialise event"),
    }
}

fn sample_receipt(profile: PrinterProfile) -> PrintJob {
    let width = usize::try_from(profile.max_line_chars()).unwrap_or(42);
    let rule = "-".repeat(width);
    let row = |item: &str, price: &str| {
        let pad = width.saturating_sub(item.len() + price.len());
        format!("{item}{}{price}", " ".repeat(pad))
    };

    let mut builder = PrintJob::builder(profile);
    builder
        .tag("test-print")
        .initialize_printer()
        .print_line("BONWERK TEST PRINT")
        .print_line(rule.clone())
        .print_line(row("Espresso", "2.40"))
        .print_line(row("Croissant", "3.10"))
        .print_line(rule)
        .print_line(row("TOTAL", "5.50"))
        .feed_paper(3)
        .cut_on_complete(true);
    builder.build()
}
