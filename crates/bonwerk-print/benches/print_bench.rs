// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for sweep planning, probe reply handling, and job
// record serialisation in the bonwerk-print crate.

use std::net::Ipv4Addr;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use bonwerk_core::{DeviceAddress, JobRecord, JobState, PrintJob, PrinterProfile};
use bonwerk_print::JobStore;
use bonwerk_print::network_scan::sweep_targets;

fn receipt(lines: usize) -> PrintJob {
    let profile = PrinterProfile::new(DeviceAddress::network("192.168.1.40", 9100))
        .expect("valid profile");
    let mut builder = PrintJob::builder(profile);
    builder.initialize_printer();
    for i in 0..lines {
        builder.print_line(format!("{i:>3}  Espresso                 2.40"));
    }
    builder.cut_paper().build()
}

fn bench_sweep_targets(c: &mut Criterion) {
    c.bench_function("sweep_targets (/24)", |b| {
        b.iter(|| sweep_targets(black_box(Ipv4Addr::new(192, 168, 1, 0))))
    });
    c.bench_function("sweep_targets (DS-Lite /24)", |b| {
        b.iter(|| sweep_targets(black_box(Ipv4Addr::new(192, 0, 0, 0))))
    });
}

fn bench_record_json(c: &mut Criterion) {
    let job = receipt(40);
    let mut record = JobRecord::new(&job);
    record.transition(JobState::Running).expect("legal transition");

    c.bench_function("serialize PrintJob (40 lines)", |b| {
        b.iter(|| serde_json::to_string(black_box(&job)).expect("serialize job"))
    });
    c.bench_function("JobRecord to_progress", |b| {
        b.iter(|| black_box(&record).to_progress())
    });
}

fn bench_store(c: &mut Criterion) {
    let job = receipt(40);
    let store = JobStore::open_in_memory().expect("open store");
    let mut record = JobRecord::new(&job);
    store.insert(&job, &record).expect("insert job");
    record.transition(JobState::Running).expect("legal transition");

    c.bench_function("JobStore save_record", |b| {
        b.iter(|| {
            record.progress.operations_completed += 1;
            store.save_record(black_box(&record)).expect("save record")
        })
    });
}

criterion_group!(benches, bench_sweep_targets, bench_record_json, bench_store);
criterion_main!(benches);
