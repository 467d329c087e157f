// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk Print — transport resolution, printer discovery over every
// transport, and the durable background job orchestrator.  This crate sits
// between the domain types in `bonwerk-core` and the sockets, serial ports
// and native channels handed out by `bonwerk-bridge`.

pub mod connection;
pub mod network_scan;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod scanner;
pub mod store;
pub mod zeroconf;

pub use connection::ConnectionHandle;
pub use network_scan::NetworkScanner;
pub use orchestrator::JobOrchestrator;
pub use resolver::{DeviceListing, Resolve, TransportResolver};
pub use scanner::{DeviceScanner, ScanEvent, ScanSelector, ScanTarget};
pub use store::JobStore;
pub use zeroconf::ZeroconfBrowser;
