// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// mDNS discovery of raw-socket printers.
//
// Printers that advertise `_pdl-datastream._tcp.local.` accept raw bytes on
// the advertised port (normally 9100), exactly like the ones the subnet
// sweep finds.  A browse session runs for a fixed window and reports each
// resolved service once as a Network device.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use bonwerk_core::DeviceAddress;
use bonwerk_core::error::{BonwerkError, Result};

use crate::scanner::{ScanEvent, ScanTarget, Session};

/// mDNS service type for raw page-description-language sockets.
pub const RAW_PRINTER_SERVICE: &str = "_pdl-datastream._tcp.local.";

/// How often the browse loop wakes up to check the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time-boxed mDNS browse sessions.
pub struct ZeroconfBrowser {
    window: Duration,
    session: Arc<Session>,
}

impl ZeroconfBrowser {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            session: Arc::new(Session::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Start a browse session.  `false` if one is already running.
    pub fn start(&self, events: UnboundedSender<ScanEvent>) -> bool {
        if !self.session.try_start() {
            debug!("zeroconf browse already running");
            return false;
        }
        let session = Arc::clone(&self.session);
        let window = self.window;
        // mdns-sd hands out a blocking receiver, so the session lives on the
        // blocking pool.
        tokio::task::spawn_blocking(move || {
            let target = ScanTarget::Zeroconf;
            let _ = events.send(ScanEvent::ScanStarted { target });
            if let Err(e) = browse(window, &session, &events) {
                warn!(error = %e, "zeroconf browse failed");
                let _ = events.send(ScanEvent::error(target, &e));
            }
            // Observers of `ScanStopped` may restart the session straight away.
            session.finish();
            let _ = events.send(ScanEvent::ScanStopped { target });
        });
        true
    }

    pub fn stop(&self) {
        self.session.request_stop();
    }
}

fn browse(window: Duration, session: &Session, events: &UnboundedSender<ScanEvent>) -> Result<()> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| BonwerkError::Discovery(format!("failed to start mDNS daemon: {e}")))?;
    let receiver = daemon
        .browse(RAW_PRINTER_SERVICE)
        .map_err(|e| BonwerkError::Discovery(format!("browse {RAW_PRINTER_SERVICE}: {e}")))?;
    info!(service = RAW_PRINTER_SERVICE, "mDNS printer browse started");

    let deadline = Instant::now() + window;
    let mut reported = HashSet::new();
    while Instant::now() < deadline && !session.stop_requested() {
        let Ok(event) = receiver.recv_timeout(POLL_INTERVAL) else {
            continue;
        };
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let fullname = info.get_fullname().to_owned();
                if !reported.insert(fullname.clone()) {
                    continue;
                }
                match service_to_device(&info) {
                    Ok((address, display_name)) => {
                        info!(name = %display_name, addr = %address, "printer resolved");
                        let _ = events.send(ScanEvent::DeviceFound {
                            target: ScanTarget::Zeroconf,
                            address,
                            display_name,
                        });
                    }
                    Err(e) => {
                        warn!(fullname = %fullname, error = %e, "unusable printer service");
                        let _ = events.send(ScanEvent::error(ScanTarget::Zeroconf, &e));
                    }
                }
            }
            ServiceEvent::SearchStopped(_) => break,
            other => debug!(event = ?other, "mDNS event"),
        }
    }

    if let Err(e) = daemon.stop_browse(RAW_PRINTER_SERVICE) {
        debug!(error = %e, "stop browse");
    }
    if let Err(e) = daemon.shutdown() {
        debug!(error = %e, "mDNS daemon shutdown");
    }
    info!("mDNS printer browse finished");
    Ok(())
}

/// Address and display name of a resolved service, preferring IPv4.
fn service_to_device(info: &ServiceInfo) -> Result<(DeviceAddress, String)> {
    let fullname = info.get_fullname();
    let ip: IpAddr = info
        .get_addresses()
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| info.get_addresses().iter().next())
        .copied()
        .ok_or_else(|| BonwerkError::Discovery(format!("no address for service {fullname}")))?;

    let display_name = info
        .get_property_val_str("ty")
        .or_else(|| info.get_property_val_str("product"))
        .map(|s| s.trim_matches(|c| c == '(' || c == ')').to_owned())
        .unwrap_or_else(|| instance_name(fullname).to_owned());

    Ok((DeviceAddress::network(ip.to_string(), info.get_port()), display_name))
}

/// `"Kitchen Printer._pdl-datastream._tcp.local."` -> `"Kitchen Printer"`.
fn instance_name(fullname: &str) -> &str {
    fullname
        .strip_suffix(RAW_PRINTER_SERVICE)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
}
