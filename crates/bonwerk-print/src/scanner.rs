// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device discovery façade.
//
// `DeviceScanner` runs one independent session per scan target (subnet
// sweep, zeroconf browse, Bluetooth/USB/serial enumeration) and funnels
// every session's events into a single channel owned by the caller.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use bonwerk_core::config::ScanConfig;
use bonwerk_core::error::{BonwerkError, ErrorKind};
use bonwerk_core::{DeviceAddress, TransportKind};

use crate::network_scan::NetworkScanner;
use crate::resolver::TransportResolver;
use crate::zeroconf::ZeroconfBrowser;

/// One discovery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTarget {
    /// Port-9100 sweep of the local /24.
    Network,
    /// mDNS browse for raw-socket printers.
    Zeroconf,
    Bluetooth,
    Usb,
    Serial,
}

impl ScanTarget {
    pub const ALL: [ScanTarget; 5] = [
        ScanTarget::Network,
        ScanTarget::Zeroconf,
        ScanTarget::Bluetooth,
        ScanTarget::Usb,
        ScanTarget::Serial,
    ];

    /// The transport whose permission the target needs.
    pub fn transport(&self) -> TransportKind {
        match self {
            Self::Network | Self::Zeroconf => TransportKind::Network,
            Self::Bluetooth => TransportKind::Bluetooth,
            Self::Usb => TransportKind::Usb,
            Self::Serial => TransportKind::Serial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Zeroconf => "zeroconf",
            Self::Bluetooth => "bluetooth",
            Self::Usb => "usb",
            Self::Serial => "serial",
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanTarget {
    type Err = BonwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zeroconf" | "mdns" => Ok(Self::Zeroconf),
            other => other.parse::<TransportKind>().map(|kind| match kind {
                TransportKind::Network => Self::Network,
                TransportKind::Bluetooth => Self::Bluetooth,
                TransportKind::Usb => Self::Usb,
                TransportKind::Serial => Self::Serial,
            }),
        }
    }
}

/// Which targets a start/stop call applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSelector {
    One(ScanTarget),
    All,
}

impl ScanSelector {
    pub fn targets(&self) -> Vec<ScanTarget> {
        match self {
            Self::One(target) => vec![*target],
            Self::All => ScanTarget::ALL.to_vec(),
        }
    }
}

impl From<ScanTarget> for ScanSelector {
    fn from(target: ScanTarget) -> Self {
        Self::One(target)
    }
}

impl FromStr for ScanSelector {
    type Err = BonwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::One)
        }
    }
}

/// Uniform discovery event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScanEvent {
    ScanStarted {
        target: ScanTarget,
    },
    ScanStopped {
        target: ScanTarget,
    },
    #[serde(rename_all = "camelCase")]
    DeviceFound {
        target: ScanTarget,
        address: DeviceAddress,
        display_name: String,
    },
    /// Anything else worth telling the user, e.g. an attached USB printer
    /// that still needs the user's permission.
    Other {
        target: ScanTarget,
        event: String,
        info: serde_json::Value,
    },
    Error {
        target: ScanTarget,
        kind: ErrorKind,
        message: String,
    },
}

impl ScanEvent {
    pub fn error(target: ScanTarget, error: &BonwerkError) -> Self {
        Self::Error {
            target,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn target(&self) -> ScanTarget {
        match self {
            Self::ScanStarted { target }
            | Self::ScanStopped { target }
            | Self::DeviceFound { target, .. }
            | Self::Other { target, .. }
            | Self::Error { target, .. } => *target,
        }
    }
}

/// Running/stop flags of one scan session.
#[derive(Debug, Default)]
pub struct Session {
    running: AtomicBool,
    stop: AtomicBool,
}

impl Session {
    /// Claim the session.  `false` if it is already running.
    pub fn try_start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.stop.store(false, Ordering::Release);
        true
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Discovery over every transport behind one event stream.
pub struct DeviceScanner {
    resolver: Arc<TransportResolver>,
    network: NetworkScanner,
    zeroconf: ZeroconfBrowser,
    bluetooth: Arc<Session>,
    usb: Arc<Session>,
    serial: Arc<Session>,
    events: UnboundedSender<ScanEvent>,
}

impl DeviceScanner {
    /// Build a scanner and the receiving end of its event stream.
    pub fn new(
        resolver: Arc<TransportResolver>,
        config: ScanConfig,
    ) -> (Self, UnboundedReceiver<ScanEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let scanner = Self {
            resolver,
            zeroconf: ZeroconfBrowser::new(config.zeroconf_browse()),
            network: NetworkScanner::new(config),
            bluetooth: Arc::default(),
            usb: Arc::default(),
            serial: Arc::default(),
            events,
        };
        (scanner, rx)
    }

    pub fn network(&self) -> &NetworkScanner {
        &self.network
    }

    /// Whether every transport `selector` would touch has been granted.
    pub fn check_permissions(&self, selector: ScanSelector) -> bool {
        selector
            .targets()
            .iter()
            .all(|target| self.resolver.bridge().is_granted(target.transport()))
    }

    pub fn is_running(&self, target: ScanTarget) -> bool {
        match target {
            ScanTarget::Network => self.network.is_running(),
            ScanTarget::Zeroconf => self.zeroconf.is_running(),
            other => self.enumeration_session(other).is_running(),
        }
    }

    /// Start a session for each selected target.  Targets that are already
    /// running are left alone; targets without permission report an error
    /// event and do not start.
    pub fn start(&self, selector: ScanSelector) {
        for target in selector.targets() {
            if !self.resolver.bridge().is_granted(target.transport()) {
                warn!(%target, "scan not started: permission missing");
                let denied = BonwerkError::PermissionDenied(target.transport());
                let _ = self.events.send(ScanEvent::error(target, &denied));
                continue;
            }
            let started = match target {
                ScanTarget::Network => self.network.start(self.events.clone()),
                ScanTarget::Zeroconf => self.zeroconf.start(self.events.clone()),
                other => self.start_enumeration(other),
            };
            if started {
                info!(%target, "scan session started");
            }
        }
    }

    /// Stop each selected target's session, independently of the others.
    pub fn stop(&self, selector: ScanSelector) {
        for target in selector.targets() {
            match target {
                ScanTarget::Network => self.network.stop(),
                ScanTarget::Zeroconf => self.zeroconf.stop(),
                other => self.enumeration_session(other).request_stop(),
            }
        }
    }

    fn enumeration_session(&self, target: ScanTarget) -> &Arc<Session> {
        match target {
            ScanTarget::Bluetooth => &self.bluetooth,
            ScanTarget::Usb => &self.usb,
            _ => &self.serial,
        }
    }

    fn start_enumeration(&self, target: ScanTarget) -> bool {
        let session = Arc::clone(self.enumeration_session(target));
        if !session.try_start() {
            debug!(%target, "enumeration already running");
            return false;
        }
        let resolver = Arc::clone(&self.resolver);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(ScanEvent::ScanStarted { target });
            match resolver.list_devices(target.transport()) {
                Ok(devices) => {
                    for device in devices {
                        if session.stop_requested() {
                            break;
                        }
                        let event = if device.has_permission {
                            ScanEvent::DeviceFound {
                                target,
                                address: device.address,
                                display_name: device.display_name,
                            }
                        } else {
                            ScanEvent::Other {
                                target,
                                event: "permissionDenied".into(),
                                info: serde_json::json!({
                                    "identifier": device.address.identifier,
                                    "name": device.display_name,
                                }),
                            }
                        };
                        let _ = events.send(event);
                    }
                }
                Err(e) => {
                    warn!(%target, error = %e, "device enumeration failed");
                    let _ = events.send(ScanEvent::error(target, &e));
                }
            }
            // Observers of `ScanStopped` may restart the session straight away.
            session.finish();
            let _ = events.send(ScanEvent::ScanStopped { target });
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use bonwerk_bridge::InMemoryBridge;
    use bonwerk_core::config::ConnectionConfig;

    fn scanner(bridge: InMemoryBridge) -> (DeviceScanner, UnboundedReceiver<ScanEvent>) {
        let resolver = Arc::new(TransportResolver::new(
            Arc::new(bridge),
            ConnectionConfig::default(),
        ));
        let config = ScanConfig {
            subnet_override: Some(Ipv4Addr::new(127, 0, 0, 0)),
            printer_port: 1,
            ..Default::default()
        };
        DeviceScanner::new(resolver, config)
    }

    async fn until_stopped(
        rx: &mut UnboundedReceiver<ScanEvent>,
        target: ScanTarget,
    ) -> Vec<ScanEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("scan did not stop")
                .expect("channel closed");
            let done = event == ScanEvent::ScanStopped { target };
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn selectors_parse() {
        assert_eq!("all".parse::<ScanSelector>().unwrap(), ScanSelector::All);
        assert_eq!(
            "BT".parse::<ScanSelector>().unwrap(),
            ScanSelector::One(ScanTarget::Bluetooth)
        );
        assert_eq!("mdns".parse::<ScanTarget>().unwrap(), ScanTarget::Zeroconf);
        assert!("fax".parse::<ScanSelector>().is_err());
        assert_eq!(ScanSelector::All.targets().len(), 5);
    }

    #[tokio::test]
    async fn bluetooth_session_reports_paired_printers() {
        let (scanner, mut rx) = scanner(
            InMemoryBridge::new()
                .with_bluetooth_printer("00:11:22:33:44:55", "RPP02N")
                .with_bluetooth_printer("66:77:88:99:AA:BB", "MTP-II"),
        );
        scanner.start(ScanTarget::Bluetooth.into());
        let events = until_stopped(&mut rx, ScanTarget::Bluetooth).await;

        assert_eq!(events[0], ScanEvent::ScanStarted { target: ScanTarget::Bluetooth });
        let names: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::DeviceFound { display_name, .. } => Some(display_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["RPP02N", "MTP-II"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn enumeration_can_restart_as_soon_as_it_stops() {
        let (scanner, mut rx) =
            scanner(InMemoryBridge::new().with_bluetooth_printer("00:11:22:33:44:55", "RPP02N"));
        for _ in 0..50 {
            scanner.start(ScanTarget::Bluetooth.into());
            let events = until_stopped(&mut rx, ScanTarget::Bluetooth).await;
            assert_eq!(events[0], ScanEvent::ScanStarted { target: ScanTarget::Bluetooth });
            assert!(!scanner.is_running(ScanTarget::Bluetooth));
        }
    }

    #[tokio::test]
    async fn usb_devices_without_grant_are_reported_as_other() {
        let (scanner, mut rx) = scanner(
            InMemoryBridge::new()
                .with_usb_printer("/dev/bus/usb/001/004", "POS-80", false)
                .with_usb_printer("/dev/bus/usb/001/005", "POS-58", true),
        );
        scanner.start(ScanTarget::Usb.into());
        let events = until_stopped(&mut rx, ScanTarget::Usb).await;

        assert!(events.iter().any(|e| matches!(
            e,
            ScanEvent::Other { event, .. } if event == "permissionDenied"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ScanEvent::DeviceFound { display_name, .. } if display_name == "POS-58"
        )));
    }

    #[tokio::test]
    async fn denied_permission_is_an_error_and_nothing_starts() {
        let (scanner, mut rx) = scanner(InMemoryBridge::new().deny(TransportKind::Bluetooth));
        assert!(!scanner.check_permissions(ScanSelector::All));
        assert!(scanner.check_permissions(ScanTarget::Usb.into()));

        scanner.start(ScanTarget::Bluetooth.into());
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            ScanEvent::Error { target: ScanTarget::Bluetooth, kind: ErrorKind::PermissionDenied, .. }
        ));
        assert!(!scanner.is_running(ScanTarget::Bluetooth));
    }

    #[tokio::test]
    async fn stopping_one_target_leaves_the_others_running() {
        let (scanner, mut rx) = scanner(InMemoryBridge::new());
        scanner.start(ScanTarget::Network.into());
        assert!(scanner.is_running(ScanTarget::Network));

        scanner.stop(ScanTarget::Bluetooth.into());
        assert!(scanner.is_running(ScanTarget::Network));

        scanner.stop(ScanSelector::All);
        let events = until_stopped(&mut rx, ScanTarget::Network).await;
        assert_eq!(events[0], ScanEvent::ScanStarted { target: ScanTarget::Network });
        assert!(!scanner.is_running(ScanTarget::Network));
    }
}
