// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subnet sweep for raw (port 9100) receipt printers.
//
// Every host .1-.254 of the local /24 is probed concurrently: connect with a
// tens-of-milliseconds deadline, send the printer-ID status query, and treat
// any non-empty reply as a live printer whose reply is its display name.
// Silent hosts are assumed absent and never retried.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use bonwerk_core::config::ScanConfig;
use bonwerk_core::error::{BonwerkError, ErrorKind, Result};
use bonwerk_core::DeviceAddress;

use crate::scanner::{ScanEvent, ScanTarget, Session};

/// `GS I B` (model name) followed by `GS I C` (type).
pub const STATUS_QUERY: [u8; 6] = [0x1d, 0x49, 0x42, 0x1d, 0x49, 0x43];

/// Upper bound on the reply read from one probe.
const MAX_REPLY_BYTES: usize = 512;

/// DS-Lite B4 addresses (192.0.0.0/29).  Some carriers hand these out and
/// they answer like a live LAN, so they are never used as the local address
/// nor probed.
pub fn is_ds_lite(ip: Ipv4Addr) -> bool {
    let [a, b, c, d] = ip.octets();
    a == 192 && b == 0 && c == 0 && d <= 7
}

/// The first non-loopback, non-DS-Lite IPv4 address of an interface that
/// is up.
pub fn local_ipv4() -> Result<Ipv4Addr> {
    datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .flat_map(|iface| iface.ips)
        .find_map(|net| match net {
            IpNetwork::V4(v4) if !v4.ip().is_loopback() && !is_ds_lite(v4.ip()) => Some(v4.ip()),
            _ => None,
        })
        .ok_or_else(|| BonwerkError::Discovery("no usable IPv4 interface".into()))
}

/// Hosts .1 to .254 of the /24 containing `base`.
pub fn sweep_targets(base: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = base.octets();
    (1..=254)
        .map(|host| Ipv4Addr::new(a, b, c, host))
        .filter(|ip| !is_ds_lite(*ip))
        .collect()
}

/// Printable text of a status reply.  Lines are concatenated, control bytes
/// dropped.
fn reply_text(reply: &[u8]) -> String {
    String::from_utf8_lossy(reply)
        .lines()
        .map(|line| {
            line.chars()
                .filter(|c| !c.is_control())
                .collect::<String>()
        })
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Probe one host.
///
/// `Ok(Some(name))` is a printer; `Ok(None)` means the host accepted the
/// connection but said nothing, or `stop` was raised before the query went
/// out.  A refused or silent host is `Unreachable` / `Timeout`.
pub async fn probe(
    addr: SocketAddr,
    connect_timeout: Duration,
    read_window: Duration,
    stop: Option<&Session>,
) -> Result<Option<String>> {
    let target = addr.to_string();
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| BonwerkError::Timeout {
            operation: format!("probe {target}"),
            millis: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
        })?
        .map_err(|e| BonwerkError::unreachable(&target, e))?;

    let outcome = exchange(&mut stream, &target, read_window, stop).await;
    let _ = stream.shutdown().await;
    outcome
}

async fn exchange(
    stream: &mut TcpStream,
    target: &str,
    read_window: Duration,
    stop: Option<&Session>,
) -> Result<Option<String>> {
    if stop.is_some_and(Session::stop_requested) {
        return Ok(None);
    }

    stream
        .write_all(&STATUS_QUERY)
        .await
        .map_err(|e| BonwerkError::OperationFailed {
            operation: format!("status query to {target}"),
            detail: e.to_string(),
        })?;

    let deadline = Instant::now() + read_window;
    let mut reply = Vec::new();
    let mut buf = [0u8; 128];
    while reply.len() < MAX_REPLY_BYTES {
        match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) | Ok(Ok(0)) => break,
            Ok(Ok(n)) => reply.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => {
                return Err(BonwerkError::OperationFailed {
                    operation: format!("status reply from {target}"),
                    detail: e.to_string(),
                });
            }
        }
    }

    if reply.is_empty() {
        return Ok(None);
    }
    let name = reply_text(&reply);
    if name.is_empty() {
        return Err(BonwerkError::ProtocolMismatch {
            target: target.to_owned(),
            detail: format!("{} byte reply with no printable text", reply.len()),
        });
    }
    Ok(Some(name))
}

/// Sweeps the local subnet for port-9100 printers.
pub struct NetworkScanner {
    config: ScanConfig,
    session: Arc<Session>,
}

impl NetworkScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            session: Arc::new(Session::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// The /24 to sweep: the configured override, else the local network.
    pub fn sweep_base(&self) -> Result<Ipv4Addr> {
        match self.config.subnet_override {
            Some(base) => Ok(base),
            None => local_ipv4(),
        }
    }

    /// Start a sweep session in the background.
    ///
    /// Returns `false` (and does nothing) if a session is already running.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, events: UnboundedSender<ScanEvent>) -> bool {
        if !self.session.try_start() {
            debug!("network sweep already running");
            return false;
        }
        let config = self.config.clone();
        let session = Arc::clone(&self.session);
        let base = self.sweep_base();
        tokio::spawn(sweep(config, base, session, events));
        true
    }

    /// Ask the running session to stop.  Probes that have not sent their
    /// query yet are skipped; replies that arrive afterwards are dropped.
    pub fn stop(&self) {
        if self.session.is_running() {
            info!("network sweep stop requested");
        }
        self.session.request_stop();
    }

    /// Query a single host for its self-reported model.
    pub async fn probe_host(&self, ip: IpAddr, port: u16) -> Result<Option<String>> {
        probe(
            SocketAddr::new(ip, port),
            self.config.probe_timeout(),
            self.config.probe_read_window(),
            None,
        )
        .await
    }
}

async fn sweep(
    config: ScanConfig,
    base: Result<Ipv4Addr>,
    session: Arc<Session>,
    events: UnboundedSender<ScanEvent>,
) {
    let target = ScanTarget::Network;
    let _ = events.send(ScanEvent::ScanStarted { target });

    match base {
        Ok(base) => run_probes(&config, base, &session, &events).await,
        Err(e) => {
            warn!(error = %e, "network sweep aborted");
            let _ = events.send(ScanEvent::error(target, &e));
        }
    }

    // Observers of `ScanStopped` may restart the session straight away.
    session.finish();
    let _ = events.send(ScanEvent::ScanStopped { target });
}

async fn run_probes(
    config: &ScanConfig,
    base: Ipv4Addr,
    session: &Arc<Session>,
    events: &UnboundedSender<ScanEvent>,
) {
    let hosts = sweep_targets(base);
    info!(subnet = %base, hosts = hosts.len(), port = config.printer_port, "network sweep started");

    let permits = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));
    let mut probes = JoinSet::new();
    for host in hosts {
        if session.stop_requested() {
            break;
        }
        let permits = Arc::clone(&permits);
        let session = Arc::clone(session);
        let events = events.clone();
        let port = config.printer_port;
        let connect_timeout = config.probe_timeout();
        let read_window = config.probe_read_window();
        let report_absent = config.report_absent_hosts;

        probes.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if session.stop_requested() {
                return;
            }
            let addr = SocketAddr::new(IpAddr::V4(host), port);
            let outcome = probe(addr, connect_timeout, read_window, Some(session.as_ref())).await;
            if session.stop_requested() {
                return;
            }
            match outcome {
                Ok(Some(name)) => {
                    info!(host = %host, name = %name, "printer found");
                    let _ = events.send(ScanEvent::DeviceFound {
                        target: ScanTarget::Network,
                        address: DeviceAddress::network(host.to_string(), port),
                        display_name: name,
                    });
                }
                Ok(None) => debug!(host = %host, "host answered without a reply"),
                Err(e) => {
                    let absent = matches!(e.kind(), ErrorKind::Unreachable | ErrorKind::Timeout);
                    if !absent || report_absent {
                        let _ = events.send(ScanEvent::error(ScanTarget::Network, &e));
                    }
                }
            }
        });
    }

    while let Some(joined) = probes.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "probe task failed");
        }
    }
    info!(subnet = %base, "network sweep finished");
}
