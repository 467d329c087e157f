// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_PRINTER_PORT;

/// Persistent application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub connection: ConnectionConfig,
    pub retry: RetryConfig,
    pub jobs: JobConfig,
}

/// Discovery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Port probed on every host of the subnet sweep.
    pub printer_port: u16,
    /// Connect deadline per probed host, in milliseconds.
    pub probe_timeout_ms: u64,
    /// How long a probe waits for the status reply after writing the query.
    pub probe_read_window_ms: u64,
    /// Upper bound on probes in flight at once.
    pub max_concurrent_probes: usize,
    /// Sweep this /24 instead of the one derived from the local address.
    /// Only the first three octets are used.
    pub subnet_override: Option<Ipv4Addr>,
    /// Report refused/timed-out hosts as error events.  Absent hosts are
    /// the common case, so this is off by default.
    pub report_absent_hosts: bool,
    /// How long a zeroconf browse runs before its session stops.
    pub zeroconf_browse_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            printer_port: DEFAULT_PRINTER_PORT,
            probe_timeout_ms: 50,
            probe_read_window_ms: 50,
            max_concurrent_probes: 64,
            subnet_override: None,
            report_absent_hosts: false,
            zeroconf_browse_ms: 5_000,
        }
    }
}

impl ScanConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_read_window(&self) -> Duration {
        Duration::from_millis(self.probe_read_window_ms)
    }

    pub fn zeroconf_browse(&self) -> Duration {
        Duration::from_millis(self.zeroconf_browse_ms)
    }
}

/// Deadlines applied to print-job connections.  Both must stay well above
/// the probe timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            write_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Automatic re-attempt policy for failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts allowed per job, the first run included.
    pub max_attempts: u32,
    /// Base delay between attempts (exponential backoff).
    pub base_delay_ms: u64,
    /// Maximum delay between attempts.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Job persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// SQLite file name inside the data directory.
    pub database_file: String,
    /// Re-enqueue jobs left unfinished by a previous process on start-up.
    pub recover_on_start: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            database_file: "jobs.db".into(),
            recover_on_start: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_deadlines_exceed_probe_deadline() {
        let config = AppConfig::default();
        assert!(config.connection.connect_timeout() > config.scan.probe_timeout());
        assert!(config.connection.write_timeout() > config.scan.probe_timeout());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "scan": { "probe_timeout_ms": 80 } }"#).unwrap();
        assert_eq!(config.scan.probe_timeout_ms, 80);
        assert_eq!(config.scan.printer_port, DEFAULT_PRINTER_PORT);
        assert_eq!(config.retry.max_attempts, 3);
    }
}
