// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — opens the job store, builds the resolver, the
// device scanner and the job orchestrator over one platform bridge, and
// keeps the persisted configuration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use bonwerk_bridge::{PlatformBridge, platform_bridge};
use bonwerk_core::AppConfig;
use bonwerk_core::error::Result;
use bonwerk_print::{DeviceScanner, JobOrchestrator, JobStore, ScanEvent, TransportResolver};

use super::data_dir;

const CONFIG_FILE: &str = "config.json";

/// Everything a command needs, built once at start-up.
pub struct AppServices {
    config: AppConfig,
    data_dir: PathBuf,
    resolver: Arc<TransportResolver>,
    scanner: DeviceScanner,
    scan_events: Mutex<Option<UnboundedReceiver<ScanEvent>>>,
    jobs: JobOrchestrator,
}

impl AppServices {
    /// Services over the platform bridge, rooted in the default data
    /// directory.  Must be called from within a Tokio runtime.
    pub fn init() -> Result<Self> {
        let dir = data_dir::data_dir()?;
        Self::start(&dir, platform_bridge())
    }

    /// Open the services in `dir` and pick up jobs an earlier run left
    /// unfinished.
    pub fn start(dir: &Path, bridge: Arc<dyn PlatformBridge>) -> Result<Self> {
        let services = Self::open(dir, bridge)?;
        services.resume_unfinished()?;
        Ok(services)
    }

    /// Services rooted in `dir`.  Writes a default `config.json` there if
    /// none exists yet.
    pub fn open(dir: &Path, bridge: Arc<dyn PlatformBridge>) -> Result<Self> {
        info!(path = %dir.display(), platform = bridge.platform_name(), "initialising app services");

        let config = match load_config(dir) {
            Some(config) => config,
            None => {
                let config = AppConfig::default();
                if let Err(e) = persist_config(dir, &config) {
                    warn!(error = %e, "could not write default config");
                }
                config
            }
        };

        let store = JobStore::open(dir.join(&config.jobs.database_file))?;
        let resolver = Arc::new(TransportResolver::new(
            Arc::clone(&bridge),
            config.connection.clone(),
        ));
        let (scanner, scan_events) = DeviceScanner::new(Arc::clone(&resolver), config.scan.clone());
        let jobs = JobOrchestrator::new(
            Arc::clone(&resolver) as Arc<dyn bonwerk_print::Resolve>,
            bridge,
            store,
            config.retry.clone(),
        );

        info!("app services initialised");
        Ok(Self {
            config,
            data_dir: dir.to_path_buf(),
            resolver,
            scanner,
            scan_events: Mutex::new(Some(scan_events)),
            jobs,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn resolver(&self) -> &TransportResolver {
        &self.resolver
    }

    pub fn scanner(&self) -> &DeviceScanner {
        &self.scanner
    }

    /// The scanner's event stream.  Handed out once.
    pub fn take_scan_events(&self) -> Option<UnboundedReceiver<ScanEvent>> {
        self.scan_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn jobs(&self) -> &JobOrchestrator {
        &self.jobs
    }

    /// Re-enqueue jobs a previous run left unfinished, if configured to.
    pub fn resume_unfinished(&self) -> Result<usize> {
        if !self.config.jobs.recover_on_start {
            return Ok(0);
        }
        let resumed = self.jobs.recover()?;
        if resumed > 0 {
            info!(count = resumed, "resumed unfinished jobs");
        }
        Ok(resumed)
    }
}

fn load_config(dir: &Path) -> Option<AppConfig> {
    let data = std::fs::read_to_string(dir.join(CONFIG_FILE)).ok()?;
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(error = %e, "ignoring unreadable config.json");
            None
        }
    }
}

fn persist_config(dir: &Path, config: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(dir.join(CONFIG_FILE), json)?;
    Ok(())
}
