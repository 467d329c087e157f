// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory bridge: a scriptable platform with fake paired/attached printers.
//
// Every channel write is logged per device together with open/close counts,
// and failures or slow writes can be injected per device.  Used by the engine
// tests and by demos that run without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::{PrintOperation, PrinterProfile, TransportKind};

use crate::traits::*;

#[derive(Debug, Default)]
struct DeviceLog {
    writes: Vec<Vec<u8>>,
    write_attempts: usize,
    opens: u32,
    closes: u32,
    fail_on_write: Option<usize>,
    write_delay: Option<Duration>,
    open_delay: Option<Duration>,
    refuse_open: bool,
}

type Logs = Arc<Mutex<HashMap<String, DeviceLog>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scriptable platform bridge backed by plain memory.
pub struct InMemoryBridge {
    granted: Mutex<HashSet<TransportKind>>,
    bluetooth: Mutex<Vec<BluetoothPrinterInfo>>,
    usb: Mutex<Vec<UsbPrinterInfo>>,
    logs: Logs,
}

impl Default for InMemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBridge {
    /// Bridge with every transport granted and no devices.
    pub fn new() -> Self {
        Self {
            granted: Mutex::new(TransportKind::ALL.into_iter().collect()),
            bluetooth: Mutex::new(Vec::new()),
            usb: Mutex::new(Vec::new()),
            logs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_bluetooth_printer(self, mac: &str, name: &str) -> Self {
        lock(&self.bluetooth).push(BluetoothPrinterInfo {
            address: mac.to_ascii_uppercase(),
            name: name.to_owned(),
        });
        self
    }

    pub fn with_usb_printer(self, device_name: &str, name: &str, has_permission: bool) -> Self {
        lock(&self.usb).push(UsbPrinterInfo {
            device_name: device_name.to_owned(),
            name: name.to_owned(),
            has_permission,
        });
        self
    }

    pub fn deny(self, transport: TransportKind) -> Self {
        lock(&self.granted).remove(&transport);
        self
    }

    pub fn grant(&self, transport: TransportKind) {
        lock(&self.granted).insert(transport);
    }

    /// Make the `index`-th write (0-based) to `device` fail.
    pub fn fail_write(&self, device: &str, index: usize) {
        lock(&self.logs).entry(device.to_owned()).or_default().fail_on_write = Some(index);
    }

    /// Make every write to `device` take `delay`.
    pub fn delay_writes(&self, device: &str, delay: Duration) {
        lock(&self.logs).entry(device.to_owned()).or_default().write_delay = Some(delay);
    }

    /// Make opening `device` take `delay`.
    pub fn delay_opens(&self, device: &str, delay: Duration) {
        lock(&self.logs).entry(device.to_owned()).or_default().open_delay = Some(delay);
    }

    /// Make opening `device` fail as if it were switched off.
    pub fn refuse_open(&self, device: &str) {
        lock(&self.logs).entry(device.to_owned()).or_default().refuse_open = true;
    }

    /// Bytes successfully written to `device`, one entry per write.
    pub fn writes(&self, device: &str) -> Vec<Vec<u8>> {
        lock(&self.logs)
            .get(device)
            .map(|log| log.writes.clone())
            .unwrap_or_default()
    }

    /// Writes decoded as text, for readable assertions.
    pub fn written_lines(&self, device: &str) -> Vec<String> {
        self.writes(device)
            .into_iter()
            .map(|w| String::from_utf8_lossy(&w).into_owned())
            .collect()
    }

    pub fn open_count(&self, device: &str) -> u32 {
        lock(&self.logs).get(device).map_or(0, |log| log.opens)
    }

    pub fn close_count(&self, device: &str) -> u32 {
        lock(&self.logs).get(device).map_or(0, |log| log.closes)
    }

    fn open_channel(&self, device: &str) -> Result<Box<dyn NativeChannel>> {
        let delay = lock(&self.logs).get(device).and_then(|log| log.open_delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut logs = lock(&self.logs);
        let log = logs.entry(device.to_owned()).or_default();
        if log.refuse_open {
            return Err(BonwerkError::Bridge(format!("{device} did not answer")));
        }
        log.opens += 1;
        Ok(Box::new(MemoryChannel {
            device: device.to_owned(),
            logs: Arc::clone(&self.logs),
            closed: false,
        }))
    }
}

impl PlatformBridge for InMemoryBridge {
    fn platform_name(&self) -> &str {
        "In-memory"
    }
}

impl PermissionGate for InMemoryBridge {
    fn is_granted(&self, transport: TransportKind) -> bool {
        lock(&self.granted).contains(&transport)
    }
}

impl NativeBluetooth for InMemoryBridge {
    fn paired_printers(&self) -> Result<Vec<BluetoothPrinterInfo>> {
        Ok(lock(&self.bluetooth).clone())
    }

    fn open_rfcomm(&self, mac: &str) -> Result<Box<dyn NativeChannel>> {
        self.open_channel(mac)
    }
}

impl NativeUsb for InMemoryBridge {
    fn attached_printers(&self) -> Result<Vec<UsbPrinterInfo>> {
        Ok(lock(&self.usb).clone())
    }

    fn claim_interface(&self, device_name: &str) -> Result<Box<dyn NativeChannel>> {
        self.open_channel(device_name)
    }
}

impl NativePrinterDriver for InMemoryBridge {
    fn encode(&self, operation: &PrintOperation, _profile: &PrinterProfile) -> Result<Vec<u8>> {
        Ok(describe(operation).into_bytes())
    }
}

/// Readable stand-in for device bytes: `printLine:A`, `feedPaper:3`, ...
pub fn describe(operation: &PrintOperation) -> String {
    match operation {
        PrintOperation::PrintLine(text) => format!("{}:{text}", operation.name()),
        PrintOperation::FeedPaper(lines) => format!("{}:{lines}", operation.name()),
        other => other.name().to_owned(),
    }
}

struct MemoryChannel {
    device: String,
    logs: Logs,
    closed: bool,
}

impl NativeChannel for MemoryChannel {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(BonwerkError::Bridge(format!("{} channel is closed", self.device)));
        }
        let (attempt, delay, fail_on) = {
            let mut logs = lock(&self.logs);
            let log = logs.entry(self.device.clone()).or_default();
            let attempt = log.write_attempts;
            log.write_attempts += 1;
            (attempt, log.write_delay, log.fail_on_write)
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if fail_on == Some(attempt) {
            return Err(BonwerkError::Bridge(format!(
                "{} rejected write #{attempt}",
                self.device
            )));
        }

        lock(&self.logs)
            .entry(self.device.clone())
            .or_default()
            .writes
            .push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            lock(&self.logs).entry(self.device.clone()).or_default().closes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_writes_and_closes_per_device() {
        let bridge = InMemoryBridge::new().with_bluetooth_printer("00:11:22:33:44:55", "RPP02N");
        let mut channel = bridge.open_rfcomm("00:11:22:33:44:55").unwrap();
        channel.write(b"hello").unwrap();
        channel.close().unwrap();
        channel.close().unwrap();

        assert_eq!(bridge.written_lines("00:11:22:33:44:55"), vec!["hello"]);
        assert_eq!(bridge.open_count("00:11:22:33:44:55"), 1);
        assert_eq!(bridge.close_count("00:11:22:33:44:55"), 1);
        assert!(channel.write(b"late").is_err());
    }

    #[test]
    fn injected_failure_hits_the_chosen_write() {
        let bridge = InMemoryBridge::new();
        bridge.fail_write("dev", 1);
        let mut channel = bridge.claim_interface("dev").unwrap();
        channel.write(b"a").unwrap();
        assert!(channel.write(b"b").is_err());
        channel.write(b"c").unwrap();
        assert_eq!(bridge.written_lines("dev"), vec!["a", "c"]);
    }

    #[test]
    fn denied_transport_is_reported() {
        let bridge = InMemoryBridge::new().deny(TransportKind::Bluetooth);
        assert!(!bridge.is_granted(TransportKind::Bluetooth));
        assert!(bridge.is_granted(TransportKind::Usb));
    }

    #[test]
    fn describe_is_readable() {
        assert_eq!(describe(&PrintOperation::PrintLine("A".into())), "printLine:A");
        assert_eq!(describe(&PrintOperation::CutPaper), "cutPaper");
    }
}
