// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub bridge for desktop/CI builds where the native mobile stacks are
// unavailable.
//
// Network and serial work natively on desktop, so those permissions are
// granted.  Bluetooth and USB return `PlatformUnavailable`.

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::{PrintOperation, PrinterProfile, TransportKind};

use crate::traits::*;

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;

/// Bridge returned on non-mobile platforms.
pub struct StubBridge;

impl PlatformBridge for StubBridge {
    fn platform_name(&self) -> &str {
        "Desktop (stub)"
    }
}

impl PermissionGate for StubBridge {
    fn is_granted(&self, transport: TransportKind) -> bool {
        matches!(transport, TransportKind::Network | TransportKind::Serial)
    }
}

impl NativeBluetooth for StubBridge {
    fn paired_printers(&self) -> Result<Vec<BluetoothPrinterInfo>> {
        tracing::warn!("NativeBluetooth::paired_printers called on stub bridge");
        Err(BonwerkError::PlatformUnavailable)
    }

    fn open_rfcomm(&self, _mac: &str) -> Result<Box<dyn NativeChannel>> {
        Err(BonwerkError::PlatformUnavailable)
    }
}

impl NativeUsb for StubBridge {
    fn attached_printers(&self) -> Result<Vec<UsbPrinterInfo>> {
        tracing::warn!("NativeUsb::attached_printers called on stub bridge");
        Err(BonwerkError::PlatformUnavailable)
    }

    fn claim_interface(&self, _device_name: &str) -> Result<Box<dyn NativeChannel>> {
        Err(BonwerkError::PlatformUnavailable)
    }
}

/// Plain control codes only: no markup, images, code pages, or barcodes.
impl NativePrinterDriver for StubBridge {
    fn encode(&self, operation: &PrintOperation, _profile: &PrinterProfile) -> Result<Vec<u8>> {
        let bytes = match operation {
            PrintOperation::InitializePrinter => vec![ESC, b'@'],
            PrintOperation::PrintLine(text) => {
                let mut line = text.as_bytes().to_vec();
                line.push(b'\n');
                line
            }
            PrintOperation::FeedPaper(lines) => {
                let lines = u8::try_from(*lines).map_err(|_| {
                    BonwerkError::InvalidConfig(format!("cannot feed {lines} lines at once"))
                })?;
                vec![ESC, b'd', lines]
            }
            PrintOperation::CutPaper => vec![GS, b'V', 0x01],
            PrintOperation::OpenCashDrawer => vec![ESC, b'p', 0x00, 0x3c, 0xff],
        };
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bonwerk_core::DeviceAddress;

    fn profile() -> PrinterProfile {
        PrinterProfile::new(DeviceAddress::network("10.0.0.5", 9100)).unwrap()
    }

    #[test]
    fn desktop_grants_native_transports_only() {
        assert!(StubBridge.is_granted(TransportKind::Network));
        assert!(StubBridge.is_granted(TransportKind::Serial));
        assert!(!StubBridge.is_granted(TransportKind::Bluetooth));
        assert!(!StubBridge.is_granted(TransportKind::Usb));
    }

    #[test]
    fn encodes_plain_control_codes() {
        let line = StubBridge
            .encode(&PrintOperation::PrintLine("TOTAL".into()), &profile())
            .unwrap();
        assert_eq!(line, b"TOTAL\n");
        let feed = StubBridge.encode(&PrintOperation::FeedPaper(3), &profile()).unwrap();
        assert_eq!(feed, vec![ESC, b'd', 3]);
        assert!(StubBridge.encode(&PrintOperation::FeedPaper(300), &profile()).is_err());
    }
}
