// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for the host collaborators.
//
// The print engine never talks to the OS permission system, the Bluetooth or
// USB stacks, or the vendor printer driver directly.  Everything it needs from
// them is expressed here.

use bonwerk_core::error::Result;
use bonwerk_core::{PrintOperation, PrinterProfile, TransportKind};

/// Unified bridge that groups all native capabilities.
pub trait PlatformBridge:
    PermissionGate + NativeBluetooth + NativeUsb + NativePrinterDriver + Send + Sync
{
    /// Human-readable platform name (e.g. "Android 14").
    fn platform_name(&self) -> &str;
}

/// The host's permission system.
pub trait PermissionGate {
    /// Whether the user granted access to `transport`.  Never prompts.
    fn is_granted(&self, transport: TransportKind) -> bool;
}

/// Bonded Bluetooth printers and their RFCOMM channels.
pub trait NativeBluetooth {
    /// Printers currently paired with this device.  Lists, does not scan.
    fn paired_printers(&self) -> Result<Vec<BluetoothPrinterInfo>>;

    /// Open the serial-port-profile channel of a paired printer.
    fn open_rfcomm(&self, mac: &str) -> Result<Box<dyn NativeChannel>>;
}

/// USB printers attached to this device.
pub trait NativeUsb {
    /// Printer-class devices attached right now.
    fn attached_printers(&self) -> Result<Vec<UsbPrinterInfo>>;

    /// Claim the printer interface of an attached device.
    fn claim_interface(&self, device_name: &str) -> Result<Box<dyn NativeChannel>>;
}

/// An open, exclusively owned byte channel handed out by the platform.
///
/// Calls may block briefly; the platform is expected to buffer.
pub trait NativeChannel: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// The vendor printer command library.
///
/// Turns one structured operation into the byte stream the device expects,
/// honouring the profile's width and character settings.
pub trait NativePrinterDriver {
    fn encode(&self, operation: &PrintOperation, profile: &PrinterProfile) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Info structs for each enumerable transport
// ---------------------------------------------------------------------------

/// Bluetooth printer information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothPrinterInfo {
    /// MAC address, upper case.
    pub address: String,
    pub name: String,
}

/// USB printer information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPrinterInfo {
    /// OS device name (e.g. `/dev/bus/usb/001/004`).
    pub device_name: String,
    pub name: String,
    /// Whether the user granted access to this particular device.
    pub has_permission: bool,
}
