// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types: transports, device addresses, and printer profiles.

use serde::{Deserialize, Serialize};

use crate::error::{BonwerkError, Result};

/// Default raw TCP port (HP JetDirect / ESC/POS network printers).
pub const DEFAULT_PRINTER_PORT: u16 = 9100;

/// Default serial line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Printing resolution shared by nearly all thermal receipt printers.
pub const PRINTING_DPI_NORMAL: u32 = 210;

/// Printable width presets, in millimetres, for common paper rolls.
pub const PRINTING_WIDTH_58_MM: f32 = 41.0;
pub const PRINTING_WIDTH_76_MM: f32 = 48.0;
pub const PRINTING_WIDTH_80_MM: f32 = 60.0;

/// Characters-per-line presets.
pub const PRINTING_LINES_MAX_CHAR_33: u32 = 33;
pub const PRINTING_LINES_MAX_CHAR_40: u32 = 40;
pub const PRINTING_LINES_MAX_CHAR_42: u32 = 42;
pub const PRINTING_LINES_MAX_CHAR_56: u32 = 56;

/// Opaque identifier for a print job.
///
/// Callers may supply their own token; otherwise a UUID v4 is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The physical/link-layer means of reaching a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Network,
    Bluetooth,
    Usb,
    Serial,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Network,
        TransportKind::Bluetooth,
        TransportKind::Usb,
        TransportKind::Serial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Bluetooth => "bluetooth",
            Self::Usb => "usb",
            Self::Serial => "serial",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = BonwerkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "network" | "tcp" => Ok(Self::Network),
            "bluetooth" | "bt" => Ok(Self::Bluetooth),
            "usb" => Ok(Self::Usb),
            "serial" => Ok(Self::Serial),
            other => Err(BonwerkError::InvalidConfig(format!(
                "unknown connection type {other:?}"
            ))),
        }
    }
}

/// Identifies a printer within its transport.
///
/// `identifier` is an IP address or host name for network printers, a MAC
/// address for Bluetooth, the OS device name for USB, and the device path
/// for serial ports.  Two printers on different transports may share an
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub transport: TransportKind,
    pub identifier: String,
    /// TCP port, network only.
    pub port: Option<u16>,
    /// Line speed, serial only.
    pub baud_rate: Option<u32>,
}

impl DeviceAddress {
    pub fn network(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: TransportKind::Network,
            identifier: host.into(),
            port: Some(port),
            baud_rate: None,
        }
    }

    pub fn bluetooth(mac: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Bluetooth,
            identifier: mac.into(),
            port: None,
            baud_rate: None,
        }
    }

    pub fn usb(device_name: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Usb,
            identifier: device_name.into(),
            port: None,
            baud_rate: None,
        }
    }

    pub fn serial(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            transport: TransportKind::Serial,
            identifier: path.into(),
            port: None,
            baud_rate: Some(baud_rate),
        }
    }

    /// Port with the network default applied.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PRINTER_PORT)
    }

    /// Baud rate with the serial default applied.
    pub fn baud_rate_or_default(&self) -> u32 {
        self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE)
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.transport {
            TransportKind::Network => {
                write!(f, "network://{}:{}", self.identifier, self.port_or_default())
            }
            TransportKind::Serial => write!(
                f,
                "serial://{}@{}",
                self.identifier,
                self.baud_rate_or_default()
            ),
            kind => write!(f, "{kind}://{}", self.identifier),
        }
    }
}

/// Caller-supplied printer selection, every field but the transport and the
/// address optional.  Validated into a [`PrinterProfile`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrinterConfig {
    pub connection: Option<TransportKind>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub baud_rate: Option<u32>,
    pub dpi: Option<u32>,
    pub width: Option<f32>,
    pub max_chars: Option<u32>,
}

/// Validated, immutable description of a target printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterProfile {
    address: DeviceAddress,
    dpi: u32,
    printable_width_mm: f32,
    max_line_chars: u32,
}

impl PrinterProfile {
    /// Profile with every optional field at its default.
    pub fn new(address: DeviceAddress) -> Result<Self> {
        Self::from_config(&PrinterConfig {
            connection: Some(address.transport),
            address: Some(address.identifier),
            port: address.port,
            baud_rate: address.baud_rate,
            ..PrinterConfig::default()
        })
    }

    /// Validate a caller configuration, filling missing fields with the
    /// per-transport defaults.
    pub fn from_config(config: &PrinterConfig) -> Result<Self> {
        let transport = config
            .connection
            .ok_or_else(|| BonwerkError::InvalidConfig("connection type is required".into()))?;
        let identifier = config
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| BonwerkError::InvalidConfig("address is required".into()))?
            .to_owned();

        let address = match transport {
            TransportKind::Network => {
                let port = config.port.unwrap_or(DEFAULT_PRINTER_PORT);
                if port == 0 {
                    return Err(BonwerkError::InvalidConfig("port must be non-zero".into()));
                }
                DeviceAddress::network(identifier, port)
            }
            TransportKind::Bluetooth => {
                if !is_mac_address(&identifier) {
                    return Err(BonwerkError::InvalidConfig(format!(
                        "{identifier:?} is not a Bluetooth MAC address"
                    )));
                }
                // Paired printers are listed as upper-case, colon separated.
                DeviceAddress::bluetooth(identifier.replace('-', ":").to_ascii_uppercase())
            }
            TransportKind::Usb => DeviceAddress::usb(identifier),
            TransportKind::Serial => {
                let baud = config.baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
                if baud == 0 {
                    return Err(BonwerkError::InvalidConfig("baud rate must be non-zero".into()));
                }
                DeviceAddress::serial(identifier, baud)
            }
        };

        let dpi = config.dpi.unwrap_or(PRINTING_DPI_NORMAL);
        let printable_width_mm = config.width.unwrap_or(PRINTING_WIDTH_80_MM);
        let max_line_chars = config.max_chars.unwrap_or(PRINTING_LINES_MAX_CHAR_42);

        if dpi == 0 {
            return Err(BonwerkError::InvalidConfig("dpi must be non-zero".into()));
        }
        if !(printable_width_mm.is_finite() && printable_width_mm > 0.0) {
            return Err(BonwerkError::InvalidConfig(format!(
                "printable width {printable_width_mm} must be positive"
            )));
        }
        if max_line_chars == 0 {
            return Err(BonwerkError::InvalidConfig("max chars must be non-zero".into()));
        }

        Ok(Self {
            address,
            dpi,
            printable_width_mm,
            max_line_chars,
        })
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn printable_width_mm(&self) -> f32 {
        self.printable_width_mm
    }

    pub fn max_line_chars(&self) -> u32 {
        self.max_line_chars
    }
}

/// `AA:BB:CC:DD:EE:FF` (or `-` separated).
fn is_mac_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split([':', '-']).collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
