// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport resolution: DeviceAddress -> open ConnectionHandle.
//
// Network addresses connect directly.  Bluetooth, USB and serial addresses
// are first matched against the devices the OS currently reports, so a
// missing device (`NotFound`) is told apart from one that is present but
// does not answer (`Unreachable`).

use std::sync::Arc;

use async_trait::async_trait;
use serial2_tokio::SerialPort;
use tracing::{debug, info, instrument};

use bonwerk_bridge::PlatformBridge;
use bonwerk_core::config::ConnectionConfig;
use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::{DEFAULT_BAUD_RATE, DeviceAddress, TransportKind};

use crate::connection::{ConnectionHandle, NativeConnection, SerialConnection, TcpConnection};

/// Anything that can turn an address into an open handle.
///
/// The orchestrator depends on this rather than on [`TransportResolver`]
/// directly.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, address: &DeviceAddress) -> Result<Box<dyn ConnectionHandle>>;
}

/// A device the OS currently reports for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    pub address: DeviceAddress,
    pub display_name: String,
    /// False for attached USB devices the user has not granted yet.
    pub has_permission: bool,
}

/// Resolves addresses on all four transports.
pub struct TransportResolver {
    bridge: Arc<dyn PlatformBridge>,
    config: ConnectionConfig,
}

impl TransportResolver {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: ConnectionConfig) -> Self {
        Self { bridge, config }
    }

    pub fn bridge(&self) -> &Arc<dyn PlatformBridge> {
        &self.bridge
    }

    fn ensure_granted(&self, transport: TransportKind) -> Result<()> {
        if self.bridge.is_granted(transport) {
            Ok(())
        } else {
            Err(BonwerkError::PermissionDenied(transport))
        }
    }

    /// Devices currently paired (Bluetooth), attached (USB) or present
    /// (serial).  Network printers are not enumerable; the list is empty.
    pub fn list_devices(&self, transport: TransportKind) -> Result<Vec<DeviceListing>> {
        let devices = match transport {
            TransportKind::Network => Vec::new(),
            TransportKind::Bluetooth => {
                self.ensure_granted(transport)?;
                self.bridge
                    .paired_printers()?
                    .into_iter()
                    .map(|p| DeviceListing {
                        address: DeviceAddress::bluetooth(p.address),
                        display_name: p.name,
                        has_permission: true,
                    })
                    .collect()
            }
            TransportKind::Usb => {
                self.ensure_granted(transport)?;
                self.bridge
                    .attached_printers()?
                    .into_iter()
                    .map(|p| DeviceListing {
                        address: DeviceAddress::usb(p.device_name),
                        display_name: p.name,
                        has_permission: p.has_permission,
                    })
                    .collect()
            }
            TransportKind::Serial => {
                self.ensure_granted(transport)?;
                SerialPort::available_ports()?
                    .into_iter()
                    .map(|path| {
                        let display_name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| path.display().to_string());
                        DeviceListing {
                            address: DeviceAddress::serial(
                                path.display().to_string(),
                                DEFAULT_BAUD_RATE,
                            ),
                            display_name,
                            has_permission: true,
                        }
                    })
                    .collect()
            }
        };
        debug!(%transport, count = devices.len(), "listed devices");
        Ok(devices)
    }

    /// Open and immediately close a handle to `address`.
    pub async fn test_connection(&self, address: &DeviceAddress) -> Result<()> {
        let mut handle = self.resolve(address).await?;
        handle.close().await?;
        info!(addr = %address, "connection test passed");
        Ok(())
    }

    /// Open a bridge channel within the connect timeout.  A channel that
    /// opens after the deadline is closed as soon as it arrives.
    async fn open_native(&self, address: &DeviceAddress) -> Result<Box<dyn ConnectionHandle>> {
        let bridge = Arc::clone(&self.bridge);
        let transport = address.transport;
        let identifier = address.identifier.clone();
        let deadline = self.config.connect_timeout();

        let mut opening = tokio::task::spawn_blocking(move || match transport {
            TransportKind::Usb => bridge.claim_interface(&identifier),
            _ => bridge.open_rfcomm(&identifier),
        });
        let channel = match tokio::time::timeout(deadline, &mut opening).await {
            Ok(joined) => joined
                .map_err(|e| BonwerkError::Bridge(format!("open task: {e}")))?
                .map_err(|e| BonwerkError::unreachable(address.to_string(), e))?,
            Err(_) => {
                let late = address.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(mut channel)) = opening.await {
                        debug!(addr = %late, "closing channel that opened after its deadline");
                        let _ = tokio::task::spawn_blocking(move || channel.close()).await;
                    }
                });
                return Err(BonwerkError::unreachable(
                    address.to_string(),
                    format!("no answer within {}ms", deadline.as_millis()),
                ));
            }
        };

        Ok(Box::new(NativeConnection::new(address.clone(), channel, &self.config)))
    }

    fn not_found(address: &DeviceAddress) -> BonwerkError {
        BonwerkError::NotFound {
            transport: address.transport,
            identifier: address.identifier.clone(),
        }
    }
}

#[async_trait]
impl Resolve for TransportResolver {
    #[instrument(skip(self), fields(addr = %address))]
    async fn resolve(&self, address: &DeviceAddress) -> Result<Box<dyn ConnectionHandle>> {
        match address.transport {
            TransportKind::Network => {
                let conn = TcpConnection::connect(address.clone(), &self.config).await?;
                Ok(Box::new(conn))
            }
            TransportKind::Bluetooth => {
                self.ensure_granted(TransportKind::Bluetooth)?;
                let paired = self.bridge.paired_printers()?;
                if !paired.iter().any(|p| p.address.eq_ignore_ascii_case(&address.identifier)) {
                    return Err(Self::not_found(address));
                }
                self.open_native(address).await
            }
            TransportKind::Usb => {
                self.ensure_granted(TransportKind::Usb)?;
                let attached = self.bridge.attached_printers()?;
                let device = attached
                    .iter()
                    .find(|p| p.device_name == address.identifier)
                    .ok_or_else(|| Self::not_found(address))?;
                if !device.has_permission {
                    return Err(BonwerkError::PermissionDenied(TransportKind::Usb));
                }
                self.open_native(address).await
            }
            TransportKind::Serial => {
                self.ensure_granted(TransportKind::Serial)?;
                let present = SerialPort::available_ports()?
                    .iter()
                    .any(|p| p.display().to_string() == address.identifier);
                if !present {
                    return Err(Self::not_found(address));
                }
                let conn = SerialConnection::open(address.clone(), &self.config)?;
                Ok(Box::new(conn))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use bonwerk_bridge::InMemoryBridge;
    use tokio::net::TcpListener;

    const MAC: &str = "00:11:22:33:44:55";

    fn resolver(bridge: InMemoryBridge) -> (Arc<InMemoryBridge>, TransportResolver) {
        let bridge = Arc::new(bridge);
        let resolver = TransportResolver::new(bridge.clone(), ConnectionConfig::default());
        (bridge, resolver)
    }

    #[tokio::test]
    async fn unanswered_network_address_is_unreachable_within_timeout() {
        let config = ConnectionConfig {
            connect_timeout_ms: 300,
            ..Default::default()
        };
        let resolver = TransportResolver::new(Arc::new(InMemoryBridge::new()), config);

        let started = Instant::now();
        let err = resolver
            .resolve(&DeviceAddress::network("10.0.0.5", 9100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BonwerkError::Unreachable { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn network_address_with_listener_resolves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (_, resolver) = resolver(InMemoryBridge::new());

        resolver
            .test_connection(&DeviceAddress::network("127.0.0.1", port))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unpaired_bluetooth_address_is_not_found() {
        let (_, resolver) = resolver(InMemoryBridge::new().with_bluetooth_printer(MAC, "RPP02N"));
        let err = resolver
            .resolve(&DeviceAddress::bluetooth("66:77:88:99:AA:BB"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BonwerkError::NotFound { .. }));
    }

    #[tokio::test]
    async fn paired_but_silent_bluetooth_printer_is_unreachable() {
        let (bridge, resolver) =
            resolver(InMemoryBridge::new().with_bluetooth_printer(MAC, "RPP02N"));
        bridge.refuse_open(MAC);
        let err = resolver
            .resolve(&DeviceAddress::bluetooth(MAC))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BonwerkError::Unreachable { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_native_open_is_unreachable_within_timeout() {
        let bridge = Arc::new(InMemoryBridge::new().with_bluetooth_printer(MAC, "RPP02N"));
        bridge.delay_opens(MAC, Duration::from_millis(800));
        let config = ConnectionConfig {
            connect_timeout_ms: 100,
            ..Default::default()
        };
        let resolver = TransportResolver::new(bridge.clone(), config);

        let started = Instant::now();
        let err = resolver
            .resolve(&DeviceAddress::bluetooth(MAC))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BonwerkError::Unreachable { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_millis(600));

        // The late channel is not leaked.
        let deadline = Instant::now() + Duration::from_secs(3);
        while bridge.close_count(MAC) == 0 {
            assert!(Instant::now() < deadline, "late channel never closed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bridge.open_count(MAC), 1);
    }

    #[tokio::test]
    async fn paired_printer_matches_regardless_of_case() {
        let (_, resolver) = resolver(InMemoryBridge::new().with_bluetooth_printer(MAC, "RPP02N"));
        let mut handle = resolver
            .resolve(&DeviceAddress::bluetooth("00:11:22:33:44:55".to_ascii_lowercase()))
            .await
            .unwrap();
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn denied_transports_fail_fast() {
        let (_, resolver) = resolver(
            InMemoryBridge::new()
                .with_bluetooth_printer(MAC, "RPP02N")
                .deny(TransportKind::Bluetooth)
                .deny(TransportKind::Serial),
        );
        let err = resolver
            .resolve(&DeviceAddress::bluetooth(MAC))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BonwerkError::PermissionDenied(TransportKind::Bluetooth)));

        let err = resolver
            .resolve(&DeviceAddress::serial("/dev/ttyUSB0", 9600))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BonwerkError::PermissionDenied(TransportKind::Serial)));
    }

    #[tokio::test]
    async fn usb_device_without_grant_is_permission_denied() {
        let (_, resolver) = resolver(
            InMemoryBridge::new()
                .with_usb_printer("/dev/bus/usb/001/004", "POS-80", false)
                .with_usb_printer("/dev/bus/usb/001/005", "POS-58", true),
        );
        let err = resolver
            .resolve(&DeviceAddress::usb("/dev/bus/usb/001/004"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BonwerkError::PermissionDenied(TransportKind::Usb)));

        let mut handle = resolver
            .resolve(&DeviceAddress::usb("/dev/bus/usb/001/005"))
            .await
            .unwrap();
        assert!(handle.is_open());
        handle.close().await.unwrap();
    }

    #[test]
    fn lists_usb_devices_with_their_permission() {
        let (_, resolver) = resolver(
            InMemoryBridge::new()
                .with_usb_printer("/dev/bus/usb/001/004", "POS-80", false)
                .with_usb_printer("/dev/bus/usb/001/005", "POS-58", true),
        );
        let devices = resolver.list_devices(TransportKind::Usb).unwrap();
        assert_eq!(devices.len(), 2);
        assert!(!devices[0].has_permission);
        assert_eq!(devices[1].display_name, "POS-58");
        assert!(resolver.list_devices(TransportKind::Network).unwrap().is_empty());
    }
}
