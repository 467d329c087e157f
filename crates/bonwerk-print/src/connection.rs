// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection handles: one open, exclusively owned channel to a printer.
//
// Network handles are raw TCP sockets (JetDirect style, port 9100), serial
// handles are `serial2-tokio` ports, and Bluetooth/USB handles wrap the
// channel the platform bridge hands out.  Handles are never pooled: every
// job execution resolves its own and closes it when it is done.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serial2_tokio::SerialPort;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use bonwerk_bridge::NativeChannel;
use bonwerk_core::config::ConnectionConfig;
use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::{DeviceAddress, TransportKind};

/// Uniform byte channel to a printer, whatever the transport.
#[async_trait]
pub trait ConnectionHandle: Send {
    /// Whether `close` has not been called yet.
    fn is_open(&self) -> bool;

    /// Write `bytes` in full.  Never retries.
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release the channel.  Safe to call more than once; only the first
    /// call does anything.
    async fn close(&mut self) -> Result<()>;
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn closed_error(address: &DeviceAddress) -> BonwerkError {
    BonwerkError::OperationFailed {
        operation: "send".into(),
        detail: format!("connection to {address} is closed"),
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Raw TCP connection to a network printer.
pub struct TcpConnection {
    address: DeviceAddress,
    stream: Option<TcpStream>,
    write_timeout: Duration,
}

impl TcpConnection {
    /// Connect within the configured deadline.
    ///
    /// A refused connection and a silent host are both `Unreachable`; the
    /// sweep and the job paths treat them alike.
    pub async fn connect(address: DeviceAddress, config: &ConnectionConfig) -> Result<Self> {
        let target = format!("{}:{}", address.identifier, address.port_or_default());
        let deadline = config.connect_timeout();
        debug!(addr = %target, timeout_ms = millis(deadline), "connecting via raw TCP");

        let stream = tokio::time::timeout(deadline, TcpStream::connect(&target))
            .await
            .map_err(|_| {
                BonwerkError::unreachable(
                    &target,
                    format!("no answer within {}ms", millis(deadline)),
                )
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    BonwerkError::PermissionDenied(TransportKind::Network)
                }
                _ => BonwerkError::unreachable(&target, e),
            })?;

        // Receipt printers expect small writes to go out immediately.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %target, error = %e, "could not disable Nagle");
        }

        info!(addr = %target, "raw TCP connection open");
        Ok(Self {
            address,
            stream: Some(stream),
            write_timeout: config.write_timeout(),
        })
    }
}

#[async_trait]
impl ConnectionHandle for TcpConnection {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| closed_error(&self.address))?;

        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| BonwerkError::Timeout {
                operation: format!("write to {}", self.address),
                millis: millis(self.write_timeout),
            })?
            .map_err(|e| BonwerkError::OperationFailed {
                operation: "send".into(),
                detail: e.to_string(),
            })?;

        debug!(addr = %self.address, bytes = bytes.len(), "raw TCP write");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(addr = %self.address, error = %e, "shutdown on close failed");
            }
            debug!(addr = %self.address, "raw TCP connection closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serial
// ---------------------------------------------------------------------------

/// Serial port opened at the address's baud rate.
pub struct SerialConnection {
    address: DeviceAddress,
    port: Option<SerialPort>,
    write_timeout: Duration,
}

impl SerialConnection {
    pub fn open(address: DeviceAddress, config: &ConnectionConfig) -> Result<Self> {
        let baud = address.baud_rate_or_default();
        let port = SerialPort::open(&address.identifier, baud).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                BonwerkError::PermissionDenied(TransportKind::Serial)
            }
            _ => BonwerkError::unreachable(address.to_string(), e),
        })?;

        info!(path = %address.identifier, baud, "serial port open");
        Ok(Self {
            address,
            port: Some(port),
            write_timeout: config.write_timeout(),
        })
    }
}

#[async_trait]
impl ConnectionHandle for SerialConnection {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| closed_error(&self.address))?;

        tokio::time::timeout(self.write_timeout, port.write_all(bytes))
            .await
            .map_err(|_| BonwerkError::Timeout {
                operation: format!("write to {}", self.address),
                millis: millis(self.write_timeout),
            })?
            .map_err(|e| BonwerkError::OperationFailed {
                operation: "send".into(),
                detail: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(path = %self.address.identifier, "serial port closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bluetooth / USB
// ---------------------------------------------------------------------------

/// A channel opened by the platform bridge (RFCOMM socket or USB interface
/// claim).
///
/// Bridge calls block, so writes and closes run on the blocking pool and are
/// bounded by the write timeout.  A write that outlives its deadline keeps
/// the channel until it returns; a pending close then runs right after it.
/// A channel that is dropped without `close` is closed on drop.
pub struct NativeConnection {
    address: DeviceAddress,
    channel: Option<SharedChannel>,
    write_timeout: Duration,
}

type SharedChannel = Arc<Mutex<Option<Box<dyn NativeChannel>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Close the channel if nobody has yet.  Blocks.
fn close_shared(shared: &SharedChannel) -> Result<()> {
    match lock(shared).take() {
        Some(mut channel) => channel.close(),
        None => Ok(()),
    }
}

impl NativeConnection {
    pub fn new(
        address: DeviceAddress,
        channel: Box<dyn NativeChannel>,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            address,
            channel: Some(Arc::new(Mutex::new(Some(channel)))),
            write_timeout: config.write_timeout(),
        }
    }
}

#[async_trait]
impl ConnectionHandle for NativeConnection {
    fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let shared = self
            .channel
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| closed_error(&self.address))?;
        let payload = bytes.to_vec();

        let write = tokio::task::spawn_blocking(move || {
            let mut channel = lock(&shared);
            match channel.as_mut() {
                Some(channel) => channel.write(&payload),
                None => Err(BonwerkError::Bridge("channel already closed".into())),
            }
        });
        tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| BonwerkError::Timeout {
                operation: format!("write to {}", self.address),
                millis: millis(self.write_timeout),
            })?
            .map_err(|e| BonwerkError::Bridge(format!("channel write task: {e}")))?
    }

    async fn close(&mut self) -> Result<()> {
        let Some(shared) = self.channel.take() else {
            return Ok(());
        };
        let closing = tokio::task::spawn_blocking(move || close_shared(&shared));
        match tokio::time::timeout(self.write_timeout, closing).await {
            Ok(joined) => {
                joined.map_err(|e| BonwerkError::Bridge(format!("channel close task: {e}")))??;
                debug!(addr = %self.address, "native channel closed");
            }
            Err(_) => warn!(
                addr = %self.address,
                "native channel busy, close continues in background"
            ),
        }
        Ok(())
    }
}

impl Drop for NativeConnection {
    fn drop(&mut self) {
        if let Some(shared) = self.channel.take() {
            warn!(addr = %self.address, "native channel dropped while open");
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || {
                        let _ = close_shared(&shared);
                    });
                }
                Err(_) => {
                    let _ = close_shared(&shared);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bonwerk_bridge::{InMemoryBridge, NativeBluetooth, NativeUsb};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_send_reaches_listener_and_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let mut conn = TcpConnection::connect(
            DeviceAddress::network("127.0.0.1", port),
            &ConnectionConfig::default(),
        )
        .await
        .unwrap();
        conn.send(b"TOTAL 12.00\n").await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(!conn.is_open());
        assert!(conn.send(b"late").await.is_err());

        assert_eq!(server.await.unwrap(), b"TOTAL 12.00\n");
    }

    #[tokio::test]
    async fn refused_tcp_connect_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpConnection::connect(
            DeviceAddress::network("127.0.0.1", port),
            &ConnectionConfig::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, BonwerkError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn native_connection_closes_channel_once() {
        let bridge = InMemoryBridge::new().with_bluetooth_printer("00:11:22:33:44:55", "RPP02N");
        let channel = bridge.open_rfcomm("00:11:22:33:44:55").unwrap();
        let mut conn = NativeConnection::new(
            DeviceAddress::bluetooth("00:11:22:33:44:55"),
            channel,
            &ConnectionConfig::default(),
        );

        conn.send(b"hello").await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        drop(conn);

        assert_eq!(bridge.written_lines("00:11:22:33:44:55"), vec!["hello"]);
        assert_eq!(bridge.close_count("00:11:22:33:44:55"), 1);
    }

    async fn wait_for_close(bridge: &InMemoryBridge, device: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while bridge.close_count(device) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "{device} never closed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_native_connection_is_closed() {
        let bridge = InMemoryBridge::new();
        let channel = bridge.open_rfcomm("AA:BB:CC:DD:EE:FF").unwrap();
        drop(NativeConnection::new(
            DeviceAddress::bluetooth("AA:BB:CC:DD:EE:FF"),
            channel,
            &ConnectionConfig::default(),
        ));
        wait_for_close(&bridge, "AA:BB:CC:DD:EE:FF").await;
        assert_eq!(bridge.close_count("AA:BB:CC:DD:EE:FF"), 1);
    }

    #[test]
    fn dropped_outside_a_runtime_closes_inline() {
        let bridge = InMemoryBridge::new();
        let channel = bridge.claim_interface("/dev/bus/usb/001/004").unwrap();
        drop(NativeConnection::new(
            DeviceAddress::usb("/dev/bus/usb/001/004"),
            channel,
            &ConnectionConfig::default(),
        ));
        assert_eq!(bridge.close_count("/dev/bus/usb/001/004"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_native_write_times_out() {
        let bridge = InMemoryBridge::new();
        bridge.delay_writes("AA:BB:CC:DD:EE:FF", Duration::from_millis(800));
        let channel = bridge.open_rfcomm("AA:BB:CC:DD:EE:FF").unwrap();
        let config = ConnectionConfig {
            write_timeout_ms: 100,
            ..ConnectionConfig::default()
        };
        let mut conn =
            NativeConnection::new(DeviceAddress::bluetooth("AA:BB:CC:DD:EE:FF"), channel, &config);

        let started = std::time::Instant::now();
        let err = conn.send(b"slow").await.unwrap_err();
        assert!(matches!(err, BonwerkError::Timeout { millis: 100, .. }), "{err}");
        assert!(started.elapsed() < Duration::from_millis(600));

        // Close is bounded too and lands once the stalled write returns.
        let started = std::time::Instant::now();
        conn.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(600));
        assert!(!conn.is_open());
        wait_for_close(&bridge, "AA:BB:CC:DD:EE:FF").await;
        assert_eq!(bridge.close_count("AA:BB:CC:DD:EE:FF"), 1);
    }
}
