//! High-level management of multiple Kasa devices.
//! Provides unified reading streaming and system-level optimizations (e.g., FD limit).

use crate::device::Device;
use crate::error::{KasaError, Result};
use crate::readings::ReadingBatch;
use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

/// A reading batch from any device managed by a [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerEvent {
    pub device_id: String,
    pub batch: ReadingBatch,
}

/// A high-level manager for multiple Kasa devices.
///
/// Devices are independent: each keeps its own poll task, so a slow or
/// unreachable device never stalls the others. The manager owns its devices
/// and funnels every emitted reading batch into one event stream.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    devices: RwLock<HashMap<String, Device>>,
    device_tokens: RwLock<HashMap<String, CancellationToken>>,
    event_tx: broadcast::Sender<ManagerEvent>,
    cancel_token: CancellationToken,
}

impl Manager {
    /// Maximizes the file descriptor limit for the current process.
    ///
    /// Each exchange is a fresh socket, so large fleets benefit from a high
    /// limit on Unix-like systems. On non-Unix systems, this does nothing.
    pub fn maximize_fd_limit() -> Result<()> {
        #[cfg(unix)]
        {
            let (soft, hard) = rlimit::getrlimit(rlimit::Resource::NOFILE)
                .map_err(|e| KasaError::Io(format!("Failed to get rlimit: {}", e)))?;

            if soft < hard {
                rlimit::setrlimit(rlimit::Resource::NOFILE, hard, hard)
                    .map_err(|e| KasaError::Io(format!("Failed to set rlimit: {}", e)))?;
                info!("File descriptor limit increased from {} to {}", soft, hard);
            }
        }
        Ok(())
    }

    /// Create a new Manager.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(ManagerInner {
                devices: RwLock::new(HashMap::new()),
                device_tokens: RwLock::new(HashMap::new()),
                event_tx,
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    /// Returns a Stream of reading batches from all managed devices.
    pub fn stream(&self) -> impl Stream<Item = ManagerEvent> + use<> {
        let mut rx = self.inner.event_tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    /// Add a device to the manager under the given ID.
    ///
    /// Returns an error if a device with the same ID already exists.
    pub async fn add(&self, id: &str, device: Device) -> Result<()> {
        let mut devices = self.inner.devices.write().await;
        let mut device_tokens = self.inner.device_tokens.write().await;

        if devices.contains_key(id) {
            return Err(KasaError::DuplicateDevice(id.to_string()));
        }

        let device_token = self.inner.cancel_token.child_token();
        self.spawn_device_monitor(id, device.clone(), device_token.clone());

        devices.insert(id.to_string(), device);
        device_tokens.insert(id.to_string(), device_token);

        info!("Device {} added to manager", id);
        Ok(())
    }

    fn spawn_device_monitor(&self, id: &str, device: Device, token: CancellationToken) {
        let device_id = id.to_string();
        let event_tx = self.inner.event_tx.clone();

        tokio::spawn(async move {
            let stream = device.stream();
            tokio::pin!(stream);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    batch = stream.next() => {
                        match batch {
                            Some(batch) => {
                                let _ = event_tx.send(ManagerEvent {
                                    device_id: device_id.clone(),
                                    batch,
                                });
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("Monitor for device {} stopped", device_id);
        });
    }

    /// Remove a device from the manager and stop its session.
    pub async fn remove(&self, id: &str) {
        let mut devices = self.inner.devices.write().await;
        let mut device_tokens = self.inner.device_tokens.write().await;

        if let Some(device) = devices.remove(id) {
            if let Some(token) = device_tokens.remove(id) {
                token.cancel();
            }
            device.stop();
            info!("Device {} removed from manager", id);
        } else {
            warn!("Attempted to remove non-existent device {}", id);
        }
    }

    /// List all managed devices. Returns a map of device ID -> enabled
    /// (i.e. not disabled; no network request).
    pub async fn list(&self) -> HashMap<String, bool> {
        let devices = self.inner.devices.read().await;
        devices
            .iter()
            .map(|(id, device)| (id.clone(), !device.is_disabled()))
            .collect()
    }

    /// Get a device by ID.
    pub async fn get(&self, id: &str) -> Option<Device> {
        self.inner.devices.read().await.get(id).cloned()
    }

    /// Shutdown the manager, stopping all managed devices.
    pub async fn shutdown(self) {
        self.inner.cancel_token.cancel();

        let mut devices = self.inner.devices.write().await;
        let mut tokens = self.inner.device_tokens.write().await;

        for (_, device) in devices.drain() {
            device.stop();
        }
        tokens.clear();
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // Trigger cancellation for background monitor tasks.
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::protocol::{self, HEADER_LEN};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn spawn_status_stub() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let mut header = [0u8; HEADER_LEN];
                if sock.read_exact(&mut header).await.is_err() {
                    continue;
                }
                let mut body = vec![0u8; protocol::parse_header(&header)];
                if sock.read_exact(&mut body).await.is_err() {
                    continue;
                }
                let _ = crypto::decode(&body);
                let response = json!({
                    "system": {"get_sysinfo": {"relay_state": 0}}
                })
                .to_string();
                let _ = sock.write_all(&protocol::pack_frame(response.as_bytes())).await;
            }
        });

        port
    }

    fn stub_device(port: u16) -> Device {
        Device::builder("127.0.0.1")
            .port(port)
            .poll_interval_secs(3600)
            .connect_timeout(Duration::from_millis(500))
            .timeout_secs(0.5)
            .build()
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let port = spawn_status_stub().await;
        let manager = Manager::new();

        manager.add("plug", stub_device(port)).await.unwrap();
        let err = manager.add("plug", stub_device(port)).await.unwrap_err();
        assert_eq!(err, KasaError::DuplicateDevice("plug".into()));

        assert_eq!(manager.list().await.len(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn events_carry_the_device_id() {
        let port = spawn_status_stub().await;
        let manager = Manager::new();
        manager.add("plug", stub_device(port)).await.unwrap();

        let stream = manager.stream();
        tokio::pin!(stream);

        manager.get("plug").await.unwrap().poll().await.unwrap();

        let event = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("batch must be forwarded")
            .unwrap();
        assert_eq!(event.device_id, "plug");
        assert_eq!(event.batch.get("state"), Some(&json!("off")));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn removed_devices_stop_forwarding() {
        let port = spawn_status_stub().await;
        let manager = Manager::new();
        manager.add("plug", stub_device(port)).await.unwrap();

        manager.remove("plug").await;
        assert!(manager.get("plug").await.is_none());
        assert!(manager.list().await.is_empty());
    }
}
