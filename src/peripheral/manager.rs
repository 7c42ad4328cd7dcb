//! The peripheral connection manager.
//!
//! Holds every open device session in connection order and a process-wide
//! guard per characteristic. A write claims the guard, resolves the
//! characteristic across sessions, performs the hardware write and releases
//! the guard on every exit path. A second write to the same characteristic
//! while the first is in flight is dropped.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::PeripheralConfig;

use super::error::PeripheralError;
use super::gatt::{CharacteristicKey, DeviceId, GattCharacteristic, GattServer};

/// Result of a write that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The value reached the device.
    Written,
    /// Another write to the same characteristic was in flight; nothing was sent.
    Dropped,
}

/// A characteristic found on one of the open sessions.
#[derive(Clone)]
pub struct ResolvedCharacteristic {
    pub device: DeviceId,
    pub key: CharacteristicKey,
    pub characteristic: Arc<dyn GattCharacteristic>,
}

impl std::fmt::Debug for ResolvedCharacteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCharacteristic")
            .field("device", &self.device)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Handle to an active notification subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationHandle {
    id: u64,
    device: DeviceId,
    key: CharacteristicKey,
}

impl NotificationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn key(&self) -> CharacteristicKey {
        self.key
    }
}

struct Session {
    device: DeviceId,
    server: Arc<dyn GattServer>,
}

struct GuardEntry {
    token: u64,
    /// Set once the write has resolved its characteristic.
    device: Option<DeviceId>,
}

struct NotificationEntry {
    device: DeviceId,
    characteristic: Arc<dyn GattCharacteristic>,
    task: JoinHandle<()>,
}

/// Releases a characteristic guard when the write that claimed it ends.
struct GuardLease<'a> {
    guards: &'a DashMap<CharacteristicKey, GuardEntry>,
    key: CharacteristicKey,
    token: u64,
}

impl Drop for GuardLease<'_> {
    fn drop(&mut self) {
        // The entry may belong to a newer write if our session was removed.
        self.guards.remove_if(&self.key, |_, g| g.token == self.token);
    }
}

pub struct PeripheralManager {
    config: PeripheralConfig,
    sessions: RwLock<Vec<Session>>,
    guards: DashMap<CharacteristicKey, GuardEntry>,
    notifications: Mutex<HashMap<u64, NotificationEntry>>,
    next_token: AtomicU64,
}

impl PeripheralManager {
    pub fn new(config: PeripheralConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(Vec::new()),
            guards: DashMap::new(),
            notifications: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    // --- Sessions ---

    /// Register a device's open connection.
    ///
    /// A device has at most one session: adding it again replaces the old
    /// one, invalidating its guards and notifications.
    pub fn add_session(&self, device: DeviceId, server: Arc<dyn GattServer>) {
        if self.remove_session(&device) {
            log::info!("[Peripheral] replacing session for {}", device);
        } else {
            log::info!("[Peripheral] session added for {}", device);
        }
        self.sessions.write().push(Session { device, server });
    }

    /// Deregister a device's connection. Returns `false` if it had none.
    pub fn remove_session(&self, device: &DeviceId) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            let before = sessions.len();
            sessions.retain(|s| s.device != *device);
            sessions.len() != before
        };
        if !removed {
            return false;
        }

        self.guards
            .retain(|_, g| g.device.as_ref() != Some(device));
        let stale: Vec<NotificationEntry> = {
            let mut notifications = self.notifications.lock();
            let ids: Vec<u64> = notifications
                .iter()
                .filter(|(_, n)| n.device == *device)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| notifications.remove(&id))
                .collect()
        };
        for entry in stale {
            entry.task.abort();
        }
        log::info!("[Peripheral] session removed for {}", device);
        true
    }

    /// Devices with an open session, in connection order.
    pub fn sessions(&self) -> Vec<DeviceId> {
        self.sessions.read().iter().map(|s| s.device.clone()).collect()
    }

    /// Drop every session.
    pub fn clear_sessions(&self) {
        for device in self.sessions() {
            self.remove_session(&device);
        }
    }

    // --- Resolution ---

    /// Find the first open session exposing `key`.
    ///
    /// A session that lacks the service or fails to answer is skipped.
    pub async fn find_characteristic(&self, key: CharacteristicKey) -> Option<ResolvedCharacteristic> {
        let sessions: Vec<(DeviceId, Arc<dyn GattServer>)> = self
            .sessions
            .read()
            .iter()
            .map(|s| (s.device.clone(), s.server.clone()))
            .collect();

        for (device, server) in sessions {
            let service = match server.primary_service(key.service).await {
                Ok(Some(service)) => service,
                Ok(None) => {
                    log::debug!("[Peripheral] {} has no service {}", device, key.service);
                    continue;
                }
                Err(e) => {
                    log::debug!("[Peripheral] {} service lookup failed: {}", device, e);
                    continue;
                }
            };
            match service.characteristic(key.characteristic).await {
                Ok(Some(characteristic)) => {
                    return Some(ResolvedCharacteristic {
                        device,
                        key,
                        characteristic,
                    })
                }
                Ok(None) => {
                    log::debug!("[Peripheral] {} has no characteristic {}", device, key);
                }
                Err(e) => {
                    log::debug!("[Peripheral] {} characteristic lookup failed: {}", device, e);
                }
            }
        }
        None
    }

    /// Whether a write to `key` is currently in flight.
    pub fn is_write_in_flight(&self, key: CharacteristicKey) -> bool {
        self.guards.contains_key(&key)
    }

    // --- Writes ---

    /// Write `value` to the characteristic, unless a write to it is already
    /// in flight. No retries are attempted.
    pub async fn write(
        &self,
        key: CharacteristicKey,
        value: impl Into<Bytes>,
    ) -> Result<WriteOutcome, PeripheralError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        match self.guards.entry(key) {
            Entry::Occupied(_) => {
                log::debug!("[Peripheral] write to {} dropped: already in flight", key);
                return Ok(WriteOutcome::Dropped);
            }
            Entry::Vacant(slot) => {
                slot.insert(GuardEntry {
                    token,
                    device: None,
                });
            }
        }
        let _lease = GuardLease {
            guards: &self.guards,
            key,
            token,
        };

        let resolved = self
            .find_characteristic(key)
            .await
            .ok_or(PeripheralError::ServiceUnavailable(key))?;
        {
            // Bind the guard to its device while the session list cannot
            // change, so a concurrent `remove_session` either sees the
            // binding or has already removed the device.
            let sessions = self.sessions.read();
            if !sessions.iter().any(|s| s.device == resolved.device) {
                log::debug!(
                    "[Peripheral] write to {} abandoned: {} disconnected during lookup",
                    key,
                    resolved.device
                );
                return Err(PeripheralError::ServiceUnavailable(key));
            }
            if let Some(mut guard) = self.guards.get_mut(&key) {
                if guard.token == token {
                    guard.device = Some(resolved.device.clone());
                }
            }
        }

        let write = resolved.characteristic.write_value(value.into());
        let result = match self.config.write_timeout() {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => Err(PeripheralError::Timeout {
                    key,
                    millis: limit.as_millis() as u64,
                }),
            },
            None => write.await,
        };

        match result {
            Ok(()) => {
                log::debug!("[Peripheral] wrote {} on {}", key, resolved.device);
                Ok(WriteOutcome::Written)
            }
            Err(e) => {
                log::warn!("[Peripheral] write to {} failed: {}", key, e);
                Err(e)
            }
        }
    }

    // --- Notifications ---

    /// Enable notifications on `key` and call `on_value` for every update.
    ///
    /// Updates are forwarded from a tokio task, so this must be called from
    /// within a runtime.
    pub async fn subscribe_notifications<F>(
        &self,
        key: CharacteristicKey,
        on_value: F,
    ) -> Result<NotificationHandle, PeripheralError>
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        let resolved = self
            .find_characteristic(key)
            .await
            .ok_or(PeripheralError::ServiceUnavailable(key))?;
        let mut stream = resolved.characteristic.start_notifications().await?;

        let device = resolved.device.clone();
        let task = tokio::spawn(async move {
            while let Some(value) = stream.next().await {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| on_value(value))) {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    log::error!("[Peripheral] notification handler for {} panicked: {}", key, message);
                }
            }
            log::debug!("[Peripheral] notification stream for {} ended", key);
        });

        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.notifications.lock().insert(
            id,
            NotificationEntry {
                device: device.clone(),
                characteristic: resolved.characteristic,
                task,
            },
        );
        log::debug!("[Peripheral] notifications on {} from {} (#{})", key, device, id);
        Ok(NotificationHandle { id, device, key })
    }

    /// Stop forwarding updates and disable notifications on the device.
    pub async fn unsubscribe_notifications(
        &self,
        handle: &NotificationHandle,
    ) -> Result<(), PeripheralError> {
        let entry = self.notifications.lock().remove(&handle.id);
        let Some(entry) = entry else {
            log::warn!("[Peripheral] unsubscribe with unknown handle #{}", handle.id);
            return Err(PeripheralError::UnknownNotification(handle.id));
        };
        entry.task.abort();
        entry.characteristic.stop_notifications().await
    }

    /// Number of live notification subscriptions.
    pub fn notification_count(&self) -> usize {
        self.notifications.lock().len()
    }
}

impl Drop for PeripheralManager {
    fn drop(&mut self) {
        for (_, entry) in self.notifications.get_mut().drain() {
            entry.task.abort();
        }
    }
}

impl std::fmt::Debug for PeripheralManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralManager")
            .field("sessions", &self.sessions())
            .field("in_flight", &self.guards.len())
            .field("notifications", &self.notification_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
