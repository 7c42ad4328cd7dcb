//! GATT abstractions the manager talks to.
//!
//! A host wires these to its platform BLE stack; tests use in-memory fakes.
//! Absence of a service or characteristic is `Ok(None)`; `Err` is reserved
//! for transport failures.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::PeripheralError;

/// Opaque identity of one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(service, characteristic)` pair: the unit guarded against overlapping
/// writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicKey {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicKey {
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// An open connection to one device.
#[async_trait]
pub trait GattServer: Send + Sync {
    /// Resolve a primary service by UUID.
    async fn primary_service(
        &self,
        service: Uuid,
    ) -> Result<Option<Arc<dyn GattService>>, PeripheralError>;
}

#[async_trait]
pub trait GattService: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn characteristic(
        &self,
        characteristic: Uuid,
    ) -> Result<Option<Arc<dyn GattCharacteristic>>, PeripheralError>;
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    fn uuid(&self) -> Uuid;

    /// Write a value; resolves once the device acknowledges it.
    async fn write_value(&self, value: Bytes) -> Result<(), PeripheralError>;

    /// Enable notifications and return the stream of incoming values.
    async fn start_notifications(&self) -> Result<BoxStream<'static, Bytes>, PeripheralError>;

    async fn stop_notifications(&self) -> Result<(), PeripheralError>;
}
