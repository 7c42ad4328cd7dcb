//! Peripheral connection errors.

use thiserror::Error;

use super::gatt::{CharacteristicKey, DeviceId};

/// Failures at the wireless boundary.
///
/// A write dropped by the characteristic guard is not an error; see
/// [`WriteOutcome::Dropped`](super::WriteOutcome::Dropped).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeripheralError {
    /// No open session exposes the characteristic.
    #[error("No connected session has {0}")]
    ServiceUnavailable(CharacteristicKey),

    /// The device or its stack reported a failure.
    #[error("Transport error on {device}: {message}")]
    Transport { device: DeviceId, message: String },

    /// A write did not complete within the configured bound.
    #[error("Write to {key} timed out after {millis} ms")]
    Timeout { key: CharacteristicKey, millis: u64 },

    /// The notification handle was never issued or was already released.
    #[error("Unknown notification handle: {0}")]
    UnknownNotification(u64),
}

impl PeripheralError {
    pub fn transport(device: &DeviceId, message: impl Into<String>) -> Self {
        PeripheralError::Transport {
            device: device.clone(),
            message: message.into(),
        }
    }
}
