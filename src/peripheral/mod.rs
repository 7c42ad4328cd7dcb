//! Peripheral connection manager: several BLE devices, one writer per
//! characteristic.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              PeripheralManager               │
//! │  sessions (connection order) + guard map     │
//! └──────────────┬───────────────────────────────┘
//!                │ find_characteristic: first session that has it
//!                ▼
//!   GattServer → GattService → GattCharacteristic
//!                               write / notifications
//! ```
//!
//! Sessions are registered by an external pairing flow. Everything below
//! [`GattServer`] is provided by the host's BLE stack through the traits in
//! [`gatt`].

pub mod error;
pub mod gatt;
pub mod manager;

pub use self::error::PeripheralError;
pub use self::gatt::{CharacteristicKey, DeviceId, GattCharacteristic, GattServer, GattService};
pub use self::manager::{NotificationHandle, PeripheralManager, ResolvedCharacteristic, WriteOutcome};
