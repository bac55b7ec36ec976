//! # Rustkasa
//!
//! Asynchronous TP-Link Smart Home (Kasa) local API implementation for
//! control and monitoring of smart plugs and bulbs without cloud
//! dependencies.
//!
//! The wire protocol is a length-prefixed, XOR-autokey-obfuscated TCP
//! exchange of JSON payloads on port 9999. Each device session polls status
//! on a schedule, dispatches relay and night-mode commands, and emits
//! hardware-normalized reading batches.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rustkasa::Device;
//!
//! # async fn example() -> rustkasa::Result<()> {
//! let device = Device::builder("192.168.1.100").poll_interval_secs(30).build();
//! device.set_relay(true).await?; // switch on, readings refresh right after
//! # Ok(())
//! # }
//! ```
//!
pub mod crypto;
pub mod device;
pub mod error;
pub mod manager;
pub mod profile;
pub mod protocol;
pub mod readings;
mod scheduler;
mod transport;

pub use device::{Device, DeviceBuilder, NightMode};
pub use error::{KasaError, Result};
pub use manager::{Manager, ManagerEvent};
pub use protocol::{Command, DeviceResponse};
pub use readings::{Reading, ReadingBatch};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
