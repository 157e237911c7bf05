//! # Rustgree
//!
//! Asynchronous client for the local UDP control protocol of Gree-family air
//! conditioners: discovery, the encrypted bind handshake, status polling and
//! commands, without cloud dependencies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rustgree::{DeviceBuilder, Mode};
//!
//! # async fn run() -> rustgree::Result<()> {
//! let device = DeviceBuilder::new([192, 168, 1, 40]).build()?;
//! device.start()?;
//! device.connected().await?;
//! device.set_mode(Mode::Cool).await?;
//! println!("power: {:?}", device.power());
//! # Ok(())
//! # }
//! ```
//!
#[macro_use]
mod macros;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod params;
pub mod protocol;
pub mod scheduler;
pub mod transport;

pub use config::{DeviceBuilder, DeviceConfig};
pub use crypto::CodecKey;
pub use device::Device;
pub use engine::{ConnectionState, DeviceIdentity};
pub use error::{GreeError, Result};
pub use event::{DeviceEvent, DeviceListener, DeviceSnapshot};
pub use params::{FanSpeed, Mode, ParameterTable, TemperatureUnit, VerticalSwing};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
