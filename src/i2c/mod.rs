// Licensed under the Apache-2.0 license

//! Interrupt-driven I2C master.
//!
//! [`engine::Engine`] runs addressed register reads and writes from the bus
//! event and error interrupts of any controller implementing
//! [`traits::BusController`]. [`i2c_controller::I2cController`] wraps it for
//! blocking use and for embedded-hal consumers, and [`recovery::BusRecovery`]
//! frees a bus wedged by a slave holding SDA low.

pub mod common;
pub mod engine;
pub mod i2c_controller;
pub mod recovery;
pub mod traits;
pub mod transaction;

#[cfg(test)]
pub(crate) mod mock;

pub use common::{AbortCause, Error, I2cConfig, I2cConfigBuilder, I2cSpeed};
pub use engine::Engine;
pub use i2c_controller::I2cController;
pub use recovery::BusRecovery;
pub use traits::BusController;
pub use transaction::{Payload, Phase, Transaction};
