// Licensed under the Apache-2.0 license

//! # Bus Controller Adapter
//!
//! The engine never touches registers. Everything it needs from the two-wire
//! bus peripheral goes through [`BusController`], a capability interface a
//! board support crate implements on top of its PAC.
//!
//! ## Division of labour
//!
//! ```text
//! foreground ── Engine::request ──┐
//!                                 ├── BusController (this trait)
//! event IRQ  ── Engine::on_event ─┤
//! error IRQ  ── Engine::on_error ─┘
//! ```
//!
//! The controller is expected to behave like a classic event/flag driven
//! master: generating a start sets [`EventFlag::StartSent`], writing the
//! address byte clears it, an acknowledged address raises
//! [`EventFlag::AddressSent`] which the engine clears explicitly, and the data
//! phase is paced by [`EventFlag::TxEmpty`], [`EventFlag::RxNotEmpty`] and
//! [`EventFlag::ByteTransferComplete`].

use crate::i2c::common::{AckPosition, Direction, ErrorFlag, EventFlag, I2cConfig};
use embedded_hal::i2c::SevenBitAddress;

/// Primitive operations of an I2C master peripheral.
///
/// Methods are called from interrupt context and must not block. Flag queries
/// take `&mut self` because reading a status register has side effects on
/// some peripherals.
pub trait BusController {
    /// Bring the peripheral up from scratch: clocks, bus speed, own address,
    /// and hand the SCL/SDA pins to the peripheral.
    fn init(&mut self, config: &I2cConfig);

    /// Disable the peripheral and hand SCL/SDA back as plain GPIOs so the
    /// lines can be driven by hand.
    fn deinit(&mut self);

    /// Generate a start condition, or a repeated start while the bus is owned.
    fn begin_transfer(&mut self);

    /// Generate a stop condition.
    fn end_transfer(&mut self);

    /// Put the address byte `target << 1 | direction` on the bus.
    fn address(&mut self, target: SevenBitAddress, direction: Direction);

    /// Load the next byte to transmit.
    fn send_byte(&mut self, byte: u8);

    /// Whether the transmit register can take another byte.
    fn byte_ready(&mut self) -> bool {
        self.event_flag(EventFlag::TxEmpty)
    }

    /// Read the receive register, consuming the byte.
    fn received_byte(&mut self) -> u8;

    /// Whether the receive register holds a byte.
    fn byte_available(&mut self) -> bool {
        self.event_flag(EventFlag::RxNotEmpty)
    }

    /// Acknowledge received bytes (`true`) or answer them with NACK (`false`).
    fn set_acknowledge(&mut self, enabled: bool);

    /// Select which received byte the acknowledge setting applies to.
    fn set_ack_position(&mut self, position: AckPosition);

    fn event_flag(&mut self, flag: EventFlag) -> bool;

    fn clear_event_flag(&mut self, flag: EventFlag);

    fn error_flag(&mut self, flag: ErrorFlag) -> bool;

    fn clear_error_flag(&mut self, flag: ErrorFlag);

    /// Enable the event, buffer and error interrupts of this bus instance.
    fn enable_notifications(&mut self);

    /// Disable the event, buffer and error interrupts of this bus instance.
    /// Must take effect before the function returns.
    fn disable_notifications(&mut self);

    /// Whether a start condition has been seen on the bus without a matching
    /// stop, whoever generated it.
    fn is_busy(&mut self) -> bool;
}
