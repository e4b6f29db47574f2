// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C transaction engine.
//!
//! This module provides the configuration builder, the wire-level enums shared
//! by the engine and the bus controller adapter, and the error taxonomy.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use fugit::MicrosDurationU32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub fn hz(self) -> u32 {
        self as u32
    }

    /// Half of one SCL period, used when the lines are driven by hand.
    #[must_use]
    pub fn half_period_ns(self) -> u32 {
        1_000_000_000 / (2 * self.hz())
    }
}

/// Transfer direction, encoded in the least significant bit of the address byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write,
    Read,
}

impl Direction {
    #[must_use]
    pub fn bit(self) -> u8 {
        match self {
            Direction::Write => 0,
            Direction::Read => 1,
        }
    }
}

/// Byte the acknowledge setting applies to while receiving.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckPosition {
    /// The byte currently being shifted in.
    Current,
    /// The byte after the one currently being shifted in.
    Next,
}

/// Normal-progress notifications raised by the bus controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventFlag {
    /// Start (or repeated start) condition generated.
    StartSent,
    /// Address byte acknowledged by the slave.
    AddressSent,
    /// Transmit data register empty.
    TxEmpty,
    /// Receive data register holds a byte.
    RxNotEmpty,
    /// Data and shift registers both settled; the bus is stretched.
    ByteTransferComplete,
}

/// Abnormal-condition notifications raised by the bus controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorFlag {
    NoAcknowledge,
    SmbusAlert,
    SmbusTimeout,
    Overrun,
    ArbitrationLost,
    BusError,
    PecError,
}

impl ErrorFlag {
    /// All flags, in the order the error handler inspects them.
    pub const ALL: [ErrorFlag; 7] = [
        ErrorFlag::NoAcknowledge,
        ErrorFlag::SmbusAlert,
        ErrorFlag::SmbusTimeout,
        ErrorFlag::Overrun,
        ErrorFlag::ArbitrationLost,
        ErrorFlag::BusError,
        ErrorFlag::PecError,
    ];
}

/// Why the error handler aborted a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortCause {
    /// The slave did not acknowledge an address or data byte. Expected when
    /// probing for a device that is absent.
    NoAcknowledge(NoAcknowledgeSource),
    /// Another master won the bus.
    ArbitrationLost,
    /// Misplaced start or stop condition seen by the controller.
    BusProtocol,
    /// Over-run or under-run with clock stretching disabled.
    Overrun,
    /// SMBus clock-low timeout.
    SmbusTimeout,
    /// SMBus alert raised by a slave.
    SmbusAlert,
    /// Packet error check mismatch.
    Pec,
}

impl AbortCause {
    /// Whether the abort leaves the bus owned by this master, in which case a
    /// stop condition has to be issued to release it.
    #[must_use]
    pub fn owns_bus(self) -> bool {
        !matches!(self, AbortCause::ArbitrationLost)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The transaction was aborted by the error handler.
    Aborted(AbortCause),
    /// The transaction did not terminate within the configured bound.
    Timeout,
    /// Another transaction is still in flight.
    Busy,
    /// Reads need at least one byte.
    InvalidLength,
    /// Address outside the 7-bit range.
    InvalidAddress,
    /// The transaction was discarded by a bus recovery.
    Cancelled,
    /// SDA was still held low after the recovery clock pulses.
    BusStuck,
    /// A GPIO operation failed during bus recovery.
    Pin,
    /// The requested operation shape cannot be expressed as an addressed
    /// register transfer.
    Unsupported,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match *self {
            Error::Aborted(AbortCause::NoAcknowledge(source)) => ErrorKind::NoAcknowledge(source),
            Error::Aborted(AbortCause::ArbitrationLost) => ErrorKind::ArbitrationLoss,
            Error::Aborted(AbortCause::BusProtocol) | Error::BusStuck => ErrorKind::Bus,
            Error::Aborted(AbortCause::Overrun) => ErrorKind::Overrun,
            _ => ErrorKind::Other,
        }
    }
}

impl From<AbortCause> for Error {
    fn from(cause: AbortCause) -> Self {
        Error::Aborted(cause)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct I2cConfig {
    pub speed: I2cSpeed,
    pub timeout: MicrosDurationU32,
    pub poll_interval: MicrosDurationU32,
    pub retries: u8,
    pub spin_limit: u32,
    pub recovery_pulses: u8,
}

pub struct I2cConfigBuilder {
    speed: I2cSpeed,
    timeout: MicrosDurationU32,
    poll_interval: MicrosDurationU32,
    retries: u8,
    spin_limit: u32,
    recovery_pulses: u8,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            speed: I2cSpeed::Standard,
            timeout: MicrosDurationU32::millis(25),
            poll_interval: MicrosDurationU32::micros(10),
            retries: 2,
            spin_limit: 10_000,
            recovery_pulses: 9,
        }
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
    #[must_use]
    pub fn timeout(mut self, timeout: MicrosDurationU32) -> Self {
        self.timeout = timeout;
        self
    }
    #[must_use]
    pub fn poll_interval(mut self, interval: MicrosDurationU32) -> Self {
        self.poll_interval = interval;
        self
    }
    #[must_use]
    pub fn retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }
    /// Bound for the busy-wait done inside the event handler.
    #[must_use]
    pub fn spin_limit(mut self, limit: u32) -> Self {
        self.spin_limit = limit;
        self
    }
    #[must_use]
    pub fn recovery_pulses(mut self, pulses: u8) -> Self {
        self.recovery_pulses = pulses;
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            speed: self.speed,
            timeout: self.timeout,
            // a zero step would never make progress towards the timeout
            poll_interval: if self.poll_interval.ticks() == 0 {
                MicrosDurationU32::micros(1)
            } else {
                self.poll_interval
            },
            retries: self.retries,
            spin_limit: self.spin_limit.max(1),
            recovery_pulses: self.recovery_pulses,
        }
    }
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}
