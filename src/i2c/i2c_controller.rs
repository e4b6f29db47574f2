// Licensed under the Apache-2.0 license

//! Blocking I2C controller built on the interrupt-driven [`Engine`].
//!
//! This module drives the engine's handlers in polled mode from the
//! foreground, bounds every transaction by the configured timeout, retries
//! aborted transfers, and implements the embedded-hal `I2c` trait for the
//! transfer shapes the engine can express (register writes and
//! sub-addressed reads).

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{AbortCause, Error, I2cConfig};
use crate::i2c::engine::Engine;
use crate::i2c::recovery::BusRecovery;
use crate::i2c::traits::BusController;
use crate::i2c::transaction::{Payload, Transaction};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::{Operation, SevenBitAddress};

/// Addresses probed by [`I2cController::scan`]; the rest are reserved.
const SCAN_FIRST: SevenBitAddress = 0x08;
const SCAN_LAST: SevenBitAddress = 0x77;
const SCAN_CAPACITY: usize = (SCAN_LAST - SCAN_FIRST + 1) as usize;

pub struct I2cController<B: BusController, D: DelayNs, L: Logger = NoOpLogger> {
    pub engine: Engine<B, L>,
    pub delay: D,
}

impl<B: BusController, D: DelayNs, L: Logger> I2cController<B, D, L> {
    pub fn new(controller: B, config: I2cConfig, delay: D, logger: L) -> Self {
        Self {
            engine: Engine::new(controller, config, logger),
            delay,
        }
    }

    /// Write `data` starting at register `sub_address`.
    ///
    /// # Errors
    ///
    /// * `Error::Aborted` once the configured retries are used up
    /// * `Error::Timeout` if the bus stays busy or the transfer never ends
    pub fn write_register(
        &mut self,
        target: SevenBitAddress,
        sub_address: u8,
        data: &[u8],
    ) -> Result<(), Error> {
        self.with_retries(|this| this.transfer(target, sub_address, Payload::Write(data)))
    }

    /// Fill `buffer` starting at register `sub_address`.
    ///
    /// # Errors
    ///
    /// Same as [`I2cController::write_register`], plus `Error::InvalidLength`
    /// for an empty buffer.
    pub fn read_register(
        &mut self,
        target: SevenBitAddress,
        sub_address: u8,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        self.with_retries(|this| this.transfer(target, sub_address, Payload::Read(&mut *buffer)))
    }

    /// Whether a device acknowledges `target`. A NACK is an answer here, not
    /// an error.
    ///
    /// # Errors
    ///
    /// Any abort other than no-acknowledge, or `Error::Timeout`.
    pub fn probe(&mut self, target: SevenBitAddress) -> Result<bool, Error> {
        match self.transfer(target, 0, Payload::Probe) {
            Ok(()) => Ok(true),
            Err(Error::Aborted(AbortCause::NoAcknowledge(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Probe every non-reserved address and collect the ones that answer.
    ///
    /// # Errors
    ///
    /// Stops at the first error [`I2cController::probe`] reports.
    pub fn scan(&mut self) -> Result<heapless::Vec<SevenBitAddress, SCAN_CAPACITY>, Error> {
        let mut found = heapless::Vec::new();
        for address in SCAN_FIRST..=SCAN_LAST {
            if self.probe(address)? && found.push(address).is_err() {
                break;
            }
        }
        self.engine
            .logger_mut()
            .debug(format_args!("i2c: scan found {} devices", found.len()));
        Ok(found)
    }

    /// Probe `target` until it acknowledges, e.g. after an EEPROM write while
    /// its internal write cycle runs.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if the device stays silent for the configured timeout.
    pub fn wait_ready(&mut self, target: SevenBitAddress) -> Result<(), Error> {
        let step = self.engine.config().poll_interval.ticks();
        let limit = self.engine.config().timeout.ticks();
        let mut waited = 0u32;
        while !self.probe(target)? {
            if waited >= limit {
                self.engine
                    .logger_mut()
                    .error(format_args!("i2c: {target:#04x} not ready after {waited} us"));
                return Err(Error::Timeout);
            }
            self.delay.delay_us(step);
            waited = waited.saturating_add(step);
        }
        Ok(())
    }

    /// Release a wedged bus. Call this after `Error::Timeout`.
    ///
    /// # Errors
    ///
    /// See [`Engine::recover_bus`].
    pub fn recover_bus<SCL, SDA, RD>(
        &mut self,
        recovery: &mut BusRecovery<SCL, SDA, RD>,
    ) -> Result<(), Error>
    where
        SCL: OutputPin,
        SDA: OutputPin + InputPin,
        RD: DelayNs,
    {
        self.engine.recover_bus(recovery)
    }

    fn with_retries<F>(&mut self, mut op: F) -> Result<(), Error>
    where
        F: FnMut(&mut Self) -> Result<(), Error>,
    {
        let retries = self.engine.config().retries;
        let mut attempt = 0;
        loop {
            match op(self) {
                Err(Error::Aborted(cause)) if attempt < retries => {
                    attempt += 1;
                    self.engine
                        .logger_mut()
                        .debug(format_args!("i2c: retry {attempt}/{retries} after {cause:?}"));
                }
                result => return result,
            }
        }
    }

    /// One attempt: wait for an idle bus, arm, and drive the handlers until
    /// the transaction terminates.
    fn transfer(
        &mut self,
        target: SevenBitAddress,
        sub_address: u8,
        payload: Payload<'_>,
    ) -> Result<(), Error> {
        self.wait_idle()?;
        let mut txn = self.engine.request(target, sub_address, payload)?;
        self.complete(&mut txn)
    }

    fn wait_idle(&mut self) -> Result<(), Error> {
        let step = self.engine.config().poll_interval.ticks();
        let limit = self.engine.config().timeout.ticks();
        let mut waited = 0u32;
        while self.engine.controller_mut().is_busy() {
            if waited >= limit {
                self.engine
                    .logger_mut()
                    .error(format_args!("i2c: bus busy for {waited} us"));
                return Err(Error::Timeout);
            }
            self.delay.delay_us(step);
            waited = waited.saturating_add(step);
        }
        Ok(())
    }

    /// On timeout the transaction stays in flight; only a bus recovery
    /// clears it.
    fn complete(&mut self, txn: &mut Transaction<'_>) -> Result<(), Error> {
        let step = self.engine.config().poll_interval.ticks();
        let limit = self.engine.config().timeout.ticks();
        let mut waited = 0u32;
        loop {
            self.engine.service(txn);
            match self.engine.poll(txn) {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if waited >= limit {
                self.engine.logger_mut().error(format_args!(
                    "i2c: transaction to {:#04x} timed out in {:?}",
                    txn.target(),
                    txn.phase()
                ));
                return Err(Error::Timeout);
            }
            self.delay.delay_us(step);
            waited = waited.saturating_add(step);
        }
    }
}

impl<B: BusController, D: DelayNs, L: Logger> embedded_hal::i2c::ErrorType
    for I2cController<B, D, L>
{
    type Error = Error;
}

/// Every transfer starts with a one-byte sub-address: `write` sends
/// `[sub_address, data..]` and `write_read` takes `[sub_address]`. Plain reads
/// cannot be expressed and return `Error::Unsupported`.
impl<B: BusController, D: DelayNs, L: Logger> embedded_hal::i2c::I2c for I2cController<B, D, L> {
    fn read(&mut self, _address: SevenBitAddress, _read: &mut [u8]) -> Result<(), Self::Error> {
        Err(Error::Unsupported)
    }

    fn write(&mut self, address: SevenBitAddress, write: &[u8]) -> Result<(), Self::Error> {
        let (sub_address, data) = write.split_first().ok_or(Error::Unsupported)?;
        self.write_register(address, *sub_address, data)
    }

    fn write_read(
        &mut self,
        address: SevenBitAddress,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        match write {
            [sub_address] => self.read_register(address, *sub_address, read),
            _ => Err(Error::Unsupported),
        }
    }

    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        match operations {
            [Operation::Write(bytes)] => self.write(address, bytes),
            [Operation::Write(sub_address), Operation::Read(buffer)] => {
                self.write_read(address, sub_address, buffer)
            }
            _ => Err(Error::Unsupported),
        }
    }
}
