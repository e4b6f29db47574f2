// Licensed under the Apache-2.0 license

//! Bit-banged bus recovery.
//!
//! A slave that lost track of the clock in the middle of a byte keeps SDA low
//! and waits for more clock edges. The controller cannot generate a start
//! while SDA is low, so SCL is pulsed by hand until the slave shifts out the
//! rest of its byte and lets go, a stop condition is generated, and the
//! controller is initialized again from scratch.
//!
//! Runs in the foreground only. It blocks for up to
//! `recovery_pulses + 2` SCL periods.

use crate::common::Logger;
use crate::i2c::common::{Error, I2cConfig};
use crate::i2c::traits::BusController;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

/// SCL/SDA as plain GPIOs plus a delay, used while the controller is disabled.
///
/// The pins are expected to be open drain, with SDA readable while driven
/// high.
pub struct BusRecovery<SCL, SDA, D> {
    scl: SCL,
    sda: SDA,
    delay: D,
}

fn pin<T, E>(result: Result<T, E>) -> Result<T, Error> {
    result.map_err(|_| Error::Pin)
}

impl<SCL, SDA, D> BusRecovery<SCL, SDA, D>
where
    SCL: OutputPin,
    SDA: OutputPin + InputPin,
    D: DelayNs,
{
    pub fn new(scl: SCL, sda: SDA, delay: D) -> Self {
        Self { scl, sda, delay }
    }

    pub fn release(self) -> (SCL, SDA, D) {
        (self.scl, self.sda, self.delay)
    }

    /// Release the bus and bring `controller` back up with notifications
    /// enabled.
    ///
    /// The controller is reinitialized even when SDA stays low.
    ///
    /// # Errors
    ///
    /// * `Error::BusStuck` if SDA is still low after `recovery_pulses` clocks
    /// * `Error::Pin` if a GPIO operation fails; the controller is left
    ///   disabled in that case
    pub fn recover<B, L>(
        &mut self,
        controller: &mut B,
        config: &I2cConfig,
        logger: &mut L,
    ) -> Result<(), Error>
    where
        B: BusController,
        L: Logger,
    {
        controller.disable_notifications();
        controller.deinit();

        let half_period = config.speed.half_period_ns();
        let pulses = self.clock_out(config.recovery_pulses, half_period)?;
        self.stop(half_period)?;
        let released = pin(self.sda.is_high())?;

        controller.init(config);
        controller.enable_notifications();

        if released {
            logger.debug(format_args!("i2c: bus released after {pulses} SCL pulses"));
            Ok(())
        } else {
            logger.error(format_args!("i2c: SDA still low after {pulses} SCL pulses"));
            Err(Error::BusStuck)
        }
    }

    /// Pulse SCL while SDA is held low, at most `limit` times.
    fn clock_out(&mut self, limit: u8, half_period: u32) -> Result<u8, Error> {
        pin(self.sda.set_high())?;
        pin(self.scl.set_high())?;
        self.delay.delay_ns(half_period);

        let mut pulses = 0;
        while pulses < limit && pin(self.sda.is_low())? {
            pin(self.scl.set_low())?;
            self.delay.delay_ns(half_period);
            pin(self.scl.set_high())?;
            self.delay.delay_ns(half_period);
            pulses += 1;
        }
        Ok(pulses)
    }

    /// SDA rising while SCL is high.
    fn stop(&mut self, half_period: u32) -> Result<(), Error> {
        pin(self.scl.set_low())?;
        pin(self.sda.set_low())?;
        self.delay.delay_ns(half_period);
        pin(self.scl.set_high())?;
        self.delay.delay_ns(half_period);
        pin(self.sda.set_high())?;
        self.delay.delay_ns(half_period);
        Ok(())
    }
}
