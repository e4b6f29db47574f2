// Licensed under the Apache-2.0 license

//! Interrupt-driven master transaction engine.
//!
//! The foreground arms a transfer with [`Engine::request`] and gets a
//! [`Transaction`] back. From then on the bus event interrupt calls
//! [`Engine::on_event`] and the bus error interrupt calls [`Engine::on_error`]
//! with that same descriptor, until it reaches a terminal [`Phase`]. The
//! foreground observes the result with [`Engine::poll`].
//!
//! Both handlers run to completion and never block, apart from one bounded
//! spin on the byte-transfer-complete flag during multi-byte reads.
//!
//! ```text
//! write:  S  addr+W  A  sub  A  d0  A .. dn  A  P
//! read:   S  addr+W  A  sub  A  Sr  addr+R  A  d0  A .. dn  N  P
//! probe:  S  addr+W  A  P
//! ```

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{
    AbortCause, AckPosition, Direction, Error, ErrorFlag, EventFlag, I2cConfig,
};
use crate::i2c::recovery::BusRecovery;
use crate::i2c::traits::BusController;
use crate::i2c::transaction::{Payload, Phase, Transaction};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::{NoAcknowledgeSource, SevenBitAddress};

const MAX_ADDRESS: SevenBitAddress = 0x7F;

/// Remaining count at which a multi-byte read clears the acknowledge bit.
const NACK_ARM_REMAINING: usize = 3;

pub struct Engine<B: BusController, L: Logger = NoOpLogger> {
    controller: B,
    config: I2cConfig,
    logger: L,
    next_id: u32,
    active: Option<u32>,
}

impl<B: BusController, L: Logger> Engine<B, L> {
    /// Take ownership of the controller and configure it.
    pub fn new(mut controller: B, config: I2cConfig, logger: L) -> Self {
        controller.init(&config);
        Self {
            controller,
            config,
            logger,
            next_id: 0,
            active: None,
        }
    }

    pub fn controller(&self) -> &B {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut B {
        &mut self.controller
    }

    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    pub fn logger_mut(&mut self) -> &mut L {
        &mut self.logger
    }

    /// No transaction is in flight.
    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    // ============================================================================================
    // Foreground API
    // ============================================================================================

    /// Arm a transaction: validate it, set up the acknowledge logic for reads,
    /// enable notifications and generate the start condition.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidAddress` if `target` does not fit in 7 bits
    /// * `Error::InvalidLength` for an empty read buffer
    /// * `Error::Busy` if a transaction is in flight or the bus is not idle
    pub fn request<'b>(
        &mut self,
        target: SevenBitAddress,
        sub_address: u8,
        payload: Payload<'b>,
    ) -> Result<Transaction<'b>, Error> {
        if target > MAX_ADDRESS {
            return Err(Error::InvalidAddress);
        }
        if matches!(payload, Payload::Read(_)) && payload.is_empty() {
            return Err(Error::InvalidLength);
        }
        if self.active.is_some() || self.controller.is_busy() {
            return Err(Error::Busy);
        }

        if let Payload::Read(buffer) = &payload {
            let position = if buffer.len() == 2 {
                AckPosition::Next
            } else {
                AckPosition::Current
            };
            self.controller.set_ack_position(position);
            self.controller.set_acknowledge(true);
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.active = Some(id);

        self.controller.enable_notifications();
        self.controller.begin_transfer();
        Ok(Transaction::new(id, target, sub_address, payload))
    }

    /// Write `data` to the register `sub_address` of `target`.
    ///
    /// # Errors
    ///
    /// See [`Engine::request`].
    pub fn request_write<'b>(
        &mut self,
        target: SevenBitAddress,
        sub_address: u8,
        data: &'b [u8],
    ) -> Result<Transaction<'b>, Error> {
        self.request(target, sub_address, Payload::Write(data))
    }

    /// Fill `buffer` starting at register `sub_address` of `target`.
    ///
    /// # Errors
    ///
    /// See [`Engine::request`].
    pub fn request_read<'b>(
        &mut self,
        target: SevenBitAddress,
        sub_address: u8,
        buffer: &'b mut [u8],
    ) -> Result<Transaction<'b>, Error> {
        self.request(target, sub_address, Payload::Read(buffer))
    }

    /// Address `target` without transferring data.
    ///
    /// # Errors
    ///
    /// See [`Engine::request`].
    pub fn request_probe(
        &mut self,
        target: SevenBitAddress,
    ) -> Result<Transaction<'static>, Error> {
        self.request(target, 0, Payload::Probe)
    }

    /// Result of a transaction. Never touches the bus, so polling a terminal
    /// transaction any number of times returns the same value.
    ///
    /// # Errors
    ///
    /// * `nb::Error::WouldBlock` while the transaction is in flight
    /// * `Error::Aborted` with the recorded cause
    /// * `Error::Cancelled` if a bus recovery discarded the transaction
    pub fn poll(&self, txn: &Transaction<'_>) -> nb::Result<(), Error> {
        match txn.outcome() {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(nb::Error::Other(e)),
            None if self.active == Some(txn.id) => Err(nb::Error::WouldBlock),
            None => Err(nb::Error::Other(Error::Cancelled)),
        }
    }

    /// Dispatch in polled mode: the error handler if any abnormal flag is
    /// raised, the event handler otherwise.
    pub fn service(&mut self, txn: &mut Transaction<'_>) {
        if ErrorFlag::ALL
            .iter()
            .any(|flag| self.controller.error_flag(*flag))
        {
            self.on_error(txn);
        } else {
            self.on_event(txn);
        }
    }

    /// Release a wedged bus and reinitialize the controller. Any transaction
    /// in flight is discarded and polls as `Error::Cancelled` afterwards.
    ///
    /// Must not be called from interrupt context.
    ///
    /// # Errors
    ///
    /// * `Error::BusStuck` if SDA is still low after the recovery pulses
    /// * `Error::Pin` if driving or sampling a line failed
    pub fn recover_bus<SCL, SDA, D>(
        &mut self,
        recovery: &mut BusRecovery<SCL, SDA, D>,
    ) -> Result<(), Error>
    where
        SCL: OutputPin,
        SDA: OutputPin + InputPin,
        D: DelayNs,
    {
        if let Some(id) = self.active.take() {
            self.logger
                .warn(format_args!("i2c: transaction {id} cancelled by bus recovery"));
        }
        recovery.recover(&mut self.controller, &self.config, &mut self.logger)
    }

    // ============================================================================================
    // Event state machine
    // ============================================================================================

    /// Event interrupt entry point.
    pub fn on_event(&mut self, txn: &mut Transaction<'_>) {
        if !self.owns(txn) {
            return;
        }

        let phase = txn.phase();
        let progressed = match phase {
            Phase::Armed => self.address_phase(txn, Direction::Write, Phase::AddrPhase1Sent),
            Phase::AddrPhase1Sent => self.address_acked(txn),
            Phase::SubaddrSent => self.subaddress_done(txn),
            Phase::DataTx => self.transmit(txn),
            Phase::RestartSent => self.address_phase(txn, Direction::Read, Phase::AddrPhase2Sent),
            Phase::AddrPhase2Sent => self.read_address_acked(txn),
            Phase::DataRx => {
                self.receive(txn);
                true
            }
            // transient or terminal
            Phase::AddrPhase1Acked
            | Phase::AddrPhase2Acked
            | Phase::Stopping
            | Phase::DoneOk
            | Phase::DoneError(_) => true,
        };

        // data can only arrive after the phase-2 address was acknowledged
        if !progressed && receive_is_unexpected(phase) && self.controller.byte_available() {
            self.logger
                .debug(format_args!("i2c: unexpected receive notification in {phase:?}"));
        }
    }

    fn address_phase(
        &mut self,
        txn: &mut Transaction<'_>,
        direction: Direction,
        next: Phase,
    ) -> bool {
        if !self.controller.event_flag(EventFlag::StartSent) {
            return false;
        }
        self.controller.address(txn.target(), direction);
        txn.advance(next);
        true
    }

    fn address_acked(&mut self, txn: &mut Transaction<'_>) -> bool {
        if !self.controller.event_flag(EventFlag::AddressSent) {
            return false;
        }
        self.controller.clear_event_flag(EventFlag::AddressSent);
        txn.advance(Phase::AddrPhase1Acked);

        if txn.is_probe() {
            self.finish(txn);
        } else {
            self.controller.send_byte(txn.sub_address());
            txn.advance(Phase::SubaddrSent);
        }
        true
    }

    fn subaddress_done(&mut self, txn: &mut Transaction<'_>) -> bool {
        match txn.direction() {
            Direction::Write => {
                if !self.controller.byte_ready() {
                    return false;
                }
                if let Some(byte) = txn.take_tx_byte() {
                    self.controller.send_byte(byte);
                }
                txn.advance(Phase::DataTx);
            }
            Direction::Read => {
                // the sub-address must be fully shifted out before the restart
                if !self.controller.event_flag(EventFlag::ByteTransferComplete) {
                    return false;
                }
                self.controller.begin_transfer();
                txn.advance(Phase::RestartSent);
            }
        }
        true
    }

    fn transmit(&mut self, txn: &mut Transaction<'_>) -> bool {
        if txn.remaining() == 0 {
            // stop only once the last byte has left the shift register
            if !self.controller.event_flag(EventFlag::ByteTransferComplete) {
                return false;
            }
            self.finish(txn);
            return true;
        }
        if !self.controller.byte_ready() {
            return false;
        }
        if let Some(byte) = txn.take_tx_byte() {
            self.controller.send_byte(byte);
        }
        true
    }

    fn read_address_acked(&mut self, txn: &mut Transaction<'_>) -> bool {
        if !self.controller.event_flag(EventFlag::AddressSent) {
            return false;
        }
        // N = 1 NACKs the byte being clocked in next, N = 2 the one after it
        // (ack position was set to Next when arming).
        if txn.len() <= 2 {
            self.controller.set_acknowledge(false);
        }
        self.controller.clear_event_flag(EventFlag::AddressSent);
        txn.advance(Phase::AddrPhase2Acked);
        txn.advance(Phase::DataRx);
        true
    }

    fn receive(&mut self, txn: &mut Transaction<'_>) {
        if !self.controller.byte_available() {
            return;
        }

        if txn.remaining() == NACK_ARM_REMAINING {
            // With N-2 in the data register and N-1 in the shift register the
            // bus is stretched, so clearing the bit now NACKs exactly byte N.
            if !self.spin_until(EventFlag::ByteTransferComplete) {
                self.logger.warn(format_args!(
                    "i2c: byte transfer complete not seen after {} polls",
                    self.config.spin_limit
                ));
                return;
            }
            self.controller.set_acknowledge(false);
        }

        let byte = self.controller.received_byte();
        if !txn.put_rx_byte(byte) {
            self.logger
                .debug(format_args!("i2c: dropped surplus byte {byte:#04x}"));
        }
        if txn.remaining() == 0 {
            self.finish(txn);
        }
    }

    fn spin_until(&mut self, flag: EventFlag) -> bool {
        (0..self.config.spin_limit).any(|_| self.controller.event_flag(flag))
    }

    fn finish(&mut self, txn: &mut Transaction<'_>) {
        self.controller.end_transfer();
        txn.advance(Phase::Stopping);
        self.controller.disable_notifications();
        txn.advance(Phase::DoneOk);
        self.active = None;
    }

    fn owns(&self, txn: &Transaction<'_>) -> bool {
        !txn.phase().is_terminal() && self.active == Some(txn.id)
    }

    // ============================================================================================
    // Error state machine
    // ============================================================================================

    /// Error interrupt entry point. Aborts the transaction in flight with the
    /// first raised flag as its cause.
    pub fn on_error(&mut self, txn: &mut Transaction<'_>) {
        let Some(first) = ErrorFlag::ALL
            .into_iter()
            .find(|flag| self.controller.error_flag(*flag))
        else {
            self.logger
                .debug(format_args!("i2c: error notification without a raised flag"));
            return;
        };

        if let Some(id) = self.active {
            if id != txn.id {
                // the flags belong to transaction `id`
                self.logger.debug(format_args!(
                    "i2c: {first:?} reported to stale transaction {}, {id} in flight",
                    txn.id
                ));
                return;
            }
        }

        self.controller.disable_notifications();
        for flag in ErrorFlag::ALL {
            if self.controller.error_flag(flag) {
                self.controller.clear_error_flag(flag);
            }
        }

        if !self.owns(txn) {
            self.logger
                .debug(format_args!("i2c: {first:?} with no transaction in flight"));
            return;
        }

        let phase = txn.phase();
        let cause = abort_cause(first, phase);
        if cause.owns_bus() {
            self.controller.end_transfer();
        }
        txn.advance(Phase::DoneError(cause));
        self.active = None;
        self.logger.warn(format_args!(
            "i2c: transaction to {:#04x} aborted in {phase:?}: {cause:?}",
            txn.target()
        ));
    }
}

fn receive_is_unexpected(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::Armed | Phase::AddrPhase1Sent | Phase::RestartSent | Phase::AddrPhase2Sent
    )
}

fn abort_cause(flag: ErrorFlag, phase: Phase) -> AbortCause {
    match flag {
        ErrorFlag::NoAcknowledge => AbortCause::NoAcknowledge(match phase {
            Phase::Armed | Phase::AddrPhase1Sent | Phase::RestartSent | Phase::AddrPhase2Sent => {
                NoAcknowledgeSource::Address
            }
            _ => NoAcknowledgeSource::Data,
        }),
        ErrorFlag::SmbusAlert => AbortCause::SmbusAlert,
        ErrorFlag::SmbusTimeout => AbortCause::SmbusTimeout,
        ErrorFlag::Overrun => AbortCause::Overrun,
        ErrorFlag::ArbitrationLost => AbortCause::ArbitrationLost,
        ErrorFlag::BusError => AbortCause::BusProtocol,
        ErrorFlag::PecError => AbortCause::Pec,
    }
}
