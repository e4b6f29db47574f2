// Licensed under the Apache-2.0 license

//! The in-flight transaction descriptor.
//!
//! A [`Transaction`] is created by [`Engine::request`](crate::i2c::engine::Engine::request)
//! and then handed by `&mut` to the event and error handlers. It borrows the
//! caller's buffer for its own lifetime only; dropping the descriptor gives
//! the buffer back.

use crate::i2c::common::{AbortCause, Direction, Error};
use embedded_hal::i2c::SevenBitAddress;

/// Progress of a transaction.
///
/// Write path: `Armed → AddrPhase1Sent → AddrPhase1Acked → SubaddrSent →
/// DataTx → Stopping → DoneOk`.
///
/// Read path: `Armed → AddrPhase1Sent → AddrPhase1Acked → SubaddrSent →
/// RestartSent → AddrPhase2Sent → AddrPhase2Acked → DataRx → Stopping → DoneOk`.
///
/// Probe path: `Armed → AddrPhase1Sent → AddrPhase1Acked → Stopping → DoneOk`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Start condition requested, not yet on the bus.
    Armed,
    AddrPhase1Sent,
    AddrPhase1Acked,
    SubaddrSent,
    DataTx,
    RestartSent,
    AddrPhase2Sent,
    AddrPhase2Acked,
    DataRx,
    Stopping,
    DoneOk,
    DoneError(AbortCause),
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Armed => 0,
            Phase::AddrPhase1Sent => 1,
            Phase::AddrPhase1Acked => 2,
            Phase::SubaddrSent => 3,
            Phase::DataTx => 4,
            Phase::RestartSent => 5,
            Phase::AddrPhase2Sent => 6,
            Phase::AddrPhase2Acked => 7,
            Phase::DataRx => 8,
            Phase::Stopping => 9,
            Phase::DoneOk | Phase::DoneError(_) => 10,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::DoneOk | Phase::DoneError(_))
    }
}

/// Data side of a request.
pub enum Payload<'b> {
    /// Bytes written after the sub-address.
    Write(&'b [u8]),
    /// Buffer filled after the repeated start.
    Read(&'b mut [u8]),
    /// Address only; checks that a slave answers.
    Probe,
}

impl Payload<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Payload::Write(bytes) => bytes.len(),
            Payload::Read(buffer) => buffer.len(),
            Payload::Probe => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The single in-flight request of a bus.
///
/// Also serves as the handle the foreground polls. Between the request and
/// a terminal [`Phase`] only the handlers may mutate it, which the engine
/// enforces by taking it by `&mut` and by comparing its id with the one in
/// flight.
pub struct Transaction<'b> {
    pub(crate) id: u32,
    target: SevenBitAddress,
    sub_address: u8,
    payload: Payload<'b>,
    remaining: usize,
    phase: Phase,
}

impl<'b> Transaction<'b> {
    pub(crate) fn new(
        id: u32,
        target: SevenBitAddress,
        sub_address: u8,
        payload: Payload<'b>,
    ) -> Self {
        let remaining = payload.len();
        Self {
            id,
            target,
            sub_address,
            payload,
            remaining,
            phase: Phase::Armed,
        }
    }

    #[must_use]
    pub fn target(&self) -> SevenBitAddress {
        self.target
    }

    #[must_use]
    pub fn sub_address(&self) -> u8 {
        self.sub_address
    }

    /// Direction of the data phase. Probes count as writes.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self.payload {
            Payload::Read(_) => Direction::Read,
            Payload::Write(_) | Payload::Probe => Direction::Write,
        }
    }

    #[must_use]
    pub fn is_probe(&self) -> bool {
        matches!(self.payload, Payload::Probe)
    }

    /// Requested length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Bytes not transferred yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Terminal result, `None` while the transaction is in flight.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<(), Error>> {
        match self.phase {
            Phase::DoneOk => Some(Ok(())),
            Phase::DoneError(cause) => Some(Err(Error::Aborted(cause))),
            _ => None,
        }
    }

    /// Bytes received so far, available once the transaction is terminal.
    #[must_use]
    pub fn received(&self) -> Option<&[u8]> {
        match (&self.payload, self.phase.is_terminal()) {
            (Payload::Read(buffer), true) => buffer.get(..self.len() - self.remaining),
            _ => None,
        }
    }

    /// Move forward. Phases never go backwards and a terminal phase is final.
    pub(crate) fn advance(&mut self, next: Phase) {
        debug_assert!(
            next.rank() > self.phase.rank(),
            "phase {:?} -> {:?}",
            self.phase,
            next
        );
        if !self.phase.is_terminal() {
            self.phase = next;
        }
    }

    /// Next byte to put on the wire, counting it as transferred.
    pub(crate) fn take_tx_byte(&mut self) -> Option<u8> {
        let Payload::Write(bytes) = &self.payload else {
            return None;
        };
        let byte = *bytes.get(bytes.len() - self.remaining)?;
        self.remaining -= 1;
        Some(byte)
    }

    /// Store a received byte, counting it as transferred.
    pub(crate) fn put_rx_byte(&mut self, byte: u8) -> bool {
        let len = self.len();
        let Payload::Read(buffer) = &mut self.payload else {
            return false;
        };
        match buffer.get_mut(len - self.remaining) {
            Some(slot) => {
                *slot = byte;
                self.remaining -= 1;
                true
            }
            None => false,
        }
    }
}
