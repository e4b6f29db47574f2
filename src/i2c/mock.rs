// Licensed under the Apache-2.0 license

//! Simulated bus controller, slaves and GPIO lines for the unit tests.
//!
//! The controller models the data/shift register pipeline of an event-flag
//! driven master: a transmitted byte sits in the data register until the
//! shift register is free, and a received byte lands in the data register or,
//! when that is still full, stays in the shift register with the bus
//! stretched. The hardware advances one step every time a flag is queried.

use crate::i2c::common::{AckPosition, Direction, ErrorFlag, EventFlag, I2cConfig};
use crate::i2c::traits::BusController;
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal::i2c::SevenBitAddress;
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

/// What happened on the wire, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wire {
    Start,
    Address(u8),
    Tx(u8),
    Rx { byte: u8, ack: bool },
    Stop,
}

/// Byte-addressed slave with a 256-byte memory and an auto-incrementing
/// register pointer, like a small EEPROM.
pub struct MockSlave {
    pub address: SevenBitAddress,
    pub memory: [u8; 256],
    pub nack_address: bool,
    /// NACK this many address phases before answering, like an EEPROM busy
    /// with an internal write cycle.
    pub busy_polls: u32,
    /// NACK every written byte from this index on; index 0 is the sub-address.
    pub nack_data_from: Option<usize>,
    pointer: u8,
    pointer_loaded: bool,
    data_seen: usize,
}

impl MockSlave {
    pub fn new(address: SevenBitAddress) -> Self {
        Self {
            address,
            memory: [0; 256],
            nack_address: false,
            busy_polls: 0,
            nack_data_from: None,
            pointer: 0,
            pointer_loaded: false,
            data_seen: 0,
        }
    }

    pub fn with_memory(mut self, offset: u8, bytes: &[u8]) -> Self {
        for (i, byte) in bytes.iter().enumerate() {
            self.memory[(offset as usize + i) % 256] = *byte;
        }
        self
    }

    fn poll_busy(&mut self) -> bool {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            true
        } else {
            false
        }
    }

    fn begin(&mut self, direction: Direction) {
        if direction == Direction::Write {
            self.pointer_loaded = false;
        }
        self.data_seen = 0;
    }

    fn accept(&mut self, byte: u8) -> bool {
        let index = self.data_seen;
        self.data_seen += 1;
        if self.nack_data_from.is_some_and(|from| index >= from) {
            return false;
        }
        if self.pointer_loaded {
            self.memory[self.pointer as usize] = byte;
            self.pointer = self.pointer.wrapping_add(1);
        } else {
            self.pointer = byte;
            self.pointer_loaded = true;
        }
        true
    }

    fn read(&mut self) -> u8 {
        let byte = self.memory[self.pointer as usize];
        self.pointer = self.pointer.wrapping_add(1);
        byte
    }
}

/// Electrical state of SCL/SDA shared between the controller and the GPIOs.
pub struct Lines {
    pub scl_high: bool,
    pub sda_master_low: bool,
    /// A slave is holding SDA low.
    pub wedged: bool,
    /// Rising SCL edges after which the wedged slave lets go.
    pub release_after: u32,
    pub pulses: u32,
    pub stops: u32,
}

impl Lines {
    fn sda_high(&self) -> bool {
        !self.wedged && !self.sda_master_low
    }
}

pub struct MockController {
    pub slaves: Vec<MockSlave>,
    pub wire: Vec<Wire>,
    pub lines: Rc<RefCell<Lines>>,
    pub notifications: bool,
    pub inits: u32,
    pub deinits: u32,
    pub ack: bool,
    pub ack_position: AckPosition,
    /// Stop clocking in bytes once this many have been received.
    pub rx_budget: Option<usize>,
    start_sent: bool,
    addr_sent: bool,
    addr_cleared: bool,
    owned: bool,
    errors: [bool; 7],
    active: Option<(usize, Direction)>,
    tx_dr: Option<u8>,
    tx_shift: Option<u8>,
    tx_count: usize,
    tx_halted: bool,
    rx_dr: Option<u8>,
    rx_shift: Option<u8>,
    rx_clocked: usize,
    rx_halted: bool,
    nack_from: Option<usize>,
}

impl MockController {
    pub fn new(slaves: Vec<MockSlave>) -> Self {
        Self {
            slaves,
            wire: Vec::new(),
            lines: Rc::new(RefCell::new(Lines {
                scl_high: true,
                sda_master_low: false,
                wedged: false,
                release_after: 0,
                pulses: 0,
                stops: 0,
            })),
            notifications: false,
            inits: 0,
            deinits: 0,
            ack: true,
            ack_position: AckPosition::Current,
            rx_budget: None,
            start_sent: false,
            addr_sent: false,
            addr_cleared: false,
            owned: false,
            errors: [false; 7],
            active: None,
            tx_dr: None,
            tx_shift: None,
            tx_count: 0,
            tx_halted: false,
            rx_dr: None,
            rx_shift: None,
            rx_clocked: 0,
            rx_halted: false,
            nack_from: None,
        }
    }

    pub fn with_slave(slave: MockSlave) -> Self {
        Self::new(std::vec![slave])
    }

    /// Wedge SDA low until `pulses` rising SCL edges have been seen.
    pub fn wedge(&mut self, pulses: u32) {
        let mut lines = self.lines.borrow_mut();
        lines.wedged = true;
        lines.release_after = pulses;
        lines.pulses = 0;
    }

    pub fn raise(&mut self, flag: ErrorFlag) {
        self.errors[error_index(flag)] = true;
        if flag == ErrorFlag::ArbitrationLost {
            self.owned = false;
        }
    }

    pub fn any_error(&self) -> bool {
        self.errors.iter().any(|set| *set)
    }

    /// Received bytes with the acknowledge bit the controller drove for each.
    pub fn rx_acks(&self) -> Vec<bool> {
        self.wire
            .iter()
            .filter_map(|w| match w {
                Wire::Rx { ack, .. } => Some(*ack),
                _ => None,
            })
            .collect()
    }

    fn reset_transfer(&mut self) {
        self.start_sent = false;
        self.addr_sent = false;
        self.addr_cleared = false;
        self.active = None;
        self.tx_dr = None;
        self.tx_shift = None;
        self.tx_count = 0;
        self.tx_halted = false;
        self.rx_dr = None;
        self.rx_shift = None;
        self.rx_clocked = 0;
        self.rx_halted = false;
    }

    fn tick(&mut self) {
        if !self.addr_cleared {
            return;
        }
        match self.active {
            Some((index, Direction::Write)) => {
                if self.tx_halted {
                    return;
                }
                if let Some(byte) = self.tx_shift.take() {
                    self.wire.push(Wire::Tx(byte));
                    self.tx_count += 1;
                    if !self.slaves[index].accept(byte) {
                        self.tx_halted = true;
                        self.raise(ErrorFlag::NoAcknowledge);
                    }
                } else if let Some(byte) = self.tx_dr.take() {
                    self.tx_shift = Some(byte);
                }
            }
            Some((index, Direction::Read)) => {
                if self.rx_halted
                    || self.rx_shift.is_some()
                    || self.rx_budget.is_some_and(|budget| self.rx_clocked >= budget)
                {
                    return;
                }
                let position = self.rx_clocked;
                let ack = self.nack_from.map_or(true, |from| position < from);
                let byte = self.slaves[index].read();
                self.wire.push(Wire::Rx { byte, ack });
                self.rx_clocked += 1;
                if !ack {
                    self.rx_halted = true;
                }
                if self.rx_dr.is_none() {
                    self.rx_dr = Some(byte);
                } else {
                    self.rx_shift = Some(byte);
                }
            }
            None => {}
        }
    }

    fn transmitting(&self) -> bool {
        matches!(self.active, Some((_, Direction::Write)))
    }
}

fn error_index(flag: ErrorFlag) -> usize {
    ErrorFlag::ALL
        .iter()
        .position(|f| *f == flag)
        .unwrap_or_default()
}

impl BusController for MockController {
    fn init(&mut self, _config: &I2cConfig) {
        self.inits += 1;
        self.reset_transfer();
        self.errors = [false; 7];
        self.owned = false;
        self.ack = true;
        self.nack_from = None;
        self.ack_position = AckPosition::Current;
    }

    fn deinit(&mut self) {
        self.deinits += 1;
        self.notifications = false;
        self.owned = false;
        self.reset_transfer();
    }

    fn begin_transfer(&mut self) {
        if self.lines.borrow().wedged {
            return;
        }
        self.reset_transfer();
        self.wire.push(Wire::Start);
        self.start_sent = true;
        self.owned = true;
    }

    fn end_transfer(&mut self) {
        self.wire.push(Wire::Stop);
        self.owned = false;
        self.reset_transfer();
    }

    fn address(&mut self, target: SevenBitAddress, direction: Direction) {
        self.start_sent = false;
        self.wire.push(Wire::Address((target << 1) | direction.bit()));
        let found = self
            .slaves
            .iter_mut()
            .position(|s| s.address == target && !s.nack_address && !s.poll_busy());
        match found {
            Some(index) => {
                self.slaves[index].begin(direction);
                self.active = Some((index, direction));
                self.addr_sent = true;
                self.tx_count = 0;
                self.rx_clocked = 0;
            }
            None => self.raise(ErrorFlag::NoAcknowledge),
        }
    }

    fn send_byte(&mut self, byte: u8) {
        self.tx_dr = Some(byte);
    }

    fn received_byte(&mut self) -> u8 {
        let byte = self.rx_dr.take().unwrap_or(0xFF);
        self.rx_dr = self.rx_shift.take();
        byte
    }

    fn set_acknowledge(&mut self, enabled: bool) {
        self.ack = enabled;
        self.nack_from = if enabled {
            None
        } else {
            Some(match self.ack_position {
                AckPosition::Current => self.rx_clocked,
                AckPosition::Next => self.rx_clocked + 1,
            })
        };
    }

    fn set_ack_position(&mut self, position: AckPosition) {
        self.ack_position = position;
    }

    fn event_flag(&mut self, flag: EventFlag) -> bool {
        self.tick();
        match flag {
            EventFlag::StartSent => self.start_sent,
            EventFlag::AddressSent => self.addr_sent,
            EventFlag::TxEmpty => {
                self.transmitting() && self.addr_cleared && self.tx_dr.is_none()
            }
            EventFlag::RxNotEmpty => self.rx_dr.is_some(),
            EventFlag::ByteTransferComplete => {
                if self.transmitting() {
                    self.addr_cleared
                        && self.tx_dr.is_none()
                        && self.tx_shift.is_none()
                        && self.tx_count > 0
                } else {
                    self.rx_dr.is_some() && self.rx_shift.is_some()
                }
            }
        }
    }

    fn clear_event_flag(&mut self, flag: EventFlag) {
        match flag {
            EventFlag::StartSent => self.start_sent = false,
            EventFlag::AddressSent => {
                if self.addr_sent {
                    self.addr_sent = false;
                    self.addr_cleared = true;
                }
            }
            _ => {}
        }
    }

    fn error_flag(&mut self, flag: ErrorFlag) -> bool {
        self.errors[error_index(flag)]
    }

    fn clear_error_flag(&mut self, flag: ErrorFlag) {
        self.errors[error_index(flag)] = false;
    }

    fn enable_notifications(&mut self) {
        self.notifications = true;
    }

    fn disable_notifications(&mut self) {
        self.notifications = false;
    }

    fn is_busy(&mut self) -> bool {
        self.owned || self.lines.borrow().wedged
    }
}

pub struct MockScl(pub Rc<RefCell<Lines>>);

pub struct MockSda(pub Rc<RefCell<Lines>>);

impl ErrorType for MockScl {
    type Error = Infallible;
}

impl ErrorType for MockSda {
    type Error = Infallible;
}

impl OutputPin for MockScl {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().scl_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut lines = self.0.borrow_mut();
        if !lines.scl_high {
            lines.pulses += 1;
            if lines.wedged && lines.pulses >= lines.release_after {
                lines.wedged = false;
            }
        }
        lines.scl_high = true;
        Ok(())
    }
}

impl OutputPin for MockSda {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().sda_master_low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut lines = self.0.borrow_mut();
        if lines.sda_master_low && lines.scl_high && !lines.wedged {
            lines.stops += 1;
        }
        lines.sda_master_low = false;
        Ok(())
    }
}

impl InputPin for MockSda {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.borrow().sda_high())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.borrow().sda_high())
    }
}

/// Delay that returns immediately but keeps count of the time asked for.
#[derive(Default)]
pub struct CountingDelay {
    pub total_ns: u64,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
