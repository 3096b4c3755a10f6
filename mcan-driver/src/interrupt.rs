//! Interrupt dispatch
//!
//! The controller drives two interrupt lines. Status, error and TX event
//! interrupts are routed to line 0, RX FIFO interrupts to line 1. Each line
//! has its own handler which must be called from the matching interrupt
//! service routine of the platform.
//!
//! The handlers never block: they take neither the mode lock nor the TX lock.
//! Frames, completions and state changes are handed to the registered
//! callbacks from within the handler.

use crate::bus::{Can, State};
use crate::error::Error;
use crate::messageram::Capacities;
use crate::reg::{self, Access as _};
use crate::rx_fifo::{Fifo0, Fifo1};
use bitfield::bitfield;
use embassy_sync::blocking_mutex::raw::RawMutex;
use mcan_driver_core::Dependencies;

bitfield! {
    /// A set of CAN interrupts, laid out like IR, IE and ILS
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct InterruptSet(u32);
    impl Debug;

    /// Access to Reserved Address
    pub ara, _: 29;
    /// Bus Off
    pub bo, _: 25;
    /// Warning status changed
    pub ew, _: 24;
    /// Error Passive
    pub ep, _: 23;
    /// Message Ram Access Failure
    pub mraf, _: 17;
    /// Tx Event Fifo Element Lost
    pub tefl, _: 15;
    /// Tx Event Fifo New Entry
    pub tefn, _: 12;
    /// Rx Fifo1 Message Lost
    pub rf1l, _: 7;
    /// Rx Fifo1 New Message
    pub rf1n, _: 4;
    /// Rx Fifo0 Message Lost
    pub rf0l, _: 3;
    /// Rx Fifo0 New Message
    pub rf0n, _: 0;
}

/// A single interrupt handled by the driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// RF0N
    RxFifo0NewMessage = 0,
    /// RF0L
    RxFifo0MessageLost = 3,
    /// RF1N
    RxFifo1NewMessage = 4,
    /// RF1L
    RxFifo1MessageLost = 7,
    /// TEFN
    TxEventFifoNewEntry = 12,
    /// TEFL
    TxEventFifoElementLost = 15,
    /// MRAF
    MessageRamAccessFailure = 17,
    /// EP
    ErrorPassive = 23,
    /// EW
    WarningStatusChanged = 24,
    /// BO
    BusOff = 25,
    /// ARA
    AccessToReservedAddress = 29,
}

impl Interrupt {
    const fn mask(self) -> u32 {
        1 << self as u32
    }
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        x.mask()
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u32;
        for int in iter.into_iter() {
            set |= u32::from(int);
        }
        InterruptSet(set)
    }
}

impl From<u32> for InterruptSet {
    fn from(bits: u32) -> Self {
        InterruptSet(bits)
    }
}

impl InterruptSet {
    /// Raw register value
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Interrupts contained in both sets
    pub const fn intersection(self, other: Self) -> Self {
        InterruptSet(self.0 & other.0)
    }

    /// Interrupts contained in either set
    pub const fn union(self, other: Self) -> Self {
        InterruptSet(self.0 | other.0)
    }

    /// `true` if no interrupt is contained
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `true` if any state change interrupt is contained
    pub fn state_changed(&self) -> bool {
        self.bo() || self.ep() || self.ew()
    }
}

/// Interrupts handled by [`Can::on_line_0_interrupt`]
pub const LINE_0_INTERRUPTS: InterruptSet = InterruptSet(
    Interrupt::BusOff.mask()
        | Interrupt::ErrorPassive.mask()
        | Interrupt::WarningStatusChanged.mask()
        | Interrupt::TxEventFifoNewEntry.mask()
        | Interrupt::TxEventFifoElementLost.mask()
        | Interrupt::AccessToReservedAddress.mask()
        | Interrupt::MessageRamAccessFailure.mask(),
);

/// Interrupts handled by [`Can::on_line_1_interrupt`]
pub const LINE_1_INTERRUPTS: InterruptSet = InterruptSet(
    Interrupt::RxFifo0NewMessage.mask()
        | Interrupt::RxFifo1NewMessage.mask()
        | Interrupt::RxFifo0MessageLost.mask()
        | Interrupt::RxFifo1MessageLost.mask(),
);

impl<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> Can<D, M, T, C> {
    /// Services interrupt line 0: state changes, TX completions and faults
    ///
    /// Flags are acknowledged before they are handled and IR is read again
    /// afterwards, until no line 0 flag is left. A flag raised while the
    /// handler runs is therefore never lost.
    pub fn on_line_0_interrupt(&self) -> Result<(), Error<D::Error>> {
        let mut flagged = self.flagged(LINE_0_INTERRUPTS)?;
        while !flagged.is_empty() {
            self.deps.store_raw(reg::IR, flagged.bits())?;
            trace!("line 0 interrupts {:#x}", flagged.bits());

            if flagged.state_changed() {
                self.on_state_change()?;
            }
            if flagged.tefn() {
                self.drain_tx_event_fifo()?;
            }
            if flagged.tefl() {
                error!("TX event FIFO element lost");
            }
            if flagged.ara() {
                error!("access to reserved address");
            }
            if flagged.mraf() {
                error!("message RAM access failure");
            }
            flagged = self.flagged(LINE_0_INTERRUPTS)?;
        }
        Ok(())
    }

    /// Services interrupt line 1: reception into the RX FIFOs
    ///
    /// Same acknowledge and re-read loop as [`Can::on_line_0_interrupt`].
    pub fn on_line_1_interrupt(&self) -> Result<(), Error<D::Error>> {
        let mut flagged = self.flagged(LINE_1_INTERRUPTS)?;
        while !flagged.is_empty() {
            self.deps.store_raw(reg::IR, flagged.bits())?;
            trace!("line 1 interrupts {:#x}", flagged.bits());

            if flagged.rf0n() {
                self.drain_rx_fifo::<Fifo0>()?;
            }
            if flagged.rf1n() {
                self.drain_rx_fifo::<Fifo1>()?;
            }
            if flagged.rf0l() {
                error!("RX FIFO 0 message lost");
            }
            if flagged.rf1l() {
                error!("RX FIFO 1 message lost");
            }
            flagged = self.flagged(LINE_1_INTERRUPTS)?;
        }
        Ok(())
    }

    fn flagged(&self, line: InterruptSet) -> Result<InterruptSet, Error<D::Error>> {
        let ir = InterruptSet::from(self.deps.load_raw(reg::IR)?);
        Ok(ir.intersection(line))
    }

    fn on_state_change(&self) -> Result<(), Error<D::Error>> {
        let (state, counters) = self.state()?;
        debug!("state changed, tx errors {}, rx errors {}", counters.tx, counters.rx);
        let callback = self.shared.lock(|shared| shared.borrow().state_change);
        if let Some(callback) = callback {
            callback(state, counters);
        }

        #[cfg(feature = "auto-bus-off-recovery")]
        if state == State::BusOff {
            // Recovery completes in the background; nothing to wait for here.
            self.deps.update::<reg::Cccr>(|r| r.set_init(false))?;
        }
        #[cfg(not(feature = "auto-bus-off-recovery"))]
        if state == State::BusOff {
            warn!("bus-off, waiting for explicit recovery");
        }
        Ok(())
    }
}
