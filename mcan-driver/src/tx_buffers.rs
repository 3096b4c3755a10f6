//! Transmission through the TX buffer queue
//!
//! Buffers are handed out through a counting semaphore sized to the number of
//! TX buffers, so the queue can never overflow. A buffer stays allocated from
//! the moment its frame is written until the TX event FIFO reports the frame
//! as sent or the controller is stopped.

use crate::bus::{Can, TxCallback};
use crate::error::Error;
use crate::message::{tx, Frame, FrameFlags};
use crate::messageram::{Capacities, HEADER_SIZE};
use crate::reg::{self, Access as _, Psr, Txfqs};
use crate::time::{poll_until, Timeout};
use core::cell::Cell;
use core::convert::Infallible;
use core::fmt;
use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use mcan_driver_core::Dependencies;

/// Proof that one TX buffer is reserved for the holder
///
/// Only [`TxSlots::try_acquire`] creates permits and only
/// [`TxSlots::release`] consumes them. A permit that is dropped instead keeps
/// its buffer reserved for good.
#[derive(Debug)]
pub struct TxPermit {
    _private: (),
}

/// Counting semaphore over the TX buffers
pub(crate) struct TxSlots<M: RawMutex> {
    available: Mutex<M, Cell<usize>>,
}

impl<M: RawMutex> TxSlots<M> {
    pub(crate) const fn new(count: usize) -> Self {
        Self {
            available: Mutex::new(Cell::new(count)),
        }
    }

    pub(crate) fn try_acquire(&self) -> nb::Result<TxPermit, Infallible> {
        self.available.lock(|available| match available.get() {
            0 => Err(nb::Error::WouldBlock),
            n => {
                available.set(n - 1);
                Ok(TxPermit { _private: () })
            }
        })
    }

    pub(crate) fn release(&self, permit: TxPermit) {
        let TxPermit { _private } = permit;
        self.available.lock(|available| available.set(available.get() + 1));
    }

    /// Number of permits that can be acquired right now
    pub(crate) fn available(&self) -> usize {
        self.available.lock(Cell::get)
    }
}

/// Bookkeeping of one TX buffer
#[derive(Default)]
pub enum TxSlot {
    /// Nothing sent from this buffer is outstanding
    #[default]
    Idle,
    /// A frame was handed to the controller and awaits completion
    InFlight {
        /// Notified once the frame left the buffer
        callback: TxCallback,
        /// Reservation returned to the pool on completion
        permit: TxPermit,
    },
}

impl fmt::Debug for TxSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxSlot::Idle => f.write_str("Idle"),
            TxSlot::InFlight { .. } => f.write_str("InFlight"),
        }
    }
}

/// A set of transmit buffers
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TxBufferSet(pub u32);

impl FromIterator<usize> for TxBufferSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut set = 0_u32;
        for i in iter.into_iter() {
            set |= 1u32 << i;
        }
        TxBufferSet(set)
    }
}

impl TxBufferSet {
    /// An iterator visiting all elements in ascending order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

/// An iterator over the buffer indexes of the buffers in a [`TxBufferSet`].
///
/// This `struct` is created by [`TxBufferSet::iter`].
pub struct Iter {
    flags: TxBufferSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < 32 {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) != 0 {
                return Some(i as usize);
            }
        }
        None
    }
}

impl<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> Can<D, M, T, C> {
    /// Queues `frame` for transmission
    ///
    /// Waits up to `timeout` for a free TX buffer. `callback` is invoked
    /// exactly once: with `Ok(())` from the line 0 interrupt handler once the
    /// frame was sent, or with [`TxError::NetworkDown`] if the controller is
    /// stopped first.
    ///
    /// If writing the buffer fails with [`Error::Io`] the buffer stays
    /// reserved and the pool shrinks by one until the next bring-up. If the
    /// controller reports a full queue although a buffer was free, the buffer
    /// is handed back and [`Error::WouldBlock`] returned.
    ///
    /// [`TxError::NetworkDown`]: crate::error::TxError::NetworkDown
    pub fn send(
        &self,
        frame: &Frame,
        timeout: Timeout,
        callback: TxCallback,
    ) -> Result<(), Error<D::Error>> {
        self.validate(frame)?;
        if !self.is_started() {
            return Err(Error::NetworkDown);
        }
        if self.deps.load::<Psr>()?.bo() {
            return Err(Error::NetworkUnreachable);
        }

        let permit = poll_until(&self.deps, timeout, || self.tx_permits.try_acquire()).map_err(
            |_| {
                debug!("no TX buffer became free in time");
                Error::WouldBlock
            },
        )?;

        self.tx_lock.lock(|_| -> Result<(), Error<D::Error>> {
            let status = self.deps.load::<Txfqs>()?;
            if status.tfqf() {
                error!("TX queue full despite a free buffer");
                self.tx_permits.release(permit);
                return Err(Error::WouldBlock);
            }
            let index = usize::from(status.tfqpi());
            let element = self.layout.tx_buffers.element(index);

            self.deps
                .store_ram(element, &tx::encode_header(frame, index as u8))?;
            self.deps
                .store_ram(element + HEADER_SIZE, frame.payload_words())?;

            self.shared.lock(|shared| {
                if let Some(slot) = shared.borrow_mut().tx_slots.get_mut(index) {
                    *slot = TxSlot::InFlight { callback, permit };
                }
            });
            self.deps.store_raw(reg::TXBAR, 1 << index)?;
            trace!("frame queued in TX buffer {}", index);
            Ok(())
        })
    }

    fn validate(&self, frame: &Frame) -> Result<(), Error<D::Error>> {
        let fd_flags = FrameFlags::FDF | FrameFlags::BRS;
        let supported = FrameFlags::RTR | fd_flags;
        if !supported.contains(frame.flags) {
            error!("unsupported frame flags {:#x}", frame.flags.bits());
            return Err(Error::Unsupported);
        }
        let fd = self.shared.lock(|shared| shared.borrow().fd);
        if frame.flags.intersects(fd_flags) && !fd {
            error!("CAN FD frame while CAN FD is disabled");
            return Err(Error::Unsupported);
        }
        let max_dlc = if frame.is_fd() { 15 } else { 8 };
        if frame.dlc > max_dlc {
            error!("length code {} out of range", frame.dlc);
            return Err(Error::InvalidFrame);
        }
        Ok(())
    }

    /// Buffers with a pending transmission request
    pub fn pending_transmissions(&self) -> Result<TxBufferSet, Error<D::Error>> {
        Ok(TxBufferSet(self.deps.load_raw(reg::TXBRP)?))
    }

    /// Number of TX buffers currently free for [`Can::send`]
    pub fn free_tx_buffers(&self) -> usize {
        self.tx_permits.available()
    }
}
