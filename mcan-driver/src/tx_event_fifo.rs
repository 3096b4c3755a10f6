//! Information about successfully transmitted messages
//!
//! Every frame is sent with event storage enabled and the TX buffer index as
//! its message marker, so each event names the buffer whose transmission
//! completed.

use crate::bus::Can;
use crate::error::Error;
use crate::message::TxEvent;
use crate::messageram::{Capacities, TX_EVENT_SIZE};
use crate::reg::{self, Access as _, Txefs};
use crate::tx_buffers::TxSlot;
use embassy_sync::blocking_mutex::raw::RawMutex;
use mcan_driver_core::Dependencies;

impl<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> Can<D, M, T, C> {
    /// Takes the oldest event from the TX event FIFO
    ///
    /// The event is acknowledged before it is returned.
    pub(crate) fn pop_tx_event(&self) -> Result<Option<TxEvent>, Error<D::Error>> {
        let status = self.deps.load::<Txefs>()?;
        if status.effl() == 0 {
            return Ok(None);
        }
        let get_index = status.efgi();
        let mut element = [0; TX_EVENT_SIZE as usize];
        self.deps.load_ram(
            self.layout.tx_event_fifo.element(usize::from(get_index)),
            &mut element,
        )?;
        let event = TxEvent::decode(&element);
        self.deps.store_raw(reg::TXEFA, u32::from(get_index))?;
        Ok(Some(event))
    }

    /// Completes the transmission of every buffer named by a pending event
    ///
    /// Each completion returns the buffer to the pool before the callback of
    /// the frame is invoked with `Ok(())`.
    pub(crate) fn drain_tx_event_fifo(&self) -> Result<(), Error<D::Error>> {
        while let Some(event) = self.pop_tx_event()? {
            let index = usize::from(event.marker);
            let slot = self.shared.lock(|shared| {
                shared
                    .borrow_mut()
                    .tx_slots
                    .get_mut(index)
                    .map(core::mem::take)
                    .unwrap_or_default()
            });
            match slot {
                TxSlot::InFlight { callback, permit } => {
                    trace!("TX buffer {} sent", index);
                    self.tx_permits.release(permit);
                    callback(Ok(()));
                }
                TxSlot::Idle => warn!("TX event for idle buffer {}", index),
            }
        }
        Ok(())
    }
}
