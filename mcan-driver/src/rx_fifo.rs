//! Reception through the two RX FIFOs
//!
//! Frames are drained from interrupt context. Each element is checked against
//! the frame format requirements of the filter that stored it, acknowledged
//! and only then handed to that filter's callback.

use crate::bus::{Can, RxCallback};
use crate::error::Error;
use crate::message::{rx::RxHeader, Frame};
use crate::messageram::{Capacities, MessageRamLayout, Region, HEADER_SIZE, MAX_DATA_SIZE};
use crate::reg::{self, Access as _, RxFifoStatus};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_can::Id;
use mcan_driver_core::Dependencies;

/// Value of the type-level FIFO selection enum representing FIFO 0.
pub(crate) struct Fifo0;
/// Value of the type-level FIFO selection enum representing FIFO 1.
pub(crate) struct Fifo1;

/// Registers and message RAM region of one RX FIFO
pub(crate) trait RxFifo {
    /// Number used in log messages
    const NUMBER: u8;
    /// RXFnS
    const STATUS: u16;
    /// RXFnA
    const ACKNOWLEDGE: u16;
    /// Elements of the FIFO
    fn region(layout: &MessageRamLayout) -> Region;
}

impl RxFifo for Fifo0 {
    const NUMBER: u8 = 0;
    const STATUS: u16 = reg::RXF0S;
    const ACKNOWLEDGE: u16 = reg::RXF0A;
    fn region(layout: &MessageRamLayout) -> Region {
        layout.rx_fifo_0
    }
}

impl RxFifo for Fifo1 {
    const NUMBER: u8 = 1;
    const STATUS: u16 = reg::RXF1S;
    const ACKNOWLEDGE: u16 = reg::RXF1A;
    fn region(layout: &MessageRamLayout) -> Region {
        layout.rx_fifo_1
    }
}

impl<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> Can<D, M, T, C> {
    /// Hands every frame waiting in FIFO `F` to its filter's callback
    ///
    /// Frames whose format the filter does not accept are acknowledged and
    /// dropped. Each element is acknowledged exactly once, before the next
    /// one is read.
    pub(crate) fn drain_rx_fifo<F: RxFifo>(&self) -> Result<(), Error<D::Error>> {
        loop {
            let status = RxFifoStatus::from(self.deps.load_raw(F::STATUS)?);
            if status.ffl() == 0 {
                return Ok(());
            }
            let get_index = status.fgi();
            let element = F::region(&self.layout).element(usize::from(get_index));
            let received = self.receive(element)?;
            self.deps.store_raw(F::ACKNOWLEDGE, u32::from(get_index))?;

            match received {
                Some((frame, callback)) => callback(&frame),
                None => trace!("frame dropped from RX FIFO {}", F::NUMBER),
            }
        }
    }

    /// Reads the element at `element` and looks up the callback in charge
    ///
    /// Returns `None` for frames nobody wants.
    fn receive(
        &self,
        element: u16,
    ) -> Result<Option<(Frame, RxCallback)>, Error<D::Error>> {
        let mut raw = [0; HEADER_SIZE as usize];
        self.deps.load_ram(element, &mut raw)?;
        let header = RxHeader::decode(&raw, self.timestamps);
        let mut frame = header.frame;

        let Some(filter_index) = header.filter_index.map(usize::from) else {
            debug!("frame without matching filter");
            return Ok(None);
        };
        let extended = matches!(frame.id, Id::Extended(_));
        let callback = self.shared.lock(|shared| {
            let shared = shared.borrow();
            let (side, callbacks) = if extended {
                (&shared.extended_side, &shared.extended_callbacks[..])
            } else {
                (&shared.standard_side, &shared.standard_callbacks[..])
            };
            if side.accepts(filter_index, frame.flags) {
                Ok(callbacks.get(filter_index).copied().flatten())
            } else {
                Err(())
            }
        });
        let callback = match callback {
            Ok(Some(callback)) => callback,
            Ok(None) => {
                debug!("no callback for filter {}", filter_index);
                return Ok(None);
            }
            Err(()) => {
                trace!("frame format rejected by filter {}", filter_index);
                return Ok(None);
            }
        };

        let len = header.payload_len();
        if len > usize::from(MAX_DATA_SIZE) {
            error!("frame data length {} exceeds the frame buffer", len);
            return Ok(None);
        }
        self.deps
            .load_ram(element + HEADER_SIZE, &mut frame.data[..len])?;
        Ok(Some((frame, callback)))
    }
}
