//! Partitioning of the message RAM between filters, FIFOs and buffers
//!
//! The controller sees its message RAM as seven contiguous regions laid out
//! back to back in a fixed order. Their sizes follow from the element counts
//! selected through [`Capacities`]; offsets are computed once and programmed
//! into the partition registers on every bring-up.
use crate::bus::RxCallback;
use crate::tx_buffers::TxSlot;
use crate::error::Error;
use crate::reg::{self, Access as _};
use generic_array::{
    typenum::{consts::*, IsLessOrEqual, LeEq, Same, Unsigned},
    ArrayLength,
};
use mcan_driver_core::Dependencies;

/// Size of a standard ID filter element
pub const STANDARD_FILTER_SIZE: u16 = 4;
/// Size of an extended ID filter element
pub const EXTENDED_FILTER_SIZE: u16 = 8;
/// Size of the header in front of every RX and TX element
pub const HEADER_SIZE: u16 = 8;
/// Largest payload carried by an element
pub const MAX_DATA_SIZE: u16 = 64;
/// Size of an RX FIFO or TX buffer element with 64 byte data field
pub const FRAME_ELEMENT_SIZE: u16 = HEADER_SIZE + MAX_DATA_SIZE;
/// Size of a TX event FIFO element
pub const TX_EVENT_SIZE: u16 = 8;

/// Element capacities
///
/// Every count is bounded by what the partition registers can express.
pub trait Capacities {
    /// Number of standard ID filters
    type StandardFilters: LimitedArrayLength<Option<RxCallback>, U128>;
    /// Number of extended ID filters
    type ExtendedFilters: LimitedArrayLength<Option<RxCallback>, U64>;
    /// Receive FIFO 0 size
    type RxFifo0: LimitedLength<U64>;
    /// Receive FIFO 1 size
    type RxFifo1: LimitedLength<U64>;
    /// Transmit event FIFO size
    type TxEventFifo: LimitedLength<U32>;
    /// Number of transmit buffers, all of them used as a queue
    type TxBuffers: LimitedArrayLength<TxSlot, U32>;
}

/// [`typenum::Unsigned`](generic_array::typenum::Unsigned) with an upper bound.
pub trait LimitedLength<MaxLength>: Unsigned {}
impl<N, MaxLength> LimitedLength<MaxLength> for N
where
    N: Unsigned + IsLessOrEqual<MaxLength>,
    LeEq<N, MaxLength>: Same<True>,
{
}

/// [`generic_array::ArrayLength`] with an upper bound.
pub trait LimitedArrayLength<T, MaxLength>: ArrayLength<T> + LimitedLength<MaxLength> {}
impl<T, N, MaxLength> LimitedArrayLength<T, MaxLength> for N where
    N: ArrayLength<T> + LimitedLength<MaxLength>
{
}

/// One contiguous run of equally sized elements
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// Byte offset of the first element
    pub offset: u16,
    /// Number of elements
    pub count: u16,
    /// Bytes per element
    pub element_size: u16,
}

impl Region {
    const fn after(previous: Option<&Region>, count: usize, element_size: u16) -> Self {
        let offset = match previous {
            Some(r) => r.end(),
            None => 0,
        };
        Self {
            offset,
            count: count as u16,
            element_size,
        }
    }

    /// Byte offset of element `index`
    pub const fn element(&self, index: usize) -> u16 {
        self.offset + index as u16 * self.element_size
    }

    /// Byte offset one past the last element
    pub const fn end(&self) -> u16 {
        self.offset + self.count * self.element_size
    }

    /// Size in bytes
    pub const fn len(&self) -> usize {
        (self.count * self.element_size) as usize
    }

    /// `true` for a region without elements
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Offsets of all regions relative to the start of the controller's message
/// RAM
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageRamLayout {
    /// Standard ID filter table
    pub standard_filters: Region,
    /// Extended ID filter table
    pub extended_filters: Region,
    /// Receive FIFO 0
    pub rx_fifo_0: Region,
    /// Receive FIFO 1
    pub rx_fifo_1: Region,
    /// Dedicated receive buffers, always empty
    pub rx_buffers: Region,
    /// Transmit event FIFO
    pub tx_event_fifo: Region,
    /// Transmit buffers
    pub tx_buffers: Region,
}

impl MessageRamLayout {
    /// Computes the layout for capacities `C`
    pub const fn new<C: Capacities>() -> Self {
        let standard_filters =
            Region::after(None, C::StandardFilters::USIZE, STANDARD_FILTER_SIZE);
        let extended_filters = Region::after(
            Some(&standard_filters),
            C::ExtendedFilters::USIZE,
            EXTENDED_FILTER_SIZE,
        );
        let rx_fifo_0 =
            Region::after(Some(&extended_filters), C::RxFifo0::USIZE, FRAME_ELEMENT_SIZE);
        let rx_fifo_1 = Region::after(Some(&rx_fifo_0), C::RxFifo1::USIZE, FRAME_ELEMENT_SIZE);
        let rx_buffers = Region::after(Some(&rx_fifo_1), 0, FRAME_ELEMENT_SIZE);
        let tx_event_fifo =
            Region::after(Some(&rx_buffers), C::TxEventFifo::USIZE, TX_EVENT_SIZE);
        let tx_buffers =
            Region::after(Some(&tx_event_fifo), C::TxBuffers::USIZE, FRAME_ELEMENT_SIZE);
        Self {
            standard_filters,
            extended_filters,
            rx_fifo_0,
            rx_fifo_1,
            rx_buffers,
            tx_event_fifo,
            tx_buffers,
        }
    }

    /// Total footprint in bytes
    pub const fn size(&self) -> usize {
        self.tx_buffers.end() as usize
    }

    /// Programs the partition registers and clears the whole footprint
    ///
    /// Requires the controller to be in init mode with configuration changes
    /// enabled. `mram_offset` relocates every start address.
    pub(crate) fn configure<D: Dependencies>(
        &self,
        deps: &D,
        mram_offset: u16,
    ) -> Result<(), Error<D::Error>> {
        let word = |region: &Region| (mram_offset + region.offset) >> 2;

        let mut sidfc = reg::Sidfc::default();
        sidfc.set_flssa(word(&self.standard_filters));
        sidfc.set_lss(self.standard_filters.count as u8);
        deps.store(sidfc)?;

        let mut xidfc = reg::Xidfc::default();
        xidfc.set_flesa(word(&self.extended_filters));
        xidfc.set_lse(self.extended_filters.count as u8);
        deps.store(xidfc)?;

        for (offset, region) in [(reg::RXF0C, &self.rx_fifo_0), (reg::RXF1C, &self.rx_fifo_1)] {
            let mut rxfc = reg::RxFifoConfig::default();
            rxfc.set_fsa(word(region));
            rxfc.set_fs(region.count as u8);
            deps.store_raw(offset, rxfc.into())?;
        }

        let mut rxbc = reg::Rxbc::default();
        rxbc.set_rbsa(word(&self.rx_buffers));
        deps.store(rxbc)?;

        let mut txefc = reg::Txefc::default();
        txefc.set_efsa(word(&self.tx_event_fifo));
        txefc.set_efs(self.tx_event_fifo.count as u8);
        deps.store(txefc)?;

        let mut txbc = reg::Txbc::default();
        txbc.set_tbsa(word(&self.tx_buffers));
        txbc.set_tfqs(self.tx_buffers.count as u8);
        txbc.set_tfqm(true);
        deps.store(txbc)?;

        let mut rxesc = reg::Rxesc::default();
        rxesc.set_f0ds(reg::DATA_FIELD_64);
        rxesc.set_f1ds(reg::DATA_FIELD_64);
        rxesc.set_rbds(reg::DATA_FIELD_64);
        deps.store(rxesc)?;

        let mut txesc = reg::Txesc::default();
        txesc.set_tbds(reg::DATA_FIELD_64);
        deps.store(txesc)?;

        deps.zero_ram(0, self.size())?;
        debug!("message RAM configured, {} bytes", self.size());
        Ok(())
    }
}
