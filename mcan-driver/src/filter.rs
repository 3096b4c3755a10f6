//! Message filters
//!
//! Only classic mask filters are used. Each filter slot owns one element in
//! the standard or extended filter table and one RX callback. Whether a
//! filter accepts data frames, remote frames or CAN FD frames cannot be
//! expressed in the filter element; that part of a filter lives in
//! [`SideTable`]s consulted when a frame is drained from an RX FIFO.

use crate::bus::{Can, RxCallback};
use crate::error::Error;
use crate::message::FrameFlags;
use crate::messageram::{Capacities, EXTENDED_FILTER_SIZE, STANDARD_FILTER_SIZE};
use crate::reg::Access as _;
use bitfield::bitfield;
use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_can::{ExtendedId, Id, StandardId};
use mcan_driver_core::Dependencies;

bitflags! {
    /// Kinds of frames a filter accepts
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FilterFlags: u8 {
        /// Data frames
        const DATA = 1 << 0;
        /// Remote frames
        const RTR = 1 << 1;
        /// CAN FD frames instead of classic frames
        const FDF = 1 << 2;
    }
}

/// Acceptance filter
///
/// A frame matches if `frame_id & mask == id & mask` and its format agrees
/// with `flags`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    /// Identifier to compare against; its width selects the filter table
    pub id: Id,
    /// Identifier bits that must match, truncated to the identifier width
    pub mask: u32,
    /// Accepted frame kinds
    pub flags: FilterFlags,
}

impl Filter {
    /// Filter accepting data frames with exactly `id`
    pub fn exact(id: impl Into<Id>) -> Self {
        let id = id.into();
        let mask = match id {
            Id::Standard(_) => StandardId::MAX.as_raw().into(),
            Id::Extended(_) => ExtendedId::MAX.as_raw(),
        };
        Self {
            id,
            mask,
            flags: FilterFlags::DATA,
        }
    }
}

/// Handle of an installed filter
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterId {
    /// Slot in the standard ID filter table
    Standard(usize),
    /// Slot in the extended ID filter table
    Extended(usize),
}

/// Filter element configuration field, the action taken on a match
///
/// A zeroed element disables the filter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Action {
    /// Matching frames are stored in RX FIFO 0
    StoreFifo0 = 1,
    /// Matching frames are stored in RX FIFO 1
    StoreFifo1 = 2,
}

impl Action {
    /// Neighbouring slots feed different FIFOs to spread the load
    fn for_slot(index: usize) -> Self {
        if index & 1 == 0 {
            Action::StoreFifo0
        } else {
            Action::StoreFifo1
        }
    }
}

/// Filter type field selecting classic filter/mask operation
const CLASSIC: u8 = 2;

bitfield! {
    /// Standard ID filter element
    #[derive(Copy, Clone, Default)]
    pub(crate) struct StandardElement(u32);
    pub u8, sft, set_sft: 31, 30;
    pub u8, sfec, set_sfec: 29, 27;
    pub u16, sfid1, set_sfid1: 26, 16;
    pub u16, sfid2, set_sfid2: 10, 0;
}

bitfield! {
    /// First word of an extended ID filter element
    #[derive(Copy, Clone, Default)]
    pub(crate) struct ExtendedElement0(u32);
    pub u8, efec, set_efec: 31, 29;
    pub u32, efid1, set_efid1: 28, 0;
}

bitfield! {
    /// Second word of an extended ID filter element
    #[derive(Copy, Clone, Default)]
    pub(crate) struct ExtendedElement1(u32);
    pub u8, eft, set_eft: 31, 30;
    pub u32, efid2, set_efid2: 28, 0;
}

pub(crate) fn encode_standard(id: StandardId, mask: u32, index: usize) -> [u8; 4] {
    let mut element = StandardElement::default();
    element.set_sft(CLASSIC);
    element.set_sfec(Action::for_slot(index) as u8);
    element.set_sfid1(id.as_raw());
    element.set_sfid2((mask & u32::from(StandardId::MAX.as_raw())) as u16);
    element.0.to_le_bytes()
}

pub(crate) fn encode_extended(id: ExtendedId, mask: u32, index: usize) -> [u8; 8] {
    let mut first = ExtendedElement0::default();
    first.set_efec(Action::for_slot(index) as u8);
    first.set_efid1(id.as_raw());
    let mut second = ExtendedElement1::default();
    second.set_eft(CLASSIC);
    second.set_efid2(mask & ExtendedId::MAX.as_raw());
    let mut element = [0; 8];
    element[..4].copy_from_slice(&first.0.to_le_bytes());
    element[4..].copy_from_slice(&second.0.to_le_bytes());
    element
}

/// Frame format requirements of every filter slot of one table, one bit per
/// slot
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SideTable {
    /// Expected RTR bit
    rtr: u128,
    /// RTR bit is checked at all
    rtr_mask: u128,
    /// Expected FDF bit
    fdf: u128,
}

impl SideTable {
    pub(crate) fn set(&mut self, index: usize, flags: FilterFlags) {
        let bit = 1_u128 << index;
        self.clear(index);
        if flags.contains(FilterFlags::RTR) {
            self.rtr |= bit;
        }
        if !flags.contains(FilterFlags::DATA | FilterFlags::RTR) {
            self.rtr_mask |= bit;
        }
        if flags.contains(FilterFlags::FDF) {
            self.fdf |= bit;
        }
    }

    pub(crate) fn clear(&mut self, index: usize) {
        let bit = !(1_u128 << index);
        self.rtr &= bit;
        self.rtr_mask &= bit;
        self.fdf &= bit;
    }

    /// `true` if the filter in slot `index` wants a frame with `flags`
    pub(crate) fn accepts(&self, index: usize, flags: FrameFlags) -> bool {
        let bit = 1_u128 << index;
        let rtr = flags.contains(FrameFlags::RTR);
        if self.rtr_mask & bit != 0 && (self.rtr & bit != 0) != rtr {
            return false;
        }
        (self.fdf & bit != 0) == flags.contains(FrameFlags::FDF)
    }

    pub(crate) fn is_clear(&self, index: usize) -> bool {
        let bit = 1_u128 << index;
        (self.rtr | self.rtr_mask | self.fdf) & bit == 0
    }
}

impl<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> Can<D, M, T, C> {
    /// Installs `filter` in the lowest free slot of its table
    ///
    /// Frames it accepts are handed to `callback` from the line 1 interrupt
    /// handler. Fails with [`Error::NoFreeFilter`] if every slot of the table
    /// is taken.
    pub fn add_rx_filter(
        &self,
        filter: &Filter,
        callback: RxCallback,
    ) -> Result<FilterId, Error<D::Error>> {
        let filter_id = self.mode.transaction(|| -> Result<FilterId, Error<D::Error>> {
            let index = self.shared.lock(|shared| {
                let mut shared = shared.borrow_mut();
                let callbacks = match filter.id {
                    Id::Standard(_) => &mut shared.standard_callbacks[..],
                    Id::Extended(_) => &mut shared.extended_callbacks[..],
                };
                let index = callbacks.iter().position(Option::is_none)?;
                callbacks[index] = Some(callback);
                Some(index)
            });
            let Some(index) = index else {
                warn!("no free filter slot");
                return Err(Error::NoFreeFilter);
            };

            let written = match filter.id {
                Id::Standard(id) => {
                    let element = self.layout.standard_filters.element(index);
                    self.deps
                        .store_ram(element, &encode_standard(id, filter.mask, index))
                        .map(|_| FilterId::Standard(index))
                }
                Id::Extended(id) => {
                    let element = self.layout.extended_filters.element(index);
                    self.deps
                        .store_ram(element, &encode_extended(id, filter.mask, index))
                        .map(|_| FilterId::Extended(index))
                }
            };
            if written.is_err() {
                self.shared.lock(|shared| {
                    let mut shared = shared.borrow_mut();
                    match filter.id {
                        Id::Standard(_) => shared.standard_callbacks[index] = None,
                        Id::Extended(_) => shared.extended_callbacks[index] = None,
                    }
                });
            }
            written
        })?;

        self.shared.lock(|shared| {
            let mut shared = shared.borrow_mut();
            match filter_id {
                FilterId::Standard(index) => shared.standard_side.set(index, filter.flags),
                FilterId::Extended(index) => shared.extended_side.set(index, filter.flags),
            }
        });
        debug!("filter installed in slot {}", filter_id.index());
        Ok(filter_id)
    }

    /// Disables the filter and forgets its callback
    ///
    /// Removing a slot that is already free is not an error.
    pub fn remove_rx_filter(&self, filter_id: FilterId) -> Result<(), Error<D::Error>> {
        let (region, size) = match filter_id {
            FilterId::Standard(index) if index < self.max_filters(false) => {
                (self.layout.standard_filters, STANDARD_FILTER_SIZE)
            }
            FilterId::Extended(index) if index < self.max_filters(true) => {
                (self.layout.extended_filters, EXTENDED_FILTER_SIZE)
            }
            _ => return Err(Error::InvalidFilter),
        };
        let index = filter_id.index();

        self.mode.transaction(|| {
            // The slot only becomes free for `add_rx_filter` together with
            // its side-table bits.
            self.shared.lock(|shared| {
                let mut shared = shared.borrow_mut();
                match filter_id {
                    FilterId::Standard(_) => {
                        shared.standard_callbacks[index] = None;
                        shared.standard_side.clear(index);
                    }
                    FilterId::Extended(_) => {
                        shared.extended_callbacks[index] = None;
                        shared.extended_side.clear(index);
                    }
                }
            });
            self.deps.zero_ram(region.element(index), size.into())
        })?;
        Ok(())
    }
}

impl FilterId {
    /// Slot number within its table
    pub fn index(&self) -> usize {
        match *self {
            FilterId::Standard(index) | FilterId::Extended(index) => index,
        }
    }
}
