//! Events for messages sent on the bus

use super::*;

bitfield! {
    /// Second word of a TX event FIFO element
    #[derive(Copy, Clone, Default)]
    pub(crate) struct EventWord(u32);
    pub u8, mm, set_mm: 31, 24;
    pub u8, et, set_et: 23, 22;
    pub fdf, set_fdf: 21;
    pub brs, set_brs: 20;
    pub u8, dlc, set_dlc: 19, 16;
    pub u16, txts, set_txts: 15, 0;
}

/// Record of a frame that left a TX buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TxEvent {
    /// Identifier of the sent frame
    pub id: Id,
    /// Format flags of the sent frame
    pub flags: FrameFlags,
    /// Data length code of the sent frame
    pub dlc: u8,
    /// Timestamp counter value at start of frame transmission
    pub timestamp: u16,
    /// Kind of event
    pub event_type: TxEventType,
    /// Marker copied from the TX buffer element, the buffer index
    pub marker: u8,
}

impl TxEvent {
    pub(crate) fn decode(element: &[u8; 8]) -> Self {
        let (word0, word1) = header_words(element);
        let id = IdWord(word0);
        let word = EventWord(word1);
        let mut flags = id.flags();
        flags.set(FrameFlags::FDF, word.fdf());
        flags.set(FrameFlags::BRS, word.brs());
        Self {
            id: id.id(),
            flags,
            dlc: word.dlc(),
            timestamp: word.txts(),
            event_type: word.et().into(),
            marker: word.mm(),
        }
    }
}

/// Event type field of a TX event
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxEventType {
    /// Value not defined by the controller
    Reserved,
    /// Frame was transmitted
    TxEvent = 1,
    /// Frame was transmitted although cancellation was requested
    TxInSpiteOfCancellation = 2,
}

impl From<u8> for TxEventType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::TxEvent,
            2 => Self::TxInSpiteOfCancellation,
            _ => Self::Reserved,
        }
    }
}
