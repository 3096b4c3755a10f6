//! Messages to be sent on the bus

use super::*;

bitfield! {
    /// Second header word of a TX buffer element
    #[derive(Copy, Clone, Default)]
    pub(crate) struct TxWord(u32);
    pub u8, mm, set_mm: 31, 24;
    pub efc, set_efc: 23;
    pub fdf, set_fdf: 21;
    pub brs, set_brs: 20;
    pub u8, dlc, set_dlc: 19, 16;
}

/// Encodes the header of a TX buffer element
///
/// An event is always requested; `marker` comes back in it and identifies the
/// buffer the frame was sent from.
pub(crate) fn encode_header(frame: &Frame, marker: u8) -> [u8; 8] {
    let id = IdWord::new(frame.id, frame.flags);
    let mut word = TxWord::default();
    word.set_dlc(frame.dlc);
    word.set_brs(frame.bit_rate_switch());
    word.set_fdf(frame.is_fd());
    word.set_efc(true);
    word.set_mm(marker);
    header_bytes(id.0, word.0)
}
