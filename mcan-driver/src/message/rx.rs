//! Messages received from the bus.

use super::*;

bitfield! {
    /// Second header word of an RX FIFO element
    #[derive(Copy, Clone, Default)]
    pub(crate) struct RxWord(u32);
    pub anmf, set_anmf: 31;
    pub u8, fidx, set_fidx: 30, 24;
    pub fdf, set_fdf: 21;
    pub brs, set_brs: 20;
    pub u8, dlc, set_dlc: 19, 16;
    pub u16, rxts, set_rxts: 15, 0;
}

/// Decoded header of an RX FIFO element
#[derive(Copy, Clone, Debug)]
pub(crate) struct RxHeader {
    /// Frame without payload
    pub frame: Frame,
    /// Index of the filter that accepted the frame. `None` if no filter
    /// matched, but the frame was accepted due to global filter settings.
    pub filter_index: Option<u8>,
}

impl RxHeader {
    pub(crate) fn decode(header: &[u8; 8], timestamps: bool) -> Self {
        let (word0, word1) = header_words(header);
        let id = IdWord(word0);
        let word = RxWord(word1);
        let mut flags = id.flags();
        flags.set(FrameFlags::FDF, word.fdf());
        flags.set(FrameFlags::BRS, word.brs());
        Self {
            frame: Frame {
                id: id.id(),
                flags,
                dlc: word.dlc(),
                data: [0; MAX_PAYLOAD],
                timestamp: timestamps.then(|| word.rxts()),
            },
            filter_index: (!word.anmf()).then(|| word.fidx()),
        }
    }

    /// Bytes to read after the header, padded to a word boundary
    pub(crate) fn payload_len(&self) -> usize {
        if self.frame.is_remote() {
            0
        } else {
            word_aligned(self.frame.len())
        }
    }
}
