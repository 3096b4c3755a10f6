//! Handling of messages/frames
//!
//! Message RAM elements are encoded and decoded explicitly, word by word, into
//! plain byte buffers. Nothing here overlays a type onto message RAM.

pub(crate) mod rx;
pub(crate) mod tx;
mod tx_event;

pub use tx_event::{TxEvent, TxEventType};

use bitfield::bitfield;
use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};

/// Largest payload of any frame
pub const MAX_PAYLOAD: usize = 64;

bitflags! {
    /// Frame format flags besides the identifier width
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// Remote transmission request
        const RTR = 1 << 0;
        /// CAN FD format
        const FDF = 1 << 1;
        /// Bit rate switching in the data phase
        const BRS = 1 << 2;
        /// Transmitter is error passive
        const ESI = 1 << 3;
    }
}

/// CAN frame as exchanged with the application
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// 11- or 29-bit identifier
    pub id: Id,
    /// Format flags
    pub flags: FrameFlags,
    /// Data length code
    pub dlc: u8,
    /// Payload; only the first [`Frame::len`] bytes are meaningful
    pub data: [u8; MAX_PAYLOAD],
    /// Timestamp counter value captured at start of reception, if the
    /// timestamp counter is configured
    pub timestamp: Option<u16>,
}

impl Frame {
    fn with_payload(id: Id, flags: FrameFlags, data: &[u8]) -> Option<Self> {
        let dlc = len_to_dlc(data.len(), flags.contains(FrameFlags::FDF)).ok()?;
        let mut frame = Self {
            id,
            flags,
            dlc,
            data: [0; MAX_PAYLOAD],
            timestamp: None,
        };
        frame.data[..data.len()].copy_from_slice(data);
        Some(frame)
    }

    /// CAN FD data frame
    ///
    /// Payloads that fall between two length codes are padded with zeros.
    pub fn new_fd(id: impl Into<Id>, data: &[u8], bit_rate_switch: bool) -> Option<Self> {
        let mut flags = FrameFlags::FDF;
        flags.set(FrameFlags::BRS, bit_rate_switch);
        Self::with_payload(id.into(), flags, data)
    }

    /// Payload length in bytes as implied by the length code
    pub fn len(&self) -> usize {
        dlc_to_len(self.dlc, self.is_fd())
    }

    /// `true` if the length code implies no payload
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` for CAN FD frames
    pub fn is_fd(&self) -> bool {
        self.flags.contains(FrameFlags::FDF)
    }

    /// `true` if the data phase uses the fast bitrate
    pub fn bit_rate_switch(&self) -> bool {
        self.flags.contains(FrameFlags::BRS)
    }

    /// `true` if the transmitter reported itself error passive
    pub fn error_state_indicator(&self) -> bool {
        self.flags.contains(FrameFlags::ESI)
    }

    /// Payload bytes as stored in the message RAM element, padded to a word
    /// boundary
    pub(crate) fn payload_words(&self) -> &[u8] {
        let len = if self.is_remote() { 0 } else { self.len() };
        &self.data[..word_aligned(len)]
    }

    fn is_remote(&self) -> bool {
        self.flags.contains(FrameFlags::RTR)
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::with_payload(id.into(), FrameFlags::empty(), data)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(Self {
            id: id.into(),
            flags: FrameFlags::RTR,
            dlc: dlc as u8,
            data: [0; MAX_PAYLOAD],
            timestamp: None,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.is_remote()
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc.into()
    }

    fn data(&self) -> &[u8] {
        if self.is_remote() {
            &[]
        } else {
            &self.data[..self.len().min(MAX_PAYLOAD)]
        }
    }
}

bitfield! {
    /// First header word, identical for RX, TX and TX event elements
    #[derive(Copy, Clone, Default)]
    pub(crate) struct IdWord(u32);
    pub esi, set_esi: 31;
    pub xtd, set_xtd: 30;
    pub rtr, set_rtr: 29;
    pub u32, raw_id, set_raw_id: 28, 0;
}

impl IdWord {
    pub(crate) fn new(id: Id, flags: FrameFlags) -> Self {
        let mut word = Self::default();
        match id {
            Id::Standard(id) => word.set_raw_id(u32::from(id.as_raw()) << 18),
            Id::Extended(id) => {
                word.set_xtd(true);
                word.set_raw_id(id.as_raw());
            }
        }
        word.set_rtr(flags.contains(FrameFlags::RTR));
        word.set_esi(flags.contains(FrameFlags::ESI));
        word
    }

    pub(crate) fn id(&self) -> Id {
        if self.xtd() {
            // The field is 29 bits wide
            Id::Extended(unsafe { ExtendedId::new_unchecked(self.raw_id()) })
        } else {
            // The mask ensures the ID is in range for a 11-bit integer
            Id::Standard(unsafe {
                StandardId::new_unchecked((self.raw_id() >> 18) as u16 & StandardId::MAX.as_raw())
            })
        }
    }

    /// Flags carried by this word, RTR and ESI
    pub(crate) fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::RTR, self.rtr());
        flags.set(FrameFlags::ESI, self.esi());
        flags
    }
}

/// Splits an element header into its two words
pub(crate) fn header_words(header: &[u8; 8]) -> (u32, u32) {
    (
        u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
        u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
    )
}

/// Joins two words into an element header
pub(crate) fn header_bytes(word0: u32, word1: u32) -> [u8; 8] {
    let mut header = [0; 8];
    header[..4].copy_from_slice(&word0.to_le_bytes());
    header[4..].copy_from_slice(&word1.to_le_bytes());
    header
}

/// Rounds `len` up to whole 32-bit words
pub(crate) const fn word_aligned(len: usize) -> usize {
    (len + 3) & !3
}

/// Data does not fit in a frame
#[derive(Debug, PartialEq, Eq)]
pub struct TooMuchData;

/// Finds the smallest data length code that encodes at least len bytes
pub fn len_to_dlc(len: usize, fd_format: bool) -> Result<u8, TooMuchData> {
    if fd_format {
        match len {
            0..=8 => Ok(len as u8),
            9..=12 => Ok(9),
            13..=16 => Ok(10),
            17..=20 => Ok(11),
            21..=24 => Ok(12),
            25..=32 => Ok(13),
            33..=48 => Ok(14),
            49..=64 => Ok(15),
            _ => Err(TooMuchData),
        }
    } else {
        match len {
            0..=8 => Ok(len as u8),
            _ => Err(TooMuchData),
        }
    }
}

/// Converts data length code to a length in bytes
pub fn dlc_to_len(dlc: u8, fd_format: bool) -> usize {
    if fd_format {
        match dlc {
            0..=8 => dlc.into(),
            9 => 12,
            10 => 16,
            11 => 20,
            12 => 24,
            13 => 32,
            14 => 48,
            15.. => 64,
        }
    } else {
        match dlc {
            0..=8 => dlc.into(),
            9.. => 8,
        }
    }
}
