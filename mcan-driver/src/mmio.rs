//! Register and message RAM access for controllers mapped onto the system bus
//!
//! Back ends of SoCs that expose the M_CAN register block and its message RAM
//! directly in the address space can forward the access half of
//! [`Dependencies`] to [`MemoryMapped`] and only provide clocks, transceiver
//! control and uptime themselves.
//!
//! Message RAM is only ever accessed in whole 32-bit words, which is what the
//! controller requires. Every element the driver reads or writes is word
//! aligned and padded to a multiple of four bytes.
//!
//! [`Dependencies`]: mcan_driver_core::Dependencies

use thiserror_no_std::Error;
use vcell::VolatileCell;

/// Number of 32-bit registers in the M_CAN register block
pub const REGISTER_BLOCK_WORDS: usize = 0x100 / 4;

const WORD: usize = core::mem::size_of::<u32>();

/// Access outside of or misaligned within the mapped areas
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MmioError {
    /// The access does not fit the mapped area
    #[error("access at {0:#x} out of bounds")]
    OutOfBounds(u16),
    /// Offset or length is not a multiple of four bytes
    #[error("access at {0:#x} not word aligned")]
    Misaligned(u16),
}

/// Controller mapped onto the system bus
pub struct MemoryMapped<'a> {
    registers: &'a [VolatileCell<u32>],
    message_ram: &'a [VolatileCell<u32>],
}

// Safety: every access is a single volatile word access; sequences of
// accesses are serialized by the driver's locks.
unsafe impl Sync for MemoryMapped<'_> {}

impl<'a> MemoryMapped<'a> {
    /// Accesses already typed memory
    pub fn from_cells(
        registers: &'a [VolatileCell<u32>],
        message_ram: &'a [VolatileCell<u32>],
    ) -> Self {
        Self {
            registers,
            message_ram,
        }
    }

    /// # Safety
    /// `registers` must point to the register block of an M_CAN instance and
    /// `message_ram` to `message_ram_len` bytes of message RAM reserved for
    /// that instance. Both must stay mapped for `'a` and must not be accessed
    /// through other means while the driver owns them.
    pub unsafe fn new(registers: *mut u32, message_ram: *mut u32, message_ram_len: usize) -> Self {
        Self {
            registers: core::slice::from_raw_parts(
                registers as *const VolatileCell<u32>,
                REGISTER_BLOCK_WORDS,
            ),
            message_ram: core::slice::from_raw_parts(
                message_ram as *const VolatileCell<u32>,
                message_ram_len / WORD,
            ),
        }
    }

    fn register(&self, offset: u16) -> Result<&VolatileCell<u32>, MmioError> {
        if usize::from(offset) % WORD != 0 {
            return Err(MmioError::Misaligned(offset));
        }
        self.registers
            .get(usize::from(offset) / WORD)
            .ok_or(MmioError::OutOfBounds(offset))
    }

    fn words(&self, offset: u16, len: usize) -> Result<&[VolatileCell<u32>], MmioError> {
        let start = usize::from(offset);
        if start % WORD != 0 || len % WORD != 0 {
            return Err(MmioError::Misaligned(offset));
        }
        self.message_ram
            .get(start / WORD..(start + len) / WORD)
            .ok_or(MmioError::OutOfBounds(offset))
    }

    /// Reads the register at byte offset `offset`
    pub fn read_reg(&self, offset: u16) -> Result<u32, MmioError> {
        Ok(self.register(offset)?.get())
    }

    /// Writes the register at byte offset `offset`
    pub fn write_reg(&self, offset: u16, value: u32) -> Result<(), MmioError> {
        self.register(offset)?.set(value);
        Ok(())
    }

    /// Reads message RAM into `dst`, word by word
    pub fn read_mram(&self, offset: u16, dst: &mut [u8]) -> Result<(), MmioError> {
        let words = self.words(offset, dst.len())?;
        for (chunk, word) in dst.chunks_exact_mut(WORD).zip(words) {
            chunk.copy_from_slice(&word.get().to_le_bytes());
        }
        Ok(())
    }

    /// Writes `src` into message RAM, word by word
    pub fn write_mram(&self, offset: u16, src: &[u8]) -> Result<(), MmioError> {
        let words = self.words(offset, src.len())?;
        for (chunk, word) in src.chunks_exact(WORD).zip(words) {
            word.set(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(())
    }

    /// Zeroes `len` bytes of message RAM
    pub fn clear_mram(&self, offset: u16, len: usize) -> Result<(), MmioError> {
        for word in self.words(offset, len)? {
            word.set(0);
        }
        Ok(())
    }
}
