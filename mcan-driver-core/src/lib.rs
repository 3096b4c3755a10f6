#![no_std]
#![warn(missing_docs)]

//! `mcan-driver-core` is the thin integration layer between the platform
//! independent [`mcan-driver`] protocol engine and silicon specific back ends.
//!
//! A back end knows where the M_CAN register block and its message RAM live,
//! how clocks and pins are brought up and which transceiver sits on the bus.
//! The protocol engine knows none of that; it only talks to the controller
//! through the [`Dependencies`] trait defined here.
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by back ends.
//!
//! [`mcan-driver`]: <https://docs.rs/crate/mcan-driver/>

use core::fmt::Debug;

pub use fugit;

/// Monotonic time as seen by the driver, in microseconds since an arbitrary
/// origin
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Trait representing the controller as seen through its back end
///
/// Every register and message RAM access made by the protocol engine goes
/// through this trait. All of them are fallible; an error returned by the back
/// end aborts the operation in progress and is handed back to the caller
/// unchanged. The protocol engine never retries.
///
/// Offsets passed to [`Dependencies::read_reg`] and
/// [`Dependencies::write_reg`] are byte offsets into the M_CAN register block
/// (`0x18` is CCCR, `0x50` is IR and so on). Offsets passed to the message RAM
/// accessors are byte offsets relative to the start of the message RAM region
/// reserved for this controller instance. Message RAM content is exchanged as
/// little endian 32-bit words.
///
/// Interrupt handlers of the protocol engine call into this trait as well, so
/// implementations must not block.
///
/// # Example
/// ```
/// use core::cell::RefCell;
/// use mcan_driver_core::{Dependencies, Instant};
///
/// struct Loopback {
///     regs: RefCell<[u32; 64]>,
///     ram: RefCell<[u8; 256]>,
/// }
///
/// #[derive(Debug)]
/// struct OutOfRange;
///
/// impl Dependencies for Loopback {
///     type Error = OutOfRange;
///
///     fn read_reg(&self, offset: u16) -> Result<u32, OutOfRange> {
///         self.regs.borrow().get(usize::from(offset) / 4).copied().ok_or(OutOfRange)
///     }
///
///     fn write_reg(&self, offset: u16, value: u32) -> Result<(), OutOfRange> {
///         let mut regs = self.regs.borrow_mut();
///         *regs.get_mut(usize::from(offset) / 4).ok_or(OutOfRange)? = value;
///         Ok(())
///     }
///
///     fn read_mram(&self, offset: u16, dst: &mut [u8]) -> Result<(), OutOfRange> {
///         let start = usize::from(offset);
///         let ram = self.ram.borrow();
///         dst.copy_from_slice(ram.get(start..start + dst.len()).ok_or(OutOfRange)?);
///         Ok(())
///     }
///
///     fn write_mram(&self, offset: u16, src: &[u8]) -> Result<(), OutOfRange> {
///         let start = usize::from(offset);
///         let mut ram = self.ram.borrow_mut();
///         ram.get_mut(start..start + src.len()).ok_or(OutOfRange)?.copy_from_slice(src);
///         Ok(())
///     }
///
///     fn clear_mram(&self, offset: u16, len: usize) -> Result<(), OutOfRange> {
///         let start = usize::from(offset);
///         let mut ram = self.ram.borrow_mut();
///         ram.get_mut(start..start + len).ok_or(OutOfRange)?.fill(0);
///         Ok(())
///     }
///
///     fn uptime(&self) -> Instant {
///         Instant::from_ticks(0)
///     }
/// }
/// ```
pub trait Dependencies {
    /// Error reported by the back end when an access fails
    type Error: Debug;

    /// Reads the 32-bit register at `offset`
    fn read_reg(&self, offset: u16) -> Result<u32, Self::Error>;

    /// Writes `value` to the 32-bit register at `offset`
    fn write_reg(&self, offset: u16, value: u32) -> Result<(), Self::Error>;

    /// Fills `dst` with message RAM content starting at `offset`
    fn read_mram(&self, offset: u16, dst: &mut [u8]) -> Result<(), Self::Error>;

    /// Copies `src` into message RAM starting at `offset`
    fn write_mram(&self, offset: u16, src: &[u8]) -> Result<(), Self::Error>;

    /// Zeroes `len` bytes of message RAM starting at `offset`
    fn clear_mram(&self, offset: u16, len: usize) -> Result<(), Self::Error>;

    /// Enables the bus transceiver, if the back end drives one
    fn enable_transceiver(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Disables the bus transceiver, if the back end drives one
    fn disable_transceiver(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Frequency of the clock feeding the CAN core, if known
    ///
    /// Bit timing derived from a bitrate is computed against this clock.
    fn can_clock(&self) -> Option<fugit::HertzU32> {
        None
    }

    /// Current monotonic time
    ///
    /// Used to bound every polling loop of the protocol engine.
    fn uptime(&self) -> Instant;

    /// Called between two polls of a condition that has not been met yet
    ///
    /// Back ends running under a scheduler typically yield here. The default
    /// spins.
    fn relax(&self) {}
}

impl<T: Dependencies + ?Sized> Dependencies for &T {
    type Error = T::Error;

    fn read_reg(&self, offset: u16) -> Result<u32, Self::Error> {
        T::read_reg(self, offset)
    }

    fn write_reg(&self, offset: u16, value: u32) -> Result<(), Self::Error> {
        T::write_reg(self, offset, value)
    }

    fn read_mram(&self, offset: u16, dst: &mut [u8]) -> Result<(), Self::Error> {
        T::read_mram(self, offset, dst)
    }

    fn write_mram(&self, offset: u16, src: &[u8]) -> Result<(), Self::Error> {
        T::write_mram(self, offset, src)
    }

    fn clear_mram(&self, offset: u16, len: usize) -> Result<(), Self::Error> {
        T::clear_mram(self, offset, len)
    }

    fn enable_transceiver(&self) -> Result<(), Self::Error> {
        T::enable_transceiver(self)
    }

    fn disable_transceiver(&self) -> Result<(), Self::Error> {
        T::disable_transceiver(self)
    }

    fn can_clock(&self) -> Option<fugit::HertzU32> {
        T::can_clock(self)
    }

    fn uptime(&self) -> Instant {
        T::uptime(self)
    }

    fn relax(&self) {
        T::relax(self)
    }
}
