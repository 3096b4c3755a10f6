//! Error types

use crate::config::TimingError;
use core::fmt::Debug;
use thiserror_no_std::Error;

/// Errors reported by the driver
///
/// `E` is the error type of the back end. It is handed back unchanged in
/// [`Error::Io`] whenever a register or message RAM access fails.
#[derive(Error, Debug)]
pub enum Error<E: Debug> {
    /// A register or message RAM access failed
    #[error("register or message RAM access failed: {0:?}")]
    Io(E),
    /// A deadline passed before the operation could complete
    #[error("operation did not complete in time")]
    WouldBlock,
    /// [`start`](crate::bus::Can::start) called on a started controller
    #[error("controller already started")]
    AlreadyStarted,
    /// [`stop`](crate::bus::Can::stop) called on a stopped controller
    #[error("controller already stopped")]
    AlreadyStopped,
    /// The controller is not started
    #[error("controller is stopped")]
    NetworkDown,
    /// The controller is bus-off
    #[error("controller is bus-off")]
    NetworkUnreachable,
    /// The operation requires a stopped controller
    #[error("controller must be stopped")]
    Busy,
    /// Requested mode or frame flags are not supported
    #[error("unsupported mode or frame flags")]
    Unsupported,
    /// Length code exceeds the ceiling of the frame format
    #[error("invalid frame")]
    InvalidFrame,
    /// Filter identifier does not name a filter slot
    #[error("invalid filter identifier")]
    InvalidFilter,
    /// Every filter slot of the requested width is taken
    #[error("no free filter slot")]
    NoFreeFilter,
    /// Bit timing outside of the hardware limits
    #[error("invalid bit timing: {0:?}")]
    Timing(#[from] TimingError),
}

/// Completion status handed to transmit callbacks
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// The controller was stopped before the frame left the buffer
    #[error("controller stopped with the frame still pending")]
    NetworkDown,
}
