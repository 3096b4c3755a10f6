#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # M_CAN driver
//!
//! ## Overview
//! This crate provides the platform independent half of a driver for the
//! Bosch M_CAN CAN/CAN FD controller IP, meant to sit underneath the CAN
//! subsystem of an RTOS.
//!
//! It provides the following features:
//!
//! - classical CAN and CAN FD with bitrate switching support
//! - mode control (sleep, init, normal operation) with bounded waits
//! - nominal and data phase bit timing, with transmitter delay compensation
//! - a message RAM partition computed at compile time from [`Capacities`]
//! - transmission through the TX queue with completion callbacks
//! - reception through both RX FIFOs, dispatched to per filter callbacks
//! - error state tracking with state change notification and bus-off
//!   recovery
//!
//! The controller is reached exclusively through the [`Dependencies`] trait
//! of [`mcan_driver_core`], implemented by silicon specific back ends. Back
//! ends of controllers mapped onto the system bus can use
//! [`mmio::MemoryMapped`] for the register and message RAM accesses.
//!
//! ## Concurrency
//!
//! [`Can`] is meant to live in a `static`. All of its methods take `&self`;
//! application threads configure the controller and send frames while the
//! two interrupt handlers [`Can::on_line_0_interrupt`] and
//! [`Can::on_line_1_interrupt`] complete transmissions and deliver frames.
//! The integrator picks two lock types. `M` protects the state shared with
//! the handlers and is only held for short accesses; use
//! `CriticalSectionRawMutex` whenever the handlers run in interrupt context.
//! `T` serializes mode transitions and TX buffer writes between application
//! threads. It stays locked while the driver polls the controller, so it must
//! be a thread level lock such as an RTOS mutex. The handlers never take `T`.
//!
//! Callbacks are invoked from interrupt context (and from [`Can::stop`]) with
//! no driver lock held. They must not block.
//!
//! ## General usage example
//!
//! ```no_run
//! use fugit::RateExtU32 as _;
//! use mcan_driver::bus::Can;
//! use mcan_driver::config::{Config, Mode};
//! use mcan_driver::core::{Dependencies, Instant};
//! use mcan_driver::embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
//! use mcan_driver::embedded_can::{Frame as _, StandardId};
//! use mcan_driver::error::TxError;
//! use mcan_driver::filter::Filter;
//! use mcan_driver::generic_array::typenum::consts::*;
//! use mcan_driver::message::Frame;
//! use mcan_driver::mmio::{MemoryMapped, MmioError};
//! use mcan_driver::time::Timeout;
//!
//! struct Capacities;
//! impl mcan_driver::messageram::Capacities for Capacities {
//!     type StandardFilters = U28;
//!     type ExtendedFilters = U8;
//!     type RxFifo0 = U3;
//!     type RxFifo1 = U3;
//!     type TxEventFifo = U3;
//!     type TxBuffers = U3;
//! }
//!
//! /// Mutex of the RTOS
//! struct ThreadMutex;
//! unsafe impl RawMutex for ThreadMutex {
//!     const INIT: Self = ThreadMutex;
//!     fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
//!         // take the RTOS mutex here and give it back after `f`
//!         f()
//!     }
//! }
//!
//! struct Board {
//!     mmio: MemoryMapped<'static>,
//! }
//!
//! impl Dependencies for Board {
//!     type Error = MmioError;
//!     fn read_reg(&self, offset: u16) -> Result<u32, MmioError> {
//!         self.mmio.read_reg(offset)
//!     }
//!     fn write_reg(&self, offset: u16, value: u32) -> Result<(), MmioError> {
//!         self.mmio.write_reg(offset, value)
//!     }
//!     fn read_mram(&self, offset: u16, dst: &mut [u8]) -> Result<(), MmioError> {
//!         self.mmio.read_mram(offset, dst)
//!     }
//!     fn write_mram(&self, offset: u16, src: &[u8]) -> Result<(), MmioError> {
//!         self.mmio.write_mram(offset, src)
//!     }
//!     fn clear_mram(&self, offset: u16, len: usize) -> Result<(), MmioError> {
//!         self.mmio.clear_mram(offset, len)
//!     }
//!     fn can_clock(&self) -> Option<fugit::HertzU32> {
//!         Some(80.MHz())
//!     }
//!     fn uptime(&self) -> Instant {
//!         unimplemented!("read the system timer")
//!     }
//! }
//!
//! fn on_frame(frame: &Frame) {
//!     let _ = frame.data();
//! }
//!
//! fn on_sent(result: Result<(), TxError>) {
//!     let _ = result;
//! }
//!
//! // Safety: addresses of the register block and message RAM of CAN0
//! let mmio = unsafe {
//!     MemoryMapped::new(0x4003_0000 as *mut u32, 0x2000_0000 as *mut u32, 0x1000)
//! };
//! let can = Can::<_, CriticalSectionRawMutex, ThreadMutex, Capacities>::new(
//!     Board { mmio },
//!     Config::new(500.kHz()),
//! )
//! .unwrap();
//!
//! can.set_mode(Mode::empty()).unwrap();
//! let id = StandardId::new(0x123).unwrap();
//! can.add_rx_filter(&Filter::exact(id), &on_frame).unwrap();
//! can.start().unwrap();
//!
//! let frame = Frame::new(id, &[1, 2, 3]).unwrap();
//! can.send(&frame, Timeout::Forever, &on_sent).unwrap();
//! ```
//!
//! [`Capacities`]: crate::messageram::Capacities
//! [`Dependencies`]: mcan_driver_core::Dependencies
//! [`Can`]: crate::bus::Can
//! [`Can::on_line_0_interrupt`]: crate::bus::Can::on_line_0_interrupt
//! [`Can::on_line_1_interrupt`]: crate::bus::Can::on_line_1_interrupt
//! [`Can::stop`]: crate::bus::Can::stop

mod fmt;

pub mod bus;
pub mod config;
pub mod error;
pub mod filter;
pub mod interrupt;
pub mod message;
pub mod messageram;
pub mod mmio;
mod mode;
pub mod prelude;
pub mod reg;
mod rx_fifo;
pub mod time;
pub mod tx_buffers;
mod tx_event_fifo;

pub use embassy_sync;
pub use embedded_can;
pub use generic_array;
pub use mcan_driver_core as core;
