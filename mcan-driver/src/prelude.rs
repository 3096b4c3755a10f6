//! Traits to bring into scope when working with the driver
pub use crate::bus::CanBus as _;
pub use embedded_can::Frame as _;
