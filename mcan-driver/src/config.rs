//! Controller configuration and bit timing

use bitflags::bitflags;
use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Configuration applied while the controller is brought up
#[derive(Copy, Clone)]
pub struct Config {
    /// Offset of the message RAM region reserved for this controller relative
    /// to the base address the controller uses for its partition registers
    ///
    /// Zero when the controller addresses its message RAM from the start of
    /// the region.
    pub mram_offset: u16,
    /// Nominal bit timing programmed during bring-up, if any
    pub nominal_timing: Option<BitTiming>,
    /// Data phase bit timing programmed during bring-up, if any
    pub data_timing: Option<BitTiming>,
    /// Timestamp counter configuration
    ///
    /// Received frames carry a timestamp only when this is set.
    pub timestamp: Option<Timestamp>,
    /// Program transmitter delay compensation together with the data phase
    /// timing
    pub delay_compensation: bool,
    /// Highest bitrate the bus hardware supports
    pub max_bitrate: HertzU32,
}

impl Config {
    /// Create an instance
    ///
    /// Nominal bitrate value must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            mram_offset: 0,
            nominal_timing: Some(BitTiming::new(bitrate)),
            data_timing: None,
            timestamp: None,
            delay_compensation: false,
            max_bitrate: HertzU32::from_raw(5_000_000),
        }
    }
}

/// Timestamp counter configuration
#[derive(Copy, Clone)]
pub struct Timestamp {
    /// Counting mode of time stamp timer
    pub select: TimestampSelect,
    /// Time stamp timer prescaler, bit times per tick
    /// Valid values are: 1 <= prescaler <= 16
    pub prescaler: u8,
}

impl Default for Timestamp {
    fn default() -> Self {
        Self {
            select: TimestampSelect::Prescaler,
            prescaler: 1,
        }
    }
}

/// Source of the timestamp counter
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimestampSelect {
    /// Counter stays at zero
    Zero = 0,
    /// Counter increments with the prescaled bit clock
    Prescaler = 1,
    /// Counter is supplied by an external source
    External = 2,
}

bitflags! {
    /// Operating mode flags
    ///
    /// [`Mode::empty`] is normal operation.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Mode: u8 {
        /// Frames are looped back internally
        const LOOPBACK = 1 << 0;
        /// Bus monitoring, the controller never drives the bus
        const LISTEN_ONLY = 1 << 1;
        /// CAN FD frames with bit rate switching
        const FD = 1 << 2;
        /// No automatic retransmission
        const ONE_SHOT = 1 << 3;
        /// Three samples per bit
        const TRIPLE_SAMPLE = 1 << 4;
        /// Bus-off is left only through an explicit recovery request
        const MANUAL_RECOVERY = 1 << 5;
    }
}

impl Mode {
    /// Flags the controller can be put into
    pub const SUPPORTED: Mode = Mode::LOOPBACK
        .union(Mode::LISTEN_ONLY)
        .union(Mode::FD);
}

/// Bit timing register values in *real* units
///
/// The register encoding (every field stored minus one) is handled by the
/// driver. The propagation segment is folded into `phase_seg_1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// Synchronization jump width; `None` keeps the value currently
    /// programmed
    pub sjw: Option<u16>,
    /// Time quanta before the sample point, without the sync segment
    pub phase_seg_1: u16,
    /// Time quanta after the sample point
    pub phase_seg_2: u16,
    /// CAN clock divider producing one time quantum
    pub prescaler: u16,
}

/// Misconfigurations of [`Timing`] and [`BitTiming`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingError {
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// Total bit time quanta is outside the wrapped `RangeInclusive`
    BitTimeOutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// [`Timestamp::prescaler`] is outside the wrapped `RangeInclusive`
    TimestampPrescalerOutOfRange(RangeInclusive<u8>),
    /// No valid prescaler could be found
    ///
    /// `can_clock` must be divisible by `bitrate * bit_time_quanta`.
    NoValidPrescaler {
        /// Provided peripheral clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
        /// Time quanta per bit selected by [`BitTiming`]
        bit_time_quanta: u32,
    },
}

/// Hardware limits of one bit timing register
#[derive(Clone, Debug)]
pub struct TimingRanges {
    /// Synchronization jump width
    pub sjw: RangeInclusive<u32>,
    /// Phase segment 1
    pub phase_seg_1: RangeInclusive<u32>,
    /// Phase segment 2
    pub phase_seg_2: RangeInclusive<u32>,
    /// The bit time, in time quanta
    pub time_quanta_per_bit: RangeInclusive<u32>,
    /// Prescaler
    pub prescaler: RangeInclusive<u32>,
}

/// Limits of the nominal bit timing register
pub const NOMINAL_TIMING_RANGES: TimingRanges = TimingRanges {
    sjw: 1..=128,
    phase_seg_1: 2..=256,
    phase_seg_2: 2..=128,
    time_quanta_per_bit: 5..=385,
    prescaler: 1..=512,
};

/// Limits of the data phase bit timing register
pub const DATA_TIMING_RANGES: TimingRanges = TimingRanges {
    sjw: 1..=16,
    phase_seg_1: 1..=32,
    phase_seg_2: 1..=16,
    time_quanta_per_bit: 3..=49,
    prescaler: 1..=32,
};

impl TimingRanges {
    /// Smallest programmable timing
    pub fn min(&self) -> Timing {
        Timing {
            sjw: Some(*self.sjw.start() as u16),
            phase_seg_1: *self.phase_seg_1.start() as u16,
            phase_seg_2: *self.phase_seg_2.start() as u16,
            prescaler: *self.prescaler.start() as u16,
        }
    }

    /// Largest programmable timing
    pub fn max(&self) -> Timing {
        Timing {
            sjw: Some(*self.sjw.end() as u16),
            phase_seg_1: *self.phase_seg_1.end() as u16,
            phase_seg_2: *self.phase_seg_2.end() as u16,
            prescaler: *self.prescaler.end() as u16,
        }
    }
}

impl Timing {
    /// Checks every field against `valid`
    ///
    /// Only the individual fields are limited; the total bit time is not
    /// checked here.
    pub fn check(&self, valid: &TimingRanges) -> Result<(), TimingError> {
        if let Some(sjw) = self.sjw {
            if !valid.sjw.contains(&sjw.into()) {
                return Err(TimingError::SynchronizationJumpWidthOutOfRange(
                    valid.sjw.clone(),
                ));
            }
        }
        if !valid.phase_seg_1.contains(&self.phase_seg_1.into()) {
            Err(TimingError::PhaseSeg1OutOfRange(valid.phase_seg_1.clone()))
        } else if !valid.phase_seg_2.contains(&self.phase_seg_2.into()) {
            Err(TimingError::PhaseSeg2OutOfRange(valid.phase_seg_2.clone()))
        } else if !valid.prescaler.contains(&self.prescaler.into()) {
            Err(TimingError::PrescalerOutOfRange(valid.prescaler.clone()))
        } else {
            Ok(())
        }
    }
}

/// Bitrate based timing description
///
/// The prescaler is derived from the CAN core clock once it is known.
///
/// Default values are:
/// - sjw: 0x4
/// - phase_seg_1: 0xB
/// - phase_seg_2: 0x4
///
/// Default time quanta in a bit time is 16 (phase_seg_1 + phase_seg_2 +
/// synchronization segment (1))
#[derive(Copy, Clone, Debug)]
pub struct BitTiming {
    /// Synchronization jump width
    pub sjw: u8,
    /// Propagation time and phase time before sample point
    pub phase_seg_1: u8,
    /// Time after sample point
    pub phase_seg_2: u8,
    /// The bitrate of the bus
    pub bitrate: HertzU32,
}

impl BitTiming {
    /// Create an instance with default segment lengths
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            sjw: 0x4,
            phase_seg_1: 0xB,
            phase_seg_2: 0x4,
            bitrate,
        }
    }

    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.phase_seg_1) + u32::from(self.phase_seg_2)
    }

    /// Resolves the prescaler against `can_clock`
    pub fn to_timing(&self, can_clock: HertzU32, valid: &TimingRanges) -> Result<Timing, TimingError> {
        let bit_time_quanta = self.time_quanta_per_bit();
        if !valid.time_quanta_per_bit.contains(&bit_time_quanta) {
            return Err(TimingError::BitTimeOutOfRange(
                valid.time_quanta_per_bit.clone(),
            ));
        }
        let f_q = self.bitrate.to_Hz().saturating_mul(bit_time_quanta);
        let no_prescaler = || TimingError::NoValidPrescaler {
            can_clock,
            bitrate: self.bitrate,
            bit_time_quanta,
        };
        match can_clock.to_Hz().checked_rem(f_q) {
            Some(0) => {}
            _ => return Err(no_prescaler()),
        }
        let prescaler = can_clock.to_Hz() / f_q;
        if !valid.prescaler.contains(&prescaler) {
            return Err(TimingError::PrescalerOutOfRange(valid.prescaler.clone()));
        }
        let timing = Timing {
            sjw: Some(self.sjw.into()),
            phase_seg_1: self.phase_seg_1.into(),
            phase_seg_2: self.phase_seg_2.into(),
            prescaler: prescaler as u16,
        };
        timing.check(valid)?;
        Ok(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_match_register_widths() {
        let min = NOMINAL_TIMING_RANGES.min();
        let max = NOMINAL_TIMING_RANGES.max();
        assert_eq!((min.sjw, min.phase_seg_1, min.phase_seg_2, min.prescaler), (Some(1), 2, 2, 1));
        assert_eq!(
            (max.sjw, max.phase_seg_1, max.phase_seg_2, max.prescaler),
            (Some(128), 256, 128, 512)
        );
        let max = DATA_TIMING_RANGES.max();
        assert_eq!(
            (max.sjw, max.phase_seg_1, max.phase_seg_2, max.prescaler),
            (Some(16), 32, 16, 32)
        );
        assert!(max.check(&DATA_TIMING_RANGES).is_ok());
    }

    #[test]
    fn out_of_range_fields_are_named() {
        let mut timing = NOMINAL_TIMING_RANGES.max();
        timing.prescaler = 513;
        assert_eq!(
            timing.check(&NOMINAL_TIMING_RANGES),
            Err(TimingError::PrescalerOutOfRange(1..=512))
        );
        timing.prescaler = 1;
        timing.sjw = Some(0);
        assert_eq!(
            timing.check(&NOMINAL_TIMING_RANGES),
            Err(TimingError::SynchronizationJumpWidthOutOfRange(1..=128))
        );
        timing.sjw = None;
        assert!(timing.check(&NOMINAL_TIMING_RANGES).is_ok());
        timing.phase_seg_2 = 129;
        assert_eq!(
            timing.check(&NOMINAL_TIMING_RANGES),
            Err(TimingError::PhaseSeg2OutOfRange(2..=128))
        );
    }

    #[test]
    fn bitrate_resolves_to_prescaler() {
        let timing = BitTiming::new(HertzU32::from_raw(500_000))
            .to_timing(HertzU32::from_raw(80_000_000), &NOMINAL_TIMING_RANGES)
            .unwrap();
        assert_eq!(
            timing,
            Timing {
                sjw: Some(4),
                phase_seg_1: 11,
                phase_seg_2: 4,
                prescaler: 10,
            }
        );
    }

    #[test]
    fn indivisible_clock_has_no_prescaler() {
        let result = BitTiming::new(HertzU32::from_raw(500_000))
            .to_timing(HertzU32::from_raw(12_345_678), &NOMINAL_TIMING_RANGES);
        assert!(matches!(
            result,
            Err(TimingError::NoValidPrescaler { bit_time_quanta: 16, .. })
        ));
    }

    #[test]
    fn supported_modes_exclude_one_shot() {
        assert!(Mode::SUPPORTED.contains(Mode::LOOPBACK | Mode::LISTEN_ONLY | Mode::FD));
        assert!(!Mode::SUPPORTED.contains(Mode::ONE_SHOT));
        assert!(!Mode::SUPPORTED.contains(Mode::MANUAL_RECOVERY));
    }
}
