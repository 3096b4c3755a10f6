//! The controller instance and its lifecycle

use crate::config::{
    BitTiming, Config, Mode, Timing, TimingError, TimingRanges, DATA_TIMING_RANGES,
    NOMINAL_TIMING_RANGES,
};
use crate::error::{Error, TxError};
use crate::filter::SideTable;
use crate::interrupt::{LINE_0_INTERRUPTS, LINE_1_INTERRUPTS};
use crate::message::Frame;
use crate::messageram::{Capacities, MessageRamLayout};
use crate::mode::ModeControl;
use crate::reg::{self, Access as _, Cccr, Crel, Dbtp, Ecr, Gfc, Ile, Nbtp, Psr, Tdcr, Test, Tscc, Tscv};
use crate::time::{Timeout, MODE_TRANSITION_TIMEOUT};
use crate::tx_buffers::{TxSlot, TxSlots};
use core::cell::RefCell;
use core::fmt::{self, Debug};
use core::sync::atomic::{AtomicBool, Ordering};
use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use fugit::HertzU32;
use generic_array::{typenum::Unsigned, GenericArray};
use mcan_driver_core::Dependencies;

/// Called from interrupt context with every frame accepted by a filter
pub type RxCallback = &'static (dyn Fn(&Frame) + Sync);

/// Called once per sent frame, from interrupt context on completion or from
/// [`Can::stop`] if the frame was still pending
pub type TxCallback = &'static (dyn Fn(Result<(), TxError>) + Sync);

/// Called from interrupt context whenever the error state may have changed
pub type StateChangeCallback = &'static (dyn Fn(State, ErrorCounters) + Sync);

/// Error state of the controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// The driver is not started
    Stopped,
    /// Both error counters below 96
    ErrorActive,
    /// At least one error counter reached the warning limit
    ErrorWarning,
    /// At least one error counter exceeded 127
    ErrorPassive,
    /// Transmit error counter exceeded 255; the controller left the bus
    BusOff,
}

impl State {
    /// State as reported by the protocol status register
    ///
    /// Bus-off takes precedence over error passive, which takes precedence
    /// over error warning.
    pub fn from_status(started: bool, psr: Psr) -> Self {
        if !started {
            State::Stopped
        } else if psr.bo() {
            State::BusOff
        } else if psr.ep() {
            State::ErrorPassive
        } else if psr.ew() {
            State::ErrorWarning
        } else {
            State::ErrorActive
        }
    }
}

/// Transmit and receive error counters
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    /// Transmit error counter
    pub tx: u8,
    /// Receive error counter
    pub rx: u8,
    /// Receive error counter reached the error passive level
    pub rx_passive: bool,
    /// Errors since the counters were last read, saturating at 255
    pub logging: u8,
}

impl From<Ecr> for ErrorCounters {
    fn from(ecr: Ecr) -> Self {
        Self {
            tx: ecr.tec(),
            rx: ecr.rec(),
            rx_passive: ecr.rp(),
            logging: ecr.cel(),
        }
    }
}

/// Printable PSR field
pub struct ProtocolStatus(pub Psr);

impl From<Psr> for ProtocolStatus {
    fn from(value: Psr) -> Self {
        Self(value)
    }
}

impl Debug for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let psr = &self.0;

        f.debug_struct("ProtocolStatus")
            .field("tdcv", &psr.tdcv())
            .field("pxe", &psr.pxe())
            .field("rfdf", &psr.rfdf())
            .field("rbrs", &psr.rbrs())
            .field("resi", &psr.resi())
            .field("dlec", &psr.dlec())
            .field("bo", &psr.bo())
            .field("ew", &psr.ew())
            .field("ep", &psr.ep())
            .field("act", &psr.act())
            .field("lec", &psr.lec())
            .finish()
    }
}

/// Diagnostic readouts available in every state
pub trait CanBus {
    /// Error type of the back end
    type Error: Debug;
    /// Read error counters
    fn error_counters(&self) -> Result<ErrorCounters, Error<Self::Error>>;
    /// Read additional status information
    fn protocol_status(&self) -> Result<ProtocolStatus, Error<Self::Error>>;
    /// Get current value of the timestamp counter
    fn timestamp_counter(&self) -> Result<u16, Error<Self::Error>>;
}

/// Driver state shared between application threads and interrupt handlers
pub(crate) struct Shared<C: Capacities> {
    pub(crate) tx_slots: GenericArray<TxSlot, C::TxBuffers>,
    pub(crate) standard_callbacks: GenericArray<Option<RxCallback>, C::StandardFilters>,
    pub(crate) extended_callbacks: GenericArray<Option<RxCallback>, C::ExtendedFilters>,
    pub(crate) standard_side: SideTable,
    pub(crate) extended_side: SideTable,
    pub(crate) state_change: Option<StateChangeCallback>,
    pub(crate) fd: bool,
}

/// One M_CAN controller
///
/// `D` reaches the hardware and `C` fixes the element counts of the message
/// RAM. Two lock types are involved:
///
/// - `M` guards the state shared with the interrupt handlers. It is only held
///   for short, non-blocking accesses and must exclude the handlers, e.g.
///   `CriticalSectionRawMutex`.
/// - `T` serializes the mode transitions and the TX buffer writes of
///   application threads. It is held while polling for the controller, so it
///   must be a thread level lock (an RTOS mutex) that leaves interrupts
///   enabled. The interrupt handlers never take it.
///
/// All methods take `&self`; a `Can` is meant to be placed in a `static` and
/// shared between application threads and the two interrupt handlers
/// [`Can::on_line_0_interrupt`] and [`Can::on_line_1_interrupt`].
pub struct Can<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> {
    pub(crate) deps: D,
    pub(crate) layout: MessageRamLayout,
    pub(crate) timestamps: bool,
    delay_compensation: bool,
    max_bitrate: HertzU32,
    pub(crate) started: AtomicBool,
    pub(crate) mode: ModeControl<T>,
    pub(crate) tx_lock: Mutex<T, ()>,
    pub(crate) tx_permits: TxSlots<M>,
    pub(crate) shared: Mutex<M, RefCell<Shared<C>>>,
}

impl<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> Can<D, M, T, C> {
    /// Brings the controller up
    ///
    /// The controller is woken, put into init mode and configured: message
    /// RAM partitions, global filter (reject everything no filter accepts),
    /// bit timings, timestamp counter and interrupt routing. It is left in
    /// init mode with configuration changes enabled; [`Can::start`] joins the
    /// bus.
    ///
    /// Any failure leaves the controller in init mode so that bring-up can
    /// simply be retried.
    pub fn new(deps: D, config: Config) -> Result<Self, Error<D::Error>> {
        let can = Self {
            deps,
            layout: MessageRamLayout::new::<C>(),
            timestamps: config.timestamp.is_some(),
            delay_compensation: config.delay_compensation,
            max_bitrate: config.max_bitrate,
            started: AtomicBool::new(false),
            mode: ModeControl::new(),
            tx_lock: Mutex::new(()),
            tx_permits: TxSlots::new(C::TxBuffers::USIZE),
            shared: Mutex::new(RefCell::new(Shared {
                tx_slots: GenericArray::default(),
                standard_callbacks: GenericArray::default(),
                extended_callbacks: GenericArray::default(),
                standard_side: SideTable::default(),
                extended_side: SideTable::default(),
                state_change: None,
                fd: false,
            })),
        };
        can.bring_up(&config)?;
        Ok(can)
    }

    fn bring_up(&self, config: &Config) -> Result<(), Error<D::Error>> {
        let deps = &self.deps;
        self.mode.exit_sleep(deps)?;
        self.mode.enter_init(deps, MODE_TRANSITION_TIMEOUT)?;
        self.mode.enable_configuration_change(deps)?;

        let crel = deps.load::<Crel>()?;
        debug!(
            "M_CAN core release {}.{}.{}",
            crel.rel(),
            crel.step(),
            crel.substep()
        );

        self.mode.transaction(|| -> Result<(), Error<D::Error>> {
            deps.update::<Cccr>(|r| {
                r.set_fdoe(false);
                r.set_brse(false);
                r.set_test(false);
                r.set_mon(false);
                r.set_asm(false);
            })?;
            deps.update::<Test>(|r| r.set_lbck(false)).map(|_| ())
        })?;

        self.layout.configure(deps, config.mram_offset)?;

        let mut gfc = Gfc::default();
        gfc.set_anfs(2);
        gfc.set_anfe(2);
        deps.store(gfc)?;
        deps.store_raw(reg::XIDAM, 0x1FFF_FFFF)?;

        let mut tscc = Tscc::default();
        if let Some(timestamp) = config.timestamp {
            if !(1..=16).contains(&timestamp.prescaler) {
                return Err(TimingError::TimestampPrescalerOutOfRange(1..=16).into());
            }
            tscc.set_tss(timestamp.select as u8);
            tscc.set_tcp(timestamp.prescaler - 1);
        }
        deps.store(tscc)?;

        if let Some(nominal) = &config.nominal_timing {
            let timing = self.resolve(nominal, &NOMINAL_TIMING_RANGES)?;
            self.set_timing(&timing)?;
        }
        if let Some(data) = &config.data_timing {
            let timing = self.resolve(data, &DATA_TIMING_RANGES)?;
            self.set_timing_data(&timing)?;
        }

        deps.store_raw(reg::IE, LINE_0_INTERRUPTS.union(LINE_1_INTERRUPTS).bits())?;
        deps.store_raw(reg::ILS, LINE_1_INTERRUPTS.bits())?;
        let mut ile = Ile::default();
        ile.set_eint0(true);
        ile.set_eint1(true);
        deps.store(ile)?;
        deps.store_raw(reg::TXBTIE, slot_mask(C::TxBuffers::USIZE))?;
        Ok(())
    }

    fn resolve(&self, timing: &BitTiming, valid: &TimingRanges) -> Result<Timing, Error<D::Error>> {
        let clock = self.deps.can_clock().ok_or(Error::Unsupported)?;
        Ok(timing.to_timing(clock, valid)?)
    }

    /// Returns the back end
    ///
    /// The controller is left in whatever state it is in.
    pub fn release(self) -> D {
        self.deps
    }

    /// Message RAM layout in use
    pub fn layout(&self) -> &MessageRamLayout {
        &self.layout
    }

    /// Modes [`Can::set_mode`] accepts
    pub fn capabilities(&self) -> Mode {
        Mode::SUPPORTED
    }

    /// `true` between [`Can::start`] and [`Can::stop`]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Joins the bus
    ///
    /// The transceiver is enabled first and disabled again if the controller
    /// does not leave init mode in time.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if called twice.
    /// - [`Error::WouldBlock`] if the controller did not confirm leaving init
    ///   mode within 100 ms. The back end error type cannot express this case,
    ///   so it is not reported as [`Error::Io`].
    /// - [`Error::Io`] if a register access or the transceiver failed.
    pub fn start(&self) -> Result<(), Error<D::Error>> {
        if self.is_started() {
            return Err(Error::AlreadyStarted);
        }
        self.deps.enable_transceiver().map_err(Error::Io)?;
        if let Err(e) = self.mode.leave_init(&self.deps, MODE_TRANSITION_TIMEOUT) {
            error!("failed to leave init mode");
            // Report the leave-init error, not this one.
            let _ = self.deps.disable_transceiver();
            return Err(e);
        }
        self.started.store(true, Ordering::Release);
        debug!("started");
        Ok(())
    }

    /// Leaves the bus
    ///
    /// Frames still waiting in a TX buffer are abandoned; their callbacks are
    /// invoked with [`TxError::NetworkDown`] in buffer order before this
    /// returns.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStopped`] if the controller is not started.
    /// - [`Error::WouldBlock`] if the controller did not confirm entering init
    ///   mode within 100 ms. The init request is withdrawn and the controller
    ///   stays on the bus. As for [`Can::start`], this timeout is not an
    ///   [`Error::Io`].
    /// - [`Error::Io`] if a register access or the transceiver failed.
    pub fn stop(&self) -> Result<(), Error<D::Error>> {
        if !self.is_started() {
            return Err(Error::AlreadyStopped);
        }
        self.mode.enter_init(&self.deps, MODE_TRANSITION_TIMEOUT)?;
        self.deps.disable_transceiver().map_err(Error::Io)?;
        self.mode.enable_configuration_change(&self.deps)?;
        self.started.store(false, Ordering::Release);

        for index in 0..C::TxBuffers::USIZE {
            let abandoned = self.shared.lock(|shared| {
                let mut shared = shared.borrow_mut();
                shared
                    .tx_slots
                    .get_mut(index)
                    .map(core::mem::take)
                    .unwrap_or_default()
            });
            if let TxSlot::InFlight { callback, permit } = abandoned {
                self.tx_permits.release(permit);
                callback(Err(TxError::NetworkDown));
            }
        }
        debug!("stopped");
        Ok(())
    }

    /// Selects loopback, bus monitoring and CAN FD operation
    ///
    /// Flags not in [`Mode::SUPPORTED`] are rejected. Every call replaces the
    /// previous selection; [`Mode::empty`] returns to normal classic CAN.
    pub fn set_mode(&self, mode: Mode) -> Result<(), Error<D::Error>> {
        if !Mode::SUPPORTED.contains(mode) {
            return Err(Error::Unsupported);
        }
        if self.is_started() {
            return Err(Error::Busy);
        }
        let fd = mode.contains(Mode::FD);
        self.mode.transaction(|| -> Result<(), Error<D::Error>> {
            write_mode(&self.deps, mode)?;
            self.shared.lock(|shared| shared.borrow_mut().fd = fd);
            Ok(())
        })
    }

    /// Programs the nominal (arbitration phase) bit timing
    pub fn set_timing(&self, timing: &Timing) -> Result<(), Error<D::Error>> {
        if self.is_started() {
            return Err(Error::Busy);
        }
        timing.check(&NOMINAL_TIMING_RANGES)?;
        self.mode.transaction(|| {
            self.deps.update::<Nbtp>(|r| {
                if let Some(sjw) = timing.sjw {
                    r.set_nsjw((sjw - 1) as u8);
                }
                r.set_nbrp(timing.prescaler - 1);
                r.set_ntseg1((timing.phase_seg_1 - 1) as u8);
                r.set_ntseg2((timing.phase_seg_2 - 1) as u8);
            })
        })?;
        Ok(())
    }

    /// Programs the data phase bit timing used by CAN FD frames with bit rate
    /// switching
    ///
    /// With delay compensation configured the transmitter delay compensation
    /// offset is set to the data phase sample point.
    pub fn set_timing_data(&self, timing: &Timing) -> Result<(), Error<D::Error>> {
        if self.is_started() {
            return Err(Error::Busy);
        }
        timing.check(&DATA_TIMING_RANGES)?;
        self.mode.transaction(|| -> Result<Dbtp, Error<D::Error>> {
            if self.delay_compensation {
                let offset = (timing.phase_seg_1 + 1) * timing.prescaler;
                self.deps
                    .update::<Tdcr>(|r| r.set_tdco(offset.min(127) as u8))?;
            }
            self.deps.update::<Dbtp>(|r| {
                if let Some(sjw) = timing.sjw {
                    r.set_dsjw((sjw - 1) as u8);
                }
                r.set_dbrp((timing.prescaler - 1) as u8);
                r.set_dtseg1((timing.phase_seg_1 - 1) as u8);
                r.set_dtseg2((timing.phase_seg_2 - 1) as u8);
                r.set_tdc(self.delay_compensation);
            })
        })?;
        Ok(())
    }

    /// Current error state together with the error counters
    pub fn state(&self) -> Result<(State, ErrorCounters), Error<D::Error>> {
        let psr = self.deps.load::<Psr>()?;
        let counters = self.deps.load::<Ecr>()?.into();
        Ok((State::from_status(self.is_started(), psr), counters))
    }

    /// Registers the callback notified of error state changes, replacing any
    /// previous one
    pub fn set_state_change_callback(&self, callback: Option<StateChangeCallback>) {
        self.shared
            .lock(|shared| shared.borrow_mut().state_change = callback);
    }

    /// Number of filter slots for the given identifier width
    pub fn max_filters(&self, extended: bool) -> usize {
        if extended {
            C::ExtendedFilters::USIZE
        } else {
            C::StandardFilters::USIZE
        }
    }

    /// Highest bitrate the bus hardware supports
    pub fn max_bitrate(&self) -> HertzU32 {
        self.max_bitrate
    }

    /// Clock feeding the CAN core
    pub fn core_clock(&self) -> Result<HertzU32, Error<D::Error>> {
        self.deps.can_clock().ok_or(Error::Unsupported)
    }

    /// Brings a bus-off controller back onto the bus
    ///
    /// The controller waits for 128 occurrences of 11 recessive bits before it
    /// reports being back.
    #[cfg(not(feature = "auto-bus-off-recovery"))]
    pub fn recover(&self, timeout: Timeout) -> Result<(), Error<D::Error>> {
        if !self.is_started() {
            return Err(Error::NetworkDown);
        }
        self.mode.leave_init(&self.deps, timeout)
    }
}

fn write_mode<D: Dependencies>(deps: &D, mode: Mode) -> Result<(), Error<D::Error>> {
    let loopback = mode.contains(Mode::LOOPBACK);
    let fd = mode.contains(Mode::FD);
    deps.update::<Cccr>(|r| {
        r.set_test(loopback);
        r.set_mon(mode.contains(Mode::LISTEN_ONLY));
        r.set_fdoe(fd);
        r.set_brse(fd);
    })?;
    deps.update::<Test>(|r| r.set_lbck(loopback))?;
    Ok(())
}

/// One bit per TX buffer
pub(crate) fn slot_mask(count: usize) -> u32 {
    match count {
        32.. => u32::MAX,
        n => (1 << n) - 1,
    }
}

impl<D: Dependencies, M: RawMutex, T: RawMutex, C: Capacities> CanBus for Can<D, M, T, C> {
    type Error = D::Error;

    fn error_counters(&self) -> Result<ErrorCounters, Error<D::Error>> {
        Ok(self.deps.load::<Ecr>()?.into())
    }

    fn protocol_status(&self) -> Result<ProtocolStatus, Error<D::Error>> {
        Ok(self.deps.load::<Psr>()?.into())
    }

    fn timestamp_counter(&self) -> Result<u16, Error<D::Error>> {
        Ok(self.deps.load::<Tscv>()?.tsc())
    }
}
