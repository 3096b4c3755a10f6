mod common;

use common::{bring_up, state_log, tx_log, Injected, Sim, TestCan};
use mcan_driver::bus::{Can, CanBus as _, State};
use mcan_driver::config::{Config, Mode, Timing, TimingError};
use mcan_driver::core::fugit::HertzU32;
use mcan_driver::embedded_can::{Frame as _, StandardId};
use mcan_driver::error::{Error, TxError};
use mcan_driver::interrupt::{LINE_0_INTERRUPTS, LINE_1_INTERRUPTS};
use mcan_driver::message::Frame;
use mcan_driver::reg;
use mcan_driver::time::Timeout;

const INIT: u32 = 1 << 0;
const CCE: u32 = 1 << 1;

fn frame(id: u16, data: &[u8]) -> Frame {
    Frame::new(StandardId::new(id).unwrap(), data).unwrap()
}

#[test]
fn bring_up_leaves_controller_configurable() {
    let sim = Sim::default();
    let can = bring_up(&sim);

    assert_eq!(sim.reg(reg::CCCR) & (INIT | CCE), INIT | CCE);
    assert_eq!(
        sim.reg(reg::IE),
        LINE_0_INTERRUPTS.union(LINE_1_INTERRUPTS).bits()
    );
    assert_eq!(sim.reg(reg::ILS), LINE_1_INTERRUPTS.bits());
    assert_eq!(sim.reg(reg::ILE), 0b11);
    assert_eq!(sim.reg(reg::TXBTIE), 0b111);
    assert_eq!(sim.reg(reg::GFC), (2 << 4) | (2 << 2));
    assert_eq!(sim.reg(reg::XIDAM), 0x1FFF_FFFF);
    assert_ne!(sim.reg(reg::TXBC) & (1 << 30), 0);
    // 500 kbit/s from 80 MHz with 16 time quanta per bit
    assert_eq!(sim.reg(reg::NBTP), (3 << 25) | (9 << 16) | (10 << 8) | 3);

    assert!(!can.is_started());
    assert_eq!(can.state().unwrap().0, State::Stopped);
    assert_eq!(can.capabilities(), Mode::LOOPBACK | Mode::LISTEN_ONLY | Mode::FD);
    assert_eq!(can.max_filters(false), 3);
    assert_eq!(can.max_filters(true), 2);
    assert_eq!(can.core_clock().unwrap(), HertzU32::from_raw(80_000_000));
}

#[test]
fn nominal_timing_and_first_frame() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    can.set_timing(&Timing {
        sjw: Some(1),
        phase_seg_1: 13,
        phase_seg_2: 2,
        prescaler: 4,
    })
    .unwrap();
    can.start().unwrap();

    let (log, callback) = tx_log();
    can.send(
        &frame(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]),
        Timeout::NoWait,
        callback,
    )
    .unwrap();

    assert_eq!(sim.reg(reg::NBTP), (3 << 16) | (12 << 8) | 1);
    let (word0, word1) = sim.tx_header(0);
    assert_eq!(word0, 0x123 << 18);
    assert_eq!((word1 >> 16) & 0xF, 8);
    assert_eq!(word1 >> 24, 0, "marker names buffer 0");
    assert_ne!(word1 & (1 << 23), 0, "event storage requested");
    assert_eq!(sim.tx_data(0, 8), [1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(sim.writes_to(reg::TXBAR), [1]);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn missing_sjw_keeps_programmed_value() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    can.set_timing(&Timing {
        sjw: None,
        phase_seg_1: 13,
        phase_seg_2: 2,
        prescaler: 4,
    })
    .unwrap();
    assert_eq!(sim.reg(reg::NBTP) >> 25, 3);

    can.set_timing_data(&Timing {
        sjw: Some(2),
        phase_seg_1: 5,
        phase_seg_2: 2,
        prescaler: 2,
    })
    .unwrap();
    assert_eq!(sim.reg(reg::DBTP), (1 << 16) | (4 << 8) | (1 << 4) | 1);
    can.set_timing_data(&Timing {
        sjw: None,
        phase_seg_1: 5,
        phase_seg_2: 2,
        prescaler: 2,
    })
    .unwrap();
    assert_eq!(sim.reg(reg::DBTP) & 0xF, 1);
}

#[test]
fn timing_is_validated_and_locked_while_started() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    let too_wide = Timing {
        sjw: Some(1),
        phase_seg_1: 40,
        phase_seg_2: 2,
        prescaler: 1,
    };
    assert!(matches!(
        can.set_timing_data(&too_wide),
        Err(Error::Timing(TimingError::PhaseSeg1OutOfRange(_)))
    ));
    assert!(can.set_timing(&too_wide).is_ok());

    can.start().unwrap();
    assert!(matches!(can.set_timing(&too_wide), Err(Error::Busy)));
    assert!(matches!(can.set_mode(Mode::FD), Err(Error::Busy)));
}

#[test]
fn delay_compensation_follows_data_sample_point() {
    let sim = Sim::default();
    let mut config = Config::new(HertzU32::from_raw(500_000));
    config.delay_compensation = true;
    let can: TestCan = Can::new(&sim, config).unwrap();

    can.set_timing_data(&Timing {
        sjw: Some(1),
        phase_seg_1: 7,
        phase_seg_2: 2,
        prescaler: 2,
    })
    .unwrap();
    assert_eq!((sim.reg(reg::TDCR) >> 8) & 0x7F, 16);
    assert_ne!(sim.reg(reg::DBTP) & (1 << 23), 0);

    can.set_timing_data(&Timing {
        sjw: Some(1),
        phase_seg_1: 32,
        phase_seg_2: 2,
        prescaler: 32,
    })
    .unwrap();
    assert_eq!((sim.reg(reg::TDCR) >> 8) & 0x7F, 127);
}

#[test]
fn start_and_stop_are_not_repeated() {
    let sim = Sim::default();
    let can = bring_up(&sim);

    assert!(matches!(can.stop(), Err(Error::AlreadyStopped)));
    can.start().unwrap();
    assert!(sim.transceiver_enabled());
    assert_eq!(sim.reg(reg::CCCR) & INIT, 0);
    assert!(matches!(can.start(), Err(Error::AlreadyStarted)));
    assert_eq!(can.state().unwrap().0, State::ErrorActive);

    can.stop().unwrap();
    assert!(!sim.transceiver_enabled());
    assert_eq!(sim.reg(reg::CCCR) & (INIT | CCE), INIT | CCE);
    assert!(matches!(can.stop(), Err(Error::AlreadyStopped)));
    can.start().unwrap();
}

#[test]
fn stop_abandons_pending_frames_once() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    can.start().unwrap();

    let (log, callback) = tx_log();
    can.send(&frame(0x10, &[1]), Timeout::NoWait, callback).unwrap();
    can.send(&frame(0x11, &[2]), Timeout::NoWait, callback).unwrap();
    assert_eq!(can.free_tx_buffers(), 1);
    assert_eq!(can.pending_transmissions().unwrap().iter().collect::<Vec<_>>(), [0, 1]);

    can.stop().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        [Err(TxError::NetworkDown), Err(TxError::NetworkDown)]
    );
    assert_eq!(can.free_tx_buffers(), common::TX_BUFFERS);
    assert_eq!(sim.pending(), 0);

    assert!(matches!(can.stop(), Err(Error::AlreadyStopped)));
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn unacknowledged_wakeup_fails_bring_up() {
    let sim = Sim::default();
    sim.set_sleep_stuck();
    let result: Result<TestCan, _> = Can::new(&sim, Config::new(HertzU32::from_raw(500_000)));
    assert!(matches!(result, Err(Error::WouldBlock)));
    assert_ne!(sim.reg(reg::CCCR) & (1 << 4), 0, "sleep requested again");
}

#[test]
fn register_write_failure_aborts_bring_up_in_init() {
    let sim = Sim::default();
    sim.fail_reg_writes(Some(reg::GFC));
    let result: Result<TestCan, _> = Can::new(&sim, Config::new(HertzU32::from_raw(500_000)));
    assert!(matches!(result, Err(Error::Io(Injected))));
    assert_ne!(sim.reg(reg::CCCR) & INIT, 0, "left in init mode");
    assert!(sim.writes_to(reg::IE).is_empty(), "aborted at the failing write");

    sim.fail_reg_writes(None);
    let can: TestCan = Can::new(&sim, Config::new(HertzU32::from_raw(500_000))).unwrap();
    assert_eq!(sim.reg(reg::GFC), (2 << 4) | (2 << 2));
    can.start().unwrap();
}

#[test]
fn register_read_failure_is_returned_unchanged() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    can.start().unwrap();
    sim.fail_reg_reads(Some(reg::PSR));

    assert!(matches!(can.state(), Err(Error::Io(Injected))));
    let (log, callback) = tx_log();
    assert!(matches!(
        can.send(&frame(0x1, &[]), Timeout::NoWait, callback),
        Err(Error::Io(Injected))
    ));
    assert_eq!(can.free_tx_buffers(), common::TX_BUFFERS);
    assert!(log.lock().unwrap().is_empty());

    sim.fail_reg_reads(None);
    assert_eq!(can.state().unwrap().0, State::ErrorActive);
}

#[test]
fn stuck_init_fails_start_and_disables_transceiver() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    sim.set_init_stuck(true);

    assert!(matches!(can.start(), Err(Error::WouldBlock)));
    assert!(!can.is_started());
    assert!(!sim.transceiver_enabled());
}

#[test]
fn stuck_init_fails_stop_and_withdraws_request() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    can.start().unwrap();
    sim.set_init_stuck(true);

    assert!(matches!(can.stop(), Err(Error::WouldBlock)));
    assert!(can.is_started());
    let last = *sim.writes_to(reg::CCCR).last().unwrap();
    assert_eq!(last & INIT, 0);
    assert!(sim.transceiver_enabled());
}

#[test]
fn mode_selects_test_and_fd_bits() {
    let sim = Sim::default();
    let can = bring_up(&sim);

    assert!(matches!(can.set_mode(Mode::ONE_SHOT), Err(Error::Unsupported)));
    assert!(matches!(
        can.set_mode(Mode::FD | Mode::TRIPLE_SAMPLE),
        Err(Error::Unsupported)
    ));

    can.set_mode(Mode::LOOPBACK | Mode::FD).unwrap();
    let cccr = sim.reg(reg::CCCR);
    assert_ne!(cccr & (1 << 7), 0, "test mode");
    assert_ne!(cccr & (1 << 8), 0, "FD operation");
    assert_ne!(cccr & (1 << 9), 0, "bit rate switching");
    assert_eq!(cccr & (1 << 5), 0, "bus monitoring");
    assert_ne!(sim.reg(reg::TEST) & (1 << 4), 0, "loopback");

    can.set_mode(Mode::LISTEN_ONLY).unwrap();
    let cccr = sim.reg(reg::CCCR);
    assert_eq!(cccr & ((1 << 7) | (1 << 8) | (1 << 9)), 0);
    assert_ne!(cccr & (1 << 5), 0);
    assert_eq!(sim.reg(reg::TEST) & (1 << 4), 0);
}

#[test]
fn bus_off_is_reported_and_blocks_transmission() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    let (states, callback) = state_log();
    can.set_state_change_callback(Some(callback));
    can.start().unwrap();

    sim.set_bus_off();
    can.on_line_0_interrupt().unwrap();
    assert_eq!(sim.reg(reg::IR), 0);
    {
        let states = states.lock().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, State::BusOff);
        assert_eq!(states[0].1.tx, 255);
    }
    let (state, counters) = can.state().unwrap();
    assert_eq!(state, State::BusOff);
    assert_eq!(counters, can.error_counters().unwrap());

    let (log, tx_callback) = tx_log();
    assert!(matches!(
        can.send(&frame(0x1, &[]), Timeout::NoWait, tx_callback),
        Err(Error::NetworkUnreachable)
    ));
    assert_eq!(can.free_tx_buffers(), common::TX_BUFFERS);
    assert!(log.lock().unwrap().is_empty());

    #[cfg(not(feature = "auto-bus-off-recovery"))]
    {
        can.recover(Timeout::NoWait).unwrap();
        assert_eq!(sim.reg(reg::CCCR) & INIT, 0);
    }
    #[cfg(feature = "auto-bus-off-recovery")]
    assert_eq!(sim.reg(reg::CCCR) & INIT, 0);

    sim.clear_bus_off();
    assert_eq!(can.state().unwrap().0, State::ErrorActive);
}

#[cfg(not(feature = "auto-bus-off-recovery"))]
#[test]
fn recovery_requires_started_controller() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    assert!(matches!(
        can.recover(Timeout::NoWait),
        Err(Error::NetworkDown)
    ));
}

#[test]
fn state_change_callback_can_be_removed() {
    let sim = Sim::default();
    let can = bring_up(&sim);
    let (states, callback) = state_log();
    can.set_state_change_callback(Some(callback));
    can.set_state_change_callback(None);
    can.start().unwrap();

    sim.set_bus_off();
    can.on_line_0_interrupt().unwrap();
    assert!(states.lock().unwrap().is_empty());
}
