//! Simulated M_CAN controller for integration tests
//!
//! Registers live in a plain array and the message RAM in a byte vector. The
//! parts of the controller the driver relies on are modelled on top of that:
//! the INIT, CCE and CSR handshakes, write-one-to-clear IR, the TX queue put
//! index, the TX event FIFO and both RX FIFOs. Register and message RAM
//! accesses can be made to fail.
#![allow(dead_code)]

use mcan_driver::bus::{Can, RxCallback, StateChangeCallback, TxCallback};
use mcan_driver::bus::{ErrorCounters, State};
use mcan_driver::config::Config;
use mcan_driver::error::TxError;
use mcan_driver::message::Frame;
use mcan_driver::core::fugit::HertzU32;
use mcan_driver::core::{Dependencies, Instant};
use mcan_driver::embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use mcan_driver::generic_array::typenum::consts::*;
use mcan_driver::reg;
use std::sync::{Mutex, PoisonError};

pub type TestCan<'a> = Can<&'a Sim, CriticalSectionRawMutex, ThreadMutex, Caps>;

/// Thread level lock that leaves the critical section alone
pub struct ThreadMutex(Mutex<()>);

unsafe impl RawMutex for ThreadMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = ThreadMutex(Mutex::new(()));

    fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

pub struct Caps;

impl mcan_driver::messageram::Capacities for Caps {
    type StandardFilters = U3;
    type ExtendedFilters = U2;
    type RxFifo0 = U3;
    type RxFifo1 = U3;
    type TxEventFifo = U4;
    type TxBuffers = U3;
}

pub const TX_BUFFERS: usize = 3;

const INIT: u32 = 1 << 0;
const CCE: u32 = 1 << 1;
const CSA: u32 = 1 << 3;
const CSR: u32 = 1 << 4;

const IR_RF0N: u32 = 1 << 0;
const IR_RF1N: u32 = 1 << 4;
const IR_TEFN: u32 = 1 << 12;
const IR_EW: u32 = 1 << 24;
const IR_BO: u32 = 1 << 25;

const PSR_EW: u32 = 1 << 6;
const PSR_BO: u32 = 1 << 7;

const ELEMENT_SIZE: usize = 72;

/// Back end failure injected by a test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Injected;

/// Ring of elements in message RAM, located through its configuration
/// register
#[derive(Default)]
struct Ring {
    get: usize,
    fill: usize,
}

struct Inner {
    regs: [u32; 64],
    mram: Vec<u8>,
    writes: Vec<(u16, u32)>,
    init_stuck: bool,
    sleep_stuck: bool,
    fail_mram_writes: bool,
    fail_reg_reads: Option<u16>,
    fail_reg_writes: Option<u16>,
    queue_full: bool,
    transceiver: bool,
    tx_events: Ring,
    rx_fifos: [Ring; 2],
}

pub struct Sim {
    inner: Mutex<Inner>,
    epoch: std::time::Instant,
}

impl Default for Sim {
    fn default() -> Self {
        let mut regs = [0; 64];
        regs[usize::from(reg::CREL) / 4] = 0x3214_0101;
        regs[usize::from(reg::CCCR) / 4] = INIT;
        Self {
            inner: Mutex::new(Inner {
                regs,
                mram: vec![0; 1024],
                writes: Vec::new(),
                init_stuck: false,
                sleep_stuck: false,
                fail_mram_writes: false,
                fail_reg_reads: None,
                fail_reg_writes: None,
                queue_full: false,
                transceiver: false,
                tx_events: Ring::default(),
                rx_fifos: [Ring::default(), Ring::default()],
            }),
            epoch: std::time::Instant::now(),
        }
    }
}

impl Inner {
    fn reg(&self, offset: u16) -> u32 {
        self.regs[usize::from(offset) / 4]
    }

    fn set_reg(&mut self, offset: u16, value: u32) {
        self.regs[usize::from(offset) / 4] = value;
    }

    fn start_of(&self, config: u16) -> usize {
        (self.reg(config) & 0xFFFC) as usize
    }

    fn size_of(&self, config: u16) -> usize {
        ((self.reg(config) >> 16) & 0x3F) as usize
    }

    fn write_cccr(&mut self, value: u32) {
        let old = self.reg(reg::CCCR);
        let mut new = value;
        if self.init_stuck {
            new = (new & !INIT) | (old & INIT);
        }
        if self.sleep_stuck {
            new |= CSA;
        } else if new & CSR != 0 {
            new |= CSA;
        } else {
            new &= !CSA;
        }
        if new & INIT == 0 {
            new &= !CCE;
        }
        if new & CCE != 0 && old & CCE == 0 {
            self.set_reg(reg::TXBRP, 0);
            self.tx_events = Ring::default();
        }
        self.set_reg(reg::CCCR, new);
    }

    fn tx_queue_status(&self) -> u32 {
        if self.queue_full {
            return 1 << 21;
        }
        let pending = self.reg(reg::TXBRP);
        let count = ((self.reg(reg::TXBC) >> 24) & 0x3F) as usize;
        match (0..count).find(|i| pending & (1 << i) == 0) {
            Some(put) => (put as u32) << 16,
            None => 1 << 21,
        }
    }

    fn fifo_status(&self, fifo: usize, config: u16) -> u32 {
        let ring = &self.rx_fifos[fifo];
        let size = self.size_of(config);
        let full = if ring.fill == size { 1 << 24 } else { 0 };
        full | ((ring.get as u32) << 8) | ring.fill as u32
    }

    fn acknowledge_fifo(&mut self, fifo: usize, config: u16, index: u32) {
        let size = self.size_of(config);
        let ring = &mut self.rx_fifos[fifo];
        assert!(ring.fill > 0, "acknowledged empty RX FIFO {fifo}");
        assert_eq!(index as usize, ring.get, "acknowledged wrong RX element");
        ring.get = (ring.get + 1) % size;
        ring.fill -= 1;
    }

    fn read(&self, offset: u16) -> u32 {
        match offset {
            reg::TXFQS => self.tx_queue_status(),
            reg::TXEFS => {
                ((self.tx_events.get as u32) << 8) | self.tx_events.fill as u32
            }
            reg::RXF0S => self.fifo_status(0, reg::RXF0C),
            reg::RXF1S => self.fifo_status(1, reg::RXF1C),
            reg::TXBAR => 0,
            _ => self.reg(offset),
        }
    }

    fn write(&mut self, offset: u16, value: u32) {
        self.writes.push((offset, value));
        match offset {
            reg::CCCR => self.write_cccr(value),
            reg::IR => {
                let ir = self.reg(reg::IR);
                self.set_reg(reg::IR, ir & !value);
            }
            reg::TXBAR => {
                let pending = self.reg(reg::TXBRP);
                self.set_reg(reg::TXBRP, pending | value);
            }
            reg::TXEFA => {
                let size = self.size_of(reg::TXEFC);
                let ring = &mut self.tx_events;
                assert!(ring.fill > 0, "acknowledged empty TX event FIFO");
                assert_eq!(value as usize, ring.get, "acknowledged wrong TX event");
                ring.get = (ring.get + 1) % size;
                ring.fill -= 1;
            }
            reg::RXF0A => self.acknowledge_fifo(0, reg::RXF0C, value),
            reg::RXF1A => self.acknowledge_fifo(1, reg::RXF1C, value),
            reg::CREL | reg::PSR | reg::ECR | reg::TXFQS | reg::TXBRP | reg::TXEFS => {}
            reg::RXF0S | reg::RXF1S => {}
            _ => self.set_reg(offset, value),
        }
    }

    fn word(&self, at: usize) -> u32 {
        u32::from_le_bytes([
            self.mram[at],
            self.mram[at + 1],
            self.mram[at + 2],
            self.mram[at + 3],
        ])
    }

    fn put_word(&mut self, at: usize, value: u32) {
        self.mram[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Sim {
    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }

    /// Register content as the driver would read it
    pub fn reg(&self, offset: u16) -> u32 {
        self.with(|inner| inner.read(offset))
    }

    /// Every value the driver wrote to the register at `offset`, oldest first
    pub fn writes_to(&self, offset: u16) -> Vec<u32> {
        self.with(|inner| {
            inner
                .writes
                .iter()
                .filter(|(o, _)| *o == offset)
                .map(|(_, v)| *v)
                .collect()
        })
    }

    /// Raw message RAM content
    pub fn mram(&self, offset: usize, len: usize) -> Vec<u8> {
        self.with(|inner| inner.mram[offset..offset + len].to_vec())
    }

    /// Controller ignores requests to change INIT
    pub fn set_init_stuck(&self, stuck: bool) {
        self.with(|inner| inner.init_stuck = stuck);
    }

    /// Controller sleeps and never acknowledges a wakeup
    pub fn set_sleep_stuck(&self) {
        self.with(|inner| {
            inner.sleep_stuck = true;
            let cccr = inner.reg(reg::CCCR);
            inner.set_reg(reg::CCCR, cccr | CSR | CSA);
        });
    }

    /// Every message RAM write fails from now on
    pub fn fail_mram_writes(&self, fail: bool) {
        self.with(|inner| inner.fail_mram_writes = fail);
    }

    /// Reads of the register at `offset` fail from now on
    pub fn fail_reg_reads(&self, offset: Option<u16>) {
        self.with(|inner| inner.fail_reg_reads = offset);
    }

    /// Writes to the register at `offset` fail from now on
    pub fn fail_reg_writes(&self, offset: Option<u16>) {
        self.with(|inner| inner.fail_reg_writes = offset);
    }

    /// TXFQS reports a full queue regardless of the pending requests
    pub fn force_queue_full(&self, full: bool) {
        self.with(|inner| inner.queue_full = full);
    }

    pub fn transceiver_enabled(&self) -> bool {
        self.with(|inner| inner.transceiver)
    }

    /// Transmission request bits still set
    pub fn pending(&self) -> u32 {
        self.reg(reg::TXBRP)
    }

    /// Header words of TX buffer `index`
    pub fn tx_header(&self, index: usize) -> (u32, u32) {
        self.with(|inner| {
            let at = inner.start_of(reg::TXBC) + index * ELEMENT_SIZE;
            (inner.word(at), inner.word(at + 4))
        })
    }

    /// Payload bytes of TX buffer `index`
    pub fn tx_data(&self, index: usize, len: usize) -> Vec<u8> {
        self.with(|inner| {
            let at = inner.start_of(reg::TXBC) + index * ELEMENT_SIZE + 8;
            inner.mram[at..at + len].to_vec()
        })
    }

    /// Finishes the transmission of TX buffer `index`: the request bit is
    /// cleared and a TX event carrying the buffer's marker is queued
    pub fn complete_tx(&self, index: usize) {
        self.with(|inner| {
            let pending = inner.reg(reg::TXBRP);
            assert!(pending & (1 << index) != 0, "TX buffer {index} not pending");
            inner.set_reg(reg::TXBRP, pending & !(1 << index));

            let at = inner.start_of(reg::TXBC) + index * ELEMENT_SIZE;
            let (id, word1) = (inner.word(at), inner.word(at + 4));
            let event = (word1 & 0xFF3F_0000) | (1 << 22);

            let size = inner.size_of(reg::TXEFC);
            let put = (inner.tx_events.get + inner.tx_events.fill) % size;
            assert!(inner.tx_events.fill < size, "TX event FIFO overflow");
            let element = inner.start_of(reg::TXEFC) + put * 8;
            inner.put_word(element, id);
            inner.put_word(element + 4, event);
            inner.tx_events.fill += 1;

            let ir = inner.reg(reg::IR);
            inner.set_reg(reg::IR, ir | IR_TEFN);
        });
    }

    /// Stores a received frame in RX FIFO `fifo`
    ///
    /// `word0` and `word1` are the two header words of the RX element.
    pub fn deliver_rx(&self, fifo: usize, word0: u32, word1: u32, data: &[u8]) {
        self.with(|inner| {
            let (config, flag) = match fifo {
                0 => (reg::RXF0C, IR_RF0N),
                _ => (reg::RXF1C, IR_RF1N),
            };
            let size = inner.size_of(config);
            let ring = &inner.rx_fifos[fifo];
            assert!(ring.fill < size, "RX FIFO {fifo} overflow");
            let put = (ring.get + ring.fill) % size;
            let at = inner.start_of(config) + put * ELEMENT_SIZE;
            inner.put_word(at, word0);
            inner.put_word(at + 4, word1);
            inner.mram[at + 8..at + 8 + data.len()].copy_from_slice(data);
            inner.rx_fifos[fifo].fill += 1;

            let ir = inner.reg(reg::IR);
            inner.set_reg(reg::IR, ir | flag);
        });
    }

    /// Number of elements waiting in RX FIFO `fifo`
    pub fn rx_fill(&self, fifo: usize) -> usize {
        self.with(|inner| inner.rx_fifos[fifo].fill)
    }

    /// Transmit error counter overflowed; the controller leaves the bus
    pub fn set_bus_off(&self) {
        self.with(|inner| {
            let psr = inner.reg(reg::PSR);
            inner.set_reg(reg::PSR, psr | PSR_BO | PSR_EW);
            inner.set_reg(reg::ECR, 255);
            let cccr = inner.reg(reg::CCCR);
            inner.set_reg(reg::CCCR, cccr | INIT);
            let ir = inner.reg(reg::IR);
            inner.set_reg(reg::IR, ir | IR_BO | IR_EW);
        });
    }

    /// Bus-off recovery sequence completed
    pub fn clear_bus_off(&self) {
        self.with(|inner| {
            let psr = inner.reg(reg::PSR);
            inner.set_reg(reg::PSR, psr & !(PSR_BO | PSR_EW));
            inner.set_reg(reg::ECR, 0);
        });
    }
}

impl Dependencies for Sim {
    type Error = Injected;

    fn read_reg(&self, offset: u16) -> Result<u32, Injected> {
        self.with(|inner| match inner.fail_reg_reads {
            Some(failing) if failing == offset => Err(Injected),
            _ => Ok(inner.read(offset)),
        })
    }

    fn write_reg(&self, offset: u16, value: u32) -> Result<(), Injected> {
        self.with(|inner| match inner.fail_reg_writes {
            Some(failing) if failing == offset => Err(Injected),
            _ => {
                inner.write(offset, value);
                Ok(())
            }
        })
    }

    fn read_mram(&self, offset: u16, dst: &mut [u8]) -> Result<(), Injected> {
        let start = usize::from(offset);
        self.with(|inner| dst.copy_from_slice(&inner.mram[start..start + dst.len()]));
        Ok(())
    }

    fn write_mram(&self, offset: u16, src: &[u8]) -> Result<(), Injected> {
        let start = usize::from(offset);
        self.with(|inner| {
            if inner.fail_mram_writes {
                return Err(Injected);
            }
            inner.mram[start..start + src.len()].copy_from_slice(src);
            Ok(())
        })
    }

    fn clear_mram(&self, offset: u16, len: usize) -> Result<(), Injected> {
        let start = usize::from(offset);
        self.with(|inner| inner.mram[start..start + len].fill(0));
        Ok(())
    }

    fn enable_transceiver(&self) -> Result<(), Injected> {
        self.with(|inner| inner.transceiver = true);
        Ok(())
    }

    fn disable_transceiver(&self) -> Result<(), Injected> {
        self.with(|inner| inner.transceiver = false);
        Ok(())
    }

    fn can_clock(&self) -> Option<HertzU32> {
        Some(HertzU32::from_raw(80_000_000))
    }

    fn uptime(&self) -> Instant {
        Instant::from_ticks(self.epoch.elapsed().as_micros() as u64)
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

/// Standard identifier header word
pub fn standard_id(id: u16) -> u32 {
    u32::from(id) << 18
}

/// Second RX header word for a frame stored by filter `filter`
pub fn rx_word(filter: u8, dlc: u8) -> u32 {
    (u32::from(filter) << 24) | (u32::from(dlc) << 16)
}

/// Controller brought up at 500 kbit/s
pub fn bring_up(sim: &Sim) -> TestCan<'_> {
    Can::new(sim, Config::new(HertzU32::from_raw(500_000))).unwrap()
}

/// Transmit callback recording every completion
pub fn tx_log() -> (&'static Mutex<Vec<Result<(), TxError>>>, TxCallback) {
    let log: &'static Mutex<Vec<Result<(), TxError>>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    let callback: TxCallback = Box::leak(Box::new(move |result| log.lock().unwrap().push(result)));
    (log, callback)
}

/// Receive callback recording every frame
pub fn rx_log() -> (&'static Mutex<Vec<Frame>>, RxCallback) {
    let log: &'static Mutex<Vec<Frame>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    let callback: RxCallback =
        Box::leak(Box::new(move |frame: &Frame| log.lock().unwrap().push(*frame)));
    (log, callback)
}

/// State change callback recording every notification
pub fn state_log() -> (&'static Mutex<Vec<(State, ErrorCounters)>>, StateChangeCallback) {
    let log: &'static Mutex<Vec<(State, ErrorCounters)>> =
        Box::leak(Box::new(Mutex::new(Vec::new())));
    let callback: StateChangeCallback = Box::leak(Box::new(
        move |state: State, counters: ErrorCounters| log.lock().unwrap().push((state, counters)),
    ));
    (log, callback)
}
