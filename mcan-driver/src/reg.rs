//! Register map of the M_CAN core
//!
//! Offsets are byte offsets into the register block. Registers whose fields
//! are interpreted by the driver get a [`bitfield`] type implementing
//! [`Register`]; plain bitmask registers (one bit per buffer or interrupt) are
//! accessed as raw words.
#![allow(missing_docs)]

use crate::error::Error;
use bitfield::bitfield;
use mcan_driver_core::Dependencies;

pub const CREL: u16 = 0x00;
pub const DBTP: u16 = 0x0C;
pub const TEST: u16 = 0x10;
pub const CCCR: u16 = 0x18;
pub const NBTP: u16 = 0x1C;
pub const TSCC: u16 = 0x20;
pub const TSCV: u16 = 0x24;
pub const ECR: u16 = 0x40;
pub const PSR: u16 = 0x44;
pub const TDCR: u16 = 0x48;
pub const IR: u16 = 0x50;
pub const IE: u16 = 0x54;
pub const ILS: u16 = 0x58;
pub const ILE: u16 = 0x5C;
pub const GFC: u16 = 0x80;
pub const SIDFC: u16 = 0x84;
pub const XIDFC: u16 = 0x88;
pub const XIDAM: u16 = 0x90;
pub const RXF0C: u16 = 0xA0;
pub const RXF0S: u16 = 0xA4;
pub const RXF0A: u16 = 0xA8;
pub const RXBC: u16 = 0xAC;
pub const RXF1C: u16 = 0xB0;
pub const RXF1S: u16 = 0xB4;
pub const RXF1A: u16 = 0xB8;
pub const RXESC: u16 = 0xBC;
pub const TXBC: u16 = 0xC0;
pub const TXFQS: u16 = 0xC4;
pub const TXESC: u16 = 0xC8;
pub const TXBRP: u16 = 0xCC;
pub const TXBAR: u16 = 0xD0;
pub const TXBCR: u16 = 0xD4;
pub const TXBTO: u16 = 0xD8;
pub const TXBCF: u16 = 0xDC;
pub const TXBTIE: u16 = 0xE0;
pub const TXEFC: u16 = 0xF0;
pub const TXEFS: u16 = 0xF4;
pub const TXEFA: u16 = 0xF8;

/// Data field size code selecting 64 byte elements
pub const DATA_FIELD_64: u8 = 7;

/// Register with a fixed location in the register block
pub trait Register: Copy + From<u32> + Into<u32> {
    /// Byte offset into the register block
    const OFFSET: u16;
}

macro_rules! register {
    ($(#[$meta:meta])* $name:ident @ $offset:expr; $($fields:tt)*) => {
        bitfield! {
            $(#[$meta])*
            #[derive(Copy, Clone, Default, PartialEq, Eq)]
            pub struct $name(u32);
            impl Debug;
            $($fields)*
        }

        impl From<u32> for $name {
            fn from(bits: u32) -> Self {
                Self(bits)
            }
        }

        impl From<$name> for u32 {
            fn from(reg: $name) -> u32 {
                reg.0
            }
        }

        impl Register for $name {
            const OFFSET: u16 = $offset;
        }
    };
}

register! {
    /// Core release
    Crel @ CREL;
    pub u8, rel, _: 31, 28;
    pub u8, step, _: 27, 24;
    pub u8, substep, _: 23, 20;
    pub u8, year, _: 19, 16;
    pub u8, mon, _: 15, 8;
    pub u8, day, _: 7, 0;
}

register! {
    /// Data bit timing and prescaler
    Dbtp @ DBTP;
    pub tdc, set_tdc: 23;
    pub u8, dbrp, set_dbrp: 20, 16;
    pub u8, dtseg1, set_dtseg1: 12, 8;
    pub u8, dtseg2, set_dtseg2: 7, 4;
    pub u8, dsjw, set_dsjw: 3, 0;
}

register! {
    /// Test
    Test @ TEST;
    pub lbck, set_lbck: 4;
}

register! {
    /// CC control
    Cccr @ CCCR;
    pub niso, set_niso: 15;
    pub txp, set_txp: 14;
    pub efbi, set_efbi: 13;
    pub pxhd, set_pxhd: 12;
    pub brse, set_brse: 9;
    pub fdoe, set_fdoe: 8;
    pub test, set_test: 7;
    pub dar, set_dar: 6;
    pub mon, set_mon: 5;
    pub csr, set_csr: 4;
    pub csa, set_csa: 3;
    pub asm, set_asm: 2;
    pub cce, set_cce: 1;
    pub init, set_init: 0;
}

register! {
    /// Nominal bit timing and prescaler
    Nbtp @ NBTP;
    pub u8, nsjw, set_nsjw: 31, 25;
    pub u16, nbrp, set_nbrp: 24, 16;
    pub u8, ntseg1, set_ntseg1: 15, 8;
    pub u8, ntseg2, set_ntseg2: 6, 0;
}

register! {
    /// Timestamp counter configuration
    Tscc @ TSCC;
    pub u8, tcp, set_tcp: 19, 16;
    pub u8, tss, set_tss: 1, 0;
}

register! {
    /// Timestamp counter value
    Tscv @ TSCV;
    pub u16, tsc, _: 15, 0;
}

register! {
    /// Error counters
    Ecr @ ECR;
    pub u8, cel, _: 23, 16;
    pub rp, _: 15;
    pub u8, rec, _: 14, 8;
    pub u8, tec, _: 7, 0;
}

register! {
    /// Protocol status
    Psr @ PSR;
    pub u8, tdcv, _: 22, 16;
    pub pxe, _: 14;
    pub rfdf, _: 13;
    pub rbrs, _: 12;
    pub resi, _: 11;
    pub u8, dlec, _: 10, 8;
    pub bo, _: 7;
    pub ew, _: 6;
    pub ep, _: 5;
    pub u8, act, _: 4, 3;
    pub u8, lec, _: 2, 0;
}

register! {
    /// Transmitter delay compensation
    Tdcr @ TDCR;
    pub u8, tdco, set_tdco: 14, 8;
    pub u8, tdcf, set_tdcf: 6, 0;
}

register! {
    /// Interrupt line enable
    Ile @ ILE;
    pub eint1, set_eint1: 1;
    pub eint0, set_eint0: 0;
}

register! {
    /// Global filter configuration
    Gfc @ GFC;
    pub u8, anfs, set_anfs: 5, 4;
    pub u8, anfe, set_anfe: 3, 2;
    pub rrfs, set_rrfs: 1;
    pub rrfe, set_rrfe: 0;
}

register! {
    /// Standard ID filter configuration
    Sidfc @ SIDFC;
    pub u8, lss, set_lss: 23, 16;
    pub u16, flssa, set_flssa: 15, 2;
}

register! {
    /// Extended ID filter configuration
    Xidfc @ XIDFC;
    pub u8, lse, set_lse: 22, 16;
    pub u16, flesa, set_flesa: 15, 2;
}

register! {
    /// RX buffer configuration
    Rxbc @ RXBC;
    pub u16, rbsa, set_rbsa: 15, 2;
}

register! {
    /// RX buffer and FIFO element size configuration
    Rxesc @ RXESC;
    pub u8, rbds, set_rbds: 10, 8;
    pub u8, f1ds, set_f1ds: 6, 4;
    pub u8, f0ds, set_f0ds: 2, 0;
}

register! {
    /// TX buffer configuration
    Txbc @ TXBC;
    pub tfqm, set_tfqm: 30;
    pub u8, tfqs, set_tfqs: 29, 24;
    pub u8, ndtb, set_ndtb: 21, 16;
    pub u16, tbsa, set_tbsa: 15, 2;
}

register! {
    /// TX FIFO/queue status
    Txfqs @ TXFQS;
    pub tfqf, _: 21;
    pub u8, tfqpi, _: 20, 16;
    pub u8, tfgi, _: 12, 8;
    pub u8, tffl, _: 5, 0;
}

register! {
    /// TX buffer element size configuration
    Txesc @ TXESC;
    pub u8, tbds, set_tbds: 2, 0;
}

register! {
    /// TX event FIFO configuration
    Txefc @ TXEFC;
    pub u8, efwm, set_efwm: 29, 24;
    pub u8, efs, set_efs: 21, 16;
    pub u16, efsa, set_efsa: 15, 2;
}

register! {
    /// TX event FIFO status
    Txefs @ TXEFS;
    pub tefl, _: 25;
    pub eff, _: 24;
    pub u8, efpi, _: 20, 16;
    pub u8, efgi, _: 12, 8;
    pub u8, effl, _: 5, 0;
}

bitfield! {
    /// RX FIFO configuration, shared layout of RXF0C and RXF1C
    #[derive(Copy, Clone, Default)]
    pub struct RxFifoConfig(u32);
    pub fom, set_fom: 31;
    pub u8, fwm, set_fwm: 30, 24;
    pub u8, fs, set_fs: 22, 16;
    pub u16, fsa, set_fsa: 15, 2;
}

bitfield! {
    /// RX FIFO status, shared layout of RXF0S and RXF1S
    #[derive(Copy, Clone, Default)]
    pub struct RxFifoStatus(u32);
    pub rfl, _: 25;
    pub ff, _: 24;
    pub u8, fpi, _: 21, 16;
    pub u8, fgi, _: 13, 8;
    pub u8, ffl, _: 6, 0;
}

impl From<u32> for RxFifoStatus {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl From<RxFifoConfig> for u32 {
    fn from(reg: RxFifoConfig) -> u32 {
        reg.0
    }
}

/// Typed and raw register access plus message RAM access on top of
/// [`Dependencies`], with back end failures wrapped in [`Error::Io`]
pub(crate) trait Access: Dependencies {
    fn load<R: Register>(&self) -> Result<R, Error<Self::Error>> {
        self.load_raw(R::OFFSET).map(R::from)
    }

    fn store<R: Register>(&self, value: R) -> Result<(), Error<Self::Error>> {
        self.store_raw(R::OFFSET, value.into())
    }

    /// Read-modify-write of a single register
    fn update<R: Register>(&self, f: impl FnOnce(&mut R)) -> Result<R, Error<Self::Error>> {
        let mut value = self.load::<R>()?;
        f(&mut value);
        self.store(value)?;
        Ok(value)
    }

    fn load_raw(&self, offset: u16) -> Result<u32, Error<Self::Error>> {
        self.read_reg(offset).map_err(Error::Io)
    }

    fn store_raw(&self, offset: u16, value: u32) -> Result<(), Error<Self::Error>> {
        self.write_reg(offset, value).map_err(Error::Io)?;
        trace!("reg {:#x} <- {:#x}", offset, value);
        Ok(())
    }

    fn load_ram(&self, offset: u16, dst: &mut [u8]) -> Result<(), Error<Self::Error>> {
        self.read_mram(offset, dst).map_err(Error::Io)
    }

    fn store_ram(&self, offset: u16, src: &[u8]) -> Result<(), Error<Self::Error>> {
        self.write_mram(offset, src).map_err(Error::Io)?;
        trace!("mram {:#x} <- {} bytes", offset, src.len());
        Ok(())
    }

    fn zero_ram(&self, offset: u16, len: usize) -> Result<(), Error<Self::Error>> {
        self.clear_mram(offset, len).map_err(Error::Io)
    }
}

impl<D: Dependencies + ?Sized> Access for D {}
