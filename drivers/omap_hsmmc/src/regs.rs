// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Register map and bit definitions.

use alloc::sync::Arc;
use core::{fmt, ptr::NonNull};

use bitflags::bitflags;
use tock_registers::{
    interfaces::{Readable, Writeable},
    register_structs,
    registers::{ReadOnly, ReadWrite},
};

register_structs! {
    /// HSMMC register block.
    pub HsmmcRegisters {
        (0x000 => _reserved0),
        (0x010 => sysconfig: ReadWrite<u32>),
        (0x014 => sysstatus: ReadOnly<u32>),
        (0x018 => _reserved1),
        (0x02c => con: ReadWrite<u32>),
        (0x030 => _reserved2),
        (0x104 => blk: ReadWrite<u32>),
        (0x108 => arg: ReadWrite<u32>),
        (0x10c => cmd: ReadWrite<u32>),
        (0x110 => rsp10: ReadOnly<u32>),
        (0x114 => rsp32: ReadOnly<u32>),
        (0x118 => rsp54: ReadOnly<u32>),
        (0x11c => rsp76: ReadOnly<u32>),
        (0x120 => data: ReadWrite<u32>),
        (0x124 => pstate: ReadOnly<u32>),
        (0x128 => hctl: ReadWrite<u32>),
        (0x12c => sysctl: ReadWrite<u32>),
        (0x130 => stat: ReadWrite<u32>),
        (0x134 => ie: ReadWrite<u32>),
        (0x138 => ise: ReadWrite<u32>),
        (0x13c => _reserved3),
        (0x140 => capa: ReadWrite<u32>),
        (0x144 => _reserved4),
        (0x154 => adma_es: ReadOnly<u32>),
        (0x158 => adma_sal: ReadWrite<u32>),
        (0x15c => @END),
    }
}

/// Registers the driver touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Sysconfig,
    Sysstatus,
    Con,
    Blk,
    Arg,
    Cmd,
    Rsp10,
    Rsp32,
    Rsp54,
    Rsp76,
    Data,
    Pstate,
    Hctl,
    Sysctl,
    Stat,
    Ie,
    Ise,
    Capa,
    AdmaEs,
    AdmaSal,
}

impl Reg {
    /// Byte offset from the start of the register block.
    pub const fn offset(self) -> usize {
        match self {
            Reg::Sysconfig => 0x010,
            Reg::Sysstatus => 0x014,
            Reg::Con => 0x02c,
            Reg::Blk => 0x104,
            Reg::Arg => 0x108,
            Reg::Cmd => 0x10c,
            Reg::Rsp10 => 0x110,
            Reg::Rsp32 => 0x114,
            Reg::Rsp54 => 0x118,
            Reg::Rsp76 => 0x11c,
            Reg::Data => 0x120,
            Reg::Pstate => 0x124,
            Reg::Hctl => 0x128,
            Reg::Sysctl => 0x12c,
            Reg::Stat => 0x130,
            Reg::Ie => 0x134,
            Reg::Ise => 0x138,
            Reg::Capa => 0x140,
            Reg::AdmaEs => 0x154,
            Reg::AdmaSal => 0x158,
        }
    }
}

/// 32-bit access to the controller registers.
pub trait HsmmcIo: Send + Sync {
    fn read(&self, reg: Reg) -> u32;

    fn write(&self, reg: Reg, val: u32);

    fn set_bits(&self, reg: Reg, bits: u32) {
        self.write(reg, self.read(reg) | bits);
    }

    fn clear_bits(&self, reg: Reg, bits: u32) {
        self.write(reg, self.read(reg) & !bits);
    }
}

impl<T: HsmmcIo + ?Sized> HsmmcIo for Arc<T> {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Reg, val: u32) {
        (**self).write(reg, val)
    }
}

/// Memory-mapped register access.
pub struct MmioRegs {
    base: NonNull<HsmmcRegisters>,
}

unsafe impl Send for MmioRegs {}
unsafe impl Sync for MmioRegs {}

impl MmioRegs {
    /// Creates a new [`MmioRegs`] from the given base address.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `base` is a valid pointer to the HSMMC
    /// register block, mapped as device memory, and that no other code
    /// accesses the same hardware concurrently.
    pub const unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base: base.cast() }
    }

    fn regs(&self) -> &HsmmcRegisters {
        unsafe { self.base.as_ref() }
    }
}

impl HsmmcIo for MmioRegs {
    fn read(&self, reg: Reg) -> u32 {
        let r = self.regs();
        match reg {
            Reg::Sysconfig => r.sysconfig.get(),
            Reg::Sysstatus => r.sysstatus.get(),
            Reg::Con => r.con.get(),
            Reg::Blk => r.blk.get(),
            Reg::Arg => r.arg.get(),
            Reg::Cmd => r.cmd.get(),
            Reg::Rsp10 => r.rsp10.get(),
            Reg::Rsp32 => r.rsp32.get(),
            Reg::Rsp54 => r.rsp54.get(),
            Reg::Rsp76 => r.rsp76.get(),
            Reg::Data => r.data.get(),
            Reg::Pstate => r.pstate.get(),
            Reg::Hctl => r.hctl.get(),
            Reg::Sysctl => r.sysctl.get(),
            Reg::Stat => r.stat.get(),
            Reg::Ie => r.ie.get(),
            Reg::Ise => r.ise.get(),
            Reg::Capa => r.capa.get(),
            Reg::AdmaEs => r.adma_es.get(),
            Reg::AdmaSal => r.adma_sal.get(),
        }
    }

    fn write(&self, reg: Reg, val: u32) {
        let r = self.regs();
        match reg {
            Reg::Sysconfig => r.sysconfig.set(val),
            Reg::Con => r.con.set(val),
            Reg::Blk => r.blk.set(val),
            Reg::Arg => r.arg.set(val),
            Reg::Cmd => r.cmd.set(val),
            Reg::Data => r.data.set(val),
            Reg::Hctl => r.hctl.set(val),
            Reg::Sysctl => r.sysctl.set(val),
            Reg::Stat => r.stat.set(val),
            Reg::Ie => r.ie.set(val),
            Reg::Ise => r.ise.set(val),
            Reg::Capa => r.capa.set(val),
            Reg::AdmaSal => r.adma_sal.set(val),
            Reg::Sysstatus
            | Reg::Rsp10
            | Reg::Rsp32
            | Reg::Rsp54
            | Reg::Rsp76
            | Reg::Pstate
            | Reg::AdmaEs => log::warn!("hsmmc: write to read-only register {reg:?} ignored"),
        }
    }
}

/// Bit definitions for everything except the status register.
pub mod bits {
    // SYSCONFIG / SYSSTATUS
    pub const AUTOIDLE: u32 = 1 << 0;
    pub const SOFTRESET: u32 = 1 << 1;
    pub const RESETDONE: u32 = 1 << 0;

    // CON
    pub const OD: u32 = 1 << 0;
    pub const INIT_STREAM: u32 = 1 << 1;
    pub const DW8: u32 = 1 << 5;
    pub const DDR: u32 = 1 << 19;
    pub const DMA_MNS_ADMA_MODE: u32 = 1 << 20;

    // CMD
    pub const DMA_EN: u32 = 1 << 0;
    pub const BCE: u32 = 1 << 1;
    pub const ACEN_ACMD12: u32 = 1 << 2;
    pub const DDIR: u32 = 1 << 4;
    pub const MSBS: u32 = 1 << 5;
    pub const DP_SELECT: u32 = 1 << 21;
    pub const INIT_STREAM_CMD: u32 = 0;

    // HCTL
    pub const FOUR_BIT: u32 = 1 << 1;
    pub const DMAS: u32 = 0x2 << 3;
    pub const SDBP: u32 = 1 << 8;
    pub const SDVS18: u32 = 0x5 << 9;
    pub const SDVS30: u32 = 0x6 << 9;
    pub const SDVS33: u32 = 0x7 << 9;
    pub const SDVS_MASK: u32 = 0x0000_0e00;
    pub const SDVSCLR: u32 = 0xffff_f1ff;
    pub const SDVSDET: u32 = 0x0000_0400;

    // SYSCTL
    pub const ICE: u32 = 1 << 0;
    pub const ICS: u32 = 1 << 1;
    pub const CEN: u32 = 1 << 2;
    pub const CLKD_MASK: u32 = 0x0000_ffc0;
    pub const CLKD_SHIFT: u32 = 6;
    pub const DTO_MASK: u32 = 0x000f_0000;
    pub const DTO_SHIFT: u32 = 16;
    /// Data timeout counter value programmed with every clock change.
    pub const DTO: u32 = 0xe;
    pub const SRC: u32 = 1 << 25;
    pub const SRD: u32 = 1 << 26;

    // CAPA
    pub const CAPA_ADMA_SUPPORT: u32 = 1 << 19;
    pub const VS30: u32 = 1 << 25;
    pub const VS18: u32 = 1 << 26;

    // IE / ISE
    pub const INT_EN_MASK: u32 = 0x307f_0033;
    pub const BWR_ENABLE: u32 = 1 << 4;
    pub const BRR_ENABLE: u32 = 1 << 5;
    pub const DTO_ENABLE: u32 = 1 << 20;

    pub const STAT_CLEAR: u32 = 0xffff_ffff;
}

bitflags! {
    /// Interrupt status (STAT), write 1 to clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        const CC   = 1 << 0;
        const TC   = 1 << 1;
        const BGE  = 1 << 2;
        /// ADMA descriptor interrupt.
        const DMA  = 1 << 3;
        const BWR  = 1 << 4;
        const BRR  = 1 << 5;
        const CINS = 1 << 6;
        const CREM = 1 << 7;
        const CIRQ = 1 << 8;
        const OBI  = 1 << 9;
        const BSR  = 1 << 10;
        /// Summary bit for any error.
        const ERRI = 1 << 15;
        const CTO  = 1 << 16;
        const CCRC = 1 << 17;
        const CEB  = 1 << 18;
        const CIE  = 1 << 19;
        const DTO  = 1 << 20;
        const DCRC = 1 << 21;
        /// Data end-bit error, seen when a card is pulled mid-read.
        const DEB  = 1 << 22;
        const CLE  = 1 << 23;
        const ACE  = 1 << 24;
        const ADMA = 1 << 25;
        const CERR = 1 << 28;
        const BADA = 1 << 29;
    }
}

const STATUS_NAMES: [&str; 32] = [
    "CC", "TC", "BGE", "DMA", "BWR", "BRR", "CINS", "CREM", "CIRQ", "OBI", "BSR", "---", "---",
    "---", "---", "ERRI", "CTO", "CCRC", "CEB", "CIE", "DTO", "DCRC", "DEB", "CLE", "ACE",
    "ADMA", "---", "---", "CERR", "BADA", "---", "---",
];

impl Status {
    /// Lists the name of every set bit, e.g. `"MMC IRQ 0x18001 : CC ERRI CTO"`.
    pub fn decode(raw: u32) -> impl fmt::Display {
        StatusReport(raw)
    }
}

struct StatusReport(u32);

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MMC IRQ {:#x} :", self.0)?;
        for (i, name) in STATUS_NAMES.iter().enumerate() {
            if self.0 & (1 << i) != 0 {
                write!(f, " {name}")?;
            }
        }
        Ok(())
    }
}
