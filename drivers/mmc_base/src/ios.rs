// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Bus settings requested by the card stack.

/// OCR voltage window bits. [`MmcIos::vdd`] holds the bit *number*.
pub mod vdd {
    pub const MMC_VDD_165_195: u32 = 1 << 7;
    pub const MMC_VDD_20_21: u32 = 1 << 8;
    pub const MMC_VDD_23_24: u32 = 1 << 11;
    pub const MMC_VDD_29_30: u32 = 1 << 17;
    pub const MMC_VDD_30_31: u32 = 1 << 18;
    pub const MMC_VDD_32_33: u32 = 1 << 20;
    pub const MMC_VDD_33_34: u32 = 1 << 21;

    /// Whether OCR bit number `bit` lies in the 1.8 V range.
    pub const fn is_low_voltage(bit: u32) -> bool {
        bit < 32 && (1u32 << bit) <= MMC_VDD_23_24
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Off,
    Up,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    OpenDrain,
    PushPull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Legacy,
    MmcHs,
    SdHs,
    UhsDdr50,
    MmcDdr52,
}

impl Timing {
    pub const fn is_ddr(self) -> bool {
        matches!(self, Timing::UhsDdr50 | Timing::MmcDdr52)
    }
}

/// Clock, width, voltage and power settings for the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmcIos {
    /// Card clock in Hz, `0` stops the clock.
    pub clock: u32,
    /// Bit number of the selected OCR voltage window.
    pub vdd: u32,
    pub bus_width: BusWidth,
    pub bus_mode: BusMode,
    pub power_mode: PowerMode,
    pub timing: Timing,
}

impl Default for MmcIos {
    fn default() -> Self {
        Self {
            clock: 0,
            vdd: 0,
            bus_width: BusWidth::One,
            bus_mode: BusMode::OpenDrain,
            power_mode: PowerMode::Off,
            timing: Timing::Legacy,
        }
    }
}

impl MmcIos {
    /// Whether the selected voltage window is in the 1.8 V range.
    pub fn is_low_voltage(&self) -> bool {
        vdd::is_low_voltage(self.vdd)
    }
}
