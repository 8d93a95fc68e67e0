// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Static slot configuration and timing constants.

use alloc::{boxed::Box, sync::Arc};

use bitflags::bitflags;
use mmc_base::{HostCaps, Regulator};

/// Bounded wait for register state changes.
pub const MMC_TIMEOUT_MS: u32 = 20;
/// Functional clock feeding the card clock divider.
pub const MASTER_CLOCK_HZ: u32 = 96_000_000;
pub const F_MIN_HZ: u32 = 400_000;
pub const F_MAX_HZ: u32 = 52_000_000;
/// Largest card clock divider.
pub const MAX_CLKD: u32 = 250;

/// Delay before the first lazy disable.
pub const DISABLED_TIMEOUT_MS: u32 = 1;
/// Delay from DISABLED to a sleep state.
pub const SLEEP_TIMEOUT_MS: u32 = 1000;
/// Delay from a sleep state to OFF.
pub const OFF_TIMEOUT_MS: u32 = 8000;

/// Poll count and step of a command/data line reset.
pub const RESET_POLL_COUNT: u32 = 50;
pub const RESET_POLL_STEP_US: u32 = 100;

/// Busy-wait data timeout for commands with busy and no data.
pub const BUSY_TIMEOUT_NS: u32 = 100_000_000;

/// ADMA descriptor table capacity.
pub const DMA_TABLE_NUM_ENTRIES: usize = 1024;
/// Largest transfer one descriptor row may carry.
pub const ADMA_MAX_XFER_PER_ROW: u32 = 60 * 1024;
pub const ADMA_MAX_BLKS_PER_ROW: u32 = ADMA_MAX_XFER_PER_ROW / 512;

/// OCR bit number of the 1.8 V window on dual-voltage slots.
pub const DUAL_VOLT_OCR_BIT: u32 = 7;

bitflags! {
    /// Per-slot hardware and board quirks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFeatures: u32 {
        /// Reset bits must be seen set before they are polled for clear.
        const UPDATED_RESET = 1 << 0;
        /// The functional clock runs at 48 MHz instead of 96 MHz.
        const MASTER_CLK_48MHZ = 1 << 1;
        /// The slot can signal at 3.0 V as well as 1.8 V.
        const DUAL_VOLT = 1 << 2;
        const NONREMOVABLE = 1 << 3;
        /// Never cut card power from the power state machine.
        const NO_OFF = 1 << 4;
        /// Run the dynamic power state machine on enable/disable.
        const POWER_SAVING = 1 << 5;
        /// Disabling the aux supply only puts it to sleep. Implies `NO_OFF`.
        const VCC_AUX_DISABLE_IS_SLEEP = 1 << 6;
        /// Ignore system suspend/resume.
        const NO_SUSPEND = 1 << 7;
    }
}

/// A board-level sense line: card present, write protected, cover closed.
pub type SenseFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Everything the board tells the driver about one slot.
pub struct SlotConfig {
    pub name: &'static str,
    pub features: SlotFeatures,
    /// Voltage windows the slot supply can deliver.
    pub ocr_mask: u32,
    /// Extra capabilities (bus widths, DDR, ...).
    pub caps: HostCaps,
    /// Physical address of the register block, used as the DMA FIFO target.
    pub phys_base: u64,
    /// System DMA request lines.
    pub dma_line_tx: u32,
    pub dma_line_rx: u32,
    pub card_detect: Option<SenseFn>,
    pub get_ro: Option<SenseFn>,
    /// `true` when the slot cover is closed.
    pub cover_state: Option<SenseFn>,
    /// External presence source for slots without a card-detect line.
    pub status: Option<SenseFn>,
    pub regulator: Option<Arc<dyn Regulator>>,
}

impl SlotConfig {
    pub fn new(name: &'static str, phys_base: u64) -> Self {
        Self {
            name,
            features: SlotFeatures::empty(),
            ocr_mask: 0,
            caps: HostCaps::empty(),
            phys_base,
            dma_line_tx: 0,
            dma_line_rx: 0,
            card_detect: None,
            get_ro: None,
            cover_state: None,
            status: None,
            regulator: None,
        }
    }

    /// Whether card power may be cut from the power state machine.
    pub fn no_off(&self) -> bool {
        self.features
            .intersects(SlotFeatures::NO_OFF | SlotFeatures::VCC_AUX_DISABLE_IS_SLEEP)
    }

    pub(crate) fn cover_closed(&self) -> bool {
        self.cover_state.as_ref().is_none_or(|closed| closed())
    }

    pub(crate) fn master_clock(&self) -> u32 {
        if self.features.contains(SlotFeatures::MASTER_CLK_48MHZ) {
            MASTER_CLOCK_HZ / 2
        } else {
            MASTER_CLOCK_HZ
        }
    }
}

impl core::fmt::Debug for SlotConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlotConfig")
            .field("name", &self.name)
            .field("features", &self.features)
            .field("ocr_mask", &format_args!("{:#x}", self.ocr_mask))
            .field("caps", &self.caps)
            .field("phys_base", &format_args!("{:#x}", self.phys_base))
            .field("card_detect", &self.card_detect.is_some())
            .field("cover_state", &self.cover_state.is_some())
            .field("regulator", &self.regulator.is_some())
            .finish_non_exhaustive()
    }
}
