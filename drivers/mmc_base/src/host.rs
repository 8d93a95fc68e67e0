// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Host capabilities and the collaborators a host driver talks to.

use bitflags::bitflags;

use crate::{MmcRequest, MmcResult};

bitflags! {
    /// What the host controller and slot can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostCaps: u32 {
        const FOUR_BIT_DATA   = 1 << 0;
        const MMC_HIGHSPEED   = 1 << 1;
        const SD_HIGHSPEED    = 1 << 2;
        const EIGHT_BIT_DATA  = 1 << 6;
        const NONREMOVABLE    = 1 << 8;
        const WAIT_WHILE_BUSY = 1 << 9;
        const ERASE           = 1 << 10;
        const DISABLE         = 1 << 18;
        const CMD23           = 1 << 30;
    }
}

/// Transfer limits advertised to the card stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    pub f_min: u32,
    pub f_max: u32,
    pub ocr_avail: u32,
    pub max_segs: u32,
    pub max_blk_size: u32,
    pub max_blk_count: u32,
    pub max_req_size: u32,
    pub max_seg_size: u32,
    /// Idle time before the card stack first calls
    /// [`MmcHostOps::disable`](crate::MmcHostOps::disable).
    pub disable_delay_ms: u32,
}

/// The card stack, as seen from a host driver.
///
/// Claim/release serialize requests and power transitions on one host.
pub trait MmcCore: Send + Sync {
    /// Called exactly once for every request handed to the host.
    fn request_done(&self, req: MmcRequest);

    /// Card presence may have changed; rescan after `delay_ms`.
    fn detect_change(&self, delay_ms: u32);

    fn claim_host(&self);

    /// Non-blocking claim, `false` if the host is busy.
    fn try_claim_host(&self) -> bool;

    fn release_host(&self);

    /// Whether the attached card supports a sleep command.
    fn card_can_sleep(&self) -> bool;

    fn card_sleep(&self) -> MmcResult;

    fn card_awake(&self) -> MmcResult;

    /// Re-initializes the card after its power was cut.
    fn power_restore(&self) -> MmcResult;

    fn suspend_host(&self) -> MmcResult;

    fn resume_host(&self) -> MmcResult;
}

/// Supply control for a slot.
pub trait Regulator: Send + Sync {
    /// Switches card power, `vdd` is an OCR bit number.
    fn set_power(&self, power_on: bool, vdd: u32) -> MmcResult;

    /// Moves the supply into or out of its low-power mode.
    fn set_sleep(&self, sleep: bool, vdd: u32, card_sleep: bool) -> MmcResult;
}
