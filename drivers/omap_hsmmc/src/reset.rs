// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Command and data line state machine resets.

use log::error;

use crate::{
    config::{RESET_POLL_COUNT, RESET_POLL_STEP_US, SlotFeatures},
    host::HsmmcHost,
    regs::{HsmmcIo, Reg, bits},
};

/// Controller state machine that can be reset on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Command line (SYSCTL.SRC).
    Command,
    /// Data line (SYSCTL.SRD).
    Data,
}

impl ResetKind {
    pub const fn bit(self) -> u32 {
        match self {
            ResetKind::Command => bits::SRC,
            ResetKind::Data => bits::SRD,
        }
    }
}

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Resets one controller state machine and waits for it to finish.
    ///
    /// The wait uses a fixed number of short delays so it can run from the
    /// interrupt handler. A timeout is only logged.
    pub fn reset_fsm(&self, kind: ResetKind) {
        let bit = kind.bit();
        self.regs.set_bits(Reg::Sysctl, bit);

        // Newer controllers need the bit to be seen set first.
        if self.config.features.contains(SlotFeatures::UPDATED_RESET) {
            self.wait_sysctl(bit, true);
        }
        self.wait_sysctl(bit, false);

        if self.regs.read(Reg::Sysctl) & bit != 0 {
            error!(
                "{}: timeout waiting on controller {kind:?} reset",
                self.name()
            );
        }
    }

    fn wait_sysctl(&self, bit: u32, set: bool) {
        let mut i = 0;
        while ((self.regs.read(Reg::Sysctl) & bit != 0) != set) && i < RESET_POLL_COUNT {
            self.platform.udelay(RESET_POLL_STEP_US);
            i += 1;
        }
    }
}
