// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! System suspend and resume.

use log::debug;
use mmc_base::MmcResult;

use crate::{
    config::SlotFeatures,
    host::HsmmcHost,
    regs::{HsmmcIo, Reg, bits},
};

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Suspends the card stack, then masks the controller and drops SD bus
    /// power.
    ///
    /// Suspending twice is a no-op. If the card stack refuses, the host stays
    /// resumed and the error is returned.
    pub fn suspend(&self) -> MmcResult {
        if self.config.features.contains(SlotFeatures::NO_SUSPEND) {
            return Ok(());
        }
        {
            let mut st = self.state.lock();
            if st.suspended {
                return Ok(());
            }
            st.suspended = true;
        }

        self.runtime_get();

        let ret = self.core.suspend_host();
        match ret {
            Ok(()) => {
                self.core.claim_host();
                self.disable_irq();
                self.regs.clear_bits(Reg::Hctl, bits::SDBP);
                self.core.release_host();
                debug!("{}: suspended", self.name());
            }
            Err(err) => {
                debug!("{}: card stack refused suspend: {err}", self.name());
                self.state.lock().suspended = false;
            }
        }

        self.runtime_put();
        ret
    }

    /// Restores bus power and the cover state, then resumes the card stack.
    pub fn resume(&self) -> MmcResult {
        if self.config.features.contains(SlotFeatures::NO_SUSPEND) || !self.is_suspended() {
            return Ok(());
        }

        self.core.claim_host();
        self.runtime_get();

        self.conf_bus_power();
        self.protect_card();

        let ret = self.core.resume_host();
        if ret.is_ok() {
            self.state.lock().suspended = false;
            debug!("{}: resumed", self.name());
        }

        self.core.release_host();
        self.runtime_put();
        ret
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }
}
