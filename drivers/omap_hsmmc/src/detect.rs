// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Card insertion/removal and cover tracking.

use log::{debug, info};
use mmc_base::PowerMode;

use crate::{host::HsmmcHost, regs::HsmmcIo};

/// Rescan debounce after an insertion.
const INSERT_DEBOUNCE_MS: u32 = 200;

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Card-detect line interrupt. The scan itself may block and runs from
    /// [`run_detect_work`](Self::run_detect_work).
    pub fn card_detect_irq(&self) {
        if self.state.lock().suspended {
            return;
        }
        self.platform.schedule_detect();
    }

    /// Deferred card-detect scan.
    pub fn run_detect_work(&self) {
        if self.state.lock().suspended {
            return;
        }

        let present = match &self.config.card_detect {
            Some(card_detect) => {
                let present = card_detect();
                self.state.lock().eject = !present;
                present
            }
            None => {
                self.protect_card();
                true
            }
        };
        debug!("{}: card detect, present {present}", self.name());

        if present {
            self.core.detect_change(INSERT_DEBOUNCE_MS);
            return;
        }

        // Card power goes before the card stack has torn the card down.
        self.core.claim_host();
        if self.power_mode() != PowerMode::Off
            && self.config.regulator.is_some()
            && self.set_slot_power(false, 0).is_ok()
        {
            self.state.lock().power_mode = PowerMode::Off;
        }
        self.core.release_host();
        self.core.detect_change(0);
    }

    /// Re-reads the cover switch, blocking requests while it is open.
    pub(crate) fn protect_card(&self) {
        let Some(cover_closed) = &self.config.cover_state else {
            return;
        };
        let closed = cover_closed();

        let mut st = self.state.lock();
        st.reqs_blocked = 0;
        if closed && st.protect_card {
            st.protect_card = false;
            drop(st);
            info!("{}: cover is closed, card is now accessible", self.name());
        } else if !closed && !st.protect_card {
            st.protect_card = true;
            drop(st);
            info!("{}: cover is open, card is now inaccessible", self.name());
        }
    }

    /// External slot-status notification.
    ///
    /// Without a status hook every notification triggers a rescan, otherwise
    /// only a change of the hook's answer does.
    pub fn status_notify(&self, card_present: bool) {
        debug!("{}: card_present {card_present}", self.name());

        let Some(status) = &self.config.status else {
            self.core.detect_change(0);
            return;
        };
        let now = status();

        let old = {
            let mut st = self.state.lock();
            core::mem::replace(&mut st.card_present, now)
        };
        if old != now {
            debug!("{}: slot status change ({old} -> {now})", self.name());
            self.core.detect_change(0);
        }
    }

    /// Whether requests are currently refused because the cover is open.
    pub fn is_protected(&self) -> bool {
        self.state.lock().protect_card
    }
}
