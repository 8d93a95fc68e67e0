// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Dynamic power state machine.
//!
//! ```text
//!   ENABLED -> DISABLED -> CARDSLEEP / REGSLEEP -> OFF
//!     ^___________|          |                      |
//!     |______________________|______________________|
//! ```
//!
//! - ENABLED: host fully functional.
//! - DISABLED: functional clock off.
//! - CARDSLEEP: clock off, card asleep, supply in low-power mode.
//! - REGSLEEP: clock off, supply in low-power mode.
//! - OFF: clock off, supply off.
//!
//! Every transition returns the delay in milliseconds before the next
//! `disable` should be attempted, `0` meaning none.

use log::{debug, warn};
use mmc_base::{HostCaps, MmcError, MmcResult, PowerMode};

use crate::{
    config::{OFF_TIMEOUT_MS, SLEEP_TIMEOUT_MS},
    host::HsmmcHost,
    regs::HsmmcIo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum DpmState {
    #[strum(serialize = "ENABLED")]
    Enabled,
    #[strum(serialize = "DISABLED")]
    Disabled,
    #[strum(serialize = "CARDSLEEP")]
    CardSleep,
    #[strum(serialize = "REGSLEEP")]
    RegSleep,
    #[strum(serialize = "OFF")]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpmEvent {
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnabledToDisabled,
    DisabledToSleep,
    SleepToOff,
    DisabledToEnabled,
    SleepToEnabled,
    OffToEnabled,
}

impl Transition {
    /// Transition taken by `event` in `state`, if any.
    pub const fn lookup(state: DpmState, event: DpmEvent) -> Option<Self> {
        use DpmEvent::*;
        use DpmState::*;
        match (state, event) {
            (Enabled, Disable) => Some(Self::EnabledToDisabled),
            (Disabled, Disable) => Some(Self::DisabledToSleep),
            (CardSleep | RegSleep, Disable) => Some(Self::SleepToOff),
            (Disabled, Enable) => Some(Self::DisabledToEnabled),
            (CardSleep | RegSleep, Enable) => Some(Self::SleepToEnabled),
            (Off, Enable) => Some(Self::OffToEnabled),
            (Enabled, Enable) | (Off, Disable) => None,
        }
    }
}

fn state_name(state: DpmState) -> &'static str {
    state.into()
}

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Brings the host back to ENABLED from any lower state.
    pub fn dpm_enable(&self) -> MmcResult<u32> {
        self.dpm_event(DpmEvent::Enable, false)
    }

    /// Moves the host one state deeper.
    ///
    /// Leaving ENABLED only reports the next delay when `lazy` is set.
    pub fn dpm_disable(&self, lazy: bool) -> MmcResult<u32> {
        self.dpm_event(DpmEvent::Disable, lazy)
    }

    fn dpm_event(&self, event: DpmEvent, lazy: bool) -> MmcResult<u32> {
        let state = self.dpm_state();
        let Some(transition) = Transition::lookup(state, event) else {
            debug!("{}: no {event:?} transition from {}", self.name(), state_name(state));
            return Err(MmcError::BadState);
        };
        match transition {
            Transition::EnabledToDisabled => {
                let delay = self.enabled_to_disabled();
                Ok(if lazy { delay } else { 0 })
            }
            Transition::DisabledToSleep => self.disabled_to_sleep(),
            Transition::SleepToOff => self.sleep_to_off(),
            Transition::DisabledToEnabled => Ok(self.disabled_to_enabled()),
            Transition::SleepToEnabled => Ok(self.sleep_to_enabled()),
            Transition::OffToEnabled => Ok(self.off_to_enabled()),
        }
    }

    fn set_dpm_state(&self, from: DpmState, to: DpmState) {
        self.state.lock().dpm_state = to;
        debug!("{}: {} -> {}", self.name(), state_name(from), state_name(to));
    }

    /// Card power may be cut: the card cannot disappear unnoticed.
    fn may_power_off(&self) -> bool {
        self.caps().contains(HostCaps::NONREMOVABLE)
            || self.config.card_detect.is_some()
            || (self.config.cover_state.is_some() && self.config.cover_closed())
    }

    fn enabled_to_disabled(&self) -> u32 {
        self.runtime_put();
        self.set_dpm_state(DpmState::Enabled, DpmState::Disabled);

        if self.power_mode() == PowerMode::Off {
            0
        } else {
            SLEEP_TIMEOUT_MS
        }
    }

    fn disabled_to_sleep(&self) -> MmcResult<u32> {
        if !self.core.try_claim_host() {
            return Ok(0);
        }

        self.runtime_get();

        let new_state = if self.core.card_can_sleep() {
            if let Err(err) = self.core.card_sleep() {
                self.runtime_put();
                self.core.release_host();
                return Err(err);
            }
            DpmState::CardSleep
        } else {
            DpmState::RegSleep
        };
        self.set_slot_sleep(true, 0, new_state == DpmState::CardSleep);

        self.runtime_put();
        self.set_dpm_state(DpmState::Disabled, new_state);
        self.core.release_host();

        if self.config.no_off() {
            return Ok(0);
        }
        Ok(if self.may_power_off() {
            OFF_TIMEOUT_MS
        } else {
            0
        })
    }

    /// Cuts card power. A failed power-off leaves the host in its sleep
    /// state.
    fn sleep_to_off(&self) -> MmcResult<u32> {
        if !self.core.try_claim_host() {
            return Ok(0);
        }

        if !self.config.no_off() && self.may_power_off() {
            if let Err(err) = self.set_slot_power(false, 0) {
                self.core.release_host();
                return Err(err);
            }
            let from = {
                let mut st = self.state.lock();
                st.vdd = 0;
                st.power_mode = PowerMode::Off;
                st.dpm_state
            };
            self.set_dpm_state(from, DpmState::Off);
        }

        self.core.release_host();
        Ok(0)
    }

    fn disabled_to_enabled(&self) -> u32 {
        self.runtime_get();
        self.set_dpm_state(DpmState::Disabled, DpmState::Enabled);
        0
    }

    fn sleep_to_enabled(&self) -> u32 {
        if !self.core.try_claim_host() {
            return 0;
        }

        self.runtime_get();

        let (from, vdd) = {
            let st = self.state.lock();
            (st.dpm_state, st.vdd)
        };
        self.set_slot_sleep(false, vdd, from == DpmState::CardSleep);
        if self.core.card_can_sleep() {
            if let Err(err) = self.core.card_awake() {
                warn!("{}: card awake failed: {err}", self.name());
            }
        }

        self.set_dpm_state(from, DpmState::Enabled);
        self.core.release_host();
        0
    }

    fn off_to_enabled(&self) -> u32 {
        self.runtime_get();

        self.conf_bus_power();
        if let Err(err) = self.core.power_restore() {
            warn!("{}: power restore failed: {err}", self.name());
        }

        self.set_dpm_state(DpmState::Off, DpmState::Enabled);
        0
    }
}
