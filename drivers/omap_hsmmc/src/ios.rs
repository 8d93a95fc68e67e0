// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Bus configuration: power, voltage, width, clock and context restore.

use log::debug;
use mmc_base::{BusMode, BusWidth, MmcIos, MmcResult, PowerMode, vdd};

use crate::{
    config::{DUAL_VOLT_OCR_BIT, MAX_CLKD, MMC_TIMEOUT_MS, SlotFeatures},
    dma::DmaMode,
    host::HsmmcHost,
    regs::{HsmmcIo, Reg, Status, bits},
};

/// Card clock divider for `clock` Hz, rounded so the card clock never
/// exceeds the request. `0` means the clock is off.
pub(crate) fn clock_divisor(master_clock: u32, clock: u32) -> u32 {
    if clock == 0 {
        return 0;
    }
    let mut dsor = (master_clock / clock).max(1);
    if master_clock / dsor > clock {
        dsor += 1;
    }
    dsor.min(MAX_CLKD)
}

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Applies the card stack's bus settings under its claim.
    pub(crate) fn apply_ios(&self, ios: &MmcIos) {
        self.core.claim_host();

        let mut do_init_stream = false;
        let cur_power = self.state.lock().power_mode;
        if ios.power_mode != cur_power {
            let vdd = match ios.power_mode {
                PowerMode::Off => self.set_slot_power(false, 0).map(|()| Some(0)),
                PowerMode::Up => self.set_slot_power(true, ios.vdd).map(|()| Some(ios.vdd)),
                PowerMode::On => {
                    do_init_stream = true;
                    Ok(None)
                }
            };
            // A failed supply switch keeps the recorded power state.
            if let Ok(vdd) = vdd {
                let mut st = self.state.lock();
                if let Some(vdd) = vdd {
                    st.vdd = vdd;
                }
                st.power_mode = ios.power_mode;
            }
        }
        self.state.lock().ios = *ios;

        self.write_bus_width(ios);

        if self.config.features.contains(SlotFeatures::DUAL_VOLT)
            && self.regs.read(Reg::Hctl) & bits::SDVSDET != 0
            && ios.vdd == DUAL_VOLT_OCR_BIT
            && self.switch_opcond(ios.vdd).is_err()
        {
            debug!("{}: switch operation failed", self.name());
        }

        self.set_clock(ios.clock);

        if do_init_stream {
            self.send_init_stream();
        }

        self.write_bus_mode(ios.bus_mode);

        self.core.release_host();
    }

    fn write_bus_width(&self, ios: &MmcIos) {
        let mut con = self.regs.read(Reg::Con);
        if ios.timing.is_ddr() {
            con |= bits::DDR;
        } else {
            con &= !bits::DDR;
        }
        match ios.bus_width {
            BusWidth::Eight => self.regs.write(Reg::Con, con | bits::DW8),
            BusWidth::Four => {
                self.regs.write(Reg::Con, con & !bits::DW8);
                self.regs.set_bits(Reg::Hctl, bits::FOUR_BIT);
            }
            BusWidth::One => {
                self.regs.write(Reg::Con, con & !bits::DW8);
                self.regs.clear_bits(Reg::Hctl, bits::FOUR_BIT);
            }
        }
    }

    fn write_bus_mode(&self, mode: BusMode) {
        match mode {
            BusMode::OpenDrain => self.regs.set_bits(Reg::Con, bits::OD),
            BusMode::PushPull => self.regs.clear_bits(Reg::Con, bits::OD),
        }
    }

    fn stop_clock(&self) {
        self.regs.clear_bits(Reg::Sysctl, bits::CEN);
        if self.regs.read(Reg::Sysctl) & bits::CEN != 0 {
            debug!("{}: MMC clock is not stopped", self.name());
        }
    }

    /// Reprograms the card clock divider and waits for the internal clock.
    fn set_clock(&self, clock: u32) {
        let dsor = clock_divisor(self.master_clock(), clock);
        self.stop_clock();
        let sysctl = self.regs.read(Reg::Sysctl) & !bits::CLKD_MASK;
        self.regs.write(
            Reg::Sysctl,
            sysctl | (dsor << bits::CLKD_SHIFT) | (bits::DTO << bits::DTO_SHIFT),
        );
        self.regs.set_bits(Reg::Sysctl, bits::ICE);

        if !self.poll_until(MMC_TIMEOUT_MS, |r| r.read(Reg::Sysctl) & bits::ICS != 0) {
            debug!("{}: internal clock not stable", self.name());
        }

        self.regs.set_bits(Reg::Sysctl, bits::CEN);
    }

    /// Power-cycles the slot at `vdd` and switches the interface voltage.
    fn switch_opcond(&self, vdd_bit: u32) -> MmcResult {
        self.runtime_put();
        let res = self
            .set_slot_power(false, 0)
            .and_then(|_| self.set_slot_power(true, vdd_bit));
        self.runtime_get();
        res?;

        self.regs.write(Reg::Hctl, self.regs.read(Reg::Hctl) & bits::SDVSCLR);
        let mut hctl = self.regs.read(Reg::Hctl);
        hctl |= if vdd::is_low_voltage(vdd_bit) {
            bits::SDVS18
        } else {
            bits::SDVS30
        };
        self.regs.write(Reg::Hctl, hctl);
        self.set_sd_bus_power();
        Ok(())
    }

    pub(crate) fn set_sd_bus_power(&self) {
        self.regs.set_bits(Reg::Hctl, bits::SDBP);
        if !self.poll_until(MMC_TIMEOUT_MS, |r| r.read(Reg::Hctl) & bits::SDBP != 0) {
            debug!("{}: SD bus power not set", self.name());
        }
    }

    /// Sends the 80-clock initialization sequence that precedes CMD0.
    fn send_init_stream(&self) {
        if self.state.lock().protect_card {
            return;
        }

        self.platform.disable_irq_line();

        self.regs.write(Reg::Ie, bits::INT_EN_MASK);
        self.regs.set_bits(Reg::Con, bits::INIT_STREAM);
        self.regs.write(Reg::Cmd, bits::INIT_STREAM_CMD);

        if !self.poll_until(MMC_TIMEOUT_MS, |r| r.read(Reg::Stat) & Status::CC.bits() != 0) {
            debug!("{}: init stream did not complete", self.name());
        }

        self.regs.clear_bits(Reg::Con, bits::INIT_STREAM);
        self.regs.write(Reg::Stat, bits::STAT_CLEAR);
        self.regs.read(Reg::Stat);

        self.platform.enable_irq_line();
    }

    /// Interface voltage, DMA select, capabilities, auto-idle and bus power.
    pub(crate) fn conf_bus_power(&self) {
        let (mut hctl, capa) = if self.config.features.contains(SlotFeatures::DUAL_VOLT) {
            (bits::SDVS30, bits::VS30 | bits::VS18)
        } else {
            (bits::SDVS18, bits::VS18)
        };
        let adma = self.state.lock().dma_mode == DmaMode::Adma;
        if adma {
            hctl |= bits::DMAS;
        }

        let value = self.regs.read(Reg::Hctl) & !bits::SDVS_MASK;
        self.regs.write(Reg::Hctl, value | hctl);

        if adma {
            self.regs.set_bits(Reg::Con, bits::DMA_MNS_ADMA_MODE);
        }

        self.regs.set_bits(Reg::Capa, capa);
        self.regs.set_bits(Reg::Sysconfig, bits::AUTOIDLE);

        self.set_sd_bus_power();
    }

    /// Rebuilds the register state after the power domain lost it.
    pub(crate) fn context_restore(&self) {
        let (power_mode, ios, adma) = {
            let st = self.state.lock();
            (st.power_mode, st.ios, st.dma_mode == DmaMode::Adma)
        };
        let reset_done = |r: &R| r.read(Reg::Sysstatus) & bits::RESETDONE != 0;

        self.poll_until(MMC_TIMEOUT_MS, reset_done);
        self.regs.write(Reg::Sysconfig, bits::SOFTRESET);
        self.poll_until(MMC_TIMEOUT_MS, reset_done);
        self.regs.set_bits(Reg::Sysconfig, bits::AUTOIDLE);

        let (mut hctl, capa) = if self.config.features.contains(SlotFeatures::DUAL_VOLT) {
            let hctl = if power_mode != PowerMode::Off && ios.is_low_voltage() {
                bits::SDVS18
            } else {
                bits::SDVS30
            };
            (hctl, bits::VS30 | bits::VS18)
        } else {
            (bits::SDVS18, bits::VS18)
        };
        if adma {
            hctl |= bits::DMAS;
        }
        self.regs.set_bits(Reg::Hctl, hctl);
        self.regs.set_bits(Reg::Capa, capa);
        self.regs.set_bits(Reg::Hctl, bits::SDBP);
        if adma {
            self.regs.set_bits(Reg::Con, bits::DMA_MNS_ADMA_MODE);
        }
        self.poll_until(MMC_TIMEOUT_MS, |r| r.read(Reg::Hctl) & bits::SDBP != 0);

        self.disable_irq();

        // Card-specific settings only matter while the card is powered.
        if power_mode != PowerMode::Off {
            self.write_bus_width(&ios);
            let dsor = clock_divisor(self.master_clock(), ios.clock);
            self.regs.clear_bits(Reg::Sysctl, bits::CEN);
            self.regs.write(
                Reg::Sysctl,
                (dsor << bits::CLKD_SHIFT) | (bits::DTO << bits::DTO_SHIFT),
            );
            self.regs.set_bits(Reg::Sysctl, bits::ICE);
            self.poll_until(MMC_TIMEOUT_MS, |r| r.read(Reg::Sysctl) & bits::ICS != 0);
            self.regs.set_bits(Reg::Sysctl, bits::CEN);
            self.write_bus_mode(ios.bus_mode);
        }
        debug!("{}: context is restored", self.name());
    }
}
