// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Host context: the one object every event of a slot is routed to.

use alloc::{sync::Arc, vec::Vec};

use kdma::{DmaChannel, DmaEngine, DmaMapping, ScatterEntry};
use kspin::SpinNoIrq;
use log::{debug, warn};
use mmc_base::{
    DeviceKind, DriverOps, HostCaps, HostLimits, MmcCore, MmcHostOps, MmcIos, MmcRequest,
    MmcResult, PowerMode, opcode,
};

use crate::{
    config::*,
    dma::{AdmaTable, DmaMode, DmaRelease},
    platform::HsmmcPlatform,
    power::DpmState,
    regs::{HsmmcIo, Reg, bits},
};

/// Which command of the in-flight request the controller is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmdSlot {
    Sbc,
    Main,
    Stop,
}

/// Mutable host state, shared by request, interrupt, DMA and work contexts.
pub(crate) struct HostState {
    pub mrq: Option<MmcRequest>,
    pub cur_cmd: Option<CmdSlot>,
    /// The data phase of `mrq` is still owned by the controller.
    pub data_active: bool,
    pub response_busy: bool,
    pub req_in_progress: bool,
    pub dma_mode: DmaMode,
    pub dma_ch: Option<DmaChannel>,
    pub dma_sg_idx: usize,
    /// Device view of the data phase while it is mapped.
    pub dma_sg: Option<Vec<ScatterEntry>>,
    pub release: DmaRelease,
    pub adma: Option<AdmaTable>,
    pub auto_cmd12: bool,
    pub power_mode: PowerMode,
    pub dpm_state: DpmState,
    pub vdd: u32,
    pub ios: MmcIos,
    pub protect_card: bool,
    pub reqs_blocked: u32,
    pub eject: bool,
    pub suspended: bool,
    pub card_present: bool,
}

/// Collaborators a host is attached to.
pub struct HostResources {
    pub core: Arc<dyn MmcCore>,
    pub dma: Arc<dyn DmaEngine>,
    pub mapping: Arc<dyn DmaMapping>,
    pub platform: Arc<dyn HsmmcPlatform>,
    pub irq: usize,
}

/// One HSMMC controller slot.
pub struct HsmmcHost<R: HsmmcIo> {
    pub(crate) regs: R,
    pub(crate) config: SlotConfig,
    pub(crate) core: Arc<dyn MmcCore>,
    pub(crate) dma: Arc<dyn DmaEngine>,
    pub(crate) mapping: Arc<dyn DmaMapping>,
    pub(crate) platform: Arc<dyn HsmmcPlatform>,
    pub(crate) state: SpinNoIrq<HostState>,
    irq: usize,
    master_clock: u32,
    caps: HostCaps,
    limits: HostLimits,
}

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Attaches the driver to an already mapped and clocked controller.
    ///
    /// Picks ADMA when the controller advertises it and the descriptor table
    /// can be allocated, system DMA otherwise. The host starts in the
    /// DISABLED power state with all controller interrupts masked.
    pub fn new(regs: R, config: SlotConfig, res: HostResources) -> MmcResult<Self> {
        let HostResources {
            core,
            dma,
            mapping,
            platform,
            irq,
        } = res;

        platform.runtime_get();

        let mut adma = None;
        if regs.read(Reg::Capa) & bits::CAPA_ADMA_SUPPORT != 0 {
            match AdmaTable::alloc(mapping.as_ref()) {
                Ok(table) => adma = Some(table),
                Err(err) => warn!("{}: no ADMA table ({err}), using system DMA", config.name),
            }
        }
        let dma_mode = if adma.is_some() {
            DmaMode::Adma
        } else {
            DmaMode::Sdma
        };
        debug!("{}: DMA mode {:?}", config.name, dma_mode);

        let limits = host_limits(dma_mode, config.ocr_mask);
        let caps = host_caps(&config);
        let master_clock = config.master_clock();

        let host = Self {
            regs,
            core,
            dma,
            mapping,
            platform,
            state: SpinNoIrq::new(HostState {
                mrq: None,
                cur_cmd: None,
                data_active: false,
                response_busy: false,
                req_in_progress: false,
                dma_mode,
                dma_ch: None,
                dma_sg_idx: 0,
                dma_sg: None,
                release: DmaRelease::default(),
                adma,
                auto_cmd12: true,
                power_mode: PowerMode::Off,
                dpm_state: DpmState::Disabled,
                vdd: 0,
                ios: MmcIos::default(),
                protect_card: false,
                reqs_blocked: 0,
                eject: false,
                suspended: false,
                card_present: false,
            }),
            config,
            irq,
            master_clock,
            caps,
            limits,
        };

        host.conf_bus_power();

        if let Some(status) = &host.config.status {
            host.state.lock().card_present = status();
        }

        host.disable_irq();
        host.protect_card();
        host.platform.runtime_put();

        Ok(host)
    }

    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    pub fn caps(&self) -> HostCaps {
        self.caps
    }

    pub fn limits(&self) -> HostLimits {
        self.limits
    }

    pub fn dma_mode(&self) -> DmaMode {
        self.state.lock().dma_mode
    }

    pub fn dpm_state(&self) -> DpmState {
        self.state.lock().dpm_state
    }

    pub fn power_mode(&self) -> PowerMode {
        self.state.lock().power_mode
    }

    /// Whether a request is owned by the host.
    pub fn is_busy(&self) -> bool {
        let st = self.state.lock();
        st.mrq.is_some() || st.req_in_progress
    }

    pub(crate) fn name(&self) -> &'static str {
        self.config.name
    }

    pub(crate) fn master_clock(&self) -> u32 {
        self.master_clock
    }

    /// Unmasks the interrupts a command needs.
    pub(crate) fn enable_irq(&self, cmd_opcode: u32) {
        // Data moves by DMA, the buffer-ready interrupts are never wanted.
        let mut mask = bits::INT_EN_MASK & !(bits::BRR_ENABLE | bits::BWR_ENABLE);
        // Erases may legitimately outlast the data timeout.
        if cmd_opcode == opcode::ERASE {
            mask &= !bits::DTO_ENABLE;
        }
        self.regs.write(Reg::Stat, bits::STAT_CLEAR);
        self.regs.write(Reg::Ise, mask);
        self.regs.write(Reg::Ie, mask);
    }

    pub(crate) fn disable_irq(&self) {
        self.regs.write(Reg::Ise, 0);
        self.regs.write(Reg::Ie, 0);
        self.regs.write(Reg::Stat, bits::STAT_CLEAR);
    }

    /// Busy-polls `done` for up to `timeout_ms`.
    pub(crate) fn poll_until(&self, timeout_ms: u32, done: impl Fn(&R) -> bool) -> bool {
        const STEP_US: u32 = 10;
        for _ in 0..timeout_ms * 1000 / STEP_US {
            if done(&self.regs) {
                return true;
            }
            self.platform.udelay(STEP_US);
        }
        done(&self.regs)
    }

    /// Runtime power reference, restoring the register context if it was lost.
    pub(crate) fn runtime_get(&self) {
        self.platform.runtime_get();
        if self.platform.context_was_lost() {
            self.context_restore();
        }
    }

    pub(crate) fn runtime_put(&self) {
        self.platform.runtime_put();
    }

    /// Switches card power through the slot regulator, if there is one.
    pub(crate) fn set_slot_power(&self, on: bool, vdd: u32) -> MmcResult {
        match &self.config.regulator {
            Some(reg) => reg.set_power(on, vdd).inspect_err(|err| {
                warn!("{}: set_power({on}, {vdd}) failed: {err}", self.name());
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn set_slot_sleep(&self, sleep: bool, vdd: u32, card_sleep: bool) {
        let Some(reg) = &self.config.regulator else {
            return;
        };
        if let Err(err) = reg.set_sleep(sleep, vdd, card_sleep) {
            warn!("{}: set_sleep({sleep}) failed: {err}", self.name());
        }
    }
}

fn host_limits(mode: DmaMode, ocr_avail: u32) -> HostLimits {
    let (max_segs, max_blk_count) = match mode {
        // Half of the table is kept for splitting oversized segments.
        DmaMode::Adma => (
            DMA_TABLE_NUM_ENTRIES as u32 / 2,
            ADMA_MAX_BLKS_PER_ROW * DMA_TABLE_NUM_ENTRIES as u32 / 2,
        ),
        DmaMode::Sdma => (DMA_TABLE_NUM_ENTRIES as u32, 0xffff),
    };
    let max_blk_size = 512;
    let max_req_size = max_blk_size * max_blk_count;
    HostLimits {
        f_min: F_MIN_HZ,
        f_max: F_MAX_HZ,
        ocr_avail,
        max_segs,
        max_blk_size,
        max_blk_count,
        max_req_size,
        max_seg_size: max_req_size,
        disable_delay_ms: DISABLED_TIMEOUT_MS,
    }
}

fn host_caps(config: &SlotConfig) -> HostCaps {
    let mut caps = HostCaps::MMC_HIGHSPEED
        | HostCaps::SD_HIGHSPEED
        | HostCaps::WAIT_WHILE_BUSY
        | HostCaps::ERASE
        | HostCaps::CMD23
        | HostCaps::DISABLE
        | config.caps;
    if caps.contains(HostCaps::EIGHT_BIT_DATA) {
        caps |= HostCaps::FOUR_BIT_DATA;
    }
    if config.features.contains(SlotFeatures::NONREMOVABLE) {
        caps |= HostCaps::NONREMOVABLE;
    }
    caps
}

impl<R: HsmmcIo> Drop for HsmmcHost<R> {
    fn drop(&mut self) {
        if let Some(table) = self.state.get_mut().adma.take() {
            table.free(self.mapping.as_ref());
        }
    }
}

impl<R: HsmmcIo> DriverOps for HsmmcHost<R> {
    fn name(&self) -> &str {
        self.config.name
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Mmc
    }

    fn irq(&self) -> Option<usize> {
        Some(self.irq)
    }
}

impl<R: HsmmcIo> MmcHostOps for HsmmcHost<R> {
    fn request(&self, req: MmcRequest) {
        self.submit(req);
    }

    fn set_ios(&self, ios: &MmcIos) {
        self.apply_ios(ios);
    }

    fn get_cd(&self) -> Option<bool> {
        self.config.card_detect.as_ref().map(|present| present())
    }

    fn get_ro(&self) -> Option<bool> {
        self.config.get_ro.as_ref().map(|ro| ro())
    }

    fn enable(&self) -> MmcResult<u32> {
        if self.config.features.contains(SlotFeatures::POWER_SAVING) {
            self.dpm_enable()
        } else {
            self.runtime_get();
            debug!("{}: enabled", self.name());
            Ok(0)
        }
    }

    fn disable(&self, lazy: bool) -> MmcResult<u32> {
        if self.config.features.contains(SlotFeatures::POWER_SAVING) {
            self.dpm_disable(lazy)
        } else {
            self.runtime_put();
            debug!("{}: idle", self.name());
            Ok(0)
        }
    }
}
