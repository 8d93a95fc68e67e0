// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Request engine: accepts one request at a time, programs the controller
//! and reports completion once every phase has finished.

use log::{debug, warn};
use mmc_base::{
    MmcCommand, MmcData, MmcError, MmcRequest, PowerMode, ResponseFlags, op_multi, opcode,
};

use crate::{
    config::BUSY_TIMEOUT_NS,
    host::{CmdSlot, HostState, HsmmcHost},
    regs::{HsmmcIo, Reg, bits},
    reset::ResetKind,
};

/// CMD register value for `cmd` and whether the response carries busy.
///
/// `data_read` is `Some` when the command opens a data phase.
pub(crate) fn command_word(
    cmd: &MmcCommand,
    data_read: Option<bool>,
    is_stop: bool,
    auto_cmd12: bool,
) -> (u32, bool) {
    let mut busy = false;
    let resptype = if !cmd.flags.contains(ResponseFlags::PRESENT) {
        0
    } else if cmd.flags.contains(ResponseFlags::LONG) {
        1
    } else if cmd.flags.contains(ResponseFlags::BUSY) {
        busy = true;
        3
    } else {
        2
    };
    // Only the command closing an open-ended transfer has its own type.
    let cmdtype = if is_stop { 0x3 } else { 0 };

    let mut word = (cmd.opcode << 24) | (resptype << 16) | (cmdtype << 22);
    if auto_cmd12 && op_multi(cmd.opcode) {
        word |= bits::ACEN_ACMD12;
    }
    if let Some(read) = data_read {
        word |= bits::DP_SELECT | bits::MSBS | bits::BCE;
        if read {
            word |= bits::DDIR;
        }
    }
    (word | bits::DMA_EN, busy)
}

/// DTO field for a data timeout, in powers of two of the card clock
/// above 2^13, clamped to 0..=14.
pub(crate) fn data_timeout_field(
    fclk_hz: u32,
    clkd: u32,
    timeout_ns: u32,
    timeout_clks: u32,
) -> u32 {
    let clkd = clkd.max(1);
    let card_hz = (fclk_hz / clkd).max(1);
    let cycle_ns = (1_000_000_000 / card_hz).max(1);
    let timeout = (timeout_ns / cycle_ns).saturating_add(timeout_clks);
    if timeout == 0 {
        return 0;
    }

    let mut dto = 31 - timeout.leading_zeros();
    // Round up unless the count is an exact power of two.
    if dto != 0 && timeout & !(1 << dto) != 0 {
        dto += 1;
    }
    dto.saturating_sub(13).min(14)
}

fn slot_cmd(req: &MmcRequest, slot: CmdSlot) -> Option<&MmcCommand> {
    match slot {
        CmdSlot::Sbc => req.sbc.as_ref(),
        CmdSlot::Main => Some(&req.cmd),
        CmdSlot::Stop => req.stop.as_ref(),
    }
}

pub(crate) fn slot_cmd_mut(req: &mut MmcRequest, slot: CmdSlot) -> Option<&mut MmcCommand> {
    match slot {
        CmdSlot::Sbc => req.sbc.as_mut(),
        CmdSlot::Main => Some(&mut req.cmd),
        CmdSlot::Stop => req.stop.as_mut(),
    }
}

fn fail(req: &mut MmcRequest, err: MmcError) {
    req.cmd.error = Some(err);
    if let Some(data) = req.data.as_mut() {
        data.error = Some(err);
    }
}

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Accepts `req`. Completion is reported through
    /// [`MmcCore::request_done`](mmc_base::MmcCore::request_done),
    /// possibly before this returns.
    ///
    /// # Panics
    ///
    /// Panics if a request is already in flight.
    pub fn submit(&self, req: MmcRequest) {
        let (done, release) = {
            let mut st = self.state.lock();
            assert!(
                !st.req_in_progress,
                "{}: request submitted while another is in flight",
                self.name()
            );
            assert!(
                st.dma_ch.is_none(),
                "{}: request submitted with an active DMA channel",
                self.name()
            );
            let done = self.start_request(&mut st, req);
            (done, core::mem::take(&mut st.release))
        };
        self.release_dma(release);
        if let Some(req) = done {
            self.core.request_done(req);
        }
    }

    fn start_request(&self, st: &mut HostState, mut req: MmcRequest) -> Option<MmcRequest> {
        if st.eject {
            self.reset_fsm(ResetKind::Data);
            self.reset_fsm(ResetKind::Command);
            match req.data.as_mut() {
                // Whatever was queued for a removed card is considered written.
                Some(data) if !data.is_read() => {
                    req.cmd.error = None;
                    data.bytes_xfered = data.len();
                }
                _ => req.cmd.error = Some(MmcError::NoMedium),
            }
            req.cmd.retries = 0;
            return Some(req);
        }

        if st.protect_card {
            if st.reqs_blocked < 3 {
                self.reset_fsm(ResetKind::Data);
                self.reset_fsm(ResetKind::Command);
                st.reqs_blocked += 1;
            }
            fail(&mut req, MmcError::CardProtected);
            req.cmd.retries = 0;
            return Some(req);
        }
        st.reqs_blocked = 0;

        if st.mrq.is_some() {
            warn!("{}: previous request was not released", self.name());
        }

        if st.power_mode == PowerMode::Off {
            warn!("{}: card is no longer present", self.name());
            fail(&mut req, MmcError::Io);
            return Some(req);
        }

        let has_sbc = req.sbc.is_some();
        st.mrq = Some(req);
        if has_sbc {
            // Data is armed once the block count is accepted.
            self.start_command(st, CmdSlot::Sbc, false);
            return None;
        }

        if let Err(err) = self.prepare_data(st) {
            return self.abort_request(st, err);
        }
        self.start_command(st, CmdSlot::Main, false);
        None
    }

    /// Fails the current request before its main command was issued.
    fn abort_request(&self, st: &mut HostState, err: MmcError) -> Option<MmcRequest> {
        st.data_active = false;
        st.req_in_progress = false;
        st.cur_cmd = None;
        self.disable_irq();
        let mut req = st.mrq.take()?;
        fail(&mut req, err);
        Some(req)
    }

    /// Programs block geometry and data timeout, and arms DMA.
    fn prepare_data(&self, st: &mut HostState) -> Result<(), MmcError> {
        let Some(req) = st.mrq.as_ref() else {
            return Ok(());
        };
        let Some(data) = req.data.as_ref() else {
            st.data_active = false;
            self.regs.write(Reg::Blk, 0);
            if req.cmd.flags.contains(ResponseFlags::BUSY) {
                self.set_data_timeout(BUSY_TIMEOUT_NS, 0);
            }
            return Ok(());
        };

        self.regs.write(Reg::Blk, data.blksz | (data.blocks << 16));
        self.set_data_timeout(data.timeout_ns, data.timeout_clks);
        st.data_active = true;
        self.start_dma(st)
    }

    fn set_data_timeout(&self, timeout_ns: u32, timeout_clks: u32) {
        let reg = self.regs.read(Reg::Sysctl);
        let clkd = (reg & bits::CLKD_MASK) >> bits::CLKD_SHIFT;
        let dto = data_timeout_field(self.platform.fclk_rate(), clkd, timeout_ns, timeout_clks);
        self.regs.write(
            Reg::Sysctl,
            (reg & !bits::DTO_MASK) | (dto << bits::DTO_SHIFT),
        );
    }

    /// Issues one command of the current request.
    pub(crate) fn start_command(&self, st: &mut HostState, slot: CmdSlot, no_autocmd12: bool) {
        let Some(req) = st.mrq.as_ref() else {
            return;
        };
        let Some(cmd) = slot_cmd(req, slot) else {
            return;
        };
        let data_read = match slot {
            CmdSlot::Main => req.data.as_ref().map(MmcData::is_read),
            _ => None,
        };
        debug!(
            "{}: CMD{}, argument {:#010x}",
            self.name(),
            cmd.opcode,
            cmd.arg
        );
        let (word, busy) = command_word(
            cmd,
            data_read,
            slot == CmdSlot::Stop,
            st.auto_cmd12 && !no_autocmd12,
        );
        let (op, arg) = (cmd.opcode, cmd.arg);

        st.cur_cmd = Some(slot);
        self.enable_irq(op);
        st.response_busy = busy;
        st.req_in_progress = true;

        self.regs.write(Reg::Arg, arg);
        self.regs.write(Reg::Cmd, word);
    }

    /// Command complete: latch the response, chain the next command or
    /// finish the request.
    pub(crate) fn cmd_done(&self, st: &mut HostState) -> Option<MmcRequest> {
        let slot = st.cur_cmd.take()?;

        if slot == CmdSlot::Sbc {
            let sbc_failed = st
                .mrq
                .as_ref()
                .and_then(|req| req.sbc.as_ref())
                .is_some_and(|sbc| sbc.error.is_some());
            if sbc_failed {
                return self.request_done(st);
            }
            if let Err(err) = self.prepare_data(st) {
                return self.abort_request(st, err);
            }
            self.start_command(st, CmdSlot::Main, true);
            return None;
        }

        let cmd = st.mrq.as_mut().and_then(|req| slot_cmd_mut(req, slot))?;
        if cmd.flags.contains(ResponseFlags::PRESENT) {
            if cmd.flags.contains(ResponseFlags::LONG) {
                cmd.resp[3] = self.regs.read(Reg::Rsp10);
                cmd.resp[2] = self.regs.read(Reg::Rsp32);
                cmd.resp[1] = self.regs.read(Reg::Rsp54);
                cmd.resp[0] = self.regs.read(Reg::Rsp76);
            } else {
                cmd.resp[0] = self.regs.read(Reg::Rsp10);
            }
        }
        let failed = cmd.error.is_some();

        if (!st.data_active && !st.response_busy) || failed {
            return self.request_done(st);
        }
        None
    }

    /// Transfer complete (or busy released) for the current request.
    ///
    /// `had_data` tells whether a data phase was owned when the interrupt
    /// pass started; an error may have torn it down since.
    pub(crate) fn xfer_done(&self, st: &mut HostState, had_data: bool) -> Option<MmcRequest> {
        if !had_data {
            // Busy end of a CMD6 can be signalled before its response.
            let cmd6_busy = st.response_busy
                && st
                    .cur_cmd
                    .zip(st.mrq.as_ref())
                    .and_then(|(slot, req)| slot_cmd(req, slot))
                    .is_some_and(|cmd| cmd.opcode == opcode::SWITCH);
            if cmd6_busy {
                st.response_busy = false;
                return None;
            }
            return self.request_done(st);
        }

        st.data_active = false;
        self.adma_unmap(st);
        let auto_cmd12 = st.auto_cmd12;
        let req = st.mrq.as_mut()?;
        let data = req.data.as_mut()?;

        if data.error.is_none() {
            data.bytes_xfered += data.len();
        } else {
            data.bytes_xfered = 0;
        }

        let data_failed = data.error.is_some();
        if req.stop.is_some() && (!auto_cmd12 || data_failed) {
            self.start_command(st, CmdSlot::Stop, false);
            return None;
        }
        // Auto-CMD12 leaves its response in the upper response register.
        if let Some(stop) = req.stop.as_mut() {
            stop.resp[0] = self.regs.read(Reg::Rsp76);
        }
        self.request_done(st)
    }

    /// Controller side of the request is over. Returns the request unless a
    /// DMA channel still owns its data; the channel callback completes it then.
    pub(crate) fn request_done(&self, st: &mut HostState) -> Option<MmcRequest> {
        st.req_in_progress = false;
        let dma_pending = st.dma_ch.is_some();
        self.disable_irq();

        let has_data = st.mrq.as_ref().is_some_and(|req| req.data.is_some());
        if has_data && dma_pending {
            return None;
        }
        st.cur_cmd = None;
        st.mrq.take()
    }
}
