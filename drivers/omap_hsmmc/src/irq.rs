// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Interrupt reactor.

use log::debug;
use mmc_base::{MmcError, MmcRequest};

use crate::{
    host::{HostState, HsmmcHost},
    regs::{HsmmcIo, Reg, Status, bits},
    request::slot_cmd_mut,
    reset::ResetKind,
};

impl<R: HsmmcIo> HsmmcHost<R> {
    /// Controller interrupt handler.
    ///
    /// Handles status passes until no enabled status bit is left. A request
    /// finished by a pass is reported after the state lock is dropped.
    pub fn handle_irq(&self) {
        let mut status = self.regs.read(Reg::Stat);
        loop {
            let (done, release) = {
                let mut st = self.state.lock();
                let done = self.do_irq(&mut st, status);
                (done, core::mem::take(&mut st.release))
            };
            self.release_dma(release);
            if let Some(req) = done {
                self.core.request_done(req);
            }
            // Flush posted write
            status = self.regs.read(Reg::Stat);
            if status & bits::INT_EN_MASK == 0 {
                break;
            }
        }
    }

    fn do_irq(&self, st: &mut HostState, status: u32) -> Option<MmcRequest> {
        if !st.req_in_progress {
            // Nothing to dispatch to; acknowledge until the line is quiet.
            let mut status = status;
            loop {
                self.regs.write(Reg::Stat, status);
                status = self.regs.read(Reg::Stat);
                if status & bits::INT_EN_MASK == 0 {
                    return None;
                }
            }
        }

        let had_data = st.data_active;
        let stat = Status::from_bits_retain(status);
        debug!("{}: IRQ status is {status:#x}", self.name());

        let mut end_cmd = false;
        let mut end_trans = false;

        if stat.contains(Status::ERRI) {
            debug!("{}: {}", self.name(), Status::decode(status));

            if stat.intersects(Status::CTO | Status::CCRC) {
                if let Some(slot) = st.cur_cmd {
                    self.reset_fsm(ResetKind::Command);
                    let err = if stat.contains(Status::CTO) {
                        MmcError::TimedOut
                    } else {
                        MmcError::IllegalSequence
                    };
                    if let Some(cmd) = st.mrq.as_mut().and_then(|req| slot_cmd_mut(req, slot)) {
                        cmd.error = Some(err);
                    }
                    end_cmd = true;
                }
                if st.data_active || st.response_busy {
                    if st.data_active {
                        self.dma_cleanup(st, MmcError::TimedOut);
                    }
                    st.response_busy = false;
                    self.reset_fsm(ResetKind::Data);
                }
            }

            if stat.intersects(Status::DTO | Status::DCRC)
                && (st.data_active || st.response_busy)
            {
                let err = if stat.contains(Status::DTO) {
                    MmcError::TimedOut
                } else {
                    MmcError::IllegalSequence
                };
                self.data_error(st, err);
                end_trans = true;
            }

            if stat.contains(Status::CERR) {
                if let Some(slot) = st.cur_cmd {
                    debug!("{}: ignoring card error on {slot:?} command", self.name());
                    end_cmd = true;
                }
                if st.data_active {
                    end_trans = true;
                }
            }

            // End-bit error: the card went away in the middle of a read.
            if stat.contains(Status::DEB) {
                self.data_error(st, MmcError::IllegalSequence);
                end_trans = true;
            }

            if stat.contains(Status::ADMA) {
                debug!(
                    "{}: ADMA err: ADMA_ES={:#x}, SAL={:#x}",
                    self.name(),
                    self.regs.read(Reg::AdmaEs),
                    self.regs.read(Reg::AdmaSal)
                );
                if st.cur_cmd.is_some() {
                    end_cmd = true;
                }
                if st.data_active {
                    if let Some(data) = st.mrq.as_mut().and_then(|req| req.data.as_mut()) {
                        data.error = Some(MmcError::AdmaDescriptor);
                    }
                    end_trans = true;
                }
            }
        }

        if stat.contains(Status::DMA) {
            debug!(
                "{}: ADMA XFERINT: blk={:#x} at table={:#x} pstate={:#x}",
                self.name(),
                self.regs.read(Reg::Blk),
                self.regs.read(Reg::AdmaSal),
                self.regs.read(Reg::Pstate)
            );
        }

        self.regs.write(Reg::Stat, status);

        let mut done = None;
        if end_cmd || (stat.contains(Status::CC) && st.cur_cmd.is_some()) {
            done = self.cmd_done(st);
        }
        if (end_trans || stat.contains(Status::TC)) && st.mrq.is_some() {
            done = self.xfer_done(st, had_data).or(done);
        }
        done
    }

    /// Data line error: fail the data phase (or the busy command) and reset
    /// the data state machine.
    fn data_error(&self, st: &mut HostState, err: MmcError) {
        if st.data_active {
            self.dma_cleanup(st, err);
        } else if let Some(req) = st.mrq.as_mut() {
            req.cmd.error = Some(err);
        }
        st.response_busy = false;
        self.reset_fsm(ResetKind::Data);
    }
}
