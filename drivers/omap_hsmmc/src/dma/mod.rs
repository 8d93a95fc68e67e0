// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Data transfer strategies and DMA bookkeeping.
//!
//! [`DmaMode::Sdma`] runs one mapped segment at a time on a system DMA
//! channel and re-arms the channel from its completion callback.
//! [`DmaMode::Adma`] hands the controller a descriptor table built before
//! the command is issued.
//!
//! The channel handle in [`HostState`] decides who completes a data
//! request: whichever of the interrupt path and the channel callback sees
//! the other side finished reports the request, both under the state lock.
//! Channels and mappings given up under the lock are parked in a
//! [`DmaRelease`] and handed back to the platform once the lock is dropped.

mod adma;
mod sdma;

use alloc::vec::Vec;
use core::sync::atomic::{Ordering, fence};

use kdma::{ChannelStatus, DmaBusAddress, DmaChannel, DmaDirection, ScatterEntry};
use log::{debug, error, warn};
use mmc_base::{MmcData, MmcError, MmcResult};

pub use self::adma::{AdmaDescriptor, AdmaTable, adma_attr};
use crate::{
    host::{HostState, HsmmcHost},
    regs::{HsmmcIo, Reg},
};

/// Transfer strategy, fixed at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaMode {
    /// System DMA engine, one segment in flight.
    Sdma,
    /// Controller-walked descriptor table.
    Adma,
}

/// DMA resources to hand back once the state lock is dropped.
#[derive(Debug, Default)]
pub(crate) struct DmaRelease {
    channel: Option<DmaChannel>,
    /// Scatter list as passed to `map_sg`.
    unmap: Option<(Vec<ScatterEntry>, DmaDirection)>,
}

pub(crate) fn direction(data: &MmcData) -> DmaDirection {
    if data.is_read() {
        DmaDirection::FromDevice
    } else {
        DmaDirection::ToDevice
    }
}

/// Parks the streaming mapping of the current data phase for release.
/// Runs at most once per data phase.
fn release_mapping(st: &mut HostState) {
    if st.dma_sg.take().is_none() {
        return;
    }
    if let Some(data) = st.mrq.as_ref().and_then(|req| req.data.as_ref()) {
        st.release.unmap = Some((data.sg.clone(), direction(data)));
    }
}

impl<R: HsmmcIo> HsmmcHost<R> {
    fn fifo_addr(&self) -> DmaBusAddress {
        DmaBusAddress::new(self.config.phys_base + Reg::Data.offset() as u64)
    }

    fn sync_dev(&self, data: &MmcData) -> u32 {
        if data.is_read() {
            self.config.dma_line_rx
        } else {
            self.config.dma_line_tx
        }
    }

    /// Arms the transfer strategy for the data phase of the current request.
    pub(crate) fn start_dma(&self, st: &mut HostState) -> MmcResult {
        let result = match st.dma_mode {
            DmaMode::Sdma => self.start_sdma(st),
            DmaMode::Adma => self.start_adma(st),
        };
        if let Err(err) = result {
            debug!("{}: MMC start dma failure: {err}", self.name());
        }
        result
    }

    fn start_sdma(&self, st: &mut HostState) -> MmcResult {
        let data = st
            .mrq
            .as_ref()
            .and_then(|req| req.data.as_ref())
            .ok_or(MmcError::BadState)?;

        sdma::validate(data, &data.sg)?;
        assert!(st.dma_ch.is_none(), "{}: DMA channel already active", self.name());

        let ch = self.dma.request_channel(self.sync_dev(data)).inspect_err(|err| {
            error!("{}: DMA channel request failed: {err}", self.name());
        })?;

        let dir = direction(data);
        let mapped = match self.mapping.map_sg(&data.sg, dir) {
            Ok(mapped) => mapped,
            Err(err) => {
                st.release.channel = Some(ch);
                return Err(err.into());
            }
        };
        let first = match sdma::validate(data, &mapped).map(|()| mapped.first()) {
            Ok(Some(seg)) => *seg,
            Ok(None) | Err(_) => {
                warn!(
                    "{}: mapped list does not cover {} bytes in whole blocks",
                    self.name(),
                    data.len()
                );
                st.release.unmap = Some((data.sg.clone(), dir));
                st.release.channel = Some(ch);
                return Err(MmcError::InvalidInput);
            }
        };

        self.program_segment(ch, data, &first);
        st.dma_ch = Some(ch);
        st.dma_sg_idx = 0;
        st.dma_sg = Some(mapped);
        Ok(())
    }

    fn program_segment(&self, ch: DmaChannel, data: &MmcData, seg: &ScatterEntry) {
        let prog = sdma::channel_program(data, seg, self.fifo_addr(), self.sync_dev(data));
        self.dma.program(ch, &prog);
        self.dma.start(ch);
    }

    fn start_adma(&self, st: &mut HostState) -> MmcResult {
        let HostState {
            mrq,
            adma,
            dma_sg,
            release,
            ..
        } = st;
        let data = mrq
            .as_ref()
            .and_then(|req| req.data.as_ref())
            .ok_or(MmcError::BadState)?;
        let table = adma.as_mut().ok_or(MmcError::BadState)?;

        let dir = direction(data);
        let mapped = self.mapping.map_sg(&data.sg, dir)?;
        let fill = table.fill(&mapped).and_then(|fill| {
            if fill.bytes == u64::from(data.len()) {
                Ok(fill)
            } else {
                error!(
                    "{}: ADMA table covers {} bytes, request has {}",
                    self.name(),
                    fill.bytes,
                    data.len()
                );
                Err(MmcError::InvalidInput)
            }
        });
        let fill = match fill {
            Ok(fill) => fill,
            Err(err) => {
                release.unmap = Some((data.sg.clone(), dir));
                return Err(err);
            }
        };
        debug!(
            "{}: ADMA table has {} entries from {} sglist",
            self.name(),
            fill.entries,
            mapped.len()
        );
        *dma_sg = Some(mapped);

        // Descriptors must be visible before the controller fetches them.
        fence(Ordering::SeqCst);
        self.regs.write(Reg::AdmaSal, table.bus_addr().as_u64() as u32);
        Ok(())
    }

    /// Tears down the data phase after an error: records `err` and parks the
    /// channel and the mapping for release.
    pub(crate) fn dma_cleanup(&self, st: &mut HostState, err: MmcError) {
        release_mapping(st);
        if let Some(ch) = st.dma_ch.take() {
            st.release.channel = Some(ch);
        }
        if let Some(data) = st.mrq.as_mut().and_then(|req| req.data.as_mut()) {
            data.error = Some(err);
        }
        st.data_active = false;
    }

    /// Parks the mapping behind the descriptor table once the controller is
    /// done with it.
    pub(crate) fn adma_unmap(&self, st: &mut HostState) {
        if st.dma_mode == DmaMode::Adma {
            release_mapping(st);
        }
    }

    /// Hands back whatever the last locked section gave up.
    pub(crate) fn release_dma(&self, release: DmaRelease) {
        if let Some((sg, dir)) = release.unmap {
            self.mapping.unmap_sg(&sg, dir);
        }
        if let Some(ch) = release.channel {
            self.dma.free_channel(ch);
        }
    }

    /// Completion callback of the system DMA channel.
    ///
    /// Advances to the next mapped segment, or releases the channel and
    /// completes the request if the controller has already reported the
    /// transfer done.
    pub fn dma_callback(&self, ch: DmaChannel, status: ChannelStatus) {
        if !status.contains(ChannelStatus::BLOCK) {
            warn!("{}: unexpected dma status {:#x}", self.name(), status.bits());
            return;
        }

        let (done, release) = {
            let mut st = self.state.lock();
            if st.dma_ch != Some(ch) {
                return;
            }

            st.dma_sg_idx += 1;
            let idx = st.dma_sg_idx;
            let next = st.dma_sg.as_ref().and_then(|sg| sg.get(idx)).copied();
            if let Some(seg) = next {
                if let Some(data) = st.mrq.as_ref().and_then(|req| req.data.as_ref()) {
                    self.program_segment(ch, data, &seg);
                }
                return;
            }

            release_mapping(&mut st);
            st.dma_ch = None;
            st.release.channel = Some(ch);
            let done = if st.req_in_progress {
                None
            } else {
                st.mrq.take()
            };
            (done, core::mem::take(&mut st.release))
        };

        self.release_dma(release);

        if let Some(req) = done {
            self.core.request_done(req);
        }
    }

    /// Copy of the descriptor rows built for the last ADMA transfer.
    pub fn adma_descriptors(&self) -> Vec<AdmaDescriptor> {
        self.state
            .lock()
            .adma
            .as_ref()
            .map(AdmaTable::snapshot)
            .unwrap_or_default()
    }
}
