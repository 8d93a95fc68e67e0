// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Driver core for the OMAP high-speed MMC/SD host controller (HSMMC).
//!
//! The crate owns the interrupt-driven request life-cycle of one controller
//! slot: command issue, data transfer through the system DMA engine or the
//! controller's own descriptor DMA (ADMA), error recovery through the
//! command/data line resets, and the dynamic power state machine.
//!
//! Platform plumbing stays outside. The platform supplies register access
//! ([`HsmmcIo`]), the DMA engine and mapping ([`kdma`]), runtime power and
//! timing services ([`HsmmcPlatform`]) and routes three kinds of events into
//! the host:
//!
//! - controller interrupts to [`HsmmcHost::handle_irq`],
//! - DMA channel completions to [`HsmmcHost::dma_callback`],
//! - card-detect interrupts to [`HsmmcHost::card_detect_irq`], followed by
//!   [`HsmmcHost::run_detect_work`] from a work context.
//!
//! The card stack drives the host through [`mmc_base::MmcHostOps`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod config;
mod detect;
mod dma;
mod host;
mod ios;
mod irq;
mod platform;
mod pm;
mod power;
mod regs;
mod request;
mod reset;

pub use self::{
    config::*,
    dma::{AdmaDescriptor, AdmaTable, DmaMode, adma_attr},
    host::{HostResources, HsmmcHost},
    platform::HsmmcPlatform,
    power::{DpmEvent, DpmState, Transition},
    regs::{HsmmcIo, HsmmcRegisters, MmioRegs, Reg, Status, bits},
    reset::ResetKind,
};
