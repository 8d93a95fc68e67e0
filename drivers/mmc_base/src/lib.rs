// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Common traits and types for MMC/SD host controller drivers.
//!
//! A host driver sits between a card stack (which knows the MMC/SD command
//! set) and a controller. The card stack hands the driver one
//! [`MmcRequest`] at a time through [`MmcHostOps::request`] and is told
//! about its completion through [`MmcCore::request_done`]. Everything the
//! driver needs from the card stack is gathered in [`MmcCore`]; optional
//! board capabilities such as a supply [`Regulator`] are passed in
//! separately so that drivers can check for their presence.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod host;
mod ios;
mod request;

use kdma::DmaError;

pub use self::{
    host::{HostCaps, HostLimits, MmcCore, Regulator},
    ios::{BusMode, BusWidth, MmcIos, PowerMode, Timing, vdd},
    request::{DataFlags, MmcCommand, MmcData, MmcRequest, ResponseFlags, op_multi, opcode},
};

/// All supported device kinds.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceKind {
    /// MMC/SD/SDIO host controller.
    Mmc,
}

/// The error type for MMC host operation failures.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MmcError {
    /// The card or controller did not answer in time.
    TimedOut,
    /// CRC or end-bit error on the command or data lines.
    IllegalSequence,
    /// The card has been removed.
    NoMedium,
    /// The slot cover is open, access is blocked.
    CardProtected,
    /// Input/output error.
    Io,
    /// Invalid parameter/argument.
    InvalidInput,
    /// Not enough space/cannot allocate memory (DMA).
    NoMemory,
    /// Device or resource is busy.
    ResourceBusy,
    /// Bad internal state.
    BadState,
    /// The controller rejected a DMA descriptor.
    AdmaDescriptor,
}

impl MmcError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            MmcError::TimedOut => "Timed out",
            MmcError::IllegalSequence => "Illegal byte sequence",
            MmcError::NoMedium => "No medium found",
            MmcError::CardProtected => "Card access blocked",
            MmcError::Io => "Input/output error",
            MmcError::InvalidInput => "Invalid parameter",
            MmcError::NoMemory => "Not enough memory",
            MmcError::ResourceBusy => "Resource is busy",
            MmcError::BadState => "Bad state",
            MmcError::AdmaDescriptor => "DMA descriptor error",
        }
    }
}

impl core::fmt::Display for MmcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

impl From<DmaError> for MmcError {
    fn from(err: DmaError) -> Self {
        match err {
            DmaError::NoChannel => MmcError::ResourceBusy,
            DmaError::NoMemory => MmcError::NoMemory,
            DmaError::InvalidInput => MmcError::InvalidInput,
        }
    }
}

/// A specialized `Result` type for MMC host operations.
pub type MmcResult<T = ()> = Result<T, MmcError>;

/// Common operations that require all device drivers to implement.
pub trait DriverOps: Send + Sync {
    /// The name of the device.
    fn name(&self) -> &str;

    /// The kind of the device.
    fn device_kind(&self) -> DeviceKind;

    /// The IRQ number of the device, if applicable.
    fn irq(&self) -> Option<usize> {
        None
    }
}

/// Operations that an MMC host controller driver provides to the card stack.
pub trait MmcHostOps: DriverOps {
    /// Starts `req`. Completion is reported through [`MmcCore::request_done`].
    fn request(&self, req: MmcRequest);

    /// Applies bus settings: clock, width, voltage, power mode and timing.
    fn set_ios(&self, ios: &MmcIos);

    /// Returns card presence, or `None` if the slot cannot tell.
    fn get_cd(&self) -> Option<bool>;

    /// Returns the write-protect state, or `None` if the slot cannot tell.
    fn get_ro(&self) -> Option<bool>;

    /// Brings the host out of its low-power state.
    fn enable(&self) -> MmcResult<u32>;

    /// Lets the host enter a lower-power state.
    ///
    /// Returns the delay in milliseconds after which the card stack should
    /// call again to go one level deeper, or `0` to stop.
    fn disable(&self, lazy: bool) -> MmcResult<u32>;
}
