// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! DMA bus address types and the platform DMA interfaces used by drivers.
//!
//! Drivers never talk to a DMA controller or the memory system directly.
//! They consume three narrow capabilities supplied by the platform:
//!
//! - [`DmaMapping`]: makes scatter lists visible to devices and hands out
//!   **coherent** memory for descriptor tables.
//! - [`DmaEngine`]: a system DMA controller with numbered logical channels
//!   that move data between memory and a device FIFO.
//! - Completion callbacks, which the platform routes back to the driver
//!   together with a [`ChannelStatus`].
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod engine;

use alloc::vec::Vec;
use core::{alloc::Layout, fmt, ptr::NonNull};

pub use engine::{
    AddrMode, ChannelProgram, ChannelStatus, DmaChannel, DmaEndpoint, DmaEngine, ElementType,
};

/// A bus memory address.
///
/// It's a wrapper type around an [`u64`].
#[repr(transparent)]
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct DmaBusAddress(u64);

impl DmaBusAddress {
    /// Converts an [`u64`] to a bus address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Converts the address to an [`u64`].
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address `offset` bytes past this one.
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl From<u64> for DmaBusAddress {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for DmaBusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DmaBusAddress")
            .field(&format_args!("{:#X}", self.0))
            .finish()
    }
}

/// Represents information related to a coherent DMA allocation.
#[derive(Debug, Clone, Copy)]
pub struct DMAInfo {
    /// The address at which the CPU accesses this memory region.
    pub cpu_addr: NonNull<u8>,
    /// The address of this memory region on the bus, as seen by devices.
    pub bus_addr: DmaBusAddress,
}

// The region is owned by whoever holds the `DMAInfo`.
unsafe impl Send for DMAInfo {}
unsafe impl Sync for DMAInfo {}

/// Direction of a streaming DMA transfer, relative to memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Memory is read by the device.
    ToDevice,
    /// Memory is written by the device.
    FromDevice,
}

/// One contiguous piece of a scatter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterEntry {
    /// Bus address of the first byte.
    pub addr: DmaBusAddress,
    /// Length in bytes.
    pub len: u32,
}

impl ScatterEntry {
    /// Creates a scatter entry.
    pub const fn new(addr: u64, len: u32) -> Self {
        Self {
            addr: DmaBusAddress::new(addr),
            len,
        }
    }
}

/// The error type for DMA resource operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// No free logical channel is left.
    NoChannel,
    /// Coherent memory could not be allocated.
    NoMemory,
    /// Invalid parameter/argument.
    InvalidInput,
}

impl DmaError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            DmaError::NoChannel => "No DMA channel available",
            DmaError::NoMemory => "Not enough DMA memory",
            DmaError::InvalidInput => "Invalid parameter",
        }
    }
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A specialized `Result` type for DMA operations.
pub type DmaResult<T = ()> = Result<T, DmaError>;

/// Streaming mappings and coherent memory, provided by the platform.
pub trait DmaMapping: Send + Sync {
    /// Makes `sg` accessible to the device for a transfer in `dir`.
    ///
    /// Returns the list as the device sees it. It may hold fewer entries
    /// than `sg` when the platform merges contiguous ranges, but it covers
    /// the same bytes.
    fn map_sg(&self, sg: &[ScatterEntry], dir: DmaDirection) -> DmaResult<Vec<ScatterEntry>>;

    /// Ends a streaming mapping created by [`DmaMapping::map_sg`]. `sg` is
    /// the list that was passed to `map_sg`.
    fn unmap_sg(&self, sg: &[ScatterEntry], dir: DmaDirection);

    /// Allocates **coherent** memory that meets DMA requirements.
    ///
    /// # Safety
    ///
    /// The returned region must be released with
    /// [`DmaMapping::dealloc_coherent`] using the same `layout`.
    unsafe fn alloc_coherent(&self, layout: Layout) -> DmaResult<DMAInfo>;

    /// Frees coherent memory previously allocated.
    ///
    /// # Safety
    ///
    /// `dma` must come from [`DmaMapping::alloc_coherent`] with `layout`,
    /// and must not be accessed afterwards.
    unsafe fn dealloc_coherent(&self, dma: DMAInfo, layout: Layout);
}
