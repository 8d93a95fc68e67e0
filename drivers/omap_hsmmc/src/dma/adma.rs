// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! ADMA2 descriptor table.

use alloc::vec::Vec;
use core::alloc::Layout;

use kdma::{DMAInfo, DmaBusAddress, DmaMapping, ScatterEntry};
use mmc_base::{MmcError, MmcResult};

use crate::config::{ADMA_MAX_XFER_PER_ROW, DMA_TABLE_NUM_ENTRIES};

/// Descriptor attribute bits.
pub mod adma_attr {
    pub const VALID: u16 = 1 << 0;
    /// Last descriptor of the table.
    pub const END: u16 = 1 << 1;
    /// Transfer data.
    pub const TRAN: u16 = 1 << 5;
}

/// One row of the table, as the controller reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmaDescriptor {
    pub attr: u16,
    pub len: u16,
    pub addr: u32,
}

/// Rows written and bytes covered by one table build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdmaFill {
    pub entries: usize,
    pub bytes: u64,
}

/// Writes one descriptor per [`ADMA_MAX_XFER_PER_ROW`] chunk of every
/// segment and marks the last one with [`adma_attr::END`].
///
/// Zero-length segments produce no rows. Fails with
/// [`MmcError::InvalidInput`] if the list is empty, does not fit in
/// `table`, or reaches above 4 GiB.
pub(crate) fn populate(
    table: &mut [AdmaDescriptor],
    sg: &[ScatterEntry],
) -> MmcResult<AdmaFill> {
    let mut entries = 0;
    let mut bytes = 0;

    for seg in sg {
        bytes += u64::from(seg.len);
        let mut off = 0;
        while off < seg.len {
            let chunk = (seg.len - off).min(ADMA_MAX_XFER_PER_ROW);
            let addr = u32::try_from(seg.addr.as_u64() + u64::from(off))
                .map_err(|_| MmcError::InvalidInput)?;
            let row = table.get_mut(entries).ok_or(MmcError::InvalidInput)?;
            *row = AdmaDescriptor {
                attr: adma_attr::TRAN | adma_attr::VALID,
                len: chunk as u16,
                addr,
            };
            entries += 1;
            off += chunk;
        }
    }

    let last = entries
        .checked_sub(1)
        .and_then(|i| table.get_mut(i))
        .ok_or(MmcError::InvalidInput)?;
    last.attr |= adma_attr::END;

    Ok(AdmaFill { entries, bytes })
}

/// The descriptor table in coherent memory, allocated once per host.
pub struct AdmaTable {
    info: DMAInfo,
    used: usize,
}

impl AdmaTable {
    fn layout() -> MmcResult<Layout> {
        Layout::array::<AdmaDescriptor>(DMA_TABLE_NUM_ENTRIES).map_err(|_| MmcError::NoMemory)
    }

    pub(crate) fn alloc(mapping: &dyn DmaMapping) -> MmcResult<Self> {
        let layout = Self::layout()?;
        // SAFETY: released in `free` with the same layout.
        let info = unsafe { mapping.alloc_coherent(layout) }?;
        // SAFETY: `info` points to `layout.size()` bytes owned by this table.
        unsafe { info.cpu_addr.as_ptr().write_bytes(0, layout.size()) };
        Ok(Self { info, used: 0 })
    }

    pub(crate) fn free(self, mapping: &dyn DmaMapping) {
        if let Ok(layout) = Self::layout() {
            // SAFETY: `info` came from `alloc` with this layout and the table
            // is consumed.
            unsafe { mapping.dealloc_coherent(self.info, layout) };
        }
    }

    /// Bus address the controller fetches descriptors from.
    pub fn bus_addr(&self) -> DmaBusAddress {
        self.info.bus_addr
    }

    fn rows_mut(&mut self) -> &mut [AdmaDescriptor] {
        // SAFETY: the region holds `DMA_TABLE_NUM_ENTRIES` descriptors, is
        // suitably aligned by `layout` and is borrowed mutably through `self`.
        unsafe {
            core::slice::from_raw_parts_mut(
                self.info.cpu_addr.as_ptr().cast::<AdmaDescriptor>(),
                DMA_TABLE_NUM_ENTRIES,
            )
        }
    }

    /// Rows written by the last build.
    pub fn descriptors(&self) -> &[AdmaDescriptor] {
        // SAFETY: `used` never exceeds the table capacity and every row below
        // it was written by `fill`.
        unsafe {
            core::slice::from_raw_parts(
                self.info.cpu_addr.as_ptr().cast::<AdmaDescriptor>(),
                self.used,
            )
        }
    }

    pub(crate) fn fill(&mut self, sg: &[ScatterEntry]) -> MmcResult<AdmaFill> {
        self.used = 0;
        let fill = populate(self.rows_mut(), sg)?;
        self.used = fill.entries;
        Ok(fill)
    }

    pub(crate) fn snapshot(&self) -> Vec<AdmaDescriptor> {
        self.descriptors().to_vec()
    }
}
