// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! System DMA: one scatter segment per channel program.

use kdma::{AddrMode, ChannelProgram, DmaBusAddress, DmaEndpoint, ElementType, ScatterEntry};
use mmc_base::{MmcData, MmcError, MmcResult};

/// Checks that `sg` covers the data phase exactly, that every segment is a
/// whole number of blocks and that blocks are made of 32-bit words.
pub(crate) fn validate(data: &MmcData, sg: &[ScatterEntry]) -> MmcResult {
    if sg.is_empty() || data.blksz == 0 {
        return Err(MmcError::InvalidInput);
    }
    if sg.iter().any(|seg| seg.len % data.blksz != 0) {
        return Err(MmcError::InvalidInput);
    }
    // The data FIFO only advances on a full word.
    if data.blksz % 4 != 0 {
        return Err(MmcError::InvalidInput);
    }
    let total: u64 = sg.iter().map(|seg| u64::from(seg.len)).sum();
    if total != u64::from(data.blksz) * u64::from(data.blocks) {
        return Err(MmcError::InvalidInput);
    }
    Ok(())
}

/// Channel parameters moving `seg` between memory and the data FIFO.
pub(crate) fn channel_program(
    data: &MmcData,
    seg: &ScatterEntry,
    fifo: DmaBusAddress,
    sync_dev: u32,
) -> ChannelProgram {
    let mem = DmaEndpoint {
        addr: seg.addr,
        mode: AddrMode::PostIncrement,
    };
    let dev = DmaEndpoint {
        addr: fifo,
        mode: AddrMode::Constant,
    };
    let read = data.is_read();
    let (src, dst) = if read { (dev, mem) } else { (mem, dev) };
    ChannelProgram {
        src,
        dst,
        element: ElementType::S32,
        frame_elems: data.blksz / 4,
        frames: seg.len / data.blksz,
        sync_dev,
        src_sync: read,
    }
}
