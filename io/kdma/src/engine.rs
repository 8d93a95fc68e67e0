// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! System DMA controller interface (logical channels).

use bitflags::bitflags;

use crate::{DmaBusAddress, DmaResult};

/// Handle of an allocated logical DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaChannel(pub u32);

/// How an endpoint address evolves during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// Same address for every element, e.g. a device data FIFO.
    Constant,
    /// Address is incremented after every element.
    PostIncrement,
}

/// One side of a channel transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaEndpoint {
    pub addr: DmaBusAddress,
    pub mode: AddrMode,
}

/// Width of one transferred element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// 32-bit words.
    S32,
}

/// Everything needed to arm a channel for one frame-synchronized transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelProgram {
    pub src: DmaEndpoint,
    pub dst: DmaEndpoint,
    pub element: ElementType,
    /// Elements per frame.
    pub frame_elems: u32,
    /// Frames in this transfer.
    pub frames: u32,
    /// Hardware request line that paces the frames.
    pub sync_dev: u32,
    /// `true` when the request line belongs to the source side.
    pub src_sync: bool,
}

bitflags! {
    /// Channel status reported to completion callbacks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelStatus: u16 {
        const DROP       = 1 << 1;
        const HALF_FRAME = 1 << 2;
        const FRAME      = 1 << 3;
        const LAST_FRAME = 1 << 4;
        const BLOCK      = 1 << 5;
        const SYNC       = 1 << 6;
        const TRANS_ERR  = 1 << 8;
    }
}

/// A system DMA controller.
///
/// Completion is reported asynchronously: the platform calls back into
/// the driver that requested the channel with the channel handle and a
/// [`ChannelStatus`].
pub trait DmaEngine: Send + Sync {
    /// Allocates a logical channel paced by the request line `sync_dev`.
    fn request_channel(&self, sync_dev: u32) -> DmaResult<DmaChannel>;

    /// Programs source, destination and transfer parameters.
    fn program(&self, ch: DmaChannel, prog: &ChannelProgram);

    /// Starts a programmed channel.
    fn start(&self, ch: DmaChannel);

    /// Stops and releases a channel.
    fn free_channel(&self, ch: DmaChannel);
}
