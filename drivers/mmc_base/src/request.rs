// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Requests exchanged between the card stack and a host driver.

use alloc::vec::Vec;

use bitflags::bitflags;
use kdma::ScatterEntry;

use crate::MmcError;

/// Command opcodes a host driver needs to recognize.
pub mod opcode {
    pub const GO_IDLE_STATE: u32 = 0;
    pub const SWITCH: u32 = 6;
    pub const STOP_TRANSMISSION: u32 = 12;
    pub const SEND_STATUS: u32 = 13;
    pub const READ_SINGLE_BLOCK: u32 = 17;
    pub const READ_MULTIPLE_BLOCK: u32 = 18;
    pub const SET_BLOCK_COUNT: u32 = 23;
    pub const WRITE_BLOCK: u32 = 24;
    pub const WRITE_MULTIPLE_BLOCK: u32 = 25;
    pub const ERASE: u32 = 38;
}

/// Whether `op` opens a multi-block transfer.
pub const fn op_multi(op: u32) -> bool {
    op == opcode::READ_MULTIPLE_BLOCK || op == opcode::WRITE_MULTIPLE_BLOCK
}

bitflags! {
    /// Expected response of a command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResponseFlags: u32 {
        const PRESENT = 1 << 0;
        /// 136-bit response.
        const LONG    = 1 << 1;
        const CRC     = 1 << 2;
        /// The card signals busy on DAT0 after the response.
        const BUSY    = 1 << 3;
        const OPCODE  = 1 << 4;

        const R1  = Self::PRESENT.bits() | Self::CRC.bits() | Self::OPCODE.bits();
        const R1B = Self::R1.bits() | Self::BUSY.bits();
        const R2  = Self::PRESENT.bits() | Self::LONG.bits() | Self::CRC.bits();
        const R3  = Self::PRESENT.bits();
    }
}

bitflags! {
    /// Direction of a data phase.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataFlags: u32 {
        const WRITE = 1 << 8;
        const READ  = 1 << 9;
    }
}

/// A single command and, once done, its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmcCommand {
    pub opcode: u32,
    pub arg: u32,
    pub flags: ResponseFlags,
    /// Response words, `resp[0]` holds the most significant bits.
    pub resp: [u32; 4],
    pub retries: u32,
    pub error: Option<MmcError>,
}

impl MmcCommand {
    pub fn new(opcode: u32, arg: u32, flags: ResponseFlags) -> Self {
        Self {
            opcode,
            arg,
            flags,
            resp: [0; 4],
            retries: 0,
            error: None,
        }
    }
}

/// The bulk-data phase of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmcData {
    pub blksz: u32,
    pub blocks: u32,
    pub flags: DataFlags,
    pub sg: Vec<ScatterEntry>,
    /// Data timeout in nanoseconds, added to `timeout_clks`.
    pub timeout_ns: u32,
    /// Data timeout in card clock cycles.
    pub timeout_clks: u32,
    pub bytes_xfered: u32,
    pub error: Option<MmcError>,
}

impl MmcData {
    pub fn new(blksz: u32, blocks: u32, flags: DataFlags, sg: Vec<ScatterEntry>) -> Self {
        Self {
            blksz,
            blocks,
            flags,
            sg,
            timeout_ns: 0,
            timeout_clks: 0,
            bytes_xfered: 0,
            error: None,
        }
    }

    pub fn is_read(&self) -> bool {
        self.flags.contains(DataFlags::READ)
    }

    /// Total bytes the data phase moves.
    pub fn len(&self) -> u32 {
        self.blksz * self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One unit of work: optional set-block-count, the command, optional data
/// and optional stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmcRequest {
    pub sbc: Option<MmcCommand>,
    pub cmd: MmcCommand,
    pub data: Option<MmcData>,
    pub stop: Option<MmcCommand>,
}

impl MmcRequest {
    /// A command-only request.
    pub fn command(cmd: MmcCommand) -> Self {
        Self {
            sbc: None,
            cmd,
            data: None,
            stop: None,
        }
    }

    /// A request with a data phase.
    pub fn with_data(cmd: MmcCommand, data: MmcData) -> Self {
        Self {
            sbc: None,
            cmd,
            data: Some(data),
            stop: None,
        }
    }

    /// The first error recorded on any part of the request.
    pub fn error(&self) -> Option<MmcError> {
        self.sbc
            .as_ref()
            .and_then(|c| c.error)
            .or(self.cmd.error)
            .or(self.data.as_ref().and_then(|d| d.error))
            .or(self.stop.as_ref().and_then(|c| c.error))
    }
}
