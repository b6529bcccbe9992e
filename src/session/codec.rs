// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The EtherNet/IP encapsulation layer: a fixed 24-byte little-endian
//! header in front of every command/reply, framed as a `zerocopy` struct
//! plus a small builder.

use zerocopy::{
    FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32, U64,
};

use crate::error::{PlcError, PlcResult};

pub const ENCAP_HEADER_LEN: usize = 24;

/// EtherNet/IP encapsulation commands this crate emits or understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncapCommand {
    NopCmd,
    RegisterSession,
    UnregisterSession,
    ListServices,
    SendRrData,
    SendUnitData,
}

impl EncapCommand {
    pub fn code(self) -> u16 {
        match self {
            EncapCommand::NopCmd => 0x0000,
            EncapCommand::RegisterSession => 0x0065,
            EncapCommand::UnregisterSession => 0x0066,
            EncapCommand::ListServices => 0x0004,
            EncapCommand::SendRrData => 0x006F,
            EncapCommand::SendUnitData => 0x0070,
        }
    }

    pub fn from_code(code: u16) -> PlcResult<Self> {
        Ok(match code {
            0x0000 => EncapCommand::NopCmd,
            0x0065 => EncapCommand::RegisterSession,
            0x0066 => EncapCommand::UnregisterSession,
            0x0004 => EncapCommand::ListServices,
            0x006F => EncapCommand::SendRrData,
            0x0070 => EncapCommand::SendUnitData,
            _ => return Err(PlcError::BadData),
        })
    }
}

/// The 24-byte encapsulation header, wire-identical to `libplctag`'s
/// `eip_encap_t`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct EncapHeader {
    pub command: U16<LittleEndian>,
    pub length: U16<LittleEndian>,
    pub session_handle: U32<LittleEndian>,
    pub status: U32<LittleEndian>,
    pub sender_context: U64<LittleEndian>,
    pub options: U32<LittleEndian>,
}

impl EncapHeader {
    pub fn to_bytes(&self, buf: &mut [u8; ENCAP_HEADER_LEN]) {
        buf.copy_from_slice(self.as_bytes());
    }

    pub fn from_bytes(buf: &[u8]) -> PlcResult<Self> {
        Self::read_from_bytes(buf).map_err(|_| PlcError::BadData)
    }

    pub fn status_code(&self) -> u32 {
        self.status.get()
    }

    pub fn is_success(&self) -> bool {
        self.status.get() == 0
    }
}

/// Builds an outbound encapsulation frame: header plus an already-encoded
/// CIP/PCCC command-specific payload.
#[derive(Debug, Default)]
pub struct EncapFrameBuilder {
    header: EncapHeader,
}

impl EncapFrameBuilder {
    pub fn new(command: EncapCommand) -> Self {
        Self {
            header: EncapHeader {
                command: U16::new(command.code()),
                ..Default::default()
            },
        }
    }

    pub fn session_handle(mut self, handle: u32) -> Self {
        self.header.session_handle.set(handle);
        self
    }

    pub fn sender_context(mut self, ctx: u64) -> Self {
        self.header.sender_context.set(ctx);
        self
    }

    pub fn options(mut self, options: u32) -> Self {
        self.header.options.set(options);
        self
    }

    /// Finishes the frame, stamping `length` from the payload size.
    pub fn finish(mut self, payload: &[u8]) -> PlcResult<Vec<u8>> {
        let len: u16 = payload
            .len()
            .try_into()
            .map_err(|_| PlcError::TooLarge)?;
        self.header.length.set(len);

        let mut out = Vec::with_capacity(ENCAP_HEADER_LEN + payload.len());
        out.extend_from_slice(self.header.as_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }
}

/// Splits a received frame into header and payload, validating that the
/// declared `length` matches what's actually available.
pub fn split_frame(buf: &[u8]) -> PlcResult<(EncapHeader, &[u8])> {
    if buf.len() < ENCAP_HEADER_LEN {
        return Err(PlcError::BadData);
    }
    let header = EncapHeader::from_bytes(&buf[..ENCAP_HEADER_LEN])?;
    let declared = header.length.get() as usize;
    let available = &buf[ENCAP_HEADER_LEN..];
    if available.len() < declared {
        return Err(PlcError::Partial);
    }
    Ok((header, &available[..declared]))
}
