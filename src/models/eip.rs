// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! EtherNet/IP encapsulation framing.
//!
//! Every frame on the TCP stream starts with this 24-byte header:
//!
//! ```text
//! command:u16 | length:u16 | session_handle:u32 | status:u32
//! | sender_context:u64 | options:u32
//! ```
//!
//! followed by `length` payload bytes. All fields little-endian.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use zerocopy::{
    FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32,
    U64,
};

use crate::status::{PlcResult, Status};

pub const EIP_HEADER_LEN: usize = 24;

/// Protocol version sent in Register Session; the only one that exists.
pub const EIP_VERSION: u16 = 1;

/// Encapsulation commands used by this library.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EipCommand {
    RegisterSession = 0x0065,
    UnregisterSession = 0x0066,
    /// Unconnected request/reply (CPF with a null address item).
    SendRrData = 0x006F,
    /// Connected request/reply (CPF with a connected address item).
    SendUnitData = 0x0070,
}

#[derive(Debug, Error)]
#[error("unknown EIP command 0x{0:04x}")]
pub struct UnknownCommand(pub u16);

impl TryFrom<u16> for EipCommand {
    type Error = UnknownCommand;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0x0065 => Ok(EipCommand::RegisterSession),
            0x0066 => Ok(EipCommand::UnregisterSession),
            0x006F => Ok(EipCommand::SendRrData),
            0x0070 => Ok(EipCommand::SendUnitData),
            other => Err(UnknownCommand(other)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct EipHeader {
    pub command: U16<LittleEndian>,
    pub length: U16<LittleEndian>,
    pub session_handle: U32<LittleEndian>,
    pub status: U32<LittleEndian>,
    pub sender_context: U64<LittleEndian>,
    pub options: U32<LittleEndian>,
}

impl EipHeader {
    pub fn new(
        command: EipCommand,
        session_handle: u32,
        sender_context: u64,
        payload_len: usize,
    ) -> Self {
        EipHeader {
            command: U16::new(command as u16),
            length: U16::new(payload_len as u16),
            session_handle: U32::new(session_handle),
            status: U32::new(0),
            sender_context: U64::new(sender_context),
            options: U32::new(0),
        }
    }

    pub fn parse(buf: &[u8]) -> PlcResult<&EipHeader> {
        let raw = buf.get(..EIP_HEADER_LEN).ok_or(Status::TooSmall)?;
        EipHeader::ref_from_bytes(raw).map_err(|_| Status::BadReply)
    }

    pub fn command(&self) -> Result<EipCommand, UnknownCommand> {
        EipCommand::try_from(self.command.get())
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.length.get() as usize
    }
}

/// A complete encapsulation frame as pulled off the stream.
#[derive(Debug, Clone)]
pub struct EipFrame {
    pub header: EipHeader,
    pub payload: Bytes,
}

/// Serialize a header + payload into one contiguous buffer for a single
/// `write_all`.
pub fn encode_frame(
    command: EipCommand,
    session_handle: u32,
    sender_context: u64,
    payload: &[u8],
) -> BytesMut {
    let header = EipHeader::new(command, session_handle, sender_context, payload.len());
    let mut out = BytesMut::with_capacity(EIP_HEADER_LEN + payload.len());
    out.put_slice(header.as_bytes());
    out.put_slice(payload);
    out
}

/// Register Session request payload: requested version and option flags.
pub fn register_session_payload() -> [u8; 4] {
    let mut out = [0u8; 4];
    out[..2].copy_from_slice(&EIP_VERSION.to_le_bytes());
    out
}

/// Validate a Register Session reply payload (version echo).
pub fn check_register_reply(header: &EipHeader, payload: &[u8]) -> PlcResult<u32> {
    if header.status.get() != 0 {
        return Err(Status::BadStatus {
            general: header.status.get() as u8,
            extended: 0,
        });
    }
    if payload.len() < 4 {
        return Err(Status::BadReply);
    }
    let version = u16::from_le_bytes([payload[0], payload[1]]);
    if version != EIP_VERSION {
        return Err(Status::BadReply);
    }
    let handle = header.session_handle.get();
    if handle == 0 {
        return Err(Status::BadReply);
    }
    Ok(handle)
}
