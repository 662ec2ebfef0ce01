// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PCCC: the legacy Allen-Bradley command set carried inside CIP service
//! 0x4B against the PCCC object (class 0x67).
//!
//! Frame inside the CIP payload: a requester-id prefix, then
//! `cmd:u8 | sts:u8 | tns:u16 | fnc:u8 | payload`. Replies come back as
//! `0x4F | sts | tns | payload`, with `sts = 0xF0` flagging an extended
//! error byte after the header.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    models::{
        cip::{CipReply, SERVICE_PCCC_EXECUTE},
        epath::{CLASS_PCCC, class_instance_path},
    },
    status::{PlcResult, Status},
};

/// Requester id: length byte, vendor id, vendor serial number. Echoed back
/// verbatim in every reply.
pub const REQUESTER_ID: [u8; 7] = [0x07, 0x3d, 0xf3, 0x45, 0x43, 0x50, 0x21];

/// Protected typed command code used for every request here.
pub const PCCC_TYPED_CMD: u8 = 0x0F;
pub const PCCC_REPLY_CMD: u8 = 0x4F;
pub const PCCC_STS_EXTENDED: u8 = 0xF0;

pub const FNC_PLC5_WORD_RANGE_WRITE: u8 = 0x00;
pub const FNC_PLC5_WORD_RANGE_READ: u8 = 0x01;
pub const FNC_SLC_PROTECTED_TYPED_READ: u8 = 0xA2;
pub const FNC_SLC_PROTECTED_TYPED_WRITE: u8 = 0xAA;

/// Hard bound on the data bytes one PCCC exchange can move.
pub const MAX_PCCC_TRANSFER: usize = 240;

/// Remote PCCC error bytes the test PLC produces.
pub const PCCC_ERR_ADDR_NOT_USABLE: u8 = 0x06;
pub const PCCC_ERR_FILE_WRONG_SIZE: u8 = 0x07;
pub const PCCC_ERR_UNSUPPORTED: u8 = 0x0E;

/// A parsed data-file address like `N7:0`, `F8:10`, `B3:4/2` or `ST18:0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcccAddress {
    /// Data-file type code (N -> 0x89, F -> 0x8A, ...).
    pub file_type: u8,
    pub file_num: u16,
    pub element: u16,
    /// Bit number after `/`, when present.
    pub bit: Option<u8>,
    /// Bytes per element implied by the file letter.
    pub elem_size: u32,
}

/// Map a data-file letter prefix onto (type code, element size).
fn file_letter_info(letters: &str) -> Option<(u8, u32)> {
    match letters {
        "N" => Some((0x89, 2)),
        "F" => Some((0x8A, 4)),
        "B" => Some((0x85, 2)),
        "L" => Some((0x91, 4)),
        "ST" => Some((0x8D, 84)),
        _ => None,
    }
}

/// Parse a PCCC data-file address. Grammar:
/// `<letters><file_num>:<element>[/<bit>]`.
pub fn parse_pccc_address(name: &str) -> PlcResult<PcccAddress> {
    let letters_end =
        name.find(|c: char| !c.is_ascii_alphabetic()).ok_or(Status::BadParam)?;
    let letters = name[..letters_end].to_ascii_uppercase();
    let (file_type, elem_size) =
        file_letter_info(&letters).ok_or(Status::Unsupported)?;

    let rest = &name[letters_end..];
    let (file_str, elem_str) = rest.split_once(':').ok_or(Status::BadParam)?;
    let file_num = file_str.parse::<u16>().map_err(|_| Status::BadParam)?;

    let (elem_str, bit) = match elem_str.split_once('/') {
        Some((e, b)) => {
            let bit = b.parse::<u8>().map_err(|_| Status::BadParam)?;
            if bit > 15 {
                return Err(Status::BadParam);
            }
            (e, Some(bit))
        },
        None => (elem_str, None),
    };
    let element = elem_str.parse::<u16>().map_err(|_| Status::BadParam)?;

    Ok(PcccAddress { file_type, file_num, element, bit, elem_size })
}

fn pccc_header(out: &mut BytesMut, seq: u16, fnc: u8) {
    out.put_u8(PCCC_TYPED_CMD);
    out.put_u8(0); // STS is zero in requests
    out.put_u16_le(seq);
    out.put_u8(fnc);
}

/// SLC/MicroLogix protected typed read: size is in bytes.
pub fn encode_slc_read(seq: u16, addr: &PcccAddress, size_bytes: u8) -> BytesMut {
    let mut out = BytesMut::with_capacity(10);
    pccc_header(&mut out, seq, FNC_SLC_PROTECTED_TYPED_READ);
    out.put_u8(size_bytes);
    out.put_u8(addr.file_num as u8);
    out.put_u8(addr.file_type);
    out.put_u8(addr.element as u8);
    out.put_u8(0); // sub-element
    out
}

pub fn encode_slc_write(seq: u16, addr: &PcccAddress, data: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(10 + data.len());
    pccc_header(&mut out, seq, FNC_SLC_PROTECTED_TYPED_WRITE);
    out.put_u8(data.len() as u8);
    out.put_u8(addr.file_num as u8);
    out.put_u8(addr.file_type);
    out.put_u8(addr.element as u8);
    out.put_u8(0);
    out.put_slice(data);
    out
}

/// PLC5 word-range read: `byte_offset` continues a transfer that did not fit
/// in one exchange, `elem_count` is in elements.
pub fn encode_plc5_read(
    seq: u16,
    addr: &PcccAddress,
    byte_offset: u16,
    elem_count: u16,
) -> BytesMut {
    let mut out = BytesMut::with_capacity(12);
    pccc_header(&mut out, seq, FNC_PLC5_WORD_RANGE_READ);
    out.put_u16_le(byte_offset);
    out.put_u16_le(elem_count);
    out.put_u8(0x06); // address level marker: file + element follow
    out.put_u8(addr.file_num as u8);
    out.put_u8(addr.element as u8);
    out
}

pub fn encode_plc5_write(
    seq: u16,
    addr: &PcccAddress,
    byte_offset: u16,
    elem_count: u16,
    data: &[u8],
) -> BytesMut {
    let mut out = BytesMut::with_capacity(12 + data.len());
    pccc_header(&mut out, seq, FNC_PLC5_WORD_RANGE_WRITE);
    out.put_u16_le(byte_offset);
    out.put_u16_le(elem_count);
    out.put_u8(0x06);
    out.put_u8(addr.file_num as u8);
    out.put_u8(addr.element as u8);
    out.put_slice(data);
    out
}

/// Wrap a PCCC command into the Execute-PCCC CIP request.
pub fn encode_execute_pccc(pccc: &[u8]) -> BytesMut {
    let path = class_instance_path(CLASS_PCCC, 1);
    let mut out = BytesMut::with_capacity(2 + path.len() + REQUESTER_ID.len() + pccc.len());
    out.put_u8(SERVICE_PCCC_EXECUTE);
    out.put_u8((path.len() / 2) as u8);
    out.put_slice(&path);
    out.put_slice(&REQUESTER_ID);
    out.put_slice(pccc);
    out
}

/// Unwrap an Execute-PCCC CIP reply down to the PCCC response bytes.
pub fn decode_execute_pccc_reply(reply: &CipReply) -> PlcResult<Bytes> {
    if reply.service != SERVICE_PCCC_EXECUTE {
        return Err(Status::BadReply);
    }
    reply.check()?;
    let data = &reply.data;
    if data.len() < REQUESTER_ID.len() || data[..REQUESTER_ID.len()] != REQUESTER_ID {
        return Err(Status::BadReply);
    }
    Ok(data.slice(REQUESTER_ID.len()..))
}

/// Parse a PCCC response: check the reply command, sequence echo and status,
/// return the payload after the 4-byte header.
pub fn parse_pccc_reply(pccc: &Bytes, expect_seq: u16) -> PlcResult<Bytes> {
    if pccc.len() < 4 {
        return Err(Status::BadReply);
    }
    if pccc[0] != PCCC_REPLY_CMD {
        return Err(Status::BadReply);
    }
    let sts = pccc[1];
    let seq = u16::from_le_bytes([pccc[2], pccc[3]]);
    if seq != expect_seq {
        return Err(Status::BadReply);
    }
    if sts == PCCC_STS_EXTENDED {
        let ext = pccc.get(4).copied().unwrap_or(0);
        return Err(Status::RemoteErr(ext));
    }
    if sts != 0 {
        return Err(Status::RemoteErr(sts));
    }
    Ok(pccc.slice(4..))
}
