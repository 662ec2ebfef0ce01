// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CIP service frames: the innermost request/reply layer.
//!
//! Request: `service:u8 | path_words:u8 | path | service-specific`.
//! Reply: `service|0x80 | reserved:0 | general_status:u8 |
//! ext_status_words:u8 | ext_status | data`.
//!
//! General status 0x06 ("partial transfer") is not an error: it tells the
//! fragmentation engine more fragments follow.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    models::epath::{CLASS_MESSAGE_ROUTER, class_instance_path},
    status::{PlcResult, Status},
    wire::WireView,
};

pub const SERVICE_GET_ATTR_LIST: u8 = 0x03;
pub const SERVICE_MULTIPLE: u8 = 0x0A;
pub const SERVICE_PCCC_EXECUTE: u8 = 0x4B;
pub const SERVICE_READ_TAG: u8 = 0x4C;
pub const SERVICE_WRITE_TAG: u8 = 0x4D;
pub const SERVICE_FORWARD_CLOSE: u8 = 0x4E;
pub const SERVICE_READ_TAG_FRAG: u8 = 0x52;
pub const SERVICE_WRITE_TAG_FRAG: u8 = 0x53;
pub const SERVICE_FORWARD_OPEN: u8 = 0x54;
pub const SERVICE_GET_INSTANCE_ATTR_LIST: u8 = 0x55;
pub const SERVICE_FORWARD_OPEN_EX: u8 = 0x5B;

pub const REPLY_MASK: u8 = 0x80;

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_PATH_SEGMENT_ERROR: u8 = 0x04;
pub const STATUS_PARTIAL: u8 = 0x06;
pub const STATUS_UNSUPPORTED: u8 = 0x08;
pub const STATUS_EXTENDED: u8 = 0xFF;

pub const EXT_STATUS_TOO_LONG: u16 = 0x2105;

fn push_path(out: &mut BytesMut, path: &[u8]) {
    debug_assert!(path.len() % 2 == 0, "EPATH must be 16-bit aligned");
    out.put_u8((path.len() / 2) as u8);
    out.put_slice(path);
}

pub fn encode_read(path: &[u8], elem_count: u16) -> BytesMut {
    let mut out = BytesMut::with_capacity(4 + path.len());
    out.put_u8(SERVICE_READ_TAG);
    push_path(&mut out, path);
    out.put_u16_le(elem_count);
    out
}

pub fn encode_read_frag(path: &[u8], elem_count: u16, byte_offset: u32) -> BytesMut {
    let mut out = BytesMut::with_capacity(8 + path.len());
    out.put_u8(SERVICE_READ_TAG_FRAG);
    push_path(&mut out, path);
    out.put_u16_le(elem_count);
    out.put_u32_le(byte_offset);
    out
}

pub fn encode_write(path: &[u8], data_type: u16, elem_count: u16, data: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(6 + path.len() + data.len());
    out.put_u8(SERVICE_WRITE_TAG);
    push_path(&mut out, path);
    out.put_u16_le(data_type);
    out.put_u16_le(elem_count);
    out.put_slice(data);
    out
}

pub fn encode_write_frag(
    path: &[u8],
    data_type: u16,
    elem_count: u16,
    byte_offset: u32,
    data: &[u8],
) -> BytesMut {
    let mut out = BytesMut::with_capacity(10 + path.len() + data.len());
    out.put_u8(SERVICE_WRITE_TAG_FRAG);
    push_path(&mut out, path);
    out.put_u16_le(data_type);
    out.put_u16_le(elem_count);
    out.put_u32_le(byte_offset);
    out.put_slice(data);
    out
}

/// Get Instance Attribute List request against a class/instance target,
/// used for the `@tags` / `@udt` listings.
pub fn encode_instance_attr_list(class: u16, instance: u16, attrs: &[u16]) -> BytesMut {
    let path = class_instance_path(class, instance);
    let mut out = BytesMut::with_capacity(4 + path.len() + attrs.len() * 2);
    out.put_u8(SERVICE_GET_INSTANCE_ATTR_LIST);
    push_path(&mut out, &path);
    out.put_u16_le(attrs.len() as u16);
    for a in attrs {
        out.put_u16_le(*a);
    }
    out
}

/// Fixed byte overhead of a Read/Write Tag request around the EPATH and the
/// payload: service + path size + type + count + offset. Used by the packer
/// and the fragmentation engine for capacity math.
pub const WRITE_REQ_OVERHEAD: usize = 10;
pub const READ_REPLY_OVERHEAD: usize = 6;

/// Parsed CIP reply.
#[derive(Debug, Clone)]
pub struct CipReply {
    /// Request service with the reply bit stripped.
    pub service: u8,
    pub general_status: u8,
    pub extended_status: u16,
    pub data: Bytes,
}

impl CipReply {
    pub fn parse(buf: Bytes) -> PlcResult<CipReply> {
        let mut v = WireView::new(&buf);
        let service = v.get_u8(0);
        let reserved = v.get_u8(1);
        let general_status = v.get_u8(2);
        let ext_words = v.get_u8(3) as usize;
        if !v.ok() {
            return Err(Status::BadReply);
        }
        if service & REPLY_MASK == 0 || reserved != 0 {
            return Err(Status::BadReply);
        }
        let data_start = 4 + ext_words * 2;
        if buf.len() < data_start {
            return Err(Status::BadReply);
        }
        let extended_status =
            if ext_words > 0 { v.get_u16_le(4) } else { 0 };
        Ok(CipReply {
            service: service & !REPLY_MASK,
            general_status,
            extended_status,
            data: buf.slice(data_start..),
        })
    }

    #[inline]
    pub fn is_partial(&self) -> bool {
        self.general_status == STATUS_PARTIAL
    }

    /// Error-check the reply. Partial (0x06) passes: the caller decides
    /// whether another fragment round is due.
    pub fn check(&self) -> PlcResult<()> {
        match self.general_status {
            STATUS_OK | STATUS_PARTIAL => Ok(()),
            general => Err(Status::BadStatus { general, extended: self.extended_status }),
        }
    }

    /// Split a Read Tag reply payload into `(cip type, element bytes)`.
    pub fn read_payload(&self) -> PlcResult<(u16, Bytes)> {
        if self.data.len() < 2 {
            return Err(Status::NoData);
        }
        let ty = u16::from_le_bytes([self.data[0], self.data[1]]);
        Ok((ty, self.data.slice(2..)))
    }
}

/// Build a Multiple Service Packet from already-encoded sub-requests. The
/// embedded path targets the message router.
pub fn encode_multi_service(requests: &[BytesMut]) -> BytesMut {
    let path = class_instance_path(CLASS_MESSAGE_ROUTER, 1);
    let count = requests.len();
    let table_len = 2 + 2 * count;
    let body_len: usize = requests.iter().map(|r| r.len()).sum();

    let mut out = BytesMut::with_capacity(2 + path.len() + table_len + body_len);
    out.put_u8(SERVICE_MULTIPLE);
    push_path(&mut out, &path);
    out.put_u16_le(count as u16);
    let mut offset = table_len;
    for r in requests {
        out.put_u16_le(offset as u16);
        offset += r.len();
    }
    for r in requests {
        out.put_slice(r);
    }
    out
}

/// Wire size of a Multiple Service Packet holding the given sub-requests.
pub fn multi_service_len(request_lens: &[usize]) -> usize {
    // service + path size byte + 4-byte router path + count + offset table
    6 + 2 + 2 * request_lens.len() + request_lens.iter().sum::<usize>()
}

/// Split a Multiple Service Packet reply into its sub-replies, in request
/// order.
pub fn decode_multi_reply(reply: &CipReply) -> PlcResult<Vec<Bytes>> {
    if reply.service != SERVICE_MULTIPLE {
        return Err(Status::BadReply);
    }
    let data = &reply.data;
    let mut v = WireView::new(data);
    let count = v.get_u16_le(0) as usize;
    let mut out = Vec::with_capacity(count);
    let mut offsets = Vec::with_capacity(count + 1);
    for i in 0..count {
        offsets.push(v.get_u16_le(2 + 2 * i) as usize);
    }
    if !v.ok() {
        return Err(Status::BadReply);
    }
    offsets.push(data.len());
    for w in offsets.windows(2) {
        let (start, end) = (w[0], w[1]);
        if start > end || end > data.len() {
            return Err(Status::BadReply);
        }
        out.push(data.slice(start..end));
    }
    Ok(out)
}
