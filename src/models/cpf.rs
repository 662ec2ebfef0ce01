// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Common Packet Format: the item list carried inside SendRRData /
//! SendUnitData payloads.
//!
//! Only the two canonical two-item shapes exist in this protocol family:
//!
//! * unconnected: `Null-Address (0x0000)` + `Unconnected-Data (0x00B2)`
//! * connected:   `Connected-Address (0x00A1, conn id)` +
//!   `Connected-Data (0x00B1, sequence + payload)`

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    status::{PlcResult, Status},
    wire::WireView,
};

pub const CPF_ITEM_NULL_ADDR: u16 = 0x0000;
pub const CPF_ITEM_CONNECTED_ADDR: u16 = 0x00A1;
pub const CPF_ITEM_CONNECTED_DATA: u16 = 0x00B1;
pub const CPF_ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

const CPF_UNCONNECTED_HEADER: usize = 16;
const CPF_CONNECTED_HEADER: usize = 22;

/// Router timeout placed in outgoing requests. One second is plenty for the
/// directly-attached targets this library talks to.
const ROUTER_TIMEOUT_S: u16 = 1;

pub fn encode_unconnected(cip: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(CPF_UNCONNECTED_HEADER + cip.len());
    out.put_u32_le(0); // interface handle
    out.put_u16_le(ROUTER_TIMEOUT_S);
    out.put_u16_le(2); // item count
    out.put_u16_le(CPF_ITEM_NULL_ADDR);
    out.put_u16_le(0);
    out.put_u16_le(CPF_ITEM_UNCONNECTED_DATA);
    out.put_u16_le(cip.len() as u16);
    out.put_slice(cip);
    out
}

pub fn encode_connected(conn_id: u32, conn_seq: u16, cip: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(CPF_CONNECTED_HEADER + cip.len());
    out.put_u32_le(0);
    out.put_u16_le(ROUTER_TIMEOUT_S);
    out.put_u16_le(2);
    out.put_u16_le(CPF_ITEM_CONNECTED_ADDR);
    out.put_u16_le(4);
    out.put_u32_le(conn_id);
    out.put_u16_le(CPF_ITEM_CONNECTED_DATA);
    out.put_u16_le((cip.len() + 2) as u16); // payload plus sequence word
    out.put_u16_le(conn_seq);
    out.put_slice(cip);
    out
}

/// Unwrap an unconnected CPF payload down to the CIP bytes.
pub fn decode_unconnected(payload: &Bytes) -> PlcResult<Bytes> {
    let mut v = WireView::new(payload);
    let item_count = v.get_u16_le(6);
    let addr_type = v.get_u16_le(8);
    let addr_len = v.get_u16_le(10);
    let data_type = v.get_u16_le(12);
    let data_len = v.get_u16_le(14) as usize;
    if !v.ok() {
        return Err(Status::BadReply);
    }
    if item_count != 2
        || addr_type != CPF_ITEM_NULL_ADDR
        || addr_len != 0
        || data_type != CPF_ITEM_UNCONNECTED_DATA
    {
        return Err(Status::BadReply);
    }
    if payload.len() != CPF_UNCONNECTED_HEADER + data_len {
        return Err(Status::BadReply);
    }
    Ok(payload.slice(CPF_UNCONNECTED_HEADER..))
}

/// Unwrap a connected CPF payload: `(connection id, sequence, CIP bytes)`.
pub fn decode_connected(payload: &Bytes) -> PlcResult<(u32, u16, Bytes)> {
    let mut v = WireView::new(payload);
    let item_count = v.get_u16_le(6);
    let addr_type = v.get_u16_le(8);
    let addr_len = v.get_u16_le(10);
    let conn_id = v.get_u32_le(12);
    let data_type = v.get_u16_le(16);
    let data_len = v.get_u16_le(18) as usize;
    let conn_seq = v.get_u16_le(20);
    if !v.ok() {
        return Err(Status::BadReply);
    }
    if item_count != 2
        || addr_type != CPF_ITEM_CONNECTED_ADDR
        || addr_len != 4
        || data_type != CPF_ITEM_CONNECTED_DATA
    {
        return Err(Status::BadReply);
    }
    // data_len counts the sequence word plus the CIP payload.
    if payload.len() != (CPF_CONNECTED_HEADER - 2) + data_len {
        return Err(Status::BadReply);
    }
    Ok((conn_id, conn_seq, payload.slice(CPF_CONNECTED_HEADER..)))
}
