// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Forward Open / Forward Close: CIP connection management.
//!
//! A Forward Open reserves a message path with negotiated packet sizes; the
//! standard service (0x54) carries 16-bit connection parameters and caps the
//! payload at 508 bytes, the large variant (0x5B) carries 32-bit parameters
//! and goes up to 4002.

use bytes::{BufMut, BytesMut};

use crate::{
    models::{
        cip::{CipReply, SERVICE_FORWARD_CLOSE, SERVICE_FORWARD_OPEN, SERVICE_FORWARD_OPEN_EX},
        epath::{CLASS_CONNECTION_MANAGER, class_instance_path},
    },
    status::{PlcResult, Status},
    wire::WireView,
};

/// Point-to-point, low priority, variable size. The low bits carry the
/// payload size.
const CONN_PARAM_BASE: u16 = 0x4200;
const CONN_PARAM_BASE_EX: u32 = 0x4200_0000;

/// Server transport, class 3, application trigger.
const TRANSPORT_CLASS: u8 = 0xA3;

const SECS_PER_TICK: u8 = 10;
const TIMEOUT_TICKS: u8 = 5;
const TIMEOUT_MULTIPLIER: u8 = 1;

/// Default RPI in microseconds. Class-3 connections only use it for the
/// connection timeout, so one second is a comfortable default.
const DEFAULT_RPI_US: u32 = 1_000_000;

/// Identity of one CIP connection attempt.
#[derive(Debug, Clone, Copy)]
pub struct ForwardOpenRequest {
    pub client_conn_id: u32,
    pub conn_serial: u16,
    pub vendor_id: u16,
    pub orig_serial: u32,
    /// Requested payload bytes in each direction.
    pub payload: u16,
}

/// What the target granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardOpenAck {
    /// Connection id to place in the connected-address item of requests.
    pub server_conn_id: u32,
    /// Our id, echoed back; replies arrive addressed to it.
    pub client_conn_id: u32,
    pub conn_serial: u16,
}

pub fn encode_forward_open(
    req: &ForwardOpenRequest,
    conn_path: &[u8],
    large: bool,
) -> BytesMut {
    let service = if large { SERVICE_FORWARD_OPEN_EX } else { SERVICE_FORWARD_OPEN };
    let cm_path = class_instance_path(CLASS_CONNECTION_MANAGER, 1);

    let mut out = BytesMut::with_capacity(48 + conn_path.len());
    out.put_u8(service);
    out.put_u8((cm_path.len() / 2) as u8);
    out.put_slice(&cm_path);

    out.put_u8(SECS_PER_TICK);
    out.put_u8(TIMEOUT_TICKS);
    out.put_u32_le(0); // server connection id, assigned in the reply
    out.put_u32_le(req.client_conn_id);
    out.put_u16_le(req.conn_serial);
    out.put_u16_le(req.vendor_id);
    out.put_u32_le(req.orig_serial);
    out.put_u8(TIMEOUT_MULTIPLIER);
    out.put_slice(&[0, 0, 0]); // reserved
    out.put_u32_le(DEFAULT_RPI_US);
    if large {
        out.put_u32_le(CONN_PARAM_BASE_EX | req.payload as u32);
    } else {
        out.put_u16_le(CONN_PARAM_BASE | (req.payload & 0x1FF));
    }
    out.put_u32_le(DEFAULT_RPI_US);
    if large {
        out.put_u32_le(CONN_PARAM_BASE_EX | req.payload as u32);
    } else {
        out.put_u16_le(CONN_PARAM_BASE | (req.payload & 0x1FF));
    }
    out.put_u8(TRANSPORT_CLASS);

    // The request body so far is an odd number of bytes, so the connection
    // path needs no pad after its length byte.
    out.put_u8((conn_path.len() / 2) as u8);
    out.put_slice(conn_path);
    out
}

pub fn parse_forward_open_reply(reply: &CipReply) -> PlcResult<ForwardOpenAck> {
    reply.check()?;
    let mut v = WireView::new(&reply.data);
    let server_conn_id = v.get_u32_le(0);
    let client_conn_id = v.get_u32_le(4);
    let conn_serial = v.get_u16_le(8);
    if !v.ok() {
        return Err(Status::BadReply);
    }
    Ok(ForwardOpenAck { server_conn_id, client_conn_id, conn_serial })
}

pub fn encode_forward_close(
    conn_serial: u16,
    vendor_id: u16,
    orig_serial: u32,
    conn_path: &[u8],
) -> BytesMut {
    let cm_path = class_instance_path(CLASS_CONNECTION_MANAGER, 1);

    let mut out = BytesMut::with_capacity(20 + conn_path.len());
    out.put_u8(SERVICE_FORWARD_CLOSE);
    out.put_u8((cm_path.len() / 2) as u8);
    out.put_slice(&cm_path);

    out.put_u8(SECS_PER_TICK);
    out.put_u8(TIMEOUT_TICKS);
    out.put_u16_le(conn_serial);
    out.put_u16_le(vendor_id);
    out.put_u32_le(orig_serial);

    // Forward Close, unlike Forward Open, pads a zero byte between the path
    // length and the path itself.
    out.put_u8((conn_path.len() / 2) as u8);
    out.put_u8(0);
    out.put_slice(conn_path);
    out
}
