// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server-side CIP dispatch: tag services, connection management, Multiple
//! Service Packet, and the hand-off to the PCCC handler.

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngExt;
use tracing::{debug, info};

use crate::{
    cfg::enums::PlcKind,
    server::plc::Counters,
    models::{
        cip::{
            REPLY_MASK, SERVICE_FORWARD_CLOSE, SERVICE_FORWARD_OPEN,
            SERVICE_FORWARD_OPEN_EX, SERVICE_MULTIPLE, SERVICE_PCCC_EXECUTE,
            SERVICE_READ_TAG, SERVICE_READ_TAG_FRAG, SERVICE_WRITE_TAG,
            SERVICE_WRITE_TAG_FRAG, STATUS_EXTENDED, STATUS_PARTIAL,
            STATUS_PATH_SEGMENT_ERROR, STATUS_UNSUPPORTED,
            EXT_STATUS_TOO_LONG,
        },
        epath::{MEMBER_SEGMENT_U8, MEMBER_SEGMENT_U16, MEMBER_SEGMENT_U32, SYMBOLIC_SEGMENT},
    },
    server::{pccc, plc::ServerPlc},
    wire::WireView,
};

/// State of the one CIP connection a TCP session may hold.
#[derive(Debug, Clone, Copy)]
pub struct CipConnState {
    pub server_conn_id: u32,
    pub client_conn_id: u32,
    pub client_serial: u16,
    pub client_vendor: u16,
    pub client_orig_serial: u32,
    pub max_payload: usize,
}

/// Build a CIP error reply: service | 0x80, reserved, status, extended.
pub fn make_cip_error(service: u8, status: u8, extended: Option<u16>) -> BytesMut {
    let mut out = BytesMut::with_capacity(6);
    out.put_u8(service | REPLY_MASK);
    out.put_u8(0);
    out.put_u8(status);
    match extended {
        Some(ext) => {
            out.put_u8(1);
            out.put_u16_le(ext);
        },
        None => out.put_u8(0),
    }
    out
}

/// Dispatch one CIP request and produce the reply bytes. `max_reply` is the
/// negotiated reply capacity; `conn` is the connection slot of the carrying
/// TCP session.
pub fn dispatch(
    plc: &ServerPlc,
    conn: &mut Option<CipConnState>,
    cip: &Bytes,
    max_reply: usize,
) -> BytesMut {
    dispatch_inner(plc, conn, cip, max_reply, true)
}

fn dispatch_inner(
    plc: &ServerPlc,
    conn: &mut Option<CipConnState>,
    cip: &Bytes,
    max_reply: usize,
    allow_multi: bool,
) -> BytesMut {
    let Some(&service) = cip.first() else {
        return make_cip_error(0, STATUS_UNSUPPORTED, None);
    };
    let c = &plc.counters;
    match service {
        SERVICE_READ_TAG | SERVICE_READ_TAG_FRAG => {
            Counters::bump(if service == SERVICE_READ_TAG {
                &c.read_tag
            } else {
                &c.read_tag_frag
            });
            handle_read(plc, cip, max_reply)
        },
        SERVICE_WRITE_TAG | SERVICE_WRITE_TAG_FRAG => {
            Counters::bump(if service == SERVICE_WRITE_TAG {
                &c.write_tag
            } else {
                &c.write_tag_frag
            });
            handle_write(plc, cip)
        },
        SERVICE_FORWARD_OPEN | SERVICE_FORWARD_OPEN_EX => {
            Counters::bump(&c.forward_open_attempts);
            handle_forward_open(plc, conn, cip)
        },
        SERVICE_FORWARD_CLOSE => {
            Counters::bump(&c.forward_close);
            handle_forward_close(plc, conn, cip)
        },
        SERVICE_PCCC_EXECUTE => {
            Counters::bump(&c.pccc);
            pccc::dispatch(plc, cip)
        },
        SERVICE_MULTIPLE if allow_multi => {
            Counters::bump(&c.multi_packet);
            handle_multi(plc, conn, cip, max_reply)
        },
        other => make_cip_error(other, STATUS_UNSUPPORTED, None),
    }
}

/// Walk the request EPATH: one symbolic segment, then up to three numeric
/// member segments selecting array elements. Returns the tag name and the
/// starting byte offset.
fn process_tag_segment(plc: &ServerPlc, path: &[u8]) -> Option<(String, usize)> {
    let mut v = WireView::new(path);
    if v.get_u8(0) != SYMBOLIC_SEGMENT {
        debug!("expected a symbolic segment");
        return None;
    }
    let name_len = v.get_u8(1) as usize;
    let name_bytes = v.get_bytes(2, name_len)?;
    let name = String::from_utf8(name_bytes.to_vec()).ok()?;
    let mut at = 2 + name_len + (name_len & 1);

    let mut subscripts: Vec<usize> = Vec::new();
    while at < path.len() {
        if subscripts.len() >= 3 {
            debug!("more numeric segments than dimensions");
            return None;
        }
        match v.get_u8(at) {
            MEMBER_SEGMENT_U8 => {
                subscripts.push(v.get_u8(at + 1) as usize);
                at += 2;
            },
            MEMBER_SEGMENT_U16 => {
                subscripts.push(v.get_u16_le(at + 2) as usize);
                at += 4;
            },
            MEMBER_SEGMENT_U32 => {
                subscripts.push(v.get_u32_le(at + 2) as usize);
                at += 6;
            },
            other => {
                debug!("unexpected segment marker {other:#04x}");
                return None;
            },
        }
    }
    if !v.ok() {
        return None;
    }

    plc.with_tag(
        |t| t.name == name,
        |t| {
            if subscripts.is_empty() {
                return Some((t.name.clone(), 0));
            }
            if subscripts.len() != t.dimensions.len() {
                debug!(
                    "tag {} has {} dimensions, request used {}",
                    t.name,
                    t.dimensions.len(),
                    subscripts.len()
                );
                return None;
            }
            let mut elem = 0usize;
            for (i, sub) in subscripts.iter().enumerate() {
                if *sub >= t.dimensions[i] {
                    debug!("subscript {sub} out of bounds in dimension {i}");
                    return None;
                }
                let stride: usize = t.dimensions[i + 1..].iter().product();
                elem += sub * stride;
            }
            Some((t.name.clone(), elem * t.elem_size))
        },
    )?
}

fn handle_read(plc: &ServerPlc, cip: &Bytes, max_reply: usize) -> BytesMut {
    let service = cip[0];
    let frag = service == SERVICE_READ_TAG_FRAG;

    if plc.kind == PlcKind::Omron && frag {
        info!("Omron does not serve fragmented reads");
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }

    let mut v = WireView::new(cip);
    let path_words = v.get_u8(1) as usize;
    let Some(path) = v.get_bytes(2, path_words * 2) else {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    };
    let mut at = 2 + path_words * 2;
    let mut elem_count = v.get_u16_le(at) as usize;
    at += 2;
    let byte_offset = if frag {
        let o = v.get_u32_le(at) as usize;
        at += 4;
        o
    } else {
        0
    };
    if !v.ok() || at != cip.len() {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }

    let Some((name, start)) = process_tag_segment(plc, path) else {
        return make_cip_error(service, STATUS_PATH_SEGMENT_ERROR, None);
    };

    let reply = plc.with_tag(
        |t| t.name == name,
        |t| {
            if plc.kind == PlcKind::Omron {
                if elem_count != 1 {
                    return make_cip_error(service, STATUS_UNSUPPORTED, None);
                }
                elem_count = t.elem_count;
            }

            let tag_size = t.elem_count * t.elem_size;
            let total = elem_count * t.elem_size;
            if start + total > tag_size
                || start + byte_offset > tag_size
                || byte_offset > total
            {
                return make_cip_error(
                    service,
                    STATUS_EXTENDED,
                    Some(EXT_STATUS_TOO_LONG),
                );
            }

            let remaining = total - byte_offset;
            let capacity = max_reply.saturating_sub(6);
            let mut amount = remaining.min(capacity);
            let partial = remaining > capacity;
            if partial && amount > 8 {
                amount &= !0x07; // fragment on 8-byte boundaries
            }

            let mut out = BytesMut::with_capacity(6 + amount);
            out.put_u8(service | REPLY_MASK);
            out.put_u8(0);
            out.put_u8(if partial { STATUS_PARTIAL } else { 0 });
            out.put_u8(0);
            out.put_u16_le(t.elem_type.cip_code());
            let from = start + byte_offset;
            out.put_slice(&t.data[from..from + amount]);
            out
        },
    );
    reply.unwrap_or_else(|| make_cip_error(service, STATUS_PATH_SEGMENT_ERROR, None))
}

fn handle_write(plc: &ServerPlc, cip: &Bytes) -> BytesMut {
    let service = cip[0];
    let frag = service == SERVICE_WRITE_TAG_FRAG;

    let mut v = WireView::new(cip);
    let path_words = v.get_u8(1) as usize;
    let Some(path) = v.get_bytes(2, path_words * 2) else {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    };
    let mut at = 2 + path_words * 2;
    let data_type = v.get_u16_le(at);
    at += 2;
    let elem_count = v.get_u16_le(at) as usize;
    at += 2;
    let byte_offset = if frag {
        let o = v.get_u32_le(at) as usize;
        at += 4;
        o
    } else {
        0
    };
    if !v.ok() || at > cip.len() {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }
    let payload = cip.slice(at..);

    let Some((name, start)) = process_tag_segment(plc, path) else {
        return make_cip_error(service, STATUS_PATH_SEGMENT_ERROR, None);
    };

    let reply = plc.with_tag(
        |t| t.name == name,
        |t| {
            if t.elem_type.cip_code() != data_type {
                info!(
                    "write type {data_type:#06x} does not match tag {} type {:#06x}",
                    t.name,
                    t.elem_type.cip_code()
                );
                return make_cip_error(service, STATUS_UNSUPPORTED, None);
            }
            if elem_count > t.elem_count {
                return make_cip_error(
                    service,
                    STATUS_EXTENDED,
                    Some(EXT_STATUS_TOO_LONG),
                );
            }
            let tag_size = t.elem_count * t.elem_size;
            let from = start + byte_offset;
            if from + payload.len() > tag_size {
                return make_cip_error(
                    service,
                    STATUS_EXTENDED,
                    Some(EXT_STATUS_TOO_LONG),
                );
            }
            t.data[from..from + payload.len()].copy_from_slice(&payload);

            let mut out = BytesMut::with_capacity(4);
            out.put_u8(service | REPLY_MASK);
            out.put_u8(0);
            out.put_u8(0);
            out.put_u8(0);
            out
        },
    );
    reply.unwrap_or_else(|| make_cip_error(service, STATUS_PATH_SEGMENT_ERROR, None))
}

/// Match a connection path against the PLC's stored one. The path arrives
/// as a word count, an optional pad byte (only when the fixed part of the
/// request ends on an even offset), then the segments.
fn match_conn_path(request: &[u8], padded: bool, expect: &[u8]) -> bool {
    let mut v = WireView::new(request);
    let words = v.get_u8(0) as usize;
    if !v.ok() || words * 2 != expect.len() {
        return false;
    }
    let start = if padded { 2 } else { 1 };
    request.get(start..) == Some(expect)
}

fn handle_forward_open(
    plc: &ServerPlc,
    conn: &mut Option<CipConnState>,
    cip: &Bytes,
) -> BytesMut {
    let service = cip[0];
    let large = service == SERVICE_FORWARD_OPEN_EX;

    let mut v = WireView::new(cip);
    // Step over service + path to the connection-manager fields.
    let mut at = 2 + v.get_u8(1) as usize * 2;
    at += 2; // ticks
    at += 4; // server conn id placeholder
    let client_conn_id = v.get_u32_le(at);
    at += 4;
    let client_serial = v.get_u16_le(at);
    at += 2;
    let client_vendor = v.get_u16_le(at);
    at += 2;
    let client_orig_serial = v.get_u32_le(at);
    at += 4;
    at += 4; // timeout multiplier + reserved
    let c2s_rpi = v.get_u32_le(at);
    at += 4;
    let c2s_params = if large {
        let p = v.get_u32_le(at);
        at += 4;
        p
    } else {
        let p = v.get_u16_le(at) as u32;
        at += 2;
        p
    };
    let s2c_rpi = v.get_u32_le(at);
    at += 4;
    if large {
        at += 4;
    } else {
        at += 2;
    }
    at += 1; // transport class
    if !v.ok() || at >= cip.len() {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }

    if !match_conn_path(&cip[at..], at % 2 == 0, &plc.conn_path) {
        info!("forward open path mismatch");
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }

    if plc.take_fo_rejection() {
        info!("bouncing forward open for debugging");
        return make_cip_error(service, 0x01, Some(0x0100));
    }

    let max_payload =
        (c2s_params & if large { 0x0FFF } else { 0x01FF }) as usize;
    Counters::bump(&plc.counters.forward_open_ok);
    let state = CipConnState {
        server_conn_id: rand::rng().random(),
        client_conn_id,
        client_serial,
        client_vendor,
        client_orig_serial,
        max_payload,
    };
    *conn = Some(state);
    info!(
        "forward open accepted, conn {:#x}, payload {max_payload}",
        state.server_conn_id
    );

    let mut out = BytesMut::with_capacity(30);
    out.put_u8(service | REPLY_MASK);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u32_le(state.server_conn_id);
    out.put_u32_le(client_conn_id);
    out.put_u16_le(client_serial);
    out.put_u16_le(client_vendor);
    out.put_u32_le(client_orig_serial);
    out.put_u32_le(c2s_rpi);
    out.put_u32_le(s2c_rpi);
    out.put_u8(0); // application reply size
    out.put_u8(0); // reserved
    out
}

fn handle_forward_close(
    plc: &ServerPlc,
    conn: &mut Option<CipConnState>,
    cip: &Bytes,
) -> BytesMut {
    let service = cip[0];

    let mut v = WireView::new(cip);
    let mut at = 2 + v.get_u8(1) as usize * 2;
    at += 2; // ticks
    let client_serial = v.get_u16_le(at);
    at += 2;
    let client_vendor = v.get_u16_le(at);
    at += 2;
    let client_orig_serial = v.get_u32_le(at);
    at += 4;
    if !v.ok() || at >= cip.len() {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }

    if !match_conn_path(&cip[at..], at % 2 == 0, &plc.conn_path) {
        info!("forward close path mismatch");
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }

    let matches = conn.is_some_and(|c| {
        c.client_serial == client_serial
            && c.client_vendor == client_vendor
            && c.client_orig_serial == client_orig_serial
    });
    if !matches {
        info!("forward close does not match the open connection");
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }
    *conn = None;
    info!("forward close accepted");

    let mut out = BytesMut::with_capacity(14);
    out.put_u8(service | REPLY_MASK);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u16_le(client_serial);
    out.put_u16_le(client_vendor);
    out.put_u32_le(client_orig_serial);
    out.put_u8(0);
    out.put_u8(0);
    out
}

/// Multiple Service Packet: run every embedded request through the regular
/// dispatch and re-assemble the reply with its offset table.
fn handle_multi(
    plc: &ServerPlc,
    conn: &mut Option<CipConnState>,
    cip: &Bytes,
    max_reply: usize,
) -> BytesMut {
    let service = cip[0];
    let mut v = WireView::new(cip);
    let data_at = 2 + v.get_u8(1) as usize * 2;
    let count = v.get_u16_le(data_at) as usize;
    if !v.ok() || count == 0 {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }
    let mut starts = Vec::with_capacity(count + 1);
    for i in 0..count {
        starts.push(v.get_u16_le(data_at + 2 + 2 * i) as usize);
    }
    if !v.ok() {
        return make_cip_error(service, STATUS_UNSUPPORTED, None);
    }
    starts.push(cip.len() - data_at);

    let mut replies = Vec::with_capacity(count);
    for w in starts.windows(2) {
        let (s, e) = (data_at + w[0], data_at + w[1]);
        if s > e || e > cip.len() {
            return make_cip_error(service, STATUS_UNSUPPORTED, None);
        }
        let sub = cip.slice(s..e);
        replies.push(dispatch_inner(plc, conn, &sub, max_reply, false));
    }

    let table = 2 + 2 * count;
    let body: usize = replies.iter().map(|r| r.len()).sum();
    let mut out = BytesMut::with_capacity(4 + table + body);
    out.put_u8(service | REPLY_MASK);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u16_le(count as u16);
    let mut offset = table;
    for r in &replies {
        out.put_u16_le(offset as u16);
        offset += r.len();
    }
    for r in &replies {
        out.put_slice(r);
    }
    out
}
