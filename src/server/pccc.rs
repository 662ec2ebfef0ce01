// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server-side Execute-PCCC: the PLC5 word-range and SLC protected-typed
//! commands the legacy families serve.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use crate::{
    cfg::enums::PlcKind,
    models::{
        cip::{REPLY_MASK, SERVICE_PCCC_EXECUTE, STATUS_UNSUPPORTED},
        pccc::{
            FNC_PLC5_WORD_RANGE_READ, FNC_PLC5_WORD_RANGE_WRITE,
            FNC_SLC_PROTECTED_TYPED_READ, FNC_SLC_PROTECTED_TYPED_WRITE,
            MAX_PCCC_TRANSFER, PCCC_ERR_ADDR_NOT_USABLE, PCCC_ERR_FILE_WRONG_SIZE,
            PCCC_ERR_UNSUPPORTED, PCCC_REPLY_CMD, PCCC_TYPED_CMD, REQUESTER_ID,
        },
    },
    server::{cip::make_cip_error, plc::ServerPlc},
    wire::WireView,
};

fn cip_reply_shell(pccc: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(4 + REQUESTER_ID.len() + pccc.len());
    out.put_u8(SERVICE_PCCC_EXECUTE | REPLY_MASK);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(0);
    out.put_slice(&REQUESTER_ID);
    out.put_slice(pccc);
    out
}

fn pccc_error(seq: u16, err: u8) -> BytesMut {
    let mut out = BytesMut::with_capacity(5);
    out.put_u8(PCCC_REPLY_CMD);
    out.put_u8(0xF0);
    out.put_u16_le(seq);
    out.put_u8(err);
    out
}

fn pccc_ok(seq: u16, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(4 + payload.len());
    out.put_u8(PCCC_REPLY_CMD);
    out.put_u8(0);
    out.put_u16_le(seq);
    out.put_slice(payload);
    out
}

/// Handle an Execute-PCCC CIP request end to end.
pub fn dispatch(plc: &ServerPlc, cip: &Bytes) -> BytesMut {
    if !plc.kind.is_pccc() {
        return make_cip_error(SERVICE_PCCC_EXECUTE, STATUS_UNSUPPORTED, None);
    }

    let mut v = WireView::new(cip);
    let path_words = v.get_u8(1) as usize;
    let mut at = 2 + path_words * 2;
    let Some(req_id) = v.get_bytes(at, REQUESTER_ID.len()) else {
        return make_cip_error(SERVICE_PCCC_EXECUTE, STATUS_UNSUPPORTED, None);
    };
    if req_id != REQUESTER_ID {
        info!("unexpected PCCC requester id");
        return make_cip_error(SERVICE_PCCC_EXECUTE, STATUS_UNSUPPORTED, None);
    }
    at += REQUESTER_ID.len();

    let cmd = v.get_u8(at);
    let _sts = v.get_u8(at + 1);
    let seq = v.get_u16_le(at + 2);
    let fnc = v.get_u8(at + 4);
    if !v.ok() {
        return cip_reply_shell(&pccc_error(0, PCCC_ERR_FILE_WRONG_SIZE));
    }
    if cmd != PCCC_TYPED_CMD {
        return cip_reply_shell(&pccc_error(seq, PCCC_ERR_UNSUPPORTED));
    }
    let body = cip.slice(at + 5..);

    let is_plc5 = plc.kind == PlcKind::Plc5;
    let reply = match fnc {
        FNC_PLC5_WORD_RANGE_READ if is_plc5 => plc5_read(plc, seq, &body),
        FNC_PLC5_WORD_RANGE_WRITE if is_plc5 => plc5_write(plc, seq, &body),
        FNC_SLC_PROTECTED_TYPED_READ if !is_plc5 => slc_read(plc, seq, &body),
        FNC_SLC_PROTECTED_TYPED_WRITE if !is_plc5 => slc_write(plc, seq, &body),
        other => {
            info!("unsupported PCCC function {other:#04x} for {}", plc.kind);
            pccc_error(seq, PCCC_ERR_UNSUPPORTED)
        },
    };
    cip_reply_shell(&reply)
}

/// `offset:u16 | count:u16 | 0x06 | file | element`
fn plc5_read(plc: &ServerPlc, seq: u16, body: &Bytes) -> BytesMut {
    let mut v = WireView::new(body);
    let offset = v.get_u16_le(0) as usize;
    let count = v.get_u16_le(2) as usize;
    let level = v.get_u8(4);
    let file_num = v.get_u8(5) as u16;
    let element = v.get_u8(6) as usize;
    if !v.ok() || level != 0x06 {
        return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
    }

    plc.with_tag(
        |t| t.data_file_num == Some(file_num),
        |t| {
            let tag_size = t.elem_count * t.elem_size;
            let start = offset + element * t.elem_size;
            let bytes = count * t.elem_size;
            if start >= tag_size || start + bytes > tag_size {
                return pccc_error(seq, PCCC_ERR_FILE_WRONG_SIZE);
            }
            if bytes > MAX_PCCC_TRANSFER {
                return pccc_error(seq, PCCC_ERR_FILE_WRONG_SIZE);
            }
            debug!("plc5 read file {file_num} [{start}, {})", start + bytes);
            pccc_ok(seq, &t.data[start..start + bytes])
        },
    )
    .unwrap_or_else(|| pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE))
}

fn plc5_write(plc: &ServerPlc, seq: u16, body: &Bytes) -> BytesMut {
    let mut v = WireView::new(body);
    let offset = v.get_u16_le(0) as usize;
    let count = v.get_u16_le(2) as usize;
    let level = v.get_u8(4);
    let file_num = v.get_u8(5) as u16;
    let element = v.get_u8(6) as usize;
    if !v.ok() || level != 0x06 {
        return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
    }
    let data = body.slice(7.min(body.len())..);

    plc.with_tag(
        |t| t.data_file_num == Some(file_num),
        |t| {
            let tag_size = t.elem_count * t.elem_size;
            let start = offset + element * t.elem_size;
            let bytes = count * t.elem_size;
            if start >= tag_size || start + bytes > tag_size {
                return pccc_error(seq, PCCC_ERR_FILE_WRONG_SIZE);
            }
            if data.len() != bytes || bytes > MAX_PCCC_TRANSFER {
                return pccc_error(seq, PCCC_ERR_FILE_WRONG_SIZE);
            }
            t.data[start..start + bytes].copy_from_slice(&data);
            debug!("plc5 write file {file_num} [{start}, {})", start + bytes);
            pccc_ok(seq, &[])
        },
    )
    .unwrap_or_else(|| pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE))
}

/// `size:u8 | file | type | element | subelement`
fn slc_read(plc: &ServerPlc, seq: u16, body: &Bytes) -> BytesMut {
    let mut v = WireView::new(body);
    let size = v.get_u8(0) as usize;
    let file_num = v.get_u8(1) as u16;
    let file_type = v.get_u8(2);
    let element = v.get_u8(3) as usize;
    let subelement = v.get_u8(4);
    if !v.ok() {
        return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
    }
    if subelement != 0 {
        info!("sub-element addressing not served");
        return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
    }

    plc.with_tag(
        |t| t.data_file_num == Some(file_num),
        |t| {
            if t.elem_type.pccc_code() != file_type {
                info!(
                    "file type {file_type:#04x} does not match tag type {:#04x}",
                    t.elem_type.pccc_code()
                );
                return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
            }
            let tag_size = t.elem_count * t.elem_size;
            let start = element * t.elem_size;
            if start >= tag_size
                || start + size > tag_size
                || size > MAX_PCCC_TRANSFER
            {
                return pccc_error(seq, PCCC_ERR_FILE_WRONG_SIZE);
            }
            debug!("slc read file {file_num} [{start}, {})", start + size);
            pccc_ok(seq, &t.data[start..start + size])
        },
    )
    .unwrap_or_else(|| pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE))
}

fn slc_write(plc: &ServerPlc, seq: u16, body: &Bytes) -> BytesMut {
    let mut v = WireView::new(body);
    let size = v.get_u8(0) as usize;
    let file_num = v.get_u8(1) as u16;
    let file_type = v.get_u8(2);
    let element = v.get_u8(3) as usize;
    let subelement = v.get_u8(4);
    if !v.ok() {
        return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
    }
    if subelement != 0 {
        return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
    }
    let data = body.slice(5.min(body.len())..);

    plc.with_tag(
        |t| t.data_file_num == Some(file_num),
        |t| {
            if t.elem_type.pccc_code() != file_type {
                return pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE);
            }
            let tag_size = t.elem_count * t.elem_size;
            let start = element * t.elem_size;
            if start >= tag_size
                || start + size > tag_size
                || size > MAX_PCCC_TRANSFER
            {
                return pccc_error(seq, PCCC_ERR_FILE_WRONG_SIZE);
            }
            if data.len() != size {
                return pccc_error(seq, PCCC_ERR_FILE_WRONG_SIZE);
            }
            t.data[start..start + size].copy_from_slice(&data);
            debug!("slc write file {file_num} [{start}, {})", start + size);
            pccc_ok(seq, &[])
        },
    )
    .unwrap_or_else(|| pccc_error(seq, PCCC_ERR_ADDR_NOT_USABLE))
}
