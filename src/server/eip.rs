// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server-side encapsulation dispatch: session registration and the two
//! CPF-carrying commands.

use bytes::BytesMut;
use rand::RngExt;
use tracing::{debug, info};

use crate::{
    cfg::attributes::DEFAULT_CIP_PAYLOAD,
    models::{
        cpf,
        eip::{self, EIP_VERSION, EipCommand, EipFrame},
    },
    server::{cip::CipConnState, plc::ServerPlc},
    wire::WireView,
};

/// Encapsulation-level status codes served on bad requests.
const EIP_STATUS_UNSUPPORTED: u32 = 0x0001;
const EIP_STATUS_INVALID_SESSION: u32 = 0x0064;

/// Per-TCP-connection server state.
#[derive(Debug, Default)]
pub struct ConnCtx {
    pub session_handle: u32,
    pub conn: Option<CipConnState>,
}

/// What the TCP loop should do with the outcome of one frame.
pub enum Disposition {
    Reply(BytesMut),
    /// Close the connection (Unregister Session, or an unrecoverable
    /// framing problem).
    Close,
}

fn error_frame(frame: &EipFrame, ctx: &ConnCtx, status: u32) -> BytesMut {
    let mut header = eip::EipHeader::new(
        match frame.header.command() {
            Ok(c) => c,
            Err(_) => EipCommand::SendRrData,
        },
        ctx.session_handle,
        frame.header.sender_context.get(),
        0,
    );
    header.status.set(status);
    let mut out = BytesMut::with_capacity(eip::EIP_HEADER_LEN);
    out.extend_from_slice(zerocopy::IntoBytes::as_bytes(&header));
    out
}

fn reply_frame(frame: &EipFrame, ctx: &ConnCtx, payload: &[u8]) -> BytesMut {
    let command = match frame.header.command() {
        Ok(c) => c,
        Err(_) => EipCommand::SendRrData,
    };
    eip::encode_frame(
        command,
        ctx.session_handle,
        frame.header.sender_context.get(),
        payload,
    )
}

/// Dispatch one inbound encapsulation frame.
pub fn dispatch_frame(plc: &ServerPlc, ctx: &mut ConnCtx, frame: &EipFrame) -> Disposition {
    let Ok(command) = frame.header.command() else {
        info!("unsupported EIP command {:#06x}", frame.header.command.get());
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_UNSUPPORTED));
    };

    match command {
        EipCommand::RegisterSession => {
            plc.counters.register_session.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            register_session(ctx, frame)
        },
        EipCommand::UnregisterSession => {
            plc.counters.unregister_session.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if frame.header.session_handle.get() == ctx.session_handle {
                info!("session {:#x} unregistered", ctx.session_handle);
                Disposition::Close
            } else {
                Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_INVALID_SESSION))
            }
        },
        EipCommand::SendRrData => send_rr_data(plc, ctx, frame),
        EipCommand::SendUnitData => send_unit_data(plc, ctx, frame),
    }
}

fn register_session(ctx: &mut ConnCtx, frame: &EipFrame) -> Disposition {
    let h = &frame.header;
    let mut v = WireView::new(&frame.payload);
    let version = v.get_u16_le(0);
    let option_flags = v.get_u16_le(2);

    let sane = v.ok()
        && h.session_handle.get() == 0
        && h.status.get() == 0
        && h.sender_context.get() == 0
        && h.options.get() == 0
        && version == EIP_VERSION
        && option_flags == 0;
    if !sane {
        info!("register session failed sanity checks");
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_UNSUPPORTED));
    }

    ctx.session_handle = rand::rng().random();
    info!("registered session {:#x}", ctx.session_handle);
    Disposition::Reply(reply_frame(frame, ctx, &eip::register_session_payload()))
}

fn send_rr_data(plc: &ServerPlc, ctx: &mut ConnCtx, frame: &EipFrame) -> Disposition {
    if frame.header.session_handle.get() != ctx.session_handle || ctx.session_handle == 0
    {
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_INVALID_SESSION));
    }
    let Ok(cip) = cpf::decode_unconnected(&frame.payload) else {
        debug!("malformed unconnected CPF");
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_UNSUPPORTED));
    };

    let reply =
        super::cip::dispatch(plc, &mut ctx.conn, &cip, DEFAULT_CIP_PAYLOAD as usize);
    let payload = cpf::encode_unconnected(&reply);
    Disposition::Reply(reply_frame(frame, ctx, &payload))
}

fn send_unit_data(plc: &ServerPlc, ctx: &mut ConnCtx, frame: &EipFrame) -> Disposition {
    if frame.header.session_handle.get() != ctx.session_handle || ctx.session_handle == 0
    {
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_INVALID_SESSION));
    }
    let Ok((conn_id, seq, cip)) = cpf::decode_connected(&frame.payload) else {
        debug!("malformed connected CPF");
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_UNSUPPORTED));
    };
    let Some(conn) = ctx.conn else {
        info!("connected frame without an open connection");
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_UNSUPPORTED));
    };
    if conn_id != conn.server_conn_id {
        info!(
            "connected frame for unknown connection {conn_id:#x} (expected {:#x})",
            conn.server_conn_id
        );
        return Disposition::Reply(error_frame(frame, ctx, EIP_STATUS_UNSUPPORTED));
    }

    let reply = super::cip::dispatch(plc, &mut ctx.conn, &cip, conn.max_payload);
    let payload = cpf::encode_connected(conn.client_conn_id, seq, &reply);
    Disposition::Reply(reply_frame(frame, ctx, &payload))
}
