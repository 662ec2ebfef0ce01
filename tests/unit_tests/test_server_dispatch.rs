// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client codecs against the server dispatch, no sockets involved.

use bytes::{Bytes, BytesMut};
use enip_client_rs::{
    cfg::enums::PlcKind,
    models::{
        cip::{
            CipReply, STATUS_UNSUPPORTED, decode_multi_reply, encode_multi_service,
            encode_read, encode_read_frag, encode_write,
        },
        eip::{self, EipCommand, EipFrame, EipHeader},
        epath::{TagPath, connection_path, encode_tag_path},
        forward::{ForwardOpenRequest, encode_forward_open, parse_forward_open_reply},
    },
    server::{
        cip::{CipConnState, dispatch},
        eip::{ConnCtx, Disposition, dispatch_frame},
        plc::ServerPlc,
    },
    status::Status,
};

fn lgx_with(tag: &str) -> ServerPlc {
    let plc = ServerPlc::new(PlcKind::ControlLogix, &[1, 0]);
    plc.add_tag(tag).expect("tag");
    plc
}

fn sym(name: &str) -> Vec<u8> {
    match encode_tag_path(name).expect("path") {
        TagPath::Symbolic(p) => p,
        other => panic!("expected symbolic, got {other:?}"),
    }
}

fn roundtrip(plc: &ServerPlc, conn: &mut Option<CipConnState>, req: BytesMut) -> CipReply {
    let reply = dispatch(plc, conn, &req.freeze(), 508);
    CipReply::parse(reply.freeze()).expect("reply parse")
}

#[test]
fn read_zeroed_dint_array() {
    let plc = lgx_with("TestArr:DINT[10]");
    let mut conn = None;
    let reply = roundtrip(&plc, &mut conn, encode_read(&sym("TestArr"), 10));
    reply.check().expect("status ok");
    assert!(!reply.is_partial());
    let (ty, data) = reply.read_payload().expect("payload");
    assert_eq!(ty, 0x00C4);
    assert_eq!(data.len(), 40);
    assert!(data.iter().all(|b| *b == 0));
}

#[test]
fn write_then_read_back() {
    let plc = lgx_with("TestArr:DINT[10]");
    let mut conn = None;
    let pattern: Vec<u8> = (1..=40).collect();
    let reply = roundtrip(
        &plc,
        &mut conn,
        encode_write(&sym("TestArr"), 0x00C4, 10, &pattern),
    );
    reply.check().expect("write ok");

    let reply = roundtrip(&plc, &mut conn, encode_read(&sym("TestArr"), 10));
    let (_, data) = reply.read_payload().expect("payload");
    assert_eq!(&data[..], &pattern[..]);
}

#[test]
fn subscript_selects_the_element() {
    let plc = lgx_with("TestArr:DINT[10]");
    let mut conn = None;
    let pattern: Vec<u8> = (0..40).collect();
    roundtrip(&plc, &mut conn, encode_write(&sym("TestArr"), 0x00C4, 10, &pattern))
        .check()
        .expect("write ok");

    let reply = roundtrip(&plc, &mut conn, encode_read(&sym("TestArr[2]"), 1));
    let (_, data) = reply.read_payload().expect("payload");
    assert_eq!(&data[..], &pattern[8..12]);
}

#[test]
fn mismatched_write_type_is_refused() {
    let plc = lgx_with("TestArr:DINT[10]");
    let mut conn = None;
    let reply =
        roundtrip(&plc, &mut conn, encode_write(&sym("TestArr"), 0x00C3, 10, &[0; 20]));
    assert_eq!(reply.general_status, STATUS_UNSUPPORTED);
}

#[test]
fn oversized_read_gets_extended_status() {
    let plc = lgx_with("TestArr:DINT[10]");
    let mut conn = None;
    let reply = roundtrip(&plc, &mut conn, encode_read(&sym("TestArr"), 11));
    assert_eq!(
        reply.check(),
        Err(Status::BadStatus { general: 0xFF, extended: 0x2105 })
    );
}

#[test]
fn unknown_tag_is_a_path_error() {
    let plc = lgx_with("TestArr:DINT[10]");
    let mut conn = None;
    let reply = roundtrip(&plc, &mut conn, encode_read(&sym("Nope"), 1));
    assert_eq!(reply.general_status, 0x04);
}

#[test]
fn fragmented_read_accumulates_the_whole_tag() {
    let plc = lgx_with("Big:DINT[2000]");
    let pattern: Vec<u8> = (0..8000usize).map(|i| (i % 251) as u8).collect();
    plc.with_tag(|t| t.name == "Big", |t| t.data.copy_from_slice(&pattern))
        .expect("tag");

    let mut conn = None;
    let mut acc: Vec<u8> = Vec::new();
    let mut rounds = 0;
    loop {
        let req = if acc.is_empty() {
            encode_read(&sym("Big"), 2000)
        } else {
            encode_read_frag(&sym("Big"), 2000, acc.len() as u32)
        };
        let reply = roundtrip(&plc, &mut conn, req);
        reply.check().expect("status");
        let (_, data) = reply.read_payload().expect("payload");
        acc.extend_from_slice(&data);
        rounds += 1;
        if !reply.is_partial() {
            break;
        }
        assert!(rounds < 40, "fragmentation does not converge");
    }
    assert!(rounds > 1, "an 8000 byte tag must fragment at 508");
    assert_eq!(acc, pattern);
}

fn fo_request(payload: u16) -> BytesMut {
    let fo = ForwardOpenRequest {
        client_conn_id: 0x0100_0001,
        conn_serial: 42,
        vendor_id: 0xF33D,
        orig_serial: 7,
        payload,
    };
    encode_forward_open(&fo, &connection_path(&[1, 0]), false)
}

#[test]
fn forward_open_reject_budget_then_accept() {
    let plc = lgx_with("T:DINT[1]");
    plc.set_reject_fo(2);
    let mut conn = None;

    for _ in 0..2 {
        let reply = roundtrip(&plc, &mut conn, fo_request(508));
        assert_eq!(
            parse_forward_open_reply(&reply),
            Err(Status::BadStatus { general: 0x01, extended: 0x0100 })
        );
        assert!(conn.is_none());
    }

    let reply = roundtrip(&plc, &mut conn, fo_request(508));
    let ack = parse_forward_open_reply(&reply).expect("accepted");
    let state = conn.expect("connection registered");
    assert_eq!(ack.server_conn_id, state.server_conn_id);
    assert_eq!(state.max_payload, 508);
}

#[test]
fn multi_service_packet_splits_per_tag() {
    let plc = ServerPlc::new(PlcKind::ControlLogix, &[1, 0]);
    plc.add_tag("A:DINT[2]").expect("tag");
    plc.add_tag("B:INT[4]").expect("tag");
    let mut conn = None;

    let subs = vec![encode_read(&sym("A"), 2), encode_read(&sym("B"), 4)];
    let reply = roundtrip(&plc, &mut conn, encode_multi_service(&subs));
    reply.check().expect("outer ok");
    let parts = decode_multi_reply(&reply).expect("split");
    assert_eq!(parts.len(), 2);

    let a = CipReply::parse(parts[0].clone()).expect("sub a");
    let (ty, data) = a.read_payload().expect("payload");
    assert_eq!((ty, data.len()), (0x00C4, 8));

    let b = CipReply::parse(parts[1].clone()).expect("sub b");
    let (ty, data) = b.read_payload().expect("payload");
    assert_eq!((ty, data.len()), (0x00C3, 8));
}

#[test]
fn register_session_frame_level() {
    let plc = lgx_with("T:DINT[1]");
    let mut ctx = ConnCtx::default();

    let frame = eip::encode_frame(
        EipCommand::RegisterSession,
        0,
        0,
        &eip::register_session_payload(),
    );
    let parsed = EipFrame {
        header: EipHeader::parse(&frame).expect("header").clone(),
        payload: Bytes::copy_from_slice(&frame[eip::EIP_HEADER_LEN..]),
    };
    let Disposition::Reply(reply) = dispatch_frame(&plc, &mut ctx, &parsed) else {
        panic!("register must reply");
    };
    let header = EipHeader::parse(&reply).expect("reply header");
    assert_eq!(header.status.get(), 0);
    assert_ne!(header.session_handle.get(), 0);
    assert_eq!(ctx.session_handle, header.session_handle.get());

    // A second register with a non-zero handle is refused.
    let bad = eip::encode_frame(
        EipCommand::RegisterSession,
        ctx.session_handle,
        0,
        &eip::register_session_payload(),
    );
    let parsed = EipFrame {
        header: EipHeader::parse(&bad).expect("header").clone(),
        payload: Bytes::copy_from_slice(&bad[eip::EIP_HEADER_LEN..]),
    };
    let Disposition::Reply(reply) = dispatch_frame(&plc, &mut ctx, &parsed) else {
        panic!("bad register still gets a status frame");
    };
    let header = EipHeader::parse(&reply).expect("reply header");
    assert_ne!(header.status.get(), 0);
}
