// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PCCC client codec against the server-side Execute-PCCC handler.

use bytes::BytesMut;
use enip_client_rs::{
    cfg::enums::PlcKind,
    models::{
        cip::CipReply,
        pccc::{
            PCCC_ERR_ADDR_NOT_USABLE, decode_execute_pccc_reply, encode_execute_pccc,
            encode_plc5_read, encode_plc5_write, encode_slc_read, encode_slc_write,
            parse_pccc_address, parse_pccc_reply,
        },
    },
    server::{cip::dispatch, plc::ServerPlc},
    status::Status,
};

fn exchange(plc: &ServerPlc, pccc_cmd: BytesMut, tns: u16) -> Result<bytes::Bytes, Status> {
    let mut conn = None;
    let req = encode_execute_pccc(&pccc_cmd);
    let reply = dispatch(plc, &mut conn, &req.freeze(), 508);
    let reply = CipReply::parse(reply.freeze()).expect("cip parse");
    let pccc = decode_execute_pccc_reply(&reply)?;
    parse_pccc_reply(&pccc, tns)
}

#[test]
fn slc_int_file_round_trip() {
    let plc = ServerPlc::new(PlcKind::Slc500, &[]);
    plc.add_tag("N7:INT[10]").expect("tag");
    let addr = parse_pccc_address("N7:0").expect("addr");

    let data = 0x1234i16.to_le_bytes();
    exchange(&plc, encode_slc_write(1, &addr, &data), 1).expect("write");

    let payload = exchange(&plc, encode_slc_read(2, &addr, 2), 2).expect("read");
    assert_eq!(&payload[..], &data);
}

#[test]
fn slc_element_addressing() {
    let plc = ServerPlc::new(PlcKind::Slc500, &[]);
    plc.add_tag("N7:INT[10]").expect("tag");

    let mut addr = parse_pccc_address("N7:0").expect("addr");
    addr.element = 3;
    exchange(&plc, encode_slc_write(5, &addr, &0x00FFi16.to_le_bytes()), 5)
        .expect("write");

    // Element 3 starts at byte 6 of the data file.
    let whole = {
        let base = parse_pccc_address("N7:0").expect("addr");
        exchange(&plc, encode_slc_read(6, &base, 20), 6).expect("read")
    };
    assert_eq!(whole[6], 0xFF);
    assert_eq!(whole[7], 0x00);
}

#[test]
fn slc_wrong_file_type_refused() {
    let plc = ServerPlc::new(PlcKind::Slc500, &[]);
    plc.add_tag("N7:INT[10]").expect("tag");

    // Claim it is a float file; the type check must fire.
    let mut addr = parse_pccc_address("N7:0").expect("addr");
    addr.file_type = 0x8A;
    let err = exchange(&plc, encode_slc_read(9, &addr, 4), 9)
        .expect_err("type mismatch");
    assert_eq!(err, Status::RemoteErr(PCCC_ERR_ADDR_NOT_USABLE));
}

#[test]
fn plc5_word_range_round_trip() {
    let plc = ServerPlc::new(PlcKind::Plc5, &[]);
    plc.add_tag("N7:INT[20]").expect("tag");
    let addr = parse_pccc_address("N7:2").expect("addr");

    let data: Vec<u8> = vec![0xAA, 0xBB, 0xCC, 0xDD];
    exchange(&plc, encode_plc5_write(11, &addr, 0, 2, &data), 11).expect("write");

    let payload = exchange(&plc, encode_plc5_read(12, &addr, 0, 2), 12).expect("read");
    assert_eq!(&payload[..], &data[..]);

    // The bytes landed at element 2 of the file.
    let base = parse_pccc_address("N7:0").expect("addr");
    let whole = exchange(&plc, encode_plc5_read(13, &base, 0, 20), 13).expect("read");
    assert_eq!(&whole[4..8], &data[..]);
}

#[test]
fn slc_function_on_plc5_is_refused() {
    let plc = ServerPlc::new(PlcKind::Plc5, &[]);
    plc.add_tag("N7:INT[10]").expect("tag");
    let addr = parse_pccc_address("N7:0").expect("addr");
    let err = exchange(&plc, encode_slc_read(3, &addr, 2), 3).expect_err("wrong dialect");
    assert!(matches!(err, Status::RemoteErr(_)));
}

#[test]
fn unknown_file_number_not_usable() {
    let plc = ServerPlc::new(PlcKind::Slc500, &[]);
    plc.add_tag("N7:INT[10]").expect("tag");
    let mut addr = parse_pccc_address("N7:0").expect("addr");
    addr.file_num = 9;
    let err = exchange(&plc, encode_slc_read(4, &addr, 2), 4).expect_err("no such file");
    assert_eq!(err, Status::RemoteErr(PCCC_ERR_ADDR_NOT_USABLE));
}
