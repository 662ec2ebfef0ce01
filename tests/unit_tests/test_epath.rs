// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use enip_client_rs::models::{
    cip::encode_read,
    epath::{TagPath, encode_tag_path},
};
use hex_literal::hex;

fn symbolic(name: &str) -> Vec<u8> {
    match encode_tag_path(name).expect("encode") {
        TagPath::Symbolic(p) => p,
        other => panic!("expected symbolic path, got {other:?}"),
    }
}

#[test]
fn even_length_names_are_not_padded() {
    assert_eq!(symbolic("ab"), vec![0x91, 0x02, b'a', b'b']);
    assert_eq!(symbolic("abc"), vec![0x91, 0x03, b'a', b'b', b'c', 0x00]);
}

#[test]
fn member_segment_widths() {
    let p = symbolic("A[255]");
    assert_eq!(&p[4..], &hex!("28 ff"));
    let p = symbolic("A[256]");
    assert_eq!(&p[4..], &hex!("29 00 00 01"));
    let p = symbolic("A[65536]");
    assert_eq!(&p[4..], &hex!("2a 00 00 00 01 00"));
}

#[test]
fn full_read_request_for_program_tag() {
    let path = symbolic("Program:Main.cnt");
    let req = encode_read(&path, 1);
    // service, path words, then the two symbolic segments
    assert_eq!(req[0], 0x4C);
    assert_eq!(req[1] as usize * 2, path.len());
    let expected: Vec<u8> =
        [&[0x91u8, 0x0C][..], b"Program:Main", &[0x91, 0x03], b"cnt", &[0x00]].concat();
    assert_eq!(&path, &expected);
}

#[test]
fn three_subscripts_in_order() {
    let p = symbolic("Cube[1,2,3]");
    let tail = &p[p.len() - 6..];
    assert_eq!(tail, &hex!("28 01 28 02 28 03"));
}

#[test]
fn underscore_names_accepted() {
    let p = symbolic("_private_tag");
    assert_eq!(p[1], 12);
}
