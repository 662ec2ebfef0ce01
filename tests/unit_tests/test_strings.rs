// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! String and scalar accessors over an in-memory tag buffer.

use std::sync::Arc;

use enip_client_rs::{
    cfg::attributes::TagOptions,
    status::Status,
    tag::{
        accessors,
        runtime::{Backend, LibKind, TagEntry},
    },
};

/// A tag that never touches the wire, with a caller-controlled buffer.
fn scratch_tag(len: usize) -> Arc<TagEntry> {
    TagEntry::new(
        999,
        TagOptions::library_defaults(),
        Backend::Library(LibKind::Version),
        vec![0u8; len],
        1,
    )
}

#[test]
fn scalar_round_trips() {
    let tag = scratch_tag(64);
    accessors::set_int32(&tag, 0, -123456).expect("set");
    assert_eq!(accessors::get_int32(&tag, 0).expect("get"), -123456);

    accessors::set_uint16(&tag, 4, 0xBEEF).expect("set");
    assert_eq!(accessors::get_uint16(&tag, 4).expect("get"), 0xBEEF);

    accessors::set_float32(&tag, 8, 3.5f32).expect("set");
    assert_eq!(accessors::get_float32(&tag, 8).expect("get"), 3.5f32);

    accessors::set_float64(&tag, 16, -0.25f64).expect("set");
    assert_eq!(accessors::get_float64(&tag, 16).expect("get"), -0.25f64);

    accessors::set_int64(&tag, 24, i64::MIN).expect("set");
    assert_eq!(accessors::get_int64(&tag, 24).expect("get"), i64::MIN);
}

#[test]
fn little_endian_layout_in_buffer() {
    let tag = scratch_tag(8);
    accessors::set_uint32(&tag, 0, 0x0403_0201).expect("set");
    let mut raw = [0u8; 4];
    accessors::get_block(&tag, 0, &mut raw).expect("block");
    assert_eq!(raw, [1, 2, 3, 4]);
}

#[test]
fn out_of_bounds_is_reported() {
    let tag = scratch_tag(4);
    assert_eq!(accessors::get_int32(&tag, 1), Err(Status::OutOfBounds));
    assert_eq!(accessors::set_int64(&tag, 0, 1), Err(Status::OutOfBounds));
    let mut buf = [0u8; 8];
    assert_eq!(accessors::get_block(&tag, 0, &mut buf), Err(Status::OutOfBounds));
}

#[test]
fn bit_accessors() {
    let tag = scratch_tag(4);
    accessors::set_bit(&tag, 10, true).expect("set");
    assert!(accessors::get_bit(&tag, 10).expect("get"));
    assert_eq!(accessors::get_uint8(&tag, 1).expect("byte"), 0b100);
    accessors::set_bit(&tag, 10, false).expect("clear");
    assert!(!accessors::get_bit(&tag, 10).expect("get"));
}

#[test]
fn logix_string_round_trip() {
    // Default descriptor: DINT count word, 82 chars, 88 bytes per element.
    let tag = scratch_tag(88 * 2);
    assert_eq!(accessors::get_string_capacity(&tag), 82);
    assert_eq!(accessors::get_string_total_length(&tag), 88);

    accessors::set_string(&tag, 0, "hello PLC").expect("set");
    assert_eq!(accessors::get_string_length(&tag, 0).expect("len"), 9);
    assert_eq!(accessors::get_string(&tag, 0).expect("get"), "hello PLC");

    // Second element is independent.
    accessors::set_string(&tag, 88, "x").expect("set");
    assert_eq!(accessors::get_string(&tag, 88).expect("get"), "x");
    assert_eq!(accessors::get_string(&tag, 0).expect("get"), "hello PLC");
}

#[test]
fn string_capacity_enforced() {
    let tag = scratch_tag(88);
    let too_long = "x".repeat(83);
    assert_eq!(accessors::set_string(&tag, 0, &too_long), Err(Status::TooLarge));
}

#[test]
fn count_word_written_little_endian() {
    let tag = scratch_tag(88);
    accessors::set_string(&tag, 0, "abcd").expect("set");
    assert_eq!(accessors::get_uint32(&tag, 0).expect("count"), 4);
    assert_eq!(accessors::get_uint8(&tag, 4).expect("first"), b'a');
}
