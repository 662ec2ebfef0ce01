// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use enip_client_rs::{
    cfg::{attributes::TagOptions, enums::PlcKind},
    status::Status,
};

#[test]
fn pccc_defaults_to_unconnected() {
    let opts = TagOptions::parse(
        "protocol=ab_eip&gateway=127.0.0.1&cpu=SLC&elem_size=2&elem_count=1&name=N7:0",
    )
    .expect("parse");
    assert_eq!(opts.plc, PlcKind::Slc500);
    assert!(!opts.use_connected_msg);
    assert_eq!(opts.elem_size, Some(2));
}

#[test]
fn connected_override_wins() {
    let opts = TagOptions::parse(
        "protocol=ab_eip&gateway=h&cpu=SLC&name=N7:0&use_connected_msg=1",
    )
    .expect("parse");
    assert!(opts.use_connected_msg);

    let opts = TagOptions::parse(
        "protocol=ab_eip&gateway=h&path=1,0&plc=lgx&name=T&use_connected_msg=0",
    )
    .expect("parse");
    assert!(!opts.use_connected_msg);
}

#[test]
fn timers_and_cache_options() {
    let opts = TagOptions::parse(
        "protocol=ab-eip&gateway=h&path=1,0&plc=lgx&name=T\
         &read_cache_ms=500&auto_sync_read_ms=200&auto_sync_write_ms=50\
         &allow_packing=0&connection_group_id=3",
    )
    .expect("parse");
    assert_eq!(opts.read_cache_ms, 500);
    assert_eq!(opts.auto_sync_read_ms, 200);
    assert_eq!(opts.auto_sync_write_ms, 50);
    assert!(!opts.allow_packing);
    assert_eq!(opts.connection_group_id, 3);
}

#[test]
fn cip_payload_bounds() {
    let ok = TagOptions::parse(
        "protocol=ab_eip&gateway=h&path=1,0&plc=lgx&name=T&cip_payload=4002",
    )
    .expect("parse");
    assert_eq!(ok.cip_payload, 4002);

    assert_eq!(
        TagOptions::parse(
            "protocol=ab_eip&gateway=h&path=1,0&plc=lgx&name=T&cip_payload=9000",
        ),
        Err(Status::BadConfig)
    );
    assert_eq!(
        TagOptions::parse(
            "protocol=ab_eip&gateway=h&path=1,0&plc=lgx&name=T&cip_payload=100",
        ),
        Err(Status::BadConfig)
    );
}

#[test]
fn odd_route_path_rejected() {
    assert_eq!(
        TagOptions::parse("protocol=ab_eip&gateway=h&path=1,0,2&plc=lgx&name=T"),
        Err(Status::BadConfig)
    );
}

#[test]
fn malformed_pairs_rejected() {
    assert_eq!(
        TagOptions::parse("protocol=ab_eip&gateway=h&plainword&name=T"),
        Err(Status::BadConfig)
    );
}
