// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use enip_client_rs::{
    cfg::enums::PlcKind,
    status::Status,
    tag::{accessors, api},
};

use super::common::TestServer;

#[tokio::test]
async fn write_then_read_back() -> Result<()> {
    let ts =
        TestServer::start(PlcKind::ControlLogix, &[1, 0], &["TestArr:DINT[10]"]).await?;
    let tag = api::create(&ts.attrs("path=1,0&plc=LGX&elem_count=10&name=TestArr"), 1000)
        .await
        .expect("create");

    // Learn the element type and geometry first.
    assert_eq!(api::read(tag, 5000).await, Status::Ok);

    let entry = api::entry(tag).expect("entry");
    for i in 0..10i32 {
        accessors::set_int32(&entry, (i * 4) as usize, i + 1).expect("set");
    }
    assert_eq!(api::write(tag, 5000).await, Status::Ok);

    // Wipe the local buffer, then re-read from the server.
    for i in 0..10 {
        accessors::set_int32(&entry, i * 4, 0).expect("clear");
    }
    assert_eq!(api::read(tag, 5000).await, Status::Ok);
    assert_eq!(accessors::get_int32(&entry, 0).expect("get"), 1);
    assert_eq!(accessors::get_int32(&entry, 36).expect("get"), 10);

    // The server-side buffer holds the same bytes.
    let server_copy = ts
        .plc
        .with_tag(|t| t.name == "TestArr", |t| t.data.clone())
        .expect("server tag");
    assert_eq!(&server_copy[..4], &1i32.to_le_bytes());
    assert_eq!(&server_copy[36..], &10i32.to_le_bytes());

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn consecutive_writes_arrive_in_order() -> Result<()> {
    let ts = TestServer::start(PlcKind::ControlLogix, &[1, 0], &["V:DINT[1]"]).await?;
    let tag = api::create(&ts.attrs("path=1,0&plc=LGX&elem_count=1&name=V"), 1000)
        .await
        .expect("create");
    assert_eq!(api::read(tag, 5000).await, Status::Ok);

    let entry = api::entry(tag).expect("entry");
    accessors::set_int32(&entry, 0, 41).expect("set");
    assert_eq!(api::write(tag, 5000).await, Status::Ok);
    accessors::set_int32(&entry, 0, 42).expect("set");
    assert_eq!(api::write(tag, 5000).await, Status::Ok);

    assert_eq!(api::read(tag, 5000).await, Status::Ok);
    assert_eq!(accessors::get_int32(&entry, 0).expect("get"), 42);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}
