// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::atomic::Ordering;

use anyhow::Result;
use enip_client_rs::{
    cfg::enums::PlcKind,
    status::Status,
    tag::{accessors, api},
};

use super::common::TestServer;

#[tokio::test]
async fn slc_int_round_trip() -> Result<()> {
    let ts = TestServer::start(PlcKind::Slc500, &[], &["N7:0:INT[10]"]).await?;
    let tag = api::create(&ts.attrs("cpu=SLC&elem_size=2&elem_count=1&name=N7:0"), 1000)
        .await
        .expect("create");

    let entry = api::entry(tag).expect("entry");
    accessors::set_int16(&entry, 0, 0x1234).expect("set");
    assert_eq!(api::write(tag, 5000).await, Status::Ok);

    accessors::set_int16(&entry, 0, 0).expect("clear");
    assert_eq!(api::read(tag, 5000).await, Status::Ok);
    assert_eq!(accessors::get_int16(&entry, 0).expect("get"), 0x1234);

    assert!(ts.plc.counters.pccc.load(Ordering::SeqCst) >= 2);
    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn micrologix_multi_element_file() -> Result<()> {
    let ts = TestServer::start(PlcKind::MicroLogix, &[], &["N7:0:INT[10]"]).await?;
    let tag = api::create(&ts.attrs("cpu=MicroLogix&elem_size=2&elem_count=10&name=N7:0"), 1000)
        .await
        .expect("create");

    let entry = api::entry(tag).expect("entry");
    for i in 0..10i16 {
        accessors::set_int16(&entry, (i * 2) as usize, i * 100).expect("set");
    }
    assert_eq!(api::write(tag, 5000).await, Status::Ok);
    assert_eq!(api::read(tag, 5000).await, Status::Ok);
    assert_eq!(accessors::get_int16(&entry, 18).expect("get"), 900);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn missing_data_file_reports_remote_error() -> Result<()> {
    let ts = TestServer::start(PlcKind::Slc500, &[], &["N7:0:INT[10]"]).await?;
    let tag = api::create(&ts.attrs("cpu=SLC&elem_size=2&elem_count=1&name=N9:0"), 1000)
        .await
        .expect("create");

    let st = api::read(tag, 5000).await;
    assert!(matches!(st, Status::RemoteErr(_)), "expected a PCCC error, got {st:?}");

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}
