// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session registration, Forward Open, one read, and the polite teardown.

use std::{sync::atomic::Ordering, time::Duration};

use anyhow::Result;
use enip_client_rs::{
    cfg::enums::PlcKind,
    status::Status,
    tag::{accessors, api},
};
use tokio::time::sleep;

use super::common::TestServer;

#[tokio::test]
async fn register_forward_open_read_teardown() -> Result<()> {
    let ts =
        TestServer::start(PlcKind::ControlLogix, &[1, 0], &["TestArr:DINT[10]"]).await?;

    let attrs = ts.attrs("path=1,0&plc=LGX&elem_count=10&name=TestArr");
    let tag = api::create(&attrs, 1000).await.expect("create");
    assert!(tag > 0);
    assert_eq!(api::status(tag), Status::Ok);

    assert_eq!(api::read(tag, 5000).await, Status::Ok);
    let entry = api::entry(tag).expect("entry");
    for i in 0..10 {
        let v = accessors::get_int32(&entry, i * 4).expect("in bounds");
        assert_eq!(v, 0, "fresh tag must read back zeroed");
    }
    drop(entry);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    assert_eq!(api::destroy(tag).await, Status::NotFound);

    // Teardown happens after the grace period.
    sleep(Duration::from_millis(900)).await;

    let c = &ts.plc.counters;
    assert_eq!(c.register_session.load(Ordering::SeqCst), 1);
    assert_eq!(c.forward_open_ok.load(Ordering::SeqCst), 1);
    assert_eq!(c.read_tag.load(Ordering::SeqCst), 1);
    assert_eq!(c.read_tag_frag.load(Ordering::SeqCst), 0);
    assert_eq!(c.forward_close.load(Ordering::SeqCst), 1);
    assert_eq!(c.unregister_session.load(Ordering::SeqCst), 1);
    Ok(())
}
