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
async fn large_tag_reads_through_fragments() -> Result<()> {
    let ts = TestServer::start(PlcKind::ControlLogix, &[1, 0], &["Big:DINT[2000]"]).await?;

    // 8000 bytes of recognizable pattern on the server side.
    let pattern: Vec<u8> = (0..8000usize).map(|i| (i % 251) as u8).collect();
    ts.plc
        .with_tag(|t| t.name == "Big", |t| t.data.copy_from_slice(&pattern))
        .expect("server tag");

    let tag = api::create(&ts.attrs("path=1,0&plc=LGX&elem_count=2000&name=Big"), 1000)
        .await
        .expect("create");
    assert_eq!(api::read(tag, 10_000).await, Status::Ok);

    let entry = api::entry(tag).expect("entry");
    let mut local = vec![0u8; 8000];
    accessors::get_block(&entry, 0, &mut local).expect("block");
    assert_eq!(local, pattern);

    // First frame is a plain Read Tag, the continuation frames are Read Tag
    // Fragmented with growing offsets.
    let c = &ts.plc.counters;
    assert_eq!(c.read_tag.load(Ordering::SeqCst), 1);
    assert!(c.read_tag_frag.load(Ordering::SeqCst) >= 2, "8000 bytes at 508 must fragment");

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn large_write_goes_fragmented() -> Result<()> {
    let ts = TestServer::start(PlcKind::ControlLogix, &[1, 0], &["Out:DINT[500]"]).await?;
    let tag = api::create(&ts.attrs("path=1,0&plc=LGX&elem_count=500&name=Out"), 1000)
        .await
        .expect("create");
    assert_eq!(api::read(tag, 5000).await, Status::Ok);

    let entry = api::entry(tag).expect("entry");
    let pattern: Vec<u8> = (0..2000usize).map(|i| (i % 253) as u8).collect();
    accessors::set_block(&entry, 0, &pattern).expect("fill");
    assert_eq!(api::write(tag, 10_000).await, Status::Ok);

    let server_copy = ts
        .plc
        .with_tag(|t| t.name == "Out", |t| t.data.clone())
        .expect("server tag");
    assert_eq!(server_copy, pattern);

    let c = &ts.plc.counters;
    assert!(c.write_tag_frag.load(Ordering::SeqCst) >= 2, "2000 bytes at 508 must chunk");

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}
