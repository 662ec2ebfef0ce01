// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Multiple-Service-Packet batching across tags sharing a session.

use std::{sync::atomic::Ordering, time::Duration};

use anyhow::Result;
use enip_client_rs::{
    cfg::enums::PlcKind,
    status::Status,
    tag::{accessors, api},
};
use tokio::time::sleep;

use super::common::TestServer;

async fn settle(tag: i32) {
    for _ in 0..500 {
        if !api::status(tag).is_pending() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn queued_reads_pack_into_one_wire_operation() -> Result<()> {
    let ts = TestServer::start(
        PlcKind::ControlLogix,
        &[1, 0],
        &["P0:DINT[4]", "P1:DINT[4]", "P2:DINT[4]", "P3:DINT[4]"],
    )
    .await?;

    // Distinct values per tag so cross-routing would be caught.
    for i in 0..4i32 {
        ts.plc
            .with_tag(
                |t| t.name == format!("P{i}"),
                |t| t.data[..4].copy_from_slice(&(100 + i).to_le_bytes()),
            )
            .expect("server tag");
    }

    let mut tags = Vec::new();
    for i in 0..4 {
        let t = api::create(
            &ts.attrs(&format!("path=1,0&plc=LGX&elem_count=4&name=P{i}")),
            1000,
        )
        .await
        .expect("create");
        tags.push(t);
    }

    // The first read occupies the session worker; the rest land in the
    // queue together and are eligible for packing.
    for &t in &tags {
        let st = api::read(t, 0).await;
        assert!(st.is_pending(), "async read should be pending, got {st:?}");
    }
    for &t in &tags {
        settle(t).await;
        assert_eq!(api::status(t), Status::Ok);
    }

    // Every tag got exactly its own element values.
    for (i, &t) in tags.iter().enumerate() {
        let entry = api::entry(t).expect("entry");
        assert_eq!(
            accessors::get_int32(&entry, 0).expect("get"),
            100 + i as i32,
            "tag P{i} received the wrong sub-reply"
        );
    }

    let c = &ts.plc.counters;
    let reads = c.read_tag.load(Ordering::SeqCst);
    let packs = c.multi_packet.load(Ordering::SeqCst);
    assert_eq!(reads, 4, "each tag is read exactly once");
    assert!(packs >= 1, "at least one Multiple Service Packet expected");

    for t in tags {
        assert_eq!(api::destroy(t).await, Status::Ok);
    }
    Ok(())
}

#[tokio::test]
async fn packing_can_be_opted_out() -> Result<()> {
    let ts = TestServer::start(
        PlcKind::ControlLogix,
        &[1, 0],
        &["Q0:DINT[4]", "Q1:DINT[4]", "Q2:DINT[4]"],
    )
    .await?;

    let mut tags = Vec::new();
    for i in 0..3 {
        let t = api::create(
            &ts.attrs(&format!(
                "path=1,0&plc=LGX&elem_count=4&name=Q{i}&allow_packing=0"
            )),
            1000,
        )
        .await
        .expect("create");
        tags.push(t);
    }

    for &t in &tags {
        let _ = api::read(t, 0).await;
    }
    for &t in &tags {
        settle(t).await;
        assert_eq!(api::status(t), Status::Ok);
    }

    assert_eq!(ts.plc.counters.multi_packet.load(Ordering::SeqCst), 0);
    assert_eq!(ts.plc.counters.read_tag.load(Ordering::SeqCst), 3);

    for t in tags {
        assert_eq!(api::destroy(t).await, Status::Ok);
    }
    Ok(())
}
