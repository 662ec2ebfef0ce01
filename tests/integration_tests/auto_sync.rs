// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use enip_client_rs::{
    cfg::enums::PlcKind,
    status::{Event, Status},
    tag::{accessors, api},
};
use tokio::time::sleep;

use super::common::TestServer;

#[tokio::test]
async fn auto_read_cadence_and_freshness() -> Result<()> {
    let ts = TestServer::start(PlcKind::ControlLogix, &[1, 0], &["Live:DINT[1]"]).await?;

    let read_starts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&read_starts);
    let tag = api::create_ex(
        &ts.attrs("path=1,0&plc=LGX&elem_count=1&name=Live&auto_sync_read_ms=200"),
        Arc::new(move |_id, event, _status| {
            if event == Event::ReadStarted {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }),
        1000,
    )
    .await
    .expect("create");

    sleep(Duration::from_millis(2000)).await;
    let ticks = read_starts.load(Ordering::SeqCst);
    assert!(
        (9..=11).contains(&ticks),
        "expected 9 to 11 auto reads over 2000 ms at 200 ms, saw {ticks}"
    );

    // A server-side change shows up within one period.
    ts.plc
        .with_tag(|t| t.name == "Live", |t| t.data.copy_from_slice(&77i32.to_le_bytes()))
        .expect("server tag");
    sleep(Duration::from_millis(450)).await;
    let entry = api::entry(tag).expect("entry");
    assert_eq!(accessors::get_int32(&entry, 0).expect("get"), 77);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn auto_write_coalesces_mutations() -> Result<()> {
    let ts = TestServer::start(PlcKind::ControlLogix, &[1, 0], &["Sink:DINT[4]"]).await?;

    let tag = api::create(
        &ts.attrs("path=1,0&plc=LGX&elem_count=4&name=Sink&auto_sync_write_ms=100"),
        1000,
    )
    .await
    .expect("create");
    assert_eq!(api::read(tag, 5000).await, Status::Ok);
    let writes_before = ts.plc.counters.write_tag.load(Ordering::SeqCst);

    // A burst of set_* calls within the window becomes one wire write.
    let entry = api::entry(tag).expect("entry");
    for i in 0..4 {
        accessors::set_int32(&entry, i * 4, (i as i32) + 10).expect("set");
    }
    sleep(Duration::from_millis(400)).await;

    let server_copy = ts
        .plc
        .with_tag(|t| t.name == "Sink", |t| t.data.clone())
        .expect("server tag");
    assert_eq!(&server_copy[0..4], &10i32.to_le_bytes());
    assert_eq!(&server_copy[12..16], &13i32.to_le_bytes());

    let writes_after = ts.plc.counters.write_tag.load(Ordering::SeqCst);
    assert_eq!(writes_after - writes_before, 1, "mutations must coalesce");

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}
