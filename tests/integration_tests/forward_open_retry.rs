// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::atomic::Ordering;

use anyhow::Result;
use enip_client_rs::{cfg::enums::PlcKind, status::Status, tag::api};

use super::common::TestServer;

#[tokio::test]
async fn bounced_forward_opens_are_retried() -> Result<()> {
    let ts = TestServer::start(PlcKind::ControlLogix, &[1, 0], &["T:DINT[4]"]).await?;
    ts.plc.set_reject_fo(3);

    let tag = api::create(&ts.attrs("path=1,0&plc=LGX&elem_count=4&name=T"), 1000)
        .await
        .expect("create");
    assert_eq!(api::read(tag, 5000).await, Status::Ok);

    // Three bounces plus the accepted attempt.
    let c = &ts.plc.counters;
    assert_eq!(c.forward_open_attempts.load(Ordering::SeqCst), 4);
    assert_eq!(c.forward_open_ok.load(Ordering::SeqCst), 1);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn retry_budget_is_finite() -> Result<()> {
    let ts = TestServer::start(PlcKind::ControlLogix, &[1, 0], &["T:DINT[4]"]).await?;
    ts.plc.set_reject_fo(10);

    let tag = api::create(&ts.attrs("path=1,0&plc=LGX&elem_count=4&name=T"), 1000)
        .await
        .expect("create");
    let st = api::read(tag, 5000).await;
    assert!(
        matches!(st, Status::BadStatus { general: 0x01, .. }),
        "expected the forward-open rejection to surface, got {st:?}"
    );

    // Default budget: five attempts, no more.
    assert_eq!(ts.plc.counters.forward_open_attempts.load(Ordering::SeqCst), 5);
    assert_eq!(ts.plc.counters.forward_open_ok.load(Ordering::SeqCst), 0);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}
