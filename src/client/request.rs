// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One queued wire transaction: an encoded CIP request plus everything the
//! session worker needs to route, pack, cancel and answer it.

use bytes::BytesMut;
use tokio::{sync::oneshot, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{models::cip::CipReply, status::PlcResult};

/// Options for a single wire transaction.
#[derive(Debug)]
pub struct TransactOpts {
    /// Send over the CIP connection (SendUnitData) instead of unconnected
    /// SendRRData.
    pub connected: bool,
    /// Eligible for Multiple-Service-Packet packing (Read/Write Tag family
    /// on a tag with `allow_packing`).
    pub packable: bool,
    /// Estimated reply size, used by the packer's reply-budget check.
    pub reply_estimate: usize,
    /// Abort signal for this request only.
    pub cancel: CancellationToken,
    /// Hard deadline; the worker answers `Timeout` past it.
    pub deadline: Option<Instant>,
}

/// A request queued on a session.
#[derive(Debug)]
pub struct WireRequest {
    pub tag_id: i32,
    pub cip: BytesMut,
    pub opts: TransactOpts,
    pub reply_tx: oneshot::Sender<PlcResult<CipReply>>,
}

impl WireRequest {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.opts.cancel.is_cancelled()
    }

    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.opts.deadline.is_some_and(|d| now >= d)
    }
}
