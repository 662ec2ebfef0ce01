// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Greedy Multiple-Service-Packet batching.
//!
//! When the worker drains its queue it may fold a run of consecutive
//! compatible requests into one wire operation. Compatible means: every
//! request opted into packing, all share the same connected-ness, and both
//! the packed request and the estimated packed reply stay inside the session
//! payload minus a safety margin. There is no hard count limit; the margin
//! is the only bound.

use std::collections::VecDeque;

use crate::{client::request::WireRequest, models::cip::multi_service_len};

/// Safety margin subtracted from both payload directions.
pub const PACK_MARGIN: usize = 8;

/// Reply-side fixed overhead: MSP reply header + count word.
const REPLY_HEADER: usize = 6;

/// Pop the next batch off `pending`. Always returns at least one request
/// (the head); more only when the packing rules hold for the whole run.
pub fn take_batch(
    pending: &mut VecDeque<WireRequest>,
    max_c2s: usize,
    max_s2c: usize,
) -> Vec<WireRequest> {
    let Some(head) = pending.pop_front() else {
        return Vec::new();
    };

    if !head.opts.packable {
        return vec![head];
    }

    let connected = head.opts.connected;
    let mut lens = vec![head.cip.len()];
    let mut reply_budget = REPLY_HEADER + 2 + head.opts.reply_estimate;
    let mut batch = vec![head];

    while let Some(next) = pending.front() {
        if !next.opts.packable || next.opts.connected != connected {
            break;
        }
        lens.push(next.cip.len());
        let req_size = multi_service_len(&lens);
        let reply_size = reply_budget + 2 + next.opts.reply_estimate;
        if req_size + PACK_MARGIN > max_c2s || reply_size + PACK_MARGIN > max_s2c {
            lens.pop();
            break;
        }
        reply_budget = reply_size;
        let next = match pending.pop_front() {
            Some(r) => r,
            None => break,
        };
        batch.push(next);
    }

    batch
}
