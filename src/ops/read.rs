// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CIP tag read, including the fragmented continuation.
//!
//! The first exchange is a plain Read Tag. When the reply carries general
//! status 0x06 the payload is a prefix and the engine keeps issuing Read
//! Tag Fragmented requests with the accumulated byte count as the offset,
//! until a reply comes back with status 0x00.

use std::sync::Arc;

use tracing::debug;

use crate::{
    client::{request::TransactOpts, session::Session},
    models::cip::{READ_REPLY_OVERHEAD, encode_read, encode_read_frag},
    ops::common::{OpParams, Transition},
    status::{PlcResult, Status},
};

#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// First exchange: plain Read Tag.
    Start,
    /// Continuation rounds with a byte offset.
    Fragment,
}

/// Everything a CIP read needs across its exchanges.
pub struct ReadCtx {
    session: Arc<Session>,
    params: OpParams,
    path: Vec<u8>,
    elem_count: u16,
    /// Expected total payload, used only for reply-size estimates.
    expected_size: usize,
    /// Whether the target supports the fragmented service at all.
    allow_frag: bool,
    acc: Vec<u8>,
    cip_type: u16,
    state: ReadState,
}

/// Result of a completed read: the CIP element type and the raw bytes.
#[derive(Debug)]
pub struct ReadOutcome {
    pub cip_type: u16,
    pub data: Vec<u8>,
}

impl ReadCtx {
    pub fn new(
        session: Arc<Session>,
        params: OpParams,
        path: Vec<u8>,
        elem_count: u16,
        expected_size: usize,
        allow_frag: bool,
    ) -> Self {
        Self {
            session,
            params,
            path,
            elem_count,
            expected_size,
            allow_frag,
            acc: Vec::with_capacity(expected_size),
            cip_type: 0,
            state: ReadState::Start,
        }
    }

    pub async fn execute(mut self) -> PlcResult<ReadOutcome> {
        loop {
            self.params.check_live()?;
            let tr = match self.state {
                ReadState::Start => self.step_start().await?,
                ReadState::Fragment => self.step_fragment().await?,
            };
            match tr {
                Transition::Next(next) => self.state = next,
                Transition::Done => {
                    return Ok(ReadOutcome { cip_type: self.cip_type, data: self.acc });
                },
            }
        }
    }

    fn opts(&self) -> TransactOpts {
        TransactOpts {
            connected: self.session.use_connected(),
            packable: self.params.allow_packing,
            reply_estimate: self
                .expected_size
                .saturating_sub(self.acc.len())
                .min(self.session.payload_hint())
                + READ_REPLY_OVERHEAD,
            cancel: self.params.cancel.clone(),
            deadline: self.params.deadline,
        }
    }

    async fn step_start(&mut self) -> PlcResult<Transition<ReadState>> {
        let req = encode_read(&self.path, self.elem_count);
        let reply =
            self.session.transact(self.params.tag_id, req, self.opts()).await?;
        reply.check()?;
        let (ty, data) = reply.read_payload()?;
        if data.is_empty() {
            return Err(Status::NoData);
        }
        self.cip_type = ty;
        self.acc.extend_from_slice(&data);
        if !reply.is_partial() {
            return Ok(Transition::Done);
        }
        if !self.allow_frag {
            return Err(Status::Unsupported);
        }
        Ok(Transition::Next(ReadState::Fragment))
    }

    async fn step_fragment(&mut self) -> PlcResult<Transition<ReadState>> {
        let offset = self.acc.len() as u32;
        debug!("read fragment continues at byte {offset}");
        let req = encode_read_frag(&self.path, self.elem_count, offset);
        let reply =
            self.session.transact(self.params.tag_id, req, self.opts()).await?;
        reply.check()?;
        let (ty, data) = reply.read_payload()?;
        if ty != self.cip_type {
            return Err(Status::BadReply);
        }
        if data.is_empty() {
            // A partial reply that moves nothing would loop forever.
            return Err(Status::NoData);
        }
        self.acc.extend_from_slice(&data);
        if reply.is_partial() {
            Ok(Transition::Next(ReadState::Fragment))
        } else {
            Ok(Transition::Done)
        }
    }
}
