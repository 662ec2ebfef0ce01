// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CIP tag write, plain or fragmented.
//!
//! When the whole value plus framing fits in one request the engine issues a
//! single Write Tag. Otherwise it chunks the buffer at element boundaries
//! and issues Write Tag Fragmented exchanges, each carrying its byte offset;
//! every chunk but the last has the same size.

use std::sync::Arc;

use tracing::debug;

use crate::{
    client::{request::TransactOpts, session::Session},
    models::cip::{WRITE_REQ_OVERHEAD, encode_write, encode_write_frag},
    ops::common::{OpParams, Transition},
    status::{PlcResult, Status},
};

#[derive(Debug, Clone, Copy)]
enum WriteState {
    Single,
    Fragment { offset: usize },
}

pub struct WriteCtx {
    session: Arc<Session>,
    params: OpParams,
    path: Vec<u8>,
    cip_type: u16,
    elem_count: u16,
    elem_size: usize,
    data: Vec<u8>,
    chunk: usize,
    allow_frag: bool,
    state: WriteState,
}

impl WriteCtx {
    pub fn new(
        session: Arc<Session>,
        params: OpParams,
        path: Vec<u8>,
        cip_type: u16,
        elem_count: u16,
        elem_size: usize,
        data: Vec<u8>,
        allow_frag: bool,
    ) -> PlcResult<Self> {
        let budget = session
            .payload_hint()
            .saturating_sub(WRITE_REQ_OVERHEAD + path.len());
        if budget == 0 {
            return Err(Status::TooLarge);
        }
        let single = data.len() <= budget;

        // Chunks must break on element boundaries.
        let elem_size = elem_size.max(1);
        let mut chunk = budget - (budget % elem_size);
        if chunk == 0 {
            chunk = budget; // elements larger than a frame go byte-wise
        }

        if !single && !allow_frag {
            return Err(Status::TooLarge);
        }

        Ok(Self {
            session,
            params,
            path,
            cip_type,
            elem_count,
            elem_size,
            data,
            chunk,
            allow_frag,
            state: if single { WriteState::Single } else { WriteState::Fragment { offset: 0 } },
        })
    }

    pub async fn execute(mut self) -> PlcResult<()> {
        loop {
            self.params.check_live()?;
            let tr = match self.state {
                WriteState::Single => self.step_single().await?,
                WriteState::Fragment { offset } => self.step_fragment(offset).await?,
            };
            match tr {
                Transition::Next(next) => self.state = next,
                Transition::Done => return Ok(()),
            }
        }
    }

    fn opts(&self) -> TransactOpts {
        TransactOpts {
            connected: self.session.use_connected(),
            packable: self.params.allow_packing,
            reply_estimate: 4,
            cancel: self.params.cancel.clone(),
            deadline: self.params.deadline,
        }
    }

    async fn step_single(&mut self) -> PlcResult<Transition<WriteState>> {
        let req = encode_write(&self.path, self.cip_type, self.elem_count, &self.data);
        let reply =
            self.session.transact(self.params.tag_id, req, self.opts()).await?;
        reply.check()?;
        Ok(Transition::Done)
    }

    async fn step_fragment(&mut self, offset: usize) -> PlcResult<Transition<WriteState>> {
        debug_assert!(self.allow_frag);
        debug_assert!(offset % self.elem_size == 0 || self.elem_size > self.chunk);
        let end = (offset + self.chunk).min(self.data.len());
        debug!("write fragment [{offset}, {end}) of {}", self.data.len());
        let req = encode_write_frag(
            &self.path,
            self.cip_type,
            self.elem_count,
            offset as u32,
            &self.data[offset..end],
        );
        let reply =
            self.session.transact(self.params.tag_id, req, self.opts()).await?;
        reply.check()?;
        if end >= self.data.len() {
            Ok(Transition::Done)
        } else {
            Ok(Transition::Next(WriteState::Fragment { offset: end }))
        }
    }
}
