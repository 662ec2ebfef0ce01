// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PCCC bounded transfers.
//!
//! PCCC has no fragmented services; one exchange moves at most 240 data
//! bytes. Larger tags are covered by sequential commands: the SLC dialect
//! advances the element number, the PLC5 word-range dialect carries an
//! explicit byte offset.

use std::sync::{Arc, atomic::{AtomicU16, Ordering}};

use bytes::BytesMut;
use tracing::debug;

use crate::{
    client::{request::TransactOpts, session::Session},
    models::{
        cip::CipReply,
        pccc::{
            MAX_PCCC_TRANSFER, PcccAddress, decode_execute_pccc_reply,
            encode_execute_pccc, encode_plc5_read, encode_plc5_write, encode_slc_read,
            encode_slc_write, parse_pccc_reply,
        },
    },
    ops::common::OpParams,
    status::{PlcResult, Status},
};

/// Transaction-number generator shared by every PCCC exchange in the
/// process; the target only echoes it back.
static NEXT_TNS: AtomicU16 = AtomicU16::new(1);

fn next_tns() -> u16 {
    NEXT_TNS.fetch_add(1, Ordering::Relaxed)
}

pub struct PcccCtx {
    session: Arc<Session>,
    params: OpParams,
    addr: PcccAddress,
    /// PLC5 word-range dialect instead of SLC protected typed.
    plc5: bool,
}

impl PcccCtx {
    pub fn new(
        session: Arc<Session>,
        params: OpParams,
        addr: PcccAddress,
        plc5: bool,
    ) -> Self {
        Self { session, params, addr, plc5 }
    }

    /// Bytes one exchange may move for this element size, element-aligned.
    fn chunk_size(&self) -> usize {
        let elem = self.addr.elem_size.max(1) as usize;
        if elem >= MAX_PCCC_TRANSFER {
            return elem; // single oversized element per exchange
        }
        MAX_PCCC_TRANSFER - (MAX_PCCC_TRANSFER % elem)
    }

    async fn exchange(&self, pccc_cmd: &[u8], tns: u16) -> PlcResult<bytes::Bytes> {
        let cip: BytesMut = encode_execute_pccc(pccc_cmd);
        let opts = TransactOpts {
            connected: self.session.use_connected(),
            // PCCC never rides in a Multiple Service Packet.
            packable: false,
            reply_estimate: MAX_PCCC_TRANSFER + 16,
            cancel: self.params.cancel.clone(),
            deadline: self.params.deadline,
        };
        let reply: CipReply =
            self.session.transact(self.params.tag_id, cip, opts).await?;
        let pccc = decode_execute_pccc_reply(&reply)?;
        parse_pccc_reply(&pccc, tns)
    }

    /// Read `total` bytes starting at the tag's base address.
    pub async fn read(&self, total: usize) -> PlcResult<Vec<u8>> {
        let elem = self.addr.elem_size.max(1) as usize;
        let chunk = self.chunk_size();
        let mut acc = Vec::with_capacity(total);

        while acc.len() < total {
            self.params.check_live()?;
            let want = (total - acc.len()).min(chunk);
            let tns = next_tns();
            let cmd = if self.plc5 {
                encode_plc5_read(
                    tns,
                    &self.addr,
                    acc.len() as u16,
                    (want / elem).max(1) as u16,
                )
            } else {
                let mut a = self.addr;
                a.element += (acc.len() / elem) as u16;
                encode_slc_read(tns, &a, want as u8)
            };
            debug!("pccc read chunk at byte {} ({want} bytes)", acc.len());
            let payload = self.exchange(&cmd, tns).await?;
            if payload.is_empty() {
                return Err(Status::NoData);
            }
            if payload.len() > want {
                return Err(Status::BadReply);
            }
            acc.extend_from_slice(&payload);
            if payload.len() < want {
                // Short reply: the file ends here.
                break;
            }
        }
        if acc.len() != total {
            return Err(Status::TooSmall);
        }
        Ok(acc)
    }

    /// Write the whole buffer starting at the tag's base address.
    pub async fn write(&self, data: &[u8]) -> PlcResult<()> {
        let elem = self.addr.elem_size.max(1) as usize;
        let chunk = self.chunk_size();
        let mut done = 0usize;

        while done < data.len() {
            self.params.check_live()?;
            let end = (done + chunk).min(data.len());
            let tns = next_tns();
            let cmd = if self.plc5 {
                encode_plc5_write(
                    tns,
                    &self.addr,
                    done as u16,
                    ((end - done) / elem).max(1) as u16,
                    &data[done..end],
                )
            } else {
                let mut a = self.addr;
                a.element += (done / elem) as u16;
                encode_slc_write(tns, &a, &data[done..end])
            };
            debug!("pccc write chunk [{done}, {end})");
            let payload = self.exchange(&cmd, tns).await?;
            if !payload.is_empty() {
                return Err(Status::BadReply);
            }
            done = end;
        }
        Ok(())
    }
}
