// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One session per remote endpoint: owns the TCP socket, the EIP session
//! handle and the optional CIP connection, serializes outbound requests and
//! routes replies back to their tags.
//!
//! All socket I/O happens on a single worker task. The worker drains its
//! queue, optionally folds a run of compatible requests into a Multiple
//! Service Packet, writes one frame, then waits for the matching reply while
//! servicing aborts and timeouts on a 10 ms poll.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use rand::RngExt;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    cfg::{
        attributes::{DEFAULT_CIP_PAYLOAD, TagOptions},
        enums::PlcKind,
    },
    client::{
        packer,
        request::{TransactOpts, WireRequest},
    },
    models::{
        cip::{CipReply, decode_multi_reply, encode_multi_service},
        cpf,
        eip::{self, EIP_HEADER_LEN, EipCommand, EipFrame, EipHeader},
        epath::connection_path,
        forward::{
            ForwardOpenRequest, encode_forward_close, encode_forward_open,
            parse_forward_open_reply,
        },
    },
    status::{PlcResult, Status},
};

/// Poll granularity of the worker while a request is on the wire.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Ceiling for a transaction whose caller did not supply a deadline.
const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the worker keeps draining the wire for a reply every requester
/// has already given up on, before declaring the link dead.
const DISCARD_WINDOW: Duration = Duration::from_secs(2);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

const FORWARD_OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Vendor id this library reports in Forward Open requests.
const VENDOR_ID: u16 = 0xF33D;

/// Everything that identifies one shareable session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host: String,
    pub port: u16,
    pub route: Vec<u8>,
    pub plc: PlcKind,
    pub group: i32,
}

#[derive(Debug, Clone)]
pub struct SessionCfg {
    pub key: SessionKey,
    pub use_connected: bool,
    pub cip_payload: u16,
    pub forward_open_retries: u32,
}

impl SessionCfg {
    pub fn from_options(opts: &TagOptions) -> SessionCfg {
        SessionCfg {
            key: SessionKey {
                host: opts.gateway_host.clone(),
                port: opts.gateway_port,
                route: opts.path.clone(),
                plc: opts.plc,
                group: opts.connection_group_id,
            },
            use_connected: opts.use_connected_msg,
            cip_payload: opts.cip_payload,
            forward_open_retries: opts.forward_open_retries,
        }
    }
}

/// Shared handle to a session. Tags hold an `Arc<Session>` and enqueue
/// transactions; the worker task owns the socket.
#[derive(Debug)]
pub struct Session {
    cfg: SessionCfg,
    queue_tx: mpsc::UnboundedSender<WireRequest>,
    cancel: CancellationToken,
    tag_refs: AtomicUsize,
    faulted: AtomicBool,
}

impl Session {
    pub fn open(cfg: SessionCfg) -> Arc<Session> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let session = Arc::new(Session {
            cfg: cfg.clone(),
            queue_tx,
            cancel: cancel.clone(),
            tag_refs: AtomicUsize::new(0),
            faulted: AtomicBool::new(false),
        });

        let worker = Worker {
            cfg,
            queue_rx,
            pending: VecDeque::new(),
            cancel,
            link: None,
            session: Arc::downgrade(&session),
        };
        tokio::spawn(async move {
            worker.run().await;
        });

        session
    }

    #[inline]
    pub fn key(&self) -> &SessionKey {
        &self.cfg.key
    }

    #[inline]
    pub fn use_connected(&self) -> bool {
        self.cfg.use_connected
    }

    /// Payload the fragmentation engine should plan around.
    #[inline]
    pub fn payload_hint(&self) -> usize {
        if self.cfg.use_connected {
            self.cfg.cip_payload as usize
        } else {
            DEFAULT_CIP_PAYLOAD as usize
        }
    }

    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    pub fn acquire(&self) {
        self.tag_refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the remaining number of hosted tags.
    pub fn release(&self) -> usize {
        self.tag_refs.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    #[inline]
    pub fn tag_refs(&self) -> usize {
        self.tag_refs.load(Ordering::SeqCst)
    }

    /// Queue one CIP request and wait for its reply.
    pub async fn transact(
        &self,
        tag_id: i32,
        cip: BytesMut,
        opts: TransactOpts,
    ) -> PlcResult<CipReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = WireRequest { tag_id, cip, opts, reply_tx };
        self.queue_tx.send(req).map_err(|_| Status::BadConnection)?;
        reply_rx.await.map_err(|_| Status::BadConnection)?
    }

    /// Tear the session down: the worker unregisters and closes the socket,
    /// all queued requests fail with `Abort`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Live TCP link state, only ever touched by the worker.
struct Link {
    stream: TcpStream,
    /// Growable receive buffer; inbound frames are parsed out of it so a
    /// poll tick never loses partially-read bytes.
    rx: BytesMut,
    session_handle: u32,
    next_context: u64,
    conn: Option<CipConnection>,
}

/// Parse one complete encapsulation frame out of the receive buffer, if a
/// whole one has arrived.
fn try_parse_frame(rx: &mut BytesMut) -> PlcResult<Option<EipFrame>> {
    if rx.len() < EIP_HEADER_LEN {
        return Ok(None);
    }
    let header = EipHeader::parse(rx)?.clone();
    let total = EIP_HEADER_LEN + header.payload_len();
    if rx.len() < total {
        return Ok(None);
    }
    let mut frame = rx.split_to(total);
    let payload = frame.split_off(EIP_HEADER_LEN).freeze();
    Ok(Some(EipFrame { header, payload }))
}

struct CipConnection {
    server_conn_id: u32,
    client_conn_id: u32,
    conn_serial: u16,
    orig_serial: u32,
    seq: u16,
    payload: u16,
}

/// The per-request slots of one in-flight wire transaction. A slot goes
/// `None` once its request has been answered (abort/timeout) while the
/// frame is still on the wire; Multiple-Service-Packet routing stays
/// aligned that way.
type Slots = Vec<Option<WireRequest>>;

struct Worker {
    cfg: SessionCfg,
    queue_rx: mpsc::UnboundedReceiver<WireRequest>,
    pending: VecDeque<WireRequest>,
    cancel: CancellationToken,
    link: Option<Link>,
    session: std::sync::Weak<Session>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if self.pending.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    maybe = self.queue_rx.recv() => match maybe {
                        Some(r) => self.pending.push_back(r),
                        None => break,
                    },
                }
            }
            while let Ok(r) = self.queue_rx.try_recv() {
                self.pending.push_back(r);
            }

            self.prune_dead_requests();
            if self.cancel.is_cancelled() {
                break;
            }

            let (c2s, s2c) = self.payload_limits();
            let batch = packer::take_batch(&mut self.pending, c2s, s2c);
            if batch.is_empty() {
                continue;
            }
            self.execute_batch(batch).await;
        }

        // Shutdown: fail whatever is still queued, then close politely.
        while let Some(r) = self.pending.pop_front() {
            answer(r, Err(Status::Abort));
        }
        while let Ok(r) = self.queue_rx.try_recv() {
            answer(r, Err(Status::Abort));
        }
        self.teardown_link().await;
    }

    fn payload_limits(&self) -> (usize, usize) {
        match self.link.as_ref().and_then(|l| l.conn.as_ref()) {
            Some(conn) => (conn.payload as usize, conn.payload as usize),
            None if self.cfg.use_connected => {
                (self.cfg.cip_payload as usize, self.cfg.cip_payload as usize)
            },
            None => (DEFAULT_CIP_PAYLOAD as usize, DEFAULT_CIP_PAYLOAD as usize),
        }
    }

    /// Answer requests that were aborted or expired while still queued.
    fn prune_dead_requests(&mut self) {
        let now = Instant::now();
        let mut i = 0;
        while i < self.pending.len() {
            let cancelled = self.pending[i].is_cancelled();
            let expired = self.pending[i].is_expired(now);
            if cancelled || expired {
                if let Some(r) = self.pending.remove(i) {
                    let status = if cancelled { Status::Abort } else { Status::Timeout };
                    answer(r, Err(status));
                }
            } else {
                i += 1;
            }
        }
    }

    fn mark_faulted(&self, faulted: bool) {
        if let Some(s) = self.session.upgrade() {
            s.faulted.store(faulted, Ordering::SeqCst);
        }
    }

    async fn execute_batch(&mut self, batch: Vec<WireRequest>) {
        let connected = batch[0].opts.connected;

        if let Err(e) = self.ensure_link(connected).await {
            warn!("session link setup failed: {e}");
            self.mark_faulted(true);
            self.link = None;
            fail_all(batch, &e);
            return;
        }
        self.mark_faulted(false);

        let cip: BytesMut = if batch.len() == 1 {
            batch[0].cip.clone()
        } else {
            let parts: Vec<BytesMut> = batch.iter().map(|r| r.cip.clone()).collect();
            encode_multi_service(&parts)
        };

        let Some(mut link) = self.link.take() else {
            fail_all(batch, &Status::BadConnection);
            return;
        };

        // Build the encapsulation frame.
        let mut expect_context = 0u64;
        let mut expect_conn_id = 0u32;
        let frame = if connected {
            let Some(conn) = link.conn.as_mut() else {
                fail_all(batch, &Status::BadConnection);
                return;
            };
            conn.seq = conn.seq.wrapping_add(1);
            expect_conn_id = conn.client_conn_id;
            let payload = cpf::encode_connected(conn.server_conn_id, conn.seq, &cip);
            eip::encode_frame(EipCommand::SendUnitData, link.session_handle, 0, &payload)
        } else {
            link.next_context = link.next_context.wrapping_add(1);
            expect_context = link.next_context;
            let payload = cpf::encode_unconnected(&cip);
            eip::encode_frame(
                EipCommand::SendRrData,
                link.session_handle,
                expect_context,
                &payload,
            )
        };

        trace!("frame out:\n{}", crate::wire::hex_dump(&frame));
        if let Err(e) = write_all_timeout(&mut link.stream, &frame).await {
            warn!("session write failed: {e}");
            self.mark_faulted(true);
            fail_all(batch, &e);
            return;
        }

        let mut slots: Slots = batch.into_iter().map(Some).collect();
        let default_deadline = Instant::now() + DEFAULT_TRANSACTION_TIMEOUT;
        let mut discard_deadline: Option<Instant> = None;

        // Wait for the matching reply while servicing per-request aborts and
        // deadlines every POLL_INTERVAL. The socket is read with the
        // cancel-safe `read_buf` into the link's growable buffer; frames are
        // parsed out of it once complete.
        let frame = loop {
            match try_parse_frame(&mut link.rx) {
                Ok(Some(frame)) => {
                    // Stale replies from an earlier abandoned transaction
                    // are dropped on the floor; keep reading.
                    if !connected && frame.header.sender_context.get() != expect_context
                    {
                        debug!(
                            "dropping stale reply, context {:#x}",
                            frame.header.sender_context.get()
                        );
                        continue;
                    }
                    trace!("frame in:\n{}", crate::wire::hex_dump(&frame.payload));
                    break frame;
                },
                Ok(None) => {},
                Err(e) => {
                    warn!("unparseable frame on the wire: {e}");
                    self.mark_faulted(true);
                    fail_slots(&mut slots, &e);
                    return;
                },
            }

            let progressed = tokio::select! {
                r = link.stream.read_buf(&mut link.rx) => match r {
                    Ok(0) => {
                        warn!("peer closed the connection mid-transaction");
                        self.mark_faulted(true);
                        fail_slots(&mut slots, &Status::BadConnection);
                        return;
                    },
                    Ok(_) => true,
                    Err(e) => {
                        warn!("session read failed: {e}");
                        self.mark_faulted(true);
                        fail_slots(&mut slots, &Status::BadConnection);
                        return;
                    },
                },
                _ = sleep(POLL_INTERVAL) => false,
                _ = self.cancel.cancelled() => {
                    fail_slots(&mut slots, &Status::Abort);
                    // Session is being shut down; the link dies with it.
                    return;
                },
            };
            if progressed {
                continue;
            }

            let now = Instant::now();
            for slot in slots.iter_mut() {
                let give_up = slot.as_ref().is_some_and(|r| {
                    r.is_cancelled()
                        || r.opts.deadline.unwrap_or(default_deadline) <= now
                });
                if give_up {
                    if let Some(r) = slot.take() {
                        let status = if r.is_cancelled() {
                            Status::Abort
                        } else {
                            Status::Timeout
                        };
                        answer(r, Err(status));
                    }
                }
            }

            if slots.iter().all(Option::is_none) {
                // Everyone gave up; keep the stream framed by draining the
                // reply for a bounded window.
                let dd = *discard_deadline.get_or_insert(now + DISCARD_WINDOW);
                if now >= dd {
                    info!("no reply within discard window, dropping link");
                    self.mark_faulted(true);
                    return;
                }
            }
        };

        // Reply in hand; the link survives regardless of CIP-level errors.
        self.link = Some(link);

        if slots.iter().all(Option::is_none) {
            debug!("late reply discarded after abort/timeout");
            return;
        }

        if let Err(e) = route_reply(connected, expect_conn_id, frame, &mut slots) {
            fail_slots(&mut slots, &e);
        }
    }

    /// Make sure the TCP link, the EIP session and (when requested) the CIP
    /// connection are up.
    async fn ensure_link(&mut self, connected: bool) -> PlcResult<()> {
        if self.link.is_none() {
            self.link = Some(self.open_link().await?);
        }
        if connected {
            let needs_open = self.link.as_ref().is_some_and(|l| l.conn.is_none());
            if needs_open {
                let conn = self.forward_open().await?;
                if let Some(link) = self.link.as_mut() {
                    link.conn = Some(conn);
                }
            }
        }
        Ok(())
    }

    async fn open_link(&mut self) -> PlcResult<Link> {
        let addr = format!("{}:{}", self.cfg.key.host, self.cfg.key.port);
        info!("connecting to {addr}");
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| Status::Timeout)?
            .map_err(|_| Status::BadGateway)?;
        stream.set_nodelay(true).map_err(|_| Status::BadConnection)?;

        let mut link = Link {
            stream,
            rx: BytesMut::with_capacity(4096),
            session_handle: 0,
            next_context: 0,
            conn: None,
        };

        // Register Session: version 1, options 0, context 0.
        let payload = eip::register_session_payload();
        let frame = eip::encode_frame(EipCommand::RegisterSession, 0, 0, &payload);
        write_all_timeout(&mut link.stream, &frame).await?;
        let reply = timeout(IO_TIMEOUT, read_frame(&mut link))
            .await
            .map_err(|_| Status::Timeout)??;
        if reply.header.command().map_err(|_| Status::BadReply)?
            != EipCommand::RegisterSession
        {
            return Err(Status::BadReply);
        }
        link.session_handle = eip::check_register_reply(&reply.header, &reply.payload)?;
        debug!("registered session, handle {:#x}", link.session_handle);
        Ok(link)
    }

    /// Forward Open with the configured retry budget. The target may bounce
    /// the first attempts (status 0x01 / extended 0x0100) while it frees an
    /// old connection; that is retryable, everything else is not.
    async fn forward_open(&mut self) -> PlcResult<CipConnection> {
        let large = self.cfg.cip_payload > DEFAULT_CIP_PAYLOAD;
        let conn_path = connection_path(&self.cfg.key.route);
        let retries = self.cfg.forward_open_retries.max(1);

        let mut last_err = Status::BadConnection;
        for attempt in 0..retries {
            if attempt > 0 {
                sleep(FORWARD_OPEN_RETRY_DELAY).await;
            }
            match self.forward_open_once(&conn_path, self.cfg.cip_payload, large).await {
                Ok(conn) => {
                    debug!(
                        "forward open ok, conn id {:#x}, payload {}",
                        conn.server_conn_id, conn.payload
                    );
                    return Ok(conn);
                },
                Err(e @ Status::BadStatus { general: 0x01, .. }) => {
                    info!("forward open bounced (attempt {}): {e}", attempt + 1);
                    last_err = e;
                },
                Err(Status::BadStatus { general, extended }) if large => {
                    // Target without Large Forward Open support; drop to the
                    // standard service and legacy payload.
                    info!(
                        "large forward open refused ({general:#04x}/{extended:#06x}), \
                         falling back to 508"
                    );
                    self.cfg.cip_payload = DEFAULT_CIP_PAYLOAD;
                    return self
                        .forward_open_once(&conn_path, DEFAULT_CIP_PAYLOAD, false)
                        .await;
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn forward_open_once(
        &mut self,
        conn_path: &[u8],
        payload: u16,
        large: bool,
    ) -> PlcResult<CipConnection> {
        let fo = ForwardOpenRequest {
            client_conn_id: rand::rng().random(),
            conn_serial: rand::rng().random(),
            vendor_id: VENDOR_ID,
            orig_serial: rand::rng().random(),
            payload,
        };
        let link = self.link.as_mut().ok_or(Status::BadConnection)?;
        let cip = encode_forward_open(&fo, conn_path, large);
        let reply = unconnected_exchange(link, &cip).await?;
        let ack = parse_forward_open_reply(&reply)?;
        Ok(CipConnection {
            server_conn_id: ack.server_conn_id,
            client_conn_id: ack.client_conn_id,
            conn_serial: ack.conn_serial,
            orig_serial: fo.orig_serial,
            seq: rand::rng().random(),
            payload,
        })
    }

    async fn teardown_link(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        if let Some(conn) = link.conn.take() {
            let cip = encode_forward_close(
                conn.conn_serial,
                VENDOR_ID,
                conn.orig_serial,
                &connection_path(&self.cfg.key.route),
            );
            match unconnected_exchange(&mut link, &cip).await {
                Ok(reply) => {
                    if let Err(e) = reply.check() {
                        debug!("forward close refused: {e}");
                    }
                },
                Err(e) => debug!("forward close failed: {e}"),
            }
        }

        let frame =
            eip::encode_frame(EipCommand::UnregisterSession, link.session_handle, 0, &[]);
        if let Err(e) = write_all_timeout(&mut link.stream, &frame).await {
            debug!("unregister session failed: {e}");
        }
        let _ = link.stream.shutdown().await;
        info!("session closed");
    }
}

/// Unwrap an inbound frame down to CIP and deliver it to the slots. A parse
/// error fails the requests but keeps the session alive.
fn route_reply(
    connected: bool,
    expect_conn_id: u32,
    frame: EipFrame,
    slots: &mut Slots,
) -> PlcResult<()> {
    if frame.header.status.get() != 0 {
        return Err(Status::BadStatus {
            general: frame.header.status.get() as u8,
            extended: 0,
        });
    }

    let cip_bytes: Bytes = if connected {
        let (conn_id, _seq, cip) = cpf::decode_connected(&frame.payload)?;
        if conn_id != expect_conn_id {
            return Err(Status::BadReply);
        }
        cip
    } else {
        cpf::decode_unconnected(&frame.payload)?
    };

    if slots.len() == 1 {
        let reply = CipReply::parse(cip_bytes)?;
        if let Some(r) = slots[0].take() {
            answer(r, Ok(reply));
        }
        return Ok(());
    }

    // Multiple Service Packet: split and deliver per sub-request, each with
    // its own status.
    let outer = CipReply::parse(cip_bytes)?;
    outer.check()?;
    let parts = decode_multi_reply(&outer)?;
    if parts.len() != slots.len() {
        return Err(Status::BadReply);
    }
    for (slot, part) in slots.iter_mut().zip(parts) {
        if let Some(r) = slot.take() {
            answer(r, CipReply::parse(part));
        }
    }
    Ok(())
}

/// One synchronous unconnected request/reply on the raw link, used for the
/// connection-management services that bypass the queue.
async fn unconnected_exchange(link: &mut Link, cip: &[u8]) -> PlcResult<CipReply> {
    link.next_context = link.next_context.wrapping_add(1);
    let ctx = link.next_context;
    let payload = cpf::encode_unconnected(cip);
    let frame =
        eip::encode_frame(EipCommand::SendRrData, link.session_handle, ctx, &payload);
    write_all_timeout(&mut link.stream, &frame).await?;

    loop {
        let reply = timeout(IO_TIMEOUT, read_frame(link))
            .await
            .map_err(|_| Status::Timeout)??;
        if reply.header.status.get() != 0 {
            return Err(Status::BadStatus {
                general: reply.header.status.get() as u8,
                extended: 0,
            });
        }
        if reply.header.sender_context.get() != ctx {
            debug!("dropping stale frame during management exchange");
            continue;
        }
        let cip_bytes = cpf::decode_unconnected(&reply.payload)?;
        return CipReply::parse(cip_bytes);
    }
}

async fn write_all_timeout(stream: &mut TcpStream, buf: &[u8]) -> PlcResult<()> {
    timeout(IO_TIMEOUT, stream.write_all(buf))
        .await
        .map_err(|_| Status::Timeout)?
        .map_err(|_| Status::BadConnection)
}

/// Pull one complete encapsulation frame through the link buffer. Dropping
/// the returned future (on timeout) never loses bytes: partial frames stay
/// in `link.rx`.
async fn read_frame(link: &mut Link) -> PlcResult<EipFrame> {
    loop {
        if let Some(frame) = try_parse_frame(&mut link.rx)? {
            return Ok(frame);
        }
        let n = link
            .stream
            .read_buf(&mut link.rx)
            .await
            .map_err(|_| Status::BadConnection)?;
        if n == 0 {
            return Err(Status::BadConnection);
        }
    }
}

fn answer(req: WireRequest, res: PlcResult<CipReply>) {
    let _ = req.reply_tx.send(res);
}

fn fail_all(batch: Vec<WireRequest>, e: &Status) {
    for r in batch {
        answer(r, Err(e.clone()));
    }
}

fn fail_slots(slots: &mut Slots, e: &Status) {
    for slot in slots.iter_mut() {
        if let Some(r) = slot.take() {
            answer(r, Err(e.clone()));
        }
    }
}
