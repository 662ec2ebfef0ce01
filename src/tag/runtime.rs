// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-tag runtime: the state machine that coordinates reads, writes,
//! aborts, the read cache, auto-sync timers and callback delivery.
//!
//! A tag never talks to the socket itself; it builds operations (`ops::*`)
//! against its session and owns the data buffer the accessors see.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::{attributes::TagOptions, logger},
    client::{registry::SessionRegistry, request::TransactOpts, session::Session},
    models::{
        cip::encode_instance_attr_list,
        epath::TagPath,
        flavor::{Flavor, FlavorOps, TagAddress},
        types::StringDef,
    },
    ops::{common::OpParams, pccc_io::PcccCtx, read::ReadCtx, write::WriteCtx},
    status::{Event, Status},
};

/// Attribute ids requested by the `@tags` listing: instance type and name.
const TAG_LIST_ATTRS: [u16; 2] = [0x02, 0x01];

/// How long `destroy` waits for an aborted in-flight operation to unwind.
const DESTROY_DRAIN_LIMIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    Initializing,
    Idle,
    ReadPending,
    WritePending,
    /// A pending operation has been cancelled and is unwinding; `Aborted`
    /// fires when it finishes.
    Aborting,
    Faulted,
    Destroyed,
}

pub type CallbackFn = Arc<dyn Fn(i32, Event, Status) + Send + Sync>;

/// What a tag is backed by: the wire, or the library itself.
pub enum Backend {
    Wire(WireBackend),
    Library(LibKind),
}

pub struct WireBackend {
    pub session: Arc<Session>,
    pub registry: Arc<SessionRegistry>,
    pub address: TagAddress,
    pub flavor: Flavor,
    /// PLC5 word-range dialect for the PCCC ops.
    pub plc5: bool,
}

/// The special `make=system&family=library` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibKind {
    Version,
    Debug,
}

/// Mutable tag state behind the tag-local mutex. Lock discipline: never
/// await and never run a user callback while holding it.
pub struct TagInner {
    pub state: TagState,
    pub status: Status,
    pub data: Vec<u8>,
    pub elem_size: usize,
    pub elem_count: usize,
    /// CIP element type, learned from the first read reply.
    pub cip_type: u16,
    pub read_cache_expiry: Option<Instant>,
    pub dirty: bool,
    auto_write_armed: bool,
    current_op: Option<CancellationToken>,
}

pub struct TagEntry {
    pub id: i32,
    pub opts: TagOptions,
    pub backend: Backend,
    pub string_def: StringDef,
    inner: Mutex<TagInner>,
    callback: Mutex<Option<CallbackFn>>,
    advisory: super::advisory::AdvisoryLock,
    /// Kills the auto-sync tasks on destroy.
    auto_cancel: CancellationToken,
}

impl TagEntry {
    pub fn new(
        id: i32,
        opts: TagOptions,
        backend: Backend,
        initial_data: Vec<u8>,
        elem_size: usize,
    ) -> Arc<TagEntry> {
        let string_def = match (&opts.string_def, &backend) {
            (Some(def), _) => *def,
            (None, Backend::Wire(w)) => w.flavor.default_string_def(),
            (None, Backend::Library(_)) => StringDef::LOGIX,
        };
        let elem_count = opts.elem_count as usize;
        Arc::new(TagEntry {
            id,
            backend,
            string_def,
            inner: Mutex::new(TagInner {
                state: TagState::Idle,
                status: Status::Ok,
                data: initial_data,
                elem_size,
                elem_count,
                cip_type: 0,
                read_cache_expiry: None,
                dirty: false,
                auto_write_armed: false,
                current_op: None,
            }),
            callback: Mutex::new(None),
            advisory: super::advisory::AdvisoryLock::new(),
            auto_cancel: CancellationToken::new(),
            opts,
        })
    }

    pub fn lock_inner(&self) -> MutexGuard<'_, TagInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn advisory(&self) -> &super::advisory::AdvisoryLock {
        &self.advisory
    }

    // --- callbacks -------------------------------------------------------

    pub fn register_callback(&self, f: CallbackFn) -> Status {
        let mut slot = match self.callback.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if slot.is_some() {
            return Status::Duplicate;
        }
        *slot = Some(f);
        Status::Ok
    }

    pub fn unregister_callback(&self) -> Status {
        let mut slot = match self.callback.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        match slot.take() {
            Some(_) => Status::Ok,
            None => Status::NotFound,
        }
    }

    /// Fire an event. Must be called with no tag lock held.
    pub fn fire(&self, event: Event, status: &Status) {
        let cb = {
            let slot = match self.callback.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            slot.clone()
        };
        if let Some(cb) = cb {
            cb(self.id, event, status.clone());
        }
    }

    // --- status ----------------------------------------------------------

    pub fn current_status(&self) -> Status {
        let inner = self.lock_inner();
        match inner.state {
            TagState::ReadPending
            | TagState::WritePending
            | TagState::Aborting
            | TagState::Initializing => Status::Pending,
            _ => inner.status.clone(),
        }
    }

    /// Cancel the pending operation, if any. The tag moves to `Aborting`
    /// until the operation unwinds and fires `Aborted`.
    pub fn abort(&self) -> Status {
        let token = {
            let mut inner = self.lock_inner();
            let token = inner.current_op.clone();
            if token.is_some()
                && matches!(
                    inner.state,
                    TagState::ReadPending | TagState::WritePending
                )
            {
                inner.state = TagState::Aborting;
            }
            token
        };
        if let Some(t) = token {
            t.cancel();
        }
        // Nothing in flight makes abort a no-op.
        Status::Ok
    }

    /// Mark the buffer dirty after a `set_*` accessor and arm the coalescing
    /// auto-write timer when configured.
    pub fn mark_dirty(self: &Arc<Self>) {
        let arm = {
            let mut inner = self.lock_inner();
            inner.dirty = true;
            if self.opts.auto_sync_write_ms > 0 && !inner.auto_write_armed {
                inner.auto_write_armed = true;
                true
            } else {
                false
            }
        };
        if arm {
            let tag = Arc::clone(self);
            let delay = Duration::from_millis(self.opts.auto_sync_write_ms);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tag.auto_cancel.cancelled() => return,
                    _ = sleep(delay) => {},
                }
                tag.auto_write_flush().await;
            });
        }
    }

    async fn auto_write_flush(self: &Arc<Self>) {
        // Wait for the tag to go idle, then push the whole buffer.
        loop {
            {
                let mut inner = self.lock_inner();
                match inner.state {
                    TagState::Idle | TagState::Faulted => {
                        inner.auto_write_armed = false;
                        inner.dirty = false;
                        break;
                    },
                    TagState::Destroyed => return,
                    _ => {},
                }
            }
            tokio::select! {
                _ = self.auto_cancel.cancelled() => return,
                _ = sleep(Duration::from_millis(10)) => {},
            }
        }
        let st = read_write_entry(self, OpDir::Write, 0).await;
        if st.is_err() {
            warn!("auto-sync write on tag {} failed: {st}", self.id);
        }
    }

    /// Spawn the periodic auto-read task, when configured.
    pub fn spawn_auto_read(self: &Arc<Self>) {
        if self.opts.auto_sync_read_ms == 0 {
            return;
        }
        let tag = Arc::clone(self);
        let period = Duration::from_millis(self.opts.auto_sync_read_ms);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tag.auto_cancel.cancelled() => return,
                    _ = ticker.tick() => {},
                }
                // Busy tags skip the tick instead of queueing behind it.
                let idle = tag.lock_inner().state == TagState::Idle;
                if idle {
                    let st = read_write_entry(&tag, OpDir::Read, 0).await;
                    if st.is_err() {
                        debug!("auto-sync read on tag {} failed: {st}", tag.id);
                    }
                } else {
                    debug!("auto-sync read tick skipped, tag {} busy", tag.id);
                }
            }
        });
    }

    /// Tear down: abort in-flight work, stop timers, wait for the runtime to
    /// unwind, fire `Destroyed` exactly once.
    pub async fn destroy(self: &Arc<Self>) {
        self.auto_cancel.cancel();
        let token = {
            let mut inner = self.lock_inner();
            if inner.state == TagState::Destroyed {
                return;
            }
            let token = inner.current_op.take();
            if token.is_some()
                && matches!(
                    inner.state,
                    TagState::ReadPending | TagState::WritePending
                )
            {
                inner.state = TagState::Aborting;
            }
            token.inspect(|t| t.cancel())
        };
        if token.is_some() {
            let limit = Instant::now() + DESTROY_DRAIN_LIMIT;
            loop {
                {
                    let inner = self.lock_inner();
                    if !matches!(
                        inner.state,
                        TagState::ReadPending
                            | TagState::WritePending
                            | TagState::Aborting
                    ) {
                        break;
                    }
                }
                if Instant::now() >= limit {
                    warn!("tag {} destroy timed out draining its operation", self.id);
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        }
        {
            let mut inner = self.lock_inner();
            inner.state = TagState::Destroyed;
        }
        if let Backend::Wire(w) = &self.backend {
            w.registry.release(&w.session);
        }
        self.fire(Event::Destroyed, &Status::Ok);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpDir {
    Read,
    Write,
}

/// Start a read or write on the tag. With `timeout_ms > 0` the call drives
/// the operation to completion; with 0 it detaches the operation and
/// returns `Pending`.
pub async fn read_write_entry(tag: &Arc<TagEntry>, dir: OpDir, timeout_ms: u64) -> Status {
    let deadline = (timeout_ms > 0)
        .then(|| Instant::now() + Duration::from_millis(timeout_ms));

    // Admission under the lock: one outstanding operation per tag.
    let (token, write_snapshot) = {
        let mut inner = tag.lock_inner();
        match inner.state {
            TagState::Idle | TagState::Faulted => {},
            TagState::Destroyed => return Status::NotFound,
            TagState::Initializing => return Status::Pending,
            _ => return Status::Busy,
        }

        if dir == OpDir::Read {
            // Read cache: a fresh-enough buffer answers without the wire.
            if let Some(expiry) = inner.read_cache_expiry {
                if Instant::now() < expiry {
                    inner.status = Status::Ok;
                    drop(inner);
                    debug!("tag {} read served from cache", tag.id);
                    tag.fire(Event::ReadStarted, &Status::Ok);
                    tag.fire(Event::ReadCompleted, &Status::Ok);
                    return Status::Ok;
                }
            }
        }

        let token = CancellationToken::new();
        inner.current_op = Some(token.clone());
        inner.state = if dir == OpDir::Read {
            TagState::ReadPending
        } else {
            TagState::WritePending
        };
        let snapshot = (dir == OpDir::Write).then(|| inner.data.clone());
        (token, snapshot)
    };

    let started = if dir == OpDir::Read { Event::ReadStarted } else { Event::WriteStarted };
    tag.fire(started, &Status::Pending);

    let tag2 = Arc::clone(tag);
    let fut = async move {
        let params = OpParams {
            tag_id: tag2.id,
            allow_packing: tag2.opts.allow_packing,
            cancel: token,
            deadline,
        };
        let result = match dir {
            OpDir::Read => run_read(&tag2, params).await,
            OpDir::Write => run_write(&tag2, params, write_snapshot.unwrap_or_default()).await,
        };
        finish_op(&tag2, dir, result)
    };

    if timeout_ms > 0 {
        fut.await
    } else {
        tokio::spawn(fut);
        Status::Pending
    }
}

/// Record the terminal status, leave `Aborting`/the pending state behind,
/// fire the completion event.
fn finish_op(tag: &Arc<TagEntry>, dir: OpDir, result: Result<(), Status>) -> Status {
    let status = match result {
        Ok(()) => Status::Ok,
        Err(e) => e,
    };
    let was_aborting = {
        let mut inner = tag.lock_inner();
        let was_aborting = inner.state == TagState::Aborting;
        if inner.state != TagState::Destroyed {
            // Session faults rebuild lazily on the next operation, so the
            // tag itself goes back to Idle with the error recorded.
            inner.state = TagState::Idle;
            inner.status = status.clone();
        }
        inner.current_op = None;
        was_aborting
    };
    // An operation that ended while the tag was Aborting reports Aborted,
    // even when its reply crossed the cancellation on the wire.
    let event = if was_aborting || status == Status::Abort {
        Event::Aborted
    } else if dir == OpDir::Read {
        Event::ReadCompleted
    } else {
        Event::WriteCompleted
    };
    tag.fire(event, &status);
    status
}

async fn run_read(tag: &Arc<TagEntry>, params: OpParams) -> Result<(), Status> {
    match &tag.backend {
        Backend::Library(kind) => {
            let mut inner = tag.lock_inner();
            match kind {
                LibKind::Version => {
                    inner.data = env!("CARGO_PKG_VERSION").as_bytes().to_vec();
                },
                LibKind::Debug => {
                    inner.data =
                        (logger::debug_level() as u32).to_le_bytes().to_vec();
                },
            }
            inner.elem_size = 1;
            inner.elem_count = inner.data.len();
            Ok(())
        },
        Backend::Wire(w) => run_wire_read(tag, w, params).await,
    }
}

async fn run_wire_read(
    tag: &Arc<TagEntry>,
    w: &WireBackend,
    params: OpParams,
) -> Result<(), Status> {
    match &w.address {
        TagAddress::Cip(TagPath::Symbolic(path)) => {
            let (elem_count, expected) = {
                let inner = tag.lock_inner();
                (
                    inner.elem_count as u16,
                    (inner.elem_size * inner.elem_count).max(4),
                )
            };
            let ctx = ReadCtx::new(
                Arc::clone(&w.session),
                params,
                path.clone(),
                elem_count,
                expected,
                w.flavor.supports_fragmented(),
            );
            let outcome = ctx.execute().await?;
            let mut inner = tag.lock_inner();
            inner.cip_type = outcome.cip_type;
            inner.data = outcome.data;
            if inner.elem_count > 0 && inner.data.len() % inner.elem_count == 0 {
                inner.elem_size = inner.data.len() / inner.elem_count;
            }
            if tag.opts.read_cache_ms > 0 {
                inner.read_cache_expiry = Some(
                    Instant::now() + Duration::from_millis(tag.opts.read_cache_ms),
                );
            }
            Ok(())
        },
        TagAddress::Cip(TagPath::Instance { class, instance }) => {
            let req = encode_instance_attr_list(*class, *instance, &TAG_LIST_ATTRS);
            let opts = TransactOpts {
                connected: w.session.use_connected(),
                packable: false,
                reply_estimate: w.session.payload_hint(),
                cancel: params.cancel.clone(),
                deadline: params.deadline,
            };
            let reply = w.session.transact(params.tag_id, req, opts).await?;
            reply.check()?;
            let mut inner = tag.lock_inner();
            inner.data = reply.data.to_vec();
            inner.elem_size = 1;
            inner.elem_count = inner.data.len();
            Ok(())
        },
        TagAddress::Cip(TagPath::Raw) => {
            // The buffer holds a caller-supplied CIP request; the reply
            // replaces it.
            let payload = {
                let inner = tag.lock_inner();
                inner.data.clone()
            };
            if payload.is_empty() {
                return Err(Status::NoData);
            }
            let opts = TransactOpts {
                connected: w.session.use_connected(),
                packable: false,
                reply_estimate: w.session.payload_hint(),
                cancel: params.cancel.clone(),
                deadline: params.deadline,
            };
            let reply = w
                .session
                .transact(params.tag_id, bytes::BytesMut::from(&payload[..]), opts)
                .await?;
            let mut inner = tag.lock_inner();
            inner.data = reply.data.to_vec();
            inner.elem_size = 1;
            inner.elem_count = inner.data.len();
            Ok(())
        },
        TagAddress::Cip(TagPath::ChangeCounter) => Err(Status::Unsupported),
        TagAddress::Pccc(addr) => {
            let total = {
                let inner = tag.lock_inner();
                inner.elem_size * inner.elem_count
            };
            if total == 0 {
                return Err(Status::BadParam);
            }
            let ctx = PcccCtx::new(Arc::clone(&w.session), params, *addr, w.plc5);
            let data = ctx.read(total).await?;
            let mut inner = tag.lock_inner();
            inner.data = data;
            if tag.opts.read_cache_ms > 0 {
                inner.read_cache_expiry = Some(
                    Instant::now() + Duration::from_millis(tag.opts.read_cache_ms),
                );
            }
            Ok(())
        },
    }
}

async fn run_write(
    tag: &Arc<TagEntry>,
    params: OpParams,
    data: Vec<u8>,
) -> Result<(), Status> {
    match &tag.backend {
        Backend::Library(kind) => match kind {
            LibKind::Version => Err(Status::NotAllowed),
            LibKind::Debug => {
                if data.len() < 4 {
                    return Err(Status::TooSmall);
                }
                let level =
                    u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i32;
                logger::set_debug_level(level);
                Ok(())
            },
        },
        Backend::Wire(w) => run_wire_write(tag, w, params, data).await,
    }
}

async fn run_wire_write(
    tag: &Arc<TagEntry>,
    w: &WireBackend,
    params: OpParams,
    data: Vec<u8>,
) -> Result<(), Status> {
    match &w.address {
        TagAddress::Cip(TagPath::Symbolic(path)) => {
            let (mut cip_type, elem_count, elem_size) = {
                let inner = tag.lock_inner();
                (inner.cip_type, inner.elem_count as u16, inner.elem_size)
            };
            if cip_type == 0 {
                // Never read: fetch one element to learn the wire type.
                let probe = ReadCtx::new(
                    Arc::clone(&w.session),
                    params.clone(),
                    path.clone(),
                    1,
                    elem_size.max(4),
                    w.flavor.supports_fragmented(),
                );
                let outcome = probe.execute().await?;
                cip_type = outcome.cip_type;
                let mut inner = tag.lock_inner();
                inner.cip_type = cip_type;
            }
            let ctx = WriteCtx::new(
                Arc::clone(&w.session),
                params,
                path.clone(),
                cip_type,
                elem_count,
                elem_size,
                data,
                w.flavor.supports_fragmented(),
            )?;
            ctx.execute().await
        },
        TagAddress::Cip(_) => Err(Status::Unsupported),
        TagAddress::Pccc(addr) => {
            let ctx = PcccCtx::new(Arc::clone(&w.session), params, *addr, w.plc5);
            ctx.write(&data).await
        },
    }
}
