// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The control-plane: integer tag handles and the operations on them.
//!
//! Tag ids are process-unique, monotonically increasing positive integers;
//! a destroyed id is never handed out again, so use-after-destroy reliably
//! reports `NotFound`.

use std::sync::{
    Arc,
    atomic::{AtomicI32, Ordering},
};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::info;

use crate::{
    cfg::{
        attributes::TagOptions,
        enums::PlcKind,
        logger,
    },
    client::{registry::SessionRegistry, session::SessionCfg},
    models::flavor::{Flavor, FlavorOps, TagAddress},
    status::{PlcResult, Status},
    tag::runtime::{
        Backend, CallbackFn, LibKind, OpDir, TagEntry, WireBackend, read_write_entry,
    },
};

pub use crate::cfg::logger::{register_logger, set_debug_level, unregister_logger};

struct LibState {
    tags: DashMap<i32, Arc<TagEntry>>,
    registry: Arc<SessionRegistry>,
    next_id: AtomicI32,
}

static LIB: Lazy<LibState> = Lazy::new(|| LibState {
    tags: DashMap::new(),
    registry: Arc::new(SessionRegistry::new()),
    next_id: AtomicI32::new(1),
});

fn lookup(tag_id: i32) -> PlcResult<Arc<TagEntry>> {
    LIB.tags.get(&tag_id).map(|e| e.clone()).ok_or(Status::NotFound)
}

/// Resolve a tag id to its entry, for use with the accessor functions in
/// [`crate::tag::accessors`].
pub fn entry(tag_id: i32) -> PlcResult<Arc<TagEntry>> {
    lookup(tag_id)
}

/// Detect the special `make=system&family=library` tags before the normal
/// attribute grammar applies.
fn library_kind(attrs: &str) -> Option<LibKind> {
    let mut make = false;
    let mut family = false;
    let mut name = None;
    for pair in attrs.split('&') {
        match pair.split_once('=') {
            Some(("make", v)) => make = v.eq_ignore_ascii_case("system"),
            Some(("family", v)) => family = v.eq_ignore_ascii_case("library"),
            Some(("name", v)) => name = Some(v.to_ascii_lowercase()),
            _ => {},
        }
    }
    if !(make && family) {
        return None;
    }
    match name.as_deref() {
        Some("version") => Some(LibKind::Version),
        Some("debug") => Some(LibKind::Debug),
        _ => None,
    }
}

/// Create a tag from an attribute string.
///
/// Validation (attribute grammar, tag-name encoding, session lookup) is
/// synchronous; no wire traffic happens until the first operation, so the
/// returned tag is immediately `Idle`. `_timeout_ms` is accepted for ABI
/// parity.
pub async fn create(attrs: &str, timeout_ms: u64) -> PlcResult<i32> {
    create_inner(attrs, None, timeout_ms).await
}

/// Like [`create`], but registers the event callback atomically so the
/// `Created` event is reliably delivered.
pub async fn create_ex(
    attrs: &str,
    callback: CallbackFn,
    timeout_ms: u64,
) -> PlcResult<i32> {
    create_inner(attrs, Some(callback), timeout_ms).await
}

async fn create_inner(
    attrs: &str,
    callback: Option<CallbackFn>,
    _timeout_ms: u64,
) -> PlcResult<i32> {
    let id = LIB.next_id.fetch_add(1, Ordering::SeqCst);

    let tag = if let Some(kind) = library_kind(attrs) {
        TagEntry::new(id, TagOptions::library_defaults(), Backend::Library(kind), Vec::new(), 1)
    } else {
        let opts = TagOptions::parse(attrs)?;
        if let Some(level) = opts.debug {
            logger::set_debug_level(level);
        }
        let flavor = Flavor::for_kind(opts.plc);
        let address = flavor.encode_address(&opts.name)?;

        // Element geometry: explicit attribute first, then what the
        // addressing implies. CIP tags may leave it to the first read.
        let elem_size = match (&address, opts.elem_size) {
            (_, Some(size)) => size as usize,
            (TagAddress::Pccc(addr), None) => addr.elem_size as usize,
            (TagAddress::Cip(_), None) => 0,
        };
        let data = vec![0u8; elem_size * opts.elem_count as usize];

        let session = LIB.registry.checkout(&SessionCfg::from_options(&opts));
        let backend = Backend::Wire(WireBackend {
            session,
            registry: Arc::clone(&LIB.registry),
            address,
            flavor,
            plc5: opts.plc == PlcKind::Plc5,
        });
        TagEntry::new(id, opts, backend, data, elem_size)
    };

    if let Some(cb) = callback {
        tag.register_callback(cb);
    }
    tag.spawn_auto_read();
    LIB.tags.insert(id, Arc::clone(&tag));
    info!("created tag {id}");
    tag.fire(crate::status::Event::Created, &Status::Ok);
    Ok(id)
}

/// Destroy a tag. Idempotent at the API level: the second call reports
/// `NotFound` without side effects. `Destroyed` fires exactly once, after
/// any in-flight operation aborted or completed.
pub async fn destroy(tag_id: i32) -> Status {
    let Some((_, tag)) = LIB.tags.remove(&tag_id) else {
        return Status::NotFound;
    };
    tag.destroy().await;
    info!("destroyed tag {tag_id}");
    Status::Ok
}

/// Read the tag from the PLC. Blocking (until completion or `timeout_ms`)
/// when the timeout is non-zero; otherwise fire-and-return `Pending`.
pub async fn read(tag_id: i32, timeout_ms: u64) -> Status {
    match lookup(tag_id) {
        Ok(tag) => read_write_entry(&tag, OpDir::Read, timeout_ms).await,
        Err(e) => e,
    }
}

/// Write the tag buffer to the PLC. Same timeout contract as [`read`].
pub async fn write(tag_id: i32, timeout_ms: u64) -> Status {
    match lookup(tag_id) {
        Ok(tag) => read_write_entry(&tag, OpDir::Write, timeout_ms).await,
        Err(e) => e,
    }
}

/// Cancel the pending operation on the tag, if any.
pub fn abort(tag_id: i32) -> Status {
    match lookup(tag_id) {
        Ok(tag) => tag.abort(),
        Err(e) => e,
    }
}

/// Last terminal status, or `Pending` while an operation is in flight.
pub fn status(tag_id: i32) -> Status {
    match lookup(tag_id) {
        Ok(tag) => tag.current_status(),
        Err(e) => e,
    }
}

/// Advisory reentrant lock around multi-accessor sequences.
pub fn lock(tag_id: i32) -> Status {
    match lookup(tag_id) {
        Ok(tag) => tag.advisory().lock(),
        Err(e) => e,
    }
}

pub fn unlock(tag_id: i32) -> Status {
    match lookup(tag_id) {
        Ok(tag) => tag.advisory().unlock(),
        Err(e) => e,
    }
}

/// Install the per-tag event callback. Single slot; a second registration
/// reports `Duplicate`.
pub fn register_callback(tag_id: i32, callback: CallbackFn) -> Status {
    match lookup(tag_id) {
        Ok(tag) => tag.register_callback(callback),
        Err(e) => e,
    }
}

pub fn unregister_callback(tag_id: i32) -> Status {
    match lookup(tag_id) {
        Ok(tag) => tag.unregister_callback(),
        Err(e) => e,
    }
}

fn version_triplet() -> (i32, i32, i32) {
    let mut parts = env!("CARGO_PKG_VERSION")
        .split('.')
        .map(|p| p.parse::<i32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Semantic-version compatibility check against the running library.
pub fn check_lib_version(major: i32, minor: i32, patch: i32) -> Status {
    let (lib_major, lib_minor, lib_patch) = version_triplet();
    let compatible = major == lib_major
        && (minor < lib_minor || (minor == lib_minor && patch <= lib_patch));
    if compatible { Status::Ok } else { Status::Unsupported }
}

/// Integer attribute getter. `tag_id == 0` addresses the library itself.
pub fn get_int_attribute(tag_id: i32, name: &str, default: i32) -> i32 {
    if tag_id == 0 {
        let (major, minor, patch) = version_triplet();
        return match name {
            "version_major" => major,
            "version_minor" => minor,
            "version_patch" => patch,
            "debug" | "debug_level" => logger::debug_level() as i32,
            _ => default,
        };
    }
    let Ok(tag) = lookup(tag_id) else {
        return default;
    };
    let inner = tag.lock_inner();
    match name {
        "size" => inner.data.len() as i32,
        "elem_size" => inner.elem_size as i32,
        "elem_count" => inner.elem_count as i32,
        "read_cache_ms" => tag.opts.read_cache_ms as i32,
        "auto_sync_read_ms" => tag.opts.auto_sync_read_ms as i32,
        "auto_sync_write_ms" => tag.opts.auto_sync_write_ms as i32,
        "connection_group_id" => tag.opts.connection_group_id,
        "allow_packing" => i32::from(tag.opts.allow_packing),
        _ => default,
    }
}

/// Integer attribute setter. Only the library debug level is writable.
pub fn set_int_attribute(tag_id: i32, name: &str, value: i32) -> Status {
    if tag_id == 0 {
        return match name {
            "debug" | "debug_level" => {
                logger::set_debug_level(value);
                Status::Ok
            },
            _ => Status::Unsupported,
        };
    }
    match lookup(tag_id) {
        Ok(_) => Status::NotAllowed,
        Err(e) => e,
    }
}

/// Force-tear down every tag and session. The caller guarantees no other
/// library call is in flight; no API call is valid afterwards until new
/// tags are created.
pub async fn shutdown() {
    let ids: Vec<i32> = LIB.tags.iter().map(|e| *e.key()).collect();
    for id in ids {
        let _ = destroy(id).await;
    }
    LIB.registry.shutdown_all();
    info!("library shutdown complete");
}
