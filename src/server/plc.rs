// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The simulated PLC: its flavor, routing path, and tag inventory.

use std::sync::{
    Mutex,
    atomic::{AtomicI32, AtomicU32, Ordering},
};

use anyhow::{Context, Result, bail, ensure};

use crate::{
    cfg::enums::PlcKind,
    models::{epath::connection_path, types::ElemType},
};

/// One served tag: geometry, optional data-file number (PCCC), up to three
/// dimensions, and the data itself.
#[derive(Debug)]
pub struct TagDef {
    pub name: String,
    pub elem_type: ElemType,
    pub elem_size: usize,
    pub elem_count: usize,
    pub data_file_num: Option<u16>,
    pub dimensions: Vec<usize>,
    pub data: Vec<u8>,
}

/// Frame counters, readable by tests that assert on what the server saw.
#[derive(Debug, Default)]
pub struct Counters {
    pub register_session: AtomicU32,
    pub unregister_session: AtomicU32,
    pub forward_open_attempts: AtomicU32,
    pub forward_open_ok: AtomicU32,
    pub forward_close: AtomicU32,
    pub read_tag: AtomicU32,
    pub read_tag_frag: AtomicU32,
    pub write_tag: AtomicU32,
    pub write_tag_frag: AtomicU32,
    pub multi_packet: AtomicU32,
    pub pccc: AtomicU32,
}

impl Counters {
    pub fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

/// Shared server state. Tag data sits behind one mutex; handlers keep their
/// critical sections free of I/O.
#[derive(Debug)]
pub struct ServerPlc {
    pub kind: PlcKind,
    /// Connection path a Forward Open must present (routing + message
    /// router class/instance).
    pub conn_path: Vec<u8>,
    pub tags: Mutex<Vec<TagDef>>,
    /// Debug knob: bounce this many Forward Opens with 0x01/0x0100 before
    /// accepting one.
    pub reject_fo: AtomicI32,
    pub counters: Counters,
}

impl ServerPlc {
    pub fn new(kind: PlcKind, route: &[u8]) -> ServerPlc {
        ServerPlc {
            kind,
            conn_path: connection_path(route),
            tags: Mutex::new(Vec::new()),
            reject_fo: AtomicI32::new(0),
            counters: Counters::default(),
        }
    }

    pub fn set_reject_fo(&self, count: i32) {
        self.reject_fo.store(count, Ordering::SeqCst);
    }

    /// Consume one Forward-Open rejection credit, if any remain.
    pub fn take_fo_rejection(&self) -> bool {
        self.reject_fo
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v > 0).then_some(v - 1)
            })
            .is_ok()
    }

    /// Add a tag from its CLI syntax `name:TYPE[d1,d2,d3]`. PCCC inventories
    /// use data-file names (`N7:INT[10]`, also tolerated with an element
    /// suffix like `N7:0:INT[10]`).
    pub fn add_tag(&self, spec: &str) -> Result<()> {
        let def = parse_tag_spec(spec)?;
        let mut tags = match self.tags.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        ensure!(
            !tags.iter().any(|t| t.name == def.name),
            "duplicate tag name {}",
            def.name
        );
        tags.push(def);
        Ok(())
    }

    /// Run `f` over the named tag.
    pub fn with_tag<R>(
        &self,
        find: impl Fn(&TagDef) -> bool,
        f: impl FnOnce(&mut TagDef) -> R,
    ) -> Option<R> {
        let mut tags = match self.tags.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        tags.iter_mut().find(|t| find(t)).map(f)
    }
}

fn parse_tag_spec(spec: &str) -> Result<TagDef> {
    // Type and dimensions sit after the last ':'; everything before it is
    // the tag name (which itself may contain ':' in data-file form).
    let (name_part, type_part) =
        spec.rsplit_once(':').context("tag must be <name>:<TYPE>[dims]")?;
    ensure!(!name_part.is_empty(), "empty tag name");

    let (type_str, dims_str) = match type_part.find('[') {
        Some(open) => {
            let close = type_part
                .rfind(']')
                .context("missing closing bracket in tag dimensions")?;
            ensure!(close == type_part.len() - 1, "trailing junk after dimensions");
            (&type_part[..open], &type_part[open + 1..close])
        },
        None => (type_part, "1"),
    };

    let elem_type: ElemType = type_str
        .parse()
        .ok()
        .with_context(|| format!("unknown tag type {type_str}"))?;

    let mut dimensions = Vec::new();
    for d in dims_str.split(',') {
        let v: usize = d.trim().parse().context("bad dimension")?;
        ensure!(v > 0, "zero dimension");
        dimensions.push(v);
    }
    ensure!(
        (1..=3).contains(&dimensions.len()),
        "1 to 3 dimensions required"
    );

    // Data-file names: letters then a file number, possibly with an
    // `:element` suffix the inventory syntax carries along.
    let base_name = name_part.split(':').next().unwrap_or(name_part);
    let letters_len = base_name.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    let digits = &base_name[letters_len..];
    let data_file_num = if letters_len > 0 && !digits.is_empty() {
        digits.parse::<u16>().ok()
    } else {
        None
    };

    let elem_size = elem_type.size();
    let elem_count: usize = dimensions.iter().product();
    if elem_count.checked_mul(elem_size).is_none() {
        bail!("tag too large");
    }

    Ok(TagDef {
        name: base_name.to_string(),
        elem_type,
        elem_size,
        elem_count,
        data_file_num,
        dimensions,
        data: vec![0u8; elem_count * elem_size],
    })
}
