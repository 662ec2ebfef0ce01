// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Attribute-string parsing.
//!
//! A tag is described by a single `name=value&name=value` string, e.g.
//!
//! ```text
//! protocol=ab_eip&gateway=10.0.0.5&path=1,0&plc=LGX&elem_count=10&name=TestDINTArray[0]
//! ```
//!
//! Unknown keys are ignored so attribute strings written for newer library
//! versions keep working. Required keys: `protocol`, `gateway`, `name`, and
//! `path` for PLC families that route through a backplane.

use std::str::FromStr;

use crate::{
    cfg::enums::{PlcKind, Protocol, parse_bool},
    models::types::StringDef,
    status::Status,
};

pub const DEFAULT_EIP_PORT: u16 = 44818;

/// Standard CIP payload for a plain Forward Open; anything above selects the
/// Large Forward Open service.
pub const DEFAULT_CIP_PAYLOAD: u16 = 508;
pub const MAX_CIP_PAYLOAD: u16 = 4002;

const DEFAULT_FORWARD_OPEN_RETRIES: u32 = 5;

/// Typed options bag produced from an attribute string.
#[derive(Debug, Clone, PartialEq)]
pub struct TagOptions {
    pub protocol: Protocol,
    pub gateway_host: String,
    pub gateway_port: u16,
    /// Backplane routing segments, e.g. `1,0` -> `[1, 0]`.
    pub path: Vec<u8>,
    pub plc: PlcKind,
    pub name: String,
    pub elem_size: Option<u32>,
    pub elem_count: u32,
    pub debug: Option<i32>,
    pub read_cache_ms: u64,
    pub auto_sync_read_ms: u64,
    pub auto_sync_write_ms: u64,
    pub allow_packing: bool,
    pub connection_group_id: i32,
    pub use_connected_msg: bool,
    /// Requested CIP payload; > 508 selects Large Forward Open.
    pub cip_payload: u16,
    pub forward_open_retries: u32,
    pub string_def: Option<StringDef>,
}

impl TagOptions {
    /// Placeholder options for the `make=system&family=library` tags, which
    /// never touch the wire.
    pub fn library_defaults() -> TagOptions {
        TagOptions {
            protocol: Protocol::AbEip,
            gateway_host: String::new(),
            gateway_port: DEFAULT_EIP_PORT,
            path: Vec::new(),
            plc: PlcKind::ControlLogix,
            name: String::new(),
            elem_size: None,
            elem_count: 1,
            debug: None,
            read_cache_ms: 0,
            auto_sync_read_ms: 0,
            auto_sync_write_ms: 0,
            allow_packing: false,
            connection_group_id: 0,
            use_connected_msg: false,
            cip_payload: DEFAULT_CIP_PAYLOAD,
            forward_open_retries: DEFAULT_FORWARD_OPEN_RETRIES,
            string_def: None,
        }
    }

    pub fn parse(attrs: &str) -> Result<TagOptions, Status> {
        let mut protocol = None;
        let mut gateway = None;
        let mut path = Vec::new();
        let mut plc = None;
        let mut name = None;
        let mut elem_size = None;
        let mut elem_count = 1u32;
        let mut debug = None;
        let mut read_cache_ms = 0u64;
        let mut auto_sync_read_ms = 0u64;
        let mut auto_sync_write_ms = 0u64;
        let mut allow_packing = true;
        let mut connection_group_id = 0i32;
        let mut use_connected_msg = None;
        let mut cip_payload = DEFAULT_CIP_PAYLOAD;
        let mut forward_open_retries = DEFAULT_FORWARD_OPEN_RETRIES;
        let mut str_override = StrOverride::default();

        for pair in attrs.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or(Status::BadConfig)?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "protocol" => protocol = Some(value.parse::<Protocol>()?),
                "gateway" => gateway = Some(value.to_string()),
                "path" => path = parse_route_path(value)?,
                "plc" | "cpu" => plc = Some(value.parse::<PlcKind>()?),
                "name" => name = Some(value.to_string()),
                "elem_size" => elem_size = Some(parse_num::<u32>(value)?),
                "elem_count" => {
                    elem_count = parse_num::<u32>(value)?;
                    if elem_count == 0 {
                        return Err(Status::BadConfig);
                    }
                },
                "debug" => debug = Some(parse_num::<i32>(value)?),
                "read_cache_ms" => read_cache_ms = parse_num::<u64>(value)?,
                "auto_sync_read_ms" => auto_sync_read_ms = parse_num::<u64>(value)?,
                "auto_sync_write_ms" => auto_sync_write_ms = parse_num::<u64>(value)?,
                "allow_packing" => allow_packing = parse_bool(value)?,
                "connection_group_id" => connection_group_id = parse_num::<i32>(value)?,
                "use_connected_msg" => use_connected_msg = Some(parse_bool(value)?),
                "cip_payload" => {
                    cip_payload = parse_num::<u16>(value)?;
                    if !(DEFAULT_CIP_PAYLOAD..=MAX_CIP_PAYLOAD).contains(&cip_payload) {
                        return Err(Status::BadConfig);
                    }
                },
                "forward_open_retries" => forward_open_retries = parse_num::<u32>(value)?,
                _ if key.starts_with("str_") => str_override.apply(&key, value)?,
                // Unknown keys are accepted and ignored.
                _ => {},
            }
        }

        let protocol = protocol.ok_or(Status::BadConfig)?;
        let gateway = gateway.ok_or(Status::BadConfig)?;
        let name = name.ok_or(Status::BadConfig)?;
        let plc = plc.unwrap_or(PlcKind::ControlLogix);

        if plc.requires_path() && path.is_empty() {
            return Err(Status::BadConfig);
        }

        let (gateway_host, gateway_port) = split_host_port(&gateway)?;

        let string_def = str_override.finish(plc)?;

        Ok(TagOptions {
            protocol,
            gateway_host,
            gateway_port,
            path,
            plc,
            name,
            elem_size,
            elem_count,
            debug,
            read_cache_ms,
            auto_sync_read_ms,
            auto_sync_write_ms,
            allow_packing,
            connection_group_id,
            use_connected_msg: use_connected_msg.unwrap_or_else(|| plc.default_connected()),
            cip_payload,
            forward_open_retries,
            string_def,
        })
    }
}

/// Accumulates `str_*` overrides; only materializes a [`StringDef`] when at
/// least one override was present, starting from the flavor default.
#[derive(Debug, Default)]
struct StrOverride {
    touched: bool,
    count_word_bytes: Option<u8>,
    max_capacity: Option<u32>,
    total_length: Option<u32>,
    zero_terminated: Option<bool>,
    swap_bytes: Option<bool>,
    pad_bytes: Option<u8>,
}

impl StrOverride {
    fn apply(&mut self, key: &str, value: &str) -> Result<(), Status> {
        match key {
            "str_count_word_bytes" => {
                self.count_word_bytes = Some(parse_num::<u8>(value)?)
            },
            "str_max_capacity" => self.max_capacity = Some(parse_num::<u32>(value)?),
            "str_total_length" => self.total_length = Some(parse_num::<u32>(value)?),
            "str_is_zero_terminated" => self.zero_terminated = Some(parse_bool(value)?),
            "str_is_byte_swapped" => self.swap_bytes = Some(parse_bool(value)?),
            "str_pad_bytes" => self.pad_bytes = Some(parse_num::<u8>(value)?),
            // Other str_* keys from older attribute strings are tolerated.
            _ => return Ok(()),
        }
        self.touched = true;
        Ok(())
    }

    fn finish(self, plc: PlcKind) -> Result<Option<StringDef>, Status> {
        if !self.touched {
            return Ok(None);
        }
        let base = if plc.is_pccc() { StringDef::PCCC } else { StringDef::LOGIX };
        let def = StringDef {
            count_word_bytes: self.count_word_bytes.unwrap_or(base.count_word_bytes),
            max_capacity: self.max_capacity.unwrap_or(base.max_capacity),
            total_length: self.total_length.unwrap_or(base.total_length),
            zero_terminated: self.zero_terminated.unwrap_or(base.zero_terminated),
            swap_bytes: self.swap_bytes.unwrap_or(base.swap_bytes),
            pad_bytes: self.pad_bytes.unwrap_or(base.pad_bytes),
        };
        def.validate()?;
        Ok(Some(def))
    }
}

fn parse_num<T: FromStr>(v: &str) -> Result<T, Status> {
    v.parse::<T>().map_err(|_| Status::BadConfig)
}

/// `path=1,0` -> backplane routing bytes `[1, 0]`.
fn parse_route_path(path: &str) -> Result<Vec<u8>, Status> {
    let mut out = Vec::new();
    for seg in path.split(',') {
        out.push(seg.trim().parse::<u8>().map_err(|_| Status::BadConfig)?);
    }
    // Routing segments come in (port, address) pairs.
    if out.len() % 2 != 0 {
        return Err(Status::BadConfig);
    }
    Ok(out)
}

fn split_host_port(gateway: &str) -> Result<(String, u16), Status> {
    match gateway.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| Status::BadConfig)?;
            Ok((host.to_string(), port))
        },
        _ => {
            if gateway.is_empty() {
                return Err(Status::BadConfig);
            }
            Ok((gateway.to_string(), DEFAULT_EIP_PORT))
        },
    }
}
