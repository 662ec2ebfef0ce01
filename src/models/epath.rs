// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CIP EPATH encoding for tag names.
//!
//! `Program:Main.Counts[3,4].acc` becomes a sequence of ANSI extended
//! symbolic segments (marker 0x91) and logical member segments (0x28 /
//! 0x29 / 0x2A picked by value magnitude). Special `@` names route to
//! class/instance paths instead of the symbol space.

use crate::status::{PlcResult, Status};

pub const SYMBOLIC_SEGMENT: u8 = 0x91;
pub const MEMBER_SEGMENT_U8: u8 = 0x28;
pub const MEMBER_SEGMENT_U16: u8 = 0x29;
pub const MEMBER_SEGMENT_U32: u8 = 0x2A;

/// Class of the symbol object that backs `@tags` listing.
pub const CLASS_SYMBOL: u16 = 0x6B;
/// Class of the template object that backs `@udt/<n>`.
pub const CLASS_TEMPLATE: u16 = 0x6C;
/// Message router, target of embedded Multiple Service Packet paths.
pub const CLASS_MESSAGE_ROUTER: u16 = 0x02;
/// Connection manager, target of Forward Open/Close.
pub const CLASS_CONNECTION_MANAGER: u16 = 0x06;
/// PCCC object, target of Execute PCCC.
pub const CLASS_PCCC: u16 = 0x67;

/// Where a tag name points after encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPath {
    /// Symbolic + numeric segments for the tag services.
    Symbolic(Vec<u8>),
    /// Class/instance target for the listing services (`@tags`, `@udt/<n>`).
    Instance { class: u16, instance: u16 },
    /// Caller supplies the whole CIP request (`@raw`).
    Raw,
    /// Controller change-counter diagnostic (`@change`).
    ChangeCounter,
}

/// Encode a textual tag name. Special names start with `@`.
pub fn encode_tag_path(name: &str) -> PlcResult<TagPath> {
    if let Some(special) = name.strip_prefix('@') {
        return encode_special(special);
    }

    let mut out = Vec::with_capacity(name.len() + 8);
    for part in name.split('.') {
        let (symbol, subscripts) = split_subscripts(part)?;
        if !symbol.is_empty() {
            push_symbolic(&mut out, symbol)?;
        } else if out.is_empty() {
            // A bare subscript with no leading symbol is not addressable.
            return Err(Status::BadParam);
        }
        for sub in subscripts {
            push_member(&mut out, sub);
        }
    }
    if out.is_empty() {
        return Err(Status::BadParam);
    }
    Ok(TagPath::Symbolic(out))
}

fn encode_special(special: &str) -> PlcResult<TagPath> {
    if special.eq_ignore_ascii_case("tags") {
        return Ok(TagPath::Instance { class: CLASS_SYMBOL, instance: 0 });
    }
    if let Some(id) = special.strip_prefix("udt/") {
        let instance = id.parse::<u16>().map_err(|_| Status::BadParam)?;
        return Ok(TagPath::Instance { class: CLASS_TEMPLATE, instance });
    }
    if special.eq_ignore_ascii_case("raw") {
        return Ok(TagPath::Raw);
    }
    if special.eq_ignore_ascii_case("change") {
        return Ok(TagPath::ChangeCounter);
    }
    Err(Status::BadParam)
}

/// `Counts[3,4]` -> (`Counts`, [3, 4]).
fn split_subscripts(part: &str) -> PlcResult<(&str, Vec<u32>)> {
    let Some(open) = part.find('[') else {
        return Ok((part, Vec::new()));
    };
    let symbol = &part[..open];
    let rest = &part[open + 1..];
    let Some(close) = rest.find(']') else {
        return Err(Status::BadParam);
    };
    if !rest[close + 1..].is_empty() {
        return Err(Status::BadParam);
    }
    let mut subs = Vec::new();
    for v in rest[..close].split(',') {
        subs.push(v.trim().parse::<u32>().map_err(|_| Status::BadParam)?);
    }
    if subs.is_empty() || subs.len() > 3 {
        return Err(Status::BadParam);
    }
    Ok((symbol, subs))
}

fn push_symbolic(out: &mut Vec<u8>, symbol: &str) -> PlcResult<()> {
    let bytes = symbol.as_bytes();
    if bytes.is_empty() || bytes.len() > u8::MAX as usize {
        return Err(Status::BadParam);
    }
    let first = bytes[0];
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return Err(Status::BadParam);
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b':')
    {
        return Err(Status::BadParam);
    }
    out.push(SYMBOLIC_SEGMENT);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    if bytes.len() % 2 != 0 {
        out.push(0); // pad to a 16-bit boundary
    }
    Ok(())
}

fn push_member(out: &mut Vec<u8>, value: u32) {
    if value <= u8::MAX as u32 {
        out.push(MEMBER_SEGMENT_U8);
        out.push(value as u8);
    } else if value <= u16::MAX as u32 {
        out.push(MEMBER_SEGMENT_U16);
        out.push(0);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else {
        out.push(MEMBER_SEGMENT_U32);
        out.push(0);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Logical class/instance path, 8-bit segments when the values fit.
pub fn class_instance_path(class: u16, instance: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    if class <= u8::MAX as u16 {
        out.extend_from_slice(&[0x20, class as u8]);
    } else {
        out.push(0x21);
        out.push(0);
        out.extend_from_slice(&class.to_le_bytes());
    }
    if instance <= u8::MAX as u16 {
        out.extend_from_slice(&[0x24, instance as u8]);
    } else {
        out.push(0x25);
        out.push(0);
        out.extend_from_slice(&instance.to_le_bytes());
    }
    out
}

/// Connection path used by Forward Open: backplane routing segments followed
/// by the message-router class/instance.
pub fn connection_path(route: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(route.len() + 4);
    out.extend_from_slice(route);
    out.extend_from_slice(&class_instance_path(CLASS_MESSAGE_ROUTER, 1));
    out
}
