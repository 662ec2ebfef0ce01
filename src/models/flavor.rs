// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-PLC-flavor behavior behind one dispatch point.
//!
//! The families differ in how a tag name turns into wire addressing, which
//! string layout they default to, and whether the fragmented tag services
//! exist at all. Everything else in the runtime is flavor-agnostic.

use enum_dispatch::enum_dispatch;

use crate::{
    cfg::enums::PlcKind,
    models::{
        epath::{TagPath, encode_tag_path},
        pccc::{PcccAddress, parse_pccc_address},
        types::StringDef,
    },
    status::PlcResult,
};

/// A tag name resolved into its wire addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAddress {
    Cip(TagPath),
    Pccc(PcccAddress),
}

#[enum_dispatch]
pub trait FlavorOps {
    /// Resolve a textual tag name into wire addressing.
    fn encode_address(&self, name: &str) -> PlcResult<TagAddress>;

    /// String layout assumed when no `str_*` overrides are present.
    fn default_string_def(&self) -> StringDef;

    /// Whether Read/Write-Tag-Fragmented exist on this family.
    fn supports_fragmented(&self) -> bool;
}

/// Native CIP tag services (ControlLogix, Micro800, Omron).
#[derive(Debug, Clone, Copy)]
pub struct CipFlavor {
    /// Omron NJ/NX rejects the fragmented read service.
    pub omron: bool,
}

impl FlavorOps for CipFlavor {
    fn encode_address(&self, name: &str) -> PlcResult<TagAddress> {
        Ok(TagAddress::Cip(encode_tag_path(name)?))
    }

    fn default_string_def(&self) -> StringDef {
        StringDef::LOGIX
    }

    fn supports_fragmented(&self) -> bool {
        !self.omron
    }
}

/// PCCC-over-CIP (PLC5, SLC500, MicroLogix).
#[derive(Debug, Clone, Copy)]
pub struct PcccFlavor {
    /// PLC5 uses word-range functions; SLC/MicroLogix the protected typed
    /// ones.
    pub plc5: bool,
}

impl FlavorOps for PcccFlavor {
    fn encode_address(&self, name: &str) -> PlcResult<TagAddress> {
        Ok(TagAddress::Pccc(parse_pccc_address(name)?))
    }

    fn default_string_def(&self) -> StringDef {
        StringDef::PCCC
    }

    fn supports_fragmented(&self) -> bool {
        // PCCC has its own bounded transfers instead.
        false
    }
}

#[enum_dispatch(FlavorOps)]
#[derive(Debug, Clone, Copy)]
pub enum Flavor {
    Cip(CipFlavor),
    Pccc(PcccFlavor),
}

impl Flavor {
    pub fn for_kind(kind: PlcKind) -> Flavor {
        match kind {
            PlcKind::ControlLogix | PlcKind::Micro800 => {
                Flavor::Cip(CipFlavor { omron: false })
            },
            PlcKind::Omron => Flavor::Cip(CipFlavor { omron: true }),
            PlcKind::Plc5 => Flavor::Pccc(PcccFlavor { plc5: true }),
            PlcKind::Slc500 | PlcKind::MicroLogix => {
                Flavor::Pccc(PcccFlavor { plc5: false })
            },
        }
    }
}
