// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;
use std::str::FromStr;

use crate::status::Status;

/// Protocol dialect selected by the `protocol=` attribute.
///
/// `ab_eip`, `ab-eip` and `ab-eip2` all mean CIP over EtherNet/IP; the `2`
/// variant is kept for compatibility with old attribute strings and behaves
/// identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    AbEip,
}

impl FromStr for Protocol {
    type Err = Status;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ab_eip" | "ab-eip" | "ab-eip2" => Ok(Protocol::AbEip),
            _ => Err(Status::BadConfig),
        }
    }
}

/// PLC family selected by the `plc=`/`cpu=` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlcKind {
    ControlLogix,
    Micro800,
    Omron,
    Plc5,
    Slc500,
    MicroLogix,
}

impl FromStr for PlcKind {
    type Err = Status;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "controllogix" | "contrologix" | "compactlogix" | "lgx" | "logix" => {
                Ok(PlcKind::ControlLogix)
            },
            "micro800" | "micro-800" | "micro8xx" => Ok(PlcKind::Micro800),
            "omron" | "omron-njnx" | "njnx" => Ok(PlcKind::Omron),
            "plc5" | "plc-5" | "plc" => Ok(PlcKind::Plc5),
            "slc" | "slc500" | "slc-500" => Ok(PlcKind::Slc500),
            "micrologix" | "mlgx" => Ok(PlcKind::MicroLogix),
            _ => Err(Status::BadConfig),
        }
    }
}

impl fmt::Display for PlcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlcKind::ControlLogix => "ControlLogix",
            PlcKind::Micro800 => "Micro800",
            PlcKind::Omron => "Omron",
            PlcKind::Plc5 => "PLC5",
            PlcKind::Slc500 => "SLC500",
            PlcKind::MicroLogix => "MicroLogix",
        })
    }
}

impl PlcKind {
    /// PLC5/SLC/MicroLogix speak PCCC wrapped in CIP; the rest speak native
    /// CIP tag services.
    #[inline]
    pub fn is_pccc(self) -> bool {
        matches!(self, PlcKind::Plc5 | PlcKind::Slc500 | PlcKind::MicroLogix)
    }

    /// Whether a `path=` attribute is mandatory for this family.
    #[inline]
    pub fn requires_path(self) -> bool {
        matches!(self, PlcKind::ControlLogix)
    }

    /// Default for `use_connected_msg` when the attribute is absent.
    /// PCCC bridges answer fine over unconnected Execute-PCCC; the CIP tag
    /// families get a Forward-Open connection.
    #[inline]
    pub fn default_connected(self) -> bool {
        !self.is_pccc()
    }
}

/// Parse `0`/`1`/`true`/`false`/`yes`/`no` attribute values.
pub fn parse_bool(v: &str) -> Result<bool, Status> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(Status::BadConfig),
    }
}
