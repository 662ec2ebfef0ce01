// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Status and event taxonomy shared by the whole library.
//!
//! Every public control-plane call resolves to a [`Status`]; the variant set
//! maps 1:1 onto the stable integer codes of the classic C ABI, so
//! `Status::code()` / `Status::from_code()` round-trip. `Ok` is 0, `Pending`
//! is 1, everything negative is an error.

use thiserror::Error;

/// Result alias used by the protocol internals.
pub type PlcResult<T> = Result<T, Status>;

/// Outcome of a library operation.
///
/// `Ok` and `Pending` are not errors, but keeping them in the same enum lets
/// `status(tag_id)` return a single value the way the integer ABI does.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Status {
    #[error("ok")]
    Ok,
    #[error("operation pending")]
    Pending,

    #[error("operation aborted")]
    Abort,
    #[error("bad attribute string or configuration")]
    BadConfig,
    #[error("connection to the PLC lost or refused")]
    BadConnection,
    #[error("malformed data")]
    BadData,
    #[error("remote device rejected the request")]
    BadDevice,
    #[error("gateway unreachable")]
    BadGateway,
    #[error("invalid parameter")]
    BadParam,
    #[error("malformed reply on the wire")]
    BadReply,
    #[error("remote status {general:#04x} (extended {extended:#06x})")]
    BadStatus { general: u8, extended: u16 },
    #[error("error closing connection")]
    Close,
    #[error("tag creation failed")]
    Create,
    #[error("callback or logger already registered")]
    Duplicate,
    #[error("request encoding failed")]
    Encode,
    #[error("operation not allowed in this state")]
    NotAllowed,
    #[error("tag or attribute not found")]
    NotFound,
    #[error("not implemented")]
    NotImplemented,
    #[error("no data in reply")]
    NoData,
    #[error("no match")]
    NoMatch,
    #[error("out of memory")]
    NoMem,
    #[error("no resources")]
    NoResources,
    #[error("offset outside the tag data buffer")]
    OutOfBounds,
    #[error("read failed")]
    Read,
    #[error("remote PCCC error {0:#04x}")]
    RemoteErr(u8),
    #[error("operation timed out")]
    Timeout,
    #[error("request or value too large")]
    TooLarge,
    #[error("request or value too small")]
    TooSmall,
    #[error("unsupported operation for this PLC type")]
    Unsupported,
    #[error("write failed")]
    Write,
    #[error("some sub-operations failed")]
    Partial,
    #[error("tag busy with another operation")]
    Busy,
}

impl Status {
    /// Stable integer code, identical to the classic C ABI values.
    pub fn code(&self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Pending => 1,
            Status::Abort => -1,
            Status::BadConfig => -2,
            Status::BadConnection => -3,
            Status::BadData => -4,
            Status::BadDevice => -5,
            Status::BadGateway => -6,
            Status::BadParam => -7,
            Status::BadReply => -8,
            Status::BadStatus { .. } => -9,
            Status::Close => -10,
            Status::Create => -11,
            Status::Duplicate => -12,
            Status::Encode => -13,
            Status::NotAllowed => -18,
            Status::NotFound => -19,
            Status::NotImplemented => -20,
            Status::NoData => -21,
            Status::NoMatch => -22,
            Status::NoMem => -23,
            Status::NoResources => -24,
            Status::OutOfBounds => -27,
            Status::Read => -28,
            Status::RemoteErr(_) => -29,
            Status::Timeout => -32,
            Status::TooLarge => -33,
            Status::TooSmall => -34,
            Status::Unsupported => -35,
            Status::Write => -37,
            Status::Partial => -38,
            Status::Busy => -39,
        }
    }

    /// Inverse of [`Status::code`]. Codes the library never produces map to
    /// `NoMatch`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::Pending,
            -1 => Status::Abort,
            -2 => Status::BadConfig,
            -3 => Status::BadConnection,
            -4 => Status::BadData,
            -5 => Status::BadDevice,
            -6 => Status::BadGateway,
            -7 => Status::BadParam,
            -8 => Status::BadReply,
            -9 => Status::BadStatus { general: 0xff, extended: 0 },
            -10 => Status::Close,
            -11 => Status::Create,
            -12 => Status::Duplicate,
            -13 => Status::Encode,
            -18 => Status::NotAllowed,
            -19 => Status::NotFound,
            -20 => Status::NotImplemented,
            -21 => Status::NoData,
            -23 => Status::NoMem,
            -24 => Status::NoResources,
            -27 => Status::OutOfBounds,
            -28 => Status::Read,
            -29 => Status::RemoteErr(0),
            -32 => Status::Timeout,
            -33 => Status::TooLarge,
            -34 => Status::TooSmall,
            -35 => Status::Unsupported,
            -37 => Status::Write,
            -38 => Status::Partial,
            -39 => Status::Busy,
            _ => Status::NoMatch,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }

    #[inline]
    pub fn is_err(&self) -> bool {
        !self.is_ok() && !self.is_pending()
    }
}

/// Events delivered to the per-tag callback. Numbering follows the classic
/// ABI so the values can cross an FFI boundary unchanged.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ReadStarted = 1,
    ReadCompleted = 2,
    WriteStarted = 3,
    WriteCompleted = 4,
    Aborted = 5,
    Destroyed = 6,
    Created = 7,
}

bitflags::bitflags! {
    /// Which events a registered callback wants to see.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const READ_STARTED    = 1 << 1;
        const READ_COMPLETED  = 1 << 2;
        const WRITE_STARTED   = 1 << 3;
        const WRITE_COMPLETED = 1 << 4;
        const ABORTED         = 1 << 5;
        const DESTROYED       = 1 << 6;
        const CREATED         = 1 << 7;
    }
}

impl Event {
    #[inline]
    pub fn mask(self) -> EventMask {
        EventMask::from_bits_truncate(1u32 << (self as i32))
    }
}

/// Debug levels of the classic ABI, mapped onto `tracing` levels by the
/// logger layer in `cfg::logger`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    None = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Detail = 4,
    Spew = 5,
}

impl DebugLevel {
    pub fn from_int(v: i32) -> Self {
        match v {
            i32::MIN..=0 => DebugLevel::None,
            1 => DebugLevel::Error,
            2 => DebugLevel::Warn,
            3 => DebugLevel::Info,
            4 => DebugLevel::Detail,
            _ => DebugLevel::Spew,
        }
    }
}
