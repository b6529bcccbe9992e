// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The library's flat error-kind taxonomy.
//!
//! The original C library returns a single `int` status code from every API
//! call, with two reserved non-error values (`OK`, `PENDING`) alongside a
//! flat list of error kinds. Rust lets us split that in two: success is
//! `Result::Ok(())`, and `PENDING` becomes a first-class [`PlcError`] variant
//! callers are expected to match on (the same way `std::io::ErrorKind::WouldBlock`
//! is "not really an error" but still travels through the `Result` channel).

use thiserror::Error;

/// A convenience alias used throughout the public API.
pub type PlcResult<T> = Result<T, PlcError>;

/// The complete error-kind taxonomy surfaced by the library.
///
/// Categories: argument errors, resource exhaustion,
/// concurrency/timeouts, raw I/O, and protocol-level failures. `Pending` is
/// the one non-error "status" kept in this enum, because callers branch on
/// it just like any other kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlcError {
    // --- control flow -------------------------------------------------
    #[error("operation is still pending")]
    Pending,

    // --- argument errors ------------------------------------------------
    #[error("bad parameter")]
    BadParam,
    #[error("null pointer")]
    NullPtr,
    #[error("value too large for the destination")]
    TooLarge,
    #[error("value too small")]
    TooSmall,
    #[error("index out of bounds")]
    OutOfBounds,
    #[error("malformed data")]
    BadData,
    #[error("operation not allowed in the current state")]
    NotAllowed,
    #[error("unsupported option or feature")]
    Unsupported,
    #[error("duplicate registration")]
    Duplicate,
    #[error("not found")]
    NotFound,
    #[error("not implemented")]
    NotImplemented,

    // --- resource errors -------------------------------------------------
    #[error("out of memory")]
    NoMem,
    #[error("no resources available")]
    NoResources,
    #[error("failed to create a resource")]
    Create,
    #[error("failed to open a resource")]
    Open,
    #[error("failed to close a resource")]
    Close,

    // --- concurrency errors ------------------------------------------------
    #[error("mutex init failed")]
    MutexInit,
    #[error("mutex lock failed")]
    MutexLock,
    #[error("mutex unlock failed")]
    MutexUnlock,
    #[error("mutex destroy failed")]
    MutexDestroy,
    #[error("thread create failed")]
    ThreadCreate,
    #[error("thread join failed")]
    ThreadJoin,
    #[error("operation already in flight")]
    Busy,

    // --- I/O errors -------------------------------------------------
    #[error("socket read failed")]
    Read,
    #[error("socket write failed")]
    Write,
    #[error("operation timed out")]
    Timeout,
    #[error("operation aborted")]
    Abort,
    #[error("platform socket error")]
    Winsock,

    // --- protocol errors -------------------------------------------------
    #[error("bad configuration")]
    BadConfig,
    #[error("bad connection")]
    BadConnection,
    #[error("unexpected device type")]
    BadDevice,
    #[error("bad gateway")]
    BadGateway,
    #[error("malformed reply")]
    BadReply,
    #[error("bad status field")]
    BadStatus,
    #[error("failed to encode a request")]
    Encode,
    #[error("no data returned")]
    NoData,
    #[error("reply did not match any pending request")]
    NoMatch,
    #[error("remote device returned CIP general status 0x{0:02x}")]
    RemoteErr(u8),
    #[error("partial transfer, continuation required")]
    Partial,
}

impl PlcError {
    /// `true` for the one non-error "status" kind, kept here because callers
    /// branch on it like any other [`PlcError`] variant (see module docs).
    pub fn is_pending(self) -> bool {
        matches!(self, PlcError::Pending)
    }
}

impl From<std::io::Error> for PlcError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            TimedOut => PlcError::Timeout,
            ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe => {
                PlcError::BadConnection
            },
            _ => PlcError::Read,
        }
    }
}

/// Maps a CIP "General Status" byte (CIP Volume 1, Appendix B) to a library
/// error kind. `0x00` (success) and `0x06` (partial transfer) are handled by
/// callers before reaching this table; anything this table doesn't recognize
/// surfaces as [`PlcError::RemoteErr`] with the raw byte preserved.
pub fn cip_status_to_kind(status: u8) -> PlcError {
    match status {
        0x00 => PlcError::BadStatus, // caller should never forward success here
        0x01 => PlcError::BadConnection,
        0x02 => PlcError::NoResources,
        0x03 => PlcError::BadParam,
        0x04 => PlcError::BadReply,   // path segment error
        0x05 => PlcError::NotFound,   // path destination unknown
        0x06 => PlcError::Partial,    // should be intercepted earlier
        0x07 => PlcError::BadConnection,
        0x08 => PlcError::Unsupported,
        0x09 => PlcError::BadParam,   // invalid attribute value
        0x0A => PlcError::BadReply,   // attribute list error
        0x0B => PlcError::Busy,
        0x0C => PlcError::BadStatus,  // object state conflict
        0x0D => PlcError::Duplicate,  // object already exists
        0x0E => PlcError::NotAllowed, // attribute not settable
        0x0F => PlcError::NotAllowed, // permission denied
        0x10 => PlcError::BadStatus,  // device state conflict
        0x11 => PlcError::TooLarge,   // reply data too large
        0x12 => PlcError::BadStatus,  // fragmentation of a primitive value
        0x13 => PlcError::TooSmall,   // not enough data
        0x14 => PlcError::Unsupported, // attribute not supported
        0x15 => PlcError::TooLarge,   // too much data
        0x16 => PlcError::NotFound,   // object does not exist
        0x17 => PlcError::BadStatus,  // fragmentation sequence not in progress
        0x18 => PlcError::NoData,     // no stored attribute data
        0x19 => PlcError::BadStatus,  // store operation failure
        0x1A => PlcError::TooLarge,   // routing failure, request too large
        0x1B => PlcError::TooLarge,   // routing failure, response too large
        0x1C => PlcError::BadData,    // missing attribute list entry data
        0x1D => PlcError::BadData,    // invalid attribute value list
        0x1E => PlcError::BadStatus,  // embedded service error
        0x1F => PlcError::BadStatus,  // vendor-specific error
        0x20 => PlcError::BadParam,   // invalid parameter
        0x21 => PlcError::Duplicate,  // write-once value already written
        0x22 => PlcError::BadReply,   // invalid reply received
        0x25 => PlcError::BadParam,   // key segment failure
        0x26 => PlcError::BadReply,   // invalid path size
        other => PlcError::RemoteErr(other),
    }
}

/// Maps a PCCC reply status byte (and its extended STS byte, when the base
/// byte is `0xF0`) to a library error kind.
pub fn pccc_status_to_kind(sts: u8, ext_sts: Option<u8>) -> PlcError {
    match sts {
        0x00 => PlcError::BadStatus, // caller should never forward success here
        0x10 => PlcError::BadParam,  // illegal command or format
        0x20 => PlcError::NoResources,
        0x30 => PlcError::NotAllowed, // processor in program mode
        0x40 => PlcError::BadConfig,  // compatibility mode file mismatch
        0x50 => PlcError::OutOfBounds,
        0x60 => PlcError::Unsupported,
        0x70 => PlcError::TooLarge,
        0x80 => PlcError::BadData,
        0x90 => PlcError::NotFound,
        0xA0 => PlcError::BadParam,
        0xF0 => ext_sts.map_or(PlcError::RemoteErr(sts), PlcError::RemoteErr),
        other => PlcError::RemoteErr(other),
    }
}
