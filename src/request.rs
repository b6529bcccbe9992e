// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-flight request bookkeeping shared between a [`crate::tag::Tag`] and its
//! [`crate::session::Session`]: every outbound request gets a correlation
//! key, and the session demultiplexes inbound replies back onto the
//! waiting request by that key.

use std::sync::atomic::{AtomicU16, Ordering};

use crate::error::PlcError;

/// Correlates an EtherNet/IP response to the request that caused it. CIP
/// itself is request/response over a single TCP stream, so the sender
/// context field of the encapsulation header is enough; no separate
/// transaction table is required beyond this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey(pub u64);

static NEXT_CONTEXT: AtomicU16 = AtomicU16::new(1);

/// Allocates the next sender-context value to stamp into an outbound
/// encapsulation header. Wraps at `u16::MAX`; collisions are harmless because
/// at most one request per context is ever in flight on a connected session.
pub fn next_sender_context() -> u16 {
    NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed)
}

/// What a [`Request`] is waiting to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Built, not yet handed to the session.
    Pending,
    /// Handed to the session; awaiting a reply or fragment continuation.
    InFlight,
    /// A reply arrived and was applied to the tag's buffer/status.
    Complete,
    /// Cancelled before the session could deliver a reply.
    Aborted,
}

/// One outstanding CIP/PCCC operation: a read, a write, or a fragment
/// continuation of either. Owned by the [`crate::tag::Tag`] that issued it;
/// the session only ever sees a reference to drive it forward.
#[derive(Debug, Clone)]
pub struct Request {
    pub key: CorrelationKey,
    pub state: RequestState,
    /// Byte offset already transferred, for fragmented reads/writes
    /// (CIP status `0x06` means continue).
    pub offset: usize,
    pub last_error: Option<PlcError>,
}

impl Request {
    pub fn new(key: CorrelationKey) -> Self {
        Self {
            key,
            state: RequestState::Pending,
            offset: 0,
            last_error: None,
        }
    }

    pub fn mark_in_flight(&mut self) {
        self.state = RequestState::InFlight;
    }

    pub fn mark_complete(&mut self) {
        self.state = RequestState::Complete;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, err: PlcError) {
        self.state = RequestState::Complete;
        self.last_error = Some(err);
    }

    pub fn mark_aborted(&mut self) {
        self.state = RequestState::Aborted;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RequestState::Complete | RequestState::Aborted)
    }
}
