// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The EtherNet/IP session layer: encapsulation framing, CIP/PCCC request
//! construction, and the TCP connection that carries them. A `Session`
//! owns split read/write halves with a per-request demultiplexing table,
//! and a `SessionPool` keyed by gateway/path/connection-group identity
//! shares one `Session` across every tag that addresses the same
//! controller over the same route.

pub mod cip;
pub mod codec;
pub mod pccc;
pub mod pool;
pub mod session;

pub use pool::SessionPool;
pub use session::{Session, SessionState};
