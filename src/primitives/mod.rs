// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Platform primitives the rest of the crate is built on: monotonic time and
//! byte-order permutation. Threads, mutexes, condition variables and sockets
//! are *not* reimplemented here — `tokio` and `std::sync` already provide
//! idiomatic, audited equivalents, so this module only covers what's
//! actually PLC-protocol-specific.

pub mod byteorder;
pub mod time;
