// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The process-wide tag registry: a single-mutex-guarded map from a 28-bit
//! tag identifier to a tag handle. Grounded in `libplctag/lib/lib.c`'s
//! `TAG_ID_MASK`/`MAX_TAG_MAP_ATTEMPTS` constants, using a plain
//! `std::sync::Mutex` rather than a sharded map because every registry
//! operation is non-blocking and short: all operations are serialized by a
//! single registry mutex.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    error::{PlcError, PlcResult},
    tag::Tag,
};

/// A positive, 28-bit tag identifier. Zero is never issued.
pub type TagId = u32;

/// Tag IDs live in the low 28 bits, grounded in `libplctag`'s
/// `TAG_ID_MASK = 0xFFFFFFF`.
pub const TAG_ID_MASK: u32 = 0x0FFF_FFFF;

/// Scan budget before `register` gives up and reports `NO_RESOURCES`,
/// grounded in `libplctag`'s `MAX_TAG_MAP_ATTEMPTS`.
const MAX_REGISTER_ATTEMPTS: u32 = 50;

struct Inner {
    next_id: u32,
    map: HashMap<TagId, Arc<Tag>>,
    capacity: usize,
}

/// The process-wide registry. One instance lives inside
/// [`crate::api::PlcTagContext`].
pub struct TagRegistry {
    inner: Mutex<Inner>,
}

impl TagRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                map: HashMap::new(),
                capacity,
            }),
        }
    }

    /// Assigns the next unused positive 28-bit ID, skipping zero and values
    /// already live, scanning at most [`MAX_REGISTER_ATTEMPTS`] candidates.
    pub fn register(&self, tag: Arc<Tag>) -> PlcResult<TagId> {
        let mut inner = self.inner.lock().map_err(|_| PlcError::MutexLock)?;
        if inner.map.len() >= inner.capacity {
            return Err(PlcError::NoResources);
        }

        for _ in 0..MAX_REGISTER_ATTEMPTS {
            let candidate = inner.next_id & TAG_ID_MASK;
            inner.next_id = inner.next_id.wrapping_add(1);
            if candidate == 0 {
                continue;
            }
            if let std::collections::hash_map::Entry::Vacant(e) = inner.map.entry(candidate) {
                e.insert(tag);
                return Ok(candidate);
            }
        }
        Err(PlcError::NoResources)
    }

    /// Acquires a strong reference to a live tag; the registry is not
    /// consulted again once this returns, so the tag cannot be destroyed out
    /// from under the caller while the `Arc` is held.
    pub fn lookup(&self, id: TagId) -> Option<Arc<Tag>> {
        self.inner.lock().ok()?.map.get(&id).cloned()
    }

    /// Removes and returns a tag, leaving the slot empty for reuse.
    pub fn remove(&self, id: TagId) -> Option<Arc<Tag>> {
        self.inner.lock().ok()?.map.remove(&id)
    }

    /// A snapshot of live tag IDs for the tickler to iterate. Each call
    /// re-reads current state under the registry mutex; the
    /// tickler then re-`lookup`s each ID individually, so a tag destroyed
    /// between the snapshot and the lookup is simply skipped.
    pub fn iterate_snapshot(&self) -> Vec<TagId> {
        match self.inner.lock() {
            Ok(inner) => inner.map.keys().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().map(|i| i.capacity).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
