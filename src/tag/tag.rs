// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A single tag: attributes, buffer, state machine, and the in-flight
//! request driving it. A context struct holding the pieces an async step
//! function needs, but long-lived and mutex-guarded, since a tag outlives
//! any single operation and is shared between the public API and the
//! tickler.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    cfg::attr::TagAttributes,
    error::{PlcError, PlcResult},
    primitives::{
        byteorder::{ByteOrderPolicy, family_defaults},
        time::{now_ms, round_to_next_period},
    },
    request::{CorrelationKey, Request},
    session::{
        cip::{CipRequest, CipStatus, build_read_modify_write, build_read_tag, build_write_tag},
        pccc::{build_pccc_read, build_pccc_write, next_transaction_seq, parse_address},
        session::Session,
    },
    tag::{
        buffer::TagBuffer,
        events::{PendingEvents, TagEvent},
        state::TagState,
    },
};

type Callback = Box<dyn Fn(TagEvent) + Send + Sync>;

struct TagInner {
    state: TagState,
    buffer: TagBuffer,
    session: Option<Arc<Session>>,
    request: Option<Request>,
    pending_events: PendingEvents,
    callback: Option<Callback>,
    last_error: Option<PlcError>,
    pccc_seq: u16,
    /// Set whenever the buffer is written to while an auto-sync write
    /// interval is configured; cleared once that write actually goes out.
    /// Never set otherwise — dirty implies auto-sync write is configured.
    dirty: bool,
    /// When the last successful read completed, for `read_cache_ms`
    /// freshness checks.
    last_read_at: Option<u64>,
    next_auto_read_at: Option<u64>,
    next_auto_write_at: Option<u64>,
}

/// One named PLC value and everything needed to read or write it.
pub struct Tag {
    pub attrs: TagAttributes,
    inner: Mutex<TagInner>,
}

impl Tag {
    /// Builds a new tag in state `New`. The buffer is sized from
    /// `elem_type`/`elem_count`/`elem_size` when known; otherwise it starts
    /// empty and is resized after the tag's first read (`allow_field_resize`).
    pub fn new(attrs: TagAttributes) -> Arc<Self> {
        let byte_order = family_defaults(attrs.plc);
        let byte_order = apply_attribute_overrides(byte_order, &attrs);

        let size = tag_size_bytes(&attrs).unwrap_or(0) as usize;

        let now = now_ms();
        let next_auto_read_at = (attrs.auto_sync_read_ms > 0).then_some(now);
        let next_auto_write_at = (attrs.auto_sync_write_ms > 0).then_some(now);

        let mut pending_events = PendingEvents::empty();
        pending_events.mark(TagEvent::Created);

        Arc::new(Self {
            attrs,
            inner: Mutex::new(TagInner {
                state: TagState::New,
                buffer: TagBuffer::new(size, byte_order),
                session: None,
                request: None,
                pending_events,
                callback: None,
                last_error: None,
                pccc_seq: 0,
                dirty: false,
                last_read_at: None,
                next_auto_read_at,
                next_auto_write_at,
            }),
        })
    }

    pub async fn state(&self) -> TagState {
        self.inner.lock().await.state
    }

    pub async fn status(&self) -> PlcResult<()> {
        let inner = self.inner.lock().await;
        match inner.last_error {
            Some(e) => Err(e),
            None if inner.state.is_busy() => Err(PlcError::Pending),
            None => Ok(()),
        }
    }

    pub async fn attach_session(&self, session: Arc<Session>) {
        self.inner.lock().await.session = Some(session);
    }

    /// Registers `cb` as this tag's event callback, failing with
    /// [`PlcError::Duplicate`] (leaving the existing callback in place) if
    /// one is already registered. Any event that fired before a callback
    /// existed (at minimum `Created`) is delivered immediately on success.
    pub async fn register_callback(&self, cb: Callback) -> PlcResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.callback.is_some() {
            return Err(PlcError::Duplicate);
        }
        inner.callback = Some(cb);
        let backlog = inner.pending_events.take_all();
        if let Some(cb) = &inner.callback {
            for ev in backlog {
                cb(ev);
            }
        }
        Ok(())
    }

    pub async fn unregister_callback(&self) {
        self.inner.lock().await.callback = None;
    }

    async fn fire(&self, inner: &mut TagInner, event: TagEvent) {
        inner.pending_events.mark(event);
        if let Some(cb) = &inner.callback {
            for ev in inner.pending_events.take_all() {
                cb(ev);
            }
        }
    }

    async fn transition(&self, inner: &mut TagInner, to: TagState) -> PlcResult<()> {
        if !inner.state.can_transition_to(to) {
            return Err(PlcError::NotAllowed);
        }
        inner.state = to;
        Ok(())
    }

    /// Kicks off a read. The actual network exchange happens
    /// in [`Tag::drive`], invoked by the tickler or, for a synchronous-style
    /// caller, awaited immediately by the public API. Fails with
    /// [`PlcError::Busy`] if a read or write is already in flight.
    pub async fn begin_read(&self) -> PlcResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_busy() {
            return Err(PlcError::Busy);
        }
        if inner.state == TagState::New {
            self.transition(&mut inner, TagState::Creating).await?;
        }
        self.transition(&mut inner, TagState::Reading).await?;
        inner.request = Some(Request::new(CorrelationKey(0)));
        inner.last_error = None;
        self.fire(&mut inner, TagEvent::ReadStarted).await;
        Ok(())
    }

    /// Fails with [`PlcError::Busy`] if a read or write is already in
    /// flight.
    pub async fn begin_write(&self) -> PlcResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_busy() {
            return Err(PlcError::Busy);
        }
        if self.attrs.plc.rejects_fragmented_write() && tag_size_bytes(&self.attrs).unwrap_or(0) > 488 {
            return Err(PlcError::TooLarge);
        }
        self.transition(&mut inner, TagState::Writing).await?;
        inner.request = Some(Request::new(CorrelationKey(0)));
        inner.last_error = None;
        self.fire(&mut inner, TagEvent::WriteStarted).await;
        Ok(())
    }

    pub async fn abort(&self) -> PlcResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(req) = &mut inner.request {
            req.mark_aborted();
        }
        self.transition(&mut inner, TagState::Idle).await.ok();
        self.fire(&mut inner, TagEvent::Aborted).await;
        Ok(())
    }

    /// Drives one network round trip for whichever operation is active,
    /// looping internally over fragmented continuations until the
    /// operation completes or fails (CIP status `0x06` means continue).
    pub async fn drive(&self) -> PlcResult<()> {
        let state = self.state().await;
        match state {
            TagState::Reading => self.drive_read().await,
            TagState::Writing => self.drive_write().await,
            _ => Ok(()),
        }
    }

    /// Sends a tag-level request the way this tag is configured to:
    /// packed into the session's next Multiple Service Packet
    /// (`allow_packing`), over the session's Forward-Open connection
    /// (`use_connected_msg`), or plain Unconnected Send, in that order of
    /// preference.
    async fn send_request(&self, session: &Session, req: &CipRequest) -> PlcResult<(CipStatus, Bytes)> {
        if self.attrs.allow_packing {
            session.send_packed(req.clone(), self.attrs.path.clone()).await
        } else if session.is_connected_session() {
            session.send_connected(req).await
        } else {
            session.send_unconnected(req, &self.attrs.path).await
        }
    }

    async fn drive_read(&self) -> PlcResult<()> {
        {
            let mut inner = self.inner.lock().await;
            if self.attrs.read_cache_ms > 0
                && let Some(last) = inner.last_read_at
                && now_ms().saturating_sub(last) < self.attrs.read_cache_ms as u64
            {
                if let Some(req) = inner.request.as_mut() {
                    req.mark_complete();
                }
                self.transition(&mut inner, TagState::Idle).await?;
                self.fire(&mut inner, TagEvent::ReadCompleted).await;
                return Ok(());
            }
        }

        let mut offset = 0u32;
        loop {
            let (session, subscripts, name, elem_count, family, seq) = {
                let mut inner = self.inner.lock().await;
                let session = inner.session.clone().ok_or(PlcError::BadConnection)?;
                inner.pccc_seq = next_transaction_seq(&mut inner.pccc_seq);
                (
                    session,
                    Vec::<u32>::new(),
                    self.attrs.name.clone(),
                    self.attrs.elem_count as u16,
                    self.attrs.plc,
                    inner.pccc_seq,
                )
            };

            let result = if family.uses_pccc() {
                let addr = parse_address(&name)?;
                let req = build_pccc_read(&addr, elem_count, seq);
                self.send_request(&session, &req).await
            } else {
                let req = build_read_tag(&name, &subscripts, elem_count, Some(offset))?;
                self.send_request(&session, &req).await
            };

            let (status, body) = match result {
                Ok(v) => v,
                Err(e) => {
                    self.fail(e).await;
                    return Err(e);
                },
            };

            if !status.is_success() && !status.needs_continuation() {
                let err = status.to_error();
                self.fail(err).await;
                return Err(err);
            }

            {
                let mut inner = self.inner.lock().await;
                let payload = if body.len() > 2 { &body[2..] } else { &body[..] };
                if offset == 0 {
                    inner.buffer.replace(payload);
                } else {
                    let mut combined = inner.buffer.as_slice().to_vec();
                    combined.extend_from_slice(payload);
                    inner.buffer.replace(&combined);
                }
            }

            if status.needs_continuation() {
                offset += body.len().saturating_sub(2) as u32;
                continue;
            }

            let mut inner = self.inner.lock().await;
            if let Some(req) = inner.request.as_mut() {
                req.mark_complete();
            }
            inner.last_read_at = Some(now_ms());
            self.transition(&mut inner, TagState::Idle).await?;
            self.fire(&mut inner, TagEvent::ReadCompleted).await;
            return Ok(());
        }
    }

    async fn drive_write(&self) -> PlcResult<()> {
        let (session, name, elem_count, family, seq, value, cip_type, bit_index) = {
            let mut inner = self.inner.lock().await;
            let session = inner.session.clone().ok_or(PlcError::BadConnection)?;
            inner.pccc_seq = next_transaction_seq(&mut inner.pccc_seq);
            (
                session,
                self.attrs.name.clone(),
                self.attrs.elem_count as u16,
                self.attrs.plc,
                inner.pccc_seq,
                inner.buffer.as_slice().to_vec(),
                cip_elementary_type_code(&self.attrs),
                self.attrs.bit_index,
            )
        };

        // A bit tag never goes out as a direct Write Tag: it always routes
        // through Read-Modify-Write so the PLC's other 31/63 bits in the
        // same element are left untouched.
        let result = if let Some(bit) = bit_index {
            let bit_value = value.first().copied().unwrap_or(0) != 0;
            let size = tag_size_bytes(&self.attrs).unwrap_or(4).max(1) as u16;
            match bit_rmw_masks(bit, bit_value, size) {
                Ok((or_mask, and_mask)) => {
                    match build_read_modify_write(&name, &[], size, &or_mask, &and_mask) {
                        Ok(req) => self.send_request(&session, &req).await,
                        Err(e) => Err(e),
                    }
                },
                Err(e) => Err(e),
            }
        } else if family.uses_pccc() {
            let addr = parse_address(&name)?;
            let req = build_pccc_write(&addr, elem_count, seq, &value)?;
            self.send_request(&session, &req).await
        } else {
            let req = build_write_tag(&name, &[], cip_type, elem_count, None, &value)?;
            self.send_request(&session, &req).await
        };

        let (status, _) = match result {
            Ok(v) => v,
            Err(e) => {
                self.fail(e).await;
                return Err(e);
            },
        };

        if !status.is_success() {
            let err = status.to_error();
            self.fail(err).await;
            return Err(err);
        }

        let mut inner = self.inner.lock().await;
        if let Some(req) = inner.request.as_mut() {
            req.mark_complete();
        }
        inner.dirty = false;
        self.transition(&mut inner, TagState::Idle).await?;
        self.fire(&mut inner, TagEvent::WriteCompleted).await;
        Ok(())
    }

    /// Issues a Read-Modify-Write for a single bit tag directly, outside
    /// the normal read/write state machine.
    pub async fn write_bit(&self, bit: u8, value: bool) -> PlcResult<()> {
        let (session, name, size) = {
            let mut inner = self.inner.lock().await;
            let session = inner.session.clone().ok_or(PlcError::BadConnection)?;
            inner.pccc_seq = next_transaction_seq(&mut inner.pccc_seq);
            (session, self.attrs.name.clone(), inner.buffer.len().max(1) as u16)
        };

        let (or_mask, and_mask) = bit_rmw_masks(bit, value, size)?;
        let req = build_read_modify_write(&name, &[], size, &or_mask, &and_mask)?;
        let (status, _) = self.send_request(&session, &req).await?;
        if !status.is_success() {
            return Err(status.to_error());
        }
        Ok(())
    }

    /// Called by the tickler for an idle (or not-yet-created) tag: kicks
    /// off an auto-sync read or write if one is configured and due.
    /// Returns `true` if an operation was started, so the tickler can treat
    /// this tag as busy on its next pass.
    pub async fn maybe_auto_sync(&self) -> bool {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        if !matches!(inner.state, TagState::Idle | TagState::New) {
            return false;
        }

        if self.attrs.auto_sync_write_ms > 0
            && inner.dirty
            && let Some(next) = inner.next_auto_write_at
            && now >= next
        {
            let (new_next, skipped) =
                round_to_next_period(now, next, self.attrs.auto_sync_write_ms as u64);
            if skipped > 0 {
                debug!(tag = %self.attrs.name, skipped, "auto-sync write fell behind, skipping missed periods");
            }
            inner.next_auto_write_at = Some(new_next);
            if self.transition(&mut inner, TagState::Writing).await.is_ok() {
                inner.dirty = false;
                inner.request = Some(Request::new(CorrelationKey(0)));
                inner.last_error = None;
                self.fire(&mut inner, TagEvent::WriteStarted).await;
                return true;
            }
        }

        if self.attrs.auto_sync_read_ms > 0
            && let Some(next) = inner.next_auto_read_at
            && now >= next
        {
            let (new_next, skipped) =
                round_to_next_period(now, next, self.attrs.auto_sync_read_ms as u64);
            if skipped > 0 {
                debug!(tag = %self.attrs.name, skipped, "auto-sync read fell behind, skipping missed periods");
            }
            inner.next_auto_read_at = Some(new_next);
            if inner.state == TagState::New {
                self.transition(&mut inner, TagState::Creating).await.ok();
            }
            if self.transition(&mut inner, TagState::Reading).await.is_ok() {
                inner.request = Some(Request::new(CorrelationKey(0)));
                inner.last_error = None;
                self.fire(&mut inner, TagEvent::ReadStarted).await;
                return true;
            }
        }

        false
    }

    async fn fail(&self, err: PlcError) {
        let mut inner = self.inner.lock().await;
        let was_writing = inner.state == TagState::Writing;
        inner.last_error = Some(err);
        if let Some(req) = inner.request.as_mut() {
            req.mark_failed(err);
        }
        let _ = self.transition(&mut inner, TagState::Idle).await;
        let event = if was_writing { TagEvent::WriteCompleted } else { TagEvent::ReadCompleted };
        self.fire(&mut inner, event).await;
        warn!(tag = %self.attrs.name, error = ?err, "tag operation failed");
    }

    pub async fn with_buffer<R>(&self, f: impl FnOnce(&TagBuffer) -> R) -> R {
        let inner = self.inner.lock().await;
        f(&inner.buffer)
    }

    pub async fn with_buffer_mut<R>(&self, f: impl FnOnce(&mut TagBuffer) -> R) -> R {
        let mut inner = self.inner.lock().await;
        let result = f(&mut inner.buffer);
        if self.attrs.auto_sync_write_ms > 0 {
            inner.dirty = true;
        }
        result
    }

    pub async fn destroy(&self) {
        let mut inner = self.inner.lock().await;
        let _ = self.transition(&mut inner, TagState::Destroying).await;
        inner.state = TagState::Destroyed;
        inner.last_error = Some(PlcError::Abort);
        self.fire(&mut inner, TagEvent::Destroyed).await;
        debug!(tag = %self.attrs.name, "tag destroyed");
    }
}

/// Builds the or/and masks for a Read-Modify-Write that sets (`value`
/// true) or clears (`value` false) bit `bit` within a `size`-byte element,
/// leaving every other bit untouched.
fn bit_rmw_masks(bit: u8, value: bool, size: u16) -> PlcResult<(Vec<u8>, Vec<u8>)> {
    let mut or_mask = vec![0u8; size as usize];
    let mut and_mask = vec![0xFFu8; size as usize];
    let byte_idx = (bit / 8) as usize;
    let bit_idx = bit % 8;
    if byte_idx >= or_mask.len() {
        return Err(PlcError::OutOfBounds);
    }
    if value {
        or_mask[byte_idx] |= 1 << bit_idx;
    } else {
        and_mask[byte_idx] &= !(1 << bit_idx);
    }
    Ok((or_mask, and_mask))
}

fn apply_attribute_overrides(mut policy: ByteOrderPolicy, attrs: &TagAttributes) -> ByteOrderPolicy {
    use crate::primitives::byteorder::Permutation;

    if let Some(s) = &attrs.int16_byte_order {
        if let Ok(p) = Permutation::<2>::parse(s) {
            policy.int16 = p;
        }
    }
    if let Some(s) = &attrs.int32_byte_order {
        if let Ok(p) = Permutation::<4>::parse(s) {
            policy.int32 = p;
        }
    }
    if let Some(s) = &attrs.int64_byte_order {
        if let Ok(p) = Permutation::<8>::parse(s) {
            policy.int64 = p;
        }
    }
    if let Some(s) = &attrs.float32_byte_order {
        if let Ok(p) = Permutation::<4>::parse(s) {
            policy.float32 = p;
        }
    }
    if let Some(s) = &attrs.float64_byte_order {
        if let Ok(p) = Permutation::<8>::parse(s) {
            policy.float64 = p;
        }
    }

    if attrs.overrides_string_framing() {
        if let Some(v) = attrs.str_is_counted {
            policy.string.is_counted = v;
        }
        if let Some(v) = attrs.str_is_fixed_length {
            policy.string.is_fixed_length = v;
        }
        if let Some(v) = attrs.str_is_zero_terminated {
            policy.string.is_zero_terminated = v;
        }
        if let Some(v) = attrs.str_is_byte_swapped {
            policy.string.is_byte_swapped = v;
        }
        if let Some(v) = attrs.str_count_word_bytes {
            policy.string.count_word_bytes = v;
        }
        if let Some(v) = attrs.str_max_capacity {
            policy.string.max_capacity = v;
        }
        if let Some(v) = attrs.str_total_length {
            policy.string.total_length = v;
        }
        if let Some(v) = attrs.str_pad_bytes {
            policy.string.pad_bytes = v;
        }
        if let Some(v) = attrs.str_pad_to_multiple_bytes_experimental {
            policy.string.pad_to_multiple_bytes = v;
        }
    }

    policy
}

fn tag_size_bytes(attrs: &TagAttributes) -> Option<u32> {
    if let Some(explicit) = attrs.elem_size {
        return Some(explicit * attrs.elem_count);
    }
    attrs.elem_type.and_then(|t| t.fixed_size_bytes()).map(|sz| sz * attrs.elem_count)
}

fn cip_elementary_type_code(attrs: &TagAttributes) -> u16 {
    use crate::cfg::enums::ElemType::*;
    match attrs.elem_type {
        Some(Bool) => 0x00C1,
        Some(Sint) => 0x00C2,
        Some(Int) => 0x00C3,
        Some(Dint) => 0x00C4,
        Some(Lint) => 0x00C5,
        Some(Real) => 0x00CA,
        Some(Lreal) => 0x00CB,
        Some(String) => 0x02A0,
        Some(ShortString) => 0x00DA,
        Some(BoolArray) => 0x00D3,
        None => 0x00C4,
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::primitives::byteorder::PlcFamily;

    pub fn dummy_tag() -> Arc<Tag> {
        Tag::new(TagAttributes {
            plc: PlcFamily::ControlLogix,
            gateway: "127.0.0.1".to_string(),
            port: 44818,
            path: vec![1, 0],
            name: "Dummy".to_string(),
            bit_index: None,
            elem_type: Some(crate::cfg::enums::ElemType::Dint),
            elem_count: 1,
            elem_size: None,
            debug: 0,
            read_cache_ms: 0,
            auto_sync_read_ms: 0,
            auto_sync_write_ms: 0,
            use_connected_msg: None,
            allow_packing: false,
            allow_field_resize: false,
            connection_group_id: 0,
            int16_byte_order: None,
            int32_byte_order: None,
            int64_byte_order: None,
            float32_byte_order: None,
            float64_byte_order: None,
            str_is_counted: None,
            str_is_fixed_length: None,
            str_is_zero_terminated: None,
            str_is_byte_swapped: None,
            str_count_word_bytes: None,
            str_max_capacity: None,
            str_total_length: None,
            str_pad_bytes: None,
            str_pad_to_multiple_bytes_experimental: None,
        })
    }
}
