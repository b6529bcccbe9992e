// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Tag event delivery: the callback-facing event kinds and the
//! pending-flag bitset the tickler sets to avoid re-delivering the same
//! event twice while a callback is still being invoked.

use bitflags::bitflags;

/// Events delivered to a tag's registered callback. Mirrors
/// `libplctag`'s `PLCTAG_EVENT_*` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagEvent {
    Created,
    ReadStarted,
    ReadCompleted,
    WriteStarted,
    WriteCompleted,
    Aborted,
    Destroyed,
}

bitflags! {
    /// Tracks which events are queued for delivery so the tickler never
    /// double-fires a callback for the same occurrence.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PendingEvents: u8 {
        const CREATED         = 0b0100_0000;
        const READ_STARTED    = 0b0000_0001;
        const READ_COMPLETED  = 0b0000_0010;
        const WRITE_STARTED   = 0b0000_0100;
        const WRITE_COMPLETED = 0b0000_1000;
        const ABORTED         = 0b0001_0000;
        const DESTROYED       = 0b0010_0000;
    }
}

impl PendingEvents {
    pub fn mark(&mut self, event: TagEvent) {
        self.insert(Self::from_event(event));
    }

    pub fn take_all(&mut self) -> Vec<TagEvent> {
        let mut out = Vec::new();
        for (flag, event) in Self::ALL_PAIRS {
            if self.contains(flag) {
                out.push(event);
            }
        }
        self.clear();
        out
    }

    const ALL_PAIRS: [(Self, TagEvent); 7] = [
        (Self::CREATED, TagEvent::Created),
        (Self::READ_STARTED, TagEvent::ReadStarted),
        (Self::READ_COMPLETED, TagEvent::ReadCompleted),
        (Self::WRITE_STARTED, TagEvent::WriteStarted),
        (Self::WRITE_COMPLETED, TagEvent::WriteCompleted),
        (Self::ABORTED, TagEvent::Aborted),
        (Self::DESTROYED, TagEvent::Destroyed),
    ];

    fn from_event(event: TagEvent) -> Self {
        match event {
            TagEvent::Created => Self::CREATED,
            TagEvent::ReadStarted => Self::READ_STARTED,
            TagEvent::ReadCompleted => Self::READ_COMPLETED,
            TagEvent::WriteStarted => Self::WRITE_STARTED,
            TagEvent::WriteCompleted => Self::WRITE_COMPLETED,
            TagEvent::Aborted => Self::ABORTED,
            TagEvent::Destroyed => Self::DESTROYED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_twice_delivers_once() {
        let mut pending = PendingEvents::empty();
        pending.mark(TagEvent::ReadCompleted);
        pending.mark(TagEvent::ReadCompleted);
        let drained = pending.take_all();
        assert_eq!(drained, vec![TagEvent::ReadCompleted]);
        assert!(pending.is_empty());
    }

    #[test]
    fn created_is_delivered_ahead_of_later_events() {
        let mut pending = PendingEvents::empty();
        pending.mark(TagEvent::Created);
        pending.mark(TagEvent::ReadStarted);
        assert_eq!(pending.take_all(), vec![TagEvent::Created, TagEvent::ReadStarted]);
    }

    #[test]
    fn multiple_distinct_events_all_delivered_in_order() {
        let mut pending = PendingEvents::empty();
        pending.mark(TagEvent::WriteStarted);
        pending.mark(TagEvent::WriteCompleted);
        assert_eq!(
            pending.take_all(),
            vec![TagEvent::WriteStarted, TagEvent::WriteCompleted]
        );
    }
}
