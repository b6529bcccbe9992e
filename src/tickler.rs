// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The tickler: a single cooperative scheduler that drives every live
//! tag's state machine forward. `libplctag` runs this on a dedicated OS
//! thread; this crate maps it onto a single long-lived async task
//! instead, keeping the same single-scheduler invariant but expressed
//! with `tokio::spawn` and a `CancellationToken` rather than a pthread
//! and a condvar.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{cfg::config::RuntimeConfig, registry::TagRegistry};

/// Handle to the running tickler task. Dropping this does not stop the
/// task; call [`Tickler::shutdown`] for a clean stop.
pub struct Tickler {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Tickler {
    /// Spawns the tickler loop. Polls at `cfg.tickler_poll_interval`,
    /// dropping to `cfg.tickler_poll_floor` when any tag is actively
    /// mid-operation, grounded in `libplctag`'s
    /// `TAG_TICKLER_TIMEOUT_MS`/`TAG_TICKLER_TIMEOUT_MIN_MS`.
    pub fn spawn(registry: Arc<TagRegistry>, cfg: RuntimeConfig) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            debug!("tickler started");
            loop {
                if task_cancel.is_cancelled() {
                    break;
                }

                let busy = tick_once(&registry).await;

                let interval = if busy {
                    cfg.tickler_poll_floor
                } else {
                    cfg.tickler_poll_interval
                };

                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {},
                }
            }
            debug!("tickler stopped");
        });

        Self { cancel, handle }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Drives every currently-registered tag forward one step. Returns `true`
/// if at least one tag was mid-operation (or was just kicked into motion by
/// an auto-sync deadline), so the caller can shorten its next sleep.
async fn tick_once(registry: &TagRegistry) -> bool {
    let mut busy = false;
    for id in registry.iterate_snapshot() {
        let Some(tag) = registry.lookup(id) else {
            continue;
        };

        let mut state = tag.state().await;
        if !state.is_busy() {
            if !tag.maybe_auto_sync().await {
                continue;
            }
            state = tag.state().await;
        }
        busy = true;

        trace!(tag_id = id, ?state, "tickling tag");
        if let Err(e) = tag.drive().await
            && !e.is_pending()
        {
            warn!(tag_id = id, error = ?e, "tag drive step failed");
        }
    }
    busy
}
