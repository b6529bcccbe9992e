// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shares one [`Session`] across every tag that targets the same gateway,
//! route path, and connection group: tags that share a
//! gateway/path/connection_group_id share a session. Keyed by a `DashMap`
//! from connection identity to live handle, the same shape as the
//! session/connection pools elsewhere in this crate, here keyed by the
//! EtherNet/IP triple rather than a connection serial.

use std::sync::Arc;

use anyhow::{Result, bail};
use dashmap::DashMap;

use crate::{cfg::config::RuntimeConfig, session::session::Session};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    gateway: String,
    port: u16,
    path: Vec<u8>,
    connection_group_id: u16,
}

/// Pools live [`Session`]s by gateway identity.
pub struct SessionPool {
    sessions: DashMap<SessionKey, Arc<Session>>,
    max_sessions: u32,
    cfg: RuntimeConfig,
}

impl SessionPool {
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: cfg.max_sessions,
            cfg,
        }
    }

    /// Returns the existing session for this identity, or connects and
    /// registers a new one. `use_connected_msg` decides whether the new
    /// session Forward-Opens a Class 3 connection over `path`; it has no
    /// effect on a session already pooled under this identity.
    pub async fn get_or_connect(
        &self,
        gateway: &str,
        port: u16,
        path: &[u8],
        connection_group_id: u16,
        use_connected_msg: bool,
    ) -> Result<Arc<Session>> {
        let key = SessionKey {
            gateway: gateway.to_string(),
            port,
            path: path.to_vec(),
            connection_group_id,
        };

        if let Some(existing) = self.sessions.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        if self.sessions.len() as u32 >= self.max_sessions {
            bail!("session pool exhausted (max_sessions={})", self.max_sessions);
        }

        let session = Session::connect(gateway, port, self.cfg.clone()).await?;
        if use_connected_msg && !path.is_empty() {
            session.open_forward_connection(path).await?;
        }
        self.sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Shuts down every pooled session, e.g. on library-wide teardown
    /// (`tag_shutdown`).
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.sessions.clear();
        for session in sessions {
            let _ = session.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_starts_empty() {
        let pool = SessionPool::new(RuntimeConfig::default());
        assert!(pool.is_empty());
    }
}
