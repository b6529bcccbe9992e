// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Runtime tunables that live outside the wire protocol: socket timeouts,
//! the tickler's polling interval, and session limits. None of this
//! travels over the wire — it configures *this* process's side of the
//! conversation.

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuntimeConfig {
    /// Socket connect/read/write timeout.
    #[serde(with = "serde_millis", default = "default_socket_timeout")]
    pub socket_timeout: Duration,

    /// How long a session waits without traffic before sending a keep-alive
    /// probe.
    #[serde(with = "serde_millis", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// Tickler poll ceiling (`TAG_TICKLER_TIMEOUT_MS`).
    #[serde(with = "serde_millis", default = "default_tickler_poll")]
    pub tickler_poll_interval: Duration,

    /// Tickler poll floor (`TAG_TICKLER_TIMEOUT_MIN_MS`).
    #[serde(with = "serde_millis", default = "default_tickler_floor")]
    pub tickler_poll_floor: Duration,

    /// Upper bound on concurrently tracked tags.
    #[serde(default = "default_max_tags")]
    pub max_tags: u32,

    /// Upper bound on concurrently open sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,

    /// How long a session's packing leader waits for other tags to queue
    /// into the same Multiple Service Packet before sending it
    /// (`allow_packing`).
    #[serde(with = "serde_millis", default = "default_pack_window")]
    pub pack_window: Duration,
}

const fn default_socket_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_idle_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_tickler_poll() -> Duration {
    Duration::from_millis(100)
}

const fn default_tickler_floor() -> Duration {
    Duration::from_millis(10)
}

const fn default_max_tags() -> u32 {
    4096
}

const fn default_max_sessions() -> u32 {
    256
}

const fn default_pack_window() -> Duration {
    Duration::from_millis(10)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket_timeout: default_socket_timeout(),
            idle_timeout: default_idle_timeout(),
            tickler_poll_interval: default_tickler_poll(),
            tickler_poll_floor: default_tickler_floor(),
            max_tags: default_max_tags(),
            max_sessions: default_max_sessions(),
            pack_window: default_pack_window(),
        }
    }
}

impl RuntimeConfig {
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: RuntimeConfig =
            serde_yaml::from_str(&s).context("failed to parse runtime config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_tags >= 1, "max_tags must be >= 1");
        ensure!(self.max_sessions >= 1, "max_sessions must be >= 1");
        ensure!(
            self.tickler_poll_floor <= self.tickler_poll_interval,
            "tickler_poll_floor must be <= tickler_poll_interval"
        );
        Ok(())
    }
}

mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
