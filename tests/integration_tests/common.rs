// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use plc_tag_rs::cfg::config::RuntimeConfig;

/// A [`RuntimeConfig`] tuned for the in-process mock gateway: short socket
/// timeouts and a fast tickler, since nothing here waits on real network
/// latency.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        socket_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(30),
        tickler_poll_interval: Duration::from_millis(20),
        tickler_poll_floor: Duration::from_millis(5),
        max_tags: 64,
        max_sessions: 16,
        pack_window: Duration::from_millis(2),
    }
}

/// Builds a tag attribute string against the mock gateway's address.
/// `use_connected_msg=0` keeps these tags on the Unconnected Send path the
/// mock gateway exercises directly; [`attr_string_connected`] is the
/// Forward-Open-backed counterpart.
pub fn attr_string(addr: std::net::SocketAddr, name: &str) -> String {
    format!(
        "protocol=ab_eip&gateway={addr}&path=1,0&plc=LGX&elem_type=DINT&elem_count=1&name={name}&use_connected_msg=0"
    )
}

/// As [`attr_string`], but leaves `use_connected_msg` at its ControlLogix
/// default (connected), exercising the Forward-Open + `SendUnitData` path.
pub fn attr_string_connected(addr: std::net::SocketAddr, name: &str) -> String {
    format!(
        "protocol=ab_eip&gateway={addr}&path=1,0&plc=LGX&elem_type=DINT&elem_count=1&name={name}"
    )
}
