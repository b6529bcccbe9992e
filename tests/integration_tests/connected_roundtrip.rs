// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use plc_tag_rs::api::PlcTagContext;

use crate::integration_tests::{
    common::{attr_string_connected, fast_config},
    mock_gateway,
};

/// Exercises the Forward-Open + `SendUnitData` path a `ControlLogix` tag
/// takes by default (no `use_connected_msg` override), rather than the
/// Unconnected Send path [`read_write_roundtrip`](super::read_write_roundtrip)
/// pins down explicitly.
#[tokio::test]
async fn read_write_over_a_forward_open_connection() {
    let (addr, _gateway) = mock_gateway::spawn(7).await;
    let ctx = PlcTagContext::with_config(fast_config());

    let id = ctx
        .create(&attr_string_connected(addr, "Counter"))
        .await
        .expect("create tag against mock gateway");

    ctx.read_blocking(id, Duration::from_secs(2))
        .await
        .expect("connected read completes");

    let value = ctx
        .with_buffer(id, |buf| buf.get_i32(0))
        .await
        .expect("tag still registered")
        .expect("DINT-sized buffer holds an i32");
    assert_eq!(value, 7);

    ctx.with_buffer_mut(id, |buf| buf.set_i32(0, 99))
        .await
        .expect("tag still registered")
        .expect("write fits in a DINT-sized buffer");

    ctx.write_blocking(id, Duration::from_secs(2))
        .await
        .expect("connected write completes");

    ctx.with_buffer_mut(id, |buf| buf.set_i32(0, 0))
        .await
        .expect("tag still registered")
        .expect("clearing the local buffer");

    ctx.read_blocking(id, Duration::from_secs(2))
        .await
        .expect("connected read-back completes");

    let value = ctx
        .with_buffer(id, |buf| buf.get_i32(0))
        .await
        .expect("tag still registered")
        .expect("DINT-sized buffer holds an i32");
    assert_eq!(value, 99);

    ctx.shutdown().await;
}
