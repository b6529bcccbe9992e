// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use plc_tag_rs::api::PlcTagContext;

use crate::integration_tests::{
    common::{attr_string, fast_config},
    mock_gateway,
};

#[tokio::test]
async fn read_reflects_gateway_value() {
    let (addr, _gateway) = mock_gateway::spawn(42).await;
    let ctx = PlcTagContext::with_config(fast_config());

    let id = ctx
        .create(&attr_string(addr, "Counter"))
        .await
        .expect("create tag against mock gateway");

    ctx.read_blocking(id, Duration::from_secs(2))
        .await
        .expect("read completes");

    let value = ctx
        .with_buffer(id, |buf| buf.get_i32(0))
        .await
        .expect("tag still registered")
        .expect("DINT-sized buffer holds an i32");
    assert_eq!(value, 42);

    ctx.shutdown().await;
}

#[tokio::test]
async fn write_then_read_back_sees_new_value() {
    let (addr, _gateway) = mock_gateway::spawn(0).await;
    let ctx = PlcTagContext::with_config(fast_config());

    let id = ctx
        .create(&attr_string(addr, "Counter"))
        .await
        .expect("create tag against mock gateway");

    ctx.read_blocking(id, Duration::from_secs(2))
        .await
        .expect("initial read completes");

    ctx.with_buffer_mut(id, |buf| buf.set_i32(0, 1234))
        .await
        .expect("tag still registered")
        .expect("write fits in a DINT-sized buffer");

    ctx.write_blocking(id, Duration::from_secs(2))
        .await
        .expect("write completes");

    ctx.with_buffer_mut(id, |buf| buf.set_i32(0, 0))
        .await
        .expect("tag still registered")
        .expect("clearing the local buffer");

    ctx.read_blocking(id, Duration::from_secs(2))
        .await
        .expect("read-back completes");

    let value = ctx
        .with_buffer(id, |buf| buf.get_i32(0))
        .await
        .expect("tag still registered")
        .expect("DINT-sized buffer holds an i32");
    assert_eq!(value, 1234);

    ctx.shutdown().await;
}
