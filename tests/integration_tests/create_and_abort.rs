// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use plc_tag_rs::{PlcError, api::PlcTagContext};

use crate::integration_tests::{
    common::{attr_string, fast_config},
    mock_gateway,
};

#[tokio::test]
async fn create_ex_blocks_until_first_read_completes() {
    let (addr, _gateway) = mock_gateway::spawn(7).await;
    let ctx = PlcTagContext::with_config(fast_config());

    let id = ctx
        .create_ex(&attr_string(addr, "Counter"), Some(Duration::from_secs(2)))
        .await
        .expect("create_ex drives the first read to completion");

    let value = ctx
        .with_buffer(id, |buf| buf.get_i32(0))
        .await
        .expect("tag still registered")
        .expect("DINT-sized buffer holds an i32");
    assert_eq!(value, 7);

    ctx.shutdown().await;
}

#[tokio::test]
async fn destroy_removes_tag_from_registry() {
    let (addr, _gateway) = mock_gateway::spawn(1).await;
    let ctx = PlcTagContext::with_config(fast_config());

    let id = ctx.create(&attr_string(addr, "Counter")).await.expect("create");
    ctx.destroy(id).await.expect("destroy");

    assert_eq!(ctx.status(id).await.unwrap_err(), PlcError::NotFound);
    ctx.shutdown().await;
}

#[tokio::test]
async fn abort_on_idle_tag_is_a_harmless_no_op() {
    let (addr, _gateway) = mock_gateway::spawn(1).await;
    let ctx = PlcTagContext::with_config(fast_config());

    let id = ctx
        .create_ex(&attr_string(addr, "Counter"), Some(Duration::from_secs(2)))
        .await
        .expect("create_ex");

    // Nothing in flight; abort() is defined to succeed unconditionally and
    // just fires `TagEvent::Aborted`, rather than treat "no op in flight" as
    // an error.
    ctx.abort(id).await.expect("abort on an idle tag is not an error");
    assert!(ctx.status(id).await.is_ok());

    ctx.shutdown().await;
}
