// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A minimal in-process EtherNet/IP gateway used in place of a live PLC or
//! vendor simulator. Speaks just enough of the encapsulation/CIP wire
//! protocol to exercise `PlcTagContext` end to end: `RegisterSession`,
//! Forward Open, Read/Write Tag wrapped in `SendRRData`/Unconnected Send,
//! and Read/Write Tag wrapped in `SendUnitData` over a Forward-Open
//! connection (Class 3 connected messaging).

use std::sync::{
    Arc,
    atomic::{AtomicI32, Ordering},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

const ENCAP_HEADER_LEN: usize = 24;

/// Spawns the mock gateway on an ephemeral port and returns it, already
/// listening. `initial_value` is what the first Read Tag call returns.
pub async fn spawn(initial_value: i32) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind mock gateway");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let value = Arc::new(AtomicI32::new(initial_value));
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let value = Arc::clone(&value);
            tokio::spawn(handle_connection(stream, value));
        }
    });

    (addr, handle)
}

async fn handle_connection(mut stream: TcpStream, value: Arc<AtomicI32>) {
    let mut session_handle = 0u32;
    let mut connection_id = 0u32;
    loop {
        let mut header_buf = [0u8; ENCAP_HEADER_LEN];
        if stream.read_exact(&mut header_buf).await.is_err() {
            return;
        }
        let command = u16::from_le_bytes([header_buf[0], header_buf[1]]);
        let length = u16::from_le_bytes([header_buf[2], header_buf[3]]) as usize;
        let sender_context = u64::from_le_bytes(header_buf[8..16].try_into().unwrap());

        let mut payload = vec![0u8; length];
        if length > 0 && stream.read_exact(&mut payload).await.is_err() {
            return;
        }

        match command {
            0x0065 => {
                // RegisterSession
                session_handle = 0xDEAD_0001;
                let reply_payload = payload.clone();
                let frame = build_reply(0x0065, session_handle, 0, sender_context, &reply_payload);
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            },
            0x006F => {
                // SendRRData, carrying either ForwardOpen or an Unconnected Send.
                let cip = extract_cip(&payload);
                let reply_cip = handle_cip(cip, &value);
                if !cip.is_empty() && matches!(cip[0], 0x54 | 0x5B) {
                    connection_id = 0xAAAA_0001;
                }
                let cpf_reply = wrap_cpf_reply(&reply_cip);
                let frame = build_reply(0x006F, session_handle, 0, sender_context, &cpf_reply);
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            },
            0x0070 => {
                // SendUnitData: a Class 3 connected request over the
                // connection `ForwardOpen` established.
                let (seq, cip) = extract_connected_cip(&payload);
                let reply_cip = handle_cip(cip, &value);
                let cpf_reply = wrap_connected_cpf_reply(connection_id, seq, &reply_cip);
                let frame = build_reply(0x0070, session_handle, 0, sender_context, &cpf_reply);
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            },
            0x0066 => return, // UnregisterSession
            _ => return,
        }
    }
}

fn extract_cip(cpf_payload: &[u8]) -> &[u8] {
    // interface handle(4) + timeout(2) + item count(2)
    let item_count = u16::from_le_bytes(cpf_payload[6..8].try_into().unwrap());
    let mut cursor = 8;
    for _ in 0..item_count {
        let item_type = u16::from_le_bytes(cpf_payload[cursor..cursor + 2].try_into().unwrap());
        let item_len =
            u16::from_le_bytes(cpf_payload[cursor + 2..cursor + 4].try_into().unwrap()) as usize;
        let body = &cpf_payload[cursor + 4..cursor + 4 + item_len];
        if item_type == 0x00B2 {
            return body;
        }
        cursor += 4 + item_len;
    }
    &[]
}

/// Pulls the connection sequence count and CIP request out of a
/// `SendUnitData` payload's connected transport data item (`0x00B1`), the
/// mirror of `Session::send_connected`'s own framing.
fn extract_connected_cip(cpf_payload: &[u8]) -> (u16, &[u8]) {
    let item_count = u16::from_le_bytes(cpf_payload[6..8].try_into().unwrap());
    let mut cursor = 8;
    for _ in 0..item_count {
        let item_type = u16::from_le_bytes(cpf_payload[cursor..cursor + 2].try_into().unwrap());
        let item_len =
            u16::from_le_bytes(cpf_payload[cursor + 2..cursor + 4].try_into().unwrap()) as usize;
        let body = &cpf_payload[cursor + 4..cursor + 4 + item_len];
        if item_type == 0x00B1 && body.len() >= 2 {
            let seq = u16::from_le_bytes(body[0..2].try_into().unwrap());
            return (seq, &body[2..]);
        }
        cursor += 4 + item_len;
    }
    (0, &[])
}

/// Wraps a CIP reply the way `SendUnitData` expects it back: a connected
/// address item carrying the connection id, followed by a connected
/// transport data item carrying the echoed sequence count and the reply.
fn wrap_connected_cpf_reply(connection_id: u32, seq: u16, cip: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 + cip.len());
    data.extend_from_slice(&seq.to_le_bytes());
    data.extend_from_slice(cip);

    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0x00A1u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&connection_id.to_le_bytes());
    out.extend_from_slice(&0x00B1u16.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(&data);
    out
}

fn wrap_cpf_reply(cip: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0x0000u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0x00B2u16.to_le_bytes());
    out.extend_from_slice(&(cip.len() as u16).to_le_bytes());
    out.extend_from_slice(cip);
    out
}

/// Unwraps an `UnconnectedSend` (service `0x52` on the Connection Manager
/// path) to the embedded request, or returns the bytes unchanged if this
/// isn't one (e.g. a bare `ForwardOpen`).
fn unwrap_unconnected_send(cip: &[u8]) -> &[u8] {
    if cip.is_empty() || cip[0] != 0x52 {
        return cip;
    }
    let path_words = cip[1] as usize;
    let mut cursor = 2 + path_words * 2;
    cursor += 2; // priority/tick, timeout ticks
    let inner_len = u16::from_le_bytes(cip[cursor..cursor + 2].try_into().unwrap()) as usize;
    cursor += 2;
    &cip[cursor..cursor + inner_len]
}

fn handle_cip(cip: &[u8], value: &Arc<AtomicI32>) -> Vec<u8> {
    let inner = unwrap_unconnected_send(cip);
    if inner.is_empty() {
        return vec![0x00, 0x00, 0x00, 0x00];
    }
    match inner[0] {
        0x54 | 0x5B => {
            // ForwardOpen: reply with success, connection id, and echo
            // serial/vendor so the session can record a non-zero
            // connection id.
            let mut data = vec![0x00, 0x00];
            data.extend_from_slice(&0xAAAA_0001u32.to_le_bytes());
            data.extend_from_slice(&0xAAAA_0002u32.to_le_bytes());
            build_cip_reply(inner[0] | 0x80, &data)
        },
        0x4C | 0x52 => {
            // Read Tag / Read Tag Fragmented: reply with CIP type DINT and
            // the current value.
            let mut data = vec![0x00, 0x00];
            data.extend_from_slice(&0x00C4u16.to_le_bytes());
            data.extend_from_slice(&value.load(Ordering::SeqCst).to_le_bytes());
            build_cip_reply(inner[0] | 0x80, &data)
        },
        0x4D | 0x53 => {
            // Write Tag: the last 4 bytes of the request are the new value.
            if inner.len() >= 4 {
                let new_value =
                    i32::from_le_bytes(inner[inner.len() - 4..].try_into().unwrap());
                value.store(new_value, Ordering::SeqCst);
            }
            build_cip_reply(inner[0] | 0x80, &[0x00, 0x00])
        },
        other => build_cip_reply(other | 0x80, &[0x08, 0x00]), // SERVICE_NOT_SUPPORTED
    }
}

/// Builds a full CIP reply: `service|0x80 | reserved=0 | general_status |
/// ext_status_size | ...`, where `status_and_data`'s first two bytes are
/// `[general_status, ext_status_size]` and anything after that is
/// service-specific reply data.
fn build_cip_reply(reply_service: u8, status_and_data: &[u8]) -> Vec<u8> {
    let mut out = vec![reply_service, 0x00];
    out.extend_from_slice(status_and_data);
    out
}

fn build_reply(
    command: u16,
    session_handle: u32,
    status: u32,
    sender_context: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENCAP_HEADER_LEN + payload.len());
    out.extend_from_slice(&command.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&session_handle.to_le_bytes());
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&sender_context.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(payload);
    out
}
