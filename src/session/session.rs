// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A single EtherNet/IP session over one TCP connection: split read/write
//! halves behind their own mutexes, a `DashMap` correlating outbound
//! requests to inbound replies, and a background read loop that
//! demultiplexes frames as they arrive by sender context, with a
//! Forward-Open step folded into session startup for connected (Class 3)
//! tag access.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow, bail};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use rand::Rng;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex, mpsc},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::RuntimeConfig,
    error::{PlcError, PlcResult},
    request::next_sender_context,
    session::{
        cip::{
            CipRequest, CipStatus, ForwardOpenParams, build_forward_open,
            build_multiple_service_packet, build_unconnected_send,
            parse_multiple_service_packet_reply,
        },
        codec::{
            ENCAP_HEADER_LEN, EncapCommand, EncapFrameBuilder, EncapHeader, split_frame,
        },
    },
};

/// Caps how many queued tag requests one Multiple Service Packet batches
/// together, independent of how many a caller happens to queue at once.
const MAX_PACKED_REQUESTS: usize = 8;

/// A tag-level request queued for packing into the next Multiple Service
/// Packet this session sends.
struct QueuedPackRequest {
    req: CipRequest,
    route_path: Vec<u8>,
    responder: mpsc::Sender<PlcResult<(CipStatus, Bytes)>>,
}

/// Where a [`Session`] sits in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registering,
    OpeningConnection,
    Ready,
    Broken,
    Terminating,
}

struct RawReply {
    header: EncapHeader,
    payload: Bytes,
}

/// One TCP connection to a gateway, registered with EtherNet/IP and
/// optionally Forward-Opened for connected tag traffic.
pub struct Session {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    cfg: RuntimeConfig,

    session_handle: std::sync::atomic::AtomicU32,
    o_to_t_connection_id: std::sync::atomic::AtomicU32,
    connection_serial: std::sync::atomic::AtomicU16,
    connected_seq: std::sync::atomic::AtomicU16,

    pending: DashMap<u64, mpsc::Sender<RawReply>>,
    state: Mutex<SessionState>,
    pack_queue: Mutex<Vec<QueuedPackRequest>>,

    cancel: CancellationToken,
}

impl Session {
    pub async fn connect(gateway: &str, port: u16, cfg: RuntimeConfig) -> Result<Arc<Self>> {
        let stream = TcpStream::connect((gateway, port)).await?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();

        let session = Arc::new(Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            cfg,
            session_handle: std::sync::atomic::AtomicU32::new(0),
            o_to_t_connection_id: std::sync::atomic::AtomicU32::new(0),
            // Randomized so two sessions racing a reconnect against the same
            // gateway don't hand it the same Connection Serial Number.
            connection_serial: std::sync::atomic::AtomicU16::new(rand::rng().random::<u16>().max(1)),
            connected_seq: std::sync::atomic::AtomicU16::new(0),
            pending: DashMap::new(),
            state: Mutex::new(SessionState::Connecting),
            pack_queue: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        let reader = Arc::clone(&session);
        tokio::spawn(async move {
            if let Err(e) = reader.read_loop().await {
                warn!("session read loop exited: {e}");
            }
        });

        session.register_session().await?;
        Ok(session)
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    async fn set_state(&self, s: SessionState) {
        *self.state.lock().await = s;
    }

    pub fn is_connected_session(&self) -> bool {
        self.o_to_t_connection_id.load(std::sync::atomic::Ordering::Relaxed) != 0
    }

    async fn write_frame(&self, command: EncapCommand, ctx: u64, payload: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("session cancelled");
        }
        let frame = EncapFrameBuilder::new(command)
            .session_handle(self.session_handle.load(std::sync::atomic::Ordering::Relaxed))
            .sender_context(ctx)
            .finish(payload)?;

        let mut w = self.writer.lock().await;
        w.write_all(&frame).await?;
        Ok(())
    }

    async fn request_reply(
        &self,
        command: EncapCommand,
        payload: &[u8],
    ) -> Result<(EncapHeader, Bytes)> {
        let ctx = next_sender_context() as u64;
        let (tx, mut rx) = mpsc::channel(1);
        self.pending.insert(ctx, tx);

        if let Err(e) = self.write_frame(command, ctx, payload).await {
            self.pending.remove(&ctx);
            return Err(e);
        }

        let reply = select! {
            _ = self.cancel.cancelled() => {
                self.pending.remove(&ctx);
                bail!("session cancelled while awaiting reply");
            }
            _ = sleep(self.cfg.socket_timeout) => {
                self.pending.remove(&ctx);
                bail!("timed out awaiting reply for command {command:?}");
            }
            msg = rx.recv() => {
                msg.ok_or_else(|| anyhow!("session closed before reply arrived"))?
            }
        };

        Ok((reply.header, reply.payload))
    }

    async fn register_session(&self) -> Result<()> {
        self.set_state(SessionState::Registering).await;
        // protocol version 1, options 0 (RegisterSession body)
        let payload = [0x01u8, 0x00, 0x00, 0x00];
        let (header, _) = self.request_reply(EncapCommand::RegisterSession, &payload).await?;
        if !header.is_success() {
            self.set_state(SessionState::Broken).await;
            bail!("RegisterSession failed, status={}", header.status_code());
        }
        self.session_handle
            .store(header.session_handle.get(), std::sync::atomic::Ordering::Relaxed);
        self.set_state(SessionState::Ready).await;
        Ok(())
    }

    /// Opens a Class 3 connected session for tag access over this gateway
    /// connection.
    pub async fn open_forward_connection(&self, connection_path: &[u8]) -> Result<()> {
        self.set_state(SessionState::OpeningConnection).await;

        let serial = self
            .connection_serial
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let req = build_forward_open(&ForwardOpenParams {
            connection_serial: serial,
            vendor_id: 0xFFFF,
            originator_serial: 0x1234_5678,
            connection_timeout_multiplier: 0x03,
            o_to_t_rpi_us: 1_000_000,
            t_to_o_rpi_us: 1_000_000,
            o_to_t_size: 508,
            t_to_o_size: 508,
            connection_path: connection_path.to_vec(),
            use_large_format: true,
        });

        let cpf = wrap_unconnected_cpf(&req.to_bytes());
        let (header, payload) = self.request_reply(EncapCommand::SendRrData, &cpf).await?;
        if !header.is_success() {
            self.set_state(SessionState::Broken).await;
            bail!("SendRrData (ForwardOpen) failed, status={}", header.status_code());
        }

        let status = extract_cip_status(&payload)?;
        if !status.is_success() {
            self.set_state(SessionState::Broken).await;
            bail!("ForwardOpen rejected: {:?}", status.to_error());
        }

        // Forward Open's service-specific reply data starts with the O->T
        // connection ID, followed by the T->O connection ID.
        let data = extract_cip_reply_data(&payload)?;
        if data.len() >= 4 {
            let conn_id = u32::from_le_bytes(data[0..4].try_into().unwrap_or([0; 4]));
            self.o_to_t_connection_id
                .store(conn_id, std::sync::atomic::Ordering::Relaxed);
        }

        self.set_state(SessionState::Ready).await;
        Ok(())
    }

    /// Sends a tag-level CIP request as an Unconnected Send (UCMM
    /// `SendRRData`) routed over `route_path` (the tag's `path=` attribute),
    /// and returns the raw reply payload plus CIP status.
    pub async fn send_unconnected(
        &self,
        req: &CipRequest,
        route_path: &[u8],
    ) -> PlcResult<(CipStatus, Bytes)> {
        let wrapped = build_unconnected_send(req, route_path, 0x05);
        let cpf = wrap_unconnected_cpf(&wrapped.to_bytes());
        let (header, payload) = self
            .request_reply(EncapCommand::SendRrData, &cpf)
            .await
            .map_err(|_| PlcError::Timeout)?;
        if !header.is_success() {
            return Err(PlcError::BadReply);
        }
        let status = extract_cip_status(&payload).map_err(|_| PlcError::BadData)?;
        let body = extract_cip_reply_data(&payload).unwrap_or_default();
        Ok((status, body))
    }

    /// Sends a tag-level CIP request over this session's Forward-Open
    /// (Class 3) connection via `SendUnitData`, stamping the connection
    /// sequence count Forward Open's O->T connection ID expects ahead of
    /// the CIP request.
    pub async fn send_connected(&self, req: &CipRequest) -> PlcResult<(CipStatus, Bytes)> {
        let conn_id = self.o_to_t_connection_id.load(std::sync::atomic::Ordering::Relaxed);
        if conn_id == 0 {
            return Err(PlcError::BadConnection);
        }
        let seq = self
            .connected_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            .wrapping_add(1);

        let mut data = Vec::new();
        data.extend_from_slice(&seq.to_le_bytes());
        data.extend_from_slice(&req.to_bytes());

        let cpf = wrap_connected_cpf(conn_id, &data);
        let (header, payload) = self
            .request_reply(EncapCommand::SendUnitData, &cpf)
            .await
            .map_err(|_| PlcError::Timeout)?;
        if !header.is_success() {
            return Err(PlcError::BadReply);
        }

        let item = locate_connected_data_item(&payload).map_err(|_| PlcError::BadData)?;
        if item.len() < 2 {
            return Err(PlcError::BadData);
        }
        let (status, body) = parse_cip_reply(&item[2..])?;
        Ok((status, Bytes::copy_from_slice(body)))
    }

    /// Queues a tag-level request to go out packed inside the next Multiple
    /// Service Packet (`allow_packing`). The first caller to find an empty
    /// queue becomes the batch leader: it waits out `cfg.pack_window` so
    /// concurrently-ticking tags can join, then drains and sends the batch
    /// for everyone, including itself.
    pub async fn send_packed(&self, req: CipRequest, route_path: Vec<u8>) -> PlcResult<(CipStatus, Bytes)> {
        let (tx, mut rx) = mpsc::channel(1);
        let is_leader = {
            let mut queue = self.pack_queue.lock().await;
            queue.push(QueuedPackRequest { req, route_path, responder: tx });
            queue.len() == 1
        };

        if is_leader {
            sleep(self.cfg.pack_window).await;
            let batch = {
                let mut queue = self.pack_queue.lock().await;
                let n = queue.len().min(MAX_PACKED_REQUESTS);
                queue.drain(..n).collect::<Vec<_>>()
            };
            self.flush_packed_batch(batch).await;
        }

        rx.recv().await.unwrap_or(Err(PlcError::BadConnection))
    }

    async fn flush_packed_batch(&self, batch: Vec<QueuedPackRequest>) {
        if batch.is_empty() {
            return;
        }
        if batch.len() == 1 {
            let QueuedPackRequest { req, route_path, responder } =
                batch.into_iter().next().expect("checked len == 1");
            let result = self.send_unconnected(&req, &route_path).await;
            let _ = responder.send(result).await;
            return;
        }

        let route_path = batch[0].route_path.clone();
        let requests: Vec<CipRequest> = batch.iter().map(|q| q.req.clone()).collect();
        let packed = match build_multiple_service_packet(&requests) {
            Ok(p) => p,
            Err(e) => {
                for q in batch {
                    let _ = q.responder.send(Err(e)).await;
                }
                return;
            },
        };

        match self.send_unconnected(&packed, &route_path).await {
            Ok((status, body)) if status.is_success() => match parse_multiple_service_packet_reply(&body) {
                Ok(replies) if replies.len() == batch.len() => {
                    for (q, (status, data)) in batch.into_iter().zip(replies.into_iter()) {
                        let _ = q.responder.send(Ok((status, Bytes::from(data)))).await;
                    }
                },
                _ => {
                    for q in batch {
                        let _ = q.responder.send(Err(PlcError::BadReply)).await;
                    }
                },
            },
            Ok((status, _)) => {
                let err = status.to_error();
                for q in batch {
                    let _ = q.responder.send(Err(err)).await;
                }
            },
            Err(e) => {
                for q in batch {
                    let _ = q.responder.send(Err(e)).await;
                }
            },
        }
    }

    async fn read_loop(self: Arc<Self>) -> Result<()> {
        let mut scratch = BytesMut::with_capacity(4096);

        loop {
            if self.cancel.is_cancelled() {
                bail!("cancelled");
            }

            scratch.clear();
            scratch.resize(ENCAP_HEADER_LEN, 0);
            {
                let mut r = self.reader.lock().await;
                r.read_exact(&mut scratch[..ENCAP_HEADER_LEN]).await?;
            }

            let header = EncapHeader::from_bytes(&scratch[..ENCAP_HEADER_LEN])
                .map_err(|_| anyhow!("malformed encapsulation header"))?;
            let payload_len = header.length.get() as usize;

            if payload_len > 0 {
                let old = scratch.len();
                scratch.resize(old + payload_len, 0);
                let mut r = self.reader.lock().await;
                r.read_exact(&mut scratch[old..old + payload_len]).await?;
            }

            let payload = scratch.split_off(ENCAP_HEADER_LEN).freeze();
            let ctx = header.sender_context.get();

            if let Some((_, tx)) = self.pending.remove(&ctx) {
                let _ = tx.send(RawReply { header, payload }).await;
            } else {
                debug!("dropping unsolicited encap frame, ctx={ctx}");
            }
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.set_state(SessionState::Terminating).await;
        let payload = [];
        let _ = self.write_frame(EncapCommand::UnregisterSession, 0, &payload).await;
        self.cancel.cancel();
        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await;
        Ok(())
    }

    pub fn cancel_now(&self) {
        self.cancel.cancel();
    }
}

/// Wraps a CIP message in the minimal Common Packet Format item list
/// `SendRRData` expects: a null address item followed by an unconnected
/// data item carrying the CIP request.
fn wrap_unconnected_cpf(cip: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + cip.len());
    out.extend_from_slice(&0u32.to_le_bytes()); // interface handle
    out.extend_from_slice(&(Duration::from_secs(5).as_secs() as u16).to_le_bytes()); // timeout
    out.extend_from_slice(&2u16.to_le_bytes()); // item count
    out.extend_from_slice(&0x0000u16.to_le_bytes()); // null address item type
    out.extend_from_slice(&0u16.to_le_bytes()); // null address item length
    out.extend_from_slice(&0x00B2u16.to_le_bytes()); // unconnected data item type
    out.extend_from_slice(&(cip.len() as u16).to_le_bytes());
    out.extend_from_slice(cip);
    out
}

/// Wraps a connection-sequenced CIP message in the Common Packet Format
/// item list `SendUnitData` expects: a connected address item carrying the
/// O->T connection ID, followed by a connected transport data item.
fn wrap_connected_cpf(connection_id: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + data.len());
    out.extend_from_slice(&0u32.to_le_bytes()); // interface handle
    out.extend_from_slice(&0u16.to_le_bytes()); // timeout, unused for connected messages
    out.extend_from_slice(&2u16.to_le_bytes()); // item count
    out.extend_from_slice(&0x00A1u16.to_le_bytes()); // connected address item type
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&connection_id.to_le_bytes());
    out.extend_from_slice(&0x00B1u16.to_le_bytes()); // connected transport data item type
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn locate_connected_data_item(cpf_payload: &[u8]) -> PlcResult<&[u8]> {
    locate_item(cpf_payload, 0x00B1)
}

/// A CIP reply's service-generic prefix: `service | reserved | status |
/// ext_status_size | ext_status_words...`, followed by any service-specific
/// data.
fn parse_cip_reply(item: &[u8]) -> PlcResult<(CipStatus, &[u8])> {
    if item.len() < 4 {
        return Err(PlcError::BadData);
    }
    let general_status = item[2];
    let ext_word_count = item[3] as usize;
    let ext_bytes = ext_word_count * 2;
    let data_start = 4 + ext_bytes;
    if item.len() < data_start {
        return Err(PlcError::Partial);
    }
    let extended = item[4..data_start].to_vec();
    Ok((CipStatus { general_status, extended }, &item[data_start..]))
}

fn extract_cip_reply_data(cpf_payload: &[u8]) -> PlcResult<Bytes> {
    let item = locate_data_item(cpf_payload)?;
    let (_, data) = parse_cip_reply(item)?;
    Ok(Bytes::copy_from_slice(data))
}

fn extract_cip_status(cpf_payload: &[u8]) -> PlcResult<CipStatus> {
    let item = locate_data_item(cpf_payload)?;
    let (status, _) = parse_cip_reply(item)?;
    Ok(status)
}

fn locate_data_item(cpf_payload: &[u8]) -> PlcResult<&[u8]> {
    locate_item(cpf_payload, 0x00B2)
}

/// Scans a Common Packet Format item list for the first item of `want_type`
/// and returns its body.
fn locate_item(cpf_payload: &[u8], want_type: u16) -> PlcResult<&[u8]> {
    if cpf_payload.len() < 8 {
        return Err(PlcError::BadData);
    }
    // interface handle(4) + timeout(2) + item count(2), per the Common
    // Packet Format header.
    let item_count = u16::from_le_bytes(cpf_payload[6..8].try_into().unwrap_or([0; 2]));
    let mut cursor = 8;
    for _ in 0..item_count {
        if cpf_payload.len() < cursor + 4 {
            return Err(PlcError::BadData);
        }
        let item_type = u16::from_le_bytes(cpf_payload[cursor..cursor + 2].try_into().unwrap());
        let item_len =
            u16::from_le_bytes(cpf_payload[cursor + 2..cursor + 4].try_into().unwrap()) as usize;
        let body_start = cursor + 4;
        let body_end = body_start + item_len;
        if cpf_payload.len() < body_end {
            return Err(PlcError::Partial);
        }
        if item_type == want_type {
            return Ok(&cpf_payload[body_start..body_end]);
        }
        cursor = body_end;
    }
    Err(PlcError::BadData)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpf_wrapper_carries_payload_length() {
        let wrapped = wrap_unconnected_cpf(&[1, 2, 3, 4]);
        let count = u16::from_le_bytes(wrapped[6..8].try_into().unwrap());
        assert_eq!(count, 2);
    }

    #[test]
    fn locate_data_item_finds_unconnected_item() {
        let cip = [0xCCu8, 0x00, 0x01, 0x02];
        let wrapped = wrap_unconnected_cpf(&cip);
        let item = locate_data_item(&wrapped).unwrap();
        assert_eq!(item, &cip);
    }

    #[test]
    fn status_extraction_reads_general_status_byte() {
        let cip = [0xCCu8, 0x00, 0x06, 0x00];
        let wrapped = wrap_unconnected_cpf(&cip);
        let status = extract_cip_status(&wrapped).unwrap();
        assert_eq!(status.general_status, 0x06);
        assert!(status.needs_continuation());
    }

    #[test]
    fn connected_cpf_wrapper_carries_connection_id_and_payload() {
        let wrapped = wrap_connected_cpf(0xAABB_CCDD, &[0x01, 0x00, 0xCC, 0x00, 0x00, 0x00]);
        let item = locate_connected_data_item(&wrapped).unwrap();
        assert_eq!(item, &[0x01, 0x00, 0xCC, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn split_frame_helper_round_trips() {
        let built = EncapFrameBuilder::new(EncapCommand::NopCmd).finish(&[]).unwrap();
        let (header, _) = split_frame(&built).unwrap();
        assert_eq!(header.command.get(), EncapCommand::NopCmd.code());
    }
}
