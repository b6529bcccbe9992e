// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CIP (Common Industrial Protocol) request/response construction:
//! symbolic tag path encoding and the handful of services this crate
//! speaks — Read/Write Tag, their fragmented forms, Read-Modify-Write,
//! Multiple Service Packet, and the Connection Manager's Forward
//! Open/Close/Unconnected Send.

use crate::error::{PlcError, PlcResult};

/// CIP service codes this crate uses, scoped to their owning object class.
/// Two entries share a numeric value because CIP service codes
/// are unique only within an object class, not globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipService {
    ReadTag,
    ReadTagFragmented,
    WriteTag,
    WriteTagFragmented,
    ReadModifyWrite,
    MultipleServicePacket,
    ForwardOpen,
    ForwardOpenExtended,
    ForwardClose,
    UnconnectedSend,
    ExecutePccc,
}

impl CipService {
    pub fn code(self) -> u8 {
        match self {
            CipService::ReadTag => 0x4C,
            CipService::ReadTagFragmented => 0x52,
            CipService::WriteTag => 0x4D,
            CipService::WriteTagFragmented => 0x53,
            CipService::ReadModifyWrite => 0x4E,
            CipService::MultipleServicePacket => 0x0A,
            CipService::ForwardOpen => 0x54,
            CipService::ForwardOpenExtended => 0x5B,
            CipService::ForwardClose => 0x4E,
            CipService::UnconnectedSend => 0x52,
            CipService::ExecutePccc => 0x4B,
        }
    }

    /// The high bit of the first response byte marks a reply; the low 7
    /// bits echo the request's service code.
    pub fn reply_code(self) -> u8 {
        self.code() | 0x80
    }
}

/// The general status byte from a CIP response, plus any
/// extended status words that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipStatus {
    pub general_status: u8,
    pub extended: Vec<u8>,
}

impl CipStatus {
    pub fn is_success(&self) -> bool {
        self.general_status == 0x00
    }

    /// `true` when the status is "not enough data returned" (0x06), meaning
    /// the caller should continue a fragmented read at the returned offset.
    pub fn needs_continuation(&self) -> bool {
        self.general_status == 0x06
    }

    pub fn to_error(&self) -> PlcError {
        crate::error::cip_status_to_kind(self.general_status)
    }
}

/// Encodes a tag's symbolic name (and any trailing numeric subscripts) as a
/// CIP ANSI Extended Symbol request path: `0x91`, length byte,
/// UTF-8 bytes, zero pad to an even length, one numeric segment per
/// subscript sized to the subscript's magnitude (`0x28`/`0x29`/`0x2A`).
///
/// `name` must already have any trailing bit suffix (`Flags.3`) stripped by
/// the caller — a bit index addresses a single bit via Read-Modify-Write
/// and is never part of the symbolic path itself.
pub fn encode_symbolic_path(name: &str, subscripts: &[u32]) -> PlcResult<Vec<u8>> {
    if name.is_empty() || !name.is_ascii() {
        return Err(PlcError::BadParam);
    }

    let mut out = Vec::new();
    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(PlcError::BadParam);
        }
        let bytes = segment.as_bytes();
        if bytes.len() > 255 {
            return Err(PlcError::TooLarge);
        }
        out.push(0x91);
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
        if bytes.len() % 2 != 0 {
            out.push(0x00);
        }
    }

    for &sub in subscripts {
        encode_numeric_segment(&mut out, sub);
    }

    // Path length is measured in 16-bit words and prefixed by the caller
    // (the Unconnected Send/Forward Open framing and the tag request frame
    // both carry their own word-count byte ahead of the path).
    Ok(out)
}

fn encode_numeric_segment(out: &mut Vec<u8>, value: u32) {
    if value <= 0xFF {
        out.push(0x28);
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0x29);
        out.push(0x00);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else {
        out.push(0x2A);
        out.push(0x00);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// A fully built CIP request: service code, request path, and
/// service-specific data, ready to be wrapped by the encapsulation layer or
/// nested inside a Multiple Service Packet / Unconnected Send.
#[derive(Debug, Clone)]
pub struct CipRequest {
    pub service: CipService,
    pub path: Vec<u8>,
    pub data: Vec<u8>,
}

impl CipRequest {
    /// Serializes as `service | path_word_len | path | data`, the layout
    /// every tag-level CIP request shares.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.path.len() + self.data.len());
        out.push(self.service.code());
        out.push((self.path.len() / 2) as u8);
        out.extend_from_slice(&self.path);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Builds a Read Tag / Read Tag Fragmented request.
pub fn build_read_tag(
    name: &str,
    subscripts: &[u32],
    elem_count: u16,
    offset: Option<u32>,
) -> PlcResult<CipRequest> {
    let path = encode_symbolic_path(name, subscripts)?;
    let mut data = Vec::new();
    data.extend_from_slice(&elem_count.to_le_bytes());
    let service = match offset {
        None => CipService::ReadTag,
        Some(off) => {
            data.extend_from_slice(&off.to_le_bytes());
            CipService::ReadTagFragmented
        },
    };
    Ok(CipRequest { service, path, data })
}

/// Builds a Write Tag / Write Tag Fragmented request. `value`
/// is the already byte-order-converted element payload; `cip_type` is the
/// CIP elementary data-type code the PLC expects ahead of the data.
pub fn build_write_tag(
    name: &str,
    subscripts: &[u32],
    cip_type: u16,
    elem_count: u16,
    offset: Option<u32>,
    value: &[u8],
) -> PlcResult<CipRequest> {
    let path = encode_symbolic_path(name, subscripts)?;
    let mut data = Vec::new();
    data.extend_from_slice(&cip_type.to_le_bytes());
    data.extend_from_slice(&elem_count.to_le_bytes());
    let service = match offset {
        None => CipService::WriteTag,
        Some(off) => {
            data.extend_from_slice(&off.to_le_bytes());
            CipService::WriteTagFragmented
        },
    };
    data.extend_from_slice(value);
    Ok(CipRequest { service, path, data })
}

/// Builds a Read-Modify-Write request for a single bit inside a larger
/// element; bit tags are routed through read-modify-write rather than a
/// direct write. `or_mask`/`and_mask` are sized to `data_size_bytes`, with
/// exactly one bit
/// set to 1 in `or_mask` (and the complementary bit cleared in `and_mask`)
/// to set the target bit, or the reverse to clear it.
pub fn build_read_modify_write(
    name: &str,
    subscripts: &[u32],
    data_size_bytes: u16,
    or_mask: &[u8],
    and_mask: &[u8],
) -> PlcResult<CipRequest> {
    if or_mask.len() != data_size_bytes as usize || and_mask.len() != data_size_bytes as usize {
        return Err(PlcError::BadParam);
    }
    let path = encode_symbolic_path(name, subscripts)?;
    let mut data = Vec::new();
    data.extend_from_slice(&data_size_bytes.to_le_bytes());
    data.extend_from_slice(or_mask);
    data.extend_from_slice(and_mask);
    Ok(CipRequest { service: CipService::ReadModifyWrite, path, data })
}

/// Wraps several tag-level requests in a single Multiple Service Packet
/// (`allow_packing`), sharing one encapsulation round trip.
pub fn build_multiple_service_packet(requests: &[CipRequest]) -> PlcResult<CipRequest> {
    if requests.is_empty() {
        return Err(PlcError::BadParam);
    }
    let count = requests.len() as u16;
    let bodies: Vec<Vec<u8>> = requests.iter().map(CipRequest::to_bytes).collect();

    let mut offsets = Vec::with_capacity(bodies.len());
    let header_len = 2 + 2 * bodies.len();
    let mut running = header_len;
    for b in &bodies {
        offsets.push(running as u16);
        running += b.len();
    }

    let mut data = Vec::with_capacity(running);
    data.extend_from_slice(&count.to_le_bytes());
    for off in offsets {
        data.extend_from_slice(&off.to_le_bytes());
    }
    for b in bodies {
        data.extend_from_slice(&b);
    }

    Ok(CipRequest {
        service: CipService::MultipleServicePacket,
        path: vec![0x20, 0x02, 0x24, 0x01],
        data,
    })
}

/// Parses a Multiple Service Packet reply body (`count | offsets... |
/// replies...`) back into each member service's own status and data, in
/// request order, so a packed batch can be fanned back out to the
/// individual callers that queued into it.
pub fn parse_multiple_service_packet_reply(data: &[u8]) -> PlcResult<Vec<(CipStatus, Vec<u8>)>> {
    if data.len() < 2 {
        return Err(PlcError::BadData);
    }
    let count = u16::from_le_bytes([data[0], data[1]]) as usize;
    let offsets_end = 2 + count * 2;
    if data.len() < offsets_end {
        return Err(PlcError::BadData);
    }
    let offsets: Vec<usize> = (0..count)
        .map(|i| u16::from_le_bytes([data[2 + 2 * i], data[3 + 2 * i]]) as usize)
        .collect();

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = offsets[i];
        let end = if i + 1 < count { offsets[i + 1] } else { data.len() };
        if end > data.len() || start > end {
            return Err(PlcError::BadData);
        }
        let item = &data[start..end];
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
        out.push((CipStatus { general_status, extended }, item[data_start..].to_vec()));
    }
    Ok(out)
}

/// Parameters for a Forward Open request: establishes the
/// connected (Class 3) session a tag runs its reads/writes over.
#[derive(Debug, Clone)]
pub struct ForwardOpenParams {
    pub connection_serial: u16,
    pub vendor_id: u16,
    pub originator_serial: u32,
    pub connection_timeout_multiplier: u8,
    pub o_to_t_rpi_us: u32,
    pub t_to_o_rpi_us: u32,
    pub o_to_t_size: u16,
    pub t_to_o_size: u16,
    pub connection_path: Vec<u8>,
    /// Large (`ForwardOpen`, 2-byte connection sizes) vs small/extended
    /// (`ForwardOpenExtended`) framing.
    pub use_large_format: bool,
}

pub fn build_forward_open(params: &ForwardOpenParams) -> CipRequest {
    let mut data = Vec::new();
    data.push(0x0E); // timeout tick, fixed per libplctag's defaults
    data.push(params.connection_timeout_multiplier);
    data.extend_from_slice(&0u32.to_le_bytes()); // O->T connection ID, filled by target
    data.extend_from_slice(&0u32.to_le_bytes()); // T->O connection ID, filled by target
    data.extend_from_slice(&params.connection_serial.to_le_bytes());
    data.extend_from_slice(&params.vendor_id.to_le_bytes());
    data.extend_from_slice(&params.originator_serial.to_le_bytes());
    data.push(params.connection_timeout_multiplier);
    data.extend_from_slice(&[0, 0, 0]);
    data.extend_from_slice(&params.o_to_t_rpi_us.to_le_bytes());
    data.extend_from_slice(&params.o_to_t_size.to_le_bytes());
    data.extend_from_slice(&params.t_to_o_rpi_us.to_le_bytes());
    data.extend_from_slice(&params.t_to_o_size.to_le_bytes());
    data.push(0xA3); // transport class/trigger: Class 3, application triggered
    data.push((params.connection_path.len() / 2) as u8);
    data.extend_from_slice(&params.connection_path);

    let service = if params.use_large_format {
        CipService::ForwardOpen
    } else {
        CipService::ForwardOpenExtended
    };
    CipRequest { service, path: Vec::new(), data }
}

pub fn build_forward_close(
    connection_serial: u16,
    vendor_id: u16,
    originator_serial: u32,
    connection_path: &[u8],
) -> CipRequest {
    let mut data = Vec::new();
    data.push(0x0E);
    data.push(0x00);
    data.extend_from_slice(&connection_serial.to_le_bytes());
    data.extend_from_slice(&vendor_id.to_le_bytes());
    data.extend_from_slice(&originator_serial.to_le_bytes());
    data.push((connection_path.len() / 2) as u8);
    data.push(0x00);
    data.extend_from_slice(connection_path);
    CipRequest { service: CipService::ForwardClose, path: Vec::new(), data }
}

/// Wraps an inner CIP request inside an Unconnected Send, used
/// for unconnected (UCMM) tag access and to carry Forward Open itself to a
/// routed (non-local) target.
pub fn build_unconnected_send(
    inner: &CipRequest,
    route_path: &[u8],
    timeout_ticks: u8,
) -> CipRequest {
    let inner_bytes = inner.to_bytes();
    let mut data = Vec::new();
    data.push(0x0A); // priority/tick time, fixed per libplctag's defaults
    data.push(timeout_ticks);
    data.extend_from_slice(&(inner_bytes.len() as u16).to_le_bytes());
    data.extend_from_slice(&inner_bytes);
    if inner_bytes.len() % 2 != 0 {
        data.push(0x00);
    }
    data.push((route_path.len() / 2) as u8);
    data.push(0x00);
    data.extend_from_slice(route_path);

    CipRequest {
        service: CipService::UnconnectedSend,
        path: vec![0x20, 0x06, 0x24, 0x01],
        data,
    }
}
