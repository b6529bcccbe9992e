// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PCCC (Programmable Controller Communication Commands) tunneled inside
//! CIP, the dialect PLC-5, SLC-500, and MicroLogix controllers
//! speak instead of native symbolic CIP tags. Grounded in
//! `libplctag/protocols/ab/eip_slc_pccc.c`: PCCC is wrapped as CIP service
//! `0x4B` ("Execute PCCC") addressed to class/instance path `20 67 24 01`,
//! and tag names are classic PLC file/element/subelement addresses
//! (`N7:0`, `B3:4/1`, `F8:10`) rather than ANSI symbols.

use crate::{
    error::{PlcError, PlcResult},
    session::cip::{CipRequest, CipService},
};

/// PCCC file types this crate resolves, grounded in `eip_slc_pccc.c`'s
/// file-type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcccFileType {
    Output,
    Input,
    Status,
    Bit,
    Timer,
    Counter,
    Control,
    Integer,
    Float,
    String,
    Ascii,
}

impl PcccFileType {
    fn from_letter(c: char) -> PlcResult<Self> {
        Ok(match c.to_ascii_uppercase() {
            'O' => PcccFileType::Output,
            'I' => PcccFileType::Input,
            'S' => PcccFileType::Status,
            'B' => PcccFileType::Bit,
            'T' => PcccFileType::Timer,
            'C' => PcccFileType::Counter,
            'R' => PcccFileType::Control,
            'N' => PcccFileType::Integer,
            'F' => PcccFileType::Float,
            'D' => PcccFileType::String,
            'A' => PcccFileType::Ascii,
            _ => return Err(PlcError::BadParam),
        })
    }

    /// The PCCC file-type code byte sent on the wire.
    pub fn code(self) -> u8 {
        match self {
            PcccFileType::Output => 0x82,
            PcccFileType::Input => 0x83,
            PcccFileType::Status => 0x84,
            PcccFileType::Bit => 0x85,
            PcccFileType::Timer => 0x86,
            PcccFileType::Counter => 0x87,
            PcccFileType::Control => 0x88,
            PcccFileType::Integer => 0x89,
            PcccFileType::Float => 0x8A,
            PcccFileType::String => 0x8D,
            PcccFileType::Ascii => 0x8E,
        }
    }

    pub fn element_size_bytes(self) -> u16 {
        match self {
            PcccFileType::Bit | PcccFileType::Output | PcccFileType::Input => 2,
            PcccFileType::Float => 4,
            _ => 2,
        }
    }
}

/// A parsed PCCC address, e.g. `N7:12` or `B3:4/1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcccAddress {
    pub file_type: PcccFileType,
    pub file_number: u16,
    pub element: u16,
    pub sub_element: Option<u16>,
    pub bit: Option<u8>,
}

/// Parses classic PLC-5/SLC/MicroLogix addressing: `<type><file>:<element>
/// [.<sub_element>][/<bit>]`.
pub fn parse_address(addr: &str) -> PlcResult<PcccAddress> {
    let mut chars = addr.chars();
    let type_letter = chars.next().ok_or(PlcError::BadParam)?;
    let file_type = PcccFileType::from_letter(type_letter)?;

    let rest = chars.as_str();
    let (file_part, after_colon) = rest.split_once(':').ok_or(PlcError::BadParam)?;
    let file_number: u16 = file_part.parse().map_err(|_| PlcError::BadParam)?;

    let (elem_part, bit_part) = match after_colon.split_once('/') {
        Some((e, b)) => (e, Some(b)),
        None => (after_colon, None),
    };

    let (element_part, sub_part) = match elem_part.split_once('.') {
        Some((e, s)) => (e, Some(s)),
        None => (elem_part, None),
    };

    let element: u16 = element_part.parse().map_err(|_| PlcError::BadParam)?;
    let sub_element = sub_part
        .map(|s| s.parse::<u16>().map_err(|_| PlcError::BadParam))
        .transpose()?;
    let bit = bit_part
        .map(|b| b.parse::<u8>().map_err(|_| PlcError::BadParam))
        .transpose()?;
    if let Some(b) = bit
        && b > 15
    {
        return Err(PlcError::BadParam);
    }

    Ok(PcccAddress { file_type, file_number, element, sub_element, bit })
}

/// The PCCC command/function codes this crate issues, grounded in
/// `eip_slc_pccc.c`'s typed file read/write commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcccCommand {
    TypedRead,
    TypedWrite,
}

impl PcccCommand {
    fn code(self) -> u8 {
        match self {
            PcccCommand::TypedRead => 0xA2,
            PcccCommand::TypedWrite => 0xAA,
        }
    }
}

/// The next PCCC transaction sequence number, a 16-bit value PCCC uses in
/// place of CIP's sender context to correlate requests with replies.
pub fn next_transaction_seq(counter: &mut u16) -> u16 {
    *counter = counter.wrapping_add(1);
    if *counter == 0 {
        *counter = 1;
    }
    *counter
}

fn encode_file_address(addr: &PcccAddress) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.push(addr.file_type.code());
    out.push(addr.file_number as u8);
    out.extend_from_slice(&addr.element.to_le_bytes());
    out.extend_from_slice(&addr.sub_element.unwrap_or(0).to_le_bytes());
    out
}

/// Builds a PCCC Typed Read, already wrapped as a CIP Execute-PCCC request
/// (service `0x4B`, path `20 67 24 01`).
pub fn build_pccc_read(addr: &PcccAddress, elem_count: u16, seq: u16) -> CipRequest {
    let mut data = Vec::new();
    data.push(PcccCommand::TypedRead.code());
    data.push(0x00); // status, always 0 on request
    data.extend_from_slice(&seq.to_le_bytes());
    data.extend_from_slice(&encode_file_address(addr));
    data.extend_from_slice(&elem_count.to_le_bytes());

    CipRequest {
        service: CipService::ExecutePccc,
        path: vec![0x20, 0x67, 0x24, 0x01],
        data,
    }
}

/// Builds a PCCC Typed Write, already wrapped as a CIP Execute-PCCC request.
/// PCCC has no fragmented-write service, so `value` must fit in one
/// request.
pub fn build_pccc_write(
    addr: &PcccAddress,
    elem_count: u16,
    seq: u16,
    value: &[u8],
) -> PlcResult<CipRequest> {
    if value.len() > 0xF8 {
        return Err(PlcError::TooLarge);
    }
    let mut data = Vec::new();
    data.push(PcccCommand::TypedWrite.code());
    data.push(0x00);
    data.extend_from_slice(&seq.to_le_bytes());
    data.extend_from_slice(&encode_file_address(addr));
    data.extend_from_slice(&elem_count.to_le_bytes());
    data.extend_from_slice(value);

    Ok(CipRequest {
        service: CipService::ExecutePccc,
        path: vec![0x20, 0x67, 0x24, 0x01],
        data,
    })
}
