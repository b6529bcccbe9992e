// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Recognized options of the tag attribute string.
//!
//! The splitting itself (`k=v&k=v`) is deliberately simple plumbing; what
//! matters to this crate is the set of recognized keys and how they shape
//! a [`Tag`](crate::tag::Tag).

use std::collections::HashMap;

use crate::{
    cfg::enums::ElemType,
    error::{PlcError, PlcResult},
    primitives::byteorder::PlcFamily,
};

/// A fully parsed and validated tag attribute string.
#[derive(Debug, Clone)]
pub struct TagAttributes {
    pub plc: PlcFamily,
    pub gateway: String,
    pub port: u16,
    pub path: Vec<u8>,
    pub name: String,
    /// A trailing numeric bit index stripped out of the raw attribute name
    /// (e.g. the `3` in `Flags.3`). A tag carrying this reads/writes a
    /// single bit inside `name` via Read-Modify-Write rather than the
    /// member's full element path.
    pub bit_index: Option<u8>,

    pub elem_type: Option<ElemType>,
    pub elem_count: u32,
    pub elem_size: Option<u32>,

    pub debug: u8,
    pub read_cache_ms: u32,
    pub auto_sync_read_ms: u32,
    pub auto_sync_write_ms: u32,
    pub use_connected_msg: Option<bool>,
    pub allow_packing: bool,
    pub allow_field_resize: bool,
    pub connection_group_id: u16,

    pub int16_byte_order: Option<String>,
    pub int32_byte_order: Option<String>,
    pub int64_byte_order: Option<String>,
    pub float32_byte_order: Option<String>,
    pub float64_byte_order: Option<String>,

    pub str_is_counted: Option<bool>,
    pub str_is_fixed_length: Option<bool>,
    pub str_is_zero_terminated: Option<bool>,
    pub str_is_byte_swapped: Option<bool>,
    pub str_count_word_bytes: Option<u8>,
    pub str_max_capacity: Option<usize>,
    pub str_total_length: Option<usize>,
    pub str_pad_bytes: Option<usize>,
    pub str_pad_to_multiple_bytes_experimental: Option<u8>,
}

impl TagAttributes {
    /// `true` if any string-framing attribute was explicitly set, meaning
    /// the tag must get a heap-allocated (non-shared) byte-order policy
    /// rather than the family default.
    pub fn overrides_string_framing(&self) -> bool {
        self.str_is_counted.is_some()
            || self.str_is_fixed_length.is_some()
            || self.str_is_zero_terminated.is_some()
            || self.str_is_byte_swapped.is_some()
            || self.str_count_word_bytes.is_some()
            || self.str_max_capacity.is_some()
            || self.str_total_length.is_some()
            || self.str_pad_bytes.is_some()
            || self.str_pad_to_multiple_bytes_experimental.is_some()
    }
}

/// Splits a trailing numeric segment off a dotted tag name, e.g.
/// `Flags.3` -> (`Flags`, Some(3)). The stripped index is never appended to
/// the CIP symbolic path; it drives Read-Modify-Write addressing instead.
fn split_bit_suffix(name: &str) -> (String, Option<u8>) {
    if let Some((base, suffix)) = name.rsplit_once('.')
        && !base.is_empty()
        && let Ok(bit) = suffix.parse::<u8>()
    {
        return (base.to_string(), Some(bit));
    }
    (name.to_string(), None)
}

fn split_kv(attr: &str) -> HashMap<&str, &str> {
    attr.split('&')
        .filter(|kv| !kv.is_empty())
        .filter_map(|kv| kv.split_once('='))
        .collect()
}

fn parse_bool01(v: &str) -> PlcResult<bool> {
    match v {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(PlcError::BadParam),
    }
}

fn parse_u32(v: &str) -> PlcResult<u32> {
    v.parse().map_err(|_| PlcError::BadParam)
}

fn parse_usize(v: &str) -> PlcResult<usize> {
    v.parse().map_err(|_| PlcError::BadParam)
}

/// Parses and validates a tag attribute string, e.g.
/// `protocol=ab_eip&gateway=10.0.0.1&path=1,0&plc=LGX&elem_type=DINT&elem_count=1&name=Counter`.
pub fn parse(attr: &str) -> PlcResult<TagAttributes> {
    let kv = split_kv(attr);

    if let Some(proto) = kv.get("protocol")
        && !matches!(*proto, "ab_eip" | "ab-eip")
    {
        return Err(PlcError::Unsupported);
    }

    let plc_str = kv
        .get("plc")
        .or_else(|| kv.get("cpu"))
        .ok_or(PlcError::BadParam)?;
    let plc = PlcFamily::parse(plc_str)?;

    let gateway_field = kv.get("gateway").ok_or(PlcError::BadParam)?;
    let (gateway, port) = match gateway_field.split_once(':') {
        Some((host, p)) => (host.to_string(), p.parse().map_err(|_| PlcError::BadParam)?),
        None => (gateway_field.to_string(), 44818),
    };
    if gateway.is_empty() {
        return Err(PlcError::BadParam);
    }

    let path = match kv.get("path") {
        Some(p) => p
            .split(',')
            .map(|b| b.trim().parse::<u8>().map_err(|_| PlcError::BadParam))
            .collect::<PlcResult<Vec<u8>>>()?,
        None => Vec::new(),
    };

    let raw_name = kv.get("name").ok_or(PlcError::BadParam)?.to_string();
    if raw_name.is_empty() {
        return Err(PlcError::BadParam);
    }
    let (name, bit_index) = split_bit_suffix(&raw_name);
    if name.is_empty() {
        return Err(PlcError::BadParam);
    }

    let elem_type = kv.get("elem_type").map(|s| ElemType::parse(s)).transpose()?;
    let elem_count = kv.get("elem_count").map(|s| parse_u32(s)).transpose()?.unwrap_or(1);
    let elem_size = kv.get("elem_size").map(|s| parse_u32(s)).transpose()?;

    if elem_count == 0 || elem_size == Some(0) {
        return Err(PlcError::BadParam);
    }

    let debug = kv
        .get("debug")
        .map(|s| s.parse::<u8>().map_err(|_| PlcError::BadParam))
        .transpose()?
        .unwrap_or(0);
    if debug > 5 {
        return Err(PlcError::BadParam);
    }

    let connection_group_id = kv
        .get("connection_group_id")
        .map(|s| s.parse::<u16>().map_err(|_| PlcError::BadParam))
        .transpose()?
        .unwrap_or(0);
    if connection_group_id > 32767 {
        return Err(PlcError::BadParam);
    }

    let str_count_word_bytes = kv
        .get("str_count_word_bytes")
        .map(|s| s.parse::<u8>().map_err(|_| PlcError::BadParam))
        .transpose()?;
    if let Some(w) = str_count_word_bytes
        && !matches!(w, 0 | 1 | 2 | 4 | 8)
    {
        return Err(PlcError::BadParam);
    }

    let str_pad_to_multiple_bytes_experimental = kv
        .get("str_pad_to_multiple_bytes_EXPERIMENTAL")
        .map(|s| s.parse::<u8>().map_err(|_| PlcError::BadParam))
        .transpose()?;
    if let Some(w) = str_pad_to_multiple_bytes_experimental
        && !matches!(w, 0 | 1 | 2 | 4)
    {
        return Err(PlcError::BadParam);
    }

    Ok(TagAttributes {
        plc,
        gateway,
        port,
        path,
        name,
        bit_index,
        elem_type,
        elem_count,
        elem_size,
        debug,
        read_cache_ms: kv.get("read_cache_ms").map(|s| parse_u32(s)).transpose()?.unwrap_or(0),
        auto_sync_read_ms: kv
            .get("auto_sync_read_ms")
            .map(|s| parse_u32(s))
            .transpose()?
            .unwrap_or(0),
        auto_sync_write_ms: kv
            .get("auto_sync_write_ms")
            .map(|s| parse_u32(s))
            .transpose()?
            .unwrap_or(0),
        use_connected_msg: kv.get("use_connected_msg").map(|s| parse_bool01(s)).transpose()?,
        allow_packing: kv
            .get("allow_packing")
            .map(|s| parse_bool01(s))
            .transpose()?
            .unwrap_or(false),
        allow_field_resize: kv
            .get("allow_field_resize")
            .map(|s| parse_bool01(s))
            .transpose()?
            .unwrap_or(false),
        connection_group_id,
        int16_byte_order: kv.get("int16_byte_order").map(|s| s.to_string()),
        int32_byte_order: kv.get("int32_byte_order").map(|s| s.to_string()),
        int64_byte_order: kv.get("int64_byte_order").map(|s| s.to_string()),
        float32_byte_order: kv.get("float32_byte_order").map(|s| s.to_string()),
        float64_byte_order: kv.get("float64_byte_order").map(|s| s.to_string()),
        str_is_counted: kv.get("str_is_counted").map(|s| parse_bool01(s)).transpose()?,
        str_is_fixed_length: kv
            .get("str_is_fixed_length")
            .map(|s| parse_bool01(s))
            .transpose()?,
        str_is_zero_terminated: kv
            .get("str_is_zero_terminated")
            .map(|s| parse_bool01(s))
            .transpose()?,
        str_is_byte_swapped: kv
            .get("str_is_byte_swapped")
            .map(|s| parse_bool01(s))
            .transpose()?,
        str_count_word_bytes,
        str_max_capacity: kv.get("str_max_capacity").map(|s| parse_usize(s)).transpose()?,
        str_total_length: kv.get("str_total_length").map(|s| parse_usize(s)).transpose()?,
        str_pad_bytes: kv.get("str_pad_bytes").map(|s| parse_usize(s)).transpose()?,
        str_pad_to_multiple_bytes_experimental,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_controllogix_attrs() {
        let a = parse("protocol=ab_eip&gateway=10.0.0.1&path=1,0&plc=LGX&elem_type=DINT&elem_count=1&name=Counter")
            .expect("valid attrs");
        assert_eq!(a.gateway, "10.0.0.1");
        assert_eq!(a.port, 44818);
        assert_eq!(a.path, vec![1, 0]);
        assert_eq!(a.name, "Counter");
        assert_eq!(a.elem_type, Some(ElemType::Dint));
        assert_eq!(a.elem_count, 1);
    }

    #[test]
    fn rejects_zero_size_tag() {
        let err = parse("gateway=10.0.0.1&plc=LGX&name=X&elem_count=0").unwrap_err();
        assert_eq!(err, PlcError::BadParam);
    }

    #[test]
    fn rejects_missing_name() {
        assert!(parse("gateway=10.0.0.1&plc=LGX").is_err());
    }

    #[test]
    fn rejects_unknown_protocol() {
        assert!(parse("protocol=modbus&gateway=10.0.0.1&plc=LGX&name=X").is_err());
    }

    #[test]
    fn parses_custom_gateway_port() {
        let a = parse("gateway=10.0.0.1:4006&plc=SLC&name=N7:0").expect("valid attrs");
        assert_eq!(a.port, 4006);
    }

    #[test]
    fn trailing_numeric_segment_is_extracted_as_bit_index() {
        let a = parse("gateway=10.0.0.1&plc=LGX&name=Flags.3&elem_type=BOOL").expect("valid attrs");
        assert_eq!(a.name, "Flags");
        assert_eq!(a.bit_index, Some(3));
    }

    #[test]
    fn non_numeric_member_is_not_treated_as_bit_index() {
        let a = parse("gateway=10.0.0.1&plc=LGX&name=Prog.Counter&elem_type=DINT").expect("valid attrs");
        assert_eq!(a.name, "Prog.Counter");
        assert_eq!(a.bit_index, None);
    }

    #[test]
    fn string_framing_override_detected() {
        let a = parse("gateway=10.0.0.1&plc=LGX&name=X&str_is_counted=1").expect("ok");
        assert!(a.overrides_string_framing());
        let b = parse("gateway=10.0.0.1&plc=LGX&name=X").expect("ok");
        assert!(!b.overrides_string_framing());
    }
}
