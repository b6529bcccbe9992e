// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use plc_tag_rs::session::cip::{build_read_tag, build_write_tag, encode_symbolic_path};

#[test]
fn symbolic_path_pads_odd_length_names_to_an_even_boundary() {
    let path = encode_symbolic_path("Odd", &[]).expect("encode");
    // 0x91 | len(3) | 'O' 'd' 'd' | pad
    assert_eq!(path, vec![0x91, 0x03, b'O', b'd', b'd', 0x00]);
}

#[test]
fn symbolic_path_does_not_pad_even_length_names() {
    let path = encode_symbolic_path("Evn2", &[]).expect("encode");
    assert_eq!(path, vec![0x91, 0x04, b'E', b'v', b'n', b'2']);
}

#[test]
fn dotted_member_access_produces_one_segment_per_component() {
    let path = encode_symbolic_path("Struct.Member", &[]).expect("encode");
    assert_eq!(path[0], 0x91);
    assert_eq!(path[1], 6);
    let second_segment_start = 2 + 6;
    assert_eq!(path[second_segment_start], 0x91);
}

#[test]
fn numeric_subscript_is_sized_by_magnitude() {
    let small = encode_symbolic_path("Arr", &[3]).expect("encode");
    // tag name segment is 0x91 0x03 'A' 'r' 'r' (no pad, len 3 is odd -> pads)
    assert_eq!(&small[small.len() - 2..], &[0x28, 3]);

    let large = encode_symbolic_path("Arr", &[70000]).expect("encode");
    assert_eq!(large[large.len() - 6], 0x2A);
}

#[test]
fn read_tag_without_offset_uses_the_unfragmented_service() {
    let req = build_read_tag("Counter", &[], 1, None).expect("build");
    let bytes = req.to_bytes();
    assert_eq!(bytes[0], 0x4C);
}

#[test]
fn read_tag_with_offset_switches_to_the_fragmented_service() {
    let req = build_read_tag("Counter", &[], 1, Some(128)).expect("build");
    let bytes = req.to_bytes();
    assert_eq!(bytes[0], 0x52);
}

#[test]
fn write_tag_request_carries_cip_type_then_element_count_then_value() {
    let req = build_write_tag("Counter", &[], 0x00C4, 1, None, &42i32.to_le_bytes()).expect("build");
    let bytes = req.to_bytes();
    assert_eq!(bytes[0], 0x4D);
    // service(1) + path_len(1) + path + type(2) + count(2) + value(4)
    assert_eq!(&bytes[bytes.len() - 4..], &42i32.to_le_bytes());
}
