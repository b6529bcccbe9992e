// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use plc_tag_rs::{PlcError, cfg::attr::parse};

#[test]
fn slc_address_accepts_colon_element_syntax() {
    let a = parse("gateway=10.1.2.3:4006&plc=SLC&name=N7:12&elem_type=INT").expect("valid attrs");
    assert_eq!(a.name, "N7:12");
    assert_eq!(a.port, 4006);
}

#[test]
fn default_port_is_the_eip_well_known_port() {
    let a = parse("gateway=10.1.2.3&plc=LGX&name=Tag1").expect("valid attrs");
    assert_eq!(a.port, 44818);
}

#[test]
fn connection_group_id_above_15_bits_is_rejected() {
    let err = parse("gateway=10.1.2.3&plc=LGX&name=Tag1&connection_group_id=40000").unwrap_err();
    assert_eq!(err, PlcError::BadParam);
}

#[test]
fn debug_level_above_five_is_rejected() {
    let err = parse("gateway=10.1.2.3&plc=LGX&name=Tag1&debug=9").unwrap_err();
    assert_eq!(err, PlcError::BadParam);
}

#[test]
fn elem_path_is_split_on_commas() {
    let a = parse("gateway=10.1.2.3&plc=LGX&name=Tag1&path=1,0").expect("valid attrs");
    assert_eq!(a.path, vec![1, 0]);
}
