// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use plc_tag_rs::primitives::byteorder::{PlcFamily, family_defaults};

#[test]
fn unknown_plc_family_token_is_rejected() {
    assert!(PlcFamily::parse("VENDOR9000").is_err());
}

#[test]
fn plc_family_tokens_are_case_insensitive() {
    assert_eq!(PlcFamily::parse("lgx").unwrap(), PlcFamily::ControlLogix);
    assert_eq!(PlcFamily::parse("Omron-NJ").unwrap(), PlcFamily::OmronNjNx);
}

#[test]
fn only_pccc_families_report_uses_pccc() {
    for f in [PlcFamily::Plc5, PlcFamily::Slc, PlcFamily::MicroLogix] {
        assert!(f.uses_pccc());
    }
    for f in [PlcFamily::ControlLogix, PlcFamily::OmronNjNx] {
        assert!(!f.uses_pccc());
    }
}

#[test]
fn micrologix_shares_the_plc5_word_swapped_default() {
    let plc5 = family_defaults(PlcFamily::Plc5);
    let micrologix = family_defaults(PlcFamily::MicroLogix);
    assert_eq!(plc5.int32, micrologix.int32);
    assert_eq!(plc5.string.is_byte_swapped, micrologix.string.is_byte_swapped);
}

#[test]
fn omron_rejects_fragmented_writes_but_controllogix_does_not() {
    assert!(PlcFamily::OmronNjNx.rejects_fragmented_write());
    assert!(!PlcFamily::ControlLogix.rejects_fragmented_write());
}
