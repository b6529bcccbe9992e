// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-tag byte-order policy: the digit-permutation descriptors for
//! multi-byte integers/floats, and the string framing rules. These are
//! independent of the EtherNet/IP encapsulation layer (which is always
//! little-endian on the wire); they describe how a PLC family lays out
//! multi-byte values and strings *inside* a tag's data buffer.

use crate::error::{PlcError, PlcResult};

/// A byte permutation for a fixed-width integer or float: `perm[i]` is the
/// source byte index that should land at destination position `i`. Every
/// digit `0..width` must be used exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permutation<const W: usize>(pub [u8; W]);

impl<const W: usize> Permutation<W> {
    /// The identity permutation (native order).
    pub const fn identity() -> Self {
        let mut p = [0u8; W];
        let mut i = 0;
        while i < W {
            p[i] = i as u8;
            i += 1;
        }
        Self(p)
    }

    /// Parses a digit string such as `"3210"` into a validated permutation.
    pub fn parse(s: &str) -> PlcResult<Self> {
        if s.len() != W {
            return Err(PlcError::BadParam);
        }
        let mut out = [0u8; W];
        let mut seen = [false; W];
        for (i, c) in s.chars().enumerate() {
            let d = c.to_digit(10).ok_or(PlcError::BadParam)? as usize;
            if d >= W || seen[d] {
                return Err(PlcError::BadParam);
            }
            seen[d] = true;
            out[i] = d as u8;
        }
        Ok(Self(out))
    }

    /// Applies the permutation: `dst[i] = src[perm[i]]`.
    pub fn apply(&self, src: &[u8; W]) -> [u8; W] {
        let mut out = [0u8; W];
        for i in 0..W {
            out[i] = src[self.0[i] as usize];
        }
        out
    }

    /// Applies the inverse permutation, undoing [`Permutation::apply`].
    pub fn unapply(&self, src: &[u8; W]) -> [u8; W] {
        let mut out = [0u8; W];
        for i in 0..W {
            out[self.0[i] as usize] = src[i];
        }
        out
    }
}

/// String framing rules: counted vs. zero-terminated,
/// count-word width, fixed/variable length, capacity, padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringFraming {
    pub is_counted: bool,
    pub is_fixed_length: bool,
    pub is_zero_terminated: bool,
    pub is_byte_swapped: bool,
    /// 0, 1, 2, 4, or 8 bytes.
    pub count_word_bytes: u8,
    pub max_capacity: usize,
    pub total_length: usize,
    pub pad_bytes: usize,
    /// 0 (disabled), 1, 2, or 4.
    pub pad_to_multiple_bytes: u8,
}

impl StringFraming {
    pub const fn const_default() -> Self {
        Self {
            is_counted: true,
            is_fixed_length: false,
            is_zero_terminated: false,
            is_byte_swapped: false,
            count_word_bytes: 2,
            max_capacity: 82,
            total_length: 88,
            pad_bytes: 0,
            pad_to_multiple_bytes: 0,
        }
    }
}

impl Default for StringFraming {
    fn default() -> Self {
        Self::const_default()
    }
}

/// The complete byte-order descriptor attached to a tag.
///
/// Shared instances come from [`family_defaults`]; setting any `str_*` or
/// `*_byte_order` attribute switches a tag from the shared
/// default to a heap-allocated (here, `Arc`-owned) copy it can mutate freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteOrderPolicy {
    pub int16: Permutation<2>,
    pub int32: Permutation<4>,
    pub int64: Permutation<8>,
    pub float32: Permutation<4>,
    pub float64: Permutation<8>,
    pub string: StringFraming,
}

impl ByteOrderPolicy {
    pub const fn little_endian() -> Self {
        Self {
            int16: Permutation::identity(),
            int32: Permutation::identity(),
            int64: Permutation::identity(),
            float32: Permutation::identity(),
            float64: Permutation::identity(),
            string: StringFraming::const_default(),
        }
    }
}

impl Default for ByteOrderPolicy {
    fn default() -> Self {
        Self::little_endian()
    }
}

/// PLC families with distinct wire/string conventions (`plc`/`cpu` attribute
/// values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlcFamily {
    ControlLogix,
    Plc5,
    Slc,
    MicroLogix,
    OmronNjNx,
}

impl PlcFamily {
    /// Parses the `plc`/`cpu` attribute value.
    pub fn parse(s: &str) -> PlcResult<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "LGX" | "CONTROLLOGIX" => PlcFamily::ControlLogix,
            "PLC5" => PlcFamily::Plc5,
            "SLC" => PlcFamily::Slc,
            "MICROLOGIX" => PlcFamily::MicroLogix,
            "OMRON-NJNX" | "OMRON-NJ" | "OMRON-NX" => PlcFamily::OmronNjNx,
            _ => return Err(PlcError::BadParam),
        })
    }

    /// `true` for PLC-5/SLC/MicroLogix, the families that speak PCCC rather
    /// than CIP symbolic tag addressing.
    pub fn uses_pccc(self) -> bool {
        matches!(self, PlcFamily::Plc5 | PlcFamily::Slc | PlcFamily::MicroLogix)
    }

    /// `true` for Omron, which rejects fragmented writes.
    pub fn rejects_fragmented_write(self) -> bool {
        matches!(self, PlcFamily::OmronNjNx)
    }

    /// Whether this family opens a Class 3 connection (Forward Open) for
    /// tag access by default, absent an explicit `use_connected_msg`
    /// attribute. PCCC-tunneling families route through the PCCC object
    /// over unconnected messaging instead, so they default to `false`.
    pub fn default_use_connected_msg(self) -> bool {
        !self.uses_pccc()
    }
}

/// The shared, family-specific default byte-order descriptors. These are
/// shared constants, not per-tag allocations.
pub fn family_defaults(family: PlcFamily) -> ByteOrderPolicy {
    match family {
        PlcFamily::ControlLogix | PlcFamily::OmronNjNx => ByteOrderPolicy::little_endian(),
        PlcFamily::Plc5 | PlcFamily::Slc | PlcFamily::MicroLogix => ByteOrderPolicy {
            // PLC-5/SLC historically swap 16-bit words within 32-bit values.
            int16: Permutation::identity(),
            int32: Permutation([2, 3, 0, 1]),
            int64: Permutation::identity(),
            float32: Permutation([2, 3, 0, 1]),
            float64: Permutation::identity(),
            string: StringFraming {
                is_counted: true,
                is_fixed_length: true,
                is_zero_terminated: false,
                is_byte_swapped: true,
                count_word_bytes: 2,
                max_capacity: 82,
                total_length: 84,
                pad_bytes: 0,
                pad_to_multiple_bytes: 2,
            },
        },
    }
}
