// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ethernet MAC addresses as programmed into the VI filters.

use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Number of buckets in the per-VI inexact (hash) MAC filter.
pub const MAC_HASH_BUCKETS: u32 = 64;

/// A 48-bit Ethernet MAC address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoBytes, Immutable, KnownLayout, FromBytes,
)]
#[repr(transparent)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-zeroes address.
    pub const ZERO: Self = Self([0; 6]);

    /// Returns a new MAC address from the given bytes.
    pub const fn new(value: [u8; 6]) -> Self {
        Self(value)
    }

    /// Returns the bytes of the MAC address.
    pub const fn to_bytes(self) -> [u8; 6] {
        self.0
    }

    /// Returns true if the group bit is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 1 != 0
    }

    /// Returns true if this is an individual (unicast) address.
    pub const fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Returns true if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Returns true if the address may be assigned to an interface: it is
    /// neither multicast nor all-zeroes.
    pub fn is_valid_station(&self) -> bool {
        !self.is_multicast() && !self.is_zero()
    }

    /// Returns the inexact filter bucket for this address.
    ///
    /// The two halves of the address are folded together and reduced to six
    /// bits, matching the bucket selection the hardware hash filter uses.
    pub fn hash_bucket(&self) -> u32 {
        let b = &self.0;
        let hi = u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2]);
        let lo = u32::from(b[3]) << 16 | u32::from(b[4]) << 8 | u32::from(b[5]);
        let mut a = hi ^ lo;
        a ^= a >> 12;
        a ^= a >> 6;
        a & (MAC_HASH_BUCKETS - 1)
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(value: [u8; 6]) -> Self {
        Self::new(value)
    }
}

impl From<MacAddress> for [u8; 6] {
    fn from(value: MacAddress) -> Self {
        value.0
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Error returned when parsing a [`MacAddress`] fails.
#[derive(Debug, Error)]
#[error("invalid mac address")]
pub struct InvalidMacAddress;

impl FromStr for MacAddress {
    type Err = InvalidMacAddress;

    fn from_str(val: &str) -> Result<Self, InvalidMacAddress> {
        if val.len() != 17 {
            return Err(InvalidMacAddress);
        }
        let sep = val.as_bytes()[2];
        if sep != b'-' && sep != b':' {
            return Err(InvalidMacAddress);
        }
        let mut mac_address = [0u8; 6];
        let mut parts = 0;
        for (src, dst) in val.split(sep as char).zip(&mut mac_address) {
            if src.len() != 2 {
                return Err(InvalidMacAddress);
            }
            *dst = u8::from_str_radix(src, 16).map_err(|_| InvalidMacAddress)?;
            parts += 1;
        }
        if parts != 6 {
            return Err(InvalidMacAddress);
        }
        Ok(MacAddress(mac_address))
    }
}
