// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CPL messages delivered to the driver on the firmware event queue.
//!
//! A response descriptor starts with an [`RssHeader`] whose first byte is the
//! CPL opcode. The CPL body follows the header.

use bitfield_struct::bitfield;
use std::mem::size_of;
use zerocopy::byteorder::big_endian::U16;
use zerocopy::byteorder::big_endian::U32;
use zerocopy::byteorder::big_endian::U64;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CplOpcode(pub u8);

impl CplOpcode {
    pub const RX_PKT: Self = Self(0x3b);
    pub const SGE_EGR_UPDATE: Self = Self(0xa5);
    pub const FW4_MSG: Self = Self(0xc0);
    pub const FW6_MSG: Self = Self(0xe0);
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Fw6MsgType(pub u8);

impl Fw6MsgType {
    pub const CMD_RPL: Self = Self(0);
    pub const WR_RPL: Self = Self(1);
    pub const CQE: Self = Self(2);
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RssHeader {
    pub opcode: CplOpcode,
    pub flags: u8,
    pub qid: U16,
    pub hash_val: U32,
}

/// Offset of the CPL body within a response descriptor.
pub const CPL_OFFSET: usize = size_of::<RssHeader>();

/// Common header of `CPL_FW4_MSG` and `CPL_FW6_MSG`.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CplFwMsgHeader {
    pub opcode: CplOpcode,
    pub ty: u8,
    pub rsvd0: U16,
    pub rsvd1: U32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CplFw6Msg {
    pub hdr: CplFwMsgHeader,
    pub data: [U64; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CplFw4Msg {
    pub hdr: CplFwMsgHeader,
    pub data: [U64; 1],
    pub egr_update: CplSgeEgrUpdate,
}

/// Offset of the embedded egress update within a `CPL_FW4_MSG` body.
pub const FW4_EGR_UPDATE_OFFSET: usize = size_of::<CplFwMsgHeader>() + size_of::<U64>();

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CplSgeEgrUpdate {
    pub opcode_qid: U32,
    pub cidx: U16,
    pub pidx: U16,
}

impl CplSgeEgrUpdate {
    pub fn opcode_qid(&self) -> OpcodeQid {
        OpcodeQid::from(self.opcode_qid.get())
    }
}

#[bitfield(u32)]
pub struct OpcodeQid {
    #[bits(17)]
    pub qid: u32,
    #[bits(7)]
    pub reserved: u8,
    pub opcode: u8,
}
