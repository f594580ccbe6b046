// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hardware and firmware definitions for the Chelsio T4/T5/T6 SR-IOV virtual
//! function NIC.

pub mod cpl;
pub mod fw;
pub mod mac;

pub const VENDOR_ID: u16 = 0x1425;

/// Maximum number of ports (VIs) a VF drives.
pub const MAX_NPORTS: usize = 4;

/// Maximum number of Ethernet queue sets across all ports.
pub const MAX_ETH_QSETS: usize = 32;

/// MSI-X vector of the firmware event queue.
pub const MSIX_FW: usize = 0;
/// First MSI-X vector used by the Ethernet ingress queues.
pub const MSIX_IQFLINT: usize = 1;
/// Vectors needed in addition to one per queue set.
pub const MSIX_EXTRAS: usize = 1;
pub const MSIX_ENTRIES: usize = MAX_ETH_QSETS + MSIX_EXTRAS;

/// Ingress queues: every Ethernet response queue, the firmware event queue
/// and the forwarded interrupt queue.
pub const MAX_INGQ: usize = MAX_ETH_QSETS + 2;
/// Egress queues: every Ethernet TX queue and every free list.
pub const MAX_EGRQ: usize = MAX_ETH_QSETS * 2;

/// Number of SGE holdoff timers.
pub const SGE_NTIMERS: usize = 6;
/// Number of SGE packet count thresholds.
pub const SGE_NCOUNTERS: usize = 4;
/// The timer index that disables the holdoff timer and restarts the packet
/// counter on every interrupt.
pub const SGE_TIMER_RSTRT_CNTR: u8 = 6;

/// Size of an egress queue unit, in bytes.
pub const EQ_UNIT: usize = 64;
/// Free list entries per egress queue unit.
pub const FL_PER_EQ_UNIT: usize = EQ_UNIT / 8;
/// Free list entries the hardware keeps in reserve.
pub const MIN_FL_RESID: usize = FL_PER_EQ_UNIT;

pub const MAX_TXQ_ENTRIES: usize = 16384;
pub const MAX_RSPQ_ENTRIES: usize = 16384;
pub const MAX_RX_BUFFERS: usize = 16384;

pub const MIN_TXQ_ENTRIES: usize = 32;
pub const MIN_RSPQ_ENTRIES: usize = 128;
pub const MIN_FL_ENTRIES: usize = 16;

pub const ETH_MIN_MTU: u32 = 81;
pub const ETH_MAX_MTU: u32 = 65535;
