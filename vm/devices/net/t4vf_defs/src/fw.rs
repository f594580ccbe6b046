// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Values exchanged with the firmware over the VF mailbox.

use crate::mac::MacAddress;
use bitfield_struct::bitfield;

/// Device parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevParams {
    pub chip: u32,
    pub fwrev: u32,
    pub tprev: u32,
}

/// VPD parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VpdParams {
    /// Core clock, in kHz.
    pub cclk: u32,
}

/// SGE register values relevant to a VF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SgeParams {
    pub sge_control: u32,
    pub sge_control2: u32,
    pub sge_host_page_size: u32,
    pub sge_egress_queues_per_page: u32,
    pub sge_ingress_queues_per_page: u32,
    pub sge_fl_buffer_size: [u32; 2],
    pub sge_ingress_rx_threshold: u32,
    pub sge_congestion_control: u32,
    pub sge_timer_value_0_and_1: u32,
    pub sge_timer_value_2_and_3: u32,
    pub sge_timer_value_4_and_5: u32,
}

/// Two packed SGE holdoff timer values, in core clock ticks. The even-numbered
/// timer is in the upper half.
#[bitfield(u32)]
pub struct TimerValuePair {
    pub odd: u16,
    pub even: u16,
}

/// The four packet count thresholds from `SGE_INGRESS_RX_THRESHOLD`.
#[bitfield(u32)]
pub struct RxThresholds {
    #[bits(6)]
    pub threshold_3: u8,
    #[bits(2)]
    pub reserved3: u8,
    #[bits(6)]
    pub threshold_2: u8,
    #[bits(2)]
    pub reserved2: u8,
    #[bits(6)]
    pub threshold_1: u8,
    #[bits(2)]
    pub reserved1: u8,
    #[bits(6)]
    pub threshold_0: u8,
    #[bits(2)]
    pub reserved0: u8,
}

impl RxThresholds {
    pub fn to_array(self) -> [u8; 4] {
        [
            self.threshold_0(),
            self.threshold_1(),
            self.threshold_2(),
            self.threshold_3(),
        ]
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RssMode(pub u8);

impl RssMode {
    pub const MANUAL: Self = Self(0);
    pub const BASICVIRTUAL: Self = Self(1);
}

/// Global RSS configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssGlobalConfig {
    pub mode: RssMode,
    pub tnl_map_en: bool,
    pub tnl_all_lookup: bool,
    pub hash_toeplitz: bool,
}

/// Per-VI RSS configuration in BASICVIRTUAL mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RssViConfig {
    pub default_queue: u16,
    pub ip6_four_tuple_en: bool,
    pub ip6_two_tuple_en: bool,
    pub ip4_four_tuple_en: bool,
    pub ip4_two_tuple_en: bool,
    pub udp_en: bool,
}

/// The resources the PF driver provisioned to this VF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VfResources {
    /// Number of virtual interfaces.
    pub nvi: u32,
    /// Number of egress queues.
    pub neq: u32,
    /// Number of Ethernet/control egress queues.
    pub nethctrl: u32,
    /// Number of ingress queues with free lists and interrupt capability.
    pub niqflint: u32,
    /// Number of ingress queues without free lists.
    pub niq: u32,
    pub tc: u32,
    /// Mask of physical ports this VF may use.
    pub pmask: u32,
    /// Number of exact MAC filters.
    pub nexactf: u32,
    pub r_caps: u32,
    pub wx_caps: u32,
}

/// A firmware parameter identifier.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FwParam {
    pub yz: u16,
    pub x: u8,
    pub mnem: u8,
}

pub const FW_PARAMS_MNEM_DEV: u8 = 1;
pub const FW_PARAMS_MNEM_PFVF: u8 = 2;
pub const FW_PARAMS_MNEM_REG: u8 = 3;
pub const FW_PARAMS_MNEM_DMAQ: u8 = 4;

pub const FW_PARAMS_PARAM_PFVF_CPLFW4MSG_ENCAP: u8 = 0x31;
pub const FW_PARAMS_PARAM_DMAQ_IQ_INTCNTTHRESH: u8 = 0x01;

impl FwParam {
    /// Ask the firmware to encapsulate egress updates in `CPL_FW4_MSG`.
    pub fn cplfw4msg_encap() -> Self {
        Self::new()
            .with_mnem(FW_PARAMS_MNEM_PFVF)
            .with_x(FW_PARAMS_PARAM_PFVF_CPLFW4MSG_ENCAP)
    }

    /// The interrupt packet count threshold index of ingress queue `iq`.
    pub fn iq_intcntthresh(iq: u16) -> Self {
        Self::new()
            .with_mnem(FW_PARAMS_MNEM_DMAQ)
            .with_x(FW_PARAMS_PARAM_DMAQ_IQ_INTCNTTHRESH)
            .with_yz(iq)
    }
}

/// The interrupt parameters of an ingress queue.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct IntrParams {
    /// Packet count threshold enable.
    pub cnt_en: bool,
    /// Holdoff timer index.
    #[bits(3)]
    pub timer_idx: u8,
    #[bits(4)]
    pub reserved: u8,
}

/// 32-bit port capabilities.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PortCaps {
    pub speed_100m: bool,
    pub speed_1g: bool,
    pub speed_10g: bool,
    pub speed_25g: bool,
    pub speed_40g: bool,
    pub speed_50g: bool,
    pub speed_100g: bool,
    pub speed_200g: bool,
    pub speed_400g: bool,
    #[bits(7)]
    pub reserved: u8,
    pub fc_rx: bool,
    pub fc_tx: bool,
    pub aneg: bool,
    #[bits(13)]
    pub reserved2: u16,
}

impl PortCaps {
    /// Returns true if the port supports 10Gb/s or faster.
    pub fn is_x_10g(&self) -> bool {
        self.speed_10g()
            || self.speed_25g()
            || self.speed_40g()
            || self.speed_50g()
            || self.speed_100g()
            || self.speed_200g()
            || self.speed_400g()
    }
}

/// Negotiated pause settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseSettings {
    pub rx: bool,
    pub tx: bool,
}

/// Link state and capabilities of a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkConfig {
    /// Port capabilities.
    pub pcaps: PortCaps,
    /// Current speed in Mb/s.
    pub speed: u32,
    pub fc: PauseSettings,
    pub link_ok: bool,
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PortModuleType(pub u8);

impl PortModuleType {
    pub const NA: Self = Self(0);
    pub const LR: Self = Self(1);
    pub const SR: Self = Self(2);
    pub const ER: Self = Self(3);
    pub const TWINAX_PASSIVE: Self = Self(4);
    pub const TWINAX_ACTIVE: Self = Self(5);
    pub const LRM: Self = Self(6);
    pub const ERROR: Self = Self(0x1c);
    pub const UNKNOWN: Self = Self(0x1d);
    pub const NOTSUPPORTED: Self = Self(0x1e);
    pub const NONE: Self = Self(0x1f);

    /// Returns the name of a known optical or copper module.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::LR => "LR",
            Self::SR => "SR",
            Self::ER => "ER",
            Self::TWINAX_PASSIVE => "passive DA",
            Self::TWINAX_ACTIVE => "active DA",
            Self::LRM => "LRM",
            _ => return None,
        })
    }
}

/// Port information returned when a VI is initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortInfo {
    pub mac: MacAddress,
    pub rss_size: u16,
    pub link_cfg: LinkConfig,
    pub mod_type: PortModuleType,
}

/// RX mode settings for a VI. `None` leaves the setting unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxMode {
    pub mtu: Option<u32>,
    pub promisc: Option<bool>,
    pub all_multi: Option<bool>,
    pub broadcast: Option<bool>,
    pub vlan_ex: Option<bool>,
}

/// VF port statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub tx_bcast_bytes: u64,
    pub tx_bcast_frames: u64,
    pub tx_mcast_bytes: u64,
    pub tx_mcast_frames: u64,
    pub tx_ucast_bytes: u64,
    pub tx_ucast_frames: u64,
    pub tx_drop_frames: u64,
    pub tx_offload_bytes: u64,
    pub tx_offload_frames: u64,
    pub rx_bcast_bytes: u64,
    pub rx_bcast_frames: u64,
    pub rx_mcast_bytes: u64,
    pub rx_mcast_frames: u64,
    pub rx_ucast_bytes: u64,
    pub rx_ucast_frames: u64,
    pub rx_err_frames: u64,
}
