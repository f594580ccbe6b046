// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interfaces to the services the adapter core depends on: the firmware
//! mailbox, the SGE queue context layer, the host interrupt layer and the host
//! network stack.
//!
//! All methods take `&self`. Implementations that track state use interior
//! mutability.

use crate::error::Errno;
use t4vf_defs::fw::DevParams;
use t4vf_defs::fw::FwParam;
use t4vf_defs::fw::IntrParams;
use t4vf_defs::fw::LinkConfig;
use t4vf_defs::fw::PortInfo;
use t4vf_defs::fw::PortStats;
use t4vf_defs::fw::RssGlobalConfig;
use t4vf_defs::fw::RssViConfig;
use t4vf_defs::fw::RxMode;
use t4vf_defs::fw::SgeParams;
use t4vf_defs::fw::VfResources;
use t4vf_defs::fw::VpdParams;
use t4vf_defs::mac::MacAddress;

/// Firmware commands issued over the VF mailbox.
pub trait Mailbox {
    /// Resets the firmware's view of the VF.
    fn fw_reset(&self) -> Result<(), Errno>;
    fn get_dev_params(&self) -> Result<DevParams, Errno>;
    fn get_vpd_params(&self) -> Result<VpdParams, Errno>;
    fn get_sge_params(&self) -> Result<SgeParams, Errno>;
    fn get_rss_glb_config(&self) -> Result<RssGlobalConfig, Errno>;
    /// Validates the SGE parameters and derives the host-side SGE settings.
    fn sge_init(&self, params: &SgeParams) -> Result<(), Errno>;
    fn get_vfres(&self) -> Result<VfResources, Errno>;
    fn set_params(&self, params: &[(FwParam, u32)]) -> Result<(), Errno>;

    /// Returns the MAC address the PF assigned to physical port `port_id`,
    /// if any.
    fn get_vf_mac_acl(&self, port_id: u8) -> Result<Option<MacAddress>, Errno>;
    /// Returns the VLAN the PF assigned to this VF, or zero.
    fn get_vf_vlan_acl(&self) -> u16;

    /// Allocates a virtual interface on physical port `port_id` and returns
    /// its id.
    fn alloc_vi(&self, port_id: u8) -> Result<u16, Errno>;
    fn free_vi(&self, viid: u16) -> Result<(), Errno>;
    fn port_init(&self, viid: u16) -> Result<PortInfo, Errno>;
    fn update_port_info(&self, viid: u16) -> Result<LinkConfig, Errno>;
    fn set_rxmode(&self, viid: u16, mode: RxMode) -> Result<(), Errno>;
    fn enable_vi(&self, viid: u16, rx: bool, tx: bool) -> Result<(), Errno>;

    /// Installs or replaces the VI's own address in the exact match TCAM.
    ///
    /// `tcam_idx` is the entry previously returned, if any. Returns the entry
    /// now in use. Fails with `ENOMEM` when the TCAM is full.
    fn change_mac(
        &self,
        viid: u16,
        tcam_idx: Option<u16>,
        addr: MacAddress,
        persistent: bool,
    ) -> Result<u16, Errno>;
    /// Adds an additional exact match filter. Fails with `ENOMEM` when the
    /// TCAM is full.
    fn alloc_mac_filt(&self, viid: u16, addr: MacAddress) -> Result<u16, Errno>;
    fn free_mac_filt(&self, viid: u16, addr: MacAddress) -> Result<(), Errno>;
    /// Programs the VI's inexact filter.
    fn set_addr_hash(&self, viid: u16, ucast: bool, vec: u64) -> Result<(), Errno>;

    /// Fills `rss_size` RSS slots of the VI, starting at `start`, cycling
    /// through `queues`.
    fn config_rss_range(
        &self,
        viid: u16,
        start: u16,
        rss_size: u16,
        queues: &[u16],
    ) -> Result<(), Errno>;
    fn read_rss_vi_config(&self, viid: u16) -> Result<RssViConfig, Errno>;
    fn write_rss_vi_config(&self, viid: u16, config: &RssViConfig) -> Result<(), Errno>;

    fn get_port_stats(&self, pidx: usize) -> Result<PortStats, Errno>;

    /// Delivers an asynchronous firmware command reply.
    fn handle_fw_reply(&self, data: &[u8]);
}

/// Where an ingress queue signals its interrupts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IngressInterrupt {
    /// The queue raises MSI-X vector `index` (relative to the vectors granted
    /// to the adapter).
    Msix(usize),
    /// The queue forwards interrupts to the interrupt queue with the given
    /// absolute id.
    Forward(u16),
    /// The queue is itself the forwarded interrupt queue and raises MSI.
    Msi,
}

/// Which ingress queue a request describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IngressKind {
    ForwardedInterrupts,
    FirmwareEvents,
    /// Ethernet response queue for queue set `qset`.
    Ethernet { qset: usize },
}

/// Parameters for an ingress queue allocation.
#[derive(Debug, Clone)]
pub struct RxQueueRequest {
    pub kind: IngressKind,
    pub size: usize,
    pub iqe_len: usize,
    pub intr_params: IntrParams,
    pub pktcnt_idx: u8,
    pub intr: IngressInterrupt,
    /// Free list size, for queues that carry packet data.
    pub fl_size: Option<usize>,
    /// VI of the port owning the queue.
    pub viid: Option<u16>,
}

/// Parameters for an Ethernet TX queue allocation.
#[derive(Debug, Clone)]
pub struct TxQueueRequest {
    pub qset: usize,
    pub size: usize,
    pub viid: u16,
    /// Context id of the ingress queue receiving egress updates.
    pub iqid: u16,
}

/// Hardware queue context ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueIds {
    /// Context id relative to the VF.
    pub cntxt_id: u16,
    /// Absolute id across the adapter.
    pub abs_id: u16,
}

/// Ids of an allocated ingress queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RxQueueIds {
    pub rspq: QueueIds,
    /// Context id of the free list, relative to the VF.
    pub fl_cntxt_id: Option<u16>,
}

/// SGE queue contexts.
pub trait SgeBacking {
    fn alloc_rxq(&self, req: &RxQueueRequest) -> Result<RxQueueIds, Errno>;
    fn alloc_eth_txq(&self, req: &TxQueueRequest) -> Result<QueueIds, Errno>;
    /// Frees every queue allocated through this interface.
    fn free_sge_resources(&self);
    /// Starts the SGE timers and doorbell processing.
    fn sge_start(&self);
    fn sge_stop(&self);
    /// Writes the ingress queue's GTS register with a zero credit increment,
    /// arming it with the given interrupt parameters.
    fn arm_ingress(&self, cntxt_id: u16, intr_params: IntrParams);
}

/// Identifies a response queue for polling purposes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RspQueueId {
    FirmwareEvents,
    Ethernet(usize),
}

/// The host interrupt layer.
pub trait IrqBacking {
    /// Enables between `min` and `max` MSI-X vectors and returns the host
    /// vector numbers granted.
    fn enable_msix(&self, min: usize, max: usize) -> Result<Vec<u32>, Errno>;
    fn disable_msix(&self);
    /// Enables MSI and returns its host vector number.
    fn enable_msi(&self) -> Result<u32, Errno>;
    fn disable_msi(&self);
    fn request_irq(&self, vector: u32, name: &str) -> Result<(), Errno>;
    fn free_irq(&self, vector: u32);
}

/// The host network stack's view of the adapter's ports.
pub trait NetStack {
    /// Returns the interface name of port `pidx`.
    fn netdev_name(&self, pidx: usize) -> String;
    fn set_real_num_queues(&self, pidx: usize, n: usize) -> Result<(), Errno>;
    fn register_netdev(&self, pidx: usize) -> Result<(), Errno>;
    fn unregister_netdev(&self, pidx: usize);
    fn tx_start_all(&self, pidx: usize);
    fn tx_stop_all(&self, pidx: usize);
    fn tx_wake(&self, pidx: usize, queue: usize);
    fn set_carrier(&self, pidx: usize, up: bool);
    fn napi_enable(&self, queue: RspQueueId);
    /// Disables polling on `queue`, waiting for an in-flight poll to finish.
    fn napi_disable(&self, queue: RspQueueId);
}

/// Everything the adapter needs from its environment.
pub trait DeviceBacking: Mailbox + SgeBacking + IrqBacking + NetStack {
    /// Returns the adapter's device name, used to name interrupts.
    fn name(&self) -> &str;

    /// Returns the number of online CPUs.
    fn num_cpus(&self) -> usize;
}
