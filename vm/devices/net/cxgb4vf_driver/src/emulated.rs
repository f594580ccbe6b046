// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory virtual function for tests.
//!
//! Firmware commands, queue contexts, interrupts and the network stack are all
//! modelled in a single [`State`] that tests inspect and use to inject
//! failures.

use crate::backing::DeviceBacking;
use crate::backing::IrqBacking;
use crate::backing::Mailbox;
use crate::backing::NetStack;
use crate::backing::QueueIds;
use crate::backing::RspQueueId;
use crate::backing::RxQueueIds;
use crate::backing::RxQueueRequest;
use crate::backing::SgeBacking;
use crate::backing::TxQueueRequest;
use crate::error::Errno;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use t4vf_defs::fw::DevParams;
use t4vf_defs::fw::FwParam;
use t4vf_defs::fw::IntrParams;
use t4vf_defs::fw::LinkConfig;
use t4vf_defs::fw::PauseSettings;
use t4vf_defs::fw::PortCaps;
use t4vf_defs::fw::PortInfo;
use t4vf_defs::fw::PortModuleType;
use t4vf_defs::fw::PortStats;
use t4vf_defs::fw::RssGlobalConfig;
use t4vf_defs::fw::RssMode;
use t4vf_defs::fw::RssViConfig;
use t4vf_defs::fw::RxMode;
use t4vf_defs::fw::SgeParams;
use t4vf_defs::fw::VfResources;
use t4vf_defs::fw::VpdParams;
use t4vf_defs::mac::MacAddress;
use tracing_subscriber::EnvFilter;

/// Offset between ingress context ids and absolute ids.
pub const INGRESS_BASE: u16 = 0x100;
/// Offset between egress context ids and absolute ids.
pub const EGRESS_BASE: u16 = 0x200;
/// First host vector handed out for MSI-X.
pub const MSIX_VECTOR_BASE: u32 = 32;
pub const MSI_VECTOR: u32 = 24;

/// Initializes `tracing` for tests.
pub fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .log_internal_errors(true)
            .with_test_writer()
            .init();
    });
}

/// Injected failures. Each `Some` makes the matching command fail.
#[derive(Debug, Default)]
pub struct Failures {
    pub fw_reset: Option<Errno>,
    pub vfres: Option<Errno>,
    pub set_params: Option<Errno>,
    pub alloc_vi: Option<Errno>,
    pub mac_acl: Option<Errno>,
    pub update_port_info: Option<Errno>,
    pub set_rxmode: Option<Errno>,
    pub enable_vi: Option<Errno>,
    pub change_mac: Option<Errno>,
    pub config_rss: Option<Errno>,
    pub port_stats: Option<Errno>,
    /// Ports whose registration fails.
    pub register_netdev: Vec<usize>,
    /// Fail the n-th (zero-based) `request_irq` call.
    pub request_irq_at: Option<(usize, Errno)>,
    /// Fail the n-th (zero-based) `alloc_rxq` call.
    pub alloc_rxq_at: Option<(usize, Errno)>,
}

/// A virtual interface.
#[derive(Debug, Clone, Default)]
pub struct Vi {
    pub port_id: u8,
    /// Accumulated RX mode; `None` fields were never set.
    pub rxmode: RxMode,
    pub rx_enabled: bool,
    pub tx_enabled: bool,
    pub mac: Option<MacAddress>,
    /// Last programmed inexact filter.
    pub addr_hash: Option<(bool, u64)>,
    pub rss: Vec<u16>,
    pub rss_config: RssViConfig,
}

#[derive(Debug)]
pub struct State {
    pub rss_mode: RssMode,
    pub tnl_all_lookup: bool,
    pub vfres: VfResources,
    pub sge: SgeParams,
    pub cclk: u32,
    pub mac_acl: HashMap<u8, MacAddress>,
    pub vlan_acl: u16,
    pub link: LinkConfig,
    pub params_set: Vec<(FwParam, u32)>,
    pub vis: BTreeMap<u16, Vi>,
    pub freed_vis: Vec<u16>,
    next_viid: u16,
    /// Exact match filter slots, holding `(viid, addr)`.
    pub tcam: Vec<Option<(u16, MacAddress)>>,
    pub addr_hash_calls: usize,
    pub port_stats: PortStats,
    pub fw_replies: Vec<Vec<u8>>,

    pub rxqs: Vec<RxQueueRequest>,
    pub txqs: Vec<TxQueueRequest>,
    next_iq: u16,
    next_eq: u16,
    rxq_calls: usize,
    pub sge_frees: usize,
    pub sge_running: bool,
    pub armed: Vec<(u16, IntrParams)>,

    pub msix_available: usize,
    pub msi_available: bool,
    pub msix_enabled: Option<Vec<u32>>,
    pub msi_enabled: bool,
    /// Vectors with a handler, in binding order.
    pub bound_irqs: Vec<(u32, String)>,
    pub freed_irqs: Vec<u32>,
    irq_calls: usize,

    pub cpus: usize,
    pub registered: BTreeSet<usize>,
    pub real_num_queues: HashMap<usize, usize>,
    pub tx_running: HashSet<usize>,
    pub tx_wakes: Vec<(usize, usize)>,
    pub carrier: HashMap<usize, bool>,
    pub napi: HashSet<RspQueueId>,

    pub fail: Failures,
}

impl State {
    fn vi(&mut self, viid: u16) -> Result<&mut Vi, Errno> {
        self.vis.get_mut(&viid).ok_or(Errno::EINVAL)
    }
}

pub struct EmulatedVf {
    name: String,
    state: Mutex<State>,
}

impl EmulatedVf {
    /// A VF with four 10Gb/s ports and plenty of interrupt vectors.
    pub fn new() -> Self {
        init_tracing();
        let fc = PauseSettings { rx: true, tx: true };
        Self {
            name: "0000:03:01.0".into(),
            state: Mutex::new(State {
                rss_mode: RssMode::BASICVIRTUAL,
                tnl_all_lookup: false,
                vfres: Self::default_vfres(),
                sge: SgeParams {
                    sge_timer_value_0_and_1: (250 << 16) | 1250,
                    sge_timer_value_2_and_3: (2500 << 16) | 12500,
                    sge_timer_value_4_and_5: (25000 << 16) | 50000,
                    sge_ingress_rx_threshold: (1 << 24) | (4 << 16) | (8 << 8) | 16,
                    ..Default::default()
                },
                cclk: 250_000,
                mac_acl: HashMap::new(),
                vlan_acl: 0,
                link: LinkConfig {
                    pcaps: PortCaps::new()
                        .with_speed_1g(true)
                        .with_speed_10g(true)
                        .with_fc_rx(true)
                        .with_fc_tx(true),
                    speed: 10000,
                    fc,
                    link_ok: true,
                },
                params_set: Vec::new(),
                vis: BTreeMap::new(),
                freed_vis: Vec::new(),
                next_viid: 0x10,
                tcam: vec![None; 16],
                addr_hash_calls: 0,
                port_stats: PortStats::default(),
                fw_replies: Vec::new(),
                rxqs: Vec::new(),
                txqs: Vec::new(),
                next_iq: 0,
                next_eq: 0,
                rxq_calls: 0,
                sge_frees: 0,
                sge_running: false,
                armed: Vec::new(),
                msix_available: 64,
                msi_available: true,
                msix_enabled: None,
                msi_enabled: false,
                bound_irqs: Vec::new(),
                freed_irqs: Vec::new(),
                irq_calls: 0,
                cpus: 4,
                registered: BTreeSet::new(),
                real_num_queues: HashMap::new(),
                tx_running: HashSet::new(),
                tx_wakes: Vec::new(),
                carrier: HashMap::new(),
                napi: HashSet::new(),
                fail: Failures::default(),
            }),
        }
    }

    /// Four VIs on four ports, with eight queue sets' worth of queues.
    pub fn default_vfres() -> VfResources {
        VfResources {
            nvi: 4,
            neq: 16,
            nethctrl: 8,
            niqflint: 9,
            niq: 20,
            tc: 0,
            pmask: 0xf,
            nexactf: 16,
            r_caps: 0,
            wx_caps: 0,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }
}

fn fail(injected: Option<Errno>) -> Result<(), Errno> {
    match injected {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Counts a call and fails it if it is the injected one.
fn fail_at(calls: &mut usize, injected: Option<(usize, Errno)>) -> Result<(), Errno> {
    let n = *calls;
    *calls += 1;
    match injected {
        Some((at, err)) if at == n => Err(err),
        _ => Ok(()),
    }
}

impl Mailbox for EmulatedVf {
    fn fw_reset(&self) -> Result<(), Errno> {
        fail(self.state().fail.fw_reset)
    }

    fn get_dev_params(&self) -> Result<DevParams, Errno> {
        Ok(DevParams {
            chip: 0x5,
            fwrev: 0x0117_0000,
            tprev: 0x0001_0000,
        })
    }

    fn get_vpd_params(&self) -> Result<VpdParams, Errno> {
        Ok(VpdParams {
            cclk: self.state().cclk,
        })
    }

    fn get_sge_params(&self) -> Result<SgeParams, Errno> {
        Ok(self.state().sge)
    }

    fn get_rss_glb_config(&self) -> Result<RssGlobalConfig, Errno> {
        let state = self.state();
        Ok(RssGlobalConfig {
            mode: state.rss_mode,
            tnl_map_en: false,
            tnl_all_lookup: state.tnl_all_lookup,
            hash_toeplitz: true,
        })
    }

    fn sge_init(&self, _params: &SgeParams) -> Result<(), Errno> {
        Ok(())
    }

    fn get_vfres(&self) -> Result<VfResources, Errno> {
        let state = self.state();
        fail(state.fail.vfres)?;
        Ok(state.vfres)
    }

    fn set_params(&self, params: &[(FwParam, u32)]) -> Result<(), Errno> {
        let mut state = self.state();
        fail(state.fail.set_params)?;
        state.params_set.extend_from_slice(params);
        Ok(())
    }

    fn get_vf_mac_acl(&self, port_id: u8) -> Result<Option<MacAddress>, Errno> {
        let state = self.state();
        fail(state.fail.mac_acl)?;
        Ok(state.mac_acl.get(&port_id).copied())
    }

    fn get_vf_vlan_acl(&self) -> u16 {
        self.state().vlan_acl
    }

    fn alloc_vi(&self, port_id: u8) -> Result<u16, Errno> {
        let mut state = self.state();
        fail(state.fail.alloc_vi)?;
        let viid = state.next_viid;
        state.next_viid += 1;
        state.vis.insert(
            viid,
            Vi {
                port_id,
                ..Default::default()
            },
        );
        Ok(viid)
    }

    fn free_vi(&self, viid: u16) -> Result<(), Errno> {
        let mut state = self.state();
        state.vis.remove(&viid).ok_or(Errno::EINVAL)?;
        state.tcam.iter_mut().for_each(|slot| {
            if matches!(slot, Some((v, _)) if *v == viid) {
                *slot = None;
            }
        });
        state.freed_vis.push(viid);
        Ok(())
    }

    fn port_init(&self, viid: u16) -> Result<PortInfo, Errno> {
        let mut state = self.state();
        let link_cfg = state.link;
        let port_id = state.vi(viid)?.port_id;
        Ok(PortInfo {
            mac: MacAddress::new([0x00, 0x07, 0x43, 0x00, 0x00, port_id]),
            rss_size: 64,
            link_cfg,
            mod_type: PortModuleType::SR,
        })
    }

    fn update_port_info(&self, viid: u16) -> Result<LinkConfig, Errno> {
        let mut state = self.state();
        fail(state.fail.update_port_info)?;
        state.vi(viid)?;
        Ok(state.link)
    }

    fn set_rxmode(&self, viid: u16, mode: RxMode) -> Result<(), Errno> {
        let mut state = self.state();
        fail(state.fail.set_rxmode)?;
        let current = &mut state.vi(viid)?.rxmode;
        current.mtu = mode.mtu.or(current.mtu);
        current.promisc = mode.promisc.or(current.promisc);
        current.all_multi = mode.all_multi.or(current.all_multi);
        current.broadcast = mode.broadcast.or(current.broadcast);
        current.vlan_ex = mode.vlan_ex.or(current.vlan_ex);
        Ok(())
    }

    fn enable_vi(&self, viid: u16, rx: bool, tx: bool) -> Result<(), Errno> {
        let mut state = self.state();
        fail(state.fail.enable_vi)?;
        let vi = state.vi(viid)?;
        vi.rx_enabled = rx;
        vi.tx_enabled = tx;
        Ok(())
    }

    fn change_mac(
        &self,
        viid: u16,
        tcam_idx: Option<u16>,
        addr: MacAddress,
        _persistent: bool,
    ) -> Result<u16, Errno> {
        let mut state = self.state();
        fail(state.fail.change_mac)?;
        state.vi(viid)?;
        let reuse = tcam_idx
            .map(usize::from)
            .filter(|&i| matches!(state.tcam.get(i), Some(Some((v, _))) if *v == viid));
        let idx = match reuse {
            Some(i) => i,
            None => state
                .tcam
                .iter()
                .position(Option::is_none)
                .ok_or(Errno::ENOMEM)?,
        };
        state.tcam[idx] = Some((viid, addr));
        state.vi(viid)?.mac = Some(addr);
        Ok(idx as u16)
    }

    fn alloc_mac_filt(&self, viid: u16, addr: MacAddress) -> Result<u16, Errno> {
        let mut state = self.state();
        state.vi(viid)?;
        let idx = state
            .tcam
            .iter()
            .position(Option::is_none)
            .ok_or(Errno::ENOMEM)?;
        state.tcam[idx] = Some((viid, addr));
        Ok(idx as u16)
    }

    fn free_mac_filt(&self, viid: u16, addr: MacAddress) -> Result<(), Errno> {
        let mut state = self.state();
        let slot = state
            .tcam
            .iter_mut()
            .find(|slot| **slot == Some((viid, addr)))
            .ok_or(Errno::EINVAL)?;
        *slot = None;
        Ok(())
    }

    fn set_addr_hash(&self, viid: u16, ucast: bool, vec: u64) -> Result<(), Errno> {
        let mut state = self.state();
        state.addr_hash_calls += 1;
        state.vi(viid)?.addr_hash = Some((ucast, vec));
        Ok(())
    }

    fn config_rss_range(
        &self,
        viid: u16,
        start: u16,
        rss_size: u16,
        queues: &[u16],
    ) -> Result<(), Errno> {
        let mut state = self.state();
        fail(state.fail.config_rss)?;
        if queues.is_empty() || start >= rss_size {
            return Err(Errno::EINVAL);
        }
        let vi = state.vi(viid)?;
        vi.rss = queues
            .iter()
            .copied()
            .cycle()
            .take(usize::from(rss_size - start))
            .collect();
        Ok(())
    }

    fn read_rss_vi_config(&self, viid: u16) -> Result<RssViConfig, Errno> {
        Ok(self.state().vi(viid)?.rss_config)
    }

    fn write_rss_vi_config(&self, viid: u16, config: &RssViConfig) -> Result<(), Errno> {
        self.state().vi(viid)?.rss_config = *config;
        Ok(())
    }

    fn get_port_stats(&self, _pidx: usize) -> Result<PortStats, Errno> {
        let state = self.state();
        fail(state.fail.port_stats)?;
        Ok(state.port_stats)
    }

    fn handle_fw_reply(&self, data: &[u8]) {
        self.state().fw_replies.push(data.to_vec());
    }
}

impl SgeBacking for EmulatedVf {
    fn alloc_rxq(&self, req: &RxQueueRequest) -> Result<RxQueueIds, Errno> {
        let mut state = self.state();
        let injected = state.fail.alloc_rxq_at;
        fail_at(&mut state.rxq_calls, injected)?;
        let cntxt_id = state.next_iq;
        state.next_iq += 1;
        let fl_cntxt_id = req.fl_size.map(|_| {
            let id = state.next_eq;
            state.next_eq += 1;
            id
        });
        state.rxqs.push(req.clone());
        Ok(RxQueueIds {
            rspq: QueueIds {
                cntxt_id,
                abs_id: cntxt_id + INGRESS_BASE,
            },
            fl_cntxt_id,
        })
    }

    fn alloc_eth_txq(&self, req: &TxQueueRequest) -> Result<QueueIds, Errno> {
        let mut state = self.state();
        let cntxt_id = state.next_eq;
        state.next_eq += 1;
        state.txqs.push(req.clone());
        Ok(QueueIds {
            cntxt_id,
            abs_id: cntxt_id + EGRESS_BASE,
        })
    }

    fn free_sge_resources(&self) {
        let mut state = self.state();
        state.rxqs.clear();
        state.txqs.clear();
        state.next_iq = 0;
        state.next_eq = 0;
        state.sge_frees += 1;
    }

    fn sge_start(&self) {
        self.state().sge_running = true;
    }

    fn sge_stop(&self) {
        self.state().sge_running = false;
    }

    fn arm_ingress(&self, cntxt_id: u16, intr_params: IntrParams) {
        self.state().armed.push((cntxt_id, intr_params));
    }
}

impl IrqBacking for EmulatedVf {
    fn enable_msix(&self, min: usize, max: usize) -> Result<Vec<u32>, Errno> {
        let mut state = self.state();
        assert!(state.msix_enabled.is_none() && !state.msi_enabled);
        if state.msix_available < min {
            return Err(Errno::ENOSPC);
        }
        let vectors: Vec<u32> = (0..max.min(state.msix_available) as u32)
            .map(|i| MSIX_VECTOR_BASE + i)
            .collect();
        state.msix_enabled = Some(vectors.clone());
        Ok(vectors)
    }

    fn disable_msix(&self) {
        let mut state = self.state();
        assert!(state.bound_irqs.is_empty());
        state.msix_enabled = None;
    }

    fn enable_msi(&self) -> Result<u32, Errno> {
        let mut state = self.state();
        assert!(state.msix_enabled.is_none() && !state.msi_enabled);
        if !state.msi_available {
            return Err(Errno::EINVAL);
        }
        state.msi_enabled = true;
        Ok(MSI_VECTOR)
    }

    fn disable_msi(&self) {
        let mut state = self.state();
        assert!(state.bound_irqs.is_empty());
        state.msi_enabled = false;
    }

    fn request_irq(&self, vector: u32, name: &str) -> Result<(), Errno> {
        let mut state = self.state();
        let injected = state.fail.request_irq_at;
        fail_at(&mut state.irq_calls, injected)?;
        if state.bound_irqs.iter().any(|(v, _)| *v == vector) {
            return Err(Errno::EBUSY);
        }
        state.bound_irqs.push((vector, name.to_owned()));
        Ok(())
    }

    fn free_irq(&self, vector: u32) {
        let mut state = self.state();
        let i = state
            .bound_irqs
            .iter()
            .position(|(v, _)| *v == vector)
            .expect("freeing an unbound vector");
        state.bound_irqs.remove(i);
        state.freed_irqs.push(vector);
    }
}

impl NetStack for EmulatedVf {
    fn netdev_name(&self, pidx: usize) -> String {
        format!("eth{pidx}")
    }

    fn set_real_num_queues(&self, pidx: usize, n: usize) -> Result<(), Errno> {
        self.state().real_num_queues.insert(pidx, n);
        Ok(())
    }

    fn register_netdev(&self, pidx: usize) -> Result<(), Errno> {
        let mut state = self.state();
        if state.fail.register_netdev.contains(&pidx) {
            return Err(Errno::EBUSY);
        }
        state.registered.insert(pidx);
        Ok(())
    }

    fn unregister_netdev(&self, pidx: usize) {
        assert!(self.state().registered.remove(&pidx));
    }

    fn tx_start_all(&self, pidx: usize) {
        self.state().tx_running.insert(pidx);
    }

    fn tx_stop_all(&self, pidx: usize) {
        self.state().tx_running.remove(&pidx);
    }

    fn tx_wake(&self, pidx: usize, queue: usize) {
        self.state().tx_wakes.push((pidx, queue));
    }

    fn set_carrier(&self, pidx: usize, up: bool) {
        self.state().carrier.insert(pidx, up);
    }

    fn napi_enable(&self, queue: RspQueueId) {
        assert!(self.state().napi.insert(queue), "{queue:?} already enabled");
    }

    fn napi_disable(&self, queue: RspQueueId) {
        assert!(self.state().napi.remove(&queue), "{queue:?} not enabled");
    }
}

impl DeviceBacking for EmulatedVf {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_cpus(&self) -> usize {
        self.state().cpus
    }
}
