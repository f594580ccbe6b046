// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The adapter: a PCI virtual function with one or more Ethernet ports.

use crate::backing::DeviceBacking;
use crate::budget::resolve_budget;
use crate::budget::AdapterParams;
use crate::budget::HoldoffTables;
use crate::config::DriverConfig;
use crate::error::Error;
use crate::interrupts::enable_interrupts;
use crate::interrupts::InterruptMode;
use crate::interrupts::IrqArena;
use crate::lifecycle::LifecycleState;
use crate::lifecycle::PortSet;
use crate::mac_filter::HashMacEntry;
use crate::mac_filter::HashMacList;
use crate::plan::AdapterPlan;
use crate::plan::QueueSetLayout;
use crate::queues::Sge;
use parking_lot::Mutex;
use t4vf_defs::fw::LinkConfig;
use t4vf_defs::fw::PortModuleType;
use t4vf_defs::fw::VfResources;
use t4vf_defs::mac::MacAddress;

const DEFAULT_MTU: u32 = 1500;

/// Offloads a port can toggle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Features {
    /// VLAN tag extraction on receive.
    pub vlan_rx: bool,
    /// VLAN tag insertion on transmit.
    pub vlan_tx: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            vlan_rx: true,
            vlan_tx: true,
        }
    }
}

/// An Ethernet port, backed by a virtual interface (VI).
#[derive(Debug, Clone)]
pub struct Port {
    /// Index of the port within the adapter.
    pub pidx: usize,
    /// The physical port the VI is attached to.
    pub port_id: u8,
    /// The VI, if the firmware is usable.
    pub viid: Option<u16>,
    pub first_qset: usize,
    pub nqsets: usize,
    /// The exact match filter holding the interface address, if any.
    pub xact_addr_filt: Option<u16>,
    pub vlan_id: u16,
    pub rss_size: u16,
    pub link_cfg: LinkConfig,
    pub mod_type: PortModuleType,
    pub mac: MacAddress,
    pub mtu: u32,
    pub features: Features,
    pub carrier: bool,
}

impl Port {
    fn new(pidx: usize, port_id: u8) -> Self {
        Self {
            pidx,
            port_id,
            viid: None,
            first_qset: 0,
            nqsets: 0,
            xact_addr_filt: None,
            vlan_id: 0,
            rss_size: 0,
            link_cfg: LinkConfig::default(),
            mod_type: PortModuleType::NA,
            mac: MacAddress::ZERO,
            mtu: DEFAULT_MTU,
            features: Features::default(),
            carrier: false,
        }
    }

    /// The queue sets owned by this port.
    pub fn qsets(&self) -> std::ops::Range<usize> {
        self.first_qset..self.first_qset + self.nqsets
    }
}

/// A Chelsio T4/T5/T6 SR-IOV virtual function.
pub struct Adapter<T: DeviceBacking> {
    pub(crate) device: T,
    pub(crate) config: DriverConfig,
    /// `None` when firmware initialization failed.
    pub(crate) params: Option<AdapterParams>,
    pub(crate) plan: AdapterPlan,
    pub(crate) ports: Vec<Port>,
    pub(crate) sge: Sge,
    pub(crate) interrupts: Option<InterruptMode>,
    pub(crate) bound: Option<IrqArena>,
    pub(crate) state: LifecycleState,
    pub(crate) open_ports: PortSet,
    pub(crate) registered: PortSet,
    pub(crate) full_init_done: bool,
    /// Serializes port statistics queries and guards the inexact MAC filter
    /// list.
    pub(crate) stats_lock: Mutex<HashMacList>,
}

impl<T: DeviceBacking> Adapter<T> {
    /// Initializes the adapter and registers its ports.
    ///
    /// If the firmware cannot be initialized the adapter still comes up, with
    /// a single port that can be listed but not opened.
    #[tracing::instrument(skip_all, fields(name = device.name()))]
    pub fn probe(device: T, config: DriverConfig) -> Result<Self, Error> {
        let params = match resolve_budget(&device) {
            Ok(params) => params,
            Err(err) => {
                tracing::error!(
                    error = err.as_ref() as &dyn std::error::Error,
                    "adapter initialization failed, continuing in debug mode"
                );
                return Self::without_firmware(device, config);
            }
        };

        let vfres = params.vfres;
        let kind = config.interrupts.initial_kind();
        let plan = AdapterPlan::size(&vfres, kind);

        let mut ports = Vec::new();
        let mut pmask = port_mask(&device, &vfres);
        for pidx in 0..plan.num_ports {
            if pmask == 0 {
                break;
            }
            let port_id = pmask.trailing_zeros() as u8;
            pmask &= pmask - 1;
            let mut port = Port::new(pidx, port_id);
            let r = init_port(&device, &vfres, &mut port);
            // Keep the port even on failure so its VI is freed below.
            ports.push(port);
            if let Err(err) = r {
                free_vis(&device, &mut ports);
                return Err(err);
            }
        }

        let is_10g: Vec<bool> = ports
            .iter()
            .map(|p| p.link_cfg.pcaps.is_x_10g())
            .collect();
        let mut layout = QueueSetLayout::distribute(plan, device.num_cpus(), &is_10g);
        let mode = match enable_interrupts(&device, config.interrupts, &vfres, &mut layout) {
            Ok(mode) => mode,
            Err(err) => {
                free_vis(&device, &mut ports);
                return Err(err);
            }
        };
        if layout.ports.len() < ports.len() {
            let mut dropped = ports.split_off(layout.ports.len());
            free_vis(&device, &mut dropped);
        }
        for (port, qsets) in ports.iter_mut().zip(&layout.ports) {
            port.first_qset = qsets.first_qset;
            port.nqsets = qsets.nqsets;
        }
        let sge = Sge::new(params.holdoff, layout.plan.max_queue_sets, &layout.ports);

        let mut registered = PortSet::default();
        for port in &ports {
            let r = device
                .set_real_num_queues(port.pidx, port.nqsets)
                .and_then(|()| device.register_netdev(port.pidx));
            if let Err(err) = r {
                tracing::warn!(
                    pidx = port.pidx,
                    error = &err as &dyn std::error::Error,
                    "cannot register net device, skipping"
                );
                continue;
            }
            registered.insert(port.pidx);
            tracing::info!(
                pidx = port.pidx,
                netdev = %device.netdev_name(port.pidx),
                nqsets = port.nqsets,
                "Chelsio VF NIC PCIe {}",
                match mode {
                    InterruptMode::Msix(_) => "MSI-X",
                    InterruptMode::Msi { .. } => "MSI",
                }
            );
        }
        if registered.is_empty() {
            tracing::error!("could not register any net devices");
            mode.disable(&device);
            free_vis(&device, &mut ports);
            return Err(Error::NoNetDevices);
        }

        Ok(Self {
            device,
            config,
            params: Some(params),
            plan: layout.plan,
            ports,
            sge,
            interrupts: Some(mode),
            bound: None,
            state: LifecycleState::Cold,
            open_ports: PortSet::default(),
            registered,
            full_init_done: false,
            stats_lock: Mutex::new(HashMacList::default()),
        })
    }

    fn without_firmware(device: T, config: DriverConfig) -> Result<Self, Error> {
        let ports = vec![Port::new(0, 0)];
        let mut registered = PortSet::default();
        match device.register_netdev(0) {
            Ok(()) => {
                registered.insert(0);
            }
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "could not register any net devices"
                );
                return Err(Error::NoNetDevices);
            }
        }
        Ok(Self {
            device,
            config,
            params: None,
            plan: AdapterPlan {
                num_ports: 1,
                max_queue_sets: 0,
            },
            ports,
            sge: Sge::new(HoldoffTables::default(), 0, &[]),
            interrupts: None,
            bound: None,
            state: LifecycleState::Cold,
            open_ports: PortSet::default(),
            registered,
            full_init_done: false,
            stats_lock: Mutex::new(HashMacList::default()),
        })
    }

    /// Closes every port and releases the adapter's queues and interrupts.
    ///
    /// The VIs stay allocated until [`Adapter::remove`].
    pub fn shutdown(&mut self) {
        for pidx in self.open_ports.iter() {
            self.close_port(pidx);
        }
        for pidx in self.registered.iter() {
            self.device.unregister_netdev(pidx);
        }
        self.registered = PortSet::default();
        if self.params.is_none() {
            return;
        }
        self.device.sge_stop();
        if let Some(mode) = self.interrupts.take() {
            mode.disable(&self.device);
        }
        if self.full_init_done {
            self.sge.free(&self.device);
        }
    }

    /// Tears the adapter down and returns its backing device.
    pub fn remove(mut self) -> T {
        self.shutdown();
        free_vis(&self.device, &mut self.ports);
        self.stats_lock.get_mut().clear();
        let Self { device, .. } = self;
        device
    }

    /// Returns the backing device.
    pub fn device(&self) -> &T {
        &self.device
    }

    /// Returns the configuration the adapter was probed with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns what the firmware reported, or `None` if the firmware is not
    /// usable.
    pub fn params(&self) -> Option<&AdapterParams> {
        self.params.as_ref()
    }

    /// Returns true if the firmware is usable.
    pub fn has_firmware(&self) -> bool {
        self.params.is_some()
    }

    /// Returns the port and queue set counts in use.
    pub fn plan(&self) -> AdapterPlan {
        self.plan
    }

    /// Returns the adapter's ports.
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Returns port `pidx`.
    pub fn port(&self, pidx: usize) -> Result<&Port, Error> {
        self.ports.get(pidx).ok_or(Error::NoSuchPort(pidx))
    }

    /// Returns the queue set state.
    pub fn sge(&self) -> &Sge {
        &self.sge
    }

    /// Returns the enabled interrupt mechanism.
    pub fn interrupt_mode(&self) -> Option<&InterruptMode> {
        self.interrupts.as_ref()
    }

    /// Returns the number of interrupt vectors bound to handlers.
    pub fn bound_vectors(&self) -> usize {
        self.bound.as_ref().map_or(0, |b| b.len())
    }

    /// Returns a copy of the inexact MAC filter list.
    pub fn hash_mac_list(&self) -> Vec<HashMacEntry> {
        self.stats_lock.lock().entries().to_vec()
    }

    pub(crate) fn viid(&self, pidx: usize) -> Result<u16, Error> {
        self.port(pidx)?.viid.ok_or(Error::NoFirmware)
    }
}

/// Returns the ports the VF should drive: those the PF assigned a MAC address
/// to, or every accessible port if there are none.
fn port_mask(device: &impl DeviceBacking, vfres: &VfResources) -> u32 {
    let mut mask = 0;
    let mut pmask = vfres.pmask;
    while pmask != 0 {
        let port_id = pmask.trailing_zeros();
        pmask &= pmask - 1;
        if let Ok(Some(_)) = device.get_vf_mac_acl(port_id as u8) {
            mask |= 1 << port_id;
        }
    }
    if mask != 0 {
        mask
    } else {
        vfres.pmask
    }
}

fn init_port(
    device: &impl DeviceBacking,
    vfres: &VfResources,
    port: &mut Port,
) -> Result<(), Error> {
    let viid = device
        .alloc_vi(port.port_id)
        .map_err(Error::firmware("alloc_vi"))?;
    port.viid = Some(viid);
    let info = device
        .port_init(viid)
        .map_err(Error::firmware("port_init"))?;
    port.mac = info.mac;
    port.rss_size = info.rss_size;
    port.link_cfg = info.link_cfg;
    port.mod_type = info.mod_type;

    match device.get_vf_mac_acl(port.port_id) {
        Ok(Some(mac)) if vfres.nvi == 1 => {
            tracing::info!(pidx = port.pidx, %mac, "using MAC address assigned by the PF");
            port.mac = mac;
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(
                pidx = port.pidx,
                error = &err as &dyn std::error::Error,
                "unable to determine MAC ACL address, continuing anyway"
            );
        }
    }
    tracing::debug!(pidx = port.pidx, port_id = port.port_id, viid, "port initialized");
    Ok(())
}

fn free_vis(device: &impl DeviceBacking, ports: &mut [Port]) {
    for port in ports {
        if let Some(viid) = port.viid.take() {
            if let Err(err) = device.free_vi(viid) {
                tracing::warn!(
                    viid,
                    error = &err as &dyn std::error::Error,
                    "failed to free virtual interface"
                );
            }
        }
    }
}
