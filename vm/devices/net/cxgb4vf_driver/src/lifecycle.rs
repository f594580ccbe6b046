// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Port open and close, and the adapter-wide bring-up they drive.
//!
//! The adapter is brought up when the first port opens and brought down when
//! the last one closes. Queue allocation and RSS setup happen only on the
//! first bring-up; the queues then live until the adapter is removed.

use crate::adapter::Adapter;
use crate::backing::DeviceBacking;
use crate::error::Error;
use crate::interrupts::request_irqs;
use crate::plan::PortQueueSets;
use t4vf_defs::fw::RssMode;
use t4vf_defs::fw::RxMode;
use t4vf_defs::MAX_NPORTS;

/// Where the adapter is in its bring-up cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// No port is open and no interrupt handlers are bound.
    Cold,
    /// The first port is opening.
    Warming,
    /// At least one port is open.
    Hot,
    /// The last port is closing.
    Cooling,
}

/// A set of port indices.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PortSet(u32);

impl PortSet {
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(self, pidx: usize) -> bool {
        pidx < MAX_NPORTS && self.0 & (1 << pidx) != 0
    }

    pub fn insert(&mut self, pidx: usize) {
        debug_assert!(pidx < MAX_NPORTS);
        self.0 |= 1 << pidx;
    }

    /// Removes `pidx`. Returns true if the set is now empty.
    pub fn remove(&mut self, pidx: usize) -> bool {
        if pidx < MAX_NPORTS {
            self.0 &= !(1 << pidx);
        }
        self.is_empty()
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_NPORTS).filter(move |&pidx| self.contains(pidx))
    }
}

impl<T: DeviceBacking> Adapter<T> {
    /// Returns the adapter's lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Returns the ports currently open.
    pub fn open_ports(&self) -> PortSet {
        self.open_ports
    }

    /// Returns true once the queues have been allocated and RSS configured.
    pub fn is_fully_initialized(&self) -> bool {
        self.full_init_done
    }

    /// Opens port `pidx`, bringing the adapter up if it is the first.
    ///
    /// If the port cannot be started and no other port is open the adapter
    /// is brought back down.
    #[tracing::instrument(skip(self), level = "debug", err)]
    pub fn open(&mut self, pidx: usize) -> Result<(), Error> {
        if self.params.is_none() {
            return Err(Error::NoFirmware);
        }
        self.port(pidx)?;
        if self.open_ports.contains(pidx) {
            return Ok(());
        }

        let first = self.open_ports.is_empty();
        if first {
            self.adapter_up()?;
        }
        if let Err(err) = self.start_port(pidx) {
            if first {
                self.adapter_down();
            }
            return Err(err);
        }
        self.open_ports.insert(pidx);
        self.state = LifecycleState::Hot;
        Ok(())
    }

    /// Closes port `pidx`, bringing the adapter down if it was the last.
    #[tracing::instrument(skip(self), level = "debug", err)]
    pub fn close(&mut self, pidx: usize) -> Result<(), Error> {
        self.port(pidx)?;
        if self.open_ports.contains(pidx) {
            self.close_port(pidx);
        }
        Ok(())
    }

    /// Quiesces an open port.
    pub(crate) fn close_port(&mut self, pidx: usize) {
        self.device.tx_stop_all(pidx);
        self.device.set_carrier(pidx, false);
        let port = &mut self.ports[pidx];
        port.carrier = false;
        if let Some(viid) = port.viid {
            if let Err(err) = self.device.enable_vi(viid, false, false) {
                tracing::warn!(
                    pidx,
                    error = &err as &dyn std::error::Error,
                    "failed to disable virtual interface"
                );
            }
        }
        if self.open_ports.remove(pidx) {
            self.adapter_down();
        }
    }

    fn adapter_up(&mut self) -> Result<(), Error> {
        self.state = LifecycleState::Warming;
        let r = self.bring_up();
        if r.is_err() {
            self.state = LifecycleState::Cold;
        }
        r
    }

    fn bring_up(&mut self) -> Result<(), Error> {
        let kind = self
            .interrupts
            .as_ref()
            .ok_or(Error::NoFirmware)?
            .kind();

        if !self.full_init_done {
            let mut ports = Vec::with_capacity(self.ports.len());
            for port in &self.ports {
                let viid = port.viid.ok_or(Error::NoFirmware)?;
                ports.push((
                    viid,
                    PortQueueSets {
                        first_qset: port.first_qset,
                        nqsets: port.nqsets,
                    },
                ));
            }
            self.sge.setup_queues(&self.device, kind, &ports)?;
            if let Err(err) = self.setup_rss() {
                self.sge.free(&self.device);
                return Err(err);
            }

            let names: Vec<_> = self
                .ports
                .iter()
                .map(|p| (self.device.netdev_name(p.pidx), p.qsets()))
                .collect();
            if let Some(mode) = &mut self.interrupts {
                mode.name_vectors(
                    self.device.name(),
                    names.iter().map(|(name, qsets)| (name.as_str(), qsets.clone())),
                );
            }
            self.full_init_done = true;
        }

        let bindings = match &self.interrupts {
            Some(mode) => mode.bindings(self.device.name(), self.sge.ethqsets),
            None => return Err(Error::NoFirmware),
        };
        self.bound = Some(request_irqs(&self.device, bindings)?);
        self.sge.enable_rx(&self.device, kind);
        self.device.sge_start();
        tracing::debug!(ethqsets = self.sge.ethqsets, "adapter up");
        Ok(())
    }

    fn adapter_down(&mut self) {
        self.state = LifecycleState::Cooling;
        if let Some(bound) = self.bound.take() {
            bound.release(&self.device);
        }
        self.sge.quiesce_rx(&self.device);
        self.state = LifecycleState::Cold;
        tracing::debug!("adapter down");
    }

    /// Points each port's RSS slots at its response queues.
    fn setup_rss(&self) -> Result<(), Error> {
        let rss = self.params.as_ref().ok_or(Error::NoFirmware)?.rss;
        for port in &self.ports {
            let viid = port.viid.ok_or(Error::NoFirmware)?;
            let queues: Vec<u16> = self.sge.ethrxq[port.qsets()]
                .iter()
                .filter_map(|rxq| rxq.rspq.ids.map(|ids| ids.abs_id))
                .collect();
            let Some(&default_queue) = queues.first() else {
                continue;
            };
            self.device
                .config_rss_range(viid, 0, port.rss_size, &queues)
                .map_err(Error::firmware("config_rss_range"))?;

            if rss.mode == RssMode::BASICVIRTUAL && !rss.tnl_all_lookup {
                let mut config = self
                    .device
                    .read_rss_vi_config(viid)
                    .map_err(Error::firmware("read_rss_vi_config"))?;
                config.default_queue = default_queue;
                self.device
                    .write_rss_vi_config(viid, &config)
                    .map_err(Error::firmware("write_rss_vi_config"))?;
            }
        }
        Ok(())
    }

    /// Refreshes the port's link state and starts it.
    fn start_port(&mut self, pidx: usize) -> Result<(), Error> {
        let viid = self.viid(pidx)?;
        let link_cfg = self
            .device
            .update_port_info(viid)
            .map_err(Error::firmware("update_port_info"))?;
        self.ports[pidx].link_cfg = link_cfg;
        self.link_start(pidx)?;
        self.ports[pidx].vlan_id = self.device.get_vf_vlan_acl();

        let kind = self
            .interrupts
            .as_ref()
            .ok_or(Error::NoFirmware)?
            .kind();
        self.sge.enable_rx(&self.device, kind);
        self.device.tx_start_all(pidx);
        Ok(())
    }

    /// Programs the VI's RX mode and address, then enables it.
    fn link_start(&mut self, pidx: usize) -> Result<(), Error> {
        let viid = self.viid(pidx)?;
        let port = &self.ports[pidx];
        let (mtu, vlan_ex, mac) = (port.mtu, port.features.vlan_rx, port.mac);
        self.device
            .set_rxmode(
                viid,
                RxMode {
                    mtu: Some(mtu),
                    vlan_ex: Some(vlan_ex),
                    ..Default::default()
                },
            )
            .map_err(Error::firmware("set_rxmode"))?;
        self.change_mac(pidx, mac, true)?;
        self.device
            .enable_vi(viid, true, true)
            .map_err(Error::firmware("enable_vi"))
    }
}
