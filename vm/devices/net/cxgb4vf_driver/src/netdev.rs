// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-port network device operations.

use crate::adapter::Adapter;
use crate::adapter::Features;
use crate::backing::DeviceBacking;
use crate::error::Error;
use t4vf_defs::fw::LinkConfig;
use t4vf_defs::fw::PauseSettings;
use t4vf_defs::fw::PortModuleType;
use t4vf_defs::fw::RxMode;
use t4vf_defs::mac::MacAddress;
use t4vf_defs::ETH_MAX_MTU;
use t4vf_defs::ETH_MIN_MTU;
use t4vf_defs::MAX_RSPQ_ENTRIES;
use t4vf_defs::MAX_RX_BUFFERS;
use t4vf_defs::MAX_TXQ_ENTRIES;
use t4vf_defs::MIN_FL_ENTRIES;
use t4vf_defs::MIN_FL_RESID;
use t4vf_defs::MIN_RSPQ_ENTRIES;
use t4vf_defs::MIN_TXQ_ENTRIES;

/// Interface counters derived from the VF port statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct NetDeviceStats {
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub multicast: u64,
}

/// Address list changes and flags to apply in [`Adapter::set_rx_mode`].
#[derive(Debug, Clone, Default)]
pub struct RxModeUpdate {
    /// Addresses that left the interface's address lists.
    pub removed: Vec<MacAddress>,
    /// Addresses that joined the interface's address lists.
    pub added: Vec<MacAddress>,
    pub promisc: bool,
    pub all_multi: bool,
}

/// Ring sizes as reported to the host.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RingParams {
    pub rx_max_pending: usize,
    pub rx_mini_max_pending: usize,
    pub tx_max_pending: usize,
    /// Free list buffers.
    pub rx_pending: usize,
    /// Response queue entries.
    pub rx_mini_pending: usize,
    pub rx_jumbo_pending: usize,
    pub tx_pending: usize,
}

/// Interrupt coalescing of a port's receive queues.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Coalesce {
    pub rx_usecs: u32,
    pub rx_max_frames: u32,
}

impl<T: DeviceBacking> Adapter<T> {
    /// Changes the port's MTU.
    pub fn change_mtu(&mut self, pidx: usize, mtu: u32) -> Result<(), Error> {
        if !(ETH_MIN_MTU..=ETH_MAX_MTU).contains(&mtu) {
            return Err(Error::InvalidArgument("mtu out of range"));
        }
        let viid = self.viid(pidx)?;
        self.device
            .set_rxmode(
                viid,
                RxMode {
                    mtu: Some(mtu),
                    ..Default::default()
                },
            )
            .map_err(Error::firmware("set_rxmode"))?;
        self.ports[pidx].mtu = mtu;
        Ok(())
    }

    /// Changes the port's interface address.
    pub fn set_mac_address(&mut self, pidx: usize, addr: MacAddress) -> Result<(), Error> {
        if !addr.is_valid_station() {
            return Err(Error::AddrNotAvail(addr));
        }
        self.change_mac(pidx, addr, true)?;
        self.ports[pidx].mac = addr;
        Ok(())
    }

    /// Returns the port's counters. A failed query reports zeros.
    pub fn get_stats(&self, pidx: usize) -> Result<NetDeviceStats, Error> {
        self.port(pidx)?;
        if !self.has_firmware() {
            return Ok(NetDeviceStats::default());
        }
        let stats = {
            let _guard = self.stats_lock.lock();
            self.device.get_port_stats(pidx)
        };
        let s = match stats {
            Ok(s) => s,
            Err(err) => {
                tracing::debug!(
                    pidx,
                    error = &err as &dyn std::error::Error,
                    "port statistics unavailable"
                );
                return Ok(NetDeviceStats::default());
            }
        };
        Ok(NetDeviceStats {
            tx_bytes: s.tx_bcast_bytes + s.tx_mcast_bytes + s.tx_ucast_bytes + s.tx_offload_bytes,
            tx_packets: s.tx_bcast_frames
                + s.tx_mcast_frames
                + s.tx_ucast_frames
                + s.tx_offload_frames,
            tx_errors: s.tx_drop_frames,
            rx_bytes: s.rx_bcast_bytes + s.rx_mcast_bytes + s.rx_ucast_bytes,
            rx_packets: s.rx_bcast_frames + s.rx_mcast_frames + s.rx_ucast_frames,
            rx_errors: s.rx_err_frames,
            multicast: s.rx_mcast_frames,
        })
    }

    /// Applies address list changes, then the promiscuous and all-multicast
    /// flags.
    pub fn set_rx_mode(&self, pidx: usize, update: &RxModeUpdate) -> Result<(), Error> {
        let viid = self.viid(pidx)?;
        for &addr in &update.removed {
            self.mac_unsync(pidx, addr)?;
        }
        for &addr in &update.added {
            self.mac_sync(pidx, addr)?;
        }
        self.device
            .set_rxmode(
                viid,
                RxMode {
                    promisc: Some(update.promisc),
                    all_multi: Some(update.all_multi),
                    broadcast: Some(true),
                    ..Default::default()
                },
            )
            .map_err(Error::firmware("set_rxmode"))
    }

    /// VLAN insertion cannot be toggled separately from extraction.
    pub fn fix_features(&self, features: Features) -> Features {
        Features {
            vlan_rx: features.vlan_rx,
            vlan_tx: features.vlan_rx,
        }
    }

    pub fn set_features(&mut self, pidx: usize, features: Features) -> Result<(), Error> {
        let features = self.fix_features(features);
        let viid = self.viid(pidx)?;
        if features.vlan_rx != self.ports[pidx].features.vlan_rx {
            self.device
                .set_rxmode(
                    viid,
                    RxMode {
                        vlan_ex: Some(features.vlan_rx),
                        ..Default::default()
                    },
                )
                .map_err(Error::firmware("set_rxmode"))?;
        }
        self.ports[pidx].features = features;
        Ok(())
    }

    pub fn get_ring_parameters(&self, pidx: usize) -> Result<RingParams, Error> {
        let port = self.port(pidx)?;
        let rxq = self
            .sge
            .ethrxq
            .get(port.first_qset)
            .ok_or(Error::NoFirmware)?;
        let txq = &self.sge.ethtxq[port.first_qset];
        Ok(RingParams {
            rx_max_pending: MAX_RX_BUFFERS,
            rx_mini_max_pending: MAX_RSPQ_ENTRIES,
            tx_max_pending: MAX_TXQ_ENTRIES,
            rx_pending: rxq.fl.size - MIN_FL_RESID,
            rx_mini_pending: rxq.rspq.size,
            rx_jumbo_pending: 0,
            tx_pending: txq.size,
        })
    }

    /// Resizes every ring of the port. Only possible before the queues are
    /// first allocated.
    pub fn set_ring_parameters(&mut self, pidx: usize, rp: &RingParams) -> Result<(), Error> {
        let port = self.port(pidx)?;
        if rp.rx_pending > MAX_RX_BUFFERS
            || rp.rx_jumbo_pending != 0
            || rp.tx_pending > MAX_TXQ_ENTRIES
            || rp.rx_mini_pending > MAX_RSPQ_ENTRIES
            || rp.rx_mini_pending < MIN_RSPQ_ENTRIES
            || rp.rx_pending < MIN_FL_ENTRIES
            || rp.tx_pending < MIN_TXQ_ENTRIES
        {
            return Err(Error::InvalidArgument("ring size out of range"));
        }
        if self.full_init_done {
            return Err(Error::Busy);
        }
        if !self.has_firmware() {
            return Err(Error::NoFirmware);
        }
        let qsets = port.qsets();
        for rxq in &mut self.sge.ethrxq[qsets.clone()] {
            rxq.fl.size = rp.rx_pending + MIN_FL_RESID;
            rxq.rspq.size = rp.rx_mini_pending;
        }
        for txq in &mut self.sge.ethtxq[qsets] {
            txq.size = rp.tx_pending;
        }
        Ok(())
    }

    /// Returns the coalescing of the port's first receive queue.
    pub fn get_interrupt_coalesce_params(&self, pidx: usize) -> Result<Coalesce, Error> {
        let port = self.port(pidx)?;
        let rspq = &self
            .sge
            .ethrxq
            .get(port.first_qset)
            .ok_or(Error::NoFirmware)?
            .rspq;
        let holdoff = &self.sge.holdoff;
        Ok(Coalesce {
            rx_usecs: holdoff.timer_us(rspq.intr_params),
            rx_max_frames: if rspq.intr_params.cnt_en() {
                holdoff.counter_val[usize::from(rspq.pktcnt_idx)]
            } else {
                0
            },
        })
    }

    /// Sets the coalescing of the port's first receive queue.
    pub fn set_interrupt_coalesce_params(
        &mut self,
        pidx: usize,
        coalesce: Coalesce,
    ) -> Result<(), Error> {
        let qset = self.port(pidx)?.first_qset;
        let holdoff = self.sge.holdoff;
        let rxq = self.sge.ethrxq.get_mut(qset).ok_or(Error::NoFirmware)?;
        rxq.rspq.set_intr_params(
            &self.device,
            &holdoff,
            coalesce.rx_usecs,
            coalesce.rx_max_frames,
        )
    }

    /// Records a link state change reported by the firmware and updates the
    /// carrier of a running port.
    pub fn link_changed(&mut self, pidx: usize, link_cfg: LinkConfig) {
        let Some(port) = self.ports.get_mut(pidx) else {
            return;
        };
        port.link_cfg = link_cfg;
        if !self.open_ports.contains(pidx) || link_cfg.link_ok == port.carrier {
            return;
        }
        port.carrier = link_cfg.link_ok;
        if link_cfg.link_ok {
            tracing::info!(
                pidx,
                "link up, {}, full-duplex, {} PAUSE",
                speed_name(link_cfg.speed),
                pause_name(link_cfg.fc)
            );
        } else {
            tracing::info!(pidx, "link down");
        }
        self.device.set_carrier(pidx, link_cfg.link_ok);
    }

    /// Records a transceiver module change reported by the firmware.
    pub fn port_module_changed(&mut self, pidx: usize, mod_type: PortModuleType) {
        let Some(port) = self.ports.get_mut(pidx) else {
            return;
        };
        port.mod_type = mod_type;
        match mod_type {
            PortModuleType::NONE => tracing::info!(pidx, "port module unplugged"),
            PortModuleType::UNKNOWN => tracing::warn!(pidx, "unknown port module inserted"),
            PortModuleType::NOTSUPPORTED => {
                tracing::warn!(pidx, "unsupported port module inserted")
            }
            PortModuleType::ERROR => tracing::error!(pidx, "port module error"),
            _ => match mod_type.name() {
                Some(name) => tracing::info!(pidx, "{name} port module inserted"),
                None => tracing::info!(pidx, mod_type = mod_type.0, "port module inserted"),
            },
        }
    }
}

fn speed_name(speed: u32) -> &'static str {
    match speed {
        100 => "100Mbps",
        1000 => "1000Mbps",
        10000 => "10Gbps",
        25000 => "25Gbps",
        40000 => "40Gbps",
        50000 => "50Gbps",
        100000 => "100Gbps",
        _ => "unknown",
    }
}

fn pause_name(fc: PauseSettings) -> &'static str {
    match (fc.rx, fc.tx) {
        (true, true) => "RX/TX",
        (true, false) => "RX",
        (false, true) => "TX",
        (false, false) => "no",
    }
}
