// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SGE queue set state and allocation.

use crate::backing::IngressInterrupt;
use crate::backing::IngressKind;
use crate::backing::Mailbox;
use crate::backing::NetStack;
use crate::backing::QueueIds;
use crate::backing::RspQueueId;
use crate::backing::RxQueueRequest;
use crate::backing::SgeBacking;
use crate::backing::TxQueueRequest;
use crate::budget::HoldoffTables;
use crate::error::Errno;
use crate::error::Error;
use crate::interrupts::InterruptKind;
use crate::plan::PortQueueSets;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use t4vf_defs::fw::FwParam;
use t4vf_defs::fw::IntrParams;
use t4vf_defs::MAX_EGRQ;
use t4vf_defs::MAX_INGQ;
use t4vf_defs::MSIX_ENTRIES;
use t4vf_defs::MSIX_FW;
use t4vf_defs::MSIX_IQFLINT;
use t4vf_defs::SGE_NCOUNTERS;
use t4vf_defs::SGE_TIMER_RSTRT_CNTR;

const RSPQ_DEFAULT_SIZE: usize = 1024;
const FL_DEFAULT_SIZE: usize = 72;
const TXQ_DEFAULT_SIZE: usize = 1024;
const FW_EVTQ_SIZE: usize = 512;
const IQE_LEN: usize = 64;

/// An ingress (response) queue.
#[derive(Debug, Clone)]
pub struct RspQueue {
    pub size: usize,
    pub iqe_len: usize,
    pub intr_params: IntrParams,
    pub pktcnt_idx: u8,
    /// Hardware ids, once allocated.
    pub ids: Option<QueueIds>,
}

impl RspQueue {
    /// A queue using holdoff timer `timer_idx` and, if given, packet count
    /// threshold `pktcnt_idx`.
    pub fn new(timer_idx: u8, pktcnt_idx: Option<u8>, size: usize, iqe_len: usize) -> Self {
        let pktcnt_idx = pktcnt_idx.filter(|&idx| usize::from(idx) < SGE_NCOUNTERS);
        Self {
            size,
            iqe_len,
            intr_params: IntrParams::new()
                .with_timer_idx(timer_idx)
                .with_cnt_en(pktcnt_idx.is_some()),
            pktcnt_idx: pktcnt_idx.unwrap_or(0),
            ids: None,
        }
    }

    /// Applies new interrupt holdoff settings. Zero for both means "interrupt
    /// on every packet".
    ///
    /// A packet count change on an allocated queue is pushed to the firmware
    /// first; if that fails nothing changes.
    pub fn set_intr_params(
        &mut self,
        fw: &impl Mailbox,
        holdoff: &HoldoffTables,
        us: u32,
        mut cnt: u32,
    ) -> Result<(), Error> {
        if us == 0 && cnt == 0 {
            cnt = 1;
        }
        if cnt != 0 {
            let pktcnt_idx = holdoff.closest_thres(cnt);
            if let Some(ids) = self.ids {
                if self.pktcnt_idx != pktcnt_idx {
                    fw.set_params(&[(
                        FwParam::iq_intcntthresh(ids.cntxt_id),
                        pktcnt_idx.into(),
                    )])
                    .map_err(Error::firmware("set_params"))?;
                }
            }
            self.pktcnt_idx = pktcnt_idx;
        }
        let timer_idx = if us == 0 {
            SGE_TIMER_RSTRT_CNTR
        } else {
            holdoff.closest_timer(us)
        };
        self.intr_params = IntrParams::new()
            .with_timer_idx(timer_idx)
            .with_cnt_en(cnt != 0);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FreeList {
    pub size: usize,
    pub ids: Option<QueueIds>,
}

#[derive(Debug, Clone)]
pub struct EthRxQueue {
    pub rspq: RspQueue,
    pub fl: FreeList,
}

#[derive(Debug)]
pub struct EthTxQueue {
    pub size: usize,
    pub ids: Option<QueueIds>,
    /// Port owning the queue.
    pub port: usize,
    /// Index of the queue within its port.
    pub index: usize,
    restarts: AtomicU64,
}

impl EthTxQueue {
    /// Number of times the queue was restarted after running out of
    /// descriptors.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub(crate) fn note_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }
}

/// What an egress queue index refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EgressQueue {
    Tx(usize),
    FreeList(usize),
}

/// The adapter's queue sets plus its firmware event and forwarded interrupt
/// queues.
#[derive(Debug)]
pub struct Sge {
    pub ethrxq: Vec<EthRxQueue>,
    pub ethtxq: Vec<EthTxQueue>,
    pub fw_evtq: RspQueue,
    pub intrq: RspQueue,
    /// Number of queue sets in use.
    pub ethqsets: usize,
    /// Absolute id of egress context 0.
    pub egr_base: u16,
    /// Absolute id of ingress context 0.
    pub ingr_base: u16,
    /// Maps egress context ids to queues.
    pub egr_map: Vec<Option<EgressQueue>>,
    /// Maps ingress context ids to queues.
    pub ingr_map: Vec<Option<RspQueueId>>,
    pub holdoff: HoldoffTables,
    rx_enabled: bool,
}

impl Sge {
    /// Creates default-sized queue sets for `max_queue_sets` queue sets, of
    /// which `ports` are in use.
    pub fn new(holdoff: HoldoffTables, max_queue_sets: usize, ports: &[PortQueueSets]) -> Self {
        let ethrxq = (0..max_queue_sets)
            .map(|_| EthRxQueue {
                rspq: RspQueue::new(0, Some(0), RSPQ_DEFAULT_SIZE, IQE_LEN),
                fl: FreeList {
                    size: FL_DEFAULT_SIZE,
                    ids: None,
                },
            })
            .collect();
        let mut ethtxq: Vec<_> = (0..max_queue_sets)
            .map(|_| EthTxQueue {
                size: TXQ_DEFAULT_SIZE,
                ids: None,
                port: 0,
                index: 0,
                restarts: AtomicU64::new(0),
            })
            .collect();
        for (pidx, port) in ports.iter().enumerate() {
            for (index, txq) in ethtxq
                .iter_mut()
                .skip(port.first_qset)
                .take(port.nqsets)
                .enumerate()
            {
                txq.port = pidx;
                txq.index = index;
            }
        }

        Self {
            ethrxq,
            ethtxq,
            fw_evtq: RspQueue::new(SGE_TIMER_RSTRT_CNTR, Some(0), FW_EVTQ_SIZE, IQE_LEN),
            intrq: RspQueue::new(SGE_TIMER_RSTRT_CNTR, Some(0), MSIX_ENTRIES + 1, IQE_LEN),
            ethqsets: ports.iter().map(|p| p.nqsets).sum(),
            egr_base: 0,
            ingr_base: 0,
            egr_map: vec![None; MAX_EGRQ],
            ingr_map: vec![None; MAX_INGQ],
            holdoff,
            rx_enabled: false,
        }
    }

    /// Allocates the hardware queues: the forwarded interrupt queue (MSI
    /// only), the firmware event queue, then each port's queue sets.
    ///
    /// `ports` holds each port's VI and queue sets. On failure every queue
    /// allocated so far is freed.
    #[tracing::instrument(skip_all, level = "debug", err)]
    pub fn setup_queues(
        &mut self,
        sge: &impl SgeBacking,
        kind: InterruptKind,
        ports: &[(u16, PortQueueSets)],
    ) -> Result<(), Error> {
        let r = self.alloc_queues(sge, kind, ports);
        if r.is_err() {
            self.free(sge);
        }
        r
    }

    fn alloc_queues(
        &mut self,
        sge: &impl SgeBacking,
        kind: InterruptKind,
        ports: &[(u16, PortQueueSets)],
    ) -> Result<(), Error> {
        let forward = if kind == InterruptKind::Msi {
            let ids = sge
                .alloc_rxq(&RxQueueRequest {
                    kind: IngressKind::ForwardedInterrupts,
                    size: self.intrq.size,
                    iqe_len: self.intrq.iqe_len,
                    intr_params: self.intrq.intr_params,
                    pktcnt_idx: self.intrq.pktcnt_idx,
                    intr: IngressInterrupt::Msi,
                    fl_size: None,
                    viid: None,
                })
                .map_err(alloc_err("interrupt queue"))?;
            self.intrq.ids = Some(ids.rspq);
            Some(ids.rspq.abs_id)
        } else {
            None
        };
        let intr = |msix| match forward {
            Some(abs_id) => IngressInterrupt::Forward(abs_id),
            None => IngressInterrupt::Msix(msix),
        };

        let ids = sge
            .alloc_rxq(&RxQueueRequest {
                kind: IngressKind::FirmwareEvents,
                size: self.fw_evtq.size,
                iqe_len: self.fw_evtq.iqe_len,
                intr_params: self.fw_evtq.intr_params,
                pktcnt_idx: self.fw_evtq.pktcnt_idx,
                intr: intr(MSIX_FW),
                fl_size: None,
                viid: None,
            })
            .map_err(alloc_err("firmware event queue"))?;
        self.fw_evtq.ids = Some(ids.rspq);
        let evtq_cntxt = ids.rspq.cntxt_id;

        let mut msix = MSIX_IQFLINT;
        for &(viid, port) in ports {
            for qset in port.first_qset..port.first_qset + port.nqsets {
                let rxq = &mut self.ethrxq[qset];
                let ids = sge
                    .alloc_rxq(&RxQueueRequest {
                        kind: IngressKind::Ethernet { qset },
                        size: rxq.rspq.size,
                        iqe_len: rxq.rspq.iqe_len,
                        intr_params: rxq.rspq.intr_params,
                        pktcnt_idx: rxq.rspq.pktcnt_idx,
                        intr: intr(msix),
                        fl_size: Some(rxq.fl.size),
                        viid: Some(viid),
                    })
                    .map_err(alloc_err("ethernet rx queue"))?;
                msix += 1;
                rxq.rspq.ids = Some(ids.rspq);
                rxq.fl.ids = ids.fl_cntxt_id.map(|cntxt_id| QueueIds {
                    cntxt_id,
                    abs_id: 0,
                });

                let txq = &mut self.ethtxq[qset];
                let ids = sge
                    .alloc_eth_txq(&TxQueueRequest {
                        qset,
                        size: txq.size,
                        viid,
                        iqid: evtq_cntxt,
                    })
                    .map_err(alloc_err("ethernet tx queue"))?;
                txq.ids = Some(ids);
            }
        }

        self.build_maps(ports);
        Ok(())
    }

    /// Derives the absolute id bases and fills the reverse maps.
    fn build_maps(&mut self, ports: &[(u16, PortQueueSets)]) {
        let qsets = || {
            ports
                .iter()
                .flat_map(|(_, p)| p.first_qset..p.first_qset + p.nqsets)
        };
        let Some(first) = qsets().next() else {
            return;
        };
        if let Some(ids) = self.ethtxq[first].ids {
            self.egr_base = ids.abs_id.wrapping_sub(ids.cntxt_id);
        }
        if let Some(ids) = self.ethrxq[first].rspq.ids {
            self.ingr_base = ids.abs_id.wrapping_sub(ids.cntxt_id);
        }

        for qset in qsets() {
            let rxq = &mut self.ethrxq[qset];
            if let Some(fl) = &mut rxq.fl.ids {
                fl.abs_id = fl.cntxt_id.wrapping_add(self.egr_base);
                set_slot(&mut self.egr_map, fl.cntxt_id, EgressQueue::FreeList(qset));
            }
            if let Some(ids) = rxq.rspq.ids {
                set_slot(
                    &mut self.ingr_map,
                    ids.abs_id.wrapping_sub(self.ingr_base),
                    RspQueueId::Ethernet(qset),
                );
            }
            if let Some(ids) = self.ethtxq[qset].ids {
                set_slot(
                    &mut self.egr_map,
                    ids.abs_id.wrapping_sub(self.egr_base),
                    EgressQueue::Tx(qset),
                );
            }
        }
        if let Some(ids) = self.fw_evtq.ids {
            set_slot(
                &mut self.ingr_map,
                ids.abs_id.wrapping_sub(self.ingr_base),
                RspQueueId::FirmwareEvents,
            );
        }
    }

    /// Frees every hardware queue. The ring configuration is kept.
    pub fn free(&mut self, sge: &impl SgeBacking) {
        sge.free_sge_resources();
        for rxq in &mut self.ethrxq {
            rxq.rspq.ids = None;
            rxq.fl.ids = None;
        }
        for txq in &mut self.ethtxq {
            txq.ids = None;
        }
        self.fw_evtq.ids = None;
        self.intrq.ids = None;
        self.egr_map.fill(None);
        self.ingr_map.fill(None);
    }

    /// Returns true if the hardware queues exist.
    pub fn is_allocated(&self) -> bool {
        self.fw_evtq.ids.is_some()
    }

    /// Turns on polling and arms every response queue. Does nothing if that
    /// was already done.
    pub fn enable_rx(&mut self, dev: &(impl SgeBacking + NetStack), kind: InterruptKind) {
        if self.rx_enabled {
            return;
        }
        for (qset, rxq) in self.ethrxq.iter().enumerate().take(self.ethqsets) {
            dev.napi_enable(RspQueueId::Ethernet(qset));
            if let Some(ids) = rxq.rspq.ids {
                dev.arm_ingress(ids.cntxt_id, rxq.rspq.intr_params);
            }
        }
        dev.napi_enable(RspQueueId::FirmwareEvents);
        if let Some(ids) = self.fw_evtq.ids {
            dev.arm_ingress(ids.cntxt_id, self.fw_evtq.intr_params);
        }
        if kind == InterruptKind::Msi {
            if let Some(ids) = self.intrq.ids {
                dev.arm_ingress(ids.cntxt_id, self.intrq.intr_params);
            }
        }
        self.rx_enabled = true;
    }

    /// Turns off polling on every response queue, waiting for in-flight
    /// polls.
    pub fn quiesce_rx(&mut self, dev: &impl NetStack) {
        if !self.rx_enabled {
            return;
        }
        for qset in 0..self.ethqsets {
            dev.napi_disable(RspQueueId::Ethernet(qset));
        }
        dev.napi_disable(RspQueueId::FirmwareEvents);
        self.rx_enabled = false;
    }

    pub fn rx_enabled(&self) -> bool {
        self.rx_enabled
    }
}

fn alloc_err(what: &'static str) -> impl FnOnce(Errno) -> Error {
    move |err| Error::QueueAlloc { what, err }
}

fn set_slot<T>(map: &mut [Option<T>], index: u16, value: T) {
    match map.get_mut(usize::from(index)) {
        Some(slot) => *slot = Some(value),
        None => tracing::warn!(index, "queue id outside of the reverse map"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedVf;

    fn ports() -> Vec<(u16, PortQueueSets)> {
        vec![
            (
                0x10,
                PortQueueSets {
                    first_qset: 0,
                    nqsets: 2,
                },
            ),
            (
                0x11,
                PortQueueSets {
                    first_qset: 2,
                    nqsets: 1,
                },
            ),
        ]
    }

    fn sge() -> Sge {
        let ports: Vec<_> = ports().into_iter().map(|(_, p)| p).collect();
        Sge::new(HoldoffTables::default(), 4, &ports)
    }

    #[test]
    fn defaults() {
        let sge = sge();
        assert_eq!(sge.ethqsets, 3);
        assert_eq!(sge.ethrxq.len(), 4);
        let rxq = &sge.ethrxq[0];
        assert_eq!(rxq.rspq.size, 1024);
        assert_eq!(rxq.rspq.iqe_len, 64);
        assert!(rxq.rspq.intr_params.cnt_en());
        assert_eq!(rxq.rspq.intr_params.timer_idx(), 0);
        assert_eq!(rxq.fl.size, 72);
        assert_eq!(sge.ethtxq[0].size, 1024);
        assert_eq!(sge.fw_evtq.size, 512);
        assert_eq!(sge.fw_evtq.intr_params.timer_idx(), SGE_TIMER_RSTRT_CNTR);
        assert_eq!(sge.intrq.size, MSIX_ENTRIES + 1);
        assert_eq!(
            sge.ethtxq.iter().map(|q| (q.port, q.index)).collect::<Vec<_>>()[..3],
            [(0, 0), (0, 1), (1, 0)]
        );
    }

    #[test]
    fn msix_allocation_and_maps() {
        let vf = EmulatedVf::new();
        let mut sge = sge();
        sge.setup_queues(&vf, InterruptKind::Msix, &ports()).unwrap();

        let state = vf.state();
        // Firmware event queue first, on vector 0.
        assert_eq!(state.rxqs[0].kind, IngressKind::FirmwareEvents);
        assert_eq!(state.rxqs[0].intr, IngressInterrupt::Msix(0));
        let vectors: Vec<_> = state.rxqs[1..].iter().map(|r| r.intr).collect();
        assert_eq!(
            vectors,
            [
                IngressInterrupt::Msix(1),
                IngressInterrupt::Msix(2),
                IngressInterrupt::Msix(3)
            ]
        );
        drop(state);

        for qset in 0..3 {
            let tx = sge.ethtxq[qset].ids.unwrap();
            assert_eq!(
                sge.egr_map[usize::from(tx.abs_id - sge.egr_base)],
                Some(EgressQueue::Tx(qset))
            );
            let fl = sge.ethrxq[qset].fl.ids.unwrap();
            assert_eq!(fl.abs_id, fl.cntxt_id + sge.egr_base);
            assert_eq!(
                sge.egr_map[usize::from(fl.cntxt_id)],
                Some(EgressQueue::FreeList(qset))
            );
        }
        assert!(sge.ethtxq[3].ids.is_none());
        assert!(sge.intrq.ids.is_none());
    }

    #[test]
    fn msi_forwards_to_interrupt_queue() {
        let vf = EmulatedVf::new();
        let mut sge = sge();
        sge.setup_queues(&vf, InterruptKind::Msi, &ports()).unwrap();
        let intrq = sge.intrq.ids.unwrap();
        let state = vf.state();
        assert_eq!(state.rxqs[0].kind, IngressKind::ForwardedInterrupts);
        assert!(state.rxqs[1..]
            .iter()
            .all(|r| r.intr == IngressInterrupt::Forward(intrq.abs_id)));
    }

    #[test]
    fn failed_allocation_frees_everything() {
        let vf = EmulatedVf::new();
        vf.state().fail.alloc_rxq_at = Some((2, Errno::ENOMEM));
        let mut sge = sge();
        let err = sge
            .setup_queues(&vf, InterruptKind::Msix, &ports())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QueueAlloc {
                err: Errno::ENOMEM,
                ..
            }
        ));
        assert!(!sge.is_allocated());
        assert!(sge.ethrxq.iter().all(|q| q.rspq.ids.is_none()));
        assert!(sge.egr_map.iter().all(Option::is_none));
        let state = vf.state();
        assert!(state.rxqs.is_empty());
        assert!(state.txqs.is_empty());
        assert_eq!(state.sge_frees, 1);
    }

    #[test]
    fn enable_rx_is_idempotent() {
        let vf = EmulatedVf::new();
        let mut sge = sge();
        sge.setup_queues(&vf, InterruptKind::Msix, &ports()).unwrap();
        sge.enable_rx(&vf, InterruptKind::Msix);
        sge.enable_rx(&vf, InterruptKind::Msix);
        assert_eq!(vf.state().napi.len(), 4);
        assert_eq!(vf.state().armed.len(), 4);
        sge.quiesce_rx(&vf);
        assert!(vf.state().napi.is_empty());
    }

    #[test]
    fn coalesce_zero_means_every_packet() {
        let vf = EmulatedVf::new();
        let holdoff = HoldoffTables {
            timer_val: [1, 5, 10, 50, 100, 200],
            counter_val: [1, 4, 8, 16],
        };
        let mut rspq = RspQueue::new(0, Some(2), 1024, 64);
        rspq.set_intr_params(&vf, &holdoff, 0, 0).unwrap();
        assert_eq!(rspq.pktcnt_idx, 0);
        assert!(rspq.intr_params.cnt_en());
        assert_eq!(rspq.intr_params.timer_idx(), SGE_TIMER_RSTRT_CNTR);
        // Not allocated, so nothing is sent to the firmware.
        assert!(vf.state().params_set.is_empty());
    }

    #[test]
    fn coalesce_counter_change_reaches_firmware() {
        let vf = EmulatedVf::new();
        let holdoff = HoldoffTables {
            timer_val: [1, 5, 10, 50, 100, 200],
            counter_val: [1, 4, 8, 16],
        };
        let mut rspq = RspQueue::new(0, Some(0), 1024, 64);
        rspq.ids = Some(QueueIds {
            cntxt_id: 7,
            abs_id: 0x107,
        });
        rspq.set_intr_params(&vf, &holdoff, 50, 8).unwrap();
        assert_eq!(rspq.pktcnt_idx, 2);
        assert_eq!(rspq.intr_params.timer_idx(), 3);
        assert_eq!(
            vf.state().params_set,
            [(FwParam::iq_intcntthresh(7), 2)]
        );

        // Timer only.
        rspq.set_intr_params(&vf, &holdoff, 5, 0).unwrap();
        assert!(!rspq.intr_params.cnt_en());
        assert_eq!(rspq.pktcnt_idx, 2);
        assert_eq!(vf.state().params_set.len(), 1);
    }

    #[test]
    fn coalesce_firmware_failure_changes_nothing() {
        let vf = EmulatedVf::new();
        vf.state().fail.set_params = Some(Errno::EIO);
        let holdoff = HoldoffTables {
            timer_val: [1, 5, 10, 50, 100, 200],
            counter_val: [1, 4, 8, 16],
        };
        let mut rspq = RspQueue::new(0, Some(0), 1024, 64);
        rspq.ids = Some(QueueIds {
            cntxt_id: 7,
            abs_id: 0x107,
        });
        assert!(rspq.set_intr_params(&vf, &holdoff, 50, 16).is_err());
        assert_eq!(rspq.pktcnt_idx, 0);
        assert_eq!(rspq.intr_params.timer_idx(), 0);
    }
}
