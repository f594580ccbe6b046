// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Port and queue set sizing.

use crate::interrupts::InterruptKind;
use t4vf_defs::fw::VfResources;
use t4vf_defs::MAX_ETH_QSETS;
use t4vf_defs::MAX_NPORTS;

/// How many ports and queue sets the adapter can support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterPlan {
    pub num_ports: usize,
    pub max_queue_sets: usize,
}

impl AdapterPlan {
    /// Sizes the adapter from the VF's resources. MSI needs one more ingress
    /// queue than MSI-X for the forwarded interrupt queue.
    pub fn size(vfres: &VfResources, kind: InterruptKind) -> Self {
        let mut num_ports = vfres.nvi as usize;
        if num_ports > MAX_NPORTS {
            tracing::warn!(
                nvi = vfres.nvi,
                max = MAX_NPORTS,
                "too many virtual interfaces provisioned, only using the maximum"
            );
            num_ports = MAX_NPORTS;
        }
        let usable = vfres.pmask.count_ones() as usize;
        if num_ports > usable {
            tracing::warn!(
                nvi = vfres.nvi,
                pmask = vfres.pmask,
                "more virtual interfaces than accessible ports, only using {usable}"
            );
            num_ports = usable;
        }

        // One ingress queue goes to firmware events, and in MSI mode one more
        // collects forwarded interrupts.
        let reserved = 1 + usize::from(kind == InterruptKind::Msi);
        let mut max_queue_sets = (vfres.niqflint as usize).saturating_sub(reserved);
        let nethctrl = vfres.nethctrl as usize;
        if nethctrl != max_queue_sets {
            max_queue_sets = max_queue_sets.min(nethctrl);
        }
        // Each queue set needs a TX queue and a free list.
        let neq = vfres.neq as usize;
        if neq < max_queue_sets * 2 {
            max_queue_sets = neq / 2;
        }
        max_queue_sets = max_queue_sets.min(MAX_ETH_QSETS);

        if max_queue_sets < num_ports {
            tracing::warn!(
                max_queue_sets,
                num_ports,
                "not enough queue sets for every port, only using {max_queue_sets} ports"
            );
            num_ports = max_queue_sets;
        }

        Self {
            num_ports,
            max_queue_sets,
        }
    }
}

/// The queue sets owned by one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortQueueSets {
    pub first_qset: usize,
    pub nqsets: usize,
}

/// The assignment of queue sets to ports. Each port's queue sets are
/// contiguous and ports appear in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSetLayout {
    pub plan: AdapterPlan,
    pub ports: Vec<PortQueueSets>,
}

impl QueueSetLayout {
    /// Sizes the adapter and distributes its queue sets over ports.
    ///
    /// `is_10g` has one entry per candidate port, in port order; ports beyond
    /// the plan's port count are ignored.
    pub fn new(
        vfres: &VfResources,
        kind: InterruptKind,
        num_cpus: usize,
        is_10g: &[bool],
    ) -> Self {
        Self::distribute(AdapterPlan::size(vfres, kind), num_cpus, is_10g)
    }

    /// Distributes `plan.max_queue_sets` over ports. Ports of 10Gb/s or more
    /// share what is left after every slower port gets one queue set, with no
    /// port getting more queue sets than there are CPUs.
    pub fn distribute(plan: AdapterPlan, num_cpus: usize, is_10g: &[bool]) -> Self {
        let speeds = &is_10g[..is_10g.len().min(plan.num_ports)];
        let n10g = speeds.iter().filter(|&&fast| fast).count();
        let n1g = speeds.len() - n10g;
        let q10g = if n10g == 0 {
            0
        } else {
            (plan.max_queue_sets.saturating_sub(n1g) / n10g).min(num_cpus.max(1))
        };

        let mut layout = Self {
            plan: AdapterPlan {
                num_ports: speeds.len(),
                ..plan
            },
            ports: speeds
                .iter()
                .map(|&fast| PortQueueSets {
                    first_qset: 0,
                    nqsets: if fast { q10g.max(1) } else { 1 },
                })
                .collect(),
        };
        layout.assign_offsets();
        layout
    }

    /// Returns the number of queue sets in use.
    pub fn total(&self) -> usize {
        self.ports.iter().map(|p| p.nqsets).sum()
    }

    /// Lowers the number of queue sets in use to at most `n`, taking one queue
    /// set at a time from each port with more than one, in port order.
    pub fn reduce(&mut self, n: usize) {
        debug_assert!(n >= self.ports.len());
        let n = n.max(self.ports.len());
        let mut total = self.total();
        'outer: while total > n {
            for port in &mut self.ports {
                if port.nqsets > 1 {
                    port.nqsets -= 1;
                    total -= 1;
                    if total <= n {
                        break 'outer;
                    }
                }
            }
        }
        self.assign_offsets();
    }

    /// Drops every port past the first `n`.
    pub fn shrink_ports(&mut self, n: usize) {
        self.ports.truncate(n);
        self.plan.num_ports = self.plan.num_ports.min(n);
    }

    fn assign_offsets(&mut self) {
        let mut next = 0;
        for port in &mut self.ports {
            port.first_qset = next;
            next += port.nqsets;
        }
    }
}
