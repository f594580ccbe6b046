// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interrupt mode selection and vector binding.

use crate::backing::IrqBacking;
use crate::config::InterruptPolicy;
use crate::error::Errno;
use crate::error::Error;
use crate::plan::AdapterPlan;
use crate::plan::QueueSetLayout;
use t4vf_defs::fw::VfResources;
use t4vf_defs::MSIX_EXTRAS;
use t4vf_defs::MSIX_FW;
use t4vf_defs::MSIX_IQFLINT;

/// The interrupt mechanism in use, without its vectors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InterruptKind {
    Msix,
    Msi,
}

impl InterruptPolicy {
    /// The mechanism the adapter is sized for before any vectors are
    /// requested.
    pub fn initial_kind(self) -> InterruptKind {
        match self {
            InterruptPolicy::MsixThenMsi => InterruptKind::Msix,
            InterruptPolicy::MsiOnly => InterruptKind::Msi,
        }
    }
}

/// An MSI-X vector granted to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsixInfo {
    pub vector: u32,
    pub desc: String,
}

/// The enabled interrupt mechanism and its vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptMode {
    /// One vector for firmware events and one per queue set.
    Msix(Vec<MsixInfo>),
    /// A single vector; every ingress queue forwards to the interrupt queue.
    Msi { vector: u32 },
}

impl InterruptMode {
    pub fn kind(&self) -> InterruptKind {
        match self {
            InterruptMode::Msix(_) => InterruptKind::Msix,
            InterruptMode::Msi { .. } => InterruptKind::Msi,
        }
    }

    /// Names the MSI-X vectors after the queues they serve.
    ///
    /// `ports` lists each port's interface name with its queue sets.
    pub fn name_vectors<'a>(
        &mut self,
        adapter_name: &str,
        ports: impl IntoIterator<Item = (&'a str, std::ops::Range<usize>)>,
    ) {
        let InterruptMode::Msix(vectors) = self else {
            return;
        };
        if let Some(fw) = vectors.get_mut(MSIX_FW) {
            fw.desc = format!("{adapter_name}-FWeventq");
        }
        for (netdev, qsets) in ports {
            for (qs, qset) in qsets.enumerate() {
                if let Some(info) = vectors.get_mut(MSIX_IQFLINT + qset) {
                    info.desc = format!("{netdev}-{qs}");
                }
            }
        }
    }

    /// Returns the vectors to request, in the order they must be bound: the
    /// firmware event queue first, then `ethqsets` queue sets in order.
    pub fn bindings(&self, adapter_name: &str, ethqsets: usize) -> Vec<IrqBinding> {
        match self {
            InterruptMode::Msix(vectors) => vectors
                .iter()
                .take(MSIX_IQFLINT + ethqsets)
                .map(|info| IrqBinding {
                    vector: info.vector,
                    name: info.desc.clone(),
                })
                .collect(),
            InterruptMode::Msi { vector } => vec![IrqBinding {
                vector: *vector,
                name: adapter_name.to_owned(),
            }],
        }
    }

    /// Turns the mechanism off. Every vector must already be freed.
    pub fn disable(&self, irq: &impl IrqBacking) {
        match self {
            InterruptMode::Msix(_) => irq.disable_msix(),
            InterruptMode::Msi { .. } => irq.disable_msi(),
        }
    }
}

/// Enables MSI-X, or MSI if MSI-X is unavailable or disallowed, adjusting
/// `layout` to what the granted vectors can serve.
///
/// `layout` must have been sized for `policy.initial_kind()`.
pub fn enable_interrupts(
    irq: &impl IrqBacking,
    policy: InterruptPolicy,
    vfres: &VfResources,
    layout: &mut QueueSetLayout,
) -> Result<InterruptMode, Error> {
    if policy == InterruptPolicy::MsixThenMsi {
        match enable_msix(irq, layout) {
            Ok(mode) => return Ok(mode),
            Err(err) => {
                tracing::info!(
                    error = &err as &dyn std::error::Error,
                    "unable to use MSI-X interrupts, falling back to MSI"
                );
            }
        }
        // The forwarded interrupt queue costs one queue set.
        let plan = AdapterPlan::size(vfres, InterruptKind::Msi);
        if plan.num_ports < layout.ports.len() {
            tracing::warn!(
                num_ports = plan.num_ports,
                "MSI leaves too few queue sets for every port"
            );
            layout.shrink_ports(plan.num_ports);
        }
        layout.plan.max_queue_sets = plan.max_queue_sets;
        if layout.total() > plan.max_queue_sets {
            layout.reduce(plan.max_queue_sets);
        }
    }

    let vector = irq.enable_msi().map_err(|err| {
        tracing::error!(
            error = &err as &dyn std::error::Error,
            "unable to allocate MSI interrupts"
        );
        Error::NoInterrupts(err)
    })?;
    Ok(InterruptMode::Msi { vector })
}

fn enable_msix(irq: &impl IrqBacking, layout: &mut QueueSetLayout) -> Result<InterruptMode, Errno> {
    let want = layout.plan.max_queue_sets + MSIX_EXTRAS;
    let need = layout.plan.num_ports + MSIX_EXTRAS;
    let vectors = irq.enable_msix(need, want)?;
    if vectors.len() < need || vectors.len() > want {
        tracing::error!(
            granted = vectors.len(),
            need,
            want,
            "MSI-X grant outside of the requested range"
        );
        irq.disable_msix();
        return Err(Errno::ENOSPC);
    }

    let nqsets = vectors.len() - MSIX_EXTRAS;
    if nqsets < layout.plan.max_queue_sets {
        tracing::warn!(
            nqsets,
            wanted = layout.plan.max_queue_sets,
            "only enough MSI-X vectors for {nqsets} queue sets"
        );
        layout.plan.max_queue_sets = nqsets;
        if nqsets < layout.total() {
            layout.reduce(nqsets);
        }
    }

    Ok(InterruptMode::Msix(
        vectors
            .into_iter()
            .map(|vector| MsixInfo {
                vector,
                desc: String::new(),
            })
            .collect(),
    ))
}

/// A vector to bind and the name to register it under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqBinding {
    pub vector: u32,
    pub name: String,
}

/// The interrupt vectors currently bound to handlers.
///
/// The arena must be released via [`IrqArena::release`]. Vectors are freed
/// in the reverse of the order they were bound. If the arena is dropped
/// without being released, the registrations leak.
#[derive(Debug, Default)]
pub struct IrqArena {
    bound: Vec<IrqBinding>,
}

impl IrqArena {
    /// Creates a new empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no vector is bound.
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    /// Returns the number of bound vectors.
    pub fn len(&self) -> usize {
        self.bound.len()
    }

    fn push(&mut self, binding: IrqBinding) {
        self.bound.push(binding);
    }

    /// Frees every bound vector, most recently bound first.
    pub fn release(mut self, irq: &impl IrqBacking) {
        for binding in self.bound.drain(..).rev() {
            tracing::trace!(vector = binding.vector, name = %binding.name, "freeing irq");
            irq.free_irq(binding.vector);
        }
    }
}

impl Drop for IrqArena {
    fn drop(&mut self) {
        if !self.bound.is_empty() {
            tracing::error!(count = self.bound.len(), "leaking interrupt registrations");
        }
    }
}

/// Binds every vector in `bindings`, in order.
///
/// On failure every vector bound so far is freed and the failing request's
/// error is returned.
pub fn request_irqs(
    irq: &impl IrqBacking,
    bindings: Vec<IrqBinding>,
) -> Result<IrqArena, Error> {
    let mut arena = IrqArena::new();
    for binding in bindings {
        if let Err(err) = irq.request_irq(binding.vector, &binding.name) {
            tracing::error!(
                vector = binding.vector,
                name = %binding.name,
                error = &err as &dyn std::error::Error,
                "request_irq failed"
            );
            arena.release(irq);
            return Err(Error::RequestIrq {
                vector: binding.vector,
                name: binding.name,
                err,
            });
        }
        arena.push(binding);
    }
    Ok(arena)
}
