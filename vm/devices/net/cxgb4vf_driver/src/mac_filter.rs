// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unicast and multicast address filtering.
//!
//! Addresses go into the exact match TCAM while it has room. Once it is full
//! they are tracked in an adapter-wide list and matched by the VI's 64-bit
//! inexact hash filter instead.

use crate::adapter::Adapter;
use crate::backing::DeviceBacking;
use crate::backing::Mailbox;
use crate::error::Errno;
use crate::error::Error;
use t4vf_defs::mac::MacAddress;

/// An address matched by the inexact hash filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HashMacEntry {
    pub addr: MacAddress,
    /// True if this is an interface address that did not fit in the TCAM.
    pub iface_mac: bool,
}

/// The addresses matched by the inexact hash filter, in insertion order.
#[derive(Debug, Default)]
pub struct HashMacList {
    entries: Vec<HashMacEntry>,
}

impl HashMacList {
    pub fn entries(&self) -> &[HashMacEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns whether any unicast address is present, and the bucket vector
    /// covering every address in the list.
    pub fn hash_vector(&self) -> (bool, u64) {
        self.entries
            .iter()
            .fold((false, 0), |(ucast, vec), entry| {
                (
                    ucast || entry.addr.is_unicast(),
                    vec | 1 << entry.addr.hash_bucket(),
                )
            })
    }

    /// Records `addr` as the interface address, replacing any earlier one.
    pub fn set_iface_mac(&mut self, addr: MacAddress) {
        match self.entries.iter_mut().find(|e| e.iface_mac) {
            Some(entry) => entry.addr = addr,
            None => self.entries.push(HashMacEntry {
                addr,
                iface_mac: true,
            }),
        }
    }

    pub fn push(&mut self, addr: MacAddress) {
        self.entries.push(HashMacEntry {
            addr,
            iface_mac: false,
        });
    }

    /// Removes the first entry for `addr`. Returns false if there was none.
    pub fn remove(&mut self, addr: MacAddress) -> bool {
        match self.entries.iter().position(|e| e.addr == addr) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Programs the VI's hash filter from the whole list.
    fn program(&self, fw: &impl Mailbox, viid: u16) -> Result<(), Error> {
        let (ucast, vec) = self.hash_vector();
        tracing::trace!(viid, ucast, vec, "programming address hash");
        fw.set_addr_hash(viid, ucast, vec)
            .map_err(Error::firmware("set_addr_hash"))
    }
}

impl<T: DeviceBacking> Adapter<T> {
    /// Installs `addr` as port `pidx`'s interface address, falling back to
    /// the hash filter if the TCAM is full.
    pub(crate) fn change_mac(
        &mut self,
        pidx: usize,
        addr: MacAddress,
        persistent: bool,
    ) -> Result<(), Error> {
        let viid = self.viid(pidx)?;
        let port = &mut self.ports[pidx];
        match self
            .device
            .change_mac(viid, port.xact_addr_filt, addr, persistent)
        {
            Ok(idx) => {
                port.xact_addr_filt = Some(idx);
                Ok(())
            }
            Err(Errno::ENOMEM) => {
                tracing::debug!(pidx, %addr, "exact match filters exhausted, using hash filter");
                let mut list = self.stats_lock.lock();
                list.set_iface_mac(addr);
                list.program(&self.device, viid)
            }
            Err(err) => Err(Error::firmware("change_mac")(err)),
        }
    }

    /// Adds a filter for `addr` on port `pidx`.
    pub(crate) fn mac_sync(&self, pidx: usize, addr: MacAddress) -> Result<(), Error> {
        let viid = self.viid(pidx)?;
        match self.device.alloc_mac_filt(viid, addr) {
            Ok(_) => Ok(()),
            Err(Errno::ENOMEM) => {
                let mut list = self.stats_lock.lock();
                list.push(addr);
                list.program(&self.device, viid)
            }
            Err(err) => Err(Error::firmware("alloc_mac_filt")(err)),
        }
    }

    /// Removes the filter for `addr` from port `pidx`.
    pub(crate) fn mac_unsync(&self, pidx: usize, addr: MacAddress) -> Result<(), Error> {
        let viid = self.viid(pidx)?;
        {
            let mut list = self.stats_lock.lock();
            if list.remove(addr) {
                return list.program(&self.device, viid);
            }
        }
        self.device
            .free_mac_filt(viid, addr)
            .map_err(Error::firmware("free_mac_filt"))
    }
}
