// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Control path of a driver for Chelsio T4/T5/T6 SR-IOV virtual function NICs.
//!
//! The driver sizes the VF's ports and queue sets from the resources the PF
//! provisioned, selects an interrupt mechanism, allocates the SGE queues on
//! first use and routes firmware events. The firmware mailbox, queue contexts,
//! interrupts and network stack are reached through [`DeviceBacking`].

#![forbid(unsafe_code)]

mod adapter;
mod backing;
mod budget;
mod config;
mod error;
mod fw_event;
mod interrupts;
mod lifecycle;
mod mac_filter;
mod netdev;
mod plan;
mod queues;

#[cfg(test)]
mod emulated;

pub use adapter::Adapter;
pub use adapter::Features;
pub use adapter::Port;
pub use backing::DeviceBacking;
pub use backing::IngressInterrupt;
pub use backing::IngressKind;
pub use backing::IrqBacking;
pub use backing::Mailbox;
pub use backing::NetStack;
pub use backing::QueueIds;
pub use backing::RspQueueId;
pub use backing::RxQueueIds;
pub use backing::RxQueueRequest;
pub use backing::SgeBacking;
pub use backing::TxQueueRequest;
pub use budget::resolve_budget;
pub use budget::AdapterParams;
pub use budget::HoldoffTables;
pub use config::ConfigError;
pub use config::DriverConfig;
pub use config::InterruptPolicy;
pub use error::Errno;
pub use error::Error;
pub use fw_event::egress_update_target;
pub use fw_event::EgressUpdateError;
pub use fw_event::FirmwareMessage;
pub use fw_event::TruncatedMessage;
pub use interrupts::enable_interrupts;
pub use interrupts::request_irqs;
pub use interrupts::InterruptKind;
pub use interrupts::InterruptMode;
pub use interrupts::IrqArena;
pub use interrupts::IrqBinding;
pub use interrupts::MsixInfo;
pub use lifecycle::LifecycleState;
pub use lifecycle::PortSet;
pub use mac_filter::HashMacEntry;
pub use mac_filter::HashMacList;
pub use netdev::Coalesce;
pub use netdev::NetDeviceStats;
pub use netdev::RingParams;
pub use netdev::RxModeUpdate;
pub use plan::AdapterPlan;
pub use plan::PortQueueSets;
pub use plan::QueueSetLayout;
pub use queues::EgressQueue;
pub use queues::EthRxQueue;
pub use queues::EthTxQueue;
pub use queues::FreeList;
pub use queues::RspQueue;
pub use queues::Sge;
