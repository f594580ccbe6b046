// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware event queue message handling.

use crate::adapter::Adapter;
use crate::backing::DeviceBacking;
use crate::queues::EgressQueue;
use crate::queues::EthTxQueue;
use crate::queues::Sge;
use t4vf_defs::cpl::CplFw4Msg;
use t4vf_defs::cpl::CplFw6Msg;
use t4vf_defs::cpl::CplOpcode;
use t4vf_defs::cpl::CplSgeEgrUpdate;
use t4vf_defs::cpl::Fw6MsgType;
use t4vf_defs::cpl::RssHeader;
use t4vf_defs::cpl::CPL_OFFSET;
use t4vf_defs::MAX_EGRQ;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// A message received on the firmware event queue.
#[derive(Debug, PartialEq, Eq)]
pub enum FirmwareMessage<'a> {
    /// The reply to an earlier mailbox command.
    CmdReply(&'a [u8]),
    /// A `CPL_FW6_MSG` of a type the driver does not consume.
    OtherFw6(u8),
    /// An egress queue has free descriptors again.
    EgressUpdate { qid: u32 },
    /// A `CPL_FW4_MSG` that does not wrap an egress update.
    UnexpectedFw4 { opcode: u8 },
    Unknown { opcode: u8 },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{what} truncated at {len} bytes")]
pub struct TruncatedMessage {
    pub what: &'static str,
    pub len: usize,
}

impl<'a> FirmwareMessage<'a> {
    /// Decodes a response descriptor.
    pub fn parse(rsp: &'a [u8]) -> Result<Self, TruncatedMessage> {
        let truncated = |what| TruncatedMessage {
            what,
            len: rsp.len(),
        };
        let (hdr, _) = RssHeader::read_from_prefix(rsp).map_err(|_| truncated("RSS header"))?;
        let cpl = &rsp[CPL_OFFSET..];
        let msg = match hdr.opcode {
            CplOpcode::FW6_MSG => {
                let (msg, _) =
                    CplFw6Msg::ref_from_prefix(cpl).map_err(|_| truncated("CPL_FW6_MSG"))?;
                if msg.hdr.ty == Fw6MsgType::CMD_RPL.0 {
                    Self::CmdReply(msg.data.as_bytes())
                } else {
                    Self::OtherFw6(msg.hdr.ty)
                }
            }
            CplOpcode::FW4_MSG => {
                let (msg, _) =
                    CplFw4Msg::ref_from_prefix(cpl).map_err(|_| truncated("CPL_FW4_MSG"))?;
                let opcode_qid = msg.egr_update.opcode_qid();
                if opcode_qid.opcode() == CplOpcode::SGE_EGR_UPDATE.0 {
                    Self::EgressUpdate {
                        qid: opcode_qid.qid(),
                    }
                } else {
                    Self::UnexpectedFw4 {
                        opcode: opcode_qid.opcode(),
                    }
                }
            }
            CplOpcode::SGE_EGR_UPDATE => {
                let (msg, _) = CplSgeEgrUpdate::ref_from_prefix(cpl)
                    .map_err(|_| truncated("CPL_SGE_EGR_UPDATE"))?;
                Self::EgressUpdate {
                    qid: msg.opcode_qid().qid(),
                }
            }
            opcode => Self::Unknown { opcode: opcode.0 },
        };
        Ok(msg)
    }
}

/// Why an egress update could not be matched to a TX queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EgressUpdateError {
    #[error("egress queue {qid:#x} is outside of the egress map")]
    OutOfRange { qid: u32 },
    #[error("egress queue {qid:#x} is not a tx queue")]
    NotTxQueue { qid: u32 },
    #[error("egress queue {qid:#x} maps to tx queue {mapped:#x}")]
    Mismatch { qid: u32, mapped: u32 },
}

/// Finds the TX queue with absolute id `qid`.
pub fn egress_update_target(sge: &Sge, qid: u32) -> Result<&EthTxQueue, EgressUpdateError> {
    let index = qid.wrapping_sub(sge.egr_base.into()) as usize;
    if index >= MAX_EGRQ {
        return Err(EgressUpdateError::OutOfRange { qid });
    }
    let Some(Some(EgressQueue::Tx(qset))) = sge.egr_map.get(index) else {
        return Err(EgressUpdateError::NotTxQueue { qid });
    };
    let txq = &sge.ethtxq[*qset];
    let mapped = txq.ids.map_or(u32::MAX, |ids| ids.abs_id.into());
    if mapped != qid {
        return Err(EgressUpdateError::Mismatch { qid, mapped });
    }
    Ok(txq)
}

impl<T: DeviceBacking> Adapter<T> {
    /// Handles one response descriptor from the firmware event queue.
    pub fn handle_fw_event(&self, rsp: &[u8]) {
        let msg = match FirmwareMessage::parse(rsp) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "malformed firmware event"
                );
                return;
            }
        };
        match msg {
            FirmwareMessage::CmdReply(data) => self.device.handle_fw_reply(data),
            FirmwareMessage::OtherFw6(ty) => {
                tracing::debug!(ty, "ignoring firmware message");
            }
            FirmwareMessage::EgressUpdate { qid } => match egress_update_target(&self.sge, qid) {
                Ok(txq) => {
                    txq.note_restart();
                    self.device.tx_wake(txq.port, txq.index);
                }
                Err(err) => {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        "unexpected egress update"
                    );
                }
            },
            FirmwareMessage::UnexpectedFw4 { opcode } => {
                tracing::error!(opcode, "unexpected FW4/CPL on firmware event queue");
            }
            FirmwareMessage::Unknown { opcode } => {
                tracing::error!(opcode, "unexpected CPL on firmware event queue");
            }
        }
    }
}
