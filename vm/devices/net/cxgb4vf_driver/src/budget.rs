// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Provisioning queries: what the firmware lets this VF use.

use crate::backing::Mailbox;
use anyhow::Context;
use t4vf_defs::fw::DevParams;
use t4vf_defs::fw::FwParam;
use t4vf_defs::fw::IntrParams;
use t4vf_defs::fw::RssGlobalConfig;
use t4vf_defs::fw::RssMode;
use t4vf_defs::fw::RxThresholds;
use t4vf_defs::fw::SgeParams;
use t4vf_defs::fw::TimerValuePair;
use t4vf_defs::fw::VfResources;
use t4vf_defs::fw::VpdParams;
use t4vf_defs::SGE_NCOUNTERS;
use t4vf_defs::SGE_NTIMERS;

/// Everything learned from the firmware during adapter initialization.
#[derive(Debug, Clone)]
pub struct AdapterParams {
    pub dev: DevParams,
    pub vpd: VpdParams,
    pub sge: SgeParams,
    pub rss: RssGlobalConfig,
    pub vfres: VfResources,
    pub holdoff: HoldoffTables,
}

/// Interrupt holdoff choices offered by the SGE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoldoffTables {
    /// Holdoff timer values, in microseconds.
    pub timer_val: [u32; SGE_NTIMERS],
    /// Packet count thresholds.
    pub counter_val: [u32; SGE_NCOUNTERS],
}

fn core_ticks_to_us(cclk: u32, ticks: u16) -> u32 {
    // cclk is in kHz.
    (u64::from(ticks) * 1000 + u64::from(cclk / 2))
        .checked_div(cclk.into())
        .map_or(0, |us| us as u32)
}

impl HoldoffTables {
    /// Decodes the SGE timer and threshold registers.
    pub fn decode(sge: &SgeParams, cclk: u32) -> Self {
        let mut timer_val = [0; SGE_NTIMERS];
        let pairs = [
            sge.sge_timer_value_0_and_1,
            sge.sge_timer_value_2_and_3,
            sge.sge_timer_value_4_and_5,
        ];
        for (slot, reg) in timer_val.chunks_exact_mut(2).zip(pairs) {
            let pair = TimerValuePair::from(reg);
            slot[0] = core_ticks_to_us(cclk, pair.even());
            slot[1] = core_ticks_to_us(cclk, pair.odd());
        }
        let counter_val = RxThresholds::from(sge.sge_ingress_rx_threshold)
            .to_array()
            .map(u32::from);
        Self {
            timer_val,
            counter_val,
        }
    }

    /// Returns the index of the timer closest to `us`.
    pub fn closest_timer(&self, us: u32) -> u8 {
        closest(&self.timer_val, us)
    }

    /// Returns the index of the packet count threshold closest to `cnt`.
    pub fn closest_thres(&self, cnt: u32) -> u8 {
        closest(&self.counter_val, cnt)
    }

    /// Returns the holdoff time selected by `intr_params`, in microseconds.
    pub fn timer_us(&self, intr_params: IntrParams) -> u32 {
        self.timer_val
            .get(usize::from(intr_params.timer_idx()))
            .copied()
            .unwrap_or(0)
    }
}

fn closest(table: &[u32], target: u32) -> u8 {
    let mut best = 0;
    let mut min_delta = u32::MAX;
    for (i, &v) in table.iter().enumerate() {
        let delta = v.abs_diff(target);
        if delta < min_delta {
            min_delta = delta;
            best = i;
        }
    }
    best as u8
}

/// Runs the firmware initialization sequence and reads the VF's resource
/// budget.
///
/// Any error leaves the adapter unusable for data transfer.
#[tracing::instrument(skip_all, level = "debug", err)]
pub fn resolve_budget(fw: &impl Mailbox) -> anyhow::Result<AdapterParams> {
    fw.fw_reset().context("FW reset failed")?;
    let dev = fw
        .get_dev_params()
        .context("unable to retrieve adapter device parameters")?;
    let vpd = fw
        .get_vpd_params()
        .context("unable to retrieve adapter VPD parameters")?;
    let sge = fw
        .get_sge_params()
        .context("unable to retrieve adapter SGE parameters")?;
    let rss = fw
        .get_rss_glb_config()
        .context("unable to retrieve adapter RSS parameters")?;
    if rss.mode != RssMode::BASICVIRTUAL {
        anyhow::bail!("unable to operate with global RSS mode {}", rss.mode.0);
    }
    fw.sge_init(&sge)
        .context("unable to use adapter parameters")?;

    // Older firmware delivers egress updates as bare CPLs, which the event
    // handler also accepts.
    if let Err(err) = fw.set_params(&[(FwParam::cplfw4msg_encap(), 1)]) {
        tracing::debug!(
            error = &err as &dyn std::error::Error,
            "firmware does not support CPL_FW4_MSG encapsulation"
        );
    }

    let holdoff = HoldoffTables::decode(&sge, vpd.cclk);

    let vfres = fw
        .get_vfres()
        .context("unable to get virtual interface resources")?;
    tracing::info!(?vfres, "VF resources");
    if vfres.pmask == 0 {
        anyhow::bail!("no port access configured/usable");
    }
    if vfres.nvi == 0 {
        anyhow::bail!("no virtual interfaces configured/usable");
    }

    Ok(AdapterParams {
        dev,
        vpd,
        sge,
        rss,
        vfres,
        holdoff,
    })
}
