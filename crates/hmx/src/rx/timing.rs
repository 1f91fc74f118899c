// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2110-21 receive-side timing parser.
//!
//! Per frame and per port, measures the receiver-model quantities and
//! compares them against the narrow/wide pass criteria:
//!
//! - `cinst` - instantaneous network-compatibility count: packets
//!   received minus packets drained at the sender's Trs since the first
//!   packet of the frame.
//! - `vrx` - virtual receive buffer level: packets received minus
//!   packets drained since the epoch's `tr_offset`.
//! - `ipt` - inter-packet arrival time.
//! - `fpt` - first-packet time relative to the epoch start.
//! - `latency` - arrival TAI minus the RTP timestamp's TAI.
//! - `rtp_offset` / `rtp_ts_delta` - RTP timestamp placement in media
//!   ticks, absolute and frame-to-frame.

use crate::pacing::Pacing;
use crate::types::{Fps, TpCompliant, VIDEO_MEDIA_CLOCK_RATE};

/// Pass criteria, computed from the session's geometry.
#[derive(Debug, Clone)]
pub struct TpPass {
    pub cinst_max_narrow: i32,
    pub cinst_max_wide: i32,
    pub vrx_max_narrow: i32,
    pub vrx_max_wide: i32,
    /// FPT must be below this (the sender's tr_offset), ns.
    pub tr_offset_ns: i64,
    /// Latency window, ns.
    pub latency_max_ns: i64,
    pub latency_min_ns: i64,
    /// RTP offset window, media ticks.
    pub rtp_offset_max: i32,
    pub rtp_offset_min: i32,
    /// Frame-to-frame RTP delta window, media ticks.
    pub rtp_ts_delta_max: i32,
    pub rtp_ts_delta_min: i32,
}

impl TpPass {
    /// Build the pass table for a session (ST 2110-21 receiver models;
    /// the 43200/21600/27000/300 drain constants are the standard's).
    pub fn new(fps: Fps, height: u32, interlaced: bool, pkts_per_frame: u32) -> Self {
        let frame_time_s = fps.frame_time_ns() as f64 / 1e9;
        let pacing = Pacing::new(
            fps,
            height,
            interlaced,
            crate::types::PacingProfile::Narrow,
            pkts_per_frame,
        );
        let n = f64::from(pkts_per_frame);
        let ticks = fps.ticks_per_frame() as i32;
        let tro_ticks =
            (pacing.tr_offset_ns() as u128 * VIDEO_MEDIA_CLOCK_RATE as u128 / 1_000_000_000) as i32;
        TpPass {
            cinst_max_narrow: (n / (43_200.0 * frame_time_s)).ceil().max(4.0) as i32,
            cinst_max_wide: (n / (21_600.0 * frame_time_s)).ceil().max(16.0) as i32,
            vrx_max_narrow: (n / (27_000.0 * frame_time_s)).ceil().max(8.0) as i32,
            vrx_max_wide: (n / (300.0 * frame_time_s)).ceil().max(720.0) as i32,
            // one Trs of slack so a sender launching exactly at TRO passes
            tr_offset_ns: pacing.tr_offset_ns() as i64 + pacing.trs_ns() as i64,
            latency_max_ns: 1_000_000,
            latency_min_ns: 0,
            rtp_offset_max: tro_ticks + 1,
            rtp_offset_min: -1,
            rtp_ts_delta_max: ticks + 1,
            rtp_ts_delta_min: ticks - 1,
        }
    }
}

/// Per-frame aggregates, one instance per port.
#[derive(Debug, Clone, Default)]
pub struct TpMeta {
    pub cinst_max: i32,
    pub cinst_min: i32,
    pub cinst_avg: f32,
    pub vrx_max: i32,
    pub vrx_min: i32,
    pub vrx_avg: f32,
    pub ipt_max_ns: i32,
    pub ipt_min_ns: i32,
    pub ipt_avg_ns: f32,
    pub fpt_ns: i64,
    pub latency_ns: i64,
    pub rtp_offset: i32,
    pub rtp_ts_delta: i32,
    pub pkts_cnt: u32,
    pub compliant: Option<TpCompliant>,
    pub failed_cause: Option<String>,
}

/// Running state of the parser for one port.
#[derive(Debug)]
pub struct TimingParser {
    fps: Fps,
    trs_ns: f64,
    pass: TpPass,
    // current-frame accumulators
    meta: TpMeta,
    cinst_sum: f64,
    vrx_sum: f64,
    ipt_sum: f64,
    first_pkt_tai: u64,
    prev_pkt_tai: u64,
    epoch_start_ns: u64,
    prev_rtp_ts: Option<u32>,
    in_frame: bool,
}

impl TimingParser {
    pub fn new(fps: Fps, height: u32, interlaced: bool, pkts_per_frame: u32) -> Self {
        let pacing = Pacing::new(
            fps,
            height,
            interlaced,
            crate::types::PacingProfile::Narrow,
            pkts_per_frame,
        );
        TimingParser {
            fps,
            trs_ns: pacing.trs_ns(),
            pass: TpPass::new(fps, height, interlaced, pkts_per_frame),
            meta: TpMeta::default(),
            cinst_sum: 0.0,
            vrx_sum: 0.0,
            ipt_sum: 0.0,
            first_pkt_tai: 0,
            prev_pkt_tai: 0,
            epoch_start_ns: 0,
            prev_rtp_ts: None,
            in_frame: false,
        }
    }

    pub fn pass(&self) -> &TpPass {
        &self.pass
    }

    /// Feed one accepted packet of the current frame.
    pub fn on_packet(&mut self, tai_ns: u64, rtp_timestamp: u32) {
        if !self.in_frame {
            self.begin_frame(tai_ns, rtp_timestamp);
        }
        let meta = &mut self.meta;
        meta.pkts_cnt += 1;
        let n = meta.pkts_cnt as f64;

        // cinst: received minus drained since first packet at Trs rate
        let drained_c = (tai_ns - self.first_pkt_tai) as f64 / self.trs_ns;
        let cinst = (n - drained_c).ceil().max(0.0) as i32;
        meta.cinst_max = meta.cinst_max.max(cinst);
        meta.cinst_min = meta.cinst_min.min(cinst);
        self.cinst_sum += f64::from(cinst);
        meta.cinst_avg = (self.cinst_sum / n) as f32;

        // vrx: received minus drained since epoch + tr_offset
        let drain_start = self.epoch_start_ns + self.pass.tr_offset_ns as u64;
        let drained_v = if tai_ns > drain_start {
            (tai_ns - drain_start) as f64 / self.trs_ns
        } else {
            0.0
        };
        let vrx = (n - drained_v).ceil() as i32;
        meta.vrx_max = meta.vrx_max.max(vrx);
        meta.vrx_min = meta.vrx_min.min(vrx);
        self.vrx_sum += f64::from(vrx);
        meta.vrx_avg = (self.vrx_sum / n) as f32;

        // inter-packet time
        if meta.pkts_cnt > 1 {
            let ipt = (tai_ns - self.prev_pkt_tai) as i64;
            let ipt = ipt.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
            meta.ipt_max_ns = meta.ipt_max_ns.max(ipt);
            meta.ipt_min_ns = if meta.pkts_cnt == 2 {
                ipt
            } else {
                meta.ipt_min_ns.min(ipt)
            };
            self.ipt_sum += f64::from(ipt);
            meta.ipt_avg_ns = (self.ipt_sum / (n - 1.0)) as f32;
        }
        self.prev_pkt_tai = tai_ns;
    }

    fn begin_frame(&mut self, tai_ns: u64, rtp_timestamp: u32) {
        self.in_frame = true;
        self.meta = TpMeta::default();
        self.cinst_sum = 0.0;
        self.vrx_sum = 0.0;
        self.ipt_sum = 0.0;
        self.first_pkt_tai = tai_ns;
        self.prev_pkt_tai = tai_ns;

        let epoch = self.fps.epoch_of(tai_ns);
        self.epoch_start_ns = self.fps.epoch_start_ns(epoch);
        self.meta.fpt_ns = (tai_ns - self.epoch_start_ns) as i64;

        // latency: arrival minus the RTP timestamp's position on the
        // media clock, unwrapped around the 32-bit tick counter
        let arrival_ticks =
            (tai_ns as u128 * VIDEO_MEDIA_CLOCK_RATE as u128 / 1_000_000_000) as u32;
        let diff_ticks = arrival_ticks.wrapping_sub(rtp_timestamp) as i32;
        self.meta.latency_ns =
            i64::from(diff_ticks) * 1_000_000_000 / VIDEO_MEDIA_CLOCK_RATE as i64;

        // rtp offset: timestamp minus the epoch's media time
        let epoch_ticks = self.fps.rtp_timestamp_of(epoch);
        self.meta.rtp_offset = rtp_timestamp.wrapping_sub(epoch_ticks) as i32;
        if let Some(prev) = self.prev_rtp_ts {
            self.meta.rtp_ts_delta = rtp_timestamp.wrapping_sub(prev) as i32;
        }
        self.prev_rtp_ts = Some(rtp_timestamp);
    }

    /// Close the current frame: attach the verdict and return the meta.
    pub fn finish_frame(&mut self) -> TpMeta {
        self.in_frame = false;
        let mut meta = std::mem::take(&mut self.meta);
        let (compliant, cause) = self.verdict(&meta);
        meta.compliant = Some(compliant);
        meta.failed_cause = cause;
        meta
    }

    fn verdict(&self, meta: &TpMeta) -> (TpCompliant, Option<String>) {
        let p = &self.pass;
        // hard criteria first: these fail the frame outright
        if meta.fpt_ns >= p.tr_offset_ns {
            return (
                TpCompliant::Failed,
                Some(format!("fpt {}ns >= tr_offset {}ns", meta.fpt_ns, p.tr_offset_ns)),
            );
        }
        if meta.latency_ns < p.latency_min_ns || meta.latency_ns > p.latency_max_ns {
            return (
                TpCompliant::Failed,
                Some(format!("latency {}ns outside window", meta.latency_ns)),
            );
        }
        if meta.rtp_offset < p.rtp_offset_min || meta.rtp_offset > p.rtp_offset_max {
            return (
                TpCompliant::Failed,
                Some(format!("rtp_offset {} outside window", meta.rtp_offset)),
            );
        }
        if meta.rtp_ts_delta != 0
            && (meta.rtp_ts_delta < p.rtp_ts_delta_min || meta.rtp_ts_delta > p.rtp_ts_delta_max)
        {
            return (
                TpCompliant::Failed,
                Some(format!("rtp_ts_delta {} outside window", meta.rtp_ts_delta)),
            );
        }
        if meta.cinst_max > p.cinst_max_wide || meta.vrx_max > p.vrx_max_wide {
            return (
                TpCompliant::Failed,
                Some(format!(
                    "cinst {} / vrx {} beyond wide limits",
                    meta.cinst_max, meta.vrx_max
                )),
            );
        }
        if meta.cinst_max <= p.cinst_max_narrow && meta.vrx_max <= p.vrx_max_narrow {
            (TpCompliant::Narrow, None)
        } else {
            (TpCompliant::Wide, None)
        }
    }
}
