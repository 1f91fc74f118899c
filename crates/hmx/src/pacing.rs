// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TX pacing math: the PTP-aligned epoch clock, ST 2110-21 packet
//! spacing, user-pacing resolution and the static padding trainer.
//!
//! Everything here is pure arithmetic over TAI nanoseconds; the TX
//! session state machine (`tx::video`) asks this module *when* and this
//! module never does I/O.
//!
//! Terminology (ST 2110-21): each frame interval `[E/fps, (E+1)/fps)` is
//! an *epoch*. A sender reserves the window starting `tr_offset` into the
//! epoch and spaces packets `Trs` apart. Narrow and wide senders gap the
//! video blanking interval; linear senders spread packets across the
//! whole frame time.

use crate::types::{Fps, PacingProfile};

/// Active-period ratio and default TR offset per raster height, from the
/// SMPTE ST 2110-21 sender model (total lines vs active lines).
fn raster_timing(height: u32, interlaced: bool) -> (u64, u64, u64) {
    // (active_lines, total_lines, tro_lines)
    let h = if interlaced { height * 2 } else { height };
    if h >= 1080 {
        (1080, 1125, 43)
    } else if h >= 720 {
        (720, 750, 28)
    } else {
        (486, 525, 20)
    }
}

/// Per-session pacing calculator.
#[derive(Debug, Clone)]
pub struct Pacing {
    fps: Fps,
    profile: PacingProfile,
    /// Packets per frame (without padding or user-meta extras).
    pkts_per_frame: u32,
    /// Frame period, ns.
    frame_time_ns: u64,
    /// Reserved window offset into the epoch, ns.
    tr_offset_ns: u64,
    /// Inter-packet spacing, ns (rounded; fractional part is carried by
    /// scheduling from the frame start each time).
    trs_ns: f64,
    /// When true the RTP timestamp is taken from the epoch rather than
    /// the first-packet time.
    rtp_timestamp_epoch: bool,
    /// RTP timestamp adjustment, media ticks.
    rtp_delta_ticks: i32,
}

impl Pacing {
    pub fn new(
        fps: Fps,
        height: u32,
        interlaced: bool,
        profile: PacingProfile,
        pkts_per_frame: u32,
    ) -> Self {
        let frame_time_ns = fps.frame_time_ns();
        let (active, total, tro) = raster_timing(height, interlaced);
        let tr_offset_ns = frame_time_ns * tro / total;
        let trs_ns = match profile {
            PacingProfile::Linear => frame_time_ns as f64 / f64::from(pkts_per_frame.max(1)),
            // narrow, wide and TSN all schedule against the gapped model;
            // wide only relaxes the receiver envelope, TSN delegates the
            // enforcement to the NIC
            _ => {
                (frame_time_ns as f64 * active as f64 / total as f64)
                    / f64::from(pkts_per_frame.max(1))
            }
        };
        Pacing {
            fps,
            profile,
            pkts_per_frame,
            frame_time_ns,
            tr_offset_ns,
            trs_ns,
            rtp_timestamp_epoch: false,
            rtp_delta_ticks: 0,
        }
    }

    /// Enable epoch-derived RTP timestamps (RTP_TIMESTAMP_EPOCH flag).
    pub fn set_rtp_timestamp_epoch(&mut self, on: bool) {
        self.rtp_timestamp_epoch = on;
    }

    /// Apply a user RTP-timestamp delta in microseconds.
    pub fn set_rtp_delta_us(&mut self, delta_us: i32) {
        self.rtp_delta_ticks = (delta_us as i64 * 90 / 1000) as i32;
    }

    pub fn profile(&self) -> PacingProfile {
        self.profile
    }

    pub fn frame_time_ns(&self) -> u64 {
        self.frame_time_ns
    }

    pub fn tr_offset_ns(&self) -> u64 {
        self.tr_offset_ns
    }

    pub fn trs_ns(&self) -> f64 {
        self.trs_ns
    }

    pub fn pkts_per_frame(&self) -> u32 {
        self.pkts_per_frame
    }

    /// Epoch index holding a TAI instant.
    pub fn epoch_of(&self, tai_ns: u64) -> u64 {
        self.fps.epoch_of(tai_ns)
    }

    /// TAI start of an epoch.
    pub fn epoch_start_ns(&self, epoch: u64) -> u64 {
        self.fps.epoch_start_ns(epoch)
    }

    /// Scheduled TAI of the first packet of an epoch's frame.
    pub fn first_pkt_ns(&self, epoch: u64) -> u64 {
        self.epoch_start_ns(epoch) + self.tr_offset_ns
    }

    /// Scheduled TAI of packet `k` of the frame started at
    /// `first_pkt_ns` (fractional Trs accumulated from the frame start,
    /// not per packet, so rounding never drifts).
    pub fn pkt_ns(&self, first_pkt_ns: u64, k: u32) -> u64 {
        first_pkt_ns + (self.trs_ns * f64::from(k)) as u64
    }

    /// RTP timestamp for a frame in an epoch.
    ///
    /// Default is the epoch's media-clock time; senders that stamp the
    /// first-packet time instead get `first_pkt_ns` folded in when the
    /// epoch mode is off.
    pub fn rtp_timestamp(&self, epoch: u64) -> u32 {
        let base = self.fps.rtp_timestamp_of(epoch);
        if self.rtp_timestamp_epoch {
            base.wrapping_add_signed(self.rtp_delta_ticks)
        } else {
            // first-packet time in media ticks relative to the epoch
            let off_ticks = (self.tr_offset_ns as u128 * 90_000 / 1_000_000_000) as u32;
            base.wrapping_add(off_ticks).wrapping_add_signed(self.rtp_delta_ticks)
        }
    }

    /// Decide the transmit epoch for the next frame at time `tai`.
    ///
    /// Returns `(epoch, first_pkt_tai)`. If the current epoch's window
    /// has already opened, the frame targets the *next* epoch (a frame
    /// cannot start mid-window and stay compliant).
    pub fn next_epoch(&self, tai_ns: u64) -> (u64, u64) {
        let cur = self.epoch_of(tai_ns);
        let first = self.first_pkt_ns(cur);
        if tai_ns <= first {
            (cur, first)
        } else {
            (cur + 1, self.first_pkt_ns(cur + 1))
        }
    }

    /// Resolve user pacing for a frame.
    ///
    /// - `exact` (EXACT_USER_PACING): the supplied timestamp is the
    ///   literal first-packet TAI; no epoch alignment.
    /// - otherwise (USER_PACING): the timestamp is a lower bound, rounded
    ///   up to the next epoch boundary; the frame starts at that epoch's
    ///   `tr_offset`.
    pub fn resolve_user_pacing(&self, user_tai_ns: u64, exact: bool) -> (u64, u64) {
        if exact {
            (self.epoch_of(user_tai_ns), user_tai_ns)
        } else {
            let epoch = self.epoch_of(user_tai_ns);
            if self.epoch_start_ns(epoch) == user_tai_ns {
                (epoch, self.first_pkt_ns(epoch))
            } else {
                (epoch + 1, self.first_pkt_ns(epoch + 1))
            }
        }
    }
}

/// Envelope target for the padding trainer (VRX units).
const PAD_TRAIN_MAX_FRAMES: u32 = 8;

/// Static padding trainer for rate-limited NICs whose scheduler cannot
/// hold the narrow VRX envelope without inserted idle packets.
///
/// Feed measured VRX peaks frame by frame; the trainer narrows the pad
/// interval until the peak sits inside the envelope, then locks.
#[derive(Debug, Clone)]
pub struct PadTrainer {
    /// Packets between pad insertions; 0 = no padding.
    pad_interval: u32,
    envelope: i32,
    frames_seen: u32,
    trained: bool,
}

impl PadTrainer {
    /// Start training toward `envelope` (max allowed VRX). An initial
    /// interval of 0 starts from "no padding".
    pub fn new(initial_interval: u32, envelope: i32) -> Self {
        PadTrainer {
            pad_interval: initial_interval,
            envelope,
            frames_seen: 0,
            trained: initial_interval != 0,
        }
    }

    /// Current interval to apply (packets between pads; 0 = none).
    pub fn pad_interval(&self) -> u32 {
        self.pad_interval
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Report a frame's measured VRX peak; adjusts the interval while
    /// training. Returns the interval to use for the next frame.
    pub fn observe(&mut self, vrx_peak: i32, pkts_per_frame: u32) -> u32 {
        if self.trained {
            return self.pad_interval;
        }
        self.frames_seen += 1;
        if vrx_peak <= self.envelope {
            self.trained = true;
            log::info!(
                "[pacing] pad trainer locked interval={} after {} frames",
                self.pad_interval,
                self.frames_seen
            );
        } else if self.pad_interval == 0 {
            // start from sparse padding and tighten from there
            self.pad_interval = pkts_per_frame.max(2) / 2;
        } else if self.pad_interval > 2 {
            self.pad_interval /= 2;
        } else if self.frames_seen >= PAD_TRAIN_MAX_FRAMES {
            // cannot do better; lock at the tightest interval
            self.trained = true;
            log::warn!(
                "[pacing] pad trainer gave up at interval={} vrx_peak={}",
                self.pad_interval,
                vrx_peak
            );
        }
        self.pad_interval
    }
}
