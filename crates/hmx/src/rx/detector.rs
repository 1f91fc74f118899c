// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RX video format auto-detection.
//!
//! With auto-detect enabled the session ignores the configured width,
//! height and fps and infers them from the stream itself:
//!
//! - resolution from the SRD row-number and row-offset/length maxima,
//! - fps from the first-packet PTP spacing of consecutive frames matched
//!   against the standard rate table,
//! - packing from the SRD shape (full lines vs fixed payload),
//! - interlace from the field bits.
//!
//! No frames are delivered until detection settles; the session then
//! emits a `FormatDetected` event and sizes its buffers.

use crate::types::{Fps, Packing, PixelGroup};
use crate::wire::rfc4175::SampleRowData;

/// Consecutive consistent frames required before the verdict.
const STABLE_FRAMES: usize = 3;
/// Relative tolerance when matching a measured rate to the table (0.5%).
const FPS_TOLERANCE: f64 = 0.005;

/// Detected stream geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedFormat {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub packing: Packing,
    pub interlaced: bool,
}

#[derive(Debug, Default, Clone)]
struct FrameObservation {
    max_row: u16,
    /// widest extent seen on any row: offset + length, in bytes
    max_extent: u32,
    pkts: u32,
    first_pkt_tai: u64,
    /// every packet carried exactly one full-line SRD
    all_single_full_lines: bool,
    /// all payload lengths equal (ignoring the last packet of the frame)
    uniform_payload: Option<u16>,
    mixed_payload: bool,
    second_field_seen: bool,
    first_field_seen: bool,
}

/// The detector: feed every accepted packet until `detected` fires.
#[derive(Debug)]
pub struct FormatDetector {
    pg: PixelGroup,
    cur_ts: Option<u32>,
    cur: FrameObservation,
    done: Vec<FrameObservation>,
    result: Option<DetectedFormat>,
}

impl FormatDetector {
    pub fn new(pg: PixelGroup) -> Self {
        FormatDetector {
            pg,
            cur_ts: None,
            cur: FrameObservation::default(),
            done: Vec::new(),
            result: None,
        }
    }

    /// Detection verdict once stable.
    pub fn detected(&self) -> Option<DetectedFormat> {
        self.result
    }

    /// Feed one packet's SRDs. Returns `Some` the moment detection
    /// settles (exactly once).
    pub fn on_packet(
        &mut self,
        rtp_timestamp: u32,
        tai_ns: u64,
        srds: &[SampleRowData],
    ) -> Option<DetectedFormat> {
        if self.result.is_some() {
            return None;
        }
        match self.cur_ts {
            Some(ts) if ts == rtp_timestamp => {}
            Some(_) => {
                // frame boundary: bank the finished observation
                let prev = std::mem::take(&mut self.cur);
                self.done.push(prev);
                self.cur_ts = Some(rtp_timestamp);
                self.cur.all_single_full_lines = true;
                self.cur.first_pkt_tai = tai_ns;
                if let Some(fmt) = self.try_conclude() {
                    self.result = Some(fmt);
                    return Some(fmt);
                }
            }
            None => {
                self.cur_ts = Some(rtp_timestamp);
                self.cur.all_single_full_lines = true;
                self.cur.first_pkt_tai = tai_ns;
            }
        }

        let obs = &mut self.cur;
        obs.pkts += 1;
        for srd in srds {
            obs.max_row = obs.max_row.max(srd.row_number);
            let extent =
                u32::from(srd.row_offset) / self.pg.coverage * self.pg.size + u32::from(srd.row_length);
            obs.max_extent = obs.max_extent.max(extent);
            if srd.second_field {
                obs.second_field_seen = true;
            } else {
                obs.first_field_seen = true;
            }
            match obs.uniform_payload {
                None => obs.uniform_payload = Some(srd.row_length),
                Some(len) if len != srd.row_length => obs.mixed_payload = true,
                _ => {}
            }
        }
        if srds.len() != 1 || srds[0].row_offset != 0 {
            obs.all_single_full_lines = false;
        }
        None
    }

    fn try_conclude(&mut self) -> Option<DetectedFormat> {
        // the first banked observation is usually a partial frame (we
        // joined mid-stream); skip it for the verdict
        if self.done.len() < STABLE_FRAMES + 1 {
            return None;
        }
        let window = &self.done[self.done.len() - STABLE_FRAMES..];

        // geometry must agree across the window
        let rows = window[0].max_row;
        let extent = window[0].max_extent;
        if !window
            .iter()
            .all(|o| o.max_row == rows && o.max_extent == extent && o.pkts > 0)
        {
            return None;
        }

        let interlaced = window.iter().any(|o| o.second_field_seen)
            && window.iter().any(|o| o.first_field_seen);
        let field_height = u32::from(rows) + 1;
        let height = if interlaced { field_height * 2 } else { field_height };
        let width = extent / self.pg.size * self.pg.coverage;
        if width == 0 || height == 0 {
            return None;
        }

        // fps from median first-packet spacing
        let mut deltas: Vec<u64> = window
            .windows(2)
            .map(|w| w[1].first_pkt_tai.saturating_sub(w[0].first_pkt_tai))
            .filter(|&d| d > 0)
            .collect();
        // include the delta into the current frame
        let last_done = &self.done[self.done.len() - 1];
        if self.cur.first_pkt_tai > last_done.first_pkt_tai {
            deltas.push(self.cur.first_pkt_tai - last_done.first_pkt_tai);
        }
        if deltas.is_empty() {
            return None;
        }
        deltas.sort_unstable();
        let mut period_ns = deltas[deltas.len() / 2];
        if interlaced {
            // two fields per frame interval
            period_ns *= 2;
        }
        let fps = match_fps(period_ns)?;

        // packing from SRD shape
        let line_bytes = width / self.pg.coverage * self.pg.size;
        let packing = if window.iter().all(|o| o.all_single_full_lines)
            && window[0].uniform_payload == Some(line_bytes as u16)
        {
            Packing::GpmSl
        } else if window.iter().all(|o| !o.mixed_payload) {
            Packing::Bpm
        } else {
            Packing::Gpm
        };

        let fmt = DetectedFormat {
            width,
            height,
            fps,
            packing,
            interlaced,
        };
        log::info!(
            "[rx] format detected: {}x{}{} {} {:?}",
            width,
            height,
            if interlaced { "i" } else { "p" },
            fps,
            packing
        );
        Some(fmt)
    }
}

/// Match a measured frame period against the standard rate table.
fn match_fps(period_ns: u64) -> Option<Fps> {
    for fps in Fps::ALL {
        let expect = fps.frame_time_ns() as f64;
        let measured = period_ns as f64;
        if (measured - expect).abs() / expect <= FPS_TOLERANCE {
            return Some(fps);
        }
    }
    None
}
