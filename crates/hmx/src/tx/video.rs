// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2110-20 TX session: frame buffers to a paced RFC 4175 stream.
//!
//! The epoch loop runs once per tasklet tick: read PTP TAI, decide the
//! transmit epoch for the next Ready frame, then emit packets whose
//! scheduled time has come. Redundant sessions emit identical packets
//! (same sequence numbers, same payload) on both ports per ST 2022-7.
//!
//! State machine:
//!
//! ```text
//! Idle --------(Ready frame, tai >= window)--------> Transmitting
//! Transmitting --(last packet built)---------------> Trailing
//! Trailing -----(pending queues drained)-----------> Idle
//! ```
//!
//! A failed NIC enqueue leaves packets in the per-port pending queue and
//! retries next tick (`user_busy` counts the stalls); a queue that makes
//! no progress for the hang budget is reset without losing frames
//! already completed.

use crate::error::{Error, Result};
use crate::io::{Mbuf, PacketIo, PtpClock};
use crate::pacing::{PadTrainer, Pacing};
use crate::ring::{FrameRing, RingDir, SlotIndex, SlotMeta};
use crate::sched::{Tasklet, TickResult};
use crate::session::config::{flags, VideoConfig};
use crate::session::events::{Event, EventQueue};
use crate::stats::TxStats;
use crate::types::{PacingProfile, PixelGroup};
use crate::wire::rfc3550::RtpHeader;
use crate::wire::rfc4175::{Rfc4175Header, SampleRowData, SRD_RETRANSMIT, SRD_USER_META_ROW};
use crate::wire::MAX_RTP_BYTES;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Block-packing payload quantum (divisible by every pixel-group size
/// in the format table).
const BPM_PAYLOAD: usize = 1260;

/// Packets emitted per tick in bulk mode.
const TX_BULK: usize = 4;

/// Pending-queue stall budget before a recovery reset, ns.
const TX_HANG_NS: u64 = 100_000_000;

/// Payload type used for static-padding chaff packets; receivers drop
/// them on the payload-type check before any session state is touched.
pub const PAD_PAYLOAD_TYPE: u8 = 20;

/// Shared half of a TX video session.
pub struct TxVideoShared {
    pub ring: Arc<FrameRing>,
    pub events: EventQueue,
    pub stats: TxStats,
    pub frame_size: usize,
}

/// Packetization geometry.
#[derive(Debug, Clone)]
struct TxGeometry {
    pg: PixelGroup,
    line_stride: usize,
    line_payload: usize,
    buffer_lines: u32,
    expected_payload: usize,
    /// Uniform packet payload (last packet may be short).
    payload_per_pkt: usize,
    pkts_per_frame: u32,
}

impl TxGeometry {
    fn build(cfg: &VideoConfig) -> Result<Self> {
        let pg = cfg.fmt.pixel_group();
        let line_payload = cfg.fmt.line_size(cfg.width)? as usize;
        let line_stride = cfg.line_stride()? as usize;
        if cfg.height == 0 || (cfg.interlaced && cfg.height % 2 != 0) {
            return Err(Error::InvalidDimensions(cfg.width, cfg.height));
        }
        let buffer_lines = if cfg.interlaced {
            cfg.height / 2
        } else {
            cfg.height
        };
        let expected_payload = line_payload * buffer_lines as usize;
        // keep packets within one line boundary crossing: at most 2 SRDs
        let payload_per_pkt = (BPM_PAYLOAD / pg.size as usize * pg.size as usize)
            .min(line_payload)
            .max(pg.size as usize);
        let pkts_per_frame = expected_payload.div_ceil(payload_per_pkt) as u32;
        Ok(TxGeometry {
            pg,
            line_stride,
            line_payload,
            buffer_lines,
            expected_payload,
            payload_per_pkt,
            pkts_per_frame,
        })
    }
}

/// Fixed ring of the last N transmitted packets for RTCP NACK replay.
struct RetransmitRing {
    pkts: Vec<Option<(u16, Vec<u8>)>>,
    mask: usize,
}

impl RetransmitRing {
    fn new(size: usize) -> Self {
        RetransmitRing {
            pkts: (0..size).map(|_| None).collect(),
            mask: size - 1,
        }
    }

    fn store(&mut self, seq: u16, pkt: Vec<u8>) {
        self.pkts[seq as usize & self.mask] = Some((seq, pkt));
    }

    fn get(&self, seq: u16) -> Option<&Vec<u8>> {
        match &self.pkts[seq as usize & self.mask] {
            Some((stored, pkt)) if *stored == seq => Some(pkt),
            _ => None,
        }
    }
}

enum TxState {
    Idle,
    Transmitting {
        slot: SlotIndex,
        meta: SlotMeta,
        epoch: u64,
        first_pkt_tai: u64,
        rtp_ts: u32,
        next_pkt: u32,
        data_since_pad: u32,
        user_meta_sent: bool,
    },
    Trailing {
        slot: SlotIndex,
    },
}

/// The TX session core, owned by its tasklet.
pub struct TxVideoSession {
    cfg: VideoConfig,
    shared: Arc<TxVideoShared>,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    geom: TxGeometry,
    pacing: Pacing,
    state: TxState,
    /// 32-bit packet index; low 16 bits go into the RTP header, high 16
    /// into the extended sequence.
    seq32: u32,
    pad_trainer: Option<PadTrainer>,
    rtx: Option<RetransmitRing>,
    /// Built packets awaiting NIC acceptance, per port.
    pending: Vec<VecDeque<Mbuf>>,
    last_progress_tai: u64,
    last_frame_epoch: u64,
    last_vsync_epoch: u64,
    bulk: usize,
    tsn: bool,
    name: String,
}

impl TxVideoSession {
    pub fn create(
        cfg: VideoConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
    ) -> Result<(Box<TxVideoSession>, Arc<TxVideoShared>)> {
        cfg.validate()?;
        let geom = TxGeometry::build(&cfg)?;
        let frame_size = geom.line_stride * geom.buffer_lines as usize;

        let ring = if cfg.base.has_flag(flags::EXT_BUFFER) {
            FrameRing::new_external(RingDir::Tx, cfg.base.num_buffers)?
        } else {
            FrameRing::new_owned(RingDir::Tx, cfg.base.num_buffers, frame_size)?
        };
        let shared = Arc::new(TxVideoShared {
            ring: Arc::new(ring),
            events: EventQueue::new(),
            stats: TxStats::new(),
            frame_size,
        });

        let mut pacing = Pacing::new(
            cfg.fps,
            cfg.height,
            cfg.interlaced,
            cfg.pacing,
            geom.pkts_per_frame,
        );
        pacing.set_rtp_timestamp_epoch(cfg.base.has_flag(flags::RTP_TIMESTAMP_EPOCH));
        pacing.set_rtp_delta_us(cfg.rtp_timestamp_delta_us);

        let tsn = cfg.pacing == PacingProfile::Tsn;
        if tsn && !io.tsn_capable() {
            return Err(Error::InvalidFormat(
                "TSN pacing needs a launch-time capable backend".into(),
            ));
        }

        let pad_trainer = if cfg.base.has_flag(flags::STATIC_PADDING) {
            // envelope: the narrow VRX limit for this geometry
            let pass = crate::rx::timing::TpPass::new(
                cfg.fps,
                cfg.height,
                cfg.interlaced,
                geom.pkts_per_frame,
            );
            Some(PadTrainer::new(cfg.pad_interval, pass.vrx_max_narrow))
        } else {
            None
        };

        let rtx = if cfg.base.has_flag(flags::ENABLE_RTCP) && cfg.rtcp_buffer_size > 0 {
            Some(RetransmitRing::new(cfg.rtcp_buffer_size))
        } else {
            None
        };

        let session = TxVideoSession {
            pending: (0..cfg.base.ports.len()).map(|_| VecDeque::new()).collect(),
            bulk: if cfg.base.has_flag(flags::DISABLE_BULK) {
                1
            } else {
                TX_BULK
            },
            name: cfg.base.name.clone(),
            state: TxState::Idle,
            seq32: 0,
            pad_trainer,
            rtx,
            last_progress_tai: 0,
            last_frame_epoch: 0,
            last_vsync_epoch: 0,
            tsn,
            shared: Arc::clone(&shared),
            io,
            clock,
            geom,
            pacing,
            cfg,
        };
        log::info!(
            "[tx] session {} created: {} pkts/frame, payload {}B, {:?}",
            session.name,
            session.geom.pkts_per_frame,
            session.geom.payload_per_pkt,
            session.cfg.pacing
        );
        Ok((Box::new(session), shared))
    }

    pub fn shared(&self) -> Arc<TxVideoShared> {
        Arc::clone(&self.shared)
    }

    /// Build the `k`-th data packet of the current frame.
    fn build_packet(&self, k: u32, rtp_ts: u32, frame: &[u8]) -> Vec<u8> {
        let geom = &self.geom;
        let start = k as usize * geom.payload_per_pkt;
        let len = geom.payload_per_pkt.min(geom.expected_payload - start);
        let last = start + len >= geom.expected_payload;

        // split the payload range at line boundaries into SRDs
        let mut srds = Vec::with_capacity(2);
        let mut segs: Vec<(usize, usize)> = Vec::with_capacity(2); // (buf offset, len)
        let mut off = start;
        let mut remaining = len;
        while remaining > 0 {
            let line = off / geom.line_payload;
            let line_off = off % geom.line_payload;
            let seg = remaining.min(geom.line_payload - line_off);
            srds.push(SampleRowData {
                row_length: seg as u16,
                row_number: line as u16,
                row_offset: (line_off / geom.pg.size as usize * geom.pg.coverage as usize) as u16,
                second_field: false,
                retransmit: false,
            });
            segs.push((line * geom.line_stride + line_off, seg));
            off += seg;
            remaining -= seg;
        }

        let hdr = Rfc4175Header {
            rtp: RtpHeader {
                marker: last,
                payload_type: self.cfg.base.payload_type,
                seq: (self.seq32 & 0xffff) as u16,
                timestamp: rtp_ts,
                ssrc: self.cfg.base.ssrc.unwrap_or(0x2110),
            },
            seq_ext: (self.seq32 >> 16) as u16,
            srds,
        };
        let mut buf = vec![0u8; hdr.wire_len() + len];
        let mut at = hdr.encode(&mut buf);
        for (src_off, seg_len) in segs {
            buf[at..at + seg_len].copy_from_slice(&frame[src_off..src_off + seg_len]);
            at += seg_len;
        }
        buf
    }

    /// Minimal pad packet: RTP header only, chaff payload type.
    fn build_pad(&self, rtp_ts: u32) -> Vec<u8> {
        let hdr = RtpHeader {
            marker: false,
            payload_type: PAD_PAYLOAD_TYPE,
            seq: (self.seq32 & 0xffff) as u16,
            timestamp: rtp_ts,
            ssrc: self.cfg.base.ssrc.unwrap_or(0x2110),
        };
        let mut buf = vec![0u8; crate::wire::rfc3550::RTP_HDR_LEN];
        hdr.encode(&mut buf);
        buf
    }

    /// Queue one wire packet on every port (identical content, 2022-7).
    fn enqueue_all_ports(&mut self, data: Vec<u8>, launch_ns: Option<u64>) {
        for (port, q) in self.pending.iter_mut().enumerate() {
            let mut mbuf = Mbuf::new(data.clone());
            mbuf.dst = Some(self.cfg.base.ports[port].addr);
            mbuf.launch_time_ns = if self.tsn { launch_ns } else { None };
            q.push_back(mbuf);
        }
    }

    /// Push pending packets into the NIC; true when progress was made.
    fn flush_pending(&mut self, tai: u64) -> bool {
        let mut progress = false;
        let mut busy = false;
        for (port, q) in self.pending.iter_mut().enumerate() {
            if q.is_empty() {
                continue;
            }
            let batch = q.make_contiguous();
            let accepted = self.io.send(port, batch);
            if accepted > 0 {
                progress = true;
                self.shared
                    .stats
                    .pkts
                    .fetch_add(accepted as u64, Ordering::Relaxed);
                for _ in 0..accepted {
                    if let Some(m) = q.pop_front() {
                        self.shared
                            .stats
                            .bytes
                            .fetch_add(m.data.len() as u64, Ordering::Relaxed);
                    }
                }
            }
            if !q.is_empty() {
                busy = true;
            }
        }
        if progress {
            self.last_progress_tai = tai;
        } else if busy {
            self.shared.stats.user_busy.fetch_add(1, Ordering::Relaxed);
            if self.last_progress_tai != 0 && tai.saturating_sub(self.last_progress_tai) > TX_HANG_NS
            {
                log::warn!("[tx] {}: queue hang, resetting pending packets", self.name);
                for q in &mut self.pending {
                    q.clear();
                }
                self.shared
                    .stats
                    .queue_recoveries
                    .fetch_add(1, Ordering::Relaxed);
                self.last_progress_tai = tai;
            }
        }
        progress
    }

    fn pending_empty(&self) -> bool {
        self.pending.iter().all(VecDeque::is_empty)
    }

    /// Feed a measured VRX peak back into the static-padding trainer
    /// (from a receiver report or a local probe).
    pub fn pad_feedback(&mut self, vrx_peak: i32) {
        let pkts = self.geom.pkts_per_frame;
        if let Some(trainer) = self.pad_trainer.as_mut() {
            trainer.observe(vrx_peak, pkts);
        }
    }

    /// Handle an inbound RTCP compound packet (generic NACK).
    pub fn handle_rtcp(&mut self, data: &[u8]) {
        for seq in parse_generic_nack(data) {
            self.retransmit(seq);
        }
    }

    fn retransmit(&mut self, seq: u16) {
        let Some(rtx) = self.rtx.as_ref() else {
            return;
        };
        let Some(pkt) = rtx.get(seq) else {
            return;
        };
        let mut data = pkt.clone();
        // set the retransmit bit in the first SRD's row_length
        let off = crate::wire::rfc4175::RFC4175_FIXED_LEN;
        if data.len() >= off + 2 {
            let mut row_length = u16::from_be_bytes([data[off], data[off + 1]]);
            row_length |= SRD_RETRANSMIT;
            data[off..off + 2].copy_from_slice(&row_length.to_be_bytes());
        }
        // retransmits bypass pacing: hand straight to the NIC
        for port in 0..self.pending.len() {
            let mut mbuf = Mbuf::new(data.clone());
            mbuf.dst = Some(self.cfg.base.ports[port].addr);
            if self.io.send(port, std::slice::from_ref(&mbuf)) == 0 {
                // busy NIC: fold into the pending queue
                self.pending[port].push_back(mbuf);
            }
        }
        self.shared
            .stats
            .pkts_retransmit
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Begin the next Ready frame, resolving its epoch and schedule.
    fn begin_frame(&mut self, tai: u64) -> bool {
        let Some((slot, meta)) = self.shared.ring.consume_ready() else {
            return false;
        };
        let user_pacing = self.cfg.base.has_flag(flags::USER_PACING);
        let exact = self.cfg.base.has_flag(flags::EXACT_USER_PACING);
        let (mut epoch, mut first_pkt_tai) = if user_pacing && meta.timestamps.capture != 0 {
            self.pacing.resolve_user_pacing(meta.timestamps.capture, exact)
        } else {
            self.pacing.next_epoch(tai)
        };

        // a user-paced frame whose time already passed misses its epoch
        if first_pkt_tai < tai {
            self.shared
                .stats
                .epochs_late
                .fetch_add(1, Ordering::Relaxed);
            self.shared.events.push(Event::FrameLate {
                epoch_skipped: epoch,
            });
            let next = self.pacing.next_epoch(tai);
            epoch = next.0;
            first_pkt_tai = next.1;
        }
        // count epochs that went by with no frame to send
        if self.last_frame_epoch != 0 && epoch > self.last_frame_epoch + 1 {
            let skipped = epoch - self.last_frame_epoch - 1;
            self.shared
                .stats
                .epochs_late
                .fetch_add(skipped, Ordering::Relaxed);
            self.shared.events.push(Event::FrameLate {
                epoch_skipped: self.last_frame_epoch + 1,
            });
        }
        self.last_frame_epoch = epoch;

        let rtp_ts = if self.cfg.base.has_flag(flags::USER_TIMESTAMP) && meta.rtp_timestamp != 0 {
            meta.rtp_timestamp
        } else {
            self.pacing.rtp_timestamp(epoch)
        };
        self.shared.ring.with_meta(slot, |m| {
            m.epoch = epoch;
            m.rtp_timestamp = rtp_ts;
            m.timestamps.wire = first_pkt_tai;
        });
        self.state = TxState::Transmitting {
            slot,
            meta,
            epoch,
            first_pkt_tai,
            rtp_ts,
            next_pkt: 0,
            data_since_pad: 0,
            user_meta_sent: false,
        };
        true
    }

    /// Emit due packets of the in-flight frame. Returns true on work.
    fn pump_frame(&mut self, tai: u64) -> bool {
        let TxState::Transmitting {
            slot,
            meta,
            first_pkt_tai,
            rtp_ts,
            mut next_pkt,
            mut data_since_pad,
            mut user_meta_sent,
            epoch,
        } = std::mem::replace(&mut self.state, TxState::Idle)
        else {
            self.state = TxState::Idle;
            return false;
        };

        let pad_interval = self
            .pad_trainer
            .as_ref()
            .map_or(self.cfg.pad_interval, PadTrainer::pad_interval);

        let mut built = 0usize;
        while next_pkt < self.geom.pkts_per_frame && built < self.bulk {
            // pads and data share the schedule slot count
            let sched = self.pacing.pkt_ns(first_pkt_tai, next_pkt);
            if !self.tsn && sched > tai {
                break;
            }
            // SAFETY: the slot is Transmitting; this tasklet is the only
            // consumer-side owner until release.
            let Some(frame_buf) = (unsafe { self.shared.ring.buffer(slot) }) else {
                break;
            };
            if pad_interval > 0 && data_since_pad >= pad_interval {
                let pad = self.build_pad(rtp_ts);
                self.seq32 = self.seq32.wrapping_add(1);
                self.enqueue_all_ports(pad, Some(sched));
                self.shared.stats.pkts_pad.fetch_add(1, Ordering::Relaxed);
                data_since_pad = 0;
                built += 1;
                continue;
            }
            // the companion goes out ahead of the closing data packet so
            // the receiver still holds the frame open when it lands
            if next_pkt + 1 == self.geom.pkts_per_frame && !user_meta_sent {
                user_meta_sent = true;
                if let Some(user_meta) = meta.user_meta.as_deref() {
                    if !user_meta.is_empty() && user_meta.len() <= MAX_RTP_BYTES {
                        let pkt = self.build_user_meta(rtp_ts, user_meta);
                        self.seq32 = self.seq32.wrapping_add(1);
                        self.enqueue_all_ports(pkt, Some(sched));
                        self.shared
                            .stats
                            .pkts_user_meta
                            .fetch_add(1, Ordering::Relaxed);
                        built += 1;
                        continue;
                    }
                }
            }
            let pkt = self.build_packet(next_pkt, rtp_ts, frame_buf);
            if let Some(rtx) = self.rtx.as_mut() {
                rtx.store((self.seq32 & 0xffff) as u16, pkt.clone());
            }
            self.seq32 = self.seq32.wrapping_add(1);
            self.enqueue_all_ports(pkt, Some(sched));
            next_pkt += 1;
            data_since_pad += 1;
            built += 1;
        }

        if next_pkt >= self.geom.pkts_per_frame {
            self.state = TxState::Trailing { slot };
        } else {
            self.state = TxState::Transmitting {
                slot,
                meta,
                epoch,
                first_pkt_tai,
                rtp_ts,
                next_pkt,
                data_since_pad,
                user_meta_sent,
            };
        }
        built > 0
    }

    /// Companion packet under the session payload type; the sentinel
    /// row number keeps it out of the receiver's frame assembly.
    fn build_user_meta(&self, rtp_ts: u32, payload: &[u8]) -> Vec<u8> {
        let hdr = Rfc4175Header {
            rtp: RtpHeader {
                marker: false,
                payload_type: self.cfg.base.payload_type,
                seq: (self.seq32 & 0xffff) as u16,
                timestamp: rtp_ts,
                ssrc: self.cfg.base.ssrc.unwrap_or(0x2110),
            },
            seq_ext: (self.seq32 >> 16) as u16,
            srds: vec![SampleRowData {
                row_length: payload.len() as u16,
                row_number: SRD_USER_META_ROW,
                row_offset: 0,
                second_field: false,
                retransmit: false,
            }],
        };
        let mut buf = vec![0u8; hdr.wire_len() + payload.len()];
        let at = hdr.encode(&mut buf);
        buf[at..].copy_from_slice(payload);
        buf
    }

    fn vsync(&mut self, tai: u64) {
        if !self.cfg.base.has_flag(flags::ENABLE_VSYNC) {
            return;
        }
        let epoch = self.pacing.epoch_of(tai);
        if epoch != self.last_vsync_epoch {
            self.last_vsync_epoch = epoch;
            self.shared.events.push(Event::Vsync {
                epoch,
                ptp_time: tai,
            });
        }
    }
}

impl Tasklet for TxVideoSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> TickResult {
        if self.shared.events.is_stopped() {
            return TickResult::Idle;
        }
        let tai = self.clock.tai_ns();
        self.vsync(tai);

        let mut any = self.flush_pending(tai);
        let trailing_slot = if let TxState::Trailing { slot } = &self.state {
            Some(*slot)
        } else {
            None
        };
        if let Some(slot) = trailing_slot {
            if self.pending_empty() {
                let _ = self.shared.ring.release(slot);
                self.shared
                    .stats
                    .frames_sent
                    .fetch_add(1, Ordering::Relaxed);
                self.shared.events.push(Event::BufferDone);
                self.shared.events.kick();
                self.state = TxState::Idle;
                any = true;
            }
        } else if matches!(self.state, TxState::Idle) {
            if self.shared.ring.ready_available() && self.begin_frame(tai) {
                any = true;
            }
        } else if self.pump_frame(tai) {
            any = true;
        }
        if any {
            TickResult::Busy
        } else {
            TickResult::Idle
        }
    }
}

/// Parse an RFC 4585 generic NACK (PT 205, FMT 1) into sequence numbers.
fn parse_generic_nack(data: &[u8]) -> Vec<u16> {
    let mut seqs = Vec::new();
    if data.len() < 12 || data[0] >> 6 != 2 {
        return seqs;
    }
    let fmt = data[0] & 0x1f;
    let pt = data[1];
    if pt != 205 || fmt != 1 {
        return seqs;
    }
    let words = u16::from_be_bytes([data[2], data[3]]) as usize;
    let total = (words + 1) * 4;
    if data.len() < total {
        return seqs;
    }
    // FCI entries follow sender + media SSRC
    let mut off = 12;
    while off + 4 <= total {
        let pid = u16::from_be_bytes([data[off], data[off + 1]]);
        let blp = u16::from_be_bytes([data[off + 2], data[off + 3]]);
        seqs.push(pid);
        for bit in 0..16 {
            if blp & (1 << bit) != 0 {
                seqs.push(pid.wrapping_add(bit + 1));
            }
        }
        off += 4;
    }
    seqs
}
