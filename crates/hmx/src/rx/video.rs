// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2110-20 RX session: RFC 4175 reassembly into frame slots.
//!
//! Per inbound packet: parse the RFC 4175 header, run the 2022-7 dedup,
//! locate (or open) the in-flight frame keyed by RTP timestamp, write the
//! payload at its SRD offsets, and track completeness. Frames are handed
//! to the application in RTP-timestamp order; incomplete frames are
//! delivered or discarded per the session flags.
//!
//! The session runs entirely on its lcore tasklet. The only structures
//! shared with application threads are the slot ring, the event queue and
//! the statistics, all in [`RxVideoShared`].

use crate::dedup::{DedupMode, DedupState};
use crate::error::{Error, Result};
use crate::io::{DmaEngine, FlowSpec, Mbuf, PacketIo, PtpClock, QueueId};
use crate::ring::{ExtFrame, FrameRing, RingDir, SlotIndex, SlotMeta, SlotTimestamps};
use crate::rx::detector::{DetectedFormat, FormatDetector};
use crate::rx::timing::TimingParser;
use crate::sched::{Tasklet, TickResult};
use crate::session::config::{flags, VideoConfig};
use crate::session::events::{Event, EventQueue};
use crate::stats::RxStats;
use crate::types::{FrameStatus, Fps, PixelGroup, SessionPort};
use crate::wire::rfc4175::{Rfc4175Header, SRD_USER_META_ROW};
use arc_swap::ArcSwapOption;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// In-flight frame slots kept per session (out-of-order window).
pub const RX_OFO_CACHE: usize = 3;

/// Packets pulled from a queue per tick.
const RX_BURST: usize = 64;

/// Nominal BPM payload per packet (multiple of every 4:2:2/4:4:4 pixel
/// group size in the table that divides it; 1260 = ST 2110-20 block
/// packing quantum).
const BPM_PAYLOAD: usize = 1260;

/// DMA offload is only worth the descriptor for payloads this large.
const DMA_MIN_PAYLOAD: usize = 1024;

/// Shared half of an RX video session, visible to application threads.
pub struct RxVideoShared {
    /// Slot ring; absent until format detection settles in auto mode.
    pub ring: ArcSwapOption<FrameRing>,
    pub events: EventQueue,
    pub stats: RxStats,
    /// Published detection verdict.
    pub detected: ArcSwapOption<DetectedFormat>,
    /// Current frame buffer size in bytes (0 until known).
    pub frame_size: AtomicUsize,
}

impl RxVideoShared {
    fn new() -> Self {
        RxVideoShared {
            ring: ArcSwapOption::const_empty(),
            events: EventQueue::new(),
            stats: RxStats::new(),
            detected: ArcSwapOption::const_empty(),
            frame_size: AtomicUsize::new(0),
        }
    }
}

/// Resolved stream geometry (configured, or detected in auto mode).
#[derive(Debug, Clone)]
struct Geometry {
    fps: Fps,
    pg: PixelGroup,
    interlaced: bool,
    /// Line stride in the frame buffer, bytes.
    line_stride: usize,
    /// Payload bytes per line (no stride padding).
    line_payload: usize,
    /// Lines per delivered buffer (field lines when interlaced).
    buffer_lines: u32,
    /// Buffer size = line_stride * buffer_lines.
    frame_size: usize,
    /// Payload bytes expected per frame = line_payload * buffer_lines.
    expected_payload: usize,
    /// Completeness-bitmap chunk size.
    nominal_payload: usize,
    /// ceil(expected_payload / nominal_payload).
    pkts_per_frame: u32,
}

impl Geometry {
    fn build(cfg: &VideoConfig, width: u32, height: u32, fps: Fps, interlaced: bool) -> Result<Self> {
        let pg = cfg.fmt.pixel_group();
        let line_payload = cfg.fmt.line_size(width)? as usize;
        let line_stride = if cfg.linesize == 0 {
            line_payload
        } else {
            cfg.linesize as usize
        };
        if line_stride < line_payload {
            return Err(Error::InvalidDimensions(width, height));
        }
        if height == 0 || (interlaced && height % 2 != 0) {
            return Err(Error::InvalidDimensions(width, height));
        }
        let buffer_lines = if interlaced { height / 2 } else { height };
        let expected_payload = line_payload * buffer_lines as usize;
        let nominal_payload = BPM_PAYLOAD.min(line_payload).max(pg.size as usize);
        let pkts_per_frame = expected_payload.div_ceil(nominal_payload) as u32;
        Ok(Geometry {
            fps,
            pg,
            interlaced,
            line_stride,
            line_payload,
            buffer_lines,
            frame_size: line_stride * buffer_lines as usize,
            expected_payload,
            nominal_payload,
            pkts_per_frame,
        })
    }
}

/// One frame being assembled.
struct InFlight {
    slot: SlotIndex,
    rtp_timestamp: u32,
    /// Completeness bits, one per `nominal_payload` chunk.
    bitmap: Vec<u64>,
    recv_size: usize,
    /// Payload bytes landed per line (slice tracking).
    line_bytes: Vec<u32>,
    lines_ready: u32,
    next_slice_mark: u32,
    first_pkt_tai: u64,
    last_pkt_tai: u64,
    second_field: bool,
    user_meta: Option<Vec<u8>>,
    dma_pending: u32,
    pkts_total: u32,
    pkts_recv: [u32; 2],
}

impl InFlight {
    fn new(slot: SlotIndex, rtp_timestamp: u32, geom: &Geometry, tai: u64) -> Self {
        InFlight {
            slot,
            rtp_timestamp,
            bitmap: vec![0u64; (geom.pkts_per_frame as usize).div_ceil(64)],
            recv_size: 0,
            line_bytes: vec![0u32; geom.buffer_lines as usize],
            lines_ready: 0,
            next_slice_mark: 0,
            first_pkt_tai: tai,
            last_pkt_tai: tai,
            second_field: false,
            user_meta: None,
            dma_pending: 0,
            pkts_total: 0,
            pkts_recv: [0; 2],
        }
    }

    /// Mark the chunk bit covering `offset`; true when newly set.
    fn mark(&mut self, offset: usize, nominal: usize) -> bool {
        let bit = offset / nominal;
        let word = bit / 64;
        if word >= self.bitmap.len() {
            return false;
        }
        let mask = 1u64 << (bit % 64);
        if self.bitmap[word] & mask != 0 {
            return false;
        }
        self.bitmap[word] |= mask;
        true
    }
}

/// External-frame provider callback.
pub type ExtProvider = Box<dyn FnMut() -> Option<ExtFrame> + Send>;

/// The RX session core: owned by its tasklet, never shared.
pub struct RxVideoSession {
    cfg: VideoConfig,
    shared: Arc<RxVideoShared>,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    dma: Option<Arc<dyn DmaEngine>>,
    queues: Vec<QueueId>,
    geom: Option<Geometry>,
    dedup: DedupState,
    detector: Option<FormatDetector>,
    timing: Vec<TimingParser>,
    inflight: VecDeque<InFlight>,
    /// FIFO of frame timestamps with outstanding DMA copies.
    dma_fifo: VecDeque<u32>,
    ext_provider: Option<ExtProvider>,
    ssrc: Option<u32>,
    deliver_incomplete: bool,
    last_epoch: u64,
    scratch: Vec<Mbuf>,
    name: String,
}

impl RxVideoSession {
    /// Create the session: validate, bind RX flows, size the ring.
    ///
    /// Returns the tasklet core plus the shared half for the facade.
    pub fn create(
        cfg: VideoConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
        dma: Option<Arc<dyn DmaEngine>>,
    ) -> Result<(Box<RxVideoSession>, Arc<RxVideoShared>)> {
        cfg.validate()?;
        if cfg.base.has_flag(flags::HDR_SPLIT) && !io.header_split_capable() {
            return Err(Error::HeaderSplitUnsupported);
        }
        if cfg.base.has_flag(flags::DMA_OFFLOAD) && dma.is_none() {
            return Err(Error::InvalidFormat("DMA offload without an engine".into()));
        }

        let shared = Arc::new(RxVideoShared::new());
        let mut queues = Vec::with_capacity(cfg.base.ports.len());
        for (i, port) in cfg.base.ports.iter().enumerate() {
            let flow = FlowSpec {
                dst_ip: port.addr.ip(),
                dst_port: port.addr.port(),
                source_filter: port.source_filter,
            };
            match io.rxq_bind(i, &flow) {
                Ok(q) => queues.push(q),
                Err(e) => {
                    for q in queues {
                        io.rxq_release(q);
                    }
                    return Err(e);
                }
            }
        }

        let external = cfg.base.has_flag(flags::EXT_BUFFER);
        let mut session = RxVideoSession {
            deliver_incomplete: cfg.base.has_flag(flags::RECEIVE_INCOMPLETE_FRAME),
            dedup: DedupState::new(DedupMode::TimestampAndSeq, cfg.base.dedup_threshold),
            detector: if cfg.auto_detect {
                Some(FormatDetector::new(cfg.fmt.pixel_group()))
            } else {
                None
            },
            timing: Vec::new(),
            inflight: VecDeque::with_capacity(RX_OFO_CACHE),
            dma_fifo: VecDeque::new(),
            ext_provider: None,
            ssrc: cfg.base.ssrc,
            last_epoch: 0,
            scratch: Vec::with_capacity(RX_BURST),
            name: cfg.base.name.clone(),
            geom: None,
            shared: Arc::clone(&shared),
            io,
            clock,
            dma,
            queues,
            cfg,
        };

        if !session.cfg.auto_detect {
            let geom = Geometry::build(
                &session.cfg,
                session.cfg.width,
                session.cfg.height,
                session.cfg.fps,
                session.cfg.interlaced,
            )?;
            session.adopt_geometry(geom, external)?;
        }
        log::info!(
            "[rx] session {} created, ports={}, auto_detect={}",
            session.name,
            session.cfg.base.ports.len(),
            session.cfg.auto_detect
        );
        Ok((Box::new(session), shared))
    }

    /// Install the external-frame provider (EXT_BUFFER mode).
    pub fn set_ext_provider(&mut self, provider: ExtProvider) {
        self.ext_provider = Some(provider);
    }

    pub fn shared(&self) -> Arc<RxVideoShared> {
        Arc::clone(&self.shared)
    }

    fn adopt_geometry(&mut self, geom: Geometry, external: bool) -> Result<()> {
        let ring = if external {
            FrameRing::new_external(RingDir::Rx, self.cfg.base.num_buffers)?
        } else {
            FrameRing::new_owned(RingDir::Rx, self.cfg.base.num_buffers, geom.frame_size)?
        };
        self.shared.ring.store(Some(Arc::new(ring)));
        self.shared
            .frame_size
            .store(geom.frame_size, Ordering::Release);
        if self.cfg.timing_parser {
            self.timing = (0..self.cfg.base.ports.len())
                .map(|_| {
                    TimingParser::new(
                        geom.fps,
                        geom.buffer_lines * if geom.interlaced { 2 } else { 1 },
                        geom.interlaced,
                        geom.pkts_per_frame,
                    )
                })
                .collect();
        }
        self.geom = Some(geom);
        Ok(())
    }

    /// Process one UDP payload from `port`.
    pub fn handle_packet(&mut self, data: &[u8], port: SessionPort, tai: u64) {
        let Some((hdr, payload_at)) = Rfc4175Header::decode(data) else {
            self.shared
                .stats
                .pkts_malformed
                .fetch_add(1, Ordering::Relaxed);
            return;
        };

        if hdr.rtp.payload_type != self.cfg.base.payload_type {
            self.shared
                .stats
                .pkts_wrong_pt
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.ssrc {
            None => self.ssrc = Some(hdr.rtp.ssrc),
            Some(ssrc) if ssrc != hdr.rtp.ssrc => {
                self.shared
                    .stats
                    .pkts_wrong_ssrc
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
            _ => {}
        }

        let verdict = self.dedup.check(hdr.rtp.seq, hdr.rtp.timestamp, port);
        if verdict.threshold_override {
            self.shared
                .stats
                .dedup_overrides
                .fetch_add(1, Ordering::Relaxed);
        } else if verdict.drop {
            self.shared
                .stats
                .pkts_redundant_dropped
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        // user-metadata companion packets ride the same payload type,
        // flagged by the sentinel row number; keep them out of the
        // detector and the frame machinery
        if hdr.srds.len() == 1 && hdr.srds[0].row_number == SRD_USER_META_ROW {
            self.handle_user_meta(&hdr, &data[payload_at..]);
            return;
        }

        // auto-detect phase: consume packets for detection only
        if self.geom.is_none() {
            if let Some(det) = self.detector.as_mut() {
                if let Some(fmt) = det.on_packet(hdr.rtp.timestamp, tai, &hdr.srds) {
                    self.finish_detection(fmt);
                }
            }
            return;
        }

        let Some(pos) = self.frame_for(&hdr, tai) else {
            return; // counted inside frame_for
        };
        self.write_payload(pos, &hdr, &data[payload_at..], port, tai);
    }

    fn finish_detection(&mut self, fmt: DetectedFormat) {
        let external = self.cfg.base.has_flag(flags::EXT_BUFFER);
        match Geometry::build(&self.cfg, fmt.width, fmt.height, fmt.fps, fmt.interlaced) {
            Ok(geom) => {
                if let Err(e) = self.adopt_geometry(geom, external) {
                    log::error!("[rx] {}: detected format unusable: {}", self.name, e);
                    self.shared.events.push(Event::Error { code: e.errno() });
                    return;
                }
                self.shared.detected.store(Some(Arc::new(fmt)));
                self.shared.events.push(Event::FormatDetected {
                    width: fmt.width,
                    height: fmt.height,
                    fps: fmt.fps,
                    packing: fmt.packing,
                    interlaced: fmt.interlaced,
                });
            }
            Err(e) => {
                log::error!("[rx] {}: detected format invalid: {}", self.name, e);
                self.shared.events.push(Event::Error { code: e.errno() });
            }
        }
    }

    fn handle_user_meta(&mut self, hdr: &Rfc4175Header, payload: &[u8]) {
        // companion packet: attach to the in-flight frame with the same
        // RTP timestamp; stale ones are dropped silently
        if let Some(frame) = self
            .inflight
            .iter_mut()
            .find(|f| f.rtp_timestamp == hdr.rtp.timestamp)
        {
            frame.user_meta = Some(payload.to_vec());
        }
    }

    /// Locate or open the in-flight frame for this packet. Returns the
    /// cache position.
    fn frame_for(&mut self, hdr: &Rfc4175Header, tai: u64) -> Option<usize> {
        if let Some(pos) = self
            .inflight
            .iter()
            .position(|f| f.rtp_timestamp == hdr.rtp.timestamp)
        {
            return Some(pos);
        }
        // unknown timestamp: older than the newest in flight means the
        // frame is already closed - too late
        if let Some(newest) = self.inflight.back() {
            if !ts_newer(hdr.rtp.timestamp, newest.rtp_timestamp) {
                self.shared
                    .stats
                    .pkts_stale_timestamp
                    .fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
        if self.inflight.len() >= RX_OFO_CACHE {
            self.flush_oldest(tai);
        }
        let ring = self.shared.ring.load_full()?;
        let Some(slot) = ring.acquire_receive() else {
            self.shared.stats.slot_busy.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if self.cfg.base.has_flag(flags::EXT_BUFFER) {
            let ext = self.ext_provider.as_mut().and_then(|p| p());
            match ext {
                Some(ext) => {
                    if ring.attach_external(slot, ext).is_err() {
                        let _ = ring.abort_receive(slot);
                        return None;
                    }
                }
                None => {
                    let _ = ring.abort_receive(slot);
                    self.shared.stats.slot_busy.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
        let geom = self.geom.as_ref().expect("geometry resolved");
        self.inflight
            .push_back(InFlight::new(slot, hdr.rtp.timestamp, geom, tai));
        Some(self.inflight.len() - 1)
    }

    /// Write all SRD segments of a packet into the frame.
    fn write_payload(
        &mut self,
        pos: usize,
        hdr: &Rfc4175Header,
        payload: &[u8],
        port: SessionPort,
        tai: u64,
    ) {
        let geom = self.geom.clone().expect("geometry resolved");
        let ring = match self.shared.ring.load_full() {
            Some(r) => r,
            None => return,
        };
        let stats = &self.shared.stats;

        let mut src_off = 0usize;
        let mut wrote_any = false;
        {
            let frame = &mut self.inflight[pos];
            for srd in &hdr.srds {
                let len = srd.row_length as usize;
                let seg = &payload[src_off..src_off + len];
                src_off += len;

                if srd.second_field {
                    frame.second_field = true;
                }
                let line = srd.row_number as usize;
                let px_off = u32::from(srd.row_offset);
                if line >= geom.buffer_lines as usize
                    || px_off % geom.pg.coverage != 0
                    || (px_off / geom.pg.coverage * geom.pg.size) as usize + len
                        > geom.line_payload
                {
                    stats.pkts_offset_overrun.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let line_off = (px_off / geom.pg.coverage * geom.pg.size) as usize;
                let dst_off = line * geom.line_stride + line_off;
                let payload_off = line * geom.line_payload + line_off;

                if !frame.mark(payload_off, geom.nominal_payload) {
                    // already covered: redundant data (retransmit or
                    // overlap), nothing more to account
                    continue;
                }

                // SAFETY: the slot is Receiving and this tasklet is its
                // only producer.
                let Some(buf) = (unsafe { ring.buffer_mut(frame.slot) }) else {
                    continue;
                };
                let dst = &mut buf[dst_off..dst_off + len];
                let mut copied = false;
                if len >= DMA_MIN_PAYLOAD {
                    if let Some(engine) = self.dma.as_ref() {
                        if engine.copy(dst, seg).is_ok() && engine.submit().is_ok() {
                            frame.dma_pending += 1;
                            self.dma_fifo.push_back(frame.rtp_timestamp);
                            copied = true;
                        } else {
                            stats.dma_fallbacks.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                if !copied {
                    dst.copy_from_slice(seg);
                }

                frame.recv_size += len;
                frame.line_bytes[line] += len as u32;
                wrote_any = true;
            }

            if wrote_any {
                frame.pkts_total += 1;
                frame.pkts_recv[port.index()] += 1;
                frame.last_pkt_tai = tai;
                stats.bytes.fetch_add(src_off as u64, Ordering::Relaxed);
                match port {
                    SessionPort::P => stats.pkts_p.fetch_add(1, Ordering::Relaxed),
                    SessionPort::R => stats.pkts_r.fetch_add(1, Ordering::Relaxed),
                };
            }
        }

        if wrote_any {
            if let Some(tp) = self.timing.get_mut(port.index()) {
                tp.on_packet(tai, hdr.rtp.timestamp);
            }
            self.update_slices(pos, &geom);
            let frame = &self.inflight[pos];
            if frame.recv_size >= geom.expected_payload && frame.dma_pending == 0 {
                self.finalize_at(pos, tai);
            }
        }
    }

    /// Slice mode: emit SliceReady as contiguous top lines complete.
    fn update_slices(&mut self, pos: usize, geom: &Geometry) {
        if self.cfg.slice_lines == 0 {
            return;
        }
        let frame = &mut self.inflight[pos];
        let full = geom.line_payload as u32;
        while (frame.lines_ready as usize) < frame.line_bytes.len()
            && frame.line_bytes[frame.lines_ready as usize] >= full
        {
            frame.lines_ready += 1;
        }
        if frame.lines_ready >= frame.next_slice_mark + self.cfg.slice_lines {
            frame.next_slice_mark = frame.lines_ready - frame.lines_ready % self.cfg.slice_lines;
            let lines_ready = frame.lines_ready;
            self.shared
                .stats
                .slice_events
                .fetch_add(1, Ordering::Relaxed);
            self.shared.events.push(Event::SliceReady {
                lines_ready,
                lines_total: geom.buffer_lines,
            });
        }
    }

    /// Finalize the frame at cache position `pos`, flushing every older
    /// in-flight frame first so promotion stays in order.
    fn finalize_at(&mut self, pos: usize, tai: u64) {
        for _ in 0..pos {
            self.flush_oldest(tai);
        }
        self.flush_oldest(tai);
    }

    /// Close the oldest in-flight frame and promote or discard it.
    fn flush_oldest(&mut self, tai: u64) {
        let Some(mut frame) = self.inflight.pop_front() else {
            return;
        };
        let Some(geom) = self.geom.clone() else {
            return;
        };
        let ring = match self.shared.ring.load_full() {
            Some(r) => r,
            None => return,
        };

        // outstanding DMA copies must land before the buffer is handed
        // over; bounded drain, then fall back to treating them missing
        if frame.dma_pending > 0 {
            if let Some(engine) = self.dma.clone() {
                for _ in 0..1024 {
                    if frame.dma_pending == 0 {
                        break;
                    }
                    let n = engine.poll();
                    self.drain_dma_completions(n, &mut frame);
                }
            }
            if frame.dma_pending > 0 {
                self.shared
                    .stats
                    .dma_fallbacks
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        let stats = &self.shared.stats;
        let complete = frame.recv_size >= geom.expected_payload && frame.dma_pending == 0;
        let redundant_helped = self.cfg.base.redundant() && frame.pkts_recv[0] < frame.pkts_total;
        let status = if complete {
            if redundant_helped {
                FrameStatus::Reconstructed
            } else {
                FrameStatus::Complete
            }
        } else {
            FrameStatus::Incomplete
        };

        let meta = SlotMeta {
            size: frame.recv_size,
            timestamps: SlotTimestamps {
                capture: frame.first_pkt_tai,
                app: tai,
                wire: frame.last_pkt_tai,
            },
            rtp_timestamp: frame.rtp_timestamp,
            epoch: geom.fps.epoch_of(frame.first_pkt_tai),
            status,
            second_field: frame.second_field,
            pkts_total: frame.pkts_total,
            pkts_recv: frame.pkts_recv,
            user_meta: frame.user_meta.take(),
        };

        // timing verdicts close with the frame
        for (port, tp) in self.timing.iter_mut().enumerate() {
            if frame.pkts_recv[port] == 0 {
                continue;
            }
            let report = tp.finish_frame();
            if let Some(compliant) = report.compliant {
                self.shared.events.push(Event::TimingReport {
                    port,
                    compliant,
                    cinst_max: report.cinst_max,
                    vrx_max: report.vrx_max,
                    vrx_min: report.vrx_min,
                    ipt_max_ns: report.ipt_max_ns,
                    ipt_min_ns: report.ipt_min_ns,
                    latency_ns: report.latency_ns as i32,
                    pkts: report.pkts_cnt,
                });
            }
        }

        let deliver = status.is_complete() || self.deliver_incomplete;
        if deliver {
            if ring.promote_ready(frame.slot, meta).is_ok() {
                if status == FrameStatus::Reconstructed {
                    stats.frames_reconstructed.fetch_add(1, Ordering::Relaxed);
                }
                stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                self.shared.events.push(Event::BufferReady);
            }
        } else {
            let _ = ring.promote_discard(frame.slot);
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            self.shared.events.kick();
        }
    }

    fn drain_dma_completions(&mut self, n: usize, current: &mut InFlight) {
        for _ in 0..n {
            let Some(ts) = self.dma_fifo.pop_front() else {
                return;
            };
            if current.rtp_timestamp == ts {
                current.dma_pending = current.dma_pending.saturating_sub(1);
            } else if let Some(f) = self.inflight.iter_mut().find(|f| f.rtp_timestamp == ts) {
                f.dma_pending = f.dma_pending.saturating_sub(1);
            }
        }
    }

    fn poll_dma(&mut self) {
        if self.dma_fifo.is_empty() {
            return;
        }
        let Some(engine) = self.dma.as_ref() else {
            return;
        };
        let n = engine.poll();
        for _ in 0..n {
            let Some(ts) = self.dma_fifo.pop_front() else {
                return;
            };
            if let Some(f) = self.inflight.iter_mut().find(|f| f.rtp_timestamp == ts) {
                f.dma_pending = f.dma_pending.saturating_sub(1);
            }
        }
    }

    /// Close frames that stopped making progress (sender moved on and
    /// the tail never arrived).
    fn expire_stale(&mut self, tai: u64) {
        let Some(geom) = self.geom.as_ref() else {
            return;
        };
        let deadline = 2 * geom.fps.frame_time_ns();
        while let Some(oldest) = self.inflight.front() {
            if tai.saturating_sub(oldest.last_pkt_tai) > deadline {
                self.flush_oldest(tai);
            } else {
                break;
            }
        }
    }

    fn vsync(&mut self, tai: u64) {
        if !self.cfg.base.has_flag(flags::ENABLE_VSYNC) {
            return;
        }
        let Some(geom) = self.geom.as_ref() else {
            return;
        };
        let epoch = geom.fps.epoch_of(tai);
        if epoch != self.last_epoch {
            self.last_epoch = epoch;
            self.shared.events.push(Event::Vsync {
                epoch,
                ptp_time: tai,
            });
        }
    }
}

/// 32-bit modular newer-than.
fn ts_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000_0000
}

impl Tasklet for RxVideoSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> TickResult {
        if self.shared.events.is_stopped() {
            return TickResult::Idle;
        }
        let tai = self.clock.tai_ns();
        self.vsync(tai);
        self.poll_dma();

        let mut any = false;
        for i in 0..self.queues.len() {
            let port = if i == 0 { SessionPort::P } else { SessionPort::R };
            self.scratch.clear();
            let queue = self.queues[i];
            let io = Arc::clone(&self.io);
            let n = io.recv(queue, &mut self.scratch, RX_BURST);
            if n > 0 {
                any = true;
                let pkts = std::mem::take(&mut self.scratch);
                for pkt in &pkts {
                    self.handle_packet(&pkt.data, port, tai);
                }
                self.scratch = pkts;
            }
        }
        self.expire_stale(tai);
        if any {
            TickResult::Busy
        } else {
            TickResult::Idle
        }
    }
}

impl Drop for RxVideoSession {
    fn drop(&mut self) {
        for q in self.queues.drain(..) {
            self.io.rxq_release(q);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Mbuf;
    use crate::session::config::{BaseConfig, Direction, PortAddr};
    use crate::types::St20Fmt;
    use crate::wire::rfc3550::RtpHeader;
    use crate::wire::rfc4175::SampleRowData;
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    /// Loopback PacketIo stub: queues are plain vectors fed by tests.
    #[derive(Default)]
    struct StubIo {
        queues: Mutex<Vec<VecDeque<Mbuf>>>,
    }

    impl PacketIo for StubIo {
        fn send(&self, _port: usize, pkts: &[Mbuf]) -> usize {
            pkts.len()
        }

        fn rxq_bind(&self, _port: usize, _flow: &FlowSpec) -> Result<QueueId> {
            let mut queues = self.queues.lock();
            queues.push(VecDeque::new());
            Ok(QueueId(queues.len() - 1))
        }

        fn rxq_release(&self, _queue: QueueId) {}

        fn recv(&self, queue: QueueId, out: &mut Vec<Mbuf>, budget: usize) -> usize {
            let mut queues = self.queues.lock();
            let q = &mut queues[queue.0];
            let mut n = 0;
            while n < budget {
                match q.pop_front() {
                    Some(m) => {
                        out.push(m);
                        n += 1;
                    }
                    None => break,
                }
            }
            n
        }
    }

    struct FixedClock(u64);

    impl PtpClock for FixedClock {
        fn tai_ns(&self) -> u64 {
            self.0
        }
    }

    const W: u32 = 64;
    const H: u32 = 8;
    const LINE: usize = (W as usize / 2) * 5; // 160 bytes

    fn test_cfg(flags_bits: u32) -> VideoConfig {
        let port = PortAddr {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 0, 0, 9)), 20000),
            source_filter: None,
        };
        let mut base = BaseConfig::new(Direction::Rx, "rx-test", vec![port.clone(), port]);
        base.flags = flags_bits;
        base.payload_type = 112;
        VideoConfig::new(base, W, H, Fps::P50, St20Fmt::Yuv422_10bit)
    }

    fn make_session(flags_bits: u32) -> (Box<RxVideoSession>, Arc<RxVideoShared>) {
        RxVideoSession::create(
            test_cfg(flags_bits),
            Arc::new(StubIo::default()),
            Arc::new(FixedClock(1_000_000_000)),
            None,
        )
        .expect("session created")
    }

    /// Build a full-line RFC 4175 packet.
    fn line_packet(seq: u16, ts: u32, row: u16, fill: u8, marker: bool) -> Vec<u8> {
        let hdr = Rfc4175Header {
            rtp: RtpHeader {
                marker,
                payload_type: 112,
                seq,
                timestamp: ts,
                ssrc: 0x1234,
            },
            seq_ext: 0,
            srds: vec![SampleRowData {
                row_length: LINE as u16,
                row_number: row,
                row_offset: 0,
                second_field: false,
                retransmit: false,
            }],
        };
        let mut buf = vec![0u8; hdr.wire_len() + LINE];
        let at = hdr.encode(&mut buf);
        buf[at..].fill(fill);
        buf
    }

    fn feed_frame(session: &mut RxVideoSession, ts: u32, seq0: u16, port: SessionPort, tai: u64) {
        for row in 0..H as u16 {
            let pkt = line_packet(seq0 + row, ts, row, (ts & 0xff) as u8, row == H as u16 - 1);
            session.handle_packet(&pkt, port, tai + u64::from(row) * 1000);
        }
    }

    #[test]
    fn test_complete_frame_delivered() {
        let (mut session, shared) = make_session(0);
        feed_frame(&mut session, 90_000, 0, SessionPort::P, 5_000_000_000);
        // completion promotes the frame
        let ring = shared.ring.load_full().expect("ring exists");
        let (idx, meta) = ring.consume_ready().expect("frame ready");
        assert_eq!(meta.status, FrameStatus::Complete);
        assert_eq!(meta.size, LINE * H as usize);
        assert_eq!(meta.rtp_timestamp, 90_000);
        assert_eq!(meta.pkts_total, H);
        assert_eq!(meta.pkts_recv, [H, 0]);
        let byte = unsafe { ring.buffer(idx).unwrap()[0] };
        assert_eq!(byte, (90_000u32 & 0xff) as u8);
        ring.release(idx).unwrap();
        assert_eq!(shared.stats.snapshot().frames_delivered, 1);
    }

    #[test]
    fn test_redundant_duplicates_dropped() {
        let (mut session, shared) = make_session(0);
        feed_frame(&mut session, 90_000, 0, SessionPort::P, 5_000_000_000);
        // the R copy of the same frame is all duplicates
        feed_frame(&mut session, 90_000, 0, SessionPort::R, 5_000_500_000);
        let snap = shared.stats.snapshot();
        assert_eq!(snap.pkts_p, u64::from(H));
        assert_eq!(snap.pkts_r, 0);
        assert_eq!(snap.pkts_redundant_dropped, u64::from(H));
        assert_eq!(snap.frames_delivered, 1);
    }

    #[test]
    fn test_gap_filled_frame_is_reconstructed() {
        let (mut session, shared) = make_session(0);
        let tai = 5_000_000_000u64;
        // P loses row 3; R delivers it
        for row in 0..H as u16 {
            if row == 3 {
                continue;
            }
            let pkt = line_packet(row, 90_000, row, 0x5A, false);
            session.handle_packet(&pkt, SessionPort::P, tai);
        }
        let pkt = line_packet(3, 90_000, 3, 0x5A, false);
        session.handle_packet(&pkt, SessionPort::R, tai + 1_000_000);
        let ring = shared.ring.load_full().unwrap();
        let (idx, meta) = ring.consume_ready().expect("frame completes via R");
        assert_eq!(meta.status, FrameStatus::Reconstructed);
        assert_eq!(meta.pkts_recv, [H - 1, 1]);
        ring.release(idx).unwrap();
        assert_eq!(shared.stats.snapshot().frames_reconstructed, 1);
    }

    #[test]
    fn test_incomplete_frame_discarded_by_default() {
        let (mut session, shared) = make_session(0);
        let tai = 5_000_000_000u64;
        // frame 1 misses a row; frame 2 and 3 open -> frame 1 evicted
        for row in 0..H as u16 - 1 {
            let pkt = line_packet(row, 90_000, row, 1, false);
            session.handle_packet(&pkt, SessionPort::P, tai);
        }
        feed_frame(&mut session, 91_800, 100, SessionPort::P, tai + 20_000_000);
        let snap = shared.stats.snapshot();
        assert_eq!(snap.frames_dropped, 1, "incomplete frame discarded");
        assert_eq!(snap.frames_delivered, 1, "complete frame still delivered");
        let ring = shared.ring.load_full().unwrap();
        let (_, meta) = ring.consume_ready().expect("second frame ready");
        assert_eq!(meta.rtp_timestamp, 91_800);
    }

    #[test]
    fn test_incomplete_frame_delivered_with_flag() {
        let (mut session, shared) = make_session(flags::RECEIVE_INCOMPLETE_FRAME);
        let tai = 5_000_000_000u64;
        for row in 0..H as u16 - 1 {
            let pkt = line_packet(row, 90_000, row, 1, false);
            session.handle_packet(&pkt, SessionPort::P, tai);
        }
        feed_frame(&mut session, 91_800, 100, SessionPort::P, tai + 20_000_000);
        let ring = shared.ring.load_full().unwrap();
        let (idx, meta) = ring.consume_ready().expect("incomplete delivered first");
        assert_eq!(meta.status, FrameStatus::Incomplete);
        assert_eq!(meta.size, LINE * (H as usize - 1));
        ring.release(idx).unwrap();
        let (_, meta2) = ring.consume_ready().expect("complete follows");
        assert_eq!(meta2.status, FrameStatus::Complete);
    }

    #[test]
    fn test_frames_delivered_in_timestamp_order() {
        let (mut session, shared) = make_session(0);
        let tai = 5_000_000_000u64;
        feed_frame(&mut session, 90_000, 0, SessionPort::P, tai);
        feed_frame(&mut session, 91_800, 100, SessionPort::P, tai + 20_000_000);
        feed_frame(&mut session, 93_600, 200, SessionPort::P, tai + 40_000_000);
        let ring = shared.ring.load_full().unwrap();
        let mut prev: Option<u32> = None;
        for _ in 0..3 {
            let (idx, meta) = ring.consume_ready().expect("frame in order");
            if let Some(p) = prev {
                assert!(ts_newer(meta.rtp_timestamp, p), "timestamps ascend");
            }
            prev = Some(meta.rtp_timestamp);
            ring.release(idx).unwrap();
        }
    }

    #[test]
    fn test_wrong_pt_and_ssrc_counted() {
        let (mut session, shared) = make_session(0);
        let mut pkt = line_packet(0, 90_000, 0, 0, false);
        pkt[1] = (pkt[1] & 0x80) | 99; // wrong payload type
        session.handle_packet(&pkt, SessionPort::P, 1);
        assert_eq!(shared.stats.snapshot().pkts_wrong_pt, 1);

        // learn ssrc from first good packet, then mismatch
        let good = line_packet(1, 90_000, 0, 0, false);
        session.handle_packet(&good, SessionPort::P, 2);
        let mut bad = line_packet(2, 90_000, 1, 0, false);
        bad[8..12].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        session.handle_packet(&bad, SessionPort::P, 3);
        assert_eq!(shared.stats.snapshot().pkts_wrong_ssrc, 1);
    }

    #[test]
    fn test_malformed_packet_counted() {
        let (mut session, shared) = make_session(0);
        session.handle_packet(&[0u8; 8], SessionPort::P, 1);
        session.handle_packet(&[0x80u8; 14], SessionPort::P, 1);
        assert!(shared.stats.snapshot().pkts_malformed >= 2);
    }

    #[test]
    fn test_offset_overrun_counted() {
        let (mut session, shared) = make_session(0);
        let hdr = Rfc4175Header {
            rtp: RtpHeader {
                marker: false,
                payload_type: 112,
                seq: 0,
                timestamp: 90_000,
                ssrc: 1,
            },
            seq_ext: 0,
            srds: vec![SampleRowData {
                row_length: 100,
                row_number: 5000, // beyond the 8-line frame
                row_offset: 0,
                second_field: false,
                retransmit: false,
            }],
        };
        let mut buf = vec![0u8; hdr.wire_len() + 100];
        hdr.encode(&mut buf);
        session.handle_packet(&buf, SessionPort::P, 1);
        assert_eq!(shared.stats.snapshot().pkts_offset_overrun, 1);
    }

    #[test]
    fn test_slice_events_fire() {
        let mut cfg = test_cfg(0);
        cfg.slice_lines = 2;
        let (mut session, shared) = RxVideoSession::create(
            cfg,
            Arc::new(StubIo::default()),
            Arc::new(FixedClock(1)),
            None,
        )
        .unwrap();
        shared.events.start();
        feed_frame(&mut session, 90_000, 0, SessionPort::P, 5_000_000_000);
        // 8 lines / 2 per slice = up to 4 slice marks
        assert!(shared.stats.snapshot().slice_events >= 3);
        let mut saw_slice = false;
        while let Ok(ev) = shared.events.poll(std::time::Duration::from_millis(1)) {
            if let Event::SliceReady { lines_total, .. } = ev {
                assert_eq!(lines_total, H);
                saw_slice = true;
            }
        }
        assert!(saw_slice);
    }

    #[test]
    fn test_user_meta_attached() {
        let (mut session, shared) = make_session(0);
        let tai = 5_000_000_000u64;
        // open the frame, then its companion meta packet, then finish
        let first = line_packet(0, 90_000, 0, 7, false);
        session.handle_packet(&first, SessionPort::P, tai);
        // companion packet: same payload type, sentinel row number
        let meta_hdr = Rfc4175Header {
            rtp: RtpHeader {
                marker: false,
                payload_type: 112,
                seq: 8,
                timestamp: 90_000,
                ssrc: 0x1234,
            },
            seq_ext: 0,
            srds: vec![SampleRowData {
                row_length: 4,
                row_number: SRD_USER_META_ROW,
                row_offset: 0,
                second_field: false,
                retransmit: false,
            }],
        };
        let mut meta_pkt = vec![0u8; meta_hdr.wire_len() + 4];
        let at = meta_hdr.encode(&mut meta_pkt);
        meta_pkt[at..].copy_from_slice(b"meta");
        session.handle_packet(&meta_pkt, SessionPort::P, tai);
        for row in 1..H as u16 {
            let pkt = line_packet(row, 90_000, row, 7, row == H as u16 - 1);
            session.handle_packet(&pkt, SessionPort::P, tai);
        }
        let ring = shared.ring.load_full().unwrap();
        let (_, meta) = ring.consume_ready().expect("frame ready");
        assert_eq!(meta.user_meta.as_deref(), Some(&b"meta"[..]));
    }

    #[test]
    fn test_auto_detect_publishes_format() {
        let mut cfg = test_cfg(0);
        cfg.auto_detect = true;
        cfg.width = 0;
        cfg.height = 0;
        let (mut session, shared) = RxVideoSession::create(
            cfg,
            Arc::new(StubIo::default()),
            Arc::new(FixedClock(1)),
            None,
        )
        .unwrap();
        shared.events.start();
        assert!(shared.ring.load_full().is_none(), "no ring until detected");

        let frame_ns = Fps::P50.frame_time_ns();
        let mut seq = 0u16;
        for f in 0..8u32 {
            let ts = 90_000 + f * 1800;
            let tai = 5_000_000_000 + u64::from(f) * frame_ns;
            for row in 0..H as u16 {
                let pkt = line_packet(seq, ts, row, 0, false);
                session.handle_packet(&pkt, SessionPort::P, tai + u64::from(row));
                seq = seq.wrapping_add(1);
            }
        }
        let detected = shared.detected.load_full().expect("format detected");
        assert_eq!(detected.width, W);
        assert_eq!(detected.height, H);
        assert_eq!(detected.fps, Fps::P50);
        assert!(shared.ring.load_full().is_some(), "ring sized after detect");
        assert_eq!(
            shared.frame_size.load(Ordering::Acquire),
            LINE * H as usize
        );
        let mut saw = false;
        while let Ok(ev) = shared.events.poll(std::time::Duration::from_millis(1)) {
            if matches!(ev, Event::FormatDetected { .. }) {
                saw = true;
            }
        }
        assert!(saw, "FormatDetected event emitted");
    }

    #[test]
    fn test_timing_parser_reports() {
        let mut cfg = test_cfg(0);
        cfg.timing_parser = true;
        let (mut session, shared) = RxVideoSession::create(
            cfg,
            Arc::new(StubIo::default()),
            Arc::new(FixedClock(1)),
            None,
        )
        .unwrap();
        shared.events.start();
        let tai = Fps::P50.epoch_start_ns(250_000) + 100_000;
        feed_frame(&mut session, 90_000, 0, SessionPort::P, tai);
        feed_frame(&mut session, 91_800, 100, SessionPort::P, tai + 20_000_000);
        let mut saw = false;
        while let Ok(ev) = shared.events.poll(std::time::Duration::from_millis(1)) {
            if let Event::TimingReport { port, pkts, .. } = ev {
                assert_eq!(port, 0);
                assert_eq!(pkts, u32::from(H as u16));
                saw = true;
            }
        }
        assert!(saw, "timing reports emitted");
    }
}
