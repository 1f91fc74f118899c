// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2110-30/-31 audio sessions.
//!
//! Audio is the thin case: every RTP packet carries a fixed payload whose
//! size follows from (format, channels, sampling, ptime), and a frame
//! buffer holds a whole number of packets assembled strictly in order.
//! The RX side runs the dedup state in timestamp-only mode (each packet
//! has a fresh RTP timestamp, so the redundant copy is simply the one
//! with a non-advancing timestamp). The TX side emits one packet per
//! ptime against the PTP clock, either by waiting on the clock (TSC) or
//! by stamping launch times for a rate-limited NIC (RL).

use crate::dedup::{DedupMode, DedupState};
use crate::error::{Error, Result};
use crate::io::{FlowSpec, Mbuf, PacketIo, PtpClock, QueueId};
use crate::ring::{FrameRing, RingDir, SlotIndex, SlotMeta, SlotTimestamps};
use crate::sched::{Tasklet, TickResult};
use crate::session::config::{AudioConfig, AudioPacingWay};
use crate::session::events::{Event, EventQueue};
use crate::stats::{RxStats, TxStats};
use crate::types::SessionPort;
use crate::wire::rfc3550::{RtpHeader, RTP_HDR_LEN};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Packets pulled per RX tick.
const RX_BURST: usize = 64;

/// Shared half of an audio RX session.
pub struct AudioRxShared {
    pub ring: Arc<FrameRing>,
    pub events: EventQueue,
    pub stats: RxStats,
    pub frame_size: usize,
}

/// ST30 RX session core.
pub struct AudioRxSession {
    cfg: AudioConfig,
    shared: Arc<AudioRxShared>,
    io: Arc<dyn PacketIo>,
    queues: Vec<QueueId>,
    dedup: DedupState,
    pkt_size: usize,
    pkts_per_frame: usize,
    /// Current slot and packets landed into it.
    cur: Option<(SlotIndex, usize, u32, u64)>, // (slot, pkts, first rtp ts, first tai)
    ssrc: Option<u32>,
    clock: Arc<dyn PtpClock>,
    scratch: Vec<Mbuf>,
    name: String,
}

impl AudioRxSession {
    pub fn create(
        cfg: AudioConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
    ) -> Result<(Box<AudioRxSession>, Arc<AudioRxShared>)> {
        cfg.validate()?;
        let pkt_size = cfg.packet_size()?;
        let pkts_per_frame = cfg.pkts_per_frame()?;
        let ring = FrameRing::new_owned(RingDir::Rx, cfg.base.num_buffers, cfg.framebuff_size)?;
        let shared = Arc::new(AudioRxShared {
            ring: Arc::new(ring),
            events: EventQueue::new(),
            stats: RxStats::new(),
            frame_size: cfg.framebuff_size,
        });
        let mut queues = Vec::new();
        for (i, port) in cfg.base.ports.iter().enumerate() {
            let flow = FlowSpec {
                dst_ip: port.addr.ip(),
                dst_port: port.addr.port(),
                source_filter: port.source_filter,
            };
            queues.push(io.rxq_bind(i, &flow)?);
        }
        let session = AudioRxSession {
            dedup: DedupState::new(DedupMode::TimestampOnly, cfg.base.dedup_threshold),
            pkt_size,
            pkts_per_frame,
            cur: None,
            ssrc: cfg.base.ssrc,
            scratch: Vec::with_capacity(RX_BURST),
            name: cfg.base.name.clone(),
            shared: Arc::clone(&shared),
            io,
            clock,
            queues,
            cfg,
        };
        Ok((Box::new(session), shared))
    }

    pub fn shared(&self) -> Arc<AudioRxShared> {
        Arc::clone(&self.shared)
    }

    /// Process one RTP packet.
    pub fn handle_packet(&mut self, data: &[u8], port: SessionPort, tai: u64) {
        let stats = &self.shared.stats;
        let Some(rtp) = RtpHeader::decode(data) else {
            stats.pkts_malformed.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if rtp.payload_type != self.cfg.base.payload_type {
            stats.pkts_wrong_pt.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.ssrc {
            None => self.ssrc = Some(rtp.ssrc),
            Some(ssrc) if ssrc != rtp.ssrc => {
                stats.pkts_wrong_ssrc.fetch_add(1, Ordering::Relaxed);
                return;
            }
            _ => {}
        }
        let payload = &data[RTP_HDR_LEN..];
        if payload.len() != self.pkt_size {
            stats.pkts_malformed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let verdict = self.dedup.check(rtp.seq, rtp.timestamp, port);
        if verdict.threshold_override {
            stats.dedup_overrides.fetch_add(1, Ordering::Relaxed);
        } else if verdict.drop {
            stats.pkts_redundant_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // open a frame on demand
        if self.cur.is_none() {
            match self.shared.ring.acquire_receive() {
                Some(slot) => self.cur = Some((slot, 0, rtp.timestamp, tai)),
                None => {
                    stats.slot_busy.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        let (slot, mut filled, first_ts, first_tai) = self.cur.take().expect("frame open");

        // SAFETY: slot is Receiving; this tasklet is the only producer.
        if let Some(buf) = unsafe { self.shared.ring.buffer_mut(slot) } {
            let off = filled * self.pkt_size;
            buf[off..off + self.pkt_size].copy_from_slice(payload);
        }
        filled += 1;
        match port {
            SessionPort::P => stats.pkts_p.fetch_add(1, Ordering::Relaxed),
            SessionPort::R => stats.pkts_r.fetch_add(1, Ordering::Relaxed),
        };
        stats.bytes.fetch_add(self.pkt_size as u64, Ordering::Relaxed);

        if filled >= self.pkts_per_frame {
            let meta = SlotMeta {
                size: self.cfg.framebuff_size,
                timestamps: SlotTimestamps {
                    capture: first_tai,
                    app: tai,
                    wire: tai,
                },
                rtp_timestamp: first_ts,
                epoch: 0,
                status: crate::types::FrameStatus::Complete,
                second_field: false,
                pkts_total: filled as u32,
                pkts_recv: [0; 2],
                user_meta: None,
            };
            if self.shared.ring.promote_ready(slot, meta).is_ok() {
                stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                self.shared.events.push(Event::BufferReady);
            }
            self.cur = None;
        } else {
            self.cur = Some((slot, filled, first_ts, first_tai));
        }
    }
}

impl Tasklet for AudioRxSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> TickResult {
        if self.shared.events.is_stopped() {
            return TickResult::Idle;
        }
        let tai = self.clock.tai_ns();
        let mut any = false;
        for i in 0..self.queues.len() {
            let port = if i == 0 { SessionPort::P } else { SessionPort::R };
            self.scratch.clear();
            let io = Arc::clone(&self.io);
            if io.recv(self.queues[i], &mut self.scratch, RX_BURST) > 0 {
                any = true;
                let pkts = std::mem::take(&mut self.scratch);
                for pkt in &pkts {
                    self.handle_packet(&pkt.data, port, tai);
                }
                self.scratch = pkts;
            }
        }
        if any {
            TickResult::Busy
        } else {
            TickResult::Idle
        }
    }
}

impl Drop for AudioRxSession {
    fn drop(&mut self) {
        for q in self.queues.drain(..) {
            self.io.rxq_release(q);
        }
    }
}

/// Shared half of an audio TX session.
pub struct AudioTxShared {
    pub ring: Arc<FrameRing>,
    pub events: EventQueue,
    pub stats: TxStats,
    pub frame_size: usize,
}

/// ST30 TX session core.
pub struct AudioTxSession {
    cfg: AudioConfig,
    shared: Arc<AudioTxShared>,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    pkt_size: usize,
    pkts_per_frame: usize,
    /// Samples per packet: RTP timestamp stride.
    ts_stride: u32,
    pkt_time_ns: u64,
    seq: u16,
    rtp_ts: u32,
    /// Next packet's wire time; 0 until the first packet.
    next_pkt_tai: u64,
    cur: Option<(SlotIndex, usize)>,
    pending: Vec<VecDeque<Mbuf>>,
    rl_pacing: bool,
    name: String,
}

impl AudioTxSession {
    pub fn create(
        cfg: AudioConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
    ) -> Result<(Box<AudioTxSession>, Arc<AudioTxShared>)> {
        cfg.validate()?;
        let pkt_size = cfg.packet_size()?;
        let pkts_per_frame = cfg.pkts_per_frame()?;
        let ts_stride = cfg.ptime.sample_count(cfg.sampling)?;
        let pkt_time_ns = cfg.ptime.packet_time_ns(cfg.sampling)?;
        let rl_pacing = match cfg.pacing_way {
            AudioPacingWay::RateLimit => true,
            AudioPacingWay::Tsc => false,
            AudioPacingWay::Auto => io.tsn_capable(),
        };
        if rl_pacing && !io.tsn_capable() {
            return Err(Error::InvalidFormat(
                "rate-limit pacing needs a launch-time capable backend".into(),
            ));
        }
        let ring = FrameRing::new_owned(RingDir::Tx, cfg.base.num_buffers, cfg.framebuff_size)?;
        let shared = Arc::new(AudioTxShared {
            ring: Arc::new(ring),
            events: EventQueue::new(),
            stats: TxStats::new(),
            frame_size: cfg.framebuff_size,
        });
        let session = AudioTxSession {
            pkt_size,
            pkts_per_frame,
            ts_stride,
            pkt_time_ns,
            seq: 0,
            rtp_ts: 0,
            next_pkt_tai: 0,
            cur: None,
            pending: (0..cfg.base.ports.len()).map(|_| VecDeque::new()).collect(),
            rl_pacing,
            name: cfg.base.name.clone(),
            shared: Arc::clone(&shared),
            io,
            clock,
            cfg,
        };
        Ok((Box::new(session), shared))
    }

    pub fn shared(&self) -> Arc<AudioTxShared> {
        Arc::clone(&self.shared)
    }

    fn flush_pending(&mut self) -> bool {
        let mut progress = false;
        for (port, q) in self.pending.iter_mut().enumerate() {
            if q.is_empty() {
                continue;
            }
            let accepted = self.io.send(port, q.make_contiguous());
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
            } else {
                self.shared.stats.user_busy.fetch_add(1, Ordering::Relaxed);
            }
        }
        progress
    }

    fn emit_packet(&mut self, slot: SlotIndex, k: usize, launch: u64) {
        let rtp = RtpHeader {
            marker: false,
            payload_type: self.cfg.base.payload_type,
            seq: self.seq,
            timestamp: self.rtp_ts,
            ssrc: self.cfg.base.ssrc.unwrap_or(0x3001),
        };
        let mut data = vec![0u8; RTP_HDR_LEN + self.pkt_size];
        rtp.encode(&mut data);
        // SAFETY: slot is Transmitting and owned by this tasklet.
        if let Some(buf) = unsafe { self.shared.ring.buffer(slot) } {
            let off = k * self.pkt_size;
            data[RTP_HDR_LEN..].copy_from_slice(&buf[off..off + self.pkt_size]);
        }
        for (port, q) in self.pending.iter_mut().enumerate() {
            let mut mbuf = Mbuf::new(data.clone());
            mbuf.dst = Some(self.cfg.base.ports[port].addr);
            if self.rl_pacing {
                mbuf.launch_time_ns = Some(launch);
            }
            q.push_back(mbuf);
        }
        self.seq = self.seq.wrapping_add(1);
        self.rtp_ts = self.rtp_ts.wrapping_add(self.ts_stride);
    }
}

impl Tasklet for AudioTxSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> TickResult {
        if self.shared.events.is_stopped() {
            return TickResult::Idle;
        }
        let tai = self.clock.tai_ns();
        let mut any = self.flush_pending();

        if self.cur.is_none() {
            if let Some((slot, _meta)) = self.shared.ring.consume_ready() {
                self.cur = Some((slot, 0));
                if self.next_pkt_tai == 0 {
                    self.next_pkt_tai = tai;
                    // derive the initial RTP timestamp from the clock
                    self.rtp_ts =
                        (tai as u128 * u128::from(self.cfg.sampling.rate()) / 1_000_000_000) as u32;
                }
                any = true;
            }
        }

        if let Some((slot, mut k)) = self.cur {
            // one packet per ptime; RL mode trusts the NIC with launch
            // times and may run ahead of the clock
            while k < self.pkts_per_frame && (self.rl_pacing || self.next_pkt_tai <= tai) {
                self.emit_packet(slot, k, self.next_pkt_tai);
                self.next_pkt_tai += self.pkt_time_ns;
                k += 1;
                any = true;
                if !self.rl_pacing {
                    break; // re-check the clock next tick
                }
            }
            if k >= self.pkts_per_frame && self.pending.iter().all(VecDeque::is_empty) {
                let _ = self.shared.ring.release(slot);
                self.shared
                    .stats
                    .frames_sent
                    .fetch_add(1, Ordering::Relaxed);
                self.shared.events.push(Event::BufferDone);
                self.shared.events.kick();
                self.cur = None;
            } else {
                self.cur = Some((slot, k));
            }
        }
        if any {
            TickResult::Busy
        } else {
            TickResult::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::config::{BaseConfig, Direction, PortAddr};
    use crate::types::{AudioFmt, AudioPtime, AudioSampling};
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    struct NullClock(Mutex<u64>);

    impl PtpClock for NullClock {
        fn tai_ns(&self) -> u64 {
            *self.0.lock()
        }
    }

    #[derive(Default)]
    struct StubIo {
        sent: Mutex<Vec<Mbuf>>,
        tsn: bool,
    }

    impl PacketIo for StubIo {
        fn send(&self, _port: usize, pkts: &[Mbuf]) -> usize {
            let mut sent = self.sent.lock();
            for p in pkts {
                sent.push(p.clone());
            }
            pkts.len()
        }

        fn rxq_bind(&self, _port: usize, _flow: &FlowSpec) -> Result<QueueId> {
            Ok(QueueId(0))
        }

        fn rxq_release(&self, _queue: QueueId) {}

        fn recv(&self, _queue: QueueId, _out: &mut Vec<Mbuf>, _budget: usize) -> usize {
            0
        }

        fn tsn_capable(&self) -> bool {
            self.tsn
        }
    }

    fn audio_cfg(dir: Direction) -> AudioConfig {
        let port = PortAddr {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 0, 1, 1)), 30000),
            source_filter: None,
        };
        let mut base = BaseConfig::new(dir, "audio-test", vec![port.clone(), port]);
        base.payload_type = 97;
        AudioConfig {
            base,
            fmt: AudioFmt::Pcm16,
            channels: 2,
            sampling: AudioSampling::K48,
            ptime: AudioPtime::P1Ms,
            // 48 samples * 2ch * 2B = 192 B/pkt, 4 packets per frame
            framebuff_size: 192 * 4,
            pacing_way: AudioPacingWay::Tsc,
        }
    }

    fn audio_pkt(seq: u16, ts: u32, fill: u8) -> Vec<u8> {
        let rtp = RtpHeader {
            marker: false,
            payload_type: 97,
            seq,
            timestamp: ts,
            ssrc: 0x3001,
        };
        let mut data = vec![fill; RTP_HDR_LEN + 192];
        rtp.encode(&mut data);
        data
    }

    fn rx_session() -> (Box<AudioRxSession>, Arc<AudioRxShared>) {
        AudioRxSession::create(
            audio_cfg(Direction::Rx),
            Arc::new(StubIo::default()),
            Arc::new(NullClock(Mutex::new(0))),
        )
        .expect("rx session")
    }

    #[test]
    fn test_rx_assembles_frame_in_order() {
        let (mut session, shared) = rx_session();
        for k in 0..4u16 {
            let pkt = audio_pkt(k, 1000 + u32::from(k) * 48, k as u8 + 1);
            session.handle_packet(&pkt, SessionPort::P, 100 + u64::from(k));
        }
        let (idx, meta) = shared.ring.consume_ready().expect("frame ready");
        assert_eq!(meta.size, 192 * 4);
        assert_eq!(meta.rtp_timestamp, 1000, "frame stamped with first packet");
        assert_eq!(meta.pkts_total, 4);
        let buf = unsafe { shared.ring.buffer(idx).unwrap() };
        // packets landed at their in-order offsets
        assert_eq!(buf[0], 1);
        assert_eq!(buf[192], 2);
        assert_eq!(buf[192 * 3], 4);
        shared.ring.release(idx).unwrap();
        assert_eq!(shared.stats.snapshot().frames_delivered, 1);
    }

    #[test]
    fn test_rx_timestamp_only_dedup() {
        let (mut session, shared) = rx_session();
        // scenario 4 of the dedup contract: P/R alternate per timestamp
        session.handle_packet(&audio_pkt(0, 1000, 1), SessionPort::P, 1);
        session.handle_packet(&audio_pkt(1, 1000, 2), SessionPort::R, 2);
        session.handle_packet(&audio_pkt(2, 2000, 3), SessionPort::P, 3);
        session.handle_packet(&audio_pkt(3, 2000, 4), SessionPort::R, 4);
        let snap = shared.stats.snapshot();
        assert_eq!(snap.pkts_p, 2, "both P packets accepted");
        assert_eq!(snap.pkts_r, 0);
        assert_eq!(snap.pkts_redundant_dropped, 2, "both R copies dropped");
    }

    #[test]
    fn test_rx_rejects_wrong_payload_size() {
        let (mut session, shared) = rx_session();
        let rtp = RtpHeader {
            marker: false,
            payload_type: 97,
            seq: 0,
            timestamp: 10,
            ssrc: 1,
        };
        let mut short = vec![0u8; RTP_HDR_LEN + 50];
        rtp.encode(&mut short);
        session.handle_packet(&short, SessionPort::P, 1);
        assert_eq!(shared.stats.snapshot().pkts_malformed, 1);
    }

    #[test]
    fn test_tx_emits_fixed_size_packets() {
        let io = Arc::new(StubIo::default());
        let clock = Arc::new(NullClock(Mutex::new(1_000_000)));
        let mut cfg = audio_cfg(Direction::Tx);
        cfg.base.ports.truncate(1);
        let (mut session, shared) =
            AudioTxSession::create(cfg, Arc::clone(&io) as _, Arc::clone(&clock) as _).unwrap();
        shared.events.start();

        let idx = shared.ring.acquire_receive().unwrap();
        unsafe {
            shared.ring.buffer_mut(idx).unwrap().fill(0xCD);
        }
        shared.ring.promote_ready(idx, SlotMeta::default()).unwrap();

        // advance the clock one ptime per loop; 4 packets + drain
        for step in 0..10u64 {
            *clock.0.lock() = 1_000_000 + step * 1_000_000;
            session.tick();
        }
        let sent = io.sent.lock();
        assert_eq!(sent.len(), 4);
        let mut prev_seq = None;
        let mut prev_ts = None;
        for m in sent.iter() {
            assert_eq!(m.data.len(), RTP_HDR_LEN + 192);
            let hdr = RtpHeader::decode(&m.data).unwrap();
            if let Some(p) = prev_seq {
                assert_eq!(hdr.seq, u16::wrapping_add(p, 1));
            }
            if let Some(t) = prev_ts {
                assert_eq!(hdr.timestamp, u32::wrapping_add(t, 48), "ts advances by samples");
            }
            prev_seq = Some(hdr.seq);
            prev_ts = Some(hdr.timestamp);
            assert!(m.data[RTP_HDR_LEN..].iter().all(|&b| b == 0xCD));
        }
        drop(sent);
        assert_eq!(shared.stats.snapshot().frames_sent, 1);
    }

    #[test]
    fn test_tx_tsc_pacing_waits_for_clock() {
        let io = Arc::new(StubIo::default());
        let clock = Arc::new(NullClock(Mutex::new(5_000_000)));
        let mut cfg = audio_cfg(Direction::Tx);
        cfg.base.ports.truncate(1);
        let (mut session, shared) =
            AudioTxSession::create(cfg, Arc::clone(&io) as _, Arc::clone(&clock) as _).unwrap();
        shared.events.start();
        let idx = shared.ring.acquire_receive().unwrap();
        shared.ring.promote_ready(idx, SlotMeta::default()).unwrap();

        session.tick(); // consume frame, first packet due immediately
        session.tick();
        let after_two_ticks = io.sent.lock().len();
        // without the clock advancing only the due packet(s) go out
        session.tick();
        session.tick();
        assert_eq!(io.sent.lock().len(), after_two_ticks, "pacing holds");
        *clock.0.lock() = 5_000_000 + 3 * 1_000_000;
        for _ in 0..6 {
            session.tick();
        }
        assert_eq!(io.sent.lock().len(), 4, "all packets out after time passes");
    }

    #[test]
    fn test_tx_rl_pacing_requires_capable_backend() {
        let mut cfg = audio_cfg(Direction::Tx);
        cfg.pacing_way = AudioPacingWay::RateLimit;
        let result = AudioTxSession::create(
            cfg,
            Arc::new(StubIo::default()),
            Arc::new(NullClock(Mutex::new(0))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_tx_rl_pacing_stamps_launch_times() {
        let io = Arc::new(StubIo {
            tsn: true,
            ..Default::default()
        });
        let clock = Arc::new(NullClock(Mutex::new(7_000_000)));
        let mut cfg = audio_cfg(Direction::Tx);
        cfg.base.ports.truncate(1);
        cfg.pacing_way = AudioPacingWay::RateLimit;
        let (mut session, shared) =
            AudioTxSession::create(cfg, Arc::clone(&io) as _, Arc::clone(&clock) as _).unwrap();
        shared.events.start();
        let idx = shared.ring.acquire_receive().unwrap();
        shared.ring.promote_ready(idx, SlotMeta::default()).unwrap();
        for _ in 0..5 {
            session.tick();
        }
        let sent = io.sent.lock();
        assert_eq!(sent.len(), 4, "RL mode runs ahead of the clock");
        for (i, m) in sent.iter().enumerate() {
            let launch = m.launch_time_ns.expect("launch time stamped");
            assert_eq!(launch, 7_000_000 + i as u64 * 1_000_000);
        }
    }
}
