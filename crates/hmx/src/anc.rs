// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2110-40 ancillary-data sessions (RFC 8331).
//!
//! ANC is RTP-level: the RX side validates, dedups and parses each
//! packet, then hands the contained ANC packets to the application
//! through a lock-free ring; the TX side drains application-written ANC
//! packets and emits one RTP packet per video epoch, stamped against the
//! session's frame rate.

use crate::dedup::{DedupMode, DedupState};
use crate::error::Result;
use crate::io::{FlowSpec, Mbuf, PacketIo, PtpClock, QueueId};
use crate::sched::{Tasklet, TickResult};
use crate::session::config::AncConfig;
use crate::session::events::{Event, EventQueue};
use crate::stats::{RxStats, TxStats};
use crate::types::SessionPort;
use crate::wire::rfc8331::{AncHeader, AncPacket};
use crate::wire::rfc3550::RtpHeader;
use crossbeam::queue::ArrayQueue;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const RX_BURST: usize = 32;

/// One received ANC unit: the packets of one RTP packet plus timing.
#[derive(Debug, Clone, PartialEq)]
pub struct AncFrame {
    pub rtp_timestamp: u32,
    /// Field flag from the payload header.
    pub field: u8,
    pub packets: Vec<AncPacket>,
}

/// Shared half of an ANC RX session.
pub struct AncRxShared {
    pub queue: ArrayQueue<AncFrame>,
    pub events: EventQueue,
    pub stats: RxStats,
}

/// ST40 RX session core.
pub struct AncRxSession {
    cfg: AncConfig,
    shared: Arc<AncRxShared>,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    queues: Vec<QueueId>,
    dedup: DedupState,
    ssrc: Option<u32>,
    scratch: Vec<Mbuf>,
    name: String,
}

impl AncRxSession {
    pub fn create(
        cfg: AncConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
    ) -> Result<(Box<AncRxSession>, Arc<AncRxShared>)> {
        cfg.validate()?;
        let shared = Arc::new(AncRxShared {
            queue: ArrayQueue::new(cfg.ring_size),
            events: EventQueue::new(),
            stats: RxStats::new(),
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
        let session = AncRxSession {
            dedup: DedupState::new(DedupMode::TimestampAndSeq, cfg.base.dedup_threshold),
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

    pub fn shared(&self) -> Arc<AncRxShared> {
        Arc::clone(&self.shared)
    }

    pub fn handle_packet(&mut self, data: &[u8], port: SessionPort) {
        let stats = &self.shared.stats;
        let Some((hdr, mut at)) = AncHeader::decode(data) else {
            stats.pkts_malformed.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if hdr.rtp.payload_type != self.cfg.base.payload_type {
            stats.pkts_wrong_pt.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.ssrc {
            None => self.ssrc = Some(hdr.rtp.ssrc),
            Some(ssrc) if ssrc != hdr.rtp.ssrc => {
                stats.pkts_wrong_ssrc.fetch_add(1, Ordering::Relaxed);
                return;
            }
            _ => {}
        }
        let verdict = self.dedup.check(hdr.rtp.seq, hdr.rtp.timestamp, port);
        if verdict.threshold_override {
            stats.dedup_overrides.fetch_add(1, Ordering::Relaxed);
        } else if verdict.drop {
            stats.pkts_redundant_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut packets = Vec::with_capacity(hdr.anc_count as usize);
        for _ in 0..hdr.anc_count {
            match AncPacket::decode(&data[at..]) {
                Some((pkt, len)) => {
                    packets.push(pkt);
                    at += len;
                }
                None => {
                    stats.pkts_malformed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        match port {
            SessionPort::P => stats.pkts_p.fetch_add(1, Ordering::Relaxed),
            SessionPort::R => stats.pkts_r.fetch_add(1, Ordering::Relaxed),
        };
        stats.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);

        let frame = AncFrame {
            rtp_timestamp: hdr.rtp.timestamp,
            field: hdr.field,
            packets,
        };
        if self.shared.queue.push(frame).is_err() {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
            self.shared.events.push(Event::BufferReady);
        }
    }
}

impl Tasklet for AncRxSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> TickResult {
        if self.shared.events.is_stopped() {
            return TickResult::Idle;
        }
        let _ = self.clock.tai_ns();
        let mut any = false;
        for i in 0..self.queues.len() {
            let port = if i == 0 { SessionPort::P } else { SessionPort::R };
            self.scratch.clear();
            let io = Arc::clone(&self.io);
            if io.recv(self.queues[i], &mut self.scratch, RX_BURST) > 0 {
                any = true;
                let pkts = std::mem::take(&mut self.scratch);
                for pkt in &pkts {
                    self.handle_packet(&pkt.data, port);
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

impl Drop for AncRxSession {
    fn drop(&mut self) {
        for q in self.queues.drain(..) {
            self.io.rxq_release(q);
        }
    }
}

/// Shared half of an ANC TX session.
pub struct AncTxShared {
    /// Application-written ANC packets awaiting emission.
    pub queue: ArrayQueue<Vec<AncPacket>>,
    pub events: EventQueue,
    pub stats: TxStats,
}

/// ST40 TX session core: one RTP packet per queued ANC unit, emitted at
/// the associated video epoch.
pub struct AncTxSession {
    cfg: AncConfig,
    shared: Arc<AncTxShared>,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    seq: u16,
    seq_ext: u16,
    last_epoch: u64,
    pending: Vec<VecDeque<Mbuf>>,
    name: String,
}

impl AncTxSession {
    pub fn create(
        cfg: AncConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
    ) -> Result<(Box<AncTxSession>, Arc<AncTxShared>)> {
        cfg.validate()?;
        let shared = Arc::new(AncTxShared {
            queue: ArrayQueue::new(cfg.ring_size),
            events: EventQueue::new(),
            stats: TxStats::new(),
        });
        let session = AncTxSession {
            seq: 0,
            seq_ext: 0,
            last_epoch: 0,
            pending: (0..cfg.base.ports.len()).map(|_| VecDeque::new()).collect(),
            name: cfg.base.name.clone(),
            shared: Arc::clone(&shared),
            io,
            clock,
            cfg,
        };
        Ok((Box::new(session), shared))
    }

    pub fn shared(&self) -> Arc<AncTxShared> {
        Arc::clone(&self.shared)
    }

    /// Build the RFC 8331 packet for one ANC unit.
    fn build_packet(&self, packets: &[AncPacket], rtp_ts: u32) -> Vec<u8> {
        let body_len: usize = packets.iter().map(AncPacket::wire_len).sum();
        let hdr = AncHeader {
            rtp: RtpHeader {
                marker: true,
                payload_type: self.cfg.base.payload_type,
                seq: self.seq,
                timestamp: rtp_ts,
                ssrc: self.cfg.base.ssrc.unwrap_or(0x4001),
            },
            seq_ext: self.seq_ext,
            length: body_len as u16,
            anc_count: packets.len() as u8,
            field: 0,
        };
        let mut buf = vec![0u8; crate::wire::rfc3550::RTP_HDR_LEN
            + crate::wire::rfc8331::ANC_PAYLOAD_HDR_LEN
            + body_len];
        let mut at = hdr.encode(&mut buf);
        for pkt in packets {
            at += pkt.encode(&mut buf[at..]);
        }
        buf
    }

    fn flush_pending(&mut self) {
        for (port, q) in self.pending.iter_mut().enumerate() {
            if q.is_empty() {
                continue;
            }
            let accepted = self.io.send(port, q.make_contiguous());
            if accepted > 0 {
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
    }
}

impl Tasklet for AncTxSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> TickResult {
        if self.shared.events.is_stopped() {
            return TickResult::Idle;
        }
        let tai = self.clock.tai_ns();
        self.flush_pending();

        // ANC rides the video epoch cadence: at most one unit per epoch
        let epoch = self.cfg.fps.epoch_of(tai);
        if epoch == self.last_epoch {
            return TickResult::Idle;
        }
        let Some(packets) = self.shared.queue.pop() else {
            self.last_epoch = epoch;
            return TickResult::Idle;
        };
        self.last_epoch = epoch;
        let rtp_ts = self.cfg.fps.rtp_timestamp_of(epoch);
        let data = self.build_packet(&packets, rtp_ts);
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq_ext = self.seq_ext.wrapping_add(1);
        }
        for (port, q) in self.pending.iter_mut().enumerate() {
            let mut mbuf = Mbuf::new(data.clone());
            mbuf.dst = Some(self.cfg.base.ports[port].addr);
            q.push_back(mbuf);
        }
        self.flush_pending();
        self.shared
            .stats
            .frames_sent
            .fetch_add(1, Ordering::Relaxed);
        self.shared.events.push(Event::BufferDone);
        TickResult::Busy
    }
}
