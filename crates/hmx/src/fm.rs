// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2110-41 fast-metadata sessions.
//!
//! Fast metadata is pure RTP level: each packet carries one data item
//! under a 22-bit Data Item Type with a K-bit, the payload padded to
//! 32-bit words. RX validates, dedups and queues the items; TX drains
//! application items at the session's epoch cadence.

use crate::dedup::{DedupMode, DedupState};
use crate::error::Result;
use crate::io::{FlowSpec, Mbuf, PacketIo, PtpClock, QueueId};
use crate::sched::{Tasklet, TickResult};
use crate::session::config::FmConfig;
use crate::session::events::{Event, EventQueue};
use crate::stats::{RxStats, TxStats};
use crate::types::SessionPort;
use crate::wire::rfc3550::RtpHeader;
use crate::wire::st41::{St41Header, ST41_HDR_LEN};
use crossbeam::queue::ArrayQueue;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const RX_BURST: usize = 32;

/// One received fast-metadata item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmItem {
    pub rtp_timestamp: u32,
    pub data_item_type: u32,
    pub k_bit: bool,
    /// Item bytes (32-bit-word padded, as carried on the wire).
    pub data: Vec<u8>,
}

/// Shared half of a fast-metadata RX session.
pub struct FmRxShared {
    pub queue: ArrayQueue<FmItem>,
    pub events: EventQueue,
    pub stats: RxStats,
}

/// ST41 RX session core.
pub struct FmRxSession {
    cfg: FmConfig,
    shared: Arc<FmRxShared>,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    queues: Vec<QueueId>,
    dedup: DedupState,
    ssrc: Option<u32>,
    scratch: Vec<Mbuf>,
    name: String,
}

impl FmRxSession {
    pub fn create(
        cfg: FmConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
    ) -> Result<(Box<FmRxSession>, Arc<FmRxShared>)> {
        cfg.validate()?;
        let shared = Arc::new(FmRxShared {
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
        let session = FmRxSession {
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

    pub fn shared(&self) -> Arc<FmRxShared> {
        Arc::clone(&self.shared)
    }

    pub fn handle_packet(&mut self, data: &[u8], port: SessionPort) {
        let stats = &self.shared.stats;
        let Some((hdr, at)) = St41Header::decode(data) else {
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
        match port {
            SessionPort::P => stats.pkts_p.fetch_add(1, Ordering::Relaxed),
            SessionPort::R => stats.pkts_r.fetch_add(1, Ordering::Relaxed),
        };
        stats.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);

        let words = hdr.data_item_words as usize * 4;
        let item = FmItem {
            rtp_timestamp: hdr.rtp.timestamp,
            data_item_type: hdr.data_item_type,
            k_bit: hdr.k_bit,
            data: data[at..at + words].to_vec(),
        };
        if self.shared.queue.push(item).is_err() {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
            self.shared.events.push(Event::BufferReady);
        }
    }
}

impl Tasklet for FmRxSession {
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

impl Drop for FmRxSession {
    fn drop(&mut self) {
        for q in self.queues.drain(..) {
            self.io.rxq_release(q);
        }
    }
}

/// Shared half of a fast-metadata TX session.
pub struct FmTxShared {
    /// Application items awaiting emission (raw bytes, padded by TX).
    pub queue: ArrayQueue<Vec<u8>>,
    pub events: EventQueue,
    pub stats: TxStats,
}

/// ST41 TX session core.
pub struct FmTxSession {
    cfg: FmConfig,
    shared: Arc<FmTxShared>,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    seq: u16,
    last_epoch: u64,
    pending: Vec<VecDeque<Mbuf>>,
    name: String,
}

impl FmTxSession {
    pub fn create(
        cfg: FmConfig,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn PtpClock>,
    ) -> Result<(Box<FmTxSession>, Arc<FmTxShared>)> {
        cfg.validate()?;
        let shared = Arc::new(FmTxShared {
            queue: ArrayQueue::new(cfg.ring_size),
            events: EventQueue::new(),
            stats: TxStats::new(),
        });
        let session = FmTxSession {
            seq: 0,
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

    pub fn shared(&self) -> Arc<FmTxShared> {
        Arc::clone(&self.shared)
    }

    fn build_packet(&self, item: &[u8], rtp_ts: u32) -> Vec<u8> {
        let words = item.len().div_ceil(4);
        let hdr = St41Header {
            rtp: RtpHeader {
                marker: true,
                payload_type: self.cfg.base.payload_type,
                seq: self.seq,
                timestamp: rtp_ts,
                ssrc: self.cfg.base.ssrc.unwrap_or(0x4101),
            },
            data_item_type: self.cfg.data_item_type,
            k_bit: self.cfg.k_bit,
            data_item_words: words as u16,
        };
        let mut buf = vec![0u8; ST41_HDR_LEN + words * 4];
        let at = hdr.encode(&mut buf);
        buf[at..at + item.len()].copy_from_slice(item);
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

impl Tasklet for FmTxSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> TickResult {
        if self.shared.events.is_stopped() {
            return TickResult::Idle;
        }
        let tai = self.clock.tai_ns();
        self.flush_pending();

        let epoch = self.cfg.fps.epoch_of(tai);
        if epoch == self.last_epoch {
            return TickResult::Idle;
        }
        let Some(item) = self.shared.queue.pop() else {
            self.last_epoch = epoch;
            return TickResult::Idle;
        };
        self.last_epoch = epoch;
        // oversized items are a submission error; count and skip
        if item.len() > crate::wire::st41::MAX_DATA_ITEM_WORDS as usize * 4 {
            log::warn!("[fm] {}: item of {}B exceeds the 9-bit word count", self.name, item.len());
            self.shared.stats.user_busy.fetch_add(1, Ordering::Relaxed);
            return TickResult::Idle;
        }
        let rtp_ts = self.cfg.fps.rtp_timestamp_of(epoch);
        let data = self.build_packet(&item, rtp_ts);
        self.seq = self.seq.wrapping_add(1);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::config::{BaseConfig, Direction, PortAddr};
    use crate::types::Fps;
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    struct TestClock(Mutex<u64>);

    impl PtpClock for TestClock {
        fn tai_ns(&self) -> u64 {
            *self.0.lock()
        }
    }

    #[derive(Default)]
    struct StubIo {
        sent: Mutex<Vec<Mbuf>>,
    }

    impl PacketIo for StubIo {
        fn send(&self, _port: usize, pkts: &[Mbuf]) -> usize {
            self.sent.lock().extend(pkts.iter().cloned());
            pkts.len()
        }

        fn rxq_bind(&self, _port: usize, _flow: &FlowSpec) -> Result<QueueId> {
            Ok(QueueId(0))
        }

        fn rxq_release(&self, _queue: QueueId) {}

        fn recv(&self, _queue: QueueId, _out: &mut Vec<Mbuf>, _budget: usize) -> usize {
            0
        }
    }

    fn fm_cfg(dir: Direction) -> FmConfig {
        let port = PortAddr {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 0, 3, 3)), 41000),
            source_filter: None,
        };
        let mut base = BaseConfig::new(dir, "fm-test", vec![port]);
        base.payload_type = 115;
        FmConfig {
            base,
            fps: Fps::P50,
            data_item_type: 0x12345,
            k_bit: true,
            ring_size: 8,
        }
    }

    #[test]
    fn test_tx_rx_item_roundtrip() {
        // emit through TX, feed the wire bytes into RX
        let io = Arc::new(StubIo::default());
        let clock = Arc::new(TestClock(Mutex::new(0)));
        let (mut tx, tx_shared) = FmTxSession::create(
            fm_cfg(Direction::Tx),
            Arc::clone(&io) as _,
            Arc::clone(&clock) as _,
        )
        .unwrap();
        tx_shared.events.start();
        tx_shared.queue.push(b"hello fm".to_vec()).unwrap();
        *clock.0.lock() = Fps::P50.epoch_start_ns(55);
        tx.tick();
        let wire = io.sent.lock()[0].data.clone();

        let (mut rx, rx_shared) = FmRxSession::create(
            fm_cfg(Direction::Rx),
            Arc::new(StubIo::default()),
            Arc::new(TestClock(Mutex::new(0))),
        )
        .unwrap();
        rx.handle_packet(&wire, SessionPort::P);
        let item = rx_shared.queue.pop().expect("item queued");
        assert_eq!(item.data_item_type, 0x12345);
        assert!(item.k_bit);
        // word padding: 8 bytes -> 2 words
        assert_eq!(item.data.len(), 8);
        assert_eq!(&item.data[..8], b"hello fm");
        assert_eq!(item.rtp_timestamp, Fps::P50.rtp_timestamp_of(55));
    }

    #[test]
    fn test_rx_drops_redundant_and_counts() {
        let (mut rx, rx_shared) = FmRxSession::create(
            fm_cfg(Direction::Rx),
            Arc::new(StubIo::default()),
            Arc::new(TestClock(Mutex::new(0))),
        )
        .unwrap();
        let hdr = St41Header {
            rtp: RtpHeader {
                marker: true,
                payload_type: 115,
                seq: 3,
                timestamp: 777,
                ssrc: 0x4101,
            },
            data_item_type: 1,
            k_bit: false,
            data_item_words: 1,
        };
        let mut wire = vec![0u8; ST41_HDR_LEN + 4];
        hdr.encode(&mut wire);
        rx.handle_packet(&wire, SessionPort::P);
        rx.handle_packet(&wire, SessionPort::R);
        assert_eq!(rx_shared.queue.len(), 1);
        assert_eq!(rx_shared.stats.snapshot().pkts_redundant_dropped, 1);
    }

    #[test]
    fn test_rx_queue_overflow_counts_drops() {
        let (mut rx, rx_shared) = FmRxSession::create(
            fm_cfg(Direction::Rx),
            Arc::new(StubIo::default()),
            Arc::new(TestClock(Mutex::new(0))),
        )
        .unwrap();
        for seq in 0..20u16 {
            let hdr = St41Header {
                rtp: RtpHeader {
                    marker: true,
                    payload_type: 115,
                    seq,
                    timestamp: 1000 + u32::from(seq),
                    ssrc: 0x4101,
                },
                data_item_type: 1,
                k_bit: false,
                data_item_words: 0,
            };
            let mut wire = vec![0u8; ST41_HDR_LEN];
            hdr.encode(&mut wire);
            rx.handle_packet(&wire, SessionPort::P);
        }
        // ring holds 8; the rest are counted as drops
        assert_eq!(rx_shared.queue.len(), 8);
        assert_eq!(rx_shared.stats.snapshot().frames_dropped, 12);
    }

    #[test]
    fn test_tx_epoch_cadence() {
        let io = Arc::new(StubIo::default());
        let clock = Arc::new(TestClock(Mutex::new(0)));
        let (mut tx, shared) = FmTxSession::create(
            fm_cfg(Direction::Tx),
            Arc::clone(&io) as _,
            Arc::clone(&clock) as _,
        )
        .unwrap();
        shared.events.start();
        shared.queue.push(vec![1, 2, 3, 4]).unwrap();
        shared.queue.push(vec![5, 6, 7, 8]).unwrap();
        *clock.0.lock() = Fps::P50.epoch_start_ns(70);
        tx.tick();
        tx.tick(); // same epoch
        assert_eq!(io.sent.lock().len(), 1, "one item per epoch");
        *clock.0.lock() = Fps::P50.epoch_start_ns(71);
        tx.tick();
        assert_eq!(io.sent.lock().len(), 2);
    }
}
