// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External collaborator interfaces: packet I/O, PTP clock, DMA engine.
//!
//! The session state machines only ever talk to these traits. The crate
//! ships plain user-space defaults ([`UdpPacketIo`], [`SystemClock`],
//! [`MemcpyDma`]); kernel-bypass or hardware-offload backends implement
//! the same contracts.
//!
//! Contract rules shared by all implementations:
//! - No method may block; the tasklet loop calls these once per tick.
//! - `send` accepts a prefix of the batch and leaves the rest; the caller
//!   retries on the next tick.
//! - `DmaEngine` is best effort: any error means "fall back to CPU", the
//!   caller never retries a failed submit.

use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// One packet buffer moving through the datapath.
#[derive(Debug, Clone)]
pub struct Mbuf {
    /// Packet bytes (UDP payload: RTP header + payload).
    pub data: Vec<u8>,
    /// Destination for TX packets; `None` on RX.
    pub dst: Option<SocketAddr>,
    /// TSN launch time in TAI ns, when the backend supports it.
    pub launch_time_ns: Option<u64>,
}

impl Mbuf {
    pub fn new(data: Vec<u8>) -> Self {
        Mbuf {
            data,
            dst: None,
            launch_time_ns: None,
        }
    }
}

/// RX flow match: one UDP destination, optionally source-filtered.
#[derive(Debug, Clone)]
pub struct FlowSpec {
    /// Destination IP the flow is addressed to (multicast group or local
    /// unicast address).
    pub dst_ip: IpAddr,
    /// Destination UDP port.
    pub dst_port: u16,
    /// Optional multicast source filter (IGMPv3 SSM).
    pub source_filter: Option<IpAddr>,
}

/// Opaque RX queue handle returned by [`PacketIo::rxq_bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub usize);

/// Batched packet send/receive on a set of physical ports.
pub trait PacketIo: Send + Sync {
    /// Enqueue packets for transmission on a port. Returns how many were
    /// accepted from the front of the slice; the caller keeps the rest.
    fn send(&self, port: usize, pkts: &[Mbuf]) -> usize;

    /// Bind an RX queue for a flow. Called at session create.
    fn rxq_bind(&self, port: usize, flow: &FlowSpec) -> Result<QueueId>;

    /// Release a queue bound by `rxq_bind`.
    fn rxq_release(&self, queue: QueueId);

    /// Poll a queue for received packets, appending to `out` up to
    /// `budget` packets. Returns the number appended.
    fn recv(&self, queue: QueueId, out: &mut Vec<Mbuf>, budget: usize) -> usize;

    /// True when the backend can split RTP headers from payloads into
    /// separate buffers (ST20 header-split mode).
    fn header_split_capable(&self) -> bool {
        false
    }

    /// True when the backend honors [`Mbuf::launch_time_ns`] (TSN pacing).
    fn tsn_capable(&self) -> bool {
        false
    }
}

/// PTP TAI time source. Callable from any context.
pub trait PtpClock: Send + Sync {
    /// Current TAI in nanoseconds.
    fn tai_ns(&self) -> u64;
}

/// System-clock stand-in for hosts without PHC access: UTC plus the
/// current TAI-UTC offset. Good enough for free-running senders; real
/// deployments install a PHC-backed clock.
pub struct SystemClock;

/// TAI-UTC offset, seconds (37 since the 2017 leap second).
const TAI_UTC_OFFSET_S: u64 = 37;

impl PtpClock for SystemClock {
    fn tai_ns(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.as_nanos() as u64 + TAI_UTC_OFFSET_S * 1_000_000_000
    }
}

/// Asynchronous copy engine used by the DMA-staged kernels and the RX
/// payload offload.
///
/// Completion is FIFO: `poll` reports how many of the oldest outstanding
/// copies finished. After a copy is reported complete its destination
/// bytes are visible to the CPU.
pub trait DmaEngine: Send + Sync {
    /// Enqueue one copy. Fails fast when the queue is full or the engine
    /// is unavailable; the caller falls back to a CPU copy.
    fn copy(&self, dst: &mut [u8], src: &[u8]) -> Result<()>;

    /// Kick the enqueued copies toward the hardware.
    fn submit(&self) -> Result<()>;

    /// Harvest completions. Returns completed copy count since last poll.
    fn poll(&self) -> usize;

    /// Queue depth the engine accepts before `copy` starts failing.
    fn capacity(&self) -> usize {
        16
    }
}

/// Eager-copy engine: completes every copy synchronously. Used as the
/// default and in tests; also documents the completion contract in its
/// simplest form.
#[derive(Default)]
pub struct MemcpyDma {
    inflight: AtomicU64,
}

impl MemcpyDma {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DmaEngine for MemcpyDma {
    fn copy(&self, dst: &mut [u8], src: &[u8]) -> Result<()> {
        if dst.len() < src.len() {
            return Err(Error::InvalidConversion(
                "dma copy destination shorter than source".into(),
            ));
        }
        dst[..src.len()].copy_from_slice(src);
        self.inflight.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn submit(&self) -> Result<()> {
        Ok(())
    }

    fn poll(&self) -> usize {
        self.inflight.swap(0, Ordering::Relaxed) as usize
    }
}

/// Always-failing engine, for exercising the CPU fallback paths in tests.
pub struct NoDma;

impl DmaEngine for NoDma {
    fn copy(&self, _dst: &mut [u8], _src: &[u8]) -> Result<()> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no dma engine",
        )))
    }

    fn submit(&self) -> Result<()> {
        Ok(())
    }

    fn poll(&self) -> usize {
        0
    }
}

struct RxQueue {
    socket: UdpSocket,
    source_filter: Option<IpAddr>,
}

/// User-space UDP packet I/O over socket2.
///
/// One non-blocking socket per bound RX flow; multicast destinations are
/// joined on the port's interface. TX goes through one shared socket per
/// port with the destination taken from each [`Mbuf`].
pub struct UdpPacketIo {
    /// Local interface address per port index.
    ifaces: Vec<Ipv4Addr>,
    tx_sockets: Vec<UdpSocket>,
    rx_queues: RwLock<Vec<Option<RxQueue>>>,
}

impl UdpPacketIo {
    /// Create with one entry per physical port (P, optionally R).
    pub fn new(ifaces: Vec<Ipv4Addr>) -> Result<Self> {
        if ifaces.is_empty() || ifaces.len() > 2 {
            return Err(Error::InvalidPortCount(ifaces.len()));
        }
        let mut tx_sockets = Vec::with_capacity(ifaces.len());
        for iface in &ifaces {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
                .map_err(|e| Error::BindFailed(e.to_string()))?;
            socket
                .bind(&SocketAddr::new(IpAddr::V4(*iface), 0).into())
                .map_err(|e| Error::BindFailed(format!("tx bind on {}: {}", iface, e)))?;
            socket
                .set_nonblocking(true)
                .map_err(|e| Error::BindFailed(e.to_string()))?;
            tx_sockets.push(socket.into());
        }
        Ok(UdpPacketIo {
            ifaces,
            tx_sockets,
            rx_queues: RwLock::new(Vec::new()),
        })
    }

    fn join_multicast(&self, socket: &Socket, group: Ipv4Addr, port: usize) -> Result<()> {
        let iface = self.ifaces[port];
        socket
            .join_multicast_v4(&group, &iface)
            .map_err(|e| Error::MulticastJoinFailed(format!("{} on {}: {}", group, iface, e)))?;
        log::debug!("[io] joined multicast group={} iface={}", group, iface);
        Ok(())
    }
}

impl PacketIo for UdpPacketIo {
    fn send(&self, port: usize, pkts: &[Mbuf]) -> usize {
        let Some(socket) = self.tx_sockets.get(port) else {
            return 0;
        };
        let mut sent = 0;
        for pkt in pkts {
            let Some(dst) = pkt.dst else {
                // a packet with no destination is a builder bug; count it
                // as consumed so it cannot wedge the queue
                sent += 1;
                continue;
            };
            match socket.send_to(&pkt.data, dst) {
                Ok(_) => sent += 1,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[io] send_to {} failed: {}", dst, e);
                    break;
                }
            }
        }
        sent
    }

    fn rxq_bind(&self, port: usize, flow: &FlowSpec) -> Result<QueueId> {
        if port >= self.ifaces.len() {
            return Err(Error::InvalidPortCount(port + 1));
        }
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), flow.dst_port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| Error::BindFailed(format!("{}: {}", bind_addr, e)))?;
        if let IpAddr::V4(group) = flow.dst_ip {
            if group.is_multicast() {
                self.join_multicast(&socket, group, port)?;
            }
        }
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::BindFailed(e.to_string()))?;

        let queue = RxQueue {
            socket: socket.into(),
            source_filter: flow.source_filter,
        };
        let mut queues = self.rx_queues.write();
        // reuse a released slot if one exists
        if let Some(idx) = queues.iter().position(Option::is_none) {
            queues[idx] = Some(queue);
            Ok(QueueId(idx))
        } else {
            queues.push(Some(queue));
            Ok(QueueId(queues.len() - 1))
        }
    }

    fn rxq_release(&self, queue: QueueId) {
        let mut queues = self.rx_queues.write();
        if let Some(slot) = queues.get_mut(queue.0) {
            *slot = None;
        }
    }

    fn recv(&self, queue: QueueId, out: &mut Vec<Mbuf>, budget: usize) -> usize {
        let queues = self.rx_queues.read();
        let Some(Some(q)) = queues.get(queue.0) else {
            return 0;
        };
        let mut buf = [0u8; 2048];
        let mut n = 0;
        while n < budget {
            match q.socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    if let Some(filter) = q.source_filter {
                        if src.ip() != filter {
                            continue;
                        }
                    }
                    out.push(Mbuf::new(buf[..len].to_vec()));
                    n += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!("[io] recv error on queue {}: {}", queue.0, e);
                    break;
                }
            }
        }
        n
    }
}
