// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The polymorphic session facade.
//!
//! One [`Session`] handle type fronts every media core. Creation is
//! type-specific (one constructor per media on [`Instance`]); everything
//! after that - `buffer_get`, `buffer_put`, `event_poll`, `start`,
//! `stop` - dispatches through one trait object to the per-media
//! implementation, off the datapath.
//!
//! Blocking semantics: every blocking call takes a timeout and returns
//! [`Error::Timeout`] with no side effect when it expires. `stop()` makes
//! any blocked and future call return [`Error::Again`] until `start()`;
//! it is idempotent and thread-safe.

pub mod config;
pub mod events;

pub use config::{
    flags, AncConfig, AudioConfig, AudioPacingWay, BaseConfig, Direction, FmConfig, MediaType,
    PortAddr, VideoConfig,
};
pub use events::{Event, EventQueue};

use crate::anc::{AncRxSession, AncRxShared, AncTxSession, AncTxShared};
use crate::audio::{AudioRxSession, AudioRxShared, AudioTxSession, AudioTxShared};
use crate::error::{Error, Result};
use crate::fm::{FmItem, FmRxSession, FmRxShared, FmTxSession, FmTxShared};
use crate::io::{DmaEngine, PacketIo, PtpClock, SystemClock};
use crate::plugin::{PluginDevice, PluginRegistry};
use crate::ring::{ExtFrame, SlotIndex, SlotMeta, SlotTimestamps};
use crate::rx::video::{ExtProvider, RxVideoSession, RxVideoShared};
use crate::sched::{Scheduler, Tasklet, TickResult};
use crate::tx::video::{TxVideoSession, TxVideoShared};
use crate::types::FrameStatus;
use crate::wire::rfc8331::AncPacket;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Media-specific extras carried alongside a [`Buffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaInfo {
    None,
    /// ST 2110-40: field flag of the payload header.
    Ancillary { field: u8 },
    /// ST 2110-41: data item type and K-bit.
    FastMetadata { data_item_type: u32, k_bit: bool },
}

enum Payload {
    /// Frame-slot backed: pointer into the session's ring buffer.
    Slot { ptr: *mut u8, len: usize },
    /// Self-contained bytes (ANC/FM RTP-level sessions).
    Inline(Vec<u8>),
    /// External-buffer slot awaiting an attachment from the app.
    Empty,
}

/// The unified buffer moved between the application and a session.
///
/// RX: obtained full from `buffer_get`, returned via `buffer_put`.
/// TX: obtained empty from `buffer_get`, filled, submitted via
/// `buffer_put`.
pub struct Buffer {
    slot: Option<SlotIndex>,
    payload: Payload,
    session_id: u64,
    /// Valid bytes (RX) or bytes to send (TX inline payloads).
    pub size: usize,
    /// Presentation / user-pacing timestamp, TAI ns.
    pub timestamp: u64,
    pub rtp_timestamp: u32,
    pub epoch: u64,
    pub status: FrameStatus,
    /// Interlaced: this buffer carries the second field.
    pub second_field: bool,
    /// Opaque per-frame metadata (TX: sent as a companion packet).
    pub user_meta: Option<Vec<u8>>,
    pub pkts_total: u32,
    pub pkts_recv: [u32; 2],
    pub media_info: MediaInfo,
    /// TX external-buffer mode: attachment submitted with the frame.
    pub ext: Option<ExtFrame>,
}

// SAFETY: the raw pointer refers to a ring slot the application owns for
// the lifetime of this Buffer (status-gated, see `ring`); sending the
// Buffer between threads transfers that ownership whole.
unsafe impl Send for Buffer {}

impl Buffer {
    fn from_slot(session_id: u64, slot: SlotIndex, ptr: *mut u8, len: usize) -> Self {
        Buffer {
            slot: Some(slot),
            payload: Payload::Slot { ptr, len },
            session_id,
            size: 0,
            timestamp: 0,
            rtp_timestamp: 0,
            epoch: 0,
            status: FrameStatus::Complete,
            second_field: false,
            user_meta: None,
            pkts_total: 0,
            pkts_recv: [0; 2],
            media_info: MediaInfo::None,
            ext: None,
        }
    }

    fn inline(session_id: u64, data: Vec<u8>) -> Self {
        let size = data.len();
        Buffer {
            slot: None,
            payload: Payload::Inline(data),
            session_id,
            size,
            timestamp: 0,
            rtp_timestamp: 0,
            epoch: 0,
            status: FrameStatus::Complete,
            second_field: false,
            user_meta: None,
            pkts_total: 0,
            pkts_recv: [0; 2],
            media_info: MediaInfo::None,
            ext: None,
        }
    }

    fn empty(session_id: u64, slot: SlotIndex) -> Self {
        Buffer {
            slot: Some(slot),
            payload: Payload::Empty,
            session_id,
            size: 0,
            timestamp: 0,
            rtp_timestamp: 0,
            epoch: 0,
            status: FrameStatus::Complete,
            second_field: false,
            user_meta: None,
            pkts_total: 0,
            pkts_recv: [0; 2],
            media_info: MediaInfo::None,
            ext: None,
        }
    }

    /// Buffer bytes.
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            // SAFETY: ownership per the Send contract above.
            Payload::Slot { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
            Payload::Inline(v) => v,
            Payload::Empty => &[],
        }
    }

    /// Mutable buffer bytes (TX fill path).
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.payload {
            // SAFETY: ownership per the Send contract above.
            Payload::Slot { ptr, len } => unsafe { std::slice::from_raw_parts_mut(*ptr, *len) },
            Payload::Inline(v) => v,
            Payload::Empty => &mut [],
        }
    }

    /// Replace the payload bytes of an inline buffer (ANC/FM TX).
    pub fn set_inline(&mut self, data: Vec<u8>) {
        self.size = data.len();
        self.payload = Payload::Inline(data);
    }
}

/// Queue occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMeta {
    /// Buffers ready for the consumer (RX frames / TX submissions).
    pub ready: usize,
    /// Buffers free for the producer.
    pub free: usize,
}

/// Internal dispatch target; one implementation per media/direction.
trait MediaSessionImpl: Send + Sync {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer>;
    fn buffer_put(&self, buf: Buffer) -> Result<()>;
    fn events(&self) -> &EventQueue;
    fn frame_size(&self) -> usize;
    fn queue_meta(&self) -> QueueMeta;
}

/// One opaque session handle, media-dispatched internally.
pub struct Session {
    id: u64,
    media: MediaType,
    dir: Direction,
    imp: Arc<dyn MediaSessionImpl>,
    closing: Arc<AtomicBool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("media", &self.media)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Session {
    pub fn media_type(&self) -> MediaType {
        self.media
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// RX: wait for the next Ready frame. TX: wait for a Free slot.
    pub fn buffer_get(&self, timeout: Duration) -> Result<Buffer> {
        self.imp.buffer_get(self.id, timeout)
    }

    /// RX: return a frame buffer for reuse. TX: submit a filled buffer.
    pub fn buffer_put(&self, buf: Buffer) -> Result<()> {
        if buf.session_id != self.id {
            return Err(Error::ForeignBuffer);
        }
        self.imp.buffer_put(buf)
    }

    /// Wait for the next session event.
    pub fn event_poll(&self, timeout: Duration) -> Result<Event> {
        self.imp.events().poll(timeout)
    }

    /// Start processing; blocking calls work again after this.
    pub fn start(&self) {
        self.imp.events().clear();
        self.imp.events().start();
    }

    /// Stop processing: any blocked call returns `Again` immediately.
    /// Idempotent and thread-safe.
    pub fn stop(&self) {
        self.imp.events().stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.imp.events().is_stopped()
    }

    /// Frame buffer size in bytes (0 for RTP-level sessions and for RX
    /// auto-detect before the format settles).
    pub fn frame_size(&self) -> usize {
        self.imp.frame_size()
    }

    pub fn queue_meta(&self) -> QueueMeta {
        self.imp.queue_meta()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
        self.closing.store(true, Ordering::Release);
    }
}

/// Tasklet wrapper that retires the session's core when the handle is
/// dropped.
struct SessionTasklet<T: Tasklet> {
    inner: T,
    closing: Arc<AtomicBool>,
}

impl<T: Tasklet> Tasklet for SessionTasklet<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn tick(&mut self) -> TickResult {
        if self.closing.load(Ordering::Acquire) {
            return TickResult::Done;
        }
        self.inner.tick()
    }
}

// ===== Per-media dispatch implementations =====

struct VideoRxImpl {
    shared: Arc<RxVideoShared>,
}

impl MediaSessionImpl for VideoRxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared.events.wait_for(timeout, || {
            shared
                .ring
                .load_full()
                .is_some_and(|r| r.ready_available())
        })?;
        let ring = shared.ring.load_full().ok_or(Error::Timeout)?;
        let (idx, meta) = ring.consume_ready().ok_or(Error::Timeout)?;
        // SAFETY: the slot is Ready+held; the application owns it until
        // buffer_put.
        let (ptr, len) = match unsafe { ring.buffer_mut(idx) } {
            Some(buf) => (buf.as_mut_ptr(), buf.len()),
            None => (std::ptr::null_mut(), 0),
        };
        let mut buffer = Buffer::from_slot(id, idx, ptr, len);
        fill_from_meta(&mut buffer, &meta);
        Ok(buffer)
    }

    fn buffer_put(&self, buf: Buffer) -> Result<()> {
        let slot = buf.slot.ok_or(Error::ForeignBuffer)?;
        let ring = self.shared.ring.load_full().ok_or(Error::ForeignBuffer)?;
        ring.release(slot)?;
        Ok(())
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        self.shared.frame_size.load(Ordering::Acquire)
    }

    fn queue_meta(&self) -> QueueMeta {
        match self.shared.ring.load_full() {
            Some(ring) => {
                let (ready, free) = ring.queue_meta();
                QueueMeta { ready, free }
            }
            None => QueueMeta { ready: 0, free: 0 },
        }
    }
}

fn fill_from_meta(buffer: &mut Buffer, meta: &SlotMeta) {
    buffer.size = meta.size;
    buffer.timestamp = meta.timestamps.capture;
    buffer.rtp_timestamp = meta.rtp_timestamp;
    buffer.epoch = meta.epoch;
    buffer.status = meta.status;
    buffer.second_field = meta.second_field;
    buffer.user_meta = meta.user_meta.clone();
    buffer.pkts_total = meta.pkts_total;
    buffer.pkts_recv = meta.pkts_recv;
}

struct VideoTxImpl {
    shared: Arc<TxVideoShared>,
    external: bool,
}

impl MediaSessionImpl for VideoTxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared
            .events
            .wait_for(timeout, || shared.ring.free_available())?;
        let idx = shared.ring.acquire_receive().ok_or(Error::Timeout)?;
        if self.external {
            return Ok(Buffer::empty(id, idx));
        }
        // SAFETY: the slot is Receiving (app-fill phase); the application
        // owns it until buffer_put.
        let (ptr, len) = match unsafe { shared.ring.buffer_mut(idx) } {
            Some(buf) => (buf.as_mut_ptr(), buf.len()),
            None => (std::ptr::null_mut(), 0),
        };
        Ok(Buffer::from_slot(id, idx, ptr, len))
    }

    fn buffer_put(&self, buf: Buffer) -> Result<()> {
        let slot = buf.slot.ok_or(Error::ForeignBuffer)?;
        if let Some(ext) = buf.ext {
            self.shared.ring.attach_external(slot, ext)?;
        }
        let meta = SlotMeta {
            size: if buf.size != 0 {
                buf.size
            } else {
                self.shared.frame_size
            },
            timestamps: SlotTimestamps {
                capture: buf.timestamp,
                ..Default::default()
            },
            rtp_timestamp: buf.rtp_timestamp,
            epoch: 0,
            status: FrameStatus::Complete,
            second_field: buf.second_field,
            pkts_total: 0,
            pkts_recv: [0; 2],
            user_meta: buf.user_meta.clone(),
        };
        self.shared.ring.promote_ready(slot, meta)?;
        Ok(())
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        self.shared.frame_size
    }

    fn queue_meta(&self) -> QueueMeta {
        let (ready, free) = self.shared.ring.queue_meta();
        QueueMeta { ready, free }
    }
}

struct AudioRxImpl {
    shared: Arc<AudioRxShared>,
}

impl MediaSessionImpl for AudioRxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared
            .events
            .wait_for(timeout, || shared.ring.ready_available())?;
        let (idx, meta) = shared.ring.consume_ready().ok_or(Error::Timeout)?;
        // SAFETY: Ready+held; app owns until put.
        let (ptr, len) = match unsafe { shared.ring.buffer_mut(idx) } {
            Some(buf) => (buf.as_mut_ptr(), buf.len()),
            None => (std::ptr::null_mut(), 0),
        };
        let mut buffer = Buffer::from_slot(id, idx, ptr, len);
        fill_from_meta(&mut buffer, &meta);
        Ok(buffer)
    }

    fn buffer_put(&self, buf: Buffer) -> Result<()> {
        let slot = buf.slot.ok_or(Error::ForeignBuffer)?;
        self.shared.ring.release(slot)?;
        Ok(())
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        self.shared.frame_size
    }

    fn queue_meta(&self) -> QueueMeta {
        let (ready, free) = self.shared.ring.queue_meta();
        QueueMeta { ready, free }
    }
}

struct AudioTxImpl {
    shared: Arc<AudioTxShared>,
}

impl MediaSessionImpl for AudioTxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared
            .events
            .wait_for(timeout, || shared.ring.free_available())?;
        let idx = shared.ring.acquire_receive().ok_or(Error::Timeout)?;
        // SAFETY: Receiving (app-fill); app owns until put.
        let (ptr, len) = match unsafe { shared.ring.buffer_mut(idx) } {
            Some(buf) => (buf.as_mut_ptr(), buf.len()),
            None => (std::ptr::null_mut(), 0),
        };
        Ok(Buffer::from_slot(id, idx, ptr, len))
    }

    fn buffer_put(&self, buf: Buffer) -> Result<()> {
        let slot = buf.slot.ok_or(Error::ForeignBuffer)?;
        let meta = SlotMeta {
            size: self.shared.frame_size,
            timestamps: SlotTimestamps {
                capture: buf.timestamp,
                ..Default::default()
            },
            rtp_timestamp: buf.rtp_timestamp,
            ..SlotMeta::default()
        };
        self.shared.ring.promote_ready(slot, meta)?;
        Ok(())
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        self.shared.frame_size
    }

    fn queue_meta(&self) -> QueueMeta {
        let (ready, free) = self.shared.ring.queue_meta();
        QueueMeta { ready, free }
    }
}

struct AncRxImpl {
    shared: Arc<AncRxShared>,
}

impl MediaSessionImpl for AncRxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared
            .events
            .wait_for(timeout, || !shared.queue.is_empty())?;
        let frame = shared.queue.pop().ok_or(Error::Timeout)?;
        // serialize the ANC packets back into their RFC 8331 body form
        let body_len: usize = frame.packets.iter().map(AncPacket::wire_len).sum();
        let mut body = vec![0u8; body_len];
        let mut at = 0;
        for pkt in &frame.packets {
            at += pkt.encode(&mut body[at..]);
        }
        let mut buffer = Buffer::inline(id, body);
        buffer.rtp_timestamp = frame.rtp_timestamp;
        buffer.media_info = MediaInfo::Ancillary { field: frame.field };
        Ok(buffer)
    }

    fn buffer_put(&self, _buf: Buffer) -> Result<()> {
        Ok(()) // inline buffers carry their own storage
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        0
    }

    fn queue_meta(&self) -> QueueMeta {
        QueueMeta {
            ready: self.shared.queue.len(),
            free: self.shared.queue.capacity() - self.shared.queue.len(),
        }
    }
}

struct AncTxImpl {
    shared: Arc<AncTxShared>,
}

impl MediaSessionImpl for AncTxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared
            .events
            .wait_for(timeout, || !shared.queue.is_full())?;
        Ok(Buffer::inline(id, Vec::new()))
    }

    fn buffer_put(&self, buf: Buffer) -> Result<()> {
        // parse the app-written RFC 8331 body into ANC packets
        let data = buf.data();
        let mut packets = Vec::new();
        let mut at = 0;
        while at < data.len() {
            let (pkt, len) = AncPacket::decode(&data[at..])
                .ok_or_else(|| Error::InvalidFormat("malformed ANC packet body".into()))?;
            packets.push(pkt);
            at += len;
        }
        if packets.is_empty() {
            return Err(Error::InvalidFormat("empty ANC submission".into()));
        }
        self.shared
            .queue
            .push(packets)
            .map_err(|_| Error::Again)?;
        Ok(())
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        0
    }

    fn queue_meta(&self) -> QueueMeta {
        QueueMeta {
            ready: self.shared.queue.len(),
            free: self.shared.queue.capacity() - self.shared.queue.len(),
        }
    }
}

struct FmRxImpl {
    shared: Arc<FmRxShared>,
}

impl MediaSessionImpl for FmRxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared
            .events
            .wait_for(timeout, || !shared.queue.is_empty())?;
        let FmItem {
            rtp_timestamp,
            data_item_type,
            k_bit,
            data,
        } = shared.queue.pop().ok_or(Error::Timeout)?;
        let mut buffer = Buffer::inline(id, data);
        buffer.rtp_timestamp = rtp_timestamp;
        buffer.media_info = MediaInfo::FastMetadata {
            data_item_type,
            k_bit,
        };
        Ok(buffer)
    }

    fn buffer_put(&self, _buf: Buffer) -> Result<()> {
        Ok(())
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        0
    }

    fn queue_meta(&self) -> QueueMeta {
        QueueMeta {
            ready: self.shared.queue.len(),
            free: self.shared.queue.capacity() - self.shared.queue.len(),
        }
    }
}

struct FmTxImpl {
    shared: Arc<FmTxShared>,
}

impl MediaSessionImpl for FmTxImpl {
    fn buffer_get(&self, id: u64, timeout: Duration) -> Result<Buffer> {
        let shared = &self.shared;
        shared
            .events
            .wait_for(timeout, || !shared.queue.is_full())?;
        Ok(Buffer::inline(id, Vec::new()))
    }

    fn buffer_put(&self, buf: Buffer) -> Result<()> {
        if buf.data().is_empty() {
            return Err(Error::InvalidFormat("empty fast-metadata item".into()));
        }
        self.shared
            .queue
            .push(buf.data().to_vec())
            .map_err(|_| Error::Again)?;
        Ok(())
    }

    fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    fn frame_size(&self) -> usize {
        0
    }

    fn queue_meta(&self) -> QueueMeta {
        QueueMeta {
            ready: self.shared.queue.len(),
            free: self.shared.queue.capacity() - self.shared.queue.len(),
        }
    }
}

// ===== Instance =====

/// Library instance: scheduler, packet I/O, clock, DMA, plug-ins.
/// Factory for sessions of every media type.
pub struct Instance {
    sched: Scheduler,
    io: Arc<dyn PacketIo>,
    clock: Arc<dyn PtpClock>,
    dma: Option<Arc<dyn DmaEngine>>,
    plugins: PluginRegistry,
    registered_mem: DashMap<u64, usize>,
    next_id: AtomicU64,
}

/// Builder for [`Instance`].
pub struct InstanceBuilder {
    lcores: usize,
    io: Option<Arc<dyn PacketIo>>,
    clock: Arc<dyn PtpClock>,
    dma: Option<Arc<dyn DmaEngine>>,
}

impl InstanceBuilder {
    pub fn lcores(mut self, n: usize) -> Self {
        self.lcores = n;
        self
    }

    pub fn packet_io(mut self, io: Arc<dyn PacketIo>) -> Self {
        self.io = Some(io);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn PtpClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dma(mut self, dma: Arc<dyn DmaEngine>) -> Self {
        self.dma = Some(dma);
        self
    }

    pub fn build(self) -> Result<Instance> {
        let io = self
            .io
            .ok_or_else(|| Error::InvalidFormat("packet I/O backend required".into()))?;
        // probe the kernel tier once so the level is logged at startup
        let _ = crate::kernels::cpu_level();
        Ok(Instance {
            sched: Scheduler::new(self.lcores),
            io,
            clock: self.clock,
            dma: self.dma,
            plugins: PluginRegistry::new(),
            registered_mem: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder {
            lcores: 1,
            io: None,
            clock: Arc::new(SystemClock),
            dma: None,
        }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Register application memory for DMA use. Returns the IOVA under
    /// which sessions may reference the region.
    pub fn mem_register(&self, ptr: *const u8, len: usize) -> Result<u64> {
        if ptr.is_null() || len == 0 {
            return Err(Error::MemNotRegistered);
        }
        let iova = ptr as u64;
        self.registered_mem.insert(iova, len);
        Ok(iova)
    }

    /// Release a region registered with [`Self::mem_register`].
    pub fn mem_unregister(&self, iova: u64) -> Result<()> {
        self.registered_mem
            .remove(&iova)
            .map(|_| ())
            .ok_or(Error::MemNotRegistered)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a video session (ST 2110-20, or -22 when `codec` is set).
    pub fn create_video_session(&self, cfg: VideoConfig) -> Result<Session> {
        self.create_video_session_inner(cfg, None)
    }

    /// Create an RX video session with an external-frame provider.
    pub fn create_video_session_with_provider(
        &self,
        cfg: VideoConfig,
        provider: ExtProvider,
    ) -> Result<Session> {
        self.create_video_session_inner(cfg, Some(provider))
    }

    fn create_video_session_inner(
        &self,
        cfg: VideoConfig,
        provider: Option<ExtProvider>,
    ) -> Result<Session> {
        if let Some(codec) = cfg.codec.as_deref() {
            // ST 2110-22: the codec must be present at create time
            self.plugins.lookup(codec, PluginDevice::Auto)?;
        }
        let id = self.next_id();
        let closing = Arc::new(AtomicBool::new(false));
        let lcore = cfg.base.lcore;
        match cfg.base.direction {
            Direction::Rx => {
                let dma = if cfg.base.has_flag(flags::DMA_OFFLOAD) {
                    self.dma.clone()
                } else {
                    None
                };
                let (mut core, shared) =
                    RxVideoSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock), dma)?;
                if let Some(provider) = provider {
                    core.set_ext_provider(provider);
                }
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::Video,
                    dir: Direction::Rx,
                    imp: Arc::new(VideoRxImpl { shared }),
                    closing,
                })
            }
            Direction::Tx => {
                let external = cfg.base.has_flag(flags::EXT_BUFFER);
                let (core, shared) =
                    TxVideoSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock))?;
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::Video,
                    dir: Direction::Tx,
                    imp: Arc::new(VideoTxImpl { shared, external }),
                    closing,
                })
            }
        }
    }

    /// Create an audio session (ST 2110-30/-31).
    pub fn create_audio_session(&self, cfg: AudioConfig) -> Result<Session> {
        let id = self.next_id();
        let closing = Arc::new(AtomicBool::new(false));
        let lcore = cfg.base.lcore;
        match cfg.base.direction {
            Direction::Rx => {
                let (core, shared) =
                    AudioRxSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock))?;
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::Audio,
                    dir: Direction::Rx,
                    imp: Arc::new(AudioRxImpl { shared }),
                    closing,
                })
            }
            Direction::Tx => {
                let (core, shared) =
                    AudioTxSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock))?;
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::Audio,
                    dir: Direction::Tx,
                    imp: Arc::new(AudioTxImpl { shared }),
                    closing,
                })
            }
        }
    }

    /// Create an ancillary-data session (ST 2110-40).
    pub fn create_ancillary_session(&self, cfg: AncConfig) -> Result<Session> {
        let id = self.next_id();
        let closing = Arc::new(AtomicBool::new(false));
        let lcore = cfg.base.lcore;
        match cfg.base.direction {
            Direction::Rx => {
                let (core, shared) =
                    AncRxSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock))?;
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::Ancillary,
                    dir: Direction::Rx,
                    imp: Arc::new(AncRxImpl { shared }),
                    closing,
                })
            }
            Direction::Tx => {
                let (core, shared) =
                    AncTxSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock))?;
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::Ancillary,
                    dir: Direction::Tx,
                    imp: Arc::new(AncTxImpl { shared }),
                    closing,
                })
            }
        }
    }

    /// Create a fast-metadata session (ST 2110-41).
    pub fn create_fast_metadata_session(&self, cfg: FmConfig) -> Result<Session> {
        let id = self.next_id();
        let closing = Arc::new(AtomicBool::new(false));
        let lcore = cfg.base.lcore;
        match cfg.base.direction {
            Direction::Rx => {
                let (core, shared) =
                    FmRxSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock))?;
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::FastMetadata,
                    dir: Direction::Rx,
                    imp: Arc::new(FmRxImpl { shared }),
                    closing,
                })
            }
            Direction::Tx => {
                let (core, shared) =
                    FmTxSession::create(cfg, Arc::clone(&self.io), Arc::clone(&self.clock))?;
                self.sched.register(
                    lcore,
                    Box::new(SessionTasklet {
                        inner: *core,
                        closing: Arc::clone(&closing),
                    }),
                );
                Ok(Session {
                    id,
                    media: MediaType::FastMetadata,
                    dir: Direction::Tx,
                    imp: Arc::new(FmTxImpl { shared }),
                    closing,
                })
            }
        }
    }
}
