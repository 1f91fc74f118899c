// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hmx - SMPTE ST 2110 media-over-IP transport
//!
//! A pure Rust implementation of the professional media-over-IP transport
//! family: uncompressed video (ST 2110-20), compressed video (ST 2110-22),
//! audio (ST 2110-30/-31), ancillary data (ST 2110-40) and fast metadata
//! (ST 2110-41), over a user-space packet I/O path with RFC 4175 /
//! RFC 3550 wire formats and ST 2110-21 transmit timing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hmx::{Instance, VideoConfig, BaseConfig, Direction, PortAddr};
//! use hmx::{Fps, St20Fmt, UdpPacketIo};
//! use std::net::{IpAddr, Ipv4Addr, SocketAddr};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> hmx::Result<()> {
//!     let io = Arc::new(UdpPacketIo::new(vec![Ipv4Addr::new(192, 168, 1, 10)])?);
//!     let instance = Instance::builder().lcores(2).packet_io(io).build()?;
//!
//!     let port = PortAddr {
//!         addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 1, 1, 1)), 20000),
//!         source_filter: None,
//!     };
//!     let base = BaseConfig::new(Direction::Rx, "cam-1", vec![port]);
//!     let cfg = VideoConfig::new(base, 1920, 1080, Fps::P50, St20Fmt::Yuv422_10bit);
//!     let session = instance.create_video_session(cfg)?;
//!     session.start();
//!
//!     let frame = session.buffer_get(Duration::from_millis(100))?;
//!     // ... consume frame.data() ...
//!     session.buffer_put(frame)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                       Application threads                          |
//! |      Session facade: buffer_get / buffer_put / event_poll          |
//! +--------------------------------------------------------------------+
//! |                        Session cores                               |
//! |  ST20 RX/TX | ST30 RX/TX | ST40 RX/TX | ST41 RX/TX | dedup | ring  |
//! +--------------------------------------------------------------------+
//! |                 Wire formats & pixel kernels                       |
//! |   RFC 3550/4175/9134/8331, ST41, AM824 | scalar/wide/DMA tiers     |
//! +--------------------------------------------------------------------+
//! |                External collaborators (traits)                     |
//! |     PacketIo | PtpClock | DmaEngine | CodecPlugin | Scheduler      |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Instance`] | Library instance: scheduler, packet I/O, plug-ins |
//! | [`Session`] | Opaque per-stream handle, media-dispatched |
//! | [`Buffer`] | Unified frame/item buffer moved to and from a session |
//! | [`Event`] | Vsync / format-detect / slice / timing / error events |
//! | [`PacketIo`] | Packet transmit/receive contract |
//!
//! ## Modules Overview
//!
//! - [`session`] - the polymorphic facade (start here)
//! - [`kernels`] - pixel-group conversions (scalar / wide / DMA-staged)
//! - [`wire`] - bit-exact header codecs
//! - [`dedup`] - ST 2022-7 redundant-path merge
//! - [`pacing`] - epoch clock and ST 2110-21 sender schedules
//! - [`io`] - external collaborator traits and the UDP default

/// ST 2110-40 ancillary-data sessions.
pub mod anc;
/// ST 2110-30/-31 audio sessions.
pub mod audio;
/// ST 2022-7 receive-side dedup state.
pub mod dedup;
/// Error types and the POSIX errno mapping.
pub mod error;
/// ST 2110-41 fast-metadata sessions.
pub mod fm;
/// External collaborator interfaces and user-space defaults.
pub mod io;
/// Pixel-group conversion kernels.
pub mod kernels;
/// Epoch clock and TX pacing math.
pub mod pacing;
/// ST 2110-22 codec plug-in contract and registry.
pub mod plugin;
/// Ownership-tracked frame-slot ring.
pub mod ring;
/// Receive-side state machines (ST20 reassembly, detector, timing).
pub mod rx;
/// Cooperative tasklet scheduler.
pub mod sched;
/// The polymorphic session facade.
pub mod session;
/// Per-session statistics counters.
pub mod stats;
/// Transmit-side state machines (ST20 pacing, RTCP retransmission).
pub mod tx;
/// Core media types: rates, formats, pixel groups, audio tables.
pub mod types;
/// Bit-exact wire-format codecs.
pub mod wire;

pub use error::{Error, Result};
pub use io::{DmaEngine, FlowSpec, Mbuf, MemcpyDma, PacketIo, PtpClock, QueueId, SystemClock, UdpPacketIo};
pub use session::{
    flags, AncConfig, AudioConfig, AudioPacingWay, BaseConfig, Buffer, Direction, Event, FmConfig,
    Instance, InstanceBuilder, MediaInfo, MediaType, PortAddr, QueueMeta, Session, VideoConfig,
};
pub use types::{
    AudioFmt, AudioPtime, AudioSampling, FrameStatus, Fps, PacingProfile, Packing, PixelGroup,
    SessionPort, St20Fmt, TpCompliant,
};

/// hmx version string.
pub const VERSION: &str = "0.4.2";
