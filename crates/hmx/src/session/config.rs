// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session configuration: the common base, per-media configs, flags.

use crate::error::{Error, Result};
use crate::types::{
    AudioFmt, AudioPtime, AudioSampling, Fps, PacingProfile, Packing, St20Fmt,
};
use std::net::{IpAddr, SocketAddr};

/// Session direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Media type tag of a session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
    Ancillary,
    FastMetadata,
}

/// Session behavior flags (bit positions match across media types).
pub mod flags {
    /// Use external/user-owned frame buffers.
    pub const EXT_BUFFER: u32 = 1 << 0;
    /// TX: application controls pacing via frame timestamps.
    pub const USER_PACING: u32 = 1 << 1;
    /// TX: application supplies the RTP timestamp verbatim.
    pub const USER_TIMESTAMP: u32 = 1 << 2;
    /// Emit a Vsync event at every epoch boundary.
    pub const ENABLE_VSYNC: u32 = 1 << 3;
    /// Enable RTCP (TX: NACK retransmission; RX: NACK emission).
    pub const ENABLE_RTCP: u32 = 1 << 4;
    /// Pin session memory to the NIC's NUMA node.
    pub const FORCE_NUMA: u32 = 1 << 5;
    /// Application manages flow rules; session only consumes queues.
    pub const DATA_PATH_ONLY: u32 = 1 << 6;
    /// RX: deliver incomplete frames instead of dropping them.
    pub const RECEIVE_INCOMPLETE_FRAME: u32 = 1 << 7;
    /// RX: offload payload copies to the DMA engine.
    pub const DMA_OFFLOAD: u32 = 1 << 8;
    /// RX: NIC splits RTP headers from payloads.
    pub const HDR_SPLIT: u32 = 1 << 9;
    /// `buffer_get` blocks (otherwise immediate Timeout when empty).
    pub const BLOCK_GET: u32 = 1 << 10;
    /// TX: user pacing timestamp is the literal first-packet TAI.
    pub const EXACT_USER_PACING: u32 = 1 << 13;
    /// TX: RTP timestamps derive from the epoch, not first-packet time.
    pub const RTP_TIMESTAMP_EPOCH: u32 = 1 << 14;
    /// TX: emit one packet per tick instead of bulk bursts.
    pub const DISABLE_BULK: u32 = 1 << 15;
    /// TX: enable static-padding training for narrow RL pacing.
    pub const STATIC_PADDING: u32 = 1 << 16;
    /// RX: allow the multi-threaded packet path.
    pub const MULTI_THREADED_RX: u32 = 1 << 17;
}

/// One direction of wire addressing for a session port.
#[derive(Debug, Clone)]
pub struct PortAddr {
    /// TX: destination; RX: flow destination to bind.
    pub addr: SocketAddr,
    /// RX only: optional multicast source filter.
    pub source_filter: Option<IpAddr>,
}

/// Base configuration embedded in every media config.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    pub direction: Direction,
    /// Session name for diagnostics.
    pub name: String,
    /// 1 port (single path) or 2 (ST 2022-7 redundant pair).
    pub ports: Vec<PortAddr>,
    pub payload_type: u8,
    /// TX: SSRC to stamp. RX: expected SSRC, or None to learn from the
    /// first accepted packet.
    pub ssrc: Option<u32>,
    /// Frame buffers in the slot ring.
    pub num_buffers: u16,
    /// OR of [`flags`] bits.
    pub flags: u32,
    /// Lcore the session's tasklet runs on.
    pub lcore: usize,
    /// Redundant-drop threshold before dedup force-accept (0 = default).
    pub dedup_threshold: u32,
}

impl BaseConfig {
    pub fn new(direction: Direction, name: impl Into<String>, ports: Vec<PortAddr>) -> Self {
        BaseConfig {
            direction,
            name: name.into(),
            ports,
            payload_type: 96,
            ssrc: None,
            num_buffers: 3,
            flags: 0,
            lcore: 0,
            dedup_threshold: 0,
        }
    }

    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() || self.ports.len() > 2 {
            return Err(Error::InvalidPortCount(self.ports.len()));
        }
        if self.num_buffers == 0 {
            return Err(Error::InvalidBufferCount(self.num_buffers));
        }
        if self.payload_type > 0x7f {
            return Err(Error::InvalidFormat(format!(
                "payload type {} exceeds 7 bits",
                self.payload_type
            )));
        }
        Ok(())
    }

    pub fn redundant(&self) -> bool {
        self.ports.len() == 2
    }
}

/// ST 2110-20/-22 video session configuration.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub base: BaseConfig,
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub interlaced: bool,
    /// Wire (transport) format.
    pub fmt: St20Fmt,
    pub packing: Packing,
    /// TX pacing profile.
    pub pacing: PacingProfile,
    /// Line stride in bytes; 0 = minimum (no padding).
    pub linesize: u32,
    /// RX slice mode: emit SliceReady every multiple of this many lines
    /// (0 = frame mode).
    pub slice_lines: u32,
    /// RX: infer width/height/fps from the stream.
    pub auto_detect: bool,
    /// RX: run the ST 2110-21 timing parser.
    pub timing_parser: bool,
    /// TX: retransmit ring size in packets, power of two (0 = RTCP off
    /// regardless of the flag).
    pub rtcp_buffer_size: usize,
    /// TX: pre-trained pad interval (0 = train when STATIC_PADDING set).
    pub pad_interval: u32,
    /// TX: RTP timestamp delta in microseconds.
    pub rtp_timestamp_delta_us: i32,
    /// ST 2110-22: codec name for the plug-in registry (None = ST20
    /// uncompressed).
    pub codec: Option<String>,
}

impl VideoConfig {
    pub fn new(base: BaseConfig, width: u32, height: u32, fps: Fps, fmt: St20Fmt) -> Self {
        VideoConfig {
            base,
            width,
            height,
            fps,
            interlaced: false,
            fmt,
            packing: Packing::Bpm,
            pacing: PacingProfile::Narrow,
            linesize: 0,
            slice_lines: 0,
            auto_detect: false,
            timing_parser: false,
            rtcp_buffer_size: 0,
            pad_interval: 0,
            rtp_timestamp_delta_us: 0,
            codec: None,
        }
    }

    /// Effective line stride in bytes.
    pub fn line_stride(&self) -> Result<u32> {
        let min = self.fmt.line_size(self.width)?;
        if self.linesize == 0 {
            return Ok(min);
        }
        if self.linesize < min {
            return Err(Error::InvalidDimensions(self.width, self.height));
        }
        Ok(self.linesize)
    }

    /// Frame bytes including line padding.
    pub fn frame_size(&self) -> Result<usize> {
        if self.height == 0 {
            return Err(Error::InvalidDimensions(self.width, self.height));
        }
        Ok(self.line_stride()? as usize * self.height as usize)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if !self.auto_detect {
            self.frame_size()?;
        }
        if self.rtcp_buffer_size != 0 && !self.rtcp_buffer_size.is_power_of_two() {
            return Err(Error::RingSizeNotPowerOfTwo(self.rtcp_buffer_size));
        }
        if self.base.has_flag(flags::HDR_SPLIT) && self.packing != Packing::Bpm {
            // header-split relies on fixed payload strides; anything but
            // BPM cannot be honored and must not be silently disabled
            return Err(Error::HeaderSplitUnsupported);
        }
        Ok(())
    }
}

/// ST 2110-30/-31 audio session configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub base: BaseConfig,
    pub fmt: AudioFmt,
    pub channels: u16,
    pub sampling: AudioSampling,
    pub ptime: AudioPtime,
    /// Frame buffer size in bytes; must be a whole number of packets.
    pub framebuff_size: usize,
    /// TX pacing: rate-limited (launch times) vs timestamp-spin.
    pub pacing_way: AudioPacingWay,
}

/// ST30 TX pacing selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioPacingWay {
    #[default]
    Auto,
    /// NIC rate-limit / launch-time based.
    RateLimit,
    /// TSC/clock-spin based.
    Tsc,
}

impl AudioConfig {
    /// Bytes per RTP packet for this config.
    pub fn packet_size(&self) -> Result<usize> {
        crate::types::st30_packet_size(self.fmt, self.channels, self.sampling, self.ptime)
    }

    /// Packets per frame buffer.
    pub fn pkts_per_frame(&self) -> Result<usize> {
        let pkt = self.packet_size()?;
        if self.framebuff_size == 0 || self.framebuff_size % pkt != 0 {
            return Err(Error::InvalidFormat(format!(
                "framebuff_size {} is not a multiple of packet size {}",
                self.framebuff_size, pkt
            )));
        }
        Ok(self.framebuff_size / pkt)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        self.pkts_per_frame()?;
        Ok(())
    }
}

/// ST 2110-40 ancillary session configuration.
#[derive(Debug, Clone)]
pub struct AncConfig {
    pub base: BaseConfig,
    pub fps: Fps,
    pub interlaced: bool,
    /// RTP packet ring depth (power of two).
    pub ring_size: usize,
}

impl AncConfig {
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if !self.ring_size.is_power_of_two() {
            return Err(Error::RingSizeNotPowerOfTwo(self.ring_size));
        }
        Ok(())
    }
}

/// ST 2110-41 fast-metadata session configuration.
#[derive(Debug, Clone)]
pub struct FmConfig {
    pub base: BaseConfig,
    pub fps: Fps,
    /// Data Item Type stamped on TX packets (22 bits).
    pub data_item_type: u32,
    /// K-bit stamped on TX packets.
    pub k_bit: bool,
    /// RTP packet ring depth (power of two).
    pub ring_size: usize,
}

impl FmConfig {
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.data_item_type > crate::wire::st41::MAX_DATA_ITEM_TYPE {
            return Err(Error::InvalidFormat(format!(
                "data item type {:#x} exceeds 22 bits",
                self.data_item_type
            )));
        }
        if !self.ring_size.is_power_of_two() {
            return Err(Error::RingSizeNotPowerOfTwo(self.ring_size));
        }
        Ok(())
    }
}
