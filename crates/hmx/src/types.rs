// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core media types: frame rates, transport formats, pixel groups,
//! audio sampling/packet-time tables.
//!
//! Everything here is a plain value type shared by the wire codecs, the
//! conversion kernels and the session state machines. The pixel-group
//! table is the single authority for bytes-per-group / pixels-per-group
//! used by RFC 4175 offset arithmetic.

use crate::error::{Error, Result};

/// Video media clock rate per SMPTE ST 2110-10 (90 kHz).
pub const VIDEO_MEDIA_CLOCK_RATE: u64 = 90_000;

/// Standard frame rates of ST 2110-20/-22/-40.
///
/// Fractional rates carry the exact 1001-denominator rational so epoch and
/// RTP-timestamp arithmetic stays drift-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fps {
    P23_98,
    P24,
    P25,
    P29_97,
    P30,
    P50,
    P59_94,
    P60,
    P100,
    P119_88,
    P120,
}

impl Fps {
    /// All standard rates, used by the RX format detector.
    pub const ALL: [Fps; 11] = [
        Fps::P23_98,
        Fps::P24,
        Fps::P25,
        Fps::P29_97,
        Fps::P30,
        Fps::P50,
        Fps::P59_94,
        Fps::P60,
        Fps::P100,
        Fps::P119_88,
        Fps::P120,
    ];

    /// Exact rate as a (numerator, denominator) rational in frames/second.
    pub fn rational(self) -> (u64, u64) {
        match self {
            Fps::P23_98 => (24_000, 1001),
            Fps::P24 => (24, 1),
            Fps::P25 => (25, 1),
            Fps::P29_97 => (30_000, 1001),
            Fps::P30 => (30, 1),
            Fps::P50 => (50, 1),
            Fps::P59_94 => (60_000, 1001),
            Fps::P60 => (60, 1),
            Fps::P100 => (100, 1),
            Fps::P119_88 => (120_000, 1001),
            Fps::P120 => (120, 1),
        }
    }

    /// Frame period in nanoseconds, rounded to nearest.
    pub fn frame_time_ns(self) -> u64 {
        let (num, den) = self.rational();
        (den * 1_000_000_000 + num / 2) / num
    }

    /// Epoch index for a TAI instant: `E(t) = floor(t * fps)`.
    pub fn epoch_of(self, tai_ns: u64) -> u64 {
        let (num, den) = self.rational();
        ((tai_ns as u128 * num as u128) / (den as u128 * 1_000_000_000)) as u64
    }

    /// TAI nanoseconds at the start of an epoch.
    pub fn epoch_start_ns(self, epoch: u64) -> u64 {
        let (num, den) = self.rational();
        ((epoch as u128 * den as u128 * 1_000_000_000) / num as u128) as u64
    }

    /// RTP media timestamp (90 kHz ticks, mod 2^32) for an epoch.
    pub fn rtp_timestamp_of(self, epoch: u64) -> u32 {
        let (num, den) = self.rational();
        ((epoch as u128 * VIDEO_MEDIA_CLOCK_RATE as u128 * den as u128) / num as u128) as u32
    }

    /// Media-clock ticks per frame, rounded to nearest.
    pub fn ticks_per_frame(self) -> u32 {
        let (num, den) = self.rational();
        ((VIDEO_MEDIA_CLOCK_RATE as u128 * den as u128 + num as u128 / 2) / num as u128) as u32
    }

    /// Nominal rate in millihertz, used by the detector to match a measured
    /// frame interval against the standard table.
    pub fn millihertz(self) -> u64 {
        let (num, den) = self.rational();
        num * 1000 / den
    }
}

impl std::fmt::Display for Fps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Fps::P23_98 => "23.98",
            Fps::P24 => "24",
            Fps::P25 => "25",
            Fps::P29_97 => "29.97",
            Fps::P30 => "30",
            Fps::P50 => "50",
            Fps::P59_94 => "59.94",
            Fps::P60 => "60",
            Fps::P100 => "100",
            Fps::P119_88 => "119.88",
            Fps::P120 => "120",
        };
        write!(f, "{}fps", name)
    }
}

/// Session port identity for ST 2022-7 redundant pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPort {
    /// Primary path.
    P,
    /// Redundant path.
    R,
}

impl SessionPort {
    /// Array index for per-port state.
    pub fn index(self) -> usize {
        match self {
            SessionPort::P => 0,
            SessionPort::R => 1,
        }
    }
}

/// ST 2110-20 transport (wire) formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum St20Fmt {
    Yuv422_8bit,
    Yuv422_10bit,
    Yuv422_12bit,
    Yuv422_16bit,
    Yuv420_8bit,
    Yuv420_10bit,
    Yuv420_12bit,
    Yuv444_8bit,
    Yuv444_10bit,
    Yuv444_12bit,
    Yuv444_16bit,
    Rgb8bit,
    Rgb10bit,
    Rgb12bit,
    Rgb16bit,
}

/// RFC 4175 pixel group geometry: the smallest packing unit on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelGroup {
    /// Pixel group size in octets.
    pub size: u32,
    /// Pixel group coverage in pixels.
    pub coverage: u32,
}

impl St20Fmt {
    /// Pixel-group geometry for this transport format.
    pub fn pixel_group(self) -> PixelGroup {
        let (size, coverage) = match self {
            St20Fmt::Yuv422_8bit => (4, 2),
            St20Fmt::Yuv422_10bit => (5, 2),
            St20Fmt::Yuv422_12bit => (6, 2),
            St20Fmt::Yuv422_16bit => (8, 2),
            St20Fmt::Yuv420_8bit => (6, 4),
            St20Fmt::Yuv420_10bit => (15, 8),
            St20Fmt::Yuv420_12bit => (9, 4),
            St20Fmt::Yuv444_8bit | St20Fmt::Rgb8bit => (3, 1),
            St20Fmt::Yuv444_10bit | St20Fmt::Rgb10bit => (15, 4),
            St20Fmt::Yuv444_12bit | St20Fmt::Rgb12bit => (9, 2),
            St20Fmt::Yuv444_16bit | St20Fmt::Rgb16bit => (6, 1),
        };
        PixelGroup { size, coverage }
    }

    /// Minimum bytes for one scan line of `width` pixels.
    ///
    /// Fails when the width is not a multiple of the pixel-group coverage.
    pub fn line_size(self, width: u32) -> Result<u32> {
        let pg = self.pixel_group();
        if width == 0 || width % pg.coverage != 0 {
            return Err(Error::InvalidDimensions(width, 0));
        }
        Ok(width / pg.coverage * pg.size)
    }

    /// Total frame bytes for `width` x `height` with no line padding.
    pub fn frame_size(self, width: u32, height: u32) -> Result<usize> {
        if height == 0 {
            return Err(Error::InvalidDimensions(width, height));
        }
        Ok(self.line_size(width)? as usize * height as usize)
    }
}

/// RX frame delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    #[default]
    /// Every expected packet arrived on the primary path.
    Complete,
    /// Complete, but at least one gap was filled by the redundant path.
    Reconstructed,
    /// Missing packets at delivery time.
    Incomplete,
    /// Payload failed a sanity check after reassembly.
    Corrupted,
}

impl FrameStatus {
    /// Complete and reconstructed frames are both deliverable as whole.
    pub fn is_complete(self) -> bool {
        matches!(self, FrameStatus::Complete | FrameStatus::Reconstructed)
    }
}

/// ST 2110-20 packetization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// Block packing mode: fixed payload, packets may span lines.
    Bpm,
    /// General packing mode: packets may carry multiple SRDs.
    Gpm,
    /// General packing mode restricted to a single scan line per packet.
    GpmSl,
}

/// ST 2110-21 sender pacing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingProfile {
    /// Narrow gapped sender.
    Narrow,
    /// Wide sender.
    Wide,
    /// Linear sender: uniform spacing over the whole frame interval.
    Linear,
    /// Spacing enforced by NIC TSN launch-time offload.
    Tsn,
}

/// ST 2110-21 receiver-side compliance verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpCompliant {
    Narrow,
    Wide,
    Failed,
}

/// Audio sampling rates of ST 2110-30/-31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampling {
    K48,
    K96,
    K44_1,
}

impl AudioSampling {
    /// Samples per second.
    pub fn rate(self) -> u32 {
        match self {
            AudioSampling::K48 => 48_000,
            AudioSampling::K96 => 96_000,
            AudioSampling::K44_1 => 44_100,
        }
    }
}

/// Audio PCM formats. AM824 is the ST 2110-31 32-bit subframe carriage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFmt {
    Pcm8,
    Pcm16,
    Pcm24,
    Am824,
}

impl AudioFmt {
    /// Bytes per sample per channel.
    pub fn sample_size(self) -> usize {
        match self {
            AudioFmt::Pcm8 => 1,
            AudioFmt::Pcm16 => 2,
            AudioFmt::Pcm24 => 3,
            AudioFmt::Am824 => 4,
        }
    }
}

/// Audio packet time. The nominal durations are labels; the exact quantum
/// is the per-rate sample count below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPtime {
    P1Ms,
    P125Us,
    P250Us,
    P333Us,
    P4Ms,
    P80Us,
    /// 1.09 ms, only for 44.1 kHz.
    P1_09Ms,
    /// 0.14 ms, only for 44.1 kHz.
    P0_14Ms,
    /// 0.09 ms, only for 44.1 kHz.
    P0_09Ms,
}

impl AudioPtime {
    /// Samples per channel per packet at the given sampling rate.
    ///
    /// Returns `InvalidFormat` for combinations the standards do not define
    /// (the 44.1 kHz packet times with 48/96 kHz rates and vice versa).
    pub fn sample_count(self, sampling: AudioSampling) -> Result<u32> {
        let n = match (self, sampling) {
            (AudioPtime::P1Ms, AudioSampling::K48) => 48,
            (AudioPtime::P1Ms, AudioSampling::K96) => 96,
            (AudioPtime::P125Us, AudioSampling::K48) => 6,
            (AudioPtime::P125Us, AudioSampling::K96) => 12,
            (AudioPtime::P250Us, AudioSampling::K48) => 12,
            (AudioPtime::P250Us, AudioSampling::K96) => 24,
            (AudioPtime::P333Us, AudioSampling::K48) => 16,
            (AudioPtime::P333Us, AudioSampling::K96) => 32,
            (AudioPtime::P4Ms, AudioSampling::K48) => 192,
            (AudioPtime::P4Ms, AudioSampling::K96) => 384,
            (AudioPtime::P80Us, AudioSampling::K48) => 4,
            (AudioPtime::P80Us, AudioSampling::K96) => 8,
            (AudioPtime::P1_09Ms, AudioSampling::K44_1) => 48,
            (AudioPtime::P0_14Ms, AudioSampling::K44_1) => 6,
            (AudioPtime::P0_09Ms, AudioSampling::K44_1) => 4,
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "ptime {:?} not defined for sampling {:?}",
                    self, sampling
                )))
            }
        };
        Ok(n)
    }

    /// Exact packet period in nanoseconds at the given sampling rate.
    pub fn packet_time_ns(self, sampling: AudioSampling) -> Result<u64> {
        let samples = self.sample_count(sampling)? as u64;
        Ok(samples * 1_000_000_000 / sampling.rate() as u64)
    }
}

/// Audio payload bytes per RTP packet for a format/channel/ptime tuple.
pub fn st30_packet_size(
    fmt: AudioFmt,
    channels: u16,
    sampling: AudioSampling,
    ptime: AudioPtime,
) -> Result<usize> {
    if channels == 0 {
        return Err(Error::InvalidFormat("zero audio channels".into()));
    }
    let samples = ptime.sample_count(sampling)? as usize;
    Ok(samples * channels as usize * fmt.sample_size())
}
