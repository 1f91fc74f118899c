// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 3550 RTP base header (12 bytes).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! CSRC lists, padding and header extensions are not used by any ST 2110
//! profile this crate implements; a decoded header with `csrc_count != 0`
//! or the extension bit set is rejected as malformed.

/// Size of the RTP base header in bytes.
pub const RTP_HDR_LEN: usize = 12;

/// RTP protocol version emitted and accepted.
pub const RTP_VERSION: u8 = 2;

/// Decoded RFC 3550 base header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Marker bit; ST 2110-20 sets it on the last packet of a field/frame.
    pub marker: bool,
    /// Payload type (7 bits).
    pub payload_type: u8,
    /// Sequence number, low 16 bits.
    pub seq: u16,
    /// Media timestamp.
    pub timestamp: u32,
    /// Synchronization source.
    pub ssrc: u32,
}

impl RtpHeader {
    /// Encode into `buf[0..12]`. Returns the encoded length.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`RTP_HDR_LEN`]; callers size packet
    /// buffers up front.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = RTP_VERSION << 6; // V=2, P=0, X=0, CC=0
        buf[1] = (u8::from(self.marker) << 7) | (self.payload_type & 0x7f);
        buf[2..4].copy_from_slice(&self.seq.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        RTP_HDR_LEN
    }

    /// Decode from `buf[0..12]`.
    ///
    /// Returns `None` on short input, wrong version, or any of the unused
    /// RFC 3550 features (padding/extension/CSRC) being present.
    pub fn decode(buf: &[u8]) -> Option<RtpHeader> {
        if buf.len() < RTP_HDR_LEN {
            return None;
        }
        if buf[0] >> 6 != RTP_VERSION {
            return None;
        }
        // P/X/CC all zero for ST 2110 payloads
        if buf[0] & 0x3f != 0 {
            return None;
        }
        Some(RtpHeader {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            seq: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}
