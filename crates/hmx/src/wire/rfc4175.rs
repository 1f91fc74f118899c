// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 4175 payload header for ST 2110-20 uncompressed video.
//!
//! The video payload header extends the RTP base header with a 16-bit
//! extended sequence number followed by one or more Sample Row Data (SRD)
//! headers of 6 bytes each:
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Extended Sequence        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |R|         Length              |   R = retransmit (non-standard, bit 14)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|         Line No             |   F = second field
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C|         Offset              |   C = continuation (another SRD follows)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The retransmit bit in `row_length` is the RTCP-retransmission marker:
//! it is only usable when row lengths stay below 16384, which holds for
//! every format in the pixel-group table.

use super::rfc3550::{RtpHeader, RTP_HDR_LEN};

/// Continuation bit: another SRD header follows this one.
pub const SRD_OFFSET_CONTINUATION: u16 = 1 << 15;
/// Field bit in row_number: payload belongs to the second field.
pub const SRD_SECOND_FIELD: u16 = 1 << 15;
/// Retransmit bit in row_length.
pub const SRD_RETRANSMIT: u16 = 1 << 14;
/// Row-number sentinel marking a per-frame user-metadata companion
/// packet. Like the retransmit bit, a non-standard extension: the packet
/// rides the session's configured payload type, and no raster reaches
/// scan line 32767, so the sentinel cannot collide with video data.
pub const SRD_USER_META_ROW: u16 = 0x7fff;

/// Bytes per SRD header on the wire.
pub const SRD_LEN: usize = 6;
/// Bytes of RFC 4175 header before the first SRD (RTP base + ext seq).
pub const RFC4175_FIXED_LEN: usize = RTP_HDR_LEN + 2;

/// Maximum SRDs this implementation emits in one packet (GPM).
pub const MAX_SRD_PER_PACKET: usize = 3;

/// One decoded Sample Row Data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleRowData {
    /// Octets of payload for this row segment.
    pub row_length: u16,
    /// Scan line number (0-based from top of field).
    pub row_number: u16,
    /// Offset of the first pixel of the segment within the line, in pixels.
    pub row_offset: u16,
    /// Second-field flag (interlaced).
    pub second_field: bool,
    /// Retransmission marker.
    pub retransmit: bool,
}

/// Decoded RFC 4175 packet header: base RTP + extended seq + SRD list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc4175Header {
    pub rtp: RtpHeader,
    /// High 16 bits of the 32-bit packet sequence.
    pub seq_ext: u16,
    /// 1..=MAX SRDs; continuation bits are derived from list position.
    pub srds: Vec<SampleRowData>,
}

impl Rfc4175Header {
    /// Full 32-bit packet sequence from extended + base sequence numbers.
    pub fn seq32(&self) -> u32 {
        (u32::from(self.seq_ext) << 16) | u32::from(self.rtp.seq)
    }

    /// Header length in bytes for the SRD count carried.
    pub fn wire_len(&self) -> usize {
        RFC4175_FIXED_LEN + self.srds.len() * SRD_LEN
    }

    /// Total payload octets described by the SRD list.
    pub fn payload_len(&self) -> usize {
        self.srds.iter().map(|s| s.row_length as usize).sum()
    }

    /// Encode the full header into `buf`. Returns bytes written.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`Self::wire_len`] or the SRD list
    /// is empty; packet builders construct these by hand and size buffers
    /// up front.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        assert!(!self.srds.is_empty(), "RFC 4175 packet needs >= 1 SRD");
        let mut offset = self.rtp.encode(buf);
        buf[offset..offset + 2].copy_from_slice(&self.seq_ext.to_be_bytes());
        offset += 2;

        let last = self.srds.len() - 1;
        for (i, srd) in self.srds.iter().enumerate() {
            let mut length = srd.row_length & !SRD_RETRANSMIT;
            if srd.retransmit {
                length |= SRD_RETRANSMIT;
            }
            let mut number = srd.row_number & !SRD_SECOND_FIELD;
            if srd.second_field {
                number |= SRD_SECOND_FIELD;
            }
            let mut pix_offset = srd.row_offset & !SRD_OFFSET_CONTINUATION;
            if i != last {
                pix_offset |= SRD_OFFSET_CONTINUATION;
            }
            buf[offset..offset + 2].copy_from_slice(&length.to_be_bytes());
            buf[offset + 2..offset + 4].copy_from_slice(&number.to_be_bytes());
            buf[offset + 4..offset + 6].copy_from_slice(&pix_offset.to_be_bytes());
            offset += SRD_LEN;
        }
        offset
    }

    /// Decode base header, extended sequence and the full SRD chain.
    ///
    /// Returns the header and the byte offset where payload begins, or
    /// `None` for malformed input (short buffer, truncated SRD chain, or
    /// an SRD chain longer than the payload could possibly describe).
    pub fn decode(buf: &[u8]) -> Option<(Rfc4175Header, usize)> {
        let rtp = RtpHeader::decode(buf)?;
        if buf.len() < RFC4175_FIXED_LEN + SRD_LEN {
            return None;
        }
        let seq_ext = u16::from_be_bytes([buf[RTP_HDR_LEN], buf[RTP_HDR_LEN + 1]]);

        let mut srds = Vec::with_capacity(2);
        let mut offset = RFC4175_FIXED_LEN;
        loop {
            if buf.len() < offset + SRD_LEN {
                return None; // truncated SRD chain
            }
            let raw_length = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let raw_number = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]);
            let raw_offset = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
            offset += SRD_LEN;

            srds.push(SampleRowData {
                row_length: raw_length & !SRD_RETRANSMIT,
                row_number: raw_number & !SRD_SECOND_FIELD,
                row_offset: raw_offset & !SRD_OFFSET_CONTINUATION,
                second_field: raw_number & SRD_SECOND_FIELD != 0,
                retransmit: raw_length & SRD_RETRANSMIT != 0,
            });
            if raw_offset & SRD_OFFSET_CONTINUATION == 0 {
                break;
            }
        }

        // SRD-described payload must fit in what actually arrived.
        let hdr = Rfc4175Header { rtp, seq_ext, srds };
        if offset + hdr.payload_len() > buf.len() {
            return None;
        }
        Some((hdr, offset))
    }
}
