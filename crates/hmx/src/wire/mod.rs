// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire formats: bit-exact header codecs for the ST 2110 family.
//!
//! - [`rfc3550`] - RTP base header (12 bytes)
//! - [`rfc4175`] - ST 2110-20 uncompressed video payload header + SRDs
//! - [`rfc9134`] - ST 2110-22 compressed video payload header
//! - [`rfc8331`] - ST 2110-40 ancillary data payload
//! - [`st41`] - ST 2110-41 fast-metadata payload header
//! - [`am824`] - ST 2110-31 AM824 / AES3 subframe mapping
//!
//! All encoders write into caller-provided byte slices at explicit offsets
//! and all decoders validate length before reading; nothing here allocates
//! on the datapath.

pub mod am824;
pub mod rfc3550;
pub mod rfc4175;
pub mod rfc8331;
pub mod rfc9134;
pub mod st41;

pub use rfc3550::RtpHeader;
pub use rfc4175::{Rfc4175Header, SampleRowData};
pub use rfc9134::St22Header;
pub use rfc8331::{AncHeader, AncPacket};
pub use st41::St41Header;

/// Maximum RTP payload bytes carried in one packet (1500 MTU minus
/// IP/UDP/RTP overhead).
pub const MAX_RTP_BYTES: usize = 1460;
