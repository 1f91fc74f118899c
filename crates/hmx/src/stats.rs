// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session statistics counters.
//!
//! The lcore path bumps these with relaxed atomics (single writer per
//! counter); any thread may snapshot them. [`SessionStats::snapshot_and_reset`]
//! swaps every counter to zero atomically per counter, so a reset never
//! loses increments that race with it.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($(#[$sm:meta])* struct $name:ident, $(#[$dm:meta])* snapshot $snap:ident { $($(#[$cm:meta])* $field:ident),+ $(,)? }) => {
        $(#[$sm])*
        #[derive(Debug, Default)]
        pub struct $name {
            $( $(#[$cm])* pub $field: AtomicU64, )+
        }

        $(#[$dm])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $snap {
            $( pub $field: u64, )+
        }

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            /// Read every counter without disturbing it.
            pub fn snapshot(&self) -> $snap {
                $snap {
                    $( $field: self.$field.load(Ordering::Relaxed), )+
                }
            }

            /// Read and zero every counter. Race-free per counter: an
            /// increment lands either in this snapshot or the next.
            pub fn snapshot_and_reset(&self) -> $snap {
                $snap {
                    $( $field: self.$field.swap(0, Ordering::Relaxed), )+
                }
            }
        }
    };
}

counters! {
    /// RX-session counters, written by the lcore tasklet.
    struct RxStats,
    /// Point-in-time copy of [`RxStats`].
    snapshot RxStatsSnapshot {
        /// Frames handed to the application.
        frames_delivered,
        /// Frames assembled but discarded (incomplete with delivery off,
        /// or no consumer).
        frames_dropped,
        /// Frames completed only thanks to the redundant path.
        frames_reconstructed,
        /// Payload bytes written into frames.
        bytes,
        /// Packets accepted on the primary port.
        pkts_p,
        /// Packets accepted on the redundant port.
        pkts_r,
        /// Redundant/duplicate packets dropped by dedup.
        pkts_redundant_dropped,
        /// Dedup threshold overrides fired.
        dedup_overrides,
        /// Packets dropped for malformed headers or lengths.
        pkts_malformed,
        /// Packets dropped for SSRC mismatch.
        pkts_wrong_ssrc,
        /// Packets dropped for payload-type mismatch.
        pkts_wrong_pt,
        /// Packets with a stale RTP timestamp (no slot, too late).
        pkts_stale_timestamp,
        /// Packets whose offset fell outside the frame.
        pkts_offset_overrun,
        /// Slot-ring busy on a new frame (frame lost).
        slot_busy,
        /// DMA offload submissions that fell back to CPU copies.
        dma_fallbacks,
        /// Slice-ready events emitted.
        slice_events,
    }
}

counters! {
    /// TX-session counters, written by the lcore tasklet.
    struct TxStats,
    /// Point-in-time copy of [`TxStats`].
    snapshot TxStatsSnapshot {
        /// Frames fully emitted.
        frames_sent,
        /// Payload bytes emitted (RTP headers included).
        bytes,
        /// Packets emitted, both ports.
        pkts,
        /// Pad packets inserted by the static-padding trainer.
        pkts_pad,
        /// Packets re-emitted on RTCP NACK.
        pkts_retransmit,
        /// Epochs skipped because the frame was not ready in time.
        epochs_late,
        /// NIC enqueue rejections (retried next tick).
        user_busy,
        /// Transmit-queue hang recoveries.
        queue_recoveries,
        /// User-meta packets appended.
        pkts_user_meta,
    }
}
