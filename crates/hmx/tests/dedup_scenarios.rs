// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ST 2022-7 dedup acceptance scenarios.
//!
//! These are the canonical merge cases a redundant receiver must get
//! right: same-burst interleave, cross-burst Class A gap-fill (R's
//! packets up to ~10 ms late, across an RTP-timestamp boundary), the
//! timestamp-only audio mode, and the sliding-window edge.

use hmx::dedup::{DedupMode, DedupState};
use hmx::SessionPort::{P, R};

#[test]
fn single_port_progressive() {
    let mut d = DedupState::new(DedupMode::TimestampAndSeq, 0);
    for seq in 100..105u16 {
        let r = d.check(seq, 1000, P);
        assert!(!r.drop, "seq {} accepted", seq);
        assert!(!r.threshold_override);
    }
    assert_eq!(d.session_seq_id(), 104);
    assert_eq!(d.tmstamp(), 1000);
}

#[test]
fn same_burst_merge() {
    let mut d = DedupState::new(DedupMode::TimestampAndSeq, 0);
    for (seq, port) in [(10, P), (11, R), (12, P), (13, R), (14, P), (15, R)] {
        assert!(!d.check(seq, 1000, port).drop, "seq {} accepted", seq);
    }
    assert_eq!(d.session_seq_id(), 15);
}

#[test]
fn cross_burst_class_a_gap_fill() {
    let mut d = DedupState::new(DedupMode::TimestampAndSeq, 0);
    // P delivers frame 1 with a hole at 12, then starts frame 2
    for seq in [10u16, 11, 13, 14] {
        assert!(!d.check(seq, 1000, P).drop);
    }
    assert!(!d.check(15, 2000, P).drop);
    // R delivers frame 1 complete, 5-10 ms late
    let mut accepted = Vec::new();
    for seq in 10..=14u16 {
        if !d.check(seq, 1000, R).drop {
            accepted.push(seq);
        }
    }
    assert_eq!(accepted, vec![12], "exactly the gap-fill is accepted");
    assert_eq!(d.session_seq_id(), 15);
}

#[test]
fn st30_timestamp_only_mode() {
    let mut d = DedupState::new(DedupMode::TimestampOnly, 0);
    let feeds = [
        (0u16, 1000u32, P, false),
        (1, 1000, R, true),
        (2, 2000, P, false),
        (3, 2000, R, true),
    ];
    for (seq, ts, port, expect_drop) in feeds {
        assert_eq!(d.check(seq, ts, port).drop, expect_drop, "seq {}", seq);
    }
}

#[test]
fn bitmap_window_overflow() {
    let mut d = DedupState::new(DedupMode::TimestampAndSeq, 0);
    assert!(!d.check(10, 1000, P).drop);
    assert!(!d.check(90, 2000, P).drop);
    // 80 behind the head: fell off the 64-seq window, stale
    assert!(d.check(10, 1000, R).drop);
    // inside the window and never seen: accepted as gap-fill
    assert!(!d.check(50, 1000, R).drop);
}

#[test]
fn threshold_override_recovers_from_sender_reset() {
    let mut d = DedupState::new(DedupMode::TimestampAndSeq, 8);
    for seq in 0..32u16 {
        assert!(!d.check(seq, 9000, P).drop);
    }
    // sender reset: replays of old seq/ts from both ports
    let mut override_seen = false;
    for i in 0..16 {
        let port = if i % 2 == 0 { P } else { R };
        let r = d.check(5, 100, port);
        if r.threshold_override {
            assert!(!r.drop, "override force-accepts");
            override_seen = true;
            break;
        }
        assert!(r.drop);
    }
    assert!(override_seen, "override fires at the configured threshold");
    // the stream continues from the re-anchored point
    assert!(!d.check(6, 100, P).drop);
}
