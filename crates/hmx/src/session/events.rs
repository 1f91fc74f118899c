// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session events and the blocking event queue.
//!
//! The lcore tasklet pushes events; application threads poll with a
//! bounded timeout. `stop()` wakes every waiter and makes subsequent
//! polls return [`Error::Again`] until the session is started again.

use crate::error::{Error, Result};
use crate::types::{Fps, Packing, TpCompliant};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Events surfaced through `event_poll`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// RX: a frame is ready for `buffer_get`. TX: a slot became free.
    BufferReady,
    /// TX: a submitted frame finished transmitting.
    BufferDone,
    /// Fatal or recoverable session error, negative errno code.
    Error { code: i32 },
    /// Epoch boundary (when vsync events are enabled).
    Vsync { epoch: u64, ptp_time: u64 },
    /// TX: a frame missed its epoch and the epoch was skipped.
    FrameLate { epoch_skipped: u64 },
    /// RX: video format auto-detection settled.
    FormatDetected {
        width: u32,
        height: u32,
        fps: Fps,
        packing: Packing,
        interlaced: bool,
    },
    /// RX: periodic timing-parser report for one port.
    TimingReport {
        port: usize,
        compliant: TpCompliant,
        cinst_max: i32,
        vrx_max: i32,
        vrx_min: i32,
        ipt_max_ns: i32,
        ipt_min_ns: i32,
        latency_ns: i32,
        pkts: u32,
    },
    /// RX slice mode: contiguous lines from the top are complete.
    SliceReady { lines_ready: u32, lines_total: u32 },
}

/// Cap on buffered events; older events are dropped first (the consumer
/// is too slow to care about them).
const EVENT_QUEUE_DEPTH: usize = 256;

/// Blocking event queue shared between the tasklet and app threads.
///
/// Doubles as the session's wake mechanism for `buffer_get`: the tasklet
/// signals after every state change that could unblock a waiter.
pub struct EventQueue {
    queue: Mutex<VecDeque<Event>>,
    cond: Condvar,
    stopped: AtomicBool,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            queue: Mutex::new(VecDeque::with_capacity(64)),
            cond: Condvar::new(),
            stopped: AtomicBool::new(true),
        }
    }

    /// Push an event and wake one waiter. Lcore side; never blocks
    /// beyond the short queue lock.
    pub fn push(&self, event: Event) {
        let mut q = self.queue.lock();
        if q.len() >= EVENT_QUEUE_DEPTH {
            q.pop_front();
        }
        q.push_back(event);
        drop(q);
        self.cond.notify_one();
    }

    /// Wake waiters without queueing an event (slot/frame state changed).
    ///
    /// Takes the queue lock briefly so a waiter that just evaluated its
    /// predicate is parked before the notify lands (no lost wakeup).
    pub fn kick(&self) {
        drop(self.queue.lock());
        self.cond.notify_all();
    }

    /// Blocking poll with timeout.
    pub fn poll(&self, timeout: Duration) -> Result<Event> {
        let deadline = Instant::now() + timeout;
        let mut q = self.queue.lock();
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Err(Error::Again);
            }
            if let Some(event) = q.pop_front() {
                return Ok(event);
            }
            if self.cond.wait_until(&mut q, deadline).timed_out() {
                return if self.stopped.load(Ordering::Acquire) {
                    Err(Error::Again)
                } else {
                    Err(Error::Timeout)
                };
            }
        }
    }

    /// Wait until `pred` holds, an event-queue wake arrives, or timeout.
    /// Used by `buffer_get`: the predicate checks the slot ring.
    pub fn wait_for<F: FnMut() -> bool>(&self, timeout: Duration, mut pred: F) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut q = self.queue.lock();
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Err(Error::Again);
            }
            if pred() {
                return Ok(());
            }
            if self.cond.wait_until(&mut q, deadline).timed_out() {
                return if self.stopped.load(Ordering::Acquire) {
                    Err(Error::Again)
                } else if pred() {
                    Ok(())
                } else {
                    Err(Error::Timeout)
                };
            }
        }
    }

    /// Enter the stopped state: every blocked and future call returns
    /// `Again`. Idempotent, thread-safe.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    /// Leave the stopped state.
    pub fn start(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Drop everything queued (session restart).
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}
