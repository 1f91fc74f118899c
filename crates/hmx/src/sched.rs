// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative tasklet scheduler.
//!
//! One thread per lcore runs registered tasklets in a tight loop. A
//! tasklet is a session's per-tick state machine: it must never block and
//! should do a bounded amount of work per call. The scheduler guarantees
//! single-threaded entry per lcore - two sessions on the same lcore never
//! run concurrently, which is what lets the per-session state stay
//! lock-free on the datapath.
//!
//! Registration is channel-based so sessions can be added and removed
//! while the loop runs; a removed tasklet is dropped at the top of the
//! next tick.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// What a tasklet tells the scheduler after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Did work; call again immediately.
    Busy,
    /// Nothing to do; the lcore may idle briefly.
    Idle,
    /// Remove this tasklet from the loop.
    Done,
}

/// A registered per-tick function.
pub trait Tasklet: Send {
    /// Name for diagnostics.
    fn name(&self) -> &str;
    /// One cooperative tick. Must not block.
    fn tick(&mut self) -> TickResult;
}

enum Cmd {
    Register(Box<dyn Tasklet>),
}

struct LcoreWorker {
    cmd_tx: Sender<Cmd>,
    handle: Option<JoinHandle<()>>,
}

/// The tasklet scheduler: spawns one worker thread per lcore.
pub struct Scheduler {
    workers: Vec<LcoreWorker>,
    stop: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
}

impl Scheduler {
    /// Spawn `lcores` worker threads.
    pub fn new(lcores: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let workers = (0..lcores.max(1))
            .map(|lcore| {
                let (cmd_tx, cmd_rx) = unbounded();
                let stop = Arc::clone(&stop);
                let ticks = Arc::clone(&ticks);
                let handle = std::thread::Builder::new()
                    .name(format!("hmx-lcore-{}", lcore))
                    .spawn(move || lcore_loop(lcore, &cmd_rx, &stop, &ticks))
                    .expect("spawn lcore thread");
                LcoreWorker {
                    cmd_tx,
                    handle: Some(handle),
                }
            })
            .collect();
        Scheduler {
            workers,
            stop,
            ticks,
        }
    }

    pub fn lcores(&self) -> usize {
        self.workers.len()
    }

    /// Register a tasklet on an lcore (wrapped modulo lcore count).
    pub fn register(&self, lcore: usize, tasklet: Box<dyn Tasklet>) {
        let worker = &self.workers[lcore % self.workers.len()];
        // a send can only fail after stop(), where the tasklet is moot
        let _ = worker.cmd_tx.send(Cmd::Register(tasklet));
    }

    /// Total ticks executed across lcores (diagnostics).
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop every lcore loop and join the threads.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lcore_loop(
    lcore: usize,
    cmd_rx: &Receiver<Cmd>,
    stop: &AtomicBool,
    ticks: &AtomicU64,
) {
    let mut tasklets: Vec<Box<dyn Tasklet>> = Vec::new();
    let mut idle_spins = 0u32;
    log::debug!("[sched] lcore {} running", lcore);

    while !stop.load(Ordering::Acquire) {
        // drain registrations first so a new session starts this tick
        while let Ok(Cmd::Register(t)) = cmd_rx.try_recv() {
            log::debug!("[sched] lcore {} registered tasklet {}", lcore, t.name());
            tasklets.push(t);
        }

        let mut any_busy = false;
        let mut i = 0;
        while i < tasklets.len() {
            match tasklets[i].tick() {
                TickResult::Busy => {
                    any_busy = true;
                    i += 1;
                }
                TickResult::Idle => i += 1,
                TickResult::Done => {
                    let t = tasklets.swap_remove(i);
                    log::debug!("[sched] lcore {} removed tasklet {}", lcore, t.name());
                }
            }
        }
        ticks.fetch_add(1, Ordering::Relaxed);

        if any_busy {
            idle_spins = 0;
        } else {
            // back off gently when every tasklet is idle: spin first for
            // latency, then yield, then nap so an idle process does not
            // burn a core
            idle_spins = idle_spins.saturating_add(1);
            if idle_spins < 64 {
                std::hint::spin_loop();
            } else if idle_spins < 256 {
                std::thread::yield_now();
            } else {
                std::thread::sleep(std::time::Duration::from_micros(50));
            }
        }
    }
    log::debug!("[sched] lcore {} stopped", lcore);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingTasklet {
        name: String,
        counter: Arc<AtomicU32>,
        limit: u32,
    }

    impl Tasklet for CountingTasklet {
        fn name(&self) -> &str {
            &self.name
        }

        fn tick(&mut self) -> TickResult {
            let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            if n >= self.limit {
                TickResult::Done
            } else {
                TickResult::Busy
            }
        }
    }

    #[test]
    fn test_tasklet_runs_until_done() {
        let mut sched = Scheduler::new(1);
        let counter = Arc::new(AtomicU32::new(0));
        sched.register(
            0,
            Box::new(CountingTasklet {
                name: "count".into(),
                counter: Arc::clone(&counter),
                limit: 100,
            }),
        );
        // wait for completion
        for _ in 0..1000 {
            if counter.load(Ordering::Relaxed) >= 100 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        sched.shutdown();
        // no further ticks after shutdown settles the counter
        let settled = counter.load(Ordering::Relaxed);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(counter.load(Ordering::Relaxed), settled);
    }

    #[test]
    fn test_multiple_tasklets_share_lcore() {
        let mut sched = Scheduler::new(1);
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        for (name, counter) in [("a", Arc::clone(&a)), ("b", Arc::clone(&b))] {
            sched.register(
                0,
                Box::new(CountingTasklet {
                    name: name.into(),
                    counter,
                    limit: 50,
                }),
            );
        }
        for _ in 0..1000 {
            if a.load(Ordering::Relaxed) >= 50 && b.load(Ordering::Relaxed) >= 50 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(a.load(Ordering::Relaxed), 50);
        assert_eq!(b.load(Ordering::Relaxed), 50);
        sched.shutdown();
    }

    #[test]
    fn test_lcore_assignment_wraps() {
        let sched = Scheduler::new(2);
        assert_eq!(sched.lcores(), 2);
        let c = Arc::new(AtomicU32::new(0));
        // lcore index beyond the pool wraps instead of panicking
        sched.register(
            5,
            Box::new(CountingTasklet {
                name: "wrap".into(),
                counter: Arc::clone(&c),
                limit: 1,
            }),
        );
        for _ in 0..1000 {
            if c.load(Ordering::Relaxed) >= 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(c.load(Ordering::Relaxed), 1);
    }
}
