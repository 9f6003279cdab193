//! An optional background producer that keeps a small pool of pre-generated
//! values ready, so callers on a latency-sensitive path don't pay generation
//! cost inline.
//!
//! This is opt-in: [`crate::context::Fuzzer`] never spawns a thread on its
//! own. Nothing in the example pack used a `Condvar` for this shape of
//! producer/consumer handoff, so the background thread here sleeps and polls
//! instead of blocking on one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace};

use crate::error::NanofuzzError;
use crate::generator::Generator;

/// How the background thread replenishes the pool once it drains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchMode {
    /// Fill the pool once; the thread exits after the first fill.
    Oneshot,
    /// Keep refilling as entries are taken, until [`PrefetchFuzzer`] is
    /// dropped or explicitly stopped.
    Refill,
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

struct Shared {
    slots: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
    stop: AtomicBool,
}

/// A [`crate::context::Fuzzer`]-like handle backed by a background producer
/// thread and a bounded pool of pre-generated values.
pub struct PrefetchFuzzer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl PrefetchFuzzer {
    /// Spawn the producer thread. `generator` is moved onto the worker
    /// thread and is never touched from the caller's side again.
    pub fn spawn(mut generator: Generator, capacity: usize, mode: PrefetchMode) -> Self {
        let shared = Arc::new(Shared {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            stop: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || {
            debug!("prefetch worker starting, capacity {capacity}, mode {mode:?}");
            loop {
                if worker_shared.stop.load(Ordering::Relaxed) {
                    break;
                }
                let needs_more = {
                    let slots = worker_shared.slots.lock().expect("prefetch mutex poisoned");
                    slots.len() < worker_shared.capacity
                };
                if needs_more {
                    match generator.next() {
                        Ok(bytes) => {
                            let value: Box<[u8]> = bytes.into();
                            let mut slots =
                                worker_shared.slots.lock().expect("prefetch mutex poisoned");
                            if slots.len() < worker_shared.capacity {
                                slots.push(value);
                            }
                        }
                        Err(e) => trace!("prefetch worker generation error: {e}"),
                    }
                    if mode == PrefetchMode::Oneshot {
                        let full = {
                            let slots =
                                worker_shared.slots.lock().expect("prefetch mutex poisoned");
                            slots.len() >= worker_shared.capacity
                        };
                        if full {
                            break;
                        }
                    }
                } else if mode == PrefetchMode::Oneshot {
                    break;
                } else {
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
            debug!("prefetch worker exiting");
        });
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Take one pre-generated value if one is ready, polling briefly
    /// (`timeout`) for the background thread to produce one otherwise.
    pub fn take(&self, timeout: Duration) -> Result<Box<[u8]>, NanofuzzError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            {
                let mut slots = self.shared.slots.lock().expect("prefetch mutex poisoned");
                if let Some(value) = slots.pop() {
                    return Ok(value);
                }
            }
            if std::time::Instant::now() >= deadline {
                return Err(NanofuzzError::Generation(
                    crate::error::GenerationError::PoolExceeded,
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn ready_count(&self) -> usize {
        self.shared.slots.lock().expect("prefetch mutex poisoned").len()
    }

    /// Signal the background thread to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PrefetchFuzzer {
    fn drop(&mut self) {
        self.stop();
    }
}
