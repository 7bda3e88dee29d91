//! Lock-free backoff shared by every worker of a dispatcher.
//!
//! 429 and 403 answers double the pause before the next request
//! (50, 100, 200, ... up to the cap); any other answer shaves
//! `DECAY_MS` off it. Atomics only, nothing here blocks a worker except the
//! pause itself.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::Relaxed};

use log::debug;
use tokio::time::{sleep, Duration};

pub const DEFAULT_MAX_DELAY_MS: u64 = 2000;
const INITIAL_BACKOFF_MS: u64 = 50;
const DECAY_MS: u64 = 10;

pub struct Backoff {
    delay_ms: AtomicU64,
    consecutive_blocks: AtomicU32,
    total_throttled: AtomicU64,
    max_delay_ms: u64,
}

impl Backoff {
    pub fn new(max_delay_ms: u64) -> Self {
        Self {
            delay_ms: AtomicU64::new(0),
            consecutive_blocks: AtomicU32::new(0),
            total_throttled: AtomicU64::new(0),
            max_delay_ms,
        }
    }

    pub async fn pause(&self) {
        let ms = self.delay_ms.load(Relaxed);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Feeds one status code in. `true` when it raised the delay.
    pub fn observe(&self, status: u16) -> bool {
        if status == 429 || status == 403 {
            let blocks = self.consecutive_blocks.fetch_add(1, Relaxed) + 1;
            self.total_throttled.fetch_add(1, Relaxed);
            let delay = (INITIAL_BACKOFF_MS << (blocks - 1).min(6)).min(self.max_delay_ms);
            self.delay_ms.store(delay, Relaxed);
            debug!("target pushed back with {}, pausing {}ms between requests", status, delay);
            return true;
        }

        self.consecutive_blocks.store(0, Relaxed);
        let _ = self
            .delay_ms
            .fetch_update(Relaxed, Relaxed, |ms| (ms > 0).then(|| ms.saturating_sub(DECAY_MS)));
        false
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms.load(Relaxed)
    }

    pub fn total_throttled(&self) -> u64 {
        self.total_throttled.load(Relaxed)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELAY_MS)
    }
}
