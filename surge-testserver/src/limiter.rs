use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Algorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
}

/// Tokens refill in whole units at `limit / window` per second, capped at `limit`.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: u64, now: Instant) -> Self {
        Self {
            tokens: limit,
            last_refill: now,
        }
    }

    fn take(&mut self, limit: u64, window: Duration, now: Instant) -> Decision {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let refill_rate = limit as f64 / window.as_secs_f64().max(1e-9);
        let refill = (elapsed * refill_rate) as u64;
        if refill > 0 {
            self.tokens = self.tokens.saturating_add(refill).min(limit);
            self.last_refill = now;
        }

        if self.tokens == 0 {
            return Decision {
                allowed: false,
                remaining: 0,
            };
        }

        self.tokens -= 1;
        if self.tokens == 0 {
            // Refill accrues from the moment the bucket ran dry.
            self.last_refill = now;
        }
        Decision {
            allowed: true,
            remaining: self.tokens,
        }
    }
}

/// Allows at most `limit` requests in any trailing `window`.
#[derive(Debug, Clone, Default)]
struct SlidingWindow {
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    fn take(&mut self, limit: u64, window: Duration, now: Instant) -> Decision {
        while let Some(front) = self.hits.front()
            && now.saturating_duration_since(*front) >= window
        {
            self.hits.pop_front();
        }

        let used = self.hits.len() as u64;
        if used >= limit {
            return Decision {
                allowed: false,
                remaining: 0,
            };
        }

        self.hits.push_back(now);
        Decision {
            allowed: true,
            remaining: limit - used - 1,
        }
    }
}

#[derive(Debug)]
enum KeyState {
    Bucket(TokenBucket),
    Window(SlidingWindow),
}

#[derive(Debug)]
struct Entry {
    state: KeyState,
    window: Duration,
    last_seen: Instant,
}

impl Entry {
    /// A key unused for a whole window is back to a fresh state: the bucket has refilled and
    /// every window hit has expired.
    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= self.window
    }
}

/// Checks between two sweeps for idle keys.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Default)]
struct Keys {
    entries: HashMap<(Algorithm, String), Entry>,
    checks_since_sweep: u64,
}

impl Keys {
    fn maybe_sweep(&mut self, now: Instant) {
        self.checks_since_sweep += 1;
        if self.checks_since_sweep < SWEEP_EVERY {
            return;
        }
        self.checks_since_sweep = 0;
        self.entries.retain(|_, entry| !entry.is_idle(now));
    }
}

/// In-memory per-key limiter state. Idle keys are dropped periodically.
#[derive(Debug, Default)]
pub struct Limiter {
    keys: Mutex<Keys>,
}

impl Limiter {
    pub fn check(
        &self,
        key: &str,
        algorithm: Algorithm,
        limit: u64,
        window: Duration,
        now: Instant,
    ) -> Decision {
        let mut keys = self.keys.lock();
        keys.maybe_sweep(now);

        let entry = keys
            .entries
            .entry((algorithm, key.to_string()))
            .or_insert_with(|| Entry {
                state: match algorithm {
                    Algorithm::TokenBucket => KeyState::Bucket(TokenBucket::new(limit, now)),
                    Algorithm::SlidingWindow => KeyState::Window(SlidingWindow::default()),
                },
                window,
                last_seen: now,
            });
        entry.window = window;
        entry.last_seen = entry.last_seen.max(now);

        match &mut entry.state {
            KeyState::Bucket(b) => b.take(limit, window, now),
            KeyState::Window(w) => w.take(limit, window, now),
        }
    }

    pub fn keys(&self) -> usize {
        self.keys.lock().entries.len()
    }
}
