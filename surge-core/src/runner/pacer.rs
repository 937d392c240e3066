use std::time::Duration;

use rand::Rng;

/// Delay a client waits between two of its iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Fixed(Duration),

    /// Uniformly distributed in `base - jitter ..= base + jitter`.
    Jittered { base: Duration, jitter: Duration },
}

impl Default for Pacing {
    fn default() -> Self {
        Self::Fixed(Duration::from_millis(100))
    }
}

impl Pacing {
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Jittered { base, jitter } => {
                if jitter.is_zero() {
                    return base;
                }
                let lo = base.saturating_sub(jitter).as_nanos() as u64;
                let hi = base.saturating_add(jitter).as_nanos().min(u64::MAX as u128) as u64;
                Duration::from_nanos(rng.gen_range(lo..=hi))
            }
        }
    }
}
