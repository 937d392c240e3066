use std::time::Duration;

use super::error::ConfigError;
use super::pacer::Pacing;
use super::thresholds::Threshold;

/// One segment of the concurrency timeline: ramp linearly to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Status codes a workload treats as a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedStatuses {
    ranges: Vec<(u16, u16)>,
}

impl ExpectedStatuses {
    /// Inclusive `(low, high)` ranges.
    pub fn from_ranges(ranges: impl IntoIterator<Item = (u16, u16)>) -> Self {
        Self {
            ranges: ranges
                .into_iter()
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect(),
        }
    }

    pub fn from_codes(codes: impl IntoIterator<Item = u16>) -> Self {
        Self::from_ranges(codes.into_iter().map(|c| (c, c)))
    }

    #[must_use]
    pub fn contains(&self, status: u16) -> bool {
        self.ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&status))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[(u16, u16)] {
        &self.ranges
    }
}

impl Default for ExpectedStatuses {
    fn default() -> Self {
        Self::from_ranges([(200, 399)])
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub stages: Vec<Stage>,

    /// Concurrency target at t=0; the first stage ramps from here.
    pub start_clients: u64,

    /// Delay between two iterations of the same client.
    pub pacing: Pacing,

    /// How often the scheduler reconciles live clients against the timeline.
    pub reconcile_interval: Duration,

    /// How often thresholds are evaluated while the run is in progress.
    pub threshold_interval: Duration,

    /// How often the progress callback (if any) is invoked.
    pub progress_interval: Duration,

    /// How long clients may take to finish their in-flight iteration once the run ends.
    pub drain_timeout: Duration,

    /// Hard deadline for one workload invocation.
    pub iteration_timeout: Option<Duration>,

    pub expected_statuses: ExpectedStatuses,

    pub thresholds: Vec<Threshold>,
}

impl RunConfig {
    pub const DEFAULT_PACING: Duration = Duration::from_millis(100);
    pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            start_clients: 0,
            pacing: Pacing::Fixed(Self::DEFAULT_PACING),
            reconcile_interval: Self::DEFAULT_RECONCILE_INTERVAL,
            threshold_interval: Self::DEFAULT_THRESHOLD_INTERVAL,
            progress_interval: Self::DEFAULT_PROGRESS_INTERVAL,
            drain_timeout: Self::DEFAULT_DRAIN_TIMEOUT,
            iteration_timeout: None,
            expected_statuses: ExpectedStatuses::default(),
            thresholds: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_start_clients(mut self, start_clients: u64) -> Self {
        self.start_clients = start_clients;
        self
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    #[must_use]
    pub fn with_threshold_interval(mut self, interval: Duration) -> Self {
        self.threshold_interval = interval;
        self
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_iteration_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_expected_statuses(mut self, statuses: ExpectedStatuses) -> Self {
        self.expected_statuses = statuses;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
    }

    /// Highest concurrency the timeline ever asks for.
    pub fn max_clients(&self) -> u64 {
        let max_stage = self.stages.iter().map(|st| st.target).max().unwrap_or(0);
        max_stage.max(self.start_clients)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyStages);
        }
        if self.total_duration().is_zero() {
            return Err(ConfigError::ZeroTotalDuration);
        }

        let intervals = [
            ("reconcile_interval", self.reconcile_interval),
            ("threshold_interval", self.threshold_interval),
            ("progress_interval", self.progress_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::NonPositiveInterval { name });
            }
        }
        if self.iteration_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::NonPositiveInterval {
                name: "iteration_timeout",
            });
        }

        if let Pacing::Jittered { base, jitter } = self.pacing
            && jitter > base
        {
            return Err(ConfigError::InvalidJitter { base, jitter });
        }

        if self.expected_statuses.is_empty() {
            return Err(ConfigError::EmptyExpectedStatuses);
        }

        Ok(())
    }
}
