use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::metrics::{MetricHandle, MetricKind, MetricStorage, MetricValue};
use crate::sample::{Sample, SampleValue};
use crate::snapshot::{MetricSnapshot, SnapshotValue, TrendSnapshot};

/// Named, typed metrics shared by every client of a run.
///
/// A metric's kind is fixed by whoever touches it first, either through [`Registry::register`] or
/// implicitly through the first [`Sample`] recorded for the name. Later use with a different kind
/// is rejected with [`Error::KindConflict`] and leaves the metric untouched.
///
/// The map is sharded and every metric carries its own synchronization, so concurrent writers to
/// different metrics never contend on a shared lock.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: DashMap<Arc<str>, MetricStorage>,
}

impl Registry {
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        if let Some(existing) = self.metrics.get(name) {
            return check_kind(name, existing.value(), kind);
        }

        let entry = self
            .metrics
            .entry(Arc::from(name))
            .or_insert_with(|| MetricStorage::new(kind));
        check_kind(name, entry.value(), kind)
    }

    pub fn handle(&self, name: &str) -> Option<MetricHandle> {
        self.metrics.get(name).map(|m| m.value().handle())
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.get(name).map(|m| m.value().kind())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn record(&self, sample: &Sample) -> Result<()> {
        let handle = self.register(&sample.metric, sample.kind())?;
        apply(&handle, sample.value);
        Ok(())
    }

    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        // Clone the handle out so the shard guard is released before any histogram lock is taken.
        let handle = self.handle(name)?;
        Some(snapshot_of(name, &handle))
    }

    /// Snapshots of every registered metric, sorted by name.
    pub fn snapshot_all(&self) -> Vec<MetricSnapshot> {
        let handles: Vec<(Arc<str>, MetricHandle)> = self
            .metrics
            .iter()
            .map(|e| (e.key().clone(), e.value().handle()))
            .collect();

        let mut out: Vec<MetricSnapshot> = handles
            .iter()
            .map(|(name, handle)| snapshot_of(name, handle))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn summarize(&self) -> BTreeMap<String, MetricValue> {
        self.snapshot_all()
            .into_iter()
            .map(|s| {
                let value = s.summary();
                (s.name, value)
            })
            .collect()
    }
}

fn check_kind(name: &str, storage: &MetricStorage, requested: MetricKind) -> Result<MetricHandle> {
    let registered = storage.kind();
    if registered != requested {
        return Err(Error::KindConflict {
            metric: name.to_string(),
            registered,
            requested,
        });
    }
    Ok(storage.handle())
}

fn apply(handle: &MetricHandle, value: SampleValue) {
    match value {
        SampleValue::Counter(v) => handle.increment(v),
        SampleValue::Gauge(v) => handle.set_gauge(v),
        SampleValue::Rate(hit) => handle.add_rate(hit),
        SampleValue::Trend(v) => handle.observe(v),
    }
}

fn snapshot_of(name: &str, handle: &MetricHandle) -> MetricSnapshot {
    let value = match handle {
        MetricHandle::Counter(_) => SnapshotValue::Counter(handle.get_counter()),
        MetricHandle::Gauge(_) => SnapshotValue::Gauge(handle.get_gauge()),
        MetricHandle::Rate(_) => {
            let (total, hits) = handle.get_rate();
            SnapshotValue::Rate { total, hits }
        }
        MetricHandle::Trend(h) => SnapshotValue::Trend(TrendSnapshot::new(h.lock().clone())),
    };

    MetricSnapshot {
        name: name.to_string(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_registers_metric_with_its_kind() {
        let reg = Registry::default();
        assert!(!reg.contains("errors"));

        reg.record(&Sample::rate("errors", true))
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(reg.kind_of("errors"), Some(MetricKind::Rate));
        let snap = reg
            .snapshot("errors")
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert!(matches!(
            snap.value,
            SnapshotValue::Rate { total: 1, hits: 1 }
        ));
    }

    #[test]
    fn sample_of_another_kind_is_rejected_and_ignored() {
        let reg = Registry::default();
        reg.record(&Sample::counter("http_reqs", 3))
            .unwrap_or_else(|e| panic!("{e}"));

        let err = match reg.record(&Sample::trend("http_reqs", 12.0)) {
            Ok(()) => panic!("expected kind conflict"),
            Err(e) => e,
        };
        assert_eq!(
            err,
            Error::KindConflict {
                metric: "http_reqs".to_string(),
                registered: MetricKind::Counter,
                requested: MetricKind::Trend,
            }
        );

        let summary = reg.summarize();
        assert_eq!(summary.get("http_reqs"), Some(&MetricValue::Counter(3)));
    }

    #[test]
    fn register_is_idempotent_for_same_kind() {
        let reg = Registry::default();
        let a = reg
            .register("vus", MetricKind::Gauge)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = reg
            .register("vus", MetricKind::Gauge)
            .unwrap_or_else(|e| panic!("{e}"));

        a.set_gauge(7);
        assert_eq!(b.get_gauge(), 7);
        assert!(reg.register("vus", MetricKind::Counter).is_err());
    }

    #[test]
    fn snapshot_is_detached_from_later_samples() {
        let reg = Registry::default();
        reg.record(&Sample::trend("latency", 5.0))
            .unwrap_or_else(|e| panic!("{e}"));

        let before = reg
            .snapshot("latency")
            .unwrap_or_else(|| panic!("expected snapshot"));
        reg.record(&Sample::trend("latency", 50.0))
            .unwrap_or_else(|e| panic!("{e}"));

        let SnapshotValue::Trend(t) = before.value else {
            panic!("expected trend snapshot");
        };
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn summarize_is_sorted_by_name() {
        let reg = Registry::default();
        for name in ["zeta", "alpha", "mid"] {
            reg.record(&Sample::counter(name, 1))
                .unwrap_or_else(|e| panic!("{e}"));
        }

        let names: Vec<String> = reg.summarize().into_keys().collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn concurrent_rate_samples_are_order_independent() {
        let reg = Arc::new(Registry::default());
        let writers = 8u64;
        let per_writer = 1_000u64;

        std::thread::scope(|scope| {
            for w in 0..writers {
                let reg = reg.clone();
                scope.spawn(move || {
                    for i in 0..per_writer {
                        // Every writer interleaves hits differently; the total must not care.
                        let hit = (i + w) % 4 == 0;
                        let _ = reg.record(&Sample::rate("checks", hit));
                        let _ = reg.record(&Sample::trend("latency", i as f64));
                    }
                });
            }
        });

        let snap = reg
            .snapshot("checks")
            .unwrap_or_else(|| panic!("expected snapshot"));
        match snap.summary() {
            MetricValue::Rate { total, hits, rate } => {
                assert_eq!(total, writers * per_writer);
                assert_eq!(hits, writers * per_writer / 4);
                assert_eq!(rate, Some(0.25));
            }
            other => panic!("unexpected value: {other:?}"),
        }

        let latency = reg
            .snapshot("latency")
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(latency.summary().sample_count(), writers * per_writer);
    }
}
