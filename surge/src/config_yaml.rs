use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use surge_core::runner::{ExpectedStatuses, Pacing, RunConfig, Stage, Threshold};

use crate::cli::ConfigArgs;
use crate::workload::LimitCheckSettings;

const DEFAULT_PATH: &str = "/api/v1/limit-check";
const DEFAULT_ALGORITHM: &str = "token_bucket";
const DEFAULT_LIMIT: u64 = 100;
const DEFAULT_WINDOW: &str = "1m";
const DEFAULT_KEY_PREFIX: &str = "user";
const DEFAULT_EXPECTED_STATUSES: [u16; 2] = [200, 429];

/// A run config file as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RunDocYaml {
    pub base_url: Option<String>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    pub start_clients: Option<u64>,
    pub pacing: Option<PacingYaml>,
    pub reconcile_interval: Option<YamlDuration>,
    pub threshold_interval: Option<YamlDuration>,
    pub progress_interval: Option<YamlDuration>,
    pub drain_timeout: Option<YamlDuration>,
    pub iteration_timeout: Option<YamlDuration>,

    /// Codes (`429`) or inclusive ranges (`"200-299"`).
    #[serde(default)]
    pub expected_statuses: Vec<StatusYaml>,

    #[serde(default)]
    pub workload: WorkloadYaml,

    /// Metric name to one or more threshold expressions.
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdsYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    #[serde(default)]
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum PacingYaml {
    Fixed(YamlDuration),
    Jittered {
        base: YamlDuration,
        jitter: YamlDuration,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum StatusYaml {
    Code(u16),
    Range(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct WorkloadYaml {
    pub path: Option<String>,
    pub algorithm: Option<String>,
    pub limit: Option<u64>,
    pub window: Option<YamlDuration>,
    pub key_prefix: Option<String>,
    pub request_timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdsYaml {
    Many(Vec<ThresholdYaml>),
    One(ThresholdYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    Expr(String),
    Full(ThresholdObjectYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdObjectYaml {
    pub threshold: String,
    #[serde(default)]
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<YamlDuration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Everything a run needs, after file values and CLI overrides are merged.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub run: RunConfig,
    pub workload: LimitCheckSettings,
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<RunDocYaml> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read run config: {}", path.display()))?;

    serde_yaml::from_slice(&bytes).with_context(|| format!("failed to parse YAML: {}", path.display()))
}

impl RunDocYaml {
    /// Applies CLI overrides and validates the result the same way a run would.
    pub(crate) fn resolve(self, overrides: &ConfigArgs) -> anyhow::Result<ResolvedConfig> {
        let stages = if overrides.stages.is_empty() {
            self.stages
                .into_iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect()
        } else {
            overrides.stages.clone()
        };

        let expected_statuses = if self.expected_statuses.is_empty() {
            ExpectedStatuses::from_codes(DEFAULT_EXPECTED_STATUSES)
        } else {
            parse_statuses(&self.expected_statuses)?
        };

        let thresholds = parse_thresholds_map(self.thresholds)?;

        let mut run = RunConfig::new(stages)
            .with_expected_statuses(expected_statuses.clone())
            .with_thresholds(thresholds)
            .with_iteration_timeout(self.iteration_timeout.map(YamlDuration::into_inner));

        if let Some(n) = self.start_clients {
            run = run.with_start_clients(n);
        }
        if let Some(p) = self.pacing {
            run = run.with_pacing(match p {
                PacingYaml::Fixed(d) => Pacing::Fixed(d.into_inner()),
                PacingYaml::Jittered { base, jitter } => Pacing::Jittered {
                    base: base.into_inner(),
                    jitter: jitter.into_inner(),
                },
            });
        }
        if let Some(d) = self.reconcile_interval {
            run = run.with_reconcile_interval(d.into_inner());
        }
        if let Some(d) = self.threshold_interval {
            run = run.with_threshold_interval(d.into_inner());
        }
        if let Some(d) = self.progress_interval {
            run = run.with_progress_interval(d.into_inner());
        }
        if let Some(d) = overrides
            .drain_timeout
            .or(self.drain_timeout.map(YamlDuration::into_inner))
        {
            run = run.with_drain_timeout(d);
        }

        run.validate()?;

        let base_url = overrides
            .base_url
            .clone()
            .or(self.base_url)
            .context("base URL is not set (use --base-url, BASE_URL or `baseUrl`)")?;
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("base URL must start with http:// or https:// (got `{base_url}`)");
        }

        let w = self.workload;
        let path = w.path.unwrap_or_else(|| DEFAULT_PATH.to_string());
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        let limit = w.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 {
            anyhow::bail!("`workload.limit` must be positive");
        }
        let window = match w.window {
            Some(d) if d.into_inner().is_zero() => {
                anyhow::bail!("`workload.window` must be a positive duration")
            }
            Some(d) => humantime::format_duration(d.into_inner()).to_string(),
            None => DEFAULT_WINDOW.to_string(),
        };

        let workload = LimitCheckSettings {
            url: format!("{base_url}{path}"),
            algorithm: w
                .algorithm
                .unwrap_or_else(|| DEFAULT_ALGORITHM.to_string()),
            limit,
            window,
            key_prefix: w
                .key_prefix
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            request_timeout: w.request_timeout.map(YamlDuration::into_inner),
            expected_statuses,
        };

        Ok(ResolvedConfig { run, workload })
    }
}

fn parse_statuses(raw: &[StatusYaml]) -> anyhow::Result<ExpectedStatuses> {
    let ranges = raw
        .iter()
        .map(|s| match s {
            StatusYaml::Code(c) => Ok((*c, *c)),
            StatusYaml::Range(r) => {
                let (lo, hi) = r.split_once('-').unwrap_or((r.as_str(), r.as_str()));
                let lo: u16 = lo
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid status range `{r}`"))?;
                let hi: u16 = hi
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid status range `{r}`"))?;
                Ok((lo, hi))
            }
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(ExpectedStatuses::from_ranges(ranges))
}

fn parse_thresholds_map(raw: BTreeMap<String, ThresholdsYaml>) -> anyhow::Result<Vec<Threshold>> {
    let mut out = Vec::new();

    for (metric, v) in raw {
        let entries = match v {
            ThresholdsYaml::Many(v) => v,
            ThresholdsYaml::One(t) => vec![t],
        };

        if entries.is_empty() {
            anyhow::bail!("invalid thresholds for `{metric}`: empty list");
        }

        for entry in entries {
            let threshold = match entry {
                ThresholdYaml::Expr(expr) => Threshold::parse(metric.as_str(), &expr)?,
                ThresholdYaml::Full(obj) => Threshold::parse(metric.as_str(), &obj.threshold)?
                    .with_abort_on_fail(obj.abort_on_fail)
                    .with_delay_abort_eval(
                        obj.delay_abort_eval
                            .map(YamlDuration::into_inner)
                            .unwrap_or_default(),
                    ),
            };
            out.push(threshold);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use surge_core::runner::ThresholdAgg;

    fn args() -> ConfigArgs {
        ConfigArgs {
            config: PathBuf::from("unused.yaml"),
            base_url: None,
            stages: Vec::new(),
            drain_timeout: None,
        }
    }

    fn doc(yaml: &str) -> RunDocYaml {
        serde_yaml::from_str(yaml).unwrap_or_else(|e| panic!("{e:#}"))
    }

    fn resolve(yaml: &str, overrides: &ConfigArgs) -> ResolvedConfig {
        doc(yaml)
            .resolve(overrides)
            .unwrap_or_else(|e| panic!("{e:#}"))
    }

    const MINIMAL: &str = r#"
baseUrl: http://127.0.0.1:8080/
stages:
  - duration: 10s
    target: 5
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = resolve(MINIMAL, &args());

        assert_eq!(cfg.run.stages, vec![Stage::new(Duration::from_secs(10), 5)]);
        assert_eq!(cfg.run.pacing, Pacing::Fixed(RunConfig::DEFAULT_PACING));
        assert_eq!(cfg.run.drain_timeout, RunConfig::DEFAULT_DRAIN_TIMEOUT);
        assert!(cfg.run.thresholds.is_empty());
        assert!(cfg.run.expected_statuses.contains(429));
        assert!(!cfg.run.expected_statuses.contains(500));

        assert_eq!(cfg.workload.url, "http://127.0.0.1:8080/api/v1/limit-check");
        assert_eq!(cfg.workload.algorithm, "token_bucket");
        assert_eq!(cfg.workload.limit, 100);
        assert_eq!(cfg.workload.window, "1m");
        assert_eq!(cfg.workload.expected_statuses, cfg.run.expected_statuses);
    }

    #[test]
    fn full_config_is_mapped() {
        let cfg = resolve(
            r#"
baseUrl: https://limiter.internal
startClients: 2
pacing: { base: 100ms, jitter: 20ms }
reconcileInterval: 50ms
thresholdInterval: 2s
progressInterval: 500ms
drainTimeout: 5s
iterationTimeout: 3s
expectedStatuses: [200, "400-404"]
stages:
  - { duration: 30s, target: 10 }
  - { duration: 1m, target: 20 }
  - { duration: 0.5, target: 0 }
workload:
  path: api/v2/check
  algorithm: sliding_window
  limit: 50
  window: 30s
  keyPrefix: tenant
  requestTimeout: 1s
thresholds:
  http_req_duration: "p(95)<500"
  errors:
    - rate<0.1
    - threshold: rate<0.5
      abortOnFail: true
      delayAbortEval: 10s
"#,
            &args(),
        );

        let run = &cfg.run;
        assert_eq!(run.start_clients, 2);
        assert_eq!(
            run.pacing,
            Pacing::Jittered {
                base: Duration::from_millis(100),
                jitter: Duration::from_millis(20)
            }
        );
        assert_eq!(run.reconcile_interval, Duration::from_millis(50));
        assert_eq!(run.threshold_interval, Duration::from_secs(2));
        assert_eq!(run.progress_interval, Duration::from_millis(500));
        assert_eq!(run.drain_timeout, Duration::from_secs(5));
        assert_eq!(run.iteration_timeout, Some(Duration::from_secs(3)));
        assert_eq!(run.stages.len(), 3);
        assert_eq!(run.stages[2].duration, Duration::from_millis(500));
        assert!(run.expected_statuses.contains(403));
        assert!(!run.expected_statuses.contains(429));

        // BTreeMap order: errors before http_req_duration.
        assert_eq!(run.thresholds.len(), 3);
        assert_eq!(run.thresholds[0].metric, "errors");
        assert!(!run.thresholds[0].abort_on_fail);
        assert!(run.thresholds[1].abort_on_fail);
        assert_eq!(run.thresholds[1].delay_abort_eval, Duration::from_secs(10));
        assert_eq!(run.thresholds[2].metric, "http_req_duration");
        assert_eq!(run.thresholds[2].expr.agg, ThresholdAgg::P(95.0));

        let w = &cfg.workload;
        assert_eq!(w.url, "https://limiter.internal/api/v2/check");
        assert_eq!(w.algorithm, "sliding_window");
        assert_eq!(w.limit, 50);
        assert_eq!(w.window, "30s");
        assert_eq!(w.key_prefix, "tenant");
        assert_eq!(w.request_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn cli_overrides_win() {
        let mut overrides = args();
        overrides.base_url = Some("http://override:9000".to_string());
        overrides.stages = vec![
            Stage::new(Duration::from_secs(1), 3),
            Stage::new(Duration::from_secs(1), 0),
        ];
        overrides.drain_timeout = Some(Duration::from_millis(750));

        let cfg = resolve(MINIMAL, &overrides);
        assert_eq!(cfg.run.stages, overrides.stages);
        assert_eq!(cfg.run.drain_timeout, Duration::from_millis(750));
        assert_eq!(cfg.workload.url, "http://override:9000/api/v1/limit-check");
    }

    #[test]
    fn invalid_threshold_is_rejected_with_metric_name() {
        let err = doc(
            r#"
baseUrl: http://localhost
stages: [{ duration: 1s, target: 1 }]
thresholds:
  http_req_duration: "p(95) ~ 500"
"#,
        )
        .resolve(&args())
        .err()
        .unwrap_or_else(|| panic!("expected an error"));

        assert!(format!("{err:#}").contains("http_req_duration"), "{err:#}");
    }

    #[test]
    fn missing_stages_and_base_url_are_rejected() {
        let err = doc("baseUrl: http://localhost\n")
            .resolve(&args())
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(err.downcast_ref::<surge_core::runner::ConfigError>().is_some());

        let err = doc("stages: [{ duration: 1s, target: 1 }]\n")
            .resolve(&args())
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(format!("{err:#}").contains("base URL"), "{err:#}");
    }

    #[test]
    fn unknown_fields_and_bad_durations_fail_to_parse() {
        assert!(serde_yaml::from_str::<RunDocYaml>("stagez: []\n").is_err());
        assert!(serde_yaml::from_str::<RunDocYaml>("drainTimeout: soon\n").is_err());
        assert!(serde_yaml::from_str::<RunDocYaml>("drainTimeout: -3\n").is_err());
    }

    #[tokio::test]
    async fn loads_the_demo_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/token-bucket.yaml");
        let cfg = load(&path)
            .await
            .unwrap_or_else(|e| panic!("{e:#}"))
            .resolve(&args())
            .unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(cfg.run.stages.len(), 7);
        assert_eq!(cfg.run.max_clients(), 200);
        assert_eq!(cfg.run.thresholds.len(), 2);
    }
}
