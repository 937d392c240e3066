use std::fmt;
use std::time::Duration;

use super::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Lte,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Gte,
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
}

impl ThresholdOp {
    #[must_use]
    pub fn holds(self, observed: f64, expected: f64) -> bool {
        match self {
            Self::Lt => observed < expected,
            Self::Lte => observed <= expected,
            Self::Gt => observed > expected,
            Self::Gte => observed >= expected,
            Self::Eq => observed == expected,
            Self::Ne => observed != expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Count,
    Rate,
    Value,
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.agg, self.op, self.value)
    }
}

/// Parses a k6-style threshold expression such as `p(95)<200` or `rate < 0.1`.
pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() {
        return Err("missing aggregation".to_string());
    }
    if right.is_empty() {
        return Err("missing threshold value".to_string());
    }

    let agg = parse_agg(left)?;

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("threshold value `{right}` must be finite"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

fn parse_agg(left: &str) -> Result<ThresholdAgg, String> {
    let lower = left.to_ascii_lowercase();
    let agg = match lower.as_str() {
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "value" => ThresholdAgg::Value,
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        other => {
            let Some(inner) = other.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) else {
                return Err(format!("unknown aggregation `{left}`"));
            };
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile `{inner}` out of range (0, 100]"));
            }
            ThresholdAgg::P(p)
        }
    };
    Ok(agg)
}

/// A pass/fail predicate over one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    /// The expression as written in the configuration.
    pub source: String,
    pub expr: ThresholdExpr,
    /// Stop the run as soon as a periodic evaluation fails this threshold.
    pub abort_on_fail: bool,
    /// Abort checks are skipped until this much run time has elapsed.
    pub delay_abort_eval: Duration,
}

impl Threshold {
    pub fn parse(metric: impl Into<String>, expression: &str) -> Result<Self, ConfigError> {
        let metric = metric.into();
        let expr = parse_threshold_expr(expression).map_err(|reason| {
            ConfigError::InvalidThreshold {
                metric: metric.clone(),
                expression: expression.to_string(),
                reason,
            }
        })?;

        if metric.trim().is_empty() {
            return Err(ConfigError::InvalidThreshold {
                metric,
                expression: expression.to_string(),
                reason: "metric name must not be empty".to_string(),
            });
        }

        Ok(Self {
            metric,
            source: expression.trim().to_string(),
            expr,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    #[must_use]
    pub fn with_abort_on_fail(mut self, abort_on_fail: bool) -> Self {
        self.abort_on_fail = abort_on_fail;
        self
    }

    #[must_use]
    pub fn with_delay_abort_eval(mut self, delay: Duration) -> Self {
        self.delay_abort_eval = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ThresholdExpr {
        parse_threshold_expr(raw).unwrap_or_else(|e| panic!("{raw}: {e}"))
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse("  avg  <=  123  ");
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parses_every_operator() {
        let cases = [
            ("rate<0.1", ThresholdOp::Lt),
            ("rate<=0.1", ThresholdOp::Lte),
            ("count>10", ThresholdOp::Gt),
            ("count>=10", ThresholdOp::Gte),
            ("value==3", ThresholdOp::Eq),
            ("value!=3", ThresholdOp::Ne),
        ];
        for (raw, op) in cases {
            assert_eq!(parse(raw).op, op, "{raw}");
        }
    }

    #[test]
    fn parses_fractional_percentiles_and_median() {
        assert_eq!(parse("p(99.9)<800").agg, ThresholdAgg::P(99.9));
        assert_eq!(parse("P(95) < 500").agg, ThresholdAgg::P(95.0));
        assert_eq!(parse("med<100").agg, ThresholdAgg::Med);
    }

    #[test]
    fn parse_threshold_expr_rejects_out_of_range_percentiles() {
        for raw in ["p(101)<1", "p(0)<1", "p(-5)<1"] {
            let err = match parse_threshold_expr(raw) {
                Ok(_) => panic!("expected error for {raw}"),
                Err(e) => e,
            };
            assert!(err.contains("out of range"), "{raw}: {err}");
        }
    }

    #[test]
    fn rejects_malformed_expressions() {
        for raw in ["", "rate", "<0.1", "rate<", "stddev<3", "rate<abc", "p(x)<1"] {
            assert!(parse_threshold_expr(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(parse(" p( 95 ) <  200 ").to_string(), "p(95)<200");
        assert_eq!(parse("rate != 0.5").to_string(), "rate!=0.5");
    }

    #[test]
    fn strict_less_than_fails_on_equality() {
        assert!(!ThresholdOp::Lt.holds(0.1, 0.1));
        assert!(ThresholdOp::Lte.holds(0.1, 0.1));
        assert!(ThresholdOp::Ne.holds(0.2, 0.1));
    }

    #[test]
    fn invalid_threshold_is_a_config_error() {
        let err = match Threshold::parse("errors", "rate<<0.1") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            ConfigError::InvalidThreshold { ref metric, .. } if metric == "errors"
        ));
    }

    #[test]
    fn threshold_builder_sets_abort_fields() {
        let t = Threshold::parse("http_req_failed", "rate<0.1")
            .unwrap_or_else(|e| panic!("{e}"))
            .with_abort_on_fail(true)
            .with_delay_abort_eval(Duration::from_secs(10));
        assert!(t.abort_on_fail);
        assert_eq!(t.delay_abort_eval, Duration::from_secs(10));
        assert_eq!(t.source, "rate<0.1");
    }
}
