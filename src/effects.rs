//! Side effects produced by allocation stages.
//!
//! Stages are pure numeric functions returning `(result, Vec<Effect>)`.
//! An [`EffectSink`] applies the collected effects after the cycle:
//! - [`LogSink`]: structured `tracing` output, audits under target `audit`
//! - [`RecordingSink`]: keeps everything in memory for inspection

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::utils::round6;

/// Gauge names.
pub mod gauge {
    pub const SOFT_FACTOR: &str = "allocator_soft_factor";
    pub const DRAWDOWN_PCT: &str = "portfolio_drawdown_pct";
    pub const BUDGET_AVAILABLE_USD: &str = "portfolio_budget_available_usd";
    pub const HWM_EQUITY_USD: &str = "allocator_hwm_equity_usd";
    pub const ESTIMATED_COST_BPS: &str = "allocator_estimated_cost_bps";
    pub const COST_ATTENUATION: &str = "allocator_cost_attenuation";
    pub const COST_SLIPPAGE_BPS: &str = "allocator_cost_slippage_bps";
    pub const FILLRATE_ATTENUATION: &str = "allocator_fillrate_attenuation";
    pub const LIQUIDITY_FACTOR: &str = "allocator_liquidity_factor";
    pub const TURNOVER_FACTOR: &str = "allocator_turnover_factor";
    pub const MICRO_BIAS_STRENGTH: &str = "allocator_micro_bias_strength";
    pub const BACKOFF_LEVEL: &str = "allocator_backoff_level";
    pub const SIZING_DELTA_RATIO: &str = "allocator_sizing_delta_ratio";
    pub const WEIGHT: &str = "portfolio_weight";
    pub const TARGET_USD: &str = "portfolio_target_usd";
}

/// Counter names.
pub mod counter {
    pub const DELTA_CAPPED_TOTAL: &str = "allocator_delta_capped_total";
    pub const FEE_TILT_APPLIED_TOTAL: &str = "allocator_fee_tilt_applied_total";
    pub const POSITION_SKEW_BREACH_TOTAL: &str = "position_skew_breach_total";
    pub const SNAPSHOT_LOADS_TOTAL: &str = "allocator_snapshot_loads_total";
    pub const SNAPSHOT_LOADS_FAILED_TOTAL: &str = "allocator_snapshot_loads_failed_total";
    pub const SNAPSHOT_WRITES_TOTAL: &str = "allocator_snapshot_writes_total";
    pub const SNAPSHOT_WRITES_FAILED_TOTAL: &str = "allocator_snapshot_writes_failed_total";
}

/// A single observable side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Audit(AuditEvent),
    Gauge {
        name: &'static str,
        symbol: Option<String>,
        value: f64,
    },
    Counter {
        name: &'static str,
        symbol: Option<String>,
        delta: f64,
    },
}

impl Effect {
    pub fn gauge(name: &'static str, value: f64) -> Self {
        Effect::Gauge {
            name,
            symbol: None,
            value,
        }
    }

    pub fn symbol_gauge(name: &'static str, symbol: &str, value: f64) -> Self {
        Effect::Gauge {
            name,
            symbol: Some(symbol.to_string()),
            value,
        }
    }

    pub fn counter(name: &'static str, delta: f64) -> Self {
        Effect::Counter {
            name,
            symbol: None,
            delta,
        }
    }

    pub fn symbol_counter(name: &'static str, symbol: &str, delta: f64) -> Self {
        Effect::Counter {
            name,
            symbol: Some(symbol.to_string()),
            delta,
        }
    }
}

/// Rate-limiter audit payload. Numeric fields are rounded to 6 decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClampAudit {
    pub symbol: String,
    pub delta_raw: f64,
    pub cap: f64,
    pub delta_capped: f64,
    pub backoff_level: usize,
    pub next: f64,
}

impl ClampAudit {
    pub fn new(
        symbol: &str,
        delta_raw: f64,
        cap: f64,
        delta_capped: f64,
        backoff_level: usize,
        next: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            delta_raw: round6(delta_raw),
            cap: round6(cap),
            delta_capped: round6(delta_capped),
            backoff_level,
            next: round6(next),
        }
    }
}

/// Audit events consumed by downstream tooling.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// A guard started blocking allocation.
    GuardBlock { name: String },
    /// A previously blocking guard cleared.
    GuardResume { name: String },
    /// Rate limiter clamped a delta or changed backoff level.
    AllocClamp(ClampAudit),
}

impl AuditEvent {
    /// Event family: `GUARD` or `ALLOC`.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::GuardBlock { .. } | AuditEvent::GuardResume { .. } => "GUARD",
            AuditEvent::AllocClamp(_) => "ALLOC",
        }
    }

    /// Symbol the event refers to, `-` for portfolio-wide events.
    pub fn symbol(&self) -> &str {
        match self {
            AuditEvent::AllocClamp(c) => &c.symbol,
            _ => "-",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            AuditEvent::GuardBlock { name } => json!({"name": name, "event": "block"}),
            AuditEvent::GuardResume { name } => json!({"name": name, "event": "resume"}),
            AuditEvent::AllocClamp(c) => json!({
                "delta_raw": c.delta_raw,
                "cap": c.cap,
                "delta_capped": c.delta_capped,
                "backoff_level": c.backoff_level,
                "next": c.next,
            }),
        }
    }

    /// Timestamped record as written to the audit log.
    pub fn record(&self, timestamp: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            timestamp,
            kind: self.kind(),
            symbol: self.symbol().to_string(),
            payload: self.payload(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: &'static str,
    pub symbol: String,
    pub payload: Value,
}

/// Applies effects produced by a cycle.
pub trait EffectSink {
    fn apply(&mut self, effect: &Effect);

    fn apply_all(&mut self, effects: &[Effect]) {
        for effect in effects {
            self.apply(effect);
        }
    }
}

/// Writes effects to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EffectSink for LogSink {
    fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::Audit(event) => {
                let json = serde_json::to_string(&event.record(Utc::now())).unwrap_or_default();
                info!(target: "audit", "AUDIT: {}", json);
            }
            Effect::Gauge {
                name,
                symbol,
                value,
            } => {
                debug!(target: "metrics", metric = name, symbol = symbol.as_deref().unwrap_or("-"), value, "gauge");
            }
            Effect::Counter {
                name,
                symbol,
                delta,
            } => {
                debug!(target: "metrics", metric = name, symbol = symbol.as_deref().unwrap_or("-"), delta, "counter");
            }
        }
    }
}

/// Keeps every applied effect in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub effects: Vec<Effect>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audits(&self) -> impl Iterator<Item = &AuditEvent> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Audit(a) => Some(a),
            _ => None,
        })
    }

    /// Most recent value of a gauge (optionally for one symbol).
    pub fn last_gauge(&self, name: &str, symbol: Option<&str>) -> Option<f64> {
        self.effects.iter().rev().find_map(|e| match e {
            Effect::Gauge {
                name: n,
                symbol: s,
                value,
            } if *n == name && s.as_deref() == symbol => Some(*value),
            _ => None,
        })
    }

    /// Sum of all increments of a counter across symbols.
    pub fn counter_total(&self, name: &str) -> f64 {
        self.effects
            .iter()
            .filter_map(|e| match e {
                Effect::Counter { name: n, delta, .. } if *n == name => Some(*delta),
                _ => None,
            })
            .sum()
    }
}

impl EffectSink for RecordingSink {
    fn apply(&mut self, effect: &Effect) {
        self.effects.push(effect.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_audit_rounds_to_six_decimals() {
        let audit = ClampAudit::new("BTCUSDT", 100.123_456_789, 15.000_000_4, 15.000_000_4, 1, 115.000_000_4);
        assert_eq!(audit.delta_raw, 100.123457);
        assert_eq!(audit.cap, 15.0);
        assert_eq!(audit.next, 115.0);

        let event = AuditEvent::AllocClamp(audit);
        assert_eq!(event.kind(), "ALLOC");
        assert_eq!(event.symbol(), "BTCUSDT");
        assert_eq!(event.payload()["backoff_level"], 1);
    }

    #[test]
    fn test_guard_audit_payload() {
        let event = AuditEvent::GuardBlock {
            name: "intraday_caps".to_string(),
        };
        assert_eq!(event.kind(), "GUARD");
        assert_eq!(event.symbol(), "-");
        assert_eq!(event.payload(), json!({"name": "intraday_caps", "event": "block"}));

        let record = event.record(Utc::now());
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.contains("\"kind\":\"GUARD\""));
    }

    #[test]
    fn test_recording_sink_queries() {
        let mut sink = RecordingSink::new();
        sink.apply_all(&[
            Effect::gauge(gauge::SOFT_FACTOR, 1.0),
            Effect::gauge(gauge::SOFT_FACTOR, 0.5),
            Effect::symbol_counter(counter::DELTA_CAPPED_TOTAL, "A", 2.0),
            Effect::symbol_counter(counter::DELTA_CAPPED_TOTAL, "B", 3.0),
            Effect::Audit(AuditEvent::GuardResume {
                name: "intraday_caps".to_string(),
            }),
        ]);

        assert_eq!(sink.last_gauge(gauge::SOFT_FACTOR, None), Some(0.5));
        assert_eq!(sink.counter_total(counter::DELTA_CAPPED_TOTAL), 5.0);
        assert_eq!(sink.audits().count(), 1);
    }
}
