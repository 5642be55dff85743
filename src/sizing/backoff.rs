//! Per-symbol rate limiting with hysteresis backoff.
//!
//! The allowed change per tick is `max(|current| × ratio, abs_floor)` scaled
//! by `backoff_steps[level]`. A guard breach on the symbol (or any color
//! breach) raises the level by one immediately; without breaches the level
//! falls by one at most once every `cooldown_ticks` ticks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::SmoothingConfig;
use crate::effects::{counter, gauge, AuditEvent, ClampAudit, Effect};

/// Backoff levels and cooldown countdowns per symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    pub levels: BTreeMap<String, usize>,
    pub cooldowns: BTreeMap<String, u32>,
}

impl BackoffState {
    pub fn level(&self, symbol: &str) -> usize {
        self.levels.get(symbol).copied().unwrap_or(0)
    }

    pub fn cooldown(&self, symbol: &str) -> u32 {
        self.cooldowns.get(symbol).copied().unwrap_or(0)
    }
}

/// Outcome of one rate-limit step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitStep {
    pub delta_raw: f64,
    pub cap: f64,
    pub delta_capped: f64,
    pub level: usize,
    pub level_changed: bool,
    pub next: f64,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_delta_ratio: f64,
    max_delta_abs_usd: f64,
    steps: Vec<f64>,
    cooldown_ticks: u32,
}

impl RateLimiter {
    pub fn new(config: &SmoothingConfig) -> Self {
        let steps = if config.backoff_steps.is_empty() {
            vec![1.0]
        } else {
            config.backoff_steps.clone()
        };
        Self {
            max_delta_ratio: config.max_delta_ratio.max(0.0),
            max_delta_abs_usd: config.max_delta_abs_usd.max(0.0),
            steps,
            cooldown_ticks: config.backoff_cooldown_ticks,
        }
    }

    pub fn max_level(&self) -> usize {
        self.steps.len() - 1
    }

    /// Advance the backoff bookkeeping for `symbol` by one tick and return
    /// `(previous_level, new_level)`.
    pub fn tick_backoff(&self, state: &mut BackoffState, symbol: &str, escalate: bool) -> (usize, usize) {
        let prev = state.level(symbol).min(self.max_level());
        let mut level = prev;

        if escalate {
            level = (level + 1).min(self.max_level());
            state.cooldowns.insert(symbol.to_string(), self.cooldown_ticks);
        } else {
            let cooldown = state.cooldown(symbol);
            if cooldown > 0 {
                state.cooldowns.insert(symbol.to_string(), cooldown - 1);
            } else if level > 0 {
                level -= 1;
                state.cooldowns.insert(symbol.to_string(), self.cooldown_ticks);
            }
        }

        state.levels.insert(symbol.to_string(), level);
        (prev, level)
    }

    /// Limit the move from `current` toward `desired`.
    ///
    /// `current` is `None` for a symbol with no previous target; the desired
    /// value is then taken as is while backoff bookkeeping still advances.
    pub fn step(
        &self,
        state: &mut BackoffState,
        symbol: &str,
        current: Option<f64>,
        desired: f64,
        escalate: bool,
    ) -> (LimitStep, Vec<Effect>) {
        let (prev_level, level) = self.tick_backoff(state, symbol, escalate);
        let level_changed = prev_level != level;

        let (delta_raw, cap, delta_capped, next) = match current {
            Some(current) => {
                let delta_raw = desired - current;
                let cap_base = (current.abs() * self.max_delta_ratio).max(self.max_delta_abs_usd);
                let cap = cap_base * self.steps[level];
                let delta_capped = if cap <= 0.0 {
                    0.0
                } else {
                    delta_raw.clamp(-cap, cap)
                };
                (delta_raw, cap, delta_capped, (current + delta_capped).max(0.0))
            }
            None => {
                let next = desired.max(0.0);
                (next, f64::INFINITY, next, next)
            }
        };

        let step = LimitStep {
            delta_raw,
            cap,
            delta_capped,
            level,
            level_changed,
            next,
        };

        let base = current.map(f64::abs).unwrap_or(0.0).max(1.0);
        let mut effects = vec![
            Effect::symbol_gauge(gauge::BACKOFF_LEVEL, symbol, level as f64),
            Effect::symbol_counter(counter::DELTA_CAPPED_TOTAL, symbol, delta_capped.abs()),
            Effect::symbol_gauge(gauge::SIZING_DELTA_RATIO, symbol, delta_capped.abs() / base),
        ];

        if delta_capped != delta_raw || level_changed {
            debug!(
                symbol,
                current = current.unwrap_or(0.0),
                desired,
                delta_raw,
                cap,
                delta_capped,
                backoff_level = level,
                next,
                "Rate limit applied"
            );
            effects.push(Effect::Audit(AuditEvent::AllocClamp(ClampAudit::new(
                symbol,
                delta_raw,
                if cap.is_finite() { cap } else { 0.0 },
                delta_capped,
                level,
                next,
            ))));
        }

        (step, effects)
    }
}
