// src/limits.rs - Limit evaluators for alarm activation
//
// Every evaluator is a pure function of the input, the alarm configuration
// and the previous limit state. Nothing here touches condition state.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::error::{AcError, Result};
use crate::value::{DataValue, StatusCode, Value};

/// Default lead time of certificate expiration alarms
pub const DEFAULT_EXPIRATION_LIMIT_DAYS: i64 = 14;

// ==========================================
// SECTION 1: LIMIT LEVELS AND STATES
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitLevel {
    HighHigh,
    High,
    Low,
    LowLow,
}

impl LimitLevel {
    /// Declaration order, high side first
    pub const PRIORITY: [LimitLevel; 4] = [
        LimitLevel::HighHigh,
        LimitLevel::High,
        LimitLevel::Low,
        LimitLevel::LowLow,
    ];

    /// Order in which exclusive limits are tested: high side before low
    /// side, outermost level first on each side
    pub const EXCLUSIVE_ORDER: [LimitLevel; 4] = [
        LimitLevel::HighHigh,
        LimitLevel::High,
        LimitLevel::LowLow,
        LimitLevel::Low,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LimitLevel::HighHigh => "HighHigh",
            LimitLevel::High => "High",
            LimitLevel::Low => "Low",
            LimitLevel::LowLow => "LowLow",
        }
    }

    fn is_high_side(&self) -> bool {
        matches!(self, LimitLevel::HighHigh | LimitLevel::High)
    }

    /// True when `other` is this level or lies further out on the same side
    fn covered_by(&self, other: LimitLevel) -> bool {
        match self {
            LimitLevel::HighHigh => other == LimitLevel::HighHigh,
            LimitLevel::High => matches!(other, LimitLevel::High | LimitLevel::HighHigh),
            LimitLevel::Low => matches!(other, LimitLevel::Low | LimitLevel::LowLow),
            LimitLevel::LowLow => other == LimitLevel::LowLow,
        }
    }
}

impl fmt::Display for LimitLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Independent sub-states of a non-exclusive limit alarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitFlags {
    pub high_high: bool,
    pub high: bool,
    pub low: bool,
    pub low_low: bool,
}

impl LimitFlags {
    pub fn get(&self, level: LimitLevel) -> bool {
        match level {
            LimitLevel::HighHigh => self.high_high,
            LimitLevel::High => self.high,
            LimitLevel::Low => self.low,
            LimitLevel::LowLow => self.low_low,
        }
    }

    pub fn set(&mut self, level: LimitLevel, on: bool) {
        match level {
            LimitLevel::HighHigh => self.high_high = on,
            LimitLevel::High => self.high = on,
            LimitLevel::Low => self.low = on,
            LimitLevel::LowLow => self.low_low = on,
        }
    }

    pub fn any(&self) -> bool {
        self.high_high || self.high || self.low || self.low_low
    }
}

/// Limit state carried by limit alarm snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitState {
    /// At most one current level
    Exclusive(Option<LimitLevel>),
    NonExclusive(LimitFlags),
}

impl LimitState {
    pub fn is_active(&self) -> bool {
        match self {
            LimitState::Exclusive(level) => level.is_some(),
            LimitState::NonExclusive(flags) => flags.any(),
        }
    }

    /// Whether the given level is currently reported
    pub fn level_active(&self, level: LimitLevel) -> bool {
        match self {
            LimitState::Exclusive(current) => *current == Some(level),
            LimitState::NonExclusive(flags) => flags.get(level),
        }
    }

    /// Text of the `CurrentState` field, empty when no level is active
    pub fn current_state_name(&self) -> String {
        match self {
            LimitState::Exclusive(level) => level.map(|l| l.name().to_string()).unwrap_or_default(),
            LimitState::NonExclusive(flags) => LimitLevel::PRIORITY
                .iter()
                .filter(|level| flags.get(**level))
                .map(|level| level.name())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Whether limit levels are mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitMode {
    Exclusive,
    NonExclusive,
}

impl LimitMode {
    /// State with no level active
    pub fn inactive_state(&self) -> LimitState {
        match self {
            LimitMode::Exclusive => LimitState::Exclusive(None),
            LimitMode::NonExclusive => LimitState::NonExclusive(LimitFlags::default()),
        }
    }
}

// ==========================================
// SECTION 2: THRESHOLDS
// ==========================================

/// Threshold set of a limit, deviation or rate-of-change alarm
///
/// Any subset of thresholds may be absent. `deadband` is the hysteresis a
/// value has to retreat past before an active level clears.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitSet {
    #[serde(default)]
    pub high_high: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub low_low: Option<f64>,
    #[serde(default)]
    pub deadband: f64,
}

impl LimitSet {
    pub fn threshold(&self, level: LimitLevel) -> Option<f64> {
        match level {
            LimitLevel::HighHigh => self.high_high,
            LimitLevel::High => self.high,
            LimitLevel::Low => self.low,
            LimitLevel::LowLow => self.low_low,
        }
    }

    /// Check ordering `LowLow <= Low <= High <= HighHigh` of the present
    /// thresholds
    pub fn validate(&self) -> Result<()> {
        if !self.deadband.is_finite() || self.deadband < 0.0 {
            return Err(AcError::Config(format!(
                "Deadband must be a non-negative number, got {}",
                self.deadband
            )));
        }

        let present: Vec<(LimitLevel, f64)> = LimitLevel::PRIORITY
            .iter()
            .rev()
            .filter_map(|level| self.threshold(*level).map(|t| (*level, t)))
            .collect();

        if present.is_empty() {
            return Err(AcError::Config("Limit alarm needs at least one threshold".into()));
        }
        if let Some((level, _)) = present.iter().find(|(_, t)| !t.is_finite()) {
            return Err(AcError::Config(format!("{} threshold is not finite", level)));
        }
        for pair in present.windows(2) {
            let (lower, lower_value) = pair[0];
            let (upper, upper_value) = pair[1];
            if lower_value > upper_value {
                return Err(AcError::Config(format!(
                    "{} threshold {} exceeds {} threshold {}",
                    lower, lower_value, upper, upper_value
                )));
            }
        }
        Ok(())
    }

    /// Whether `input` is beyond `level`, honouring the deadband when the
    /// level (or one further out) was already active
    fn breached(&self, level: LimitLevel, input: f64, was_active: bool) -> bool {
        let Some(threshold) = self.threshold(level) else {
            return false;
        };
        let held = was_active && self.deadband > 0.0;
        if level.is_high_side() {
            input >= threshold || (held && input > threshold - self.deadband)
        } else {
            input <= threshold || (held && input < threshold + self.deadband)
        }
    }
}

// ==========================================
// SECTION 3: EVALUATORS
// ==========================================

/// Exclusive limit rule: the outermost breached level wins
pub fn evaluate_exclusive(input: f64, limits: &LimitSet, previous: Option<LimitLevel>) -> Option<LimitLevel> {
    LimitLevel::EXCLUSIVE_ORDER.into_iter().find(|level| {
        let was_active = previous.map(|p| level.covered_by(p)).unwrap_or(false);
        limits.breached(*level, input, was_active)
    })
}

/// Non-exclusive limit rule: every level evaluated on its own
pub fn evaluate_non_exclusive(input: f64, limits: &LimitSet, previous: LimitFlags) -> LimitFlags {
    let mut flags = LimitFlags::default();
    for level in LimitLevel::PRIORITY {
        flags.set(level, limits.breached(level, input, previous.get(level)));
    }
    flags
}

/// Apply the limit rule of `mode`, continuing from `previous` when it has
/// the same shape
pub fn evaluate_limits(mode: LimitMode, input: f64, limits: &LimitSet, previous: Option<&LimitState>) -> LimitState {
    match mode {
        LimitMode::Exclusive => {
            let prev = match previous {
                Some(LimitState::Exclusive(level)) => *level,
                _ => None,
            };
            LimitState::Exclusive(evaluate_exclusive(input, limits, prev))
        }
        LimitMode::NonExclusive => {
            let prev = match previous {
                Some(LimitState::NonExclusive(flags)) => *flags,
                _ => LimitFlags::default(),
            };
            LimitState::NonExclusive(evaluate_non_exclusive(input, limits, prev))
        }
    }
}

/// Deviation rule: limits applied to `input - setpoint`. A setpoint that is
/// not good yields `None` and the caller keeps its previous state.
pub fn evaluate_deviation(
    mode: LimitMode,
    input: f64,
    setpoint: &DataValue,
    limits: &LimitSet,
    previous: Option<&LimitState>,
) -> Option<LimitState> {
    if !setpoint.status.is_good() {
        return None;
    }
    let setpoint = setpoint.value.as_float()?;
    Some(evaluate_limits(mode, input - setpoint, limits, previous))
}

/// Discrete rule: active while the input is outside the normal set
pub fn evaluate_discrete(input: &Value, normal_values: &[Value]) -> bool {
    !normal_values.iter().any(|normal| normal.loosely_equals(input))
}

/// Certificate rule: active from `expiration - limit` onwards; a limit
/// reaching before the clock range keeps the alarm active
pub fn evaluate_certificate(now: DateTime<Utc>, expiration: DateTime<Utc>, limit: Duration) -> bool {
    match expiration.checked_sub_signed(limit) {
        Some(warn_from) => now >= warn_from,
        None => true,
    }
}

// ==========================================
// SECTION 4: RATE OF CHANGE
// ==========================================

/// Keeps the two most recent samples of a rate-of-change alarm
#[derive(Debug, Clone, Default)]
pub struct RateSampler {
    samples: VecDeque<(f64, DateTime<Utc>)>,
    window: Option<Duration>,
}

impl RateSampler {
    /// `window` bounds the age gap between the two samples; a larger gap
    /// makes the rate undefined until the next sample arrives
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            samples: VecDeque::with_capacity(2),
            window,
        }
    }

    /// Record a sample and return the rate per second, if defined
    pub fn record(&mut self, value: f64, timestamp: DateTime<Utc>) -> Option<f64> {
        if let Some((_, last)) = self.samples.back() {
            // Out of order or duplicate timestamps replace nothing
            if timestamp <= *last {
                return None;
            }
        }
        if self.samples.len() == 2 {
            self.samples.pop_front();
        }
        self.samples.push_back((value, timestamp));
        self.rate()
    }

    /// `(v1 - v0) / (t1 - t0)` in units per second
    pub fn rate(&self) -> Option<f64> {
        let (v0, t0) = *self.samples.front()?;
        let (v1, t1) = *self.samples.get(1)?;
        let elapsed = t1 - t0;
        if let Some(window) = self.window {
            if elapsed > window {
                return None;
            }
        }
        let seconds = elapsed.num_microseconds()? as f64 / 1_000_000.0;
        if seconds <= 0.0 {
            return None;
        }
        Some((v1 - v0) / seconds)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// ==========================================
// SECTION 5: EVALUATION RESULT
// ==========================================

/// Result of one evaluation step of an alarm
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Inputs were usable
    Evaluated {
        active: bool,
        limit_state: Option<LimitState>,
    },
    /// Not enough information yet; keep the previous state
    Undetermined,
    /// An input reported a bad or uncertain status
    Degraded(StatusCode),
}
