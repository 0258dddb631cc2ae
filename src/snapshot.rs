// src/snapshot.rs - Condition snapshots (one per branch)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::limits::{LimitLevel, LimitState};
use crate::shelving::ShelvingState;
use crate::value::{StatusCode, Value};

/// Branch identifier; [`BranchId::MAIN`] is the persistent main branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub u32);

impl BranchId {
    pub const MAIN: BranchId = BranchId(0);

    pub fn is_main(&self) -> bool {
        self.0 == 0
    }

    /// Field value: null for the main branch
    pub fn to_value(&self) -> Value {
        if self.is_main() {
            Value::Null
        } else {
            Value::Int(self.0 as i64)
        }
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one raised notification, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        EventId(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(EventId)
    }

    pub fn to_value(&self) -> Value {
        Value::ByteString(self.as_bytes().to_vec())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Display texts of a two-state variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLabels {
    pub true_state: &'static str,
    pub false_state: &'static str,
}

impl StateLabels {
    pub const ENABLED: StateLabels = StateLabels::new("Enabled", "Disabled");
    pub const ACTIVE: StateLabels = StateLabels::new("Active", "Inactive");
    pub const ACKED: StateLabels = StateLabels::new("Acknowledged", "Unacknowledged");
    pub const CONFIRMED: StateLabels = StateLabels::new("Confirmed", "Unconfirmed");
    pub const SUPPRESSED: StateLabels = StateLabels::new("Suppressed", "Unsuppressed");
    pub const OUT_OF_SERVICE: StateLabels = StateLabels::new("Out of Service", "In Service");

    const fn new(true_state: &'static str, false_state: &'static str) -> Self {
        Self {
            true_state,
            false_state,
        }
    }

    fn text(&self, id: bool) -> &'static str {
        if id {
            self.true_state
        } else {
            self.false_state
        }
    }
}

/// Boolean state with its transition time and display text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoStateVariable {
    pub id: bool,
    pub transition_time: DateTime<Utc>,
    pub effective_display_name: String,
}

impl TwoStateVariable {
    pub fn new(id: bool, labels: StateLabels, now: DateTime<Utc>) -> Self {
        Self {
            id,
            transition_time: now,
            effective_display_name: labels.text(id).to_string(),
        }
    }

    /// Move to `id`; transition time only changes on an actual change
    pub fn set(&mut self, id: bool, labels: StateLabels, now: DateTime<Utc>) -> bool {
        if self.id == id {
            return false;
        }
        self.id = id;
        self.transition_time = now;
        self.effective_display_name = labels.text(id).to_string();
        true
    }
}

/// Alarm-only part of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmFields {
    pub active_state: TwoStateVariable,
    pub suppressed_state: TwoStateVariable,
    pub out_of_service_state: TwoStateVariable,
    pub shelving_state: ShelvingState,
    pub shelving_transition_time: DateTime<Utc>,
    pub limit_state: Option<LimitState>,
}

impl AlarmFields {
    pub fn new(now: DateTime<Utc>, limit_state: Option<LimitState>) -> Self {
        Self {
            active_state: TwoStateVariable::new(false, StateLabels::ACTIVE, now),
            suppressed_state: TwoStateVariable::new(false, StateLabels::SUPPRESSED, now),
            out_of_service_state: TwoStateVariable::new(false, StateLabels::OUT_OF_SERVICE, now),
            shelving_state: ShelvingState::Unshelved,
            shelving_transition_time: now,
            limit_state,
        }
    }
}

/// All field values of one occurrence of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    pub branch_id: BranchId,
    pub event_id: EventId,
    pub time: DateTime<Utc>,
    pub message: String,
    pub quality: StatusCode,
    pub severity: u16,
    pub last_severity: u16,
    pub retain: bool,
    pub comment: String,
    pub client_user_id: String,
    pub enabled_state: TwoStateVariable,
    /// Present for acknowledgeable conditions
    pub acked_state: Option<TwoStateVariable>,
    /// Present for acknowledgeable conditions that support confirm
    pub confirmed_state: Option<TwoStateVariable>,
    pub alarm: Option<AlarmFields>,
}

impl ConditionSnapshot {
    /// Fresh main-branch snapshot: enabled, acknowledged, confirmed and
    /// inactive, so a new condition needs no attention until raised
    pub fn new(acknowledgeable: bool, confirmable: bool, alarm: Option<AlarmFields>, now: DateTime<Utc>) -> Self {
        Self {
            branch_id: BranchId::MAIN,
            event_id: EventId::new(),
            time: now,
            message: String::new(),
            quality: StatusCode::GOOD,
            severity: 0,
            last_severity: 0,
            retain: false,
            comment: String::new(),
            client_user_id: String::new(),
            enabled_state: TwoStateVariable::new(true, StateLabels::ENABLED, now),
            acked_state: acknowledgeable.then(|| TwoStateVariable::new(true, StateLabels::ACKED, now)),
            confirmed_state: (acknowledgeable && confirmable)
                .then(|| TwoStateVariable::new(true, StateLabels::CONFIRMED, now)),
            alarm,
        }
    }

    /// Difference check used by `raise`: only message, quality and
    /// severity are compared
    pub fn differs_from(&self, other: &ConditionSnapshot) -> bool {
        self.message != other.message || self.quality != other.quality || self.severity != other.severity
    }

    pub fn is_acked(&self) -> bool {
        self.acked_state.as_ref().map(|s| s.id).unwrap_or(true)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_state.as_ref().map(|s| s.id).unwrap_or(true)
    }

    pub fn is_active(&self) -> bool {
        self.alarm.as_ref().map(|a| a.active_state.id).unwrap_or(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled_state.id
    }

    /// Value of a condition field by its browse path key, e.g.
    /// `"AckedState/Id"`. Fields the snapshot does not carry yield `None`.
    pub fn field(&self, key: &str) -> Option<Value> {
        let (head, tail) = match key.split_once('/') {
            Some((head, tail)) => (head, Some(tail)),
            None => (key, None),
        };

        match (head, tail) {
            ("EventId", None) => Some(self.event_id.to_value()),
            ("Time", None) => Some(Value::DateTime(self.time)),
            ("Message", None) => Some(Value::String(self.message.clone())),
            ("Severity", None) => Some(Value::Int(self.severity as i64)),
            ("LastSeverity", None) => Some(Value::Int(self.last_severity as i64)),
            ("Quality", None) => Some(Value::Int(self.quality.0 as i64)),
            ("Retain", None) => Some(Value::Bool(self.retain)),
            ("Comment", None) => Some(Value::String(self.comment.clone())),
            ("ClientUserId", None) => Some(Value::String(self.client_user_id.clone())),
            ("BranchId", None) => Some(self.branch_id.to_value()),
            ("EnabledState", tail) => two_state_field(&self.enabled_state, tail),
            ("AckedState", tail) => two_state_field(self.acked_state.as_ref()?, tail),
            ("ConfirmedState", tail) => two_state_field(self.confirmed_state.as_ref()?, tail),
            (head, tail) => self.alarm.as_ref().and_then(|alarm| alarm_field(alarm, head, tail)),
        }
    }
}

fn two_state_field(state: &TwoStateVariable, tail: Option<&str>) -> Option<Value> {
    match tail {
        None => Some(Value::String(state.effective_display_name.clone())),
        Some("Id") => Some(Value::Bool(state.id)),
        Some("TransitionTime") => Some(Value::DateTime(state.transition_time)),
        Some("EffectiveDisplayName") => Some(Value::String(state.effective_display_name.clone())),
        _ => None,
    }
}

fn alarm_field(alarm: &AlarmFields, head: &str, tail: Option<&str>) -> Option<Value> {
    match (head, tail) {
        ("ActiveState", tail) => two_state_field(&alarm.active_state, tail),
        ("SuppressedState", tail) => two_state_field(&alarm.suppressed_state, tail),
        ("OutOfServiceState", tail) => two_state_field(&alarm.out_of_service_state, tail),
        ("SuppressedOrShelved", None) => Some(Value::Bool(
            alarm.suppressed_state.id || alarm.shelving_state.is_shelved(),
        )),
        ("ShelvingState", None | Some("CurrentState")) => {
            Some(Value::String(alarm.shelving_state.name().to_string()))
        }
        ("ShelvingState", Some("LastTransition/TransitionTime")) => {
            Some(Value::DateTime(alarm.shelving_transition_time))
        }
        ("ShelvingState", Some("UnshelveTime")) => match alarm.shelving_state {
            ShelvingState::TimedShelved { expires_at } => Some(Value::DateTime(expires_at)),
            _ => None,
        },
        ("LimitState", None | Some("CurrentState")) => {
            Some(Value::String(alarm.limit_state?.current_state_name()))
        }
        (level, Some("Id")) => {
            let limit_state = alarm.limit_state?;
            let level = match level {
                "HighHighState" => LimitLevel::HighHigh,
                "HighState" => LimitLevel::High,
                "LowState" => LimitLevel::Low,
                "LowLowState" => LimitLevel::LowLow,
                _ => return None,
            };
            Some(Value::Bool(limit_state.level_active(level)))
        }
        _ => None,
    }
}
