// File: src/alarm.rs
// Alarm state machine for OPC UA alarm conditions
//
// Extends the generic condition lifecycle with input-driven activation,
// shelving, suppression and out-of-service overlays. The alarm kind is a
// closed set of standard types; kind-specific evaluation is selected by
// tag and delegated to the evaluators in `limits`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::condition::{Condition, ConditionKind, RetainRule};
use crate::error::{AcError, Result, StateViolation};
use crate::graph::NodeGraph;
use crate::limits::{
    evaluate_certificate, evaluate_deviation, evaluate_discrete, evaluate_limits, Evaluation,
    LimitMode, LimitSet, LimitState, RateSampler, DEFAULT_EXPIRATION_LIMIT_DAYS,
};
use crate::node::{ids, NodeId};
use crate::shelving::{ShelveRequest, ShelvingState, ShelvingTimers, TimerId};
use crate::snapshot::{AlarmFields, BranchId, ConditionSnapshot, StateLabels, TwoStateVariable};
use crate::source::{SourceRegistry, ValueSource};
use crate::value::{DataValue, StatusCode, Value};

/// Severity used when none is configured
pub const DEFAULT_SEVERITY: u16 = 500;

// ==========================================
// SECTION 1: ALARM KINDS
// ==========================================

/// Standard alarm types supported by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlarmKind {
    Alarm,
    ExclusiveLimit,
    ExclusiveLevel,
    ExclusiveDeviation,
    ExclusiveRateOfChange,
    NonExclusiveLimit,
    NonExclusiveLevel,
    NonExclusiveDeviation,
    NonExclusiveRateOfChange,
    Discrete,
    OffNormal,
    SystemOffNormal,
    Trip,
    CertificateExpiration,
}

impl AlarmKind {
    /// Most derived kinds first, so the first match is the closest standard
    /// ancestor of a requested type
    pub const MOST_DERIVED_FIRST: [AlarmKind; 14] = [
        AlarmKind::CertificateExpiration,
        AlarmKind::Trip,
        AlarmKind::SystemOffNormal,
        AlarmKind::OffNormal,
        AlarmKind::Discrete,
        AlarmKind::ExclusiveLevel,
        AlarmKind::ExclusiveDeviation,
        AlarmKind::ExclusiveRateOfChange,
        AlarmKind::ExclusiveLimit,
        AlarmKind::NonExclusiveLevel,
        AlarmKind::NonExclusiveDeviation,
        AlarmKind::NonExclusiveRateOfChange,
        AlarmKind::NonExclusiveLimit,
        AlarmKind::Alarm,
    ];

    pub fn type_id(&self) -> NodeId {
        match self {
            AlarmKind::Alarm => ids::ALARM_CONDITION_TYPE,
            AlarmKind::ExclusiveLimit => ids::EXCLUSIVE_LIMIT_ALARM_TYPE,
            AlarmKind::ExclusiveLevel => ids::EXCLUSIVE_LEVEL_ALARM_TYPE,
            AlarmKind::ExclusiveDeviation => ids::EXCLUSIVE_DEVIATION_ALARM_TYPE,
            AlarmKind::ExclusiveRateOfChange => ids::EXCLUSIVE_RATE_OF_CHANGE_ALARM_TYPE,
            AlarmKind::NonExclusiveLimit => ids::NON_EXCLUSIVE_LIMIT_ALARM_TYPE,
            AlarmKind::NonExclusiveLevel => ids::NON_EXCLUSIVE_LEVEL_ALARM_TYPE,
            AlarmKind::NonExclusiveDeviation => ids::NON_EXCLUSIVE_DEVIATION_ALARM_TYPE,
            AlarmKind::NonExclusiveRateOfChange => ids::NON_EXCLUSIVE_RATE_OF_CHANGE_ALARM_TYPE,
            AlarmKind::Discrete => ids::DISCRETE_ALARM_TYPE,
            AlarmKind::OffNormal => ids::OFF_NORMAL_ALARM_TYPE,
            AlarmKind::SystemOffNormal => ids::SYSTEM_OFF_NORMAL_ALARM_TYPE,
            AlarmKind::Trip => ids::TRIP_ALARM_TYPE,
            AlarmKind::CertificateExpiration => ids::CERTIFICATE_EXPIRATION_ALARM_TYPE,
        }
    }

    /// Limit rule of limit-derived kinds
    pub fn limit_mode(&self) -> Option<LimitMode> {
        match self {
            AlarmKind::ExclusiveLimit
            | AlarmKind::ExclusiveLevel
            | AlarmKind::ExclusiveDeviation
            | AlarmKind::ExclusiveRateOfChange => Some(LimitMode::Exclusive),
            AlarmKind::NonExclusiveLimit
            | AlarmKind::NonExclusiveLevel
            | AlarmKind::NonExclusiveDeviation
            | AlarmKind::NonExclusiveRateOfChange => Some(LimitMode::NonExclusive),
            _ => None,
        }
    }

    /// Retain rule applied unless the builder overrides it
    ///
    /// Certificate expiration alarms clear silently once the certificate is
    /// renewed; every other kind keeps a cleared occurrence retained until
    /// it is acknowledged.
    pub fn default_retain_rule(&self) -> RetainRule {
        match self {
            AlarmKind::CertificateExpiration => RetainRule {
                silent_return: true,
                ..RetainRule::default()
            },
            _ => RetainRule::default(),
        }
    }

    /// Whether `config` can drive this kind
    pub fn accepts(&self, config: &AlarmConfig) -> bool {
        match self {
            AlarmKind::Alarm => matches!(config, AlarmConfig::Boolean { .. }),
            AlarmKind::ExclusiveLimit
            | AlarmKind::ExclusiveLevel
            | AlarmKind::NonExclusiveLimit
            | AlarmKind::NonExclusiveLevel => matches!(config, AlarmConfig::Limit { .. }),
            AlarmKind::ExclusiveDeviation | AlarmKind::NonExclusiveDeviation => {
                matches!(config, AlarmConfig::Deviation { .. })
            }
            AlarmKind::ExclusiveRateOfChange | AlarmKind::NonExclusiveRateOfChange => {
                matches!(config, AlarmConfig::RateOfChange { .. })
            }
            AlarmKind::Discrete | AlarmKind::OffNormal | AlarmKind::SystemOffNormal | AlarmKind::Trip => {
                matches!(config, AlarmConfig::Discrete { .. } | AlarmConfig::Boolean { .. })
            }
            AlarmKind::CertificateExpiration => {
                matches!(config, AlarmConfig::CertificateExpiration { .. })
            }
        }
    }
}

/// Activation inputs of an alarm
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmConfig {
    /// Active while the input is true
    Boolean { input: NodeId },
    Limit { input: NodeId, limits: LimitSet },
    /// Limits applied to `input - setpoint`
    Deviation {
        input: NodeId,
        setpoint: NodeId,
        limits: LimitSet,
    },
    /// Limits applied to the rate of change per second
    RateOfChange {
        input: NodeId,
        limits: LimitSet,
        window: Option<Duration>,
    },
    /// Active while the input is outside `normal_values`; the value of
    /// `normal_state`, when configured, is read at evaluation time and
    /// also counts as normal
    Discrete {
        input: NodeId,
        normal_values: Vec<Value>,
        normal_state: Option<NodeId>,
    },
    CertificateExpiration {
        expiration_date: DateTime<Utc>,
        expiration_limit: Option<Duration>,
    },
}

impl AlarmConfig {
    pub fn input(&self) -> Option<&NodeId> {
        match self {
            AlarmConfig::Boolean { input }
            | AlarmConfig::Limit { input, .. }
            | AlarmConfig::Deviation { input, .. }
            | AlarmConfig::RateOfChange { input, .. }
            | AlarmConfig::Discrete { input, .. } => Some(input),
            AlarmConfig::CertificateExpiration { .. } => None,
        }
    }

    fn limits(&self) -> Option<&LimitSet> {
        match self {
            AlarmConfig::Limit { limits, .. }
            | AlarmConfig::Deviation { limits, .. }
            | AlarmConfig::RateOfChange { limits, .. } => Some(limits),
            _ => None,
        }
    }
}

// ==========================================
// SECTION 2: ALARM RUNTIME STATE
// ==========================================

/// Alarm-only runtime state owned by a condition
pub(crate) struct AlarmRuntime {
    pub(crate) config: AlarmConfig,
    pub(crate) description: String,
    pub(crate) input: Option<Arc<dyn ValueSource>>,
    pub(crate) setpoint: Option<Arc<dyn ValueSource>>,
    pub(crate) normal_state: Option<Arc<dyn ValueSource>>,
    pub(crate) sampler: Option<RateSampler>,
    pub(crate) max_time_shelved: Option<Duration>,
    /// Live shelving timer, at most one
    pub(crate) timer: Option<TimerId>,
    /// Bumped on every shelving change so stale expiries are ignored
    pub(crate) shelving_generation: u64,
}

impl std::fmt::Debug for AlarmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmRuntime")
            .field("config", &self.config)
            .field("timer", &self.timer)
            .field("shelving_generation", &self.shelving_generation)
            .finish()
    }
}

// ==========================================
// SECTION 3: BUILDER
// ==========================================

/// Builds a condition of its final kind in one step
///
/// # Examples
///
/// ```rust
/// use petra_ac::{AlarmConfig, ConditionBuilder, DataValue, LimitSet, MemoryGraph, NodeId, SourceRegistry};
/// use petra_ac::node::ids;
///
/// let graph = MemoryGraph::with_standard_types();
/// let sources = SourceRegistry::new();
/// let level = NodeId::string(1, "Tank1.Level");
/// sources.add_variable(level.clone(), DataValue::new(50.0));
///
/// let alarm = ConditionBuilder::new(NodeId::string(1, "Tank1.LevelAlarm"), "LevelAlarm", ids::EXCLUSIVE_LEVEL_ALARM_TYPE)
///     .alarm(AlarmConfig::Limit {
///         input: level,
///         limits: LimitSet { high: Some(90.0), low: Some(10.0), ..Default::default() },
///     })
///     .build(&graph, &sources)?;
/// assert!(!alarm.main().is_active());
/// # Ok::<(), petra_ac::AcError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    node_id: NodeId,
    name: String,
    type_id: NodeId,
    source: Option<(NodeId, Option<String>)>,
    alarm: Option<AlarmConfig>,
    severity: u16,
    message: Option<String>,
    confirmable: bool,
    retain_rule: Option<RetainRule>,
    max_time_shelved: Option<Duration>,
    enabled: bool,
}

impl ConditionBuilder {
    pub fn new(node_id: NodeId, name: impl Into<String>, type_id: NodeId) -> Self {
        Self {
            node_id,
            name: name.into(),
            type_id,
            source: None,
            alarm: None,
            severity: DEFAULT_SEVERITY,
            message: None,
            confirmable: true,
            retain_rule: None,
            max_time_shelved: None,
            enabled: true,
        }
    }

    /// Source node; its name is looked up in the graph when not given
    pub fn source(mut self, node_id: NodeId, name: Option<String>) -> Self {
        self.source = Some((node_id, name));
        self
    }

    pub fn alarm(mut self, config: AlarmConfig) -> Self {
        self.alarm = Some(config);
        self
    }

    pub fn severity(mut self, severity: u16) -> Self {
        self.severity = severity;
        self
    }

    /// Base text of generated messages
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn confirmable(mut self, confirmable: bool) -> Self {
        self.confirmable = confirmable;
        self
    }

    pub fn retain_rule(mut self, rule: RetainRule) -> Self {
        self.retain_rule = Some(rule);
        self
    }

    pub fn max_time_shelved(mut self, max: Duration) -> Self {
        self.max_time_shelved = Some(max);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate the type and references and produce the condition
    pub fn build(mut self, graph: &dyn NodeGraph, sources: &SourceRegistry) -> Result<Condition> {
        let kind = resolve_kind(graph, &self.type_id)?;
        let now = Utc::now();

        let alarm = match (kind, self.alarm.take()) {
            (ConditionKind::Alarm(alarm_kind), Some(config)) => {
                if !alarm_kind.accepts(&config) {
                    return Err(AcError::Config(format!(
                        "Alarm configuration of '{}' does not fit {:?}",
                        self.name, alarm_kind
                    )));
                }
                if let Some(limits) = config.limits() {
                    limits.validate()?;
                }
                Some(self.runtime(config, sources)?)
            }
            (ConditionKind::Alarm(alarm_kind), None) => {
                return Err(AcError::Config(format!(
                    "Alarm '{}' of kind {:?} needs an alarm configuration",
                    self.name, alarm_kind
                )));
            }
            (_, Some(_)) => {
                return Err(AcError::TypeMismatch {
                    type_id: self.type_id,
                    expected: "AlarmConditionType",
                });
            }
            (_, None) => None,
        };

        let display_name = |id: &NodeId| {
            graph
                .find_node(id)
                .map(|node| node.display_name)
                .unwrap_or_else(|| id.to_string())
        };
        let (source_node, source_name) = match self.source.take() {
            Some((id, Some(name))) => (id, name),
            Some((id, None)) => {
                let name = display_name(&id);
                (id, name)
            }
            None => match alarm.as_ref().and_then(|rt| rt.config.input()) {
                Some(input) => (input.clone(), display_name(input)),
                None => (self.node_id.clone(), self.name.clone()),
            },
        };

        let acknowledgeable = kind.is_acknowledgeable();
        let confirmable = acknowledgeable && self.confirmable;
        let alarm_fields = kind.alarm_kind().map(|alarm_kind| {
            AlarmFields::new(now, alarm_kind.limit_mode().map(|mode| mode.inactive_state()))
        });

        let mut main = ConditionSnapshot::new(acknowledgeable, confirmable, alarm_fields, now);
        main.severity = self.severity;
        main.last_severity = self.severity;
        main.message = match (&alarm, &self.message) {
            (Some(rt), _) => format!("{}: Normal", rt.description),
            (None, Some(message)) => message.clone(),
            (None, None) => String::new(),
        };
        if !self.enabled {
            main.enabled_state = TwoStateVariable::new(false, StateLabels::ENABLED, now);
        }

        let retain_rule = self
            .retain_rule
            .or_else(|| kind.alarm_kind().map(|k| k.default_retain_rule()))
            .unwrap_or_default();

        info!("Created condition {} '{}' as {:?}", self.node_id, self.name, kind);

        Ok(Condition {
            node_id: self.node_id,
            name: self.name,
            kind,
            event_type: self.type_id,
            source_node,
            source_name,
            confirmable,
            retain_rule,
            main,
            branches: BTreeMap::new(),
            next_branch: 0,
            caller_retain: false,
            outbox: Vec::new(),
            alarm,
        })
    }

    fn runtime(&self, config: AlarmConfig, sources: &SourceRegistry) -> Result<AlarmRuntime> {
        let lookup = |id: &NodeId, role: &str| {
            sources.get(id).map_err(|_| {
                AcError::Config(format!("{} '{}' of '{}' is not a known value source", role, id, self.name))
            })
        };

        let input = config.input().map(|id| lookup(id, "Input")).transpose()?;
        let setpoint = match &config {
            AlarmConfig::Deviation { setpoint, .. } => Some(lookup(setpoint, "Setpoint")?),
            _ => None,
        };
        let normal_state = match &config {
            AlarmConfig::Discrete {
                normal_state: Some(id), ..
            } => Some(lookup(id, "Normal state")?),
            _ => None,
        };
        let sampler = match &config {
            AlarmConfig::RateOfChange { window, .. } => {
                let window = window
                    .map(chrono::Duration::from_std)
                    .transpose()
                    .map_err(|_| AcError::Config(format!("Sampling window of '{}' is out of range", self.name)))?;
                Some(RateSampler::new(window))
            }
            _ => None,
        };
        if let AlarmConfig::CertificateExpiration {
            expiration_date,
            expiration_limit: Some(limit),
        } = &config
        {
            chrono::Duration::from_std(*limit)
                .ok()
                .and_then(|limit| expiration_date.checked_sub_signed(limit))
                .ok_or_else(|| AcError::Config(format!("Expiration limit of '{}' is out of range", self.name)))?;
        }

        Ok(AlarmRuntime {
            config,
            description: self.message.clone().unwrap_or_else(|| self.name.clone()),
            input,
            setpoint,
            normal_state,
            sampler,
            max_time_shelved: self.max_time_shelved,
            timer: None,
            shelving_generation: 0,
        })
    }
}

/// Closest standard kind of `type_id`
fn resolve_kind(graph: &dyn NodeGraph, type_id: &NodeId) -> Result<ConditionKind> {
    if !graph.is_subtype_of(type_id, &ids::CONDITION_TYPE) {
        return Err(AcError::TypeMismatch {
            type_id: type_id.clone(),
            expected: "ConditionType",
        });
    }
    if graph.is_subtype_of(type_id, &ids::ALARM_CONDITION_TYPE) {
        let kind = AlarmKind::MOST_DERIVED_FIRST
            .into_iter()
            .find(|kind| graph.is_subtype_of(type_id, &kind.type_id()))
            .unwrap_or(AlarmKind::Alarm);
        // LimitAlarmType itself fixes no limit rule
        if kind == AlarmKind::Alarm && graph.is_subtype_of(type_id, &ids::LIMIT_ALARM_TYPE) {
            return Err(AcError::TypeMismatch {
                type_id: type_id.clone(),
                expected: "ExclusiveLimitAlarmType or NonExclusiveLimitAlarmType",
            });
        }
        return Ok(ConditionKind::Alarm(kind));
    }
    if graph.is_subtype_of(type_id, &ids::ACKNOWLEDGEABLE_CONDITION_TYPE) {
        return Ok(ConditionKind::Acknowledgeable);
    }
    Ok(ConditionKind::Condition)
}

// ==========================================
// SECTION 4: INPUT-DRIVEN TRANSITIONS
// ==========================================

impl Condition {
    pub fn is_alarm(&self) -> bool {
        self.alarm.is_some()
    }

    fn require_alarm(&self) -> Result<&AlarmRuntime> {
        self.alarm
            .as_ref()
            .ok_or_else(|| self.violation(StateViolation::NotAnAlarm))
    }

    /// Source driving activation, if the kind has one
    pub fn input_source(&self) -> Option<Arc<dyn ValueSource>> {
        self.alarm.as_ref().and_then(|rt| rt.input.clone())
    }

    /// Secondary sources whose changes require re-evaluation
    pub fn dependency_sources(&self) -> Vec<Arc<dyn ValueSource>> {
        self.alarm
            .as_ref()
            .map(|rt| rt.setpoint.iter().chain(rt.normal_state.iter()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn alarm_config(&self) -> Option<&AlarmConfig> {
        self.alarm.as_ref().map(|rt| &rt.config)
    }

    /// Evaluate a new input sample
    ///
    /// A sample that is not good degrades quality and never changes the
    /// active state. Disabled conditions ignore input.
    pub fn on_input_value_changed(&mut self, sample: &DataValue) {
        if self.alarm.is_none() || !self.is_enabled() {
            return;
        }
        let timestamp = sample.source_timestamp;

        if !sample.status.is_good() {
            warn!("Input of {} reports {}, keeping active state", self.node_id, sample.status);
            self.degrade(sample.status, timestamp);
            return;
        }

        match self.evaluate(sample) {
            Evaluation::Evaluated { active, limit_state } => self.apply(active, limit_state, timestamp),
            Evaluation::Undetermined => {
                debug!("Evaluation of {} undetermined", self.node_id);
                self.restore_quality(timestamp);
            }
            Evaluation::Degraded(status) => {
                warn!("Evaluation of {} degraded: {}", self.node_id, status);
                self.degrade(status, timestamp);
            }
        }
    }

    /// Re-run evaluation with the current input value, e.g. after a
    /// setpoint change or after enabling the condition
    pub fn reevaluate(&mut self) {
        if let Some(AlarmConfig::CertificateExpiration { .. }) = self.alarm_config() {
            self.evaluate_expiration(Utc::now());
            return;
        }
        if let Some(input) = self.input_source() {
            let sample = input.read_value();
            self.on_input_value_changed(&sample);
        }
    }

    /// Periodic check of certificate expiration alarms
    pub fn evaluate_expiration(&mut self, now: DateTime<Utc>) {
        if !self.is_enabled() {
            return;
        }
        let Some(AlarmConfig::CertificateExpiration {
            expiration_date,
            expiration_limit,
        }) = self.alarm_config()
        else {
            return;
        };
        let limit = expiration_limit
            .and_then(|limit| chrono::Duration::from_std(limit).ok())
            .unwrap_or_else(|| chrono::Duration::days(DEFAULT_EXPIRATION_LIMIT_DAYS));
        let active = evaluate_certificate(now, *expiration_date, limit);
        self.apply(active, None, now);
    }

    /// Certificate renewed or replaced
    pub fn set_expiration_date(&mut self, date: DateTime<Utc>) -> Result<()> {
        let updated = match self.alarm.as_mut().map(|rt| &mut rt.config) {
            Some(AlarmConfig::CertificateExpiration { expiration_date, .. }) => {
                *expiration_date = date;
                true
            }
            _ => false,
        };
        if !updated {
            return Err(self.violation(StateViolation::NotAnAlarm));
        }
        self.evaluate_expiration(Utc::now());
        Ok(())
    }

    fn evaluate(&mut self, sample: &DataValue) -> Evaluation {
        let kind = self.kind.alarm_kind();
        let previous = self.main.alarm.as_ref().and_then(|a| a.limit_state);
        let Some(rt) = self.alarm.as_mut() else {
            return Evaluation::Undetermined;
        };
        let mode = kind.and_then(|k| k.limit_mode()).unwrap_or(LimitMode::Exclusive);

        match &rt.config {
            AlarmConfig::Boolean { .. } => match sample.value.as_bool() {
                Some(active) => Evaluation::Evaluated {
                    active,
                    limit_state: None,
                },
                None => Evaluation::Degraded(StatusCode::BAD_TYPE_MISMATCH),
            },
            AlarmConfig::Limit { limits, .. } => match sample.value.as_float() {
                Some(input) => limit_outcome(evaluate_limits(mode, input, limits, previous.as_ref())),
                None => Evaluation::Degraded(StatusCode::BAD_TYPE_MISMATCH),
            },
            AlarmConfig::Deviation { limits, .. } => {
                let Some(input) = sample.value.as_float() else {
                    return Evaluation::Degraded(StatusCode::BAD_TYPE_MISMATCH);
                };
                let setpoint = match &rt.setpoint {
                    Some(source) => source.read_value(),
                    None => return Evaluation::Degraded(StatusCode::BAD_NODE_ID_UNKNOWN),
                };
                match evaluate_deviation(mode, input, &setpoint, limits, previous.as_ref()) {
                    Some(state) => limit_outcome(state),
                    None if !setpoint.status.is_good() => Evaluation::Degraded(setpoint.status),
                    None => Evaluation::Degraded(StatusCode::BAD_TYPE_MISMATCH),
                }
            }
            AlarmConfig::RateOfChange { limits, .. } => {
                let Some(input) = sample.value.as_float() else {
                    return Evaluation::Degraded(StatusCode::BAD_TYPE_MISMATCH);
                };
                let limits = limits.clone();
                let rate = rt
                    .sampler
                    .as_mut()
                    .and_then(|sampler| sampler.record(input, sample.source_timestamp));
                match rate {
                    Some(rate) => limit_outcome(evaluate_limits(mode, rate, &limits, previous.as_ref())),
                    None => Evaluation::Undetermined,
                }
            }
            AlarmConfig::Discrete { normal_values, .. } => {
                let mut normal = normal_values.clone();
                if let Some(source) = &rt.normal_state {
                    let reference = source.read_value();
                    if !reference.status.is_good() {
                        return Evaluation::Degraded(reference.status);
                    }
                    normal.push(reference.value);
                }
                let active = if normal.is_empty() {
                    // Without a normal set a discrete input behaves like a boolean
                    match sample.value.as_bool() {
                        Some(active) => active,
                        None => return Evaluation::Degraded(StatusCode::BAD_TYPE_MISMATCH),
                    }
                } else {
                    evaluate_discrete(&sample.value, &normal)
                };
                Evaluation::Evaluated {
                    active,
                    limit_state: None,
                }
            }
            AlarmConfig::CertificateExpiration { .. } => Evaluation::Undetermined,
        }
    }

    fn message_for(&self, active: bool, limit_state: Option<&LimitState>) -> String {
        let description = self
            .alarm
            .as_ref()
            .map(|rt| rt.description.as_str())
            .unwrap_or(self.name.as_str());
        if !active {
            return format!("{}: Normal", description);
        }
        match limit_state.map(|state| state.current_state_name()) {
            Some(level) if !level.is_empty() => format!("{}: {} limit", description, level),
            _ => format!("{}: Active", description),
        }
    }

    /// Apply an evaluation result to the main branch
    fn apply(&mut self, active: bool, limit_state: Option<LimitState>, timestamp: DateTime<Utc>) {
        let was_active = self.main.is_active();
        let message = self.message_for(active, limit_state.as_ref());

        if active && !was_active {
            // A still outstanding previous occurrence moves to its own branch
            if !self.main.is_acked() || !self.main.is_confirmed() {
                self.open_branch(timestamp);
            }
            let main = &mut self.main;
            main.quality = StatusCode::GOOD;
            main.message = message;
            if let Some(alarm) = main.alarm.as_mut() {
                alarm.active_state.set(true, StateLabels::ACTIVE, timestamp);
                if limit_state.is_some() {
                    alarm.limit_state = limit_state;
                }
            }
            if let Some(acked) = main.acked_state.as_mut() {
                acked.set(false, StateLabels::ACKED, timestamp);
            }
            if let Some(confirmed) = main.confirmed_state.as_mut() {
                confirmed.set(false, StateLabels::CONFIRMED, timestamp);
            }
            info!("Alarm {} active: {}", self.node_id, self.main.message);
            self.emit(BranchId::MAIN, timestamp);
        } else if !active && was_active {
            let silent = self.retain_rule.silent_return;
            let main = &mut self.main;
            main.quality = StatusCode::GOOD;
            main.message = message;
            let mut one_shot_ended = false;
            if let Some(alarm) = main.alarm.as_mut() {
                alarm.active_state.set(false, StateLabels::ACTIVE, timestamp);
                if limit_state.is_some() {
                    alarm.limit_state = limit_state;
                }
                if alarm.shelving_state == ShelvingState::OneShotShelved {
                    alarm.shelving_state = ShelvingState::Unshelved;
                    alarm.shelving_transition_time = timestamp;
                    one_shot_ended = true;
                }
            }
            if silent {
                if let Some(acked) = main.acked_state.as_mut() {
                    acked.set(true, StateLabels::ACKED, timestamp);
                }
                if let Some(confirmed) = main.confirmed_state.as_mut() {
                    confirmed.set(true, StateLabels::CONFIRMED, timestamp);
                }
            }
            if one_shot_ended {
                if let Some(rt) = self.alarm.as_mut() {
                    rt.shelving_generation += 1;
                }
            }
            info!("Alarm {} returned to normal", self.node_id);
            self.emit(BranchId::MAIN, timestamp);
        } else {
            let main = &mut self.main;
            let mut changed = false;
            if main.quality != StatusCode::GOOD {
                main.quality = StatusCode::GOOD;
                changed = true;
            }
            if let Some(alarm) = main.alarm.as_mut() {
                if limit_state.is_some() && alarm.limit_state != limit_state {
                    alarm.limit_state = limit_state;
                    changed = true;
                }
            }
            if main.message != message {
                main.message = message;
                changed = true;
            }
            if changed {
                debug!("Alarm {} updated without transition", self.node_id);
                self.emit(BranchId::MAIN, timestamp);
            }
        }
    }

    fn degrade(&mut self, status: StatusCode, timestamp: DateTime<Utc>) {
        if self.main.quality != status {
            self.main.quality = status;
            self.emit(BranchId::MAIN, timestamp);
        }
    }

    fn restore_quality(&mut self, timestamp: DateTime<Utc>) {
        self.degrade(StatusCode::GOOD, timestamp);
    }

    // ==========================================
    // SECTION 5: SHELVING AND OVERLAYS
    // ==========================================

    pub fn shelving_state(&self) -> ShelvingState {
        self.main
            .alarm
            .as_ref()
            .map(|a| a.shelving_state)
            .unwrap_or_default()
    }

    /// Shelve the alarm; a timed shelve arms exactly one timer and cancels
    /// any previous one
    pub fn shelve(&mut self, request: ShelveRequest, timers: &mut dyn ShelvingTimers) -> Result<()> {
        let max_time_shelved = self.require_alarm()?.max_time_shelved;
        self.check_enabled()?;
        let now = Utc::now();

        match (self.shelving_state(), request) {
            (ShelvingState::TimedShelved { .. }, ShelveRequest::Timed(_))
            | (ShelvingState::OneShotShelved, ShelveRequest::OneShot) => {
                return Err(self.violation(StateViolation::AlreadyShelved));
            }
            _ => {}
        }

        let expires_at = match request {
            ShelveRequest::Timed(duration) => {
                if duration.is_zero() || max_time_shelved.map(|max| duration > max).unwrap_or(false) {
                    return Err(AcError::ShelvingTimeOutOfRange(duration));
                }
                let expires_at = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or(AcError::ShelvingTimeOutOfRange(duration))?;
                Some(expires_at)
            }
            ShelveRequest::OneShot => None,
        };

        let node_id = self.node_id.clone();
        let mut state = ShelvingState::OneShotShelved;
        if let Some(rt) = self.alarm.as_mut() {
            let generation = rt.shelving_generation + 1;
            // A failed arm leaves the previous shelve untouched
            let armed = match (request, expires_at) {
                (ShelveRequest::Timed(duration), Some(expires_at)) => {
                    state = ShelvingState::TimedShelved { expires_at };
                    Some(timers.arm(&node_id, generation, duration)?)
                }
                _ => None,
            };
            if let Some(timer) = rt.timer.take() {
                timers.cancel(timer);
            }
            rt.shelving_generation = generation;
            rt.timer = armed;
        }

        self.set_shelving_state(state, now);
        info!("Alarm {} shelved ({})", self.node_id, state.name());
        self.emit(BranchId::MAIN, now);
        Ok(())
    }

    pub fn unshelve(&mut self, timers: &mut dyn ShelvingTimers) -> Result<()> {
        self.require_alarm()?;
        self.check_enabled()?;
        if !self.shelving_state().is_shelved() {
            return Err(self.violation(StateViolation::NotShelved));
        }
        let now = Utc::now();
        self.clear_shelving(timers, now);
        info!("Alarm {} unshelved", self.node_id);
        self.emit(BranchId::MAIN, now);
        Ok(())
    }

    /// Timer callback of a timed shelve. Returns false for stale expiries.
    pub fn on_shelving_timer_expired(&mut self, generation: u64, timers: &mut dyn ShelvingTimers) -> bool {
        let current = self.alarm.as_ref().map(|rt| rt.shelving_generation);
        let timed = matches!(self.shelving_state(), ShelvingState::TimedShelved { .. });
        if current != Some(generation) || !timed {
            debug!("Ignoring stale shelving timer of {} (generation {})", self.node_id, generation);
            return false;
        }
        let now = Utc::now();
        self.clear_shelving(timers, now);
        info!("Shelving of {} expired", self.node_id);
        self.emit(BranchId::MAIN, now);
        true
    }

    /// Remaining time of a timed shelve
    pub fn unshelve_time(&self) -> Option<Duration> {
        match self.shelving_state() {
            ShelvingState::TimedShelved { expires_at } => {
                Some((expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            }
            _ => None,
        }
    }

    fn clear_shelving(&mut self, timers: &mut dyn ShelvingTimers, now: DateTime<Utc>) {
        if let Some(rt) = self.alarm.as_mut() {
            if let Some(timer) = rt.timer.take() {
                timers.cancel(timer);
            }
            rt.shelving_generation += 1;
        }
        self.set_shelving_state(ShelvingState::Unshelved, now);
    }

    /// Cancel a live shelving timer without touching the shelving state
    pub(crate) fn release_timer(&mut self, timers: &mut dyn ShelvingTimers) {
        if let Some(timer) = self.alarm.as_mut().and_then(|rt| rt.timer.take()) {
            timers.cancel(timer);
        }
    }

    fn set_shelving_state(&mut self, state: ShelvingState, now: DateTime<Utc>) {
        if let Some(alarm) = self.main.alarm.as_mut() {
            alarm.shelving_state = state;
            alarm.shelving_transition_time = now;
        }
    }

    /// Suppression overlay; never changes the active state
    pub fn set_suppressed(&mut self, suppressed: bool) -> Result<bool> {
        self.set_overlay(suppressed, StateLabels::SUPPRESSED, |alarm| &mut alarm.suppressed_state)
    }

    /// Out-of-service overlay; never changes the active state
    pub fn set_out_of_service(&mut self, out_of_service: bool) -> Result<bool> {
        self.set_overlay(out_of_service, StateLabels::OUT_OF_SERVICE, |alarm| {
            &mut alarm.out_of_service_state
        })
    }

    fn set_overlay(
        &mut self,
        flag: bool,
        labels: StateLabels,
        select: impl FnOnce(&mut AlarmFields) -> &mut TwoStateVariable,
    ) -> Result<bool> {
        self.require_alarm()?;
        let now = Utc::now();
        let changed = match self.main.alarm.as_mut() {
            Some(alarm) => select(alarm).set(flag, labels, now),
            None => false,
        };
        if changed {
            info!("Alarm {} {}", self.node_id, if flag { labels.true_state } else { labels.false_state });
            self.emit(BranchId::MAIN, now);
        }
        Ok(changed)
    }
}

fn limit_outcome(state: LimitState) -> Evaluation {
    Evaluation::Evaluated {
        active: state.is_active(),
        limit_state: Some(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraph, MockNodeGraph};
    use crate::shelving::ManualTimers;
    use crate::source::Variable;
    use crate::value::Value;

    struct Fixture {
        graph: MemoryGraph,
        sources: SourceRegistry,
        input: Arc<Variable>,
    }

    fn fixture(initial: impl Into<Value>) -> Fixture {
        let sources = SourceRegistry::new();
        let input = sources.add_variable(NodeId::string(1, "Input"), DataValue::new(initial));
        Fixture {
            graph: MemoryGraph::with_standard_types(),
            sources,
            input,
        }
    }

    fn thresholds() -> LimitSet {
        LimitSet {
            high_high: Some(100.0),
            high: Some(90.0),
            low: Some(10.0),
            low_low: Some(0.0),
            deadband: 0.0,
        }
    }

    fn limit_alarm(f: &Fixture, type_id: NodeId) -> Condition {
        ConditionBuilder::new(NodeId::string(1, "LevelAlarm"), "LevelAlarm", type_id)
            .alarm(AlarmConfig::Limit {
                input: NodeId::string(1, "Input"),
                limits: thresholds(),
            })
            .build(&f.graph, &f.sources)
            .unwrap()
    }

    fn off_normal(f: &Fixture) -> Condition {
        ConditionBuilder::new(NodeId::string(1, "Valve.OffNormal"), "OffNormal", ids::OFF_NORMAL_ALARM_TYPE)
            .alarm(AlarmConfig::Discrete {
                input: NodeId::string(1, "Input"),
                normal_values: vec![Value::Bool(false)],
                normal_state: None,
            })
            .build(&f.graph, &f.sources)
            .unwrap()
    }

    fn feed(cond: &mut Condition, value: impl Into<Value>) {
        cond.on_input_value_changed(&DataValue::new(value));
    }

    #[test]
    fn test_builder_rejects_non_condition_type() {
        let f = fixture(0.0);
        let result = ConditionBuilder::new(NodeId::string(1, "X"), "X", ids::BASE_OBJECT_TYPE).build(&f.graph, &f.sources);
        assert!(matches!(result, Err(AcError::TypeMismatch { .. })));
    }

    #[test]
    fn test_builder_rejects_missing_input() {
        let f = fixture(0.0);
        let result = ConditionBuilder::new(NodeId::string(1, "X"), "X", ids::EXCLUSIVE_LIMIT_ALARM_TYPE)
            .alarm(AlarmConfig::Limit {
                input: NodeId::string(1, "Missing"),
                limits: thresholds(),
            })
            .build(&f.graph, &f.sources);
        assert!(matches!(result, Err(AcError::Config(_))));

        let no_config = ConditionBuilder::new(NodeId::string(1, "X"), "X", ids::TRIP_ALARM_TYPE).build(&f.graph, &f.sources);
        assert!(matches!(no_config, Err(AcError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_mismatched_config() {
        let f = fixture(0.0);
        let result = ConditionBuilder::new(NodeId::string(1, "X"), "X", ids::EXCLUSIVE_DEVIATION_ALARM_TYPE)
            .alarm(AlarmConfig::Limit {
                input: NodeId::string(1, "Input"),
                limits: thresholds(),
            })
            .build(&f.graph, &f.sources);
        assert!(matches!(result, Err(AcError::Config(_))));
    }

    #[test]
    fn test_builder_picks_closest_standard_kind() {
        let f = fixture(false);
        let vendor_trip = NodeId::string(2, "PumpTripAlarmType");
        f.graph.add_event_type(vendor_trip.clone(), "PumpTripAlarmType", Some(ids::TRIP_ALARM_TYPE));
        let cond = ConditionBuilder::new(NodeId::string(1, "Trip"), "Trip", vendor_trip.clone())
            .alarm(AlarmConfig::Boolean {
                input: NodeId::string(1, "Input"),
            })
            .build(&f.graph, &f.sources)
            .unwrap();
        assert_eq!(cond.kind(), ConditionKind::Alarm(AlarmKind::Trip));
        assert_eq!(cond.event_type(), &vendor_trip);
    }

    #[test]
    fn test_builder_uses_mocked_hierarchy() {
        let mut graph = MockNodeGraph::new();
        graph
            .expect_is_subtype_of()
            .returning(|type_id, base| base == &ids::CONDITION_TYPE || base == type_id);
        graph.expect_find_node().returning(|_| None);
        let cond = ConditionBuilder::new(NodeId::string(1, "C"), "C", NodeId::string(3, "Custom"))
            .build(&graph, &SourceRegistry::new())
            .unwrap();
        assert_eq!(cond.kind(), ConditionKind::Condition);
    }

    #[test]
    fn test_exclusive_limit_transitions() {
        let f = fixture(50.0);
        let mut alarm = limit_alarm(&f, ids::EXCLUSIVE_LEVEL_ALARM_TYPE);

        feed(&mut alarm, 95.0);
        assert!(alarm.main().is_active());
        assert!(!alarm.main().is_acked());
        assert!(alarm.retain());
        assert_eq!(
            alarm.main().alarm.as_ref().unwrap().limit_state,
            Some(LimitState::Exclusive(Some(crate::limits::LimitLevel::High)))
        );

        feed(&mut alarm, 100.0);
        assert_eq!(alarm.main().field("LimitState/CurrentState"), Some(Value::String("HighHigh".into())));

        feed(&mut alarm, 50.0);
        assert!(!alarm.main().is_active());
        assert!(alarm.retain(), "cleared but unacknowledged alarm stays retained");

        alarm.acknowledge(BranchId::MAIN, "ok", "op").unwrap();
        alarm.confirm(BranchId::MAIN, "ok", "op").unwrap();
        assert!(!alarm.retain());
        assert_eq!(alarm.take_events().len(), 5);
    }

    #[test]
    fn test_non_exclusive_sub_state_change_without_transition() {
        let f = fixture(50.0);
        let mut alarm = limit_alarm(&f, ids::NON_EXCLUSIVE_LEVEL_ALARM_TYPE);
        feed(&mut alarm, 95.0);
        feed(&mut alarm, 101.0);
        let events = alarm.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].snapshot.field("HighHighState/Id"), Some(Value::Bool(true)));
        assert_eq!(events[1].snapshot.field("HighState/Id"), Some(Value::Bool(true)));

        feed(&mut alarm, 101.0);
        assert!(alarm.take_events().is_empty());
    }

    #[test]
    fn test_bad_input_degrades_quality_only() {
        let f = fixture(50.0);
        let mut alarm = limit_alarm(&f, ids::EXCLUSIVE_LIMIT_ALARM_TYPE);
        feed(&mut alarm, 95.0);
        alarm.on_input_value_changed(&DataValue::new(20.0).with_status(StatusCode::BAD_SENSOR_FAILURE));
        assert!(alarm.main().is_active());
        assert_eq!(alarm.main().quality, StatusCode::BAD_SENSOR_FAILURE);

        feed(&mut alarm, 95.0);
        assert_eq!(alarm.main().quality, StatusCode::GOOD);
        assert!(alarm.main().is_active());
    }

    #[test]
    fn test_reactivation_opens_branch_for_unacked_occurrence() {
        let f = fixture(false);
        let mut alarm = off_normal(&f);
        feed(&mut alarm, true);
        feed(&mut alarm, false);
        feed(&mut alarm, true);

        assert_eq!(alarm.branch_count(), 1);
        let branch = alarm.branch_ids()[0];
        let old = alarm.snapshot(branch).unwrap();
        assert!(!old.is_active());
        assert!(!old.is_acked());
        assert!(old.retain);

        alarm.acknowledge(branch, "seen", "op").unwrap();
        assert_eq!(alarm.branch_count(), 1, "confirm still outstanding");
        alarm.confirm(branch, "done", "op").unwrap();
        assert_eq!(alarm.branch_count(), 0);

        let last = alarm.take_events().pop().unwrap();
        assert_eq!(last.branch_id, branch);
        assert!(!last.retain());
        assert!(alarm.main().is_active());
    }

    #[test]
    fn test_non_confirmable_branch_removed_on_ack() {
        let f = fixture(false);
        let mut alarm = ConditionBuilder::new(NodeId::string(1, "Alarm"), "Alarm", ids::ALARM_CONDITION_TYPE)
            .alarm(AlarmConfig::Boolean {
                input: NodeId::string(1, "Input"),
            })
            .confirmable(false)
            .build(&f.graph, &f.sources)
            .unwrap();
        feed(&mut alarm, true);
        feed(&mut alarm, false);
        feed(&mut alarm, true);
        let branch = alarm.branch_ids()[0];
        alarm.acknowledge(branch, "", "op").unwrap();
        assert_eq!(alarm.branch_count(), 0);
    }

    #[test]
    fn test_acked_occurrence_does_not_branch() {
        let f = fixture(false);
        let mut alarm = off_normal(&f);
        feed(&mut alarm, true);
        alarm.acknowledge(BranchId::MAIN, "", "op").unwrap();
        alarm.confirm(BranchId::MAIN, "", "op").unwrap();
        feed(&mut alarm, false);
        feed(&mut alarm, true);
        assert_eq!(alarm.branch_count(), 0);
        assert!(!alarm.main().is_acked());
    }

    #[test]
    fn test_timed_shelve_arms_single_timer() {
        let f = fixture(false);
        let mut alarm = off_normal(&f);
        let mut timers = ManualTimers::new();

        alarm.shelve(ShelveRequest::Timed(Duration::from_secs(60)), &mut timers).unwrap();
        assert!(matches!(
            alarm.shelve(ShelveRequest::Timed(Duration::from_secs(30)), &mut timers),
            Err(AcError::InvalidState {
                violation: StateViolation::AlreadyShelved,
                ..
            })
        ));
        alarm.shelve(ShelveRequest::OneShot, &mut timers).unwrap();
        assert!(timers.armed().is_empty());
        assert_eq!(timers.cancelled(), 1);

        alarm.shelve(ShelveRequest::Timed(Duration::from_secs(30)), &mut timers).unwrap();
        let armed = timers.armed();
        assert_eq!(armed.len(), 1);
        assert!(alarm.unshelve_time().unwrap() <= Duration::from_secs(30));

        let (_, generation, _) = armed[0].clone();
        assert!(!alarm.on_shelving_timer_expired(generation - 1, &mut timers));
        assert!(alarm.on_shelving_timer_expired(generation, &mut timers));
        assert_eq!(alarm.shelving_state(), ShelvingState::Unshelved);
        assert!(timers.armed().is_empty());
    }

    #[test]
    fn test_shelve_bounds_and_unshelve() {
        let f = fixture(false);
        let mut alarm = ConditionBuilder::new(NodeId::string(1, "A"), "A", ids::OFF_NORMAL_ALARM_TYPE)
            .alarm(AlarmConfig::Boolean {
                input: NodeId::string(1, "Input"),
            })
            .max_time_shelved(Duration::from_secs(3600))
            .build(&f.graph, &f.sources)
            .unwrap();
        let mut timers = ManualTimers::new();

        assert!(matches!(
            alarm.shelve(ShelveRequest::Timed(Duration::from_secs(7200)), &mut timers),
            Err(AcError::ShelvingTimeOutOfRange(_))
        ));
        assert!(matches!(
            alarm.unshelve(&mut timers),
            Err(AcError::InvalidState {
                violation: StateViolation::NotShelved,
                ..
            })
        ));
        alarm.shelve(ShelveRequest::OneShot, &mut timers).unwrap();
        alarm.unshelve(&mut timers).unwrap();
        assert_eq!(alarm.shelving_state(), ShelvingState::Unshelved);
    }

    #[test]
    fn test_shelve_past_clock_range_rejected() {
        let f = fixture(false);
        let mut alarm = off_normal(&f);
        let mut timers = ManualTimers::new();
        alarm.take_events();

        let err = alarm
            .shelve(ShelveRequest::Timed(Duration::from_secs(10_000_000_000_000)), &mut timers)
            .unwrap_err();
        assert!(matches!(err, AcError::ShelvingTimeOutOfRange(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_SHELVING_TIME_OUT_OF_RANGE);
        assert_eq!(alarm.shelving_state(), ShelvingState::Unshelved);
        assert!(timers.armed().is_empty());
        assert!(alarm.take_events().is_empty());
    }

    #[test]
    fn test_one_shot_shelve_ends_on_return_to_normal() {
        let f = fixture(false);
        let mut alarm = off_normal(&f);
        let mut timers = ManualTimers::new();
        feed(&mut alarm, true);
        alarm.shelve(ShelveRequest::OneShot, &mut timers).unwrap();
        feed(&mut alarm, false);
        assert_eq!(alarm.shelving_state(), ShelvingState::Unshelved);
    }

    #[test]
    fn test_out_of_service_drops_retain_but_not_active() {
        let f = fixture(false);
        let mut alarm = off_normal(&f);
        feed(&mut alarm, true);
        assert!(alarm.retain());

        assert!(alarm.set_out_of_service(true).unwrap());
        assert!(alarm.main().is_active());
        assert!(!alarm.retain());

        assert!(alarm.set_suppressed(true).unwrap());
        assert!(!alarm.set_suppressed(true).unwrap());
        alarm.set_out_of_service(false).unwrap();
        assert!(alarm.retain(), "suppressed alarms stay retained by default");
    }

    #[test]
    fn test_deviation_with_bad_setpoint() {
        let f = fixture(50.0);
        let setpoint = f.sources.add_variable(NodeId::string(1, "Setpoint"), DataValue::new(40.0));
        let mut alarm = ConditionBuilder::new(NodeId::string(1, "Dev"), "Dev", ids::EXCLUSIVE_DEVIATION_ALARM_TYPE)
            .alarm(AlarmConfig::Deviation {
                input: NodeId::string(1, "Input"),
                setpoint: NodeId::string(1, "Setpoint"),
                limits: LimitSet {
                    high: Some(5.0),
                    low: Some(-5.0),
                    ..Default::default()
                },
            })
            .build(&f.graph, &f.sources)
            .unwrap();

        alarm.reevaluate();
        assert!(alarm.main().is_active());

        setpoint.set_value(48.0);
        alarm.reevaluate();
        assert!(!alarm.main().is_active());

        setpoint.set_status(StatusCode::BAD_NO_COMMUNICATION);
        feed(&mut alarm, 80.0);
        assert!(!alarm.main().is_active());
        assert_eq!(alarm.main().quality, StatusCode::BAD_NO_COMMUNICATION);
        assert_eq!(f.input.read_value().value, Value::Float(50.0));
    }

    #[test]
    fn test_rate_of_change_needs_two_samples() {
        let f = fixture(0.0);
        let mut alarm = ConditionBuilder::new(NodeId::string(1, "Roc"), "Roc", ids::EXCLUSIVE_RATE_OF_CHANGE_ALARM_TYPE)
            .alarm(AlarmConfig::RateOfChange {
                input: NodeId::string(1, "Input"),
                limits: LimitSet {
                    high: Some(4.0),
                    ..Default::default()
                },
                window: None,
            })
            .build(&f.graph, &f.sources)
            .unwrap();

        let t0 = Utc::now();
        alarm.on_input_value_changed(&DataValue::new(10.0).at(t0));
        assert!(!alarm.main().is_active());
        assert!(alarm.take_events().is_empty());

        alarm.on_input_value_changed(&DataValue::new(20.0).at(t0 + chrono::Duration::seconds(2)));
        assert!(alarm.main().is_active());
    }

    #[test]
    fn test_certificate_expiration_clears_silently() {
        let f = fixture(0.0);
        let now = Utc::now();
        let mut alarm = ConditionBuilder::new(NodeId::string(1, "Cert"), "Cert", ids::CERTIFICATE_EXPIRATION_ALARM_TYPE)
            .alarm(AlarmConfig::CertificateExpiration {
                expiration_date: now + chrono::Duration::days(10),
                expiration_limit: None,
            })
            .build(&f.graph, &f.sources)
            .unwrap();

        alarm.evaluate_expiration(now);
        assert!(alarm.main().is_active());
        assert!(alarm.retain());

        alarm.set_expiration_date(now + chrono::Duration::days(365)).unwrap();
        assert!(!alarm.main().is_active());
        assert!(!alarm.retain());
    }

    #[test]
    fn test_certificate_limit_before_clock_range_rejected() {
        let f = fixture(0.0);
        let result = ConditionBuilder::new(NodeId::string(1, "Cert"), "Cert", ids::CERTIFICATE_EXPIRATION_ALARM_TYPE)
            .alarm(AlarmConfig::CertificateExpiration {
                expiration_date: Utc::now() + chrono::Duration::days(10),
                expiration_limit: Some(Duration::from_secs(100_000_000 * 86_400)),
            })
            .build(&f.graph, &f.sources);
        assert!(matches!(result, Err(AcError::Config(_))));
    }

    #[test]
    fn test_non_exclusive_deviation_levels() {
        let f = fixture(50.0);
        f.sources.add_variable(NodeId::string(1, "Setpoint"), DataValue::new(40.0));
        let mut alarm =
            ConditionBuilder::new(NodeId::string(1, "Dev"), "Dev", ids::NON_EXCLUSIVE_DEVIATION_ALARM_TYPE)
                .alarm(AlarmConfig::Deviation {
                    input: NodeId::string(1, "Input"),
                    setpoint: NodeId::string(1, "Setpoint"),
                    limits: LimitSet {
                        high_high: Some(20.0),
                        high: Some(5.0),
                        low: Some(-5.0),
                        low_low: Some(-20.0),
                        deadband: 0.0,
                    },
                })
                .build(&f.graph, &f.sources)
                .unwrap();
        assert_eq!(alarm.kind(), ConditionKind::Alarm(AlarmKind::NonExclusiveDeviation));

        alarm.reevaluate();
        assert!(alarm.main().is_active());
        assert_eq!(alarm.main().field("HighState/Id"), Some(Value::Bool(true)));
        assert_eq!(alarm.main().field("HighHighState/Id"), Some(Value::Bool(false)));

        feed(&mut alarm, 65.0);
        assert_eq!(alarm.main().field("HighState/Id"), Some(Value::Bool(true)));
        assert_eq!(alarm.main().field("HighHighState/Id"), Some(Value::Bool(true)));
        assert_eq!(alarm.main().field("LowState/Id"), Some(Value::Bool(false)));

        feed(&mut alarm, 15.0);
        assert_eq!(alarm.main().field("HighState/Id"), Some(Value::Bool(false)));
        assert_eq!(alarm.main().field("LowState/Id"), Some(Value::Bool(true)));
        assert_eq!(alarm.main().field("LowLowState/Id"), Some(Value::Bool(true)));

        feed(&mut alarm, 40.0);
        assert!(!alarm.main().is_active());
    }

    #[test]
    fn test_disabled_alarm_ignores_input() {
        let f = fixture(false);
        let mut alarm = off_normal(&f);
        alarm.disable().unwrap();
        alarm.take_events();
        feed(&mut alarm, true);
        assert!(!alarm.main().is_active());
        assert!(alarm.take_events().is_empty());

        f.input.set_value(true);
        alarm.enable().unwrap();
        alarm.reevaluate();
        assert!(alarm.main().is_active());
    }
}
