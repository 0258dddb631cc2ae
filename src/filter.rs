// src/filter.rs - Event filter evaluation
//
// Where-clauses are flat element lists; element 0 is the root and element
// operands only point forward. Operand resolution never fails the whole
// filter: a failure is carried as a status code and compares as false.
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use tracing::trace;

use crate::error::{AcError, Result};
use crate::event::{ConditionEvent, EventFieldList};
use crate::graph::{AttributeId, NodeClass, NodeGraph};
use crate::node::{browse_path, path_key, NodeId, QualifiedName};
use crate::value::{StatusCode, Value};

/// Result of resolving one operand
pub type Resolved = std::result::Result<Value, StatusCode>;

// ==========================================
// SECTION 1: FILTER MODEL
// ==========================================

/// Operators supported in where-clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    Equals,
    IsNull,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    /// `operand[0]` within `[operand[1], operand[2]]`
    Between,
    /// `operand[0]` equal to any of the remaining operands
    InList,
    And,
    Or,
    Not,
    /// Event type is the literal type or one of its subtypes
    OfType,
}

impl FilterOperator {
    /// Allowed operand count as (min, max)
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            FilterOperator::IsNull | FilterOperator::Not | FilterOperator::OfType => (1, Some(1)),
            FilterOperator::Between => (3, Some(3)),
            FilterOperator::InList => (2, None),
            _ => (2, Some(2)),
        }
    }
}

/// Attribute of a node reached by a relative path from the condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleAttributeOperand {
    /// When set, only events of this type (or a subtype) resolve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_definition_id: Option<NodeId>,
    #[serde(
        rename = "path",
        default,
        serialize_with = "serialize_path",
        deserialize_with = "deserialize_path"
    )]
    pub browse_path: Vec<QualifiedName>,
    #[serde(default = "default_attribute")]
    pub attribute_id: AttributeId,
}

fn default_attribute() -> AttributeId {
    AttributeId::Value
}

fn serialize_path<S: Serializer>(path: &[QualifiedName], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let rendered = path.iter().map(|q| q.to_string()).collect::<Vec<_>>().join("/");
    serializer.serialize_str(&rendered)
}

fn deserialize_path<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<QualifiedName>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(browse_path(&raw))
}

impl SimpleAttributeOperand {
    /// Value attribute of the field at `path`, e.g. `"AckedState/Id"`
    pub fn field(path: &str) -> Self {
        Self {
            type_definition_id: None,
            browse_path: browse_path(path),
            attribute_id: AttributeId::Value,
        }
    }

    /// NodeId of the condition itself
    pub fn condition_id() -> Self {
        Self {
            type_definition_id: None,
            browse_path: Vec::new(),
            attribute_id: AttributeId::NodeId,
        }
    }

    pub fn of_type(mut self, type_definition_id: NodeId) -> Self {
        self.type_definition_id = Some(type_definition_id);
        self
    }

    pub fn attribute(mut self, attribute_id: AttributeId) -> Self {
        self.attribute_id = attribute_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperand {
    /// Result of another element of the same filter
    Element(u32),
    Literal(Value),
    Attribute(SimpleAttributeOperand),
}

impl FilterOperand {
    pub fn literal(value: impl Into<Value>) -> Self {
        FilterOperand::Literal(value.into())
    }

    pub fn field(path: &str) -> Self {
        FilterOperand::Attribute(SimpleAttributeOperand::field(path))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFilterElement {
    pub operator: FilterOperator,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub operands: Vec<FilterOperand>,
}

/// Where-clause; an empty filter matches every event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFilter {
    pub elements: Vec<ContentFilterElement>,
}

impl ContentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element; returns its index for use in element operands
    pub fn push(&mut self, operator: FilterOperator, operands: Vec<FilterOperand>) -> u32 {
        self.elements.push(ContentFilterElement { operator, operands });
        (self.elements.len() - 1) as u32
    }

    pub fn with(mut self, operator: FilterOperator, operands: Vec<FilterOperand>) -> Self {
        self.push(operator, operands);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Check operand counts, element references and `OfType` literals
    pub fn validate(&self) -> Result<()> {
        for (index, element) in self.elements.iter().enumerate() {
            let invalid = |reason: String| AcError::InvalidFilter { element: index, reason };

            let (min, max) = element.operator.arity();
            let count = element.operands.len();
            if count < min || max.map(|max| count > max).unwrap_or(false) {
                return Err(invalid(format!(
                    "{:?} takes {} operand(s), got {}",
                    element.operator,
                    match max {
                        Some(max) if max == min => min.to_string(),
                        Some(max) => format!("{}..{}", min, max),
                        None => format!("at least {}", min),
                    },
                    count
                )));
            }

            for operand in &element.operands {
                if let FilterOperand::Element(target) = operand {
                    let target = *target as usize;
                    if target <= index || target >= self.elements.len() {
                        return Err(invalid(format!("element operand {} must point forward", target)));
                    }
                }
            }

            if element.operator == FilterOperator::OfType {
                let literal_type = match &element.operands[0] {
                    FilterOperand::Literal(value) => literal_node_id(value).is_some(),
                    _ => false,
                };
                if !literal_type {
                    return Err(invalid("OfType needs a NodeId literal".to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Select and where clauses of one subscriber
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub select_clauses: Vec<SimpleAttributeOperand>,
    pub where_clause: ContentFilter,
}

impl EventFilter {
    pub fn validate(&self) -> Result<()> {
        self.where_clause.validate()
    }
}

fn literal_node_id(value: &Value) -> Option<NodeId> {
    match value {
        Value::NodeId(id) => Some(id.clone()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ==========================================
// SECTION 2: EVALUATION
// ==========================================

/// Evaluates filters against condition events using the information graph
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use petra_ac::filter::{ContentFilter, EventFilterEngine, FilterOperand, FilterOperator};
/// use petra_ac::MemoryGraph;
///
/// let engine = EventFilterEngine::new(Arc::new(MemoryGraph::with_standard_types()));
/// let filter = ContentFilter::new().with(
///     FilterOperator::GreaterThan,
///     vec![FilterOperand::literal(700i64), FilterOperand::literal(500i64)],
/// );
/// assert!(filter.validate().is_ok());
/// # let _ = engine;
/// ```
#[derive(Clone)]
pub struct EventFilterEngine {
    graph: Arc<dyn NodeGraph>,
}

impl EventFilterEngine {
    pub fn new(graph: Arc<dyn NodeGraph>) -> Self {
        Self { graph }
    }

    /// Resolve an attribute operand relative to the event's condition
    pub fn resolve_operand(&self, event: &ConditionEvent, operand: &SimpleAttributeOperand) -> Resolved {
        if let Some(type_id) = &operand.type_definition_id {
            if !self.graph.is_subtype_of(&event.event_type, type_id) {
                return Err(StatusCode::BAD_NO_MATCH);
            }
        }

        let targets = self.graph.resolve_path(&event.condition_id, &operand.browse_path);
        let target = match targets.as_slice() {
            [single] => single,
            [] => return Err(StatusCode::BAD_NO_MATCH),
            _ => return Err(StatusCode::BAD_TOO_MANY_MATCHES),
        };
        let node = self.graph.find_node(target).ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;

        match operand.attribute_id {
            AttributeId::NodeId => Ok(Value::NodeId(node.node_id)),
            AttributeId::NodeClass => Ok(Value::Int(node_class_mask(node.node_class))),
            AttributeId::BrowseName => Ok(Value::String(node.browse_name.to_string())),
            AttributeId::DisplayName => Ok(Value::String(node.display_name)),
            AttributeId::Value => {
                if node.node_class != NodeClass::Variable {
                    return Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
                }
                // Event fields carry the values as of the notification
                if let Some(value) = event.field(&path_key(&operand.browse_path)) {
                    return Ok(value);
                }
                match node.value {
                    Some(sample) if sample.status.is_bad() => Err(sample.status),
                    Some(sample) => Ok(sample.value),
                    None => Err(StatusCode::BAD_NOT_READABLE),
                }
            }
        }
    }

    /// True when the where-clause matches the event
    pub fn evaluate(&self, filter: &ContentFilter, event: &ConditionEvent) -> bool {
        if filter.is_empty() {
            return true;
        }
        let mut cache: Vec<Option<Resolved>> = vec![None; filter.elements.len()];
        let result = self.evaluate_element(filter, 0, event, &mut cache);
        trace!("Filter on {} evaluated to {:?}", event.condition_id, result);
        truth(&result) == Some(true)
    }

    /// Select clause values in order; unresolvable fields become null
    pub fn select_fields(&self, select_clauses: &[SimpleAttributeOperand], event: &ConditionEvent) -> Vec<Value> {
        select_clauses
            .iter()
            .map(|operand| self.resolve_operand(event, operand).unwrap_or(Value::Null))
            .collect()
    }

    /// Field list for a subscriber, or `None` when the event is filtered out
    pub fn apply(&self, filter: &EventFilter, event: &ConditionEvent) -> Option<EventFieldList> {
        if !self.evaluate(&filter.where_clause, event) {
            return None;
        }
        Some(EventFieldList {
            condition_id: event.condition_id.clone(),
            branch_id: event.branch_id,
            fields: self.select_fields(&filter.select_clauses, event),
        })
    }

    fn evaluate_element(
        &self,
        filter: &ContentFilter,
        index: usize,
        event: &ConditionEvent,
        cache: &mut Vec<Option<Resolved>>,
    ) -> Resolved {
        if let Some(Some(done)) = cache.get(index) {
            return done.clone();
        }
        let Some(element) = filter.elements.get(index) else {
            return Err(StatusCode::BAD_FILTER_OPERAND_INVALID);
        };
        let operands = &element.operands;
        let operand = |i: usize, cache: &mut Vec<Option<Resolved>>| match operands.get(i) {
            Some(op) => self.operand_value(filter, index, op, event, cache),
            None => Err(StatusCode::BAD_FILTER_OPERAND_INVALID),
        };

        let result = match element.operator {
            FilterOperator::And => {
                let left = truth(&operand(0, cache));
                if left != Some(true) {
                    Ok(Value::Bool(false))
                } else {
                    Ok(Value::Bool(truth(&operand(1, cache)) == Some(true)))
                }
            }
            FilterOperator::Or => {
                let left = truth(&operand(0, cache));
                if left == Some(true) {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(truth(&operand(1, cache)) == Some(true)))
                }
            }
            FilterOperator::Not => match truth(&operand(0, cache)) {
                Some(b) => Ok(Value::Bool(!b)),
                None => Err(StatusCode::BAD_NO_MATCH),
            },
            FilterOperator::IsNull => Ok(Value::Bool(match operand(0, cache) {
                Ok(value) => value.is_null(),
                Err(_) => true,
            })),
            FilterOperator::Equals => {
                let (a, b) = (operand(0, cache), operand(1, cache));
                Ok(Value::Bool(matches!((&a, &b), (Ok(a), Ok(b)) if a.loosely_equals(b))))
            }
            FilterOperator::GreaterThan
            | FilterOperator::LessThan
            | FilterOperator::GreaterThanOrEqual
            | FilterOperator::LessThanOrEqual => {
                let (a, b) = (operand(0, cache), operand(1, cache));
                let ordering = match (&a, &b) {
                    (Ok(a), Ok(b)) => a.partial_cmp(b),
                    _ => None,
                };
                Ok(Value::Bool(ordering.map(|o| compare(element.operator, o)).unwrap_or(false)))
            }
            FilterOperator::Between => {
                let value = operand(0, cache);
                let low = operand(1, cache);
                let high = operand(2, cache);
                let inside = match (&value, &low, &high) {
                    (Ok(v), Ok(lo), Ok(hi)) => v >= lo && v <= hi,
                    _ => false,
                };
                Ok(Value::Bool(inside))
            }
            FilterOperator::InList => match operand(0, cache) {
                Ok(value) => {
                    let mut found = false;
                    for i in 1..operands.len() {
                        if let Ok(candidate) = operand(i, cache) {
                            if value.loosely_equals(&candidate) {
                                found = true;
                                break;
                            }
                        }
                    }
                    Ok(Value::Bool(found))
                }
                Err(_) => Ok(Value::Bool(false)),
            },
            FilterOperator::OfType => match operands.first() {
                Some(FilterOperand::Literal(value)) => match literal_node_id(value) {
                    Some(type_id) => Ok(Value::Bool(self.graph.is_subtype_of(&event.event_type, &type_id))),
                    None => Err(StatusCode::BAD_FILTER_OPERAND_INVALID),
                },
                _ => Err(StatusCode::BAD_FILTER_OPERAND_INVALID),
            },
        };

        if let Some(slot) = cache.get_mut(index) {
            *slot = Some(result.clone());
        }
        result
    }

    fn operand_value(
        &self,
        filter: &ContentFilter,
        current: usize,
        operand: &FilterOperand,
        event: &ConditionEvent,
        cache: &mut Vec<Option<Resolved>>,
    ) -> Resolved {
        match operand {
            FilterOperand::Literal(value) => Ok(value.clone()),
            FilterOperand::Attribute(attribute) => self.resolve_operand(event, attribute),
            FilterOperand::Element(target) => {
                let target = *target as usize;
                // Backward references could recurse forever
                if target <= current {
                    return Err(StatusCode::BAD_FILTER_OPERAND_INVALID);
                }
                self.evaluate_element(filter, target, event, cache)
            }
        }
    }
}

impl std::fmt::Debug for EventFilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilterEngine").finish_non_exhaustive()
    }
}

fn truth(result: &Resolved) -> Option<bool> {
    result.as_ref().ok().and_then(|value| value.as_bool())
}

fn compare(operator: FilterOperator, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match operator {
        FilterOperator::GreaterThan => ordering == Greater,
        FilterOperator::LessThan => ordering == Less,
        FilterOperator::GreaterThanOrEqual => ordering != Less,
        FilterOperator::LessThanOrEqual => ordering != Greater,
        _ => false,
    }
}

fn node_class_mask(class: NodeClass) -> i64 {
    match class {
        NodeClass::Object => 1,
        NodeClass::Variable => 2,
        NodeClass::Method => 4,
        NodeClass::ObjectType => 8,
        NodeClass::VariableType => 16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraph, MockNodeGraph, NodeInfo, CONDITION_FIELDS};
    use crate::node::ids;
    use crate::snapshot::{AlarmFields, BranchId, ConditionSnapshot, StateLabels};
    use chrono::Utc;

    fn cond_id() -> NodeId {
        NodeId::string(1, "Pump1.Overload")
    }

    fn event(severity: u16, active: bool) -> ConditionEvent {
        let now = Utc::now();
        let mut alarm = AlarmFields::new(now, None);
        alarm.active_state.set(active, StateLabels::ACTIVE, now);
        let mut snapshot = ConditionSnapshot::new(true, true, Some(alarm), now);
        snapshot.severity = severity;
        if let Some(acked) = snapshot.acked_state.as_mut() {
            acked.set(!active, StateLabels::ACKED, now);
        }
        ConditionEvent {
            event_id: snapshot.event_id,
            event_type: ids::OFF_NORMAL_ALARM_TYPE,
            condition_id: cond_id(),
            condition_name: "Overload".into(),
            branch_id: BranchId::MAIN,
            source_node: NodeId::string(1, "Pump1"),
            source_name: "Pump1".into(),
            receive_time: now,
            snapshot,
        }
    }

    fn engine() -> EventFilterEngine {
        let graph = MemoryGraph::with_standard_types();
        graph.add_condition_instance(cond_id(), "Overload", ids::OFF_NORMAL_ALARM_TYPE, CONDITION_FIELDS);
        EventFilterEngine::new(Arc::new(graph))
    }

    #[test]
    fn test_resolve_field_from_event() {
        let engine = engine();
        let ev = event(700, true);
        assert_eq!(
            engine.resolve_operand(&ev, &SimpleAttributeOperand::field("ActiveState/Id")),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            engine.resolve_operand(&ev, &SimpleAttributeOperand::condition_id()),
            Ok(Value::NodeId(cond_id()))
        );
        assert_eq!(
            engine.resolve_operand(&ev, &SimpleAttributeOperand::field("NoSuchField")),
            Err(StatusCode::BAD_NO_MATCH)
        );
        assert_eq!(
            engine.resolve_operand(&ev, &SimpleAttributeOperand::condition_id().attribute(AttributeId::Value)),
            Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID)
        );
    }

    #[test]
    fn test_type_scoped_operand() {
        let engine = engine();
        let ev = event(700, true);
        let scoped = SimpleAttributeOperand::field("Severity").of_type(ids::DISCRETE_ALARM_TYPE);
        assert_eq!(engine.resolve_operand(&ev, &scoped), Ok(Value::Int(700)));
        let other = SimpleAttributeOperand::field("Severity").of_type(ids::EXCLUSIVE_LIMIT_ALARM_TYPE);
        assert_eq!(engine.resolve_operand(&ev, &other), Err(StatusCode::BAD_NO_MATCH));
    }

    #[test]
    fn test_ambiguous_path_fails_softly() {
        let mut graph = MockNodeGraph::new();
        graph
            .expect_resolve_path()
            .returning(|_, _| vec![NodeId::string(1, "a"), NodeId::string(1, "b")]);
        graph.expect_is_subtype_of().returning(|_, _| true);
        let engine = EventFilterEngine::new(Arc::new(graph));
        let ev = event(500, true);

        let operand = SimpleAttributeOperand::field("Severity");
        assert_eq!(engine.resolve_operand(&ev, &operand), Err(StatusCode::BAD_TOO_MANY_MATCHES));

        let filter = ContentFilter::new().with(
            FilterOperator::Equals,
            vec![FilterOperand::Attribute(operand), FilterOperand::literal(500i64)],
        );
        assert!(!engine.evaluate(&filter, &ev));
    }

    #[test]
    fn test_bad_node_value_is_failure() {
        let mut graph = MockNodeGraph::new();
        graph
            .expect_resolve_path()
            .returning(|_, _| vec![NodeId::string(1, "Vendor.Extra")]);
        graph.expect_find_node().returning(|id| {
            Some(NodeInfo {
                node_id: id.clone(),
                node_class: NodeClass::Variable,
                browse_name: QualifiedName::new(2, "Extra"),
                display_name: "Extra".into(),
                type_definition: None,
                value: Some(crate::value::DataValue::new(1.0).with_status(StatusCode::BAD_SENSOR_FAILURE)),
            })
        });
        let engine = EventFilterEngine::new(Arc::new(graph));
        let ev = event(500, true);
        let operand = SimpleAttributeOperand::field("2:Extra");
        assert_eq!(engine.resolve_operand(&ev, &operand), Err(StatusCode::BAD_SENSOR_FAILURE));

        let filter = ContentFilter::new().with(FilterOperator::IsNull, vec![FilterOperand::Attribute(operand)]);
        assert!(engine.evaluate(&filter, &ev));
    }

    #[test]
    fn test_and_with_failing_operand_is_false() {
        let engine = engine();
        let ev = event(700, true);
        let mut filter = ContentFilter::new();
        filter.push(FilterOperator::And, vec![FilterOperand::Element(1), FilterOperand::Element(2)]);
        filter.push(
            FilterOperator::Equals,
            vec![FilterOperand::field("NoSuchField"), FilterOperand::literal(1i64)],
        );
        filter.push(
            FilterOperator::Equals,
            vec![FilterOperand::field("ActiveState/Id"), FilterOperand::literal(true)],
        );
        filter.validate().unwrap();
        assert!(!engine.evaluate(&filter, &ev));

        filter.elements[0].operator = FilterOperator::Or;
        assert!(engine.evaluate(&filter, &ev));
    }

    #[test]
    fn test_comparisons_and_lists() {
        let engine = engine();
        let ev = event(700, false);

        let severe = ContentFilter::new().with(
            FilterOperator::GreaterThanOrEqual,
            vec![FilterOperand::field("Severity"), FilterOperand::literal(700i64)],
        );
        assert!(engine.evaluate(&severe, &ev));

        let between = ContentFilter::new().with(
            FilterOperator::Between,
            vec![
                FilterOperand::field("Severity"),
                FilterOperand::literal(100i64),
                FilterOperand::literal(500.0),
            ],
        );
        assert!(!engine.evaluate(&between, &ev));

        let listed = ContentFilter::new().with(
            FilterOperator::InList,
            vec![
                FilterOperand::field("SourceName"),
                FilterOperand::literal("Pump2"),
                FilterOperand::literal("Pump1"),
            ],
        );
        assert!(engine.evaluate(&listed, &ev));

        let inactive = ContentFilter::new()
            .with(FilterOperator::Not, vec![FilterOperand::Element(1)])
            .with(FilterOperator::Equals, vec![FilterOperand::field("ActiveState/Id"), FilterOperand::literal(true)]);
        assert!(engine.evaluate(&inactive, &ev));
    }

    #[test]
    fn test_of_type_uses_subtypes() {
        let engine = engine();
        let ev = event(100, true);
        let discrete = ContentFilter::new().with(
            FilterOperator::OfType,
            vec![FilterOperand::Literal(Value::NodeId(ids::DISCRETE_ALARM_TYPE))],
        );
        assert!(engine.evaluate(&discrete, &ev));

        let limit = ContentFilter::new().with(FilterOperator::OfType, vec![FilterOperand::literal("i=2955")]);
        assert!(!engine.evaluate(&limit, &ev));
    }

    #[test]
    fn test_validate_rejects_malformed_filters() {
        let backward = ContentFilter::new()
            .with(FilterOperator::Not, vec![FilterOperand::Element(1)])
            .with(FilterOperator::Not, vec![FilterOperand::Element(0)]);
        assert!(matches!(backward.validate(), Err(AcError::InvalidFilter { element: 1, .. })));

        let arity = ContentFilter::new().with(FilterOperator::Equals, vec![FilterOperand::literal(1i64)]);
        assert!(matches!(arity.validate(), Err(AcError::InvalidFilter { element: 0, .. })));

        let of_type = ContentFilter::new().with(FilterOperator::OfType, vec![FilterOperand::literal(3i64)]);
        assert!(of_type.validate().is_err());
    }

    #[test]
    fn test_select_fields_null_on_failure() {
        let engine = engine();
        let ev = event(300, true);
        let filter = EventFilter {
            select_clauses: vec![
                SimpleAttributeOperand::field("Severity"),
                SimpleAttributeOperand::field("Bogus"),
                SimpleAttributeOperand::field("Message"),
            ],
            where_clause: ContentFilter::new(),
        };
        let fields = engine.apply(&filter, &ev).unwrap();
        assert_eq!(fields.fields[0], Value::Int(300));
        assert_eq!(fields.fields[1], Value::Null);
        assert_eq!(fields.fields[2], Value::String(String::new()));
        assert_eq!(fields.branch_id, BranchId::MAIN);
    }

    #[test]
    fn test_filter_from_yaml() {
        let yaml = r#"
select_clauses:
  - path: Severity
  - path: ActiveState/Id
where_clause:
  - operator: GreaterThan
    operands:
      - attribute: { path: Severity }
      - literal: 500
"#;
        let filter: EventFilter = serde_yaml::from_str(yaml).unwrap();
        filter.validate().unwrap();
        assert_eq!(filter.select_clauses[1].browse_path.len(), 2);
        assert!(engine().evaluate(&filter.where_clause, &event(600, true)));
    }
}
