// src/graph.rs - Information graph interface and in-memory implementation
//
// The A&C core only reads the graph: node lookup, event type lookup, the
// subtype relation and relative path resolution. `MemoryGraph` is a small
// concurrent implementation for hosts without their own address space and
// for tests.
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

use crate::node::{ids, NodeId, QualifiedName};
use crate::value::DataValue;

/// Node classes relevant to condition fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeClass {
    Object,
    Variable,
    ObjectType,
    VariableType,
    Method,
}

/// Attribute selected by a filter operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeId {
    NodeId,
    NodeClass,
    BrowseName,
    DisplayName,
    Value,
}

/// Read-only view of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub node_class: NodeClass,
    pub browse_name: QualifiedName,
    pub display_name: String,
    pub type_definition: Option<NodeId>,
    /// Current value, `None` for nodes that carry no value attribute
    pub value: Option<DataValue>,
}

/// Graph services consumed by the A&C core
#[cfg_attr(test, mockall::automock)]
pub trait NodeGraph: Send + Sync {
    /// Lookup a node by identifier
    fn find_node(&self, id: &NodeId) -> Option<NodeInfo>;

    /// Lookup an event type by NodeId text or browse name
    fn find_event_type(&self, id_or_name: &str) -> Option<NodeId>;

    /// True when `type_id` equals `base` or derives from it
    fn is_subtype_of(&self, type_id: &NodeId, base: &NodeId) -> bool;

    /// All nodes reached from `root` by following hierarchical references
    /// whose browse names match `path` element by element. An empty path
    /// resolves to the root itself.
    fn resolve_path(&self, root: &NodeId, path: &[QualifiedName]) -> Vec<NodeId>;
}

#[derive(Debug, Clone)]
struct NodeRecord {
    info: NodeInfo,
    children: Vec<NodeId>,
}

/// Concurrent in-memory graph
///
/// # Examples
///
/// ```rust
/// use petra_ac::{MemoryGraph, NodeGraph, NodeId, node::ids};
///
/// let graph = MemoryGraph::with_standard_types();
/// assert!(graph.is_subtype_of(&ids::TRIP_ALARM_TYPE, &ids::DISCRETE_ALARM_TYPE));
/// assert_eq!(graph.find_event_type("OffNormalAlarmType"), Some(ids::OFF_NORMAL_ALARM_TYPE));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: Arc<DashMap<NodeId, NodeRecord>>,
    supertypes: Arc<DashMap<NodeId, NodeId>>,
    type_names: Arc<DashMap<String, NodeId>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph preloaded with the standard condition and alarm type hierarchy
    pub fn with_standard_types() -> Self {
        let graph = Self::new();
        for (name, id, supertype) in ids::STANDARD_EVENT_TYPES {
            graph.add_event_type(id.clone(), name, supertype.clone());
        }
        graph
    }

    /// Register an event type below `supertype`
    pub fn add_event_type(&self, id: NodeId, name: &str, supertype: Option<NodeId>) {
        self.type_names.insert(name.to_string(), id.clone());
        if let Some(parent) = supertype {
            self.supertypes.insert(id.clone(), parent);
        }
        self.insert(NodeInfo {
            node_id: id,
            node_class: NodeClass::ObjectType,
            browse_name: QualifiedName::new(0, name),
            display_name: name.to_string(),
            type_definition: None,
            value: None,
        });
    }

    /// Add an object node, optionally below `parent`
    pub fn add_object(&self, id: NodeId, name: &str, parent: Option<&NodeId>) {
        self.insert(NodeInfo {
            node_id: id.clone(),
            node_class: NodeClass::Object,
            browse_name: QualifiedName::from(name),
            display_name: name.to_string(),
            type_definition: Some(ids::BASE_OBJECT_TYPE),
            value: None,
        });
        if let Some(parent) = parent {
            self.add_child(parent, id);
        }
    }

    /// Add a variable node carrying `value`, optionally below `parent`
    pub fn add_variable(&self, id: NodeId, name: &str, parent: Option<&NodeId>, value: DataValue) {
        self.insert(NodeInfo {
            node_id: id.clone(),
            node_class: NodeClass::Variable,
            browse_name: QualifiedName::from(name),
            display_name: name.to_string(),
            type_definition: Some(ids::BASE_DATA_VARIABLE_TYPE),
            value: Some(value),
        });
        if let Some(parent) = parent {
            self.add_child(parent, id);
        }
    }

    /// Add a condition instance with the standard field variables as
    /// children, so that where-clause paths such as `AckedState/Id` resolve.
    pub fn add_condition_instance(
        &self,
        id: NodeId,
        name: &str,
        type_definition: NodeId,
        fields: &[&str],
    ) {
        self.insert(NodeInfo {
            node_id: id.clone(),
            node_class: NodeClass::Object,
            browse_name: QualifiedName::from(name),
            display_name: name.to_string(),
            type_definition: Some(type_definition),
            value: None,
        });

        for field in fields {
            let mut parent = id.clone();
            let mut path = String::new();
            for segment in field.split('/') {
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(segment);
                let child_id = child_node_id(&id, &path);
                if !self.nodes.contains_key(&child_id) {
                    self.add_variable(child_id.clone(), segment, Some(&parent), DataValue::waiting());
                }
                parent = child_id;
            }
        }
        trace!("Added condition instance {} with {} fields", id, fields.len());
    }

    /// Replace the value of a variable node
    pub fn set_value(&self, id: &NodeId, value: DataValue) -> bool {
        match self.nodes.get_mut(id) {
            Some(mut record) if record.info.node_class == NodeClass::Variable => {
                record.info.value = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Hierarchical reference from `parent` to `child`
    pub fn add_child(&self, parent: &NodeId, child: NodeId) {
        if let Some(mut record) = self.nodes.get_mut(parent) {
            if !record.children.contains(&child) {
                record.children.push(child);
            }
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&self, info: NodeInfo) {
        let children = self
            .nodes
            .get(&info.node_id)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        self.nodes.insert(info.node_id.clone(), NodeRecord { info, children });
    }
}

/// Field paths exposed by every condition instance
pub const CONDITION_FIELDS: &[&str] = &[
    "EventId",
    "EventType",
    "SourceNode",
    "SourceName",
    "Time",
    "ReceiveTime",
    "Message",
    "Severity",
    "ConditionName",
    "ConditionClassId",
    "BranchId",
    "Retain",
    "Quality",
    "LastSeverity",
    "Comment",
    "ClientUserId",
    "EnabledState",
    "EnabledState/Id",
    "EnabledState/TransitionTime",
    "AckedState",
    "AckedState/Id",
    "AckedState/TransitionTime",
    "ConfirmedState",
    "ConfirmedState/Id",
    "ConfirmedState/TransitionTime",
    "ActiveState",
    "ActiveState/Id",
    "ActiveState/TransitionTime",
    "SuppressedState",
    "SuppressedState/Id",
    "OutOfServiceState",
    "OutOfServiceState/Id",
    "SuppressedOrShelved",
    "ShelvingState",
    "ShelvingState/CurrentState",
    "ShelvingState/UnshelveTime",
    "LimitState",
    "LimitState/CurrentState",
    "HighHighState/Id",
    "HighState/Id",
    "LowState/Id",
    "LowLowState/Id",
];

/// Identifier scheme for condition field nodes created by
/// [`MemoryGraph::add_condition_instance`]
pub fn child_node_id(parent: &NodeId, path: &str) -> NodeId {
    match parent {
        NodeId::String { namespace, value } => NodeId::string(*namespace, format!("{}.{}", value, path)),
        NodeId::Numeric { namespace, value } => {
            NodeId::string(*namespace, format!("{}.{}", value, path))
        }
    }
}

impl NodeGraph for MemoryGraph {
    fn find_node(&self, id: &NodeId) -> Option<NodeInfo> {
        self.nodes.get(id).map(|record| record.info.clone())
    }

    fn find_event_type(&self, id_or_name: &str) -> Option<NodeId> {
        if let Some(id) = self.type_names.get(id_or_name) {
            return Some(id.value().clone());
        }
        let id = id_or_name.parse::<NodeId>().ok()?;
        match self.nodes.get(&id) {
            Some(record) if record.info.node_class == NodeClass::ObjectType => Some(id),
            _ => None,
        }
    }

    fn is_subtype_of(&self, type_id: &NodeId, base: &NodeId) -> bool {
        let mut current = type_id.clone();
        // Bounded walk so a malformed cycle cannot hang the caller
        for _ in 0..64 {
            if &current == base {
                return true;
            }
            match self.supertypes.get(&current) {
                Some(parent) => current = parent.value().clone(),
                None => return false,
            }
        }
        false
    }

    fn resolve_path(&self, root: &NodeId, path: &[QualifiedName]) -> Vec<NodeId> {
        if !self.nodes.contains_key(root) {
            return Vec::new();
        }
        let mut frontier = vec![root.clone()];
        for element in path {
            let mut next = Vec::new();
            for node in &frontier {
                let Some(children) = self.nodes.get(node).map(|record| record.children.clone()) else {
                    continue;
                };
                for child in &children {
                    let matches = self
                        .nodes
                        .get(child)
                        .map(|c| &c.info.browse_name == element)
                        .unwrap_or(false);
                    if matches && !next.contains(child) {
                        next.push(child.clone());
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            frontier = next;
        }
        frontier
    }
}
