// src/event.rs - Condition event notifications
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::node::NodeId;
use crate::snapshot::{BranchId, ConditionSnapshot, EventId};
use crate::value::Value;

/// Notification raised by a condition, carrying the full branch snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionEvent {
    pub event_id: EventId,
    pub event_type: NodeId,
    pub condition_id: NodeId,
    pub condition_name: String,
    pub branch_id: BranchId,
    pub source_node: NodeId,
    pub source_name: String,
    pub receive_time: DateTime<Utc>,
    pub snapshot: ConditionSnapshot,
}

impl ConditionEvent {
    /// Event field by browse path key. The empty key designates the
    /// condition itself (its NodeId).
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "" | "ConditionId" => Some(Value::NodeId(self.condition_id.clone())),
            "EventType" => Some(Value::NodeId(self.event_type.clone())),
            "SourceNode" => Some(Value::NodeId(self.source_node.clone())),
            "SourceName" => Some(Value::String(self.source_name.clone())),
            "ConditionName" => Some(Value::String(self.condition_name.clone())),
            "ConditionClassId" => Some(Value::NodeId(self.event_type.clone())),
            "ReceiveTime" => Some(Value::DateTime(self.receive_time)),
            key => self.snapshot.field(key),
        }
    }

    pub fn retain(&self) -> bool {
        self.snapshot.retain
    }

    pub fn severity(&self) -> u16 {
        self.snapshot.severity
    }
}

/// Field values selected for one subscriber, in select-clause order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFieldList {
    pub condition_id: NodeId,
    pub branch_id: BranchId,
    pub fields: Vec<Value>,
}
