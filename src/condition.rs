// src/condition.rs - Generic condition lifecycle
//
// A condition keeps its main branch plus any older occurrences that still
// need acknowledgement or confirmation. Every state change that must be
// reported ends in `emit`, which assigns a fresh EventId and queues the
// notification in the outbox drained by the engine.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, trace};

use crate::alarm::{AlarmKind, AlarmRuntime};
use crate::error::{AcError, Result, StateViolation};
use crate::event::ConditionEvent;
use crate::node::{ids, NodeId};
use crate::snapshot::{BranchId, ConditionSnapshot, EventId, StateLabels};
use crate::value::StatusCode;

// ==========================================
// SECTION 1: KINDS AND RETAIN RULES
// ==========================================

/// Fixed type tag of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionKind {
    /// Plain condition; retain is decided by the caller through `raise`
    Condition,
    Acknowledgeable,
    Alarm(AlarmKind),
}

impl ConditionKind {
    pub fn is_acknowledgeable(&self) -> bool {
        !matches!(self, ConditionKind::Condition)
    }

    pub fn alarm_kind(&self) -> Option<AlarmKind> {
        match self {
            ConditionKind::Alarm(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Standard type of this kind
    pub fn type_id(&self) -> NodeId {
        match self {
            ConditionKind::Condition => ids::CONDITION_TYPE,
            ConditionKind::Acknowledgeable => ids::ACKNOWLEDGEABLE_CONDITION_TYPE,
            ConditionKind::Alarm(kind) => kind.type_id(),
        }
    }
}

/// Per-kind rule deciding when an acknowledgeable condition is retained
///
/// Attention is required while the condition is active, unacknowledged or
/// unconfirmed. The overlay flags then decide whether a suppressed, shelved
/// or out-of-service alarm that needs attention stays retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetainRule {
    pub retain_when_suppressed: bool,
    pub retain_when_shelved: bool,
    pub retain_when_out_of_service: bool,
    /// Returning to normal also acknowledges and confirms the occurrence
    pub silent_return: bool,
}

impl Default for RetainRule {
    fn default() -> Self {
        Self {
            retain_when_suppressed: true,
            retain_when_shelved: true,
            retain_when_out_of_service: false,
            silent_return: false,
        }
    }
}

impl RetainRule {
    pub fn retain(&self, snapshot: &ConditionSnapshot) -> bool {
        if !snapshot.is_enabled() {
            return false;
        }
        let attention = snapshot.is_active() || !snapshot.is_acked() || !snapshot.is_confirmed();
        if !attention {
            return false;
        }
        if let Some(alarm) = &snapshot.alarm {
            if alarm.suppressed_state.id && !self.retain_when_suppressed {
                return false;
            }
            if alarm.shelving_state.is_shelved() && !self.retain_when_shelved {
                return false;
            }
            if alarm.out_of_service_state.id && !self.retain_when_out_of_service {
                return false;
            }
        }
        true
    }
}

/// Fields passed to [`Condition::raise`]; unset fields keep their value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionInfo {
    pub message: Option<String>,
    pub quality: Option<StatusCode>,
    pub severity: Option<u16>,
    /// Only honoured by plain conditions
    pub retain: Option<bool>,
}

impl ConditionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn quality(mut self, quality: StatusCode) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn severity(mut self, severity: u16) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = Some(retain);
        self
    }
}

// ==========================================
// SECTION 2: CONDITION
// ==========================================

/// Stateful condition with its branches
#[derive(Debug)]
pub struct Condition {
    pub(crate) node_id: NodeId,
    pub(crate) name: String,
    pub(crate) kind: ConditionKind,
    pub(crate) event_type: NodeId,
    pub(crate) source_node: NodeId,
    pub(crate) source_name: String,
    pub(crate) confirmable: bool,
    pub(crate) retain_rule: RetainRule,
    pub(crate) main: ConditionSnapshot,
    pub(crate) branches: BTreeMap<BranchId, ConditionSnapshot>,
    pub(crate) next_branch: u32,
    /// Retain requested by the caller of `raise` on plain conditions
    pub(crate) caller_retain: bool,
    pub(crate) outbox: Vec<ConditionEvent>,
    pub(crate) alarm: Option<AlarmRuntime>,
}

impl Condition {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    /// Event type reported in notifications (may be a vendor subtype)
    pub fn event_type(&self) -> &NodeId {
        &self.event_type
    }

    pub fn source_node(&self) -> &NodeId {
        &self.source_node
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn is_confirmable(&self) -> bool {
        self.confirmable
    }

    pub fn retain_rule(&self) -> &RetainRule {
        &self.retain_rule
    }

    pub fn is_enabled(&self) -> bool {
        self.main.is_enabled()
    }

    /// Retain flag of the main branch as last reported
    pub fn retain(&self) -> bool {
        self.main.retain
    }

    pub fn main(&self) -> &ConditionSnapshot {
        &self.main
    }

    pub fn snapshot(&self, branch: BranchId) -> Option<&ConditionSnapshot> {
        if branch.is_main() {
            Some(&self.main)
        } else {
            self.branches.get(&branch)
        }
    }

    /// Non-main branches still awaiting acknowledgement or confirmation
    pub fn branch_ids(&self) -> Vec<BranchId> {
        self.branches.keys().copied().collect()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub(crate) fn snapshot_mut(&mut self, branch: BranchId) -> Option<&mut ConditionSnapshot> {
        if branch.is_main() {
            Some(&mut self.main)
        } else {
            self.branches.get_mut(&branch)
        }
    }

    fn require_snapshot(&mut self, branch: BranchId) -> Result<&mut ConditionSnapshot> {
        let condition = self.node_id.clone();
        self.snapshot_mut(branch).ok_or(AcError::BranchNotFound {
            condition,
            branch: branch.0,
        })
    }

    pub(crate) fn violation(&self, violation: StateViolation) -> AcError {
        AcError::InvalidState {
            condition: self.node_id.clone(),
            violation,
        }
    }

    pub(crate) fn check_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(self.violation(StateViolation::ConditionDisabled))
        }
    }

    // ==========================================
    // SECTION 3: RAISE AND FIELD MUTATORS
    // ==========================================

    /// Apply `info` to the main branch and report it when message, quality
    /// or severity differ from what was last reported. Returns whether a
    /// notification was queued.
    pub fn raise(&mut self, info: ConditionInfo) -> bool {
        let mut next = self.main.clone();
        if let Some(message) = info.message {
            next.message = message;
        }
        if let Some(quality) = info.quality {
            next.quality = quality;
        }
        if let Some(severity) = info.severity {
            next.severity = severity;
        }

        let retain_request = match (self.kind, info.retain) {
            (ConditionKind::Condition, Some(retain)) if retain != self.caller_retain => Some(retain),
            _ => None,
        };

        if !next.differs_from(&self.main) && retain_request.is_none() {
            trace!("Raise on {} suppressed, snapshot unchanged", self.node_id);
            return false;
        }

        if next.severity != self.main.severity {
            next.last_severity = self.main.severity;
        }
        if let Some(retain) = retain_request {
            self.caller_retain = retain;
        }
        self.main = next;
        self.emit(BranchId::MAIN, Utc::now());
        true
    }

    /// Store a comment on the main branch without reporting it
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.main.comment = comment.into();
    }

    pub fn set_quality(&mut self, quality: StatusCode) -> bool {
        self.raise(ConditionInfo::new().quality(quality))
    }

    pub fn set_severity(&mut self, severity: u16) -> bool {
        self.raise(ConditionInfo::new().severity(severity))
    }

    /// AddComment: record a comment on a branch and always report it
    pub fn add_comment(&mut self, branch: BranchId, comment: &str, user: &str) -> Result<()> {
        self.check_enabled()?;
        let snapshot = self.require_snapshot(branch)?;
        snapshot.comment = comment.to_string();
        snapshot.client_user_id = user.to_string();
        debug!("Comment added to {} branch {}", self.node_id, branch);
        self.emit(branch, Utc::now());
        Ok(())
    }

    // ==========================================
    // SECTION 4: ACKNOWLEDGE AND CONFIRM
    // ==========================================

    pub fn acknowledge(&mut self, branch: BranchId, comment: &str, user: &str) -> Result<()> {
        self.check_enabled()?;
        let now = Utc::now();
        let snapshot = self.require_snapshot(branch)?;
        let outcome = match snapshot.acked_state.as_mut() {
            None => Err(StateViolation::NotAcknowledgeable),
            Some(acked) if acked.id => Err(StateViolation::BranchAlreadyAcked),
            Some(acked) => {
                acked.set(true, StateLabels::ACKED, now);
                if !comment.is_empty() {
                    snapshot.comment = comment.to_string();
                }
                snapshot.client_user_id = user.to_string();
                Ok(())
            }
        };
        outcome.map_err(|violation| self.violation(violation))?;

        info!("Condition {} branch {} acknowledged", self.node_id, branch);
        self.emit(branch, now);
        self.prune(branch);
        Ok(())
    }

    pub fn confirm(&mut self, branch: BranchId, comment: &str, user: &str) -> Result<()> {
        if !self.confirmable {
            return Err(self.violation(StateViolation::ConfirmNotSupported));
        }
        self.check_enabled()?;
        let now = Utc::now();
        let snapshot = self.require_snapshot(branch)?;
        let outcome = if !snapshot.is_acked() {
            Err(StateViolation::BranchNotAcked)
        } else {
            match snapshot.confirmed_state.as_mut() {
                None => Err(StateViolation::ConfirmNotSupported),
                Some(confirmed) if confirmed.id => Err(StateViolation::BranchAlreadyConfirmed),
                Some(confirmed) => {
                    confirmed.set(true, StateLabels::CONFIRMED, now);
                    if !comment.is_empty() {
                        snapshot.comment = comment.to_string();
                    }
                    snapshot.client_user_id = user.to_string();
                    Ok(())
                }
            }
        };
        outcome.map_err(|violation| self.violation(violation))?;

        info!("Condition {} branch {} confirmed", self.node_id, branch);
        self.emit(branch, now);
        self.prune(branch);
        Ok(())
    }

    /// Branch that carries `event_id` as its most recent EventId
    pub fn find_branch_by_event(&self, event_id: &EventId) -> Result<BranchId> {
        if self.main.event_id == *event_id {
            return Ok(BranchId::MAIN);
        }
        self.branches
            .iter()
            .find(|(_, snapshot)| snapshot.event_id == *event_id)
            .map(|(id, _)| *id)
            .ok_or_else(|| AcError::EventIdUnknown(event_id.to_string()))
    }

    /// Drop a non-main branch once nothing is outstanding on it
    fn prune(&mut self, branch: BranchId) {
        if branch.is_main() {
            return;
        }
        let done = self
            .branches
            .get(&branch)
            .map(|s| s.is_acked() && s.is_confirmed())
            .unwrap_or(false);
        if done {
            self.branches.remove(&branch);
            debug!("Branch {} of {} closed", branch, self.node_id);
        }
    }

    // ==========================================
    // SECTION 5: ENABLE AND DISABLE
    // ==========================================

    pub fn enable(&mut self) -> Result<()> {
        if self.is_enabled() {
            return Err(self.violation(StateViolation::AlreadyEnabled));
        }
        let now = Utc::now();
        self.main.enabled_state.set(true, StateLabels::ENABLED, now);
        for snapshot in self.branches.values_mut() {
            snapshot.enabled_state.set(true, StateLabels::ENABLED, now);
        }
        info!("Condition {} enabled", self.node_id);

        self.emit(BranchId::MAIN, now);
        for branch in self.branch_ids() {
            self.emit(branch, now);
        }
        Ok(())
    }

    /// Disable reporting; one final non-retained event is queued
    pub fn disable(&mut self) -> Result<()> {
        if !self.is_enabled() {
            return Err(self.violation(StateViolation::AlreadyDisabled));
        }
        let now = Utc::now();
        self.main.enabled_state.set(false, StateLabels::ENABLED, now);
        for snapshot in self.branches.values_mut() {
            snapshot.enabled_state.set(false, StateLabels::ENABLED, now);
            snapshot.retain = false;
        }
        info!("Condition {} disabled", self.node_id);
        self.emit_inner(BranchId::MAIN, now, true);
        Ok(())
    }

    // ==========================================
    // SECTION 6: NOTIFICATIONS
    // ==========================================

    /// Open a branch holding the current main-branch occurrence
    pub(crate) fn open_branch(&mut self, now: DateTime<Utc>) -> BranchId {
        loop {
            self.next_branch = self.next_branch.wrapping_add(1).max(1);
            if !self.branches.contains_key(&BranchId(self.next_branch)) {
                break;
            }
        }
        let id = BranchId(self.next_branch);
        let mut snapshot = self.main.clone();
        snapshot.branch_id = id;
        self.branches.insert(id, snapshot);
        debug!("Condition {} opened branch {}", self.node_id, id);
        self.emit(id, now);
        id
    }

    pub(crate) fn compute_retain(&self, branch: BranchId) -> bool {
        let Some(snapshot) = self.snapshot(branch) else {
            return false;
        };
        if !snapshot.is_enabled() {
            return false;
        }
        match self.kind {
            ConditionKind::Condition => self.caller_retain,
            _ if !branch.is_main() => !snapshot.is_acked() || !snapshot.is_confirmed(),
            _ => self.retain_rule.retain(snapshot),
        }
    }

    pub(crate) fn emit(&mut self, branch: BranchId, now: DateTime<Utc>) {
        self.emit_inner(branch, now, false);
    }

    fn emit_inner(&mut self, branch: BranchId, now: DateTime<Utc>, force: bool) {
        let retain = self.compute_retain(branch);
        let Some(snapshot) = self.snapshot_mut(branch) else {
            return;
        };
        snapshot.event_id = EventId::new();
        snapshot.time = now;
        snapshot.retain = retain;
        if !snapshot.is_enabled() && !force {
            return;
        }
        let snapshot = snapshot.clone();
        let event = self.event_for(snapshot, now);
        trace!("Queued event {} for {} branch {}", event.event_id, self.node_id, branch);
        self.outbox.push(event);
    }

    fn event_for(&self, snapshot: ConditionSnapshot, now: DateTime<Utc>) -> ConditionEvent {
        ConditionEvent {
            event_id: snapshot.event_id,
            event_type: self.event_type.clone(),
            condition_id: self.node_id.clone(),
            condition_name: self.name.clone(),
            branch_id: snapshot.branch_id,
            source_node: self.source_node.clone(),
            source_name: self.source_name.clone(),
            receive_time: now,
            snapshot,
        }
    }

    /// Notifications queued since the last call
    pub fn take_events(&mut self) -> Vec<ConditionEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Current events of every retained branch, for condition refresh.
    /// EventIds are not regenerated.
    pub fn retained_events(&self) -> Vec<ConditionEvent> {
        let now = Utc::now();
        std::iter::once(&self.main)
            .chain(self.branches.values())
            .filter(|snapshot| snapshot.retain && snapshot.is_enabled())
            .map(|snapshot| self.event_for(snapshot.clone(), now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::ConditionBuilder;
    use crate::graph::MemoryGraph;
    use crate::source::SourceRegistry;

    fn plain(kind_type: NodeId, confirmable: bool) -> Condition {
        let graph = MemoryGraph::with_standard_types();
        ConditionBuilder::new(NodeId::string(1, "Boiler.Cond"), "Cond", kind_type)
            .confirmable(confirmable)
            .build(&graph, &SourceRegistry::new())
            .unwrap()
    }

    #[test]
    fn test_raise_is_idempotent() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        let info = ConditionInfo::new().message("Drum level low").severity(400);
        assert!(cond.raise(info.clone()));
        assert!(!cond.raise(info));
        assert_eq!(cond.take_events().len(), 1);
    }

    #[test]
    fn test_raise_assigns_fresh_event_id() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        cond.raise(ConditionInfo::new().severity(100));
        cond.raise(ConditionInfo::new().severity(200));
        let events = cond.take_events();
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].event_id, events[1].event_id);
        assert_eq!(events[1].snapshot.last_severity, 100);
    }

    #[test]
    fn test_plain_condition_retain_from_caller() {
        let mut cond = plain(ids::CONDITION_TYPE, false);
        assert!(cond.raise(ConditionInfo::new().retain(true)));
        assert!(cond.retain());
        assert!(cond.raise(ConditionInfo::new().retain(false)));
        assert!(!cond.retain());
        assert!(matches!(
            cond.acknowledge(BranchId::MAIN, "", ""),
            Err(AcError::InvalidState {
                violation: StateViolation::NotAcknowledgeable,
                ..
            })
        ));
    }

    #[test]
    fn test_double_acknowledge_fails_without_mutation() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        let err = cond.acknowledge(BranchId::MAIN, "again", "op").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_CONDITION_BRANCH_ALREADY_ACKED);
        assert!(cond.main().is_acked());
        assert_eq!(cond.main().comment, "");
        assert!(cond.take_events().is_empty());
    }

    #[test]
    fn test_confirm_requires_ack() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        if let Some(acked) = cond.main.acked_state.as_mut() {
            acked.id = false;
        }
        if let Some(confirmed) = cond.main.confirmed_state.as_mut() {
            confirmed.id = false;
        }
        assert!(matches!(
            cond.confirm(BranchId::MAIN, "", ""),
            Err(AcError::InvalidState {
                violation: StateViolation::BranchNotAcked,
                ..
            })
        ));
        cond.acknowledge(BranchId::MAIN, "seen", "op").unwrap();
        cond.confirm(BranchId::MAIN, "fixed", "op").unwrap();
        assert!(cond.main().is_confirmed());
        assert_eq!(cond.main().comment, "fixed");
        assert!(!cond.retain());
    }

    #[test]
    fn test_confirm_not_supported() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, false);
        assert!(cond.main().confirmed_state.is_none());
        assert!(matches!(
            cond.confirm(BranchId::MAIN, "", ""),
            Err(AcError::InvalidState {
                violation: StateViolation::ConfirmNotSupported,
                ..
            })
        ));
    }

    #[test]
    fn test_disable_emits_single_final_event() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        cond.disable().unwrap();
        assert!(cond.disable().is_err());
        let events = cond.take_events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].retain());

        assert!(cond.raise(ConditionInfo::new().severity(900)));
        assert!(cond.take_events().is_empty());
        assert!(cond.add_comment(BranchId::MAIN, "x", "op").is_err());

        cond.enable().unwrap();
        assert_eq!(cond.take_events().len(), 1);
    }

    #[test]
    fn test_find_branch_by_event() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        cond.raise(ConditionInfo::new().message("m"));
        let event = cond.take_events().remove(0);
        assert_eq!(cond.find_branch_by_event(&event.event_id).unwrap(), BranchId::MAIN);
        assert!(matches!(
            cond.find_branch_by_event(&EventId::new()),
            Err(AcError::EventIdUnknown(_))
        ));
    }

    #[test]
    fn test_add_comment_always_reports() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        cond.add_comment(BranchId::MAIN, "checked", "alice").unwrap();
        cond.add_comment(BranchId::MAIN, "checked", "alice").unwrap();
        let events = cond.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].snapshot.client_user_id, "alice");
        assert!(matches!(
            cond.add_comment(BranchId(9), "x", "y"),
            Err(AcError::BranchNotFound { branch: 9, .. })
        ));
    }

    #[test]
    fn test_field_mutators_track_last_severity() {
        let mut cond = plain(ids::ACKNOWLEDGEABLE_CONDITION_TYPE, true);
        assert!(cond.set_severity(800));
        assert!(!cond.set_severity(800));
        assert_eq!(cond.main().severity, 800);
        assert_eq!(cond.main().last_severity, 500);

        assert!(cond.set_quality(StatusCode::BAD_NO_COMMUNICATION));
        cond.set_comment("not reported");
        assert_eq!(cond.take_events().len(), 2);
        assert_eq!(cond.main().comment, "not reported");
    }
}
