// src/engine.rs - Run-to-completion alarm engine
//
// The engine owns every condition. Value changes, shelving timer expiries,
// certificate checks and client requests are all turned into commands and
// processed one at a time, so no evaluation ever interleaves with another.
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::condition::{Condition, ConditionInfo};
use crate::config::EngineConfig;
use crate::error::{AcError, Result};
use crate::event::{ConditionEvent, EventFieldList};
use crate::filter::{EventFilter, EventFilterEngine};
use crate::graph::NodeGraph;
use crate::node::NodeId;
use crate::shelving::{ShelveRequest, ShelvingTimers, TimerExpired, TokioShelvingTimers};
use crate::snapshot::EventId;
use crate::source::{SourceRegistry, Subscription};
use crate::value::DataValue;

// ==========================================
// SECTION 1: REQUESTS AND NOTIFICATIONS
// ==========================================

/// Client method invoked on a condition
#[derive(Debug, Clone)]
pub enum ConditionMethod {
    Acknowledge { event_id: EventId, comment: String },
    Confirm { event_id: EventId, comment: String },
    AddComment { event_id: EventId, comment: String },
    Enable,
    Disable,
    Shelve(ShelveRequest),
    Unshelve,
    SetSuppressed(bool),
    SetOutOfService(bool),
    /// Update message, quality or severity of a non-alarm condition
    Raise(ConditionInfo),
}

/// Identifier of an event subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(pub u64);

/// Item delivered to a subscriber queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Notification {
    RefreshStart,
    Event(EventFieldList),
    RefreshEnd,
}

/// Snapshot of engine counters
#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub conditions: usize,
    pub retained: usize,
    pub subscribers: usize,
    pub events_raised: u64,
    pub notifications_dropped: u64,
    pub uptime_secs: u64,
}

enum Command {
    InputChanged {
        condition: NodeId,
        sample: DataValue,
    },
    Reevaluate {
        condition: NodeId,
    },
    Call {
        condition: NodeId,
        method: ConditionMethod,
        user: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        filter: EventFilter,
        reply: oneshot::Sender<Result<(SubscriberId, mpsc::Receiver<Notification>)>>,
    },
    Unsubscribe {
        subscriber: SubscriberId,
    },
    Refresh {
        subscriber: SubscriberId,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
    Shutdown,
}

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::Sender<Notification>,
}

// ==========================================
// SECTION 2: ENGINE
// ==========================================

/// Owner of all conditions and their subscriptions
pub struct AlarmEngine {
    config: EngineConfig,
    sources: SourceRegistry,
    filters: EventFilterEngine,
    conditions: HashMap<NodeId, Condition>,
    bindings: HashMap<NodeId, Vec<Subscription>>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    next_subscriber: u64,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    timers: Box<dyn ShelvingTimers>,
    timer_rx: mpsc::UnboundedReceiver<TimerExpired>,
    running: bool,
    events_raised: u64,
    notifications_dropped: u64,
    start_time: Instant,
}

impl AlarmEngine {
    /// Engine with tokio backed shelving timers; a timed shelve outside a
    /// runtime fails with [`AcError::Runtime`]
    pub fn new(graph: Arc<dyn NodeGraph>, sources: SourceRegistry, config: EngineConfig) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            config,
            sources,
            filters: EventFilterEngine::new(graph),
            conditions: HashMap::new(),
            bindings: HashMap::new(),
            subscribers: HashMap::new(),
            next_subscriber: 1,
            commands_tx,
            commands_rx,
            timers: Box::new(TokioShelvingTimers::new(timer_tx)),
            timer_rx,
            running: false,
            events_raised: 0,
            notifications_dropped: 0,
            start_time: Instant::now(),
        }
    }

    /// Replace the shelving timer service, e.g. with [`crate::ManualTimers`]
    pub fn with_timers(mut self, timers: Box<dyn ShelvingTimers>) -> Self {
        self.timers = timers;
        self
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn condition(&self, node_id: &NodeId) -> Option<&Condition> {
        self.conditions.get(node_id)
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.values()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Register a condition, bind its value sources and evaluate it once
    pub fn add_condition(&mut self, condition: Condition) -> Result<()> {
        let node_id = condition.node_id().clone();
        if self.conditions.contains_key(&node_id) {
            return Err(AcError::Config(format!("Condition {} already registered", node_id)));
        }

        let mut bindings = Vec::new();
        if let Some(input) = condition.input_source() {
            let tx = self.commands_tx.clone();
            let target = node_id.clone();
            bindings.push(Subscription::new(
                input,
                Arc::new(move |sample: &DataValue| {
                    let _ = tx.send(Command::InputChanged {
                        condition: target.clone(),
                        sample: sample.clone(),
                    });
                }),
            ));
        }
        for dependency in condition.dependency_sources() {
            let tx = self.commands_tx.clone();
            let target = node_id.clone();
            bindings.push(Subscription::new(
                dependency,
                Arc::new(move |_: &DataValue| {
                    let _ = tx.send(Command::Reevaluate {
                        condition: target.clone(),
                    });
                }),
            ));
        }

        info!(
            "Registered condition {} ({} source bindings)",
            node_id,
            bindings.len()
        );
        self.bindings.insert(node_id.clone(), bindings);
        self.conditions.insert(node_id.clone(), condition);

        if let Some(condition) = self.conditions.get_mut(&node_id) {
            condition.reevaluate();
        }
        self.flush(&node_id);
        Ok(())
    }

    /// Remove a condition; its value subscriptions and timer are released
    pub fn remove_condition(&mut self, node_id: &NodeId) -> Result<Condition> {
        let mut condition = self
            .conditions
            .remove(node_id)
            .ok_or_else(|| AcError::NodeNotFound(node_id.clone()))?;
        self.bindings.remove(node_id);
        condition.release_timer(self.timers.as_mut());
        info!("Removed condition {}", node_id);
        Ok(condition)
    }

    /// Invoke a client method on a condition
    pub fn call(&mut self, node_id: &NodeId, method: ConditionMethod, user: &str) -> Result<()> {
        let condition = self
            .conditions
            .get_mut(node_id)
            .ok_or_else(|| AcError::NodeNotFound(node_id.clone()))?;
        debug!("Call {:?} on {} by '{}'", method, node_id, user);

        let result = match method {
            ConditionMethod::Acknowledge { event_id, comment } => condition
                .find_branch_by_event(&event_id)
                .and_then(|branch| condition.acknowledge(branch, &comment, user)),
            ConditionMethod::Confirm { event_id, comment } => condition
                .find_branch_by_event(&event_id)
                .and_then(|branch| condition.confirm(branch, &comment, user)),
            ConditionMethod::AddComment { event_id, comment } => condition
                .find_branch_by_event(&event_id)
                .and_then(|branch| condition.add_comment(branch, &comment, user)),
            ConditionMethod::Enable => condition.enable().map(|_| condition.reevaluate()),
            ConditionMethod::Disable => condition.disable(),
            ConditionMethod::Shelve(request) => condition.shelve(request, self.timers.as_mut()),
            ConditionMethod::Unshelve => condition.unshelve(self.timers.as_mut()),
            ConditionMethod::SetSuppressed(flag) => condition.set_suppressed(flag).map(|_| ()),
            ConditionMethod::SetOutOfService(flag) => condition.set_out_of_service(flag).map(|_| ()),
            ConditionMethod::Raise(info) => {
                condition.raise(info);
                Ok(())
            }
        };

        if let Err(e) = &result {
            info!("Call on {} rejected: {}", node_id, e);
        }
        self.flush(node_id);
        result
    }

    // ==========================================
    // SECTION 3: SUBSCRIBERS
    // ==========================================

    /// Add a subscriber with a bounded notification queue
    pub fn subscribe(&mut self, filter: EventFilter) -> Result<(SubscriberId, mpsc::Receiver<Notification>)> {
        filter.validate()?;
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_size.max(1));
        self.subscribers.insert(id, Subscriber { filter, tx });
        info!("Subscriber {} added", id.0);
        Ok((id, rx))
    }

    pub fn unsubscribe(&mut self, subscriber: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&subscriber).is_some();
        if removed {
            info!("Subscriber {} removed", subscriber.0);
        }
        removed
    }

    /// Replay every retained branch to one subscriber, bracketed by
    /// refresh markers. EventIds are not regenerated.
    pub fn refresh(&mut self, subscriber: SubscriberId) -> Result<()> {
        let Some(target) = self.subscribers.get(&subscriber) else {
            return Err(AcError::InvalidArgument(format!("Unknown subscriber {}", subscriber.0)));
        };

        let mut queue = vec![Notification::RefreshStart];
        let mut ids: Vec<&NodeId> = self.conditions.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(condition) = self.conditions.get(id) {
                for event in condition.retained_events() {
                    if let Some(fields) = self.filters.apply(&target.filter, &event) {
                        queue.push(Notification::Event(fields));
                    }
                }
            }
        }
        queue.push(Notification::RefreshEnd);
        debug!("Refresh for subscriber {}: {} items", subscriber.0, queue.len());

        let tx = target.tx.clone();
        for item in queue {
            self.deliver(subscriber, &tx, item);
        }
        Ok(())
    }

    fn deliver(&mut self, subscriber: SubscriberId, tx: &mpsc::Sender<Notification>, item: Notification) -> bool {
        match tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.notifications_dropped += 1;
                warn!("Subscriber {} queue full, notification dropped", subscriber.0);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Deliver queued events of one condition to every matching subscriber
    fn flush(&mut self, node_id: &NodeId) {
        let events = match self.conditions.get_mut(node_id) {
            Some(condition) => condition.take_events(),
            None => return,
        };
        for event in events {
            self.publish(&event);
        }
    }

    fn publish(&mut self, event: &ConditionEvent) {
        self.events_raised += 1;
        debug!(
            "Event {} from {} branch {} (retain {})",
            event.event_id,
            event.condition_id,
            event.branch_id,
            event.retain()
        );

        let targets: Vec<(SubscriberId, mpsc::Sender<Notification>, Option<EventFieldList>)> = self
            .subscribers
            .iter()
            .map(|(id, sub)| (*id, sub.tx.clone(), self.filters.apply(&sub.filter, event)))
            .collect();

        let mut closed = Vec::new();
        for (id, tx, fields) in targets {
            if let Some(fields) = fields {
                if !self.deliver(id, &tx, Notification::Event(fields)) {
                    closed.push(id);
                }
            }
        }
        for id in closed {
            debug!("Subscriber {} went away", id.0);
            self.subscribers.remove(&id);
        }
    }

    // ==========================================
    // SECTION 4: COMMAND PROCESSING
    // ==========================================

    /// Check every certificate expiration alarm against `now`
    pub fn check_certificates(&mut self, now: chrono::DateTime<Utc>) {
        let ids: Vec<NodeId> = self
            .conditions
            .values()
            .filter(|c| {
                matches!(
                    c.alarm_config(),
                    Some(crate::alarm::AlarmConfig::CertificateExpiration { .. })
                )
            })
            .map(|c| c.node_id().clone())
            .collect();
        for id in ids {
            if let Some(condition) = self.conditions.get_mut(&id) {
                condition.evaluate_expiration(now);
            }
            self.flush(&id);
        }
    }

    fn on_timer(&mut self, expired: TimerExpired) {
        match self.conditions.get_mut(&expired.condition) {
            Some(condition) => {
                condition.on_shelving_timer_expired(expired.generation, self.timers.as_mut());
            }
            None => {
                debug!("Shelving timer for removed condition {}", expired.condition);
                return;
            }
        }
        self.flush(&expired.condition);
    }

    /// Returns false once shutdown was requested
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::InputChanged { condition, sample } => {
                if let Some(c) = self.conditions.get_mut(&condition) {
                    c.on_input_value_changed(&sample);
                }
                self.flush(&condition);
            }
            Command::Reevaluate { condition } => {
                if let Some(c) = self.conditions.get_mut(&condition) {
                    c.reevaluate();
                }
                self.flush(&condition);
            }
            Command::Call {
                condition,
                method,
                user,
                reply,
            } => {
                let _ = reply.send(self.call(&condition, method, &user));
            }
            Command::Subscribe { filter, reply } => {
                let _ = reply.send(self.subscribe(filter));
            }
            Command::Unsubscribe { subscriber } => {
                self.unsubscribe(subscriber);
            }
            Command::Refresh { subscriber, reply } => {
                let _ = reply.send(self.refresh(subscriber));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Process everything queued so far without waiting. Returns the
    /// number of commands and timer expiries handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(expired) = self.timer_rx.try_recv() {
                self.on_timer(expired);
                handled += 1;
                continue;
            }
            match self.commands_rx.try_recv() {
                Ok(command) => {
                    handled += 1;
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Serve commands, timer expiries and certificate checks until
    /// [`EngineHandle::shutdown`]
    pub async fn run(&mut self) -> Result<()> {
        self.running = true;
        info!(
            "Starting alarm engine with {} conditions, certificate check every {:?}",
            self.conditions.len(),
            self.config.certificate_check_interval()
        );

        let mut certificate_tick = interval(self.config.certificate_check_interval());

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(expired) = self.timer_rx.recv() => {
                    self.on_timer(expired);
                }
                _ = certificate_tick.tick() => {
                    self.check_certificates(Utc::now());
                }
            }
        }

        self.running = false;
        info!("Alarm engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            running: self.is_running(),
            conditions: self.conditions.len(),
            retained: self.conditions.values().filter(|c| c.retain()).count(),
            subscribers: self.subscribers.len(),
            events_raised: self.events_raised,
            notifications_dropped: self.notifications_dropped,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Cloneable handle for use from other tasks
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.commands_tx.clone(),
        }
    }
}

// ==========================================
// SECTION 5: HANDLE
// ==========================================

/// Async front end of a running [`AlarmEngine`]
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).map_err(|_| AcError::ChannelClosed)?;
        rx.await.map_err(|_| AcError::ChannelClosed)
    }

    pub async fn call(&self, condition: NodeId, method: ConditionMethod, user: impl Into<String>) -> Result<()> {
        let user = user.into();
        self.request(|reply| Command::Call {
            condition,
            method,
            user,
            reply,
        })
        .await?
    }

    pub async fn subscribe(&self, filter: EventFilter) -> Result<(SubscriberId, mpsc::Receiver<Notification>)> {
        self.request(|reply| Command::Subscribe { filter, reply }).await?
    }

    pub fn unsubscribe(&self, subscriber: SubscriberId) -> Result<()> {
        self.commands
            .send(Command::Unsubscribe { subscriber })
            .map_err(|_| AcError::ChannelClosed)
    }

    pub async fn refresh(&self, subscriber: SubscriberId) -> Result<()> {
        self.request(|reply| Command::Refresh { subscriber, reply }).await?
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub fn shutdown(&self) -> Result<()> {
        self.commands.send(Command::Shutdown).map_err(|_| AcError::ChannelClosed)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{AlarmConfig, ConditionBuilder};
    use crate::filter::SimpleAttributeOperand;
    use crate::graph::{MemoryGraph, CONDITION_FIELDS};
    use crate::node::ids;
    use crate::shelving::ManualTimers;
    use crate::snapshot::BranchId;
    use crate::value::Value;

    fn setup(queue: usize) -> (AlarmEngine, Arc<crate::source::Variable>, NodeId) {
        let graph = MemoryGraph::with_standard_types();
        let sources = SourceRegistry::new();
        let input = sources.add_variable(NodeId::string(1, "Pump1.Running"), DataValue::new(true));
        let cond_id = NodeId::string(1, "Pump1.Stopped");
        graph.add_condition_instance(cond_id.clone(), "Stopped", ids::OFF_NORMAL_ALARM_TYPE, CONDITION_FIELDS);

        let condition = ConditionBuilder::new(cond_id.clone(), "Stopped", ids::OFF_NORMAL_ALARM_TYPE)
            .alarm(AlarmConfig::Discrete {
                input: NodeId::string(1, "Pump1.Running"),
                normal_values: vec![Value::Bool(true)],
                normal_state: None,
            })
            .build(&graph, &sources)
            .unwrap();

        let config = EngineConfig {
            subscriber_queue_size: queue,
            ..EngineConfig::default()
        };
        let mut engine =
            AlarmEngine::new(Arc::new(graph), sources, config).with_timers(Box::new(ManualTimers::new()));
        engine.add_condition(condition).unwrap();
        (engine, input, cond_id)
    }

    fn severity_filter() -> EventFilter {
        EventFilter {
            select_clauses: vec![
                SimpleAttributeOperand::field("EventId"),
                SimpleAttributeOperand::field("ActiveState/Id"),
            ],
            where_clause: Default::default(),
        }
    }

    #[test]
    fn test_value_change_reaches_subscriber() {
        let (mut engine, input, cond_id) = setup(16);
        let (_, mut rx) = engine.subscribe(severity_filter()).unwrap();

        input.set_value(false);
        assert_eq!(engine.process_pending(), 1);

        match rx.try_recv().unwrap() {
            Notification::Event(fields) => {
                assert_eq!(fields.condition_id, cond_id);
                assert_eq!(fields.fields[1], Value::Bool(true));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(engine.condition(&cond_id).unwrap().retain());
    }

    #[test]
    fn test_acknowledge_by_event_id() {
        let (mut engine, input, cond_id) = setup(16);
        input.set_value(false);
        engine.process_pending();

        let event_id = engine.condition(&cond_id).unwrap().main().event_id;
        let ack = ConditionMethod::Acknowledge {
            event_id,
            comment: "on it".into(),
        };
        engine.call(&cond_id, ack.clone(), "operator").unwrap();
        assert!(engine.call(&cond_id, ack, "operator").is_err(), "old event id is stale");
        assert!(engine.condition(&cond_id).unwrap().main().is_acked());

        assert!(matches!(
            engine.call(&NodeId::string(1, "Nope"), ConditionMethod::Enable, "op"),
            Err(AcError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_refresh_replays_retained_branches() {
        let (mut engine, input, cond_id) = setup(16);
        input.set_value(false);
        input.set_value(true);
        input.set_value(false);
        engine.process_pending();
        assert_eq!(engine.condition(&cond_id).unwrap().branch_count(), 1);

        let (id, mut rx) = engine.subscribe(severity_filter()).unwrap();
        engine.refresh(id).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Notification::RefreshStart);
        let mut events = 0;
        loop {
            match rx.try_recv().unwrap() {
                Notification::Event(_) => events += 1,
                Notification::RefreshEnd => break,
                Notification::RefreshStart => panic!("nested refresh"),
            }
        }
        assert_eq!(events, 2);
        let branch = engine.condition(&cond_id).unwrap().branch_ids()[0];
        assert_ne!(branch, BranchId::MAIN);
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (mut engine, input, _) = setup(1);
        let (_, _rx) = engine.subscribe(severity_filter()).unwrap();
        input.set_value(false);
        input.set_value(true);
        engine.process_pending();
        assert_eq!(engine.stats().notifications_dropped, 1);
        assert_eq!(engine.stats().events_raised, 2);
    }

    #[test]
    fn test_removed_condition_releases_bindings() {
        let (mut engine, input, cond_id) = setup(4);
        assert_eq!(input.subscriber_count(), 1);
        engine.remove_condition(&cond_id).unwrap();
        assert_eq!(input.subscriber_count(), 0);
        input.set_value(false);
        assert_eq!(engine.process_pending(), 0);
    }

    #[test]
    fn test_timed_shelve_without_runtime_fails_cleanly() {
        let (engine, _, cond_id) = setup(4);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = engine.with_timers(Box::new(TokioShelvingTimers::new(tx)));

        let result = engine.call(
            &cond_id,
            ConditionMethod::Shelve(ShelveRequest::Timed(std::time::Duration::from_secs(60))),
            "op",
        );
        assert!(matches!(result, Err(AcError::Runtime(_))));
        let condition = engine.condition(&cond_id).unwrap();
        assert_eq!(condition.shelving_state(), crate::shelving::ShelvingState::Unshelved);

        engine
            .call(&cond_id, ConditionMethod::Shelve(ShelveRequest::OneShot), "op")
            .unwrap();
    }

    #[test]
    fn test_invalid_filter_rejected_on_subscribe() {
        let (mut engine, _, _) = setup(4);
        let filter = EventFilter {
            select_clauses: Vec::new(),
            where_clause: crate::filter::ContentFilter::new()
                .with(crate::filter::FilterOperator::Not, Vec::new()),
        };
        assert!(matches!(engine.subscribe(filter), Err(AcError::InvalidFilter { .. })));
    }
}
