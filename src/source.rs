// src/source.rs - Value sources feeding alarm inputs
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::error::{AcError, Result};
use crate::node::NodeId;
use crate::value::{DataValue, StatusCode, Value};

/// Callback invoked with every new sample of a source
pub type ChangeCallback = Arc<dyn Fn(&DataValue) + Send + Sync>;

/// Token identifying one subscription on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Observable process value
///
/// Implementations must not invoke callbacks while holding locks that
/// `unsubscribe` needs, callbacks may be dropped from inside a callback.
pub trait ValueSource: Send + Sync {
    fn node_id(&self) -> &NodeId;

    /// Current value with status and source timestamp
    fn read_value(&self) -> DataValue;

    fn subscribe(&self, on_change: ChangeCallback) -> SubscriptionToken;

    fn unsubscribe(&self, token: SubscriptionToken);
}

/// In-memory process variable
///
/// # Examples
///
/// ```rust
/// use petra_ac::{DataValue, NodeId, Variable, ValueSource};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let var = Variable::new(NodeId::string(1, "Tank1.Level"), DataValue::new(10.0));
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = seen.clone();
/// let token = var.subscribe(Arc::new(move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// var.set(DataValue::new(12.5));
/// var.unsubscribe(token);
/// var.set(DataValue::new(13.0));
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
pub struct Variable {
    node_id: NodeId,
    value: RwLock<DataValue>,
    subscribers: DashMap<u64, ChangeCallback>,
    next_token: AtomicU64,
}

impl Variable {
    pub fn new(node_id: NodeId, initial: DataValue) -> Self {
        Self {
            node_id,
            value: RwLock::new(initial),
            subscribers: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Store a new sample and notify every subscriber synchronously
    pub fn set(&self, sample: DataValue) {
        trace!("Setting {} = {} ({})", self.node_id, sample.value, sample.status);
        *self.value.write() = sample.clone();

        let callbacks: Vec<ChangeCallback> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in callbacks {
            callback(&sample);
        }
    }

    /// Store a good value stamped now
    pub fn set_value(&self, value: impl Into<Value>) {
        self.set(DataValue::new(value));
    }

    /// Keep the last value but report a status change, e.g. a lost connection
    pub fn set_status(&self, status: StatusCode) {
        let sample = self.value.read().clone().with_status(status);
        self.set(sample);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("node_id", &self.node_id)
            .field("value", &*self.value.read())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl ValueSource for Variable {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn read_value(&self) -> DataValue {
        self.value.read().clone()
    }

    fn subscribe(&self, on_change: ChangeCallback) -> SubscriptionToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(token, on_change);
        SubscriptionToken(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers.remove(&token.0);
    }
}

/// Subscription released when dropped
pub struct Subscription {
    source: Arc<dyn ValueSource>,
    token: SubscriptionToken,
}

impl Subscription {
    pub fn new(source: Arc<dyn ValueSource>, on_change: ChangeCallback) -> Self {
        let token = source.subscribe(on_change);
        Self { source, token }
    }

    pub fn source(&self) -> &Arc<dyn ValueSource> {
        &self.source
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        trace!("Releasing subscription on {}", self.source.node_id());
        self.source.unsubscribe(self.token);
    }
}

/// Lookup table of value sources by node id
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Arc<DashMap<NodeId, Arc<dyn ValueSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: Arc<dyn ValueSource>) {
        self.sources.insert(source.node_id().clone(), source);
    }

    /// Create and register an in-memory variable, returning it for writes
    pub fn add_variable(&self, node_id: NodeId, initial: DataValue) -> Arc<Variable> {
        let variable = Arc::new(Variable::new(node_id, initial));
        self.register(variable.clone());
        variable
    }

    pub fn get(&self, node_id: &NodeId) -> Result<Arc<dyn ValueSource>> {
        self.sources
            .get(node_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AcError::NodeNotFound(node_id.clone()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscription_released_on_drop() {
        let var = Arc::new(Variable::new(NodeId::string(1, "x"), DataValue::new(0.0)));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = Subscription::new(
            var.clone(),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        var.set_value(1.0);
        assert_eq!(var.subscriber_count(), 1);
        drop(sub);
        var.set_value(2.0);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(var.subscriber_count(), 0);
        assert_eq!(var.read_value().value, Value::Float(2.0));
    }

    #[test]
    fn test_set_status_keeps_value() {
        let var = Variable::new(NodeId::string(1, "x"), DataValue::new(5.0));
        var.set_status(StatusCode::BAD_SENSOR_FAILURE);
        let sample = var.read_value();
        assert_eq!(sample.value, Value::Float(5.0));
        assert!(sample.status.is_bad());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SourceRegistry::new();
        registry.add_variable(NodeId::string(1, "a"), DataValue::new(true));
        assert!(registry.get(&NodeId::string(1, "a")).is_ok());
        assert!(matches!(
            registry.get(&NodeId::string(1, "b")),
            Err(AcError::NodeNotFound(_))
        ));
    }
}
