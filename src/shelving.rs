// src/shelving.rs - Shelving states and shelving timers
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{AcError, Result};
use crate::node::NodeId;

/// Shelving state of an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state")]
pub enum ShelvingState {
    #[default]
    Unshelved,
    TimedShelved { expires_at: DateTime<Utc> },
    OneShotShelved,
}

impl ShelvingState {
    pub fn is_shelved(&self) -> bool {
        !matches!(self, ShelvingState::Unshelved)
    }

    /// Name of the current state as exposed in `ShelvingState/CurrentState`
    pub fn name(&self) -> &'static str {
        match self {
            ShelvingState::Unshelved => "Unshelved",
            ShelvingState::TimedShelved { .. } => "TimedShelved",
            ShelvingState::OneShotShelved => "OneShotShelved",
        }
    }
}

/// Requested shelving mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShelveRequest {
    Timed(Duration),
    OneShot,
}

/// Handle of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Expiry of a timed shelve, delivered back to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerExpired {
    pub condition: NodeId,
    /// Shelving generation the timer was armed for; stale expiries that
    /// raced a cancel carry an older generation and are ignored
    pub generation: u64,
}

/// Single-shot timer service used by timed shelving
pub trait ShelvingTimers: Send {
    fn arm(&mut self, condition: &NodeId, generation: u64, after: Duration) -> Result<TimerId>;

    fn cancel(&mut self, timer: TimerId);
}

/// Timers backed by tokio tasks; each expiry is sent on `expired`
pub struct TokioShelvingTimers {
    expired: mpsc::UnboundedSender<TimerExpired>,
    tasks: HashMap<TimerId, JoinHandle<()>>,
    next_id: u64,
}

impl TokioShelvingTimers {
    pub fn new(expired: mpsc::UnboundedSender<TimerExpired>) -> Self {
        Self {
            expired,
            tasks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of timers not yet cancelled or reaped
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }
}

impl ShelvingTimers for TokioShelvingTimers {
    fn arm(&mut self, condition: &NodeId, generation: u64, after: Duration) -> Result<TimerId> {
        let runtime = Handle::try_current()
            .map_err(|e| AcError::Runtime(format!("Cannot arm shelving timer for {}: {}", condition, e)))?;
        let id = TimerId(self.next_id);
        self.next_id += 1;

        // Reap finished tasks so the map does not grow with every shelve
        self.tasks.retain(|_, task| !task.is_finished());

        let tx = self.expired.clone();
        let condition = condition.clone();
        debug!("Arming shelving timer {:?} for {} ({:?})", id, condition, after);
        let task = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(TimerExpired {
                condition,
                generation,
            });
        });
        self.tasks.insert(id, task);
        Ok(id)
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(task) = self.tasks.remove(&timer) {
            trace!("Cancelling shelving timer {:?}", timer);
            task.abort();
        }
    }
}

impl Drop for TokioShelvingTimers {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Timer service that only records requests
///
/// Hosts that drive time themselves fire expiries by calling the alarm
/// directly with the generation reported by [`ManualTimers::armed`].
#[derive(Debug, Default)]
pub struct ManualTimers {
    armed: HashMap<TimerId, (NodeId, u64, Duration)>,
    next_id: u64,
    cancelled: usize,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live timers as `(condition, generation, duration)`
    pub fn armed(&self) -> Vec<(NodeId, u64, Duration)> {
        self.armed.values().cloned().collect()
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }
}

impl ShelvingTimers for ManualTimers {
    fn arm(&mut self, condition: &NodeId, generation: u64, after: Duration) -> Result<TimerId> {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.armed.insert(id, (condition.clone(), generation, after));
        Ok(id)
    }

    fn cancel(&mut self, timer: TimerId) {
        if self.armed.remove(&timer).is_some() {
            self.cancelled += 1;
        }
    }
}
