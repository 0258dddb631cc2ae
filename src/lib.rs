//! PETRA A&C - OPC UA Alarms & Conditions core
//!
//! Condition and alarm state machines, limit evaluators and event filters
//! for an OPC UA style information model. Conditions are driven by value
//! sources and client method calls through a run-to-completion engine;
//! every reportable change produces an event carrying the full snapshot of
//! the affected branch.
//!
//! # Examples
//!
//! ```rust
//! use petra_ac::Config;
//!
//! let config = Config::from_yaml(r#"
//! variables:
//!   - id: "ns=1;s=Pump1.Running"
//!     initial: false
//! conditions:
//!   - id: "ns=1;s=Pump1.Stopped"
//!     name: Stopped
//!     type: OffNormalAlarmType
//!     alarm: { kind: discrete, input: "ns=1;s=Pump1.Running", normal_values: [true] }
//! "#)?;
//! let engine = config.build_engine()?;
//! assert_eq!(engine.len(), 1);
//! # Ok::<(), petra_ac::AcError>(())
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error types and OPC UA status code mapping
pub mod error;

/// Variant values, status codes and data values
pub mod value;

/// Node identifiers, browse names and standard type ids
pub mod node;

/// Information graph interface
pub mod graph;

/// Value sources with typed subscriptions
pub mod source;

// ============================================================================
// ALARMS & CONDITIONS
// ============================================================================

/// Limit, deviation, rate-of-change, discrete and certificate evaluators
pub mod limits;

/// Shelving states and timers
pub mod shelving;

/// Per-branch condition snapshots
pub mod snapshot;

/// Condition events
pub mod event;

/// Generic condition lifecycle
pub mod condition;

/// Alarm state machine and condition builder
pub mod alarm;

/// Where-clause evaluation
pub mod filter;

// ============================================================================
// RUNTIME
// ============================================================================

/// YAML configuration
pub mod config;

/// Run-to-completion engine
pub mod engine;

// ============================================================================
// PUBLIC RE-EXPORTS
// ============================================================================

pub use alarm::{AlarmConfig, AlarmKind, ConditionBuilder};
pub use condition::{Condition, ConditionInfo, ConditionKind, RetainRule};
pub use config::{Config, EngineConfig};
pub use engine::{AlarmEngine, ConditionMethod, EngineHandle, EngineStats, Notification, SubscriberId};
pub use error::{AcError, Result, StateViolation};
pub use event::{ConditionEvent, EventFieldList};
pub use filter::{ContentFilter, EventFilter, EventFilterEngine, FilterOperand, FilterOperator, SimpleAttributeOperand};
pub use graph::{MemoryGraph, NodeGraph};
pub use limits::{LimitLevel, LimitMode, LimitSet, LimitState};
pub use node::{NodeId, QualifiedName};
pub use shelving::{ManualTimers, ShelveRequest, ShelvingState, ShelvingTimers};
pub use snapshot::{BranchId, ConditionSnapshot, EventId};
pub use source::{SourceRegistry, ValueSource, Variable};
pub use value::{DataValue, StatusCode, Value};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize logging for hosts that have not configured tracing yet
///
/// Defaults to `petra_ac=info` when `RUST_LOG` is unset. Calling it more
/// than once is harmless.
pub fn init() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("petra_ac=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    tracing::info!("PETRA A&C {} initialized", VERSION);
    Ok(())
}
