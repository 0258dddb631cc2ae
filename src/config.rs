// src/config.rs - YAML configuration of the alarm model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::alarm::{AlarmConfig, ConditionBuilder};
use crate::condition::{Condition, RetainRule};
use crate::engine::AlarmEngine;
use crate::error::{AcError, Result};
use crate::filter::EventFilter;
use crate::graph::{MemoryGraph, NodeGraph, CONDITION_FIELDS};
use crate::limits::LimitSet;
use crate::node::NodeId;
use crate::source::SourceRegistry;
use crate::value::{DataValue, Value};

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Complete alarm model: engine settings, process values and conditions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Vendor event types derived from the standard hierarchy
    #[serde(default)]
    pub event_types: Vec<EventTypeConfig>,

    /// Objects that act as condition sources
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,

    /// In-memory process values
    #[serde(default)]
    pub variables: Vec<VariableConfig>,

    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,

    /// Filter applied to notifications printed by the binary
    #[serde(default)]
    pub subscription: EventFilter,
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Period of certificate expiration checks in seconds
    #[serde(default = "default_certificate_check")]
    pub certificate_check_secs: u64,

    /// Bounded queue length per subscriber
    #[serde(default = "default_queue_size")]
    pub subscriber_queue_size: usize,

    /// Default upper bound of timed shelving, in seconds
    #[serde(default)]
    pub max_time_shelved_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            certificate_check_secs: default_certificate_check(),
            subscriber_queue_size: default_queue_size(),
            max_time_shelved_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn certificate_check_interval(&self) -> Duration {
        Duration::from_secs(self.certificate_check_secs.max(1))
    }
}

fn default_certificate_check() -> u64 {
    3600
}

fn default_queue_size() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_severity() -> u16 {
    crate::alarm::DEFAULT_SEVERITY
}

// ============================================================================
// MODEL CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTypeConfig {
    pub id: NodeId,
    pub name: String,
    /// Standard type name or NodeId text
    pub supertype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableConfig {
    pub id: NodeId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent: Option<NodeId>,
    /// Initial value; null means waiting for initial data
    #[serde(default)]
    pub initial: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub id: NodeId,
    pub name: String,

    /// Standard type name (e.g. `ExclusiveLevelAlarmType`) or NodeId text
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub source: Option<NodeId>,

    #[serde(default = "default_severity")]
    pub severity: u16,

    /// Base text of alarm messages
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default = "default_true")]
    pub confirmable: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub max_time_shelved_secs: Option<u64>,

    /// Override of the kind's retain rule
    #[serde(default)]
    pub retain: Option<RetainRule>,

    #[serde(default)]
    pub alarm: Option<AlarmInputConfig>,
}

/// Activation inputs as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlarmInputConfig {
    Boolean {
        input: NodeId,
    },
    Limit {
        input: NodeId,
        limits: LimitSet,
    },
    Deviation {
        input: NodeId,
        setpoint: NodeId,
        limits: LimitSet,
    },
    RateOfChange {
        input: NodeId,
        limits: LimitSet,
        #[serde(default)]
        window_secs: Option<f64>,
    },
    Discrete {
        input: NodeId,
        #[serde(default)]
        normal_values: Vec<Value>,
        #[serde(default)]
        normal_state: Option<NodeId>,
    },
    CertificateExpiration {
        expiration_date: DateTime<Utc>,
        #[serde(default)]
        expiration_limit_days: Option<u64>,
    },
}

impl AlarmInputConfig {
    fn to_alarm_config(&self, condition: &str) -> Result<AlarmConfig> {
        Ok(match self.clone() {
            AlarmInputConfig::Boolean { input } => AlarmConfig::Boolean { input },
            AlarmInputConfig::Limit { input, limits } => AlarmConfig::Limit { input, limits },
            AlarmInputConfig::Deviation {
                input,
                setpoint,
                limits,
            } => AlarmConfig::Deviation {
                input,
                setpoint,
                limits,
            },
            AlarmInputConfig::RateOfChange {
                input,
                limits,
                window_secs,
            } => {
                let window = match window_secs {
                    Some(secs) if secs > 0.0 => Some(Duration::try_from_secs_f64(secs).map_err(|_| {
                        AcError::Config(format!("Sampling window {} of '{}' is out of range", secs, condition))
                    })?),
                    Some(secs) => {
                        return Err(AcError::Config(format!(
                            "Sampling window {} of '{}' must be positive",
                            secs, condition
                        )))
                    }
                    None => None,
                };
                AlarmConfig::RateOfChange { input, limits, window }
            }
            AlarmInputConfig::Discrete {
                input,
                normal_values,
                normal_state,
            } => AlarmConfig::Discrete {
                input,
                normal_values,
                normal_state,
            },
            AlarmInputConfig::CertificateExpiration {
                expiration_date,
                expiration_limit_days,
            } => {
                let expiration_limit = expiration_limit_days
                    .map(|days| {
                        days.checked_mul(86_400).map(Duration::from_secs).ok_or_else(|| {
                            AcError::Config(format!(
                                "Expiration limit of {} days of '{}' is out of range",
                                days, condition
                            ))
                        })
                    })
                    .transpose()?;
                AlarmConfig::CertificateExpiration {
                    expiration_date,
                    expiration_limit,
                }
            }
        })
    }
}

/// Graph, value sources and conditions built from a [`Config`]
pub struct Model {
    pub graph: MemoryGraph,
    pub sources: SourceRegistry,
    pub conditions: Vec<Condition>,
}

// ============================================================================
// LOADING AND INSTANTIATION
// ============================================================================

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no graph
    pub fn validate(&self) -> Result<()> {
        if self.engine.subscriber_queue_size == 0 {
            return Err(AcError::Config("subscriber_queue_size must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        let ids = self
            .objects
            .iter()
            .map(|o| &o.id)
            .chain(self.variables.iter().map(|v| &v.id))
            .chain(self.conditions.iter().map(|c| &c.id));
        for id in ids {
            if !seen.insert(id) {
                return Err(AcError::Config(format!("Duplicate node id {}", id)));
            }
        }

        for condition in &self.conditions {
            if condition.name.is_empty() {
                return Err(AcError::Config(format!("Condition {} has no name", condition.id)));
            }
        }
        self.subscription.validate()?;
        Ok(())
    }

    /// Build the graph, the value sources and every condition
    ///
    /// Fails on the first condition that cannot be built.
    pub fn instantiate(&self) -> Result<Model> {
        let graph = MemoryGraph::with_standard_types();
        let sources = SourceRegistry::new();

        for event_type in &self.event_types {
            let supertype = graph.find_event_type(&event_type.supertype).ok_or_else(|| {
                AcError::Config(format!(
                    "Unknown supertype '{}' of event type {}",
                    event_type.supertype, event_type.name
                ))
            })?;
            graph.add_event_type(event_type.id.clone(), &event_type.name, Some(supertype));
        }

        for object in &self.objects {
            graph.add_object(object.id.clone(), &object.name, object.parent.as_ref());
        }

        for variable in &self.variables {
            let initial = if variable.initial.is_null() {
                DataValue::waiting()
            } else {
                DataValue::new(variable.initial.clone())
            };
            let name = variable.name.clone().unwrap_or_else(|| variable.id.to_string());
            graph.add_variable(variable.id.clone(), &name, variable.parent.as_ref(), initial.clone());
            sources.add_variable(variable.id.clone(), initial);
        }

        let mut conditions = Vec::with_capacity(self.conditions.len());
        for cfg in &self.conditions {
            let type_id = graph
                .find_event_type(&cfg.type_name)
                .ok_or_else(|| AcError::Config(format!("Unknown event type '{}' of {}", cfg.type_name, cfg.id)))?;

            let mut builder = ConditionBuilder::new(cfg.id.clone(), cfg.name.clone(), type_id.clone())
                .severity(cfg.severity)
                .confirmable(cfg.confirmable)
                .enabled(cfg.enabled);
            if let Some(message) = &cfg.message {
                builder = builder.message(message.clone());
            }
            if let Some(source) = &cfg.source {
                builder = builder.source(source.clone(), None);
            }
            if let Some(rule) = cfg.retain {
                builder = builder.retain_rule(rule);
            }
            if let Some(secs) = cfg.max_time_shelved_secs.or(self.engine.max_time_shelved_secs) {
                builder = builder.max_time_shelved(Duration::from_secs(secs));
            }
            if let Some(alarm) = &cfg.alarm {
                builder = builder.alarm(alarm.to_alarm_config(&cfg.name)?);
            }

            let condition = builder.build(&graph, &sources)?;
            graph.add_condition_instance(cfg.id.clone(), &cfg.name, type_id, CONDITION_FIELDS);
            if let Some(source) = &cfg.source {
                graph.add_child(source, cfg.id.clone());
            }
            conditions.push(condition);
        }

        info!(
            "Instantiated {} conditions over {} variables",
            conditions.len(),
            self.variables.len()
        );
        Ok(Model {
            graph,
            sources,
            conditions,
        })
    }

    /// Instantiate the model and register every condition with a new engine
    pub fn build_engine(&self) -> Result<AlarmEngine> {
        let model = self.instantiate()?;
        let graph: Arc<dyn NodeGraph> = Arc::new(model.graph);
        let mut engine = AlarmEngine::new(graph, model.sources, self.engine.clone());
        for condition in model.conditions {
            engine.add_condition(condition)?;
        }
        Ok(engine)
    }
}
