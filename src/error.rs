// src/error.rs - Error types for the A&C engine
use thiserror::Error;

use crate::node::NodeId;
use crate::value::StatusCode;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum AcError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Requested node was not found in the graph or source registry
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// A type definition is not a subtype of the required base type
    #[error("Type mismatch: {type_id} is not a subtype of {expected}")]
    TypeMismatch { type_id: NodeId, expected: &'static str },

    /// The request violates the condition state machine
    #[error("Invalid state on {condition}: {violation}")]
    InvalidState {
        condition: NodeId,
        violation: StateViolation,
    },

    /// A request argument is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Timed shelve outside `(0, MaxTimeShelved]` or past the clock range
    #[error("Shelving time {0:?} out of range")]
    ShelvingTimeOutOfRange(std::time::Duration),

    /// The branch does not exist on the condition
    #[error("Branch {branch} not found on {condition}")]
    BranchNotFound { condition: NodeId, branch: u32 },

    /// No branch carries the given event id
    #[error("Event id {0} is unknown")]
    EventIdUnknown(String),

    /// The where-clause is malformed
    #[error("Invalid filter element {element}: {reason}")]
    InvalidFilter { element: usize, reason: String },

    /// No async runtime is available for timers
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The engine task is gone
    #[error("Engine channel closed")]
    ChannelClosed,
}

/// Precondition violated by an acknowledge, confirm, shelve or enable request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateViolation {
    NotAcknowledgeable,
    BranchAlreadyAcked,
    BranchNotAcked,
    BranchAlreadyConfirmed,
    ConfirmNotSupported,
    AlreadyShelved,
    NotShelved,
    ConditionDisabled,
    AlreadyEnabled,
    AlreadyDisabled,
    NotAnAlarm,
}

impl StateViolation {
    /// Status code reported to OPC UA clients for this violation
    pub fn status_code(&self) -> StatusCode {
        match self {
            StateViolation::NotAcknowledgeable => StatusCode::BAD_METHOD_INVALID,
            StateViolation::BranchAlreadyAcked => StatusCode::BAD_CONDITION_BRANCH_ALREADY_ACKED,
            StateViolation::BranchNotAcked => StatusCode::BAD_INVALID_STATE,
            StateViolation::BranchAlreadyConfirmed => {
                StatusCode::BAD_CONDITION_BRANCH_ALREADY_CONFIRMED
            }
            StateViolation::ConfirmNotSupported => StatusCode::BAD_METHOD_INVALID,
            StateViolation::AlreadyShelved => StatusCode::BAD_CONDITION_ALREADY_SHELVED,
            StateViolation::NotShelved => StatusCode::BAD_CONDITION_NOT_SHELVED,
            StateViolation::ConditionDisabled => StatusCode::BAD_CONDITION_DISABLED,
            StateViolation::AlreadyEnabled => StatusCode::BAD_CONDITION_ALREADY_ENABLED,
            StateViolation::AlreadyDisabled => StatusCode::BAD_CONDITION_ALREADY_DISABLED,
            StateViolation::NotAnAlarm => StatusCode::BAD_METHOD_INVALID,
        }
    }
}

impl std::fmt::Display for StateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StateViolation::NotAcknowledgeable => "condition is not acknowledgeable",
            StateViolation::BranchAlreadyAcked => "branch is already acknowledged",
            StateViolation::BranchNotAcked => "branch must be acknowledged before confirm",
            StateViolation::BranchAlreadyConfirmed => "branch is already confirmed",
            StateViolation::ConfirmNotSupported => "condition does not support confirm",
            StateViolation::AlreadyShelved => "alarm is already shelved in that mode",
            StateViolation::NotShelved => "alarm is not shelved",
            StateViolation::ConditionDisabled => "condition is disabled",
            StateViolation::AlreadyEnabled => "condition is already enabled",
            StateViolation::AlreadyDisabled => "condition is already disabled",
            StateViolation::NotAnAlarm => "condition is not an alarm",
        };
        f.write_str(text)
    }
}

impl AcError {
    /// Status code equivalent of this error, used by method call results
    pub fn status_code(&self) -> StatusCode {
        match self {
            AcError::InvalidState { violation, .. } => violation.status_code(),
            AcError::InvalidArgument(_) => StatusCode::BAD_INVALID_ARGUMENT,
            AcError::ShelvingTimeOutOfRange(_) => StatusCode::BAD_SHELVING_TIME_OUT_OF_RANGE,
            AcError::EventIdUnknown(_) => StatusCode::BAD_EVENT_ID_UNKNOWN,
            AcError::NodeNotFound(_) | AcError::BranchNotFound { .. } => {
                StatusCode::BAD_NODE_ID_UNKNOWN
            }
            AcError::InvalidFilter { .. } => StatusCode::BAD_FILTER_OPERAND_INVALID,
            _ => StatusCode::BAD,
        }
    }
}

/// Convenient alias over [`Result`] using [`AcError`]
pub type Result<T> = std::result::Result<T, AcError>;
