// src/node.rs - Node identifiers, browse names and standard type ids
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AcError;

/// OPC UA node identifier
///
/// Only the numeric and string identifier kinds are modelled; GUID and
/// opaque identifiers never appear in the A&C type hierarchy.
///
/// # Examples
///
/// ```rust
/// use petra_ac::NodeId;
///
/// let id: NodeId = "ns=1;s=Tank1.Level".parse()?;
/// assert_eq!(id, NodeId::string(1, "Tank1.Level"));
/// assert_eq!("i=2041".parse::<NodeId>()?, NodeId::numeric(0, 2041));
/// # Ok::<(), petra_ac::AcError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeId {
    Numeric { namespace: u16, value: u32 },
    String { namespace: u16, value: String },
}

impl NodeId {
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        NodeId::Numeric { namespace, value }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        NodeId::String {
            namespace,
            value: value.into(),
        }
    }

    pub fn namespace(&self) -> u16 {
        match self {
            NodeId::Numeric { namespace, .. } | NodeId::String { namespace, .. } => *namespace,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = self.namespace();
        if ns != 0 {
            write!(f, "ns={};", ns)?;
        }
        match self {
            NodeId::Numeric { value, .. } => write!(f, "i={}", value),
            NodeId::String { value, .. } => write!(f, "s={}", value),
        }
    }
}

impl FromStr for NodeId {
    type Err = AcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AcError::Config(format!("Invalid node id '{}'", s));

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, s),
        };

        if let Some(value) = rest.strip_prefix("i=") {
            let value = value.parse::<u32>().map_err(|_| invalid())?;
            Ok(NodeId::numeric(namespace, value))
        } else if let Some(value) = rest.strip_prefix("s=") {
            Ok(NodeId::string(namespace, value))
        } else {
            Err(invalid())
        }
    }
}

impl TryFrom<String> for NodeId {
    type Error = AcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

/// Namespace-qualified browse name, one element of a relative path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

impl From<&str> for QualifiedName {
    /// Parses `"Name"` or `"2:Name"`
    fn from(s: &str) -> Self {
        match s.split_once(':') {
            Some((ns, name)) => match ns.parse::<u16>() {
                Ok(namespace) => QualifiedName::new(namespace, name),
                Err(_) => QualifiedName::new(0, s),
            },
            None => QualifiedName::new(0, s),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.namespace, self.name)
        }
    }
}

/// Parse a slash separated browse path such as `"ActiveState/Id"`
pub fn browse_path(path: &str) -> Vec<QualifiedName> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(QualifiedName::from)
        .collect()
}

/// Render a browse path back into its field key, namespace prefixes dropped
pub fn path_key(path: &[QualifiedName]) -> String {
    path.iter()
        .map(|q| q.name.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Standardised type and variable identifiers of namespace 0
///
/// These values are owned by the OPC UA type registry and must not change.
pub mod ids {
    use super::NodeId;

    pub const BASE_EVENT_TYPE: NodeId = NodeId::numeric(0, 2041);
    pub const CONDITION_TYPE: NodeId = NodeId::numeric(0, 2782);
    pub const ACKNOWLEDGEABLE_CONDITION_TYPE: NodeId = NodeId::numeric(0, 2881);
    pub const ALARM_CONDITION_TYPE: NodeId = NodeId::numeric(0, 2915);
    pub const LIMIT_ALARM_TYPE: NodeId = NodeId::numeric(0, 2955);
    pub const EXCLUSIVE_LIMIT_ALARM_TYPE: NodeId = NodeId::numeric(0, 9341);
    pub const EXCLUSIVE_LEVEL_ALARM_TYPE: NodeId = NodeId::numeric(0, 9482);
    pub const EXCLUSIVE_RATE_OF_CHANGE_ALARM_TYPE: NodeId = NodeId::numeric(0, 9623);
    pub const EXCLUSIVE_DEVIATION_ALARM_TYPE: NodeId = NodeId::numeric(0, 9764);
    pub const NON_EXCLUSIVE_LIMIT_ALARM_TYPE: NodeId = NodeId::numeric(0, 9906);
    pub const NON_EXCLUSIVE_LEVEL_ALARM_TYPE: NodeId = NodeId::numeric(0, 10060);
    pub const NON_EXCLUSIVE_RATE_OF_CHANGE_ALARM_TYPE: NodeId = NodeId::numeric(0, 10214);
    pub const NON_EXCLUSIVE_DEVIATION_ALARM_TYPE: NodeId = NodeId::numeric(0, 10368);
    pub const DISCRETE_ALARM_TYPE: NodeId = NodeId::numeric(0, 10523);
    pub const OFF_NORMAL_ALARM_TYPE: NodeId = NodeId::numeric(0, 10637);
    pub const TRIP_ALARM_TYPE: NodeId = NodeId::numeric(0, 10751);
    pub const SYSTEM_OFF_NORMAL_ALARM_TYPE: NodeId = NodeId::numeric(0, 11753);
    pub const CERTIFICATE_EXPIRATION_ALARM_TYPE: NodeId = NodeId::numeric(0, 13225);

    pub const BASE_OBJECT_TYPE: NodeId = NodeId::numeric(0, 58);
    pub const BASE_DATA_VARIABLE_TYPE: NodeId = NodeId::numeric(0, 63);
    pub const PROPERTY_TYPE: NodeId = NodeId::numeric(0, 68);
    pub const TWO_STATE_VARIABLE_TYPE: NodeId = NodeId::numeric(0, 8995);
    pub const CONDITION_VARIABLE_TYPE: NodeId = NodeId::numeric(0, 9002);

    /// Browse names of the event types above, used for lookup by name
    pub const STANDARD_EVENT_TYPES: &[(&str, NodeId, Option<NodeId>)] = &[
        ("BaseEventType", BASE_EVENT_TYPE, None),
        ("ConditionType", CONDITION_TYPE, Some(BASE_EVENT_TYPE)),
        (
            "AcknowledgeableConditionType",
            ACKNOWLEDGEABLE_CONDITION_TYPE,
            Some(CONDITION_TYPE),
        ),
        (
            "AlarmConditionType",
            ALARM_CONDITION_TYPE,
            Some(ACKNOWLEDGEABLE_CONDITION_TYPE),
        ),
        ("LimitAlarmType", LIMIT_ALARM_TYPE, Some(ALARM_CONDITION_TYPE)),
        (
            "ExclusiveLimitAlarmType",
            EXCLUSIVE_LIMIT_ALARM_TYPE,
            Some(LIMIT_ALARM_TYPE),
        ),
        (
            "ExclusiveLevelAlarmType",
            EXCLUSIVE_LEVEL_ALARM_TYPE,
            Some(EXCLUSIVE_LIMIT_ALARM_TYPE),
        ),
        (
            "ExclusiveRateOfChangeAlarmType",
            EXCLUSIVE_RATE_OF_CHANGE_ALARM_TYPE,
            Some(EXCLUSIVE_LIMIT_ALARM_TYPE),
        ),
        (
            "ExclusiveDeviationAlarmType",
            EXCLUSIVE_DEVIATION_ALARM_TYPE,
            Some(EXCLUSIVE_LIMIT_ALARM_TYPE),
        ),
        (
            "NonExclusiveLimitAlarmType",
            NON_EXCLUSIVE_LIMIT_ALARM_TYPE,
            Some(LIMIT_ALARM_TYPE),
        ),
        (
            "NonExclusiveLevelAlarmType",
            NON_EXCLUSIVE_LEVEL_ALARM_TYPE,
            Some(NON_EXCLUSIVE_LIMIT_ALARM_TYPE),
        ),
        (
            "NonExclusiveRateOfChangeAlarmType",
            NON_EXCLUSIVE_RATE_OF_CHANGE_ALARM_TYPE,
            Some(NON_EXCLUSIVE_LIMIT_ALARM_TYPE),
        ),
        (
            "NonExclusiveDeviationAlarmType",
            NON_EXCLUSIVE_DEVIATION_ALARM_TYPE,
            Some(NON_EXCLUSIVE_LIMIT_ALARM_TYPE),
        ),
        ("DiscreteAlarmType", DISCRETE_ALARM_TYPE, Some(ALARM_CONDITION_TYPE)),
        ("OffNormalAlarmType", OFF_NORMAL_ALARM_TYPE, Some(DISCRETE_ALARM_TYPE)),
        ("TripAlarmType", TRIP_ALARM_TYPE, Some(OFF_NORMAL_ALARM_TYPE)),
        (
            "SystemOffNormalAlarmType",
            SYSTEM_OFF_NORMAL_ALARM_TYPE,
            Some(OFF_NORMAL_ALARM_TYPE),
        ),
        (
            "CertificateExpirationAlarmType",
            CERTIFICATE_EXPIRATION_ALARM_TYPE,
            Some(SYSTEM_OFF_NORMAL_ALARM_TYPE),
        ),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_round_trip_text() {
        let id = NodeId::string(2, "Boiler.Drum");
        assert_eq!(id.to_string(), "ns=2;s=Boiler.Drum");
        assert_eq!("ns=2;s=Boiler.Drum".parse::<NodeId>().unwrap(), id);
        assert_eq!(ids::TRIP_ALARM_TYPE.to_string(), "i=10751");
    }

    #[test]
    fn test_node_id_rejects_garbage() {
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
        assert!("ns=1;i=abc".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_browse_path_parsing() {
        let path = browse_path("ActiveState/Id");
        assert_eq!(path.len(), 2);
        assert_eq!(path[1], QualifiedName::new(0, "Id"));
        assert_eq!(browse_path("2:Vendor/Field")[0], QualifiedName::new(2, "Vendor"));
        assert_eq!(path_key(&path), "ActiveState/Id");
        assert!(browse_path("").is_empty());
    }
}
