//! ManagedResource bundle spec and status
//!
//! A bundle is a named set of plain manifests applied by the resource
//! manager. Its `ResourcesApplied` and `ResourcesHealthy` conditions are the
//! only health signal this crate reads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::extension::ConvergenceState;

/// Condition set once every manifest of the bundle was applied
pub const CONDITION_APPLIED: &str = "ResourcesApplied";

/// Condition set once every applied object reports healthy
pub const CONDITION_HEALTHY: &str = "ResourcesHealthy";

/// `ResourcesApplied` reasons that will not resolve on their own
pub const TERMINAL_APPLY_REASONS: &[&str] = &["DecodingFailed"];

/// Label every bundle carries to identify who created it
pub const LABEL_ORIGIN: &str = "origin";

/// Which resource manager instance reconciles a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleClass {
    /// Objects are applied to the seed cluster
    Seed,
    /// Objects are applied to the shoot cluster
    #[default]
    Shoot,
}

impl BundleClass {
    /// Value of `spec.class`; the shoot resource manager owns unclassed bundles
    pub fn spec_value(&self) -> Option<String> {
        match self {
            BundleClass::Seed => Some("seed".to_string()),
            BundleClass::Shoot => None,
        }
    }

    /// Inverse of [`BundleClass::spec_value`]
    pub fn from_spec_value(value: Option<&str>) -> Self {
        match value {
            Some("seed") => BundleClass::Seed,
            _ => BundleClass::Shoot,
        }
    }
}

impl fmt::Display for BundleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleClass::Seed => f.write_str("seed"),
            BundleClass::Shoot => f.write_str("shoot"),
        }
    }
}

impl FromStr for BundleClass {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed" => Ok(BundleClass::Seed),
            "shoot" => Ok(BundleClass::Shoot),
            other => Err(CoreError::UnknownClass(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
}

/// `spec` of a ManagedResource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub secret_refs: Vec<SecretRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inject_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_objects: Option<bool>,
}

impl ManagedResourceSpec {
    pub fn from_value(value: Option<&serde_json::Value>) -> crate::Result<Self> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.secret_refs.iter().map(|r| r.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: None,
            message: None,
            last_transition_time: None,
            last_update_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }

    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{} is {:?} ({}): {}", self.type_, self.status, reason, message),
            (Some(reason), None) => format!("{} is {:?} ({})", self.type_, self.status, reason),
            (None, Some(message)) => format!("{} is {:?}: {}", self.type_, self.status, message),
            (None, None) => format!("{} is {:?}", self.type_, self.status),
        }
    }
}

/// `status` of a ManagedResource, written only by the resource manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ManagedResourceStatus {
    pub fn from_value(value: Option<&serde_json::Value>) -> crate::Result<Self> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Classify a bundle against its current `metadata.generation`
    pub fn evaluate(&self, generation: Option<i64>) -> ConvergenceState {
        if let Some(generation) = generation
            && self.observed_generation != Some(generation)
        {
            return ConvergenceState::Pending(format!(
                "resource manager has not observed generation {} yet",
                generation
            ));
        }

        let applied = match self.condition(CONDITION_APPLIED) {
            None => {
                return ConvergenceState::Pending(format!(
                    "condition {} has not been reported yet",
                    CONDITION_APPLIED
                ));
            }
            Some(condition) => condition,
        };

        match applied.status {
            ConditionStatus::True => {}
            ConditionStatus::False => {
                let terminal = applied
                    .reason
                    .as_deref()
                    .is_some_and(|reason| TERMINAL_APPLY_REASONS.contains(&reason));
                return if terminal {
                    ConvergenceState::FatalError(applied.describe())
                } else {
                    ConvergenceState::TransientError(applied.describe())
                };
            }
            ConditionStatus::Unknown => return ConvergenceState::Pending(applied.describe()),
        }

        match self.condition(CONDITION_HEALTHY) {
            None => ConvergenceState::Pending(format!(
                "condition {} has not been reported yet",
                CONDITION_HEALTHY
            )),
            Some(healthy) => match healthy.status {
                ConditionStatus::True => ConvergenceState::Converged,
                ConditionStatus::False => ConvergenceState::TransientError(healthy.describe()),
                ConditionStatus::Unknown => ConvergenceState::Pending(healthy.describe()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(applied: Option<Condition>, healthy: Option<Condition>) -> ManagedResourceStatus {
        ManagedResourceStatus {
            observed_generation: Some(1),
            conditions: applied.into_iter().chain(healthy).collect(),
        }
    }

    #[test]
    fn test_converged_when_applied_and_healthy() {
        let s = status(
            Some(Condition::new(CONDITION_APPLIED, ConditionStatus::True)),
            Some(Condition::new(CONDITION_HEALTHY, ConditionStatus::True)),
        );
        assert_eq!(s.evaluate(Some(1)), ConvergenceState::Converged);
        assert!(matches!(s.evaluate(Some(2)), ConvergenceState::Pending(_)));
    }

    #[test]
    fn test_terminal_apply_reason_is_fatal() {
        let s = status(
            Some(
                Condition::new(CONDITION_APPLIED, ConditionStatus::False)
                    .with_reason("DecodingFailed", "could not decode a.yaml"),
            ),
            None,
        );
        assert!(s.evaluate(Some(1)).is_fatal());
    }

    #[test]
    fn test_apply_failure_is_transient() {
        let s = status(
            Some(
                Condition::new(CONDITION_APPLIED, ConditionStatus::False)
                    .with_reason("ApplyFailed", "webhook unavailable"),
            ),
            None,
        );
        assert!(matches!(
            s.evaluate(Some(1)),
            ConvergenceState::TransientError(reason) if reason.contains("webhook unavailable")
        ));
    }

    #[test]
    fn test_unhealthy_and_missing_conditions() {
        let unhealthy = status(
            Some(Condition::new(CONDITION_APPLIED, ConditionStatus::True)),
            Some(Condition::new(CONDITION_HEALTHY, ConditionStatus::False)),
        );
        assert!(matches!(unhealthy.evaluate(Some(1)), ConvergenceState::TransientError(_)));

        let missing = status(Some(Condition::new(CONDITION_APPLIED, ConditionStatus::True)), None);
        assert!(matches!(missing.evaluate(Some(1)), ConvergenceState::Pending(_)));

        assert!(matches!(
            ManagedResourceStatus::default().evaluate(None),
            ConvergenceState::Pending(_)
        ));
    }

    #[test]
    fn test_class_spec_value() {
        assert_eq!(BundleClass::Seed.spec_value(), Some("seed".to_string()));
        assert_eq!(BundleClass::Shoot.spec_value(), None);
        assert_eq!(BundleClass::from_spec_value(Some("seed")), BundleClass::Seed);
        assert_eq!(BundleClass::from_spec_value(None), BundleClass::Shoot);
        assert!("garden".parse::<BundleClass>().is_err());
    }

    #[test]
    fn test_spec_serialization() {
        let spec = ManagedResourceSpec {
            class: BundleClass::Seed.spec_value(),
            secret_refs: vec![SecretRef {
                name: "managedresource-istio-0a1b2c3d".to_string(),
            }],
            inject_labels: BTreeMap::new(),
            keep_objects: Some(false),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["class"], "seed");
        assert_eq!(value["secretRefs"][0]["name"], "managedresource-istio-0a1b2c3d");
        assert!(value.get("injectLabels").is_none());

        let parsed = ManagedResourceSpec::from_value(Some(&value)).unwrap();
        assert_eq!(parsed.secret_names(), vec!["managedresource-istio-0a1b2c3d"]);
    }
}
