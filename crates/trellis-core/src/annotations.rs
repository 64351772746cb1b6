//! Operation annotations understood by downstream controllers
//!
//! The keys and values in this module are a compatibility surface: the
//! extension controllers and the resource manager read them verbatim, so
//! they must never be renamed.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Verb the downstream controller should execute next
pub const OPERATION: &str = "gardener.cloud/operation";

/// Wall-clock marker written with every operation change
pub const TIMESTAMP: &str = "gardener.cloud/timestamp";

/// Must be `"true"` before an extension resource may be deleted
pub const CONFIRM_DELETION: &str = "confirmation.gardener.cloud/deletion";

/// Operation requested through the [`OPERATION`] annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Reconcile,
    Restore,
    Migrate,
    WaitForState,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Reconcile => "reconcile",
            Operation::Restore => "restore",
            Operation::Migrate => "migrate",
            Operation::WaitForState => "wait-for-state",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reconcile" => Ok(Operation::Reconcile),
            "restore" => Ok(Operation::Restore),
            "migrate" => Ok(Operation::Migrate),
            "wait-for-state" => Ok(Operation::WaitForState),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

/// Read the pending operation, if any
///
/// Returns the raw value so that operations this crate does not know
/// (set by other actors) still count as pending.
pub fn pending_operation(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations
        .get(OPERATION)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Format a timestamp the way the downstream controllers parse it
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Write `operation` and a fresh timestamp
///
/// The timestamp is strictly later than the one already present, so a
/// controller comparing timestamps never mistakes a new request for a stale
/// one, even when the local clock lags behind whoever wrote the previous value.
pub fn stamp(annotations: &mut BTreeMap<String, String>, operation: Operation, now: DateTime<Utc>) {
    let previous = annotations
        .get(TIMESTAMP)
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc));

    let at = match previous {
        Some(previous) if previous >= now => previous + Duration::nanoseconds(1),
        _ => now,
    };

    annotations.insert(OPERATION.to_string(), operation.as_str().to_string());
    annotations.insert(TIMESTAMP.to_string(), format_timestamp(at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_operation_roundtrip() {
        for op in [
            Operation::Reconcile,
            Operation::Restore,
            Operation::Migrate,
            Operation::WaitForState,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("delete".parse::<Operation>().is_err());
    }

    #[test]
    fn test_operation_serde_values() {
        assert_eq!(
            serde_json::to_string(&Operation::WaitForState).unwrap(),
            "\"wait-for-state\""
        );
    }

    #[test]
    fn test_stamp_sets_operation_and_timestamp() {
        let mut annotations = BTreeMap::new();
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

        stamp(&mut annotations, Operation::Reconcile, now);

        assert_eq!(pending_operation(&annotations), Some("reconcile"));
        assert_eq!(
            annotations.get(TIMESTAMP).map(String::as_str),
            Some("2026-10-18T12:00:00.000000000Z")
        );
    }

    #[test]
    fn test_stamp_is_monotonic() {
        let mut annotations = BTreeMap::new();
        let later = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let earlier = later - Duration::seconds(5);

        stamp(&mut annotations, Operation::Reconcile, later);
        stamp(&mut annotations, Operation::Migrate, earlier);

        assert_eq!(
            annotations.get(TIMESTAMP).map(String::as_str),
            Some("2026-10-18T12:00:00.000000001Z")
        );
        assert_eq!(pending_operation(&annotations), Some("migrate"));
    }

    #[test]
    fn test_empty_operation_is_not_pending() {
        let mut annotations = BTreeMap::new();
        annotations.insert(OPERATION.to_string(), String::new());
        assert_eq!(pending_operation(&annotations), None);
    }
}
