//! Precondition checks run before any API request
//!
//! These mirror the API server's own validation closely enough that a bad
//! name fails fast with a readable error instead of a rejected request.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, Result};

static DNS1123_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

static DNS1123_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid regex")
});

static LABEL_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("valid regex"));

static SECRET_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").expect("valid regex"));

const MAX_LABEL_LENGTH: usize = 63;
const MAX_SUBDOMAIN_LENGTH: usize = 253;

fn invalid(what: &'static str, value: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidName {
        what,
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Object names: DNS-1123 subdomain
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("name", name, "must not be empty"));
    }
    if name.len() > MAX_SUBDOMAIN_LENGTH {
        return Err(invalid(
            "name",
            name,
            format!("must be at most {} characters", MAX_SUBDOMAIN_LENGTH),
        ));
    }
    if !DNS1123_SUBDOMAIN.is_match(name) {
        return Err(invalid(
            "name",
            name,
            "must consist of lower case alphanumerics, '-' or '.'",
        ));
    }
    Ok(())
}

/// Namespaces: DNS-1123 label
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(invalid("namespace", namespace, "must not be empty"));
    }
    if namespace.len() > MAX_LABEL_LENGTH || !DNS1123_LABEL.is_match(namespace) {
        return Err(invalid(
            "namespace",
            namespace,
            "must be a DNS-1123 label of at most 63 characters",
        ));
    }
    Ok(())
}

/// Label values: at most 63 characters, alphanumeric at both ends
pub fn validate_label_value(value: &str) -> Result<()> {
    if value.len() > MAX_LABEL_LENGTH || !LABEL_VALUE.is_match(value) {
        return Err(invalid(
            "label value",
            value,
            "must be at most 63 characters and start and end with an alphanumeric",
        ));
    }
    Ok(())
}

/// Label keys: optional DNS subdomain prefix, then a name segment
pub fn validate_label_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        validate_name(prefix).map_err(|_| invalid("label key", key, "prefix must be a DNS subdomain"))?;
    }
    if name.is_empty() || name.len() > MAX_LABEL_LENGTH || !LABEL_VALUE.is_match(name) {
        return Err(invalid(
            "label key",
            key,
            "name segment must be 1-63 characters and start and end with an alphanumeric",
        ));
    }
    Ok(())
}

/// Keys of a Secret's `data` map
pub fn validate_payload_key(key: &str) -> Result<()> {
    if SECRET_KEY.is_match(key) {
        Ok(())
    } else {
        Err(CoreError::InvalidPayloadKey {
            key: key.to_string(),
        })
    }
}
