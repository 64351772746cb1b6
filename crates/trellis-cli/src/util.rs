//! Shared utility functions for CLI commands

use std::path::Path;
use std::time::Duration;
use trellis_core::Payload;
use trellis_kube::Labels;
use walkdir::WalkDir;

use crate::error::{CliError, Result};

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Parse a `key=value` argument
pub fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

/// Parse a comma-separated `k=v,k=v` label set
pub fn parse_label_set(s: &str) -> std::result::Result<Labels, String> {
    s.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| parse_key_val(pair.trim()))
        .collect()
}

/// Parse a human-readable duration such as `90s` or `2m`
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Key under which a manifest file is stored: its path relative to the root, `/` replaced by `_`
#[must_use]
pub fn payload_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("_")
}

/// Read every manifest under `dir` into a payload
pub fn load_manifests(dir: &Path) -> Result<Payload> {
    if !dir.is_dir() {
        return Err(CliError::io_at(dir, "not a directory"));
    }

    let mut payload = Payload::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CliError::io_at(dir, e))?;
        let path = entry.path();
        let is_manifest = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
        if !entry.file_type().is_file() || !is_manifest {
            continue;
        }

        let relative = path.strip_prefix(dir).unwrap_or(path);
        let content = std::fs::read(path).map_err(|e| CliError::io_at(path, e))?;
        payload.insert(payload_key(relative), content);
    }
    Ok(payload)
}

/// Read a YAML or JSON document
pub fn load_document(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::io_at(path, e))?;
    serde_yaml::from_str(&content)
        .map_err(|e| CliError::usage(format!("{} is not valid YAML or JSON: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("role=pool").unwrap(),
            ("role".to_string(), "pool".to_string())
        );
        assert_eq!(parse_key_val("empty=").unwrap().1, "");
        assert!(parse_key_val("role").is_err());
        assert!(parse_key_val("=pool").is_err());
    }

    #[test]
    fn test_parse_label_set() {
        let set = parse_label_set("pool-name=a, kubernetes-version=1.31.2").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set["kubernetes-version"], "1.31.2");
        assert!(parse_label_set("a=1,b").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_load_manifests_flattens_paths() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("rbac")).unwrap();
        std::fs::write(tmp.path().join("deployment.yaml"), "kind: Deployment").unwrap();
        std::fs::write(tmp.path().join("rbac").join("role.yml"), "kind: Role").unwrap();
        std::fs::write(tmp.path().join("README.md"), "ignored").unwrap();

        let payload = load_manifests(tmp.path()).unwrap();

        assert_eq!(
            payload.keys().collect::<Vec<_>>(),
            vec!["deployment.yaml", "rbac_role.yml"]
        );
        assert_eq!(payload.get("rbac_role.yml"), Some(&b"kind: Role"[..]));
    }

    #[test]
    fn test_load_manifests_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let err = load_manifests(&tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }

    #[test]
    fn test_load_document_accepts_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("spec.json");
        std::fs::write(&path, r#"{"type": "calico"}"#).unwrap();
        assert_eq!(load_document(&path).unwrap()["type"], "calico");
    }
}
