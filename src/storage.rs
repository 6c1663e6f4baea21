//! JSON file persistence
//!
//! Every state file is wrapped in a small versioned envelope and rewritten
//! wholesale: serialize to a sibling temp file, then rename over the target.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

pub const STORAGE_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: String,
    pub saved_at: DateTime<Utc>,
    pub data: T,
}

/// Load a state file. A missing file yields `None`.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Persistence(format!("read {}: {}", path.display(), e)))?;

    let envelope: Envelope<T> = serde_json::from_str(&raw)
        .map_err(|e| Error::Persistence(format!("parse {}: {}", path.display(), e)))?;

    if envelope.version != STORAGE_VERSION {
        debug!(
            "{} has version {}, expected {}",
            path.display(),
            envelope.version,
            STORAGE_VERSION
        );
    }

    Ok(Some(envelope.data))
}

/// Overwrite a state file with `data`
pub async fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("mkdir {}: {}", parent.display(), e)))?;
        }
    }

    let envelope = Envelope {
        version: STORAGE_VERSION.to_string(),
        saved_at: Utc::now(),
        data,
    };
    let json = serde_json::to_string_pretty(&envelope)?;

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| Error::Persistence(format!("write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Persistence(format!("rename {}: {}", path.display(), e)))?;

    debug!("Saved {}", path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<HashMap<String, f64>> =
            load_json(&dir.path().join("nope.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut data = HashMap::new();
        data.insert("a".to_string(), 1.5);
        save_json(&path, &data).await.unwrap();

        assert!(!temp_path(&path).exists());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"version\": \"1.0\""));

        let loaded: HashMap<String, f64> = load_json(&path).await.unwrap().unwrap();
        assert_eq!(loaded.get("a"), Some(&1.5));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_json::<HashMap<String, f64>>(&path).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
