//! Catalog Client (C3): read-only (path, version) -> playbook lookup.
//!
//! The core treats the catalog as an external collaborator with a narrow,
//! immutable interface: versions are never mutated in place, and a miss is
//! a normal `Ok(None)`, not an error. `InMemoryCatalog` backs tests and the
//! API's dev mode; a production deployment fronts this trait with a real
//! resource store (out of scope of this spec per §1).

use std::collections::HashMap;

use async_trait::async_trait;
use flowline_contracts::Playbook;
use parking_lot::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("malformed playbook at {path}@{version}: {source}")]
    Parse {
        path: String,
        version: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("catalog backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CatalogClient: Send + Sync + 'static {
    /// Fetch a playbook's raw content and parsed tree. `None` if `version`
    /// is given and not found, or if `path` has no entries at all.
    async fn fetch_entry(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<Option<(String, Playbook)>, CatalogError>;

    /// Highest semver-sortable version known for `path`, if any.
    async fn get_latest_version(&self, path: &str) -> Result<Option<String>, CatalogError>;
}

/// In-process catalog keyed by `(path, version)`, content pre-parsed on
/// insert. Versions are compared with a simple dotted-numeric ordering
/// (sufficient for `x.y.z` style strings; non-numeric segments sort
/// lexically after numeric ones).
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<String, HashMap<String, (String, Playbook)>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, version: &str, content: String) -> Result<(), CatalogError> {
        let playbook: Playbook =
            serde_yaml::from_str(&content).map_err(|source| CatalogError::Parse {
                path: path.to_string(),
                version: version.to_string(),
                source,
            })?;
        self.entries
            .write()
            .entry(path.to_string())
            .or_default()
            .insert(version.to_string(), (content, playbook));
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn fetch_entry(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<Option<(String, Playbook)>, CatalogError> {
        let entries = self.entries.read();
        let Some(versions) = entries.get(path) else {
            return Ok(None);
        };
        let version = match version {
            Some(v) => v.to_string(),
            None => match latest_version(versions.keys()) {
                Some(v) => v,
                None => return Ok(None),
            },
        };
        Ok(versions.get(&version).cloned())
    }

    async fn get_latest_version(&self, path: &str) -> Result<Option<String>, CatalogError> {
        let entries = self.entries.read();
        Ok(entries.get(path).and_then(|v| latest_version(v.keys())))
    }
}

fn latest_version<'a>(versions: impl Iterator<Item = &'a String>) -> Option<String> {
    versions
        .max_by(|a, b| compare_versions(a, b))
        .map(|v| v.to_string())
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split('.')
            .map(|seg| seg.parse().unwrap_or(0))
            .collect()
    };
    parse(a).cmp(&parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PB: &str = "path: p1\nversion: 0.1.0\nworkflow:\n  - step: start\n    type: http\n    next: []\n";

    #[tokio::test]
    async fn fetch_by_explicit_version() {
        let cat = InMemoryCatalog::new();
        cat.put("p1", "0.1.0", PB.to_string()).unwrap();
        let (content, playbook) = cat.fetch_entry("p1", Some("0.1.0")).await.unwrap().unwrap();
        assert_eq!(content, PB);
        assert_eq!(playbook.path, "p1");
    }

    #[tokio::test]
    async fn fetch_without_version_resolves_latest() {
        let cat = InMemoryCatalog::new();
        cat.put("p1", "0.1.0", PB.to_string()).unwrap();
        cat.put("p1", "0.2.0", PB.to_string()).unwrap();
        assert_eq!(
            cat.get_latest_version("p1").await.unwrap(),
            Some("0.2.0".to_string())
        );
        let (_, playbook) = cat.fetch_entry("p1", None).await.unwrap().unwrap();
        assert_eq!(playbook.path, "p1");
    }

    #[tokio::test]
    async fn unknown_path_is_none_not_error() {
        let cat = InMemoryCatalog::new();
        assert!(cat.fetch_entry("missing", None).await.unwrap().is_none());
    }
}
