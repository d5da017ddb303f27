//! Dev-mode convenience: populate the in-memory catalog from a directory of
//! playbook YAML files at startup. Not part of the core's contract — a
//! production deployment fronts `CatalogClient` with a real resource store
//! (§1) — but without *something* registering playbooks, the broker's
//! initial dispatch can never resolve a `(path, version)`.

use std::path::Path;

use flowline_core::catalog::InMemoryCatalog;

pub fn load_dir(catalog: &InMemoryCatalog, dir: &str) -> anyhow::Result<usize> {
    let mut loaded = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !is_yaml(&path) {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&content)?;
        let playbook_path = doc
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown"))
            .to_string();
        let version = doc
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("0.0.0")
            .to_string();
        catalog.put(&playbook_path, &version, content)?;
        loaded += 1;
    }
    Ok(loaded)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::catalog::CatalogClient;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("flowline_catalog_loader_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn loads_every_yaml_file_and_skips_non_yaml_entries() {
        let dir = scratch_dir("loads_every_yaml");
        std::fs::write(dir.join("a.yaml"), "path: demo/a\nversion: \"1.0\"\nsteps: []\n").unwrap();
        std::fs::write(dir.join("b.yml"), "path: demo/b\nsteps: []\n").unwrap();
        std::fs::write(dir.join("readme.txt"), "not a playbook").unwrap();

        let catalog = InMemoryCatalog::new();
        let loaded = load_dir(&catalog, dir.to_str().unwrap()).unwrap();
        assert_eq!(loaded, 2);

        assert!(catalog.fetch_entry("demo/a", Some("1.0")).await.unwrap().is_some());
        // b.yml has no `version` field; falls back to the "0.0.0" default.
        assert!(catalog.fetch_entry("demo/b", Some("0.0.0")).await.unwrap().is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn is_yaml_matches_yaml_and_yml_only() {
        assert!(is_yaml(Path::new("x.yaml")));
        assert!(is_yaml(Path::new("x.yml")));
        assert!(!is_yaml(Path::new("x.json")));
        assert!(!is_yaml(Path::new("x")));
    }
}
