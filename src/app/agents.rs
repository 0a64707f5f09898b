//! Agent manifests discovered in a directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AgentryError, Result};
use crate::manifest::Manifest;

const MANIFEST_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Name, title and description of an available agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
}

/// Manifests in one directory, keyed by file stem.
#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    dir: PathBuf,
    paths: BTreeMap<String, PathBuf>,
}

impl AgentDirectory {
    /// Scan `dir` for `.json`, `.yaml` and `.yml` manifests.
    pub fn scan(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut paths = BTreeMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            AgentryError::Configuration(format!(
                "cannot read agents directory {}: {e}",
                dir.display()
            ))
        })?;
        for entry in entries {
            let path = entry?.path();
            let is_manifest = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| MANIFEST_EXTENSIONS.contains(&e));
            if !is_manifest {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                if paths.insert(name.to_string(), path.clone()).is_some() {
                    warn!(agent = %name, path = %path.display(), "duplicate agent name, keeping the last one");
                }
            }
        }
        debug!(dir = %dir.display(), agents = paths.len(), "scanned agents");
        Ok(Self { dir, paths })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.paths.contains_key(name)
    }

    /// Parse the manifest for `name`.
    pub fn load(&self, name: &str) -> Result<Arc<Manifest>> {
        let path = self
            .paths
            .get(name)
            .ok_or_else(|| AgentryError::Configuration(format!("unknown agent {name}")))?;
        Ok(Arc::new(Manifest::from_path(path)?))
    }

    /// Summaries of every agent whose manifest parses.
    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.paths
            .keys()
            .filter_map(|name| match self.load(name) {
                Ok(manifest) => Some(AgentSummary {
                    name: name.clone(),
                    title: manifest.title().to_string(),
                    description: manifest.description().map(str::to_string),
                }),
                Err(err) => {
                    warn!(agent = %name, error = %err, "skipping unreadable manifest");
                    None
                }
            })
            .collect()
    }

    /// Render the hand-off list for `{agents}`, one `name: description`
    /// line per agent in `names`.
    pub fn describe(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|name| match self.load(name) {
                Ok(manifest) => match manifest.description() {
                    Some(desc) => format!("{name}: {desc}"),
                    None => format!("{name}: {}", manifest.title()),
                },
                Err(_) => name.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
