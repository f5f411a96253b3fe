//! Name-keyed registry of pluggable capabilities (resolvers and hooks).
//!
//! Implementations come from two places: a static registration table compiled
//! into the binary, and directories of declarative manifests that describe
//! command-backed implementations. Either way the registry key is the
//! implementation's PascalCase type name in snake_case.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::naming::camel_to_snake;

/// Shared supertype of everything the registry can hold.
pub trait Capability: Send + Sync {
    /// PascalCase type name the registry key is derived from.
    fn type_name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Resolver,
    Hook,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Resolver => write!(f, "resolver"),
            CapabilityKind::Hook => write!(f, "hook"),
        }
    }
}

/// On-disk description of a command-backed capability.
///
/// ```json
/// { "name": "VaultSecret", "kind": "resolver", "command": "vault read -field=value {{argument}}" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub name: String,
    pub kind: CapabilityKind,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub source: PathBuf,
}

/// A capability family that the registry knows how to populate.
pub trait Discoverable: Capability {
    const KIND: CapabilityKind;

    /// Statically registered implementations.
    fn builtin() -> Vec<Arc<Self>>;

    fn from_manifest(manifest: CapabilityManifest) -> Arc<Self>;
}

/// Summary row for listing a registry.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityEntry {
    pub key: String,
    pub type_name: String,
    pub kind: CapabilityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub struct CapabilityRegistry<C: ?Sized> {
    entries: BTreeMap<String, Arc<C>>,
}

impl<C: ?Sized> Default for CapabilityRegistry<C> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<C: Discoverable + ?Sized> CapabilityRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the compiled-in implementations.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for implementation in C::builtin() {
            registry.register(implementation)?;
        }
        Ok(registry)
    }

    /// Compiled-in implementations plus every manifest directory in `dirs`.
    pub fn discover(dirs: &[PathBuf]) -> Result<Self> {
        let mut registry = Self::builtin()?;
        for dir in dirs {
            registry.scan_dir(dir)?;
        }
        Ok(registry)
    }

    /// Add one implementation. Two implementations mapping to the same key
    /// fail with `capability.key_collision`.
    pub fn register(&mut self, implementation: Arc<C>) -> Result<()> {
        let key = camel_to_snake(implementation.type_name());
        if key.is_empty() {
            return Err(Error::validation_invalid_argument(
                "name",
                format!("{} name cannot be empty", C::KIND),
                None,
                None,
            ));
        }

        if let Some(existing) = self.entries.get(&key) {
            return Err(Error::capability_key_collision(
                key,
                existing.type_name(),
                implementation.type_name(),
            ));
        }

        self.entries.insert(key, implementation);
        Ok(())
    }

    /// Register every manifest of this registry's kind found in `dir`.
    ///
    /// `dir` must be an existing directory and must yield at least one usable
    /// manifest; manifests of another kind are skipped. Keys are checked for
    /// every manifest before any is registered, so a failed scan leaves the
    /// registry unchanged.
    pub fn scan_dir(&mut self, dir: &Path) -> Result<usize> {
        let manifests = load_manifests(dir)?;
        let usable: Vec<_> = manifests
            .into_iter()
            .filter(|manifest| manifest.kind == C::KIND)
            .collect();

        if usable.is_empty() {
            return Err(Error::capability_invalid_source(
                dir.display().to_string(),
                format!("No {} manifests found", C::KIND),
            ));
        }

        let mut staged = Self::new();
        let mut sources = Vec::with_capacity(usable.len());
        for manifest in usable {
            sources.push((manifest.name.clone(), manifest.source.clone()));
            staged.register(C::from_manifest(manifest))?;
        }

        for (key, implementation) in &staged.entries {
            if let Some(existing) = self.entries.get(key) {
                return Err(Error::capability_key_collision(
                    key.clone(),
                    existing.type_name(),
                    implementation.type_name(),
                ));
            }
        }

        self.entries.extend(staged.entries);
        for (name, source) in &sources {
            log_status!(
                "capabilities",
                "Registered {} '{}' from {}",
                C::KIND,
                name,
                source.display()
            );
        }
        Ok(sources.len())
    }

    pub fn get(&self, key: &str) -> Result<Arc<C>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| Error::capability_not_found(key, self.keys()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<CapabilityEntry> {
        self.entries
            .iter()
            .map(|(key, implementation)| CapabilityEntry {
                key: key.clone(),
                type_name: implementation.type_name().to_string(),
                kind: C::KIND,
                description: implementation.description().map(str::to_string),
            })
            .collect()
    }
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "json" | "yaml" | "yml"))
}

/// Read every manifest in `dir`, sorted by file name.
pub fn load_manifests(dir: &Path) -> Result<Vec<CapabilityManifest>> {
    if !dir.is_dir() {
        return Err(Error::capability_invalid_source(
            dir.display().to_string(),
            "Capability source is not a directory",
        ));
    }

    let entries = fs::read_dir(dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_manifest_file(path))
        .collect();
    paths.sort();

    paths.iter().map(|path| load_manifest(path)).collect()
}

fn load_manifest(path: &Path) -> Result<CapabilityManifest> {
    let content = crate::utils::io::read_file(path, "read capability manifest")?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");

    let mut manifest: CapabilityManifest = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?
    } else {
        serde_yml::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?
    };

    if manifest.command.trim().is_empty() {
        return Err(Error::config_invalid_value(
            "command",
            None,
            format!("Manifest {} has an empty command", path.display()),
        ));
    }

    manifest.source = path.to_path_buf();
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    trait Greeter: Capability {}

    struct Named {
        name: String,
    }

    impl Capability for Named {
        fn type_name(&self) -> &str {
            &self.name
        }
    }

    impl Greeter for Named {}

    impl Discoverable for dyn Greeter {
        const KIND: CapabilityKind = CapabilityKind::Resolver;

        fn builtin() -> Vec<Arc<Self>> {
            ["Bash", "ASGScheduledActions"]
                .into_iter()
                .map(|name| {
                    Arc::new(Named {
                        name: name.to_string(),
                    }) as Arc<dyn Greeter>
                })
                .collect()
        }

        fn from_manifest(manifest: CapabilityManifest) -> Arc<Self> {
            Arc::new(Named {
                name: manifest.name,
            })
        }
    }

    fn write(dir: &Path, file: &str, content: &str) {
        fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn builtin_entries_are_keyed_in_snake_case() {
        let registry = CapabilityRegistry::<dyn Greeter>::builtin().unwrap();
        assert_eq!(registry.keys(), vec!["asg_scheduled_actions", "bash"]);
        assert_eq!(registry.get("bash").unwrap().type_name(), "Bash");
    }

    #[test]
    fn scan_dir_registers_matching_manifests() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "vault.json",
            r#"{"name": "VaultSecret", "kind": "resolver", "command": "echo {{argument}}"}"#,
        );
        write(
            dir.path(),
            "notify.yaml",
            "name: SlackNotify\nkind: hook\ncommand: echo notify\n",
        );
        write(dir.path(), "README.md", "not a manifest");

        let mut registry = CapabilityRegistry::<dyn Greeter>::new();
        let count = registry.scan_dir(dir.path()).unwrap();

        assert_eq!(count, 1);
        assert_eq!(registry.keys(), vec!["vault_secret"]);
    }

    #[test]
    fn scan_dir_rejects_non_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("manifest.json");
        fs::write(&file, "{}").unwrap();

        let mut registry = CapabilityRegistry::<dyn Greeter>::new();
        let err = registry.scan_dir(&file).unwrap_err();
        assert_eq!(err.code.as_str(), "capability.invalid_source");

        let err = registry
            .scan_dir(&dir.path().join("missing"))
            .unwrap_err();
        assert_eq!(err.code.as_str(), "capability.invalid_source");
    }

    #[test]
    fn scan_dir_without_usable_manifests_fails() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "notify.json",
            r#"{"name": "SlackNotify", "kind": "hook", "command": "echo"}"#,
        );

        let mut registry = CapabilityRegistry::<dyn Greeter>::new();
        let err = registry.scan_dir(dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "capability.invalid_source");
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_keys_fail_fast() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "bash.json",
            r#"{"name": "Bash", "kind": "resolver", "command": "echo"}"#,
        );

        let err = CapabilityRegistry::<dyn Greeter>::discover(&[dir.path().to_path_buf()])
            .err()
            .unwrap();
        assert_eq!(err.code.as_str(), "capability.key_collision");
        assert_eq!(err.details["key"], "bash");
    }

    #[test]
    fn failed_scan_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "a_vault.json",
            r#"{"name": "VaultSecret", "kind": "resolver", "command": "echo"}"#,
        );
        write(
            dir.path(),
            "b_bash.json",
            r#"{"name": "Bash", "kind": "resolver", "command": "echo"}"#,
        );

        let mut registry = CapabilityRegistry::<dyn Greeter>::builtin().unwrap();
        let err = registry.scan_dir(dir.path()).unwrap_err();

        assert_eq!(err.code.as_str(), "capability.key_collision");
        assert_eq!(registry.keys(), vec!["asg_scheduled_actions", "bash"]);
        assert!(!registry.contains("vault_secret"));
    }

    #[test]
    fn malformed_manifest_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "broken.json", "{ not json");

        let mut registry = CapabilityRegistry::<dyn Greeter>::new();
        let err = registry.scan_dir(dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_json");
    }

    #[test]
    fn unknown_key_lists_available() {
        let registry = CapabilityRegistry::<dyn Greeter>::builtin().unwrap();
        let err = registry.get("nope").err().unwrap();
        assert_eq!(err.code.as_str(), "capability.not_found");
        assert_eq!(err.details["available"][0], "asg_scheduled_actions");
    }
}
