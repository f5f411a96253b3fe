//! Environment tree: composites of sub-environments with stacks at the leaves.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispatch::Dispatchable;
use crate::error::{Error, Result};
use crate::naming::{self, PATH_SEPARATOR};
use crate::stack::{Stack, StackConfig};
use crate::utils::io::read_file;

/// One level of `environments.json`.
///
/// ```json
/// {
///   "environments": {
///     "dev": { "stacks": { "vpc": { "template_path": "templates/vpc.yaml" } } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stacks: BTreeMap<String, StackConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// Load an environment tree from JSON, or YAML for `.yaml`/`.yml` files.
pub fn load_environments(path: &Path) -> Result<EnvironmentConfig> {
    let content = read_file(path, "read environments")?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");

    if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
    } else {
        serde_yml::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentNode {
    Stack(Stack),
    Environment {
        /// Logical path of the environment; empty for the root.
        name: String,
        children: BTreeMap<String, EnvironmentNode>,
    },
}

fn child_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}{}{}", parent, PATH_SEPARATOR, child)
    }
}

fn validate_segment(key: &str, parent: &str) -> Result<()> {
    if key.contains(PATH_SEPARATOR) {
        return Err(Error::config_invalid_value(
            "name",
            Some(key.to_string()),
            format!(
                "Names under '{}' must be a single segment",
                if parent.is_empty() { "<root>" } else { parent }
            ),
        ));
    }
    Ok(())
}

impl EnvironmentNode {
    /// Build the tree rooted at `path` (empty for the project root).
    ///
    /// Every stack becomes a leaf named by its full logical path. A stack and
    /// a sub-environment with the same name at one level is a
    /// `config.id_collision`, and so are two stacks whose external names
    /// coincide (`dev/a-b` and `dev-a/b`).
    pub fn from_config(project_code: &str, path: &str, config: EnvironmentConfig) -> Result<Self> {
        let node = Self::build(project_code, path, config)?;
        node.check_external_names()?;
        Ok(node)
    }

    fn build(project_code: &str, path: &str, config: EnvironmentConfig) -> Result<Self> {
        let mut children = BTreeMap::new();

        for (key, stack_config) in config.stacks {
            validate_segment(&key, path)?;
            let stack = Stack::new(&child_path(path, &key), project_code, stack_config)?;
            children.insert(key, EnvironmentNode::Stack(stack));
        }

        for (key, environment) in config.environments {
            validate_segment(&key, path)?;
            let full = child_path(path, &key);
            naming::validate_path(&full)?;

            if children.contains_key(&key) {
                return Err(Error::config_id_collision(full, "environment", "stack"));
            }

            let node = Self::build(project_code, &full, environment)?;
            children.insert(key, node);
        }

        Ok(EnvironmentNode::Environment {
            name: path.to_string(),
            children,
        })
    }

    fn check_external_names(&self) -> Result<()> {
        let mut seen: BTreeMap<String, &str> = BTreeMap::new();
        for stack in self.stacks() {
            let external_name = stack.external_name();
            if let Some(existing) = seen.get(&external_name) {
                return Err(Error::config_external_name_collision(
                    external_name,
                    *existing,
                    stack.name.as_str(),
                ));
            }
            seen.insert(external_name, &stack.name);
        }
        Ok(())
    }

    pub fn path(&self) -> &str {
        match self {
            EnvironmentNode::Stack(stack) => &stack.name,
            EnvironmentNode::Environment { name, .. } => name,
        }
    }

    pub fn as_stack(&self) -> Option<&Stack> {
        match self {
            EnvironmentNode::Stack(stack) => Some(stack),
            EnvironmentNode::Environment { .. } => None,
        }
    }

    /// Select the sub-tree at `path`. An empty path selects this node.
    pub fn find(&self, path: &str) -> Result<&EnvironmentNode> {
        let mut node = self;
        if path.is_empty() {
            return Ok(node);
        }

        for segment in naming::path_segments(path) {
            let next = match node {
                EnvironmentNode::Environment { children, .. } => children.get(segment),
                EnvironmentNode::Stack(_) => None,
            };
            node = next.ok_or_else(|| Error::environment_not_found(path, self.all_paths()))?;
        }
        Ok(node)
    }

    /// Every stack under this node, depth first in name order.
    pub fn stacks(&self) -> Vec<&Stack> {
        match self {
            EnvironmentNode::Stack(stack) => vec![stack],
            EnvironmentNode::Environment { children, .. } => {
                children.values().flat_map(|child| child.stacks()).collect()
            }
        }
    }

    pub fn leaf_names(&self) -> Vec<String> {
        self.stacks().into_iter().map(|s| s.name.clone()).collect()
    }

    /// Every environment and stack path below this node.
    pub fn all_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        if let EnvironmentNode::Environment { children, .. } = self {
            for child in children.values() {
                paths.push(child.path().to_string());
                paths.extend(child.all_paths());
            }
        }
        paths
    }
}

impl Dispatchable for EnvironmentNode {
    fn name(&self) -> &str {
        self.path()
    }

    fn is_leaf(&self) -> bool {
        matches!(self, EnvironmentNode::Stack(_))
    }

    fn children(&self) -> Vec<&Self> {
        match self {
            EnvironmentNode::Stack(_) => Vec::new(),
            EnvironmentNode::Environment { children, .. } => children.values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{recurse_into_sub_environments, DispatchMode};
    use std::fs;
    use tempfile::TempDir;

    const TREE: &str = r#"
stacks:
  dns:
    template_path: templates/dns.yaml
environments:
  dev:
    environments:
      ew1:
        stacks:
          vpc:
            template_path: templates/vpc.yaml
          subnet:
            template_path: templates/subnet.yaml
            protect: true
  prod:
    stacks:
      vpc:
        template_path: templates/vpc.yaml
"#;

    fn tree() -> EnvironmentNode {
        let config: EnvironmentConfig = serde_yml::from_str(TREE).unwrap();
        EnvironmentNode::from_config("prj", "", config).unwrap()
    }

    #[test]
    fn leaves_are_named_by_full_path() {
        assert_eq!(
            tree().leaf_names(),
            vec!["dev/ew1/subnet", "dev/ew1/vpc", "dns", "prod/vpc"]
        );
    }

    #[test]
    fn find_selects_sub_tree() {
        let root = tree();
        let dev = root.find("dev").unwrap();
        assert_eq!(dev.path(), "dev");
        assert_eq!(dev.leaf_names(), vec!["dev/ew1/subnet", "dev/ew1/vpc"]);

        let subnet = root.find("dev/ew1/subnet").unwrap().as_stack().unwrap();
        assert!(subnet.config.protect);
        assert_eq!(subnet.external_name(), "prj-dev-ew1-subnet");

        assert_eq!(root.find("").unwrap().path(), "");
    }

    #[test]
    fn find_unknown_path_lists_available() {
        let err = tree().find("staging/vpc").unwrap_err();
        assert_eq!(err.code.as_str(), "environment.not_found");
        assert!(err.details["available"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "dev/ew1/vpc"));
    }

    #[test]
    fn stack_and_environment_sharing_a_name_collide() {
        let config: EnvironmentConfig = serde_json::from_str(
            r#"{"stacks": {"dev": {}}, "environments": {"dev": {}}}"#,
        )
        .unwrap();
        let err = EnvironmentNode::from_config("prj", "", config).unwrap_err();
        assert_eq!(err.code.as_str(), "config.id_collision");
    }

    #[test]
    fn stacks_mapping_to_one_external_name_collide() {
        let config: EnvironmentConfig = serde_json::from_str(
            r#"{"environments": {"dev": {"stacks": {"a-b": {}}}, "dev-a": {"stacks": {"b": {}}}}}"#,
        )
        .unwrap();

        let err = EnvironmentNode::from_config("prj", "", config).unwrap_err();
        assert_eq!(err.code.as_str(), "config.id_collision");
        assert_eq!(err.details["externalName"], "prj-dev-a-b");
        assert_eq!(err.details["paths"], serde_json::json!(["dev/a-b", "dev-a/b"]));
    }

    #[test]
    fn names_must_be_single_segments() {
        let config: EnvironmentConfig =
            serde_json::from_str(r#"{"stacks": {"dev/vpc": {}}}"#).unwrap();
        let err = EnvironmentNode::from_config("prj", "", config).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn dispatch_over_tree_reports_every_leaf() {
        let root = tree();
        let results = recurse_into_sub_environments(
            root.find("dev").unwrap(),
            DispatchMode::Parallel,
            &|node: &EnvironmentNode| node.as_stack().map(|s| s.external_name()),
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(
            results["dev/ew1/vpc"].as_deref(),
            Some("prj-dev-ew1-vpc")
        );
    }

    #[test]
    fn load_environments_reads_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("environments.yaml");
        fs::write(&yaml, TREE).unwrap();
        let json = dir.path().join("environments.json");
        fs::write(&json, r#"{"stacks": {"vpc": {"template_path": "vpc.yaml"}}}"#).unwrap();

        assert_eq!(load_environments(&yaml).unwrap().environments.len(), 2);
        assert_eq!(
            load_environments(&json).unwrap().stacks["vpc"].template_path,
            "vpc.yaml"
        );
    }

    #[test]
    fn load_environments_reports_malformed_files() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("environments.json");
        fs::write(&json, "{ nope").unwrap();

        let err = load_environments(&json).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_json");
    }
}
