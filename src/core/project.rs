//! A loaded project: settings, environment tree and capability registries,
//! plus the dispatcher that runs stack operations over a selected sub-tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::connection::{ConnectionManager, ControlPlane, HttpControlPlane};
use crate::dispatch::recurse_into_sub_environments;
use crate::environment::{load_environments, EnvironmentNode};
use crate::error::{Error, Result};
use crate::hooks::Hook;
use crate::naming;
use crate::paths;
use crate::registry::{CapabilityEntry, CapabilityRegistry};
use crate::resolvers::Resolver;
use crate::retry::{Sleeper, ThreadSleeper};
use crate::settings::{self, Settings};
use crate::stack::{Stack, StackRunner, StackStatus, TemplateValidation};

/// Per-leaf results of a dispatched operation, keyed by stack path.
pub type LeafResults<T> = BTreeMap<String, Result<T>>;

pub struct Project {
    pub dir: PathBuf,
    pub settings: Settings,
    pub root: EnvironmentNode,
    pub resolvers: CapabilityRegistry<dyn Resolver>,
    pub hooks: CapabilityRegistry<dyn Hook>,
}

impl Project {
    /// Load `strata.json`, the environment tree and every capability
    /// directory from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let settings = settings::load(dir)?;
        Self::from_settings(dir, settings)
    }

    pub fn from_settings(dir: &Path, settings: Settings) -> Result<Self> {
        let environments_path = paths::environments_file(dir, &settings.environments_file);
        let environments = load_environments(&environments_path)?;
        let root = EnvironmentNode::from_config(&settings.project_code, "", environments)?;

        let resolvers = CapabilityRegistry::discover(&paths::capability_dirs(
            dir,
            &settings.capabilities.resolver_dirs,
        ))?;
        let hooks = CapabilityRegistry::discover(&paths::capability_dirs(
            dir,
            &settings.capabilities.hook_dirs,
        ))?;

        log_status!(
            "project",
            "Loaded {} ({} stacks, {} resolvers, {} hooks)",
            settings.project_code,
            root.stacks().len(),
            resolvers.len(),
            hooks.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
            root,
            resolvers,
            hooks,
        })
    }

    /// External name of the stack or environment at `path`.
    pub fn external_name(&self, path: &str) -> Result<String> {
        naming::validate_path(path)?;
        self.root.find(path)?;
        Ok(naming::external_name(&self.settings.project_code, path))
    }

    pub fn capabilities(&self) -> Vec<CapabilityEntry> {
        let mut entries = self.resolvers.entries();
        entries.extend(self.hooks.entries());
        entries
    }

    /// Connect to the configured HTTP control plane.
    pub fn connect(&self) -> Result<Orchestrator<'_>> {
        let endpoint = self.settings.endpoint.as_deref().unwrap_or_default();
        let plane = HttpControlPlane::new(endpoint, self.settings.region.clone())?;
        Ok(self.orchestrator(Arc::new(plane), Arc::new(ThreadSleeper)))
    }

    /// Orchestrate against any control plane. `sleeper` serves both the retry
    /// backoff and the completion polling.
    pub fn orchestrator(
        &self,
        plane: Arc<dyn ControlPlane>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Orchestrator<'_> {
        let retry = self.settings.retry_policy().with_sleeper(sleeper.clone());
        Orchestrator {
            project: self,
            connection: ConnectionManager::new(plane, retry),
            sleeper,
        }
    }
}

/// Runs stack operations over sub-trees of a project.
pub struct Orchestrator<'a> {
    project: &'a Project,
    connection: ConnectionManager,
    sleeper: Arc<dyn Sleeper>,
}

impl<'a> Orchestrator<'a> {
    pub fn runner(&self) -> StackRunner<'_> {
        StackRunner::new(
            &self.connection,
            &self.project.resolvers,
            &self.project.hooks,
            &self.project.dir,
        )
        .with_wait(self.project.settings.wait_policy())
        .with_sleeper(self.sleeper.clone())
    }

    /// Run `op` on every stack under `path` and collect the per-stack results.
    ///
    /// Selection and tree errors fail the whole call; a failing stack only
    /// fails its own entry.
    pub fn dispatch<T, F>(&self, path: &str, op: F) -> Result<LeafResults<T>>
    where
        T: Send,
        F: Fn(&StackRunner<'_>, &Stack) -> Result<T> + Sync,
    {
        let node = self.project.root.find(path)?;
        let runner = self.runner();

        recurse_into_sub_environments(
            node,
            self.project.settings.dispatch_mode(),
            &|leaf: &EnvironmentNode| match leaf.as_stack() {
                Some(stack) => op(&runner, stack),
                None => Err(Error::internal_unexpected(format!(
                    "Environment '{}' has no stacks",
                    leaf.path()
                ))),
            },
        )
    }

    pub fn launch(&self, path: &str) -> Result<LeafResults<StackStatus>> {
        self.dispatch(path, |runner, stack| runner.launch(stack))
    }

    pub fn create(&self, path: &str) -> Result<LeafResults<StackStatus>> {
        self.dispatch(path, |runner, stack| runner.create(stack))
    }

    pub fn update(&self, path: &str) -> Result<LeafResults<StackStatus>> {
        self.dispatch(path, |runner, stack| runner.update(stack))
    }

    pub fn delete(&self, path: &str) -> Result<LeafResults<StackStatus>> {
        self.dispatch(path, |runner, stack| runner.delete(stack))
    }

    pub fn validate(&self, path: &str) -> Result<LeafResults<TemplateValidation>> {
        self.dispatch(path, |runner, stack| runner.validate(stack))
    }

    pub fn describe(&self, path: &str) -> Result<LeafResults<StackStatus>> {
        self.dispatch(path, |runner, stack| runner.describe(stack))
    }

    pub fn outputs(&self, path: &str) -> Result<LeafResults<BTreeMap<String, String>>> {
        self.dispatch(path, |runner, stack| runner.outputs(stack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::FakeControlPlane;
    use crate::retry::tests::RecordingSleeper;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn project_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("strata.json"),
            r#"{"project_code": "prj", "endpoint": "http://localhost:9"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("environments.json"),
            r#"{
                "environments": {
                    "dev": { "stacks": {
                        "vpc": { "template_path": "vpc.yaml" },
                        "db": { "template_path": "vpc.yaml", "protect": true }
                    } }
                }
            }"#,
        )
        .unwrap();
        fs::write(dir.path().join("vpc.yaml"), "Resources: {}").unwrap();
        dir
    }

    #[test]
    fn load_builds_tree_and_registries() {
        let dir = project_dir();
        let project = Project::load(dir.path()).unwrap();

        assert_eq!(project.root.leaf_names(), vec!["dev/db", "dev/vpc"]);
        assert!(project.resolvers.contains("stack_output"));
        assert!(project.hooks.contains("bash"));
        assert_eq!(project.capabilities().len(), 7);
    }

    #[test]
    fn external_name_requires_known_path() {
        let dir = project_dir();
        let project = Project::load(dir.path()).unwrap();

        assert_eq!(project.external_name("dev/vpc").unwrap(), "prj-dev-vpc");
        assert_eq!(project.external_name("dev").unwrap(), "prj-dev");
        assert_eq!(
            project.external_name("qa").unwrap_err().code.as_str(),
            "environment.not_found"
        );
    }

    #[test]
    fn launch_reports_each_leaf_independently() {
        let dir = project_dir();
        let project = Project::load(dir.path()).unwrap();
        let plane = Arc::new(FakeControlPlane::default());
        plane.push(
            "DescribeStacks",
            Ok(json!({ "Stacks": [{ "StackStatus": "CREATE_COMPLETE" }] })),
        );
        plane.push("UpdateStack", Ok(json!({})));
        plane.push(
            "DescribeStacks",
            Ok(json!({ "Stacks": [{ "StackStatus": "UPDATE_COMPLETE" }] })),
        );

        let orchestrator = project.orchestrator(plane.clone(), Arc::new(RecordingSleeper::default()));
        let results = orchestrator.launch("dev").unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(
            results["dev/db"].as_ref().unwrap_err().code.as_str(),
            "stack.protected"
        );
        assert_eq!(*results["dev/vpc"].as_ref().unwrap(), StackStatus::Complete);
        assert_eq!(plane.calls_to("UpdateStack")[0]["StackName"], "prj-dev-vpc");
    }

    #[test]
    fn validate_covers_protected_stacks() {
        let dir = project_dir();
        let project = Project::load(dir.path()).unwrap();
        let plane = Arc::new(FakeControlPlane::default());
        for _ in 0..2 {
            plane.push("ValidateTemplate", Ok(json!({ "Parameters": [] })));
        }

        let orchestrator = project.orchestrator(plane.clone(), Arc::new(RecordingSleeper::default()));
        let results = orchestrator.validate("dev").unwrap();

        assert!(results.values().all(|r| r.is_ok()));
        assert_eq!(plane.calls_to("ValidateTemplate").len(), 2);
        assert_eq!(plane.calls_to("ValidateTemplate")[0]["TemplateBody"], "Resources: {}");
    }

    #[test]
    fn dispatch_to_unknown_path_fails_whole_call() {
        let dir = project_dir();
        let project = Project::load(dir.path()).unwrap();
        let orchestrator = project.orchestrator(
            Arc::new(FakeControlPlane::default()),
            Arc::new(RecordingSleeper::default()),
        );

        let err = orchestrator.describe("prod").unwrap_err();
        assert_eq!(err.code.as_str(), "environment.not_found");
    }
}
