use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;

use strata::connection::{ControlPlane, RemoteError, RemoteErrorCode};
use strata::project::Project;
use strata::retry::Sleeper;
use strata::stack::StackStatus;
use strata::BulkResult;

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _secs: u64) {}
}

struct SimStack {
    status: String,
    parameters: Value,
}

/// In-memory control plane: stacks settle immediately and echo their
/// parameters back as outputs.
#[derive(Default)]
struct SimulatedPlane {
    stacks: Mutex<BTreeMap<String, SimStack>>,
    throttle_every: usize,
    calls: Mutex<usize>,
    operations: Mutex<Vec<(String, String)>>,
}

impl SimulatedPlane {
    fn throttling_every(n: usize) -> Self {
        Self {
            throttle_every: n,
            ..Default::default()
        }
    }

    fn operations(&self, operation: &str) -> Vec<String> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

fn missing(name: &str) -> RemoteError {
    RemoteError::new(
        RemoteErrorCode::named("ValidationError"),
        format!("Stack with id {} does not exist", name),
    )
}

fn outputs(parameters: &Value) -> Value {
    let outputs: Vec<Value> = parameters
        .as_array()
        .map(|params| {
            params
                .iter()
                .map(|p| json!({ "OutputKey": p["ParameterKey"], "OutputValue": p["ParameterValue"] }))
                .collect()
        })
        .unwrap_or_default();
    Value::Array(outputs)
}

impl ControlPlane for SimulatedPlane {
    fn call(&self, operation: &str, params: &Value) -> Result<Value, RemoteError> {
        {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if self.throttle_every > 0 && *calls % self.throttle_every == 0 {
                return Err(RemoteError::new(
                    RemoteErrorCode::named("Throttling"),
                    "Rate exceeded",
                ));
            }
        }

        let name = params["StackName"].as_str().unwrap_or_default().to_string();
        self.operations
            .lock()
            .unwrap()
            .push((operation.to_string(), name.clone()));
        let mut stacks = self.stacks.lock().unwrap();

        match operation {
            "DescribeStacks" => {
                let stack = stacks.get(&name).ok_or_else(|| missing(&name))?;
                Ok(json!({ "Stacks": [{
                    "StackName": name,
                    "StackStatus": stack.status,
                    "Outputs": outputs(&stack.parameters),
                }] }))
            }
            "CreateStack" => {
                stacks.insert(
                    name.clone(),
                    SimStack {
                        status: "CREATE_COMPLETE".to_string(),
                        parameters: params["Parameters"].clone(),
                    },
                );
                Ok(json!({ "StackId": name }))
            }
            "UpdateStack" => {
                let stack = stacks.get_mut(&name).ok_or_else(|| missing(&name))?;
                if stack.parameters == params["Parameters"] {
                    return Err(RemoteError::new(
                        RemoteErrorCode::named("ValidationError"),
                        "No updates are to be performed.",
                    ));
                }
                stack.parameters = params["Parameters"].clone();
                stack.status = "UPDATE_COMPLETE".to_string();
                Ok(json!({ "StackId": name }))
            }
            "DeleteStack" => {
                stacks.remove(&name);
                Ok(json!({}))
            }
            other => Err(RemoteError::new(
                RemoteErrorCode::Status(400),
                format!("Unknown operation {}", other),
            )),
        }
    }
}

fn write_project(dir: &Path, settings: Value) {
    fs::write(dir.join("strata.json"), settings.to_string()).unwrap();
    fs::create_dir_all(dir.join("templates")).unwrap();
    fs::write(dir.join("templates/net.yaml"), "Resources: {}\n").unwrap();
    fs::write(
        dir.join("environments.yaml"),
        r#"
environments:
  dev:
    stacks:
      vpc:
        template_path: templates/net.yaml
        parameters:
          VpcId: vpc-0abc
      subnet:
        template_path: templates/net.yaml
        parameters:
          VpcId:
            resolver: stack_output
            argument: vpc::VpcId
  prod:
    stacks:
      vpc:
        template_path: templates/net.yaml
        protect: true
        parameters:
          VpcId: vpc-0prod
"#,
    )
    .unwrap();
}

fn settings(parallel: bool) -> Value {
    json!({
        "project_code": "acme",
        "environments_file": "environments.yaml",
        "dispatch": { "parallel": parallel },
    })
}

#[test]
fn launch_resolves_outputs_of_sibling_stacks() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), settings(false));
    let project = Project::load(dir.path()).unwrap();
    let plane = Arc::new(SimulatedPlane::default());
    let orchestrator = project.orchestrator(plane.clone(), Arc::new(NoSleep));

    let first = orchestrator.launch("dev/vpc").unwrap();
    assert_eq!(*first["dev/vpc"].as_ref().unwrap(), StackStatus::Complete);

    let results = orchestrator.launch("dev").unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.values().all(|r| r.is_ok()));

    let outputs = orchestrator.outputs("dev/subnet").unwrap();
    assert_eq!(outputs["dev/subnet"].as_ref().unwrap()["VpcId"], "vpc-0abc");
    assert_eq!(plane.operations("CreateStack"), vec!["acme-dev-vpc", "acme-dev-subnet"]);
}

#[test]
fn protected_leaf_fails_alone() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), settings(true));
    let project = Project::load(dir.path()).unwrap();
    let plane = Arc::new(SimulatedPlane::default());
    let orchestrator = project.orchestrator(plane.clone(), Arc::new(NoSleep));

    orchestrator.launch("dev/vpc").unwrap();
    let bulk = BulkResult::from_leaf_results("launch", orchestrator.launch("").unwrap());

    assert_eq!(bulk.summary.total, 3);
    assert_eq!(bulk.summary.failed, 1);
    let prod = bulk.results.iter().find(|r| r.id == "prod/vpc").unwrap();
    assert_eq!(prod.error.as_ref().unwrap().code, "stack.protected");
    assert!(!plane.operations("DescribeStacks").contains(&"acme-prod-vpc".to_string()));
}

#[test]
fn throttling_is_absorbed_in_parallel_dispatch() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), settings(true));
    let project = Project::load(dir.path()).unwrap();
    let plane = Arc::new(SimulatedPlane::throttling_every(3));
    let orchestrator = project.orchestrator(plane.clone(), Arc::new(NoSleep));

    orchestrator.create("dev/vpc").unwrap();
    let results = orchestrator.describe("dev").unwrap();

    assert_eq!(*results["dev/vpc"].as_ref().unwrap(), StackStatus::Complete);
    assert_eq!(*results["dev/subnet"].as_ref().unwrap(), StackStatus::Pending);
}

#[test]
fn delete_then_describe_reports_pending() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), settings(false));
    let project = Project::load(dir.path()).unwrap();
    let plane = Arc::new(SimulatedPlane::default());
    let orchestrator = project.orchestrator(plane.clone(), Arc::new(NoSleep));

    orchestrator.launch("dev/vpc").unwrap();
    let deleted = orchestrator.delete("dev").unwrap();
    assert!(deleted.values().all(|r| matches!(r, Ok(StackStatus::Complete))));
    assert_eq!(plane.operations("DeleteStack"), vec!["acme-dev-vpc"]);

    let described = orchestrator.describe("dev/vpc").unwrap();
    assert_eq!(*described["dev/vpc"].as_ref().unwrap(), StackStatus::Pending);
}

#[cfg(not(windows))]
#[test]
fn manifest_hooks_run_after_create() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(false);
    settings["capabilities"] = json!({ "hook_dirs": ["hooks"] });
    write_project(dir.path(), settings);
    fs::create_dir_all(dir.path().join("hooks")).unwrap();
    fs::write(
        dir.path().join("hooks/marker.json"),
        r#"{"name": "Marker", "kind": "hook", "command": "echo {{stack_name}} {{argument}} >> hooks.log"}"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("environments.yaml"),
        r#"
stacks:
  dns:
    template_path: templates/net.yaml
    hooks:
      after_create:
        - hook: marker
          argument: created
"#,
    )
    .unwrap();

    let project = Project::load(dir.path()).unwrap();
    assert!(project.hooks.contains("marker"));
    let plane = Arc::new(SimulatedPlane::default());
    let orchestrator = project.orchestrator(plane, Arc::new(NoSleep));

    let created = orchestrator.create("dns").unwrap();
    assert_eq!(*created["dns"].as_ref().unwrap(), StackStatus::Complete);

    let log = fs::read_to_string(dir.path().join("hooks.log")).unwrap();
    assert_eq!(log, "dns created\n");
}

#[test]
fn duplicate_capability_key_is_fatal_at_load() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(false);
    settings["capabilities"] = json!({ "resolver_dirs": ["resolvers"] });
    write_project(dir.path(), settings);
    fs::create_dir_all(dir.path().join("resolvers")).unwrap();
    fs::write(
        dir.path().join("resolvers/env.json"),
        r#"{"name": "EnvironmentVariable", "kind": "resolver", "command": "printenv {{argument}}"}"#,
    )
    .unwrap();

    let err = Project::load(dir.path()).err().unwrap();
    assert_eq!(err.code.as_str(), "capability.key_collision");
}
