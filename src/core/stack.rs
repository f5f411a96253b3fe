//! Stack definitions and the lifecycle operations that drive them through the
//! control plane.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::connection::{retry_error_to_error, ConnectionManager};
use crate::error::{Error, Result};
use crate::guard::{execution_protection, Protected};
use crate::hooks::{self, events, Hook};
use crate::naming;
use crate::registry::CapabilityRegistry;
use crate::resolvers::{self, Resolver};
use crate::retry::{RetryError, Sleeper, ThreadSleeper};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_POLLS: u32 = 720;

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";
const MISSING_STACK_MESSAGE: &str = "does not exist";

/// A template parameter: a literal, or a value computed by a resolver at
/// launch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Literal(String),
    Resolved {
        resolver: String,
        #[serde(default)]
        argument: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSpec {
    pub hook: String,
    #[serde(default)]
    pub argument: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub template_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterValue>,
    #[serde(default)]
    pub protect: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, Vec<HookSpec>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Stack paths this stack reads outputs from. Informational only; launch
    /// order is not derived from it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    pub name: String,
    pub project_code: String,
    pub config: StackConfig,
}

impl Stack {
    /// Validates the logical path, the derived external name, every hook
    /// event and every dependency path.
    pub fn new(name: &str, project_code: &str, config: StackConfig) -> Result<Self> {
        naming::validate_path(name)?;
        naming::validate_external_name(&naming::external_name(project_code, name))?;

        for event in config.hooks.keys() {
            if !events::ALL.contains(&event.as_str()) {
                return Err(Error::config_invalid_value(
                    "hooks",
                    Some(event.clone()),
                    format!(
                        "Unknown hook event in stack '{}'. Expected one of: {}",
                        name,
                        events::ALL.join(", ")
                    ),
                ));
            }
        }

        for dependency in &config.dependencies {
            naming::validate_path(dependency)?;
        }

        Ok(Self {
            name: name.to_string(),
            project_code: project_code.to_string(),
            config,
        })
    }

    pub fn external_name(&self) -> String {
        naming::external_name(&self.project_code, &self.name)
    }
}

impl Protected for Stack {
    fn is_protected(&self) -> bool {
        self.config.protect
    }

    fn stack_name(&self) -> &str {
        &self.name
    }

    fn external_name(&self) -> String {
        Stack::external_name(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl StackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::Pending => "pending",
            StackStatus::InProgress => "in_progress",
            StackStatus::Complete => "complete",
            StackStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collapse a raw remote status (`CREATE_IN_PROGRESS`, `ROLLBACK_COMPLETE`,
/// ...) into a [`StackStatus`]. Rollbacks that finished count as failures.
pub fn status_from_remote(raw: &str) -> Result<StackStatus> {
    if raw.ends_with("ROLLBACK_COMPLETE") || raw.ends_with("_FAILED") {
        Ok(StackStatus::Failed)
    } else if raw.ends_with("_IN_PROGRESS") {
        Ok(StackStatus::InProgress)
    } else if raw.ends_with("_COMPLETE") {
        Ok(StackStatus::Complete)
    } else {
        Err(Error::internal_unexpected(format!(
            "Unknown remote stack status '{}'",
            raw
        )))
    }
}

fn needs_recreate(raw: &str) -> bool {
    matches!(raw, "ROLLBACK_COMPLETE" | "ROLLBACK_FAILED" | "CREATE_FAILED")
}

/// Everything a resolver or hook can see while working on one stack.
#[derive(Clone, Copy)]
pub struct StackContext<'a> {
    pub stack: &'a Stack,
    pub connection: &'a ConnectionManager,
    pub project_dir: &'a Path,
}

/// Describe a remote stack by its external name. `None` when it does not
/// exist.
pub fn describe_remote(connection: &ConnectionManager, external_name: &str) -> Result<Option<Value>> {
    let params = json!({ "StackName": external_name });
    match connection.call_raw("DescribeStacks", &params) {
        Ok(response) => Ok(response
            .get("Stacks")
            .and_then(|stacks| stacks.get(0))
            .cloned()),
        Err(RetryError::Call(err)) if err.message.contains(MISSING_STACK_MESSAGE) => Ok(None),
        Err(err) => Err(retry_error_to_error("DescribeStacks", err)),
    }
}

/// Output key/value pairs of a remote stack.
pub fn stack_outputs(
    connection: &ConnectionManager,
    external_name: &str,
) -> Result<BTreeMap<String, String>> {
    let description = describe_remote(connection, external_name)?
        .ok_or_else(|| Error::stack_not_found(external_name, vec![]))?;

    let outputs = description
        .get("Outputs")
        .and_then(Value::as_array)
        .map(|outputs| {
            outputs
                .iter()
                .filter_map(|output| {
                    let key = output.get("OutputKey")?.as_str()?;
                    let value = output.get("OutputValue")?.as_str()?;
                    Some((key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(outputs)
}

/// What the control plane reports about a valid template.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameter keys the template declares.
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

/// Runs lifecycle operations for single stacks. Cheap to share across
/// dispatch threads.
pub struct StackRunner<'a> {
    connection: &'a ConnectionManager,
    resolvers: &'a CapabilityRegistry<dyn Resolver>,
    hooks: &'a CapabilityRegistry<dyn Hook>,
    project_dir: &'a Path,
    wait: WaitPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<'a> StackRunner<'a> {
    pub fn new(
        connection: &'a ConnectionManager,
        resolvers: &'a CapabilityRegistry<dyn Resolver>,
        hooks: &'a CapabilityRegistry<dyn Hook>,
        project_dir: &'a Path,
    ) -> Self {
        Self {
            connection,
            resolvers,
            hooks,
            project_dir,
            wait: WaitPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn context<'s>(&'s self, stack: &'s Stack) -> StackContext<'s> {
        StackContext {
            stack,
            connection: self.connection,
            project_dir: self.project_dir,
        }
    }

    pub fn describe(&self, stack: &Stack) -> Result<StackStatus> {
        match self.remote_status(stack)? {
            Some(raw) => status_from_remote(&raw),
            None => Ok(StackStatus::Pending),
        }
    }

    pub fn outputs(&self, stack: &Stack) -> Result<BTreeMap<String, String>> {
        stack_outputs(self.connection, &stack.external_name())
    }

    /// Have the control plane check the stack's template. Nothing is
    /// changed remotely, so protected stacks validate too.
    pub fn validate(&self, stack: &Stack) -> Result<TemplateValidation> {
        let body = json!({ "TemplateBody": self.template_body(stack)? });
        let response = self.connection.call("ValidateTemplate", &body)?;
        log_status!("validate", "{} template is valid", stack.name);

        let parameters = response
            .get("Parameters")
            .and_then(Value::as_array)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|p| p.get("ParameterKey")?.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(TemplateValidation {
            description: response
                .get("Description")
                .and_then(Value::as_str)
                .map(str::to_string),
            parameters,
        })
    }

    pub fn create(&self, stack: &Stack) -> Result<StackStatus> {
        execution_protection(stack, |stack| self.create_unguarded(stack))
    }

    pub fn update(&self, stack: &Stack) -> Result<StackStatus> {
        execution_protection(stack, |stack| self.update_unguarded(stack))
    }

    pub fn delete(&self, stack: &Stack) -> Result<StackStatus> {
        execution_protection(stack, |stack| self.delete_unguarded(stack))
    }

    /// Create, update or replace the stack depending on its remote state.
    pub fn launch(&self, stack: &Stack) -> Result<StackStatus> {
        execution_protection(stack, |stack| {
            let raw = match self.remote_status(stack)? {
                None => return self.create_unguarded(stack),
                Some(raw) => raw,
            };

            if needs_recreate(&raw) {
                log_status!("launch", "{} is {}, recreating", stack.name, raw);
                self.delete_unguarded(stack)?;
                return self.create_unguarded(stack);
            }

            match status_from_remote(&raw)? {
                StackStatus::InProgress => {
                    log_status!("launch", "{} is busy ({}), skipping", stack.name, raw);
                    Ok(StackStatus::InProgress)
                }
                _ => self.update_unguarded(stack),
            }
        })
    }

    fn remote_status(&self, stack: &Stack) -> Result<Option<String>> {
        let description = describe_remote(self.connection, &stack.external_name())?;
        Ok(description.and_then(|d| {
            d.get("StackStatus")
                .and_then(Value::as_str)
                .map(str::to_string)
        }))
    }

    fn create_unguarded(&self, stack: &Stack) -> Result<StackStatus> {
        let ctx = self.context(stack);
        hooks::run_hooks(&ctx, self.hooks, events::BEFORE_CREATE)?;

        log_status!("create", "Creating {}", stack.external_name());
        let body = self.request_body(&ctx)?;
        self.connection.call("CreateStack", &body)?;

        let status = self.wait_for_completion(stack, "create", false)?;
        hooks::run_hooks(&ctx, self.hooks, events::AFTER_CREATE)?;
        Ok(status)
    }

    fn update_unguarded(&self, stack: &Stack) -> Result<StackStatus> {
        let ctx = self.context(stack);
        hooks::run_hooks(&ctx, self.hooks, events::BEFORE_UPDATE)?;

        log_status!("update", "Updating {}", stack.external_name());
        let body = self.request_body(&ctx)?;
        let status = match self.connection.call_raw("UpdateStack", &body) {
            Ok(_) => self.wait_for_completion(stack, "update", false)?,
            Err(RetryError::Call(err)) if err.message.contains(NO_UPDATES_MESSAGE) => {
                log_status!("update", "{} is already up to date", stack.external_name());
                StackStatus::Complete
            }
            Err(err) => return Err(retry_error_to_error("UpdateStack", err)),
        };

        hooks::run_hooks(&ctx, self.hooks, events::AFTER_UPDATE)?;
        Ok(status)
    }

    fn delete_unguarded(&self, stack: &Stack) -> Result<StackStatus> {
        if self.remote_status(stack)?.is_none() {
            log_status!("delete", "{} does not exist", stack.external_name());
            return Ok(StackStatus::Complete);
        }

        let ctx = self.context(stack);
        hooks::run_hooks(&ctx, self.hooks, events::BEFORE_DELETE)?;

        log_status!("delete", "Deleting {}", stack.external_name());
        let body = json!({
            "StackName": stack.external_name(),
            "ClientRequestToken": Uuid::new_v4().to_string(),
        });
        self.connection.call("DeleteStack", &body)?;

        let status = self.wait_for_completion(stack, "delete", true)?;
        hooks::run_hooks(&ctx, self.hooks, events::AFTER_DELETE)?;
        Ok(status)
    }

    fn template_body(&self, stack: &Stack) -> Result<String> {
        if stack.config.template_path.trim().is_empty() {
            return Err(Error::config_missing_key(
                "template_path",
                Some(stack.name.clone()),
            ));
        }

        let template_path = self.project_dir.join(&stack.config.template_path);
        crate::utils::io::read_file(&template_path, "read stack template")
    }

    fn request_body(&self, ctx: &StackContext<'_>) -> Result<Value> {
        let stack = ctx.stack;
        let template = self.template_body(stack)?;

        let parameters: Vec<Value> = resolvers::resolve_parameters(ctx, self.resolvers)?
            .into_iter()
            .map(|(key, value)| json!({ "ParameterKey": key, "ParameterValue": value }))
            .collect();

        let tags: Vec<Value> = stack
            .config
            .tags
            .iter()
            .map(|(key, value)| json!({ "Key": key, "Value": value }))
            .collect();

        Ok(json!({
            "StackName": stack.external_name(),
            "TemplateBody": template,
            "Parameters": parameters,
            "Tags": tags,
            "ClientRequestToken": Uuid::new_v4().to_string(),
        }))
    }

    /// Poll until the stack leaves `in_progress`. A stack that disappears
    /// while deleting counts as complete; a terminal failure becomes
    /// `stack.operation_failed`.
    fn wait_for_completion(
        &self,
        stack: &Stack,
        operation: &str,
        missing_is_complete: bool,
    ) -> Result<StackStatus> {
        for poll in 1..=self.wait.max_polls {
            if let Some(raw) = self.remote_status(stack)? {
                match status_from_remote(&raw)? {
                    StackStatus::InProgress | StackStatus::Pending => {}
                    StackStatus::Failed => {
                        return Err(Error::stack_operation_failed(&stack.name, operation, raw));
                    }
                    StackStatus::Complete => {
                        log_status!("wait", "{} {} reached {}", stack.external_name(), operation, raw);
                        return Ok(StackStatus::Complete);
                    }
                }
            } else if missing_is_complete {
                return Ok(StackStatus::Complete);
            }

            if poll < self.wait.max_polls {
                self.sleeper.sleep(self.wait.poll_interval_secs);
            }
        }

        Err(Error::remote_timeout(&stack.name, operation))
    }
}
