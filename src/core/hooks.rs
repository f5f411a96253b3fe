//! Lifecycle hooks.
//!
//! Stacks attach hooks to named events (`before_create`, `after_delete`, ...).
//! Hooks for an event run in declaration order and the first failure aborts
//! the operation that fired the event.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Error, HookFailedDetails, Result};
use crate::registry::{Capability, CapabilityKind, CapabilityManifest, CapabilityRegistry, Discoverable};
use crate::resolvers::command_vars;
use crate::stack::StackContext;
use crate::utils::command::run_checked;
use crate::utils::template::render_map;

pub trait Hook: Capability {
    fn run(&self, ctx: &StackContext<'_>, argument: &str) -> Result<()>;
}

impl Discoverable for dyn Hook {
    const KIND: CapabilityKind = CapabilityKind::Hook;

    fn builtin() -> Vec<Arc<Self>> {
        let mut hooks: Vec<Arc<dyn Hook>> = Vec::new();
        hooks.push(Arc::new(Bash));
        hooks.push(Arc::new(AsgScheduledActions));
        hooks
    }

    fn from_manifest(manifest: CapabilityManifest) -> Arc<Self> {
        Arc::new(CommandHook { manifest })
    }
}

/// Standard event names for stack lifecycle hooks.
pub mod events {
    pub const BEFORE_CREATE: &str = "before_create";
    pub const AFTER_CREATE: &str = "after_create";
    pub const BEFORE_UPDATE: &str = "before_update";
    pub const AFTER_UPDATE: &str = "after_update";
    pub const BEFORE_DELETE: &str = "before_delete";
    pub const AFTER_DELETE: &str = "after_delete";

    pub const ALL: &[&str] = &[
        BEFORE_CREATE,
        AFTER_CREATE,
        BEFORE_UPDATE,
        AFTER_UPDATE,
        BEFORE_DELETE,
        AFTER_DELETE,
    ];
}

/// Run every hook the context's stack declares for `event`.
pub fn run_hooks(
    ctx: &StackContext<'_>,
    registry: &CapabilityRegistry<dyn Hook>,
    event: &str,
) -> Result<()> {
    let specs = match ctx.stack.config.hooks.get(event) {
        Some(specs) => specs,
        None => return Ok(()),
    };

    for spec in specs {
        let hook = registry.get(&spec.hook)?;
        log_status!("hook", "{} {} ({})", ctx.stack.name, event, spec.hook);

        hook.run(ctx, &spec.argument).map_err(|e| {
            Error::hook_failed(HookFailedDetails {
                event: event.to_string(),
                hook: spec.hook.clone(),
                argument: spec.argument.clone(),
                error: e.message,
            })
        })?;
    }

    Ok(())
}

/// Runs its argument as a shell command in the project directory.
pub struct Bash;

impl Capability for Bash {
    fn type_name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> Option<&str> {
        Some("Run a shell command")
    }
}

impl Hook for Bash {
    fn run(&self, ctx: &StackContext<'_>, argument: &str) -> Result<()> {
        if argument.trim().is_empty() {
            return Err(Error::validation_invalid_argument(
                "argument",
                "Bash hook needs a command",
                Some(ctx.stack.name.clone()),
                None,
            ));
        }

        let external_name = ctx.stack.external_name();
        let env = [
            ("STRATA_STACK_NAME", ctx.stack.name.as_str()),
            ("STRATA_EXTERNAL_NAME", external_name.as_str()),
        ];
        let stdout = run_checked(argument, Some(ctx.project_dir), Some(&env[..]))?;
        if !stdout.is_empty() {
            log_status!("hook", "{}", stdout);
        }
        Ok(())
    }
}

const AUTO_SCALING_GROUP_TYPE: &str = "AWS::AutoScaling::AutoScalingGroup";
const SCHEDULED_ACTIONS_PROCESS: &str = "ScheduledActions";

/// Suspends or resumes the scheduled actions of every auto-scaling group the
/// stack owns. Argument is `suspend` or `resume`.
pub struct AsgScheduledActions;

impl AsgScheduledActions {
    fn auto_scaling_groups(ctx: &StackContext<'_>) -> Result<Vec<String>> {
        let response = ctx.connection.call(
            "DescribeStackResources",
            &json!({ "StackName": ctx.stack.external_name() }),
        )?;

        Ok(response
            .get("StackResources")
            .and_then(Value::as_array)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|r| r.get("ResourceType").and_then(Value::as_str) == Some(AUTO_SCALING_GROUP_TYPE))
                    .filter_map(|r| r.get("PhysicalResourceId").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Capability for AsgScheduledActions {
    fn type_name(&self) -> &str {
        "ASGScheduledActions"
    }

    fn description(&self) -> Option<&str> {
        Some("Suspend or resume scheduled actions of the stack's auto-scaling groups")
    }
}

impl Hook for AsgScheduledActions {
    fn run(&self, ctx: &StackContext<'_>, argument: &str) -> Result<()> {
        let operation = match argument {
            "suspend" => "SuspendProcesses",
            "resume" => "ResumeProcesses",
            other => {
                return Err(Error::validation_invalid_argument(
                    "argument",
                    format!("Expected 'suspend' or 'resume', got '{}'", other),
                    Some(ctx.stack.name.clone()),
                    Some(vec!["suspend".to_string(), "resume".to_string()]),
                ))
            }
        };

        for group in Self::auto_scaling_groups(ctx)? {
            log_status!("hook", "{} {} on {}", operation, SCHEDULED_ACTIONS_PROCESS, group);
            ctx.connection.call(
                operation,
                &json!({
                    "AutoScalingGroupName": group,
                    "ScalingProcesses": [SCHEDULED_ACTIONS_PROCESS],
                }),
            )?;
        }
        Ok(())
    }
}

/// Hook declared by a manifest.
pub struct CommandHook {
    manifest: CapabilityManifest,
}

impl Capability for CommandHook {
    fn type_name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> Option<&str> {
        self.manifest.description.as_deref()
    }
}

impl Hook for CommandHook {
    fn run(&self, ctx: &StackContext<'_>, argument: &str) -> Result<()> {
        let command = render_map(&self.manifest.command, &command_vars(ctx, argument));
        run_checked(&command, Some(ctx.project_dir), None).map(|_| ())
    }
}
