//! Parameter resolvers.
//!
//! A resolver turns the `argument` of a `{resolver, argument}` parameter into
//! the string sent to the control plane. Built-ins are compiled in; command
//! resolvers come from manifest directories.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::naming;
use crate::paths::project_relative;
use crate::registry::{Capability, CapabilityKind, CapabilityManifest, CapabilityRegistry, Discoverable};
use crate::stack::{stack_outputs, ParameterValue, StackContext};
use crate::utils::command::run_checked;
use crate::utils::io::read_file;
use crate::utils::shell::quote_arg;
use crate::utils::template::{render_map, TemplateVars};

/// Separator between a stack reference and an output key, or a file and a
/// variable key.
pub const REFERENCE_SEPARATOR: &str = "::";

pub trait Resolver: Capability {
    fn resolve(&self, ctx: &StackContext<'_>, argument: &str) -> Result<String>;
}

impl Discoverable for dyn Resolver {
    const KIND: CapabilityKind = CapabilityKind::Resolver;

    fn builtin() -> Vec<Arc<Self>> {
        let mut resolvers: Vec<Arc<dyn Resolver>> = Vec::new();
        resolvers.push(Arc::new(EnvironmentVariable));
        resolvers.push(Arc::new(FileContents));
        resolvers.push(Arc::new(StackOutput));
        resolvers.push(Arc::new(StackOutputExternal));
        resolvers.push(Arc::new(ProjectVariables));
        resolvers
    }

    fn from_manifest(manifest: CapabilityManifest) -> Arc<Self> {
        Arc::new(CommandResolver { manifest })
    }
}

/// Resolve every parameter of the context's stack. Literals pass through.
pub fn resolve_parameters(
    ctx: &StackContext<'_>,
    registry: &CapabilityRegistry<dyn Resolver>,
) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();

    for (key, value) in &ctx.stack.config.parameters {
        let value = match value {
            ParameterValue::Literal(literal) => literal.clone(),
            ParameterValue::Resolved { resolver, argument } => {
                registry.get(resolver)?.resolve(ctx, argument)?
            }
        };
        resolved.insert(key.clone(), value);
    }

    Ok(resolved)
}

fn invalid_argument(ctx: &StackContext<'_>, problem: String) -> Error {
    Error::validation_invalid_argument("argument", problem, Some(ctx.stack.name.clone()), None)
}

fn split_reference<'a>(ctx: &StackContext<'_>, argument: &'a str) -> Result<(&'a str, &'a str)> {
    match argument.split_once(REFERENCE_SEPARATOR) {
        Some((left, right)) if !left.is_empty() && !right.is_empty() => Ok((left, right)),
        _ => Err(invalid_argument(
            ctx,
            format!("Expected '<name>{}<key>', got '{}'", REFERENCE_SEPARATOR, argument),
        )),
    }
}

fn output_value(ctx: &StackContext<'_>, external_name: &str, key: &str) -> Result<String> {
    let outputs = stack_outputs(ctx.connection, external_name)?;
    outputs.get(key).cloned().ok_or_else(|| {
        Error::validation_invalid_argument(
            "argument",
            format!("Stack '{}' has no output '{}'", external_name, key),
            Some(ctx.stack.name.clone()),
            Some(outputs.keys().cloned().collect()),
        )
    })
}

/// Value of a local environment variable.
pub struct EnvironmentVariable;

impl Capability for EnvironmentVariable {
    fn type_name(&self) -> &str {
        "EnvironmentVariable"
    }

    fn description(&self) -> Option<&str> {
        Some("Value of an environment variable")
    }
}

impl Resolver for EnvironmentVariable {
    fn resolve(&self, ctx: &StackContext<'_>, argument: &str) -> Result<String> {
        if argument.is_empty() {
            return Err(invalid_argument(ctx, "Variable name is empty".to_string()));
        }

        std::env::var(argument).map_err(|_| {
            invalid_argument(
                ctx,
                format!("Environment variable '{}' is not set", argument),
            )
        })
    }
}

/// Contents of a local file.
pub struct FileContents;

impl Capability for FileContents {
    fn type_name(&self) -> &str {
        "FileContents"
    }

    fn description(&self) -> Option<&str> {
        Some("Contents of a file, relative to the project directory")
    }
}

impl Resolver for FileContents {
    fn resolve(&self, ctx: &StackContext<'_>, argument: &str) -> Result<String> {
        read_file(&project_relative(ctx.project_dir, argument), "resolve file contents")
    }
}

/// Output of another stack in this project: `vpc::VpcId` (sibling) or
/// `dev/ew1/vpc::VpcId`.
pub struct StackOutput;

impl Capability for StackOutput {
    fn type_name(&self) -> &str {
        "StackOutput"
    }

    fn description(&self) -> Option<&str> {
        Some("Output of another stack in this project")
    }
}

impl Resolver for StackOutput {
    fn resolve(&self, ctx: &StackContext<'_>, argument: &str) -> Result<String> {
        let (reference, key) = split_reference(ctx, argument)?;
        let path = naming::resolve_relative(&ctx.stack.name, reference);
        naming::validate_path(&path)?;
        output_value(ctx, &naming::external_name(&ctx.stack.project_code, &path), key)
    }
}

/// Output of any remote stack, addressed by its external name.
pub struct StackOutputExternal;

impl Capability for StackOutputExternal {
    fn type_name(&self) -> &str {
        "StackOutputExternal"
    }

    fn description(&self) -> Option<&str> {
        Some("Output of a stack addressed by its external name")
    }
}

impl Resolver for StackOutputExternal {
    fn resolve(&self, ctx: &StackContext<'_>, argument: &str) -> Result<String> {
        let (external_name, key) = split_reference(ctx, argument)?;
        output_value(ctx, external_name, key)
    }
}

/// Variable from a JSON or YAML file: `vars.yaml::InstanceType`.
///
/// The file is a nested mapping. The stack's path segments select ever more
/// specific sections and the most specific section holding the key wins, so
/// `dev.ew1.InstanceType` overrides `dev.InstanceType` overrides
/// `InstanceType` for the stack `dev/ew1/vpc`.
pub struct ProjectVariables;

impl Capability for ProjectVariables {
    fn type_name(&self) -> &str {
        "ProjectVariables"
    }

    fn description(&self) -> Option<&str> {
        Some("Variable from a JSON or YAML file, scoped by stack path")
    }
}

impl Resolver for ProjectVariables {
    fn resolve(&self, ctx: &StackContext<'_>, argument: &str) -> Result<String> {
        let (file, key) = split_reference(ctx, argument)?;
        let path = project_relative(ctx.project_dir, file);
        let content = read_file(&path, "resolve project variables")?;

        let variables: Value = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?
        } else {
            serde_yml::from_str(&content)
                .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?
        };

        let mut scopes = vec![&variables];
        let mut current = &variables;
        for segment in naming::path_segments(&ctx.stack.name) {
            match current.get(segment) {
                Some(section) if section.is_object() => {
                    scopes.push(section);
                    current = section;
                }
                _ => break,
            }
        }

        let value = scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(key))
            .ok_or_else(|| {
                invalid_argument(
                    ctx,
                    format!("Variable '{}' not found in {}", key, path.display()),
                )
            })?;

        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
            _ => Err(invalid_argument(
                ctx,
                format!("Variable '{}' is not a scalar", key),
            )),
        }
    }
}

/// Variables available to command templates, shell-quoted.
pub(crate) fn command_vars(ctx: &StackContext<'_>, argument: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert(TemplateVars::ARGUMENT.to_string(), quote_arg(argument));
    vars.insert(TemplateVars::STACK_NAME.to_string(), quote_arg(&ctx.stack.name));
    vars.insert(
        TemplateVars::EXTERNAL_NAME.to_string(),
        quote_arg(&ctx.stack.external_name()),
    );
    vars.insert(
        TemplateVars::PROJECT_CODE.to_string(),
        quote_arg(&ctx.stack.project_code),
    );
    vars
}

/// Resolver declared by a manifest; its value is the command's trimmed stdout.
pub struct CommandResolver {
    manifest: CapabilityManifest,
}

impl Capability for CommandResolver {
    fn type_name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> Option<&str> {
        self.manifest.description.as_deref()
    }
}

impl Resolver for CommandResolver {
    fn resolve(&self, ctx: &StackContext<'_>, argument: &str) -> Result<String> {
        let command = render_map(&self.manifest.command, &command_vars(ctx, argument));
        run_checked(&command, Some(ctx.project_dir), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::FakeControlPlane;
    use crate::connection::ConnectionManager;
    use crate::retry::RetryPolicy;
    use crate::stack::{Stack, StackConfig};
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        plane: Arc<FakeControlPlane>,
        connection: ConnectionManager,
        stack: Stack,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let plane = Arc::new(FakeControlPlane::default());
            Self {
                connection: ConnectionManager::new(plane.clone(), RetryPolicy::default()),
                plane,
                stack: Stack::new("dev/ew1/subnet", "prj", StackConfig::default()).unwrap(),
                dir: TempDir::new().unwrap(),
            }
        }

        fn ctx(&self) -> StackContext<'_> {
            StackContext {
                stack: &self.stack,
                connection: &self.connection,
                project_dir: self.dir.path(),
            }
        }

        fn outputs(&self, outputs: Value) {
            self.plane.push(
                "DescribeStacks",
                Ok(json!({ "Stacks": [{ "StackStatus": "CREATE_COMPLETE", "Outputs": outputs }] })),
            );
        }
    }

    #[test]
    fn builtin_resolvers_register_under_snake_case_keys() {
        let registry = CapabilityRegistry::<dyn Resolver>::builtin().unwrap();
        assert_eq!(
            registry.keys(),
            vec![
                "environment_variable",
                "file_contents",
                "project_variables",
                "stack_output",
                "stack_output_external",
            ]
        );
    }

    #[test]
    fn environment_variable_reads_process_env() {
        let fixture = Fixture::new();
        std::env::set_var("STRATA_TEST_RESOLVER_VALUE", "s3cret");

        let value = EnvironmentVariable
            .resolve(&fixture.ctx(), "STRATA_TEST_RESOLVER_VALUE")
            .unwrap();
        assert_eq!(value, "s3cret");
    }

    #[test]
    fn environment_variable_unset_is_an_error() {
        let fixture = Fixture::new();
        let err = EnvironmentVariable
            .resolve(&fixture.ctx(), "STRATA_TEST_RESOLVER_NEVER_SET")
            .unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn file_contents_reads_relative_to_project() {
        let fixture = Fixture::new();
        fs::write(fixture.dir.path().join("key.pub"), "ssh-ed25519 AAAA").unwrap();

        let value = FileContents.resolve(&fixture.ctx(), "key.pub").unwrap();
        assert_eq!(value, "ssh-ed25519 AAAA");
    }

    #[test]
    fn stack_output_resolves_sibling_reference() {
        let fixture = Fixture::new();
        fixture.outputs(json!([{ "OutputKey": "VpcId", "OutputValue": "vpc-123" }]));

        let value = StackOutput.resolve(&fixture.ctx(), "vpc::VpcId").unwrap();

        assert_eq!(value, "vpc-123");
        assert_eq!(
            fixture.plane.calls_to("DescribeStacks")[0]["StackName"],
            "prj-dev-ew1-vpc"
        );
    }

    #[test]
    fn stack_output_missing_key_lists_available() {
        let fixture = Fixture::new();
        fixture.outputs(json!([{ "OutputKey": "VpcId", "OutputValue": "vpc-123" }]));

        let err = StackOutput
            .resolve(&fixture.ctx(), "prod/vpc::SubnetId")
            .unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert_eq!(err.details["tried"][0], "VpcId");
        assert_eq!(
            fixture.plane.calls_to("DescribeStacks")[0]["StackName"],
            "prj-prod-vpc"
        );
    }

    #[test]
    fn stack_output_requires_separator() {
        let fixture = Fixture::new();
        let err = StackOutput.resolve(&fixture.ctx(), "vpc").unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn stack_output_external_uses_name_verbatim() {
        let fixture = Fixture::new();
        fixture.outputs(json!([{ "OutputKey": "Arn", "OutputValue": "arn:x" }]));

        let value = StackOutputExternal
            .resolve(&fixture.ctx(), "shared-dns::Arn")
            .unwrap();

        assert_eq!(value, "arn:x");
        assert_eq!(
            fixture.plane.calls_to("DescribeStacks")[0]["StackName"],
            "shared-dns"
        );
    }

    #[test]
    fn project_variables_prefer_most_specific_scope() {
        let fixture = Fixture::new();
        fs::write(
            fixture.dir.path().join("vars.yaml"),
            "InstanceType: t3.micro\nCount: 1\ndev:\n  Count: 2\n  ew1:\n    InstanceType: m5.large\n",
        )
        .unwrap();

        let ctx = fixture.ctx();
        assert_eq!(
            ProjectVariables.resolve(&ctx, "vars.yaml::InstanceType").unwrap(),
            "m5.large"
        );
        assert_eq!(ProjectVariables.resolve(&ctx, "vars.yaml::Count").unwrap(), "2");
        assert!(ProjectVariables.resolve(&ctx, "vars.yaml::Missing").is_err());
    }

    #[test]
    fn resolve_parameters_mixes_literals_and_resolvers() {
        let mut fixture = Fixture::new();
        fs::write(fixture.dir.path().join("motd.txt"), "hello").unwrap();
        let mut config = StackConfig::default();
        config.parameters.insert(
            "Literal".to_string(),
            ParameterValue::Literal("plain".to_string()),
        );
        config.parameters.insert(
            "Banner".to_string(),
            ParameterValue::Resolved {
                resolver: "file_contents".to_string(),
                argument: "motd.txt".to_string(),
            },
        );
        fixture.stack = Stack::new("dev/web", "prj", config).unwrap();

        let registry = CapabilityRegistry::<dyn Resolver>::builtin().unwrap();
        let resolved = resolve_parameters(&fixture.ctx(), &registry).unwrap();

        assert_eq!(resolved["Literal"], "plain");
        assert_eq!(resolved["Banner"], "hello");
    }

    #[test]
    fn unknown_resolver_is_capability_not_found() {
        let mut fixture = Fixture::new();
        let mut config = StackConfig::default();
        config.parameters.insert(
            "Secret".to_string(),
            ParameterValue::Resolved {
                resolver: "vault".to_string(),
                argument: "db".to_string(),
            },
        );
        fixture.stack = Stack::new("dev/web", "prj", config).unwrap();

        let registry = CapabilityRegistry::<dyn Resolver>::builtin().unwrap();
        let err = resolve_parameters(&fixture.ctx(), &registry).unwrap_err();
        assert_eq!(err.code.as_str(), "capability.not_found");
    }

    #[test]
    fn command_vars_cover_every_template_variable() {
        let fixture = Fixture::new();
        let vars = command_vars(&fixture.ctx(), "db password");

        let mut keys: Vec<_> = vars.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["argument", "external_name", "project_code", "stack_name"]);
        assert_eq!(vars[TemplateVars::ARGUMENT], "'db password'");
        assert_eq!(vars[TemplateVars::PROJECT_CODE], "prj");
    }

    #[cfg(not(windows))]
    #[test]
    fn command_resolver_renders_quoted_variables() {
        let fixture = Fixture::new();
        let resolver = CommandResolver {
            manifest: CapabilityManifest {
                name: "Echo".to_string(),
                kind: CapabilityKind::Resolver,
                command: "echo {{external_name}}:{{argument}}".to_string(),
                description: None,
                source: PathBuf::new(),
            },
        };

        let value = resolver.resolve(&fixture.ctx(), "it's here").unwrap();
        assert_eq!(value, "prj-dev-ew1-subnet:it's here");
    }
}
