use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,
    ConfigIdCollision,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    EnvironmentNotFound,
    StackNotFound,

    RemoteCallFailed,
    RemoteRetryLimitExceeded,
    RemoteTimeout,

    StackProtected,
    StackOperationFailed,
    HookFailed,
    CommandFailed,

    CapabilityInvalidSource,
    CapabilityKeyCollision,
    CapabilityNotFound,

    DispatchDuplicateLeaf,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigIdCollision => "config.id_collision",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::EnvironmentNotFound => "environment.not_found",
            ErrorCode::StackNotFound => "stack.not_found",

            ErrorCode::RemoteCallFailed => "remote.call_failed",
            ErrorCode::RemoteRetryLimitExceeded => "remote.retry_limit_exceeded",
            ErrorCode::RemoteTimeout => "remote.timeout",

            ErrorCode::StackProtected => "stack.protected",
            ErrorCode::StackOperationFailed => "stack.operation_failed",
            ErrorCode::HookFailed => "hook.failed",
            ErrorCode::CommandFailed => "command.failed",

            ErrorCode::CapabilityInvalidSource => "capability.invalid_source",
            ErrorCode::CapabilityKeyCollision => "capability.key_collision",
            ErrorCode::CapabilityNotFound => "capability.not_found",

            ErrorCode::DispatchDuplicateLeaf => "dispatch.duplicate_leaf",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigIdCollisionDetails {
    pub id: String,
    pub requested_type: String,
    pub existing_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalNameCollisionDetails {
    pub external_name: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCallFailedDetails {
    pub operation: String,
    pub provider_code: Value,
    pub provider_message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryLimitExceededDetails {
    pub operation: String,
    pub attempts: u32,
    pub last_message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackProtectedDetails {
    pub stack_name: String,
    pub external_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackOperationFailedDetails {
    pub stack_name: String,
    pub operation: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookFailedDetails {
    pub event: String,
    pub hook: String,
    pub argument: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySourceDetails {
    pub path: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityKeyCollisionDetails {
    pub key: String,
    pub existing: String,
    pub duplicate: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateLeafDetails {
    pub leaf: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn environment_not_found(path: impl Into<String>, available: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::EnvironmentNotFound,
            "Environment or stack not found",
            path,
            available,
        )
        .with_hint("Run 'strata describe' at the root to list every configured stack")
    }

    pub fn stack_not_found(name: impl Into<String>, available: Vec<String>) -> Self {
        Self::not_found(ErrorCode::StackNotFound, "Stack not found", name, available)
    }

    pub fn capability_not_found(key: impl Into<String>, available: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::CapabilityNotFound,
            "Capability not registered",
            key,
            available,
        )
        .with_hint("Run 'strata capabilities' to see registered resolvers and hooks")
    }

    fn not_found(
        code: ErrorCode,
        message: &str,
        id: impl Into<String>,
        available: Vec<String>,
    ) -> Self {
        let details = to_details(NotFoundDetails {
            id: id.into(),
            available,
        });
        Self::new(code, message, details)
    }

    pub fn remote_call_failed(operation: impl Into<String>, err: &RemoteError) -> Self {
        let details = to_details(RemoteCallFailedDetails {
            operation: operation.into(),
            provider_code: serde_json::to_value(&err.code).unwrap_or(Value::Null),
            provider_message: err.message.clone(),
        });

        Self::new(
            ErrorCode::RemoteCallFailed,
            format!("Remote call failed: {}", err.message),
            details,
        )
    }

    pub fn retry_limit_exceeded(
        operation: impl Into<String>,
        attempts: u32,
        last_message: impl Into<String>,
    ) -> Self {
        let details = to_details(RetryLimitExceededDetails {
            operation: operation.into(),
            attempts,
            last_message: last_message.into(),
        });

        let mut err = Self::new(
            ErrorCode::RemoteRetryLimitExceeded,
            format!("Gave up after {} throttled attempts", attempts),
            details,
        )
        .with_hint("The control plane is rate limiting requests; retry later");
        err.retryable = Some(true);
        err
    }

    pub fn remote_timeout(stack_name: impl Into<String>, operation: impl Into<String>) -> Self {
        let stack_name = stack_name.into();
        Self::new(
            ErrorCode::RemoteTimeout,
            format!("Timed out waiting for '{}' to settle", stack_name),
            serde_json::json!({ "stackName": stack_name, "operation": operation.into() }),
        )
    }

    pub fn stack_protected(stack_name: impl Into<String>, external_name: impl Into<String>) -> Self {
        let external_name = external_name.into();
        let details = to_details(StackProtectedDetails {
            stack_name: stack_name.into(),
            external_name: external_name.clone(),
        });

        Self::new(
            ErrorCode::StackProtected,
            format!("Cannot modify protected stack '{}'", external_name),
            details,
        )
        .with_hint("Set \"protect\": false in the stack configuration to allow changes")
    }

    pub fn stack_operation_failed(
        stack_name: impl Into<String>,
        operation: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        let stack_name = stack_name.into();
        let operation = operation.into();
        let status = status.into();
        let message = format!("{} of '{}' ended in {}", operation, stack_name, status);
        let details = to_details(StackOperationFailedDetails {
            stack_name,
            operation,
            status,
        });

        Self::new(ErrorCode::StackOperationFailed, message, details)
    }

    pub fn hook_failed(details: HookFailedDetails) -> Self {
        let message = format!("Hook '{}' failed during {}", details.hook, details.event);
        Self::new(ErrorCode::HookFailed, message, to_details(details))
    }

    pub fn command_failed(details: CommandFailedDetails) -> Self {
        let message = format!(
            "Command exited with {}: {}",
            details.exit_code, details.command
        );
        Self::new(ErrorCode::CommandFailed, message, to_details(details))
    }

    pub fn capability_invalid_source(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let details = to_details(CapabilitySourceDetails {
            path: path.into(),
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::CapabilityInvalidSource,
            "Invalid capability source",
            details,
        )
    }

    pub fn capability_key_collision(
        key: impl Into<String>,
        existing: impl Into<String>,
        duplicate: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let details = to_details(CapabilityKeyCollisionDetails {
            key: key.clone(),
            existing: existing.into(),
            duplicate: duplicate.into(),
        });

        Self::new(
            ErrorCode::CapabilityKeyCollision,
            format!("Capability key '{}' is registered twice", key),
            details,
        )
    }

    pub fn dispatch_duplicate_leaf(leaf: impl Into<String>) -> Self {
        let leaf = leaf.into();
        let details = to_details(DuplicateLeafDetails { leaf: leaf.clone() });

        Self::new(
            ErrorCode::DispatchDuplicateLeaf,
            format!("Leaf '{}' appears in more than one branch", leaf),
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let details = to_details(ConfigMissingKeyDetails {
            key: key.into(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let details = serde_json::json!({
            "path": path.into(),
            "error": err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid configuration file",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn config_id_collision(
        id: impl Into<String>,
        requested_type: impl Into<String>,
        existing_type: impl Into<String>,
    ) -> Self {
        let existing = existing_type.into();
        let id_str = id.into();
        let details = to_details(ConfigIdCollisionDetails {
            id: id_str.clone(),
            requested_type: requested_type.into(),
            existing_type: existing.clone(),
        });

        Self::new(
            ErrorCode::ConfigIdCollision,
            format!("ID '{}' already exists as a {}", id_str, existing),
            details,
        )
    }

    /// Two logical paths that map to the same remote stack.
    pub fn config_external_name_collision(
        external_name: impl Into<String>,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        let external_name = external_name.into();
        let paths = vec![first.into(), second.into()];
        let message = format!(
            "'{}' and '{}' both map to external name '{}'",
            paths[0], paths[1], external_name
        );
        let details = to_details(ExternalNameCollisionDetails {
            external_name,
            paths,
        });

        Self::new(ErrorCode::ConfigIdCollision, message, details)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": error.into(),
            "context": context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}
