//! Stack path and external name rules.
//!
//! Stacks are addressed by slash-delimited logical paths (`dev/ew1/vpc`):
//! every segment but the last names an environment, the last names the stack.
//! The control plane only sees the external name, which prefixes the project
//! code and joins every segment with `-` (`prj-dev-ew1-vpc`).

use std::sync::LazyLock;

use heck::ToSnakeCase;
use regex::Regex;

use crate::error::{Error, Result};

pub const PATH_SEPARATOR: char = '/';
pub const EXTERNAL_SEPARATOR: &str = "-";

/// Longest stack name the control plane accepts.
pub const MAX_EXTERNAL_NAME_LEN: usize = 128;

static EXTERNAL_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap());

/// Split a logical path into its segments, root first.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR).collect()
}

/// Reject paths with empty segments (`dev//vpc`, `/dev`, `dev/`) or characters
/// that cannot survive the trip into an external name.
pub fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::validation_invalid_argument(
            "path",
            "Stack path cannot be empty",
            None,
            None,
        ));
    }

    for segment in path_segments(path) {
        if segment.is_empty() {
            return Err(Error::validation_invalid_argument(
                "path",
                "Stack path cannot contain empty segments",
                Some(path.to_string()),
                None,
            ));
        }

        if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::validation_invalid_argument(
                "path",
                format!(
                    "Segment '{}' may only contain letters, digits and '-'",
                    segment
                ),
                Some(path.to_string()),
                None,
            ));
        }
    }

    Ok(())
}

/// Join segments back into a logical path.
pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a stack reference relative to the stack that mentions it.
///
/// A bare name (`vpc`) is a sibling of `current_path`; anything containing a
/// separator is already fully qualified and comes back unchanged.
pub fn resolve_relative(current_path: &str, reference: &str) -> String {
    if reference.contains(PATH_SEPARATOR) {
        return reference.to_string();
    }

    let mut segments = path_segments(current_path);
    segments.pop();
    segments.push(reference);
    join_path(&segments)
}

/// Name sent to the control plane for the stack at `path`.
pub fn external_name(project_prefix: &str, path: &str) -> String {
    std::iter::once(project_prefix)
        .chain(path_segments(path))
        .collect::<Vec<_>>()
        .join(EXTERNAL_SEPARATOR)
}

pub fn validate_external_name(name: &str) -> Result<()> {
    if name.len() > MAX_EXTERNAL_NAME_LEN {
        return Err(Error::validation_invalid_argument(
            "external_name",
            format!(
                "External name is {} characters, the limit is {}",
                name.len(),
                MAX_EXTERNAL_NAME_LEN
            ),
            Some(name.to_string()),
            None,
        ));
    }

    if !EXTERNAL_NAME_PATTERN.is_match(name) {
        return Err(Error::validation_invalid_argument(
            "external_name",
            "External name must start with a letter and contain only letters, digits and '-'",
            Some(name.to_string()),
            None,
        ));
    }

    Ok(())
}

/// Registry key for a capability type name: `ASGScheduledActions` becomes
/// `asg_scheduled_actions`, `Bash` becomes `bash`.
pub fn camel_to_snake(name: &str) -> String {
    name.to_snake_case()
}
