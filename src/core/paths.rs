use std::path::{Path, PathBuf};

/// Project settings file, at the root of the project directory.
pub const SETTINGS_FILE: &str = "strata.json";

/// Default environment tree file, relative to the project directory.
pub const DEFAULT_ENVIRONMENTS_FILE: &str = "environments.json";

/// Resolve a configured path: `~` is expanded, relative paths are taken from
/// the project directory.
pub fn project_relative(project_dir: &Path, value: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(value).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        project_dir.join(expanded)
    }
}

pub fn settings_file(project_dir: &Path) -> PathBuf {
    project_dir.join(SETTINGS_FILE)
}

pub fn environments_file(project_dir: &Path, configured: &str) -> PathBuf {
    project_relative(project_dir, configured)
}

/// Capability manifest directories, in configuration order.
pub fn capability_dirs(project_dir: &Path, configured: &[String]) -> Vec<PathBuf> {
    configured
        .iter()
        .map(|dir| project_relative(project_dir, dir))
        .collect()
}
