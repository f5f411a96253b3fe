use std::path::PathBuf;

use strata::project::Project;

pub type CmdResult<T> = strata::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub dir: String,
}

impl GlobalArgs {
    pub fn project_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).as_ref())
    }

    pub fn load_project(&self) -> strata::Result<Project> {
        Project::load(&self.project_dir())
    }
}

/// Exit code for a bulk run: 0 when every stack succeeded, 1 otherwise.
pub(crate) fn bulk_exit_code<T: serde::Serialize>(result: &strata::BulkResult<T>) -> i32 {
    if result.has_failures() {
        1
    } else {
        0
    }
}

pub mod capabilities;
pub mod describe;
pub mod lifecycle;
pub mod name;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
    ($args:expr, $global:expr, $module:ident, $action:expr) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global, $action))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (strata::Result<serde_json::Value>, i32) {
    use lifecycle::Action;

    match command {
        crate::Commands::Launch(args) => dispatch!(args, global, lifecycle, Action::Launch),
        crate::Commands::Create(args) => dispatch!(args, global, lifecycle, Action::Create),
        crate::Commands::Update(args) => dispatch!(args, global, lifecycle, Action::Update),
        crate::Commands::Delete(args) => {
            crate::output::map_cmd_result_to_json(lifecycle::run_delete(args, global))
        }
        crate::Commands::Validate(args) => dispatch!(args, global, describe, describe::View::Validate),
        crate::Commands::Describe(args) => dispatch!(args, global, describe, describe::View::Status),
        crate::Commands::Outputs(args) => dispatch!(args, global, describe, describe::View::Outputs),
        crate::Commands::Name(args) => dispatch!(args, global, name),
        crate::Commands::Capabilities(args) => dispatch!(args, global, capabilities),
    }
}
