use clap::Args;

use strata::project::LeafResults;
use strata::stack::StackStatus;
use strata::BulkResult;

use super::{bulk_exit_code, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct LifecycleArgs {
    /// Stack or environment path (e.g. dev/ew1/vpc); the whole project when omitted
    #[arg(default_value = "")]
    pub path: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub target: LifecycleArgs,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum Action {
    Launch,
    Create,
    Update,
    Delete,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Launch => "launch",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

pub fn run(
    args: LifecycleArgs,
    global: &GlobalArgs,
    action: Action,
) -> CmdResult<BulkResult<StackStatus>> {
    let project = global.load_project()?;
    let orchestrator = project.connect()?;

    let results: LeafResults<StackStatus> = match action {
        Action::Launch => orchestrator.launch(&args.path)?,
        Action::Create => orchestrator.create(&args.path)?,
        Action::Update => orchestrator.update(&args.path)?,
        Action::Delete => orchestrator.delete(&args.path)?,
    };

    let bulk = BulkResult::from_leaf_results(action.as_str(), results);
    let exit_code = bulk_exit_code(&bulk);
    Ok((bulk, exit_code))
}

pub fn run_delete(args: DeleteArgs, global: &GlobalArgs) -> CmdResult<BulkResult<StackStatus>> {
    if !args.yes {
        if !crate::tty::require_tty_for_interactive() {
            return Err(strata::Error::validation_missing_argument(vec![
                "--yes".to_string(),
            ])
            .with_hint("Pass --yes to delete without an interactive prompt"));
        }

        let project = global.load_project()?;
        let stacks = project.root.find(&args.target.path)?.leaf_names();
        let answer = crate::tty::prompt(&format!(
            "Delete {} stack(s): {}? [y/N] ",
            stacks.len(),
            stacks.join(", ")
        ))?;

        if !matches!(answer.to_lowercase().as_str(), "y" | "yes") {
            return Ok((
                BulkResult::from_leaf_results(Action::Delete.as_str(), LeafResults::new()),
                0,
            ));
        }
    }

    run(args.target, global, Action::Delete)
}
