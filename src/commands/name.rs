use clap::Args;
use serde::Serialize;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct NameArgs {
    /// Stack or environment path (e.g. dev/ew1/vpc)
    pub path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameOutput {
    pub path: String,
    pub external_name: String,
    /// Stacks under the path, for environments.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<String>,
}

pub fn run(args: NameArgs, global: &GlobalArgs) -> CmdResult<NameOutput> {
    let project = global.load_project()?;
    let external_name = project.external_name(&args.path)?;

    let node = project.root.find(&args.path)?;
    let stacks = if node.as_stack().is_some() {
        Vec::new()
    } else {
        node.leaf_names()
    };

    Ok((
        NameOutput {
            path: args.path,
            external_name,
            stacks,
        },
        0,
    ))
}
