use std::collections::BTreeMap;

use clap::Args;
use serde::Serialize;

use strata::stack::{StackStatus, TemplateValidation};
use strata::BulkResult;

use super::{bulk_exit_code, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct DescribeArgs {
    /// Stack or environment path; the whole project when omitted
    #[arg(default_value = "")]
    pub path: String,
}

#[derive(Debug, Clone, Copy)]
pub enum View {
    Status,
    Outputs,
    Validate,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum DescribeOutput {
    Status(BulkResult<StackStatus>),
    Outputs(BulkResult<BTreeMap<String, String>>),
    Validate(BulkResult<TemplateValidation>),
}

pub fn run(args: DescribeArgs, global: &GlobalArgs, view: View) -> CmdResult<DescribeOutput> {
    let project = global.load_project()?;
    let orchestrator = project.connect()?;

    match view {
        View::Status => {
            let bulk = BulkResult::from_leaf_results("describe", orchestrator.describe(&args.path)?);
            let exit_code = bulk_exit_code(&bulk);
            Ok((DescribeOutput::Status(bulk), exit_code))
        }
        View::Outputs => {
            let bulk = BulkResult::from_leaf_results("outputs", orchestrator.outputs(&args.path)?);
            let exit_code = bulk_exit_code(&bulk);
            Ok((DescribeOutput::Outputs(bulk), exit_code))
        }
        View::Validate => {
            let bulk = BulkResult::from_leaf_results("validate", orchestrator.validate(&args.path)?);
            let exit_code = bulk_exit_code(&bulk);
            Ok((DescribeOutput::Validate(bulk), exit_code))
        }
    }
}
