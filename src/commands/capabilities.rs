use clap::Args;
use serde::Serialize;

use strata::registry::{CapabilityEntry, CapabilityKind};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct CapabilitiesArgs {
    /// Only list one kind
    #[arg(long, value_parser = ["resolver", "hook"])]
    pub kind: Option<String>,
}

#[derive(Serialize)]
pub struct CapabilitiesOutput {
    pub capabilities: Vec<CapabilityEntry>,
}

pub fn run(args: CapabilitiesArgs, global: &GlobalArgs) -> CmdResult<CapabilitiesOutput> {
    let project = global.load_project()?;

    let capabilities = project
        .capabilities()
        .into_iter()
        .filter(|entry| match args.kind.as_deref() {
            Some("resolver") => entry.kind == CapabilityKind::Resolver,
            Some("hook") => entry.kind == CapabilityKind::Hook,
            _ => true,
        })
        .collect();

    Ok((CapabilitiesOutput { capabilities }, 0))
}
