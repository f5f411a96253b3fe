use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{capabilities, describe, lifecycle, name};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "strata")]
#[command(version = VERSION)]
#[command(about = "Orchestrate infrastructure stacks across nested environments")]
struct Cli {
    /// Project directory holding strata.json
    #[arg(long, global = true, default_value = ".")]
    dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, update or replace every stack under a path
    Launch(lifecycle::LifecycleArgs),
    /// Create every stack under a path
    Create(lifecycle::LifecycleArgs),
    /// Update every stack under a path
    Update(lifecycle::LifecycleArgs),
    /// Delete every stack under a path
    Delete(lifecycle::DeleteArgs),
    /// Check the template of every stack under a path
    Validate(describe::DescribeArgs),
    /// Show the status of every stack under a path
    Describe(describe::DescribeArgs),
    /// Show the outputs of every stack under a path
    Outputs(describe::DescribeArgs),
    /// Print the external name of a stack or environment
    Name(name::NameArgs),
    /// List registered resolvers and hooks
    Capabilities(capabilities::CapabilitiesArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs { dir: cli.dir };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
