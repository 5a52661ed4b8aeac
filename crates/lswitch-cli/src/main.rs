//! lswitch_cli - operator shell for the P4 linker switch
//!
//! Thin marshaling layer over the lswitchd RPC surface. Prints the numeric
//! status of each call, like the runtime CLI it stands in for.

mod client;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lswitch_registry::{LinkerSwitchRequest, LinkerSwitchResponse, Status};
use tracing_subscriber::EnvFilter;

use crate::client::{read_program_config, LinkerSwitchClient};

/// Operator shell for the P4 linker switch
#[derive(Parser, Debug)]
#[command(name = "lswitch_cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// lswitchd base URL
    #[arg(short = 's', long, default_value = "http://127.0.0.1:9091")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Add P4 program compiled into json file
    #[command(name = "p4_program_config_add")]
    Add {
        /// Program name
        program_name: String,
        /// Path to the compiled .json file
        path: PathBuf,
    },

    /// Remove P4 program config
    #[command(name = "p4_program_config_delete")]
    Delete {
        /// Program name
        program_name: String,
    },

    /// List registered P4 programs
    #[command(name = "p4_program_config_list")]
    List,

    /// Show one registered P4 program
    #[command(name = "p4_program_config_show")]
    Show {
        /// Program name
        program_name: String,
    },
}

impl Command {
    /// Builds the RPC request, running client-side checks first.
    fn into_request(self) -> Result<LinkerSwitchRequest> {
        Ok(match self {
            Command::Add { program_name, path } => LinkerSwitchRequest::P4ProgramConfigAdd {
                program_name,
                config_str: read_program_config(&path)?,
            },
            Command::Delete { program_name } => {
                LinkerSwitchRequest::P4ProgramConfigDelete { program_name }
            }
            Command::List => LinkerSwitchRequest::P4ProgramConfigList,
            Command::Show { program_name } => {
                LinkerSwitchRequest::P4ProgramConfigGet { program_name }
            }
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    match run(args).await {
        Ok(response) if response.status == Status::Success.code() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<LinkerSwitchResponse> {
    let client = LinkerSwitchClient::new(&args.server);
    if matches!(args.command, Command::Add { .. }) {
        println!("Adding Json config");
    }

    let request = args.command.into_request()?;
    let response = client.call(&request).await?;

    print!("{}", render(&response));
    Ok(response)
}

/// Formats a response the way the shell prints it.
fn render(response: &LinkerSwitchResponse) -> String {
    let mut out = format!("{}\n", response.status);

    if let Some(message) = &response.message {
        let name = response
            .status()
            .map_or_else(|| "Unknown".to_string(), |s| s.to_string());
        out.push_str(&format!("{}: {}\n", name, message));
    }
    if let Some(programs) = &response.programs {
        for name in programs {
            out.push_str(&format!("{}\n", name));
        }
    }
    if let Some(program) = &response.program {
        out.push_str(&format!(
            "{} v{} ({})\n",
            program.name, program.version, program.state
        ));
        if let Some(staged) = program.staged_version {
            out.push_str(&format!("  staged: v{}\n", staged));
        }
        let summary = &program.summary;
        out.push_str(&format!(
            "  header_types: {}, headers: {}, parsers: {}, pipelines: {}, size: {} bytes\n",
            summary.header_types,
            summary.headers,
            summary.parsers,
            summary.pipelines,
            summary.size_bytes
        ));
    }

    out
}
