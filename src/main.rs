//! Command-line driver
//!
//! Three ways in:
//!
//! ```text
//! relaysrv --server               start the HTTP server
//! relaysrv < program.json         run a program piped on stdin
//! relaysrv one.json two.json      run program files sequentially
//! ```

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::error;

use relaysrv::config::ServerConfig;
use relaysrv::context::ClientContext;
use relaysrv::executor::run_program;
use relaysrv::program::{parse_program, Program, STDIN_PATH};
use relaysrv::server::Server;

/// Programmable controller for Ethernet-attached Modbus/TCP relay boards.
#[derive(Parser, Debug)]
#[command(name = "relaysrv", version, about, long_about = None)]
struct Args {
    /// Start the HTTP server instead of running programs directly
    #[arg(long)]
    server: bool,

    /// Program JSON files to run sequentially
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    relaysrv::logging::init("relaysrv=info");

    let args = Args::parse();

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    if args.server {
        let server = Server::new(ServerConfig::from_env(), cancel);
        return match server.serve().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "failed to start server");
                ExitCode::FAILURE
            }
        };
    }

    let programs = match gather_programs(&args.files) {
        Ok(programs) => programs,
        Err(code) => return code,
    };

    if programs.is_empty() {
        let _ = Args::command().print_help();
        return ExitCode::FAILURE;
    }

    let context = Arc::new(ClientContext::new());
    let mut final_failed = false;

    for program in &programs {
        match run_program(program, context.clone(), &cancel).await {
            Ok(()) => final_failed = false,
            Err(e) => {
                let label = program.path.as_deref().unwrap_or(&program.slug);
                eprintln!("Execution of program '{label}' failed: {e}");
                final_failed = true;
            }
        }
    }

    if final_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Collect programs from stdin (when piped and non-empty) and from each
/// positional file argument, in that order. Unreadable files are reported
/// and skipped; unparseable programs abort with a failure exit code.
fn gather_programs(files: &[PathBuf]) -> Result<Vec<Program>, ExitCode> {
    let mut programs = Vec::new();

    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        let mut bytes = Vec::new();
        if let Err(e) = stdin.lock().read_to_end(&mut bytes) {
            eprintln!("Failed to read program from stdin: {e}");
            return Err(ExitCode::FAILURE);
        }
        if !bytes.is_empty() {
            match parse_program(&bytes) {
                Ok(mut program) => {
                    program.path = Some(STDIN_PATH.to_string());
                    programs.push(program);
                }
                Err(e) => {
                    eprintln!("Failed to parse program from stdin: {e}");
                    return Err(ExitCode::FAILURE);
                }
            }
        }
    }

    for (index, file) in files.iter().enumerate() {
        let bytes = match std::fs::read(file) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!(
                    "Failed to read program file {} at argument index {index}: {e}",
                    file.display()
                );
                continue;
            }
        };
        match parse_program(&bytes) {
            Ok(mut program) => {
                program.path = Some(file.display().to_string());
                programs.push(program);
            }
            Err(e) => {
                eprintln!("Failed to parse program from file {}: {e}", file.display());
                return Err(ExitCode::FAILURE);
            }
        }
    }

    Ok(programs)
}
