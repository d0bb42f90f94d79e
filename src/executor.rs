//! Program executor
//!
//! Runs a parsed [`Program`] against its device: opens one connection, walks
//! the command groups `loops` times in strict order, pauses between groups,
//! and closes the connection on every exit path (the transport drops with
//! the run). Any command failure aborts the whole run, annotated with the
//! loop/group/command position where it happened.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::ClientContext;
use crate::error::{RelayError, RelayResult};
use crate::program::Program;
use crate::transport::{TcpTransport, TransportOptions};

/// Whether a delay belongs after group `group_index` of loop `loop_index`.
///
/// Delays separate consecutive groups of the loop-expanded sequence, so the
/// final group of the final loop takes none; a run never ends stalled in a
/// sleep.
#[inline]
fn pause_follows_group(loop_index: i64, loops: i64, group_index: usize, groups: usize) -> bool {
    group_index + 1 < groups || loop_index + 1 < loops
}

/// Execute a program to completion.
pub async fn run_program(
    program: &Program,
    context: Arc<ClientContext>,
    cancel: &CancellationToken,
) -> RelayResult<()> {
    run_program_with_options(program, context, TransportOptions::default(), cancel).await
}

/// Execute a program with explicit transport tuning.
pub async fn run_program_with_options(
    program: &Program,
    context: Arc<ClientContext>,
    options: TransportOptions,
    cancel: &CancellationToken,
) -> RelayResult<()> {
    let mut transport =
        TcpTransport::connect(&program.address, context, options, cancel).await?;

    let loops = program.effective_loops();
    let groups = program.commands.len();
    debug!(
        slug = %program.slug,
        address = %program.address,
        loops,
        groups,
        "starting command execution"
    );

    for loop_index in 0..loops {
        debug!(loop_number = loop_index + 1, loops, "starting loop");
        for (group_index, group) in program.commands.iter().enumerate() {
            for (command_index, command) in group.iter().enumerate() {
                if program.debug {
                    info!(
                        loop_number = loop_index + 1,
                        group_number = group_index + 1,
                        command_number = command_index + 1,
                        action = ?command.command,
                        relay = command.relay,
                        "executing command"
                    );
                } else {
                    debug!(
                        loop_number = loop_index + 1,
                        group_number = group_index + 1,
                        command_number = command_index + 1,
                        action = ?command.command,
                        relay = command.relay,
                        "executing command"
                    );
                }

                transport
                    .send(&command.to_request(), cancel)
                    .await
                    .map_err(|err| {
                        RelayError::context(
                            format!(
                                "failure in loop {}, command group {}, command {} ({:?} relay {})",
                                loop_index + 1,
                                group_index + 1,
                                command_index + 1,
                                command.command,
                                command.relay
                            ),
                            err,
                        )
                    })?;
            }

            if program.command_interval_millis > 0
                && pause_follows_group(loop_index, loops, group_index, groups)
            {
                debug!(
                    milliseconds = program.command_interval_millis,
                    loop_number = loop_index + 1,
                    group_number = group_index + 1,
                    "waiting before next command group"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(
                        program.command_interval_millis as u64,
                    )) => {}
                }
            }
        }
    }

    let stats = transport.stats();
    info!(
        slug = %program.slug,
        address = %program.address,
        requests = stats.requests_sent,
        responses = stats.responses_received,
        "program completed"
    );
    Ok(())
}
