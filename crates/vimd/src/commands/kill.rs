//! `vimd kill` command implementation.

use clap::Args;
use vimd_session::{CleanupResult, SessionRegistry};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the kill command.
#[derive(Args)]
pub(crate) struct KillArgs {
    /// Only stop the session on this port.
    #[arg(short, long, conflicts_with = "all")]
    port: Option<u16>,

    /// Stop every running session (default).
    #[arg(long)]
    all: bool,
}

impl KillArgs {
    /// Execute the kill command.
    ///
    /// # Errors
    ///
    /// Returns an error if the session registry cannot be written.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let registry = SessionRegistry::open_default();
        let port = if self.all { None } else { self.port };

        let summary = kill_sessions(&registry, port, &output)?;

        if summary.html_removed > 0 {
            output.success(&format!(
                "Removed {} preview file(s)",
                summary.html_removed
            ));
        }
        if summary.killed > 0 || summary.html_removed > 0 {
            output.success("All sessions terminated");
        }
        Ok(())
    }
}

/// Totals reported after a kill run.
#[derive(Debug, Default, PartialEq, Eq)]
struct KillSummary {
    /// Entries found and processed.
    targeted: usize,
    killed: usize,
    html_removed: usize,
}

/// Sweep dead sessions, then shut down the session on `port`, or all
/// sessions when `port` is `None`.
fn kill_sessions(
    registry: &SessionRegistry,
    port: Option<u16>,
    output: &Output,
) -> Result<KillSummary, CliError> {
    let cleaned = registry.clean_dead()?;
    if cleaned > 0 {
        output.info(&format!("Cleaned {cleaned} dead session(s)"));
    }

    let sessions = registry.load_all();
    if sessions.is_empty() {
        output.info("No active sessions found");
        return Ok(KillSummary::default());
    }

    let ports: Vec<u16> = match port {
        Some(port) if sessions.contains_key(&port) => vec![port],
        Some(port) => {
            output.warning(&format!("No session found on port {port}"));
            return Ok(KillSummary::default());
        }
        None => sessions.keys().copied().collect(),
    };
    output.info(&format!("Found {} active session(s)", ports.len()));

    let mut summary = KillSummary {
        targeted: ports.len(),
        ..KillSummary::default()
    };
    for port in ports {
        let result = registry.cleanup_on_port(port)?;
        report(port, &result, output);
        summary.killed += usize::from(result.killed);
        summary.html_removed += usize::from(result.html_removed);
    }
    Ok(summary)
}

fn report(port: u16, result: &CleanupResult, output: &Output) {
    if result.killed {
        let pid = result.pid.unwrap_or_default();
        output.success(&format!("Killed session on port {port} (PID: {pid})"));
    } else if let Some(reason) = result.skip_reason {
        output.info(&format!("Port {port}: {reason}"));
    }
}
