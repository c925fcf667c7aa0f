//! `vimd dev` command implementation.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use vimd_config::{CliSettings, Config};
use vimd_server::{ChangeDebouncer, GatewayOptions, ReloadGateway};
use vimd_session::{Session, SessionDir, SessionRegistry};

use crate::convert::{Converter, MarkdownConverter};
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the dev command.
#[derive(Args)]
pub(crate) struct DevArgs {
    /// Markdown file to preview.
    file: PathBuf,

    /// Path to configuration file (default: auto-discover vimd.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

impl DevArgs {
    /// Execute the dev command.
    ///
    /// Runs until interrupted with Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails, the source is missing, the
    /// initial conversion fails, or the server can't start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        output.info("Starting vimd dev...");

        let cli_settings = CliSettings {
            host: self.host,
            port: self.port,
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        if let Some(path) = &config.config_path {
            output.info(&format!("Config: {}", path.display()));
        }
        output.info(&format!("Port: {}", config.server.port));

        let source = std::path::absolute(&self.file)?;
        if !source.is_file() {
            return Err(CliError::SourceNotFound(self.file));
        }

        let mut shutdown = ShutdownSignal::install()?;
        let registry = SessionRegistry::open_default();
        reclaim_port(&registry, config.server.port, &output).await;

        let session_dir = SessionDir::create()?;
        let converter: Arc<dyn Converter> = Arc::new(MarkdownConverter);
        let session = SessionContext {
            config: &config,
            source: &source,
            session_dir: &session_dir,
            registry: &registry,
            output: &output,
        };
        let result = run_session(&session, converter, &mut shutdown).await;
        session_dir.remove();

        if result.is_ok() {
            output.info("Cleanup complete");
        }
        result
    }
}

/// Clear dead registry entries and stop a previous session on `port`.
///
/// Stopping a session may wait for its process to exit, so this runs on the
/// blocking pool. Registry problems are logged and never stop startup.
async fn reclaim_port(registry: &SessionRegistry, port: u16, output: &Output) {
    let registry = registry.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        (registry.clean_dead(), registry.cleanup_on_port(port))
    })
    .await;
    let (cleaned, previous) = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(port, error = %e, "Session cleanup task failed");
            return;
        }
    };

    match cleaned {
        Ok(0) => {}
        Ok(cleaned) => output.info(&format!("Cleaned {cleaned} dead session(s)")),
        Err(e) => tracing::warn!(error = %e, "Failed to clean dead sessions"),
    }

    match previous {
        Ok(previous) if previous.killed => {
            let source = previous
                .previous_source
                .as_deref()
                .map_or_else(String::new, |path| format!(" ({})", path.display()));
            output.info(&format!("Stopped previous session on port {port}{source}"));
        }
        Ok(previous) => {
            if let Some(reason) = previous.skip_reason {
                tracing::info!(port, %reason, "Removed stale session entry");
            }
        }
        Err(e) => tracing::warn!(port, error = %e, "Failed to clean up previous session"),
    }
}

/// Ctrl-C, plus SIGTERM on unix, which is what `vimd kill` sends.
///
/// Installed before startup so a signal arriving early still triggers the
/// normal teardown.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    async fn wait(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result,
                _ = self.terminate.recv() => {
                    tracing::info!("SIGTERM received");
                    Ok(())
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    }
}

/// Everything a running session borrows.
struct SessionContext<'a> {
    config: &'a Config,
    source: &'a Path,
    session_dir: &'a SessionDir,
    registry: &'a SessionRegistry,
    output: &'a Output,
}

/// Convert, serve and watch until shutdown, then tear down the server and the
/// registry entry.
async fn run_session(
    session: &SessionContext<'_>,
    converter: Arc<dyn Converter>,
    shutdown: &mut ShutdownSignal,
) -> Result<(), CliError> {
    let SessionContext {
        config,
        source,
        session_dir,
        registry,
        output,
    } = *session;
    let html_path = session_dir.artifact_path(source);
    let entry_file = html_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    output.info("Converting markdown...");
    converter.convert_to_file(source, &html_path)?;
    output.success("Conversion complete");

    let mut gateway = ReloadGateway::new();
    let options = GatewayOptions::new(session_dir.path(), config.server.port, &config.server.host)
        .with_entry_file(entry_file.clone());
    let started = gateway.start(options).await?;
    if started.port_changed {
        output.warning(&format!(
            "Port {} was unavailable, using port {}",
            started.requested_port, started.actual_port
        ));
    }
    if let Some(url) = gateway.url() {
        output.link(&format!("Preview: {url}{entry_file}"));
    }

    let entry =
        Session::for_current_process(started.actual_port, html_path.clone(), source.to_path_buf());
    if let Err(e) = registry.save(&entry) {
        tracing::warn!(error = %e, "Failed to record session");
    }

    let result = watch_until_shutdown(session, &html_path, &gateway, converter, shutdown).await;

    output.info("Shutting down...");
    if let Err(e) = gateway.stop().await {
        tracing::warn!(error = %e, "Failed to stop preview server cleanly");
    }
    if let Err(e) = registry.remove(started.actual_port) {
        tracing::warn!(error = %e, "Failed to remove session entry");
    }
    result
}

/// Reconvert and broadcast a reload on every debounced change until a
/// shutdown signal arrives.
async fn watch_until_shutdown(
    session: &SessionContext<'_>,
    html_path: &Path,
    gateway: &ReloadGateway,
    converter: Arc<dyn Converter>,
    shutdown: &mut ShutdownSignal,
) -> Result<(), CliError> {
    let SessionContext {
        config,
        source,
        output,
        ..
    } = *session;
    let mut watcher = ChangeDebouncer::watch(source, config.watch.debounce(), &config.watch.ignored)?;

    let broadcaster = gateway.broadcaster();
    let html_path = html_path.to_path_buf();
    let callback_output = Output::new();
    watcher.on_change(move |changed| {
        callback_output.info("File changed, reconverting...");
        match converter.convert_to_file(changed, &html_path) {
            Ok(()) => {
                let clients = broadcaster.broadcast("reload", None);
                callback_output.success("Reconversion complete");
                tracing::info!(clients, "Reload broadcast");
            }
            Err(e) => {
                callback_output.error("Reconversion failed");
                callback_output.error(&e.to_string());
            }
        }
    });

    output.info(&format!("Watching: {}", source.display()));
    output.info("Press Ctrl+C to stop");

    let signal = shutdown.wait().await;
    watcher.stop();
    signal?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let mut shutdown = ShutdownSignal::install().unwrap();

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let result = tokio::time::timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .expect("shutdown signal not delivered");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_reclaim_port_runs_cleanup_off_the_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let html = dir.path().join("a.html");
        std::fs::write(&html, "<html></html>").unwrap();
        let registry = SessionRegistry::new(path);
        registry
            .save(&Session::for_current_process(40001, html.clone(), PathBuf::from("a.md")))
            .unwrap();

        reclaim_port(&registry, 40001, &Output::new()).await;

        assert!(registry.get(40001).is_none());
        assert!(!html.exists());
    }
}
