//! Reload gateway lifecycle.
//!
//! One listener serves both the static preview files and the live-reload
//! WebSocket endpoint. The gateway moves through
//! `Stopped → Starting → Listening → Stopping → Stopped`.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use vimd_session::{PortError, candidate_ports, is_port_available_on};

use crate::app;
use crate::error::GatewayError;
use crate::live_reload::{Broadcaster, ClientSet};
use crate::state::AppState;

/// WebSocket endpoint path.
pub const WS_PATH: &str = "/__vimd/ws";

/// Upper bound for [`ReloadGateway::start`].
pub const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for [`ReloadGateway::stop`] to wait for the server task.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for [`ReloadGateway::start`].
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    /// Directory served as static files.
    pub root_dir: PathBuf,
    /// Preferred port.
    pub port: u16,
    /// Host to bind.
    pub host: String,
    /// File, relative to `root_dir`, that `GET /` redirects to.
    pub entry_file: Option<String>,
}

impl GatewayOptions {
    /// Serve `root_dir` on `host:port`.
    pub fn new(root_dir: impl Into<PathBuf>, port: u16, host: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            port,
            host: host.into(),
            entry_file: None,
        }
    }

    /// Redirect `GET /` to `entry_file`.
    #[must_use]
    pub fn with_entry_file(mut self, entry_file: impl Into<String>) -> Self {
        self.entry_file = Some(entry_file.into());
        self
    }
}

/// Outcome of a successful start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartResult {
    /// Port actually bound.
    pub actual_port: u16,
    /// Port that was asked for.
    pub requested_port: u16,
    /// Whether the requested port was taken and another one chosen.
    pub port_changed: bool,
}

/// Lifecycle state of a [`ReloadGateway`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// The running server task and its shutdown trigger.
struct Running {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

/// HTTP + WebSocket server for one preview session.
///
/// Must be used from within a tokio runtime.
pub struct ReloadGateway {
    state: GatewayState,
    host: String,
    clients: Arc<ClientSet>,
    running: Option<Running>,
}

impl Default for ReloadGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: GatewayState::Stopped,
            host: String::new(),
            clients: Arc::new(ClientSet::default()),
            running: None,
        }
    }

    /// Start serving.
    ///
    /// If the requested port is taken, the first free port after it is used
    /// instead and reported through [`StartResult::port_changed`].
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidState`] unless the gateway is stopped
    /// - [`GatewayError::Configuration`] for an empty host or port 0
    /// - [`GatewayError::Port`] if no port is free
    /// - [`GatewayError::Network`] if binding fails
    /// - [`GatewayError::Timeout`] after [`START_TIMEOUT`]
    pub async fn start(&mut self, options: GatewayOptions) -> Result<StartResult, GatewayError> {
        if self.state != GatewayState::Stopped {
            return Err(GatewayError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        if options.host.trim().is_empty() {
            return Err(GatewayError::Configuration("host must not be empty".to_owned()));
        }
        if options.port == 0 {
            return Err(GatewayError::Configuration("port must not be 0".to_owned()));
        }

        self.state = GatewayState::Starting;
        let host = options.host.clone();
        let listening = tokio::time::timeout(START_TIMEOUT, listen(options, Arc::clone(&self.clients))).await;

        match listening {
            Ok(Ok((running, result))) => {
                tracing::info!(address = %running.addr, "Preview server started");
                self.host = host;
                self.running = Some(running);
                self.state = GatewayState::Listening;
                Ok(result)
            }
            Ok(Err(e)) => {
                self.state = GatewayState::Stopped;
                Err(e)
            }
            Err(_) => {
                self.state = GatewayState::Stopped;
                Err(GatewayError::Timeout {
                    operation: "start",
                    after: START_TIMEOUT,
                })
            }
        }
    }

    /// Close all clients and shut the listener down. A no-op when not
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] if the server task does not finish
    /// within [`STOP_TIMEOUT`]; the task is aborted and the gateway is
    /// stopped regardless.
    pub async fn stop(&mut self) -> Result<(), GatewayError> {
        let Some(running) = self.running.take() else {
            self.state = GatewayState::Stopped;
            return Ok(());
        };

        self.state = GatewayState::Stopping;
        self.clients.close_all();
        let _ = running.shutdown_tx.send(());

        let mut task = running.task;
        let result = match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Preview server exited with error");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Preview server task failed");
                Ok(())
            }
            Err(_) => {
                task.abort();
                Err(GatewayError::Timeout {
                    operation: "stop",
                    after: STOP_TIMEOUT,
                })
            }
        };

        self.state = GatewayState::Stopped;
        tracing::info!(address = %running.addr, "Preview server stopped");
        result
    }

    /// Send `{"type": event_type, "data": data}` to all connected clients.
    ///
    /// Returns how many clients the message was handed to; 0 when nobody is
    /// connected.
    pub fn broadcast(&self, event_type: &str, data: Option<&serde_json::Value>) -> usize {
        self.broadcaster().broadcast(event_type, data)
    }

    /// Cloneable handle for broadcasting from other threads.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(Arc::clone(&self.clients))
    }

    /// Number of connected WebSocket clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    /// Base URL while listening, e.g. `http://localhost:38080/`.
    pub fn url(&self) -> Option<String> {
        self.local_addr()
            .map(|addr| format!("http://{}/", host_port(&self.host, addr.port())))
    }
}

impl Drop for ReloadGateway {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            self.clients.close_all();
            let _ = running.shutdown_tx.send(());
            running.task.abort();
        }
    }
}

/// Negotiate a port, bind it and spawn the server task.
async fn listen(
    options: GatewayOptions,
    clients: Arc<ClientSet>,
) -> Result<(Running, StartResult), GatewayError> {
    let requested_port = options.port;
    let ip = resolve_host(&options.host, requested_port).await?;
    let listener = bind_negotiated(ip, requested_port).await?;
    let addr = listener
        .local_addr()
        .map_err(|source| GatewayError::Network {
            addr: SocketAddr::new(ip, requested_port).to_string(),
            source,
        })?;
    if addr.port() != requested_port {
        tracing::warn!(requested = requested_port, actual = addr.port(), "Port unavailable, using another");
    }

    let state = Arc::new(AppState {
        clients,
        entry_file: options.entry_file,
    });
    let router = app::create_router(state, &options.root_dir);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let result = StartResult {
        actual_port: addr.port(),
        requested_port,
        port_changed: addr.port() != requested_port,
    };

    Ok((
        Running {
            addr,
            shutdown_tx,
            task,
        },
        result,
    ))
}

/// Resolve `host` to the single address every port candidate is bound on.
///
/// Sticking to one address keeps a dual-stack name like `localhost` from
/// landing on the requested port of the other address family while it is
/// taken on the first.
async fn resolve_host(host: &str, port: u16) -> Result<IpAddr, GatewayError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let network_error = |source| GatewayError::Network {
        addr: host_port(host, port),
        source,
    };

    let mut addrs = tokio::net::lookup_host((bare, port))
        .await
        .map_err(network_error)?;
    addrs.next().map(|addr| addr.ip()).ok_or_else(|| {
        network_error(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        ))
    })
}

/// Bind `requested` on `ip`, or the first free port after it.
///
/// A port counts as taken when a plain probe bind fails or when the real bind
/// reports `AddrInUse`; any other bind error is returned as is.
async fn bind_negotiated(ip: IpAddr, requested: u16) -> Result<TcpListener, GatewayError> {
    if let Some(listener) = try_bind(ip, requested).await? {
        return Ok(listener);
    }

    let next = requested.checked_add(1).ok_or(PortError::Exhausted {
        start: requested,
        end: requested,
    })?;
    let ports = candidate_ports(next)?;
    let end = *ports.end();
    for port in ports {
        if let Some(listener) = try_bind(ip, port).await? {
            return Ok(listener);
        }
        tracing::debug!(port, "Port unavailable");
    }
    Err(PortError::Exhausted { start: next, end }.into())
}

/// Bind `ip:port`, returning `None` if the port is taken.
async fn try_bind(ip: IpAddr, port: u16) -> Result<Option<TcpListener>, GatewayError> {
    if !is_port_available_on(ip, port) {
        return Ok(None);
    }
    let addr = SocketAddr::new(ip, port);
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(Some(listener)),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(None),
        Err(source) => Err(GatewayError::Network {
            addr: addr.to_string(),
            source,
        }),
    }
}

/// `host:port`, bracketing IPv6 literals.
fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_gateway_is_stopped() {
        let gateway = ReloadGateway::new();

        assert_eq!(gateway.state(), GatewayState::Stopped);
        assert_eq!(gateway.url(), None);
        assert_eq!(gateway.client_count(), 0);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_host() {
        let mut gateway = ReloadGateway::new();

        let result = gateway.start(GatewayOptions::new(".", 38080, " ")).await;

        assert!(matches!(result, Err(GatewayError::Configuration(_))));
        assert_eq!(gateway.state(), GatewayState::Stopped);
    }

    #[tokio::test]
    async fn test_start_rejects_port_zero() {
        let mut gateway = ReloadGateway::new();

        let result = gateway.start(GatewayOptions::new(".", 0, "127.0.0.1")).await;

        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut gateway = ReloadGateway::new();

        gateway.stop().await.unwrap();
        gateway.stop().await.unwrap();

        assert_eq!(gateway.state(), GatewayState::Stopped);
    }

    #[tokio::test]
    async fn test_broadcast_without_clients_returns_zero() {
        let gateway = ReloadGateway::new();

        assert_eq!(gateway.broadcast("reload", None), 0);
    }

    #[test]
    fn test_host_port_brackets_ipv6_literals() {
        assert_eq!(host_port("localhost", 38080), "localhost:38080");
        assert_eq!(host_port("127.0.0.1", 38080), "127.0.0.1:38080");
        assert_eq!(host_port("::1", 38080), "[::1]:38080");
        assert_eq!(host_port("[::1]", 38080), "[::1]:38080");
    }

    #[tokio::test]
    async fn test_resolve_host_accepts_bracketed_ipv6() {
        let ip = resolve_host("[::1]", 38080).await.unwrap();

        assert_eq!(ip, IpAddr::V6(std::net::Ipv6Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_bind_negotiated_skips_taken_port() {
        let held = std::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let ip = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

        let listener = bind_negotiated(ip, port).await.unwrap();

        assert_ne!(listener.local_addr().unwrap().port(), port);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(GatewayState::Listening.to_string(), "listening");
        let err = GatewayError::InvalidState {
            operation: "start",
            state: GatewayState::Listening,
        };
        assert_eq!(err.to_string(), "Cannot start server while listening");
    }
}
