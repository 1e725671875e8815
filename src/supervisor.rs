//! Lifecycle of the protocol server as a long-running unit.
//!
//! `Stopped -> Starting -> Running -> (StoppingByUser | Crashed)`. An unplanned
//! server exit leads to a restart after `restart_delay` unless the last stop was
//! user-initiated.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::SupervisorError;
use crate::protocol::{McpHandler, SERVER_NAME};
use crate::server::{RunningServer, ServerExit};

pub const FALLBACK_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    StoppingByUser,
    Crashed,
}

/// Hooks into the embedding host.
pub trait HostPlatform: Send + Sync {
    /// Called before every start; hosts that need a notification channel create it here.
    fn register_liveness_channel(&self) {}
    fn enter_foreground(&self, _address: &str, _port: u16) {}
    fn leave_foreground(&self) {}
    /// Non-loopback IPv4 address of this device, if any.
    fn local_address(&self) -> Option<String>;
}

/// Plain process host: no foreground concept, address from the interface list.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessPlatform;

impl HostPlatform for HeadlessPlatform {
    fn enter_foreground(&self, address: &str, port: u16) {
        info!(address = %address, port, "serving in foreground");
    }

    fn local_address(&self) -> Option<String> {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!(error = %e, "failed to list network interfaces");
                return None;
            }
        };
        let up_ipv4 = interfaces
            .iter()
            .filter(|iface| iface.is_oper_up() && !iface.is_loopback())
            .filter_map(|iface| match iface.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            });
        first_reachable_ipv4(up_ipv4).map(|ip| ip.to_string())
    }
}

/// First address other hosts on the network could reach.
pub fn first_reachable_ipv4(candidates: impl IntoIterator<Item = Ipv4Addr>) -> Option<Ipv4Addr> {
    candidates
        .into_iter()
        .find(|ip| !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified())
}

/// Aborts whichever server the supervisor is running, the way the host
/// killing it would. The supervisor then sees an unplanned exit.
#[derive(Debug, Clone, Default)]
pub struct KillHandle(Arc<Mutex<Option<AbortHandle>>>);

impl KillHandle {
    fn slot(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn arm(&self, handle: Option<AbortHandle>) {
        *self.slot() = handle;
    }

    fn disarm(&self) {
        self.slot().take();
    }

    /// Returns false when no server is running.
    pub fn kill(&self) -> bool {
        match self.slot().take() {
            Some(handle) => {
                warn!("MCP server killed");
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub is_running: bool,
    pub service_name: &'static str,
    pub local_ip_address: String,
}

pub struct Supervisor {
    config: ServerConfig,
    handler: McpHandler,
    platform: Arc<dyn HostPlatform>,
    state: watch::Sender<LifecycleState>,
    server: Option<RunningServer>,
    heartbeat: Option<JoinHandle<()>>,
    kill: KillHandle,
    address: String,
    stopped_by_user: bool,
}

impl Supervisor {
    pub fn new(config: ServerConfig, handler: McpHandler, platform: Arc<dyn HostPlatform>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        Self {
            config,
            handler,
            platform,
            state,
            server: None,
            heartbeat: None,
            kill: KillHandle::default(),
            address: FALLBACK_ADDRESS.to_string(),
            stopped_by_user: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: LifecycleState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = ?prev, to = ?next, "lifecycle transition");
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            is_running: self.state() == LifecycleState::Running && self.server.is_some(),
            service_name: SERVER_NAME,
            local_ip_address: self.address.clone(),
        }
    }

    pub fn server(&self) -> Option<&RunningServer> {
        self.server.as_ref()
    }

    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// From `Stopped` or `Crashed`. A bind failure leaves the unit `Crashed`.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        let state = self.state();
        if !matches!(state, LifecycleState::Stopped | LifecycleState::Crashed) {
            return Err(SupervisorError::InvalidTransition { action: "start", state });
        }
        self.stopped_by_user = false;
        self.set_state(LifecycleState::Starting);

        self.platform.register_liveness_channel();
        self.address = self
            .platform
            .local_address()
            .unwrap_or_else(|| FALLBACK_ADDRESS.to_string());

        match RunningServer::start(&self.config, self.handler.clone(), self.address.clone()).await {
            Ok(server) => {
                self.platform.enter_foreground(&self.address, server.local_addr().port());
                self.kill.arm(server.abort_handle());
                self.server = Some(server);
                self.start_heartbeat();
                self.set_state(LifecycleState::Running);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "server start failed");
                self.set_state(LifecycleState::Crashed);
                Err(e.into())
            }
        }
    }

    /// User-initiated stop from `Running` (or giving up on a `Crashed` unit).
    /// No restart follows.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        let state = self.state();
        if !matches!(state, LifecycleState::Running | LifecycleState::Crashed) {
            return Err(SupervisorError::InvalidTransition { action: "stop", state });
        }
        self.stopped_by_user = true;
        self.set_state(LifecycleState::StoppingByUser);
        self.stop_heartbeat();
        self.kill.disarm();
        if let Some(mut server) = self.server.take() {
            server.stop(self.config.shutdown_grace).await;
        }
        self.platform.leave_foreground();
        self.set_state(LifecycleState::Stopped);
        info!("MCP service stopped by user request");
        Ok(())
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        let every = self.config.heartbeat_interval;
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                trace!(service = SERVER_NAME, "keep-alive: service running");
            }
        }));
        debug!(interval_ms = every.as_millis() as u64, "keep-alive started");
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
            debug!("keep-alive stopped");
        }
    }

    /// Resolves when the running server exits. Never resolves without one.
    pub async fn wait_server_exit(&mut self) -> ServerExit {
        match self.server.as_mut() {
            Some(server) => server.wait().await,
            None => std::future::pending().await,
        }
    }

    /// Records an unplanned exit; returns whether a restart is due.
    pub fn handle_server_exit(&mut self, exit: ServerExit) -> bool {
        self.stop_heartbeat();
        self.kill.disarm();
        self.server = None;
        if self.stopped_by_user {
            self.set_state(LifecycleState::Stopped);
            return false;
        }
        warn!(?exit, "server exited unexpectedly");
        self.set_state(LifecycleState::Crashed);
        true
    }

    async fn pause_before_restart(&self, shutdown: &CancellationToken) -> bool {
        info!(delay_ms = self.config.restart_delay.as_millis() as u64, "restart scheduled");
        tokio::select! {
            _ = tokio::time::sleep(self.config.restart_delay) => true,
            _ = shutdown.cancelled() => false,
        }
    }

    /// Keeps the server alive until `shutdown` fires, then stops it as a user stop.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        loop {
            if matches!(self.state(), LifecycleState::Stopped | LifecycleState::Crashed) {
                if let Err(e) = self.start().await {
                    warn!(error = %e, "start attempt failed");
                    if !self.pause_before_restart(&shutdown).await {
                        self.stopped_by_user = true;
                        self.set_state(LifecycleState::Stopped);
                        return Ok(());
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.stop().await?;
                    return Ok(());
                }
                exit = self.wait_server_exit() => {
                    if !self.handle_server_exit(exit) {
                        return Ok(());
                    }
                    if !self.pause_before_restart(&shutdown).await {
                        self.stopped_by_user = true;
                        self.set_state(LifecycleState::Stopped);
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
