//! RTSP relay server (mediamtx) lifecycle.
//!
//! There is at most one relay. It may be started by someone else, in which
//! case we only observe it through a TCP probe. When we launch it ourselves
//! the child is not `kill_on_drop`: the relay is a shared resource and stays
//! up when the server shuts down. A relay we launched is told its port through
//! mediamtx's `MTX_RTSPADDRESS` override and relaunched if the port changes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use vr_core::config::RelayConfig;
use vr_core::{Error, Result};

use crate::command::ToolCommand;
use crate::process::ManagedProcess;

/// A relay we launched.
#[derive(Debug)]
pub struct RelayServerHandle {
    process: ManagedProcess,
    port: u16,
}

/// What [`RelayManager::ensure_running`] found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RelayOutcome {
    /// Our own relay child is alive.
    AlreadyRunning { pid: Option<u32> },
    /// Something else is listening on the relay port.
    External,
    /// We launched a new relay.
    Launched { pid: Option<u32> },
}

/// Snapshot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub port: u16,
    pub running: bool,
    pub external: bool,
    pub pid: Option<u32>,
    pub launched_at: Option<DateTime<Utc>>,
    pub launches: u64,
    pub binary: PathBuf,
    pub managed: bool,
}

#[derive(Debug)]
struct RelayState {
    port: u16,
    handle: Option<RelayServerHandle>,
}

/// Keeps the relay reachable before transcoders try to publish to it.
#[derive(Debug)]
pub struct RelayManager {
    binary: PathBuf,
    manage: bool,
    startup_grace: Duration,
    stop_timeout: Duration,
    probe_timeout: Duration,
    state: Mutex<RelayState>,
    launches: AtomicU64,
}

impl RelayManager {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            manage: config.manage,
            startup_grace: config.startup_grace(),
            stop_timeout: config.stop_timeout(),
            probe_timeout: config.probe_timeout(),
            state: Mutex::new(RelayState {
                port: config.port,
                handle: None,
            }),
            launches: AtomicU64::new(0),
        }
    }

    /// Make sure a relay is accepting connections on the configured port.
    ///
    /// Concurrent callers are serialized, so at most one launch happens.
    ///
    /// # Errors
    ///
    /// - [`Error::RelayUnavailable`] if nothing answers and we may not launch.
    /// - [`Error::BinaryNotFound`] if the relay binary does not exist.
    /// - [`Error::StartupFailed`] if it exits within the grace period.
    pub async fn ensure_running(&self) -> Result<RelayOutcome> {
        let mut state = self.state.lock().await;
        let port = state.port;

        if let Some(mut handle) = state.handle.take() {
            let alive = handle.process.is_alive();
            if alive && handle.port == port {
                let pid = handle.process.pid();
                state.handle = Some(handle);
                return Ok(RelayOutcome::AlreadyRunning { pid });
            }
            if alive {
                tracing::info!(
                    pid = handle.process.pid(),
                    old = handle.port,
                    new = port,
                    "Relay port changed; relaunching"
                );
                handle.process.terminate(self.stop_timeout).await;
            } else {
                tracing::warn!(
                    pid = handle.process.pid(),
                    port = handle.port,
                    "Managed relay has exited"
                );
            }
        }

        if probe(port, self.probe_timeout).await {
            tracing::debug!(port, "Relay reachable; treating it as externally managed");
            return Ok(RelayOutcome::External);
        }

        if !self.manage {
            return Err(Error::RelayUnavailable { port });
        }

        if !self.binary.exists() {
            tracing::error!(binary = %self.binary.display(), "Relay binary not found");
            return Err(Error::BinaryNotFound {
                path: self.binary.clone(),
            });
        }

        let mut process = ToolCommand::new(self.binary.clone())
            .env("MTX_RTSPADDRESS", format!(":{port}"))
            .spawn_supervised("relay", false)?;
        self.launches.fetch_add(1, Ordering::Relaxed);
        process.wait_for_startup(self.startup_grace).await?;

        let pid = process.pid();
        tracing::info!(pid, port, "Relay started");
        state.handle = Some(RelayServerHandle { process, port });
        Ok(RelayOutcome::Launched { pid })
    }

    /// Stop the relay we launched. Returns `false` if there was none; an
    /// external relay is never touched.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(mut handle) = state.handle.take() else {
            return false;
        };
        let outcome = handle.process.terminate(self.stop_timeout).await;
        tracing::info!(pid = handle.process.pid(), ?outcome, "Relay stopped");
        true
    }

    pub async fn status(&self) -> RelayStatus {
        let mut state = self.state.lock().await;
        let port = state.port;

        let own = match state.handle.as_mut() {
            Some(handle) => handle
                .process
                .is_alive()
                .then(|| (handle.process.pid(), handle.process.launched_at())),
            None => None,
        };

        let (running, external) = match own {
            Some(_) => (true, false),
            None => {
                let reachable = probe(port, self.probe_timeout).await;
                (reachable, reachable)
            }
        };

        RelayStatus {
            port,
            running,
            external,
            pid: own.and_then(|(pid, _)| pid),
            launched_at: own.map(|(_, at)| at),
            launches: self.launch_count(),
            binary: self.binary.clone(),
            managed: self.manage,
        }
    }

    pub async fn port(&self) -> u16 {
        self.state.lock().await.port
    }

    pub async fn set_port(&self, port: u16) {
        let mut state = self.state.lock().await;
        if state.port != port {
            tracing::info!(old = state.port, new = port, "Relay port changed");
            state.port = port;
        }
    }

    /// Number of relay processes launched by this manager.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }
}

/// TCP connect probe against the local relay port.
async fn probe(port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{free_port, script};

    fn config(port: u16, binary: PathBuf) -> RelayConfig {
        RelayConfig {
            port,
            binary,
            manage: true,
            startup_grace_ms: 100,
            stop_timeout_secs: 2,
            probe_timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn ensure_running_twice_launches_once() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "mediamtx", "exec sleep 30");
        let relay = RelayManager::new(&config(free_port(), binary));

        let first = relay.ensure_running().await.unwrap();
        assert!(matches!(first, RelayOutcome::Launched { pid: Some(_) }));
        let second = relay.ensure_running().await.unwrap();
        assert!(matches!(second, RelayOutcome::AlreadyRunning { .. }));
        assert_eq!(relay.launch_count(), 1);

        let status = relay.status().await;
        assert!(status.running);
        assert!(!status.external);
        assert!(status.pid.is_some());

        assert!(relay.stop().await);
        assert!(!relay.stop().await);
    }

    #[tokio::test]
    async fn concurrent_callers_do_not_double_launch() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "mediamtx", "exec sleep 30");
        let relay = RelayManager::new(&config(free_port(), binary));

        let (a, b) = tokio::join!(relay.ensure_running(), relay.ensure_running());
        a.unwrap();
        b.unwrap();
        assert_eq!(relay.launch_count(), 1);
        relay.stop().await;
    }

    #[tokio::test]
    async fn listening_port_counts_as_external() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let relay = RelayManager::new(&config(port, PathBuf::from("/nonexistent/mediamtx")));

        assert_eq!(relay.ensure_running().await.unwrap(), RelayOutcome::External);
        assert_eq!(relay.launch_count(), 0);

        let status = relay.status().await;
        assert!(status.running);
        assert!(status.external);
        assert!(!relay.stop().await);
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let relay = RelayManager::new(&config(free_port(), dir.path().join("mediamtx")));
        let err = relay.ensure_running().await.unwrap_err();
        assert!(matches!(err, Error::BinaryNotFound { .. }));
        assert_eq!(relay.launch_count(), 0);
    }

    #[tokio::test]
    async fn unmanaged_relay_is_unavailable() {
        let mut cfg = config(free_port(), PathBuf::from("./mediamtx"));
        cfg.manage = false;
        let relay = RelayManager::new(&cfg);
        let err = relay.ensure_running().await.unwrap_err();
        assert!(matches!(err, Error::RelayUnavailable { .. }));
    }

    #[tokio::test]
    async fn crashing_relay_is_startup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "mediamtx", "exit 1");
        let mut cfg = config(free_port(), binary);
        cfg.startup_grace_ms = 2000;
        let relay = RelayManager::new(&cfg);

        let err = relay.ensure_running().await.unwrap_err();
        assert!(matches!(err, Error::StartupFailed { .. }));
        assert!(!relay.status().await.running);
    }

    #[tokio::test]
    async fn port_change_relaunches_own_relay() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("address");
        let body = format!("echo \"$MTX_RTSPADDRESS\" >> {}\nexec sleep 30", seen.display());
        let binary = script(dir.path(), "mediamtx", &body);
        let relay = RelayManager::new(&config(free_port(), binary));

        let RelayOutcome::Launched { pid: first } = relay.ensure_running().await.unwrap() else {
            panic!("expected a launch");
        };
        let new_port = free_port();
        relay.set_port(new_port).await;

        let RelayOutcome::Launched { pid: second } = relay.ensure_running().await.unwrap() else {
            panic!("expected a relaunch on the new port");
        };
        assert_ne!(first, second);
        assert_eq!(relay.launch_count(), 2);

        let addresses = std::fs::read_to_string(&seen).unwrap();
        let last = addresses.lines().last().unwrap().to_string();
        assert_eq!(last, format!(":{new_port}"));

        let status = relay.status().await;
        assert_eq!(status.port, new_port);
        assert_eq!(status.pid, second);
        relay.stop().await;
    }

    #[tokio::test]
    async fn set_port_updates_probe_target() {
        let relay = RelayManager::new(&config(free_port(), PathBuf::from("./mediamtx")));
        relay.set_port(9554).await;
        assert_eq!(relay.port().await, 9554);
    }
}
