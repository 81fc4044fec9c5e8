//! Transcoder process supervision.
//!
//! One looping ffmpeg publisher per stream, each pushing a media file into
//! the relay at `rtsp://<publish_host>:<port>/<stream_id>`. All per-stream
//! state lives in [`SupervisorState`] behind a single async mutex that is held
//! for the whole of every mutation and every status read. Batch operations
//! (start-all, restart, reconfigure) additionally serialize on a lifecycle
//! lock so that one batch never interleaves with another.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use vr_core::config::TranscoderConfig;
use vr_core::{Error, Result};
use vr_media::MediaRegistry;

use crate::command::ToolCommand;
use crate::process::{ManagedProcess, TerminateOutcome};
use crate::relay::RelayManager;
use crate::tools::ToolRegistry;

/// Lifecycle of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Disabled,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// A running transcoder, owned by its slot.
#[derive(Debug)]
pub struct StreamProcessHandle {
    stream_id: String,
    source: PathBuf,
    target_url: String,
    process: ManagedProcess,
    last_observed_alive: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StreamSlot {
    state: StreamState,
    handle: Option<StreamProcessHandle>,
    /// Set when the process died on its own; cleared by any stop or successful start.
    crashed: bool,
}

/// Everything the supervisor mutates.
#[derive(Debug)]
pub struct SupervisorState {
    slots: BTreeMap<String, StreamSlot>,
    /// `None` means every registered stream.
    enabled: Option<BTreeSet<String>>,
}

/// Per-stream snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub state: StreamState,
    pub alive: bool,
    pub pid: Option<u32>,
    pub source: Option<PathBuf>,
    pub target_url: Option<String>,
    pub launched_at: Option<DateTime<Utc>>,
    pub last_observed_alive: Option<DateTime<Utc>>,
}

impl StreamStatus {
    fn idle(stream_id: &str, state: StreamState) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            state,
            alive: false,
            pid: None,
            source: None,
            target_url: None,
            launched_at: None,
            last_observed_alive: None,
        }
    }
}

/// Whole-supervisor snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub relay_port: u16,
    pub enabled: Option<Vec<String>>,
    pub streams: Vec<StreamStatus>,
}

/// Outcome of one stream in a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub stream_id: String,
    pub ok: bool,
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamReport {
    fn from_result(stream_id: &str, result: &Result<StreamStatus>) -> Self {
        match result {
            Ok(status) => Self {
                stream_id: stream_id.to_string(),
                ok: true,
                pid: status.pid,
                error: None,
            },
            Err(e) => Self {
                stream_id: stream_id.to_string(),
                ok: false,
                pid: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Result of [`Supervisor::restart_all`].
#[derive(Debug, Clone, Serialize)]
pub struct RestartReport {
    pub stopped: Vec<String>,
    pub started: Vec<StreamReport>,
}

/// Owns every transcoder subprocess.
#[derive(Debug)]
pub struct Supervisor {
    registry: MediaRegistry,
    tools: Arc<ToolRegistry>,
    relay: Arc<RelayManager>,
    config: TranscoderConfig,
    /// Read without the state lock so listings never wait behind a start or stop.
    relay_port: AtomicU16,
    lifecycle: Mutex<()>,
    shutdown: CancellationToken,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        registry: MediaRegistry,
        tools: Arc<ToolRegistry>,
        relay: Arc<RelayManager>,
        config: TranscoderConfig,
        relay_port: u16,
    ) -> Self {
        let enabled = config
            .enabled_streams
            .as_ref()
            .map(|ids| ids.iter().cloned().collect());
        Self {
            registry,
            tools,
            relay,
            config,
            relay_port: AtomicU16::new(relay_port),
            lifecycle: Mutex::new(()),
            shutdown: CancellationToken::new(),
            state: Mutex::new(SupervisorState {
                slots: BTreeMap::new(),
                enabled,
            }),
        }
    }

    /// Refuse new launches once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Start the transcoder for `id`.
    ///
    /// A stream that is already running with a live process is left alone and
    /// its current snapshot returned.
    ///
    /// # Errors
    ///
    /// - [`Error::PrecheckFailed`] if the source file does not resolve,
    ///   ffmpeg is unavailable or the supervisor is shutting down.
    /// - Relay errors from [`RelayManager::ensure_running`], unchanged.
    /// - [`Error::StartupFailed`] if ffmpeg exits within the grace period.
    ///
    /// Nothing is mutated until the prechecks and the relay check pass.
    pub async fn start(&self, id: &str) -> Result<StreamStatus> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, id).await
    }

    /// Relaunch `id` after its process died on its own.
    ///
    /// Skipped (returns `Ok(None)`) when the stream was stopped or restarted
    /// since the crash, or is no longer enabled.
    pub async fn relaunch(&self, id: &str) -> Result<Option<StreamStatus>> {
        let mut state = self.state.lock().await;
        let enabled = state.enabled.as_ref().map_or(true, |ids| ids.contains(id));
        let Some(slot) = state.slots.get_mut(id).filter(|slot| slot.crashed) else {
            tracing::info!(stream = id, "Relaunch skipped; stream was stopped since the crash");
            return Ok(None);
        };
        if !enabled {
            slot.crashed = false;
            tracing::info!(stream = id, "Relaunch skipped; stream is no longer enabled");
            return Ok(None);
        }
        self.start_locked(&mut state, id).await.map(Some)
    }

    async fn start_locked(&self, state: &mut SupervisorState, id: &str) -> Result<StreamStatus> {
        if self.shutdown.is_cancelled() {
            return Err(Error::precheck(id, "supervisor is shutting down"));
        }

        if let Some(slot) = state.slots.get_mut(id) {
            if slot.state == StreamState::Running {
                if let Some(handle) = slot.handle.as_mut() {
                    if handle.process.is_alive() {
                        handle.last_observed_alive = Utc::now();
                        tracing::debug!(stream = id, pid = handle.process.pid(), "Already running");
                        return Ok(snapshot(id, slot, true));
                    }
                    tracing::warn!(
                        stream = id,
                        pid = handle.process.pid(),
                        "Transcoder found dead; relaunching"
                    );
                }
            }
        }

        let source = self
            .registry
            .resolve_async(id)
            .await
            .map_err(|_| Error::precheck(id, "source file not found"))?;
        let ffmpeg = self
            .tools
            .require("ffmpeg")
            .map_err(|e| Error::precheck(id, e.to_string()))?
            .path
            .clone();

        self.relay.ensure_running().await?;

        let target_url = format!(
            "rtsp://{}:{}/{}",
            self.config.publish_host,
            self.relay_port(),
            id
        );
        let slot = state.slots.entry(id.to_string()).or_default();
        slot.handle = None;
        slot.state = StreamState::Starting;

        let label = format!("transcoder:{id}");
        let spawned =
            transcoder_command(&ffmpeg, &source, &target_url).spawn_supervised(&label, true);
        let mut process = match spawned {
            Ok(p) => p,
            Err(e) => {
                slot.state = StreamState::Stopped;
                return Err(e);
            }
        };

        if let Err(e) = process.wait_for_startup(self.config.startup_grace()).await {
            tracing::error!(stream = id, "Transcoder failed to start: {e}");
            slot.state = StreamState::Stopped;
            return Err(e);
        }

        tracing::info!(stream = id, pid = process.pid(), url = %target_url, "Transcoder running");
        slot.handle = Some(StreamProcessHandle {
            stream_id: id.to_string(),
            source,
            target_url,
            process,
            last_observed_alive: Utc::now(),
        });
        slot.state = StreamState::Running;
        slot.crashed = false;
        Ok(snapshot(id, slot, true))
    }

    /// Stop the transcoder for `id`: SIGTERM, bounded wait, then kill.
    ///
    /// Always ends in [`StreamState::Stopped`]; termination problems are
    /// logged. Unknown ids are [`Error::NotFound`].
    pub async fn stop(&self, id: &str) -> Result<StreamStatus> {
        let registered = self.registered_names().await.iter().any(|n| n == id);
        let mut state = self.state.lock().await;
        if !state.slots.contains_key(id) && !registered {
            return Err(Error::not_found("stream", id));
        }
        Ok(self.stop_locked(&mut state, id).await)
    }

    async fn stop_locked(&self, state: &mut SupervisorState, id: &str) -> StreamStatus {
        let slot = state.slots.entry(id.to_string()).or_default();
        slot.crashed = false;
        if let Some(mut handle) = slot.handle.take() {
            slot.state = StreamState::Stopping;
            let outcome = handle.process.terminate(self.config.stop_timeout()).await;
            if outcome == TerminateOutcome::Killed {
                tracing::warn!(stream = id, pid = handle.process.pid(), "Transcoder force-killed");
            } else {
                tracing::info!(
                    stream = id,
                    pid = handle.process.pid(),
                    ?outcome,
                    "Transcoder stopped"
                );
            }
        }
        slot.state = StreamState::Stopped;
        snapshot(id, slot, false)
    }

    /// Start every enabled stream, one after another with a stagger.
    ///
    /// Each stream succeeds or fails on its own. Stops early on shutdown.
    pub async fn start_all(&self) -> Vec<StreamReport> {
        let _batch = self.lifecycle.lock().await;
        self.start_enabled().await
    }

    async fn start_enabled(&self) -> Vec<StreamReport> {
        let ids = self.enabled_ids().await;
        let mut reports = Vec::with_capacity(ids.len());

        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.config.launch_stagger()) => {}
                }
            }
            if self.shutdown.is_cancelled() {
                tracing::info!(remaining = ids.len() - i, "Shutdown requested; launch abandoned");
                break;
            }
            let result = self.start(id).await;
            if let Err(e) = &result {
                tracing::warn!(stream = %id, "Start failed: {e}");
            }
            reports.push(StreamReport::from_result(id, &result));
        }

        let ok = reports.iter().filter(|r| r.ok).count();
        tracing::info!(started = ok, total = reports.len(), "Launched enabled streams");
        reports
    }

    /// Stop every stream that has a process handle.
    ///
    /// Pending crash relaunches are forgotten as well.
    pub async fn stop_all(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        for slot in state.slots.values_mut() {
            slot.crashed = false;
        }
        let ids: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.handle.is_some())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            self.stop_locked(&mut state, id).await;
        }
        ids
    }

    /// Stop every running stream, then start every enabled one.
    pub async fn restart_all(&self) -> RestartReport {
        let _batch = self.lifecycle.lock().await;
        self.restart_enabled().await
    }

    async fn restart_enabled(&self) -> RestartReport {
        let stopped = {
            let mut state = self.state.lock().await;
            let running: Vec<String> = state
                .slots
                .iter()
                .filter(|(_, slot)| slot.state == StreamState::Running && slot.handle.is_some())
                .map(|(id, _)| id.clone())
                .collect();
            for id in &running {
                self.stop_locked(&mut state, id).await;
            }
            running
        };

        let started = self.start_enabled().await;
        RestartReport { stopped, started }
    }

    /// Replace the enabled set and/or relay port, then restart.
    ///
    /// Waits for any batch already in progress, so the restart always runs
    /// against the new configuration.
    pub async fn reconfigure(
        &self,
        enabled: Option<Vec<String>>,
        relay_port: Option<u16>,
    ) -> Result<RestartReport> {
        if relay_port == Some(0) {
            return Err(Error::Validation("relay_port must be non-zero".into()));
        }

        let _batch = self.lifecycle.lock().await;
        if let Some(ids) = enabled {
            tracing::info!(enabled = ?ids, "Enabled streams changed");
            self.state.lock().await.enabled = Some(ids.into_iter().collect());
        }
        if let Some(port) = relay_port {
            self.relay_port.store(port, Ordering::Release);
            self.relay.set_port(port).await;
        }

        Ok(self.restart_enabled().await)
    }

    /// Liveness snapshot of every known stream.
    ///
    /// Each handle is probed and the observation recorded, but stream states
    /// are left as they are.
    pub async fn status(&self) -> SupervisorStatus {
        let names = self.registered_names().await;
        let mut state = self.state.lock().await;
        let mut streams = Vec::new();

        for (id, slot) in state.slots.iter_mut() {
            let alive = match slot.handle.as_mut() {
                Some(handle) => {
                    let alive = handle.process.is_alive();
                    if alive {
                        handle.last_observed_alive = Utc::now();
                    }
                    alive
                }
                None => false,
            };
            streams.push(snapshot(id, slot, alive));
        }

        for name in names {
            if !state.slots.contains_key(&name) {
                streams.push(StreamStatus::idle(&name, StreamState::Disabled));
            }
        }
        streams.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));

        SupervisorStatus {
            relay_port: self.relay_port(),
            enabled: state.enabled.as_ref().map(|s| s.iter().cloned().collect()),
            streams,
        }
    }

    /// Move every `Running` stream whose process has exited to `Stopped`,
    /// dropping its handle. Returns the affected ids.
    pub async fn reap_exited(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let mut reaped = Vec::new();

        for (id, slot) in state.slots.iter_mut() {
            if slot.state != StreamState::Running {
                continue;
            }
            let Some(handle) = slot.handle.as_mut() else {
                continue;
            };
            if let Some(status) = handle.process.exit_status() {
                tracing::warn!(
                    stream = %id,
                    pid = handle.process.pid(),
                    %status,
                    "Transcoder exited unexpectedly"
                );
                slot.handle = None;
                slot.state = StreamState::Stopped;
                slot.crashed = true;
                reaped.push(id.clone());
            }
        }
        reaped
    }

    /// Current state and launch time of one stream.
    pub async fn stream_state(&self, id: &str) -> (StreamState, Option<DateTime<Utc>>) {
        let state = self.state.lock().await;
        match state.slots.get(id) {
            Some(slot) => (
                slot.state,
                slot.handle.as_ref().map(|h| h.process.launched_at()),
            ),
            None => (StreamState::Disabled, None),
        }
    }

    /// The relay port transcoders publish to and clients are pointed at.
    pub fn relay_port(&self) -> u16 {
        self.relay_port.load(Ordering::Acquire)
    }

    /// The advertised RTSP URL clients should use for `id`.
    pub fn advertised_url(&self, id: &str) -> String {
        format!(
            "rtsp://{}:{}/{}",
            self.config.advertised_host,
            self.relay_port(),
            id
        )
    }

    pub fn registry(&self) -> &MediaRegistry {
        &self.registry
    }

    async fn enabled_ids(&self) -> Vec<String> {
        let enabled = self.state.lock().await.enabled.clone();
        match enabled {
            Some(set) => set.into_iter().collect(),
            None => self.registered_names().await,
        }
    }

    /// Registry names, or none if the lookup itself failed.
    async fn registered_names(&self) -> Vec<String> {
        self.registry.names_async().await.unwrap_or_else(|e| {
            tracing::warn!("Media registry lookup failed: {e}");
            Vec::new()
        })
    }
}

/// `ffmpeg -re -stream_loop -1 -i <source> -c:v copy -c:a copy -f rtsp -rtsp_transport tcp <url>`
pub fn transcoder_command(ffmpeg: &Path, source: &Path, target_url: &str) -> ToolCommand {
    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    cmd.args(["-re", "-stream_loop", "-1", "-i"])
        .arg(source.to_string_lossy())
        .args(["-c:v", "copy", "-c:a", "copy", "-f", "rtsp", "-rtsp_transport", "tcp"])
        .arg(target_url);
    cmd
}

fn snapshot(id: &str, slot: &StreamSlot, alive: bool) -> StreamStatus {
    match &slot.handle {
        Some(handle) => StreamStatus {
            stream_id: handle.stream_id.clone(),
            state: slot.state,
            alive,
            pid: handle.process.pid(),
            source: Some(handle.source.clone()),
            target_url: Some(handle.target_url.clone()),
            launched_at: Some(handle.process.launched_at()),
            last_observed_alive: Some(handle.last_observed_alive),
        },
        None => StreamStatus::idle(id, slot.state),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{free_port, script};
    use std::time::{Duration, Instant};
    use vr_core::config::RelayConfig;

    struct Fixture {
        _dir: tempfile::TempDir,
        supervisor: Arc<Supervisor>,
        relay: Arc<RelayManager>,
        shutdown: CancellationToken,
    }

    fn fixture(ffmpeg_body: &str, with_relay_binary: bool) -> Fixture {
        fixture_with(ffmpeg_body, with_relay_binary, |_| {})
    }

    /// Two media files (`video1`, `video2`), a fake ffmpeg running `ffmpeg_body`
    /// and a fake relay binary (or none).
    fn fixture_with(
        ffmpeg_body: &str,
        with_relay_binary: bool,
        adjust: impl FnOnce(&mut TranscoderConfig),
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let videos = dir.path().join("videos");
        std::fs::create_dir(&videos).unwrap();
        std::fs::write(videos.join("video1.mp4"), b"one").unwrap();
        std::fs::write(videos.join("video2.mp4"), b"two").unwrap();

        let ffmpeg = script(dir.path(), "ffmpeg", ffmpeg_body);
        let relay_binary = if with_relay_binary {
            script(dir.path(), "mediamtx", "exec sleep 30")
        } else {
            dir.path().join("mediamtx")
        };

        let port = free_port();
        let relay = Arc::new(RelayManager::new(&RelayConfig {
            port,
            binary: relay_binary,
            manage: true,
            startup_grace_ms: 50,
            stop_timeout_secs: 2,
            probe_timeout_ms: 100,
        }));
        let tools = Arc::new(ToolRegistry::default().with_tool("ffmpeg", ffmpeg));
        let registry = MediaRegistry::Static {
            dir: videos,
            count: 3,
            extension: "mp4".into(),
        };
        let mut config = TranscoderConfig {
            startup_grace_ms: 100,
            launch_stagger_ms: 10,
            stop_timeout_secs: 1,
            ..TranscoderConfig::default()
        };
        adjust(&mut config);
        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::new(registry, tools, Arc::clone(&relay), config, port)
            .with_shutdown(shutdown.clone());

        Fixture {
            _dir: dir,
            supervisor: Arc::new(supervisor),
            relay,
            shutdown,
        }
    }

    #[tokio::test]
    async fn relay_missing_binary_aborts_start_without_state_change() {
        let fx = fixture("exec sleep 30", false);
        let err = fx.supervisor.start("video1").await.unwrap_err();
        assert!(matches!(err, Error::BinaryNotFound { .. }));

        let (state, launched) = fx.supervisor.stream_state("video1").await;
        assert_eq!(state, StreamState::Disabled);
        assert!(launched.is_none());
        assert_eq!(fx.relay.launch_count(), 0);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let fx = fixture("exec sleep 30", true);
        let first = fx.supervisor.start("video1").await.unwrap();
        assert_eq!(first.state, StreamState::Running);
        assert!(first.pid.is_some());

        let second = fx.supervisor.start("video1").await.unwrap();
        assert_eq!(second.pid, first.pid);
        assert_eq!(fx.relay.launch_count(), 1);

        fx.supervisor.stop_all().await;
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn target_url_follows_contract() {
        let fx = fixture("exec sleep 30", true);
        let status = fx.supervisor.start("video2").await.unwrap();
        let port = fx.relay.port().await;
        assert_eq!(
            status.target_url.as_deref(),
            Some(format!("rtsp://127.0.0.1:{port}/video2").as_str())
        );
        assert!(status.source.unwrap().ends_with("video2.mp4"));

        fx.supervisor.stop_all().await;
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn missing_source_fails_precheck() {
        let fx = fixture("exec sleep 30", true);
        let err = fx.supervisor.start("video3").await.unwrap_err();
        assert!(matches!(err, Error::PrecheckFailed { .. }));
        assert_eq!(fx.relay.launch_count(), 0);
    }

    #[tokio::test]
    async fn crashing_transcoder_is_startup_failure() {
        let fx = fixture("exit 1", true);
        let err = fx.supervisor.start("video1").await.unwrap_err();
        assert!(matches!(err, Error::StartupFailed { .. }));
        assert_eq!(fx.supervisor.stream_state("video1").await.0, StreamState::Stopped);
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn stop_kills_process_ignoring_term() {
        let fx = fixture("trap '' TERM\nwhile :; do sleep 1; done", true);
        fx.supervisor.start("video1").await.unwrap();

        let started = Instant::now();
        let status = fx.supervisor.stop("video1").await.unwrap();
        assert_eq!(status.state, StreamState::Stopped);
        assert!(status.pid.is_none());
        // stop_timeout is 1 s; the forced kill follows right after.
        assert!(started.elapsed() < Duration::from_secs(4));
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn stop_unknown_stream_is_not_found() {
        let fx = fixture("exec sleep 30", false);
        let err = fx.supervisor.stop("videoX").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn start_all_reports_each_stream() {
        let fx = fixture("exec sleep 30", true);
        // video3 is enabled but has no file.
        let reports = fx
            .supervisor
            .reconfigure(Some(vec!["video1".into(), "video3".into()]), None)
            .await
            .unwrap()
            .started;

        assert_eq!(reports.len(), 2);
        let v1 = reports.iter().find(|r| r.stream_id == "video1").unwrap();
        let v3 = reports.iter().find(|r| r.stream_id == "video3").unwrap();
        assert!(v1.ok);
        assert!(!v3.ok);
        assert!(v3.error.as_deref().unwrap().contains("precheck"));

        let stopped = fx.supervisor.stop_all().await;
        assert_eq!(stopped, vec!["video1".to_string()]);
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn restart_all_replaces_processes() {
        let fx = fixture("exec sleep 30", true);
        let before = fx.supervisor.start("video1").await.unwrap().pid;

        let report = fx.supervisor.restart_all().await;
        assert_eq!(report.stopped, vec!["video1".to_string()]);
        let after = report
            .started
            .iter()
            .find(|r| r.stream_id == "video1")
            .unwrap()
            .pid;
        assert!(after.is_some());
        assert_ne!(before, after);

        fx.supervisor.stop_all().await;
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn status_observes_crash_without_changing_state() {
        let fx = fixture("sleep 0.5", true);
        fx.supervisor.start("video1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        let status = fx.supervisor.status().await;
        let v1 = status.streams.iter().find(|s| s.stream_id == "video1").unwrap();
        assert_eq!(v1.state, StreamState::Running);
        assert!(!v1.alive);

        let v2 = status.streams.iter().find(|s| s.stream_id == "video2").unwrap();
        assert_eq!(v2.state, StreamState::Disabled);

        assert_eq!(fx.supervisor.reap_exited().await, vec!["video1".to_string()]);
        assert_eq!(fx.supervisor.stream_state("video1").await.0, StreamState::Stopped);
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn reconfigure_waits_for_restart_in_progress() {
        let fx = fixture_with("exec sleep 30", true, |c| c.launch_stagger_ms = 400);
        fx.supervisor.start("video1").await.unwrap();
        fx.supervisor.start("video2").await.unwrap();

        let restart = tokio::spawn({
            let supervisor = Arc::clone(&fx.supervisor);
            async move { supervisor.restart_all().await }
        });
        // Lands between the restart's video1 and video2 launches.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let report = fx
            .supervisor
            .reconfigure(Some(vec!["video1".into()]), None)
            .await
            .unwrap();
        restart.await.unwrap();

        assert_eq!(report.started.len(), 1);
        assert_eq!(report.started[0].stream_id, "video1");
        assert_eq!(fx.supervisor.stream_state("video1").await.0, StreamState::Running);
        assert_eq!(fx.supervisor.stream_state("video2").await.0, StreamState::Stopped);

        let status = fx.supervisor.status().await;
        let v2 = status.streams.iter().find(|s| s.stream_id == "video2").unwrap();
        assert!(!v2.alive);
        assert!(v2.pid.is_none());

        fx.supervisor.stop_all().await;
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn relaunch_respects_operator_stop_and_disable() {
        let fx = fixture("sleep 0.3", true);
        fx.supervisor.start("video1").await.unwrap();
        fx.supervisor.start("video2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fx.supervisor.reap_exited().await.len(), 2);

        fx.supervisor.stop("video1").await.unwrap();
        assert!(fx.supervisor.relaunch("video1").await.unwrap().is_none());
        assert_eq!(fx.supervisor.stream_state("video1").await.0, StreamState::Stopped);

        // Disabling restarts too, which retries video1 only; video2 stays down.
        fx.supervisor
            .reconfigure(Some(vec!["video1".into()]), None)
            .await
            .unwrap();
        assert!(fx.supervisor.relaunch("video2").await.unwrap().is_none());
        assert_eq!(fx.supervisor.stream_state("video2").await.0, StreamState::Stopped);

        fx.supervisor.stop_all().await;
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn relaunch_restarts_crashed_enabled_stream() {
        let fx = fixture("sleep 0.3", true);
        let first = fx.supervisor.start("video1").await.unwrap().pid;
        tokio::time::sleep(Duration::from_millis(600)).await;
        fx.supervisor.reap_exited().await;

        let status = fx.supervisor.relaunch("video1").await.unwrap().unwrap();
        assert_eq!(status.state, StreamState::Running);
        assert_ne!(status.pid, first);

        fx.supervisor.stop_all().await;
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn shutdown_abandons_pending_launches() {
        let fx = fixture_with("exec sleep 30", true, |c| c.launch_stagger_ms = 400);
        let launch = tokio::spawn({
            let supervisor = Arc::clone(&fx.supervisor);
            async move { supervisor.start_all().await }
        });
        tokio::time::sleep(Duration::from_millis(250)).await;

        fx.shutdown.cancel();
        fx.supervisor.stop_all().await;
        let reports = tokio::time::timeout(Duration::from_secs(2), launch)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(fx.supervisor.stream_state("video1").await.0, StreamState::Stopped);
        assert_eq!(fx.supervisor.stream_state("video2").await.0, StreamState::Disabled);

        let err = fx.supervisor.start("video2").await.unwrap_err();
        assert!(matches!(err, Error::PrecheckFailed { .. }));
        fx.relay.stop().await;
    }

    #[tokio::test]
    async fn advertised_url_follows_reconfigured_port() {
        let fx = fixture("exec sleep 30", false);
        // No stream is enabled, so the restart launches nothing.
        fx.supervisor.reconfigure(Some(vec![]), Some(9554)).await.unwrap();
        assert_eq!(fx.supervisor.relay_port(), 9554);
        assert_eq!(
            fx.supervisor.advertised_url("video1"),
            "rtsp://localhost:9554/video1"
        );
    }

    #[tokio::test]
    async fn reconfigure_rejects_zero_port() {
        let fx = fixture("exec sleep 30", false);
        let err = fx.supervisor.reconfigure(None, Some(0)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn command_contract() {
        let cmd = transcoder_command(
            Path::new("/usr/bin/ffmpeg"),
            Path::new("videos/video1.mp4"),
            "rtsp://127.0.0.1:8554/video1",
        );
        assert_eq!(
            cmd.get_args(),
            [
                "-re",
                "-stream_loop",
                "-1",
                "-i",
                "videos/video1.mp4",
                "-c:v",
                "copy",
                "-c:a",
                "copy",
                "-f",
                "rtsp",
                "-rtsp_transport",
                "tcp",
                "rtsp://127.0.0.1:8554/video1",
            ]
        );
    }
}
