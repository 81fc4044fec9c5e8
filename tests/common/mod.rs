//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which lays out a temporary media directory, a
//! matching [`Config`] and a full [`AppContext`]. The [`TestHarness::with_server`]
//! constructor starts Axum on a random port for HTTP-level testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use vr_av::ToolRegistry;
use vr_core::config::Config;
use vr_server::context::AppContext;
use vr_server::router::build_router;

/// Size of the `video1.mp4` fixture.
pub const VIDEO1_LEN: usize = 1000;

/// Deterministic fixture contents: byte `i` is `i % 251`.
pub fn fixture_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Test harness wrapping a fully-constructed [`AppContext`] over a temporary
/// media directory. No external tools are registered, so stream starts fail
/// their prechecks without spawning anything.
pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: TempDir,
}

impl TestHarness {
    /// Default layout: `videos/video1.mp4` (1000 bytes), static registry of 4.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Same layout, with `adjust` applied to the generated config.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let videos = dir.path().join("videos");
        std::fs::create_dir(&videos).expect("failed to create media dir");
        std::fs::write(videos.join("video1.mp4"), fixture_bytes(VIDEO1_LEN))
            .expect("failed to write fixture");

        let mut config = Config::default();
        config.media.dir = videos;
        config.media.chunk_size = 64;
        config.relay.binary = dir.path().join("mediamtx");
        config.relay.port = free_port();
        config.relay.probe_timeout_ms = 100;
        config.transcoder.launch_stagger_ms = 0;
        config.transcoder.advertised_host = "media.test".into();
        adjust(&mut config);

        let ctx = AppContext::with_tools(config, Arc::new(ToolRegistry::default()));
        Self { ctx, dir }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(|_| {}).await
    }

    /// Start an Axum server with an adjusted config on a random port.
    pub async fn with_server_config(adjust: impl FnOnce(&mut Config)) -> (Self, SocketAddr) {
        let harness = Self::with_config(adjust);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn media_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }
}

/// A local port with nothing listening on it.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    listener.local_addr().expect("no local addr").port()
}
