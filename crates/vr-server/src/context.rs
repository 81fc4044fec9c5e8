//! Application context shared across route handlers via Axum state.
//!
//! [`AppContext`] wraps the long-lived services (supervisor, relay manager,
//! tool registry, task store, MJPEG feeds) in `Arc`s so cloning it per
//! request is cheap. The shutdown token is shared with the supervisor, which
//! refuses new launches once it fires.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vr_av::{FeedHub, RelayManager, Supervisor, ToolRegistry};
use vr_core::config::Config;
use vr_core::tasks::TaskStore;
use vr_media::MediaRegistry;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub supervisor: Arc<Supervisor>,
    pub relay: Arc<RelayManager>,
    pub tools: Arc<ToolRegistry>,
    pub tasks: Arc<TaskStore>,
    pub feeds: Arc<FeedHub>,
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Wire every service from configuration. Nothing is started.
    pub fn from_config(config: Config) -> Self {
        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        Self::with_tools(config, tools)
    }

    /// Same as [`AppContext::from_config`] but with an explicit tool registry.
    pub fn with_tools(config: Config, tools: Arc<ToolRegistry>) -> Self {
        let registry = MediaRegistry::from_config(&config.media);
        let relay = Arc::new(RelayManager::new(&config.relay));
        let shutdown = CancellationToken::new();
        let supervisor = Arc::new(
            Supervisor::new(
                registry,
                Arc::clone(&tools),
                Arc::clone(&relay),
                config.transcoder.clone(),
                config.relay.port,
            )
            .with_shutdown(shutdown.clone()),
        );
        let feeds = Arc::new(FeedHub::from_config(&config.feeds, &tools));

        Self {
            config: Arc::new(config),
            supervisor,
            relay,
            tools,
            tasks: Arc::new(TaskStore::default()),
            feeds,
            shutdown,
        }
    }

    pub fn registry(&self) -> &MediaRegistry {
        self.supervisor.registry()
    }
}
