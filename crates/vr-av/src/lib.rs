//! # vr-av
//!
//! External process management for vidrelay.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg on `PATH` or at a
//!   configured location.
//! - **Command execution** ([`ToolCommand`]) -- async builder for one-shot
//!   invocations with a timeout, and for long-lived supervised children.
//! - **Process handles** ([`ManagedProcess`]) -- liveness probing and
//!   graceful termination with a forced-kill fallback.
//! - **Relay management** ([`RelayManager`]) -- keep the single RTSP relay up.
//! - **Transcoder supervision** ([`Supervisor`], [`LivenessMonitor`]) -- one
//!   looping publisher per stream.
//! - **MJPEG fan-out** ([`mjpeg`]) -- share one capture among many clients.

pub mod command;
pub mod mjpeg;
pub mod monitor;
pub mod process;
pub mod relay;
pub mod supervisor;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use mjpeg::{FeedHub, FrameMultiplexer, FrameReader, FrameSource};
pub use monitor::LivenessMonitor;
pub use process::{ManagedProcess, TerminateOutcome};
pub use relay::{RelayManager, RelayOutcome, RelayStatus};
pub use supervisor::{
    RestartReport, StreamReport, StreamState, StreamStatus, Supervisor, SupervisorStatus,
};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
