//! Browser engine seam for payment sessions.
//!
//! The session layer never talks to a browser directly. It drives a
//! [`BrowserRuntime`], which launches the engine, owns documents and hands out
//! per-frame query handles. [`crate::runtime::ChromiumoxideRuntime`] is the
//! real implementation; tests plug in in-memory documents.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ClawdpayConfig;
use crate::frame::DocumentFrame;

/// Default idle window after the last network request finishes.
pub const DEFAULT_QUIET_WINDOW_MS: u64 = 500;
/// Requests running longer than this no longer hold navigation open.
pub const DEFAULT_STALL_THRESHOLD_MS: u64 = 2_000;
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

/// Viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1280,
            height: 720,
        }
    }
}

/// Engine launch parameters derived from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub headless: bool,
    pub args: Vec<String>,
    pub chrome_executable: Option<PathBuf>,
    pub viewport: Viewport,
    pub request_timeout_ms: u64,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        LaunchOptions {
            headless: true,
            args: vec!["--no-sandbox".to_string()],
            chrome_executable: None,
            viewport: Viewport::default(),
            request_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }
}

impl LaunchOptions {
    pub fn from_config(config: &ClawdpayConfig) -> Self {
        LaunchOptions {
            headless: config.headless,
            args: config.browser_args.clone(),
            chrome_executable: config.chrome_executable.clone(),
            viewport: Viewport::default(),
            request_timeout_ms: config.navigation_timeout_ms,
        }
    }
}

/// When a navigation counts as finished: the network has been idle for
/// `quiet_window`, with stalled requests ignored, bounded by `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescencePolicy {
    pub quiet_window: Duration,
    pub stall_threshold: Duration,
    pub timeout: Duration,
}

impl Default for QuiescencePolicy {
    fn default() -> Self {
        QuiescencePolicy {
            quiet_window: Duration::from_millis(DEFAULT_QUIET_WINDOW_MS),
            stall_threshold: Duration::from_millis(DEFAULT_STALL_THRESHOLD_MS),
            timeout: Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT_MS),
        }
    }
}

impl QuiescencePolicy {
    pub fn from_config(config: &ClawdpayConfig) -> Self {
        QuiescencePolicy {
            quiet_window: Duration::from_millis(config.network_idle_ms),
            timeout: Duration::from_millis(config.navigation_timeout_ms),
            ..Default::default()
        }
    }
}

/// Opaque handle for a top-level document owned by a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Abstraction over the document engine used by payment sessions.
#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    /// Start the engine. Launching an already running runtime is a no-op.
    async fn launch(&self, options: &LaunchOptions) -> Result<(), BrowserRuntimeError>;

    async fn new_document(&self) -> Result<DocumentId, BrowserRuntimeError>;

    /// Load `url` in the document, wait for quiescence and return the title.
    async fn navigate(
        &self,
        document: &DocumentId,
        url: &str,
        policy: &QuiescencePolicy,
    ) -> Result<String, BrowserRuntimeError>;

    /// Snapshot of the document's frames: main frame first, then
    /// descendants in depth-first order.
    async fn frames(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<Box<dyn DocumentFrame>>, BrowserRuntimeError>;

    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        Err(BrowserRuntimeError::Unsupported("shutdown"))
    }
}

#[async_trait]
impl<T> BrowserRuntime for std::sync::Arc<T>
where
    T: BrowserRuntime + ?Sized,
{
    async fn launch(&self, options: &LaunchOptions) -> Result<(), BrowserRuntimeError> {
        (**self).launch(options).await
    }

    async fn new_document(&self) -> Result<DocumentId, BrowserRuntimeError> {
        (**self).new_document().await
    }

    async fn navigate(
        &self,
        document: &DocumentId,
        url: &str,
        policy: &QuiescencePolicy,
    ) -> Result<String, BrowserRuntimeError> {
        (**self).navigate(document, url, policy).await
    }

    async fn frames(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<Box<dyn DocumentFrame>>, BrowserRuntimeError> {
        (**self).frames(document).await
    }

    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        (**self).shutdown().await
    }
}

#[derive(Debug, Error)]
pub enum BrowserRuntimeError {
    #[error("browser runtime error: {0}")]
    Message(String),
    #[error("browser runtime not initialized")]
    NotInitialized,
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("unknown document {0}")]
    UnknownDocument(DocumentId),
    #[error("browser runtime feature unsupported: {0}")]
    Unsupported(&'static str),
}
