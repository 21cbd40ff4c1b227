//! Payment session: owns the browser engine and the active document.
//!
//! The engine is acquired lazily on first navigation (or an explicit
//! [`PaymentSession::ensure_ready`]) and held until [`PaymentSession::close`].
//! Operations serialise on a single lock, so a second fill or navigation
//! waits for the one in progress.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::browser::{
    BrowserRuntime, BrowserRuntimeError, DocumentId, LaunchOptions, QuiescencePolicy,
};
use crate::config::ClawdpayConfig;
use crate::engine::{FillEngine, FillReport, PaymentDetails};
use crate::logging::{CATEGORY_NAVIGATE, CATEGORY_SESSION, ClawdpayLogger, LogConfig};
use crate::strategy::StrategyCatalog;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("payment session is not initialized; navigate to a checkout page first")]
    NotReady,
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error(transparent)]
    Browser(BrowserRuntimeError),
}

impl From<BrowserRuntimeError> for SessionError {
    fn from(err: BrowserRuntimeError) -> Self {
        match err {
            BrowserRuntimeError::NotInitialized => SessionError::NotReady,
            BrowserRuntimeError::Navigation { url, reason } => {
                SessionError::Navigation { url, reason }
            }
            other => SessionError::Browser(other),
        }
    }
}

struct SessionState {
    document: DocumentId,
}

pub struct PaymentSession<R: BrowserRuntime> {
    runtime: R,
    launch: LaunchOptions,
    quiescence: QuiescencePolicy,
    catalog: &'static StrategyCatalog,
    logger: Arc<ClawdpayLogger>,
    state: Mutex<Option<SessionState>>,
}

impl<R: BrowserRuntime> PaymentSession<R> {
    pub fn new(runtime: R, config: &ClawdpayConfig) -> Self {
        let logger = ClawdpayLogger::with_config(LogConfig {
            verbose: config.verbose,
            external_logger: config.logger.clone(),
        });
        Self::with_logger(runtime, config, Arc::new(logger))
    }

    pub fn with_logger(runtime: R, config: &ClawdpayConfig, logger: Arc<ClawdpayLogger>) -> Self {
        PaymentSession {
            runtime,
            launch: LaunchOptions::from_config(config),
            quiescence: QuiescencePolicy::from_config(config),
            catalog: StrategyCatalog::standard(),
            logger,
            state: Mutex::new(None),
        }
    }

    /// Replace the heuristics table used by subsequent fills.
    pub fn with_catalog(mut self, catalog: &'static StrategyCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn logger(&self) -> &Arc<ClawdpayLogger> {
        &self.logger
    }

    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Launch the engine and open a document unless already done.
    pub async fn ensure_ready(&self) -> Result<(), SessionError> {
        let mut guard = self.state.lock().await;
        self.acquire(&mut guard).await.map(|_| ())
    }

    /// Load `url`, wait for network quiescence and return the page title.
    pub async fn navigate(&self, url: &str) -> Result<String, SessionError> {
        let mut guard = self.state.lock().await;
        let document = self.acquire(&mut guard).await?;

        self.logger.info(
            format!("navigating to {url}"),
            Some(CATEGORY_NAVIGATE),
            None,
        );
        let title = self
            .runtime
            .navigate(&document, url, &self.quiescence)
            .await
            .map_err(|err| {
                self.logger.error(
                    format!("navigation failed: {err}"),
                    Some(CATEGORY_NAVIGATE),
                    Some(json!({ "url": url })),
                );
                SessionError::from(err)
            })?;
        self.logger.debug(
            "navigation settled",
            Some(CATEGORY_NAVIGATE),
            Some(json!({ "url": url, "title": title })),
        );
        Ok(title)
    }

    /// Fill every recognisable payment field across the current document's
    /// frames. Missing fields are not an error.
    pub async fn smart_fill_payment(
        &self,
        details: &PaymentDetails,
    ) -> Result<FillReport, SessionError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(SessionError::NotReady)?;

        let frames = self.runtime.frames(&state.document).await?;
        self.logger.debug(
            format!("scanning {} frame(s) for payment fields", frames.len()),
            Some(CATEGORY_SESSION),
            None,
        );

        let engine = FillEngine::new(self.catalog, &self.logger);
        let report = engine.fill_frames(&frames, details).await;
        self.logger.info(
            format!("fill complete: {report}"),
            Some(CATEGORY_SESSION),
            None,
        );
        Ok(report)
    }

    /// Release the document and the engine. A later navigation starts clean.
    pub async fn close(&self) -> Result<(), SessionError> {
        let mut guard = self.state.lock().await;
        if guard.take().is_none() {
            return Ok(());
        }
        self.runtime.shutdown().await?;
        self.logger
            .info("browser session closed", Some(CATEGORY_SESSION), None);
        Ok(())
    }

    async fn acquire(&self, state: &mut Option<SessionState>) -> Result<DocumentId, SessionError> {
        if let Some(existing) = state.as_ref() {
            return Ok(existing.document.clone());
        }

        self.logger.info(
            "launching browser",
            Some(CATEGORY_SESSION),
            Some(json!({ "headless": self.launch.headless })),
        );
        self.runtime.launch(&self.launch).await?;
        let document = self.runtime.new_document().await?;
        *state = Some(SessionState {
            document: document.clone(),
        });
        Ok(document)
    }
}
