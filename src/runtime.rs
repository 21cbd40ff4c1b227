//! Chromiumoxide-based browser runtime.
//!
//! Implements [`BrowserRuntime`](crate::browser::BrowserRuntime) on top of a
//! locally launched Chrome/Chromium driven over CDP. Frame queries run the
//! embedded field query script inside an isolated JavaScript world, so page
//! scripts cannot observe or tamper with the helper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::IntoEventKind;
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestServedFromCache,
    EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CreateIsolatedWorldParams, EventFrameStoppedLoading, FrameId, FrameTree, GetFrameTreeParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    page::Page as ChromiumPage,
};
use futures_util::StreamExt;
use serde_json::{Value as JsonValue, json};
use tokio::{
    sync::{Mutex, OnceCell, mpsc},
    task::JoinHandle,
};

use crate::browser::{
    BrowserRuntime, BrowserRuntimeError, DocumentId, LaunchOptions, QuiescencePolicy,
};
use crate::dom_scripts::{FieldOp, field_query_expression};
use crate::frame::{DocumentFrame, ElementQuery, FrameError};
use crate::logging::{CATEGORY_NAVIGATE, CATEGORY_SESSION, ClawdpayLogger};
use crate::settle::{NetworkEvent, SettleOutcome, wait_for_quiescence};

/// Name of the isolated world the field query script runs in.
const WORLD_NAME: &str = "clawdpay";

/// Keeps cross-site iframes in the page's renderer so their frames can be
/// queried through the page session.
const SAME_PROCESS_FRAMES_ARG: &str = "--disable-features=IsolateOrigins,site-per-process";

pub struct ChromiumoxideRuntime {
    state: Arc<Mutex<Option<RuntimeState>>>,
    logger: Arc<ClawdpayLogger>,
}

struct RuntimeState {
    browser: Browser,
    handler: JoinHandle<()>,
    pages: HashMap<String, ChromiumPage>,
}

impl ChromiumoxideRuntime {
    pub fn new() -> Self {
        Self::with_logger(Arc::new(ClawdpayLogger::default()))
    }

    pub fn with_logger(logger: Arc<ClawdpayLogger>) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            logger,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn page(&self, document: &DocumentId) -> Result<ChromiumPage, BrowserRuntimeError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(BrowserRuntimeError::NotInitialized)?;
        state
            .pages
            .get(document.as_str())
            .cloned()
            .ok_or_else(|| BrowserRuntimeError::UnknownDocument(document.clone()))
    }

    async fn subscribe_network(
        &self,
        page: &ChromiumPage,
    ) -> Result<(mpsc::UnboundedReceiver<NetworkEvent>, Vec<JoinHandle<()>>), BrowserRuntimeError>
    {
        if let Err(err) = page.execute(network::EnableParams::default()).await {
            self.logger.debug(
                format!("failed to enable Network domain before navigation: {err}"),
                Some(CATEGORY_NAVIGATE),
                None,
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();

        handles.push(spawn_network_listener(
            page.event_listener::<EventRequestWillBeSent>()
                .await
                .map_err(map_chromiumoxide_error)?,
            tx.clone(),
            |ev: &EventRequestWillBeSent| {
                if matches!(
                    ev.r#type.as_ref(),
                    Some(ResourceType::WebSocket | ResourceType::EventSource)
                ) {
                    return None;
                }
                let document_frame = match ev.r#type.as_ref() {
                    Some(ResourceType::Document) => {
                        ev.frame_id.as_ref().map(|id| id.as_ref().to_string())
                    }
                    _ => None,
                };
                Some(NetworkEvent::RequestStarted {
                    request_id: ev.request_id.as_ref().to_string(),
                    url: ev.request.url.clone(),
                    document_frame,
                })
            },
        ));
        handles.push(spawn_network_listener(
            page.event_listener::<EventLoadingFinished>()
                .await
                .map_err(map_chromiumoxide_error)?,
            tx.clone(),
            |ev: &EventLoadingFinished| Some(finished(ev.request_id.as_ref())),
        ));
        handles.push(spawn_network_listener(
            page.event_listener::<EventLoadingFailed>()
                .await
                .map_err(map_chromiumoxide_error)?,
            tx.clone(),
            |ev: &EventLoadingFailed| Some(finished(ev.request_id.as_ref())),
        ));
        handles.push(spawn_network_listener(
            page.event_listener::<EventRequestServedFromCache>()
                .await
                .map_err(map_chromiumoxide_error)?,
            tx.clone(),
            |ev: &EventRequestServedFromCache| Some(finished(ev.request_id.as_ref())),
        ));
        handles.push(spawn_network_listener(
            page.event_listener::<EventResponseReceived>()
                .await
                .map_err(map_chromiumoxide_error)?,
            tx.clone(),
            |ev: &EventResponseReceived| {
                ev.response
                    .url
                    .starts_with("data:")
                    .then(|| finished(ev.request_id.as_ref()))
            },
        ));
        handles.push(spawn_network_listener(
            page.event_listener::<EventFrameStoppedLoading>()
                .await
                .map_err(map_chromiumoxide_error)?,
            tx,
            |ev: &EventFrameStoppedLoading| {
                Some(NetworkEvent::FrameStopped {
                    frame_id: ev.frame_id.as_ref().to_string(),
                })
            },
        ));

        Ok((rx, handles))
    }
}

impl Default for ChromiumoxideRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserRuntime for ChromiumoxideRuntime {
    async fn launch(&self, options: &LaunchOptions) -> Result<(), BrowserRuntimeError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let config = build_config(options)?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(map_chromiumoxide_error)?;

        *guard = Some(RuntimeState {
            browser,
            handler: spawn_handler(handler, Arc::clone(&self.logger)),
            pages: HashMap::new(),
        });
        self.logger.debug(
            "chromium launched",
            Some(CATEGORY_SESSION),
            Some(json!({ "headless": options.headless })),
        );
        Ok(())
    }

    async fn new_document(&self) -> Result<DocumentId, BrowserRuntimeError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(BrowserRuntimeError::NotInitialized)?;

        let page = state
            .browser
            .new_page("about:blank")
            .await
            .map_err(map_chromiumoxide_error)?;
        let id = page.target_id().as_ref().to_string();
        state.pages.insert(id.clone(), page);
        Ok(DocumentId::new(id))
    }

    async fn navigate(
        &self,
        document: &DocumentId,
        url: &str,
        policy: &QuiescencePolicy,
    ) -> Result<String, BrowserRuntimeError> {
        let page = self.page(document).await?;
        let (mut events, listeners) = self.subscribe_network(&page).await?;

        let navigation = tokio::time::timeout(policy.timeout, page.goto(url)).await;
        let result = match navigation {
            Err(_) => Err(BrowserRuntimeError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {}ms", policy.timeout.as_millis()),
            }),
            Ok(Err(err)) => Err(BrowserRuntimeError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            }),
            Ok(Ok(_)) => Ok(()),
        };

        if result.is_ok() {
            let outcome = wait_for_quiescence(&mut events, policy, &self.logger).await;
            if outcome != SettleOutcome::Quiet {
                self.logger.debug(
                    format!("network did not go idle: {outcome:?}"),
                    Some(CATEGORY_NAVIGATE),
                    Some(json!({ "url": url })),
                );
            }
        }

        for handle in listeners {
            handle.abort();
        }
        result?;

        let title = page.get_title().await.map_err(map_chromiumoxide_error)?;
        Ok(title.unwrap_or_default())
    }

    async fn frames(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<Box<dyn DocumentFrame>>, BrowserRuntimeError> {
        let page = self.page(document).await?;
        let tree = page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(map_chromiumoxide_error)?
            .result
            .frame_tree;

        let frames = depth_first(&tree, |node: &FrameTree| {
            node.child_frames.as_deref().unwrap_or_default()
        })
        .into_iter()
        .map(|node| {
            Box::new(ChromiumFrame::new(
                page.clone(),
                node.frame.id.clone(),
                node.frame.url.clone(),
            )) as Box<dyn DocumentFrame>
        })
        .collect();
        Ok(frames)
    }

    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        if let Some(state) = state {
            cleanup_state(state, &self.logger).await;
        }
        Ok(())
    }
}

/// One frame of a Chromium page. The isolated world is created on first use.
struct ChromiumFrame {
    page: ChromiumPage,
    frame_id: FrameId,
    id: String,
    url: String,
    context: OnceCell<ExecutionContextId>,
}

impl ChromiumFrame {
    fn new(page: ChromiumPage, frame_id: FrameId, url: String) -> Self {
        ChromiumFrame {
            page,
            id: frame_id.as_ref().to_string(),
            frame_id,
            url,
            context: OnceCell::new(),
        }
    }

    async fn context_id(&self) -> Result<ExecutionContextId, FrameError> {
        self.context
            .get_or_try_init(|| async {
                let mut params = CreateIsolatedWorldParams::new(self.frame_id.clone());
                params.world_name = Some(WORLD_NAME.to_string());
                let response = self.page.execute(params).await.map_err(|err| {
                    let message = err.to_string();
                    if message.contains("No frame") {
                        FrameError::Detached {
                            frame_id: self.id.clone(),
                        }
                    } else {
                        FrameError::Evaluation(message)
                    }
                })?;
                Ok::<_, FrameError>(response.result.execution_context_id)
            })
            .await
            .cloned()
    }

    async fn run(&self, query: &ElementQuery, op: FieldOp<'_>) -> Result<JsonValue, FrameError> {
        let context_id = self.context_id().await?;
        let params = EvaluateParams::builder()
            .expression(field_query_expression(query, op))
            .context_id(context_id)
            .return_by_value(true)
            .build()
            .map_err(FrameError::Evaluation)?;

        let response = self
            .page
            .execute(params)
            .await
            .map_err(|err| FrameError::Evaluation(err.to_string()))?;

        if let Some(details) = response.result.exception_details.as_ref() {
            let description = details
                .exception
                .as_ref()
                .and_then(|exception| exception.description.clone())
                .unwrap_or_else(|| details.text.clone());
            return Err(FrameError::Evaluation(description));
        }

        Ok(response
            .result
            .result
            .value
            .clone()
            .unwrap_or(JsonValue::Null))
    }
}

#[async_trait]
impl DocumentFrame for ChromiumFrame {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn count(&self, query: &ElementQuery) -> Result<usize, FrameError> {
        let reply = self.run(query, FieldOp::Count).await?;
        reply
            .get("count")
            .and_then(JsonValue::as_u64)
            .map(|count| count as usize)
            .ok_or(FrameError::UnexpectedResult(reply))
    }

    async fn is_first_visible(&self, query: &ElementQuery) -> Result<bool, FrameError> {
        let reply = self.run(query, FieldOp::Visible).await?;
        reply
            .get("visible")
            .and_then(JsonValue::as_bool)
            .ok_or(FrameError::UnexpectedResult(reply))
    }

    async fn fill_first(&self, query: &ElementQuery, value: &str) -> Result<(), FrameError> {
        let reply = self.run(query, FieldOp::Fill(value)).await?;
        match reply.get("filled").and_then(JsonValue::as_bool) {
            Some(true) => Ok(()),
            Some(false) => Err(FrameError::NoMatch {
                frame_id: self.id.clone(),
            }),
            None => Err(FrameError::UnexpectedResult(reply)),
        }
    }
}

/// Pre-order depth-first walk: the root first, then each child subtree in
/// order.
fn depth_first<'a, T, F>(root: &'a T, children: F) -> Vec<&'a T>
where
    F: Fn(&T) -> &[T],
{
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(children(node).iter().rev());
    }
    out
}

fn finished(request_id: &str) -> NetworkEvent {
    NetworkEvent::RequestFinished {
        request_id: request_id.to_string(),
    }
}

fn spawn_network_listener<T, F>(
    mut stream: EventStream<T>,
    tx: mpsc::UnboundedSender<NetworkEvent>,
    map: F,
) -> JoinHandle<()>
where
    T: IntoEventKind + Clone + Unpin + Send + Sync + 'static,
    F: Fn(&T) -> Option<NetworkEvent> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            if let Some(mapped) = map(event.as_ref()) {
                if tx.send(mapped).is_err() {
                    break;
                }
            }
        }
    })
}

fn build_config(options: &LaunchOptions) -> Result<BrowserConfig, BrowserRuntimeError> {
    let viewport = chromiumoxide::handler::viewport::Viewport {
        width: options.viewport.width,
        height: options.viewport.height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: options.viewport.width >= options.viewport.height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder();

    if let Some(path) = &options.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder
        .viewport(viewport)
        .args(options.args.clone())
        .arg(SAME_PROCESS_FRAMES_ARG)
        .request_timeout(Duration::from_millis(options.request_timeout_ms));

    let builder = if options.headless {
        builder
    } else {
        builder.with_head()
    };

    builder.build().map_err(BrowserRuntimeError::Message)
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> BrowserRuntimeError {
    BrowserRuntimeError::Message(err.to_string())
}

fn spawn_handler(
    mut handler: chromiumoxide::handler::Handler,
    logger: Arc<ClawdpayLogger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                logger.debug(
                    format!("chromiumoxide handler error: {err}"),
                    Some(CATEGORY_SESSION),
                    None,
                );
            }
        }
    })
}

async fn cleanup_state(mut state: RuntimeState, logger: &ClawdpayLogger) {
    for (_, page) in state.pages.drain() {
        if let Err(err) = page.close().await {
            logger.debug(
                format!("failed to close page: {err}"),
                Some(CATEGORY_SESSION),
                None,
            );
        }
    }
    if let Err(err) = state.browser.close().await {
        logger.debug(
            format!("failed to close browser: {err}"),
            Some(CATEGORY_SESSION),
            None,
        );
    }
    if let Err(err) = state.browser.wait().await {
        logger.debug(
            format!("failed to reap browser process: {err}"),
            Some(CATEGORY_SESSION),
            None,
        );
    }
    state.handler.abort();
}
