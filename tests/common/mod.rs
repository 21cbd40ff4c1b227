#![allow(dead_code)]

//! In-memory document engine for exercising sessions without a browser.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clawdpay_rs::browser::{
    BrowserRuntime, BrowserRuntimeError, DocumentId, LaunchOptions, QuiescencePolicy,
};
use clawdpay_rs::config::{ClawdpayConfig, Verbosity};
use clawdpay_rs::frame::{DocumentFrame, ElementQuery, FrameError};

pub fn quiet_config() -> ClawdpayConfig {
    ClawdpayConfig {
        verbose: Verbosity::Minimal,
        ..ClawdpayConfig::default()
    }
}

/// A form control with the properties the field queries look at.
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub tag: String,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub attributes: HashMap<String, String>,
    pub visible: bool,
    pub read_only: bool,
    pub value: String,
}

impl FakeElement {
    pub fn input() -> Self {
        FakeElement {
            tag: "input".to_string(),
            label: None,
            placeholder: None,
            attributes: HashMap::new(),
            visible: true,
            read_only: false,
            value: String::new(),
        }
    }

    pub fn select() -> Self {
        FakeElement {
            tag: "select".to_string(),
            ..FakeElement::input()
        }
    }

    pub fn label(mut self, text: &str) -> Self {
        self.label = Some(text.to_string());
        self
    }

    pub fn placeholder(mut self, text: &str) -> Self {
        self.placeholder = Some(text.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn matches(&self, query: &ElementQuery) -> bool {
        match query {
            ElementQuery::Label(pattern) => self
                .label
                .as_deref()
                .is_some_and(|text| pattern.is_match(text)),
            ElementQuery::Placeholder(pattern) => self
                .placeholder
                .as_deref()
                .is_some_and(|text| pattern.is_match(text)),
            ElementQuery::Selector(selector) => selector
                .matches(&self.tag, |name| self.attributes.get(name).map(String::as_str)),
        }
    }
}

/// One frame of a fake page. Clones share element state, so a test can keep a
/// handle and inspect values after the session fills them.
#[derive(Clone)]
pub struct FakeFrame {
    id: String,
    url: String,
    elements: Arc<Mutex<Vec<FakeElement>>>,
    queries: Arc<Mutex<Vec<ElementQuery>>>,
    detached: bool,
}

impl FakeFrame {
    pub fn new(id: &str, url: &str, elements: Vec<FakeElement>) -> Self {
        FakeFrame {
            id: id.to_string(),
            url: url.to_string(),
            elements: Arc::new(Mutex::new(elements)),
            queries: Arc::new(Mutex::new(Vec::new())),
            detached: false,
        }
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn value(&self, index: usize) -> String {
        self.elements.lock().expect("elements lock")[index]
            .value
            .clone()
    }

    pub fn values(&self) -> Vec<String> {
        self.elements
            .lock()
            .expect("elements lock")
            .iter()
            .map(|element| element.value.clone())
            .collect()
    }

    /// Queries seen by `count`, in order.
    pub fn counted_queries(&self) -> Vec<ElementQuery> {
        self.queries.lock().expect("queries lock").clone()
    }

    fn check_attached(&self) -> Result<(), FrameError> {
        if self.detached {
            return Err(FrameError::Detached {
                frame_id: self.id.clone(),
            });
        }
        Ok(())
    }

    fn first_match(&self, elements: &[FakeElement], query: &ElementQuery) -> Option<usize> {
        elements.iter().position(|element| element.matches(query))
    }
}

#[async_trait]
impl DocumentFrame for FakeFrame {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn count(&self, query: &ElementQuery) -> Result<usize, FrameError> {
        self.queries.lock().expect("queries lock").push(*query);
        self.check_attached()?;
        let elements = self.elements.lock().expect("elements lock");
        Ok(elements.iter().filter(|element| element.matches(query)).count())
    }

    async fn is_first_visible(&self, query: &ElementQuery) -> Result<bool, FrameError> {
        self.check_attached()?;
        let elements = self.elements.lock().expect("elements lock");
        let index = self
            .first_match(&elements, query)
            .ok_or_else(|| FrameError::NoMatch {
                frame_id: self.id.clone(),
            })?;
        Ok(elements[index].visible)
    }

    async fn fill_first(&self, query: &ElementQuery, value: &str) -> Result<(), FrameError> {
        self.check_attached()?;
        let mut elements = self.elements.lock().expect("elements lock");
        let index = self
            .first_match(&elements, query)
            .ok_or_else(|| FrameError::NoMatch {
                frame_id: self.id.clone(),
            })?;
        let element = &mut elements[index];
        if element.read_only {
            return Err(FrameError::Evaluation("element is read-only".to_string()));
        }
        element.value = value.to_string();
        Ok(())
    }
}

/// A page the fake engine can navigate to: a title plus frames in
/// main-first depth-first order.
#[derive(Clone)]
pub struct FakePage {
    pub title: String,
    pub frames: Vec<FakeFrame>,
}

impl FakePage {
    pub fn new(title: &str, frames: Vec<FakeFrame>) -> Self {
        FakePage {
            title: title.to_string(),
            frames,
        }
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    pages: Mutex<HashMap<String, FakePage>>,
    current: Mutex<Option<String>>,
    running: AtomicBool,
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeRuntime::default())
    }

    pub fn with_page(self: &Arc<Self>, url: &str, page: FakePage) -> Arc<Self> {
        self.pages
            .lock()
            .expect("pages lock")
            .insert(url.to_string(), page);
        Arc::clone(self)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().expect("navigations lock").clone()
    }

    fn ensure_running(&self) -> Result<(), BrowserRuntimeError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BrowserRuntimeError::NotInitialized)
        }
    }
}

#[async_trait]
impl BrowserRuntime for FakeRuntime {
    async fn launch(&self, _options: &LaunchOptions) -> Result<(), BrowserRuntimeError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.launches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn new_document(&self) -> Result<DocumentId, BrowserRuntimeError> {
        self.ensure_running()?;
        Ok(DocumentId::new("fake-document"))
    }

    async fn navigate(
        &self,
        _document: &DocumentId,
        url: &str,
        _policy: &QuiescencePolicy,
    ) -> Result<String, BrowserRuntimeError> {
        self.ensure_running()?;
        self.navigations
            .lock()
            .expect("navigations lock")
            .push(url.to_string());
        let pages = self.pages.lock().expect("pages lock");
        let page = pages
            .get(url)
            .ok_or_else(|| BrowserRuntimeError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            })?;
        *self.current.lock().expect("current lock") = Some(url.to_string());
        Ok(page.title.clone())
    }

    async fn frames(
        &self,
        _document: &DocumentId,
    ) -> Result<Vec<Box<dyn DocumentFrame>>, BrowserRuntimeError> {
        self.ensure_running()?;
        let current = self.current.lock().expect("current lock").clone();
        let Some(url) = current else {
            return Ok(vec![Box::new(FakeFrame::new("main", "about:blank", vec![]))]);
        };
        let pages = self.pages.lock().expect("pages lock");
        let frames = pages
            .get(&url)
            .map(|page| page.frames.clone())
            .unwrap_or_default();
        Ok(frames
            .into_iter()
            .map(|frame| Box::new(frame) as Box<dyn DocumentFrame>)
            .collect())
    }

    async fn shutdown(&self) -> Result<(), BrowserRuntimeError> {
        self.running.store(false, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().expect("current lock") = None;
        Ok(())
    }
}
