//! Per-frame element queries.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use crate::strategy::{AttributeSelector, TextPattern};

/// Predicate a frame evaluates over its form controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementQuery {
    /// Controls whose `<label>`, `aria-label` or `aria-labelledby` text matches.
    Label(TextPattern),
    Placeholder(TextPattern),
    Selector(AttributeSelector),
}

impl ElementQuery {
    /// Wire form understood by the in-page query script.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ElementQuery::Label(pattern) => json!({
                "kind": "label",
                "pattern": pattern.source(),
            }),
            ElementQuery::Placeholder(pattern) => json!({
                "kind": "placeholder",
                "pattern": pattern.source(),
            }),
            ElementQuery::Selector(selector) => json!({
                "kind": "selector",
                "css": selector.to_css(),
            }),
        }
    }
}

/// One document context within a page: the top-level document or a nested
/// sub-document. Every operation addresses the first match in document order.
#[async_trait]
pub trait DocumentFrame: Send + Sync {
    fn id(&self) -> &str;

    fn url(&self) -> &str;

    async fn count(&self, query: &ElementQuery) -> Result<usize, FrameError>;

    async fn is_first_visible(&self, query: &ElementQuery) -> Result<bool, FrameError>;

    async fn fill_first(&self, query: &ElementQuery, value: &str) -> Result<(), FrameError>;
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame {frame_id} is detached")]
    Detached { frame_id: String },
    #[error("no element matches the query in frame {frame_id}")]
    NoMatch { frame_id: String },
    #[error("frame evaluation failed: {0}")]
    Evaluation(String),
    #[error("unexpected frame evaluation result: {0}")]
    UnexpectedResult(JsonValue),
}
