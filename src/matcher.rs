//! Field matcher: resolves one detection strategy inside one frame.
//!
//! A strategy yields a candidate only when the query matches at least one
//! element and the first match in document order is visible. An invisible
//! first match rejects the whole strategy; the matcher does not fall through
//! to later matches of the same query. Query failures (detached frames,
//! script errors) are logged at debug level and count as no candidate.

use serde_json::json;

use crate::frame::{DocumentFrame, ElementQuery, FrameError};
use crate::logging::{CATEGORY_FILL, ClawdpayLogger};
use crate::strategy::DetectionStrategy;

/// Accepted element: the first match of `query` in `frame`.
pub struct Candidate<'a> {
    frame: &'a dyn DocumentFrame,
    query: ElementQuery,
}

impl<'a> Candidate<'a> {
    pub fn frame_id(&self) -> &str {
        self.frame.id()
    }

    pub fn query(&self) -> &ElementQuery {
        &self.query
    }

    /// Set the element's value. No read-back is performed.
    pub async fn fill(&self, value: &str) -> Result<(), FrameError> {
        self.frame.fill_first(&self.query, value).await
    }
}

pub enum MatchOutcome<'a> {
    Found(Candidate<'a>),
    NotFound,
}

impl MatchOutcome<'_> {
    pub fn is_found(&self) -> bool {
        matches!(self, MatchOutcome::Found(_))
    }
}

pub async fn resolve<'a>(
    frame: &'a dyn DocumentFrame,
    strategy: &DetectionStrategy,
    logger: &ClawdpayLogger,
) -> MatchOutcome<'a> {
    let query = strategy.query();
    match has_visible_match(frame, &query).await {
        Ok(true) => MatchOutcome::Found(Candidate { frame, query }),
        Ok(false) => MatchOutcome::NotFound,
        Err(err) => {
            logger.debug(
                format!("strategy evaluation failed: {err}"),
                Some(CATEGORY_FILL),
                Some(json!({ "frame": frame.id(), "strategy": strategy.to_string() })),
            );
            MatchOutcome::NotFound
        }
    }
}

async fn has_visible_match(
    frame: &dyn DocumentFrame,
    query: &ElementQuery,
) -> Result<bool, FrameError> {
    if frame.count(query).await? == 0 {
        return Ok(false);
    }
    frame.is_first_visible(query).await
}
