//! Network quiescence tracking used after navigation.
//!
//! Navigation is considered settled once no request has been in flight for
//! the policy's quiet window. Requests running longer than the stall
//! threshold are force-completed so long polls cannot hold a page open, and
//! the overall wait is bounded by the policy timeout.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, MissedTickBehavior, Sleep};

use crate::browser::QuiescencePolicy;
use crate::logging::{CATEGORY_NAVIGATE, ClawdpayLogger};

/// Engine-neutral network activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    RequestStarted {
        request_id: String,
        url: String,
        /// Set when the request loads a frame's document.
        document_frame: Option<String>,
    },
    RequestFinished {
        request_id: String,
    },
    FrameStopped {
        frame_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Quiet,
    TimedOut { inflight: usize },
    /// Every event source went away (e.g. the page closed).
    StreamClosed,
}

#[derive(Debug, Clone)]
struct RequestMeta {
    url: String,
    started_at: Instant,
}

#[derive(Debug, Default)]
pub struct InflightTracker {
    inflight: HashSet<String>,
    meta: HashMap<String, RequestMeta>,
    doc_by_frame: HashMap<String, String>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn start(
        &mut self,
        request_id: &str,
        url: &str,
        document_frame: Option<&str>,
        started_at: Instant,
    ) {
        self.inflight.insert(request_id.to_string());
        self.meta.insert(
            request_id.to_string(),
            RequestMeta {
                url: url.to_string(),
                started_at,
            },
        );
        if let Some(frame_id) = document_frame {
            self.doc_by_frame
                .insert(frame_id.to_string(), request_id.to_string());
        }
    }

    /// Returns whether the request was still in flight.
    pub fn finish(&mut self, request_id: &str) -> bool {
        let was_inflight = self.inflight.remove(request_id);
        self.meta.remove(request_id);
        self.doc_by_frame.retain(|_, rid| rid != request_id);
        was_inflight
    }

    /// A frame stopped loading: its document request is done even if the
    /// loading-finished event never arrives.
    pub fn frame_stopped(&mut self, frame_id: &str) -> bool {
        match self.doc_by_frame.remove(frame_id) {
            Some(request_id) => self.finish(&request_id),
            None => false,
        }
    }

    /// Requests older than `threshold`, as `(request_id, url)`.
    pub fn stalled(&self, now: Instant, threshold: Duration) -> Vec<(String, String)> {
        self.meta
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.started_at) > threshold)
            .map(|(request_id, entry)| (request_id.clone(), entry.url.clone()))
            .collect()
    }

    pub fn apply(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::RequestStarted {
                request_id,
                url,
                document_frame,
            } => self.start(&request_id, &url, document_frame.as_deref(), Instant::now()),
            NetworkEvent::RequestFinished { request_id } => {
                self.finish(&request_id);
            }
            NetworkEvent::FrameStopped { frame_id } => {
                self.frame_stopped(&frame_id);
            }
        }
    }
}

/// Consume network events until the page is quiet, the timeout elapses or
/// the event stream ends.
pub async fn wait_for_quiescence(
    events: &mut mpsc::UnboundedReceiver<NetworkEvent>,
    policy: &QuiescencePolicy,
    logger: &ClawdpayLogger,
) -> SettleOutcome {
    let mut tracker = InflightTracker::new();
    let mut stall_tick = time::interval(policy.quiet_window.max(Duration::from_millis(50)));
    stall_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut quiet_timer: Option<Pin<Box<Sleep>>> = None;
    start_quiet_timer(&mut quiet_timer, policy.quiet_window);
    let mut timeout_timer = Box::pin(time::sleep(policy.timeout));

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        tracker.apply(event);
                        if tracker.is_idle() {
                            start_quiet_timer(&mut quiet_timer, policy.quiet_window);
                        } else {
                            quiet_timer = None;
                        }
                    }
                    None => return SettleOutcome::StreamClosed,
                }
            }
            _ = async {
                if let Some(timer) = quiet_timer.as_mut() {
                    timer.as_mut().await;
                }
            }, if quiet_timer.is_some() => {
                return SettleOutcome::Quiet;
            }
            _ = stall_tick.tick() => {
                for (request_id, url) in tracker.stalled(Instant::now(), policy.stall_threshold) {
                    logger.debug(
                        "forcing completion of stalled request",
                        Some(CATEGORY_NAVIGATE),
                        Some(json!({ "url": url })),
                    );
                    tracker.finish(&request_id);
                }
                if tracker.is_idle() {
                    start_quiet_timer(&mut quiet_timer, policy.quiet_window);
                }
            }
            _ = &mut timeout_timer => {
                if !tracker.is_idle() {
                    logger.debug(
                        format!("network idle timeout reached with {} inflight requests", tracker.len()),
                        Some(CATEGORY_NAVIGATE),
                        None,
                    );
                }
                return SettleOutcome::TimedOut { inflight: tracker.len() };
            }
        }
    }
}

fn start_quiet_timer(timer: &mut Option<Pin<Box<Sleep>>>, quiet_window: Duration) {
    if timer.is_none() {
        timer.replace(Box::pin(time::sleep(quiet_window)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verbosity;

    fn started(id: &str) -> NetworkEvent {
        NetworkEvent::RequestStarted {
            request_id: id.into(),
            url: format!("https://shop.test/{id}"),
            document_frame: None,
        }
    }

    fn policy(quiet_ms: u64, stall_ms: u64, timeout_ms: u64) -> QuiescencePolicy {
        QuiescencePolicy {
            quiet_window: Duration::from_millis(quiet_ms),
            stall_threshold: Duration::from_millis(stall_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn tracker_follows_request_lifecycle() {
        let mut tracker = InflightTracker::new();
        tracker.apply(started("a"));
        tracker.apply(NetworkEvent::RequestStarted {
            request_id: "doc".into(),
            url: "https://shop.test/".into(),
            document_frame: Some("frame-1".into()),
        });
        assert_eq!(tracker.len(), 2);

        assert!(tracker.finish("a"));
        assert!(!tracker.finish("a"));
        assert!(tracker.frame_stopped("frame-1"));
        assert!(tracker.is_idle());
    }

    #[test]
    fn stalled_requests_are_reported_after_threshold() {
        let mut tracker = InflightTracker::new();
        let start = Instant::now();
        tracker.start("slow", "https://shop.test/poll", None, start);
        assert!(
            tracker
                .stalled(start + Duration::from_millis(500), Duration::from_secs(2))
                .is_empty()
        );
        let stalled = tracker.stalled(start + Duration::from_secs(3), Duration::from_secs(2));
        assert_eq!(
            stalled,
            vec![("slow".to_string(), "https://shop.test/poll".to_string())]
        );
    }

    #[tokio::test]
    async fn settles_after_requests_finish() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(started("a")).unwrap();
        tx.send(started("b")).unwrap();
        tx.send(NetworkEvent::RequestFinished {
            request_id: "a".into(),
        })
        .unwrap();
        tx.send(NetworkEvent::RequestFinished {
            request_id: "b".into(),
        })
        .unwrap();

        let logger = ClawdpayLogger::new(Verbosity::Minimal);
        let outcome = wait_for_quiescence(&mut rx, &policy(20, 2_000, 5_000), &logger).await;
        assert_eq!(outcome, SettleOutcome::Quiet);
        drop(tx);
    }

    #[tokio::test]
    async fn stalled_request_does_not_block_settling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(started("long-poll")).unwrap();

        let logger = ClawdpayLogger::new(Verbosity::Minimal);
        let outcome = wait_for_quiescence(&mut rx, &policy(50, 100, 5_000), &logger).await;
        assert_eq!(outcome, SettleOutcome::Quiet);
        drop(tx);
    }

    #[tokio::test]
    async fn timeout_bounds_the_wait() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(started("pending")).unwrap();

        let logger = ClawdpayLogger::new(Verbosity::Minimal);
        let outcome = wait_for_quiescence(&mut rx, &policy(50, 60_000, 200), &logger).await;
        assert_eq!(outcome, SettleOutcome::TimedOut { inflight: 1 });
        drop(tx);
    }

    #[tokio::test]
    async fn closed_stream_ends_the_wait() {
        let (tx, mut rx) = mpsc::unbounded_channel::<NetworkEvent>();
        tx.send(started("a")).unwrap();
        drop(tx);

        let logger = ClawdpayLogger::new(Verbosity::Minimal);
        let outcome = wait_for_quiescence(&mut rx, &policy(50, 60_000, 5_000), &logger).await;
        assert_eq!(outcome, SettleOutcome::StreamClosed);
    }
}
