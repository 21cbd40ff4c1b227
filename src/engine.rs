//! Fill engine: walks a frame snapshot and fills payment fields.
//!
//! Frames are processed strictly in order. Within a frame the engine tries
//! PAN, then CVV, then the composite expiry field; only when no composite
//! field is found does it try the separate month and year fields. Every field
//! restarts from its first strategy in every frame, and a frame without
//! matches never stops the walk.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::frame::DocumentFrame;
use crate::logging::{CATEGORY_FILL, ClawdpayLogger};
use crate::matcher::{self, MatchOutcome};
use crate::strategy::{FieldKind, StrategyCatalog};

/// Report text when nothing was filled.
pub const NO_FIELDS_SENTINEL: &str = "No payment fields identified";

/// Card data injected into checkout forms. Values are opaque strings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub pan: String,
    pub cvv: String,
    #[serde(alias = "expMonth")]
    pub exp_month: String,
    #[serde(alias = "expYear")]
    pub exp_year: String,
}

impl PaymentDetails {
    pub fn new(
        pan: impl Into<String>,
        cvv: impl Into<String>,
        exp_month: impl Into<String>,
        exp_year: impl Into<String>,
    ) -> Self {
        PaymentDetails {
            pan: pan.into(),
            cvv: cvv.into(),
            exp_month: exp_month.into(),
            exp_year: exp_year.into(),
        }
    }

    /// `MM/YY` form for single expiry inputs: the month followed by the last
    /// two characters of the year.
    pub fn composite_expiry(&self) -> String {
        let year = self.exp_year.as_str();
        let tail = year
            .char_indices()
            .rev()
            .nth(1)
            .map(|(index, _)| &year[index..])
            .unwrap_or(year);
        format!("{}/{}", self.exp_month, tail)
    }

    fn value_for(&self, kind: FieldKind) -> String {
        match kind {
            FieldKind::Pan => self.pan.clone(),
            FieldKind::Cvv => self.cvv.clone(),
            FieldKind::Expiry => self.composite_expiry(),
            FieldKind::ExpMonth => self.exp_month.clone(),
            FieldKind::ExpYear => self.exp_year.clone(),
        }
    }
}

impl fmt::Debug for PaymentDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last_four: String = {
            let chars: Vec<char> = self.pan.chars().collect();
            chars[chars.len().saturating_sub(4)..].iter().collect()
        };
        f.debug_struct("PaymentDetails")
            .field("pan", &format!("****{last_four}"))
            .field("cvv", &"<redacted>")
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .finish()
    }
}

/// One successful fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEntry {
    pub field: FieldKind,
    pub frame_id: String,
    /// Position of the winning strategy in the field's catalog list.
    pub strategy_index: usize,
}

impl fmt::Display for FillEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filled {}", self.field.label())
    }
}

/// Insertion-ordered fill results across all frames. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    entries: Vec<FillEntry>,
}

impl FillReport {
    pub fn entries(&self) -> &[FillEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fields(&self) -> Vec<FieldKind> {
        self.entries.iter().map(|entry| entry.field).collect()
    }

    fn push(&mut self, entry: FillEntry) {
        self.entries.push(entry);
    }
}

impl fmt::Display for FillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str(NO_FIELDS_SENTINEL);
        }
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Terminal state of one field in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    Filled { strategy_index: usize },
    Exhausted,
}

pub struct FillEngine<'a> {
    catalog: &'a StrategyCatalog,
    logger: &'a ClawdpayLogger,
}

impl<'a> FillEngine<'a> {
    pub fn new(catalog: &'a StrategyCatalog, logger: &'a ClawdpayLogger) -> Self {
        FillEngine { catalog, logger }
    }

    pub async fn fill_frames(
        &self,
        frames: &[Box<dyn DocumentFrame>],
        details: &PaymentDetails,
    ) -> FillReport {
        let mut report = FillReport::default();
        for frame in frames {
            self.fill_frame(frame.as_ref(), details, &mut report).await;
        }
        report
    }

    async fn fill_frame(
        &self,
        frame: &dyn DocumentFrame,
        details: &PaymentDetails,
        report: &mut FillReport,
    ) {
        self.fill_field(frame, FieldKind::Pan, details, report).await;
        self.fill_field(frame, FieldKind::Cvv, details, report).await;

        let composite = self
            .fill_field(frame, FieldKind::Expiry, details, report)
            .await;
        if composite == FieldOutcome::Exhausted {
            self.fill_field(frame, FieldKind::ExpMonth, details, report)
                .await;
            self.fill_field(frame, FieldKind::ExpYear, details, report)
                .await;
        }
    }

    async fn fill_field(
        &self,
        frame: &dyn DocumentFrame,
        kind: FieldKind,
        details: &PaymentDetails,
        report: &mut FillReport,
    ) -> FieldOutcome {
        let outcome = self.attempt(frame, kind, &details.value_for(kind)).await;
        if let FieldOutcome::Filled { strategy_index } = outcome {
            let entry = FillEntry {
                field: kind,
                frame_id: frame.id().to_string(),
                strategy_index,
            };
            self.logger.info(
                entry.to_string(),
                Some(CATEGORY_FILL),
                Some(json!({
                    "frame": frame.id(),
                    "url": frame.url(),
                    "strategy": strategy_index
                })),
            );
            report.push(entry);
        }
        outcome
    }

    /// Try each strategy for `kind` in priority order until one fills.
    pub async fn attempt(
        &self,
        frame: &dyn DocumentFrame,
        kind: FieldKind,
        value: &str,
    ) -> FieldOutcome {
        for (index, strategy) in self.catalog.strategies(kind).iter().enumerate() {
            let MatchOutcome::Found(candidate) =
                matcher::resolve(frame, strategy, self.logger).await
            else {
                continue;
            };

            match candidate.fill(value).await {
                Ok(()) => {
                    return FieldOutcome::Filled {
                        strategy_index: index,
                    };
                }
                Err(err) => {
                    self.logger.debug(
                        format!("{} fill failed, trying next strategy: {err}", kind.label()),
                        Some(CATEGORY_FILL),
                        Some(json!({ "frame": frame.id(), "strategy": strategy.to_string() })),
                    );
                }
            }
        }
        FieldOutcome::Exhausted
    }
}
