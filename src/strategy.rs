//! Detection strategies and the ordered catalog mapping each payment field
//! to the heuristics used to find it.

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::frame::ElementQuery;

/// Logical payment field targeted by the fill engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Pan,
    Cvv,
    Expiry,
    ExpMonth,
    ExpYear,
}

impl FieldKind {
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Pan,
        FieldKind::Cvv,
        FieldKind::Expiry,
        FieldKind::ExpMonth,
        FieldKind::ExpYear,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FieldKind::Pan => "PAN",
            FieldKind::Cvv => "CVV",
            FieldKind::Expiry => "Expiry",
            FieldKind::ExpMonth => "Exp Month",
            FieldKind::ExpYear => "Exp Year",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Case-insensitive, unanchored text pattern (regex source).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPattern(&'static str);

impl TextPattern {
    pub const fn new(source: &'static str) -> Self {
        TextPattern(source)
    }

    pub fn source(&self) -> &'static str {
        self.0
    }

    pub fn compile(&self) -> Result<Regex, regex::Error> {
        RegexBuilder::new(self.0).case_insensitive(true).build()
    }

    /// Whether `text` contains a match. A pattern that fails to compile
    /// matches nothing.
    pub fn is_match(&self, text: &str) -> bool {
        self.compile()
            .map(|regex| regex.is_match(text))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseOp {
    Equals,
    ContainsIgnoreCase,
}

/// One attribute condition on an `input` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeClause {
    pub attribute: &'static str,
    pub op: ClauseOp,
    pub value: &'static str,
}

impl AttributeClause {
    pub const fn equals(attribute: &'static str, value: &'static str) -> Self {
        AttributeClause {
            attribute,
            op: ClauseOp::Equals,
            value,
        }
    }

    pub const fn contains(attribute: &'static str, value: &'static str) -> Self {
        AttributeClause {
            attribute,
            op: ClauseOp::ContainsIgnoreCase,
            value,
        }
    }

    fn to_css(self) -> String {
        match self.op {
            ClauseOp::Equals => format!("[{}=\"{}\"]", self.attribute, self.value),
            ClauseOp::ContainsIgnoreCase => format!("[{}*=\"{}\" i]", self.attribute, self.value),
        }
    }

    fn holds(self, actual: Option<&str>) -> bool {
        match (self.op, actual) {
            (_, None) => false,
            (ClauseOp::Equals, Some(actual)) => actual == self.value,
            (ClauseOp::ContainsIgnoreCase, Some(actual)) => actual
                .to_lowercase()
                .contains(&self.value.to_lowercase()),
        }
    }
}

/// Union of alternatives; each alternative is a conjunction of clauses on an
/// `input` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSelector {
    alternatives: Alternatives,
}

impl AttributeSelector {
    pub const fn new(alternatives: Alternatives) -> Self {
        AttributeSelector { alternatives }
    }

    pub fn to_css(&self) -> String {
        self.alternatives
            .iter()
            .map(|clauses| {
                let mut css = String::from("input");
                for clause in clauses.iter() {
                    css.push_str(&clause.to_css());
                }
                css
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Evaluate the selector against an element described by its tag name and
    /// an attribute lookup.
    pub fn matches<'a, F>(&self, tag: &str, attribute: F) -> bool
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        tag.eq_ignore_ascii_case("input")
            && self.alternatives.iter().any(|clauses| {
                clauses
                    .iter()
                    .all(|clause| clause.holds(attribute(clause.attribute)))
            })
    }
}

impl fmt::Display for AttributeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

/// One heuristic rule for locating a field inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStrategy {
    ByLabelText(TextPattern),
    ByPlaceholder(TextPattern),
    BySelector(AttributeSelector),
    ByAttributeSelector(AttributeSelector),
}

impl DetectionStrategy {
    /// The frame query this strategy resolves through.
    pub fn query(&self) -> ElementQuery {
        match *self {
            DetectionStrategy::ByLabelText(pattern) => ElementQuery::Label(pattern),
            DetectionStrategy::ByPlaceholder(pattern) => ElementQuery::Placeholder(pattern),
            DetectionStrategy::BySelector(selector)
            | DetectionStrategy::ByAttributeSelector(selector) => ElementQuery::Selector(selector),
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionStrategy::ByLabelText(pattern) => write!(f, "label /{}/i", pattern.source()),
            DetectionStrategy::ByPlaceholder(pattern) => {
                write!(f, "placeholder /{}/i", pattern.source())
            }
            DetectionStrategy::BySelector(selector) => write!(f, "selector {selector}"),
            DetectionStrategy::ByAttributeSelector(selector) => {
                write!(f, "attribute selector {selector}")
            }
        }
    }
}

/// Alternatives of clause conjunctions, see [`AttributeSelector`].
pub type Alternatives = &'static [&'static [AttributeClause]];

const PAN_AUTOCOMPLETE: Alternatives = &[&[AttributeClause::equals("autocomplete", "cc-number")]];
const PAN_NAME: Alternatives = &[&[
    AttributeClause::contains("name", "card"),
    AttributeClause::contains("name", "number"),
]];
const CVV_AUTOCOMPLETE: Alternatives = &[&[AttributeClause::equals("autocomplete", "cc-csc")]];
const CVV_NAME: Alternatives = &[
    &[AttributeClause::contains("name", "cvc")],
    &[AttributeClause::contains("name", "cvv")],
];
const EXPIRY_AUTOCOMPLETE: Alternatives = &[&[AttributeClause::equals("autocomplete", "cc-exp")]];
const EXPIRY_NAME: Alternatives = &[&[AttributeClause::contains("name", "exp")]];
const EXP_MONTH_AUTOCOMPLETE: Alternatives =
    &[&[AttributeClause::equals("autocomplete", "cc-exp-month")]];
const EXP_YEAR_AUTOCOMPLETE: Alternatives =
    &[&[AttributeClause::equals("autocomplete", "cc-exp-year")]];

const PAN_STRATEGIES: &[DetectionStrategy] = &[
    DetectionStrategy::ByLabelText(TextPattern::new(
        "card number|card_number|number|cc-number|pan",
    )),
    DetectionStrategy::ByPlaceholder(TextPattern::new("0000 0000|card number")),
    DetectionStrategy::BySelector(AttributeSelector::new(PAN_AUTOCOMPLETE)),
    DetectionStrategy::ByAttributeSelector(AttributeSelector::new(PAN_NAME)),
];

const CVV_STRATEGIES: &[DetectionStrategy] = &[
    DetectionStrategy::ByLabelText(TextPattern::new(
        "cvc|cvv|security code|security_code|code",
    )),
    DetectionStrategy::ByPlaceholder(TextPattern::new("123|cvc|cvv")),
    DetectionStrategy::BySelector(AttributeSelector::new(CVV_AUTOCOMPLETE)),
    DetectionStrategy::ByAttributeSelector(AttributeSelector::new(CVV_NAME)),
];

const EXPIRY_STRATEGIES: &[DetectionStrategy] = &[
    DetectionStrategy::ByLabelText(TextPattern::new("expiration|expiry|exp date|mm/yy")),
    DetectionStrategy::ByPlaceholder(TextPattern::new("mm/yy")),
    DetectionStrategy::BySelector(AttributeSelector::new(EXPIRY_AUTOCOMPLETE)),
    DetectionStrategy::ByAttributeSelector(AttributeSelector::new(EXPIRY_NAME)),
];

const EXP_MONTH_STRATEGIES: &[DetectionStrategy] = &[
    DetectionStrategy::ByLabelText(TextPattern::new("month|mm")),
    DetectionStrategy::BySelector(AttributeSelector::new(EXP_MONTH_AUTOCOMPLETE)),
];

const EXP_YEAR_STRATEGIES: &[DetectionStrategy] = &[
    DetectionStrategy::ByLabelText(TextPattern::new("year|yy")),
    DetectionStrategy::BySelector(AttributeSelector::new(EXP_YEAR_AUTOCOMPLETE)),
];

static STANDARD: StrategyCatalog = StrategyCatalog {
    pan: PAN_STRATEGIES,
    cvv: CVV_STRATEGIES,
    expiry: EXPIRY_STRATEGIES,
    exp_month: EXP_MONTH_STRATEGIES,
    exp_year: EXP_YEAR_STRATEGIES,
};

/// Fixed, ordered strategy lists per field. Earlier strategies are the more
/// semantically specific ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyCatalog {
    pan: &'static [DetectionStrategy],
    cvv: &'static [DetectionStrategy],
    expiry: &'static [DetectionStrategy],
    exp_month: &'static [DetectionStrategy],
    exp_year: &'static [DetectionStrategy],
}

impl StrategyCatalog {
    /// The built-in checkout heuristics.
    pub fn standard() -> &'static StrategyCatalog {
        &STANDARD
    }

    pub const fn new(
        pan: &'static [DetectionStrategy],
        cvv: &'static [DetectionStrategy],
        expiry: &'static [DetectionStrategy],
        exp_month: &'static [DetectionStrategy],
        exp_year: &'static [DetectionStrategy],
    ) -> Self {
        StrategyCatalog {
            pan,
            cvv,
            expiry,
            exp_month,
            exp_year,
        }
    }

    pub fn strategies(&self, kind: FieldKind) -> &'static [DetectionStrategy] {
        match kind {
            FieldKind::Pan => self.pan,
            FieldKind::Cvv => self.cvv,
            FieldKind::Expiry => self.expiry,
            FieldKind::ExpMonth => self.exp_month,
            FieldKind::ExpYear => self.exp_year,
        }
    }
}
