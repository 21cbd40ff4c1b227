//! Embedded in-page scripts.
//!
//! The field query helper lives in its own `.js` file so editors can
//! highlight it, and is bundled as a string at compile time.

use serde_json::{Value as JsonValue, json};

use crate::frame::ElementQuery;

/// Embedded contents of `scripts/field_query.js`.
pub const FIELD_QUERY_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/field_query.js"
));

/// Operation performed by the field query script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp<'a> {
    Count,
    Visible,
    Fill(&'a str),
}

/// Build a self-contained expression that applies `op` to `query` and
/// evaluates to the script's JSON reply.
pub fn field_query_expression(query: &ElementQuery, op: FieldOp<'_>) -> String {
    let request = request_payload(query, op);
    format!("({})({})", FIELD_QUERY_SCRIPT.trim_end(), request)
}

fn request_payload(query: &ElementQuery, op: FieldOp<'_>) -> JsonValue {
    match op {
        FieldOp::Count => json!({ "op": "count", "query": query.to_json() }),
        FieldOp::Visible => json!({ "op": "visible", "query": query.to_json() }),
        FieldOp::Fill(value) => json!({ "op": "fill", "query": query.to_json(), "value": value }),
    }
}
