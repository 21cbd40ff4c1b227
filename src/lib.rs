//! Heuristic checkout autofill over a headless browser, paired with a
//! Privacy.com virtual card client and an MCP tool server exposing both.

pub mod browser;
pub mod config;
pub mod dom_scripts;
pub mod engine;
pub mod frame;
pub mod logging;
pub mod matcher;
pub mod mcp;
pub mod privacy;
pub mod runtime;
pub mod session;
pub mod settle;
pub mod strategy;

pub use config::{ClawdpayConfig, ClawdpayConfigOverrides, Verbosity};
pub use engine::{FillReport, PaymentDetails};
pub use mcp::{ToolServer, ToolServerError};
pub use privacy::{PrivacyClient, PrivacyError};
pub use runtime::ChromiumoxideRuntime;
pub use session::{PaymentSession, SessionError};
