//! MCP tool server.
//!
//! Exposes card creation, checkout autofill and funding source listing as
//! MCP tools through an `rmcp` [`ServerHandler`]. stdout carries only
//! protocol traffic; diagnostics go through the session logger.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::tool::schema_for_type,
    model::{
        CallToolRequestParams, CallToolResult, Content, Implementation, JsonObject,
        ListToolsResult, PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
    },
    schemars::{self, JsonSchema},
    service::{RequestContext, RoleServer},
    transport::IntoTransport,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::io::{stdin, stdout};

use crate::browser::BrowserRuntime;
use crate::engine::PaymentDetails;
use crate::logging::CATEGORY_MCP;
use crate::privacy::{CardType, PrivacyClient};
use crate::session::PaymentSession;

pub const SERVER_NAME: &str = "clawdpay";

pub const TOOL_CREATE_VIRTUAL_CARD: &str = "create_virtual_card";
pub const TOOL_SECURE_AUTO_FILL: &str = "secure_auto_fill";
pub const TOOL_GET_FUNDING_SOURCES: &str = "get_funding_sources";

/// Parameters for create_virtual_card
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CreateCardParams {
    /// Merchant name, stored as the card memo
    pub merchant: String,
    /// Spend limit in cents; rounded to a whole number
    pub amount_cents: f64,
}

/// Parameters for secure_auto_fill
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SecureAutoFillParams {
    /// Checkout page to open before filling
    pub url: String,
    pub pan: String,
    pub cvv: String,
    pub exp_month: String,
    pub exp_year: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EmptyParams {}

#[derive(Debug, Error)]
pub enum ToolServerError {
    #[error("MCP initialization failed: {0}")]
    Initialize(String),
    #[error("MCP service task failed: {0}")]
    Service(#[from] tokio::task::JoinError),
}

/// The three tools advertised by the server.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        Tool::new(
            TOOL_CREATE_VIRTUAL_CARD,
            "Create a single-use virtual card via Privacy.com. Returns secure card details.",
            schema_for_type::<CreateCardParams>(),
        ),
        Tool::new(
            TOOL_SECURE_AUTO_FILL,
            "Intelligently finds and fills payment fields on the current page using robust heuristics.",
            schema_for_type::<SecureAutoFillParams>(),
        ),
        Tool::new(
            TOOL_GET_FUNDING_SOURCES,
            "List available funding accounts connected to Privacy.com",
            schema_for_type::<EmptyParams>(),
        ),
    ]
}

pub struct ToolServer<R: BrowserRuntime + 'static> {
    privacy: Arc<PrivacyClient>,
    session: Arc<PaymentSession<R>>,
}

impl<R: BrowserRuntime + 'static> Clone for ToolServer<R> {
    fn clone(&self) -> Self {
        Self {
            privacy: Arc::clone(&self.privacy),
            session: Arc::clone(&self.session),
        }
    }
}

impl<R: BrowserRuntime + 'static> ToolServer<R> {
    pub fn new(privacy: PrivacyClient, session: PaymentSession<R>) -> Self {
        Self {
            privacy: Arc::new(privacy),
            session: Arc::new(session),
        }
    }

    pub fn session(&self) -> &PaymentSession<R> {
        &self.session
    }

    /// Run one tool by name. Bad arguments are `invalid_params`; provider,
    /// browser and unknown-tool failures are `internal_error`.
    pub async fn invoke_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        self.session
            .logger()
            .info(format!("tool call {name}"), Some(CATEGORY_MCP), None);

        let outcome = match name {
            TOOL_CREATE_VIRTUAL_CARD => self.create_virtual_card(parse_params(arguments)?).await,
            TOOL_SECURE_AUTO_FILL => self.secure_auto_fill(parse_params(arguments)?).await,
            TOOL_GET_FUNDING_SOURCES => self.get_funding_sources().await,
            other => Err(McpError::internal_error(format!("Unknown tool: {other}"), None)),
        };

        match outcome {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(error) => {
                self.session.logger().error(
                    format!("{name} failed: {}", error.message),
                    Some(CATEGORY_MCP),
                    None,
                );
                Err(error)
            }
        }
    }

    async fn create_virtual_card(&self, params: CreateCardParams) -> Result<String, McpError> {
        if !params.amount_cents.is_finite() || params.amount_cents < 0.0 {
            return Err(McpError::invalid_params(
                "amount_cents must be a non-negative number",
                None,
            ));
        }
        let card = self
            .privacy
            .create_card(
                &params.merchant,
                params.amount_cents.round() as u64,
                CardType::SingleUse,
            )
            .await
            .map_err(internal)?;
        pretty(&card)
    }

    async fn secure_auto_fill(&self, params: SecureAutoFillParams) -> Result<String, McpError> {
        self.session.navigate(&params.url).await.map_err(internal)?;
        let details =
            PaymentDetails::new(params.pan, params.cvv, params.exp_month, params.exp_year);
        let report = self
            .session
            .smart_fill_payment(&details)
            .await
            .map_err(internal)?;
        Ok(format!("Auto-fill Report: {report}"))
    }

    async fn get_funding_sources(&self) -> Result<String, McpError> {
        let sources = self.privacy.get_funding_sources().await.map_err(internal)?;
        pretty(&sources)
    }

    /// Serve over `transport` until the peer disconnects, then close the
    /// browser session.
    pub async fn run<T, E, A>(self, transport: T) -> Result<(), ToolServerError>
    where
        T: IntoTransport<RoleServer, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let session = Arc::clone(&self.session);
        let served = match self.serve(transport).await {
            Ok(service) => service.waiting().await.map(|_| ()).map_err(ToolServerError::from),
            Err(err) => Err(ToolServerError::Initialize(err.to_string())),
        };

        if let Err(err) = session.close().await {
            session.logger().error(
                format!("failed to close browser session: {err}"),
                Some(CATEGORY_MCP),
                None,
            );
        }
        served
    }

    pub async fn serve_stdio(self) -> Result<(), ToolServerError> {
        self.session
            .logger()
            .info("ClawdPay MCP running", Some(CATEGORY_MCP), None);
        self.run(stdio()).await
    }
}

impl<R: BrowserRuntime + 'static> ServerHandler for ToolServer<R> {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("ClawdPay".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Create single-use Privacy.com cards with create_virtual_card, \
                list funding accounts with get_funding_sources, and fill a checkout page \
                with secure_auto_fill."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            meta: None,
            tools: tool_definitions(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke_tool(request.name.as_ref(), request.arguments)
            .await
    }
}

fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (stdin(), stdout())
}

fn parse_params<T: DeserializeOwned>(arguments: Option<JsonObject>) -> Result<T, McpError> {
    serde_json::from_value(JsonValue::Object(arguments.unwrap_or_default()))
        .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {}", e), None))
}

fn internal(err: impl std::fmt::Display) -> McpError {
    McpError::internal_error(err.to_string(), None)
}

fn pretty<T: Serialize>(value: &T) -> Result<String, McpError> {
    serde_json::to_string_pretty(value).map_err(internal)
}
