//! Tool server end to end: mock Privacy.com API plus the in-memory engine.

mod common;

use std::sync::Arc;

use anyhow::Result;
use clawdpay_rs::config::Verbosity;
use clawdpay_rs::logging::ClawdpayLogger;
use clawdpay_rs::mcp::ToolServer;
use clawdpay_rs::privacy::PrivacyClient;
use clawdpay_rs::session::PaymentSession;
use common::{FakeElement, FakeFrame, FakePage, FakeRuntime, quiet_config};
use rmcp::model::{CallToolResult, ErrorCode, JsonObject};
use serde_json::{Value as JsonValue, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHECKOUT: &str = "https://shop.test/checkout";

fn tool_server(api: &MockServer, runtime: &Arc<FakeRuntime>) -> Result<ToolServer<Arc<FakeRuntime>>> {
    let logger = Arc::new(ClawdpayLogger::new(Verbosity::Minimal));
    let privacy = PrivacyClient::new("test-key", api.uri(), Arc::clone(&logger))?;
    let session = PaymentSession::with_logger(Arc::clone(runtime), &quiet_config(), logger);
    Ok(ToolServer::new(privacy, session))
}

fn checkout_page() -> (FakePage, FakeFrame) {
    let main = FakeFrame::new(
        CHECKOUT,
        CHECKOUT,
        vec![
            FakeElement::input().attr("autocomplete", "cc-number"),
            FakeElement::input().attr("autocomplete", "cc-csc"),
            FakeElement::input().placeholder("MM/YY"),
        ],
    );
    (FakePage::new("Checkout", vec![main.clone()]), main)
}

fn arguments(value: JsonValue) -> Option<JsonObject> {
    value.as_object().cloned()
}

fn text_of(result: &CallToolResult) -> Result<String> {
    let encoded = serde_json::to_value(result)?;
    Ok(encoded["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}

async fn send(writer: &mut DuplexStream, message: JsonValue) -> Result<()> {
    let mut line = message.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn receive(lines: &mut Lines<BufReader<DuplexStream>>) -> Result<JsonValue> {
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("server closed the stream"))?;
    Ok(serde_json::from_str(&line)?)
}

#[tokio::test]
async fn create_virtual_card_returns_pretty_card_json() -> Result<()> {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cards"))
        .and(body_partial_json(json!({
            "type": "SINGLE_USE",
            "memo": "Bookshop",
            "spend_limit": 1999
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "card-9",
            "last_four": "4242",
            "memo": "Bookshop",
            "spend_limit": 1999,
            "type": "SINGLE_USE"
        })))
        .expect(1)
        .mount(&api)
        .await;

    let server = tool_server(&api, &FakeRuntime::new())?;
    let result = server
        .invoke_tool(
            "create_virtual_card",
            arguments(json!({ "merchant": "Bookshop", "amount_cents": 1999.4 })),
        )
        .await?;

    let text = text_of(&result)?;
    let card: JsonValue = serde_json::from_str(&text)?;
    assert_eq!(card["token"], "card-9");
    assert!(text.contains('\n'));
    Ok(())
}

#[tokio::test]
async fn negative_amounts_are_rejected_without_calling_the_api() -> Result<()> {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&api)
        .await;

    let server = tool_server(&api, &FakeRuntime::new())?;
    let err = server
        .invoke_tool(
            "create_virtual_card",
            arguments(json!({ "merchant": "Bookshop", "amount_cents": -5 })),
        )
        .await
        .expect_err("negative amount");

    assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    Ok(())
}

#[tokio::test]
async fn provider_failures_become_internal_errors() -> Result<()> {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/funding"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&api)
        .await;

    let server = tool_server(&api, &FakeRuntime::new())?;
    let err = server
        .invoke_tool("get_funding_sources", None)
        .await
        .expect_err("provider failure");

    assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
    assert!(err.message.contains("500"));
    Ok(())
}

#[tokio::test]
async fn get_funding_sources_lists_accounts() -> Result<()> {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/funding"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "token": "fund-1", "account_name": "Checking", "last_four": "6789" }
        ])))
        .mount(&api)
        .await;

    let server = tool_server(&api, &FakeRuntime::new())?;
    let result = server.invoke_tool("get_funding_sources", None).await?;

    let sources: JsonValue = serde_json::from_str(&text_of(&result)?)?;
    assert_eq!(sources[0]["account_name"], "Checking");
    Ok(())
}

#[tokio::test]
async fn secure_auto_fill_navigates_and_reports() -> Result<()> {
    let api = MockServer::start().await;
    let (page, frame) = checkout_page();
    let runtime = FakeRuntime::new().with_page(CHECKOUT, page);
    let server = tool_server(&api, &runtime)?;

    let result = server
        .invoke_tool(
            "secure_auto_fill",
            arguments(json!({
                "url": CHECKOUT,
                "pan": "4242424242424242",
                "cvv": "987",
                "exp_month": "04",
                "exp_year": "2029"
            })),
        )
        .await?;

    assert_eq!(
        text_of(&result)?,
        "Auto-fill Report: Filled PAN, Filled CVV, Filled Expiry"
    );
    assert_eq!(frame.values(), vec!["4242424242424242", "987", "04/29"]);
    assert_eq!(runtime.navigations(), vec![CHECKOUT]);
    Ok(())
}

#[tokio::test]
async fn stdio_style_session_answers_then_closes_the_browser() -> Result<()> {
    let api = MockServer::start().await;
    let (page, _frame) = checkout_page();
    let runtime = FakeRuntime::new().with_page(CHECKOUT, page);
    let server = tool_server(&api, &runtime)?;

    let (mut client_out, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_in) = tokio::io::duplex(64 * 1024);
    let serving = tokio::spawn(server.run((server_in, server_out)));
    let mut lines = BufReader::new(client_in).lines();

    send(
        &mut client_out,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "checkout-agent", "version": "1.0.0" }
            }
        }),
    )
    .await?;
    let initialized = receive(&mut lines).await?;
    assert_eq!(initialized["id"], 1);
    assert_eq!(initialized["result"]["serverInfo"]["name"], "clawdpay");

    send(
        &mut client_out,
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await?;

    send(
        &mut client_out,
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
    )
    .await?;
    let listed = receive(&mut lines).await?;
    assert_eq!(listed["id"], 2);
    assert_eq!(listed["result"]["tools"].as_array().map(Vec::len), Some(3));

    send(
        &mut client_out,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "secure_auto_fill",
                "arguments": {
                    "url": CHECKOUT,
                    "pan": "4242424242424242",
                    "cvv": "987",
                    "exp_month": "04",
                    "exp_year": "2029"
                }
            }
        }),
    )
    .await?;
    let called = receive(&mut lines).await?;
    assert_eq!(called["id"], 3);
    assert_eq!(
        called["result"]["content"][0]["text"],
        "Auto-fill Report: Filled PAN, Filled CVV, Filled Expiry"
    );

    drop(client_out);
    serving.await??;

    assert_eq!(runtime.launches(), 1);
    assert_eq!(runtime.shutdowns(), 1);
    Ok(())
}
