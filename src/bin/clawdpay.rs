//! ClawdPay CLI.
//!
//! Runs the MCP tool server on stdio, or invokes single operations directly.
//!
//! Usage examples:
//!   MCP server:
//!     $ PRIVACY_API_KEY=... cargo run --bin clawdpay -- serve
//!   One-off autofill against a local Chrome:
//!     $ CLAWDPAY_CHROME_BIN=/path/to/chrome cargo run --bin clawdpay -- fill \
//!       --url https://shop.test/checkout --pan 4111111111111111 --cvv 123 \
//!       --exp-month 12 --exp-year 2030 --show-browser
//!   Sandbox card:
//!     $ PRIVACY_API_KEY=... PRIVACY_SANDBOX=true cargo run --bin clawdpay -- \
//!       create-card --merchant coffee --amount-cents 500

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clawdpay_rs::config::{ClawdpayConfig, ClawdpayConfigOverrides, LoggerCallback, Verbosity};
use clawdpay_rs::engine::PaymentDetails;
use clawdpay_rs::logging::{ClawdpayLogRecord, ClawdpayLogger, LogConfig, LogLevel};
use clawdpay_rs::mcp::ToolServer;
use clawdpay_rs::privacy::{CardType, DEFAULT_PAGE_SIZE, PrivacyClient};
use clawdpay_rs::runtime::ChromiumoxideRuntime;
use clawdpay_rs::session::PaymentSession;
use log::info;
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "clawdpay",
    author,
    version,
    about = "Virtual card creation and checkout autofill"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the MCP tools over stdin/stdout.
    Serve,
    /// Open a checkout page and fill the payment form.
    Fill(FillArgs),
    /// Create a virtual card.
    CreateCard(CreateCardArgs),
    /// List virtual cards.
    ListCards(ListCardsArgs),
    /// Fetch one card by token.
    GetCard(GetCardArgs),
    /// List funding sources.
    FundingSources,
}

#[derive(Args)]
struct FillArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    pan: String,
    #[arg(long)]
    cvv: String,
    #[arg(long)]
    exp_month: String,
    #[arg(long)]
    exp_year: String,
    /// Show the launched browser window.
    #[arg(long)]
    show_browser: bool,
}

#[derive(Args)]
struct CreateCardArgs {
    /// Memo shown on the card, usually the merchant name.
    #[arg(long)]
    merchant: String,
    /// Per-transaction spend limit in cents.
    #[arg(long)]
    amount_cents: u64,
    #[arg(long, default_value = "single-use")]
    card_type: CardType,
}

#[derive(Args)]
struct ListCardsArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,
}

#[derive(Args)]
struct GetCardArgs {
    #[arg(long)]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    let config = load_config(cli.verbose)?;
    let logger = Arc::new(ClawdpayLogger::with_config(LogConfig {
        verbose: config.verbose,
        external_logger: config.logger.clone(),
    }));

    match cli.command {
        Command::Serve => run_serve(&config, logger).await,
        Command::Fill(args) => run_fill(args, &config, logger).await,
        Command::CreateCard(args) => {
            let client = privacy_client(&config, logger)?;
            let card = client
                .create_card(&args.merchant, args.amount_cents, args.card_type)
                .await
                .context("failed to create card")?;
            print_json(&card)
        }
        Command::ListCards(args) => {
            let client = privacy_client(&config, logger)?;
            let cards = client
                .list_cards(args.page, args.page_size)
                .await
                .context("failed to list cards")?;
            print_json(&cards)
        }
        Command::GetCard(args) => {
            let client = privacy_client(&config, logger)?;
            let card = client
                .get_card(&args.token)
                .await
                .with_context(|| format!("failed to fetch card {}", args.token))?;
            print_json(&card)
        }
        Command::FundingSources => {
            let client = privacy_client(&config, logger)?;
            let sources = client
                .get_funding_sources()
                .await
                .context("failed to list funding sources")?;
            print_json(&sources)
        }
    }
}

async fn run_serve(config: &ClawdpayConfig, logger: Arc<ClawdpayLogger>) -> Result<()> {
    let privacy = privacy_client(config, Arc::clone(&logger))?;
    let runtime = Arc::new(ChromiumoxideRuntime::with_logger(Arc::clone(&logger)));
    let session = PaymentSession::with_logger(runtime, config, logger);
    let server = ToolServer::new(privacy, session);

    server
        .serve_stdio()
        .await
        .context("MCP transport failed")?;
    Ok(())
}

async fn run_fill(
    args: FillArgs,
    config: &ClawdpayConfig,
    logger: Arc<ClawdpayLogger>,
) -> Result<()> {
    let config = if args.show_browser {
        config.with_overrides(ClawdpayConfigOverrides::default().headless(false))
    } else {
        config.clone()
    };

    let runtime = Arc::new(ChromiumoxideRuntime::with_logger(Arc::clone(&logger)));
    let session = PaymentSession::with_logger(runtime, &config, logger);

    let outcome = async {
        let title = session
            .navigate(&args.url)
            .await
            .with_context(|| format!("failed to open {}", args.url))?;
        info!("Opened {} ({title})", args.url);

        let details = PaymentDetails::new(args.pan, args.cvv, args.exp_month, args.exp_year);
        let report = session
            .smart_fill_payment(&details)
            .await
            .context("autofill failed")?;
        println!("Auto-fill Report: {report}");
        Ok::<_, anyhow::Error>(())
    }
    .await;

    session
        .close()
        .await
        .context("failed to close browser session")?;
    outcome
}

fn privacy_client(config: &ClawdpayConfig, logger: Arc<ClawdpayLogger>) -> Result<PrivacyClient> {
    PrivacyClient::from_config(config, logger).context("failed to construct Privacy.com client")
}

fn load_config(verbose_count: u8) -> Result<ClawdpayConfig> {
    let config = ClawdpayConfig::from_env().context("invalid configuration")?;
    let mut overrides = ClawdpayConfigOverrides::default().logger(make_logger_callback());
    if verbose_count > 0 {
        overrides = overrides.verbose(verbosity_from_count(verbose_count));
    }
    Ok(config.with_overrides(overrides))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{rendered}");
    Ok(())
}

fn make_logger_callback() -> LoggerCallback {
    Arc::new(|record: &ClawdpayLogRecord| {
        let category = record.category.as_deref().unwrap_or("clawdpay");
        match record.level {
            LogLevel::Error => log::error!("[{category}] {}", record.message),
            LogLevel::Info => log::info!("[{category}] {}", record.message),
            LogLevel::Debug => log::debug!("[{category}] {}", record.message),
        }
    })
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
