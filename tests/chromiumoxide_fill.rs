//! Real-browser checks. Skipped unless `CLAWDPAY_CHROME_BIN` names a
//! Chrome/Chromium executable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clawdpay_rs::config::{ClawdpayConfig, Verbosity};
use clawdpay_rs::engine::{NO_FIELDS_SENTINEL, PaymentDetails};
use clawdpay_rs::runtime::ChromiumoxideRuntime;
use clawdpay_rs::session::PaymentSession;
use log::info;

const CHECKOUT_HTML: &str = r#"<!doctype html>
<html>
  <head><title>Test Checkout</title></head>
  <body>
    <form>
      <label style="display:none">Card Number <input id="decoy"></label>
      <label for="pan">Card number</label>
      <input id="pan" name="cardnumber">
      <input id="exp" placeholder="MM / YY" autocomplete="cc-exp">
    </form>
    <iframe srcdoc='<input aria-label="Security code" id="cvc">'></iframe>
  </body>
</html>
"#;

const SHADOW_CHECKOUT_HTML: &str = r#"<!doctype html>
<html>
  <head><title>Shadow Checkout</title></head>
  <body>
    <div id="host"></div>
    <script>
      document.getElementById('host').attachShadow({ mode: 'open' }).innerHTML =
        '<input aria-label="Card number">' +
        '<input placeholder="CVC">' +
        '<span id="exp-label">Expiry date</span><input aria-labelledby="exp-label">';
    </script>
  </body>
</html>
"#;

const EMPTY_HTML: &str = r#"<!doctype html>
<html><head><title>Nothing Here</title></head><body><p>Thanks!</p></body></html>
"#;

fn chrome_bin() -> Option<PathBuf> {
    let chrome_bin = match env::var("CLAWDPAY_CHROME_BIN") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => {
            eprintln!("skipping chromiumoxide integration test: CLAWDPAY_CHROME_BIN not set");
            return None;
        }
    };

    if !chrome_bin.exists() {
        eprintln!(
            "skipping chromiumoxide integration test: chrome executable not found at {}",
            chrome_bin.display()
        );
        return None;
    }
    Some(chrome_bin)
}

fn session(chrome_bin: PathBuf) -> PaymentSession<Arc<ChromiumoxideRuntime>> {
    let config = ClawdpayConfig {
        headless: true,
        chrome_executable: Some(chrome_bin),
        verbose: Verbosity::Detailed,
        ..ClawdpayConfig::default()
    };
    PaymentSession::new(Arc::new(ChromiumoxideRuntime::new()), &config)
}

fn write_page(dir: &Path, name: &str, html: &str) -> Result<String> {
    let path = dir.join(name);
    fs::write(&path, html).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(format!("file://{}", path.display()))
}

fn details() -> PaymentDetails {
    PaymentDetails::new("4111111111111111", "123", "12", "2030")
}

#[tokio::test]
#[serial_test::serial]
async fn fills_main_frame_and_nested_frame() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some(chrome_bin) = chrome_bin() else {
        return Ok(());
    };

    let dir = tempfile::tempdir().context("failed to create temp dir")?;
    let url = write_page(dir.path(), "checkout.html", CHECKOUT_HTML)?;

    let session = session(chrome_bin);
    let outcome = async {
        let title = session.navigate(&url).await.context("navigation failed")?;
        assert_eq!(title, "Test Checkout");

        let report = session
            .smart_fill_payment(&details())
            .await
            .context("fill failed")?;
        info!("report: {report}");

        assert_eq!(report.to_string(), "Filled PAN, Filled Expiry, Filled CVV");
        let pan = &report.entries()[0];
        assert_eq!(
            pan.strategy_index, 3,
            "hidden decoy rejects the label strategy, so the name selector fills"
        );
        Ok::<_, anyhow::Error>(())
    }
    .await;

    session.close().await.context("close failed")?;
    outcome
}

#[tokio::test]
#[serial_test::serial]
async fn fills_fields_inside_an_open_shadow_root() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some(chrome_bin) = chrome_bin() else {
        return Ok(());
    };

    let dir = tempfile::tempdir().context("failed to create temp dir")?;
    let url = write_page(dir.path(), "shadow.html", SHADOW_CHECKOUT_HTML)?;

    let session = session(chrome_bin);
    let outcome = async {
        session.navigate(&url).await.context("navigation failed")?;
        let report = session
            .smart_fill_payment(&details())
            .await
            .context("fill failed")?;

        assert_eq!(report.to_string(), "Filled PAN, Filled CVV, Filled Expiry");
        let strategies: Vec<usize> = report
            .entries()
            .iter()
            .map(|entry| entry.strategy_index)
            .collect();
        assert_eq!(strategies, vec![0, 1, 0]);
        Ok::<_, anyhow::Error>(())
    }
    .await;

    session.close().await.context("close failed")?;
    outcome
}

#[tokio::test]
#[serial_test::serial]
async fn page_without_fields_reports_sentinel() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some(chrome_bin) = chrome_bin() else {
        return Ok(());
    };

    let dir = tempfile::tempdir().context("failed to create temp dir")?;
    let url = write_page(dir.path(), "empty.html", EMPTY_HTML)?;

    let session = session(chrome_bin);
    let outcome = async {
        session.navigate(&url).await.context("navigation failed")?;
        let report = session
            .smart_fill_payment(&details())
            .await
            .context("fill failed")?;
        assert_eq!(report.to_string(), NO_FIELDS_SENTINEL);
        Ok::<_, anyhow::Error>(())
    }
    .await;

    session.close().await.context("close failed")?;
    assert!(!session.runtime().is_running().await);
    outcome
}
