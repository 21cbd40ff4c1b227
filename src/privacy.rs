//! Privacy.com virtual card API client.
//!
//! A thin wrapper over the REST API: every operation is a single request with
//! no retry. Failures are logged with the response status and body before
//! being returned to the caller.

use std::fmt;
use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client as HttpClient, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use thiserror::Error;

use crate::config::ClawdpayConfig;
use crate::logging::{CATEGORY_PRIVACY, ClawdpayLogger};

type JsonObject = JsonMap<String, JsonValue>;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum PrivacyError {
    #[error("PRIVACY_API_KEY is required")]
    MissingApiKey,
    #[error("Privacy API key is not a valid header value")]
    InvalidApiKey(#[source] reqwest::header::InvalidHeaderValue),
    #[error("Privacy API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Privacy API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to decode Privacy API response for {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Card {0} not found")]
    CardNotFound(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardType {
    #[default]
    SingleUse,
    MerchantLocked,
    Unlocked,
}

impl std::str::FromStr for CardType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SINGLE_USE" => Ok(CardType::SingleUse),
            "MERCHANT_LOCKED" => Ok(CardType::MerchantLocked),
            "UNLOCKED" => Ok(CardType::Unlocked),
            other => Err(format!("unknown card type {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpendLimitDuration {
    Transaction,
    Monthly,
    Annually,
    Forever,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardState {
    Open,
    Paused,
    Closed,
    PendingFulfillment,
    PendingActivation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardFunding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_four: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// Virtual card as returned by the API. Fields the client does not model are
/// kept in `extra`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyCard {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_year: Option<String>,
    #[serde(default)]
    pub last_four: String,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub spend_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_limit_duration: Option<SpendLimitDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CardState>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub card_type: Option<CardType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding: Option<CardFunding>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl fmt::Debug for PrivacyCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivacyCard")
            .field("token", &self.token)
            .field("pan", &self.pan.as_ref().map(|_| "<redacted>"))
            .field("cvv", &self.cvv.as_ref().map(|_| "<redacted>"))
            .field("last_four", &self.last_four)
            .field("memo", &self.memo)
            .field("spend_limit", &self.spend_limit)
            .field("state", &self.state)
            .field("card_type", &self.card_type)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundingSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_four: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

#[derive(Debug, Deserialize)]
struct CardPage {
    #[serde(default)]
    data: Vec<PrivacyCard>,
}

/// `/funding` replies with a bare list, a `{ "data": [...] }` page or a
/// single account object depending on the API version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FundingListing {
    Page { data: Vec<FundingSource> },
    List(Vec<FundingSource>),
    Single(FundingSource),
}

impl From<FundingListing> for Vec<FundingSource> {
    fn from(listing: FundingListing) -> Self {
        match listing {
            FundingListing::Page { data } | FundingListing::List(data) => data,
            FundingListing::Single(source) => vec![source],
        }
    }
}

pub struct PrivacyClient {
    http: HttpClient,
    base_url: String,
    logger: Arc<ClawdpayLogger>,
}

impl fmt::Debug for PrivacyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivacyClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl PrivacyClient {
    /// Build a client from configuration. A missing API key is fatal.
    pub fn from_config(
        config: &ClawdpayConfig,
        logger: Arc<ClawdpayLogger>,
    ) -> Result<Self, PrivacyError> {
        let api_key = config
            .privacy_api_key
            .as_deref()
            .ok_or(PrivacyError::MissingApiKey)?;
        Self::new(api_key, config.privacy_base_url(), logger)
    }

    pub fn new(
        api_key: &str,
        base_url: impl Into<String>,
        logger: Arc<ClawdpayLogger>,
    ) -> Result<Self, PrivacyError> {
        if api_key.trim().is_empty() {
            return Err(PrivacyError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("api-key {api_key}"))
            .map_err(PrivacyError::InvalidApiKey)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            logger,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Create a card whose spend limit applies per transaction.
    pub async fn create_card(
        &self,
        memo: &str,
        spend_limit_cents: u64,
        card_type: CardType,
    ) -> Result<PrivacyCard, PrivacyError> {
        let body = json!({
            "type": card_type,
            "memo": memo,
            "spend_limit": spend_limit_cents,
            "spend_limit_duration": SpendLimitDuration::Transaction,
        });
        let request = self.http.post(self.endpoint("cards")).json(&body);
        let card: PrivacyCard = self.send(request, "create card").await?;
        self.logger.info(
            format!("created {} card ending {}", memo, card.last_four),
            Some(CATEGORY_PRIVACY),
            Some(json!({ "token": card.token })),
        );
        Ok(card)
    }

    pub async fn list_cards(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<PrivacyCard>, PrivacyError> {
        let request = self
            .http
            .get(self.endpoint("cards"))
            .query(&[("page", page), ("page_size", page_size)]);
        let page: CardPage = self.send(request, "list cards").await?;
        Ok(page.data)
    }

    pub async fn get_card(&self, card_token: &str) -> Result<PrivacyCard, PrivacyError> {
        let request = self
            .http
            .get(self.endpoint("cards"))
            .query(&[("card_token", card_token)]);
        let page: CardPage = self.send(request, "get card").await?;
        page.data
            .into_iter()
            .find(|card| card.token == card_token)
            .ok_or_else(|| {
                let err = PrivacyError::CardNotFound(card_token.to_string());
                self.logger
                    .error(format!("Privacy API Error: {err}"), Some(CATEGORY_PRIVACY), None);
                err
            })
    }

    pub async fn get_funding_sources(&self) -> Result<Vec<FundingSource>, PrivacyError> {
        let request = self.http.get(self.endpoint("funding"));
        let listing: FundingListing = self.send(request, "list funding sources").await?;
        Ok(listing.into())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> Result<T, PrivacyError> {
        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(err, context))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| self.transport_error(err, context))?;

        if !status.is_success() {
            self.logger.error(
                format!("Privacy API Error: {} {}", status.as_u16(), body),
                Some(CATEGORY_PRIVACY),
                Some(json!({ "operation": context })),
            );
            return Err(PrivacyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| {
            let err = PrivacyError::Decode { context, source };
            self.logger.error(
                format!("Privacy API Error: {err}"),
                Some(CATEGORY_PRIVACY),
                Some(json!({ "operation": context })),
            );
            err
        })
    }

    fn transport_error(&self, err: reqwest::Error, context: &'static str) -> PrivacyError {
        self.logger.error(
            format!("Privacy API Error: {err}"),
            Some(CATEGORY_PRIVACY),
            Some(json!({ "operation": context })),
        );
        PrivacyError::Http(err)
    }
}
