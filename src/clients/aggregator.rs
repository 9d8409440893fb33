//! DEX aggregator client
//!
//! Requests ready-to-sign swap transactions for a token pair.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::{ClientError, check_status};

#[async_trait]
pub trait SwapAggregator: Send + Sync {
    /// Ask for a swap transaction. A quote without `tx.data` means no swap was produced.
    async fn build_swap(&self, request: &SwapQuoteRequest) -> Result<SwapQuote, ClientError>;
}

/// Parameters of one swap request
#[derive(Debug, Clone, PartialEq)]
pub struct SwapQuoteRequest {
    pub src: String,
    pub dst: String,
    /// Amount of `src` in its smallest unit
    pub amount: u128,
    pub from: String,
    pub origin: String,
    pub slippage_bps: u16,
}

impl SwapQuoteRequest {
    /// Slippage in percent, the unit the aggregator expects
    pub fn slippage_percent(&self) -> String {
        let whole = self.slippage_bps / 100;
        let fraction = self.slippage_bps % 100;
        if fraction == 0 {
            whole.to_string()
        } else {
            format!("{whole}.{fraction:02}").trim_end_matches('0').to_string()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwapQuote {
    #[serde(default)]
    pub tx: Option<UnsignedTx>,
}

impl SwapQuote {
    /// The transaction payload, when the aggregator produced one with calldata
    pub fn transaction(&self) -> Option<&UnsignedTx> {
        self.tx.as_ref().filter(|tx| tx.data.as_deref().is_some_and(|d| !d.is_empty()))
    }
}

/// Unsigned legacy transaction as returned by the aggregator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTx {
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub gas: Option<u64>,
    #[serde(rename = "gasPrice", default)]
    pub gas_price: Option<String>,
}

/// Gas arrives either as a JSON number or a decimal string.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid gas value {s:?}"))),
    }
}

/// 1inch-style aggregator reached over HTTP
#[derive(Clone)]
pub struct AggregatorClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl AggregatorClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, http: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        }
    }
}

#[async_trait]
impl SwapAggregator for AggregatorClient {
    async fn build_swap(&self, request: &SwapQuoteRequest) -> Result<SwapQuote, ClientError> {
        let url = format!("{}/swap", self.base_url);
        let params = [
            ("src", request.src.clone()),
            ("dst", request.dst.clone()),
            ("amount", request.amount.to_string()),
            ("from", request.from.clone()),
            ("origin", request.origin.clone()),
            ("slippage", request.slippage_percent()),
        ];
        debug!(dst = %request.dst, amount = %request.amount, "requesting swap payload");

        let mut builder = self.http.get(url).query(&params);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = check_status(builder.send().await?).await?;
        response
            .json::<SwapQuote>()
            .await
            .map_err(|e| ClientError::Decode(format!("aggregator swap response: {e}")))
    }
}
