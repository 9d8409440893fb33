//! Native asset price source used to convert fiat deposits

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use super::{ClientError, check_status};

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current USD price of one unit of the native asset
    async fn native_usd_price(&self) -> Result<Decimal, ClientError>;
}

/// Returns the same price on every call
#[derive(Debug, Clone, Copy)]
pub struct FixedRateOracle(pub Decimal);

#[async_trait]
impl PriceOracle for FixedRateOracle {
    async fn native_usd_price(&self) -> Result<Decimal, ClientError> {
        Ok(self.0)
    }
}

/// CoinGecko `simple/price` endpoint
#[derive(Clone)]
pub struct CoinGeckoOracle {
    base_url: String,
    asset_id: String,
    http: Client,
}

impl CoinGeckoOracle {
    pub fn new(base_url: impl Into<String>, asset_id: impl Into<String>, http: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            asset_id: asset_id.into(),
            http,
        }
    }
}

type SimplePrice = HashMap<String, HashMap<String, f64>>;

fn usd_price(body: &SimplePrice, asset_id: &str) -> Result<Decimal, ClientError> {
    let price = body
        .get(asset_id)
        .and_then(|quotes| quotes.get("usd"))
        .copied()
        .ok_or_else(|| ClientError::Decode(format!("no usd price for {asset_id}")))?;

    Decimal::from_f64(price)
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| ClientError::Decode(format!("unusable price {price} for {asset_id}")))
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    async fn native_usd_price(&self) -> Result<Decimal, ClientError> {
        let url = format!("{}/simple/price", self.base_url);
        let response = self
            .http
            .get(url)
            .query(&[("ids", self.asset_id.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?;

        let body: SimplePrice = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("price response: {e}")))?;

        usd_price(&body, &self.asset_id)
    }
}
