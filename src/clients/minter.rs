//! Loyalty token mint endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{ClientError, check_status};

#[async_trait]
pub trait LoyaltyMinter: Send + Sync {
    async fn mint(&self, user_address: &str, amount: u64) -> Result<(), ClientError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MintRequest<'a> {
    user_address: &'a str,
    amount: u64,
}

#[derive(Clone)]
pub struct HttpLoyaltyMinter {
    url: String,
    http: Client,
}

impl HttpLoyaltyMinter {
    pub fn new(url: impl Into<String>, http: Client) -> Self {
        Self { url: url.into(), http }
    }
}

#[async_trait]
impl LoyaltyMinter for HttpLoyaltyMinter {
    async fn mint(&self, user_address: &str, amount: u64) -> Result<(), ClientError> {
        let response = self
            .http
            .post(&self.url)
            .json(&MintRequest { user_address, amount })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
