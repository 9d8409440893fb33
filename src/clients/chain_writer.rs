//! Chain-write service client (MultiBaas)
//!
//! Signs and broadcasts transactions through the provider's HSM wallet and
//! invokes methods of the product contract.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ClientError, UnsignedTx, check_status};
use crate::config::MultiBaasConfig;

#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Sign and broadcast a transaction, returning its hash
    async fn submit_transaction(&self, tx: &UnsignedTx) -> Result<String, ClientError>;

    /// Invoke a method of the configured contract
    async fn call_method(&self, method: &str, call: &MethodCall) -> Result<Value, ClientError>;
}

/// Body of a contract method invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCall {
    pub args: Vec<Value>,
    pub from: String,
    pub value: String,
    pub sign_and_submit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce_management: Option<bool>,
}

impl MethodCall {
    /// Zero-value call signed by the provider on behalf of `from`
    pub fn signed(from: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            args,
            from: from.into(),
            value: "0".to_string(),
            sign_and_submit: true,
            nonce_management: None,
        }
    }

    pub fn with_nonce_management(mut self) -> Self {
        self.nonce_management = Some(true);
        self
    }
}

#[derive(Clone)]
pub struct MultiBaasClient {
    config: MultiBaasConfig,
    http: Client,
}

impl MultiBaasClient {
    pub fn new(config: MultiBaasConfig, http: Client) -> Self {
        Self { config, http }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/chains/ethereum/addresses/{}/contracts/{}/methods/{}",
            self.config.url, self.config.contract_address, self.config.contract_label, method
        )
    }
}

/// Transaction hash from a submit response; the provider may wrap it in `result`.
pub(crate) fn extract_tx_hash(body: &Value) -> Option<String> {
    let candidates = [body, body.get("result").unwrap_or(&Value::Null)];
    candidates.iter().find_map(|v| {
        ["txHash", "hash"]
            .iter()
            .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
    })
}

#[async_trait]
impl ChainWriter for MultiBaasClient {
    async fn submit_transaction(&self, tx: &UnsignedTx) -> Result<String, ClientError> {
        let url = format!("{}/chains/ethereum/hsm/submit", self.config.url);
        let body = json!({
            "tx": {
                "gasPrice": tx.gas_price,
                "gas": tx.gas,
                "from": tx.from,
                "to": tx.to,
                "value": tx.value,
                "data": tx.data,
                "type": 0,
            }
        });
        debug!(to = %tx.to, "submitting transaction to HSM");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let payload: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("submit response: {e}")))?;

        extract_tx_hash(&payload)
            .ok_or_else(|| ClientError::Decode("submit response carried no transaction hash".to_string()))
    }

    async fn call_method(&self, method: &str, call: &MethodCall) -> Result<Value, ClientError> {
        debug!(method, from = %call.from, "calling contract method");
        let response = self
            .http
            .post(self.method_url(method))
            .bearer_auth(&self.config.api_key)
            .json(call)
            .send()
            .await?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("{method} response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_hash_is_read_from_top_level_or_result() {
        assert_eq!(extract_tx_hash(&json!({"txHash": "0x1"})).as_deref(), Some("0x1"));
        assert_eq!(extract_tx_hash(&json!({"hash": "0x2"})).as_deref(), Some("0x2"));
        assert_eq!(
            extract_tx_hash(&json!({"status": 200, "result": {"hash": "0x3"}})).as_deref(),
            Some("0x3")
        );
        assert_eq!(extract_tx_hash(&json!({"status": 200})), None);
    }

    #[test]
    fn method_call_serializes_in_camel_case() {
        let call = MethodCall::signed("0xwallet", vec![json!("300"), json!("USDC")]).with_nonce_management();
        let body = serde_json::to_value(&call).unwrap();
        assert_eq!(
            body,
            json!({
                "args": ["300", "USDC"],
                "from": "0xwallet",
                "value": "0",
                "signAndSubmit": true,
                "nonceManagement": true
            })
        );
    }

    #[test]
    fn method_url_targets_configured_contract() {
        let client = MultiBaasClient::new(
            MultiBaasConfig {
                url: "https://chain.example/api/v0".into(),
                api_key: "k".into(),
                contract_address: "trickle_contract".into(),
                contract_label: "trickle".into(),
            },
            Client::new(),
        );
        assert_eq!(
            client.method_url("recordSwap"),
            "https://chain.example/api/v0/chains/ethereum/addresses/trickle_contract/contracts/trickle/methods/recordSwap"
        );
    }
}
