//! JSON-RPC access to a ledger node.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;
use xescrow_core::interface::LedgerConfig;
use xescrow_core::Address;

use super::LedgerClient;
use crate::error::ClientError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct JsonRpcLedger {
    http: Client,
    url: Url,
}

impl JsonRpcLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            url: Url::parse(&config.rpc_url)?,
        })
    }
}

#[derive(Deserialize)]
struct RpcReply {
    result: AccountInfoResult,
}

#[derive(Deserialize)]
struct AccountInfoResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    account_data: Option<AccountData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountData {
    sequence: u32,
}

impl AccountInfoResult {
    fn into_sequence(self) -> Result<u32> {
        if let Some(error) = self.error {
            let message = self.error_message.unwrap_or_default();
            return Err(ClientError::Ledger(format!("{error}: {message}")));
        }
        match (self.status.as_deref(), self.account_data) {
            (Some("success") | None, Some(data)) => Ok(data.sequence),
            (status, _) => Err(ClientError::Ledger(format!(
                "account_info returned no account data (status {status:?})"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn account_sequence(&self, account: &Address) -> Result<u32> {
        let body = json!({
            "method": "account_info",
            "params": [{ "account": account.as_str(), "ledger_index": "current" }],
        });
        let reply: RpcReply = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let sequence = reply.result.into_sequence()?;
        debug!(%account, sequence, "Fetched account sequence");
        Ok(sequence)
    }
}
