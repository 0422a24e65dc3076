use serde::{Deserialize, Serialize};

use crate::Result;

pub mod http;

pub use http::HttpSigningService;

/// Ledger result code of a successfully applied transaction.
pub const TES_SUCCESS: &str = "tesSUCCESS";

/// External delegated-signing provider.
///
/// The holder's keys never reach this process: a transaction is handed to
/// the provider, the holder approves or declines it out of band, and the
/// provider submits the signed blob to the ledger.
#[async_trait::async_trait]
pub trait SigningService: Send + Sync {
    /// Opens a signing request for `transaction`.
    ///
    /// # Returns
    /// The provider's request id and where the holder goes to act on it.
    async fn create_signing_request(
        &self,
        transaction: &serde_json::Value,
        options: &SigningOptions,
    ) -> Result<SigningRequestRef>;

    /// Current state of a request opened with [`SigningService::create_signing_request`].
    async fn get_signing_request_status(&self, request_id: &str) -> Result<SigningRequestStatus>;

    /// Withdraws an unanswered request.
    async fn cancel_signing_request(&self, request_id: &str) -> Result<CancelOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningOptions {
    /// Minutes the request stays answerable.
    pub expire_minutes: u32,
    /// Shown to the holder next to the transaction.
    pub instruction: Option<String>,
}

/// Handle to an outstanding signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequestRef {
    pub request_id: String,
    /// Link or deep link the holder follows to sign.
    pub next_action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningRequestStatus {
    pub signed: bool,
    pub rejected: bool,
    pub expired: bool,
    pub response: Option<SignedResponse>,
}

/// What the provider knows about a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedResponse {
    pub tx_hash: String,
    /// Account that signed.
    pub account: String,
    /// Ledger result code, once the provider has submitted the transaction.
    pub dispatched_result: Option<String>,
}

impl SignedResponse {
    /// Validated by the ledger with `tesSUCCESS`.
    pub fn is_success(&self) -> bool {
        self.dispatched_result.as_deref() == Some(TES_SUCCESS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub cancelled: bool,
    pub reason: String,
}
