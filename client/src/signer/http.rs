//! REST client for a payload-style signing provider.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;
use xescrow_core::interface::SignerConfig;

use super::{
    CancelOutcome, SignedResponse, SigningOptions, SigningRequestRef, SigningRequestStatus,
    SigningService,
};
use crate::error::ClientError;
use crate::Result;

const SERVICE: &str = "signing service";
const PAYLOAD_PATH: &str = "platform/payload/";

/// Talks to the provider's `platform/payload` endpoints.
#[derive(Debug, Clone)]
pub struct HttpSigningService {
    http: Client,
    base: Url,
}

impl HttpSigningService {
    pub fn new(config: &SignerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", header(&config.api_key)?);
        headers.insert("x-api-secret", header(&config.api_secret)?);

        let http = Client::builder().default_headers(headers).build()?;

        // Trailing slash so `join` appends rather than replaces the last segment.
        let mut base = Url::parse(&config.api_url)?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self { http, base })
    }

    fn payload_url(&self, request_id: Option<&str>) -> Result<Url> {
        let url = self.base.join(PAYLOAD_PATH)?;
        Ok(match request_id {
            Some(id) => url.join(id)?,
            None => url,
        })
    }
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ClientError::Api {
        service: SERVICE,
        status: 0,
        body: format!("credential is not a valid header value: {e}"),
    })
}

/// Turns a non-2xx reply into [`ClientError::Api`] with the body attached.
async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        service: SERVICE,
        status: status.as_u16(),
        body,
    })
}

#[derive(Deserialize)]
struct CreatedReply {
    uuid: String,
    next: NextReply,
}

#[derive(Deserialize)]
struct NextReply {
    always: String,
}

#[derive(Deserialize)]
struct PayloadReply {
    meta: MetaReply,
    #[serde(default)]
    response: Option<ResponseReply>,
}

#[derive(Deserialize)]
struct MetaReply {
    #[serde(default)]
    signed: bool,
    #[serde(default)]
    resolved: bool,
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    cancelled: bool,
}

#[derive(Deserialize)]
struct ResponseReply {
    txid: Option<String>,
    account: Option<String>,
    dispatched_result: Option<String>,
}

#[derive(Deserialize)]
struct CancelReply {
    result: CancelResult,
}

#[derive(Deserialize)]
struct CancelResult {
    cancelled: bool,
    reason: String,
}

impl From<PayloadReply> for SigningRequestStatus {
    fn from(reply: PayloadReply) -> Self {
        let meta = reply.meta;
        let response = reply.response.and_then(|r| {
            Some(SignedResponse {
                tx_hash: r.txid?,
                account: r.account.unwrap_or_default(),
                dispatched_result: r.dispatched_result.filter(|s| !s.is_empty()),
            })
        });
        Self {
            signed: meta.signed,
            // resolved without a signature means the holder declined
            rejected: meta.resolved && !meta.signed && !meta.expired,
            expired: meta.expired || meta.cancelled,
            response,
        }
    }
}

#[async_trait::async_trait]
impl SigningService for HttpSigningService {
    async fn create_signing_request(
        &self,
        transaction: &serde_json::Value,
        options: &SigningOptions,
    ) -> Result<SigningRequestRef> {
        let mut body = json!({
            "txjson": transaction,
            "options": { "submit": true, "expire": options.expire_minutes },
        });
        if let Some(instruction) = &options.instruction {
            body["custom_meta"] = json!({ "instruction": instruction });
        }
        trace!(%body, "Creating signing request");

        let response = self
            .http
            .post(self.payload_url(None)?)
            .json(&body)
            .send()
            .await?;
        let reply: CreatedReply = checked(response).await?.json().await?;
        debug!(request_id = %reply.uuid, "Signing request created");

        Ok(SigningRequestRef {
            request_id: reply.uuid,
            next_action: reply.next.always,
        })
    }

    async fn get_signing_request_status(&self, request_id: &str) -> Result<SigningRequestStatus> {
        let response = self
            .http
            .get(self.payload_url(Some(request_id))?)
            .send()
            .await?;
        let reply: PayloadReply = checked(response).await?.json().await?;
        Ok(reply.into())
    }

    async fn cancel_signing_request(&self, request_id: &str) -> Result<CancelOutcome> {
        let response = self
            .http
            .delete(self.payload_url(Some(request_id))?)
            .send()
            .await?;
        let reply: CancelReply = checked(response).await?.json().await?;
        debug!(request_id, cancelled = reply.result.cancelled, "Signing request cancel");
        Ok(CancelOutcome {
            cancelled: reply.result.cancelled,
            reason: reply.result.reason,
        })
    }
}
