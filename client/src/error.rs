pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Ledger error: {0}")]
    Ledger(String),
    #[error(transparent)]
    Escrow(#[from] xescrow_core::EscrowError),
}
