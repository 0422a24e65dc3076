use xescrow_core::Address;

use crate::Result;

pub mod rpc;

pub use rpc::JsonRpcLedger;

/// Read-only ledger queries needed to address an escrow before it exists.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// The account's next transaction sequence.
    ///
    /// An EscrowCreate signed with this sequence is later addressed by it.
    async fn account_sequence(&self, account: &Address) -> Result<u32>;
}
