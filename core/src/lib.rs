/// Classic ledger address validation
pub mod address;
/// Native amount parsing and limits
pub mod amount;
/// Hash-lock conditions, fulfillments and the engine that mints them
pub mod condition;
/// Escrow contracts and their state machine
pub mod escrow;
/// Configuration, booking requests and JSON helpers
pub mod interface;
pub mod serde;
/// Process-wide contract store
pub mod store;
/// Escrow transactions and their validating builders
pub mod transaction;

pub mod error;

pub use address::{is_valid_address, Address};
pub use amount::Drops;
pub use condition::{
    BundleOrigin, Condition, ConditionBundle, ConditionEngine, ConditionStrategy, Fulfillment,
    HashlockProvider, Sha256Hashlock,
};
pub use error::{EscrowError, FieldError};
pub use escrow::{EscrowContract, EscrowEvent, EscrowSnapshot, EscrowStatus, PendingStage};
pub use interface::{Environment, EscrowConfig, EscrowRequest};
pub use store::ContractStore;
pub use transaction::{
    EscrowCancel, EscrowCreate, EscrowFinish, EscrowReference, Transaction, TransactionBuilder,
};

pub type Result<T> = std::result::Result<T, EscrowError>;
