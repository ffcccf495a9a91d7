//! Transaction submission: nonce sequencing, the dispatch gate and the send pipeline

mod gas;
mod lock;
mod nonce;
mod race;
mod sender;
mod signer;

pub use gas::{suggest_fees, FeeSuggestion, GasOracle, ProviderFeeOracle};
pub use lock::{DispatchLock, DispatchPermit};
pub use nonce::NonceSequencer;
pub use race::{CodeAndMessagePredicate, NonceRacePredicate};
pub use sender::TransactionDispatcher;
pub use signer::{TransactionBroadcaster, WalletBroadcaster};
