//! Operator transaction dispatcher
//!
//! Sends contract calls from a single custodial operator account. Nonces are
//! sequenced against a shared cache so transactions can be broadcast faster
//! than the chain confirms them, and contract reverts come back as typed,
//! HTTP-mapped errors with a retry signal.

pub mod cache;
pub mod chain;
pub mod config;
pub mod context;
pub mod contract;
pub mod error;
pub mod events;
pub mod metrics;
pub mod model;
pub mod tx;

#[cfg(test)]
pub(crate) mod test_utils;

pub use context::DispatchContext;
pub use error::{ClassifiedError, ErrorKind, OperatorError, OperatorResult};
pub use model::{ContractCall, NonceReservation};
pub use tx::{NonceSequencer, TransactionDispatcher};
