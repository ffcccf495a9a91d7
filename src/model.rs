//! Data carried through a single dispatch

use crate::contract::ContractAbi;

use ethers::types::{Address, Bytes, U256};
use std::fmt;
use std::sync::Arc;

/// Which reconciliation rule produced a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationBranch {
    /// Shadow nonce behind the chain (or missing): chain count is authoritative
    NoPending,
    /// Shadow nonce equals the chain count: one transaction outstanding
    SinglePending,
    /// A failed outstanding slot is refilled; the tail does not move
    OutOfOrder,
    /// Several outstanding, none failed: extend the tail
    MultiplePending,
}

impl ReservationBranch {
    /// Human readable description used in telemetry
    pub fn description(&self) -> &'static str {
        match self {
            ReservationBranch::NoPending => "No pending transactions",
            ReservationBranch::SinglePending => "1 pending transaction",
            ReservationBranch::OutOfOrder => "Out of order nonce",
            ReservationBranch::MultiplePending => "Multiple pending transactions",
        }
    }

    /// Label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ReservationBranch::NoPending => "no_pending",
            ReservationBranch::SinglePending => "single_pending",
            ReservationBranch::OutOfOrder => "out_of_order",
            ReservationBranch::MultiplePending => "multiple_pending",
        }
    }
}

/// Result of `NonceSequencer::reserve`, consumed by exactly one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceReservation {
    /// Nonce embedded in the outgoing transaction
    pub nonce_to_use: u64,
    /// Shadow nonce written back after a successful broadcast
    pub next_shadow_nonce: u64,
    pub branch: ReservationBranch,
}

impl NonceReservation {
    pub(crate) fn new(nonce_to_use: u64, next_shadow_nonce: u64, branch: ReservationBranch) -> Self {
        Self {
            nonce_to_use,
            next_shadow_nonce,
            branch,
        }
    }
}

/// An unsigned contract call to be sent from the operator account
#[derive(Clone)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
    /// ABI of `to`, used to decode reverts, logs and the call itself
    pub abi: Arc<ContractAbi>,
}

impl ContractCall {
    pub fn new(to: Address, data: impl Into<Bytes>, abi: Arc<ContractAbi>) -> Self {
        Self {
            to,
            data: data.into(),
            value: None,
            abi,
        }
    }
}

impl fmt::Debug for ContractCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractCall")
            .field("to", &self.to)
            .field("data", &self.data)
            .field("value", &self.value)
            .field("abi", &self.abi.name)
            .finish()
    }
}

/// Decoded view of an outgoing call, for logs and telemetry only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub from: Address,
    pub to: Address,
    pub function_name: String,
    pub arguments: Vec<String>,
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.function_name, self.arguments.join(", "))
    }
}
