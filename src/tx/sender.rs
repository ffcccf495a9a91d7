//! Transaction dispatch pipeline
//!
//! estimate -> lock -> reserve -> sign and broadcast -> commit -> unlock.
//! Receipt tracking and compaction run detached and never affect the result
//! returned to the caller.

use super::gas::GasOracle;
use super::nonce::NonceSequencer;
use super::race::NonceRacePredicate;
use super::signer::TransactionBroadcaster;
use crate::context::DispatchContext;
use crate::chain::ChainGateway;
use crate::contract::{ContractAbi, DecodedLog, ErrorClassifier};
use crate::error::{ChainError, ClassifiedError, ErrorKind, OperatorError};
use crate::events::{OperatorEvent, Telemetry};
use crate::model::{ContractCall, NonceReservation};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, H256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sends contract calls from the operator account
pub struct TransactionDispatcher {
    ctx: DispatchContext,
    sequencer: Arc<NonceSequencer>,
    classifier: Arc<ErrorClassifier>,
    broadcaster: Arc<dyn TransactionBroadcaster>,
    gas_oracle: Arc<dyn GasOracle>,
    race: Arc<dyn NonceRacePredicate>,
    telemetry: Telemetry,
}

impl TransactionDispatcher {
    pub fn new(
        ctx: DispatchContext,
        sequencer: Arc<NonceSequencer>,
        classifier: Arc<ErrorClassifier>,
        broadcaster: Arc<dyn TransactionBroadcaster>,
        gas_oracle: Arc<dyn GasOracle>,
        race: Arc<dyn NonceRacePredicate>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            ctx,
            sequencer,
            classifier,
            broadcaster,
            gas_oracle,
            race,
            telemetry,
        }
    }

    /// Operator account every call is sent from
    pub fn operator(&self) -> Address {
        self.broadcaster.address()
    }

    /// Run one compaction pass outside of any dispatch
    pub async fn compact(&self) -> Result<Option<(u64, u64)>, OperatorError> {
        self.sequencer.compact(&self.ctx, self.operator()).await
    }

    /// Send `call` and return its hash as soon as the node accepts it.
    ///
    /// Every failure is a `ClassifiedError`; on none of them was a nonce
    /// committed, so resubmitting a `retryable` failure is safe.
    pub async fn dispatch(
        &self,
        call: ContractCall,
        correlation_id: Option<&str>,
    ) -> Result<H256, ClassifiedError> {
        let correlation_id = correlation_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let result = self.dispatch_inner(&call, &correlation_id).await;
        match &result {
            Ok(hash) => {
                crate::metrics::record_dispatch("sent");
                info!(correlation_id = %correlation_id, "Transaction sent: {:?}", hash);
            }
            Err(e) => {
                crate::metrics::record_dispatch(e.kind.as_str());
                warn!(
                    correlation_id = %correlation_id,
                    kind = e.kind.as_str(),
                    status = e.status.as_u16(),
                    retryable = e.retryable,
                    transient_cause = e.cause().map_or(false, OperatorError::is_retryable),
                    "Dispatch failed: {}",
                    e
                );
            }
        }
        result
    }

    async fn dispatch_inner(
        &self,
        call: &ContractCall,
        correlation_id: &str,
    ) -> Result<H256, ClassifiedError> {
        let from = self.operator();
        let mut tx = self.build_transaction(call, from, correlation_id).await;

        let gas = self
            .ctx
            .chain
            .estimate_gas(&tx)
            .await
            .map_err(|e| self.classify(ErrorKind::SimulationRejected, e, &call.abi))?;
        tx.set_gas(gas);
        debug!(correlation_id, "Estimated gas: {}", gas);

        let mut permit = self.ctx.lock.acquire(correlation_id).await;

        let reservation = self.sequencer.reserve(&self.ctx, from).await?;
        tx.set_nonce(reservation.nonce_to_use);
        let descriptor = call.abi.describe_call(from, call.to, &call.data);

        let hash = match self.broadcaster.sign_and_send(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                permit.release();
                self.telemetry.emit(OperatorEvent::TransactionError {
                    call: descriptor,
                    nonce: reservation.nonce_to_use,
                    message: e.to_string(),
                    correlation_id: correlation_id.to_string(),
                });
                return Err(self.classify_broadcast_failure(e, &call.abi));
            }
        };

        self.commit(&reservation, hash, correlation_id).await;
        info!(correlation_id, "Sent transaction {}: {:?}", descriptor, hash);
        self.telemetry.emit(OperatorEvent::TransactionSent {
            call: descriptor,
            nonce: reservation.nonce_to_use,
            tx_hash: hash,
            correlation_id: correlation_id.to_string(),
        });
        permit.release();

        self.spawn_receipt_watch(hash, call.abi.clone(), correlation_id.to_string());
        self.spawn_compaction(from);

        Ok(hash)
    }

    async fn build_transaction(
        &self,
        call: &ContractCall,
        from: Address,
        correlation_id: &str,
    ) -> TypedTransaction {
        let mut request = Eip1559TransactionRequest::new()
            .from(from)
            .to(call.to)
            .data(call.data.clone())
            .chain_id(self.ctx.chain.chain_id());

        if let Some(value) = call.value {
            request = request.value(value);
        }

        match self.gas_oracle.fees().await {
            Ok(fees) => {
                request = request
                    .max_fee_per_gas(fees.max_fee)
                    .max_priority_fee_per_gas(fees.max_priority_fee);
            }
            Err(e) => {
                warn!(correlation_id, "Gas oracle unavailable, using chain defaults: {}", e);
            }
        }

        TypedTransaction::Eip1559(request)
    }

    /// A failed cache write after broadcast is logged, never surfaced: the
    /// transaction is already in flight
    async fn commit(&self, reservation: &NonceReservation, hash: H256, correlation_id: &str) {
        if let Err(e) = self.sequencer.commit(&self.ctx, reservation, hash).await {
            error!(
                correlation_id,
                nonce = reservation.nonce_to_use,
                "Failed to record transaction {:?}: {}",
                hash,
                e
            );
            crate::metrics::record_commit_failure();
        }
    }

    fn classify(&self, kind: ErrorKind, err: ChainError, abi: &ContractAbi) -> ClassifiedError {
        if err.revert_data().is_some() {
            self.classifier.classify(kind, err, abi)
        } else {
            OperatorError::Chain(err).into()
        }
    }

    fn classify_broadcast_failure(&self, err: ChainError, abi: &ContractAbi) -> ClassifiedError {
        if self.race.is_nonce_race(&err) {
            warn!("Nonce race detected: {}", err);
            return ClassifiedError::nonce_race(err);
        }
        self.classify(ErrorKind::ContractRevert, err, abi)
    }

    fn spawn_receipt_watch(&self, hash: H256, abi: Arc<ContractAbi>, correlation_id: String) {
        tokio::spawn(follow_receipt(
            self.ctx.chain.clone(),
            hash,
            abi,
            correlation_id,
        ));
    }

    fn spawn_compaction(&self, address: Address) {
        let sequencer = self.sequencer.clone();
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            if let Err(e) = sequencer.compact(&ctx, address).await {
                warn!("Compaction failed: {}", e);
            }
        });
    }
}

/// Wait for the receipt of `hash` and decode its logs against `abi`.
/// Only logs and metrics observe the outcome.
async fn follow_receipt(
    chain: Arc<dyn ChainGateway>,
    hash: H256,
    abi: Arc<ContractAbi>,
    correlation_id: String,
) -> Vec<DecodedLog> {
    let receipt = match chain.wait_for_receipt(hash).await {
        Ok(Some(receipt)) => receipt,
        Ok(None) => {
            warn!(correlation_id = %correlation_id, "Transaction {:?} was dropped", hash);
            crate::metrics::record_receipt("dropped");
            return Vec::new();
        }
        Err(e) => {
            warn!(correlation_id = %correlation_id, "No receipt for {:?}: {}", hash, e);
            crate::metrics::record_receipt("unknown");
            return Vec::new();
        }
    };

    let outcome = if receipt.status.map_or(false, |s| s.as_u64() == 1) {
        "confirmed"
    } else {
        "reverted"
    };
    crate::metrics::record_receipt(outcome);
    info!(
        correlation_id = %correlation_id,
        block = ?receipt.block_number,
        "Transaction {:?} {}",
        hash,
        outcome
    );

    let mut decoded = Vec::new();
    for log in &receipt.logs {
        match abi.decode_log(log) {
            Some(event) => {
                info!(correlation_id = %correlation_id, "Event: {}", event);
                decoded.push(event);
            }
            None => debug!(correlation_id = %correlation_id, "Undecoded log from {:?}", log.address),
        }
    }
    decoded
}
