//! Nonce sequencing against a lagging chain
//!
//! The chain's confirmed transaction count is the authoritative lower bound;
//! the cached shadow nonce is an optimistic upper bound covering transactions
//! that were broadcast but not mined yet. Reservation reconciles the two, and
//! compaction keeps the pending-entry ledger bounded.

use crate::chain::TxStatus;
use crate::context::DispatchContext;
use crate::error::{CacheError, OperatorResult};
use crate::events::{OperatorEvent, Telemetry};
use crate::model::{NonceReservation, ReservationBranch};

use ethers::types::{Address, H256};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Computes nonces and owns the compaction policy
pub struct NonceSequencer {
    /// Backlog of confirmed nonces tolerated before pending entries are purged
    cleanup_interval: u64,
    /// Oldest nonce still holding a pending entry; lazily recomputed per process
    cleanup_cursor: Mutex<Option<u64>>,
    telemetry: Telemetry,
}

impl NonceSequencer {
    pub fn new(cleanup_interval: u64, telemetry: Telemetry) -> Self {
        Self {
            cleanup_interval,
            cleanup_cursor: Mutex::new(None),
            telemetry,
        }
    }

    /// Decide the nonce for the next transaction from `address`.
    ///
    /// Reads only; nothing is written until `commit`. Must be called while
    /// holding the dispatch lock.
    pub async fn reserve(
        &self,
        ctx: &DispatchContext,
        address: Address,
    ) -> OperatorResult<NonceReservation> {
        let chain_count = ctx.chain.confirmed_transaction_count(address).await?;
        let cached = ctx.ledger.shadow_nonce().await?;

        let reservation = match cached {
            Some(cached) if cached > chain_count => {
                self.scan_outstanding(ctx, chain_count, cached).await?
            }
            Some(cached) if cached == chain_count => NonceReservation::new(
                chain_count + 1,
                chain_count + 1,
                ReservationBranch::SinglePending,
            ),
            _ => NonceReservation::new(chain_count, chain_count, ReservationBranch::NoPending),
        };

        debug!(
            branch = reservation.branch.label(),
            chain_count,
            cached_nonce = ?cached,
            nonce = reservation.nonce_to_use,
            next_shadow_nonce = reservation.next_shadow_nonce,
            "Reserved nonce"
        );
        crate::metrics::record_reservation(reservation.branch.label());
        self.telemetry.emit(OperatorEvent::NonceReserved {
            branch: reservation.branch,
            tx_count: chain_count,
            current_cached_nonce: cached,
            tx_nonce: reservation.nonce_to_use,
            cached_nonce: reservation.next_shadow_nonce,
        });

        Ok(reservation)
    }

    /// Reuse the first outstanding slot whose transaction failed, else extend the tail
    async fn scan_outstanding(
        &self,
        ctx: &DispatchContext,
        chain_count: u64,
        cached: u64,
    ) -> OperatorResult<NonceReservation> {
        for nonce in (chain_count + 1)..=cached {
            let Some(hash) = ctx.ledger.pending_hash(nonce).await? else {
                continue;
            };
            let status = ctx.chain.transaction_status(hash).await?;
            debug!("Outstanding nonce {} ({:?}) is {}", nonce, hash, status.as_str());
            if status == TxStatus::Failed {
                return Ok(NonceReservation::new(
                    nonce,
                    cached,
                    ReservationBranch::OutOfOrder,
                ));
            }
        }

        Ok(NonceReservation::new(
            cached + 1,
            cached + 1,
            ReservationBranch::MultiplePending,
        ))
    }

    /// Record a successful broadcast: pending entry first, then the shadow nonce
    pub async fn commit(
        &self,
        ctx: &DispatchContext,
        reservation: &NonceReservation,
        tx_hash: H256,
    ) -> Result<(), CacheError> {
        ctx.ledger
            .record_pending(reservation.nonce_to_use, tx_hash)
            .await?;
        ctx.ledger
            .set_shadow_nonce(reservation.next_shadow_nonce)
            .await?;
        crate::metrics::record_shadow_nonce(reservation.next_shadow_nonce);
        Ok(())
    }

    /// Purge pending entries below the chain count once enough have accumulated.
    ///
    /// Returns the deleted range, if a purge happened. Only nonces strictly
    /// below the confirmed count are touched, so this is safe to run alongside
    /// a reservation.
    pub async fn compact(
        &self,
        ctx: &DispatchContext,
        address: Address,
    ) -> OperatorResult<Option<(u64, u64)>> {
        let chain_count = ctx.chain.confirmed_transaction_count(address).await?;
        if chain_count == 0 {
            return Ok(None);
        }

        let mut cursor = self.cleanup_cursor.lock().await;
        let start = match *cursor {
            Some(start) => start,
            None => {
                let start = find_cleanup_start(ctx, chain_count).await?;
                *cursor = Some(start);
                start
            }
        };

        let last = chain_count - 1;
        if chain_count.saturating_sub(start + 1) < self.cleanup_interval {
            return Ok(None);
        }

        let deleted = ctx.ledger.delete_pending_range(start, last).await?;
        crate::metrics::record_pending_deleted(deleted);
        self.telemetry
            .emit(OperatorEvent::Cleanup { from: start, to: last });
        info!("Cleaned up cached hashes from {} to {}", start, last);

        *cursor = Some(last);
        Ok(Some((start, last)))
    }
}

/// Walk back from the newest confirmed nonce to the start of the tracked run
async fn find_cleanup_start(ctx: &DispatchContext, chain_count: u64) -> Result<u64, CacheError> {
    let mut start = chain_count - 1;
    while start > 0 && ctx.ledger.has_pending(start - 1).await? {
        start -= 1;
    }
    Ok(start)
}
