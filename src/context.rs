//! Shared state handed to every nonce and dispatch operation

use crate::cache::ShadowLedger;
use crate::chain::ChainGateway;
use crate::tx::DispatchLock;

use std::sync::Arc;

/// Chain access, the shadow ledger and the dispatch gate of one operator account
#[derive(Clone)]
pub struct DispatchContext {
    pub chain: Arc<dyn ChainGateway>,
    pub ledger: ShadowLedger,
    pub lock: Arc<DispatchLock>,
}

impl DispatchContext {
    pub fn new(chain: Arc<dyn ChainGateway>, ledger: ShadowLedger) -> Self {
        Self {
            chain,
            ledger,
            lock: Arc::new(DispatchLock::new()),
        }
    }
}
