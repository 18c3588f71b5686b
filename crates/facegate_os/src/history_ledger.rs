#![forbid(unsafe_code)]

use async_trait::async_trait;

use facegate_kernel_contracts::history::HistoryRecordInput;
use facegate_storage::ledger::LedgerAppendOutcome;
use facegate_storage::repo::HistoryLedgerRepo;

use crate::registry::SharedAccessStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("history ledger unavailable: {0}")]
pub struct LedgerUnavailable(pub String);

/// Persistence side of a decision cycle. The engine bounds every call with
/// the ledger timeout.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, input: HistoryRecordInput) -> Result<LedgerAppendOutcome, LedgerUnavailable>;
}

pub struct StoreHistorySink {
    store: SharedAccessStore,
}

impl StoreHistorySink {
    pub fn new(store: SharedAccessStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistorySink for StoreHistorySink {
    async fn append(&self, input: HistoryRecordInput) -> Result<LedgerAppendOutcome, LedgerUnavailable> {
        Ok(self.store.lock().append_history_row(input))
    }
}
