//! Transactional storage backing the workflow engine
use crate::error::WorkflowError;
use crate::ledger::{LedgerReader, LedgerWriter};
use crate::repository::ChecksheetRepository;
use crate::types::{Checksheet, ChecksheetKey};

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Everything a transition may touch while its transaction is open
pub trait StoreTx: ChecksheetRepository + LedgerWriter {}

impl<T: ChecksheetRepository + LedgerWriter> StoreTx for T {}

pub trait Store: LedgerReader + Send + Sync {
    /// Non-transactional read of a single row, soft-deleted rows included
    fn checksheet(&self, key: ChecksheetKey) -> Result<Option<Checksheet>, WorkflowError>;

    /// Runs `f` as one atomic unit: either every write it made becomes
    /// visible, or (on `Err`) none does.
    ///
    /// A backend may invoke `f` more than once if the underlying engine
    /// detects a storage-level conflict, so `f` must re-read whatever it
    /// depends on rather than capture earlier reads.
    fn atomically<T, F>(&self, f: F) -> Result<T, WorkflowError>
    where
        F: Fn(&dyn StoreTx) -> Result<T, WorkflowError>;
}
