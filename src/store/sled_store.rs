use super::Store;
use crate::error::WorkflowError;
use crate::ledger::{
    ApprovalRecord, LedgerHead, LedgerReader, LedgerTable, LedgerWriter, RevisionRecord,
    head_key, row_key,
};
use crate::repository::ChecksheetRepository;
use crate::types::{Checksheet, ChecksheetKey, ChecksheetKind};
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

const DIRS: &str = "dirs";
const FIS: &str = "fis";
const REVISIONS: &str = "checksheet_revisions";
const APPROVALS: &str = "checksheet_approvals";
const HEADS: &str = "checksheet_ledger_heads";

/// Durable store on sled. One tree per checksheet kind, two shared ledger
/// trees, and a tree of per-reference ledger counters.
pub struct SledStore {
    instance: Arc<sled::Db>,
    dirs: sled::Tree,
    fis: sled::Tree,
    revisions: sled::Tree,
    approvals: sled::Tree,
    heads: sled::Tree,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, WorkflowError> {
        Ok(Self {
            dirs: instance.open_tree(DIRS)?,
            fis: instance.open_tree(FIS)?,
            revisions: instance.open_tree(REVISIONS)?,
            approvals: instance.open_tree(APPROVALS)?,
            heads: instance.open_tree(HEADS)?,
            instance,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        Self::new(Arc::new(sled::open(path)?))
    }

    pub fn flush(&self) -> Result<(), WorkflowError> {
        self.instance.flush()?;
        Ok(())
    }

    fn table(&self, kind: ChecksheetKind) -> &sled::Tree {
        match kind {
            ChecksheetKind::Dir => &self.dirs,
            ChecksheetKind::Fi => &self.fis,
        }
    }
}

impl LedgerReader for SledStore {
    fn revisions(&self, key: ChecksheetKey) -> Result<Vec<RevisionRecord>, WorkflowError> {
        self.revisions
            .scan_prefix(key.prefix())
            .values()
            .map(|row| -> Result<RevisionRecord, WorkflowError> {
                let row = row?;
                Ok(minicbor::decode(&row)?)
            })
            .collect()
    }

    fn approvals(&self, key: ChecksheetKey) -> Result<Vec<ApprovalRecord>, WorkflowError> {
        self.approvals
            .scan_prefix(key.prefix())
            .values()
            .map(|row| -> Result<ApprovalRecord, WorkflowError> {
                let row = row?;
                Ok(minicbor::decode(&row)?)
            })
            .collect()
    }
}

impl Store for SledStore {
    fn checksheet(&self, key: ChecksheetKey) -> Result<Option<Checksheet>, WorkflowError> {
        match self.table(key.kind).get(key.id.as_bytes())? {
            Some(row) => Ok(Some(minicbor::decode(&row)?)),
            None => Ok(None),
        }
    }

    fn atomically<T, F>(&self, f: F) -> Result<T, WorkflowError>
    where
        F: Fn(&dyn super::StoreTx) -> Result<T, WorkflowError>,
    {
        let result = (
            &self.dirs,
            &self.fis,
            &self.revisions,
            &self.approvals,
            &self.heads,
        )
            .transaction(|(dirs, fis, revisions, approvals, heads)| {
                let tx = SledTx {
                    dirs,
                    fis,
                    revisions,
                    approvals,
                    heads,
                    fault: RefCell::new(None),
                };
                let outcome = f(&tx);
                // a storage conflict must reach sled untouched so it can re-run the closure
                if let Some(fault) = tx.fault.into_inner() {
                    return Err(fault.into());
                }
                outcome.map_err(ConflictableTransactionError::Abort)
            });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }
}

struct SledTx<'a> {
    dirs: &'a TransactionalTree,
    fis: &'a TransactionalTree,
    revisions: &'a TransactionalTree,
    approvals: &'a TransactionalTree,
    heads: &'a TransactionalTree,
    fault: RefCell<Option<UnabortableTransactionError>>,
}

impl SledTx<'_> {
    fn table(&self, kind: ChecksheetKind) -> &TransactionalTree {
        match kind {
            ChecksheetKind::Dir => self.dirs,
            ChecksheetKind::Fi => self.fis,
        }
    }

    /// Converts a sled error into a `Persistence` error for the caller while
    /// keeping the original so `atomically` can hand it back to sled.
    fn guard<T>(&self, res: Result<T, UnabortableTransactionError>) -> Result<T, WorkflowError> {
        res.map_err(|err| {
            let message = match &err {
                UnabortableTransactionError::Conflict => "transaction conflict".to_string(),
                UnabortableTransactionError::Storage(e) => e.to_string(),
            };
            self.fault.borrow_mut().get_or_insert(err);
            WorkflowError::Persistence(message)
        })
    }
}

impl ChecksheetRepository for SledTx<'_> {
    fn find(&self, key: ChecksheetKey) -> Result<Option<Checksheet>, WorkflowError> {
        let row = self.guard(self.table(key.kind).get(key.id.as_bytes()))?;
        match row {
            Some(row) => Ok(Some(minicbor::decode(&row)?)),
            None => Ok(None),
        }
    }

    fn put(&self, checksheet: &Checksheet) -> Result<(), WorkflowError> {
        let cbor = minicbor::to_vec(checksheet)?;
        self.guard(
            self.table(checksheet.kind())
                .insert(checksheet.id.as_bytes().to_vec(), cbor),
        )?;
        Ok(())
    }
}

impl LedgerWriter for SledTx<'_> {
    fn head(&self, table: LedgerTable, key: ChecksheetKey) -> Result<LedgerHead, WorkflowError> {
        match self.guard(self.heads.get(head_key(table, key)))? {
            Some(row) => Ok(minicbor::decode(&row)?),
            None => Ok(LedgerHead::default()),
        }
    }

    fn put_head(
        &self,
        table: LedgerTable,
        key: ChecksheetKey,
        head: LedgerHead,
    ) -> Result<(), WorkflowError> {
        let cbor = minicbor::to_vec(head)?;
        self.guard(self.heads.insert(head_key(table, key).to_vec(), cbor))?;
        Ok(())
    }

    fn put_revision(&self, sequence: u64, record: &RevisionRecord) -> Result<(), WorkflowError> {
        let key = ChecksheetKey::new(record.kind, record.reference_id);
        let cbor = minicbor::to_vec(record)?;
        self.guard(self.revisions.insert(row_key(key, sequence).to_vec(), cbor))?;
        Ok(())
    }

    fn put_approval(&self, sequence: u64, record: &ApprovalRecord) -> Result<(), WorkflowError> {
        let key = ChecksheetKey::new(record.kind, record.reference_id);
        let cbor = minicbor::to_vec(record)?;
        self.guard(self.approvals.insert(row_key(key, sequence).to_vec(), cbor))?;
        Ok(())
    }
}
