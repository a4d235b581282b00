use super::{Store, StoreTx};
use crate::error::WorkflowError;
use crate::ledger::{
    ApprovalRecord, LedgerHead, LedgerReader, LedgerTable, LedgerWriter, RevisionRecord,
};
use crate::repository::ChecksheetRepository;
use crate::types::{Checksheet, ChecksheetKey};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default, Clone)]
struct Tables {
    checksheets: HashMap<ChecksheetKey, Checksheet>,
    revisions: BTreeMap<(ChecksheetKey, u64), RevisionRecord>,
    approvals: BTreeMap<(ChecksheetKey, u64), ApprovalRecord>,
    heads: HashMap<(LedgerTable, ChecksheetKey), LedgerHead>,
}

/// In-process store for tests and embedding.
///
/// Transactions are serialised by a mutex and run against a copy of the
/// tables, which replaces the live tables only when the closure succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, WorkflowError> {
        self.tables
            .lock()
            .map_err(|_| WorkflowError::Persistence("memory store lock poisoned".into()))
    }
}

impl LedgerReader for MemoryStore {
    fn revisions(&self, key: ChecksheetKey) -> Result<Vec<RevisionRecord>, WorkflowError> {
        let tables = self.lock()?;
        Ok(tables
            .revisions
            .range((key, 0)..=(key, u64::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn approvals(&self, key: ChecksheetKey) -> Result<Vec<ApprovalRecord>, WorkflowError> {
        let tables = self.lock()?;
        Ok(tables
            .approvals
            .range((key, 0)..=(key, u64::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }
}

impl Store for MemoryStore {
    fn checksheet(&self, key: ChecksheetKey) -> Result<Option<Checksheet>, WorkflowError> {
        Ok(self.lock()?.checksheets.get(&key).cloned())
    }

    fn atomically<T, F>(&self, f: F) -> Result<T, WorkflowError>
    where
        F: Fn(&dyn StoreTx) -> Result<T, WorkflowError>,
    {
        let mut live = self.lock()?;
        let tx = MemoryTx {
            tables: RefCell::new(live.clone()),
        };
        let value = f(&tx)?;
        *live = tx.tables.into_inner();
        Ok(value)
    }
}

struct MemoryTx {
    tables: RefCell<Tables>,
}

impl ChecksheetRepository for MemoryTx {
    fn find(&self, key: ChecksheetKey) -> Result<Option<Checksheet>, WorkflowError> {
        Ok(self.tables.borrow().checksheets.get(&key).cloned())
    }

    fn put(&self, checksheet: &Checksheet) -> Result<(), WorkflowError> {
        self.tables
            .borrow_mut()
            .checksheets
            .insert(checksheet.key(), checksheet.clone());
        Ok(())
    }
}

impl LedgerWriter for MemoryTx {
    fn head(&self, table: LedgerTable, key: ChecksheetKey) -> Result<LedgerHead, WorkflowError> {
        Ok(self
            .tables
            .borrow()
            .heads
            .get(&(table, key))
            .copied()
            .unwrap_or_default())
    }

    fn put_head(
        &self,
        table: LedgerTable,
        key: ChecksheetKey,
        head: LedgerHead,
    ) -> Result<(), WorkflowError> {
        self.tables.borrow_mut().heads.insert((table, key), head);
        Ok(())
    }

    fn put_revision(&self, sequence: u64, record: &RevisionRecord) -> Result<(), WorkflowError> {
        let key = ChecksheetKey::new(record.kind, record.reference_id);
        self.tables
            .borrow_mut()
            .revisions
            .insert((key, sequence), record.clone());
        Ok(())
    }

    fn put_approval(&self, sequence: u64, record: &ApprovalRecord) -> Result<(), WorkflowError> {
        let key = ChecksheetKey::new(record.kind, record.reference_id);
        self.tables
            .borrow_mut()
            .approvals
            .insert((key, sequence), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{ChecksheetFields, DirFields};
    use crate::repository::StatusUpdate;
    use crate::types::{Status, TimeStamp, UserId};

    fn sheet() -> Checksheet {
        Checksheet::new("DIR-1", UserId::new(), ChecksheetFields::Dir(DirFields::default()))
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let sheet = sheet();
        let key = sheet.key();
        store.atomically(|tx| tx.insert(&sheet)).unwrap();

        let res: Result<(), WorkflowError> = store.atomically(|tx| {
            tx.update_status(
                key,
                Status::Pending,
                StatusUpdate {
                    status: Status::Revision,
                    locked: false,
                    at: TimeStamp::now(),
                },
            )?;
            tx.append_revision(key, "fix", UserId::new(), TimeStamp::now())?;
            Err(WorkflowError::Persistence("boom".into()))
        });

        assert!(res.is_err());
        assert_eq!(store.checksheet(key).unwrap().unwrap().status, Status::Pending);
        assert!(store.revisions(key).unwrap().is_empty());
    }

    #[test]
    fn conditional_update_checks_expected_status() {
        let store = MemoryStore::new();
        let sheet = sheet();
        let key = sheet.key();
        store.atomically(|tx| tx.insert(&sheet)).unwrap();

        let update = StatusUpdate {
            status: Status::Checked,
            locked: false,
            at: TimeStamp::now(),
        };
        let stale = store
            .atomically(|tx| tx.update_status(key, Status::Revision, update))
            .unwrap();
        let fresh = store
            .atomically(|tx| tx.update_status(key, Status::Pending, update))
            .unwrap();

        assert!(!stale);
        assert!(fresh);
        assert_eq!(store.checksheet(key).unwrap().unwrap().status, Status::Checked);
    }

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let store = MemoryStore::new();
        let sheet = sheet();
        store.atomically(|tx| tx.insert(&sheet)).unwrap();

        let again = store.atomically(|tx| tx.insert(&sheet));
        assert!(matches!(again, Err(WorkflowError::Conflict { .. })));
    }

    #[test]
    fn revision_numbers_follow_append_order() {
        let store = MemoryStore::new();
        let key = sheet().key();

        for note in ["a", "b", "c"] {
            store
                .atomically(|tx| tx.append_revision(key, note, UserId::new(), TimeStamp::now()))
                .unwrap();
        }

        let numbers: Vec<u64> = store
            .revisions(key)
            .unwrap()
            .iter()
            .map(|r| r.revision_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
