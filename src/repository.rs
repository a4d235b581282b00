//! Checksheet persistence inside a store transaction
use crate::error::WorkflowError;
use crate::fields::ChecksheetFields;
use crate::types::{Checksheet, ChecksheetKey, Status, TimeStamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: Status,
    pub locked: bool,
    pub at: TimeStamp,
}

/// Row access for the `dirs` and `fis` tables.
///
/// Backends implement `find` and `put`; the conditional writes are built on
/// top and are only sound when called within one transaction, which is the
/// only place the engine calls them.
pub trait ChecksheetRepository {
    fn find(&self, key: ChecksheetKey) -> Result<Option<Checksheet>, WorkflowError>;
    fn put(&self, checksheet: &Checksheet) -> Result<(), WorkflowError>;

    /// Stores a new checksheet; an existing row with the same id is a conflict
    fn insert(&self, checksheet: &Checksheet) -> Result<(), WorkflowError> {
        let key = checksheet.key();
        if self.find(key)?.is_some() {
            return Err(WorkflowError::conflict(key, "checksheet already exists"));
        }
        self.put(checksheet)
    }

    /// Writes `update` only if the row is live and its status is still `expected`.
    /// Returns `false` (nothing written) otherwise.
    fn update_status(
        &self,
        key: ChecksheetKey,
        expected: Status,
        update: StatusUpdate,
    ) -> Result<bool, WorkflowError> {
        let Some(mut current) = self.find(key)? else {
            return Ok(false);
        };
        if current.is_deleted() || current.status != expected {
            return Ok(false);
        }
        current.status = update.status;
        current.locked = update.locked;
        current.updated_at = update.at;
        self.put(&current)?;
        Ok(true)
    }

    /// Replaces the domain fields under the same guard as `update_status`
    fn update_fields(
        &self,
        key: ChecksheetKey,
        expected: Status,
        fields: &ChecksheetFields,
        at: TimeStamp,
    ) -> Result<bool, WorkflowError> {
        let Some(mut current) = self.find(key)? else {
            return Ok(false);
        };
        if current.is_deleted() || current.status != expected {
            return Ok(false);
        }
        if fields.kind() != key.kind {
            return Err(WorkflowError::Validation(format!(
                "{} fields cannot be stored in the {} table",
                fields.kind(),
                key.kind
            )));
        }
        current.fields = fields.clone();
        current.updated_at = at;
        self.put(&current)?;
        Ok(true)
    }
}
