//! Append-only revision and approval ledgers, shared by DIR and FI
use crate::error::WorkflowError;
use crate::types::{ChecksheetId, ChecksheetKey, ChecksheetKind, RecordId, TimeStamp, UserId};
use serde::Serialize;
use std::fmt;

/// One `request-revision` cycle
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRecord {
    #[n(0)]
    pub id: RecordId,
    #[n(1)]
    pub kind: ChecksheetKind,
    #[n(2)]
    pub reference_id: ChecksheetId,
    #[n(3)]
    pub revision_number: u64, // 1, 2, 3, ... per reference
    #[n(4)]
    pub note: String,
    #[n(5)]
    pub revised_by: UserId,
    #[n(6)]
    pub created_at: TimeStamp,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalEvent {
    #[n(0)]
    Submitted,
    #[n(1)]
    Resubmitted,
    #[n(2)]
    Checked,
    #[n(3)]
    Approved,
}

impl ApprovalEvent {
    /// Note written when the actor gives none
    pub fn label(self) -> &'static str {
        match self {
            ApprovalEvent::Submitted => "submitted",
            ApprovalEvent::Resubmitted => "resubmitted",
            ApprovalEvent::Checked => "checked",
            ApprovalEvent::Approved => "approved",
        }
    }
}

impl fmt::Display for ApprovalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One submit, resubmit, check or approve action
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    #[n(0)]
    pub id: RecordId,
    #[n(1)]
    pub kind: ChecksheetKind,
    #[n(2)]
    pub reference_id: ChecksheetId,
    #[n(3)]
    pub event: ApprovalEvent,
    #[n(4)]
    pub actor_id: UserId,
    #[n(5)]
    pub acted_at: TimeStamp,
    #[n(6)]
    pub note: String,
    #[n(7)]
    pub fields_digest: String, // sha256 of the domain fields the actor saw
    #[n(8)]
    pub created_at: TimeStamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "ledger", rename_all = "camelCase")]
pub enum LedgerEntry {
    Revision(RevisionRecord),
    Approval(ApprovalRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LedgerTable {
    Revisions,
    Approvals,
}

impl LedgerTable {
    pub fn tag(self) -> u8 {
        match self {
            LedgerTable::Revisions => 0,
            LedgerTable::Approvals => 1,
        }
    }
}

/// Per-reference append cursor: how many rows exist and when the last was written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LedgerHead {
    #[n(0)]
    pub count: u64,
    #[n(1)]
    pub last_at: Option<TimeStamp>,
}

impl LedgerHead {
    /// `now`, pushed forward if needed so rows of one reference are strictly ordered in time
    pub fn next_at(&self, now: TimeStamp) -> TimeStamp {
        match self.last_at {
            Some(last) if now <= last => last.tick(),
            _ => now,
        }
    }
}

/// Storage key of a ledger row: `kind ‖ reference id ‖ sequence`, sequence big-endian
/// so a prefix scan yields rows in append order.
pub fn row_key(key: ChecksheetKey, sequence: u64) -> [u8; 25] {
    let mut out = [0u8; 25];
    out[..17].copy_from_slice(&key.prefix());
    out[17..].copy_from_slice(&sequence.to_be_bytes());
    out
}

pub fn head_key(table: LedgerTable, key: ChecksheetKey) -> [u8; 18] {
    let mut out = [0u8; 18];
    out[0] = table.tag();
    out[1..].copy_from_slice(&key.prefix());
    out
}

/// Ledger writes, only ever available inside a store transaction.
///
/// Implementors provide the raw row and head primitives; allocation of
/// sequence numbers lives in the provided `append_*` methods so every backend
/// numbers rows the same way.
pub trait LedgerWriter {
    fn head(&self, table: LedgerTable, key: ChecksheetKey) -> Result<LedgerHead, WorkflowError>;
    fn put_head(
        &self,
        table: LedgerTable,
        key: ChecksheetKey,
        head: LedgerHead,
    ) -> Result<(), WorkflowError>;
    fn put_revision(&self, sequence: u64, record: &RevisionRecord) -> Result<(), WorkflowError>;
    fn put_approval(&self, sequence: u64, record: &ApprovalRecord) -> Result<(), WorkflowError>;

    /// Appends a revision numbered `count(existing) + 1`
    fn append_revision(
        &self,
        key: ChecksheetKey,
        note: &str,
        revised_by: UserId,
        now: TimeStamp,
    ) -> Result<RevisionRecord, WorkflowError> {
        let head = self.head(LedgerTable::Revisions, key)?;
        let revision_number = head.count + 1;
        let created_at = head.next_at(now);
        let record = RevisionRecord {
            id: RecordId::new(),
            kind: key.kind,
            reference_id: key.id,
            revision_number,
            note: note.to_string(),
            revised_by,
            created_at,
        };
        self.put_revision(revision_number, &record)?;
        self.put_head(
            LedgerTable::Revisions,
            key,
            LedgerHead {
                count: revision_number,
                last_at: Some(created_at),
            },
        )?;
        Ok(record)
    }

    fn append_approval(
        &self,
        key: ChecksheetKey,
        event: ApprovalEvent,
        actor_id: UserId,
        note: &str,
        fields_digest: String,
        now: TimeStamp,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let head = self.head(LedgerTable::Approvals, key)?;
        let sequence = head.count + 1;
        let acted_at = head.next_at(now);
        let record = ApprovalRecord {
            id: RecordId::new(),
            kind: key.kind,
            reference_id: key.id,
            event,
            actor_id,
            acted_at,
            note: note.to_string(),
            fields_digest,
            created_at: acted_at,
        };
        self.put_approval(sequence, &record)?;
        self.put_head(
            LedgerTable::Approvals,
            key,
            LedgerHead {
                count: sequence,
                last_at: Some(acted_at),
            },
        )?;
        Ok(record)
    }
}

/// Read side of the ledgers; rows come back in append order
pub trait LedgerReader {
    fn revisions(&self, key: ChecksheetKey) -> Result<Vec<RevisionRecord>, WorkflowError>;
    fn approvals(&self, key: ChecksheetKey) -> Result<Vec<ApprovalRecord>, WorkflowError>;
}
