//! Checksheet approval workflow: the transition table and its enforcement.
//!
//! Every transition follows the same path: load the checksheet, ask the
//! authorizer, then open one store transaction that re-reads the status,
//! checks it against the table below, writes the new status guarded on the
//! status it just read, and appends the ledger rows. A guard miss aborts the
//! transaction with `Conflict`; nothing is retried on the caller's behalf.
//!
//! | transition           | from              | to       | ledger                  |
//! |----------------------|-------------------|----------|-------------------------|
//! | submit               | pending           | pending  | approval "submitted"    |
//! | request-revision     | pending, checked  | revision | revision N+1            |
//! | edit-during-revision | revision          | revision | none                    |
//! | resubmit             | revision          | pending  | approval "resubmitted"  |
//! | check                | pending           | checked  | approval "checked"      |
//! | approve              | checked           | approved | approval "approved"     |
use crate::authorizer::{self, Decision, Transition};
use crate::error::WorkflowError;
use crate::fields::{FieldPatch, FieldValidator, SchemaValidator};
use crate::history::{self, History};
use crate::ledger::{ApprovalEvent, LedgerEntry};
use crate::repository::StatusUpdate;
use crate::store::{Store, StoreTx};
use crate::types::{Checksheet, ChecksheetKey, Role, Status, TimeStamp, UserId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// The authenticated caller. Identity and role come from the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }
}

pub fn allowed_from(transition: Transition) -> &'static [Status] {
    match transition {
        Transition::Submit | Transition::Check => &[Status::Pending],
        Transition::RequestRevision => &[Status::Pending, Status::Checked],
        Transition::EditDuringRevision | Transition::Resubmit => &[Status::Revision],
        Transition::Approve => &[Status::Checked],
    }
}

pub fn target(transition: Transition, from: Status) -> Status {
    match transition {
        Transition::Submit | Transition::Resubmit => Status::Pending,
        Transition::RequestRevision => Status::Revision,
        Transition::EditDuringRevision => from,
        Transition::Check => Status::Checked,
        Transition::Approve => Status::Approved,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub transition: Transition,
    pub previous: Status,
    pub status: Status,
    pub checksheet: Checksheet,
    pub ledger: Vec<LedgerEntry>,
}

enum Effect {
    Approval {
        event: ApprovalEvent,
        note: Option<String>,
    },
    Revision {
        note: String,
    },
    Edit(PatchSource),
}

/// An edit as received: already typed, or a raw JSON body that is only
/// parsed once the checksheet has been found and the actor authorized.
enum PatchSource {
    Parsed(FieldPatch),
    Json(Vec<u8>),
}

impl PatchSource {
    fn resolve(&self, key: ChecksheetKey) -> Result<FieldPatch, WorkflowError> {
        let patch = match self {
            PatchSource::Parsed(patch) => patch.clone(),
            PatchSource::Json(body) => FieldPatch::from_slice(key.kind, body)?,
        };
        if patch.kind() != key.kind {
            return Err(WorkflowError::Validation(format!(
                "{} update sent for a {} checksheet",
                patch.kind(),
                key.kind
            )));
        }
        if patch.is_empty() {
            return Err(WorkflowError::Validation("update contains no fields".into()));
        }
        Ok(patch)
    }
}

pub struct WorkflowEngine<S> {
    store: Arc<S>,
    validator: Arc<dyn FieldValidator>,
}

impl<S: Store> WorkflowEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_validator(store, Arc::new(SchemaValidator))
    }

    pub fn with_validator(store: Arc<S>, validator: Arc<dyn FieldValidator>) -> Self {
        Self { store, validator }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stores a newly created checksheet. Creation itself belongs to the
    /// inspector-facing CRUD service; this is the hand-off point.
    pub fn register(&self, checksheet: Checksheet) -> Result<Checksheet, WorkflowError> {
        if checksheet.status != Status::Pending || checksheet.locked || checksheet.is_deleted() {
            return Err(WorkflowError::Validation(
                "new checksheets must start pending, unlocked and live".into(),
            ));
        }
        self.validator.validate(&checksheet.fields)?;
        self.store.atomically(|tx| tx.insert(&checksheet))?;
        info!(
            key = %checksheet.key(),
            code = %checksheet.code,
            owner = %checksheet.owner_id,
            "checksheet registered"
        );
        Ok(checksheet)
    }

    /// Current live checksheet
    pub fn checksheet(&self, key: ChecksheetKey) -> Result<Checksheet, WorkflowError> {
        self.store
            .checksheet(key)?
            .filter(|sheet| !sheet.is_deleted())
            .ok_or(WorkflowError::NotFound(key))
    }

    pub fn history(&self, key: ChecksheetKey) -> Result<History, WorkflowError> {
        history::assemble(self.store.as_ref(), key)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key, actor = %actor.id))]
    pub fn submit(
        &self,
        key: ChecksheetKey,
        actor: Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let effect = Effect::Approval {
            event: ApprovalEvent::Submitted,
            note: None,
        };
        self.run(key, actor, Transition::Submit, effect)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key, actor = %actor.id))]
    pub fn request_revision(
        &self,
        key: ChecksheetKey,
        actor: Actor,
        note: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let note = note.trim();
        if note.is_empty() {
            return Err(WorkflowError::Validation(
                "revisionNote is required and must not be blank".into(),
            ));
        }
        let effect = Effect::Revision {
            note: note.to_string(),
        };
        self.run(key, actor, Transition::RequestRevision, effect)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key, actor = %actor.id))]
    pub fn edit_during_revision(
        &self,
        key: ChecksheetKey,
        actor: Actor,
        patch: FieldPatch,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let effect = Effect::Edit(PatchSource::Parsed(patch));
        self.run(key, actor, Transition::EditDuringRevision, effect)
    }

    /// `edit_during_revision` for an unparsed JSON body. A malformed body is
    /// reported only after the lookup and role checks have passed.
    #[instrument(level = "debug", skip_all, fields(key = %key, actor = %actor.id))]
    pub fn edit_during_revision_json(
        &self,
        key: ChecksheetKey,
        actor: Actor,
        body: &[u8],
    ) -> Result<TransitionOutcome, WorkflowError> {
        let effect = Effect::Edit(PatchSource::Json(body.to_vec()));
        self.run(key, actor, Transition::EditDuringRevision, effect)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key, actor = %actor.id))]
    pub fn resubmit(
        &self,
        key: ChecksheetKey,
        actor: Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let effect = Effect::Approval {
            event: ApprovalEvent::Resubmitted,
            note: None,
        };
        self.run(key, actor, Transition::Resubmit, effect)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key, actor = %actor.id))]
    pub fn check(
        &self,
        key: ChecksheetKey,
        actor: Actor,
        note: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let effect = Effect::Approval {
            event: ApprovalEvent::Checked,
            note: optional_note(note),
        };
        self.run(key, actor, Transition::Check, effect)
    }

    #[instrument(level = "debug", skip_all, fields(key = %key, actor = %actor.id))]
    pub fn approve(
        &self,
        key: ChecksheetKey,
        actor: Actor,
        note: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let effect = Effect::Approval {
            event: ApprovalEvent::Approved,
            note: optional_note(note),
        };
        self.run(key, actor, Transition::Approve, effect)
    }

    fn run(
        &self,
        key: ChecksheetKey,
        actor: Actor,
        transition: Transition,
        effect: Effect,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let current = self.checksheet(key)?;

        let is_owner = current.owner_id == actor.id;
        if let Decision::Denied(reason) = authorizer::authorize(actor.role, transition, is_owner) {
            warn!(
                %key,
                %transition,
                actor = %actor.id,
                role = %actor.role,
                %reason,
                "transition denied"
            );
            return Err(WorkflowError::Authorization(format!(
                "{transition} on {key}: {reason}"
            )));
        }

        let outcome = self
            .store
            .atomically(|tx| self.apply(tx, key, actor, transition, &effect));

        match &outcome {
            Ok(done) => info!(
                %key,
                %transition,
                actor = %actor.id,
                from = %done.previous,
                to = %done.status,
                "transition committed"
            ),
            Err(err @ WorkflowError::Persistence(_)) => {
                error!(%key, %transition, %err, "transition failed")
            }
            Err(err) => warn!(%key, %transition, %err, "transition rejected"),
        }
        outcome
    }

    /// Body of the transaction. May run more than once, so it re-reads everything.
    fn apply(
        &self,
        tx: &dyn StoreTx,
        key: ChecksheetKey,
        actor: Actor,
        transition: Transition,
        effect: &Effect,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let sheet = tx
            .find(key)?
            .filter(|sheet| !sheet.is_deleted())
            .ok_or(WorkflowError::NotFound(key))?;

        let previous = sheet.status;
        if !allowed_from(transition).contains(&previous) {
            return Err(WorkflowError::conflict(
                key,
                format!("cannot {transition} while {previous}"),
            ));
        }
        if transition == Transition::Submit && sheet.locked {
            return Err(WorkflowError::conflict(key, "already submitted"));
        }

        let now = TimeStamp::now();
        let status = target(transition, previous);
        let mut ledger = Vec::new();

        match effect {
            Effect::Edit(source) => {
                let patch = source.resolve(key)?;
                let fields = patch.apply(&sheet.fields)?;
                self.validator.validate(&fields)?;
                if !tx.update_fields(key, previous, &fields, now)? {
                    return Err(lost_race(key, previous));
                }
            }
            Effect::Revision { note } => {
                let update = StatusUpdate {
                    status,
                    locked: false,
                    at: now,
                };
                if !tx.update_status(key, previous, update)? {
                    return Err(lost_race(key, previous));
                }
                let record = tx.append_revision(key, note, actor.id, now)?;
                ledger.push(LedgerEntry::Revision(record));
            }
            Effect::Approval { event, note } => {
                let locked = match event {
                    ApprovalEvent::Submitted | ApprovalEvent::Resubmitted => true,
                    ApprovalEvent::Checked | ApprovalEvent::Approved => sheet.locked,
                };
                let update = StatusUpdate {
                    status,
                    locked,
                    at: now,
                };
                if !tx.update_status(key, previous, update)? {
                    return Err(lost_race(key, previous));
                }
                let note = note.as_deref().unwrap_or(event.label());
                let digest = sheet.fields.digest()?;
                let record = tx.append_approval(key, *event, actor.id, note, digest, now)?;
                ledger.push(LedgerEntry::Approval(record));
            }
        }

        let checksheet = tx.find(key)?.ok_or(WorkflowError::NotFound(key))?;
        Ok(TransitionOutcome {
            transition,
            previous,
            status: checksheet.status,
            checksheet,
            ledger,
        })
    }
}

fn optional_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|note| !note.is_empty())
        .map(str::to_string)
}

fn lost_race(key: ChecksheetKey, expected: Status) -> WorkflowError {
    WorkflowError::conflict(key, format!("status changed concurrently (expected {expected})"))
}
