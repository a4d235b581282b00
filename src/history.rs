//! Audit trail view: checksheet snapshot plus both ledgers in time order
use crate::error::WorkflowError;
use crate::ledger::{ApprovalRecord, RevisionRecord};
use crate::store::Store;
use crate::types::{Checksheet, ChecksheetKey};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub checksheet: Checksheet,
    pub revision_history: Vec<RevisionRecord>,
    pub approval_history: Vec<ApprovalRecord>,
    pub current_revision: u64,
}

/// Read-only; takes no locks. Soft-deleted checksheets are reported as not found.
pub fn assemble<S: Store>(store: &S, key: ChecksheetKey) -> Result<History, WorkflowError> {
    let checksheet = store
        .checksheet(key)?
        .filter(|sheet| !sheet.is_deleted())
        .ok_or(WorkflowError::NotFound(key))?;

    let mut revision_history = store.revisions(key)?;
    // stable: rows sharing a timestamp keep their append order
    revision_history.sort_by_key(|r| (r.created_at, r.revision_number));

    let mut approval_history = store.approvals(key)?;
    approval_history.sort_by_key(|a| a.acted_at);

    let current_revision = revision_history
        .iter()
        .map(|r| r.revision_number)
        .max()
        .unwrap_or(0);

    Ok(History {
        checksheet,
        revision_history,
        approval_history,
        current_revision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Actor, WorkflowEngine};
    use crate::fields::{ChecksheetFields, FiFields};
    use crate::ledger::ApprovalEvent;
    use crate::store::MemoryStore;
    use crate::types::{Role, UserId};
    use std::sync::Arc;

    fn fi(owner: UserId) -> Checksheet {
        Checksheet::new(
            "FI-0001",
            owner,
            ChecksheetFields::Fi(FiFields {
                model: "K1ZA".into(),
                part_number: "PN-100".into(),
                customer: "ACME".into(),
                material: "SPCC".into(),
                delivery_order: "DO-7".into(),
                checked_quantity: 120,
                ng_quantity: 2,
                remarks: None,
            }),
        )
    }

    #[test]
    fn ledgers_come_back_in_time_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = WorkflowEngine::new(store.clone());
        let inspector = Actor::new(UserId::new(), Role::Inspector);
        let supervisor = Actor::new(UserId::new(), Role::Supervisor);

        let key = engine.register(fi(inspector.id)).unwrap().key();
        engine.submit(key, inspector).unwrap();
        for round in 1..=3 {
            engine
                .request_revision(key, supervisor, &format!("round {round}"))
                .unwrap();
            engine.resubmit(key, inspector).unwrap();
        }
        engine.check(key, supervisor, None).unwrap();
        engine.approve(key, supervisor, None).unwrap();

        let history = assemble(store.as_ref(), key).unwrap();

        assert_eq!(history.current_revision, 3);
        assert!(
            history
                .revision_history
                .windows(2)
                .all(|w| w[0].created_at < w[1].created_at)
        );
        assert!(
            history
                .approval_history
                .windows(2)
                .all(|w| w[0].acted_at < w[1].acted_at)
        );

        let events: Vec<ApprovalEvent> = history.approval_history.iter().map(|a| a.event).collect();
        assert_eq!(
            events,
            vec![
                ApprovalEvent::Submitted,
                ApprovalEvent::Resubmitted,
                ApprovalEvent::Resubmitted,
                ApprovalEvent::Resubmitted,
                ApprovalEvent::Checked,
                ApprovalEvent::Approved,
            ]
        );
    }

    #[test]
    fn unknown_checksheet_is_not_found() {
        let store = MemoryStore::new();
        let key = fi(UserId::new()).key();

        assert!(matches!(
            assemble(&store, key),
            Err(WorkflowError::NotFound(k)) if k == key
        ));
    }
}
