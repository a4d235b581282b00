use anyhow::Context;
use checksheet_approval::{
    Actor, WorkflowEngine,
    error::ErrorKind,
    fields::{ChecksheetFields, DirFields, DirPatch, FieldPatch},
    ledger::{ApprovalEvent, LedgerEntry, LedgerReader},
    store::SledStore,
    types::{Checksheet, ChecksheetId, ChecksheetKey, Role, Status, UserId},
};
use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::tempdir; // Use for test db cleanup.

fn dir_fields() -> ChecksheetFields {
    ChecksheetFields::Dir(DirFields {
        model: "K1ZA".into(),
        part_number: "52100-K1Z".into(),
        customer: "ACME Motor".into(),
        shift: "A".into(),
        section: "Press".into(),
        lot_number: "L-2404-01".into(),
        remarks: None,
    })
}

struct Crew {
    inspector: Actor,
    supervisor: Actor,
    operator: Actor,
}

impl Crew {
    fn new() -> Self {
        Self {
            inspector: Actor::new(UserId::new(), Role::Inspector),
            supervisor: Actor::new(UserId::new(), Role::Supervisor),
            operator: Actor::new(UserId::new(), Role::Operator),
        }
    }
}

// sled takes a file lock, so every test opens its own database under a tempdir
fn engine_in(dir: &tempfile::TempDir, name: &str) -> anyhow::Result<WorkflowEngine<SledStore>> {
    let db = sled::open(dir.path().join(name))?;
    let store = SledStore::new(Arc::new(db))?;
    Ok(WorkflowEngine::new(Arc::new(store)))
}

#[test]
fn full_review_cycle() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let engine = engine_in(&temp_dir, "full_review_cycle.db")?;
    let crew = Crew::new();

    let sheet = engine.register(Checksheet::new("DIR-0001", crew.inspector.id, dir_fields()))?;
    let key = sheet.key();
    assert_eq!(sheet.status, Status::Pending);

    let done = engine
        .submit(key, crew.inspector)
        .context("submit failed: ")?;
    assert_eq!(done.status, Status::Pending);
    assert!(done.checksheet.locked);
    assert_eq!(engine.store().approvals(key)?.len(), 1);
    assert_eq!(engine.store().approvals(key)?[0].note, "submitted");

    let done = engine
        .request_revision(key, crew.supervisor, "fix dim #3")
        .context("request-revision failed: ")?;
    assert_eq!(done.status, Status::Revision);
    let LedgerEntry::Revision(revision) = &done.ledger[0] else {
        panic!("request-revision must write a revision record");
    };
    assert_eq!(revision.revision_number, 1);
    assert_eq!(revision.note, "fix dim #3");
    assert_eq!(revision.revised_by, crew.supervisor.id);

    let patch = FieldPatch::Dir(DirPatch {
        lot_number: Some("L-2404-02".into()),
        ..Default::default()
    });
    let done = engine
        .edit_during_revision(key, crew.operator, patch)
        .context("edit failed: ")?;
    assert_eq!(done.status, Status::Revision);
    assert!(done.ledger.is_empty());
    let ChecksheetFields::Dir(fields) = &done.checksheet.fields else {
        panic!("kind changed");
    };
    assert_eq!(fields.lot_number, "L-2404-02");

    let done = engine.resubmit(key, crew.inspector)?;
    assert_eq!(done.status, Status::Pending);

    let done = engine.check(key, crew.supervisor, None)?;
    assert_eq!(done.status, Status::Checked);

    let done = engine.approve(key, crew.supervisor, None)?;
    assert_eq!(done.status, Status::Approved);

    let history = engine.history(key)?;
    let notes: Vec<&str> = history
        .approval_history
        .iter()
        .map(|a| a.note.as_str())
        .collect();
    assert_eq!(notes, vec!["submitted", "resubmitted", "checked", "approved"]);
    assert_eq!(history.revision_history.len(), 1);
    assert_eq!(history.checksheet.status, Status::Approved);

    // the approval digest covers the edited fields, the submit digest the originals
    assert_ne!(
        history.approval_history[0].fields_digest,
        history.approval_history[3].fields_digest
    );

    Ok(())
}

#[test]
fn inspector_cannot_check_own_dir() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let engine = engine_in(&temp_dir, "inspector_check.db")?;
    let crew = Crew::new();

    let key = engine
        .register(Checksheet::new("DIR-0002", crew.inspector.id, dir_fields()))?
        .key();

    let err = engine.check(key, crew.inspector, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(engine.checksheet(key)?.status, Status::Pending);

    Ok(())
}

#[test]
fn check_during_revision_conflicts() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let engine = engine_in(&temp_dir, "check_in_revision.db")?;
    let crew = Crew::new();

    let key = engine
        .register(Checksheet::new("DIR-0003", crew.inspector.id, dir_fields()))?
        .key();
    engine.request_revision(key, crew.supervisor, "wrong gauge")?;

    let err = engine.check(key, crew.supervisor, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(
        engine
            .store()
            .approvals(key)?
            .iter()
            .all(|a| a.event != ApprovalEvent::Checked)
    );

    Ok(())
}

#[test]
fn empty_revision_note_is_invalid() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let engine = engine_in(&temp_dir, "empty_note.db")?;
    let crew = Crew::new();

    let key = engine
        .register(Checksheet::new("DIR-0004", crew.inspector.id, dir_fields()))?
        .key();

    for note in ["", "   ", "\n\t"] {
        let err = engine.request_revision(key, crew.supervisor, note).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert!(engine.store().revisions(key)?.is_empty());
    assert_eq!(engine.checksheet(key)?.status, Status::Pending);

    Ok(())
}

#[test]
fn submit_on_unknown_id_is_not_found() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let engine = engine_in(&temp_dir, "unknown_id.db")?;
    let crew = Crew::new();

    let nil: ChecksheetId = "00000000-0000-0000-0000-000000000000"
        .parse()
        .map_err(anyhow::Error::msg)?;
    let err = engine
        .submit(ChecksheetKey::dir(nil), crew.inspector)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    Ok(())
}

#[test]
fn simultaneous_approvals_write_one_record() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let engine = Arc::new(engine_in(&temp_dir, "double_approve.db")?);
    let crew = Crew::new();

    let key = engine
        .register(Checksheet::new("DIR-0007", crew.inspector.id, dir_fields()))?
        .key();
    engine.submit(key, crew.inspector)?;
    engine.check(key, crew.supervisor, None)?;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let supervisor = crew.supervisor;
            thread::spawn(move || {
                barrier.wait();
                engine.approve(key, supervisor, None)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("approver panicked"))
        .collect();

    let approved = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Conflict))
        .count();
    assert_eq!((approved, conflicts), (1, 1));

    let approvals = engine.store().approvals(key)?;
    assert_eq!(
        approvals
            .iter()
            .filter(|a| a.event == ApprovalEvent::Approved)
            .count(),
        1
    );
    assert_eq!(engine.checksheet(key)?.status, Status::Approved);

    Ok(())
}

#[test]
fn dir_and_fi_ledgers_do_not_mix() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let engine = engine_in(&temp_dir, "kinds.db")?;
    let crew = Crew::new();

    let dir = engine
        .register(Checksheet::new("DIR-0005", crew.inspector.id, dir_fields()))?
        .key();
    engine.request_revision(dir, crew.supervisor, "one")?;
    engine.resubmit(dir, crew.inspector)?;
    engine.request_revision(dir, crew.supervisor, "two")?;

    // same id under the other kind names a different (absent) checksheet
    let fi = ChecksheetKey::fi(dir.id);
    assert_eq!(
        engine.submit(fi, crew.inspector).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(engine.store().revisions(fi)?.is_empty());
    assert_eq!(engine.history(dir)?.current_revision, 2);

    Ok(())
}

#[test]
fn ledgers_survive_reopen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join("reopen.db");
    let crew = Crew::new();

    let key = {
        let store = SledStore::open(&path)?;
        let engine = WorkflowEngine::new(Arc::new(store));
        let key = engine
            .register(Checksheet::new("DIR-0006", crew.inspector.id, dir_fields()))?
            .key();
        engine.submit(key, crew.inspector)?;
        engine.request_revision(key, crew.supervisor, "first")?;
        engine.store().flush()?;
        key
    };

    let engine = WorkflowEngine::new(Arc::new(SledStore::open(&path)?));
    engine.resubmit(key, crew.inspector)?;
    let done = engine.request_revision(key, crew.supervisor, "second")?;

    let LedgerEntry::Revision(revision) = &done.ledger[0] else {
        panic!("expected a revision record");
    };
    assert_eq!(revision.revision_number, 2);
    assert_eq!(engine.history(key)?.approval_history.len(), 2);

    Ok(())
}
