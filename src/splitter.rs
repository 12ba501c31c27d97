use chrono::{DateTime, Utc};
use log::info;
use rand::Rng;

use crate::error::{Result, TallyError};
use crate::lock::{new_holder_id, with_lock, ResourceKey};
use crate::models::{ArchiveReason, LockOperation, Transaction, TxnState};
use crate::paths;
use crate::store::{Store, WriteBatch, MAX_BATCH_OPS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub child_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoOutcome {
    pub archived_child_count: usize,
    /// The parent was already unsplit; nothing was written.
    pub idempotent: bool,
}

fn load_parent(store: &Store, org_id: &str, parent_id: &str) -> Result<(String, Transaction)> {
    let path = paths::transaction(org_id, parent_id);
    let parent: Transaction = store
        .get(&path)?
        .ok_or_else(|| TallyError::NotFound(path.clone()))?;
    Ok((path, parent))
}

fn new_child_id() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("split_{suffix:016x}")
}

// ---------------------------------------------------------------------------
// create_split
// ---------------------------------------------------------------------------

/// Replace `parent_id` by children carrying `amounts` (which must add up to
/// the parent's amount). Unsplit -> Split.
pub fn create_split(
    store: &Store,
    org_id: &str,
    parent_id: &str,
    amounts: &[i64],
    actor: &str,
) -> Result<SplitOutcome> {
    let key = ResourceKey::new(org_id, parent_id);
    let holder = new_holder_id(actor);
    with_lock(store, &key, LockOperation::Split, &holder, |store| {
        create_split_locked(store, org_id, parent_id, amounts)
    })
}

fn create_split_locked(
    store: &Store,
    org_id: &str,
    parent_id: &str,
    amounts: &[i64],
) -> Result<SplitOutcome> {
    let (parent_path, mut parent) = load_parent(store, org_id, parent_id)?;

    if !parent.is_active() {
        return Err(TallyError::InvalidState(format!("{parent_id} is archived")));
    }
    if parent.parent_id.is_some() {
        return Err(TallyError::InvalidState(format!(
            "{parent_id} is itself part of a split"
        )));
    }
    if parent.is_split {
        return Err(TallyError::InvalidState(format!("{parent_id} is already split")));
    }
    if amounts.is_empty() {
        return Err(TallyError::Invalid("a split needs at least one child".to_string()));
    }
    let total = amounts
        .iter()
        .try_fold(0i64, |acc, amount| acc.checked_add(*amount))
        .ok_or_else(|| TallyError::Invalid("child amounts overflow".to_string()))?;
    if total != parent.amount_minor {
        return Err(TallyError::Invalid(format!(
            "child amounts add up to {total}, parent amount is {}",
            parent.amount_minor
        )));
    }
    let needed = amounts.len() + 1;
    if needed > MAX_BATCH_OPS {
        return Err(TallyError::Capacity {
            needed,
            limit: MAX_BATCH_OPS,
        });
    }

    let mut batch = WriteBatch::new();
    let mut child_ids = Vec::with_capacity(amounts.len());
    for (i, amount) in amounts.iter().enumerate() {
        let child = Transaction {
            id: new_child_id(),
            account_id: parent.account_id.clone(),
            date: parent.date.clone(),
            description: format!("{} ({}/{})", parent.description, i + 1, amounts.len()),
            amount_minor: *amount,
            import_fingerprint: None,
            signature: None,
            is_split: false,
            split_child_ids: Vec::new(),
            parent_id: Some(parent_id.to_string()),
            ledger_ref: None,
            state: TxnState::Active,
        };
        batch.create(&paths::transaction(org_id, &child.id), &child)?;
        child_ids.push(child.id);
    }
    parent.is_split = true;
    parent.split_child_ids = child_ids.clone();
    batch.set(&parent_path, &parent)?;
    store.commit(batch)?;

    info!("split {org_id}/{parent_id} into {} children", child_ids.len());
    Ok(SplitOutcome { child_ids })
}

// ---------------------------------------------------------------------------
// undo_split
// ---------------------------------------------------------------------------

/// Archive every active child of `parent_id` and restore the parent.
/// Split -> Unsplit; calling it on an unsplit parent reports `idempotent`.
pub fn undo_split(store: &Store, org_id: &str, parent_id: &str, actor: &str) -> Result<UndoOutcome> {
    undo_split_at(store, org_id, parent_id, actor, Utc::now())
}

pub fn undo_split_at(
    store: &Store,
    org_id: &str,
    parent_id: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<UndoOutcome> {
    let key = ResourceKey::new(org_id, parent_id);
    let holder = new_holder_id(actor);
    with_lock(store, &key, LockOperation::UndoSplit, &holder, |store| {
        undo_split_locked(store, org_id, parent_id, actor, now)
    })
}

fn undo_split_locked(
    store: &Store,
    org_id: &str,
    parent_id: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<UndoOutcome> {
    let (parent_path, mut parent) = load_parent(store, org_id, parent_id)?;

    let children: Vec<(String, Transaction)> = store.query_eq(
        &paths::collection(org_id, paths::TRANSACTIONS),
        "parent_id",
        parent_id,
    )?;
    let active: Vec<(String, Transaction)> = children
        .into_iter()
        .filter(|(_, child)| child.is_active())
        .collect();

    if !parent.is_split && active.is_empty() {
        info!("{org_id}/{parent_id} is not split, nothing to undo");
        return Ok(UndoOutcome {
            archived_child_count: 0,
            idempotent: true,
        });
    }

    // One slot of the batch is reserved for the parent update.
    if active.len() > MAX_BATCH_OPS - 1 {
        return Err(TallyError::Capacity {
            needed: active.len() + 1,
            limit: MAX_BATCH_OPS,
        });
    }

    let mut batch = WriteBatch::new();
    for (path, mut child) in active {
        child.state = TxnState::Archived {
            reason: ArchiveReason::SplitUndone,
            actor: actor.to_string(),
            at: now,
        };
        batch.set(&path, &child)?;
    }
    let archived_child_count = batch.len();
    parent.is_split = false;
    parent.split_child_ids.clear();
    batch.set(&parent_path, &parent)?;
    store.commit(batch)?;

    info!("undid split of {org_id}/{parent_id}, archived {archived_child_count} children");
    Ok(UndoOutcome {
        archived_child_count,
        idempotent: false,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lock::acquire;
    use crate::store::tests::test_store;

    pub(crate) fn seed_transaction(store: &Store, org_id: &str, id: &str, amount_minor: i64) -> Transaction {
        let txn = Transaction {
            id: id.to_string(),
            account_id: "checking".to_string(),
            date: "2025-01-15".to_string(),
            description: "OFFICE DEPOT".to_string(),
            amount_minor,
            import_fingerprint: None,
            signature: None,
            is_split: false,
            split_child_ids: Vec::new(),
            parent_id: None,
            ledger_ref: None,
            state: TxnState::Active,
        };
        store.set(&paths::transaction(org_id, id), &txn).unwrap();
        txn
    }

    fn load(store: &Store, id: &str) -> Transaction {
        store.get(&paths::transaction("acme", id)).unwrap().unwrap()
    }

    #[test]
    fn test_create_split_links_children() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -10_000);
        let outcome = create_split(&store, "acme", "p1", &[-6_000, -4_000], "alice").unwrap();
        assert_eq!(outcome.child_ids.len(), 2);

        let parent = load(&store, "p1");
        assert!(parent.is_split);
        assert_eq!(parent.split_child_ids, outcome.child_ids);
        for id in &outcome.child_ids {
            let child = load(&store, id);
            assert_eq!(child.parent_id.as_deref(), Some("p1"));
            assert!(child.is_active());
        }
        assert!(crate::lock::list_locks(&store, "acme").unwrap().is_empty());
    }

    #[test]
    fn test_create_split_rejects_amount_mismatch() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -10_000);
        let err = create_split(&store, "acme", "p1", &[-6_000, -3_000], "alice").unwrap_err();
        assert!(matches!(err, TallyError::Invalid(_)));
        assert!(!load(&store, "p1").is_split);
    }

    #[test]
    fn test_create_split_rejects_overflowing_amounts() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -2);
        let amounts = [9_000_000_000_000_000_000, 9_000_000_000_000_000_000];
        let err = create_split(&store, "acme", "p1", &amounts, "alice").unwrap_err();
        assert!(matches!(err, TallyError::Invalid(_)));
        assert!(!load(&store, "p1").is_split);
        assert_eq!(store.list_paths(&paths::collection("acme", paths::TRANSACTIONS)).unwrap().len(), 1);
        assert!(crate::lock::list_locks(&store, "acme").unwrap().is_empty());
    }

    #[test]
    fn test_create_split_rejects_already_split() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -100);
        create_split(&store, "acme", "p1", &[-50, -50], "alice").unwrap();
        let err = create_split(&store, "acme", "p1", &[-100], "alice").unwrap_err();
        assert!(matches!(err, TallyError::InvalidState(_)));
    }

    #[test]
    fn test_create_split_capacity() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -50);
        let amounts = vec![-1; 50];
        let err = create_split(&store, "acme", "p1", &amounts, "alice").unwrap_err();
        assert!(matches!(err, TallyError::Capacity { needed: 51, limit: 50 }));
        assert_eq!(store.count_under("orgs/acme/transactions").unwrap(), 1);
    }

    #[test]
    fn test_create_split_missing_parent() {
        let (_dir, store) = test_store();
        let err = create_split(&store, "acme", "ghost", &[-1], "alice").unwrap_err();
        assert!(matches!(err, TallyError::NotFound(_)));
    }

    #[test]
    fn test_undo_split_twice_is_idempotent() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -9_000);
        let split = create_split(&store, "acme", "p1", &[-3_000, -3_000, -3_000], "alice").unwrap();

        let first = undo_split(&store, "acme", "p1", "bob").unwrap();
        assert_eq!(first.archived_child_count, 3);
        assert!(!first.idempotent);

        let parent = load(&store, "p1");
        assert!(!parent.is_split);
        assert!(parent.split_child_ids.is_empty());
        for id in &split.child_ids {
            match load(&store, id).state {
                TxnState::Archived { reason, actor, .. } => {
                    assert_eq!(reason, ArchiveReason::SplitUndone);
                    assert_eq!(actor, "bob");
                }
                TxnState::Active => panic!("child {id} still active"),
            }
        }

        let second = undo_split(&store, "acme", "p1", "bob").unwrap();
        assert_eq!(second.archived_child_count, 0);
        assert!(second.idempotent);
    }

    #[test]
    fn test_split_again_after_undo() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -100);
        create_split(&store, "acme", "p1", &[-60, -40], "alice").unwrap();
        undo_split(&store, "acme", "p1", "alice").unwrap();
        create_split(&store, "acme", "p1", &[-100], "alice").unwrap();
        let outcome = undo_split(&store, "acme", "p1", "alice").unwrap();
        assert_eq!(outcome.archived_child_count, 1);
    }

    #[test]
    fn test_undo_split_over_capacity_writes_nothing() {
        let (_dir, store) = test_store();
        let mut parent = seed_transaction(&store, "acme", "p1", -50);
        for i in 0..MAX_BATCH_OPS {
            let mut child = seed_transaction(&store, "acme", &format!("c{i:02}"), -1);
            child.parent_id = Some("p1".to_string());
            store.set(&paths::transaction("acme", &child.id), &child).unwrap();
            parent.split_child_ids.push(child.id);
        }
        parent.is_split = true;
        store.set(&paths::transaction("acme", "p1"), &parent).unwrap();

        let err = undo_split(&store, "acme", "p1", "bob").unwrap_err();
        assert!(matches!(err, TallyError::Capacity { needed: 51, limit: 50 }));
        assert!(load(&store, "p1").is_split);
        assert!(load(&store, "c00").is_active());
        assert!(load(&store, "c49").is_active());
        assert!(crate::lock::list_locks(&store, "acme").unwrap().is_empty());
    }

    #[test]
    fn test_undo_split_at_limit_succeeds() {
        let (_dir, store) = test_store();
        let mut parent = seed_transaction(&store, "acme", "p1", -49);
        for i in 0..MAX_BATCH_OPS - 1 {
            let mut child = seed_transaction(&store, "acme", &format!("c{i:02}"), -1);
            child.parent_id = Some("p1".to_string());
            store.set(&paths::transaction("acme", &child.id), &child).unwrap();
            parent.split_child_ids.push(child.id);
        }
        parent.is_split = true;
        store.set(&paths::transaction("acme", "p1"), &parent).unwrap();

        let outcome = undo_split(&store, "acme", "p1", "bob").unwrap();
        assert_eq!(outcome.archived_child_count, 49);
    }

    #[test]
    fn test_undo_split_is_busy_while_locked() {
        let (_dir, store) = test_store();
        seed_transaction(&store, "acme", "p1", -100);
        create_split(&store, "acme", "p1", &[-100], "alice").unwrap();

        let guard = acquire(
            &store,
            &ResourceKey::new("acme", "p1"),
            LockOperation::Split,
            "other:1",
        )
        .unwrap();
        let err = undo_split(&store, "acme", "p1", "bob").unwrap_err();
        assert!(matches!(err, TallyError::Busy { .. }));
        assert!(load(&store, "p1").is_split);
        guard.release().unwrap();

        assert_eq!(undo_split(&store, "acme", "p1", "bob").unwrap().archived_child_count, 1);
    }

    #[test]
    fn test_undo_split_missing_parent() {
        let (_dir, store) = test_store();
        let err = undo_split(&store, "acme", "ghost", "bob").unwrap_err();
        assert!(matches!(err, TallyError::NotFound(_)));
    }
}
