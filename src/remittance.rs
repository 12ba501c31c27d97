use chrono::Utc;
use log::info;
use rand::Rng;

use crate::error::{Result, TallyError};
use crate::lock::{new_holder_id, with_lock, ResourceKey};
use crate::models::{LockOperation, PendingDocument, PendingItem, PrebankRemittance, Remittance};
use crate::paths;
use crate::store::{Store, WriteBatch, MAX_BATCH_OPS};

/// Each bundled document costs two writes (item + document link), plus one
/// for the remittance itself.
pub const MAX_REMITTANCE_DOCUMENTS: usize = (MAX_BATCH_OPS - 1) / 2;

const REMITTANCE_RESOURCE: &str = "remittance";

fn random_id(prefix: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("{prefix}_{suffix:016x}")
}

pub fn add_pending_document(
    store: &Store,
    org_id: &str,
    description: &str,
    amount_minor: i64,
    due_date: Option<&str>,
) -> Result<PendingDocument> {
    let doc = PendingDocument {
        id: random_id("doc"),
        description: description.trim().to_string(),
        amount_minor,
        due_date: due_date.map(str::to_string),
        remittance_id: None,
        created_at: Utc::now(),
    };
    store.set(&paths::doc(org_id, paths::PENDING_DOCUMENTS, &doc.id), &doc)?;
    Ok(doc)
}

/// Bundle unremitted pending documents into a new remittance. Returns `None`
/// when there is nothing to remit. Documents beyond
/// [`MAX_REMITTANCE_DOCUMENTS`] stay pending for the next run.
pub fn generate_remittance(store: &Store, org_id: &str, actor: &str) -> Result<Option<Remittance>> {
    let key = ResourceKey::new(org_id, REMITTANCE_RESOURCE);
    let holder = new_holder_id(actor);
    with_lock(store, &key, LockOperation::Remittance, &holder, |store| {
        generate_locked(store, org_id, actor)
    })
}

fn generate_locked(store: &Store, org_id: &str, actor: &str) -> Result<Option<Remittance>> {
    let docs: Vec<(String, PendingDocument)> =
        store.list(&paths::collection(org_id, paths::PENDING_DOCUMENTS))?;
    let mut unremitted: Vec<(String, PendingDocument)> = docs
        .into_iter()
        .filter(|(_, doc)| doc.remittance_id.is_none())
        .collect();
    if unremitted.is_empty() {
        return Ok(None);
    }
    if unremitted.len() > MAX_REMITTANCE_DOCUMENTS {
        info!(
            "{} pending documents, remitting the first {MAX_REMITTANCE_DOCUMENTS}",
            unremitted.len()
        );
        unremitted.truncate(MAX_REMITTANCE_DOCUMENTS);
    }

    let total_minor = unremitted
        .iter()
        .try_fold(0i64, |acc, (_, doc)| acc.checked_add(doc.amount_minor))
        .ok_or_else(|| TallyError::Invalid("pending document amounts overflow".to_string()))?;

    let remittance = Remittance {
        id: random_id("rem"),
        created_at: Utc::now(),
        created_by: actor.to_string(),
        total_minor,
        item_count: unremitted.len(),
    };

    let mut batch = WriteBatch::new();
    batch.create(&paths::remittance(org_id, &remittance.id), &remittance)?;
    for (i, (path, mut doc)) in unremitted.into_iter().enumerate() {
        let item = PendingItem {
            id: format!("item_{i:03}"),
            document_id: doc.id.clone(),
            amount_minor: doc.amount_minor,
        };
        batch.create(&paths::remittance_item(org_id, &remittance.id, &item.id), &item)?;
        doc.remittance_id = Some(remittance.id.clone());
        batch.set(&path, &doc)?;
    }
    store.commit(batch)?;

    info!(
        "generated remittance {} with {} items for {org_id}",
        remittance.id, remittance.item_count
    );
    Ok(Some(remittance))
}

/// Stage a remittance for the bank. Staging the same remittance twice
/// returns the existing record.
pub fn stage_prebank(store: &Store, org_id: &str, remittance_id: &str) -> Result<PrebankRemittance> {
    let rem_path = paths::remittance(org_id, remittance_id);
    let remittance: Remittance = store
        .get(&rem_path)?
        .ok_or_else(|| TallyError::NotFound(rem_path.clone()))?;

    let prebank = PrebankRemittance {
        id: format!("pre_{remittance_id}"),
        remittance_id: remittance.id,
        total_minor: remittance.total_minor,
        created_at: Utc::now(),
    };
    let path = paths::doc(org_id, paths::PREBANK_REMITTANCES, &prebank.id);
    if store.create(&path, &prebank)? {
        Ok(prebank)
    } else {
        store
            .get(&path)?
            .ok_or_else(|| TallyError::NotFound(path.clone()))
    }
}

pub fn list_remittances(store: &Store, org_id: &str) -> Result<Vec<Remittance>> {
    let rows: Vec<(String, Remittance)> = store.list(&paths::collection(org_id, paths::REMITTANCES))?;
    Ok(rows.into_iter().map(|(_, r)| r).collect())
}
