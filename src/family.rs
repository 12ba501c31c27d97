use log::{debug, info};

use crate::error::{Result, TallyError};
use crate::models::{ImportJob, Transaction};
use crate::paths;
use crate::store::{Store, MAX_BATCH_OPS};

/// Import job kinds that belong to the movements family.
pub const RECOGNIZED_JOB_KINDS: &[&str] = &["bank_statement", "movements"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemittanceIds {
    pub id: String,
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportJobRef {
    pub id: String,
    pub kind: String,
}

/// Identifiers of every dependent record, fetched ahead of planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyIds {
    pub transactions: Vec<String>,
    pub remittances: Vec<RemittanceIds>,
    pub prebank_remittances: Vec<String>,
    pub pending_documents: Vec<String>,
    pub import_runs: Vec<String>,
    pub import_jobs: Vec<ImportJobRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFamilyPlan {
    pub org_id: String,
    pub paths: Vec<String>,
    pub total: usize,
}

impl DeleteFamilyPlan {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub batches: usize,
    /// The plan had nothing to remove.
    pub already_empty: bool,
}

fn ids_in(store: &Store, collection: &str) -> Result<Vec<String>> {
    Ok(store
        .list_paths(collection)?
        .iter()
        .map(|p| paths::id_of(p).to_string())
        .collect())
}

/// Fetch the ids `build_plan` needs. Refuses while any transaction is still
/// linked to an external ledger.
pub fn collect_family(store: &Store, org_id: &str) -> Result<FamilyIds> {
    let txns: Vec<(String, Transaction)> =
        store.list(&paths::collection(org_id, paths::TRANSACTIONS))?;
    let linked = txns.iter().filter(|(_, t)| t.ledger_ref.is_some()).count();
    if linked > 0 {
        return Err(TallyError::LedgerLinked(linked));
    }

    let mut remittances = Vec::new();
    for id in ids_in(store, &paths::collection(org_id, paths::REMITTANCES))? {
        let item_ids = ids_in(store, &paths::remittance_items(org_id, &id))?;
        remittances.push(RemittanceIds { id, item_ids });
    }

    let jobs: Vec<(String, ImportJob)> =
        store.list(&paths::collection(org_id, paths::IMPORT_JOBS))?;

    Ok(FamilyIds {
        transactions: txns.into_iter().map(|(_, t)| t.id).collect(),
        remittances,
        prebank_remittances: ids_in(store, &paths::collection(org_id, paths::PREBANK_REMITTANCES))?,
        pending_documents: ids_in(store, &paths::collection(org_id, paths::PENDING_DOCUMENTS))?,
        import_runs: ids_in(store, &paths::collection(org_id, paths::IMPORT_RUNS))?,
        import_jobs: jobs
            .into_iter()
            .map(|(_, job)| ImportJobRef {
                id: job.id,
                kind: job.kind,
            })
            .collect(),
    })
}

/// Flat, ordered list of every path to remove. Nested items come before the
/// remittance that owns them. Pure.
pub fn build_plan(org_id: &str, ids: &FamilyIds) -> DeleteFamilyPlan {
    let mut out = Vec::new();
    out.extend(ids.transactions.iter().map(|id| paths::transaction(org_id, id)));
    for rem in &ids.remittances {
        out.extend(
            rem.item_ids
                .iter()
                .map(|item| paths::remittance_item(org_id, &rem.id, item)),
        );
        out.push(paths::remittance(org_id, &rem.id));
    }
    out.extend(
        ids.prebank_remittances
            .iter()
            .map(|id| paths::doc(org_id, paths::PREBANK_REMITTANCES, id)),
    );
    out.extend(
        ids.pending_documents
            .iter()
            .map(|id| paths::doc(org_id, paths::PENDING_DOCUMENTS, id)),
    );
    out.extend(ids.import_runs.iter().map(|id| paths::import_run(org_id, id)));
    out.extend(
        ids.import_jobs
            .iter()
            .filter(|job| RECOGNIZED_JOB_KINDS.contains(&job.kind.as_str()))
            .map(|job| paths::doc(org_id, paths::IMPORT_JOBS, &job.id)),
    );

    DeleteFamilyPlan {
        org_id: org_id.to_string(),
        total: out.len(),
        paths: out,
    }
}

/// Remove the plan's paths in chunks of at most `max_batch_size`, one
/// `delete_batch` call per chunk, strictly one after another. `delete_batch`
/// returns how many paths it actually removed.
pub fn execute_plan<F>(
    plan: &DeleteFamilyPlan,
    mut delete_batch: F,
    max_batch_size: usize,
) -> Result<DeleteOutcome>
where
    F: FnMut(&[String]) -> Result<usize>,
{
    if max_batch_size == 0 || max_batch_size > MAX_BATCH_OPS {
        return Err(TallyError::Invalid(format!(
            "batch size must be between 1 and {MAX_BATCH_OPS}, got {max_batch_size}"
        )));
    }
    if plan.is_empty() {
        info!("movements family of {} is already empty", plan.org_id);
        return Ok(DeleteOutcome {
            deleted: 0,
            batches: 0,
            already_empty: true,
        });
    }

    let mut deleted = 0usize;
    let mut batches = 0usize;
    for chunk in plan.paths.chunks(max_batch_size) {
        let removed = delete_batch(chunk)?;
        batches += 1;
        deleted += removed;
        debug!("chunk {batches}: removed {removed} of {} paths", chunk.len());
    }

    info!(
        "deleted {deleted} records of {}'s movements family in {batches} batches",
        plan.org_id
    );
    Ok(DeleteOutcome {
        deleted,
        batches,
        already_empty: false,
    })
}

/// Collect, plan and execute against `store`.
pub fn delete_family(store: &Store, org_id: &str, max_batch_size: usize) -> Result<DeleteOutcome> {
    let ids = collect_family(store, org_id)?;
    let plan = build_plan(org_id, &ids);
    execute_plan(&plan, |chunk| store.delete_batch(chunk), max_batch_size)
}
