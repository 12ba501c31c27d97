pub const TRANSACTIONS: &str = "transactions";
pub const REMITTANCES: &str = "remittances";
pub const REMITTANCE_ITEMS: &str = "items";
pub const PREBANK_REMITTANCES: &str = "prebank_remittances";
pub const PENDING_DOCUMENTS: &str = "pending_documents";
pub const IMPORT_RUNS: &str = "import_runs";
pub const IMPORT_JOBS: &str = "import_jobs";
pub const PROCESS_LOCKS: &str = "process_locks";

/// Root under which every record of `org_id` lives.
pub fn org(org_id: &str) -> String {
    format!("orgs/{org_id}")
}

pub fn collection(org_id: &str, name: &str) -> String {
    format!("{}/{name}", org(org_id))
}

pub fn doc(org_id: &str, name: &str, id: &str) -> String {
    format!("orgs/{org_id}/{name}/{id}")
}

pub fn transaction(org_id: &str, id: &str) -> String {
    doc(org_id, TRANSACTIONS, id)
}

pub fn remittance(org_id: &str, id: &str) -> String {
    doc(org_id, REMITTANCES, id)
}

pub fn remittance_items(org_id: &str, remittance_id: &str) -> String {
    format!("{}/{REMITTANCE_ITEMS}", remittance(org_id, remittance_id))
}

pub fn remittance_item(org_id: &str, remittance_id: &str, item_id: &str) -> String {
    format!("{}/{item_id}", remittance_items(org_id, remittance_id))
}

pub fn import_run(org_id: &str, fingerprint: &str) -> String {
    doc(org_id, IMPORT_RUNS, fingerprint)
}

/// Parent collection of a document path (everything before the last `/`).
pub fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Last segment of a document path.
pub fn id_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, id)| id).unwrap_or(path)
}
