use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use log::{info, warn};
use rand::Rng;
use serde::Deserialize;

use crate::error::{Result, TallyError};
use crate::fingerprint::{assign_ids, import_hash};
use crate::models::{
    CanonicalTransactionRow, Counterparty, ImportBatch, ImportJob, ImportRun, PreparedRow,
    RunStatus, SourceKind, Transaction, TxnKind,
};
use crate::paths;
use crate::store::{Store, WriteBatch, MAX_BATCH_OPS};

/// Job kind recorded for every statement import.
pub const BANK_STATEMENT_JOB: &str = "bank_statement";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a decimal amount into integer minor units without going through a
/// float. Accepts thousands separators, a `$`, quotes and `(…)` negatives.
/// More than two decimal places is rejected rather than rounded.
pub fn parse_minor_units(raw: &str) -> Option<i64> {
    let s = raw.replace(&[',', '"', '$'][..], "");
    let s = s.trim();
    let (negative, s) = if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        (true, inner.trim())
    } else if let Some(rest) = s.strip_prefix('-') {
        (true, rest.trim())
    } else {
        (false, s.strip_prefix('+').unwrap_or(s))
    };

    let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
        || frac_part.len() > 2
    {
        return None;
    }
    let units: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let cents: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };
    let total = units.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -total } else { total })
}

pub fn parse_date_mdy(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let m: u32 = parts[0].parse().ok()?;
    let d: u32 = parts[1].parse().ok()?;
    let y: i32 = parts[2].parse().ok()?;
    chrono::NaiveDate::from_ymd_opt(y, m, d).map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// ISO `YYYY-MM-DD` or US `MM/DD/YYYY`, normalized to ISO.
pub fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    parse_date_mdy(raw)
}

fn new_job_id() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("job_{suffix:016x}")
}

// ---------------------------------------------------------------------------
// Canonical CSV reader
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    description: String,
    amount: String,
    #[serde(default)]
    balance: Option<String>,
    #[serde(default)]
    operation_date: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    counterparty_id: Option<String>,
    #[serde(default)]
    counterparty_kind: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read already-canonical rows from a CSV with a header line. Required
/// columns: `date`, `description`, `amount`.
pub fn read_rows_csv(
    file_path: &Path,
    account_id: &str,
    source: SourceKind,
) -> Result<Vec<CanonicalTransactionRow>> {
    let file = std::fs::File::open(file_path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(std::io::BufReader::new(file));

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
        let line = i + 2;
        let raw = result?;
        let date = parse_date(&raw.date)
            .ok_or_else(|| TallyError::Invalid(format!("line {line}: bad date '{}'", raw.date)))?;
        let amount_minor = parse_minor_units(&raw.amount).ok_or_else(|| {
            TallyError::Invalid(format!("line {line}: bad amount '{}'", raw.amount))
        })?;
        let balance_minor = match non_empty(raw.balance) {
            Some(b) => Some(parse_minor_units(&b).ok_or_else(|| {
                TallyError::Invalid(format!("line {line}: bad balance '{b}'"))
            })?),
            None => None,
        };
        let operation_date = match non_empty(raw.operation_date) {
            Some(d) => Some(parse_date(&d).ok_or_else(|| {
                TallyError::Invalid(format!("line {line}: bad operation date '{d}'"))
            })?),
            None => None,
        };
        let kind = match non_empty(raw.kind) {
            Some(k) => TxnKind::from_key(&k)
                .ok_or_else(|| TallyError::Invalid(format!("line {line}: unknown kind '{k}'")))?,
            None => TxnKind::from_amount(amount_minor),
        };
        let counterparty = match (non_empty(raw.counterparty_id), non_empty(raw.counterparty_kind)) {
            (Some(id), kind) => Some(Counterparty {
                id,
                kind: kind.unwrap_or_else(|| "unknown".to_string()),
            }),
            (None, _) => None,
        };
        rows.push(CanonicalTransactionRow {
            date,
            description: raw.description,
            amount_minor,
            balance_minor,
            operation_date,
            category: non_empty(raw.category),
            counterparty,
            kind,
            account_id: account_id.to_string(),
            source,
        });
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// import_batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub fingerprint: String,
    pub imported: usize,
    /// Rows already present from an overlapping, earlier import.
    pub skipped: usize,
    pub already_imported: bool,
    /// An interrupted run with the same fingerprint was picked up again.
    pub resumed: bool,
}

/// How many transactions of the organization, imported by some other batch,
/// already carry each signature of `prepared`. One pass over the collection.
fn existing_signature_counts(
    store: &Store,
    org_id: &str,
    fingerprint: &str,
    prepared: &[PreparedRow],
) -> Result<HashMap<String, usize>> {
    let mut counts: HashMap<String, usize> = prepared
        .iter()
        .map(|row| (row.signature.clone(), 0))
        .collect();
    let txns: Vec<(String, Transaction)> =
        store.list(&paths::collection(org_id, paths::TRANSACTIONS))?;
    for (_, txn) in txns {
        if txn.import_fingerprint.as_deref() == Some(fingerprint) {
            continue;
        }
        if let Some(n) = txn.signature.as_ref().and_then(|sig| counts.get_mut(sig)) {
            *n += 1;
        }
    }
    Ok(counts)
}

/// Persist `batch` exactly once. Re-importing a completed batch reports
/// `already_imported`; an interrupted one is resumed, and because row ids are
/// deterministic the rows written the first time are not duplicated.
pub fn import_batch(store: &Store, batch: &ImportBatch, actor: &str) -> Result<ImportResult> {
    let fingerprint = import_hash(batch);
    let run_path = paths::import_run(&batch.org_id, &fingerprint);
    let mut run = ImportRun {
        fingerprint: fingerprint.clone(),
        account_id: batch.account_id.clone(),
        source: batch.source,
        file_name: batch.file_name.clone(),
        row_count: batch.total_rows,
        status: RunStatus::InProgress,
        actor: actor.to_string(),
        started_at: Utc::now(),
        completed_at: None,
    };

    let resumed = if store.create(&run_path, &run)? {
        false
    } else {
        let existing: ImportRun = store
            .get(&run_path)?
            .ok_or_else(|| TallyError::NotFound(run_path.clone()))?;
        if existing.status == RunStatus::Completed {
            info!("import {fingerprint} already completed, skipping");
            return Ok(ImportResult {
                fingerprint,
                imported: 0,
                skipped: 0,
                already_imported: true,
                resumed: false,
            });
        }
        warn!("resuming interrupted import {fingerprint}");
        run = existing;
        true
    };

    let prepared = assign_ids(&batch.rows, &fingerprint);
    let existing = existing_signature_counts(store, &batch.org_id, &fingerprint, &prepared)?;

    let mut to_write = Vec::with_capacity(prepared.len());
    let mut skipped = 0usize;
    let mut ordinal: HashMap<&str, usize> = HashMap::new();
    for row in &prepared {
        let k = ordinal.entry(row.signature.as_str()).or_insert(0);
        let already_present = existing.get(&row.signature).copied().unwrap_or(0);
        if *k < already_present {
            skipped += 1;
        } else {
            to_write.push(Transaction::from_prepared(row, &fingerprint));
        }
        *k += 1;
    }

    let mut imported = 0usize;
    for chunk in to_write.chunks(MAX_BATCH_OPS) {
        let mut write = WriteBatch::new();
        for txn in chunk {
            write.create_if_absent(&paths::transaction(&batch.org_id, &txn.id), txn)?;
        }
        imported += store.commit(write)?;
    }

    let job = ImportJob {
        id: new_job_id(),
        kind: BANK_STATEMENT_JOB.to_string(),
        fingerprint: Some(fingerprint.clone()),
        actor: actor.to_string(),
        created_at: Utc::now(),
        imported,
    };
    run.status = RunStatus::Completed;
    run.completed_at = Some(Utc::now());
    let mut finish = WriteBatch::new();
    finish.set(&run_path, &run)?;
    finish.create(&paths::doc(&batch.org_id, paths::IMPORT_JOBS, &job.id), &job)?;
    store.commit(finish)?;

    info!(
        "import {fingerprint}: {imported} imported, {skipped} skipped for {}",
        batch.org_id
    );
    Ok(ImportResult {
        fingerprint,
        imported,
        skipped,
        already_imported: false,
        resumed,
    })
}

/// Read a canonical CSV and import it into `account_id` of `org_id`.
pub fn import_file(
    store: &Store,
    file_path: &Path,
    org_id: &str,
    account_id: &str,
    source: SourceKind,
    actor: &str,
) -> Result<ImportResult> {
    let rows = read_rows_csv(file_path, account_id, source)?;
    let file_name = file_path.file_name().and_then(|n| n.to_str());
    let batch = ImportBatch::new(org_id, account_id, source, file_name, rows);
    import_batch(store, &batch, actor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::tests::row;
    use crate::store::tests::test_store;

    fn write_csv(dir: &Path, name: &str, rows: &[(&str, &str, &str)]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut content = String::from("date,description,amount\n");
        for (date, desc, amt) in rows {
            content.push_str(&format!("{date},{desc},{amt}\n"));
        }
        std::fs::write(&path, &content).unwrap();
        path
    }

    fn txn_count(store: &Store) -> usize {
        store
            .list_paths(&paths::collection("acme", paths::TRANSACTIONS))
            .unwrap()
            .len()
    }

    #[test]
    fn test_parse_minor_units() {
        assert_eq!(parse_minor_units("1,234.56"), Some(123_456));
        assert_eq!(parse_minor_units("\"500.00\""), Some(50_000));
        assert_eq!(parse_minor_units("  -42.50  "), Some(-4_250));
        assert_eq!(parse_minor_units("0"), Some(0));
        assert_eq!(parse_minor_units("12.5"), Some(1_250));
        assert_eq!(parse_minor_units(".99"), Some(99));
        assert_eq!(parse_minor_units("not_a_number"), None);
        assert_eq!(parse_minor_units("1.234"), None);
        assert_eq!(parse_minor_units(""), None);
    }

    #[test]
    fn test_parse_minor_units_parenthesized_and_currency() {
        assert_eq!(parse_minor_units("(500.00)"), Some(-50_000));
        assert_eq!(parse_minor_units("(1,234.56)"), Some(-123_456));
        assert_eq!(parse_minor_units("$1,234.56"), Some(123_456));
        assert_eq!(parse_minor_units("-$50.00"), Some(-5_000));
    }

    #[test]
    fn test_parse_minor_units_avoids_float_drift() {
        // 0.1 + 0.2 style inputs must come out exact.
        assert_eq!(parse_minor_units("0.29"), Some(29));
        assert_eq!(parse_minor_units("1015.57"), Some(101_557));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2025-01-15"), Some("2025-01-15".to_string()));
        assert_eq!(parse_date("01/15/2025"), Some("2025-01-15".to_string()));
        assert_eq!(parse_date("13/01/2025"), None);
        assert_eq!(parse_date("02/30/2025"), None);
        assert_eq!(parse_date("invalid"), None);
    }

    #[test]
    fn test_read_rows_csv_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(
            &path,
            "date,description,amount,balance,kind,counterparty_id,counterparty_kind\n\
             2025-01-15,ADOBE,-50.00,950.00,fee,sup-1,supplier\n\
             01/16/2025,STRIPE PAYOUT,2500.00,,,,\n",
        )
        .unwrap();
        let rows = read_rows_csv(&path, "checking", SourceKind::Csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].amount_minor, -5_000);
        assert_eq!(rows[0].balance_minor, Some(95_000));
        assert_eq!(rows[0].kind, TxnKind::Fee);
        assert_eq!(rows[0].counterparty.as_ref().unwrap().kind, "supplier");
        assert_eq!(rows[1].date, "2025-01-16");
        assert_eq!(rows[1].balance_minor, None);
        assert_eq!(rows[1].kind, TxnKind::Credit);
    }

    #[test]
    fn test_read_rows_csv_rejects_bad_amount() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "bad.csv", &[("2025-01-15", "X", "abc")]);
        let err = read_rows_csv(&path, "checking", SourceKind::Csv).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_import_file_inserts_transactions() {
        let (dir, store) = test_store();
        let path = write_csv(dir.path(), "stmt.csv", &[
            ("2025-01-15", "PAYMENT ONE", "-100.00"),
            ("2025-01-16", "PAYMENT TWO", "-250.00"),
            ("2025-01-17", "DEPOSIT", "500.00"),
        ]);
        let result = import_file(&store, &path, "acme", "checking", SourceKind::Csv, "alice").unwrap();
        assert_eq!(result.imported, 3);
        assert!(!result.already_imported);
        assert_eq!(txn_count(&store), 3);

        let run: ImportRun = store
            .get(&paths::import_run("acme", &result.fingerprint))
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.row_count, 3);
        assert_eq!(
            store
                .list_paths(&paths::collection("acme", paths::IMPORT_JOBS))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_same_file_twice_is_already_imported() {
        let (dir, store) = test_store();
        let path = write_csv(dir.path(), "stmt.csv", &[
            ("2025-01-15", "PAYMENT ONE", "-100.00"),
            ("2025-01-15", "PAYMENT ONE", "-100.00"),
        ]);
        let first = import_file(&store, &path, "acme", "checking", SourceKind::Csv, "alice").unwrap();
        assert_eq!(first.imported, 2);
        let second = import_file(&store, &path, "acme", "checking", SourceKind::Csv, "alice").unwrap();
        assert_eq!(second.fingerprint, first.fingerprint);
        assert!(second.already_imported);
        assert_eq!(second.imported, 0);
        assert_eq!(txn_count(&store), 2);
    }

    #[test]
    fn test_overlapping_files_skip_known_rows() {
        let (dir, store) = test_store();
        let first = write_csv(dir.path(), "stmt1.csv", &[
            ("2025-01-15", "PAYMENT ONE", "-100.00"),
            ("2025-01-16", "PAYMENT TWO", "-200.00"),
        ]);
        import_file(&store, &first, "acme", "checking", SourceKind::Csv, "alice").unwrap();
        let second = write_csv(dir.path(), "stmt2.csv", &[
            ("2025-01-16", "PAYMENT TWO", "-200.00"),
            ("2025-01-18", "PAYMENT THREE", "-300.00"),
        ]);
        let r2 = import_file(&store, &second, "acme", "checking", SourceKind::Csv, "alice").unwrap();
        assert_eq!(r2.imported, 1);
        assert_eq!(r2.skipped, 1);
        assert_eq!(txn_count(&store), 3);
    }

    #[test]
    fn test_overlap_keeps_extra_identical_rows() {
        let (_dir, store) = test_store();
        let coffee = row("2025-01-15", "COFFEE", -450);
        let one = ImportBatch::new("acme", "checking", SourceKind::Csv, Some("a.csv"), vec![coffee.clone()]);
        import_batch(&store, &one, "alice").unwrap();
        let two = ImportBatch::new(
            "acme",
            "checking",
            SourceKind::Csv,
            Some("b.csv"),
            vec![coffee.clone(), coffee],
        );
        let result = import_batch(&store, &two, "alice").unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.imported, 1);
        assert_eq!(txn_count(&store), 2);
    }

    #[test]
    fn test_existing_signature_counts_ignores_own_run_and_split_children() {
        let (_dir, store) = test_store();
        let coffee = row("2025-01-15", "COFFEE", -450);
        let lunch = row("2025-01-15", "LUNCH", -1_200);
        let earlier = ImportBatch::new(
            "acme",
            "checking",
            SourceKind::Csv,
            Some("a.csv"),
            vec![coffee.clone(), coffee.clone(), lunch.clone()],
        );
        import_batch(&store, &earlier, "alice").unwrap();
        crate::splitter::tests::seed_transaction(&store, "acme", "split_manual", -450);

        let prepared = assign_ids(&[coffee, lunch, row("2025-01-20", "RENT", -90_000)], "hash_b");
        let counts = existing_signature_counts(&store, "acme", "hash_b", &prepared).unwrap();
        assert_eq!(counts.len(), 3);
        let by_desc = |desc: &str| {
            let sig = &prepared.iter().find(|p| p.row.description == desc).unwrap().signature;
            counts[sig]
        };
        assert_eq!(by_desc("COFFEE"), 2);
        assert_eq!(by_desc("LUNCH"), 1);
        assert_eq!(by_desc("RENT"), 0);

        let own = existing_signature_counts(&store, "acme", &import_hash(&earlier), &prepared).unwrap();
        assert!(own.values().all(|n| *n == 0));
    }

    #[test]
    fn test_interrupted_import_resumes_without_duplicates() {
        let (_dir, store) = test_store();
        let rows = vec![
            row("2025-01-15", "PAYMENT ONE", -100),
            row("2025-01-16", "PAYMENT TWO", -200),
            row("2025-01-17", "PAYMENT THREE", -300),
        ];
        let batch = ImportBatch::new("acme", "checking", SourceKind::Csv, Some("a.csv"), rows);
        let fingerprint = import_hash(&batch);

        // Simulate a crash after the run record and one row were written.
        let run = ImportRun {
            fingerprint: fingerprint.clone(),
            account_id: "checking".to_string(),
            source: SourceKind::Csv,
            file_name: Some("a.csv".to_string()),
            row_count: 3,
            status: RunStatus::InProgress,
            actor: "alice".to_string(),
            started_at: Utc::now(),
            completed_at: None,
        };
        store.set(&paths::import_run("acme", &fingerprint), &run).unwrap();
        let prepared = assign_ids(&batch.rows, &fingerprint);
        let first = Transaction::from_prepared(&prepared[0], &fingerprint);
        store.set(&paths::transaction("acme", &first.id), &first).unwrap();

        let result = import_batch(&store, &batch, "alice").unwrap();
        assert!(result.resumed);
        assert_eq!(result.imported, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(txn_count(&store), 3);

        let again = import_batch(&store, &batch, "alice").unwrap();
        assert!(again.already_imported);
    }

    #[test]
    fn test_large_import_is_written_in_bounded_batches() {
        let (_dir, store) = test_store();
        let rows: Vec<_> = (0..120)
            .map(|i| row("2025-02-01", &format!("CARD PAYMENT {i}"), -(i + 1)))
            .collect();
        let batch = ImportBatch::new("acme", "checking", SourceKind::BankFeed, None, rows);
        let result = import_batch(&store, &batch, "alice").unwrap();
        assert_eq!(result.imported, 120);
        assert_eq!(txn_count(&store), 120);
    }
}
