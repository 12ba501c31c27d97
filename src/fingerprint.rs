use std::collections::HashMap;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::models::{CanonicalTransactionRow, ImportBatch, PreparedRow};

/// Bumped whenever the serialization fed to `import_hash` changes.
pub const IMPORT_HASH_VERSION: u32 = 1;

const ID_PREFIX: &str = "txn_";
const ID_BYTES: usize = 15;
const ID_ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trim, collapse internal whitespace and upper-case.
pub fn normalize_description(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

fn encode_id(digest: &[u8]) -> String {
    let mut out = String::with_capacity(ID_PREFIX.len() + ID_BYTES * 8 / 5);
    out.push_str(ID_PREFIX);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in &digest[..ID_BYTES] {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ID_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Signature / hash / ids
// ---------------------------------------------------------------------------

/// Canonical fingerprint of one row. `serde_json::Map` keeps keys sorted, so
/// logically equal rows always serialize to the same string.
pub fn signature(row: &CanonicalTransactionRow) -> String {
    json!({
        "date": row.date.trim(),
        "description": normalize_description(&row.description),
        "amount": row.amount_minor,
        "balance": row.balance_minor,
        "operation_date": row.operation_date.as_deref().map(str::trim),
        "category": row.category.as_deref(),
        "counterparty_id": row.counterparty.as_ref().map(|c| c.id.as_str()),
        "counterparty_kind": row.counterparty.as_ref().map(|c| c.kind.as_str()),
        "kind": row.kind.key(),
        "account_id": row.account_id,
        "source": row.source.key(),
    })
    .to_string()
}

/// Whole-batch digest (64 hex chars). Row order does not matter.
pub fn import_hash(batch: &ImportBatch) -> String {
    let mut signatures: Vec<String> = batch.rows.iter().map(signature).collect();
    signatures.sort();
    let payload = json!({
        "version": IMPORT_HASH_VERSION,
        "org_id": batch.org_id,
        "account_id": batch.account_id,
        "source": batch.source.key(),
        "file_name": batch.file_name,
        "total_rows": batch.total_rows,
        "signatures": signatures,
    });
    sha256_hex(payload.to_string().as_bytes())
}

/// Id of the `ordinal`-th row (0-based) carrying `signature` in the import
/// identified by `import_hash`.
pub fn derive_id(import_hash: &str, signature: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(import_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(signature.as_bytes());
    hasher.update(b"\n");
    hasher.update(ordinal.to_string().as_bytes());
    encode_id(&hasher.finalize())
}

/// Assign stable ids to every row. Output is sorted by signature, so the
/// result does not depend on input order.
pub fn assign_ids(rows: &[CanonicalTransactionRow], import_hash: &str) -> Vec<PreparedRow> {
    let mut pairs: Vec<(String, &CanonicalTransactionRow)> =
        rows.iter().map(|row| (signature(row), row)).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut seen: HashMap<String, usize> = HashMap::new();
    pairs
        .into_iter()
        .map(|(sig, row)| {
            let count = seen.entry(sig.clone()).or_insert(0);
            let id = derive_id(import_hash, &sig, *count);
            *count += 1;
            PreparedRow {
                id,
                signature: sig,
                row: row.clone(),
            }
        })
        .collect()
}
