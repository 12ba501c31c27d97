use comfy_table::{Cell, Table};

use crate::cli::Context;
use crate::error::Result;
use crate::fmt::money;
use crate::models::{Transaction, TxnState};
use crate::paths;

pub fn list(ctx: &Context, all: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let txns: Vec<(String, Transaction)> =
        store.list(&paths::collection(&ctx.org_id, paths::TRANSACTIONS))?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Description", "Amount", "Account", "Status"]);
    for (_, txn) in txns {
        if !all && !txn.is_active() {
            continue;
        }
        let status = match (&txn.state, txn.is_split, &txn.parent_id) {
            (TxnState::Archived { reason, .. }, _, _) => format!("archived ({reason:?})"),
            (TxnState::Active, true, _) => "split".to_string(),
            (TxnState::Active, false, Some(parent)) => format!("child of {parent}"),
            (TxnState::Active, false, None) => "active".to_string(),
        };
        table.add_row(vec![
            Cell::new(&txn.id),
            Cell::new(&txn.date),
            Cell::new(&txn.description),
            Cell::new(money(txn.amount_minor)),
            Cell::new(&txn.account_id),
            Cell::new(status),
        ]);
    }
    println!("Transactions ({})\n{table}", ctx.org_id);
    Ok(())
}
