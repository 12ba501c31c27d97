use chrono::{TimeZone, Utc};
use comfy_table::{Cell, Table};

use crate::cli::Context;
use crate::error::Result;
use crate::lock::list_locks;

pub fn list(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let locks = list_locks(&store, &ctx.org_id)?;
    if locks.is_empty() {
        println!("No locks held for {}.", ctx.org_id);
        return Ok(());
    }

    let now_ms = Utc::now().timestamp_millis();
    let mut table = Table::new();
    table.set_header(vec!["Resource", "Operation", "Holder", "Acquired", "Expires", "Stale"]);
    for lock in locks {
        let expires = Utc
            .timestamp_millis_opt(lock.expires_at_ms)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&lock.resource_key),
            Cell::new(lock.operation.key()),
            Cell::new(&lock.holder_id),
            Cell::new(lock.acquired_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(expires),
            Cell::new(if lock.expires_at_ms <= now_ms { "yes" } else { "no" }),
        ]);
    }
    println!("Process locks\n{table}");
    Ok(())
}
