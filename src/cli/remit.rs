use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::Context;
use crate::error::{Result, TallyError};
use crate::fmt::money;
use crate::importer::{parse_date, parse_minor_units};
use crate::remittance::{add_pending_document, generate_remittance, list_remittances, stage_prebank};

pub fn pending(ctx: &Context, description: &str, amount: &str, due: Option<&str>) -> Result<()> {
    let amount_minor =
        parse_minor_units(amount).ok_or_else(|| TallyError::Invalid(format!("bad amount: {amount}")))?;
    let due = match due {
        Some(d) => Some(parse_date(d).ok_or_else(|| TallyError::Invalid(format!("bad date: {d}")))?),
        None => None,
    };
    let store = ctx.open_store()?;
    let doc = add_pending_document(&store, &ctx.org_id, description, amount_minor, due.as_deref())?;
    println!("Added pending document {} ({})", doc.id, money(doc.amount_minor));
    Ok(())
}

pub fn remit(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    match generate_remittance(&store, &ctx.org_id, &ctx.actor)? {
        Some(rem) => println!(
            "Remittance {} created: {} items, total {}",
            rem.id.green(),
            rem.item_count,
            money(rem.total_minor)
        ),
        None => println!("{}", "No pending documents to remit.".yellow()),
    }
    Ok(())
}

pub fn stage(ctx: &Context, remittance_id: &str) -> Result<()> {
    let store = ctx.open_store()?;
    let prebank = stage_prebank(&store, &ctx.org_id, remittance_id)?;
    println!("Staged {} for the bank ({})", prebank.id, money(prebank.total_minor));
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let remittances = list_remittances(&store, &ctx.org_id)?;
    if remittances.is_empty() {
        println!("No remittances for {}.", ctx.org_id);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Created", "By", "Items", "Total"]);
    for rem in remittances {
        table.add_row(vec![
            Cell::new(&rem.id),
            Cell::new(rem.created_at.format("%Y-%m-%d %H:%M")),
            Cell::new(&rem.created_by),
            Cell::new(rem.item_count),
            Cell::new(money(rem.total_minor)),
        ]);
    }
    println!("Remittances ({})\n{table}", ctx.org_id);
    Ok(())
}
