use colored::Colorize;

use crate::cli::Context;
use crate::error::{Result, TallyError};
use crate::importer::parse_minor_units;
use crate::splitter::{create_split, undo_split};

pub fn split(ctx: &Context, parent: &str, amounts: &[String]) -> Result<()> {
    let amounts = amounts
        .iter()
        .map(|a| {
            parse_minor_units(a).ok_or_else(|| TallyError::Invalid(format!("bad amount: {a}")))
        })
        .collect::<Result<Vec<i64>>>()?;
    let store = ctx.open_store()?;

    let outcome = create_split(&store, &ctx.org_id, parent, &amounts, &ctx.actor)?;
    println!("Split {parent} into {} children:", outcome.child_ids.len());
    for id in &outcome.child_ids {
        println!("  {id}");
    }
    Ok(())
}

pub fn undo(ctx: &Context, parent: &str) -> Result<()> {
    let store = ctx.open_store()?;
    let outcome = undo_split(&store, &ctx.org_id, parent, &ctx.actor)?;
    if outcome.idempotent {
        println!("{}", format!("{parent} is not split; nothing to undo.").yellow());
    } else {
        println!(
            "Undid split of {parent}: {} children archived.",
            outcome.archived_child_count.to_string().green()
        );
    }
    Ok(())
}
