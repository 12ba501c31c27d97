use std::io::Write;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::Context;
use crate::error::Result;
use crate::family::{build_plan, collect_family, delete_family, DeleteFamilyPlan};
use crate::paths;

fn summarize(plan: &DeleteFamilyPlan) -> Table {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for path in &plan.paths {
        // orgs/{org}/{collection}/... ; nested items are reported separately
        let rest = path.splitn(3, '/').nth(2).unwrap_or(path.as_str());
        let collection = match rest.split('/').collect::<Vec<_>>().as_slice() {
            [c, _, n, _] => format!("{c}/{n}"),
            [c, ..] => c.to_string(),
            [] => rest.to_string(),
        };
        match counts.iter_mut().find(|(c, _)| *c == collection) {
            Some((_, n)) => *n += 1,
            None => counts.push((collection, 1)),
        }
    }

    let mut table = Table::new();
    table.set_header(vec!["Collection", "Records"]);
    for (collection, n) in counts {
        table.add_row(vec![Cell::new(collection), Cell::new(n)]);
    }
    table
}

pub fn plan(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let plan = build_plan(&ctx.org_id, &collect_family(&store, &ctx.org_id)?);
    if plan.is_empty() {
        println!("Nothing to delete for {}.", ctx.org_id);
        return Ok(());
    }
    println!("{}\nTotal: {} paths", summarize(&plan), plan.total);
    Ok(())
}

pub fn delete(ctx: &Context, batch_size: Option<usize>, yes: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let plan = build_plan(&ctx.org_id, &collect_family(&store, &ctx.org_id)?);

    if !plan.is_empty() && !yes {
        print!(
            "Delete {} records under {}? [y/N] ",
            plan.total,
            paths::org(&ctx.org_id)
        );
        std::io::stdout().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let max = batch_size.unwrap_or(ctx.settings.max_batch_size);
    let outcome = delete_family(&store, &ctx.org_id, max)?;
    if outcome.already_empty {
        println!("{}", "Movements family is already empty.".yellow());
    } else {
        println!(
            "Deleted {} records in {} batches.",
            outcome.deleted.to_string().green(),
            outcome.batches
        );
    }
    Ok(())
}
