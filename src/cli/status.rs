use crate::cli::Context;
use crate::error::Result;
use crate::paths;
use crate::store::Store;

pub fn run(ctx: &Context) -> Result<()> {
    let db_path = ctx.settings.db_path();

    println!("Actor:      {}", ctx.actor);
    println!("Org:        {}", ctx.org_id);
    println!("Data dir:   {}", ctx.settings.data_dir);
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `tally init` to set up.");
        return Ok(());
    }

    let store = Store::open(&db_path)?;
    let count = |name: &str| store.list_paths(&paths::collection(&ctx.org_id, name)).map(|p| p.len());

    println!();
    println!("Transactions:        {}", count(paths::TRANSACTIONS)?);
    println!("Remittances:         {}", count(paths::REMITTANCES)?);
    println!("Prebank remittances: {}", count(paths::PREBANK_REMITTANCES)?);
    println!("Pending documents:   {}", count(paths::PENDING_DOCUMENTS)?);
    println!("Import runs:         {}", count(paths::IMPORT_RUNS)?);
    println!("Locks held:          {}", count(paths::PROCESS_LOCKS)?);
    println!("All records:         {}", store.count_under(&paths::org(&ctx.org_id))?);
    Ok(())
}
