use crate::cli::Context;
use crate::error::Result;
use crate::settings::{save_settings, Settings};
use crate::store::Store;

pub fn run(ctx: &Context) -> Result<()> {
    let settings = Settings {
        org_id: ctx.org_id.clone(),
        actor: ctx.actor.clone(),
        ..ctx.settings.clone()
    };
    save_settings(&settings)?;

    std::fs::create_dir_all(&settings.data_dir)?;
    Store::open(&settings.db_path())?;

    println!("Initialized tally at {}", settings.data_dir);
    Ok(())
}
