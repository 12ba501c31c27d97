use std::path::PathBuf;

use colored::Colorize;

use crate::cli::Context;
use crate::error::{Result, TallyError};
use crate::fmt::short_id;
use crate::importer::import_file;
use crate::models::SourceKind;

pub fn run(ctx: &Context, file: &str, account: &str, source: &str) -> Result<()> {
    let source = SourceKind::from_key(source)
        .ok_or_else(|| TallyError::Invalid(format!("unknown source kind: {source}")))?;
    let file_path = PathBuf::from(file);
    let store = ctx.open_store()?;

    let result = import_file(&store, &file_path, &ctx.org_id, account, source, &ctx.actor)?;

    if result.already_imported {
        println!(
            "{}",
            format!("Already imported (fingerprint {}).", short_id(&result.fingerprint, 12)).yellow()
        );
        return Ok(());
    }
    if result.resumed {
        println!("Resumed an interrupted import.");
    }
    println!(
        "{} imported, {} skipped (duplicates)",
        result.imported.to_string().green(),
        result.skipped
    );
    Ok(())
}
