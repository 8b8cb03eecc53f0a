use quill_core::QuillConfig;
use quill_ledger::{read_entries, read_rotations, QuillPaths};
use quill_store::SqliteSessionStore;
use serde_json::json;
use std::path::Path;

pub fn execute(repo_root: &Path, as_json: bool) -> anyhow::Result<()> {
    let paths = QuillPaths::discover(repo_root);
    if !paths.is_initialized() {
        anyhow::bail!("No .quill/ directory found. Run `quill init` first.");
    }
    let config = QuillConfig::load(&paths.config_json)?;

    // Status must still report when the store is locked or missing.
    let sessions = SqliteSessionStore::open_or_create(&paths.sessions_db, config.store_busy_timeout())
        .and_then(|store| Ok((store.schema_version()?, store.session_count()?)));

    let mut projects = Vec::new();
    for name in paths.list_projects()? {
        let log = paths.project_log(&name)?;
        let entries = read_entries(&log)?.len();
        let rotations = read_rotations(&log)?.len();
        projects.push((name, entries, rotations));
    }

    if as_json {
        let sessions_json = match &sessions {
            Ok((schema, (live, expired))) => json!({
                "schema_version": schema,
                "live": live,
                "expired": expired,
            }),
            Err(e) => json!({ "error": e.to_string() }),
        };
        let projects_json: Vec<_> = projects
            .iter()
            .map(|(name, entries, rotations)| {
                json!({ "project": name, "entries": entries, "rotations": rotations })
            })
            .collect();
        let out = json!({
            "root": paths.quill_dir.display().to_string(),
            "config": config,
            "sessions": sessions_json,
            "projects": projects_json,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Quill at {}", paths.quill_dir.display());
    match &sessions {
        Ok((schema, (live, expired))) => {
            println!("Sessions: {live} live, {expired} expired (schema v{schema})")
        }
        Err(e) => println!("Sessions: unavailable ({e})"),
    }
    if projects.is_empty() {
        println!("Projects: (none)");
    } else {
        println!("Projects:");
        for (name, entries, rotations) in &projects {
            println!("  {name}: {entries} entries in current log, {rotations} rotations");
        }
    }
    Ok(())
}
