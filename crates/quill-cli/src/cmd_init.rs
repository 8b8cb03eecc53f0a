use quill_core::QuillConfig;
use quill_ledger::QuillPaths;
use quill_store::SqliteSessionStore;
use std::path::Path;

pub fn execute(repo_root: &Path) -> anyhow::Result<()> {
    let paths = QuillPaths::discover(repo_root);
    let existed = paths.is_initialized();

    paths.ensure_layout()?;
    if !paths.config_json.exists() {
        let json = serde_json::to_string_pretty(&QuillConfig::default())?;
        quill_store::write_atomic(&paths.config_json, json.as_bytes())?;
    }
    let config = QuillConfig::load(&paths.config_json)?;
    let store = SqliteSessionStore::open_or_create(&paths.sessions_db, config.store_busy_timeout())?;
    let schema = store.schema_version()?;

    if existed {
        println!("Already initialized at {}", paths.quill_dir.display());
    } else {
        println!("Initialized {} (schema v{schema})", paths.quill_dir.display());
    }
    Ok(())
}
