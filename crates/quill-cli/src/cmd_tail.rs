use quill_ledger::{read_entries, QuillPaths};
use std::path::Path;

pub fn execute(repo_root: &Path, project: &str, lines: usize, json: bool) -> anyhow::Result<()> {
    let paths = QuillPaths::discover(repo_root);
    let log = paths.project_log(project)?;
    let entries = read_entries(&log)?;
    if entries.is_empty() {
        println!("(no entries for {project})");
        return Ok(());
    }

    let start = entries.len().saturating_sub(lines);
    for entry in &entries[start..] {
        if json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!("{}", entry.raw_line);
        }
    }
    Ok(())
}
