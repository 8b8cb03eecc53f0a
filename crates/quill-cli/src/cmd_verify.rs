use quill_core::QuillConfig;
use quill_ledger::{ChainAuditor, LogWriter, QuillPaths};
use std::path::Path;

/// Read-only: walks the chain without a session.
pub fn execute(repo_root: &Path, project: &str, json: bool) -> anyhow::Result<()> {
    let paths = QuillPaths::discover(repo_root);
    let config = QuillConfig::load(&paths.config_json)?;
    let log = paths.project_log(project)?;
    let report = ChainAuditor::new(LogWriter::from_config(&config)).verify_chain(&log)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.ok {
        println!("{project}: chain intact ({} rotations)", report.records_checked);
    } else {
        println!(
            "{project}: chain BROKEN at sequence {} after {} good records: {}",
            report.break_at_sequence.unwrap_or_default(),
            report.records_checked,
            report.detail.as_deref().unwrap_or("unknown")
        );
    }

    if !report.ok {
        anyhow::bail!("rotation chain of {project} is broken");
    }
    Ok(())
}
