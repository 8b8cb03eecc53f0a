use quill_core::{RequestContext, SessionMode};
use quill_session::SessionCore;
use std::path::Path;

/// Rotation is project-level: the operator's session is switched to project
/// mode through the gate (and audited) before rotating.
pub fn execute(repo_root: &Path, project: &str, agent: &str) -> anyhow::Result<()> {
    let core = SessionCore::open(repo_root)?;
    let transport = format!("quill-cli:{agent}");

    let session = core.sessions().resolve(&transport, agent)?.session;
    if session.mode != SessionMode::Project {
        let ctx = RequestContext::for_transport(
            &transport,
            agent,
            session.mode,
            "switch to project mode for rotation",
        );
        core.switch_mode(&ctx, SessionMode::Project)?;
    }

    let ctx = RequestContext::for_transport(&transport, agent, SessionMode::Project, "rotate log");
    let record = core.rotate(&ctx, project)?;
    println!(
        "Rotated {project}: sequence {} sealed {} entries -> {}",
        record.sequence_number, record.previous_log_entry_count, record.archived_log_path
    );
    println!("  previous_log_hash {}", record.previous_log_hash);
    println!("  chain_root_hash   {}", record.chain_root_hash);
    Ok(())
}
