use anyhow::Context;
use clap::Subcommand;
use quill_core::QuillConfig;
use quill_ledger::QuillPaths;
use serde_json::{Map, Value};
use std::path::Path;

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a config value
    Set {
        /// Config key (e.g. session_ttl_secs)
        key: String,
        /// Config value (true/false/number)
        value: String,
    },
    /// Get the effective value of a key
    Get {
        /// Config key
        key: String,
    },
    /// List effective config values
    List,
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, repo_root: &Path) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Set { key, value } => set(repo_root, &key, &value),
        ConfigCmd::Get { key } => get(repo_root, &key),
        ConfigCmd::List => list(repo_root),
    }
}

// ── Command Implementations ──

fn initialized(repo_root: &Path) -> anyhow::Result<QuillPaths> {
    let paths = QuillPaths::discover(repo_root);
    if !paths.is_initialized() {
        anyhow::bail!("No .quill/ directory found. Run `quill init` first.");
    }
    Ok(paths)
}

/// Raw file layer of `.quill/config.json`. Missing file means empty.
fn read_config(path: &Path) -> anyhow::Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    match serde_json::from_str(&content)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn write_config(path: &Path, config: &Map<String, Value>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    quill_store::write_atomic(path, json.as_bytes())
}

/// Defaults merged with the file layer, as JSON.
fn effective(file: &Map<String, Value>) -> anyhow::Result<Map<String, Value>> {
    let config: QuillConfig = serde_json::from_value(Value::Object(file.clone()))?;
    match serde_json::to_value(config)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn known_keys() -> anyhow::Result<Vec<String>> {
    Ok(effective(&Map::new())?.keys().cloned().collect())
}

/// Parse a string value into an appropriate JSON value (bool/number/string).
fn parse_value(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = s.parse::<u64>() {
                Value::Number(n.into())
            } else {
                Value::String(s.to_string())
            }
        }
    }
}

/// `quill config set <key> <value>`
pub fn set(repo_root: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let paths = initialized(repo_root)?;
    let keys = known_keys()?;
    if !keys.iter().any(|k| k == key) {
        anyhow::bail!("unknown config key {key:?} (known: {})", keys.join(", "));
    }
    let mut config = read_config(&paths.config_json)?;
    config.insert(key.to_string(), parse_value(value));
    effective(&config).with_context(|| format!("invalid value for {key}: {value}"))?;
    write_config(&paths.config_json, &config)?;
    println!("{key} = {value}");
    Ok(())
}

/// `quill config get <key>`
pub fn get(repo_root: &Path, key: &str) -> anyhow::Result<()> {
    let paths = initialized(repo_root)?;
    let config = effective(&read_config(&paths.config_json)?)?;
    match config.get(key) {
        Some(val) => println!("{val}"),
        None => println!("(unknown key)"),
    }
    Ok(())
}

/// `quill config list`
pub fn list(repo_root: &Path) -> anyhow::Result<()> {
    let paths = initialized(repo_root)?;
    let file = read_config(&paths.config_json)?;
    for (k, v) in &effective(&file)? {
        let origin = if file.contains_key(k) { "" } else { "  (default)" };
        println!("{k} = {v}{origin}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(dir: &Path) -> QuillPaths {
        let paths = QuillPaths::discover(dir);
        paths.ensure_layout().unwrap();
        paths
    }

    #[test]
    fn parse_value_types() {
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("50"), Value::from(50u64));
        assert_eq!(parse_value("soon"), Value::from("soon"));
    }

    #[test]
    fn set_writes_file_and_loads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = init(tmp.path());
        set(tmp.path(), "lock_retries", "7").unwrap();
        set(tmp.path(), "mirror", "false").unwrap();

        let config = QuillConfig::from_file(&paths.config_json).unwrap();
        assert_eq!(config.lock_retries, 7);
        assert!(!config.mirror);
        assert_eq!(config.session_ttl_secs, QuillConfig::default().session_ttl_secs);
    }

    #[test]
    fn unknown_key_and_bad_value_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = init(tmp.path());
        assert!(set(tmp.path(), "no_such_key", "1").is_err());
        assert!(set(tmp.path(), "fsync", "sometimes").is_err());
        assert!(!paths.config_json.exists());
    }

    #[test]
    fn requires_initialized_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list(tmp.path()).is_err());
    }
}
