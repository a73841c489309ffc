//! `alphie config [key [value]]` (§6): inspect or edit the project's
//! `.alphie.yaml` layer.
//!
//! With no arguments, prints the fully layered config. With a dotted `key`
//! (e.g. `execution.max_agents`), prints that one value. With `key value`,
//! sets it in the project layer and rewrites `.alphie.yaml`.

use std::path::Path;

use anyhow::{Context, Result};
use serde_yaml::Value;

use crate::cli_config;

/// Run the `config` subcommand against `project_root`.
///
/// # Errors
/// Returns an error if the config layers cannot be parsed, the key path
/// does not resolve, or the project config cannot be rewritten.
pub fn run(project_root: &Path, key: Option<String>, value: Option<String>) -> Result<()> {
    let Some(key) = key else {
        let config = cli_config::load_config(project_root)?;
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    };

    match value {
        None => {
            let config = cli_config::load_config(project_root)?;
            let as_value: Value = serde_yaml::to_value(&config)?;
            let resolved = resolve_path(&as_value, &key)
                .with_context(|| format!("no such config key '{key}'"))?;
            println!("{}", serde_yaml::to_string(&resolved)?.trim_end());
        }
        Some(value) => {
            let path = cli_config::project_config_path(project_root);
            let mut doc: Value = if path.exists() {
                serde_yaml::from_str(&std::fs::read_to_string(&path)?)?
            } else {
                Value::Mapping(serde_yaml::Mapping::new())
            };
            set_path(&mut doc, &key, Value::String(value))?;
            std::fs::write(&path, serde_yaml::to_string(&doc)?)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("set {key}");
        }
    }
    Ok(())
}

fn resolve_path<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in dotted.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn set_path(root: &mut Value, dotted: &str, leaf: Value) -> Result<()> {
    let segments: Vec<&str> = dotted.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        if !matches!(current, Value::Mapping(_)) {
            *current = Value::Mapping(serde_yaml::Mapping::new());
        }
        let Value::Mapping(map) = current else { unreachable!() };
        current = map
            .entry(Value::String((*segment).to_owned()))
            .or_insert_with(|| Value::Mapping(serde_yaml::Mapping::new()));
    }
    let Value::Mapping(map) = current else {
        anyhow::bail!("config key '{dotted}' traverses a non-mapping value");
    };
    map.insert(Value::String((*segments.last().unwrap()).to_owned()), leaf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_finds_nested_key() {
        let yaml = "execution:\n  max_agents: 4\n";
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let found = resolve_path(&value, "execution.max_agents").unwrap();
        assert_eq!(found.as_u64(), Some(4));
    }

    #[test]
    fn set_path_creates_intermediate_mappings() {
        let mut doc = Value::Mapping(serde_yaml::Mapping::new());
        set_path(&mut doc, "branch.greenfield", Value::String("true".to_owned())).unwrap();
        let found = resolve_path(&doc, "branch.greenfield").unwrap();
        assert_eq!(found.as_str(), Some("true"));
    }
}
