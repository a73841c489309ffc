//! Structured merge for critical files (§4.8 step 4): deep-merge JSON and
//! TOML documents, union line-oriented files (`.gitignore`, …), and skip
//! lockfiles entirely in favor of a scheduled regeneration command.

use crate::criticalfiles::lockfile_regeneration_command;

/// The result of structurally merging one critical file's two sides.
pub(super) enum StructuredFile {
    /// Merged content to write and stage.
    Merged(Vec<u8>),
    /// The file is a lockfile; skip merging it and run this command after
    /// the merge commit lands.
    Regenerate(&'static str),
}

/// Structurally merge `ours` and `theirs` for `path`, picking a strategy by
/// extension/basename (§4.8 step 4).
#[must_use]
pub(super) fn merge_file(path: &str, ours: &[u8], theirs: &[u8]) -> StructuredFile {
    if let Some(cmd) = lockfile_regeneration_command(path) {
        return StructuredFile::Regenerate(cmd);
    }
    let (Ok(ours_text), Ok(theirs_text)) = (std::str::from_utf8(ours), std::str::from_utf8(theirs)) else {
        return StructuredFile::Merged(theirs.to_vec());
    };
    if path.ends_with(".json") {
        if let Some(merged) = merge_json(ours_text, theirs_text) {
            return StructuredFile::Merged(merged.into_bytes());
        }
    }
    if path.ends_with(".toml") {
        if let Some(merged) = merge_toml(ours_text, theirs_text) {
            return StructuredFile::Merged(merged.into_bytes());
        }
    }
    StructuredFile::Merged(merge_lines(ours_text, theirs_text).into_bytes())
}

/// Deep-merge two JSON object texts: scalar and array leaves from `theirs`
/// win on conflict, arrays are unioned (stable, de-duplicated), and object
/// keys present on only one side are kept.
fn merge_json(ours: &str, theirs: &str) -> Option<String> {
    let ours_v: serde_json::Value = serde_json::from_str(ours).ok()?;
    let theirs_v: serde_json::Value = serde_json::from_str(theirs).ok()?;
    let merged = merge_json_values(ours_v, theirs_v);
    serde_json::to_string_pretty(&merged).ok().map(|mut s| {
        s.push('\n');
        s
    })
}

fn merge_json_values(ours: serde_json::Value, theirs: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match (ours, theirs) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                let merged = match a.remove(&k) {
                    Some(existing) => merge_json_values(existing, v),
                    None => v,
                };
                a.insert(k, merged);
            }
            Value::Object(a)
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut union: Vec<Value> = Vec::new();
            for v in a.into_iter().chain(b) {
                if !union.contains(&v) {
                    union.push(v);
                }
            }
            Value::Array(union)
        }
        (_, theirs) => theirs,
    }
}

/// Deep-merge two TOML document texts the same way as JSON (§4.8 step 1):
/// incoming (`theirs`) wins on leaf collisions, arrays are unioned, tables
/// are merged key-by-key.
fn merge_toml(ours: &str, theirs: &str) -> Option<String> {
    let ours_v: toml::Value = toml::from_str(ours).ok()?;
    let theirs_v: toml::Value = toml::from_str(theirs).ok()?;
    let merged = merge_toml_values(ours_v, theirs_v);
    toml::to_string_pretty(&merged).ok()
}

fn merge_toml_values(ours: toml::Value, theirs: toml::Value) -> toml::Value {
    use toml::Value;
    match (ours, theirs) {
        (Value::Table(mut a), Value::Table(b)) => {
            for (k, v) in b {
                let merged = match a.remove(&k) {
                    Some(existing) => merge_toml_values(existing, v),
                    None => v,
                };
                a.insert(k, merged);
            }
            Value::Table(a)
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut union: Vec<Value> = Vec::new();
            for v in a.into_iter().chain(b) {
                if !union.contains(&v) {
                    union.push(v);
                }
            }
            Value::Array(union)
        }
        (_, theirs) => theirs,
    }
}

/// Union two line-oriented texts: every line from `ours`, in order,
/// followed by any line from `theirs` not already present.
fn merge_lines(ours: &str, theirs: &str) -> String {
    let mut seen: std::collections::HashSet<&str> = ours.lines().collect();
    let mut out: Vec<&str> = ours.lines().collect();
    for line in theirs.lines() {
        if seen.insert(line) {
            out.push(line);
        }
    }
    let mut text = out.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_json_objects_with_theirs_winning_on_scalar_conflict() {
        let ours = r#"{"name":"a","version":"1.0.0","scripts":{"build":"tsc"}}"#;
        let theirs = r#"{"name":"a","version":"1.1.0","scripts":{"test":"jest"}}"#;
        let merged = merge_json(ours, theirs).unwrap();
        let v: serde_json::Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(v["version"], "1.1.0");
        assert_eq!(v["scripts"]["build"], "tsc");
        assert_eq!(v["scripts"]["test"], "jest");
    }

    #[test]
    fn unions_json_arrays_without_duplicates() {
        let ours = r#"{"deps":["a","b"]}"#;
        let theirs = r#"{"deps":["b","c"]}"#;
        let merged = merge_json(ours, theirs).unwrap();
        let v: serde_json::Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(v["deps"], serde_json::json!(["a", "b", "c"]));
    }

    #[test]
    fn merges_toml_tables_with_theirs_winning_on_scalar_conflict() {
        let ours = "name = \"a\"\nversion = \"1.0.0\"\n\n[dependencies]\nserde = \"1\"\n";
        let theirs = "name = \"a\"\nversion = \"1.1.0\"\n\n[dependencies]\ntokio = \"1\"\n";
        let merged = merge_toml(ours, theirs).unwrap();
        let v: toml::Value = toml::from_str(&merged).unwrap();
        assert_eq!(v["version"].as_str(), Some("1.1.0"));
        assert_eq!(v["dependencies"]["serde"].as_str(), Some("1"));
        assert_eq!(v["dependencies"]["tokio"].as_str(), Some("1"));
    }

    #[test]
    fn non_lockfile_toml_is_merged() {
        match merge_file("Cargo.toml", b"a = 1\n", b"b = 2\n") {
            StructuredFile::Merged(bytes) => {
                let v: toml::Value = toml::from_str(std::str::from_utf8(&bytes).unwrap()).unwrap();
                assert_eq!(v["a"].as_integer(), Some(1));
                assert_eq!(v["b"].as_integer(), Some(2));
            }
            StructuredFile::Regenerate(_) => panic!("expected Merged"),
        }
    }

    #[test]
    fn merges_lines_preserving_order_and_dedup() {
        let merged = merge_lines("a\nb\n", "b\nc\n");
        assert_eq!(merged, "a\nb\nc\n");
    }

    #[test]
    fn lockfile_path_is_regenerated_not_merged() {
        match merge_file("Cargo.lock", b"old", b"new") {
            StructuredFile::Regenerate(cmd) => assert_eq!(cmd, "cargo generate-lockfile"),
            StructuredFile::Merged(_) => panic!("expected Regenerate"),
        }
    }

    #[test]
    fn non_lockfile_json_is_merged() {
        match merge_file("package.json", br#"{"a":1}"#, br#"{"b":2}"#) {
            StructuredFile::Merged(bytes) => {
                let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(v["a"], 1);
                assert_eq!(v["b"], 2);
            }
            StructuredFile::Regenerate(_) => panic!("expected Merged"),
        }
    }
}
