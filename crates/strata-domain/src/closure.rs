//! Closure graphs as exported by the store: one record per store path with
//! the paths it references.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One record of a closure graph: a store path and everything it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePath {
    pub path: String,
    #[serde(default)]
    pub references: Vec<String>,
}

/// Reads a closure graph exported as a JSON array of `{path, references}`.
pub fn read_closure_graph_file(path: &Path) -> Result<Vec<StorePath>> {
    let contents = fs::read(path)
        .with_context(|| format!("failed to read closure graph {}", path.display()))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse closure graph {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_closure_graph_records() -> Result<()> {
        let temp = tempdir()?;
        let file = temp.path().join("closure-graph.json");
        fs::write(
            &file,
            r#"[
                {"path": "/nix/store/aaa-app", "references": ["/nix/store/aaa-app", "/nix/store/bbb-libc"]},
                {"path": "/nix/store/bbb-libc", "references": ["/nix/store/bbb-libc"]},
                {"path": "/nix/store/ccc-data"}
            ]"#,
        )?;
        let nodes = read_closure_graph_file(&file)?;
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].references.len(), 2);
        assert!(nodes[2].references.is_empty());
        Ok(())
    }

    #[test]
    fn reports_the_offending_file() {
        let temp = tempdir().expect("tempdir");
        let file = temp.path().join("broken.json");
        fs::write(&file, "{not json").expect("write");
        let err = read_closure_graph_file(&file).unwrap_err();
        assert!(
            format!("{err:#}").contains("broken.json"),
            "error should name the file: {err:#}"
        );
    }
}
