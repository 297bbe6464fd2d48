//! Loading the compatibility table from disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::permalink::CompatTable;

/// Load the table at `path`, or the built-in table when no path is configured.
pub fn load_compat_table(path: Option<&Path>) -> Result<CompatTable> {
    let Some(path) = path else {
        return Ok(CompatTable::default());
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let table: CompatTable =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    debug!(
        path = %path.display(),
        redirects = table.redirect.len(),
        releases = table.release_dates.len(),
        "loaded compatibility table"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_path_uses_builtin_table() {
        let table = load_compat_table(None).expect("load");
        assert_eq!(table, CompatTable::default());
    }

    #[test]
    fn reads_json_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("compat.json");
        fs::write(&path, r#"{"redirect":{"2.0.0":true}}"#).expect("write");
        let table = load_compat_table(Some(&path)).expect("load");
        assert!(table.requires_redirect("2.0.0"));
        assert!(table.release_dates.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_compat_table(Some(&temp.path().join("nope.json"))).unwrap_err();
        assert!(format!("{err:#}").contains("nope.json"));
    }
}
