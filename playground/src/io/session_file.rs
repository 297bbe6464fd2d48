//! Session documents stored as pretty JSON.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::session::Session;
use crate::io::config::write_atomic;

pub fn load_session(path: &Path) -> Result<Session> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write `session` (temp file + rename).
pub fn write_session(path: &Path, session: &Session) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(session).context("serialize session json")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::InputGroup;

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        let session = Session {
            code: "1 2 +".to_string(),
            input_groups: vec![InputGroup::new("A", ["x"])],
            ..Session::default()
        };
        write_session(&path, &session).expect("write");
        assert_eq!(load_session(&path).expect("load"), session);
    }

    #[test]
    fn sparse_document_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        fs::write(&path, r#"{"code":"x","input_groups":[{"name":"G"}]}"#).expect("write");
        let session = load_session(&path).expect("load");
        assert_eq!(session.code, "x");
        assert!(session.input_groups[0].inputs.is_empty());
        assert!(session.flags.is_empty());
    }
}
