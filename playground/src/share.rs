//! Sharing sessions through permalinks, with the fallbacks the UI applies.

use serde::Serialize;
use tracing::{info, instrument};

use crate::core::session::Session;
use crate::io::config::EngineConfig;
use crate::permalink::{self, CompatTable, DecodeOutcome, Permalink};

/// Token for `session`, stamped with the configured interpreter version when
/// the session carries none.
pub fn share_session(session: &Session, config: &EngineConfig) -> String {
    permalink::encode(&Permalink::from_session(session, &config.interpreter_version))
}

/// Result of opening a shared link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Restored {
    Session { session: Session },
    /// The link must be opened in an archived build.
    Redirect { version: String, url: String },
    /// Unreadable link; the UI starts from an empty session.
    Failed { reason: String, session: Session },
}

impl Restored {
    /// The session to load into the editor.
    pub fn session(&self) -> Option<&Session> {
        match self {
            Restored::Session { session } | Restored::Failed { session, .. } => Some(session),
            Restored::Redirect { .. } => None,
        }
    }
}

#[instrument(skip_all, fields(token_len = token.len()))]
pub fn restore_session(token: &str, compat: &CompatTable, config: &EngineConfig) -> Restored {
    match permalink::decode(token, compat) {
        DecodeOutcome::Compatible(permalink) => Restored::Session {
            session: permalink.into_session(),
        },
        DecodeOutcome::Incompatible { version } if version.trim().is_empty() => {
            Restored::Failed {
                reason: "could not restore session: legacy permalink names no interpreter version"
                    .to_string(),
                session: Session::default(),
            }
        }
        DecodeOutcome::Incompatible { version } => {
            let token = token.trim().trim_start_matches('#');
            let url = permalink::archive_url(&config.archive_base_url, &version, token);
            info!(version = %version, url = %url, "permalink needs an archived build");
            Restored::Redirect { version, url }
        }
        DecodeOutcome::Unparseable => Restored::Failed {
            reason: "could not restore session: unrecognized permalink".to_string(),
            session: Session::default(),
        },
        DecodeOutcome::Malformed(reason) => Restored::Failed {
            reason: format!("could not restore session: {reason}"),
            session: Session::default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::abc_session;

    #[test]
    fn shared_session_restores() {
        let config = EngineConfig::default();
        let session = abc_session("code");
        let token = share_session(&session, &config);
        let Restored::Session { session: restored } =
            restore_session(&token, &CompatTable::default(), &config)
        else {
            panic!("expected session");
        };
        assert_eq!(restored.code, "code");
        assert_eq!(restored.input_groups.len(), 3);
        assert_eq!(restored.interpreter_version, "3.4.1");
    }

    #[test]
    fn incompatible_link_redirects_with_original_token() {
        let config = EngineConfig::default();
        let mut session = abc_session("code");
        session.interpreter_version = "3.0.0".to_string();
        let token = share_session(&session, &config);
        let restored = restore_session(&format!("#{token}"), &CompatTable::default(), &config);
        assert_eq!(
            restored,
            Restored::Redirect {
                version: "3.0.0".to_string(),
                url: format!("https://vyxal.github.io/versions/v3.0.0#{token}"),
            }
        );
        assert_eq!(restored.session(), None);
    }

    #[test]
    fn legacy_link_without_version_is_not_redirected() {
        use base64::Engine as _;
        let token = base64::engine::general_purpose::STANDARD.encode(r#"["x","",""]"#);
        let restored = restore_session(&token, &CompatTable::default(), &EngineConfig::default());
        let Restored::Failed { reason, session } = restored else {
            panic!("expected failure, got {restored:?}");
        };
        assert!(reason.contains("no interpreter version"));
        assert_eq!(session, Session::default());
    }

    #[test]
    fn unreadable_link_falls_back_to_empty_session() {
        let restored = restore_session("???", &CompatTable::default(), &EngineConfig::default());
        assert!(matches!(restored, Restored::Failed { .. }));
        assert_eq!(restored.session(), Some(&Session::default()));
    }
}
