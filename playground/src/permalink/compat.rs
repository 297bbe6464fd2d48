//! Interpreter-version compatibility table and release-date resolution.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which permalink versions must be opened in an archived build.
///
/// `redirect` maps a version to whether it needs the archived build; versions
/// absent from the map are compatible. `release_dates` lets date-form versions
/// from old links resolve to the release that followed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatTable {
    pub redirect: BTreeMap<String, bool>,
    pub release_dates: BTreeMap<String, NaiveDate>,
}

impl Default for CompatTable {
    fn default() -> Self {
        Self {
            redirect: BTreeMap::from([
                ("3.0.0".to_string(), true),
                ("3.1.0".to_string(), false),
            ]),
            release_dates: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedVersion {
    Exact(String),
    /// Newer than every known release; served by the current build.
    Latest,
}

impl CompatTable {
    /// Resolve a permalink's declared version.
    ///
    /// `x.y.z` strings are returned unchanged. Anything else is read as a
    /// release date (`dd/mm/yyyy` or `yyyy-mm-dd`) and resolves to the first
    /// release strictly after it. Unparseable strings are returned unchanged.
    pub fn resolve_version(&self, version: &str) -> ResolvedVersion {
        if version.contains('.') {
            return ResolvedVersion::Exact(version.to_string());
        }
        let Some(date) = parse_release_date(version) else {
            return ResolvedVersion::Exact(version.to_string());
        };
        self.release_dates
            .iter()
            .filter(|(_, released)| **released > date)
            .min_by_key(|(name, released)| (**released, name.as_str()))
            .map_or(ResolvedVersion::Latest, |(name, _)| {
                ResolvedVersion::Exact(name.clone())
            })
    }

    pub fn requires_redirect(&self, version: &str) -> bool {
        self.redirect.get(version).copied().unwrap_or(false)
    }
}

fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

/// URL of the archived build for `version`, carrying the original token.
pub fn archive_url(base: &str, version: &str, token: &str) -> String {
    format!("{}/v{version}#{token}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CompatTable {
        CompatTable {
            release_dates: BTreeMap::from([
                ("2.4.0".to_string(), NaiveDate::from_ymd_opt(2021, 3, 1).expect("date")),
                ("2.6.0".to_string(), NaiveDate::from_ymd_opt(2021, 9, 15).expect("date")),
                ("3.0.0".to_string(), NaiveDate::from_ymd_opt(2023, 12, 20).expect("date")),
            ]),
            ..CompatTable::default()
        }
    }

    #[test]
    fn dotted_versions_are_exact() {
        assert_eq!(
            table().resolve_version("3.4.1"),
            ResolvedVersion::Exact("3.4.1".to_string())
        );
    }

    #[test]
    fn dates_resolve_to_next_release() {
        let table = table();
        assert_eq!(
            table.resolve_version("01/06/2021"),
            ResolvedVersion::Exact("2.6.0".to_string())
        );
        assert_eq!(
            table.resolve_version("2021-01-10"),
            ResolvedVersion::Exact("2.4.0".to_string())
        );
        // Strictly after: a link made on release day belongs to the next one.
        assert_eq!(
            table.resolve_version("15/09/2021"),
            ResolvedVersion::Exact("3.0.0".to_string())
        );
    }

    #[test]
    fn date_after_every_release_is_latest() {
        assert_eq!(table().resolve_version("01/01/2030"), ResolvedVersion::Latest);
    }

    #[test]
    fn unparseable_date_is_kept() {
        assert_eq!(
            table().resolve_version("yesterday"),
            ResolvedVersion::Exact("yesterday".to_string())
        );
    }

    #[test]
    fn default_table_redirects_3_0_0_only() {
        let table = CompatTable::default();
        assert!(table.requires_redirect("3.0.0"));
        assert!(!table.requires_redirect("3.1.0"));
        assert!(!table.requires_redirect("3.4.1"));
    }

    #[test]
    fn parses_from_json() {
        let table: CompatTable = serde_json::from_str(
            r#"{"redirect":{"2.6.0":true},"release_dates":{"2.6.0":"2021-09-15"}}"#,
        )
        .expect("parse");
        assert!(table.requires_redirect("2.6.0"));
        assert!(!table.requires_redirect("3.0.0"));
        assert_eq!(table.release_dates.len(), 1);
    }

    #[test]
    fn archive_url_keeps_token() {
        assert_eq!(
            archive_url("https://vyxal.github.io/versions/", "3.0.0", "abc"),
            "https://vyxal.github.io/versions/v3.0.0#abc"
        );
    }
}
