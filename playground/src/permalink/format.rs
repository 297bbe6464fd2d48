//! Record shapes across permalink formats and migration to the current one.

use serde::Deserialize;
use serde_json::Value;

use crate::permalink::{CURRENT_FORMAT, Permalink};

/// A decoded JSON value, sorted into what it can become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Record(Permalink),
    /// Pre-versioning array record; always needs an archived build.
    Legacy { version: String },
}

/// Format 2: a single flat input list.
#[derive(Debug, Deserialize)]
struct FlatInputs {
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    header: String,
    code: String,
    #[serde(default)]
    footer: String,
    inputs: Vec<String>,
    version: String,
}

impl From<FlatInputs> for Permalink {
    fn from(old: FlatInputs) -> Self {
        let inputs = if old.inputs.is_empty() {
            Vec::new()
        } else {
            vec![("Default".to_string(), old.inputs)]
        };
        Permalink {
            format: CURRENT_FORMAT,
            flags: old.flags,
            header: old.header,
            code: old.code,
            footer: old.footer,
            inputs,
            version: old.version,
        }
    }
}

/// Classify `value` and migrate records to the current format.
///
/// Returns a human-readable reason when the value is not a permalink.
pub fn classify(value: Value) -> Result<Classified, String> {
    if let Value::Array(items) = &value {
        let version = match items.get(5) {
            Some(Value::String(version)) => version.clone(),
            Some(Value::Number(version)) => version.to_string(),
            _ => String::new(),
        };
        return Ok(Classified::Legacy { version });
    }
    let format = value
        .as_object()
        .ok_or_else(|| "expected an object or array".to_string())?
        .get("format")
        .ok_or_else(|| "missing format".to_string())?
        .as_u64()
        .ok_or_else(|| "format is not an integer".to_string())?;
    match format {
        2 => serde_json::from_value::<FlatInputs>(value)
            .map(|old| Classified::Record(old.into()))
            .map_err(|e| format!("format 2 record: {e}")),
        3 | 4 => serde_json::from_value::<Permalink>(value)
            .map(|mut record| {
                record.format = CURRENT_FORMAT;
                Classified::Record(record)
            })
            .map_err(|e| format!("format {format} record: {e}")),
        other => Err(format!("unsupported format {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_inputs_become_default_group() {
        let value = json!({"format": 2, "code": "+", "inputs": ["a", "b"], "version": "2.6.0"});
        let Ok(Classified::Record(record)) = classify(value) else {
            panic!("expected record");
        };
        assert_eq!(record.format, CURRENT_FORMAT);
        assert_eq!(
            record.inputs,
            vec![("Default".to_string(), vec!["a".to_string(), "b".to_string()])]
        );
        assert!(record.flags.is_empty());
    }

    #[test]
    fn empty_flat_inputs_become_no_groups() {
        let value = json!({"format": 2, "code": "", "inputs": [], "version": "2.6.0"});
        let Ok(Classified::Record(record)) = classify(value) else {
            panic!("expected record");
        };
        assert!(record.inputs.is_empty());
    }

    #[test]
    fn format_3_is_upgraded_in_place() {
        let value = json!({
            "format": 3, "flags": ["j"], "header": "", "code": "1", "footer": "",
            "inputs": [["G", ["x"]]], "version": "3.4.1"
        });
        let Ok(Classified::Record(record)) = classify(value) else {
            panic!("expected record");
        };
        assert_eq!(record.format, 4);
        assert_eq!(record.inputs[0].0, "G");
    }

    #[test]
    fn arrays_are_legacy() {
        assert_eq!(
            classify(json!(["code", "", "", "", "", "2.1.0"])),
            Ok(Classified::Legacy {
                version: "2.1.0".to_string()
            })
        );
        assert_eq!(
            classify(json!([1, 2])),
            Ok(Classified::Legacy {
                version: String::new()
            })
        );
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(classify(json!({"format": 9})).is_err());
        assert!(classify(json!({"code": "x"})).is_err());
        assert!(classify(json!({"format": 3, "code": 5})).is_err());
        assert!(classify(json!("text")).is_err());
    }
}
