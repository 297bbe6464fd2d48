//! Permalink codec: sessions to shareable URL-fragment tokens and back.
//!
//! Encoding always writes the current format as a marked MessagePack record,
//! gzip-compressed and rendered as base64url. Decoding walks the historical
//! encodings in [`decoders::DECODERS`], migrates old record shapes and checks
//! the declared interpreter version against a [`CompatTable`].

pub mod compat;
pub mod decoders;
pub mod format;
pub mod legacy;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::session::{InputGroup, Session};

pub use compat::{CompatTable, ResolvedVersion, archive_url};

pub const CURRENT_FORMAT: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permalink {
    pub format: u32,
    pub flags: Vec<String>,
    pub header: String,
    pub code: String,
    pub footer: String,
    /// `(group name, raw inputs)` in group order.
    pub inputs: Vec<(String, Vec<String>)>,
    pub version: String,
}

impl Permalink {
    /// Capture `session`. `default_version` is used when the session has none.
    pub fn from_session(session: &Session, default_version: &str) -> Self {
        let version = if session.interpreter_version.is_empty() {
            default_version.to_string()
        } else {
            session.interpreter_version.clone()
        };
        Self {
            format: CURRENT_FORMAT,
            flags: session.flags.clone(),
            header: session.header.clone(),
            code: session.code.clone(),
            footer: session.footer.clone(),
            inputs: session
                .input_groups
                .iter()
                .map(|group| (group.name.clone(), group.lines()))
                .collect(),
            version,
        }
    }

    /// Rebuild an editable session; inputs get fresh ids.
    pub fn into_session(self) -> Session {
        Session {
            header: self.header,
            code: self.code,
            footer: self.footer,
            flags: self.flags,
            input_groups: self
                .inputs
                .into_iter()
                .map(|(name, inputs)| InputGroup::new(name, inputs))
                .collect(),
            interpreter_version: self.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Compatible(Permalink),
    /// Needs the archived build for `version`.
    Incompatible { version: String },
    /// No known encoding matched.
    Unparseable,
    /// Decoded, but not a permalink record.
    Malformed(String),
}

/// Encode `permalink` as a current-format token. Never fails.
pub fn encode(permalink: &Permalink) -> String {
    let record = Permalink {
        format: CURRENT_FORMAT,
        ..permalink.clone()
    };
    let payload = match rmp_serde::to_vec_named(&record) {
        Ok(packed) => {
            let mut payload = Vec::with_capacity(packed.len() + 1);
            payload.push(decoders::MSGPACK_MARKER);
            payload.extend(packed);
            payload
        }
        Err(e) => {
            warn!(err = %e, "msgpack encoding failed, falling back to json");
            json_text(&record).into_bytes()
        }
    };
    match decoders::compress(&payload) {
        Ok(token) => token,
        Err(e) => {
            warn!(err = %e, "compression failed, emitting uncompressed token");
            decoders::plain(&json_text(&record))
        }
    }
}

fn json_text(record: &Permalink) -> String {
    // A struct of strings and integers always serializes.
    serde_json::to_string(record).unwrap_or_default()
}

/// Decode a token (optionally with a leading `#`) against `compat`.
pub fn decode(token: &str, compat: &CompatTable) -> DecodeOutcome {
    let token = token.trim();
    let token = token.strip_prefix('#').unwrap_or(token);
    if token.is_empty() {
        return DecodeOutcome::Unparseable;
    }
    let Some(value) = decoders::decode_value(token) else {
        warn!("permalink matched no known encoding");
        return DecodeOutcome::Unparseable;
    };
    let permalink = match format::classify(value) {
        Ok(format::Classified::Record(permalink)) => permalink,
        Ok(format::Classified::Legacy { version }) => {
            debug!(version = %version, "legacy array permalink");
            return DecodeOutcome::Incompatible { version };
        }
        Err(reason) => {
            warn!(reason = %reason, "permalink is structured incorrectly");
            return DecodeOutcome::Malformed(reason);
        }
    };
    match compat.resolve_version(&permalink.version) {
        ResolvedVersion::Latest => DecodeOutcome::Compatible(permalink),
        ResolvedVersion::Exact(version) if compat.requires_redirect(&version) => {
            DecodeOutcome::Incompatible { version }
        }
        ResolvedVersion::Exact(_) => DecodeOutcome::Compatible(permalink),
    }
}
