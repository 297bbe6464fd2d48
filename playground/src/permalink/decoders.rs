//! Token encodings, newest first.
//!
//! Each decoder turns a token into a JSON value or fails; [`DECODERS`] lists
//! them in the order they are tried. The first success wins.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::permalink::legacy::{UriError, decode_uri_component, js_escape, latin1};

/// First byte of a compressed payload holding MessagePack instead of JSON.
/// `0xC1` is never used by MessagePack and cannot start JSON text.
pub const MSGPACK_MARKER: u8 = 0xC1;

/// Largest decompressed payload accepted from a token.
pub const MAX_PAYLOAD_BYTES: u64 = 1024 * 1024;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("decompressed payload exceeds {MAX_PAYLOAD_BYTES} bytes")]
    TooLarge,
    #[error("msgpack: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("uri: {0}")]
    Uri(#[from] UriError),
}

pub type Decoder = fn(&str) -> Result<Value, AttemptError>;

/// Decoders in the order they are tried.
pub const DECODERS: &[(&str, Decoder)] = &[
    ("compressed", compressed),
    ("base64_json", base64_json),
    ("escaped_base64_json", escaped_base64_json),
];

/// Run every decoder in order and return the first value produced.
pub fn decode_value(token: &str) -> Option<Value> {
    for (name, decoder) in DECODERS {
        match decoder(token) {
            Ok(value) => {
                debug!(decoder = name, "permalink decoded");
                return Some(value);
            }
            Err(e) => debug!(decoder = name, err = %e, "permalink decoder did not apply"),
        }
    }
    None
}

/// Current links: base64url, gzip, then MessagePack (marked) or JSON text.
pub fn compressed(token: &str) -> Result<Value, AttemptError> {
    let packed = URL_SAFE_LENIENT.decode(token)?;
    let mut payload = Vec::new();
    GzDecoder::new(packed.as_slice())
        .take(MAX_PAYLOAD_BYTES + 1)
        .read_to_end(&mut payload)?;
    if payload.len() as u64 > MAX_PAYLOAD_BYTES {
        return Err(AttemptError::TooLarge);
    }
    match payload.split_first() {
        Some((&MSGPACK_MARKER, body)) => Ok(rmp_serde::from_slice(body)?),
        _ => Ok(serde_json::from_slice(&payload)?),
    }
}

/// Uncompressed links: base64 of percent-encoded JSON text.
pub fn base64_json(token: &str) -> Result<Value, AttemptError> {
    let text = decode_uri_component(&latin1(&decode_base64_any(token)?))?;
    Ok(serde_json::from_str(&text)?)
}

/// Oldest links: base64 of raw UTF-8 JSON, recovered through `escape()`.
pub fn escaped_base64_json(token: &str) -> Result<Value, AttemptError> {
    let text = decode_uri_component(&js_escape(&latin1(&decode_base64_any(token)?)))?;
    Ok(serde_json::from_str(&text)?)
}

fn decode_base64_any(token: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_LENIENT
        .decode(token)
        .or_else(|_| URL_SAFE_LENIENT.decode(token))
}

/// gzip `payload` and render it as base64url without padding.
pub fn compress(payload: &[u8]) -> std::io::Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(payload)?;
    let packed = encoder.finish()?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(packed))
}

/// Uncompressed token readable by [`base64_json`].
pub fn plain(json: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(crate::permalink::legacy::encode_uri_component(json))
}
