//! URI escaping helpers compatible with the browser functions old links were
//! produced with.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed percent-encoding at byte {offset}")]
pub struct UriError {
    pub offset: usize,
}

/// `encodeURIComponent`: everything except the unreserved marks is
/// percent-encoded as UTF-8.
pub fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&byte) {
            out.push(char::from(byte));
        } else {
            push_percent(&mut out, byte);
        }
    }
    out
}

/// `decodeURIComponent`: percent escapes must form valid UTF-8, otherwise the
/// whole input is rejected.
pub fn decode_uri_component(input: &str) -> Result<String, UriError> {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            let next = input[i..]
                .chars()
                .next()
                .ok_or(UriError { offset: i })?;
            out.push(next);
            i += next.len_utf8();
            continue;
        }

        let start = i;
        let lead = percent_byte(bytes, i).ok_or(UriError { offset: start })?;
        i += 3;
        let width = match lead {
            0x00..=0x7F => {
                out.push(char::from(lead));
                continue;
            }
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(UriError { offset: start }),
        };
        let mut encoded = vec![lead];
        for _ in 1..width {
            let byte = percent_byte(bytes, i).ok_or(UriError { offset: i })?;
            if byte & 0xC0 != 0x80 {
                return Err(UriError { offset: i });
            }
            encoded.push(byte);
            i += 3;
        }
        let decoded = std::str::from_utf8(&encoded).map_err(|_| UriError { offset: start })?;
        out.push_str(decoded);
    }
    Ok(out)
}

/// Legacy `escape()`: keeps `A-Z a-z 0-9 @*_+-./`, writes other UTF-16 code
/// units below 256 as `%XX` and the rest as `%uXXXX`.
pub fn js_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for unit in input.encode_utf16() {
        match u8::try_from(unit) {
            Ok(byte) if byte.is_ascii_alphanumeric() || b"@*_+-./".contains(&byte) => {
                out.push(char::from(byte));
            }
            Ok(byte) => push_percent(&mut out, byte),
            Err(_) => out.push_str(&format!("%u{unit:04X}")),
        }
    }
    out
}

/// Interpret raw bytes the way `atob` hands them to script: one char per byte.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn push_percent(out: &mut String, byte: u8) {
    out.push_str(&format!("%{byte:02X}"));
}

fn percent_byte(bytes: &[u8], at: usize) -> Option<u8> {
    if bytes.get(at) != Some(&b'%') {
        return None;
    }
    let hi = char::from(*bytes.get(at + 1)?).to_digit(16)?;
    let lo = char::from(*bytes.get(at + 2)?).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}
