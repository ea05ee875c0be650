//! Wire codec for the long-polling probe request/response framing.
//!
//! Byte-level format dictated by the remote service, not open to
//! reinterpretation: `\u{0002}` separates fields within one config's
//! listening entry, `\u{0001}` terminates each entry.

use percent_encoding::percent_decode_str;

use crate::model::ConfigKey;

const WORD_SEPARATOR: char = '\u{02}';
const LINE_SEPARATOR: char = '\u{01}';

/// One entry in a probe request: the config being watched plus its last-known MD5.
pub struct ListenEntry<'a> {
    pub key: &'a ConfigKey,
    pub md5: &'a str,
}

/// Build the `Listening-Configs` form value for a batch of watched configs.
pub fn encode_listening_configs(entries: &[ListenEntry<'_>]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.key.data_id);
        out.push(WORD_SEPARATOR);
        out.push_str(&entry.key.group);
        out.push(WORD_SEPARATOR);
        out.push_str(entry.md5);
        if !entry.key.tenant.is_empty() {
            out.push(WORD_SEPARATOR);
            out.push_str(&entry.key.tenant);
        }
        out.push(LINE_SEPARATOR);
    }
    out
}

/// Parse a probe response body (already percent-decoded-once) into the set
/// of `ConfigKey`s the server reports as changed.
///
/// The body passed in is the raw HTTP response text, which is percent-encoded
/// exactly once by the server.
pub fn decode_changed_keys(body: &str) -> Vec<ConfigKey> {
    let decoded = percent_decode_str(body).decode_utf8_lossy().into_owned();

    decoded
        .split(LINE_SEPARATOR)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.split(WORD_SEPARATOR);
            let data_id = parts.next()?.to_string();
            let group = parts.next()?.to_string();
            let tenant = parts.next().unwrap_or("").to_string();
            if data_id.is_empty() || group.is_empty() {
                return None;
            }
            Some(ConfigKey {
                data_id,
                group,
                tenant,
            })
        })
        .collect()
}
