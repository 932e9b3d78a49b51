//! Hand-rolled HTTP Digest authentication (RFC 2617). No ready-made
//! server-side digest crate exists in this ecosystem, so this is built
//! directly against `md-5`, the same posture as relying on a single hash
//! primitive rather than a framework-specific auth middleware.

use std::collections::HashMap;

use md5::{Digest, Md5};
use rand::RngCore;

/// A digest challenge issued to a client that presented no or invalid
/// credentials.
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: String,
}

impl Challenge {
    pub fn new(realm: &str) -> Self {
        Self {
            realm: realm.to_string(),
            nonce: random_hex(16),
            opaque: random_hex(16),
        }
    }

    /// Value of the `WWW-Authenticate` response header.
    pub fn header_value(&self) -> String {
        format!(
            r#"Digest realm="{}", qop="auth", nonce="{}", opaque="{}""#,
            self.realm, self.nonce, self.opaque
        )
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Parsed `Authorization: Digest ...` header fields.
#[derive(Debug)]
pub struct DigestCredentials {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
}

impl DigestCredentials {
    /// Parse the comma-separated `key="value"` pairs following `Digest `.
    pub fn parse(header: &str) -> Option<Self> {
        let rest = header.strip_prefix("Digest ")?;
        let mut fields: HashMap<String, String> = HashMap::new();
        for part in split_digest_fields(rest) {
            if let Some((key, value)) = part.split_once('=') {
                let value = value.trim().trim_matches('"').to_string();
                fields.insert(key.trim().to_string(), value);
            }
        }
        Some(Self {
            username: fields.remove("username")?,
            realm: fields.remove("realm")?,
            nonce: fields.remove("nonce")?,
            uri: fields.remove("uri")?,
            response: fields.remove("response")?,
            qop: fields.remove("qop"),
            nc: fields.remove("nc"),
            cnonce: fields.remove("cnonce"),
        })
    }

    /// Verify `response` against the account's plaintext password, the
    /// request method, and the issued nonce, per RFC 2617 §3.2.2.1.
    pub fn verify(&self, password: &str, method: &str, expected_nonce: &str) -> bool {
        if self.nonce != expected_nonce {
            return false;
        }
        let ha1 = md5_hex(&format!("{}:{}:{}", self.username, self.realm, password));
        let ha2 = md5_hex(&format!("{method}:{}", self.uri));
        let expected = match (&self.qop, &self.nc, &self.cnonce) {
            (Some(qop), Some(nc), Some(cnonce)) => {
                md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}", self.nonce))
            }
            _ => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        };
        expected == self.response
    }
}

/// Split `key="value, with, commas", key2=value2` on top-level commas,
/// respecting quoted substrings.
fn split_digest_fields(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}
