//! Identifiers derived from the env secret.
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Account, project and environment the env secret belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvScope {
    pub account_id: String,
    pub project_id: String,
    pub env_id: String,
}

impl EnvScope {
    /// Decode the scope from an env secret: base64 text whose `__`-separated parts 1, 2 and 3 are
    /// the account, project and environment ids.
    pub fn from_env_secret(env_secret: &str) -> Result<EnvScope> {
        let decoded = BASE64
            .decode(env_secret)
            .map_err(|_| Error::InvalidEnvSecret)?;
        let text = String::from_utf8(decoded).map_err(|_| Error::InvalidEnvSecret)?;
        let parts: Vec<&str> = text.split("__").collect();
        match parts.as_slice() {
            [_, account_id, project_id, env_id, ..] => Ok(EnvScope {
                account_id: (*account_id).to_owned(),
                project_id: (*project_id).to_owned(),
                env_id: (*env_id).to_owned(),
            }),
            _ => Err(Error::InvalidEnvSecret),
        }
    }

    /// Id of the flag with the human-readable key `flag_key` in this environment.
    pub fn flag_id(&self, flag_key: &str) -> String {
        format!(
            "FF__{}__{}__{}__{}",
            self.account_id, self.project_id, self.env_id, flag_key
        )
    }
}

/// Build the short-lived connection token: the env secret with an obfuscated timestamp spliced
/// in at a random position.
pub fn build_token(env_secret: &str) -> String {
    let text = env_secret.trim_end_matches('=');
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let position = thread_rng().gen_range(0..text.len().max(1));
    build_token_with(env_secret, now, position)
}

fn build_token_with(env_secret: &str, now_millis: u64, position: usize) -> String {
    let text = env_secret.trim_end_matches('=');
    let mut start = position.max(2).min(text.len());
    while !text.is_char_boundary(start) {
        start -= 1;
    }

    let timestamp = now_millis.to_string();
    let timestamp_code = encode_number(now_millis, timestamp.len());
    format!(
        "{}{}{}{}{}",
        encode_number(start as u64, 3),
        encode_number(timestamp_code.len() as u64, 2),
        &text[..start],
        timestamp_code,
        &text[start..],
    )
}

/// Zero-pad `number` to `length` digits (keeping the lowest digits) and map each digit to a
/// letter.
fn encode_number(number: u64, length: usize) -> String {
    const ALPHABET: [char; 10] = ['Q', 'B', 'W', 'S', 'P', 'H', 'D', 'X', 'Z', 'U'];
    let padded = format!("{number:0length$}");
    padded[padded.len() - length..]
        .bytes()
        .map(|digit| ALPHABET[(digit - b'0') as usize])
        .collect()
}
