//! The bastion's authorized-key table (§4.8 "Accept loop").
//!
//! An empty table — whether because the file is empty or simply missing —
//! means accept-any, which is explicitly insecure and logged as such at
//! startup. Lines that fail to parse are skipped with a warning rather than
//! failing startup.

use std::path::Path;

use russh_keys::key::PublicKey;

#[derive(Debug, Default)]
pub struct AuthorizedKeys {
    keys: Vec<PublicKey>,
}

impl AuthorizedKeys {
    pub fn empty() -> Self {
        AuthorizedKeys::default()
    }

    /// Loads an OpenSSH-format `authorized_keys` file. A missing file is
    /// treated the same as an empty one.
    pub async fn load(path: impl AsRef<Path>) -> AuthorizedKeys {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "authorized-keys file missing or unreadable, accepting any client key");
                return AuthorizedKeys::empty();
            }
        };

        let mut keys = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some(key) => keys.push(key),
                None => {
                    tracing::warn!(path = %path.display(), line = lineno + 1, "skipping unparsable authorized-keys line");
                }
            }
        }

        if keys.is_empty() {
            tracing::warn!(path = %path.display(), "authorized-keys table is empty, accepting any client key");
        }
        AuthorizedKeys { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Accept-any when the table is empty; otherwise require a fingerprint
    /// match.
    pub fn accepts(&self, key: &PublicKey) -> bool {
        if self.keys.is_empty() {
            return true;
        }
        let fingerprint = key.fingerprint();
        self.keys.iter().any(|k| k.fingerprint() == fingerprint)
    }
}

/// Parses one `<type> <base64> [comment]` authorized_keys line.
fn parse_line(line: &str) -> Option<PublicKey> {
    let base64_field = line.split_whitespace().nth(1)?;
    russh_keys::parse_public_key_base64(base64_field).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_accepts_any_key() {
        let table = AuthorizedKeys::empty();
        assert!(table.is_empty());
    }

    #[test]
    fn unparsable_line_is_skipped_not_fatal() {
        assert!(parse_line("not a valid key line").is_none());
        assert!(parse_line("").is_none());
    }
}
