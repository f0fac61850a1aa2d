//! Parses the telemetry target string `fqdn[:user[:secret]]` (§4.7, §9
//! "Target parsing" design note).

use ndg_service::Secret;

#[derive(Debug, Clone)]
pub struct Target {
    pub fqdn: String,
    pub user: String,
    pub secret: Secret,
}

/// Parses `raw`, applying the documented defaults: a missing user defaults
/// to `"admin"`; a missing secret defaults to `default_secret`. The secret
/// field consumes the remainder of the string (so a secret containing `:`
/// is not truncated).
pub fn parse_target(raw: &str, default_secret: &str) -> Target {
    let mut parts = raw.splitn(3, ':');
    let fqdn = parts.next().unwrap_or("").to_string();
    let user = parts
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("admin")
        .to_string();
    let secret = parts.next().filter(|s| !s.is_empty()).unwrap_or(default_secret);
    Target {
        fqdn,
        user,
        secret: Secret::new(secret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqdn_only_uses_defaults() {
        let t = parse_target("srl1.example.net", "default-secret");
        assert_eq!(t.fqdn, "srl1.example.net");
        assert_eq!(t.user, "admin");
        assert_eq!(t.secret.expose(), "default-secret");
    }

    #[test]
    fn fqdn_and_user_defaults_secret() {
        let t = parse_target("srl1.example.net:bob", "default-secret");
        assert_eq!(t.user, "bob");
        assert_eq!(t.secret.expose(), "default-secret");
    }

    #[test]
    fn fqdn_user_and_secret_all_given() {
        let t = parse_target("srl1.example.net:bob:hunter2", "default-secret");
        assert_eq!(t.fqdn, "srl1.example.net");
        assert_eq!(t.user, "bob");
        assert_eq!(t.secret.expose(), "hunter2");
    }

    #[test]
    fn secret_may_contain_colons() {
        let t = parse_target("srl1.example.net:bob:a:b:c", "default-secret");
        assert_eq!(t.secret.expose(), "a:b:c");
    }

    #[test]
    fn empty_user_segment_still_defaults() {
        let t = parse_target("srl1.example.net::hunter2", "default-secret");
        assert_eq!(t.user, "admin");
        assert_eq!(t.secret.expose(), "hunter2");
    }
}
