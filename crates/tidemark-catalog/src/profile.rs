//! Server connection profiles.
//!
//! A [`ServerProfile`] is the resolved form of one named entry from the
//! external credential/config store. Secret resolution and
//! encryption-at-rest are the collaborator's concern; this crate
//! consumes the already-decrypted record once at startup.

use serde::Deserialize;

/// Username sentinel selecting bearer-token authentication: when the
/// profile's `username` equals this value, `secret` is an API token
/// rather than a password.
pub const TOKEN_USERNAME: &str = "<TOKEN>";

/// Resolved connection settings for one named remote server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerProfile {
    /// Base URL of the service (e.g. `https://node77.example.com`).
    pub url: String,
    /// Account name, or [`TOKEN_USERNAME`] for token auth.
    pub username: String,
    /// Password or API token, depending on `username`.
    pub secret: String,
    /// Whether to verify TLS certificates.
    #[serde(default = "default_verify")]
    pub verify: bool,
    /// Per-request record cap used as the pagination fetch count.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u64,
    /// Per-request server-side processing budget, in seconds.
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time: u64,
}

const fn default_verify() -> bool {
    true
}

const fn default_max_batch_size() -> u64 {
    500
}

const fn default_max_execution_time() -> u64 {
    300
}

/// Credentials derived from a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Custom bearer scheme: `Authorization: Quoken <token>`.
    Token(String),
    /// HTTP basic authentication.
    Basic {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
}

impl ServerProfile {
    /// Derives the credentials to use for this profile.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        if self.username == TOKEN_USERNAME {
            Credentials::Token(self.secret.clone())
        } else {
            Credentials::Basic {
                username: self.username.clone(),
                password: self.secret.clone(),
            }
        }
    }

    /// Base URL with any trailing slash removed.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(username: &str) -> ServerProfile {
        ServerProfile {
            url: "https://quo.example.com/".to_string(),
            username: username.to_string(),
            secret: "s3cret".to_string(),
            verify: true,
            max_batch_size: 500,
            max_execution_time: 300,
        }
    }

    #[test]
    fn test_token_sentinel_selects_bearer() {
        let creds = profile(TOKEN_USERNAME).credentials();
        assert_eq!(creds, Credentials::Token("s3cret".to_string()));
    }

    #[test]
    fn test_plain_username_selects_basic() {
        let creds = profile("analyst").credentials();
        assert_eq!(
            creds,
            Credentials::Basic {
                username: "analyst".to_string(),
                password: "s3cret".to_string(),
            }
        );
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        assert_eq!(profile("x").base_url(), "https://quo.example.com");
    }

    #[test]
    fn test_deserialize_defaults() {
        let profile: ServerProfile = serde_json::from_str(
            r#"{"url": "https://a", "username": "u", "secret": "p"}"#,
        )
        .unwrap();
        assert!(profile.verify);
        assert_eq!(profile.max_batch_size, 500);
        assert_eq!(profile.max_execution_time, 300);
    }
}
