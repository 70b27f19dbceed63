//! Static credentials for the object store client.

use aws_sdk_s3::config::Credentials;

/// Provider name attached to credentials built from configuration.
const PROVIDER_NAME: &str = "artifact-publisher-config";

/// Access/secret key pair read once from configuration.
///
/// No format checks are made here; a malformed key surfaces as an
/// authentication failure from the store.
#[derive(Clone)]
pub struct CredentialProvider {
    access_key: String,
    secret_key: String,
}

impl CredentialProvider {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Build SDK credentials (no session token, no expiry).
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            &self.access_key,
            &self.secret_key,
            None,
            None,
            PROVIDER_NAME,
        )
    }
}

impl std::fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_carry_keys() {
        let provider = CredentialProvider::new("access", "secret");
        let creds = provider.credentials();
        assert_eq!(creds.access_key_id(), "access");
        assert_eq!(creds.secret_access_key(), "secret");
        assert!(creds.session_token().is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let provider = CredentialProvider::new("access", "hunter2");
        let rendered = format!("{provider:?}");
        assert!(rendered.contains("access"));
        assert!(!rendered.contains("hunter2"));
    }
}
