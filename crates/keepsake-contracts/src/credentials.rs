use std::fmt;

use crate::settings::non_empty_env;

/// Opaque API token. Never printed through `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Where the generation credential comes from.
///
/// `request_credential` is the interactive hook (a prompt, a key picker); providers that cannot
/// ask anyone keep the default no-op.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Option<Credential>;

    fn has_credential(&self) -> bool {
        self.credential().is_some()
    }

    fn request_credential(&self) {}
}

/// Reads the first non-empty variable out of `keys`.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    keys: Vec<String>,
}

impl EnvCredentialProvider {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|key| (*key).to_string()).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new(&["GEMINI_API_KEY", "GOOGLE_API_KEY"])
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn credential(&self) -> Option<Credential> {
        self.keys
            .iter()
            .find_map(|key| non_empty_env(key))
            .and_then(Credential::new)
    }
}

/// A fixed credential (or none), for embedding callers that already hold a token.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    credential: Option<Credential>,
}

impl StaticCredentialProvider {
    pub fn new(credential: Option<Credential>) -> Self {
        Self { credential }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Credential, CredentialProvider, EnvCredentialProvider, StaticCredentialProvider};

    #[test]
    fn blank_credentials_are_rejected() {
        assert!(Credential::new("   ").is_none());
        assert_eq!(
            Credential::new("  abc \n").map(|value| value.expose().to_string()),
            Some("abc".to_string())
        );
    }

    #[test]
    fn debug_output_hides_the_token() {
        let credential = Credential::new("sk-secret").unwrap();
        let printed = format!("{credential:?}");
        assert!(!printed.contains("sk-secret"));
    }

    #[test]
    fn static_provider_reports_presence() {
        assert!(!StaticCredentialProvider::default().has_credential());
        let provider = StaticCredentialProvider::new(Credential::new("k"));
        assert!(provider.has_credential());
    }

    #[test]
    fn env_provider_ignores_unset_variables() {
        let provider = EnvCredentialProvider::new(&["KEEPSAKE_TEST_KEY_THAT_IS_NEVER_SET"]);
        assert!(!provider.has_credential());
        assert_eq!(provider.keys().len(), 1);
    }
}
