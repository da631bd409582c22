//! Source API credential lookup
//!
//! Workers resolve keys through this interface; the rate-limit manager
//! never sees credentials. Per-user key overrides plug in behind the same
//! trait.

use paperscout_common::config::SourceSettings;
use paperscout_common::models::DiscoverySource;
use uuid::Uuid;

/// Credential lookup for outbound source APIs
pub trait Credentials: Send + Sync {
    /// The API key to use for `source`, optionally scoped to a user.
    /// `None` means the source is called unauthenticated (Crossref) or is
    /// unavailable (Perplexity without a token).
    fn credentials_for(&self, source: DiscoverySource, user_id: Option<Uuid>) -> Option<String>;
}

/// Fixed platform-level credentials from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    semantic_scholar: Option<String>,
    perplexity: Option<String>,
}

impl StaticCredentials {
    pub fn new(semantic_scholar: Option<String>, perplexity: Option<String>) -> Self {
        Self {
            semantic_scholar,
            perplexity,
        }
    }

    pub fn from_settings(settings: &SourceSettings) -> Self {
        Self {
            semantic_scholar: settings.semantic_scholar.api_key.clone(),
            perplexity: settings.perplexity.api_key.clone(),
        }
    }
}

impl Credentials for StaticCredentials {
    fn credentials_for(&self, source: DiscoverySource, _user_id: Option<Uuid>) -> Option<String> {
        match source {
            DiscoverySource::SemanticScholar => self.semantic_scholar.clone(),
            DiscoverySource::Perplexity => self.perplexity.clone(),
            DiscoverySource::Crossref | DiscoverySource::InternalCache => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_lookup() {
        let creds = StaticCredentials::new(Some("s2-key".into()), None);
        assert_eq!(
            creds.credentials_for(DiscoverySource::SemanticScholar, None),
            Some("s2-key".into())
        );
        assert_eq!(creds.credentials_for(DiscoverySource::Perplexity, None), None);
        assert_eq!(creds.credentials_for(DiscoverySource::Crossref, None), None);
    }
}
