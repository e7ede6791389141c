//! Supported chat sites and hostname matching
//!
//! A registry maps a domain key to a [`SiteProfile`]. Lookups try the exact
//! key first, then the first key (in registration order) that the hostname
//! ends with as a subdomain. New sites can be registered at runtime.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{DockError, Result};

/// How to recognize and drive one chat site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteProfile {
    pub display_name:              String,
    /// Tried in order; the first selector with a match wins
    #[serde(default)]
    pub input_selectors:           Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_container_selector: Option<String>,
}

impl SiteProfile {
    pub fn new(display_name: impl Into<String>, input_selectors: &[&str]) -> Self {
        SiteProfile {
            display_name:              display_name.into(),
            input_selectors:           input_selectors.iter().map(|s| s.to_string()).collect(),
            output_container_selector: None,
        }
    }

    pub fn with_output_container(mut self, selector: impl Into<String>) -> Self {
        self.output_container_selector = Some(selector.into());
        self
    }
}

/// Insertion-ordered domain -> profile table
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    entries: Vec<(String, SiteProfile)>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ChatGPT, Claude, Perplexity and Gemini.
    ///
    /// Perplexity and Gemini have no known input selector yet, so locating
    /// their input always misses.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert("chat.openai.com", SiteProfile::new("ChatGPT", &["textarea"]));
        registry.insert("claude.ai", SiteProfile::new("Claude", &["textarea"]));
        registry.insert("perplexity.ai", SiteProfile::new("Perplexity", &[]));
        registry.insert("gemini.google.com", SiteProfile::new("Gemini", &[]));
        registry
    }

    /// Add or replace the profile for `domain`
    ///
    /// A replaced entry keeps its position; its profile is swapped whole.
    pub fn register(&mut self, domain: &str, profile: SiteProfile) -> Result<()> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(DockError::validation("domain must be a non-empty string."));
        }
        self.insert(&domain.to_ascii_lowercase(), profile);
        Ok(())
    }

    fn insert(&mut self, domain: &str, profile: SiteProfile) {
        match self.entries.iter_mut().find(|(key, _)| key == domain) {
            Some((_, existing)) => *existing = profile,
            None => self.entries.push((domain.to_string(), profile)),
        }
    }

    /// Find the profile for a page hostname
    pub fn resolve(&self, hostname: &str) -> Option<&SiteProfile> {
        self.resolve_entry(hostname).map(|(_, profile)| profile)
    }

    /// Like [`resolve`](Self::resolve), also returning the matched domain key
    pub fn resolve_entry(&self, hostname: &str) -> Option<(&str, &SiteProfile)> {
        if hostname.is_empty() {
            return None;
        }
        let hostname = hostname.to_ascii_lowercase();

        if let Some((key, profile)) = self.entries.iter().find(|(key, _)| *key == hostname) {
            return Some((key.as_str(), profile));
        }

        self.entries
            .iter()
            .find(|(key, _)| is_subdomain_of(&hostname, key))
            .map(|(key, profile)| (key.as_str(), profile))
    }

    /// Whether the background may act on a tab showing `url`
    pub fn supports_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "https" => parsed
                .host_str()
                .map(|host| self.resolve(host).is_some())
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_subdomain_of(hostname: &str, domain: &str) -> bool {
    hostname.len() > domain.len()
        && hostname.ends_with(domain)
        && hostname.as_bytes()[hostname.len() - domain.len() - 1] == b'.'
}
