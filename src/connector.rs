//! Source connector trait and the conference registry.
//!
//! A connector knows how to enumerate one conference's paper listings and
//! turn a single link into a normalized [`PaperDraft`]. Call sites depend on
//! the trait and the registry, never on a concrete connector type.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use crate::models::{LinkRef, PaperDraft};

/// A pluggable conference source.
///
/// # Contract
///
/// - [`extract_links`](SourceConnector::extract_links) performs one or more
///   network fetches, parses an index page (or queries an API), and returns
///   an ordered sequence of opaque link references. Duplicates are not
///   guaranteed removed.
/// - [`process_link`](SourceConnector::process_link) is idempotent for the
///   same link, does not mutate connector state, and returns a
///   `RecordExtraction` error scoped to that link on unparseable content,
///   never an error that aborts sibling links.
#[async_trait]
pub trait SourceConnector: Send + Sync + std::fmt::Debug {
    /// Conference name recorded on ingested papers (e.g. `"NeurIPS"`).
    fn conference(&self) -> &str;

    async fn extract_links(&self) -> Result<Vec<LinkRef>>;

    async fn process_link(&self, link: &LinkRef) -> Result<PaperDraft>;
}

type ConnectorCtor = Box<dyn Fn(&str) -> Result<Box<dyn SourceConnector>> + Send + Sync>;

/// Maps a case-insensitive conference key to a connector constructor taking
/// a volume/year parameter. Unknown keys are a configuration error resolved
/// before any network activity begins.
pub struct ConnectorRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

struct RegistryEntry {
    description: String,
    ctor: ConnectorCtor,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in connectors.
    pub fn with_builtins(crawl: &CrawlConfig) -> Self {
        use crate::connector_neurips::NeurIpsConnector;
        use crate::connector_openreview::OpenReviewConnector;
        use crate::connector_pmlr::PmlrConnector;

        let mut registry = Self::new();

        let timeout = Duration::from_secs(crawl.fetch_timeout_secs);
        registry.register(
            "neurips",
            "NeurIPS proceedings (proceedings.neurips.cc)",
            Box::new(move |volume| {
                let connector = NeurIpsConnector::new(volume, timeout)?;
                Ok(Box::new(connector) as Box<dyn SourceConnector>)
            }),
        );
        registry.register(
            "pmlr",
            "PMLR volumes (proceedings.mlr.press)",
            Box::new(move |volume| {
                let connector = PmlrConnector::new(volume, timeout)?;
                Ok(Box::new(connector) as Box<dyn SourceConnector>)
            }),
        );
        let page_size = crawl.openreview_page_size;
        registry.register(
            "iclr",
            "ICLR submissions via the OpenReview API",
            Box::new(move |volume| {
                let connector = OpenReviewConnector::new(volume, timeout, page_size)?;
                Ok(Box::new(connector) as Box<dyn SourceConnector>)
            }),
        );

        registry
    }

    pub fn register(
        &mut self,
        key: &str,
        description: impl Into<String>,
        ctor: ConnectorCtor,
    ) {
        self.entries.insert(
            key.to_ascii_lowercase(),
            RegistryEntry {
                description: description.into(),
                ctor,
            },
        );
    }

    /// Resolve a conference key (case-insensitive) and volume to a connector.
    pub fn resolve(&self, key: &str, volume: &str) -> Result<Box<dyn SourceConnector>> {
        let entry = self.entries.get(&key.to_ascii_lowercase()).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown conference: '{}'. Available: {}",
                key,
                self.keys().join(", ")
            ))
        })?;
        (entry.ctor)(volume)
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// (key, description) pairs in sorted order.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.description.clone()))
            .collect()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared HTTP client for connector fetches, with the per-request deadline
/// that bounds pathological hangs.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("paperdex/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;

    #[test]
    fn resolve_is_case_insensitive() {
        let registry = ConnectorRegistry::with_builtins(&CrawlConfig::default());
        assert!(registry.resolve("NeurIPS", "2023").is_ok());
        assert!(registry.resolve("neurips", "2023").is_ok());
        assert!(registry.resolve("ICLR", "2024").is_ok());
    }

    #[test]
    fn unknown_key_is_configuration_error() {
        let registry = ConnectorRegistry::with_builtins(&CrawlConfig::default());
        let err = registry.resolve("kdd", "2023").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("kdd"));
    }

    #[test]
    fn builtin_keys_listed_sorted() {
        let registry = ConnectorRegistry::with_builtins(&CrawlConfig::default());
        assert_eq!(registry.keys(), vec!["iclr", "neurips", "pmlr"]);
    }
}
