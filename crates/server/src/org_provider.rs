//! Organization context providers
//!
//! `StaticOrgProvider` loads per-organization TOML files at startup and
//! resolves by dialed number; `CachedOrgProvider` wraps any provider with
//! a time-bounded cache so hot numbers skip the lookup. Cache reads are
//! lock-free; invalidation is explicit on configuration changes.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use frontdesk_core::{normalize_e164, Error, OrgContextProvider, OrganizationContext, Result};

/// Cache entry lifetime.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Provider backed by TOML files in a directory, keyed by dialed number.
pub struct StaticOrgProvider {
    orgs: DashMap<String, OrganizationContext>,
    /// Organization to fall back to when a number has no mapping.
    default_org_id: Option<String>,
}

impl StaticOrgProvider {
    /// Load every `*.toml` in the directory. Files that fail to parse are
    /// skipped with a warning; the server still starts.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let orgs = DashMap::new();
        let dir = dir.as_ref();

        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::Config(format!("orgs directory {}: {e}", dir.display())))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable org file");
                    continue;
                }
            };
            match toml::from_str::<OrganizationContext>(&raw) {
                Ok(org) => {
                    let number = match normalize_e164(&org.dialed_number) {
                        Ok(number) => number,
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e,
                                "org has unparseable dialed number");
                            continue;
                        }
                    };
                    tracing::info!(org = %org.id, %number, "loaded organization");
                    orgs.insert(number, org);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid org file");
                }
            }
        }

        Ok(Self {
            orgs,
            default_org_id: None,
        })
    }

    /// Provider with no mappings; every call gets the default context.
    pub fn empty() -> Self {
        Self {
            orgs: DashMap::new(),
            default_org_id: None,
        }
    }

    /// Use the named organization's context for unmapped numbers instead
    /// of the generic default.
    pub fn with_default_org(mut self, org_id: impl Into<String>) -> Self {
        let org_id = org_id.into();
        if !org_id.is_empty() {
            self.default_org_id = Some(org_id);
        }
        self
    }

    /// Register an organization directly (tests, fixtures).
    pub fn insert(&self, org: OrganizationContext) {
        let key = normalize_e164(&org.dialed_number).unwrap_or_else(|_| org.dialed_number.clone());
        self.orgs.insert(key, org);
    }

    pub fn len(&self) -> usize {
        self.orgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orgs.is_empty()
    }
}

#[async_trait]
impl OrgContextProvider for StaticOrgProvider {
    async fn resolve(&self, dialed_e164: &str) -> Result<OrganizationContext> {
        let number = normalize_e164(dialed_e164)?;
        if let Some(org) = self.orgs.get(&number) {
            return Ok(org.clone());
        }

        if let Some(ref default_id) = self.default_org_id {
            if let Some(org) = self
                .orgs
                .iter()
                .find(|entry| &entry.value().id == default_id)
            {
                tracing::debug!(%number, org = %default_id, "unmapped number, using default organization");
                return Ok(org.clone());
            }
        }

        tracing::debug!(%number, "no organization mapping, using default context");
        Ok(OrganizationContext::default_for(&number))
    }
}

/// Time-bounded read-through cache over any provider.
pub struct CachedOrgProvider {
    inner: Arc<dyn OrgContextProvider>,
    cache: DashMap<String, (OrganizationContext, Instant)>,
    ttl: Duration,
}

impl CachedOrgProvider {
    pub fn new(inner: Arc<dyn OrgContextProvider>) -> Self {
        Self::with_ttl(inner, CACHE_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn OrgContextProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Drop one number's cached context (configuration changed).
    pub fn invalidate(&self, dialed_e164: &str) {
        if let Ok(number) = normalize_e164(dialed_e164) {
            self.cache.remove(&number);
        }
    }

    /// Drop everything cached.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl OrgContextProvider for CachedOrgProvider {
    async fn resolve(&self, dialed_e164: &str) -> Result<OrganizationContext> {
        let number = normalize_e164(dialed_e164)?;

        if let Some(entry) = self.cache.get(&number) {
            let (org, cached_at) = entry.value();
            if cached_at.elapsed() < self.ttl {
                return Ok(org.clone());
            }
        }

        let org = self.inner.resolve(&number).await?;
        self.cache.insert(number, (org.clone(), Instant::now()));
        Ok(org)
    }
}
