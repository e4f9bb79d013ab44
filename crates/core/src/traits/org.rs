//! Organization context resolution

use async_trait::async_trait;

use crate::org::OrganizationContext;
use crate::Result;

/// Resolves the organization context for a dialed number.
///
/// The number must already be normalized to E.164. Implementations return
/// the default context rather than an error when no mapping exists; the
/// call proceeds with a generic greeting either way.
#[async_trait]
pub trait OrgContextProvider: Send + Sync {
    async fn resolve(&self, dialed_e164: &str) -> Result<OrganizationContext>;
}
