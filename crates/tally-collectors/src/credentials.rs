//! Credential vault boundary.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tally_core::{ProviderId, TenantId};

use crate::error::CollectorError;

/// A secret value that never appears in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret value, for building an authenticated request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Credentials for one provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// API key or auth token.
    pub secret: Secret,
    /// Account identifier, for vendors that scope URLs by account (Twilio SID).
    pub account_id: Option<String>,
}

impl Credential {
    /// A bare API key.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            secret: Secret::new(key),
            account_id: None,
        }
    }

    /// An account identifier with its token.
    #[must_use]
    pub fn account(account_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            secret: Secret::new(token),
            account_id: Some(account_id.into()),
        }
    }
}

/// External credential service, keyed by `(tenantId, provider)`.
///
/// `tenant = None` addresses the provider-wide credential used for health probes.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Look up a credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault cannot be reached.
    async fn credential(
        &self,
        tenant_id: Option<&TenantId>,
        provider: &ProviderId,
    ) -> Result<Option<Credential>, CollectorError>;
}

/// Fetch a credential or fail the call as an authentication failure.
pub(crate) async fn require_credential(
    vault: &dyn CredentialVault,
    tenant_id: Option<&TenantId>,
    provider: &ProviderId,
) -> Result<Credential, CollectorError> {
    vault
        .credential(tenant_id, provider)
        .await?
        .ok_or_else(|| {
            CollectorError::AuthenticationFailure(format!("no credential configured for {provider}"))
        })
}

/// Vault backed by a fixed map, loaded from configuration.
///
/// Tenant lookups fall back to the provider-wide entry.
#[derive(Debug, Clone, Default)]
pub struct StaticVault {
    entries: HashMap<(Option<TenantId>, ProviderId), Credential>,
}

impl StaticVault {
    /// Create an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider-wide credential.
    #[must_use]
    pub fn with_provider(mut self, provider: ProviderId, credential: Credential) -> Self {
        self.entries.insert((None, provider), credential);
        self
    }

    /// Set a tenant-specific credential.
    #[must_use]
    pub fn with_tenant(
        mut self,
        tenant_id: TenantId,
        provider: ProviderId,
        credential: Credential,
    ) -> Self {
        self.entries.insert((Some(tenant_id), provider), credential);
        self
    }
}

#[async_trait]
impl CredentialVault for StaticVault {
    async fn credential(
        &self,
        tenant_id: Option<&TenantId>,
        provider: &ProviderId,
    ) -> Result<Option<Credential>, CollectorError> {
        let tenant_entry = tenant_id.and_then(|t| {
            self.entries
                .get(&(Some(t.clone()), provider.clone()))
        });
        Ok(tenant_entry
            .or_else(|| self.entries.get(&(None, provider.clone())))
            .cloned())
    }
}
