//! Agent directory boundary.

use async_trait::async_trait;
use tally_core::{ClientAgentMapping, ClientId, ProviderId, TenantId};

use crate::error::CollectorError;

/// External directory of client/agent mappings.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Active and inactive mappings of a client for one provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be reached.
    async fn mappings(
        &self,
        tenant_id: &TenantId,
        client_id: &ClientId,
        provider: &ProviderId,
    ) -> Result<Vec<ClientAgentMapping>, CollectorError>;
}

/// Directory backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    mappings: Vec<ClientAgentMapping>,
}

impl StaticDirectory {
    /// Create a directory from a list of mappings.
    #[must_use]
    pub fn new(mappings: Vec<ClientAgentMapping>) -> Self {
        Self { mappings }
    }
}

#[async_trait]
impl AgentDirectory for StaticDirectory {
    async fn mappings(
        &self,
        tenant_id: &TenantId,
        client_id: &ClientId,
        provider: &ProviderId,
    ) -> Result<Vec<ClientAgentMapping>, CollectorError> {
        Ok(self
            .mappings
            .iter()
            .filter(|m| {
                &m.tenant_id == tenant_id && &m.client_id == client_id && &m.provider == provider
            })
            .cloned()
            .collect())
    }
}
