//! Client/agent to provider-agent mappings.

use serde::{Deserialize, Serialize};

use crate::{AgentId, ClientId, ProviderId, TenantId};

/// Maps an internal agent to the identifier a provider uses for it.
///
/// Owned by the external directory service; collectors only read it to attribute vendor
/// records (a Retell agent ID, a Twilio phone number) to internal agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAgentMapping {
    /// Tenant owning the agent.
    pub tenant_id: TenantId,
    /// Client owning the agent.
    pub client_id: ClientId,
    /// Internal agent.
    pub agent_id: AgentId,
    /// Provider the external identifier belongs to.
    pub provider: ProviderId,
    /// Provider-side identifier (agent ID, phone number, API key label...).
    pub external_agent_id: String,
    /// Inactive mappings are ignored during attribution.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

/// Resolve the internal agent for a provider-side identifier.
///
/// Only active mappings of the given provider are considered.
#[must_use]
pub fn resolve_agent<'a>(
    mappings: &'a [ClientAgentMapping],
    provider: &ProviderId,
    external_agent_id: &str,
) -> Option<&'a AgentId> {
    mappings
        .iter()
        .find(|m| m.active && &m.provider == provider && m.external_agent_id == external_agent_id)
        .map(|m| &m.agent_id)
}
