//! Service configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tally_collectors::{Credential, PriceQuote, StaticVault};
use tally_core::{ClientAgentMapping, ProviderId, TenantId};

/// Shortest dedup window the idempotency manager accepts.
pub const MIN_DEDUP_WINDOW_HOURS: u64 = 48;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/tally").
    pub data_dir: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Vendor API endpoints.
    pub providers: ProviderEndpoints,

    /// Vendor credentials.
    pub credentials: CredentialConfig,

    /// Prices used until a live pricing refresh succeeds, and for vendors without a
    /// pricing API.
    pub pricing: BTreeMap<ProviderId, BTreeMap<String, PriceQuote>>,

    /// Client/agent mappings served by the built-in directory.
    pub mappings: Vec<ClientAgentMapping>,

    /// Collection engine tuning.
    pub engine: EngineConfig,

    /// Aggregation quality thresholds.
    pub quality: QualityThresholds,
}

/// Base URLs of the vendor APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// Retell API (default: `<https://api.retellai.com>`).
    pub retell_base_url: String,
    /// Twilio API (default: `<https://api.twilio.com>`).
    pub twilio_base_url: String,
    /// OpenRouter API (default: `<https://openrouter.ai>`).
    pub openrouter_base_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            retell_base_url: "https://api.retellai.com".into(),
            twilio_base_url: "https://api.twilio.com".into(),
            openrouter_base_url: "https://openrouter.ai".into(),
        }
    }
}

/// One vendor secret.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretEntry {
    /// API key or auth token.
    pub api_key: String,
    /// Vendor account, for vendors that scope keys by account (Twilio SID).
    #[serde(default)]
    pub account_id: Option<String>,
}

impl std::fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEntry")
            .field("api_key", &"***")
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl SecretEntry {
    fn credential(&self) -> Credential {
        match &self.account_id {
            Some(account) => Credential::account(account.clone(), self.api_key.clone()),
            None => Credential::api_key(self.api_key.clone()),
        }
    }
}

/// Vendor credentials by provider, with optional per-tenant overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialConfig {
    /// Provider-wide credentials.
    #[serde(default)]
    pub providers: BTreeMap<String, SecretEntry>,
    /// Tenant-specific credentials, by tenant then provider.
    #[serde(default)]
    pub tenants: BTreeMap<String, BTreeMap<String, SecretEntry>>,
}

impl CredentialConfig {
    /// Build the credential vault. Entries with invalid identifiers are skipped.
    #[must_use]
    pub fn vault(&self) -> StaticVault {
        let mut vault = StaticVault::new();
        for (provider, entry) in &self.providers {
            match ProviderId::new(provider.as_str()) {
                Ok(provider) => vault = vault.with_provider(provider, entry.credential()),
                Err(e) => tracing::warn!(provider = %provider, error = %e, "Skipping credential"),
            }
        }
        for (tenant, entries) in &self.tenants {
            for (provider, entry) in entries {
                match (TenantId::new(tenant.as_str()), ProviderId::new(provider.as_str())) {
                    (Ok(tenant), Ok(provider)) => {
                        vault = vault.with_tenant(tenant, provider, entry.credential());
                    }
                    _ => tracing::warn!(tenant = %tenant, provider = %provider, "Skipping credential"),
                }
            }
        }
        vault
    }

    /// Whether a provider-wide credential is configured.
    #[must_use]
    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }
}

/// Collection engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on a single vendor call once it has its throttle slot; a call that
    /// exceeds it is a transient failure.
    pub call_timeout: Duration,
    /// Attempts per page for transient and rate-limited failures.
    pub page_attempts: u32,
    /// First backoff after a transient failure (doubles with each attempt).
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Longest `Retry-After` the engine waits out; longer ones fail the run.
    pub max_retry_after: Duration,
    /// Retention of the in-memory seen-set, at least 48 hours.
    pub dedup_window_hours: u64,
    /// Pricing snapshot refresh interval.
    pub pricing_refresh: Duration,
    /// Page size hint passed to collectors.
    pub page_size: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            page_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
            max_retry_after: Duration::from_secs(300),
            dedup_window_hours: MIN_DEDUP_WINDOW_HOURS,
            pricing_refresh: Duration::from_secs(3600),
            page_size: None,
        }
    }
}

/// Thresholds of the aggregation quality rules.
///
/// A rule whose threshold is unset does not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityThresholds {
    /// Shortfall against the trailing average event count still scored as complete
    /// (`0.1` = 10%).
    pub completeness_tolerance: Option<Decimal>,
    /// Standard deviations above the trailing average quantity that raise
    /// `high_usage_spike`.
    pub spike_std_devs: Option<Decimal>,
    /// Standard deviations from the trailing average cost that raise `cost_anomaly`.
    pub cost_std_devs: Option<Decimal>,
    /// Quarantined share of a group's events above which `missing_events` is raised.
    pub missing_events_ratio: Option<Decimal>,
    /// Whether distinct resources with identical timestamp, quantity and cost raise
    /// `duplicate_suspected`.
    pub detect_duplicates: bool,
    /// Prior cycles the trailing statistics look at.
    pub trailing_cycles: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            completeness_tolerance: None,
            spike_std_devs: None,
            cost_std_devs: None,
            missing_events_ratio: None,
            detect_duplicates: true,
            trailing_cycles: 6,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let engine_defaults = defaults.engine.clone();
        let quality_defaults = defaults.quality.clone();

        let mut pricing = defaults.pricing;
        if let Some(price) = env_parse::<Decimal>("RETELL_PRICE_PER_MINUTE") {
            set_price(&mut pricing, "retell", "retell.call_minutes", price);
        }
        if let Some(path) = env_var("PRICING_FILE") {
            match load_json_file::<BTreeMap<ProviderId, BTreeMap<String, PriceQuote>>>(&path) {
                Ok(file) => {
                    for (provider, prices) in file {
                        pricing.entry(provider).or_default().extend(prices);
                    }
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "Ignoring pricing file"),
            }
        }

        let mappings = env_var("AGENT_MAPPINGS_FILE")
            .map(|path| {
                load_json_file::<Vec<ClientAgentMapping>>(&path).unwrap_or_else(|e| {
                    tracing::warn!(path = %path, error = %e, "Ignoring agent mappings file");
                    Vec::new()
                })
            })
            .unwrap_or_default();

        let dedup_window_hours = env_parse("ENGINE_DEDUP_WINDOW_HOURS")
            .unwrap_or(engine_defaults.dedup_window_hours);
        if dedup_window_hours < MIN_DEDUP_WINDOW_HOURS {
            tracing::warn!(
                configured = dedup_window_hours,
                minimum = MIN_DEDUP_WINDOW_HOURS,
                "Dedup window below minimum, using minimum"
            );
        }

        Self {
            listen_addr: env_var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: env_var("DATA_DIR").unwrap_or(defaults.data_dir),
            service_api_key: env_var("SERVICE_API_KEY"),
            cors_origins: env_var("CORS_ORIGINS")
                .unwrap_or_else(|| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            providers: ProviderEndpoints {
                retell_base_url: env_var("RETELL_BASE_URL")
                    .unwrap_or(defaults.providers.retell_base_url),
                twilio_base_url: env_var("TWILIO_BASE_URL")
                    .unwrap_or(defaults.providers.twilio_base_url),
                openrouter_base_url: env_var("OPENROUTER_BASE_URL")
                    .unwrap_or(defaults.providers.openrouter_base_url),
            },
            credentials: load_credentials(),
            pricing,
            mappings,
            engine: EngineConfig {
                call_timeout: env_parse("ENGINE_CALL_TIMEOUT_SECONDS")
                    .map_or(engine_defaults.call_timeout, Duration::from_secs),
                page_attempts: env_parse::<u32>("ENGINE_RETRY_ATTEMPTS")
                    .map_or(engine_defaults.page_attempts, |n| n.max(1)),
                initial_backoff: env_parse("ENGINE_INITIAL_BACKOFF_MS")
                    .map_or(engine_defaults.initial_backoff, Duration::from_millis),
                max_backoff: env_parse("ENGINE_MAX_BACKOFF_MS")
                    .map_or(engine_defaults.max_backoff, Duration::from_millis),
                max_retry_after: env_parse("ENGINE_MAX_RETRY_AFTER_SECONDS")
                    .map_or(engine_defaults.max_retry_after, Duration::from_secs),
                dedup_window_hours: dedup_window_hours.max(MIN_DEDUP_WINDOW_HOURS),
                pricing_refresh: env_parse("ENGINE_PRICING_REFRESH_SECONDS")
                    .map_or(engine_defaults.pricing_refresh, Duration::from_secs),
                page_size: env_parse("ENGINE_PAGE_SIZE"),
            },
            quality: QualityThresholds {
                completeness_tolerance: env_parse("QUALITY_COMPLETENESS_TOLERANCE"),
                spike_std_devs: env_parse("QUALITY_SPIKE_STD_DEVS"),
                cost_std_devs: env_parse("QUALITY_COST_STD_DEVS"),
                missing_events_ratio: env_parse("QUALITY_MISSING_EVENTS_RATIO"),
                detect_duplicates: env_parse("QUALITY_DETECT_DUPLICATES")
                    .unwrap_or(quality_defaults.detect_duplicates),
                trailing_cycles: env_parse("QUALITY_TRAILING_CYCLES")
                    .unwrap_or(quality_defaults.trailing_cycles),
            },
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = %name, "Ignoring unparsable configuration value");
            None
        }
    }
}

fn set_price(
    pricing: &mut BTreeMap<ProviderId, BTreeMap<String, PriceQuote>>,
    provider: &str,
    key: &str,
    unit_cost: Decimal,
) {
    if let Ok(provider) = ProviderId::new(provider) {
        pricing
            .entry(provider)
            .or_default()
            .insert(key.to_string(), PriceQuote::new(unit_cost, "USD"));
    }
}

/// Load vendor credentials from the secrets file or environment.
fn load_credentials() -> CredentialConfig {
    let secret_paths = [".secrets/providers.json", "../.secrets/providers.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_json_file::<CredentialConfig>(path) {
            tracing::info!(path = %path, "Loaded provider secrets from file");
            return secrets;
        }
    }

    tracing::debug!("Provider secrets file not found, using environment variables");
    let mut providers = BTreeMap::new();
    if let Some(api_key) = env_var("RETELL_API_KEY") {
        providers.insert(
            "retell".to_string(),
            SecretEntry {
                api_key,
                account_id: None,
            },
        );
    }
    if let (Some(account_id), Some(api_key)) =
        (env_var("TWILIO_ACCOUNT_SID"), env_var("TWILIO_AUTH_TOKEN"))
    {
        providers.insert(
            "twilio".to_string(),
            SecretEntry {
                api_key,
                account_id: Some(account_id),
            },
        );
    }
    if let Some(api_key) = env_var("OPENROUTER_API_KEY") {
        providers.insert(
            "openrouter".to_string(),
            SecretEntry {
                api_key,
                account_id: None,
            },
        );
    }
    CredentialConfig {
        providers,
        tenants: BTreeMap::new(),
    }
}

/// Load a JSON file.
fn load_json_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let mut pricing = BTreeMap::new();
        set_price(
            &mut pricing,
            "retell",
            "retell.call_minutes",
            Decimal::new(7, 2),
        );
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tally".into(),
            service_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 4 * 1024 * 1024,
            request_timeout_seconds: 60,
            providers: ProviderEndpoints::default(),
            credentials: CredentialConfig::default(),
            pricing,
            mappings: Vec::new(),
            engine: EngineConfig::default(),
            quality: QualityThresholds::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_threshold_rules() {
        let config = ServiceConfig::default();
        assert!(config.quality.spike_std_devs.is_none());
        assert!(config.quality.cost_std_devs.is_none());
        assert!(config.quality.missing_events_ratio.is_none());
        assert_eq!(config.engine.dedup_window_hours, MIN_DEDUP_WINDOW_HOURS);
        assert_eq!(config.engine.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn secrets_file_shape() {
        let config: CredentialConfig = serde_json::from_str(
            r#"{
                "providers": {
                    "retell": {"apiKey": "key_1"},
                    "twilio": {"apiKey": "token", "accountId": "AC1"}
                },
                "tenants": {"t1": {"retell": {"apiKey": "key_t1"}}}
            }"#,
        )
        .unwrap();
        assert!(config.has_provider("twilio"));
        assert!(!format!("{config:?}").contains("key_1"));
        assert_eq!(config.tenants["t1"]["retell"].api_key, "key_t1");
    }
}
