//! Provider usage collectors for tally.
//!
//! A collector pulls one page of vendor usage for a tenant/client/window and turns it
//! into canonical [`UsageEvent`](tally_core::UsageEvent)s with vendor cost attached.
//!
//! - [`Collector`]: the capability set every provider implements
//! - [`CollectorRegistry`]: resolves collectors by provider and probes credentials
//! - [`ProviderThrottle`]: per-provider token buckets every vendor call waits on
//! - [`PricingCache`]: background-refreshed pricing snapshots
//! - [`CredentialVault`] / [`AgentDirectory`]: boundaries to external services
//!
//! Providers: Retell (call minutes), Twilio (billed call minutes) and OpenRouter
//! (input/output tokens).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collector;
pub mod credentials;
pub mod cursor;
pub mod directory;
pub mod error;
pub mod http;
pub mod pricing;
pub mod providers;
pub mod registry;
pub mod throttle;

pub use collector::{CollectParams, CollectPerformance, CollectResult, Collector, RateLimits};
pub use credentials::{Credential, CredentialVault, Secret, StaticVault};
pub use cursor::PageCursor;
pub use directory::{AgentDirectory, StaticDirectory};
pub use error::CollectorError;
pub use http::{classify_status, QuotaStatus, VendorHttp, VendorResponse, DEFAULT_RETRY_AFTER};
pub use pricing::{PriceQuote, PricingCache, PricingSnapshot, PricingSource, StaticPricing};
pub use providers::{
    CollectorDeps, OpenRouterCollector, OpenRouterPricing, RetellCollector, TwilioCollector,
};
pub use registry::CollectorRegistry;
pub use throttle::ProviderThrottle;
