//! Core types for the tally usage engine.
//!
//! This crate holds the model every other tally crate speaks:
//!
//! - **Identifiers**: `EventId`, `RunId`, `TenantId`, `ClientId`, `ProviderId`, `MetricKey`
//! - **Usage**: `UsageEvent`, `VendorCostData`, `CollectionMetadata`
//! - **Metrics**: `MetricDefinition`, `MetricCatalog`
//! - **Aggregates**: `CycleAggregate`, `CycleWindow`, `GroupKey`
//! - **Runs**: `CollectionRun`, `RunStatus`, `RunError`
//! - **Validation**: wire parsing, invariant checks, `QuarantinedEvent`
//!
//! # Money
//!
//! Quantities and costs are `rust_decimal::Decimal` and travel as JSON strings, so
//! `0.275` stays `0.275`. Costs are kept in the currency the vendor reported.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregate;
pub mod dedup;
pub mod error;
pub mod ids;
pub mod mapping;
pub mod metrics;
pub mod quarantine;
pub mod run;
pub mod usage;
pub mod validation;

pub use aggregate::{
    AnomalyFlag, CostBreakdown, CycleAggregate, CycleWindow, GroupKey, QualityMetrics,
};
pub use dedup::IdempotencyKey;
pub use error::{CoreError, Result};
pub use ids::{
    AgentId, ClientId, CorrelationId, EventId, IdError, MetricKey, ProviderId, QuarantineId,
    RunId, TenantId,
};
pub use mapping::{resolve_agent, ClientAgentMapping};
pub use metrics::{MetricCatalog, MetricDefinition};
pub use quarantine::QuarantinedEvent;
pub use run::{CollectionRun, RunError, RunErrorKind, RunStatus};
pub use usage::{CollectionMetadata, MetricUnit, SourcePagination, UsageEvent, VendorCostData};
pub use validation::{parse_wire_event, validate_event, ValidationError};

pub use rust_decimal::Decimal;
