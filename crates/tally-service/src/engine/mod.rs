//! Collection and aggregation engines.

pub mod aggregation;
pub mod audit;
pub mod collection;
pub mod error;
pub mod idempotency;
pub mod quality;
pub mod writer;

#[cfg(test)]
mod testing;

pub use aggregation::{AggregationEngine, AggregationReport, AggregationRequest, GroupFailure};
pub use audit::{AuditKind, AuditRecord, AuditSink, MemoryAudit, TracingAudit};
pub use collection::{CollectionEngine, CollectionRequest};
pub use error::EngineError;
pub use idempotency::IdempotencyManager;
pub use writer::{EventWriter, WriteOutcome};
