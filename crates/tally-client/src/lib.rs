//! Tally client SDK.
//!
//! Lets schedulers and upstream services drive the tally API: trigger collection
//! runs, push canonical usage events and aggregate billing cycles.
//!
//! # Example
//!
//! ```no_run
//! use tally_client::{CollectionRequest, TallyClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TallyClient::new("http://tally.billing.svc:8080", "your-service-api-key")?;
//!
//! let run = client
//!     .run_collection(&CollectionRequest {
//!         provider: "retell".parse()?,
//!         tenant_id: "acme".parse()?,
//!         client_id: "dental-group".parse()?,
//!         window_start: "2025-03-10T00:00:00Z".parse()?,
//!         window_end: "2025-03-11T00:00:00Z".parse()?,
//!         correlation_id: "nightly-2025-03-10".parse()?,
//!     })
//!     .await?;
//!
//! println!("{} events persisted", run.events_processed);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, TallyClient};
pub use error::ClientError;
pub use types::*;
