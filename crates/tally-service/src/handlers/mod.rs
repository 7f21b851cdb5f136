//! API handlers.

pub mod aggregations;
pub mod collections;
pub mod events;
pub mod health;
pub mod providers;

use tally_core::IdError;

use crate::error::ApiError;

/// Parse an identifier taken from a path or query, rejecting it as a bad request.
pub(crate) fn parse_id<T>(value: &str, what: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = IdError>,
{
    value
        .parse()
        .map_err(|e: IdError| ApiError::BadRequest(format!("invalid {what}: {e}")))
}
