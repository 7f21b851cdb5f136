//! Opaque page cursors.
//!
//! A cursor carries everything needed to fetch the next page: the vendor's own
//! position token and the page number. It is hex-encoded JSON so it survives query
//! strings and storage untouched.

use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

/// Decoded pagination position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Vendor position token (pagination key, next-page URI, day offset...).
    #[serde(rename = "p")]
    pub position: String,
    /// Zero-based number of the page this cursor fetches.
    #[serde(rename = "n")]
    pub page: u32,
}

impl PageCursor {
    /// Cursor of the page after `page`.
    #[must_use]
    pub fn next(position: impl Into<String>, page: u32) -> Self {
        Self {
            position: position.into(),
            page: page + 1,
        }
    }

    /// Encode as an opaque string.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing a struct of two plain fields cannot fail.
        hex::encode(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Decode an opaque string.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Permanent` if the cursor was not produced by `encode`.
    pub fn decode(cursor: &str) -> Result<Self, CollectorError> {
        let bytes = hex::decode(cursor)
            .map_err(|_| CollectorError::Permanent("malformed cursor".into()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| CollectorError::Permanent("malformed cursor".into()))
    }

    /// Decode an optional cursor; `None` is the first page.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Permanent` for malformed cursors.
    pub fn decode_opt(cursor: Option<&str>) -> Result<Option<Self>, CollectorError> {
        cursor.map(Self::decode).transpose()
    }
}
